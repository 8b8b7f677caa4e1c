//! Locator vocabulary: selectors, scopes, and ordered strategy lists.
//!
//! A [`Strategies`] value is the reusable form of the inline selector arrays
//! that end-to-end suites grow at every call site. Order matters: the resolver
//! tries strategies first to last and reports which one matched.

use crate::driver::NodeId;
use crate::normalize::humanize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeOp {
    /// `[name='value']`
    Equals,
    /// `[name*='value']`
    Contains,
    /// `[name^='value']`
    StartsWith,
}

impl AttributeOp {
    /// CSS operator token
    #[must_use]
    pub const fn css_token(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::Contains => "*=",
            Self::StartsWith => "^=",
        }
    }

    /// Apply the operator to an attribute value
    #[must_use]
    pub fn test(&self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::Contains => actual.contains(expected),
            Self::StartsWith => actual.starts_with(expected),
        }
    }
}

/// Selector for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// CSS selector
    Css(String),
    /// XPath selector
    XPath(String),
    /// Visible text; `exact` requires the whole text to match
    Text {
        /// Text to match
        text: String,
        /// Require an exact match
        exact: bool,
    },
    /// ARIA role with optional accessible name
    Role {
        /// Role name
        role: String,
        /// Accessible name (case-insensitive substring)
        name: Option<String>,
    },
    /// Attribute test
    Attribute {
        /// Attribute name
        name: String,
        /// Comparison operator
        op: AttributeOp,
        /// Value to compare against
        value: String,
    },
    /// Placeholder text (case-insensitive substring)
    Placeholder(String),
    /// `data-testid` attribute
    TestId(String),
    /// Tag name
    Tag(String),
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an XPath selector
    #[must_use]
    pub fn xpath(selector: impl Into<String>) -> Self {
        Self::XPath(selector.into())
    }

    /// Create a substring text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            exact: false,
        }
    }

    /// Create an exact text selector
    #[must_use]
    pub fn text_exact(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            exact: true,
        }
    }

    /// Create a role selector
    #[must_use]
    pub fn role(role: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: None,
        }
    }

    /// Create a role selector with accessible name
    #[must_use]
    pub fn role_named(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: Some(name.into()),
        }
    }

    /// Create an attribute selector
    #[must_use]
    pub fn attribute(name: impl Into<String>, op: AttributeOp, value: impl Into<String>) -> Self {
        Self::Attribute {
            name: name.into(),
            op,
            value: value.into(),
        }
    }

    /// Create a placeholder selector
    #[must_use]
    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::Placeholder(text.into())
    }

    /// Create a test id selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Create a tag selector
    #[must_use]
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag(tag.into())
    }

    /// Convert to the query string a CSS/Playwright-style driver understands
    #[must_use]
    pub fn to_query(&self) -> String {
        match self {
            Self::Css(s) => s.clone(),
            Self::XPath(s) => format!("xpath={s}"),
            Self::Text { text, exact } => {
                if *exact {
                    format!("text=\"{text}\"")
                } else {
                    format!("text={text}")
                }
            }
            Self::Role { role, name } => match name {
                Some(name) => format!("role={role}[name=\"{name}\"]"),
                None => format!("role={role}"),
            },
            Self::Attribute { name, op, value } => {
                format!("[{name}{}'{}']", op.css_token(), value.replace('\'', "\\'"))
            }
            Self::Placeholder(p) => format!("[placeholder*='{}' i]", p.replace('\'', "\\'")),
            Self::TestId(id) => format!("[data-testid='{id}']"),
            Self::Tag(t) => t.clone(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// Where a strategy searches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Whole page
    #[default]
    Page,
    /// Descendants of a previously matched node
    Within(NodeId),
}

/// A named, scoped selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocatorStrategy {
    name: String,
    selector: Selector,
    scope: Scope,
}

impl LocatorStrategy {
    /// Create a page-scoped strategy
    #[must_use]
    pub fn new(name: impl Into<String>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            selector,
            scope: Scope::Page,
        }
    }

    /// Restrict the strategy to descendants of `node`
    #[must_use]
    pub fn within(mut self, node: NodeId) -> Self {
        self.scope = Scope::Within(node);
        self
    }

    /// Strategy name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Selector
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Scope
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }
}

impl fmt::Display for LocatorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::Page => write!(f, "{}: {}", self.name, self.selector),
            Scope::Within(node) => write!(f, "{}: {} within {}", self.name, self.selector, node),
        }
    }
}

/// Ordered list of strategies, tried first to last
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Strategies {
    label: String,
    items: Vec<LocatorStrategy>,
}

impl Strategies {
    /// Create an empty list with a human label used in diagnostics
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            items: Vec::new(),
        }
    }

    /// Create a list with a single strategy
    #[must_use]
    pub fn single(label: impl Into<String>, selector: Selector) -> Self {
        let label = label.into();
        Self::new(label.clone()).or(label, selector)
    }

    /// Shorthand for a single CSS strategy labelled by its own query
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        let selector = selector.into();
        Self::single(selector.clone(), Selector::Css(selector))
    }

    /// Append a fallback strategy
    #[must_use]
    pub fn or(mut self, name: impl Into<String>, selector: Selector) -> Self {
        self.items.push(LocatorStrategy::new(name, selector));
        self
    }

    /// Append a prebuilt strategy
    #[must_use]
    pub fn or_strategy(mut self, strategy: LocatorStrategy) -> Self {
        self.items.push(strategy);
        self
    }

    /// Append every strategy from another list
    #[must_use]
    pub fn then(mut self, other: Self) -> Self {
        self.items.extend(other.items);
        self
    }

    /// Re-scope every strategy to descendants of `node`
    #[must_use]
    pub fn within(&self, node: NodeId) -> Self {
        Self {
            label: self.label.clone(),
            items: self.items.iter().cloned().map(|s| s.within(node)).collect(),
        }
    }

    /// Diagnostic label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Strategy at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LocatorStrategy> {
        self.items.get(index)
    }

    /// Iterate strategies in order
    pub fn iter(&self) -> std::slice::Iter<'_, LocatorStrategy> {
        self.items.iter()
    }

    /// Number of strategies
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Strategy names in order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|s| s.name.clone()).collect()
    }

    /// Fallback family for a form field known by its model name.
    ///
    /// Tries the exact `name` and `id` attributes, a lower-cased name, then
    /// substring matches on name/id, then placeholder and `aria-label` text
    /// using the humanized label ("FamilyName" becomes "Family Name").
    #[must_use]
    pub fn field(name: &str) -> Self {
        let human = humanize(name);
        let lower = name.to_lowercase();
        let mut list = Self::new(format!("field '{name}'"))
            .or("name", Selector::attribute("name", AttributeOp::Equals, name))
            .or("id", Selector::attribute("id", AttributeOp::Equals, name));
        if lower != name {
            list = list
                .or("name (lower)", Selector::attribute("name", AttributeOp::Equals, lower.clone()))
                .or("id (lower)", Selector::attribute("id", AttributeOp::Equals, lower.clone()));
        }
        list.or("name contains", Selector::attribute("name", AttributeOp::Contains, name))
            .or("id contains", Selector::attribute("id", AttributeOp::Contains, name))
            .or("placeholder", Selector::placeholder(human.clone()))
            .or("aria-label", Selector::role_named("textbox", human))
            .or("test id", Selector::test_id(lower))
    }

    /// Fallback family for a button known by its visible label
    #[must_use]
    pub fn button(label: &str) -> Self {
        let escaped = label.replace('\'', "\\'");
        Self::new(format!("button '{label}'"))
            .or("role button", Selector::role_named("button", label))
            .or(
                "submit value",
                Selector::css(format!("input[type='submit'][value='{escaped}']")),
            )
            .or(
                "button value",
                Selector::css(format!("input[type='button'][value='{escaped}']")),
            )
            .or("role link", Selector::role_named("link", label))
            .or("exact text", Selector::text_exact(label))
    }

    /// Fallback family for a link known by its visible label
    #[must_use]
    pub fn link(label: &str) -> Self {
        Self::new(format!("link '{label}'"))
            .or("role link", Selector::role_named("link", label))
            .or("role button", Selector::role_named("button", label))
            .or("text", Selector::text(label))
    }
}

impl<'a> IntoIterator for &'a Strategies {
    type Item = &'a LocatorStrategy;
    type IntoIter = std::slice::Iter<'a, LocatorStrategy>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl fmt::Display for Strategies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
