//! In-memory page for offline tests.
//!
//! [`MockPage`] implements [`PageDriver`] over a small DOM built from [`El`]
//! trees. It understands a subset of CSS (tags, `#id`, `.class`, attribute
//! tests with `=`, `*=`, `^=`, `$=` and the `i` flag, descendant and child
//! combinators, comma lists), text and role selectors, and scripted behavior:
//!
//! - elements tagged with [`El::action`] run a registered [`ClickAction`] when
//!   clicked, checked, or given files
//! - [`MockDom::navigate`] replaces the document and bumps the navigation epoch
//! - [`MockDom::virtualize`] renders only a window of rows and re-renders it on
//!   `scroll_by`
//! - [`MockDom::confirm`] answers through the page's [`DialogHandler`]
//! - downloads, popups and navigations reach every live subscription
//!
//! ```
//! use resolute::mock::{El, MockPage};
//!
//! let page = MockPage::new("https://app/login");
//! page.render(
//!     El::new("form")
//!         .child(El::input("Username"))
//!         .child(El::new("button").text("Login").action("login")),
//! )
//! .unwrap();
//! ```

use crate::dialog::{AutoDialogBehavior, Dialog, DialogHandler};
use crate::driver::{
    DomEvent, DownloadPayload, EventSink, EventStream, NodeDescriptor, NodeId, PageDriver,
    PageEvent, PageEventKind, ScrollState,
};
use crate::locator::{Scope, Selector};
use crate::normalize::{collapse, fold};
use crate::result::{ResoluteError, ResoluteResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Attribute that links an element to a registered [`ClickAction`]
pub const ACTION_ATTR: &str = "data-action";

/// Attribute that defers value commit until a `change` event
pub const COMMIT_ATTR: &str = "data-commit";

/// Scripted behavior run when an action element is activated
pub type ClickAction = Arc<dyn Fn(&mut MockDom, NodeId) + Send + Sync>;

// =============================================================================
// ELEMENT BUILDER
// =============================================================================

/// Element template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct El {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<El>,
}

impl El {
    /// Create an element
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_lowercase(),
            ..Self::default()
        }
    }

    /// Text input with `name` and `id` set to `name`
    #[must_use]
    pub fn input(name: &str) -> Self {
        Self::new("input").attr("type", "text").name(name).id(name)
    }

    /// Table row with one `td` per cell
    #[must_use]
    pub fn row<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        cells
            .into_iter()
            .fold(Self::new("tr"), |tr, cell| tr.child(Self::new("td").text(cell)))
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Set `id`
    #[must_use]
    pub fn id(self, id: impl Into<String>) -> Self {
        self.attr("id", id)
    }

    /// Set `name`
    #[must_use]
    pub fn name(self, name: impl Into<String>) -> Self {
        self.attr("name", name)
    }

    /// Add a class
    #[must_use]
    pub fn class(mut self, class: &str) -> Self {
        let classes = self.attrs.entry("class".to_string()).or_default();
        if !classes.is_empty() {
            classes.push(' ');
        }
        classes.push_str(class);
        self
    }

    /// Set `placeholder`
    #[must_use]
    pub fn placeholder(self, text: impl Into<String>) -> Self {
        self.attr("placeholder", text)
    }

    /// Set the initial value
    #[must_use]
    pub fn value(self, value: impl Into<String>) -> Self {
        self.attr("value", value)
    }

    /// Set own text
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Mark hidden
    #[must_use]
    pub fn hidden(self) -> Self {
        self.attr("hidden", "")
    }

    /// Mark disabled
    #[must_use]
    pub fn disabled(self) -> Self {
        self.attr("disabled", "")
    }

    /// Mark checked
    #[must_use]
    pub fn checked(self) -> Self {
        self.attr("checked", "")
    }

    /// Mark selected (options)
    #[must_use]
    pub fn selected(self) -> Self {
        self.attr("selected", "")
    }

    /// Run the registered action `name` when activated
    #[must_use]
    pub fn action(self, name: impl Into<String>) -> Self {
        self.attr(ACTION_ATTR, name)
    }

    /// Only report typed values after a `change` event
    #[must_use]
    pub fn commit_on_change(self) -> Self {
        self.attr(COMMIT_ATTR, "change")
    }

    /// Append a child
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Append children
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Self>) -> Self {
        self.children.extend(children);
        self
    }
}

// =============================================================================
// DOM
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    value: String,
    pending: Option<String>,
    checked: bool,
    files: Vec<PathBuf>,
}

impl Node {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    fn has(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    fn input_type(&self) -> Option<String> {
        if self.tag == "input" {
            Some(self.attr("type").unwrap_or("text").to_lowercase())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct VirtualList {
    container: NodeId,
    body: NodeId,
    rows: Vec<El>,
    row_height: i64,
    viewport_rows: usize,
    top: i64,
}

impl VirtualList {
    fn max_top(&self) -> i64 {
        let total = self.rows.len() as i64 * self.row_height;
        (total - self.viewport_rows as i64 * self.row_height).max(0)
    }

    fn window(&self) -> &[El] {
        let first = (self.top / self.row_height.max(1)) as usize;
        let first = first.min(self.rows.len());
        let last = (first + self.viewport_rows).min(self.rows.len());
        &self.rows[first..last]
    }
}

/// Mutable state behind a [`MockPage`]
pub struct MockDom {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
    url: String,
    epoch: u64,
    document: Option<String>,
    pending_requests: usize,
    dialogs: DialogHandler,
    subscribers: Vec<(Vec<PageEventKind>, EventSink)>,
    actions: HashMap<String, ClickAction>,
    virtual_lists: Vec<VirtualList>,
    calls: Vec<String>,
    closed: bool,
}

impl fmt::Debug for MockDom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDom")
            .field("url", &self.url)
            .field("epoch", &self.epoch)
            .field("nodes", &self.nodes.len())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl MockDom {
    fn new(url: &str) -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                tag: "body".to_string(),
                ..Node::default()
            },
        );
        Self {
            nodes,
            root,
            next_id: 1,
            url: url.to_string(),
            epoch: 0,
            document: None,
            pending_requests: 0,
            dialogs: DialogHandler::new(),
            subscribers: Vec::new(),
            actions: HashMap::new(),
            virtual_lists: Vec::new(),
            calls: Vec::new(),
            closed: false,
        }
    }

    fn node(&self, id: NodeId) -> ResoluteResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| ResoluteError::driver(format!("{id} is detached from the document")))
    }

    fn node_mut(&mut self, id: NodeId) -> ResoluteResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| ResoluteError::driver(format!("{id} is detached from the document")))
    }

    fn log(&mut self, call: String) {
        self.calls.push(call);
    }

    // -------------------------------------------------------------------------
    // Document structure
    // -------------------------------------------------------------------------

    /// Body node
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Current URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Change the URL without navigating (history push)
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    /// Current navigation epoch
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    fn build(&mut self, el: El, parent: NodeId) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let value = if el.tag == "textarea" {
            el.text.clone()
        } else {
            el.attrs.get("value").cloned().unwrap_or_default()
        };
        let checked = el.attrs.contains_key("checked");
        self.nodes.insert(
            id,
            Node {
                tag: el.tag,
                attrs: el.attrs,
                text: el.text,
                parent: Some(parent),
                children: Vec::new(),
                value,
                pending: None,
                checked,
                files: Vec::new(),
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        for child in el.children {
            self.build(child, id);
        }
        id
    }

    fn drop_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.drop_subtree(child);
            }
        }
    }

    fn clear_children(&mut self, id: NodeId) {
        let children = self
            .nodes
            .get_mut(&id)
            .map(|n| std::mem::take(&mut n.children))
            .unwrap_or_default();
        for child in children {
            self.drop_subtree(child);
        }
        self.virtual_lists
            .retain(|list| self.nodes.contains_key(&list.body));
    }

    /// Append `el` under `parent`
    pub fn append(&mut self, parent: NodeId, el: El) -> ResoluteResult<NodeId> {
        self.node(parent)?;
        Ok(self.build(el, parent))
    }

    /// Remove a node and its subtree
    pub fn remove(&mut self, id: NodeId) -> ResoluteResult<()> {
        let parent = self.node(id)?.parent;
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        self.drop_subtree(id);
        self.virtual_lists
            .retain(|list| self.nodes.contains_key(&list.body));
        Ok(())
    }

    /// Replace the body content without navigating
    pub fn render(&mut self, el: El) -> NodeId {
        self.document = None;
        self.clear_children(self.root);
        self.build(el, self.root)
    }

    /// Replace the body in place and invalidate every handle (client re-render)
    pub fn rerender(&mut self, el: El) -> NodeId {
        self.epoch += 1;
        self.render(el)
    }

    /// Navigate to `url` showing `el`
    pub fn navigate(&mut self, url: impl Into<String>, el: El) -> NodeId {
        self.url = url.into();
        let id = self.rerender(el);
        let url = self.url.clone();
        self.emit(PageEvent::Navigated { url });
        id
    }

    /// Navigate to a raw document, e.g. an inline PDF viewer
    pub fn show_document(&mut self, url: impl Into<String>, content: impl Into<String>) {
        self.url = url.into();
        self.epoch += 1;
        self.clear_children(self.root);
        self.document = Some(content.into());
        let url = self.url.clone();
        self.emit(PageEvent::Navigated { url });
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    fn descendants(&self, of: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(&of)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn full_text(&self, id: NodeId) -> String {
        let Some(node) = self.nodes.get(&id) else {
            return String::new();
        };
        let mut parts = vec![node.text.clone()];
        parts.extend(node.children.iter().map(|c| self.full_text(*c)));
        collapse(&parts.join(" "))
    }

    /// Nodes matching `selector` in `scope`, in document order
    pub fn query(&self, scope: &Scope, selector: &Selector) -> ResoluteResult<Vec<NodeId>> {
        let base = match scope {
            Scope::Page => self.root,
            Scope::Within(node) => {
                self.node(*node)?;
                *node
            }
        };
        let candidates = self.descendants(base);
        let matched = match selector {
            Selector::Css(query) => {
                let list = css::parse_list(query).map_err(|e| {
                    ResoluteError::driver(format!("unsupported selector '{query}': {e}"))
                })?;
                candidates
                    .into_iter()
                    .filter(|id| list.iter().any(|c| self.matches_complex(*id, c, c.parts.len() - 1)))
                    .collect()
            }
            Selector::XPath(query) => {
                return Err(ResoluteError::driver(format!(
                    "XPath is not supported by MockPage: {query}"
                )))
            }
            Selector::Tag(tag) => candidates
                .into_iter()
                .filter(|id| self.nodes[id].tag.eq_ignore_ascii_case(tag))
                .collect(),
            Selector::TestId(test_id) => candidates
                .into_iter()
                .filter(|id| self.nodes[id].attr("data-testid") == Some(test_id.as_str()))
                .collect(),
            Selector::Placeholder(text) => {
                let wanted = fold(text);
                candidates
                    .into_iter()
                    .filter(|id| {
                        self.nodes[id]
                            .attr("placeholder")
                            .is_some_and(|p| fold(p).contains(&wanted))
                    })
                    .collect()
            }
            Selector::Attribute { name, op, value } => candidates
                .into_iter()
                .filter(|id| self.nodes[id].attr(name).is_some_and(|v| op.test(v, value)))
                .collect(),
            Selector::Role { role, name } => candidates
                .into_iter()
                .filter(|id| {
                    self.role_of(*id)
                        .is_some_and(|r| r.eq_ignore_ascii_case(role))
                        && name.as_ref().map_or(true, |n| {
                            fold(&self.accessible_name(*id)).contains(&fold(n))
                        })
                })
                .collect(),
            Selector::Text { text, exact } => {
                let matches_text = |id: NodeId| {
                    let full = self.full_text(id);
                    if *exact {
                        full == collapse(text)
                    } else {
                        fold(&full).contains(&fold(text))
                    }
                };
                candidates
                    .into_iter()
                    .filter(|id| {
                        matches_text(*id)
                            && !self.nodes[id].children.iter().any(|c| matches_text(*c))
                    })
                    .collect()
            }
        };
        Ok(matched)
    }

    /// First node matching a CSS query anywhere in the page
    #[must_use]
    pub fn find(&self, css: &str) -> Option<NodeId> {
        self.find_all(css).into_iter().next()
    }

    /// Every node matching a CSS query
    #[must_use]
    pub fn find_all(&self, css: &str) -> Vec<NodeId> {
        self.query(&Scope::Page, &Selector::css(css))
            .unwrap_or_default()
    }

    /// Current value of the first node matching `css`, or empty
    #[must_use]
    pub fn field_value(&self, css: &str) -> String {
        self.find(css)
            .and_then(|id| self.value_of(id).ok())
            .unwrap_or_default()
    }

    /// Text content of a node
    #[must_use]
    pub fn text_of(&self, id: NodeId) -> String {
        self.full_text(id)
    }

    /// Attribute of a node
    #[must_use]
    pub fn attr_of(&self, id: NodeId, name: &str) -> Option<String> {
        self.nodes.get(&id).and_then(|n| n.attr(name).map(ToString::to_string))
    }

    /// Whether a checkbox is checked
    #[must_use]
    pub fn is_checked(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.checked)
    }

    /// Files attached to a file input
    #[must_use]
    pub fn files_of(&self, id: NodeId) -> Vec<PathBuf> {
        self.nodes.get(&id).map(|n| n.files.clone()).unwrap_or_default()
    }

    /// Replace a node's own text
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> ResoluteResult<()> {
        self.node_mut(id)?.text = text.into();
        Ok(())
    }

    /// Set or replace an attribute
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> ResoluteResult<()> {
        self.node_mut(id)?
            .attrs
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Remove an attribute
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> ResoluteResult<()> {
        self.node_mut(id)?.attrs.remove(name);
        Ok(())
    }

    fn value_of(&self, id: NodeId) -> ResoluteResult<String> {
        let node = self.node(id)?;
        if node.tag != "select" || !node.value.is_empty() {
            return Ok(node.value.clone());
        }
        let options: Vec<NodeId> = self
            .descendants(id)
            .into_iter()
            .filter(|c| self.nodes[c].tag == "option")
            .collect();
        let chosen = options
            .iter()
            .find(|o| self.nodes[*o].has("selected"))
            .or_else(|| options.first());
        Ok(chosen.map(|o| self.option_value(*o)).unwrap_or_default())
    }

    fn option_value(&self, option: NodeId) -> String {
        self.nodes.get(&option).map_or_else(String::new, |n| {
            n.attr("value")
                .map_or_else(|| self.full_text(option), ToString::to_string)
        })
    }

    fn is_visible(&self, id: NodeId) -> ResoluteResult<bool> {
        let mut current = Some(id);
        while let Some(cur) = current {
            let node = self.node(cur)?;
            if node.has("hidden") || node.attr("type") == Some("hidden") {
                return Ok(false);
            }
            current = node.parent;
        }
        Ok(true)
    }

    fn role_of(&self, id: NodeId) -> Option<String> {
        let node = self.nodes.get(&id)?;
        if let Some(role) = node.attr("role") {
            return Some(role.to_lowercase());
        }
        let role = match node.tag.as_str() {
            "button" => "button",
            "a" => "link",
            "textarea" => "textbox",
            "select" => "combobox",
            "table" => "table",
            "tr" => "row",
            "td" => "cell",
            "th" => "columnheader",
            "option" => "option",
            "input" => match node.input_type().as_deref() {
                Some("submit" | "button" | "reset" | "image") => "button",
                Some("checkbox") => "checkbox",
                Some("radio") => "radio",
                Some("file" | "hidden") => return None,
                _ => "textbox",
            },
            _ => return None,
        };
        Some(role.to_string())
    }

    fn accessible_name(&self, id: NodeId) -> String {
        let Some(node) = self.nodes.get(&id) else {
            return String::new();
        };
        if let Some(label) = node.attr("aria-label") {
            return label.to_string();
        }
        match node.input_type().as_deref() {
            Some("submit" | "button" | "reset") => node.attr("value").unwrap_or_default().to_string(),
            Some(_) => node.attr("placeholder").unwrap_or_default().to_string(),
            None if node.tag == "textarea" => node.attr("placeholder").unwrap_or_default().to_string(),
            None => self.full_text(id),
        }
    }

    fn matches_complex(&self, id: NodeId, complex: &css::Complex, idx: usize) -> bool {
        let Some((combinator, compound)) = complex.parts.get(idx) else {
            return false;
        };
        if !self.matches_compound(id, compound) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        let mut parent = self.nodes.get(&id).and_then(|n| n.parent);
        match combinator {
            css::Combinator::Child => {
                parent.is_some_and(|p| self.matches_complex(p, complex, idx - 1))
            }
            css::Combinator::Descendant => {
                while let Some(p) = parent {
                    if self.matches_complex(p, complex, idx - 1) {
                        return true;
                    }
                    parent = self.nodes.get(&p).and_then(|n| n.parent);
                }
                false
            }
        }
    }

    fn matches_compound(&self, id: NodeId, compound: &css::Compound) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if let Some(tag) = &compound.tag {
            if !node.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(want) = &compound.id {
            if node.attr("id") != Some(want.as_str()) {
                return false;
            }
        }
        let classes: Vec<&str> = node.attr("class").unwrap_or_default().split_whitespace().collect();
        if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
        compound.attrs.iter().all(|test| test.matches(node.attr(&test.name)))
    }

    // -------------------------------------------------------------------------
    // Behavior
    // -------------------------------------------------------------------------

    /// Register the behavior for elements tagged with `name`
    pub fn on_action<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: Fn(&mut Self, NodeId) + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
    }

    fn run_action(&mut self, id: NodeId) {
        let action = self
            .nodes
            .get(&id)
            .and_then(|n| n.attr(ACTION_ATTR))
            .and_then(|name| self.actions.get(name))
            .cloned();
        if let Some(action) = action {
            action(self, id);
        }
    }

    /// Deliver an event to every subscription that wants its kind
    pub fn emit(&mut self, event: PageEvent) {
        let kind = event.kind();
        self.subscribers.retain(|(kinds, sink)| {
            if kinds.contains(&kind) {
                sink.send(event.clone()).is_ok()
            } else {
                !sink.is_closed()
            }
        });
    }

    /// Fire a completed download
    pub fn download(&mut self, filename: &str, url: &str, bytes: Vec<u8>) {
        self.emit(PageEvent::Download(DownloadPayload {
            suggested_filename: filename.to_string(),
            url: url.to_string(),
            bytes,
        }));
    }

    /// Open a popup at `url`
    pub fn popup(&mut self, url: &str) {
        self.emit(PageEvent::Popup {
            url: url.to_string(),
        });
    }

    /// Raise a `confirm()` dialog; returns whether it was accepted
    pub fn confirm(&mut self, message: &str) -> bool {
        let dialog = self.dialogs.handle(Dialog::confirm(message));
        let accepted = dialog.is_accepted();
        self.emit(PageEvent::Dialog(dialog));
        accepted
    }

    /// Set the in-flight request count
    pub fn set_pending_requests(&mut self, count: usize) {
        self.pending_requests = count;
    }

    /// Render `rows` into `body` through a scrolling window owned by `container`
    pub fn virtualize(
        &mut self,
        container: NodeId,
        body: NodeId,
        rows: Vec<El>,
        row_height: i64,
        viewport_rows: usize,
    ) -> ResoluteResult<()> {
        self.node(container)?;
        self.node(body)?;
        self.virtual_lists.retain(|l| l.container != container);
        self.virtual_lists.push(VirtualList {
            container,
            body,
            rows,
            row_height: row_height.max(1),
            viewport_rows,
            top: 0,
        });
        self.refresh_window(container);
        Ok(())
    }

    fn refresh_window(&mut self, container: NodeId) {
        let Some(list) = self.virtual_lists.iter().find(|l| l.container == container).cloned() else {
            return;
        };
        let children = self
            .nodes
            .get_mut(&list.body)
            .map(|n| std::mem::take(&mut n.children))
            .unwrap_or_default();
        for child in children {
            self.drop_subtree(child);
        }
        for row in list.window().to_vec() {
            self.build(row, list.body);
        }
    }

    fn scroll(&mut self, container: NodeId, dy: i64) -> ResoluteResult<ScrollState> {
        self.node(container)?;
        let Some(list) = self.virtual_lists.iter_mut().find(|l| l.container == container) else {
            return Ok(ScrollState::default());
        };
        let max_top = list.max_top();
        list.top = (list.top + dy).clamp(0, max_top);
        let state = ScrollState {
            top: list.top,
            max_top,
        };
        self.refresh_window(container);
        Ok(state)
    }

    fn click(&mut self, id: NodeId) -> ResoluteResult<()> {
        let node = self.node_mut(id)?;
        match node.input_type().as_deref() {
            Some("checkbox") => node.checked = !node.checked,
            Some("radio") => node.checked = true,
            _ => {}
        }
        self.run_action(id);
        Ok(())
    }

    fn dispatch(&mut self, id: NodeId, event: DomEvent) -> ResoluteResult<()> {
        let node = self.node_mut(id)?;
        if event == DomEvent::Change {
            if let Some(pending) = node.pending.take() {
                node.value = pending;
            }
        }
        Ok(())
    }

    fn describe(&self, id: NodeId) -> ResoluteResult<NodeDescriptor> {
        let node = self.node(id)?;
        let text = self.full_text(id);
        Ok(NodeDescriptor {
            tag: node.tag.clone(),
            input_type: node.attr("type").map(ToString::to_string),
            name: node.attr("name").map(ToString::to_string),
            id: node.attr("id").map(ToString::to_string),
            placeholder: node.attr("placeholder").map(ToString::to_string),
            text: (!text.is_empty()).then_some(text),
        })
    }

    fn serialize(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        out.push('<');
        out.push_str(&node.tag);
        for (k, v) in &node.attrs {
            out.push_str(&format!(" {k}=\"{v}\""));
        }
        out.push('>');
        out.push_str(&node.text);
        for child in &node.children {
            self.serialize(*child, out);
        }
        out.push_str(&format!("</{}>", node.tag));
    }

    /// Serialized document
    #[must_use]
    pub fn content(&self) -> String {
        if let Some(document) = &self.document {
            return document.clone();
        }
        let mut out = String::from("<html>");
        self.serialize(self.root, &mut out);
        out.push_str("</html>");
        out
    }

    /// Driver calls made so far
    #[must_use]
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Dialog history
    #[must_use]
    pub fn dialogs(&self) -> Vec<Dialog> {
        self.dialogs.dialogs()
    }
}

// =============================================================================
// PAGE
// =============================================================================

/// Shareable in-memory page
#[derive(Clone)]
pub struct MockPage {
    dom: Arc<Mutex<MockDom>>,
}

impl fmt::Debug for MockPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dom.lock() {
            Ok(dom) => f.debug_struct("MockPage").field("dom", &*dom).finish(),
            Err(_) => f.write_str("MockPage { <poisoned> }"),
        }
    }
}

impl MockPage {
    /// Create an empty page at `url`
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            dom: Arc::new(Mutex::new(MockDom::new(url))),
        }
    }

    fn lock(&self) -> ResoluteResult<MutexGuard<'_, MockDom>> {
        self.dom
            .lock()
            .map_err(|_| ResoluteError::driver("mock page lock poisoned"))
    }

    fn live(&self) -> ResoluteResult<MutexGuard<'_, MockDom>> {
        let dom = self.lock()?;
        if dom.closed {
            return Err(ResoluteError::driver("page is closed"));
        }
        Ok(dom)
    }

    /// Run `f` with exclusive access to the DOM
    pub fn with_dom<R>(&self, f: impl FnOnce(&mut MockDom) -> R) -> ResoluteResult<R> {
        let mut dom = self.lock()?;
        Ok(f(&mut dom))
    }

    /// Replace the body content without navigating
    pub fn render(&self, el: El) -> ResoluteResult<NodeId> {
        self.with_dom(|dom| dom.render(el))
    }

    /// Navigate to `url` showing `el`
    pub fn navigate(&self, url: &str, el: El) -> ResoluteResult<NodeId> {
        self.with_dom(|dom| dom.navigate(url, el))
    }

    /// Register behavior for elements tagged with `name`
    pub fn on_action<F>(&self, name: &str, action: F) -> ResoluteResult<()>
    where
        F: Fn(&mut MockDom, NodeId) + Send + Sync + 'static,
    {
        self.with_dom(|dom| dom.on_action(name, action))
    }

    /// Set the in-flight request count
    pub fn set_pending_requests(&self, count: usize) -> ResoluteResult<()> {
        self.with_dom(|dom| dom.set_pending_requests(count))
    }

    /// First node matching a CSS query
    pub fn find(&self, css: &str) -> ResoluteResult<Option<NodeId>> {
        self.with_dom(|dom| dom.find(css))
    }

    /// Driver calls made so far
    pub fn calls(&self) -> ResoluteResult<Vec<String>> {
        self.with_dom(|dom| dom.calls().to_vec())
    }

    /// Dialog history
    pub fn dialogs(&self) -> ResoluteResult<Vec<Dialog>> {
        self.with_dom(|dom| dom.dialogs())
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> ResoluteResult<bool> {
        self.with_dom(|dom| dom.closed)
    }
}

#[async_trait]
impl PageDriver for MockPage {
    async fn query_all(&self, scope: &Scope, selector: &Selector) -> ResoluteResult<Vec<NodeId>> {
        self.live()?.query(scope, selector)
    }

    async fn is_visible(&self, node: NodeId) -> ResoluteResult<bool> {
        self.live()?.is_visible(node)
    }

    async fn is_enabled(&self, node: NodeId) -> ResoluteResult<bool> {
        Ok(!self.live()?.node(node)?.has("disabled"))
    }

    async fn describe(&self, node: NodeId) -> ResoluteResult<NodeDescriptor> {
        self.live()?.describe(node)
    }

    async fn text(&self, node: NodeId) -> ResoluteResult<String> {
        let dom = self.live()?;
        dom.node(node)?;
        Ok(dom.full_text(node))
    }

    async fn value(&self, node: NodeId) -> ResoluteResult<String> {
        self.live()?.value_of(node)
    }

    async fn attribute(&self, node: NodeId, name: &str) -> ResoluteResult<Option<String>> {
        let dom = self.live()?;
        Ok(dom.node(node)?.attr(name).map(ToString::to_string))
    }

    async fn is_checked(&self, node: NodeId) -> ResoluteResult<bool> {
        Ok(self.live()?.node(node)?.checked)
    }

    async fn click(&self, node: NodeId) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.log(format!("click {node}"));
        dom.click(node)
    }

    async fn focus(&self, node: NodeId) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.node(node)?;
        dom.log(format!("focus {node}"));
        Ok(())
    }

    async fn clear(&self, node: NodeId) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.log(format!("clear {node}"));
        let n = dom.node_mut(node)?;
        n.value.clear();
        n.pending = None;
        Ok(())
    }

    async fn set_value(&self, node: NodeId, text: &str) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.log(format!("set_value {node} {text}"));
        let n = dom.node_mut(node)?;
        if n.attr(COMMIT_ATTR) == Some("change") {
            n.pending = Some(text.to_string());
        } else {
            n.value = text.to_string();
        }
        Ok(())
    }

    async fn dispatch_event(&self, node: NodeId, event: DomEvent) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.log(format!("dispatch {} {node}", event.name()));
        dom.dispatch(node, event)
    }

    async fn choose_option(&self, select: NodeId, option: NodeId) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.log(format!("choose {select} {option}"));
        let value = dom.option_value(option);
        let siblings: Vec<NodeId> = dom
            .descendants(select)
            .into_iter()
            .filter(|c| dom.nodes[c].tag == "option")
            .collect();
        for sibling in siblings {
            dom.node_mut(sibling)?.attrs.remove("selected");
        }
        dom.node_mut(option)?
            .attrs
            .insert("selected".to_string(), String::new());
        dom.node_mut(select)?.value = value;
        Ok(())
    }

    async fn set_checked(&self, node: NodeId, checked: bool) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.log(format!("set_checked {node} {checked}"));
        let n = dom.node_mut(node)?;
        if n.checked != checked {
            n.checked = checked;
            dom.run_action(node);
        }
        Ok(())
    }

    async fn set_input_files(&self, node: NodeId, files: &[PathBuf]) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.log(format!("set_input_files {node} {}", files.len()));
        dom.node_mut(node)?.files = files.to_vec();
        dom.run_action(node);
        Ok(())
    }

    async fn scroll_by(&self, container: NodeId, dy: i64) -> ResoluteResult<ScrollState> {
        let mut dom = self.live()?;
        dom.log(format!("scroll_by {container} {dy}"));
        dom.scroll(container, dy)
    }

    async fn subscribe(&self, kinds: &[PageEventKind]) -> ResoluteResult<EventStream> {
        let mut dom = self.live()?;
        let (sink, stream) = EventStream::channel(kinds);
        dom.subscribers.push((kinds.to_vec(), sink));
        Ok(stream)
    }

    async fn current_url(&self) -> ResoluteResult<String> {
        Ok(self.live()?.url.clone())
    }

    async fn page_content(&self) -> ResoluteResult<String> {
        Ok(self.live()?.content())
    }

    async fn pending_requests(&self) -> ResoluteResult<usize> {
        Ok(self.live()?.pending_requests)
    }

    async fn navigation_epoch(&self) -> ResoluteResult<u64> {
        Ok(self.live()?.epoch)
    }

    async fn set_dialog_behavior(&self, behavior: AutoDialogBehavior) -> ResoluteResult<()> {
        let mut dom = self.live()?;
        dom.log(format!("dialog_behavior {behavior:?}"));
        dom.dialogs.set_behavior(behavior);
        Ok(())
    }

    async fn close(&self) -> ResoluteResult<()> {
        let mut dom = self.lock()?;
        dom.log("close".to_string());
        dom.closed = true;
        dom.subscribers.clear();
        Ok(())
    }
}

// =============================================================================
// CSS SUBSET
// =============================================================================

mod css {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) enum Combinator {
        Descendant,
        Child,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) enum Op {
        Equals,
        Contains,
        Prefix,
        Suffix,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(super) struct AttrTest {
        pub(super) name: String,
        pub(super) op: Option<(Op, String)>,
        pub(super) case_insensitive: bool,
    }

    impl AttrTest {
        pub(super) fn matches(&self, actual: Option<&str>) -> bool {
            let Some(actual) = actual else {
                return false;
            };
            let Some((op, expected)) = &self.op else {
                return true;
            };
            let (actual, expected) = if self.case_insensitive {
                (actual.to_lowercase(), expected.to_lowercase())
            } else {
                (actual.to_string(), expected.clone())
            };
            match op {
                Op::Equals => actual == expected,
                Op::Contains => actual.contains(&expected),
                Op::Prefix => actual.starts_with(&expected),
                Op::Suffix => actual.ends_with(&expected),
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub(super) struct Compound {
        pub(super) tag: Option<String>,
        pub(super) id: Option<String>,
        pub(super) classes: Vec<String>,
        pub(super) attrs: Vec<AttrTest>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(super) struct Complex {
        pub(super) parts: Vec<(Combinator, Compound)>,
    }

    pub(super) fn parse_list(input: &str) -> Result<Vec<Complex>, String> {
        let list = split_top_level(input)
            .into_iter()
            .map(|part| parse_complex(part.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        if list.is_empty() {
            return Err("empty selector".to_string());
        }
        Ok(list)
    }

    fn split_top_level(input: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for c in input.chars() {
            if escaped {
                current.push(c);
                escaped = false;
                continue;
            }
            match (c, quote) {
                ('\\', _) => {
                    escaped = true;
                    current.push(c);
                }
                ('\'' | '"', None) => {
                    quote = Some(c);
                    current.push(c);
                }
                (q, Some(open)) if q == open => {
                    quote = None;
                    current.push(c);
                }
                ('[', None) => {
                    depth += 1;
                    current.push(c);
                }
                (']', None) => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                (',', None) if depth == 0 => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        parts.push(current);
        parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
    }

    fn parse_complex(input: &str) -> Result<Complex, String> {
        let chars: Vec<char> = input.chars().collect();
        let mut i = 0;
        let mut parts = Vec::new();
        let mut combinator = Combinator::Descendant;
        while i < chars.len() {
            if chars[i].is_whitespace() {
                i += 1;
                continue;
            }
            if chars[i] == '>' {
                combinator = Combinator::Child;
                i += 1;
                continue;
            }
            let compound = parse_compound(&chars, &mut i)?;
            parts.push((combinator, compound));
            combinator = Combinator::Descendant;
        }
        if parts.is_empty() {
            return Err(format!("empty selector '{input}'"));
        }
        Ok(Complex { parts })
    }

    fn is_ident(c: char) -> bool {
        c.is_alphanumeric() || c == '-' || c == '_'
    }

    fn ident(chars: &[char], i: &mut usize) -> Result<String, String> {
        let start = *i;
        while *i < chars.len() && is_ident(chars[*i]) {
            *i += 1;
        }
        if *i == start {
            return Err(format!("expected identifier at {start}"));
        }
        Ok(chars[start..*i].iter().collect())
    }

    fn skip_ws(chars: &[char], i: &mut usize) {
        while *i < chars.len() && chars[*i].is_whitespace() {
            *i += 1;
        }
    }

    fn parse_compound(chars: &[char], i: &mut usize) -> Result<Compound, String> {
        let mut compound = Compound::default();
        let start = *i;
        while *i < chars.len() && !chars[*i].is_whitespace() && chars[*i] != '>' {
            match chars[*i] {
                '#' => {
                    *i += 1;
                    compound.id = Some(ident(chars, i)?);
                }
                '.' => {
                    *i += 1;
                    compound.classes.push(ident(chars, i)?);
                }
                '[' => {
                    *i += 1;
                    compound.attrs.push(parse_attr(chars, i)?);
                }
                '*' if *i == start => *i += 1,
                c if is_ident(c) && *i == start => compound.tag = Some(ident(chars, i)?.to_lowercase()),
                c => return Err(format!("unsupported token '{c}' at {}", *i)),
            }
        }
        Ok(compound)
    }

    fn parse_attr(chars: &[char], i: &mut usize) -> Result<AttrTest, String> {
        skip_ws(chars, i);
        let name = ident(chars, i)?;
        skip_ws(chars, i);
        let op = match (chars.get(*i), chars.get(*i + 1)) {
            (Some(']'), _) => {
                *i += 1;
                return Ok(AttrTest {
                    name,
                    op: None,
                    case_insensitive: false,
                });
            }
            (Some('='), _) => {
                *i += 1;
                Op::Equals
            }
            (Some('*'), Some('=')) => {
                *i += 2;
                Op::Contains
            }
            (Some('^'), Some('=')) => {
                *i += 2;
                Op::Prefix
            }
            (Some('$'), Some('=')) => {
                *i += 2;
                Op::Suffix
            }
            _ => return Err(format!("bad attribute operator in [{name}")),
        };
        skip_ws(chars, i);
        let value = match chars.get(*i) {
            Some(&(q @ ('\'' | '"'))) => {
                *i += 1;
                let mut value = String::new();
                loop {
                    match chars.get(*i) {
                        None => return Err("unterminated string".to_string()),
                        Some('\\') => {
                            if let Some(c) = chars.get(*i + 1) {
                                value.push(*c);
                            }
                            *i += 2;
                        }
                        Some(c) if *c == q => {
                            *i += 1;
                            break;
                        }
                        Some(c) => {
                            value.push(*c);
                            *i += 1;
                        }
                    }
                }
                value
            }
            _ => ident(chars, i)?,
        };
        skip_ws(chars, i);
        let mut case_insensitive = false;
        if matches!(chars.get(*i), Some('i' | 'I')) {
            case_insensitive = true;
            *i += 1;
            skip_ws(chars, i);
        } else if matches!(chars.get(*i), Some('s' | 'S')) {
            *i += 1;
            skip_ws(chars, i);
        }
        if chars.get(*i) != Some(&']') {
            return Err(format!("expected ']' after [{name}"));
        }
        *i += 1;
        Ok(AttrTest {
            name,
            op: Some((op, value)),
            case_insensitive,
        })
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_compound_parts() {
            let list = parse_list("input#Forename.form-control[type='text']").unwrap();
            let (_, compound) = &list[0].parts[0];
            assert_eq!(compound.tag.as_deref(), Some("input"));
            assert_eq!(compound.id.as_deref(), Some("Forename"));
            assert_eq!(compound.classes, vec!["form-control"]);
            assert_eq!(compound.attrs[0].name, "type");
        }

        #[test]
        fn test_parse_combinators_and_lists() {
            let list = parse_list("table tbody > tr, .grid tr").unwrap();
            assert_eq!(list.len(), 2);
            assert_eq!(list[0].parts.len(), 3);
            assert_eq!(list[0].parts[2].0, Combinator::Child);
            assert_eq!(list[1].parts[1].0, Combinator::Descendant);
        }

        #[test]
        fn test_comma_inside_quotes_is_not_a_separator() {
            let list = parse_list("[title='a, b']").unwrap();
            assert_eq!(list.len(), 1);
        }

        #[test]
        fn test_escaped_quote_and_flag() {
            let list = parse_list("input[value='Don\\'t' i]").unwrap();
            let test = &list[0].parts[0].1.attrs[0];
            assert_eq!(test.op, Some((Op::Equals, "Don't".to_string())));
            assert!(test.case_insensitive);
            assert!(test.matches(Some("DON'T")));
        }

        #[test]
        fn test_pseudo_classes_rejected() {
            assert!(parse_list("button:has-text('Save')").is_err());
            assert!(parse_list("").is_err());
        }
    }
}
