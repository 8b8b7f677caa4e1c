//! Element resolution across ordered fallback strategies.
//!
//! Each polling pass walks the strategy list first to last; the first strategy
//! with a node that satisfies the [`Constraints`] wins, and ties within one
//! strategy go to the first node in document order. When the timeout expires
//! the error lists every strategy with its last outcome and a dump of the form
//! controls that *were* on the page.

use crate::config::ResolverConfig;
use crate::driver::{NodeId, PageDriver};
use crate::locator::{Scope, Selector, Strategies};
use crate::normalize::fold;
use crate::result::{ResoluteError, ResoluteResult};
use crate::wait::{Poller, WaitOptions};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Elements dumped into `NotFound` diagnostics
pub const DIAGNOSTIC_PROBE: &str = "input, select, textarea, button, a";

/// Extra test that disambiguates several matches of one strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFilter {
    /// Text content contains the value (case- and whitespace-insensitive)
    TextContains(String),
    /// Attribute equals the value
    AttributeEquals {
        /// Attribute name
        name: String,
        /// Expected value
        value: String,
    },
}

impl NodeFilter {
    async fn accepts(&self, driver: &dyn PageDriver, node: NodeId) -> ResoluteResult<bool> {
        match self {
            Self::TextContains(text) => Ok(fold(&driver.text(node).await?).contains(&fold(text))),
            Self::AttributeEquals { name, value } => {
                Ok(driver.attribute(node, name).await?.as_deref() == Some(value.as_str()))
            }
        }
    }
}

impl fmt::Display for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TextContains(text) => write!(f, "text contains '{text}'"),
            Self::AttributeEquals { name, value } => write!(f, "[{name}='{value}']"),
        }
    }
}

/// What a resolved node must satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
    /// Node must be visible
    pub must_be_visible: bool,
    /// Node must be enabled
    pub must_be_enabled: bool,
    /// Override the configured timeout
    pub timeout_ms: Option<u64>,
    /// Override the configured polling interval
    pub poll_interval_ms: Option<u64>,
    /// Disambiguating predicate
    pub filter: Option<NodeFilter>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self::interactable()
    }
}

impl Constraints {
    /// Visible and enabled
    #[must_use]
    pub const fn interactable() -> Self {
        Self {
            must_be_visible: true,
            must_be_enabled: true,
            timeout_ms: None,
            poll_interval_ms: None,
            filter: None,
        }
    }

    /// Visible, enabled state irrelevant
    #[must_use]
    pub const fn visible() -> Self {
        Self {
            must_be_visible: true,
            must_be_enabled: false,
            timeout_ms: None,
            poll_interval_ms: None,
            filter: None,
        }
    }

    /// Present in the DOM, nothing else
    #[must_use]
    pub const fn present() -> Self {
        Self {
            must_be_visible: false,
            must_be_enabled: false,
            timeout_ms: None,
            poll_interval_ms: None,
            filter: None,
        }
    }

    /// Set timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = Some(poll_interval_ms);
        self
    }

    /// Set disambiguating filter
    #[must_use]
    pub fn with_filter(mut self, filter: NodeFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    fn wait_options(&self, config: &ResolverConfig) -> WaitOptions {
        WaitOptions::new(
            self.timeout_ms.unwrap_or(config.timeout_ms),
            self.poll_interval_ms.unwrap_or(config.poll_interval_ms),
        )
    }
}

/// A live node plus how it was found.
///
/// Valid only within the navigation epoch it was resolved in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    /// Node handle
    pub node: NodeId,
    /// Index of the strategy that matched
    pub strategy_index: usize,
    /// Name of the strategy that matched
    pub strategy_name: String,
    /// Label of the strategy list
    pub target: String,
    /// Visibility at resolution time
    pub visible: bool,
    /// Enabled state at resolution time
    pub enabled: bool,
    /// Navigation epoch at resolution time
    pub epoch: u64,
}

impl ResolvedElement {
    /// Fail with `StaleElement` if the page navigated since resolution
    pub async fn ensure_current(&self, driver: &dyn PageDriver) -> ResoluteResult<()> {
        let current = driver.navigation_epoch().await?;
        if current == self.epoch {
            Ok(())
        } else {
            Err(ResoluteError::StaleElement {
                target: self.to_string(),
                resolved_epoch: self.epoch,
                current_epoch: current,
            })
        }
    }
}

impl fmt::Display for ResolvedElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via #{} '{}' ({})",
            self.target, self.strategy_index, self.strategy_name, self.node
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Rejections {
    hidden: usize,
    disabled: usize,
    filtered: usize,
}

/// Resolves strategy lists against a page
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    driver: &'a dyn PageDriver,
    config: ResolverConfig,
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Resolver<'a> {
    /// Create a resolver
    #[must_use]
    pub const fn new(driver: &'a dyn PageDriver, config: ResolverConfig) -> Self {
        Self { driver, config }
    }

    /// Resolver configuration
    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Find the first node satisfying `constraints`, polling until the timeout
    #[instrument(level = "debug", skip_all, fields(target = %strategies.label()))]
    pub async fn resolve(
        &self,
        strategies: &Strategies,
        constraints: &Constraints,
    ) -> ResoluteResult<ResolvedElement> {
        let options = constraints.wait_options(&self.config);
        let mut outcomes = vec!["not tried".to_string(); strategies.len()];
        let mut poller = Poller::start(options);

        loop {
            if let Some(found) = self.attempt(strategies, constraints, &mut outcomes).await? {
                debug!(
                    strategy = %found.strategy_name,
                    index = found.strategy_index,
                    attempts = poller.attempts(),
                    "resolved"
                );
                return Ok(found);
            }
            if !poller.tick().await {
                break;
            }
        }

        let attempted = strategies
            .iter()
            .zip(&outcomes)
            .enumerate()
            .map(|(i, (strategy, outcome))| format!("#{i} {strategy} -> {outcome}"))
            .collect();
        let mut target = strategies.label().to_string();
        if let Some(filter) = &constraints.filter {
            target = format!("{target} where {filter}");
        }
        Err(ResoluteError::NotFound {
            target,
            attempted,
            candidates: self.candidates().await,
            timeout_ms: options.timeout_ms,
        })
    }

    /// Like [`Resolver::resolve`], but a `NotFound` is logged and becomes `None`
    pub async fn resolve_optional(
        &self,
        strategies: &Strategies,
        constraints: &Constraints,
    ) -> ResoluteResult<Option<ResolvedElement>> {
        match self.resolve(strategies, constraints).await {
            Ok(found) => Ok(Some(found)),
            Err(err) if err.is_not_found() => {
                warn!(error = %err, "optional element not found, continuing");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// One pass over the strategies without waiting
    pub async fn probe(
        &self,
        strategies: &Strategies,
        constraints: &Constraints,
    ) -> ResoluteResult<Option<ResolvedElement>> {
        let mut outcomes = vec![String::new(); strategies.len()];
        self.attempt(strategies, constraints, &mut outcomes).await
    }

    /// Resolve with the configured timeout overridden
    pub async fn resolve_within(
        &self,
        strategies: &Strategies,
        constraints: &Constraints,
        timeout: Duration,
    ) -> ResoluteResult<ResolvedElement> {
        let constraints = constraints.clone().with_timeout(timeout.as_millis() as u64);
        self.resolve(strategies, &constraints).await
    }

    async fn attempt(
        &self,
        strategies: &Strategies,
        constraints: &Constraints,
        outcomes: &mut [String],
    ) -> ResoluteResult<Option<ResolvedElement>> {
        let epoch = self.driver.navigation_epoch().await?;
        for (index, strategy) in strategies.iter().enumerate() {
            let nodes = match self
                .driver
                .query_all(&strategy.scope(), strategy.selector())
                .await
            {
                Ok(nodes) => nodes,
                Err(err) => {
                    outcomes[index] = format!("error: {err}");
                    continue;
                }
            };
            if nodes.is_empty() {
                outcomes[index] = "0 matches".to_string();
                continue;
            }

            let mut rejected = Rejections::default();
            let mut failure = None;
            for node in &nodes {
                let visible = match self.driver.is_visible(*node).await {
                    Ok(visible) => visible,
                    Err(err) => {
                        failure = Some(format!("visibility of {node}: {err}"));
                        continue;
                    }
                };
                if constraints.must_be_visible && !visible {
                    rejected.hidden += 1;
                    continue;
                }
                let enabled = match self.driver.is_enabled(*node).await {
                    Ok(enabled) => enabled,
                    Err(err) => {
                        failure = Some(format!("enabled state of {node}: {err}"));
                        continue;
                    }
                };
                if constraints.must_be_enabled && !enabled {
                    rejected.disabled += 1;
                    continue;
                }
                if let Some(filter) = &constraints.filter {
                    match filter.accepts(self.driver, *node).await {
                        Ok(true) => {}
                        Ok(false) => {
                            rejected.filtered += 1;
                            continue;
                        }
                        Err(err) => {
                            failure = Some(format!("filter {filter} on {node}: {err}"));
                            continue;
                        }
                    }
                }
                return Ok(Some(ResolvedElement {
                    node: *node,
                    strategy_index: index,
                    strategy_name: strategy.name().to_string(),
                    target: strategies.label().to_string(),
                    visible,
                    enabled,
                    epoch,
                }));
            }
            outcomes[index] = match failure {
                Some(failure) => format!("{} matches, error: {failure}", nodes.len()),
                None => format!(
                    "{} matches, rejected: {} hidden, {} disabled, {} filtered",
                    nodes.len(),
                    rejected.hidden,
                    rejected.disabled,
                    rejected.filtered
                ),
            };
        }
        Ok(None)
    }

    /// Identifying attributes of the form controls currently on the page
    pub async fn candidates(&self) -> Vec<String> {
        let Ok(nodes) = self
            .driver
            .query_all(&Scope::Page, &Selector::css(DIAGNOSTIC_PROBE))
            .await
        else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for node in nodes.into_iter().take(self.config.max_candidates) {
            if let Ok(descriptor) = self.driver.describe(node).await {
                out.push(descriptor.to_string());
            }
        }
        out
    }
}
