//! Wait mechanisms.
//!
//! Two building blocks: a [`Poller`] that bounds every retry loop in the engine,
//! and a [`Settler`] that blocks after an action until a caller-supplied
//! [`SettleCondition`] holds.
//!
//! Every wait takes an explicit timeout. A poller never returns later than
//! `timeout + poll_interval` after it was started.

use crate::config::SettleConfig;
use crate::driver::PageDriver;
use crate::locator::Strategies;
use crate::result::{ResoluteError, ResoluteResult};
use regex::Regex;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Timeout and polling interval for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        let settle = SettleConfig::default();
        Self {
            timeout_ms: settle.timeout_ms,
            poll_interval_ms: settle.poll_interval_ms,
        }
    }
}

impl WaitOptions {
    /// Create wait options
    #[must_use]
    pub const fn new(timeout_ms: u64, poll_interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            poll_interval_ms,
        }
    }

    /// Set timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Timeout as a duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Polling interval as a duration (never zero)
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// Deadline-bounded ticker.
///
/// Call [`Poller::tick`] after each failed attempt: it sleeps one interval and
/// returns `true`, or returns `false` once the deadline has passed.
#[derive(Debug)]
pub struct Poller {
    started: Instant,
    deadline: Instant,
    interval: Duration,
    attempts: u32,
}

impl Poller {
    /// Start polling now
    #[must_use]
    pub fn start(options: WaitOptions) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + options.timeout(),
            interval: options.poll_interval(),
            attempts: 1,
        }
    }

    /// Sleep until the next attempt; `false` when the deadline has passed
    pub async fn tick(&mut self) -> bool {
        if Instant::now() >= self.deadline {
            return false;
        }
        tokio::time::sleep(self.interval).await;
        self.attempts += 1;
        true
    }

    /// Attempts made so far, including the first
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since polling started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

// =============================================================================
// SETTLE CONDITIONS
// =============================================================================

/// Predicate indicating the page has finished reacting to an action
#[derive(Debug, Clone)]
pub enum SettleCondition {
    /// Any strategy finds a visible element
    MarkerVisible(Strategies),
    /// Page content matches the pattern (use `(?i)` for case-insensitive)
    MarkerText(Regex),
    /// Current URL matches the pattern
    UrlMatches(Regex),
    /// No pending requests for the configured quiet window
    NetworkIdle,
    /// Navigation epoch has moved past the given value
    NavigationAfter(u64),
    /// A fixed delay has elapsed
    Elapsed(Duration),
    /// Every inner condition holds at the same time
    AllOf(Vec<SettleCondition>),
}

impl SettleCondition {
    /// Marker element appears
    #[must_use]
    pub fn marker(strategies: Strategies) -> Self {
        Self::MarkerVisible(strategies)
    }

    /// Page text matches `pattern`
    pub fn text(pattern: &str) -> ResoluteResult<Self> {
        Regex::new(pattern)
            .map(Self::MarkerText)
            .map_err(|e| ResoluteError::config(format!("invalid settle pattern '{pattern}': {e}")))
    }

    /// URL matches `pattern`
    pub fn url(pattern: &str) -> ResoluteResult<Self> {
        Regex::new(pattern)
            .map(Self::UrlMatches)
            .map_err(|e| ResoluteError::config(format!("invalid URL pattern '{pattern}': {e}")))
    }

    /// Combine with another condition
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::AllOf(mut all) => {
                all.push(other);
                Self::AllOf(all)
            }
            first => Self::AllOf(vec![first, other]),
        }
    }

    fn flatten_into(&self, leaves: &mut Vec<Self>) {
        match self {
            Self::AllOf(all) => all.iter().for_each(|c| c.flatten_into(leaves)),
            leaf => leaves.push(leaf.clone()),
        }
    }
}

impl fmt::Display for SettleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkerVisible(s) => write!(f, "marker {s} visible"),
            Self::MarkerText(r) => write!(f, "page text /{r}/"),
            Self::UrlMatches(r) => write!(f, "URL /{r}/"),
            Self::NetworkIdle => write!(f, "network idle"),
            Self::NavigationAfter(epoch) => write!(f, "navigation past epoch {epoch}"),
            Self::Elapsed(d) => write!(f, "{}ms elapsed", d.as_millis()),
            Self::AllOf(all) => {
                let parts: Vec<String> = all.iter().map(ToString::to_string).collect();
                write!(f, "all of ({})", parts.join(", "))
            }
        }
    }
}

/// Whether any strategy currently finds a visible node
pub async fn any_visible(driver: &dyn PageDriver, strategies: &Strategies) -> ResoluteResult<bool> {
    for strategy in strategies {
        let Ok(nodes) = driver.query_all(&strategy.scope(), strategy.selector()).await else {
            continue;
        };
        for node in nodes {
            if driver.is_visible(node).await.unwrap_or(false) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

// =============================================================================
// SETTLER
// =============================================================================

/// Blocks until a settle condition holds
#[derive(Clone, Copy)]
pub struct Settler<'a> {
    driver: &'a dyn PageDriver,
    config: SettleConfig,
}

impl fmt::Debug for Settler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Settler<'a> {
    /// Create a settler
    #[must_use]
    pub const fn new(driver: &'a dyn PageDriver, config: SettleConfig) -> Self {
        Self { driver, config }
    }

    /// Wait for `condition` using the configured default timeout
    pub async fn settle_default(&self, condition: &SettleCondition) -> ResoluteResult<()> {
        self.settle(condition, Duration::from_millis(self.config.timeout_ms))
            .await
    }

    /// Wait for `condition`, failing with `Timeout` naming it
    #[instrument(level = "debug", skip(self, condition), fields(condition = %condition))]
    pub async fn settle(&self, condition: &SettleCondition, timeout: Duration) -> ResoluteResult<()> {
        let mut leaves = Vec::new();
        condition.flatten_into(&mut leaves);
        let options = WaitOptions::new(timeout.as_millis() as u64, self.config.poll_interval_ms);
        let mut poller = Poller::start(options);
        let started = Instant::now();
        let mut idle_since: Option<Instant> = None;

        loop {
            let mut all_hold = true;
            for leaf in &leaves {
                if !self.check(leaf, started, &mut idle_since).await? {
                    all_hold = false;
                    break;
                }
            }
            if all_hold {
                debug!(attempts = poller.attempts(), "settled");
                return Ok(());
            }
            if !poller.tick().await {
                return Err(ResoluteError::timeout(
                    condition.to_string(),
                    timeout.as_millis() as u64,
                ));
            }
        }
    }

    async fn check(
        &self,
        leaf: &SettleCondition,
        started: Instant,
        idle_since: &mut Option<Instant>,
    ) -> ResoluteResult<bool> {
        match leaf {
            SettleCondition::MarkerVisible(strategies) => any_visible(self.driver, strategies).await,
            SettleCondition::MarkerText(pattern) => {
                Ok(pattern.is_match(&self.driver.page_content().await?))
            }
            SettleCondition::UrlMatches(pattern) => {
                Ok(pattern.is_match(&self.driver.current_url().await?))
            }
            SettleCondition::NetworkIdle => {
                if self.driver.pending_requests().await? > 0 {
                    *idle_since = None;
                    return Ok(false);
                }
                let since = *idle_since.get_or_insert_with(Instant::now);
                Ok(since.elapsed() >= Duration::from_millis(self.config.network_idle_ms))
            }
            SettleCondition::NavigationAfter(epoch) => {
                Ok(self.driver.navigation_epoch().await? > *epoch)
            }
            SettleCondition::Elapsed(delay) => Ok(started.elapsed() >= *delay),
            SettleCondition::AllOf(_) => Ok(true),
        }
    }
}
