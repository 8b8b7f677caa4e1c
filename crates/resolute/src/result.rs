//! Result and error types for Resolute.
//!
//! Every failure carries enough context to be used verbatim as a step-failure
//! message: what was searched for, what was seen instead, and the timeout used.

use thiserror::Error;

/// Result type for Resolute operations
pub type ResoluteResult<T> = Result<T, ResoluteError>;

/// Errors that can occur in Resolute
#[derive(Debug, Error)]
pub enum ResoluteError {
    /// No strategy (or no grid row) matched within the timeout
    #[error(
        "Not found: {target} (timeout {timeout_ms}ms)\n  attempted: {}\n  candidates:\n{}",
        render_inline(.attempted),
        render_lines(.candidates)
    )]
    NotFound {
        /// What was searched for
        target: String,
        /// Strategies or predicates attempted, in order
        attempted: Vec<String>,
        /// Identifying attributes of what was present instead
        candidates: Vec<String>,
        /// Timeout used
        timeout_ms: u64,
    },

    /// Target resolved but is hidden or disabled at the moment of action
    #[error("Element {target} is not interactable: {reason}")]
    NotInteractable {
        /// Resolved element description
        target: String,
        /// Why the action was refused
        reason: String,
    },

    /// An awaited condition never became true
    #[error("Timed out after {ms}ms waiting for {waiting_for}")]
    Timeout {
        /// Condition that was awaited
        waiting_for: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Artifact obtained but its signature does not match the expected format
    #[error("Artifact '{filename}' is not {expected}: found {found}")]
    WrongFormat {
        /// Expected format name
        expected: String,
        /// What the leading bytes looked like
        found: String,
        /// Suggested filename of the artifact
        filename: String,
    },

    /// Artifact obtained but empty or below the size floor for its format
    #[error("Artifact '{filename}' ({kind}) is empty or too small: {size} bytes, must exceed {minimum} bytes")]
    EmptyOrTooSmall {
        /// Format name
        kind: String,
        /// Suggested filename of the artifact
        filename: String,
        /// Actual size in bytes
        size: u64,
        /// Size floor in bytes
        minimum: u64,
    },

    /// Predicate matched more than one row where exactly one was expected
    #[error("Ambiguous match for {target}: {count} rows matched\n{}", render_lines(.rows))]
    AmbiguousMatch {
        /// Predicate description
        target: String,
        /// Number of matching rows
        count: usize,
        /// Text of the matching rows
        rows: Vec<String>,
    },

    /// Handle used after the page navigated away from the document it came from
    #[error("Stale element {target}: resolved in epoch {resolved_epoch}, page is now in epoch {current_epoch}")]
    StaleElement {
        /// Resolved element description
        target: String,
        /// Navigation epoch at resolution time
        resolved_epoch: u64,
        /// Current navigation epoch
        current_epoch: u64,
    },

    /// Verification failed
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message, including the row dump where relevant
        message: String,
    },

    /// Browser driver reported an error
    #[error("Driver error: {message}")]
    Driver {
        /// Error message
        message: String,
    },

    /// Scenario session used after close
    #[error("Scenario session '{scenario}' is closed")]
    SessionClosed {
        /// Scenario name
        scenario: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ResoluteError {
    /// Create a driver error
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Create an assertion failure
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(waiting_for: impl Into<String>, ms: u64) -> Self {
        Self::Timeout {
            waiting_for: waiting_for.into(),
            ms,
        }
    }

    /// Whether this is a `NotFound`
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is a `Timeout`
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn render_inline(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(" | ")
    }
}

fn render_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return "    (none)".to_string();
    }
    lines
        .iter()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
