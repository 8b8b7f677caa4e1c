//! Engine configuration.
//!
//! Every tunable the engine uses lives here: resolver polling, value-commit
//! waits, settle polling, the virtual-scroll step and budget, download timeouts
//! and per-format size floors. All sections default independently, so a YAML
//! file only needs the keys it changes:
//!
//! ```yaml
//! resolver:
//!   timeout_ms: 8000
//! grid:
//!   scroll:
//!     step_px: 400
//!     max_attempts: 80
//! ```

use crate::result::{ResoluteError, ResoluteResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default resolver timeout (5 seconds)
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5_000;

/// Default resolver polling interval
pub const DEFAULT_RESOLVE_POLL_MS: u64 = 200;

/// Default cap on candidate descriptors in a `NotFound` payload
pub const DEFAULT_MAX_CANDIDATES: usize = 25;

/// Default time allowed for a filled value to be reported back
pub const DEFAULT_COMMIT_WAIT_MS: u64 = 2_000;

/// Default polling interval while waiting for a value commit
pub const DEFAULT_COMMIT_POLL_MS: u64 = 50;

/// Default settle timeout (10 seconds)
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 10_000;

/// Default settle polling interval
pub const DEFAULT_SETTLE_POLL_MS: u64 = 100;

/// Network idle threshold (500ms without requests)
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

/// Default virtual-scroll step in pixels
pub const DEFAULT_SCROLL_STEP_PX: i64 = 600;

/// Default virtual-scroll attempt budget
pub const DEFAULT_SCROLL_ATTEMPTS: u32 = 60;

/// Default download timeout (30 seconds)
pub const DEFAULT_DOWNLOAD_TIMEOUT_MS: u64 = 30_000;

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Element resolution
    pub resolver: ResolverConfig,
    /// Form interaction
    pub form: FormConfig,
    /// Settle waits
    pub settle: SettleConfig,
    /// Grid scanning
    pub grid: GridConfig,
    /// Downloads and exports
    pub downloads: DownloadConfig,
}

impl EngineConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> ResoluteResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> ResoluteResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> ResoluteResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Replace the resolver section
    #[must_use]
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the settle section
    #[must_use]
    pub fn with_settle(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    /// Replace the grid section
    #[must_use]
    pub fn with_grid(mut self, grid: GridConfig) -> Self {
        self.grid = grid;
        self
    }

    /// Replace the downloads section
    #[must_use]
    pub fn with_downloads(mut self, downloads: DownloadConfig) -> Self {
        self.downloads = downloads;
        self
    }

    /// Reject configurations that would poll forever or never poll
    pub fn validate(&self) -> ResoluteResult<()> {
        check_poll("resolver", self.resolver.poll_interval_ms, self.resolver.timeout_ms)?;
        check_poll("form commit", self.form.commit_poll_ms, self.form.commit_wait_ms)?;
        check_poll("settle", self.settle.poll_interval_ms, self.settle.timeout_ms)?;
        if self.grid.scroll.max_attempts == 0 {
            return Err(ResoluteError::config("grid.scroll.max_attempts must be at least 1"));
        }
        if self.grid.scroll.step_px <= 0 {
            return Err(ResoluteError::config("grid.scroll.step_px must be positive"));
        }
        if self.downloads.timeout_ms == 0 {
            return Err(ResoluteError::config("downloads.timeout_ms must be positive"));
        }
        Ok(())
    }
}

fn check_poll(section: &str, poll_ms: u64, timeout_ms: u64) -> ResoluteResult<()> {
    if poll_ms == 0 {
        return Err(ResoluteError::config(format!(
            "{section} poll interval must be positive"
        )));
    }
    if poll_ms > timeout_ms {
        return Err(ResoluteError::config(format!(
            "{section} poll interval ({poll_ms}ms) exceeds its timeout ({timeout_ms}ms)"
        )));
    }
    Ok(())
}

/// Element resolution settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Total time to keep trying strategies
    pub timeout_ms: u64,
    /// Delay between passes over the strategy list
    pub poll_interval_ms: u64,
    /// Cap on candidate descriptors collected for diagnostics
    pub max_candidates: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_RESOLVE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_RESOLVE_POLL_MS,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl ResolverConfig {
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

    /// Set diagnostic candidate cap
    #[must_use]
    pub const fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }
}

/// Form interaction settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// How long a filled value may take to be reported back by the page
    pub commit_wait_ms: u64,
    /// Polling interval for the commit check
    pub commit_poll_ms: u64,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            commit_wait_ms: DEFAULT_COMMIT_WAIT_MS,
            commit_poll_ms: DEFAULT_COMMIT_POLL_MS,
        }
    }
}

impl FormConfig {
    /// Commit wait as a duration
    #[must_use]
    pub const fn commit_wait(&self) -> Duration {
        Duration::from_millis(self.commit_wait_ms)
    }
}

/// Settle-wait settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Default settle timeout
    pub timeout_ms: u64,
    /// Polling interval for settle conditions
    pub poll_interval_ms: u64,
    /// Quiet window with zero pending requests that counts as network idle
    pub network_idle_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SETTLE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_SETTLE_POLL_MS,
            network_idle_ms: NETWORK_IDLE_THRESHOLD_MS,
        }
    }
}

impl SettleConfig {
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

    /// Set network-idle quiet window
    #[must_use]
    pub const fn with_network_idle(mut self, network_idle_ms: u64) -> Self {
        self.network_idle_ms = network_idle_ms;
        self
    }
}

/// Grid scanning settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Virtual-scroll tunables
    pub scroll: ScrollConfig,
}

/// Virtual-scroll tunables; the right values are properties of the grid under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Pixels scrolled per step
    pub step_px: i64,
    /// Maximum scroll steps per snapshot
    pub max_attempts: u32,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            step_px: DEFAULT_SCROLL_STEP_PX,
            max_attempts: DEFAULT_SCROLL_ATTEMPTS,
        }
    }
}

impl ScrollConfig {
    /// Create scroll settings
    #[must_use]
    pub const fn new(step_px: i64, max_attempts: u32) -> Self {
        Self {
            step_px,
            max_attempts,
        }
    }
}

/// Download and export settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// How long to wait for a download or export to appear
    pub timeout_ms: u64,
    /// Per-run artifact directory
    pub artifact_dir: PathBuf,
    /// Per-format size floors
    pub floors: SizeFloors,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_DOWNLOAD_TIMEOUT_MS,
            artifact_dir: PathBuf::from("target/resolute/downloads"),
            floors: SizeFloors::default(),
        }
    }
}

impl DownloadConfig {
    /// Set artifact directory
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set size floors
    #[must_use]
    pub fn with_floors(mut self, floors: SizeFloors) -> Self {
        self.floors = floors;
        self
    }

    /// Timeout as a duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Sizes an artifact must exceed to count as populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeFloors {
    /// PDF floor in bytes
    pub pdf: u64,
    /// XLSX floor in bytes
    pub xlsx: u64,
    /// CSV floor in bytes
    pub csv: u64,
}

impl Default for SizeFloors {
    fn default() -> Self {
        Self {
            pdf: 10_000,
            xlsx: 1_000,
            csv: 16,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod defaults_tests {
        use super::*;

        #[test]
        fn test_default_values() {
            let config = EngineConfig::default();
            assert_eq!(config.resolver.timeout_ms, 5_000);
            assert_eq!(config.resolver.poll_interval_ms, 200);
            assert_eq!(config.resolver.max_candidates, 25);
            assert_eq!(config.form.commit_wait_ms, 2_000);
            assert_eq!(config.settle.timeout_ms, 10_000);
            assert_eq!(config.settle.network_idle_ms, 500);
            assert_eq!(config.grid.scroll.step_px, 600);
            assert_eq!(config.grid.scroll.max_attempts, 60);
            assert_eq!(config.downloads.timeout_ms, 30_000);
            assert_eq!(config.downloads.floors.pdf, 10_000);
            assert_eq!(config.downloads.floors.xlsx, 1_000);
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_builders() {
            let resolver = ResolverConfig::default()
                .with_timeout(100)
                .with_poll_interval(10)
                .with_max_candidates(3);
            let config = EngineConfig::new()
                .with_resolver(resolver)
                .with_grid(GridConfig {
                    scroll: ScrollConfig::new(200, 5),
                });
            assert_eq!(config.resolver.timeout_ms, 100);
            assert_eq!(config.resolver.max_candidates, 3);
            assert_eq!(config.grid.scroll.step_px, 200);
        }
    }

    mod yaml_tests {
        use super::*;
        use std::io::Write;

        #[test]
        fn test_partial_yaml_keeps_other_defaults() {
            let config = EngineConfig::from_yaml_str(
                "resolver:\n  timeout_ms: 8000\ngrid:\n  scroll:\n    step_px: 400\n",
            )
            .unwrap();
            assert_eq!(config.resolver.timeout_ms, 8_000);
            assert_eq!(config.resolver.poll_interval_ms, 200);
            assert_eq!(config.grid.scroll.step_px, 400);
            assert_eq!(config.grid.scroll.max_attempts, 60);
        }

        #[test]
        fn test_yaml_round_trip() {
            let config = EngineConfig::default();
            let yaml = config.to_yaml().unwrap();
            let parsed = EngineConfig::from_yaml_str(&yaml).unwrap();
            assert_eq!(parsed, config);
        }

        #[test]
        fn test_load_from_file() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "downloads:\n  floors:\n    pdf: 2048").unwrap();
            let config = EngineConfig::load(file.path()).unwrap();
            assert_eq!(config.downloads.floors.pdf, 2048);
            assert_eq!(config.downloads.floors.xlsx, 1_000);
        }

        #[test]
        fn test_malformed_yaml_is_error() {
            let err = EngineConfig::from_yaml_str("resolver: [1, 2").unwrap_err();
            assert!(matches!(err, ResoluteError::Yaml(_)));
        }
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn test_zero_poll_rejected() {
            let config =
                EngineConfig::new().with_resolver(ResolverConfig::default().with_poll_interval(0));
            assert!(matches!(
                config.validate(),
                Err(ResoluteError::Config { .. })
            ));
        }

        #[test]
        fn test_poll_larger_than_timeout_rejected() {
            let config = EngineConfig::new()
                .with_settle(SettleConfig::default().with_timeout(50).with_poll_interval(100));
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("exceeds"));
        }

        #[test]
        fn test_zero_scroll_budget_rejected() {
            let config = EngineConfig::new().with_grid(GridConfig {
                scroll: ScrollConfig::new(600, 0),
            });
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_yaml_validation_applies() {
            assert!(EngineConfig::from_yaml_str("settle:\n  poll_interval_ms: 0\n").is_err());
        }
    }
}
