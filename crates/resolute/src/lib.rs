//! Resolute: resilient element resolution and workflow verification for
//! browser end-to-end tests.
//!
//! Resolute sits between a test scenario and a browser driver. The scenario
//! says *what* it wants ("the Username field", "the row for William Smith",
//! "the PDF export"); Resolute finds it through ordered fallback strategies,
//! waits for the page to settle, and reports failures with enough context to
//! diagnose them without a rerun.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     ScenarioSession                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐  ┌──────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │ Resolver │  │FormEngine│  │ GridScanner │  │  Download    │   │
//! │  │(locator) │  │          │  │ (snapshots) │  │  Validator   │   │
//! │  └────┬─────┘  └────┬─────┘  └──────┬──────┘  └──────┬───────┘   │
//! │       └─────────────┴───────┬───────┴────────────────┘           │
//! │                     Verifier (CRUD, bulk delete)                 │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                 PageDriver (WebDriver / CDP / MockPage)          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use resolute::grid::{GridRow, GridSnapshot, RecordPredicate, SortSpec};
//! use resolute::driver::NodeId;
//!
//! let row = |id: u64, cells: &[&str]| {
//!     GridRow::new(cells.iter().map(|c| (*c).to_string()).collect(), NodeId(id), 0)
//! };
//! let headers = ["Forename", "FamilyName", "Gender", "YearOfBirth"];
//! let snapshot = GridSnapshot::new(
//!     Some(headers.iter().map(|h| (*h).to_string()).collect()),
//!     vec![
//!         row(1, &["Ada", "Lovelace", "Female", "1815"]),
//!         row(2, &["William", "Smith", "PreferNotToSay", "1985"]),
//!     ],
//!     0,
//! );
//!
//! let smith = RecordPredicate::new()
//!     .field("FamilyName", "smith")
//!     .field("Gender", "Prefer not to say");
//! assert_eq!(snapshot.find_row(&smith).unwrap().cells[0], "William");
//! assert!(snapshot.is_sorted(&SortSpec::numeric("YearOfBirth")).unwrap());
//! ```

// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod config;
pub mod dialog;
pub mod download;
pub mod driver;
pub mod form;
pub mod grid;
pub mod locator;
pub mod logging;
/// In-memory page for offline tests
pub mod mock;
pub mod normalize;
pub mod resolver;
pub mod result;
pub mod session;
pub mod verify;
pub mod wait;

pub use config::EngineConfig;
pub use driver::{NodeId, PageDriver};
pub use result::{ResoluteError, ResoluteResult};
pub use session::ScenarioSession;

/// Prelude for convenient imports
pub mod prelude {
    pub use super::config::*;
    pub use super::dialog::*;
    pub use super::download::*;
    pub use super::driver::*;
    pub use super::form::*;
    pub use super::grid::*;
    pub use super::locator::*;
    pub use super::logging::*;
    pub use super::resolver::*;
    pub use super::result::*;
    pub use super::session::*;
    pub use super::verify::*;
    pub use super::wait::*;
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
