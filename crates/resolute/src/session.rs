//! Scenario session.
//!
//! One session owns one page for one scenario. Components are constructed from
//! the session on demand and borrow its page, so nothing outlives `close` and
//! there is no process-wide browser state.
//!
//! ```
//! use resolute::config::EngineConfig;
//! use resolute::mock::MockPage;
//! use resolute::session::ScenarioSession;
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let page = Arc::new(MockPage::new("https://app/login"));
//! let mut session = ScenarioSession::open("login", page, EngineConfig::default()).unwrap();
//! assert!(session.is_open());
//! session.close().await.unwrap();
//! assert!(session.active_page().is_err());
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use crate::config::EngineConfig;
use crate::dialog::DriverPrompts;
use crate::download::{ArtifactStore, DownloadArtifact, DownloadValidator};
use crate::driver::PageDriver;
use crate::form::FormEngine;
use crate::grid::GridScanner;
use crate::resolver::Resolver;
use crate::result::{ResoluteError, ResoluteResult};
use crate::verify::Verifier;
use crate::wait::Settler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Page available
    Open,
    /// Page closed, artifacts cleaned up
    Closed,
}

/// Serializable description of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session id
    pub id: Uuid,
    /// Scenario name
    pub name: String,
    /// Lifecycle state
    pub state: SessionState,
    /// When the session was opened
    pub opened_at: DateTime<Utc>,
    /// Artifacts still on record
    pub artifacts: Vec<DownloadArtifact>,
}

/// Page, configuration and artifact store for one scenario
pub struct ScenarioSession {
    id: Uuid,
    name: String,
    driver: Arc<dyn PageDriver>,
    config: EngineConfig,
    store: ArtifactStore,
    state: SessionState,
    opened_at: DateTime<Utc>,
    started: Instant,
}

impl fmt::Debug for ScenarioSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("store", &self.store.root())
            .finish_non_exhaustive()
    }
}

impl ScenarioSession {
    /// Open a session over `driver` after validating `config`
    pub fn open(name: &str, driver: Arc<dyn PageDriver>, config: EngineConfig) -> ResoluteResult<Self> {
        config.validate()?;
        let store = ArtifactStore::new(config.downloads.artifact_dir.clone(), name);
        let session = Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            driver,
            config,
            store,
            state: SessionState::Open,
            opened_at: Utc::now(),
            started: Instant::now(),
        };
        info!(scenario = %session.name, id = %session.id, "scenario session opened");
        Ok(session)
    }

    /// Session id
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Scenario name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the page is still available
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Artifact store
    #[must_use]
    pub const fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Milliseconds since open
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// The scenario's page; `SessionClosed` after close
    pub fn active_page(&self) -> ResoluteResult<&dyn PageDriver> {
        match self.state {
            SessionState::Open => Ok(self.driver.as_ref()),
            SessionState::Closed => Err(ResoluteError::SessionClosed {
                scenario: self.name.clone(),
            }),
        }
    }

    /// Element resolver over the active page
    pub fn resolver(&self) -> ResoluteResult<Resolver<'_>> {
        Ok(Resolver::new(self.active_page()?, self.config.resolver))
    }

    /// Form engine over the active page
    pub fn forms(&self) -> ResoluteResult<FormEngine<'_>> {
        Ok(FormEngine::new(
            self.active_page()?,
            self.config.form,
            self.config.settle,
        ))
    }

    /// Grid scanner over the active page
    pub fn grid(&self) -> ResoluteResult<GridScanner<'_>> {
        Ok(GridScanner::new(
            self.active_page()?,
            self.config.resolver,
            self.config.grid,
        ))
    }

    /// Settler over the active page
    pub fn settler(&self) -> ResoluteResult<Settler<'_>> {
        Ok(Settler::new(self.active_page()?, self.config.settle))
    }

    /// Verifier over the active page
    pub fn verifier(&self) -> ResoluteResult<Verifier<'_>> {
        Ok(Verifier::new(self.active_page()?, &self.config))
    }

    /// Download validator writing into this session's store
    pub fn downloads(&self) -> ResoluteResult<DownloadValidator<'_>> {
        Ok(DownloadValidator::new(
            self.active_page()?,
            &self.store,
            &self.config.downloads,
        ))
    }

    /// Confirmation prompts that accept while armed
    pub fn accept_prompts(&self) -> ResoluteResult<DriverPrompts<'_>> {
        Ok(DriverPrompts::accepting(self.active_page()?))
    }

    /// Serializable description
    pub fn summary(&self) -> ResoluteResult<SessionSummary> {
        Ok(SessionSummary {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            opened_at: self.opened_at,
            artifacts: self.store.artifacts()?,
        })
    }

    /// Summary as pretty JSON
    pub fn summary_json(&self) -> ResoluteResult<String> {
        Ok(serde_json::to_string_pretty(&self.summary()?)?)
    }

    /// Close the page and delete unretained artifacts; closing twice is a no-op
    pub async fn close(&mut self) -> ResoluteResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        let closed = self.driver.close().await;
        let cleaned = self.store.cleanup().await;
        if let Err(err) = &closed {
            warn!(scenario = %self.name, error = %err, "page close failed");
        }
        let removed = cleaned?;
        closed?;
        info!(
            scenario = %self.name,
            removed_artifacts = removed,
            age_ms = self.age_ms(),
            "scenario session closed"
        );
        Ok(())
    }
}
