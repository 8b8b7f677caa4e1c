//! Native dialog handling.
//!
//! Confirmation prompts are answered through a scoped capability rather than a
//! page-global handler: workflows that expect a `confirm()` receive a
//! [`ConfirmPrompts`] collaborator, arm it right before the triggering click,
//! and disarm it afterwards, which restores manual handling.

use crate::driver::{EventStream, PageDriver, PageEvent, PageEventKind};
use crate::result::{ResoluteError, ResoluteResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// How a dialog was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogAction {
    /// Accepted (OK)
    Accept,
    /// Dismissed (Cancel)
    Dismiss,
    /// Not answered
    Pending,
}

/// A native `confirm()` dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    message: String,
    action: DialogAction,
}

impl Dialog {
    /// Create a pending confirm dialog
    #[must_use]
    pub fn confirm(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            action: DialogAction::Pending,
        }
    }

    /// Message shown
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// How the dialog was answered
    #[must_use]
    pub const fn action(&self) -> DialogAction {
        self.action
    }

    /// Whether the dialog was accepted
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self.action, DialogAction::Accept)
    }

    /// Answer according to `behavior`
    pub fn respond(&mut self, behavior: AutoDialogBehavior) {
        self.action = match behavior {
            AutoDialogBehavior::AcceptAll => DialogAction::Accept,
            AutoDialogBehavior::DismissAll => DialogAction::Dismiss,
            AutoDialogBehavior::Manual => DialogAction::Pending,
        };
    }
}

/// Automatic dialog answering policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoDialogBehavior {
    /// Accept all dialogs
    AcceptAll,
    /// Dismiss all dialogs
    DismissAll,
    /// Leave dialogs for the test to answer
    #[default]
    Manual,
}

/// Applies the current policy to incoming dialogs and keeps a history.
///
/// Drivers own one of these; clones share state.
#[derive(Clone, Default)]
pub struct DialogHandler {
    dialogs: Arc<Mutex<Vec<Dialog>>>,
    behavior: Arc<Mutex<AutoDialogBehavior>>,
}

impl DialogHandler {
    /// Create a handler in `Manual` mode
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the answering policy
    pub fn set_behavior(&self, behavior: AutoDialogBehavior) {
        if let Ok(mut b) = self.behavior.lock() {
            *b = behavior;
        }
    }

    /// Current answering policy
    #[must_use]
    pub fn behavior(&self) -> AutoDialogBehavior {
        self.behavior.lock().map(|b| *b).unwrap_or_default()
    }

    /// Answer `dialog` and record it
    pub fn handle(&self, mut dialog: Dialog) -> Dialog {
        dialog.respond(self.behavior());
        if let Ok(mut dialogs) = self.dialogs.lock() {
            dialogs.push(dialog.clone());
        }
        dialog
    }

    /// Every dialog seen so far
    #[must_use]
    pub fn dialogs(&self) -> Vec<Dialog> {
        self.dialogs.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Number of dialogs seen
    #[must_use]
    pub fn dialog_count(&self) -> usize {
        self.dialogs.lock().map(|d| d.len()).unwrap_or(0)
    }
}

impl fmt::Debug for DialogHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogHandler")
            .field("dialog_count", &self.dialog_count())
            .field("behavior", &self.behavior())
            .finish()
    }
}

/// Capability to auto-answer confirmation prompts for the span of one workflow
#[async_trait]
pub trait ConfirmPrompts: Send + Sync {
    /// Start answering prompts automatically
    async fn arm(&self) -> ResoluteResult<()>;

    /// Stop answering prompts; returns the dialogs answered while armed
    async fn disarm(&self) -> ResoluteResult<Vec<Dialog>>;
}

/// [`ConfirmPrompts`] backed by the driver's own dialog channel
pub struct DriverPrompts<'a> {
    driver: &'a dyn PageDriver,
    behavior: AutoDialogBehavior,
    stream: Mutex<Option<EventStream>>,
}

impl<'a> DriverPrompts<'a> {
    /// Accept every prompt while armed
    #[must_use]
    pub fn accepting(driver: &'a dyn PageDriver) -> Self {
        Self::with_behavior(driver, AutoDialogBehavior::AcceptAll)
    }

    /// Answer prompts with `behavior` while armed
    #[must_use]
    pub fn with_behavior(driver: &'a dyn PageDriver, behavior: AutoDialogBehavior) -> Self {
        Self {
            driver,
            behavior,
            stream: Mutex::new(None),
        }
    }

    fn store(&self, stream: Option<EventStream>) -> ResoluteResult<Option<EventStream>> {
        let mut slot = self
            .stream
            .lock()
            .map_err(|_| ResoluteError::driver("dialog subscription lock poisoned"))?;
        Ok(std::mem::replace(&mut *slot, stream))
    }
}

impl fmt::Debug for DriverPrompts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverPrompts")
            .field("behavior", &self.behavior)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConfirmPrompts for DriverPrompts<'_> {
    async fn arm(&self) -> ResoluteResult<()> {
        // Subscribe first so a dialog raised by the very next click is recorded
        let stream = self.driver.subscribe(&[PageEventKind::Dialog]).await?;
        self.store(Some(stream))?;
        self.driver.set_dialog_behavior(self.behavior).await?;
        debug!(behavior = ?self.behavior, "confirm prompts armed");
        Ok(())
    }

    async fn disarm(&self) -> ResoluteResult<Vec<Dialog>> {
        let stream = self.store(None)?;
        self.driver
            .set_dialog_behavior(AutoDialogBehavior::Manual)
            .await?;
        let dialogs: Vec<Dialog> = stream
            .map(|mut s| s.drain())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|event| match event {
                PageEvent::Dialog(dialog) => Some(dialog),
                _ => None,
            })
            .collect();
        debug!(answered = dialogs.len(), "confirm prompts disarmed");
        Ok(dialogs)
    }
}
