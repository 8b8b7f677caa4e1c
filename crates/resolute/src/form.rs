//! Form interaction engine.
//!
//! Every action first re-checks its target: a handle from an older navigation
//! epoch fails with `StaleElement`, a hidden or disabled target fails with
//! `NotInteractable`. Nothing is silently skipped.
//!
//! Text fill follows the sequence client-side validators listen for:
//! focus, clear, type, `input`, `change`, `blur`, then a bounded wait until the
//! page reports the new value.

use crate::config::{FormConfig, SettleConfig};
use crate::driver::{DomEvent, NodeId, PageDriver};
use crate::locator::{Scope, Selector};
use crate::normalize::{collapse, compact, fold};
use crate::resolver::ResolvedElement;
use crate::result::{ResoluteError, ResoluteResult};
use crate::wait::{Poller, SettleCondition, Settler, WaitOptions};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, instrument};

/// Drives resolved form controls
#[derive(Clone, Copy)]
pub struct FormEngine<'a> {
    driver: &'a dyn PageDriver,
    config: FormConfig,
    settle: SettleConfig,
}

impl fmt::Debug for FormEngine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormEngine")
            .field("config", &self.config)
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl<'a> FormEngine<'a> {
    /// Create a form engine
    #[must_use]
    pub const fn new(driver: &'a dyn PageDriver, config: FormConfig, settle: SettleConfig) -> Self {
        Self {
            driver,
            config,
            settle,
        }
    }

    /// Fail unless the element is current, visible and enabled
    pub async fn ensure_interactable(&self, element: &ResolvedElement) -> ResoluteResult<()> {
        element.ensure_current(self.driver).await?;
        if !self.driver.is_visible(element.node).await? {
            return Err(ResoluteError::NotInteractable {
                target: element.to_string(),
                reason: "element is hidden".to_string(),
            });
        }
        if !self.driver.is_enabled(element.node).await? {
            return Err(ResoluteError::NotInteractable {
                target: element.to_string(),
                reason: "element is disabled".to_string(),
            });
        }
        Ok(())
    }

    /// Replace the element's text and wait until the page reports it
    #[instrument(level = "debug", skip(self, element), fields(target = %element.target))]
    pub async fn fill(&self, element: &ResolvedElement, value: &str) -> ResoluteResult<()> {
        self.ensure_interactable(element).await?;
        let node = element.node;
        self.driver.focus(node).await?;
        self.driver.dispatch_event(node, DomEvent::Focus).await?;
        self.driver.clear(node).await?;
        self.driver.set_value(node, value).await?;
        self.driver.dispatch_event(node, DomEvent::Input).await?;
        self.driver.dispatch_event(node, DomEvent::Change).await?;
        self.driver.dispatch_event(node, DomEvent::Blur).await?;
        self.await_commit(element, value).await
    }

    async fn await_commit(&self, element: &ResolvedElement, expected: &str) -> ResoluteResult<()> {
        let options = WaitOptions::new(self.config.commit_wait_ms, self.config.commit_poll_ms);
        let mut poller = Poller::start(options);
        let mut last = String::new();
        loop {
            last = self.driver.value(element.node).await.unwrap_or(last);
            if last == expected {
                debug!(attempts = poller.attempts(), "value committed");
                return Ok(());
            }
            if !poller.tick().await {
                return Err(ResoluteError::timeout(
                    format!(
                        "{element} to commit value '{expected}' (last seen '{last}')"
                    ),
                    options.timeout_ms,
                ));
            }
        }
    }

    /// Choose an option by value, then by visible label.
    ///
    /// Label matching tries case/whitespace-insensitive equality first, then
    /// equality with all whitespace removed.
    #[instrument(level = "debug", skip(self, element), fields(target = %element.target))]
    pub async fn select_option(
        &self,
        element: &ResolvedElement,
        label_or_value: &str,
    ) -> ResoluteResult<()> {
        self.ensure_interactable(element).await?;
        let select = element.node;
        let options = self
            .driver
            .query_all(&Scope::Within(select), &Selector::tag("option"))
            .await?;

        let mut listed = Vec::with_capacity(options.len());
        for option in &options {
            let value = self.driver.value(*option).await.ok();
            let value = match value.filter(|v| !v.is_empty()) {
                Some(v) => v,
                None => self
                    .driver
                    .attribute(*option, "value")
                    .await?
                    .unwrap_or_default(),
            };
            let text = collapse(&self.driver.text(*option).await?);
            listed.push((*option, value, text));
        }

        let chosen = find_option(&listed, label_or_value).ok_or_else(|| ResoluteError::NotFound {
            target: format!("option '{label_or_value}' in {element}"),
            attempted: vec![
                "value".to_string(),
                "label (case-insensitive)".to_string(),
                "label (whitespace-insensitive)".to_string(),
            ],
            candidates: listed
                .iter()
                .map(|(_, value, text)| format!("option[value='{value}'] \"{text}\""))
                .collect(),
            timeout_ms: 0,
        })?;

        self.driver.choose_option(select, chosen).await?;
        self.driver.dispatch_event(select, DomEvent::Input).await?;
        self.driver.dispatch_event(select, DomEvent::Change).await?;
        self.driver.dispatch_event(select, DomEvent::Blur).await
    }

    /// Click the element
    #[instrument(level = "debug", skip(self, element), fields(target = %element.target))]
    pub async fn click(&self, element: &ResolvedElement) -> ResoluteResult<()> {
        self.ensure_interactable(element).await?;
        self.driver.click(element.node).await
    }

    /// Click, then block until `condition` holds
    pub async fn click_and_settle(
        &self,
        element: &ResolvedElement,
        condition: &SettleCondition,
        timeout: Option<Duration>,
    ) -> ResoluteResult<()> {
        self.click(element).await?;
        let timeout = timeout.unwrap_or(Duration::from_millis(self.settle.timeout_ms));
        Settler::new(self.driver, self.settle)
            .settle(condition, timeout)
            .await
    }

    /// Set a checkbox or radio state
    pub async fn set_checked(&self, element: &ResolvedElement, checked: bool) -> ResoluteResult<()> {
        self.ensure_interactable(element).await?;
        self.driver.set_checked(element.node, checked).await?;
        if self.driver.is_checked(element.node).await? != checked {
            return Err(ResoluteError::NotInteractable {
                target: element.to_string(),
                reason: format!("checked state did not change to {checked}"),
            });
        }
        Ok(())
    }

    /// Attach files to a file input
    pub async fn upload_files(&self, element: &ResolvedElement, files: &[PathBuf]) -> ResoluteResult<()> {
        element.ensure_current(self.driver).await?;
        if !self.driver.is_enabled(element.node).await? {
            return Err(ResoluteError::NotInteractable {
                target: element.to_string(),
                reason: "file input is disabled".to_string(),
            });
        }
        for file in files {
            if !file.exists() {
                return Err(ResoluteError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("upload file {} does not exist", file.display()),
                )));
            }
        }
        self.driver.set_input_files(element.node, files).await?;
        self.driver.dispatch_event(element.node, DomEvent::Change).await
    }
}

fn find_option(options: &[(NodeId, String, String)], wanted: &str) -> Option<NodeId> {
    let by_value = options.iter().find(|(_, value, _)| value == wanted);
    let by_label = || options.iter().find(|(_, _, text)| fold(text) == fold(wanted));
    let by_compact = || {
        options
            .iter()
            .find(|(_, _, text)| compact(text) == compact(wanted))
    };
    by_value
        .or_else(by_label)
        .or_else(by_compact)
        .map(|(node, _, _)| *node)
}
