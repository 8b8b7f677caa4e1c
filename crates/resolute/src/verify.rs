//! Workflow verification.
//!
//! Composed assertions built from the resolver and the grid scanner, plus two
//! record workflows:
//!
//! - [`CrudCycle`]: `Absent -> Present -> Modified -> Restored -> Deleted`, where
//!   every transition is action, settle, re-snapshot, assert
//! - [`BulkDelete`]: select N rows, check the delete control shows N, confirm
//!   through an injected [`ConfirmPrompts`] capability, assert all N are gone
//!
//! Assertion failures carry the full row dump of the snapshot they were made
//! against.

use crate::config::EngineConfig;
use crate::dialog::{ConfirmPrompts, Dialog};
use crate::driver::PageDriver;
use crate::form::FormEngine;
use crate::grid::{GridRow, GridScanner, GridSnapshot, RecordPredicate, SortSpec, TableScope};
use crate::locator::Strategies;
use crate::resolver::{Constraints, ResolvedElement, Resolver};
use crate::result::{ResoluteError, ResoluteResult};
use crate::wait::{Poller, SettleCondition, Settler, WaitOptions};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument, warn};

fn with_dump(message: impl fmt::Display, snapshot: &GridSnapshot) -> ResoluteError {
    ResoluteError::assertion(format!("{message}\n{}", snapshot.dump().join("\n")))
}

// =============================================================================
// VERIFIER
// =============================================================================

/// Entry point for composed assertions and workflows on one page
#[derive(Clone, Copy)]
pub struct Verifier<'a> {
    driver: &'a dyn PageDriver,
    resolver: Resolver<'a>,
    forms: FormEngine<'a>,
    grid: GridScanner<'a>,
    settler: Settler<'a>,
}

impl fmt::Debug for Verifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("resolver", &self.resolver)
            .field("grid", &self.grid)
            .finish_non_exhaustive()
    }
}

impl<'a> Verifier<'a> {
    /// Create a verifier over `driver`
    #[must_use]
    pub fn new(driver: &'a dyn PageDriver, config: &EngineConfig) -> Self {
        Self {
            driver,
            resolver: Resolver::new(driver, config.resolver),
            forms: FormEngine::new(driver, config.form, config.settle),
            grid: GridScanner::new(driver, config.resolver, config.grid),
            settler: Settler::new(driver, config.settle),
        }
    }

    /// Page driver
    #[must_use]
    pub fn driver(&self) -> &'a dyn PageDriver {
        self.driver
    }

    /// Element resolver
    #[must_use]
    pub const fn resolver(&self) -> &Resolver<'a> {
        &self.resolver
    }

    /// Form engine
    #[must_use]
    pub const fn forms(&self) -> &FormEngine<'a> {
        &self.forms
    }

    /// Grid scanner
    #[must_use]
    pub const fn grid(&self) -> &GridScanner<'a> {
        &self.grid
    }

    /// Settler
    #[must_use]
    pub const fn settler(&self) -> &Settler<'a> {
        &self.settler
    }

    // -------------------------------------------------------------------------
    // Assertions
    // -------------------------------------------------------------------------

    /// The table holds a row matching `predicate`; returns it
    pub async fn assert_record_exists(
        &self,
        table: &TableScope,
        predicate: &RecordPredicate,
    ) -> ResoluteResult<GridRow> {
        let snapshot = self.grid.snapshot_until(table, Some(predicate)).await?;
        snapshot.find_row(predicate).cloned()
    }

    /// The table holds no row matching `predicate`
    pub async fn assert_record_absent(
        &self,
        table: &TableScope,
        predicate: &RecordPredicate,
    ) -> ResoluteResult<()> {
        let snapshot = self.grid.snapshot_until(table, Some(predicate)).await?;
        Self::absent_in(&snapshot, predicate)
    }

    fn absent_in(snapshot: &GridSnapshot, predicate: &RecordPredicate) -> ResoluteResult<()> {
        match snapshot.find_rows(predicate).first() {
            None => Ok(()),
            Some(row) => Err(with_dump(
                format!(
                    "expected no row where {predicate}, found '{}'",
                    row.text()
                ),
                snapshot,
            )),
        }
    }

    /// Exactly one row matches `predicate`; returns it
    pub async fn assert_record_unique(
        &self,
        table: &TableScope,
        predicate: &RecordPredicate,
    ) -> ResoluteResult<GridRow> {
        let snapshot = self.grid.snapshot(table).await?;
        snapshot.find_unique_row(predicate).cloned()
    }

    /// The table holds exactly `expected` rows
    pub async fn assert_row_count(&self, table: &TableScope, expected: usize) -> ResoluteResult<()> {
        let snapshot = self.grid.snapshot(table).await?;
        if snapshot.len() == expected {
            return Ok(());
        }
        Err(with_dump(
            format!("expected {expected} rows, found {}", snapshot.len()),
            &snapshot,
        ))
    }

    /// The column described by `spec` is ordered
    pub async fn assert_column_sorted(&self, table: &TableScope, spec: &SortSpec) -> ResoluteResult<()> {
        let snapshot = self.grid.snapshot(table).await?;
        if snapshot.is_sorted(spec)? {
            return Ok(());
        }
        Err(with_dump(
            format!(
                "column {} is not sorted {:?} ({:?})",
                spec.column, spec.direction, spec.comparator
            ),
            &snapshot,
        ))
    }

    /// Every row matches `predicate` and there is at least one; returns the count
    pub async fn assert_all_rows_match(
        &self,
        table: &TableScope,
        predicate: &RecordPredicate,
    ) -> ResoluteResult<usize> {
        let snapshot = self.grid.snapshot(table).await?;
        if snapshot.is_empty() {
            return Err(with_dump(
                format!("expected rows where {predicate}, table is empty"),
                &snapshot,
            ));
        }
        let strays: Vec<String> = snapshot
            .rows
            .iter()
            .filter(|row| !predicate.matches(&snapshot, row))
            .map(GridRow::text)
            .collect();
        if strays.is_empty() {
            return Ok(snapshot.len());
        }
        Err(with_dump(
            format!(
                "{} of {} rows do not match {predicate}: {}",
                strays.len(),
                snapshot.len(),
                strays.join("; ")
            ),
            &snapshot,
        ))
    }

    /// Exactly `expected` rows match `predicate`
    pub async fn assert_rows_match(
        &self,
        table: &TableScope,
        expected: usize,
        predicate: &RecordPredicate,
    ) -> ResoluteResult<Vec<GridRow>> {
        let snapshot = self.grid.snapshot(table).await?;
        let matched: Vec<GridRow> = snapshot.find_rows(predicate).into_iter().cloned().collect();
        if matched.len() == expected {
            return Ok(matched);
        }
        Err(with_dump(
            format!(
                "expected {expected} rows where {predicate}, found {}",
                matched.len()
            ),
            &snapshot,
        ))
    }

    /// Resolve a control inside `row`, e.g. its Edit link or selection checkbox
    pub async fn row_action(&self, row: &GridRow, control: &Strategies) -> ResoluteResult<ResolvedElement> {
        let current = self.driver.navigation_epoch().await?;
        if current != row.epoch {
            return Err(ResoluteError::StaleElement {
                target: format!("row '{}'", row.text()),
                resolved_epoch: row.epoch,
                current_epoch: current,
            });
        }
        self.resolver
            .resolve(&control.within(row.node), &Constraints::interactable())
            .await
    }

    async fn settle(&self, condition: &SettleCondition, timeout: Option<Duration>) -> ResoluteResult<()> {
        match timeout {
            Some(timeout) => self.settler.settle(condition, timeout).await,
            None => self.settler.settle_default(condition).await,
        }
    }

    // -------------------------------------------------------------------------
    // Workflows
    // -------------------------------------------------------------------------

    /// Run the full create, edit, revert, delete cycle
    #[instrument(level = "info", skip_all, fields(record = %cycle.original))]
    pub async fn perform_crud_cycle(
        &self,
        cycle: &CrudCycle,
        actions: &dyn CrudActions,
        prompts: &dyn ConfirmPrompts,
    ) -> ResoluteResult<CrudReport> {
        let mut report = CrudReport::default();
        let table = &cycle.table;

        self.assert_record_absent(table, &cycle.original).await?;

        actions.create(self).await?;
        self.settle(&cycle.settle, cycle.settle_timeout).await?;
        let row = self.assert_record_unique(table, &cycle.original).await?;
        report.record(CrudState::Absent, CrudState::Present, &row);

        actions.edit(self, &row).await?;
        self.settle(&cycle.settle, cycle.settle_timeout).await?;
        let snapshot = self.grid.snapshot(table).await?;
        Self::absent_in(&snapshot, &cycle.original)?;
        let row = snapshot.find_unique_row(&cycle.edited)?.clone();
        report.record(CrudState::Present, CrudState::Modified, &row);

        actions.revert(self, &row).await?;
        self.settle(&cycle.settle, cycle.settle_timeout).await?;
        let snapshot = self.grid.snapshot(table).await?;
        Self::absent_in(&snapshot, &cycle.edited)?;
        let row = snapshot.find_unique_row(&cycle.original)?.clone();
        report.record(CrudState::Modified, CrudState::Restored, &row);

        prompts.arm().await?;
        let deleted = async {
            actions.delete(self, &row).await?;
            self.settle(&cycle.settle, cycle.settle_timeout).await
        }
        .await;
        let dialogs = prompts.disarm().await;
        deleted?;
        report.dialogs = dialogs?;
        self.assert_record_absent(table, &cycle.original).await?;
        report.record(CrudState::Restored, CrudState::Deleted, &row);

        info!(transitions = report.transitions.len(), "crud cycle complete");
        Ok(report)
    }

    /// Select every target row, delete them in one confirmed action, verify
    #[instrument(level = "info", skip_all, fields(targets = plan.targets.len()))]
    pub async fn bulk_delete(
        &self,
        plan: &BulkDelete,
        prompts: &dyn ConfirmPrompts,
    ) -> ResoluteResult<BulkDeleteReport> {
        let count = plan.targets.len();
        let before = self.grid.snapshot(&plan.table).await?;
        for target in &plan.targets {
            let row = before.find_unique_row(target)?;
            let checkbox = self.row_action(row, &plan.row_checkbox).await?;
            self.forms.set_checked(&checkbox, true).await?;
        }

        let control = self
            .resolver
            .resolve(&plan.delete_control, &Constraints::interactable())
            .await?;
        let control_text = self.await_count_label(&control, count).await?;

        prompts.arm().await?;
        let clicked = async {
            self.forms.click(&control).await?;
            self.settle(&plan.settle, plan.settle_timeout).await
        }
        .await;
        let dialogs = prompts.disarm().await;
        clicked?;
        let dialogs = dialogs?;
        if dialogs.is_empty() {
            warn!("bulk delete completed without a confirmation prompt");
        }

        let after = self.grid.snapshot(&plan.table).await?;
        let survivors: Vec<String> = plan
            .targets
            .iter()
            .filter(|target| !after.find_rows(target).is_empty())
            .map(ToString::to_string)
            .collect();
        if !survivors.is_empty() {
            return Err(with_dump(
                format!(
                    "{} of {count} selected records still present: {}",
                    survivors.len(),
                    survivors.join("; ")
                ),
                &after,
            ));
        }

        info!(deleted = count, remaining = after.len(), "bulk delete verified");
        Ok(BulkDeleteReport {
            deleted: count,
            control_text,
            dialogs,
            rows_before: before.len(),
            rows_after: after.len(),
        })
    }

    async fn await_count_label(&self, control: &ResolvedElement, count: usize) -> ResoluteResult<String> {
        let pattern = Regex::new(&format!(r"\(\s*{count}\s*\)"))
            .map_err(|e| ResoluteError::config(e.to_string()))?;
        let options = WaitOptions::new(
            self.resolver.config().timeout_ms,
            self.resolver.config().poll_interval_ms,
        );
        let mut poller = Poller::start(options);
        loop {
            let text = self.driver.text(control.node).await?;
            if pattern.is_match(&text) {
                return Ok(text);
            }
            if !poller.tick().await {
                return Err(ResoluteError::assertion(format!(
                    "{control} shows '{text}', expected a selection count of ({count})"
                )));
            }
        }
    }
}

// =============================================================================
// CRUD CYCLE
// =============================================================================

/// UI actions that drive one record through its life cycle.
///
/// Each action receives the row currently representing the record so it can
/// scope its Edit or Delete control with [`Verifier::row_action`].
#[async_trait]
pub trait CrudActions: Send + Sync {
    /// Create the record
    async fn create(&self, verifier: &Verifier<'_>) -> ResoluteResult<()>;

    /// Change the record to its edited values
    async fn edit(&self, verifier: &Verifier<'_>, row: &GridRow) -> ResoluteResult<()>;

    /// Change the record back to its original values
    async fn revert(&self, verifier: &Verifier<'_>, row: &GridRow) -> ResoluteResult<()>;

    /// Delete the record (confirmation prompts are armed around this call)
    async fn delete(&self, verifier: &Verifier<'_>, row: &GridRow) -> ResoluteResult<()>;
}

/// Record life cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrudState {
    /// No row for the record
    Absent,
    /// Row with the original values
    Present,
    /// Row with the edited values, none with the original
    Modified,
    /// Row with the original values again, none with the edited
    Restored,
    /// No row after a confirmed delete
    Deleted,
}

impl fmt::Display for CrudState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::Present => "present",
            Self::Modified => "modified",
            Self::Restored => "restored",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Definition of one CRUD cycle
#[derive(Debug, Clone)]
pub struct CrudCycle {
    /// Grid listing the records
    pub table: TableScope,
    /// Matches the record as created
    pub original: RecordPredicate,
    /// Matches the record after editing
    pub edited: RecordPredicate,
    /// Holds once the grid is back after each action
    pub settle: SettleCondition,
    /// Settle timeout; `None` uses the configured default
    pub settle_timeout: Option<Duration>,
}

impl CrudCycle {
    /// Create a cycle definition
    #[must_use]
    pub fn new(
        table: TableScope,
        original: RecordPredicate,
        edited: RecordPredicate,
        settle: SettleCondition,
    ) -> Self {
        Self {
            table,
            original,
            edited,
            settle,
            settle_timeout: None,
        }
    }

    /// Override the settle timeout
    #[must_use]
    pub const fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = Some(timeout);
        self
    }
}

/// One verified state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrudTransition {
    /// State before the action
    pub from: CrudState,
    /// State verified after the action
    pub to: CrudState,
    /// Row text the transition was verified against
    pub row: String,
}

/// Outcome of a CRUD cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrudReport {
    /// Verified transitions in order
    pub transitions: Vec<CrudTransition>,
    /// Dialogs answered during delete
    pub dialogs: Vec<Dialog>,
}

impl CrudReport {
    fn record(&mut self, from: CrudState, to: CrudState, row: &GridRow) {
        info!(%from, %to, row = %row.text(), "crud transition verified");
        self.transitions.push(CrudTransition {
            from,
            to,
            row: row.text(),
        });
    }

    /// Last verified state
    #[must_use]
    pub fn final_state(&self) -> CrudState {
        self.transitions
            .last()
            .map_or(CrudState::Absent, |t| t.to)
    }
}

// =============================================================================
// BULK DELETE
// =============================================================================

/// Definition of a multi-select delete
#[derive(Debug, Clone)]
pub struct BulkDelete {
    /// Grid listing the records
    pub table: TableScope,
    /// One predicate per record to delete
    pub targets: Vec<RecordPredicate>,
    /// Selection checkbox, relative to a row
    pub row_checkbox: Strategies,
    /// Control that deletes the selection; its text shows the count
    pub delete_control: Strategies,
    /// Holds once the delete has been applied
    pub settle: SettleCondition,
    /// Settle timeout; `None` uses the configured default
    pub settle_timeout: Option<Duration>,
}

impl BulkDelete {
    /// Delete `targets` from `table` using a checkbox per row and a
    /// "Delete Selected (N)" button
    #[must_use]
    pub fn new(table: TableScope, targets: Vec<RecordPredicate>, settle: SettleCondition) -> Self {
        Self {
            table,
            targets,
            row_checkbox: Strategies::css("input[type='checkbox']"),
            delete_control: Strategies::button("Delete Selected"),
            settle,
            settle_timeout: None,
        }
    }

    /// Override the row checkbox strategies
    #[must_use]
    pub fn with_row_checkbox(mut self, strategies: Strategies) -> Self {
        self.row_checkbox = strategies;
        self
    }

    /// Override the delete control strategies
    #[must_use]
    pub fn with_delete_control(mut self, strategies: Strategies) -> Self {
        self.delete_control = strategies;
        self
    }

    /// Override the settle timeout
    #[must_use]
    pub const fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = Some(timeout);
        self
    }
}

/// Outcome of a bulk delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteReport {
    /// Records deleted
    pub deleted: usize,
    /// Delete control text at the moment of the click
    pub control_text: String,
    /// Dialogs answered
    pub dialogs: Vec<Dialog>,
    /// Row count before
    pub rows_before: usize,
    /// Row count after
    pub rows_after: usize,
}
