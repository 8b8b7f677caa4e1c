//! Grid and table scanning.
//!
//! A [`GridSnapshot`] is an immutable capture of every row that could be read
//! from a table at one instant. Two rendering models are supported:
//!
//! - **Full**: every row is in the DOM, possibly off-screen
//! - **Virtualized**: only a window of rows is rendered; the scanner scrolls the
//!   container step by step, merging each window into the snapshot, until the
//!   wanted record shows up, the end is reached, or the attempt budget runs out
//!
//! Rows are matched with a [`RecordPredicate`] by column name when headers can
//! be read, falling back to positional indices otherwise.

use crate::config::{GridConfig, ResolverConfig, ScrollConfig};
use crate::driver::{NodeId, PageDriver};
use crate::locator::{Scope, Selector, Strategies};
use crate::normalize::{collapse, compact, compact_eq, fold, ordinal_ignore_case, parse_int};
use crate::resolver::{Constraints, Resolver};
use crate::result::{ResoluteError, ResoluteResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, instrument};

// =============================================================================
// TABLE SCOPE
// =============================================================================

/// Scrolling behavior for a virtualized grid
#[derive(Debug, Clone)]
pub struct ScrollPolicy {
    /// Scrollable container owning the row window
    pub container: Strategies,
    /// Step and budget; `None` uses the scanner's configured defaults
    pub scroll: Option<ScrollConfig>,
}

/// Where a table lives and how its parts are found
#[derive(Debug, Clone)]
pub struct TableScope {
    /// Table element
    pub table: Strategies,
    /// Rows, relative to the table
    pub row_selector: Selector,
    /// Cells, relative to a row
    pub cell_selector: Selector,
    /// Header cells, relative to the table
    pub header_selector: Selector,
    /// Set for virtualized grids
    pub scroll: Option<ScrollPolicy>,
}

impl TableScope {
    /// Table found by `table`, with `tbody tr` rows, `td` cells, `thead th` headers
    #[must_use]
    pub fn new(table: Strategies) -> Self {
        Self {
            table,
            row_selector: Selector::css("tbody tr"),
            cell_selector: Selector::css("td"),
            header_selector: Selector::css("thead th"),
            scroll: None,
        }
    }

    /// Table found by a single CSS selector
    #[must_use]
    pub fn css(table: &str) -> Self {
        Self::new(Strategies::css(table))
    }

    /// Override the row selector
    #[must_use]
    pub fn with_rows(mut self, selector: Selector) -> Self {
        self.row_selector = selector;
        self
    }

    /// Override the cell selector
    #[must_use]
    pub fn with_cells(mut self, selector: Selector) -> Self {
        self.cell_selector = selector;
        self
    }

    /// Override the header selector
    #[must_use]
    pub fn with_headers(mut self, selector: Selector) -> Self {
        self.header_selector = selector;
        self
    }

    /// Rows are virtualized inside `container`
    #[must_use]
    pub fn virtualized(mut self, container: Strategies) -> Self {
        self.scroll = Some(ScrollPolicy {
            container,
            scroll: None,
        });
        self
    }

    /// Override the scroll step and budget of a virtualized grid
    #[must_use]
    pub fn with_scroll(mut self, scroll: ScrollConfig) -> Self {
        if let Some(policy) = self.scroll.as_mut() {
            policy.scroll = Some(scroll);
        }
        self
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// One captured row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRow {
    /// Whitespace-collapsed cell texts in column order
    pub cells: Vec<String>,
    /// Row node, for scoping row actions; valid only in `epoch`
    pub node: NodeId,
    /// Navigation epoch at capture time
    pub epoch: u64,
}

impl GridRow {
    /// Create a row
    #[must_use]
    pub fn new(cells: Vec<String>, node: NodeId, epoch: u64) -> Self {
        Self { cells, node, epoch }
    }

    /// Cell at `index`
    #[must_use]
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(String::as_str)
    }

    /// Cells joined with ` | `
    #[must_use]
    pub fn text(&self) -> String {
        self.cells.join(" | ")
    }
}

/// Immutable capture of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSnapshot {
    /// Header texts, when the table exposes any
    pub headers: Option<Vec<String>>,
    /// Rows in display order
    pub rows: Vec<GridRow>,
    /// Navigation epoch at capture time
    pub epoch: u64,
}

impl GridSnapshot {
    /// Create a snapshot
    #[must_use]
    pub fn new(headers: Option<Vec<String>>, rows: Vec<GridRow>, epoch: u64) -> Self {
        Self {
            headers,
            rows,
            epoch,
        }
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the snapshot has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the header whose text equals `name`, ignoring whitespace and case
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .as_ref()?
            .iter()
            .position(|header| compact_eq(header, name))
    }

    /// Every row as text, for failure messages
    #[must_use]
    pub fn dump(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        if let Some(headers) = &self.headers {
            out.push(format!("[{}]", headers.join(" | ")));
        }
        if self.rows.is_empty() {
            out.push("(no rows)".to_string());
        }
        out.extend(
            self.rows
                .iter()
                .enumerate()
                .map(|(i, row)| format!("{i:>3}: {}", row.text())),
        );
        out
    }

    /// Rows matching `predicate`, in display order
    #[must_use]
    pub fn find_rows(&self, predicate: &RecordPredicate) -> Vec<&GridRow> {
        self.rows
            .iter()
            .filter(|row| predicate.matches(self, row))
            .collect()
    }

    /// First row matching `predicate`
    pub fn find_row(&self, predicate: &RecordPredicate) -> ResoluteResult<&GridRow> {
        self.find_rows(predicate)
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(predicate))
    }

    /// The only row matching `predicate`; `AmbiguousMatch` if there are several
    pub fn find_unique_row(&self, predicate: &RecordPredicate) -> ResoluteResult<&GridRow> {
        let matches = self.find_rows(predicate);
        match matches.len() {
            0 => Err(self.not_found(predicate)),
            1 => Ok(matches[0]),
            count => Err(ResoluteError::AmbiguousMatch {
                target: predicate.describe(),
                count,
                rows: matches.iter().map(|row| row.text()).collect(),
            }),
        }
    }

    fn not_found(&self, predicate: &RecordPredicate) -> ResoluteError {
        let mut attempted = vec![format!("{} rows scanned", self.rows.len())];
        attempted.extend(
            predicate
                .unresolved_columns(self)
                .into_iter()
                .map(|column| format!("column '{column}' not in headers")),
        );
        ResoluteError::NotFound {
            target: format!("row where {}", predicate.describe()),
            attempted,
            candidates: self.dump(),
            timeout_ms: 0,
        }
    }

    /// Whether the column described by `spec` is ordered.
    ///
    /// Rows missing the cell are ignored; numeric columns also ignore cells
    /// that do not parse as integers.
    pub fn is_sorted(&self, spec: &SortSpec) -> ResoluteResult<bool> {
        let index = spec
            .column
            .resolve(self, spec.fallback_index)
            .ok_or_else(|| ResoluteError::NotFound {
                target: format!("sort column {}", spec.column),
                attempted: vec!["headers".to_string(), "fallback index".to_string()],
                candidates: self.headers.clone().unwrap_or_default(),
                timeout_ms: 0,
            })?;
        let cells: Vec<&str> = self.rows.iter().filter_map(|row| row.cell(index)).collect();
        let in_order = |ord: Ordering| match spec.direction {
            SortDirection::Ascending => ord != Ordering::Greater,
            SortDirection::Descending => ord != Ordering::Less,
        };
        let sorted = match spec.comparator {
            SortComparator::TextCaseInsensitive => cells
                .windows(2)
                .all(|pair| in_order(ordinal_ignore_case(pair[0], pair[1]))),
            SortComparator::Numeric => {
                let numbers: Vec<i64> = cells.iter().filter_map(|c| parse_int(c)).collect();
                numbers.windows(2).all(|pair| in_order(pair[0].cmp(&pair[1])))
            }
        };
        Ok(sorted)
    }

    /// Cell values of one column, skipping rows that lack it
    pub fn column_values(&self, column: &ColumnRef) -> ResoluteResult<Vec<&str>> {
        let index = column
            .resolve(self, None)
            .ok_or_else(|| ResoluteError::NotFound {
                target: format!("column {column}"),
                attempted: vec!["headers".to_string()],
                candidates: self.headers.clone().unwrap_or_default(),
                timeout_ms: 0,
            })?;
        Ok(self.rows.iter().filter_map(|row| row.cell(index)).collect())
    }
}

// =============================================================================
// PREDICATES
// =============================================================================

/// Column identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnRef {
    /// Header text
    Named(String),
    /// Zero-based position
    Index(usize),
}

impl ColumnRef {
    /// Column position in `snapshot`, using `fallback` when headers don't resolve
    #[must_use]
    pub fn resolve(&self, snapshot: &GridSnapshot, fallback: Option<usize>) -> Option<usize> {
        match self {
            Self::Named(name) => snapshot.column_index(name).or(fallback),
            Self::Index(index) => Some(*index),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "'{name}'"),
            Self::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// Cell comparison mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    /// Equal after whitespace collapsing
    Exact,
    /// Equal ignoring case and repeated whitespace
    CaseInsensitive,
    /// Cell starts with the expected text, ignoring case
    Prefix,
    /// Equal after removing all whitespace and case.
    ///
    /// Enum-like cells are sometimes rendered without spaces
    /// (`PreferNotToSay` for "Prefer not to say").
    #[default]
    Compact,
}

impl MatchMode {
    /// Whether `cell` satisfies `expected` under this mode
    #[must_use]
    pub fn test(self, cell: &str, expected: &str) -> bool {
        match self {
            Self::Exact => collapse(cell) == collapse(expected),
            Self::CaseInsensitive => fold(cell) == fold(expected),
            Self::Prefix => fold(cell).starts_with(&fold(expected)),
            Self::Compact => compact(cell) == compact(expected),
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Exact => "==",
            Self::CaseInsensitive => "=i",
            Self::Prefix => "^=",
            Self::Compact => "~",
        }
    }
}

/// One column condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMatch {
    /// Column to read
    pub column: ColumnRef,
    /// Position to use when headers can't be resolved
    pub fallback_index: Option<usize>,
    /// Expected cell text
    pub expected: String,
    /// Comparison
    pub mode: MatchMode,
}

/// Column-order-independent record matcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPredicate {
    fields: Vec<FieldMatch>,
}

impl RecordPredicate {
    /// Predicate with no conditions (matches every row)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column` to equal `expected` (whitespace and case insensitive)
    #[must_use]
    pub fn field(self, column: impl Into<ColumnRef>, expected: impl Into<String>) -> Self {
        self.push(column.into(), None, expected.into(), MatchMode::default())
    }

    /// Like [`RecordPredicate::field`], with a positional fallback for headerless grids
    #[must_use]
    pub fn field_at(self, column: &str, fallback_index: usize, expected: impl Into<String>) -> Self {
        self.push(
            ColumnRef::from(column),
            Some(fallback_index),
            expected.into(),
            MatchMode::default(),
        )
    }

    /// Require `column` to satisfy `expected` under `mode`
    #[must_use]
    pub fn field_with(
        self,
        column: impl Into<ColumnRef>,
        expected: impl Into<String>,
        mode: MatchMode,
    ) -> Self {
        self.push(column.into(), None, expected.into(), mode)
    }

    /// Change the comparison of the most recently added condition
    #[must_use]
    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.mode = mode;
        }
        self
    }

    fn push(
        mut self,
        column: ColumnRef,
        fallback_index: Option<usize>,
        expected: String,
        mode: MatchMode,
    ) -> Self {
        self.fields.push(FieldMatch {
            column,
            fallback_index,
            expected,
            mode,
        });
        self
    }

    /// Conditions, in insertion order
    #[must_use]
    pub fn fields(&self) -> &[FieldMatch] {
        &self.fields
    }

    /// Whether `row` (from `snapshot`) satisfies every condition
    #[must_use]
    pub fn matches(&self, snapshot: &GridSnapshot, row: &GridRow) -> bool {
        self.fields.iter().all(|field| {
            field
                .column
                .resolve(snapshot, field.fallback_index)
                .and_then(|index| row.cell(index))
                .is_some_and(|cell| field.mode.test(cell, &field.expected))
        })
    }

    /// Named columns that neither headers nor a fallback index can place
    #[must_use]
    pub fn unresolved_columns(&self, snapshot: &GridSnapshot) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| field.column.resolve(snapshot, field.fallback_index).is_none())
            .map(|field| field.column.to_string())
            .collect()
    }

    /// Human-readable form used in failure messages
    #[must_use]
    pub fn describe(&self) -> String {
        if self.fields.is_empty() {
            return "(any row)".to_string();
        }
        self.fields
            .iter()
            .map(|f| format!("{} {} '{}'", f.column, f.mode.symbol(), f.expected))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for RecordPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// =============================================================================
// SORTING
// =============================================================================

/// How cells are compared for ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortComparator {
    /// Case-insensitive ordinal comparison
    TextCaseInsensitive,
    /// Integer comparison; unparseable cells are skipped
    Numeric,
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

/// Column ordering to verify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Column to read
    pub column: ColumnRef,
    /// Position to use when headers can't be resolved
    pub fallback_index: Option<usize>,
    /// Comparison
    pub comparator: SortComparator,
    /// Expected direction
    pub direction: SortDirection,
}

impl SortSpec {
    /// Ascending text order
    #[must_use]
    pub fn text(column: impl Into<ColumnRef>) -> Self {
        Self::new(column, SortComparator::TextCaseInsensitive)
    }

    /// Ascending numeric order
    #[must_use]
    pub fn numeric(column: impl Into<ColumnRef>) -> Self {
        Self::new(column, SortComparator::Numeric)
    }

    /// Ascending order with `comparator`
    #[must_use]
    pub fn new(column: impl Into<ColumnRef>, comparator: SortComparator) -> Self {
        Self {
            column: column.into(),
            fallback_index: None,
            comparator,
            direction: SortDirection::Ascending,
        }
    }

    /// Expect descending order
    #[must_use]
    pub const fn descending(mut self) -> Self {
        self.direction = SortDirection::Descending;
        self
    }

    /// Positional fallback for headerless grids
    #[must_use]
    pub const fn with_fallback(mut self, index: usize) -> Self {
        self.fallback_index = Some(index);
        self
    }
}

// =============================================================================
// SCANNER
// =============================================================================

/// Captures snapshots from a page
#[derive(Clone, Copy)]
pub struct GridScanner<'a> {
    driver: &'a dyn PageDriver,
    resolver: Resolver<'a>,
    config: GridConfig,
}

impl fmt::Debug for GridScanner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridScanner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> GridScanner<'a> {
    /// Create a scanner
    #[must_use]
    pub const fn new(driver: &'a dyn PageDriver, resolver: ResolverConfig, config: GridConfig) -> Self {
        Self {
            driver,
            resolver: Resolver::new(driver, resolver),
            config,
        }
    }

    /// Capture every reachable row
    pub async fn snapshot(&self, scope: &TableScope) -> ResoluteResult<GridSnapshot> {
        self.snapshot_until(scope, None).await
    }

    /// Capture rows, stopping a virtualized scan early once `target` matches
    #[instrument(level = "debug", skip_all, fields(table = %scope.table.label()))]
    pub async fn snapshot_until(
        &self,
        scope: &TableScope,
        target: Option<&RecordPredicate>,
    ) -> ResoluteResult<GridSnapshot> {
        let table = self
            .resolver
            .resolve(&scope.table, &Constraints::visible())
            .await?;
        let epoch = table.epoch;
        let headers = self.read_headers(scope, table.node).await?;
        let mut snapshot = GridSnapshot::new(headers, Vec::new(), epoch);
        let mut seen = HashSet::new();
        self.merge_rows(scope, table.node, &mut snapshot, &mut seen, false)
            .await?;

        let Some(policy) = &scope.scroll else {
            debug!(rows = snapshot.len(), "snapshot captured");
            return Ok(snapshot);
        };

        let scroll = policy.scroll.unwrap_or(self.config.scroll);
        let container = self
            .resolver
            .resolve(&policy.container, &Constraints::present())
            .await?;
        let start = self.driver.scroll_by(container.node, 0).await?;
        if start.top > 0 {
            self.driver.scroll_by(container.node, -start.top).await?;
            snapshot.rows.clear();
            seen.clear();
            self.merge_rows(scope, table.node, &mut snapshot, &mut seen, false)
                .await?;
        }

        let mut top = 0;
        let mut steps = 0;
        while steps < scroll.max_attempts {
            if target.is_some_and(|p| !snapshot.find_rows(p).is_empty()) {
                break;
            }
            let state = self.driver.scroll_by(container.node, scroll.step_px).await?;
            steps += 1;
            if state.top == top {
                break;
            }
            top = state.top;
            self.merge_rows(scope, table.node, &mut snapshot, &mut seen, true)
                .await?;
            if state.at_end() {
                break;
            }
        }
        debug!(rows = snapshot.len(), steps, "virtualized snapshot captured");
        Ok(snapshot)
    }

    async fn read_headers(&self, scope: &TableScope, table: NodeId) -> ResoluteResult<Option<Vec<String>>> {
        let nodes = self
            .driver
            .query_all(&Scope::Within(table), &scope.header_selector)
            .await?;
        if nodes.is_empty() {
            return Ok(None);
        }
        let mut headers = Vec::with_capacity(nodes.len());
        for node in nodes {
            headers.push(collapse(&self.driver.text(node).await?));
        }
        Ok(Some(headers))
    }

    /// Append visible rows; a scrolled `window` skips rows already seen
    async fn merge_rows(
        &self,
        scope: &TableScope,
        table: NodeId,
        snapshot: &mut GridSnapshot,
        seen: &mut HashSet<Vec<String>>,
        window: bool,
    ) -> ResoluteResult<()> {
        let rows = self
            .driver
            .query_all(&Scope::Within(table), &scope.row_selector)
            .await?;
        for row in rows {
            let cells = self
                .driver
                .query_all(&Scope::Within(row), &scope.cell_selector)
                .await?;
            let mut texts = Vec::with_capacity(cells.len());
            for cell in cells {
                texts.push(collapse(&self.driver.text(cell).await?));
            }
            let fresh = seen.insert(texts.clone());
            if fresh || !window {
                snapshot.rows.push(GridRow::new(texts, row, snapshot.epoch));
            }
        }
        Ok(())
    }

    /// Snapshot, then the first row matching `predicate`
    pub async fn find_row(&self, scope: &TableScope, predicate: &RecordPredicate) -> ResoluteResult<GridRow> {
        let snapshot = self.snapshot_until(scope, Some(predicate)).await?;
        snapshot.find_row(predicate).cloned()
    }

    /// Snapshot, then every row matching `predicate`
    pub async fn find_rows(&self, scope: &TableScope, predicate: &RecordPredicate) -> ResoluteResult<Vec<GridRow>> {
        let snapshot = self.snapshot(scope).await?;
        Ok(snapshot.find_rows(predicate).into_iter().cloned().collect())
    }

    /// Snapshot, then check ordering
    pub async fn is_sorted(&self, scope: &TableScope, spec: &SortSpec) -> ResoluteResult<bool> {
        self.snapshot(scope).await?.is_sorted(spec)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mock::{El, MockPage};
    use proptest::prelude::*;

    fn snapshot_of(headers: Option<&[&str]>, rows: &[&[&str]]) -> GridSnapshot {
        GridSnapshot::new(
            headers.map(|h| h.iter().map(ToString::to_string).collect()),
            rows.iter()
                .enumerate()
                .map(|(i, cells)| {
                    GridRow::new(
                        cells.iter().map(ToString::to_string).collect(),
                        NodeId(i as u64 + 100),
                        0,
                    )
                })
                .collect(),
            0,
        )
    }

    const PEOPLE_HEADERS: &[&str] = &["Forename", "Family Name", "Gender", "Year Of Birth"];

    mod predicate_tests {
        use super::*;

        #[test]
        fn test_matches_by_header_name_regardless_of_order() {
            let snap = snapshot_of(
                Some(&["Year Of Birth", "Gender", "Family Name", "Forename"]),
                &[&["1985", "Male", "Smith", "William"]],
            );
            let predicate = RecordPredicate::new()
                .field("Forename", "William")
                .field("FamilyName", "Smith");
            assert!(predicate.matches(&snap, &snap.rows[0]));
        }

        #[test]
        fn test_compact_gender_match() {
            let snap = snapshot_of(
                Some(PEOPLE_HEADERS),
                &[&["Alex", "Jones", "PreferNotToSay", "1970"]],
            );
            let predicate = RecordPredicate::new().field("Gender", "Prefer not to say");
            assert!(predicate.matches(&snap, &snap.rows[0]));
        }

        #[test]
        fn test_positional_fallback_without_headers() {
            let snap = snapshot_of(None, &[&["William", "Smith", "Male", "1985"]]);
            let named_only = RecordPredicate::new().field("FamilyName", "Smith");
            assert!(!named_only.matches(&snap, &snap.rows[0]));
            assert_eq!(named_only.unresolved_columns(&snap), vec!["'FamilyName'"]);

            let with_fallback = RecordPredicate::new().field_at("FamilyName", 1, "Smith");
            assert!(with_fallback.matches(&snap, &snap.rows[0]));
        }

        #[test]
        fn test_modes() {
            assert!(MatchMode::Exact.test(" William  T. ", "William T."));
            assert!(!MatchMode::Exact.test("william", "William"));
            assert!(MatchMode::CaseInsensitive.test("WILLIAM", "william"));
            assert!(MatchMode::Prefix.test("Smithson", "smith"));
            assert!(!MatchMode::Prefix.test("Blacksmith", "smith"));
            assert!(MatchMode::Compact.test("PreferNotToSay", "Prefer not to say"));
        }

        #[test]
        fn test_with_mode_applies_to_last_field() {
            let predicate = RecordPredicate::new()
                .field("Forename", "Will")
                .with_mode(MatchMode::Prefix);
            assert_eq!(predicate.fields()[0].mode, MatchMode::Prefix);
            assert_eq!(predicate.describe(), "'Forename' ^= 'Will'");
        }

        #[test]
        fn test_empty_predicate_matches_everything() {
            let snap = snapshot_of(None, &[&["a"], &["b"]]);
            assert_eq!(snap.find_rows(&RecordPredicate::new()).len(), 2);
            assert_eq!(RecordPredicate::new().describe(), "(any row)");
        }
    }

    mod snapshot_tests {
        use super::*;

        #[test]
        fn test_find_row_not_found_dumps_rows() {
            let snap = snapshot_of(
                Some(PEOPLE_HEADERS),
                &[&["Ann", "Adams", "Female", "1950"]],
            );
            let err = snap
                .find_row(&RecordPredicate::new().field("FamilyName", "Smith"))
                .unwrap_err();
            let msg = err.to_string();
            assert!(err.is_not_found());
            assert!(msg.contains("row where 'FamilyName' ~ 'Smith'"));
            assert!(msg.contains("Ann | Adams | Female | 1950"));
            assert!(msg.contains("1 rows scanned"));
        }

        #[test]
        fn test_find_unique_row_ambiguous() {
            let snap = snapshot_of(
                Some(PEOPLE_HEADERS),
                &[
                    &["William", "Smith", "Male", "1985"],
                    &["William", "Smith", "Male", "1985"],
                ],
            );
            let predicate = RecordPredicate::new().field("FamilyName", "Smith");
            assert!(snap.find_row(&predicate).is_ok());
            let err = snap.find_unique_row(&predicate).unwrap_err();
            assert!(matches!(err, ResoluteError::AmbiguousMatch { count: 2, .. }));
        }

        #[test]
        fn test_dump_empty_snapshot() {
            let snap = snapshot_of(Some(&["Forename"]), &[]);
            assert_eq!(snap.dump(), vec!["[Forename]", "(no rows)"]);
        }

        #[test]
        fn test_column_values() {
            let snap = snapshot_of(
                Some(PEOPLE_HEADERS),
                &[&["Ann", "Adams", "F", "1950"], &["Bob", "brown", "M", "1960"]],
            );
            assert_eq!(
                snap.column_values(&ColumnRef::from("Family Name")).unwrap(),
                vec!["Adams", "brown"]
            );
            assert!(snap.column_values(&ColumnRef::from("Salary")).is_err());
        }
    }

    mod sort_tests {
        use super::*;

        fn single_column(header: &str, values: &[&str]) -> GridSnapshot {
            let rows: Vec<Vec<&str>> = values.iter().map(|v| vec![*v]).collect();
            let rows: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
            snapshot_of(Some(&[header]), &rows)
        }

        #[test]
        fn test_text_sorted_case_insensitive() {
            let snap = single_column("FamilyName", &["Adams", "brown", "Clark"]);
            assert!(snap.is_sorted(&SortSpec::text("FamilyName")).unwrap());
            let snap = single_column("FamilyName", &["brown", "Adams", "Clark"]);
            assert!(!snap.is_sorted(&SortSpec::text("FamilyName")).unwrap());
        }

        #[test]
        fn test_numeric_skips_unparseable() {
            let snap = single_column("YearOfBirth", &["1950", "n/a", "1980"]);
            assert!(snap.is_sorted(&SortSpec::numeric("YearOfBirth")).unwrap());
            let snap = single_column("YearOfBirth", &["1980", "n/a", "1950"]);
            assert!(!snap.is_sorted(&SortSpec::numeric("YearOfBirth")).unwrap());
        }

        #[test]
        fn test_descending() {
            let snap = single_column("YearOfBirth", &["1990", "1985", "1985", "1950"]);
            assert!(snap
                .is_sorted(&SortSpec::numeric("YearOfBirth").descending())
                .unwrap());
        }

        #[test]
        fn test_unknown_column_is_error() {
            let snap = single_column("FamilyName", &["Adams"]);
            assert!(snap.is_sorted(&SortSpec::text("Salary")).is_err());
            assert!(snap
                .is_sorted(&SortSpec::text("Salary").with_fallback(0))
                .unwrap());
        }

        proptest! {
            #[test]
            fn prop_sorted_numbers_are_sorted(values in prop::collection::vec(0i64..3000, 0..40)) {
                let mut values = values;
                values.sort_unstable();
                let texts: Vec<String> = values.iter().map(ToString::to_string).collect();
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                let snap = single_column("Year", &refs);
                prop_assert!(snap.is_sorted(&SortSpec::numeric("Year")).unwrap());
            }

            #[test]
            fn prop_sorted_text_is_sorted(values in prop::collection::vec("[a-zA-Z]{1,8}", 0..30)) {
                let mut values = values;
                values.sort_by(|a, b| ordinal_ignore_case(a, b));
                let refs: Vec<&str> = values.iter().map(String::as_str).collect();
                let snap = single_column("Name", &refs);
                prop_assert!(snap.is_sorted(&SortSpec::text("Name")).unwrap());
            }
        }
    }

    mod scanner_tests {
        use super::*;

        fn people_table(rows: &[[&str; 4]]) -> El {
            El::new("table").id("people").children([
                El::new("thead").child(
                    El::new("tr").children(
                        ["Forename", "FamilyName", "Gender", "YearOfBirth"]
                            .map(|h| El::new("th").text(h)),
                    ),
                ),
                El::new("tbody").children(rows.iter().map(|r| El::row(*r))),
            ])
        }

        fn scanner(page: &MockPage) -> GridScanner<'_> {
            GridScanner::new(page, ResolverConfig::default(), GridConfig::default())
        }

        #[tokio::test]
        async fn test_snapshot_full_table() {
            let page = MockPage::new("https://app/people");
            page.render(people_table(&[
                ["Ann", "Adams", "Female", "1950"],
                ["Bob", "Brown", "Male", "1960"],
            ]))
            .unwrap();
            let snap = scanner(&page)
                .snapshot(&TableScope::css("#people"))
                .await
                .unwrap();
            assert_eq!(snap.len(), 2);
            assert_eq!(snap.headers.as_ref().unwrap()[1], "FamilyName");
            assert_eq!(snap.rows[1].cells, vec!["Bob", "Brown", "Male", "1960"]);
        }

        #[tokio::test]
        async fn test_full_table_keeps_identical_rows() {
            let page = MockPage::new("https://app/people");
            page.render(people_table(&[
                ["William", "Smith", "Male", "1985"],
                ["William", "Smith", "Male", "1985"],
            ]))
            .unwrap();
            let snap = scanner(&page)
                .snapshot(&TableScope::css("#people"))
                .await
                .unwrap();
            assert_eq!(snap.len(), 2);
            assert_ne!(snap.rows[0].node, snap.rows[1].node);
            let err = snap
                .find_unique_row(&RecordPredicate::new().field("FamilyName", "Smith"))
                .unwrap_err();
            assert!(matches!(err, ResoluteError::AmbiguousMatch { count: 2, .. }));
        }

        #[tokio::test]
        async fn test_find_row_returns_node_for_actions() {
            let page = MockPage::new("https://app/people");
            page.render(people_table(&[["Ann", "Adams", "Female", "1950"]]))
                .unwrap();
            let row = scanner(&page)
                .find_row(
                    &TableScope::css("#people"),
                    &RecordPredicate::new().field("FamilyName", "adams"),
                )
                .await
                .unwrap();
            assert_eq!(page.text(row.node).await.unwrap(), "Ann Adams Female 1950");
        }

        fn virtual_page(count: usize) -> MockPage {
            let page = MockPage::new("https://app/people");
            page.render(
                El::new("div")
                    .class("viewport")
                    .child(people_table(&[])),
            )
            .unwrap();
            let rows = (0..count)
                .map(|i| {
                    El::row([
                        format!("First{i}"),
                        format!("Last{i:03}"),
                        "Male".to_string(),
                        (1900 + i).to_string(),
                    ])
                })
                .collect();
            page.with_dom(|dom| {
                let viewport = dom.find(".viewport").unwrap();
                let body = dom.find("tbody").unwrap();
                dom.virtualize(viewport, body, rows, 30, 5)
            })
            .unwrap()
            .unwrap();
            page
        }

        #[tokio::test]
        async fn test_virtualized_snapshot_collects_all_rows() {
            let page = virtual_page(23);
            let scope = TableScope::css("#people")
                .virtualized(Strategies::css(".viewport"))
                .with_scroll(ScrollConfig::new(90, 60));
            let snap = scanner(&page).snapshot(&scope).await.unwrap();
            assert_eq!(snap.len(), 23);
            assert_eq!(snap.rows[22].cell(1), Some("Last022"));
            assert!(snap.is_sorted(&SortSpec::numeric("YearOfBirth")).unwrap());
        }

        #[tokio::test]
        async fn test_virtualized_stops_when_target_found() {
            let page = virtual_page(100);
            let scope = TableScope::css("#people")
                .virtualized(Strategies::css(".viewport"))
                .with_scroll(ScrollConfig::new(150, 60));
            let row = scanner(&page)
                .find_row(&scope, &RecordPredicate::new().field("FamilyName", "Last012"))
                .await
                .unwrap();
            assert_eq!(row.cell(0), Some("First12"));
            let scrolls = page
                .calls()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with("scroll_by"))
                .count();
            // one probe plus two steps of five rows
            assert_eq!(scrolls, 3);
        }

        #[tokio::test]
        async fn test_virtualized_budget_exhausted() {
            let page = virtual_page(100);
            let scope = TableScope::css("#people")
                .virtualized(Strategies::css(".viewport"))
                .with_scroll(ScrollConfig::new(150, 2));
            let err = scanner(&page)
                .find_row(&scope, &RecordPredicate::new().field("FamilyName", "Last099"))
                .await
                .unwrap_err();
            assert!(err.is_not_found());
            assert!(err.to_string().contains("15 rows scanned"));
        }

        #[tokio::test]
        async fn test_virtualized_rescans_from_top() {
            let page = virtual_page(12);
            let viewport = page.find(".viewport").unwrap().unwrap();
            page.scroll_by(viewport, 200).await.unwrap();
            let scope = TableScope::css("#people")
                .virtualized(Strategies::css(".viewport"))
                .with_scroll(ScrollConfig::new(90, 60));
            let snap = scanner(&page).snapshot(&scope).await.unwrap();
            assert_eq!(snap.len(), 12);
            assert_eq!(snap.rows[0].cell(0), Some("First0"));
        }
    }
}
