//! Table views.
//!
//! A `TableView` is an ordered list of references to rows of a single table.
//! The view registers its row mapping on the table, so inserts, erases and
//! moves in the table are reflected in the mapping immediately: references
//! shift, and references to rows that went away become detached slots. The
//! view never grows or shrinks because of that.
//!
//! Views that were built from a query, a link list or a distinct scan remember
//! how they were built and can be re-evaluated with `sync_if_needed` once the
//! table has moved on. Staleness is detected by comparing version counters and
//! is never pushed to the view.

use crate::changeset::{AccessorId, ChangeAdjuster};
use crate::column::{Column, ColumnType, ColumnValue, ValueKey};
use crate::error::Result;
use crate::link::LinkList;
use crate::provenance::Provenance;
use crate::query::Query;
use crate::row_indexes::{RowIndexes, RowSlot};
use crate::sort::SortSpec;
use crate::table::{Row, Table, TableRef};
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

/// Default number of rows rendered by `render` and `Display`.
pub const DEFAULT_DUMP_LIMIT: usize = 500;

pub(crate) const INT_TYPES: &[ColumnType] = &[ColumnType::Int32, ColumnType::Int64];

pub struct TableView {
    table: Option<Weak<RefCell<Table>>>,
    rows: Rc<RefCell<RowIndexes>>,
    registration: Option<AccessorId>,
    provenance: Provenance,
    sort: SortSpec,
    auto_sort: bool,
    last_seen_version: u64,
}

fn register_rows(table: &TableRef, rows: &Rc<RefCell<RowIndexes>>) -> AccessorId {
    let adjuster: Rc<RefCell<dyn ChangeAdjuster>> = rows.clone();
    table.borrow_mut().register_accessor(Rc::downgrade(&adjuster))
}

/// Unwrap a collaborator result whose failure means the caller broke a
/// precondition.
fn contract<T>(result: Result<T>) -> T {
    result.unwrap_or_else(|err| panic!("{}", err))
}

/// Column `col` of `table`, checked against the accepted types (any type when
/// `expected` is empty).
pub(crate) fn checked_column<'a>(table: &'a Table, col: usize, expected: &[ColumnType]) -> &'a Column {
    let Some(column) = table.column(col) else {
        panic!("column {} out of range [0, {})", col, table.column_count());
    };
    assert!(
        expected.is_empty() || expected.contains(&column.column_type()),
        "column '{}' has type {:?}, expected one of {:?}",
        column.name(),
        column.column_type(),
        expected
    );
    column
}

fn distinct_rows(table: &Table, column: usize) -> Vec<usize> {
    let col = checked_column(table, column, &[]);
    let mut seen = HashSet::new();
    (0..table.len())
        .filter(|&row| {
            col.get_ref(row)
                .is_some_and(|value| seen.insert(ValueKey::from(value)))
        })
        .collect()
}

impl TableView {
    // ==================== Construction ====================

    pub(crate) fn from_parts(
        table: &TableRef,
        rows: RowIndexes,
        provenance: Provenance,
        sort: SortSpec,
        auto_sort: bool,
        last_seen_version: u64,
    ) -> Self {
        let rows = Rc::new(RefCell::new(rows));
        let registration = register_rows(table, &rows);
        TableView {
            table: Some(Rc::downgrade(table)),
            rows,
            registration: Some(registration),
            provenance,
            sort,
            auto_sort,
            last_seen_version,
        }
    }

    /// Empty view without provenance, in sync with `table`.
    pub fn from_table(table: &TableRef) -> Self {
        let (hint, version) = {
            let t = table.borrow();
            (t.hint(), t.version())
        };
        Self::from_parts(
            table,
            RowIndexes::new(hint),
            Provenance::None,
            SortSpec::default(),
            false,
            version,
        )
    }

    /// View without provenance over explicit source rows, in the given order.
    ///
    /// Panics if a row is out of range.
    pub fn from_rows(table: &TableRef, rows: impl IntoIterator<Item = usize>) -> Self {
        let rows: Vec<usize> = rows.into_iter().collect();
        let (hint, version) = {
            let t = table.borrow();
            if let Some(&row) = rows.iter().find(|&&row| row >= t.len()) {
                panic!("row {} out of range [0, {})", row, t.len());
            }
            (t.hint(), t.version())
        };
        Self::from_parts(
            table,
            RowIndexes::from_rows(hint, rows),
            Provenance::None,
            SortSpec::default(),
            false,
            version,
        )
    }

    /// Rows `[begin, end)` of the table, `end` clamped to its length.
    pub fn range(table: &TableRef, begin: usize, end: usize) -> Self {
        let end = end.min(table.borrow().len());
        Self::from_rows(table, begin..end)
    }

    /// Matches of `query` in `[start, end)`, at most `limit`. The view
    /// re-runs the query when synced.
    pub fn from_query(
        table: &TableRef,
        query: Query,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Self> {
        let (rows, hint, version) = {
            let t = table.borrow();
            let rows = query.find_all(&t, start, end, limit)?;
            debug!("query '{}' on '{}' matched {} rows", query, t.name(), rows.len());
            (rows, t.hint(), t.version())
        };
        Ok(Self::from_parts(
            table,
            RowIndexes::from_rows(hint, rows),
            Provenance::Query {
                query,
                start,
                end,
                limit,
            },
            SortSpec::default(),
            false,
            version,
        ))
    }

    /// View over the targets of a link list, in link order. The view lives on
    /// the link target table.
    ///
    /// Panics if the link column has no live target table.
    pub fn from_link_list(list: &LinkList) -> Self {
        let Some(target) = list.target_table() else {
            panic!("link column {} has no target table", list.column());
        };
        let hint = target.borrow().hint();
        let mut view = Self::from_parts(
            &target,
            RowIndexes::from_rows(hint, list.targets()),
            Provenance::LinkList(list.clone()),
            SortSpec::default(),
            false,
            0,
        );
        view.last_seen_version = view.outside_version();
        view
    }

    /// One row per distinct value of `column`, in first-occurrence order.
    pub fn distinct(table: &TableRef, column: usize) -> Self {
        let mut view = Self::from_table(table);
        view.sync_distinct_view(column);
        view
    }

    // ==================== Table & state ====================

    /// The table, None once the view is detached.
    pub fn table(&self) -> Option<TableRef> {
        self.table.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_attached(&self) -> bool {
        self.table().is_some()
    }

    /// Panics if the view is detached.
    pub(crate) fn table_ref(&self) -> TableRef {
        self.table()
            .unwrap_or_else(|| panic!("view is detached from its table"))
    }

    /// Stop tracking the table. Every accessor panics afterwards.
    pub fn detach(&mut self) {
        self.unregister();
        self.table = None;
    }

    fn unregister(&mut self) {
        let Some(id) = self.registration.take() else {
            return;
        };
        if let Some(table) = self.table() {
            // Stale entries are pruned on the next broadcast anyway
            if let Ok(mut table) = table.try_borrow_mut() {
                table.unregister_accessor(id);
            }
        }
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn sort_spec(&self) -> &SortSpec {
        &self.sort
    }

    pub fn auto_sort(&self) -> bool {
        self.auto_sort
    }

    pub fn last_seen_version(&self) -> u64 {
        self.last_seen_version
    }

    // ==================== Rows ====================

    pub fn len(&self) -> usize {
        self.rows.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.borrow().is_empty()
    }

    /// Slot at `pos`. Panics if out of range.
    pub fn get(&self, pos: usize) -> RowSlot {
        let rows = self.rows.borrow();
        rows.get(pos)
            .unwrap_or_else(|| panic!("view position {} out of range [0, {})", pos, rows.len()))
    }

    pub fn get_source_ndx(&self, pos: usize) -> Option<usize> {
        self.get(pos).index()
    }

    pub fn is_row_attached(&self, pos: usize) -> bool {
        self.get(pos).is_attached()
    }

    pub fn num_attached_rows(&self) -> usize {
        self.rows.borrow().num_attached_rows()
    }

    pub fn num_detached_rows(&self) -> usize {
        self.rows.borrow().num_detached()
    }

    pub fn slots(&self) -> Vec<RowSlot> {
        self.rows.borrow().to_vec()
    }

    /// First position referencing `source`.
    ///
    /// Panics unless `source < table.len()`.
    pub fn find_by_source_ndx(&self, source: usize) -> Option<usize> {
        let len = self.table_ref().borrow().len();
        assert!(source < len, "source row {} out of range [0, {})", source, len);
        self.rows.borrow().find_by_source_ndx(source)
    }

    /// (position, source row) of every attached slot, in view order.
    pub(crate) fn attached_positions(&self) -> Vec<(usize, usize)> {
        self.rows
            .borrow()
            .iter()
            .enumerate()
            .filter_map(|(pos, slot)| slot.index().map(|source| (pos, source)))
            .collect()
    }

    pub(crate) fn row_indexes(&self) -> RowIndexes {
        self.rows.borrow().clone()
    }

    pub(crate) fn take_row_indexes(&mut self) -> RowIndexes {
        self.rows.borrow_mut().take()
    }

    /// Force the next `sync_if_needed` to re-evaluate the provenance.
    ///
    /// A link-list view whose origin row is gone reports `u64::MAX` and stays
    /// in sync; its result is empty either way.
    pub(crate) fn invalidate(&mut self) {
        self.last_seen_version = u64::MAX;
    }

    fn source_row(&self, pos: usize) -> usize {
        match self.get(pos) {
            RowSlot::Attached(source) => source,
            RowSlot::Detached => panic!("view position {} is detached", pos),
        }
    }

    // ==================== Synchronization ====================

    /// Version the view compares against. For a link-list view it combines
    /// the target and origin table versions; a link list whose origin row is
    /// gone reports `u64::MAX`.
    pub fn outside_version(&self) -> u64 {
        let table_version = self.table_ref().borrow().version();
        match &self.provenance {
            Provenance::LinkList(list) => match (list.origin_row(), list.origin_version()) {
                (Some(_), Some(origin_version)) => table_version.saturating_add(origin_version),
                _ => u64::MAX,
            },
            _ => table_version,
        }
    }

    pub fn is_in_sync(&self) -> bool {
        self.is_attached() && self.last_seen_version == self.outside_version()
    }

    /// Re-evaluate the provenance if the table moved on since the last sync.
    /// Returns the version the view is now in sync with.
    pub fn sync_if_needed(&mut self) -> u64 {
        let version = self.outside_version();
        if self.last_seen_version != version {
            self.do_sync();
            self.last_seen_version = version;
        }
        version
    }

    fn do_sync(&mut self) {
        let table = self.table_ref();
        let regenerated = match &self.provenance {
            Provenance::None => None,
            Provenance::Query {
                query,
                start,
                end,
                limit,
            } => {
                let found = query.find_all(&table.borrow(), *start, *end, *limit);
                Some(found.unwrap_or_else(|err| {
                    warn!("query '{}' no longer evaluates: {}", query, err);
                    Vec::new()
                }))
            }
            Provenance::LinkList(list) => Some(list.targets()),
            Provenance::Distinct { column } => Some(distinct_rows(&table.borrow(), *column)),
        };
        if let Some(rows) = regenerated {
            debug!(
                "view on '{}': {} provenance re-evaluated to {} rows",
                table.borrow().name(),
                self.provenance.kind(),
                rows.len()
            );
            self.rows.borrow_mut().assign(rows);
        }
        if self.auto_sort {
            self.re_sort();
        }
    }

    /// Turn the view into a distinct view on `column` and scan now.
    ///
    /// Panics if the view already has a query or link-list provenance.
    pub fn sync_distinct_view(&mut self, column: usize) {
        assert!(
            self.provenance.allows_distinct(),
            "a view with {} provenance cannot become distinct",
            self.provenance.kind()
        );
        self.provenance = Provenance::Distinct { column };
        self.do_sync();
        self.last_seen_version = self.outside_version();
    }

    // ==================== Sorting ====================

    pub fn sort(&mut self, column: usize, ascending: bool) {
        self.sort_by(SortSpec::by(column, ascending));
    }

    pub fn sort_multiple(&mut self, columns: &[usize], ascending: &[bool]) {
        self.sort_by(SortSpec::multiple(columns, ascending));
    }

    /// Replace the sort spec, keep it applied after every sync, and sort now.
    pub fn sort_by(&mut self, spec: SortSpec) {
        self.sort = spec;
        self.auto_sort = true;
        self.re_sort();
    }

    /// Apply the stored sort spec again without re-evaluating anything.
    pub fn re_sort(&mut self) {
        let table_ref = self.table_ref();
        if self.sort.is_empty() {
            return;
        }
        let table = table_ref.borrow();
        let mut rows = self.rows.borrow_mut();
        let mut slots = rows.to_vec();
        self.sort.sort_slots(&mut slots, &table);
        rows.assign_slots(slots);
        debug!("sorted {} rows of view on '{}'", rows.len(), table.name());
    }

    /// Reorder the slots to follow the source-row order of `order`.
    ///
    /// Rows that `order` also references come first, in `order`'s order. The
    /// remaining attached rows follow in their current order, then detached
    /// slots. The stored sort spec is dropped so a later sync keeps this order.
    ///
    /// Panics if the two views are not over the same table.
    pub fn apply_same_order(&mut self, order: &TableView) {
        let table_ref = self.table_ref();
        assert!(
            Rc::ptr_eq(&table_ref, &order.table_ref()),
            "views to align must share a table"
        );
        let mut rank: HashMap<usize, usize> = HashMap::new();
        for (_, source) in order.attached_positions() {
            let next = rank.len();
            rank.entry(source).or_insert(next);
        }

        let mut rows = self.rows.borrow_mut();
        let mut slots = rows.to_vec();
        slots.sort_by_key(|slot| match slot {
            RowSlot::Attached(source) => match rank.get(source) {
                Some(&r) => (0, r),
                None => (1, 0),
            },
            RowSlot::Detached => (2, 0),
        });
        rows.assign_slots(slots);
        self.sort = SortSpec::default();
        self.auto_sort = false;
        debug!("aligned {} rows of view on '{}'", rows.len(), table_ref.borrow().name());
    }

    // ==================== Columns ====================

    pub fn column_count(&self) -> usize {
        self.table_ref().borrow().column_count()
    }

    pub fn column_name(&self, col: usize) -> Option<String> {
        self.table_ref().borrow().column_name(col).map(str::to_string)
    }

    pub fn column_type(&self, col: usize) -> Option<ColumnType> {
        self.table_ref().borrow().column_type(col)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.table_ref().borrow().column_index(name)
    }

    // ==================== Getters ====================

    fn cell(&self, col: usize, pos: usize, expected: &[ColumnType]) -> ColumnValue {
        let table_ref = self.table_ref();
        let source = self.source_row(pos);
        let table = table_ref.borrow();
        let column = checked_column(&table, col, expected);
        contract(column.get(source))
    }

    /// Any cell value, None-free: nulls come back as `ColumnValue::Null`.
    pub fn get_value(&self, col: usize, pos: usize) -> ColumnValue {
        self.cell(col, pos, &[])
    }

    pub fn get_int(&self, col: usize, pos: usize) -> Option<i64> {
        self.cell(col, pos, INT_TYPES).as_int()
    }

    pub fn get_bool(&self, col: usize, pos: usize) -> Option<bool> {
        self.cell(col, pos, &[ColumnType::Bool]).as_bool()
    }

    pub fn get_float(&self, col: usize, pos: usize) -> Option<f32> {
        self.cell(col, pos, &[ColumnType::Float32]).as_f32()
    }

    pub fn get_double(&self, col: usize, pos: usize) -> Option<f64> {
        self.cell(col, pos, &[ColumnType::Float64]).as_f64()
    }

    pub fn get_string(&self, col: usize, pos: usize) -> Option<String> {
        self.cell(col, pos, &[ColumnType::String])
            .as_string()
            .map(str::to_string)
    }

    /// Milliseconds since the Unix epoch.
    pub fn get_datetime(&self, col: usize, pos: usize) -> Option<i64> {
        self.cell(col, pos, &[ColumnType::DateTime]).as_datetime()
    }

    /// Target row of a link cell, None when the link is null.
    pub fn get_link(&self, col: usize, pos: usize) -> Option<usize> {
        self.cell(col, pos, &[ColumnType::Link]).as_link()
    }

    pub fn is_null_link(&self, col: usize, pos: usize) -> bool {
        self.get_link(col, pos).is_none()
    }

    pub fn get_link_list_size(&self, col: usize, pos: usize) -> usize {
        self.cell(col, pos, &[ColumnType::LinkList])
            .as_link_list()
            .map_or(0, <[usize]>::len)
    }

    /// Accessor for the link list stored at (`col`, `pos`).
    pub fn get_link_list(&self, col: usize, pos: usize) -> LinkList {
        let table = self.table_ref();
        let source = self.source_row(pos);
        contract(LinkList::new(&table, col, source))
    }

    pub fn get_row(&self, pos: usize) -> Row {
        let table = self.table_ref();
        let source = self.source_row(pos);
        let row = table.borrow().get_row(source);
        contract(row)
    }

    // ==================== Setters ====================

    /// Write one cell of the row at `pos`. A view in sync before the write
    /// stays in sync.
    fn write_cell(&mut self, col: usize, pos: usize, value: ColumnValue, expected: &[ColumnType]) {
        let table = self.table_ref();
        let source = self.source_row(pos);
        let sync_to_keep = self.is_in_sync();
        {
            let mut t = table.borrow_mut();
            checked_column(&t, col, expected);
            contract(t.set_value_by_index(source, col, value));
        }
        if sync_to_keep {
            self.last_seen_version = self.outside_version();
        }
    }

    pub fn set_value(&mut self, col: usize, pos: usize, value: ColumnValue) {
        self.write_cell(col, pos, value, &[]);
    }

    /// Panics if `value` does not fit a 32-bit column.
    pub fn set_int(&mut self, col: usize, pos: usize, value: i64) {
        let value = match self.column_type(col) {
            Some(ColumnType::Int32) => ColumnValue::Int32(
                i32::try_from(value)
                    .unwrap_or_else(|_| panic!("{} does not fit the 32-bit column {}", value, col)),
            ),
            _ => ColumnValue::Int64(value),
        };
        self.write_cell(col, pos, value, INT_TYPES);
    }

    pub fn set_bool(&mut self, col: usize, pos: usize, value: bool) {
        self.write_cell(col, pos, ColumnValue::Bool(value), &[ColumnType::Bool]);
    }

    pub fn set_float(&mut self, col: usize, pos: usize, value: f32) {
        self.write_cell(col, pos, ColumnValue::Float32(value), &[ColumnType::Float32]);
    }

    pub fn set_double(&mut self, col: usize, pos: usize, value: f64) {
        self.write_cell(col, pos, ColumnValue::Float64(value), &[ColumnType::Float64]);
    }

    pub fn set_string(&mut self, col: usize, pos: usize, value: &str) {
        self.write_cell(
            col,
            pos,
            ColumnValue::String(value.to_string()),
            &[ColumnType::String],
        );
    }

    pub fn set_datetime(&mut self, col: usize, pos: usize, millis: i64) {
        self.write_cell(col, pos, ColumnValue::DateTime(millis), &[ColumnType::DateTime]);
    }

    pub fn set_link(&mut self, col: usize, pos: usize, target: usize) {
        self.write_cell(col, pos, ColumnValue::Link(target), &[ColumnType::Link]);
    }

    pub fn nullify_link(&mut self, col: usize, pos: usize) {
        self.write_cell(col, pos, ColumnValue::Null, &[ColumnType::Link]);
    }

    // ==================== Removal ====================

    /// Erase the source row at `pos` from the table and drop the slot. A
    /// detached slot is simply dropped.
    pub fn remove(&mut self, pos: usize) {
        let table = self.table_ref();
        let sync_to_keep = self.is_in_sync();
        if let RowSlot::Attached(source) = self.get(pos) {
            // The broadcast detaches our own slot before it is removed
            contract(table.borrow_mut().erase_row(source));
        }
        self.rows.borrow_mut().remove(pos);
        if sync_to_keep {
            self.last_seen_version = self.outside_version();
        }
    }

    pub fn remove_last(&mut self) {
        let len = self.len();
        if len > 0 {
            self.remove(len - 1);
        }
    }

    /// Erase every referenced source row and empty the view.
    pub fn clear(&mut self) {
        let table = self.table_ref();
        let sync_to_keep = self.is_in_sync();
        let mut sources: Vec<usize> = self.rows.borrow().iter().filter_map(|s| s.index()).collect();
        sources.sort_unstable();
        sources.dedup();
        {
            let mut t = table.borrow_mut();
            for source in sources.into_iter().rev() {
                contract(t.erase_row(source));
            }
        }
        self.rows.borrow_mut().clear();
        if sync_to_keep {
            self.last_seen_version = self.outside_version();
        }
    }

    // ==================== Search ====================

    fn find_positions(
        &self,
        col: usize,
        expected: &[ColumnType],
        first_only: bool,
        matches: impl Fn(&ColumnValue) -> bool,
    ) -> Vec<usize> {
        let table_ref = self.table_ref();
        let table = table_ref.borrow();
        let column = checked_column(&table, col, expected);
        let mut found = Vec::new();
        for (pos, slot) in self.rows.borrow().iter().enumerate() {
            let RowSlot::Attached(source) = slot else {
                continue;
            };
            if column.get_ref(source).is_some_and(&matches) {
                found.push(pos);
                if first_only {
                    break;
                }
            }
        }
        found
    }

    /// New view without provenance over the slots at `positions`.
    fn positions_view(&self, positions: Vec<usize>) -> TableView {
        let table = self.table_ref();
        let sources: Vec<usize> = positions
            .into_iter()
            .filter_map(|pos| self.get_source_ndx(pos))
            .collect();
        TableView::from_rows(&table, sources)
    }

    pub fn find_first_int(&self, col: usize, value: i64) -> Option<usize> {
        self.find_positions(col, INT_TYPES, true, |v| v.as_int() == Some(value))
            .first()
            .copied()
    }

    pub fn find_first_bool(&self, col: usize, value: bool) -> Option<usize> {
        self.find_positions(col, &[ColumnType::Bool], true, |v| v.as_bool() == Some(value))
            .first()
            .copied()
    }

    pub fn find_first_float(&self, col: usize, value: f32) -> Option<usize> {
        self.find_positions(col, &[ColumnType::Float32], true, |v| v.as_f32() == Some(value))
            .first()
            .copied()
    }

    pub fn find_first_double(&self, col: usize, value: f64) -> Option<usize> {
        self.find_positions(col, &[ColumnType::Float64], true, |v| v.as_f64() == Some(value))
            .first()
            .copied()
    }

    pub fn find_first_string(&self, col: usize, value: &str) -> Option<usize> {
        self.find_positions(col, &[ColumnType::String], true, |v| v.as_string() == Some(value))
            .first()
            .copied()
    }

    pub fn find_first_datetime(&self, col: usize, millis: i64) -> Option<usize> {
        self.find_positions(col, &[ColumnType::DateTime], true, |v| {
            v.as_datetime() == Some(millis)
        })
        .first()
        .copied()
    }

    pub fn find_all_int(&self, col: usize, value: i64) -> TableView {
        self.positions_view(self.find_positions(col, INT_TYPES, false, |v| v.as_int() == Some(value)))
    }

    pub fn find_all_bool(&self, col: usize, value: bool) -> TableView {
        self.positions_view(self.find_positions(col, &[ColumnType::Bool], false, |v| {
            v.as_bool() == Some(value)
        }))
    }

    pub fn find_all_float(&self, col: usize, value: f32) -> TableView {
        self.positions_view(self.find_positions(col, &[ColumnType::Float32], false, |v| {
            v.as_f32() == Some(value)
        }))
    }

    pub fn find_all_double(&self, col: usize, value: f64) -> TableView {
        self.positions_view(self.find_positions(col, &[ColumnType::Float64], false, |v| {
            v.as_f64() == Some(value)
        }))
    }

    pub fn find_all_string(&self, col: usize, value: &str) -> TableView {
        self.positions_view(self.find_positions(col, &[ColumnType::String], false, |v| {
            v.as_string() == Some(value)
        }))
    }

    pub fn find_all_datetime(&self, col: usize, millis: i64) -> TableView {
        self.positions_view(self.find_positions(col, &[ColumnType::DateTime], false, |v| {
            v.as_datetime() == Some(millis)
        }))
    }

    // ==================== Serialization ====================

    /// JSON array of the attached rows, in view order.
    pub fn to_json(&self) -> Result<String> {
        let table_ref = self.table_ref();
        let table = table_ref.borrow();
        let rows = self
            .rows
            .borrow()
            .iter()
            .filter_map(|slot| slot.index())
            .map(|source| table.row_to_json(source))
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    /// Tab-separated dump of at most `limit` rows.
    pub fn render(&self, limit: usize) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_rows(&mut out, limit);
        out
    }

    /// Header line plus the line for the slot at `pos`, as `render` prints it.
    ///
    /// Panics if `pos` is out of range or the view is detached.
    pub fn row_to_string(&self, pos: usize) -> String {
        let slot = self.get(pos);
        let table_ref = self.table_ref();
        let table = table_ref.borrow();
        let mut out = String::new();
        let _ = write_header(&mut out, &table).and_then(|_| write_row(&mut out, &table, pos, slot));
        out
    }

    fn write_rows(&self, out: &mut impl fmt::Write, limit: usize) -> fmt::Result {
        let Some(table_ref) = self.table() else {
            return writeln!(out, "<detached view>");
        };
        let table = table_ref.borrow();
        let rows = self.rows.borrow();

        write_header(out, &table)?;
        for (pos, slot) in rows.iter().enumerate().take(limit) {
            write_row(out, &table, pos, slot)?;
        }
        if rows.len() > limit {
            writeln!(out, "... and {} more rows", rows.len() - limit)?;
        }
        Ok(())
    }
}

fn write_header(out: &mut impl fmt::Write, table: &Table) -> fmt::Result {
    writeln!(out, "#\t{}", table.schema().get_column_names().join("\t"))
}

fn write_row(out: &mut impl fmt::Write, table: &Table, pos: usize, slot: RowSlot) -> fmt::Result {
    let RowSlot::Attached(source) = slot else {
        return writeln!(out, "{}\t(detached)", pos);
    };
    write!(out, "{}", pos)?;
    for col in 0..table.column_count() {
        match table.column(col).and_then(|c| c.get_ref(source)) {
            Some(value) => write!(out, "\t{}", value)?,
            None => write!(out, "\t")?,
        }
    }
    writeln!(out)
}

impl Clone for TableView {
    /// The copy gets its own row mapping, registered on the same table.
    fn clone(&self) -> Self {
        let rows = Rc::new(RefCell::new(self.rows.borrow().clone()));
        let (table, registration) = match self.table() {
            Some(table) => (Some(Rc::downgrade(&table)), Some(register_rows(&table, &rows))),
            None => (None, None),
        };
        TableView {
            table,
            rows,
            registration,
            provenance: self.provenance.clone(),
            sort: self.sort.clone(),
            auto_sort: self.auto_sort,
            last_seen_version: self.last_seen_version,
        }
    }
}

impl Drop for TableView {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for TableView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableView")
            .field("attached", &self.is_attached())
            .field("provenance", &self.provenance.kind())
            .field("rows", &self.rows.borrow().to_vec())
            .field("sort", &self.sort)
            .field("last_seen_version", &self.last_seen_version)
            .finish()
    }
}

impl fmt::Display for TableView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_rows(f, DEFAULT_DUMP_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::UNBOUNDED;
    use crate::table::{Schema, StorageHint};
    use std::collections::HashMap;

    const NAME: usize = 0;
    const SALARY: usize = 1;
    const DEPT: usize = 2;

    fn employees(rows: &[(&str, i64, Option<&str>)]) -> TableRef {
        let schema = Schema::new(vec![
            ("name".to_string(), ColumnType::String, false),
            ("salary".to_string(), ColumnType::Int64, false),
            ("dept".to_string(), ColumnType::String, true),
        ]);
        let table = Table::new("employees".to_string(), schema).into_ref();
        for (name, salary, dept) in rows {
            table.borrow_mut().append_row(employee(name, *salary, *dept)).unwrap();
        }
        table
    }

    fn employee(name: &str, salary: i64, dept: Option<&str>) -> Row {
        let mut row = HashMap::new();
        row.insert("name".to_string(), ColumnValue::String(name.to_string()));
        row.insert("salary".to_string(), ColumnValue::Int64(salary));
        row.insert(
            "dept".to_string(),
            dept.map_or(ColumnValue::Null, |d| ColumnValue::String(d.to_string())),
        );
        row
    }

    fn salary_view(table: &TableRef) -> TableView {
        Query::parse("salary < 1800")
            .unwrap()
            .find_all_view(table, 0, UNBOUNDED, UNBOUNDED)
            .unwrap()
    }

    #[test]
    fn test_query_view_erase_detaches() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let view = salary_view(&table);
        assert_eq!(view.slots(), vec![RowSlot::Attached(0), RowSlot::Attached(2)]);
        assert!(view.is_in_sync());

        table.borrow_mut().erase_row(0).unwrap();
        assert_eq!(view.slots(), vec![RowSlot::Detached, RowSlot::Attached(1)]);
        assert!(!view.is_row_attached(0));
        assert_eq!(view.num_attached_rows(), 1);
        assert_eq!(view.num_detached_rows(), 1);
        assert!(!view.is_in_sync());
    }

    #[test]
    fn test_sync_reruns_query() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let mut view = salary_view(&table);
        table.borrow_mut().erase_row(0).unwrap();
        table.borrow_mut().append_row(employee("Dan", 1200, None)).unwrap();

        let version = view.sync_if_needed();
        assert_eq!(version, table.borrow().version());
        assert_eq!(view.slots(), vec![RowSlot::Attached(1), RowSlot::Attached(2)]);
        assert_eq!(view.num_detached_rows(), 0);
        assert!(view.is_in_sync());
    }

    #[test]
    fn test_sync_is_idempotent() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None)]);
        let mut view = salary_view(&table);
        table.borrow_mut().append_row(employee("Cid", 100, None)).unwrap();
        let first = view.sync_if_needed();
        let rows = view.slots();
        assert_eq!(view.sync_if_needed(), first);
        assert_eq!(view.slots(), rows);
    }

    #[test]
    fn test_insert_shifts_without_growing() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let view = salary_view(&table);
        table.borrow_mut().insert_row(1, employee("Eve", 10, None)).unwrap();
        assert_eq!(view.slots(), vec![RowSlot::Attached(0), RowSlot::Attached(3)]);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_move_last_over_detaches_overwritten_row() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let view = TableView::from_rows(&table, [0, 1, 2]);
        table.borrow_mut().move_last_over(0).unwrap();
        assert_eq!(
            view.slots(),
            vec![RowSlot::Detached, RowSlot::Attached(1), RowSlot::Attached(0)]
        );
    }

    #[test]
    fn test_imperative_view_sync_only_advances_version() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let mut view = TableView::from_rows(&table, [2, 0]);
        table.borrow_mut().append_row(employee("Dan", 10, None)).unwrap();
        assert!(!view.is_in_sync());
        view.sync_if_needed();
        assert!(view.is_in_sync());
        assert_eq!(view.slots(), vec![RowSlot::Attached(2), RowSlot::Attached(0)]);
    }

    #[test]
    fn test_range_clamps() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        assert_eq!(TableView::range(&table, 1, 10).len(), 2);
        assert!(TableView::range(&table, 2, 1).is_empty());
        assert!(TableView::from_table(&table).is_empty());
    }

    #[test]
    fn test_sort_is_stable_and_reapplied_after_sync() {
        let table = employees(&[
            ("Ann", 1500, None),
            ("Bob", 1000, None),
            ("Cid", 1500, None),
            ("Dan", 500, None),
        ]);
        let mut view = TableView::from_query(&table, Query::all(), 0, UNBOUNDED, UNBOUNDED).unwrap();
        view.sort(SALARY, true);
        let sorted = view.slots();
        assert_eq!(
            sorted,
            vec![
                RowSlot::Attached(3),
                RowSlot::Attached(1),
                RowSlot::Attached(0),
                RowSlot::Attached(2)
            ]
        );
        view.re_sort();
        assert_eq!(view.slots(), sorted);

        table.borrow_mut().set_value(0, "salary", ColumnValue::Int64(1)).unwrap();
        view.sync_if_needed();
        assert_eq!(view.get_source_ndx(0), Some(0));
        assert_eq!(view.get_int(SALARY, 0), Some(1));
    }

    #[test]
    fn test_sort_puts_detached_last() {
        let table = employees(&[("Ann", 1500, None), ("Bob", 1000, None), ("Cid", 700, None)]);
        let mut view = TableView::from_rows(&table, [0, 1, 2]);
        table.borrow_mut().erase_row(1).unwrap();
        view.sort(SALARY, true);
        assert_eq!(
            view.slots(),
            vec![RowSlot::Attached(1), RowSlot::Attached(0), RowSlot::Detached]
        );
    }

    #[test]
    fn test_sort_multiple() {
        let table = employees(&[
            ("Bob", 1000, Some("ops")),
            ("Ann", 1000, Some("dev")),
            ("Cid", 2000, Some("dev")),
        ]);
        let mut view = TableView::range(&table, 0, UNBOUNDED);
        view.sort_multiple(&[SALARY, NAME], &[false, true]);
        let names: Vec<_> = (0..view.len()).map(|i| view.get_string(NAME, i).unwrap()).collect();
        assert_eq!(names, vec!["Cid", "Ann", "Bob"]);
        assert!(view.auto_sort());
    }

    #[test]
    fn test_distinct_first_occurrence() {
        let table = employees(&[
            ("Ann", 1, Some("dev")),
            ("Bob", 2, Some("ops")),
            ("Cid", 3, Some("dev")),
            ("Dan", 4, None),
            ("Eve", 5, None),
        ]);
        let mut view = TableView::distinct(&table, DEPT);
        assert_eq!(
            view.slots(),
            vec![RowSlot::Attached(0), RowSlot::Attached(1), RowSlot::Attached(3)]
        );

        table.borrow_mut().erase_row(0).unwrap();
        view.sync_if_needed();
        // "dev" is now represented by Cid
        assert_eq!(
            view.slots(),
            vec![RowSlot::Attached(0), RowSlot::Attached(1), RowSlot::Attached(2)]
        );
    }

    #[test]
    #[should_panic(expected = "cannot become distinct")]
    fn test_query_view_cannot_become_distinct() {
        let table = employees(&[("Ann", 1000, Some("dev"))]);
        let mut view = salary_view(&table);
        view.sync_distinct_view(DEPT);
    }

    #[test]
    fn test_link_list_view() {
        let targets = employees(&[("Ann", 1, None), ("Bob", 2, None), ("Cid", 3, None)]);
        let origin = Table::new(
            "teams".to_string(),
            Schema::new(vec![("members".to_string(), ColumnType::LinkList, false)]),
        )
        .into_ref();
        Table::link(&origin, "members", &targets).unwrap();
        origin.borrow_mut().add_empty_rows(1).unwrap();

        let list = LinkList::new(&origin, 0, 0).unwrap();
        list.add(2).unwrap();
        list.add(0).unwrap();

        let mut view = TableView::from_link_list(&list);
        assert_eq!(view.slots(), vec![RowSlot::Attached(2), RowSlot::Attached(0)]);
        assert!(view.is_in_sync());

        list.add(1).unwrap();
        assert!(!view.is_in_sync());
        view.sync_if_needed();
        assert_eq!(view.len(), 3);
        assert_eq!(view.get_string(NAME, 2).as_deref(), Some("Bob"));

        // Erasing a target drops it from the list and shifts the others
        targets.borrow_mut().erase_row(0).unwrap();
        view.sync_if_needed();
        assert_eq!(view.slots(), vec![RowSlot::Attached(1), RowSlot::Attached(0)]);

        origin.borrow_mut().erase_row(0).unwrap();
        assert!(!view.is_in_sync());
        view.sync_if_needed();
        assert!(view.is_empty());
        assert!(view.is_in_sync());
    }

    #[test]
    fn test_typed_accessors_and_search() {
        let table = employees(&[
            ("Ann", 1000, Some("dev")),
            ("Bob", 2000, None),
            ("Cid", 1000, Some("ops")),
        ]);
        let mut view = TableView::range(&table, 0, UNBOUNDED);
        assert_eq!(view.get_string(NAME, 1).as_deref(), Some("Bob"));
        assert_eq!(view.get_string(DEPT, 1), None);
        assert_eq!(view.get_int(SALARY, 2), Some(1000));

        view.set_int(SALARY, 1, 2500);
        view.set_string(DEPT, 1, "dev");
        assert_eq!(table.borrow().get_value(1, "salary").unwrap(), ColumnValue::Int64(2500));
        assert!(view.is_in_sync());

        assert_eq!(view.find_first_int(SALARY, 1000), Some(0));
        assert_eq!(view.find_first_string(NAME, "Zed"), None);
        let devs = view.find_all_string(DEPT, "dev");
        assert_eq!(devs.slots(), vec![RowSlot::Attached(0), RowSlot::Attached(1)]);
        assert!(devs.provenance().is_none());

        let row = view.get_row(2);
        assert_eq!(row.get("name"), Some(&ColumnValue::String("Cid".to_string())));
    }

    #[test]
    #[should_panic(expected = "has type")]
    fn test_type_mismatch_panics() {
        let table = employees(&[("Ann", 1000, None)]);
        let view = TableView::range(&table, 0, 1);
        view.get_int(NAME, 0);
    }

    #[test]
    #[should_panic(expected = "is detached")]
    fn test_reading_detached_slot_panics() {
        let table = employees(&[("Ann", 1000, None)]);
        let view = TableView::range(&table, 0, 1);
        table.borrow_mut().erase_row(0).unwrap();
        view.get_int(SALARY, 0);
    }

    #[test]
    fn test_remove_through_view_keeps_sync() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let mut view = salary_view(&table);
        view.remove(0);
        assert_eq!(table.borrow().len(), 2);
        assert_eq!(view.slots(), vec![RowSlot::Attached(1)]);
        assert!(view.is_in_sync());

        view.remove_last();
        assert!(view.is_empty());
        assert_eq!(table.borrow().len(), 1);
    }

    #[test]
    fn test_mutation_through_stale_view_stays_stale() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let mut view = salary_view(&table);
        table.borrow_mut().append_row(employee("Dan", 10, None)).unwrap();
        view.set_int(SALARY, 0, 1100);
        assert!(!view.is_in_sync());
    }

    #[test]
    fn test_clear_erases_sources() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let mut view = salary_view(&table);
        let other = TableView::range(&table, 0, UNBOUNDED);
        view.clear();
        assert!(view.is_empty());
        assert_eq!(table.borrow().len(), 1);
        assert_eq!(other.num_attached_rows(), 1);
        assert_eq!(other.len(), 3);
    }

    #[test]
    fn test_find_by_source_ndx() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let view = TableView::from_rows(&table, [2, 1, 2]);
        assert_eq!(view.find_by_source_ndx(2), Some(0));
        assert_eq!(view.find_by_source_ndx(0), None);
    }

    #[test]
    fn test_detach_and_table_drop() {
        let table = employees(&[("Ann", 1000, None)]);
        let mut view = TableView::range(&table, 0, 1);
        assert_eq!(table.borrow().accessor_count(), 1);
        view.detach();
        assert!(!view.is_attached());
        assert!(!view.is_in_sync());
        assert_eq!(table.borrow().accessor_count(), 0);

        let other = TableView::range(&table, 0, 1);
        drop(table);
        assert!(!other.is_attached());
        assert_eq!(other.to_string(), "<detached view>\n");
    }

    #[test]
    #[should_panic(expected = "detached from its table")]
    fn test_sync_on_detached_view_panics() {
        let table = employees(&[("Ann", 1000, None)]);
        let mut view = TableView::range(&table, 0, 1);
        view.detach();
        view.sync_if_needed();
    }

    #[test]
    fn test_clone_registers_and_drop_unregisters() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None)]);
        let view = salary_view(&table);
        let copy = view.clone();
        assert_eq!(table.borrow().accessor_count(), 2);
        drop(view);
        assert_eq!(table.borrow().accessor_count(), 1);

        table.borrow_mut().insert_row(0, employee("Zed", 1, None)).unwrap();
        assert_eq!(copy.slots(), vec![RowSlot::Attached(1)]);
    }

    #[test]
    fn test_json_and_render() {
        let table = employees(&[("Ann", 1000, Some("dev")), ("Bob", 2000, None)]);
        let view = TableView::from_rows(&table, [1, 0]);
        table.borrow_mut().erase_row(0).unwrap();

        let json = view.to_json().unwrap();
        assert!(json.contains("\"name\": \"Bob\""));
        assert!(!json.contains("Ann"));

        let text = view.render(DEFAULT_DUMP_LIMIT);
        assert!(text.starts_with("#\tname\tsalary\tdept\n"));
        assert!(text.contains("0\tBob\t2000\tnull"));
        assert!(text.contains("1\t(detached)"));
        assert!(view.render(1).contains("... and 1 more rows"));
        assert_eq!(view.to_string(), text);
    }

    #[test]
    fn test_erase_scenario_on_tiered_storage() {
        let schema = Schema::new(vec![("salary".to_string(), ColumnType::Int64, false)]);
        let table = Table::with_hint("payroll".to_string(), schema, StorageHint::FastUpdates).into_ref();
        for salary in [1000, 2000, 1500] {
            let mut row = HashMap::new();
            row.insert("salary".to_string(), ColumnValue::Int64(salary));
            table.borrow_mut().append_row(row).unwrap();
        }
        let mut view = salary_view(&table);
        assert_eq!(view.row_indexes().hint(), StorageHint::FastUpdates);
        assert_eq!(view.slots(), vec![RowSlot::Attached(0), RowSlot::Attached(2)]);

        table.borrow_mut().erase_row(0).unwrap();
        assert_eq!(view.slots(), vec![RowSlot::Detached, RowSlot::Attached(1)]);
        assert_eq!(view.get_int(0, 1), Some(1500));

        table.borrow_mut().insert_row(0, {
            let mut row = HashMap::new();
            row.insert("salary".to_string(), ColumnValue::Int64(500));
            row
        }).unwrap();
        assert_eq!(view.slots(), vec![RowSlot::Detached, RowSlot::Attached(2)]);

        view.sync_if_needed();
        assert_eq!(view.slots(), vec![RowSlot::Attached(0), RowSlot::Attached(2)]);
        assert!(view.is_in_sync());
    }

    #[test]
    fn test_row_to_string() {
        let table = employees(&[("Ann", 1000, Some("dev")), ("Bob", 2000, None)]);
        let view = TableView::from_rows(&table, [1, 0]);
        assert_eq!(view.row_to_string(0), "#\tname\tsalary\tdept\n0\tBob\t2000\tnull\n");
        assert!(view.row_to_string(1).ends_with("1\tAnn\t1000\tdev\n"));

        table.borrow_mut().erase_row(1).unwrap();
        assert!(view.row_to_string(0).ends_with("0\t(detached)\n"));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_row_to_string_out_of_range() {
        let table = employees(&[("Ann", 1000, None)]);
        TableView::from_table(&table).row_to_string(1);
    }

    #[test]
    fn test_apply_same_order() {
        let table = employees(&[
            ("Ann", 1000, None),
            ("Bob", 2000, None),
            ("Cid", 1500, None),
            ("Dan", 900, None),
        ]);
        let mut order = TableView::from_table(&table);
        order.sort(SALARY, false);
        assert_eq!(
            order.slots(),
            vec![RowSlot::Attached(1), RowSlot::Attached(2), RowSlot::Attached(0), RowSlot::Attached(3)]
        );

        let mut view = salary_view(&table);
        view.sort(NAME, true);
        view.apply_same_order(&order);
        assert_eq!(
            view.slots(),
            vec![RowSlot::Attached(2), RowSlot::Attached(0), RowSlot::Attached(3)]
        );
        assert!(!view.auto_sort());
        assert!(view.sort_spec().is_empty());
    }

    #[test]
    fn test_apply_same_order_keeps_unranked_then_detached() {
        let table = employees(&[("Ann", 1000, None), ("Bob", 2000, None), ("Cid", 1500, None)]);
        let order = TableView::from_rows(&table, [2]);
        let mut view = TableView::from_rows(&table, [0, 1, 2]);
        table.borrow_mut().move_last_over(0).unwrap();
        assert_eq!(view.slots(), vec![RowSlot::Detached, RowSlot::Attached(1), RowSlot::Attached(0)]);
        assert_eq!(order.slots(), vec![RowSlot::Attached(0)]);

        view.apply_same_order(&order);
        assert_eq!(view.slots(), vec![RowSlot::Attached(0), RowSlot::Attached(1), RowSlot::Detached]);
        assert_eq!(view.num_detached_rows(), 1);
    }
}
