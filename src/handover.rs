//! Moving view state between execution contexts.
//!
//! A view is tied to tables of one context through `Rc` handles, so it cannot
//! leave that context. `export` turns it into two plain-data halves: an
//! `ExportedView` holding the row mapping, provenance descriptor, sort spec and
//! version stamp, and a `HandoverPatch` naming the context-local objects
//! (tables by key, link origin, columns by name) that have to be looked up
//! again. Both halves are `Send`. `import` consumes both against the
//! destination `Group` and yields a view registered there. Import never syncs.

use crate::group::Group;
use crate::link::LinkList;
use crate::provenance::Provenance;
use crate::query::Query;
use crate::row_indexes::{RowIndexes, RowSlot};
use crate::sort::{SortKey, SortSpec};
use crate::table::{StorageHint, Table, TableKey, TableRef};
use crate::view::TableView;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_EXPORT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverMode {
    /// The source view is left untouched.
    Copy,
    /// The row storage moves out; the source is left empty but usable.
    Move,
}

/// Provenance with every context-local reference stripped out.
#[derive(Debug, Clone)]
enum ExportedProvenance {
    None,
    Query {
        query: Query,
        start: usize,
        end: usize,
        limit: usize,
    },
    LinkList,
    Distinct,
}

/// Self-contained copy of a view's state.
#[derive(Debug)]
pub struct ExportedView {
    id: u64,
    slots: Vec<RowSlot>,
    hint: StorageHint,
    provenance: ExportedProvenance,
    sort: SortSpec,
    auto_sort: bool,
    last_seen_version: u64,
}

/// Where the link list behind a link-list view lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub table_key: TableKey,
    pub table_name: String,
    pub column: String,
    /// None when the origin row was already gone at export time.
    pub row: Option<usize>,
}

/// The references an `ExportedView` needs resolved in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverPatch {
    export_id: u64,
    pub table_key: TableKey,
    pub table_name: String,
    pub link_origin: Option<LinkHandle>,
    pub sort_columns: Vec<String>,
    pub distinct_column: Option<String>,
}

fn key_of(table: &Table) -> TableKey {
    table
        .key()
        .unwrap_or_else(|| panic!("table '{}' does not belong to a group", table.name()))
}

fn column_name_of(table: &Table, col: usize) -> String {
    match table.column_name(col) {
        Some(name) => name.to_string(),
        None => panic!("column {} out of range [0, {})", col, table.column_count()),
    }
}

fn resolve_table(group: &Group, key: TableKey, name: &str) -> TableRef {
    let Some(table) = group.table_by_key(key) else {
        panic!("no table with key {:?} in the destination", key);
    };
    let found = table.borrow().name().to_string();
    assert_eq!(found, name, "table with key {:?} is not '{}'", key, name);
    table
}

fn resolve_column(table: &TableRef, name: &str) -> usize {
    let t = table.borrow();
    t.column_index(name)
        .unwrap_or_else(|| panic!("table '{}' has no column '{}'", t.name(), name))
}

impl TableView {
    /// Export this view. `Move` leaves this view empty and out of sync, so the
    /// next `sync_if_needed` rebuilds it from its provenance.
    ///
    /// Panics if the view is detached or its table is not in a group.
    pub fn export(&mut self, mode: HandoverMode) -> (ExportedView, HandoverPatch) {
        match mode {
            HandoverMode::Copy => self.export_rows(self.row_indexes(), mode),
            HandoverMode::Move => {
                let rows = self.take_row_indexes();
                let exported = self.export_rows(rows, mode);
                self.invalidate();
                exported
            }
        }
    }

    /// Export a copy without touching this view.
    pub fn export_copy(&self) -> (ExportedView, HandoverPatch) {
        self.export_rows(self.row_indexes(), HandoverMode::Copy)
    }

    fn export_rows(&self, rows: RowIndexes, mode: HandoverMode) -> (ExportedView, HandoverPatch) {
        let table_ref = self.table_ref();
        let table = table_ref.borrow();
        let id = NEXT_EXPORT_ID.fetch_add(1, Ordering::Relaxed);

        let sort_columns = self
            .sort_spec()
            .columns()
            .map(|col| column_name_of(&table, col))
            .collect();
        let mut link_origin = None;
        let mut distinct_column = None;
        let provenance = match self.provenance() {
            Provenance::None => ExportedProvenance::None,
            Provenance::Query {
                query,
                start,
                end,
                limit,
            } => ExportedProvenance::Query {
                query: query.clone(),
                start: *start,
                end: *end,
                limit: *limit,
            },
            Provenance::LinkList(list) => {
                let Some(origin) = list.origin_table() else {
                    panic!("link list origin table is gone");
                };
                let origin = origin.borrow();
                link_origin = Some(LinkHandle {
                    table_key: key_of(&origin),
                    table_name: origin.name().to_string(),
                    column: column_name_of(&origin, list.column()),
                    row: list.origin_row(),
                });
                ExportedProvenance::LinkList
            }
            Provenance::Distinct { column } => {
                distinct_column = Some(column_name_of(&table, *column));
                ExportedProvenance::Distinct
            }
        };

        debug!(
            "export #{} ({:?}) of {} view on '{}' with {} rows",
            id,
            mode,
            self.provenance().kind(),
            table.name(),
            rows.len()
        );
        let exported = ExportedView {
            id,
            slots: rows.to_vec(),
            hint: rows.hint(),
            provenance,
            sort: self.sort_spec().clone(),
            auto_sort: self.auto_sort(),
            last_seen_version: self.last_seen_version(),
        };
        let patch = HandoverPatch {
            export_id: id,
            table_key: key_of(&table),
            table_name: table.name().to_string(),
            link_origin,
            sort_columns,
            distinct_column,
        };
        (exported, patch)
    }
}

impl ExportedView {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Rebuild the view in `group`, consuming the patch.
    ///
    /// Slots referring past the end of the destination table import as
    /// detached. Panics if the patch was produced for another export, or if a
    /// table or column it names cannot be found.
    pub fn import(self, patch: HandoverPatch, group: &Group) -> TableView {
        assert_eq!(
            self.id, patch.export_id,
            "handover patch #{} does not belong to export #{}",
            patch.export_id, self.id
        );
        let table = resolve_table(group, patch.table_key, &patch.table_name);

        assert_eq!(
            self.sort.keys().len(),
            patch.sort_columns.len(),
            "handover patch does not cover the sort spec"
        );
        let sort = SortSpec::new(
            self.sort
                .keys()
                .iter()
                .zip(&patch.sort_columns)
                .map(|(key, name)| SortKey {
                    column: resolve_column(&table, name),
                    ..*key
                })
                .collect(),
        );

        let provenance = match self.provenance {
            ExportedProvenance::None => Provenance::None,
            ExportedProvenance::Query {
                query,
                start,
                end,
                limit,
            } => Provenance::Query {
                query,
                start,
                end,
                limit,
            },
            ExportedProvenance::LinkList => {
                let Some(handle) = patch.link_origin else {
                    panic!("handover patch lacks the link origin");
                };
                let origin = resolve_table(group, handle.table_key, &handle.table_name);
                let column = resolve_column(&origin, &handle.column);
                Provenance::LinkList(LinkList::anchored(&origin, column, handle.row))
            }
            ExportedProvenance::Distinct => {
                let Some(name) = patch.distinct_column else {
                    panic!("handover patch lacks the distinct column");
                };
                Provenance::Distinct {
                    column: resolve_column(&table, &name),
                }
            }
        };

        let len = table.borrow().len();
        let slots = self
            .slots
            .into_iter()
            .map(|slot| match slot {
                RowSlot::Attached(source) if source >= len => RowSlot::Detached,
                other => other,
            })
            .collect();
        let mut rows = RowIndexes::new(self.hint);
        rows.assign_slots(slots);

        debug!(
            "import #{} into '{}' with {} rows",
            self.id,
            patch.table_name,
            rows.len()
        );
        TableView::from_parts(
            &table,
            rows,
            provenance,
            sort,
            self.auto_sort,
            self.last_seen_version,
        )
    }
}
