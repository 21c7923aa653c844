/// Table Implementation
///
/// A Table is a collection of typed columns with a schema. Besides the data it
/// carries the two pieces of state every result view depends on:
///
/// - a version counter, bumped by every mutation (structural or content), which
///   views compare against to decide whether they are stale
/// - a registry of accessors (view row mappings, link-list anchors) which is
///   told about every structural change so the stored row indices can follow
///
/// Tables are shared through `TableRef` (`Rc<RefCell<Table>>`). Link columns
/// point into a target table registered with `Table::link`; when the target
/// erases or moves rows, the links in every origin table are adjusted.
///
/// # Examples
///
/// ```
/// use tableview::{Table, Schema, ColumnType, ColumnValue};
/// use std::collections::HashMap;
///
/// let schema = Schema::new(vec![
///     ("id".to_string(), ColumnType::Int32, false),
///     ("name".to_string(), ColumnType::String, false),
///     ("age".to_string(), ColumnType::Int32, true),
/// ]);
///
/// let mut table = Table::new("users".to_string(), schema);
///
/// let mut row = HashMap::new();
/// row.insert("id".to_string(), ColumnValue::Int32(1));
/// row.insert("name".to_string(), ColumnValue::String("Alice".to_string()));
/// row.insert("age".to_string(), ColumnValue::Int32(30));
/// table.append_row(row).unwrap();
///
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.version(), 1);
/// assert_eq!(table.get_value(0, "name").unwrap().as_string(), Some("Alice"));
/// ```

use crate::changeset::{AccessorId, AccessorRegistry, ChangeAdjuster, RowChange};
use crate::column::{Column, ColumnType, ColumnValue};
use crate::error::{Result, TableError};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::str::FromStr;

/// Shared handle to a table.
pub type TableRef = Rc<RefCell<Table>>;

/// A row keyed by column name.
pub type Row = HashMap<String, ColumnValue>;

/// Hint for selecting the underlying storage strategy.
///
/// Applies to table columns and to the row mappings of views built on the
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageHint {
    /// Optimized for append and read-heavy workloads (default).
    ///
    /// - O(1) random access
    /// - O(1) amortized append
    /// - O(N) insert/delete in middle
    #[default]
    FastReads,

    /// Optimized for frequent inserts and deletes anywhere.
    ///
    /// - O(log √N) random access
    /// - O(√N) insert/delete anywhere
    FastUpdates,
}

impl StorageHint {
    /// Returns true if this hint uses tiered vector storage.
    pub(crate) fn use_tiered_vector(&self) -> bool {
        matches!(self, StorageHint::FastUpdates)
    }
}

impl FromStr for StorageHint {
    type Err = TableError;

    /// Accepts: "fast_reads", "fast_updates" (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fast_reads" | "fastreads" => Ok(StorageHint::FastReads),
            "fast_updates" | "fastupdates" => Ok(StorageHint::FastUpdates),
            _ => Err(TableError::UnknownStorageHint(s.to_string())),
        }
    }
}

/// Identity of a table within a group. Stable across group snapshots, so it
/// can travel between contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey(pub u32);

/// Schema definition with column names and types.
///
/// # Examples
///
/// ```
/// use tableview::{Schema, ColumnType};
///
/// let schema = Schema::new(vec![
///     ("id".to_string(), ColumnType::Int32, false),      // Required
///     ("email".to_string(), ColumnType::String, false),  // Required
///     ("age".to_string(), ColumnType::Int32, true),      // Nullable
/// ]);
///
/// assert_eq!(schema.len(), 3);
/// assert_eq!(schema.get_column_index("email"), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<(String, ColumnType, bool)>, // (name, type, nullable)
}

impl Schema {
    /// Creates a new schema from (column_name, column_type, is_nullable) tuples.
    pub fn new(columns: Vec<(String, ColumnType, bool)>) -> Self {
        Schema { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get_column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _, _)| name.as_str()).collect()
    }

    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _, _)| n == name)
    }

    /// Returns (name, type, nullable) or None if index is out of bounds.
    pub fn get_column_info(&self, index: usize) -> Option<(&str, ColumnType, bool)> {
        self.columns.get(index).map(|(name, ty, nullable)| (name.as_str(), *ty, *nullable))
    }

    pub fn get_column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, ty, _)| *ty)
    }
}

/// Root table owning its data.
pub struct Table {
    name: String,
    schema: Schema,
    columns: Vec<Column>,
    row_count: usize,
    hint: StorageHint,
    version: u64,
    registry: AccessorRegistry,
    /// Link column index -> target table
    link_targets: HashMap<usize, Weak<RefCell<Table>>>,
    /// (origin table, link column) pairs whose links point into this table
    link_origins: Vec<(Weak<RefCell<Table>>, usize)>,
    key: Option<TableKey>,
}

impl Table {
    /// Create a new table with default settings (FastReads storage).
    pub fn new(name: String, schema: Schema) -> Self {
        Self::with_hint(name, schema, StorageHint::default())
    }

    /// Create a new table with a storage hint.
    ///
    /// ```
    /// use tableview::{Table, Schema, ColumnType, StorageHint};
    ///
    /// let schema = Schema::new(vec![("id".to_string(), ColumnType::Int32, false)]);
    /// let orders = Table::with_hint("orders".to_string(), schema, StorageHint::FastUpdates);
    /// assert_eq!(orders.hint(), StorageHint::FastUpdates);
    /// ```
    pub fn with_hint(name: String, schema: Schema, hint: StorageHint) -> Self {
        let columns: Vec<Column> = schema
            .columns
            .iter()
            .map(|(col_name, col_type, nullable)| {
                Column::with_hint(col_name.clone(), *col_type, *nullable, hint)
            })
            .collect();

        Table {
            name,
            schema,
            columns,
            row_count: 0,
            hint,
            version: 0,
            registry: AccessorRegistry::new(),
            link_targets: HashMap::new(),
            link_origins: Vec::new(),
            key: None,
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> TableRef {
        Rc::new(RefCell::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn hint(&self) -> StorageHint {
        self.hint
    }

    pub fn len(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Monotonic counter, bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn key(&self) -> Option<TableKey> {
        self.key
    }

    pub(crate) fn set_key(&mut self, key: TableKey) {
        self.key = Some(key);
    }

    // ==================== Column introspection ====================

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, col: usize) -> Option<&str> {
        self.columns.get(col).map(|c| c.name())
    }

    pub fn column_type(&self, col: usize) -> Option<ColumnType> {
        self.columns.get(col).map(|c| c.column_type())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.get_column_index(name)
    }

    pub fn column(&self, col: usize) -> Option<&Column> {
        self.columns.get(col)
    }

    fn resolve_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }

    fn check_column(&self, col: usize) -> Result<()> {
        if col < self.columns.len() {
            Ok(())
        } else {
            Err(TableError::ColumnOutOfRange {
                index: col,
                count: self.columns.len(),
            })
        }
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row < self.row_count {
            Ok(())
        } else {
            Err(TableError::RowOutOfRange {
                row,
                len: self.row_count,
            })
        }
    }

    // ==================== Cell access ====================

    pub fn get_value(&self, row: usize, column: &str) -> Result<ColumnValue> {
        let col_idx = self.resolve_column(column)?;
        self.columns[col_idx].get(row)
    }

    /// Get a value by column index (skips the name lookup).
    #[inline]
    pub fn get_value_by_index(&self, row: usize, col_idx: usize) -> Result<ColumnValue> {
        self.check_column(col_idx)?;
        self.columns[col_idx].get(row)
    }

    pub fn set_value(&mut self, row: usize, column: &str, value: ColumnValue) -> Result<()> {
        let col_idx = self.resolve_column(column)?;
        self.set_value_by_index(row, col_idx, value)
    }

    /// Overwrite one cell. Bumps the version but is not a structural change,
    /// so registered accessors are not notified.
    pub fn set_value_by_index(&mut self, row: usize, col_idx: usize, value: ColumnValue) -> Result<()> {
        self.check_column(col_idx)?;
        self.check_row(row)?;
        let value = self.columns[col_idx].validate_value(value)?;
        self.check_link_targets(col_idx, &value)?;
        self.columns[col_idx].set(row, value)?;
        self.version += 1;
        Ok(())
    }

    pub fn get_row(&self, row: usize) -> Result<Row> {
        self.check_row(row)?;
        self.columns
            .iter()
            .map(|col| Ok((col.name().to_string(), col.get(row)?)))
            .collect()
    }

    /// First row whose cell in `col` equals `value`.
    pub fn find_first(&self, col: usize, value: &ColumnValue) -> Option<usize> {
        let column = self.columns.get(col)?;
        (0..self.row_count).find(|&row| column.get_ref(row) == Some(value))
    }

    // ==================== Structural mutation ====================

    /// Validate a full row against the schema without touching any column.
    fn prepare_row(&self, row: &Row) -> Result<Vec<ColumnValue>> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let value = row
                    .get(col.name())
                    .cloned()
                    .ok_or_else(|| TableError::MissingValue(col.name().to_string()))?;
                let value = col.validate_value(value)?;
                self.check_link_targets(i, &value)?;
                Ok(value)
            })
            .collect()
    }

    /// Append a row; returns its index.
    pub fn append_row(&mut self, row: Row) -> Result<usize> {
        let index = self.row_count;
        self.insert_row(index, row)?;
        Ok(index)
    }

    /// Append multiple rows at once. All rows are validated before any is
    /// inserted.
    pub fn append_rows(&mut self, rows: Vec<Row>) -> Result<usize> {
        let prepared = rows
            .iter()
            .map(|row| self.prepare_row(row))
            .collect::<Result<Vec<_>>>()?;
        let count = prepared.len();
        for values in prepared {
            let at = self.row_count;
            self.insert_prepared(at, values)?;
        }
        Ok(count)
    }

    /// Append `count` rows holding each column's default value; returns the
    /// index of the first new row.
    pub fn add_empty_rows(&mut self, count: usize) -> Result<usize> {
        let first = self.row_count;
        for _ in 0..count {
            let values = self.columns.iter().map(Column::default_value).collect();
            let at = self.row_count;
            self.insert_prepared(at, values)?;
        }
        Ok(first)
    }

    pub fn insert_row(&mut self, index: usize, row: Row) -> Result<()> {
        if index > self.row_count {
            return Err(TableError::InsertOutOfRange {
                index,
                len: self.row_count,
            });
        }
        let values = self.prepare_row(&row)?;
        self.insert_prepared(index, values)
    }

    fn insert_prepared(&mut self, index: usize, values: Vec<ColumnValue>) -> Result<()> {
        for (col, value) in self.columns.iter_mut().zip(values) {
            col.insert(index, value)?;
        }
        self.row_count += 1;
        self.structural_change(RowChange::Inserted { at: index, count: 1 });
        Ok(())
    }

    /// Remove a row, shifting later rows down by one.
    pub fn erase_row(&mut self, index: usize) -> Result<Row> {
        self.check_row(index)?;
        let mut removed = HashMap::new();
        for col in self.columns.iter_mut() {
            removed.insert(col.name().to_string(), col.delete(index)?);
        }
        self.row_count -= 1;
        self.structural_change(RowChange::Erased { at: index });
        Ok(removed)
    }

    /// Overwrite row `index` with the last row and drop the last row.
    pub fn move_last_over(&mut self, index: usize) -> Result<()> {
        self.check_row(index)?;
        let last = self.row_count - 1;
        for col in self.columns.iter_mut() {
            let moved = col.delete(last)?;
            if index != last {
                col.set(index, moved)?;
            }
        }
        self.row_count -= 1;
        self.structural_change(RowChange::MovedOver { from: last, to: index });
        Ok(())
    }

    pub fn clear(&mut self) {
        for col in self.columns.iter_mut() {
            col.clear();
        }
        self.row_count = 0;
        self.structural_change(RowChange::Cleared);
    }

    fn structural_change(&mut self, change: RowChange) {
        self.version += 1;
        log::trace!("table '{}': {:?}, version {}", self.name, change, self.version);
        self.registry.broadcast(&change);
        self.adjust_incoming_links(&change);
    }

    // ==================== Accessor registry ====================

    pub fn register_accessor(&mut self, accessor: Weak<RefCell<dyn ChangeAdjuster>>) -> AccessorId {
        self.registry.register(accessor)
    }

    pub fn unregister_accessor(&mut self, id: AccessorId) -> bool {
        self.registry.unregister(id)
    }

    /// Number of live registered accessors.
    pub fn accessor_count(&self) -> usize {
        self.registry.len()
    }

    // ==================== Links ====================

    /// Point the link column `column` of `origin` at `target`.
    ///
    /// `origin` and `target` may be the same table.
    pub fn link(origin: &TableRef, column: &str, target: &TableRef) -> Result<()> {
        let col = {
            let origin_table = origin.borrow();
            let col = origin_table.resolve_column(column)?;
            let column_type = origin_table.columns[col].column_type();
            if !column_type.is_link() {
                return Err(TableError::NotALinkColumn {
                    column: column.to_string(),
                    column_type,
                });
            }
            col
        };
        Self::link_column(origin, col, target);
        Ok(())
    }

    /// `col` must be a link column of `origin`.
    pub(crate) fn link_column(origin: &TableRef, col: usize, target: &TableRef) {
        origin
            .borrow_mut()
            .link_targets
            .insert(col, Rc::downgrade(target));
        target
            .borrow_mut()
            .link_origins
            .push((Rc::downgrade(origin), col));
    }

    /// Target table of a link column, if one is set and still alive.
    pub fn link_target(&self, col: usize) -> Option<TableRef> {
        self.link_targets.get(&col).and_then(Weak::upgrade)
    }

    fn is_same_table(&self, other: &TableRef) -> bool {
        std::ptr::eq(other.as_ptr() as *const Table, self as *const Table)
    }

    fn link_target_len(&self, col: usize) -> Option<usize> {
        let target = self.link_target(col)?;
        if self.is_same_table(&target) {
            Some(self.row_count)
        } else {
            Some(target.borrow().len())
        }
    }

    fn check_link_targets(&self, col: usize, value: &ColumnValue) -> Result<()> {
        let targets: &[usize] = match value {
            ColumnValue::Link(target) => std::slice::from_ref(target),
            ColumnValue::LinkList(targets) => targets,
            _ => return Ok(()),
        };
        let Some(len) = self.link_target_len(col) else {
            return Ok(());
        };
        match targets.iter().find(|&&t| t >= len) {
            Some(&target) => Err(TableError::LinkTargetOutOfRange { target, len }),
            None => Ok(()),
        }
    }

    /// Follow a structural change of this table in every link column that
    /// points here.
    ///
    /// Panics if an origin table (other than this one) is currently borrowed.
    fn adjust_incoming_links(&mut self, change: &RowChange) {
        self.link_origins.retain(|(origin, _)| origin.strong_count() > 0);
        let origins: Vec<(TableRef, usize)> = self
            .link_origins
            .iter()
            .filter_map(|(origin, col)| origin.upgrade().map(|o| (o, *col)))
            .collect();
        for (origin, col) in origins {
            if self.is_same_table(&origin) {
                self.columns[col].adjust_links(change);
            } else {
                origin.borrow_mut().adjust_links_in(col, change);
            }
        }
    }

    fn adjust_links_in(&mut self, col: usize, change: &RowChange) {
        if self.columns[col].adjust_links(change) {
            self.version += 1;
        }
    }

    // ==================== Copying & serialization ====================

    /// Deep copy of data, version and key. The copy has no registered
    /// accessors and no links; `Group::snapshot` re-establishes links.
    pub(crate) fn copy_unlinked(&self) -> Table {
        Table {
            name: self.name.clone(),
            schema: self.schema.clone(),
            columns: self.columns.clone(),
            row_count: self.row_count,
            hint: self.hint,
            version: self.version,
            registry: AccessorRegistry::new(),
            link_targets: HashMap::new(),
            link_origins: Vec::new(),
            key: self.key,
        }
    }

    /// Column indices of link columns with a registered target.
    pub(crate) fn linked_columns(&self) -> Vec<(usize, TableRef)> {
        let mut linked: Vec<(usize, TableRef)> = self
            .link_targets
            .iter()
            .filter_map(|(col, target)| target.upgrade().map(|t| (*col, t)))
            .collect();
        linked.sort_by_key(|(col, _)| *col);
        linked
    }

    /// One row as a JSON object in schema order.
    pub(crate) fn row_to_json(&self, row: usize) -> Result<serde_json::Value> {
        self.check_row(row)?;
        let obj: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .map(|col| {
                let value = col.get_ref(row).map(ColumnValue::to_json_value);
                (col.name().to_string(), value.unwrap_or(serde_json::Value::Null))
            })
            .collect();
        Ok(serde_json::Value::Object(obj))
    }

    /// Export table to JSON format (array of objects).
    ///
    /// ```
    /// use tableview::{Table, Schema, ColumnType, ColumnValue};
    /// use std::collections::HashMap;
    ///
    /// let schema = Schema::new(vec![
    ///     ("id".to_string(), ColumnType::Int32, false),
    ///     ("name".to_string(), ColumnType::String, false),
    /// ]);
    /// let mut table = Table::new("test".to_string(), schema);
    /// let mut row = HashMap::new();
    /// row.insert("id".to_string(), ColumnValue::Int32(1));
    /// row.insert("name".to_string(), ColumnValue::String("Alice".to_string()));
    /// table.append_row(row).unwrap();
    ///
    /// let json = table.to_json().unwrap();
    /// assert!(json.contains("\"id\": 1"));
    /// assert!(json.contains("\"name\": \"Alice\""));
    /// ```
    pub fn to_json(&self) -> Result<String> {
        let rows = (0..self.row_count)
            .map(|row| self.row_to_json(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Table {{ name: '{}', columns: {}, rows: {}, version: {} }}",
            self.name,
            self.schema.len(),
            self.row_count,
            self.version
        )
    }
}
