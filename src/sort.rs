//! Sort specification for views.
//!
//! A `SortSpec` is an ordered list of sort keys (primary first). Sorting is
//! always stable: rows comparing equal under every key keep their relative
//! order. Detached slots sort after every attached slot, nulls sort after
//! non-null values unless the key asks for `nulls_first`.

use crate::column::ColumnValue;
use crate::row_indexes::RowSlot;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sort order specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order (smallest first)
    Ascending,
    /// Descending order (largest first)
    Descending,
}

/// A single sort key: a column index and an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: usize,
    pub order: SortOrder,
    /// Whether NULL values should be placed first or last
    pub nulls_first: bool,
}

impl SortKey {
    /// Ascending order, nulls last
    pub fn ascending(column: usize) -> Self {
        SortKey {
            column,
            order: SortOrder::Ascending,
            nulls_first: false,
        }
    }

    /// Descending order, nulls last
    pub fn descending(column: usize) -> Self {
        SortKey {
            column,
            order: SortOrder::Descending,
            nulls_first: false,
        }
    }

    pub fn new(column: usize, order: SortOrder, nulls_first: bool) -> Self {
        SortKey {
            column,
            order,
            nulls_first,
        }
    }

    pub fn is_ascending(&self) -> bool {
        self.order == SortOrder::Ascending
    }
}

/// Ordered sort criteria. Empty means unordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new(keys: Vec<SortKey>) -> Self {
        SortSpec { keys }
    }

    /// Single column.
    pub fn by(column: usize, ascending: bool) -> Self {
        let key = if ascending {
            SortKey::ascending(column)
        } else {
            SortKey::descending(column)
        };
        SortSpec { keys: vec![key] }
    }

    /// Parallel lists of columns and directions.
    ///
    /// Panics if the lists differ in length.
    pub fn multiple(columns: &[usize], ascending: &[bool]) -> Self {
        assert_eq!(
            columns.len(),
            ascending.len(),
            "sort columns and directions must have the same length"
        );
        SortSpec {
            keys: columns
                .iter()
                .zip(ascending)
                .map(|(&column, &asc)| Self::by(column, asc).keys[0])
                .collect(),
        }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.keys.iter().map(|k| k.column)
    }

    /// Stable sort of `slots` by this spec against `table`.
    ///
    /// Panics if a key references a column the table does not have.
    pub fn sort_slots(&self, slots: &mut [RowSlot], table: &Table) {
        for key in &self.keys {
            assert!(
                key.column < table.column_count(),
                "sort column {} out of range [0, {})",
                key.column,
                table.column_count()
            );
        }
        slots.sort_by(|a, b| self.compare_slots(*a, *b, table));
    }

    fn compare_slots(&self, a: RowSlot, b: RowSlot, table: &Table) -> Ordering {
        let (a, b) = match (a, b) {
            (RowSlot::Attached(a), RowSlot::Attached(b)) => (a, b),
            (RowSlot::Detached, RowSlot::Detached) => return Ordering::Equal,
            (RowSlot::Detached, _) => return Ordering::Greater,
            (_, RowSlot::Detached) => return Ordering::Less,
        };
        for key in &self.keys {
            let Some(column) = table.column(key.column) else {
                return Ordering::Equal;
            };
            let cmp = compare_values(column.get_ref(a), column.get_ref(b), key);
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    }
}

/// Rank used to order values of different kinds deterministically.
fn kind_rank(value: &ColumnValue) -> u8 {
    match value {
        ColumnValue::Bool(_) => 0,
        ColumnValue::Int32(_) | ColumnValue::Int64(_) => 1,
        ColumnValue::Float32(_) | ColumnValue::Float64(_) => 2,
        ColumnValue::DateTime(_) => 3,
        ColumnValue::String(_) => 4,
        ColumnValue::Link(_) => 5,
        ColumnValue::LinkList(_) => 6,
        ColumnValue::Null => 7,
    }
}

/// Compare two cell values according to a sort key.
pub fn compare_values(
    val_a: Option<&ColumnValue>,
    val_b: Option<&ColumnValue>,
    key: &SortKey,
) -> Ordering {
    let a_is_null = val_a.map_or(true, ColumnValue::is_null);
    let b_is_null = val_b.map_or(true, ColumnValue::is_null);

    // Null placement ignores the sort direction
    let (val_a, val_b) = match (val_a, val_b, a_is_null, b_is_null) {
        (_, _, true, true) => return Ordering::Equal,
        (_, _, true, false) => {
            return if key.nulls_first { Ordering::Less } else { Ordering::Greater };
        }
        (_, _, false, true) => {
            return if key.nulls_first { Ordering::Greater } else { Ordering::Less };
        }
        (Some(a), Some(b), false, false) => (a, b),
        _ => return Ordering::Equal,
    };

    let base_cmp = match (val_a, val_b) {
        (ColumnValue::Int32(a), ColumnValue::Int32(b)) => a.cmp(b),
        (ColumnValue::Int64(a), ColumnValue::Int64(b)) => a.cmp(b),
        (ColumnValue::DateTime(a), ColumnValue::DateTime(b)) => a.cmp(b),
        (ColumnValue::Float32(a), ColumnValue::Float32(b)) => a.total_cmp(b),
        (ColumnValue::Float64(a), ColumnValue::Float64(b)) => a.total_cmp(b),
        (ColumnValue::String(a), ColumnValue::String(b)) => a.cmp(b),
        (ColumnValue::Bool(a), ColumnValue::Bool(b)) => a.cmp(b),
        (ColumnValue::Link(a), ColumnValue::Link(b)) => a.cmp(b),
        (ColumnValue::LinkList(a), ColumnValue::LinkList(b)) => a.len().cmp(&b.len()),
        (a, b) => kind_rank(a).cmp(&kind_rank(b)),
    };

    match key.order {
        SortOrder::Ascending => base_cmp,
        SortOrder::Descending => base_cmp.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use crate::table::Schema;
    use std::collections::HashMap;

    fn scores_table() -> Table {
        let schema = Schema::new(vec![
            ("name".to_string(), ColumnType::String, false),
            ("score".to_string(), ColumnType::Int32, true),
        ]);
        let mut table = Table::new("scores".to_string(), schema);
        for (name, score) in [("a", Some(3)), ("b", None), ("c", Some(1)), ("d", Some(3))] {
            let mut row = HashMap::new();
            row.insert("name".to_string(), ColumnValue::String(name.to_string()));
            row.insert(
                "score".to_string(),
                score.map_or(ColumnValue::Null, ColumnValue::Int32),
            );
            table.append_row(row).unwrap();
        }
        table
    }

    fn attached(rows: &[usize]) -> Vec<RowSlot> {
        rows.iter().map(|&r| RowSlot::Attached(r)).collect()
    }

    #[test]
    fn test_sort_ascending_is_stable_nulls_last() {
        let table = scores_table();
        let mut slots = attached(&[0, 1, 2, 3]);
        SortSpec::by(1, true).sort_slots(&mut slots, &table);
        assert_eq!(slots, attached(&[2, 0, 3, 1]));
    }

    #[test]
    fn test_sort_descending_keeps_ties_in_order() {
        let table = scores_table();
        let mut slots = attached(&[3, 2, 1, 0]);
        SortSpec::by(1, false).sort_slots(&mut slots, &table);
        // 3 and 0 tie; input order 3 before 0 is kept
        assert_eq!(slots, attached(&[3, 0, 2, 1]));
    }

    #[test]
    fn test_nulls_first_and_detached_last() {
        let table = scores_table();
        let mut slots = vec![
            RowSlot::Detached,
            RowSlot::Attached(0),
            RowSlot::Attached(1),
            RowSlot::Attached(2),
        ];
        SortSpec::new(vec![SortKey::new(1, SortOrder::Ascending, true)])
            .sort_slots(&mut slots, &table);
        assert_eq!(
            slots,
            vec![
                RowSlot::Attached(1),
                RowSlot::Attached(2),
                RowSlot::Attached(0),
                RowSlot::Detached
            ]
        );
    }

    #[test]
    fn test_multiple_keys() {
        let table = scores_table();
        let mut slots = attached(&[0, 1, 2, 3]);
        SortSpec::multiple(&[1, 0], &[false, false]).sort_slots(&mut slots, &table);
        assert_eq!(slots, attached(&[3, 0, 2, 1]));
    }

    #[test]
    #[should_panic(expected = "same length")]
    fn test_multiple_length_mismatch_panics() {
        SortSpec::multiple(&[0, 1], &[true]);
    }

    #[test]
    fn test_float_ordering_is_total() {
        let key = SortKey::ascending(0);
        let nan = ColumnValue::Float64(f64::NAN);
        let one = ColumnValue::Float64(1.0);
        assert_eq!(compare_values(Some(&one), Some(&nan), &key), Ordering::Less);
    }
}
