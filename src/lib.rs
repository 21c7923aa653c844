/// TableView - Result views over columnar tables
///
/// A view is an ordered list of references to rows of one table. Views follow
/// structural changes of their table incrementally (rows shift, erased rows
/// become detached slots), can be re-evaluated lazily from the query, link
/// list or distinct scan they were built from, sorted stably, aggregated, and
/// handed over between execution contexts as plain data.

pub mod error;
pub mod sequence;
pub mod column;
pub mod table;
pub mod changeset;
pub mod row_indexes;
pub mod sort;
pub mod expr;
pub mod query;
pub mod link;
pub mod provenance;
pub mod view;
pub mod aggregate;
pub mod group;
pub mod handover;

pub use error::{Result, TableError};
pub use sequence::{ArraySequence, Sequence, TieredVectorSequence};
pub use column::{Column, ColumnType, ColumnValue, ValueKey};
pub use table::{Row, Schema, StorageHint, Table, TableKey, TableRef};
pub use changeset::{AccessorId, ChangeAdjuster, IndexAdjuster, RowChange};
pub use row_indexes::{RowIndexes, RowSlot};
pub use sort::{SortKey, SortOrder, SortSpec};
pub use expr::{CompareOp, Expr, LiteralValue};
pub use query::{Query, UNBOUNDED};
pub use link::LinkList;
pub use provenance::Provenance;
pub use view::{TableView, DEFAULT_DUMP_LIMIT};
pub use aggregate::AggrType;
pub use group::Group;
pub use handover::{ExportedView, HandoverMode, HandoverPatch, LinkHandle};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::collections::HashMap;

    const NAME: usize = 0;
    const SALARY: usize = 1;

    fn payroll(salaries: &[i64]) -> (Group, TableRef) {
        let mut group = Group::new();
        let schema = Schema::new(vec![
            ("name".to_string(), ColumnType::String, false),
            ("salary".to_string(), ColumnType::Int64, false),
        ]);
        let table = group.add_table(Table::new("employees".to_string(), schema));
        {
            let mut t = table.borrow_mut();
            for (i, salary) in salaries.iter().enumerate() {
                let mut row = HashMap::new();
                row.insert("name".to_string(), ColumnValue::String(format!("e{}", i)));
                row.insert("salary".to_string(), ColumnValue::Int64(*salary));
                t.append_row(row).unwrap();
            }
        }
        (group, table)
    }

    #[test]
    fn test_salary_workflow() {
        let (_group, table) = payroll(&[1000, 2000, 1500]);
        let mut view = Query::parse("salary < 1800")
            .unwrap()
            .find_all_view(&table, 0, UNBOUNDED, UNBOUNDED)
            .unwrap();

        assert_eq!(view.slots(), vec![RowSlot::Attached(0), RowSlot::Attached(2)]);
        assert_eq!(view.get_int(SALARY, 0), Some(1000));
        assert_eq!(view.get_int(SALARY, 1), Some(1500));
        assert_eq!(view.sum_int(SALARY), 2500);

        table.borrow_mut().erase_row(0).unwrap();
        assert_eq!(view.slots(), vec![RowSlot::Detached, RowSlot::Attached(1)]);
        assert!(!view.is_row_attached(0));
        assert_eq!(view.num_attached_rows(), 1);
        assert_eq!(view.sum_int(SALARY), 1500);
        assert!(!view.is_in_sync());

        view.sync_if_needed();
        assert_eq!(view.slots(), vec![RowSlot::Attached(1)]);
        assert!(view.is_in_sync());
    }

    #[test]
    fn test_tie_break_first_occurrence() {
        let (_group, table) = payroll(&[5, 5, 3]);
        let view = TableView::range(&table, 0, UNBOUNDED);
        let mut ndx = usize::MAX;
        assert_eq!(view.maximum_int(SALARY, Some(&mut ndx)), 5);
        assert_eq!(ndx, 0);
    }

    #[test]
    fn test_query_rerun_matches_fresh_evaluation() {
        let (_group, table) = payroll(&[1000, 2000, 1500, 1700, 3000]);
        let query = Query::parse("salary < 1800 AND salary >= 1200").unwrap();
        let mut view = query.find_all_view(&table, 1, UNBOUNDED, 5).unwrap();

        table.borrow_mut().erase_row(2).unwrap();
        table
            .borrow_mut()
            .set_value(3, "salary", ColumnValue::Int64(1250))
            .unwrap();
        view.sync_if_needed();

        let fresh = query.find_all(&table.borrow(), 1, UNBOUNDED, 5).unwrap();
        let synced: Vec<usize> = view.slots().iter().filter_map(RowSlot::index).collect();
        assert_eq!(synced, fresh);
        assert_eq!(synced, vec![2, 3]);
    }

    #[test]
    fn test_sync_idempotent_and_sort_stable() {
        let (_group, table) = payroll(&[3, 1, 3, 2, 1]);
        let mut view = Query::all().find_all_view(&table, 0, UNBOUNDED, UNBOUNDED).unwrap();
        view.sort(SALARY, true);
        let sorted = view.slots();
        view.sort(SALARY, true);
        assert_eq!(view.slots(), sorted);

        let first = view.sync_if_needed();
        let second = view.sync_if_needed();
        assert_eq!(first, second);
        assert_eq!(view.slots(), sorted);
        assert_eq!(
            sorted,
            [1, 4, 3, 0, 2].map(RowSlot::Attached).to_vec()
        );
    }

    #[test]
    fn test_handover_between_snapshots() {
        let (source, table) = payroll(&[1000, 2000, 1500]);
        let mut view = Query::parse("salary > 1200")
            .unwrap()
            .find_all_view(&table, 0, UNBOUNDED, UNBOUNDED)
            .unwrap();
        view.sort(NAME, false);
        let destination = source.snapshot();

        let (exported, patch) = view.export(HandoverMode::Copy);
        let imported = exported.import(patch, &destination);
        for i in 0..view.len() {
            assert_eq!(imported.get(i), view.get(i));
            assert_eq!(imported.get_string(NAME, i), view.get_string(NAME, i));
        }

        // The destination is independent of further source changes
        table.borrow_mut().clear();
        assert_eq!(view.num_attached_rows(), 0);
        assert_eq!(imported.num_attached_rows(), 2);
    }

    #[test]
    fn test_empty_views_aggregate_to_zero() {
        let (_group, table) = payroll(&[10, 20]);
        let detached = TableView::range(&table, 0, UNBOUNDED);
        table.borrow_mut().clear();
        let empty = TableView::from_table(&table);
        for view in [&empty, &detached] {
            let mut ndx = 7;
            assert_eq!(view.sum_int(SALARY), 0);
            assert_eq!(view.count_int(SALARY, 10), 0);
            assert_eq!(view.average_int(SALARY), 0.0);
            assert_eq!(view.minimum_int(SALARY, Some(&mut ndx)), 0);
            assert_eq!(ndx, 7);
        }
    }
}
