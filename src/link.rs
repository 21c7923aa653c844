//! Link-list accessor.
//!
//! A `LinkList` addresses one link-list cell: (origin table, column, row). The
//! row is held in an anchor registered on the origin table, so it follows
//! inserts, erases and moves of origin rows. When the origin row itself goes
//! away the link list becomes detached and reads as empty.

use crate::changeset::{AccessorId, ChangeAdjuster, IndexAdjuster};
use crate::column::{ColumnType, ColumnValue};
use crate::error::{Result, TableError};
use crate::table::{Table, TableRef};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug)]
struct RowAnchor {
    row: Option<usize>,
}

impl ChangeAdjuster for RowAnchor {
    fn adj_insert_rows(&mut self, at: usize, count: usize) {
        if let Some(row) = self.row {
            self.row = Some(IndexAdjuster::adjust_for_insert(row, at, count));
        }
    }

    fn adj_erase_row(&mut self, at: usize) {
        self.row = self.row.and_then(|row| IndexAdjuster::adjust_for_erase(row, at));
    }

    fn adj_move_over(&mut self, from: usize, to: usize) {
        self.row = self
            .row
            .and_then(|row| IndexAdjuster::adjust_for_move_over(row, from, to));
    }

    fn adj_clear(&mut self) {
        self.row = None;
    }
}

pub struct LinkList {
    origin: Weak<RefCell<Table>>,
    column: usize,
    anchor: Rc<RefCell<RowAnchor>>,
    registration: Option<AccessorId>,
}

impl LinkList {
    /// Accessor for the link list in `column` of `row` in `origin`.
    pub fn new(origin: &TableRef, column: usize, row: usize) -> Result<Self> {
        {
            let table = origin.borrow();
            let column_type = table.column_type(column).ok_or(TableError::ColumnOutOfRange {
                index: column,
                count: table.column_count(),
            })?;
            if column_type != ColumnType::LinkList {
                return Err(TableError::NotALinkColumn {
                    column: table.column_name(column).unwrap_or_default().to_string(),
                    column_type,
                });
            }
            if row >= table.len() {
                return Err(TableError::RowOutOfRange {
                    row,
                    len: table.len(),
                });
            }
        }
        Ok(Self::anchored(origin, column, Some(row)))
    }

    /// Register an anchor at `row` (None: already detached).
    pub(crate) fn anchored(origin: &TableRef, column: usize, row: Option<usize>) -> Self {
        let anchor = Rc::new(RefCell::new(RowAnchor { row }));
        let as_dyn: Rc<RefCell<dyn ChangeAdjuster>> = anchor.clone();
        let registration = Some(origin.borrow_mut().register_accessor(Rc::downgrade(&as_dyn)));
        LinkList {
            origin: Rc::downgrade(origin),
            column,
            anchor,
            registration,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.origin.strong_count() > 0 && self.anchor.borrow().row.is_some()
    }

    /// Current origin row, None once detached.
    pub fn origin_row(&self) -> Option<usize> {
        if self.origin.strong_count() == 0 {
            return None;
        }
        self.anchor.borrow().row
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn origin_table(&self) -> Option<TableRef> {
        self.origin.upgrade()
    }

    pub fn target_table(&self) -> Option<TableRef> {
        let origin = self.origin_table()?;
        let target = origin.borrow().link_target(self.column);
        target
    }

    /// Target row indices, empty when detached.
    pub fn targets(&self) -> Vec<usize> {
        let (Some(origin), Some(row)) = (self.origin_table(), self.origin_row()) else {
            return Vec::new();
        };
        let table = origin.borrow();
        table
            .column(self.column)
            .and_then(|col| col.get_ref(row))
            .and_then(ColumnValue::as_link_list)
            .map(<[usize]>::to_vec)
            .unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.targets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn get(&self, pos: usize) -> Option<usize> {
        self.targets().get(pos).copied()
    }

    pub fn add(&self, target: usize) -> Result<()> {
        self.modify(|targets| {
            targets.push(target);
            Ok(())
        })
    }

    pub fn insert(&self, pos: usize, target: usize) -> Result<()> {
        self.modify(|targets| {
            if pos > targets.len() {
                return Err(TableError::InsertOutOfRange {
                    index: pos,
                    len: targets.len(),
                });
            }
            targets.insert(pos, target);
            Ok(())
        })
    }

    /// Remove the link at `pos`, returning its target.
    pub fn remove(&self, pos: usize) -> Result<usize> {
        let mut removed = 0;
        self.modify(|targets| {
            if pos >= targets.len() {
                return Err(TableError::RowOutOfRange {
                    row: pos,
                    len: targets.len(),
                });
            }
            removed = targets.remove(pos);
            Ok(())
        })?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        self.modify(|targets| {
            targets.clear();
            Ok(())
        })
    }

    /// Panics if the link list is detached.
    fn modify(&self, f: impl FnOnce(&mut Vec<usize>) -> Result<()>) -> Result<()> {
        let (Some(origin), Some(row)) = (self.origin_table(), self.origin_row()) else {
            panic!("link list is detached");
        };
        let mut targets = self.targets();
        f(&mut targets)?;
        let mut table = origin.borrow_mut();
        table.set_value_by_index(row, self.column, ColumnValue::LinkList(targets))
    }

    /// Version of the origin table, None if it was dropped.
    pub fn origin_version(&self) -> Option<u64> {
        self.origin_table().map(|t| t.borrow().version())
    }
}

impl Clone for LinkList {
    fn clone(&self) -> Self {
        match self.origin_table() {
            Some(origin) => Self::anchored(&origin, self.column, self.anchor.borrow().row),
            None => LinkList {
                origin: Weak::new(),
                column: self.column,
                anchor: Rc::new(RefCell::new(RowAnchor { row: None })),
                registration: None,
            },
        }
    }
}

impl Drop for LinkList {
    fn drop(&mut self) {
        if let (Some(id), Some(origin)) = (self.registration, self.origin.upgrade()) {
            if let Ok(mut table) = origin.try_borrow_mut() {
                table.unregister_accessor(id);
            }
        }
    }
}

impl fmt::Debug for LinkList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkList")
            .field("column", &self.column)
            .field("row", &self.origin_row())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Schema;
    use std::collections::HashMap;

    fn setup() -> (TableRef, TableRef) {
        let targets = Table::new(
            "items".to_string(),
            Schema::new(vec![("n".to_string(), ColumnType::Int32, false)]),
        )
        .into_ref();
        for n in 0..4 {
            let mut row = HashMap::new();
            row.insert("n".to_string(), ColumnValue::Int32(n));
            targets.borrow_mut().append_row(row).unwrap();
        }
        let origin = Table::new(
            "orders".to_string(),
            Schema::new(vec![("items".to_string(), ColumnType::LinkList, false)]),
        )
        .into_ref();
        Table::link(&origin, "items", &targets).unwrap();
        origin.borrow_mut().add_empty_rows(2).unwrap();
        (origin, targets)
    }

    #[test]
    fn test_add_insert_remove() {
        let (origin, _targets) = setup();
        let list = LinkList::new(&origin, 0, 1).unwrap();
        list.add(3).unwrap();
        list.add(1).unwrap();
        list.insert(0, 2).unwrap();
        assert_eq!(list.targets(), vec![2, 3, 1]);
        assert_eq!(list.remove(1).unwrap(), 3);
        assert_eq!(list.size(), 2);
        assert!(matches!(list.add(9), Err(TableError::LinkTargetOutOfRange { .. })));
        list.clear().unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_anchor_follows_origin_rows() {
        let (origin, _targets) = setup();
        let list = LinkList::new(&origin, 0, 1).unwrap();
        list.add(2).unwrap();

        origin.borrow_mut().erase_row(0).unwrap();
        assert_eq!(list.origin_row(), Some(0));
        assert_eq!(list.targets(), vec![2]);

        origin.borrow_mut().erase_row(0).unwrap();
        assert!(!list.is_attached());
        assert!(list.targets().is_empty());
    }

    #[test]
    fn test_registration_lifecycle() {
        let (origin, _targets) = setup();
        let list = LinkList::new(&origin, 0, 0).unwrap();
        let copy = list.clone();
        assert_eq!(origin.borrow().accessor_count(), 2);
        drop(list);
        assert_eq!(origin.borrow().accessor_count(), 1);
        assert_eq!(copy.origin_row(), Some(0));
    }

    #[test]
    fn test_invalid_construction() {
        let (origin, targets) = setup();
        assert!(matches!(
            LinkList::new(&origin, 0, 5),
            Err(TableError::RowOutOfRange { .. })
        ));
        assert!(matches!(
            LinkList::new(&targets, 0, 0),
            Err(TableError::NotALinkColumn { .. })
        ));
    }
}
