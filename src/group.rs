//! A set of related tables: one execution context.
//!
//! Tables added to a group get a `TableKey` that stays valid across
//! snapshots of the group, which is what handover patches refer to.

use crate::table::{Table, TableKey, TableRef};
use log::debug;

#[derive(Debug, Default)]
pub struct Group {
    tables: Vec<TableRef>,
    next_key: u32,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, assigning it the next key.
    pub fn add_table(&mut self, mut table: Table) -> TableRef {
        let key = TableKey(self.next_key);
        self.next_key += 1;
        table.set_key(key);
        let table = table.into_ref();
        self.tables.push(table.clone());
        table
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.iter()
    }

    pub fn table(&self, name: &str) -> Option<TableRef> {
        self.tables
            .iter()
            .find(|t| t.borrow().name() == name)
            .cloned()
    }

    pub fn table_by_key(&self, key: TableKey) -> Option<TableRef> {
        self.tables
            .iter()
            .find(|t| t.borrow().key() == Some(key))
            .cloned()
    }

    /// Independent deep copy pinned at the current versions: same keys, same
    /// data, links re-established between the copied tables. Registered views
    /// and link lists are not copied.
    pub fn snapshot(&self) -> Group {
        let tables: Vec<TableRef> = self
            .tables
            .iter()
            .map(|t| t.borrow().copy_unlinked().into_ref())
            .collect();
        let copy = Group {
            tables,
            next_key: self.next_key,
        };
        for (original, copied) in self.tables.iter().zip(&copy.tables) {
            let linked = original.borrow().linked_columns();
            for (col, target) in linked {
                let target_key = target.borrow().key();
                // Links leaving the group are dropped
                if let Some(copied_target) = target_key.and_then(|key| copy.table_by_key(key)) {
                    Table::link_column(copied, col, &copied_target);
                }
            }
        }
        debug!("snapshot of {} tables", copy.len());
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnType, ColumnValue};
    use crate::table::Schema;
    use std::collections::HashMap;

    fn group_with_link() -> Group {
        let mut group = Group::new();
        let people = group.add_table(Table::new(
            "people".to_string(),
            Schema::new(vec![("name".to_string(), ColumnType::String, false)]),
        ));
        let pets = group.add_table(Table::new(
            "pets".to_string(),
            Schema::new(vec![("owner".to_string(), ColumnType::Link, true)]),
        ));
        Table::link(&pets, "owner", &people).unwrap();
        for name in ["Ann", "Bob"] {
            let mut row = HashMap::new();
            row.insert("name".to_string(), ColumnValue::String(name.to_string()));
            people.borrow_mut().append_row(row).unwrap();
        }
        let mut row = HashMap::new();
        row.insert("owner".to_string(), ColumnValue::Link(1));
        pets.borrow_mut().append_row(row).unwrap();
        group
    }

    #[test]
    fn test_keys_and_lookup() {
        let group = group_with_link();
        assert_eq!(group.len(), 2);
        let pets = group.table("pets").unwrap();
        assert_eq!(pets.borrow().key(), Some(TableKey(1)));
        assert!(group.table_by_key(TableKey(0)).is_some());
        assert!(group.table("nothing").is_none());
    }

    #[test]
    fn test_snapshot_is_independent_and_relinked() {
        let group = group_with_link();
        let copy = group.snapshot();
        let people = group.table("people").unwrap();
        let copied_people = copy.table("people").unwrap();
        assert_eq!(people.borrow().version(), copied_people.borrow().version());

        // Erasing in the copy adjusts the copy's links only
        copied_people.borrow_mut().erase_row(0).unwrap();
        let copied_pets = copy.table("pets").unwrap();
        assert_eq!(
            copied_pets.borrow().get_value(0, "owner").unwrap(),
            ColumnValue::Link(0)
        );
        let pets = group.table("pets").unwrap();
        assert_eq!(pets.borrow().get_value(0, "owner").unwrap(), ColumnValue::Link(1));
        assert_eq!(people.borrow().len(), 2);
    }
}
