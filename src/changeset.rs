/// Changeset - structural change propagation from tables to row accessors
///
/// Every structural mutation of a table (insert, erase, move-over, clear) is
/// described by a `RowChange` and broadcast, inline and in registration order,
/// to every accessor registered on that table. Accessors are anything that
/// remembers row indices into the table: view row mappings and link-list
/// anchors. Each accessor rewrites its stored indices so they keep pointing
/// at the same logical rows, without re-running whatever produced them.
///
/// # Change Types
///
/// - `Inserted`: `count` rows were inserted before row `at`
/// - `Erased`: row `at` was removed, later rows shift down by one
/// - `MovedOver`: row `from` was moved on top of row `to` (swap-removal)
/// - `Cleared`: every row was removed
///
/// The registry holds weak references only. It never keeps an accessor alive,
/// and dead entries are pruned on the next broadcast.

use std::cell::RefCell;
use std::rc::Weak;

/// A single structural change to a table's row space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    Inserted { at: usize, count: usize },
    Erased { at: usize },
    MovedOver { from: usize, to: usize },
    Cleared,
}

/// Pure index arithmetic for the change types.
///
/// `None` means the referenced row no longer exists.
pub struct IndexAdjuster;

impl IndexAdjuster {
    pub fn adjust_for_insert(ndx: usize, at: usize, count: usize) -> usize {
        if ndx >= at {
            ndx + count
        } else {
            ndx
        }
    }

    pub fn adjust_for_erase(ndx: usize, at: usize) -> Option<usize> {
        if ndx == at {
            None
        } else if ndx > at {
            Some(ndx - 1)
        } else {
            Some(ndx)
        }
    }

    pub fn adjust_for_move_over(ndx: usize, from: usize, to: usize) -> Option<usize> {
        if ndx == to {
            None
        } else if ndx == from {
            Some(to)
        } else {
            Some(ndx)
        }
    }

    pub fn adjust(ndx: usize, change: &RowChange) -> Option<usize> {
        match *change {
            RowChange::Inserted { at, count } => Some(Self::adjust_for_insert(ndx, at, count)),
            RowChange::Erased { at } => Self::adjust_for_erase(ndx, at),
            RowChange::MovedOver { from, to } => Self::adjust_for_move_over(ndx, from, to),
            RowChange::Cleared => None,
        }
    }
}

/// Implemented by everything that stores row indices into a table and must
/// follow that table's structural mutations.
pub trait ChangeAdjuster {
    fn adj_insert_rows(&mut self, at: usize, count: usize);

    fn adj_erase_row(&mut self, at: usize);

    fn adj_move_over(&mut self, from: usize, to: usize);

    fn adj_clear(&mut self);

    fn apply_change(&mut self, change: &RowChange) {
        match *change {
            RowChange::Inserted { at, count } => self.adj_insert_rows(at, count),
            RowChange::Erased { at } => self.adj_erase_row(at),
            RowChange::MovedOver { from, to } => self.adj_move_over(from, to),
            RowChange::Cleared => self.adj_clear(),
        }
    }
}

/// Identifies one registration in a table's accessor registry.
pub type AccessorId = u64;

/// Weak registry of accessors, owned by a table.
#[derive(Default)]
pub struct AccessorRegistry {
    entries: Vec<(AccessorId, Weak<RefCell<dyn ChangeAdjuster>>)>,
    next_id: AccessorId,
}

impl AccessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, accessor: Weak<RefCell<dyn ChangeAdjuster>>) -> AccessorId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, accessor));
        id
    }

    /// Returns false if `id` was not registered (already removed or pruned).
    pub fn unregister(&mut self, id: AccessorId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|(_, w)| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `change` to every live accessor, pruning dead ones.
    ///
    /// Panics if an accessor is currently borrowed; a table must not be
    /// mutated from inside an accessor callback.
    pub fn broadcast(&mut self, change: &RowChange) {
        self.entries.retain(|(_, w)| w.strong_count() > 0);
        log::trace!("broadcasting {:?} to {} accessor(s)", change, self.entries.len());
        for (_, accessor) in &self.entries {
            if let Some(accessor) = accessor.upgrade() {
                accessor.borrow_mut().apply_change(change);
            }
        }
    }
}

impl std::fmt::Debug for AccessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorRegistry")
            .field("live", &self.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        rows: Vec<Option<usize>>,
    }

    impl ChangeAdjuster for Recorder {
        fn adj_insert_rows(&mut self, at: usize, count: usize) {
            for row in self.rows.iter_mut().flatten() {
                *row = IndexAdjuster::adjust_for_insert(*row, at, count);
            }
        }

        fn adj_erase_row(&mut self, at: usize) {
            for row in self.rows.iter_mut() {
                *row = row.and_then(|r| IndexAdjuster::adjust_for_erase(r, at));
            }
        }

        fn adj_move_over(&mut self, from: usize, to: usize) {
            for row in self.rows.iter_mut() {
                *row = row.and_then(|r| IndexAdjuster::adjust_for_move_over(r, from, to));
            }
        }

        fn adj_clear(&mut self) {
            self.rows.iter_mut().for_each(|r| *r = None);
        }
    }

    #[test]
    fn test_index_adjuster_insert() {
        // Insert 2 rows at index 2
        assert_eq!(IndexAdjuster::adjust_for_insert(0, 2, 2), 0);
        assert_eq!(IndexAdjuster::adjust_for_insert(1, 2, 2), 1);
        assert_eq!(IndexAdjuster::adjust_for_insert(2, 2, 2), 4);
        assert_eq!(IndexAdjuster::adjust_for_insert(3, 2, 2), 5);
    }

    #[test]
    fn test_index_adjuster_erase() {
        assert_eq!(IndexAdjuster::adjust_for_erase(0, 2), Some(0));
        assert_eq!(IndexAdjuster::adjust_for_erase(1, 2), Some(1));
        assert_eq!(IndexAdjuster::adjust_for_erase(2, 2), None);
        assert_eq!(IndexAdjuster::adjust_for_erase(3, 2), Some(2));
    }

    #[test]
    fn test_index_adjuster_move_over() {
        // Last row 4 moved over row 1
        assert_eq!(IndexAdjuster::adjust_for_move_over(1, 4, 1), None);
        assert_eq!(IndexAdjuster::adjust_for_move_over(4, 4, 1), Some(1));
        assert_eq!(IndexAdjuster::adjust_for_move_over(2, 4, 1), Some(2));
        assert_eq!(IndexAdjuster::adjust(2, &RowChange::Cleared), None);
    }

    #[test]
    fn test_registry_broadcast_and_prune() {
        let mut registry = AccessorRegistry::new();

        let kept = Rc::new(RefCell::new(Recorder {
            rows: vec![Some(0), Some(3)],
        }));
        let dropped = Rc::new(RefCell::new(Recorder::default()));

        let kept_dyn: Rc<RefCell<dyn ChangeAdjuster>> = kept.clone();
        let dropped_dyn: Rc<RefCell<dyn ChangeAdjuster>> = dropped.clone();
        let kept_id = registry.register(Rc::downgrade(&kept_dyn));
        registry.register(Rc::downgrade(&dropped_dyn));
        assert_eq!(registry.len(), 2);

        drop(dropped_dyn);
        drop(dropped);
        assert_eq!(registry.len(), 1);

        registry.broadcast(&RowChange::Erased { at: 0 });
        assert_eq!(kept.borrow().rows, vec![None, Some(2)]);

        assert!(registry.unregister(kept_id));
        assert!(!registry.unregister(kept_id));
        registry.broadcast(&RowChange::Cleared);
        assert_eq!(kept.borrow().rows, vec![None, Some(2)]);
    }
}
