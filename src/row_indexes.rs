//! Row index mapping owned by a view.
//!
//! A `RowIndexes` is the ordered list of source rows a view presents. Each
//! slot either references a row of the source table or is `Detached` because
//! the row it referenced was erased (or overwritten by a move). Detaching a
//! slot never shrinks the mapping; only explicit view operations and full
//! re-evaluation change its length.

use crate::changeset::{ChangeAdjuster, IndexAdjuster};
use crate::sequence::{new_sequence, Sequence};
use crate::table::StorageHint;
use serde::{Deserialize, Serialize};

/// One position of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowSlot {
    Attached(usize),
    Detached,
}

impl RowSlot {
    pub fn is_attached(&self) -> bool {
        matches!(self, RowSlot::Attached(_))
    }

    /// Source row index, None when detached.
    pub fn index(&self) -> Option<usize> {
        match self {
            RowSlot::Attached(ndx) => Some(*ndx),
            RowSlot::Detached => None,
        }
    }
}

#[derive(Debug)]
pub struct RowIndexes {
    slots: Box<dyn Sequence<RowSlot>>,
    num_detached: usize,
    hint: StorageHint,
}

impl RowIndexes {
    pub fn new(hint: StorageHint) -> Self {
        RowIndexes {
            slots: new_sequence(hint),
            num_detached: 0,
            hint,
        }
    }

    pub fn from_rows(hint: StorageHint, rows: impl IntoIterator<Item = usize>) -> Self {
        let mut indexes = Self::new(hint);
        indexes.assign(rows);
        indexes
    }

    pub fn hint(&self) -> StorageHint {
        self.hint
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<RowSlot> {
        self.slots.get_ref(pos).copied()
    }

    pub fn is_row_attached(&self, pos: usize) -> bool {
        self.get(pos).is_some_and(|slot| slot.is_attached())
    }

    pub fn num_attached_rows(&self) -> usize {
        self.len() - self.num_detached
    }

    pub fn num_detached(&self) -> usize {
        self.num_detached
    }

    /// Position of the first slot referencing `source`.
    pub fn find_by_source_ndx(&self, source: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot == RowSlot::Attached(source))
    }

    /// Positions of all slots matching `predicate`, in order.
    pub fn find_all_of(&self, mut predicate: impl FnMut(RowSlot) -> bool) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| predicate(*slot))
            .map(|(pos, _)| pos)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = RowSlot> + '_ {
        self.slots.iter()
    }

    pub fn to_vec(&self) -> Vec<RowSlot> {
        self.slots.to_vec()
    }

    /// Remove the slot at `pos`, returning it. None if out of range.
    pub fn remove(&mut self, pos: usize) -> Option<RowSlot> {
        let slot = self.slots.delete(pos).ok()?;
        if !slot.is_attached() {
            self.num_detached -= 1;
        }
        Some(slot)
    }

    /// Mark the slot at `pos` detached. Returns false if out of range.
    pub fn detach(&mut self, pos: usize) -> bool {
        match self.get(pos) {
            Some(RowSlot::Attached(_)) => {
                self.num_detached += 1;
                self.slots.set(pos, RowSlot::Detached).is_ok()
            }
            Some(RowSlot::Detached) => true,
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.num_detached = 0;
    }

    /// Replace the whole mapping with attached rows.
    pub fn assign(&mut self, rows: impl IntoIterator<Item = usize>) {
        self.slots
            .replace_all(rows.into_iter().map(RowSlot::Attached).collect());
        self.num_detached = 0;
    }

    /// Replace the whole mapping with arbitrary slots, preserving order.
    pub fn assign_slots(&mut self, slots: Vec<RowSlot>) {
        self.num_detached = slots.iter().filter(|s| !s.is_attached()).count();
        self.slots.replace_all(slots);
    }

    /// Move the content out, leaving this mapping empty.
    pub fn take(&mut self) -> RowIndexes {
        RowIndexes {
            slots: std::mem::replace(&mut self.slots, new_sequence(self.hint)),
            num_detached: std::mem::take(&mut self.num_detached),
            hint: self.hint,
        }
    }

    fn adjust_each(&mut self, mut f: impl FnMut(usize) -> Option<usize>) {
        let mut newly_detached = 0;
        self.slots.for_each_mut(&mut |slot| {
            if let RowSlot::Attached(ndx) = *slot {
                match f(ndx) {
                    Some(adjusted) => *slot = RowSlot::Attached(adjusted),
                    None => {
                        *slot = RowSlot::Detached;
                        newly_detached += 1;
                    }
                }
            }
        });
        self.num_detached += newly_detached;
    }
}

impl Clone for RowIndexes {
    fn clone(&self) -> Self {
        RowIndexes {
            slots: self.slots.clone_box(),
            num_detached: self.num_detached,
            hint: self.hint,
        }
    }
}

impl ChangeAdjuster for RowIndexes {
    /// Rows inserted into the table shift later references; the mapping never
    /// grows.
    fn adj_insert_rows(&mut self, at: usize, count: usize) {
        self.adjust_each(|ndx| Some(IndexAdjuster::adjust_for_insert(ndx, at, count)));
    }

    fn adj_erase_row(&mut self, at: usize) {
        self.adjust_each(|ndx| IndexAdjuster::adjust_for_erase(ndx, at));
    }

    fn adj_move_over(&mut self, from: usize, to: usize) {
        self.adjust_each(|ndx| IndexAdjuster::adjust_for_move_over(ndx, from, to));
    }

    fn adj_clear(&mut self) {
        self.adjust_each(|_| None);
    }
}
