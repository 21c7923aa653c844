/// Sequence storage shared by table columns and view row mappings.
///
/// A Sequence is the lowest-level growable array in the crate. It owns its
/// memory outright and knows nothing about column encodings, so a view's row
/// mapping can use the same abstraction as the table columns without
/// borrowing any of the table's storage.
///
/// Two implementations:
/// - ArraySequence: contiguous array, O(1) access, O(N) insert/delete
/// - TieredVectorSequence: sqrt decomposition, O(log √N) access, O(√N) insert/delete

use crate::error::{Result, TableError};
use crate::table::StorageHint;
use std::fmt::Debug;

/// Trait for sequence storage operations
pub trait Sequence<T: Clone>: Debug {
    /// Return the number of elements in the sequence
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get value at index (0-based) - clones the value
    fn get(&self, index: usize) -> Result<T>;

    /// Get reference to value at index (0-based) - no clone
    fn get_ref(&self, index: usize) -> Option<&T>;

    fn set(&mut self, index: usize, value: T) -> Result<()>;

    /// Insert value at index, shifting subsequent elements
    fn insert(&mut self, index: usize, value: T) -> Result<()>;

    /// Delete and return value at index
    fn delete(&mut self, index: usize) -> Result<T>;

    fn append(&mut self, value: T);

    fn clear(&mut self);

    /// Visit every element in order with mutable access.
    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut T));

    fn iter(&self) -> Box<dyn Iterator<Item = T> + '_>;

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn Sequence<T>>;

    /// Replace the whole content, keeping the storage strategy.
    fn replace_all(&mut self, values: Vec<T>) {
        self.clear();
        for value in values {
            self.append(value);
        }
    }

    fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

/// Build an empty sequence with the storage strategy selected by `hint`.
pub fn new_sequence<T: Clone + Debug + 'static>(hint: StorageHint) -> Box<dyn Sequence<T>> {
    if hint.use_tiered_vector() {
        Box::new(TieredVectorSequence::new())
    } else {
        Box::new(ArraySequence::new())
    }
}

/// Simple contiguous array implementation.
/// - O(1) random access
/// - O(N) insert/delete (worst case)
/// - Optimal cache locality
#[derive(Debug, Clone)]
pub struct ArraySequence<T: Clone> {
    data: Vec<T>,
}

impl<T: Clone> ArraySequence<T> {
    pub fn new() -> Self {
        ArraySequence { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ArraySequence {
            data: Vec::with_capacity(capacity),
        }
    }
}

impl<T: Clone> Default for ArraySequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Debug + 'static> Sequence<T> for ArraySequence<T> {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn get(&self, index: usize) -> Result<T> {
        self.data.get(index).cloned().ok_or(TableError::RowOutOfRange {
            row: index,
            len: self.data.len(),
        })
    }

    fn get_ref(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    fn set(&mut self, index: usize, value: T) -> Result<()> {
        let len = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(TableError::RowOutOfRange { row: index, len })?;
        *slot = value;
        Ok(())
    }

    fn insert(&mut self, index: usize, value: T) -> Result<()> {
        if index > self.data.len() {
            return Err(TableError::InsertOutOfRange {
                index,
                len: self.data.len(),
            });
        }
        self.data.insert(index, value);
        Ok(())
    }

    fn delete(&mut self, index: usize) -> Result<T> {
        if index >= self.data.len() {
            return Err(TableError::RowOutOfRange {
                row: index,
                len: self.data.len(),
            });
        }
        Ok(self.data.remove(index))
    }

    fn append(&mut self, value: T) {
        self.data.push(value);
    }

    fn clear(&mut self) {
        self.data.clear();
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut T)) {
        self.data.iter_mut().for_each(|v| f(v));
    }

    fn iter(&self) -> Box<dyn Iterator<Item = T> + '_> {
        Box::new(self.data.iter().cloned())
    }

    fn clone_box(&self) -> Box<dyn Sequence<T>> {
        Box::new(self.clone())
    }

    fn replace_all(&mut self, values: Vec<T>) {
        self.data = values;
    }

    fn to_vec(&self) -> Vec<T> {
        self.data.clone()
    }
}

/// Tiered Vector implementation using sqrt decomposition.
///
/// - `blocks`: vector of blocks, each holding roughly √N elements
/// - `block_starts`: block_starts[i] is the global index where block i begins,
///   searched with binary search on access
/// - blocks split above 2√N elements and merge below √N/4
#[derive(Debug, Clone)]
pub struct TieredVectorSequence<T: Clone> {
    blocks: Vec<Vec<T>>,
    block_starts: Vec<usize>,
    size: usize,
}

impl<T: Clone> TieredVectorSequence<T> {
    /// Minimum block size to prevent excessive fragmentation
    const MIN_BLOCK_SIZE: usize = 16;
    /// Maximum block size to bound worst-case insert/delete
    const MAX_BLOCK_SIZE: usize = 4096;

    pub fn new() -> Self {
        TieredVectorSequence {
            blocks: Vec::new(),
            block_starts: Vec::new(),
            size: 0,
        }
    }

    fn ideal_block_size(&self) -> usize {
        if self.size == 0 {
            return Self::MIN_BLOCK_SIZE;
        }
        let sqrt = (self.size as f64).sqrt() as usize;
        sqrt.clamp(Self::MIN_BLOCK_SIZE, Self::MAX_BLOCK_SIZE)
    }

    /// Returns (block_index, offset_within_block).
    fn find_block(&self, index: usize) -> Result<(usize, usize)> {
        if index >= self.size || self.blocks.is_empty() {
            return Err(TableError::RowOutOfRange {
                row: index,
                len: self.size,
            });
        }

        // Rightmost block where block_starts[i] <= index
        let block_idx = match self.block_starts.binary_search(&index) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };

        let offset = index - self.block_starts[block_idx];
        debug_assert!(
            offset < self.blocks[block_idx].len(),
            "Offset {} >= block len {} for index {}",
            offset,
            self.blocks[block_idx].len(),
            index
        );

        Ok((block_idx, offset))
    }

    fn update_block_starts_after(&mut self, block_idx: usize, delta: isize) {
        for start in self.block_starts.iter_mut().skip(block_idx + 1) {
            *start = (*start as isize + delta) as usize;
        }
    }

    fn maybe_split_block(&mut self, block_idx: usize) {
        let threshold = 2 * self.ideal_block_size();
        if self.blocks[block_idx].len() <= threshold {
            return;
        }

        let mid = self.blocks[block_idx].len() / 2;
        let new_block = self.blocks[block_idx].split_off(mid);
        let new_block_start = self.block_starts[block_idx] + self.blocks[block_idx].len();

        self.blocks.insert(block_idx + 1, new_block);
        self.block_starts.insert(block_idx + 1, new_block_start);
    }

    fn maybe_merge_block(&mut self, block_idx: usize) {
        if self.blocks.len() <= 1 || self.blocks[block_idx].is_empty() {
            return;
        }

        let ideal = self.ideal_block_size();
        if self.blocks[block_idx].len() >= ideal / 4 {
            return;
        }

        // Prefer the smaller neighbor
        let has_next = block_idx + 1 < self.blocks.len();
        let merge_with_next = has_next
            && (block_idx == 0
                || self.blocks[block_idx + 1].len() <= self.blocks[block_idx - 1].len());

        if merge_with_next {
            let combined = self.blocks[block_idx].len() + self.blocks[block_idx + 1].len();
            if combined <= 2 * ideal {
                let next_block = self.blocks.remove(block_idx + 1);
                self.block_starts.remove(block_idx + 1);
                self.blocks[block_idx].extend(next_block);
                return;
            }
        }

        if block_idx > 0 {
            let combined = self.blocks[block_idx - 1].len() + self.blocks[block_idx].len();
            if combined <= 2 * ideal {
                let current_block = self.blocks.remove(block_idx);
                self.block_starts.remove(block_idx);
                self.blocks[block_idx - 1].extend(current_block);
            }
        }
    }

    /// Lay `values` out in evenly sized blocks. O(N).
    fn rebuild_from(&mut self, values: Vec<T>) {
        self.blocks.clear();
        self.block_starts.clear();
        self.size = values.len();
        if values.is_empty() {
            return;
        }

        let block_size = self.ideal_block_size();
        let mut start = 0;
        let mut rest = values;
        while !rest.is_empty() {
            let tail = if rest.len() > block_size {
                rest.split_off(block_size)
            } else {
                Vec::new()
            };
            let len = rest.len();
            self.blocks.push(rest);
            self.block_starts.push(start);
            start += len;
            rest = tail;
        }
    }

    /// Rebalance all blocks to roughly equal size. O(N).
    pub fn rebalance(&mut self) {
        let all: Vec<T> = self.blocks.iter().flat_map(|b| b.iter().cloned()).collect();
        self.rebuild_from(all);
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl<T: Clone> Default for TieredVectorSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Debug + 'static> Sequence<T> for TieredVectorSequence<T> {
    fn len(&self) -> usize {
        self.size
    }

    fn get(&self, index: usize) -> Result<T> {
        let (block_idx, offset) = self.find_block(index)?;
        Ok(self.blocks[block_idx][offset].clone())
    }

    fn get_ref(&self, index: usize) -> Option<&T> {
        self.find_block(index)
            .ok()
            .map(|(block_idx, offset)| &self.blocks[block_idx][offset])
    }

    fn set(&mut self, index: usize, value: T) -> Result<()> {
        let (block_idx, offset) = self.find_block(index)?;
        self.blocks[block_idx][offset] = value;
        Ok(())
    }

    fn insert(&mut self, index: usize, value: T) -> Result<()> {
        if index > self.size {
            return Err(TableError::InsertOutOfRange {
                index,
                len: self.size,
            });
        }

        if index == self.size {
            self.append(value);
            return Ok(());
        }

        let (block_idx, offset) = self.find_block(index)?;
        self.blocks[block_idx].insert(offset, value);
        self.size += 1;
        self.update_block_starts_after(block_idx, 1);
        self.maybe_split_block(block_idx);

        Ok(())
    }

    fn delete(&mut self, index: usize) -> Result<T> {
        let (block_idx, offset) = self.find_block(index)?;

        let value = self.blocks[block_idx].remove(offset);
        self.size -= 1;
        self.update_block_starts_after(block_idx, -1);

        if self.blocks[block_idx].is_empty() {
            self.blocks.remove(block_idx);
            self.block_starts.remove(block_idx);
        } else {
            self.maybe_merge_block(block_idx);
        }

        Ok(value)
    }

    fn append(&mut self, value: T) {
        if self.blocks.is_empty() {
            self.blocks.push(vec![value]);
            self.block_starts.push(0);
            self.size = 1;
            return;
        }

        let last_block_idx = self.blocks.len() - 1;
        self.blocks[last_block_idx].push(value);
        self.size += 1;
        self.maybe_split_block(last_block_idx);
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.block_starts.clear();
        self.size = 0;
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut T)) {
        for block in self.blocks.iter_mut() {
            block.iter_mut().for_each(|v| f(v));
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = T> + '_> {
        Box::new(self.blocks.iter().flat_map(|b| b.iter().cloned()))
    }

    fn clone_box(&self) -> Box<dyn Sequence<T>> {
        Box::new(self.clone())
    }

    fn replace_all(&mut self, values: Vec<T>) {
        self.rebuild_from(values);
    }
}
