//! Immutable and mutable views of the files of a log.
//!
//! A [`BlockSet`] is a snapshot: readers hold one for as long as they like
//! while the writer builds the next one through [`MutableBlockSet`].

use pagelog_storage::{Block, EmptyBlock};
use std::collections::BTreeMap;
use std::sync::Arc;

type BlockMap = BTreeMap<u64, Arc<dyn Block>>;

/// Snapshot of the blocks of a log, ordered by address.
#[derive(Debug, Clone)]
pub struct BlockSet {
    file_length_bound: u64,
    blocks: Arc<BlockMap>,
}

impl BlockSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new(file_length_bound: u64) -> Self {
        Self {
            file_length_bound,
            blocks: Arc::new(BTreeMap::new()),
        }
    }

    /// Creates a set from existing blocks.
    pub fn from_blocks(
        file_length_bound: u64,
        blocks: impl IntoIterator<Item = Arc<dyn Block>>,
    ) -> Self {
        let blocks = blocks.into_iter().map(|b| (b.address(), b)).collect();
        Self {
            file_length_bound,
            blocks: Arc::new(blocks),
        }
    }

    /// Returns the block at `address`, or an empty placeholder block.
    #[must_use]
    pub fn get(&self, address: u64) -> Arc<dyn Block> {
        self.find(address)
            .cloned()
            .unwrap_or_else(|| Arc::new(EmptyBlock::new(address)))
    }

    /// Returns the block at `address`, if present.
    #[must_use]
    pub fn find(&self, address: u64) -> Option<&Arc<dyn Block>> {
        self.blocks.get(&address)
    }

    /// Returns `true` if a block starts at `address`.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        self.blocks.contains_key(&address)
    }

    /// Address of the oldest block.
    #[must_use]
    pub fn minimum(&self) -> Option<u64> {
        self.blocks.keys().next().copied()
    }

    /// Address of the newest block.
    #[must_use]
    pub fn maximum(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if there are no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// File length of the log.
    #[must_use]
    pub fn file_length_bound(&self) -> u64 {
        self.file_length_bound
    }

    /// Block addresses in ascending order.
    pub fn addresses(&self) -> impl DoubleEndedIterator<Item = u64> + '_ {
        self.blocks.keys().copied()
    }

    /// Blocks at or after `address`, in ascending order.
    pub fn iter_from(&self, address: u64) -> impl Iterator<Item = &Arc<dyn Block>> + '_ {
        self.blocks.range(address..).map(|(_, b)| b)
    }

    /// Starts a mutable copy of this set.
    #[must_use]
    pub fn begin_write(&self) -> MutableBlockSet {
        MutableBlockSet {
            file_length_bound: self.file_length_bound,
            blocks: (*self.blocks).clone(),
        }
    }
}

/// Writer-side copy of a [`BlockSet`].
#[derive(Debug)]
pub struct MutableBlockSet {
    file_length_bound: u64,
    blocks: BlockMap,
}

impl MutableBlockSet {
    /// Adds a block, replacing any block at the same address.
    pub fn add(&mut self, block: Arc<dyn Block>) {
        debug_assert_eq!(block.address() % self.file_length_bound, 0);
        self.blocks.insert(block.address(), block);
    }

    /// Removes the block at `address`.
    pub fn remove(&mut self, address: u64) -> Option<Arc<dyn Block>> {
        self.blocks.remove(&address)
    }

    /// Removes every block.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Returns the block at `address`, if present.
    #[must_use]
    pub fn get(&self, address: u64) -> Option<&Arc<dyn Block>> {
        self.blocks.get(&address)
    }

    /// Returns `true` if a block starts at `address`.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        self.blocks.contains_key(&address)
    }

    /// Address of the newest block.
    #[must_use]
    pub fn maximum(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }

    /// Freezes the changes into a new snapshot.
    #[must_use]
    pub fn end_write(self) -> BlockSet {
        BlockSet {
            file_length_bound: self.file_length_bound,
            blocks: Arc::new(self.blocks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelog_storage::{BlockStore, InMemoryBlockStore};

    #[test]
    fn empty_set() {
        let set = BlockSet::new(4096);
        assert!(set.is_empty());
        assert_eq!(set.minimum(), None);
        assert_eq!(set.maximum(), None);
        assert_eq!(set.get(0).length(), 0);
    }

    #[test]
    fn mutation_does_not_affect_snapshot() {
        let store = InMemoryBlockStore::new();
        let set = BlockSet::new(4096);

        let mut mutable = set.begin_write();
        mutable.add(store.create_block(0).unwrap());
        mutable.add(store.create_block(4096).unwrap());
        let next = mutable.end_write();

        assert!(set.is_empty());
        assert_eq!(next.len(), 2);
        assert_eq!(next.minimum(), Some(0));
        assert_eq!(next.maximum(), Some(4096));

        let mut mutable = next.begin_write();
        assert!(mutable.remove(0).is_some());
        let last = mutable.end_write();

        assert!(next.contains(0));
        assert!(!last.contains(0));
    }

    #[test]
    fn iter_from_is_ordered() {
        let store = InMemoryBlockStore::new();
        let set = BlockSet::from_blocks(
            4096,
            [8192, 0, 4096].map(|a| store.create_block(a).unwrap()),
        );
        let from: Vec<u64> = set.iter_from(1).map(|b| b.address()).collect();
        assert_eq!(from, vec![4096, 8192]);
        let all: Vec<u64> = set.addresses().rev().collect();
        assert_eq!(all, vec![8192, 4096, 0]);
    }

    #[test]
    fn clear_mutable() {
        let store = InMemoryBlockStore::new();
        let set = BlockSet::from_blocks(4096, [store.create_block(0).unwrap()]);
        let mut mutable = set.begin_write();
        assert!(mutable.get(0).is_some());
        mutable.clear();
        assert_eq!(mutable.maximum(), None);
        assert!(mutable.end_write().is_empty());
    }
}
