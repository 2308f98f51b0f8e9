//! Published log state.

use crate::block_set::BlockSet;
use crate::cache::Page;
use std::sync::Arc;

/// Immutable state of the log as of the last ended write session.
///
/// A tip carries a private copy of the partially filled high page, so the
/// page cache only ever holds complete pages.
#[derive(Debug, Clone)]
pub(crate) struct LogTip {
    pub(crate) blocks: BlockSet,
    pub(crate) high_address: u64,
    pub(crate) high_page_address: u64,
    pub(crate) high_page: Page,
    pub(crate) high_page_len: usize,
}

impl LogTip {
    pub(crate) fn empty(file_length_bound: u64) -> Self {
        Self {
            blocks: BlockSet::new(file_length_bound),
            high_address: 0,
            high_page_address: 0,
            high_page: Arc::from(Vec::new()),
            high_page_len: 0,
        }
    }

    /// Returns the high page if `page_address` names it and it holds data.
    pub(crate) fn partial_page(&self, page_address: u64) -> Option<&Page> {
        (self.high_page_len > 0 && page_address == self.high_page_address)
            .then_some(&self.high_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tip_has_no_partial_page() {
        let tip = LogTip::empty(4096);
        assert_eq!(tip.high_address, 0);
        assert!(tip.partial_page(0).is_none());
    }

    #[test]
    fn partial_page_lookup() {
        let tip = LogTip {
            high_address: 1030,
            high_page_address: 1024,
            high_page: Arc::from(vec![1u8; 1024]),
            high_page_len: 6,
            ..LogTip::empty(4096)
        };
        assert!(tip.partial_page(1024).is_some());
        assert!(tip.partial_page(0).is_none());
    }
}
