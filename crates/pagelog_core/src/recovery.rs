//! Log consistency checks at open.
//!
//! A cleanly closed log only gets a cheap structural check. Otherwise every
//! page is verified: files before the last one must be complete and intact,
//! while the log is cut back to the end of the last valid hash loggable,
//! which marks the end of the last finished write session. A last file
//! without one is removed and the cut continues in the file before it.
//! Logs without checksums keep their readable prefix.

use crate::block_set::BlockSet;
use crate::error::{LogError, LogResult};
use crate::geometry::LogGeometry;
use crate::iterator::BlockDataIterator;
use crate::page::PagePipeline;
use pagelog_storage::{Block, BlockStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Files and high address of a log found on storage.
#[derive(Debug)]
pub(crate) struct LogExtent {
    pub(crate) blocks: BlockSet,
    pub(crate) high_address: u64,
}

impl LogExtent {
    pub(crate) fn empty(file_length_bound: u64) -> Self {
        Self {
            blocks: BlockSet::new(file_length_bound),
            high_address: 0,
        }
    }
}

fn open_all(store: &dyn BlockStore, geometry: &LogGeometry) -> LogResult<Vec<Arc<dyn Block>>> {
    let mut blocks = Vec::new();
    for address in store.list_blocks()? {
        if address % geometry.file_length_bound() != 0 {
            return Err(LogError::corruption(format!(
                "log file at {address} is not aligned to the file length {}",
                geometry.file_length_bound()
            )));
        }
        blocks.push(store.open_block(address)?);
    }
    Ok(blocks)
}

fn extent_of(blocks: Vec<Arc<dyn Block>>, geometry: &LogGeometry) -> LogExtent {
    let high_address = blocks.last().map_or(0, |b| b.address() + b.length());
    LogExtent {
        blocks: BlockSet::from_blocks(geometry.file_length_bound(), blocks),
        high_address,
    }
}

/// Opens the files of a cleanly closed log without reading pages.
///
/// Returns `None` when the layout does not match what a clean close leaves
/// behind, in which case the full check must run.
pub(crate) fn open_clean(
    store: &dyn BlockStore,
    geometry: &LogGeometry,
) -> LogResult<Option<LogExtent>> {
    let blocks = match open_all(store, geometry) {
        Ok(blocks) => blocks,
        Err(err) if err.is_corruption() => {
            warn!(error = %err, "log layout inconsistent");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    let flb = geometry.file_length_bound();

    if let Some((last, rest)) = blocks.split_last() {
        if let Some(short) = rest.iter().find(|b| b.length() != flb) {
            warn!(
                address = short.address(),
                length = short.length(),
                "log file has unexpected length"
            );
            return Ok(None);
        }
        if last.length() > flb {
            warn!(address = last.address(), length = last.length(), "last log file too long");
            return Ok(None);
        }
        let tail = geometry.page_offset(last.length());
        if tail >= geometry.usable_page_size() {
            warn!(address = last.address(), tail, "last page is torn");
            return Ok(None);
        }
    }
    Ok(Some(extent_of(blocks, geometry)))
}

/// Verifies every page and truncates the last file to its valid prefix.
///
/// # Errors
///
/// Returns [`LogError::DataCorruption`] if a file other than the last one
/// is damaged.
pub(crate) fn check_log_consistency(
    store: &dyn BlockStore,
    pipeline: &PagePipeline,
) -> LogResult<LogExtent> {
    let geometry = *pipeline.geometry();
    let mut blocks = open_all(store, &geometry)?;
    let Some(last) = blocks.pop() else {
        debug!("no log files to check");
        return Ok(LogExtent::empty(geometry.file_length_bound()));
    };

    for block in &blocks {
        check_complete_file(block, pipeline)?;
    }

    let mut last = Some(last);
    while let Some(block) = last.take() {
        let valid = valid_prefix(&block, pipeline)?;
        if valid < geometry.file_length_bound() && block.is_read_only() {
            block.set_writable()?;
        }
        if valid < block.length() {
            warn!(
                address = block.address(),
                length = block.length(),
                valid,
                "truncating unfinished tail of log file"
            );
            block.truncate(valid)?;
        }
        if valid > 0 {
            blocks.push(block);
            break;
        }
        let address = block.address();
        info!(address, "removing log file without a finished session");
        drop(block);
        store.remove_block(address)?;
        if geometry.has_checksums() {
            last = blocks.pop();
        }
    }

    let extent = extent_of(blocks, &geometry);
    info!(
        files = extent.blocks.len(),
        high_address = extent.high_address,
        "log consistency check finished"
    );
    Ok(extent)
}

fn check_complete_file(block: &Arc<dyn Block>, pipeline: &PagePipeline) -> LogResult<()> {
    let flb = pipeline.geometry().file_length_bound();
    if block.length() != flb {
        return Err(LogError::corruption(format!(
            "log file at {} has length {}, expected {flb}",
            block.address(),
            block.length()
        )));
    }
    for page in BlockDataIterator::new(Arc::clone(block), pipeline.clone()) {
        page?;
    }
    Ok(())
}

/// Length of the prefix of `block` ending with a finished session.
///
/// Without checksums this is the readable prefix.
fn valid_prefix(block: &Arc<dyn Block>, pipeline: &PagePipeline) -> LogResult<u64> {
    let geometry = pipeline.geometry();
    let page_size = geometry.page_size();
    let usable = geometry.usable_page_size();
    let flb = geometry.file_length_bound();
    let mut valid = 0u64;

    for page in BlockDataIterator::with_range(Arc::clone(block), pipeline.clone(), 0, flb) {
        let page = match page {
            Ok(page) => page,
            Err(err) if err.is_corruption() => {
                warn!(error = %err, "damaged page in log file");
                break;
            }
            Err(err) => return Err(err),
        };
        let position = page.address - block.address();
        let complete = page.is_complete(page_size);

        if !geometry.has_checksums() {
            valid = position + page.len as u64;
            if complete {
                continue;
            }
            break;
        }

        let data = &page.data[..page.len.min(usable)];
        match pipeline.last_hash_record_end(data) {
            Some(end) if end == usable => {
                if !complete {
                    // The data is complete but the trailer was lost.
                    block.write(position, &pipeline.seal_page(page.address, &page.data))?;
                }
                valid = position + page_size as u64;
            }
            Some(end) => valid = position + end as u64,
            None => {}
        }
        if !complete {
            break;
        }
    }
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loggable::NULL_BYTE;
    use pagelog_storage::InMemoryBlockStore;

    fn pipeline() -> PagePipeline {
        PagePipeline::new(LogGeometry::new(1024, 4096, true).unwrap(), None)
    }

    fn full_file(store: &InMemoryBlockStore, p: &PagePipeline, address: u64) {
        let mut data = Vec::new();
        for page in 0..4 {
            data.extend(p.seal_page(address + page * 1024, &vec![NULL_BYTE; 1024]));
        }
        store.set_block_data(address, data);
    }

    /// A complete page whose data ends with a hash loggable.
    fn hashed_page(p: &PagePipeline, page_address: u64) -> Vec<u8> {
        let mut page = vec![0x81u8; 1016 - 9];
        let record = p.hash_record(&page);
        page.extend_from_slice(&record);
        page.extend_from_slice(&[0u8; 8]);
        p.seal_page(page_address, &page)
    }

    fn hashed_file(store: &InMemoryBlockStore, p: &PagePipeline, address: u64) {
        let mut data = Vec::new();
        for page in 0..4 {
            data.extend(hashed_page(p, address + page * 1024));
        }
        store.set_block_data(address, data);
    }

    fn tail_with_hash(p: &PagePipeline, page_address: u64, payload: usize) -> Vec<u8> {
        let mut page = vec![0x81u8; payload];
        let record = p.hash_record(&page);
        page.extend_from_slice(&record);
        p.seal_range(page_address, &page)
    }

    #[test]
    fn empty_store_is_consistent() {
        let store = InMemoryBlockStore::new();
        let extent = check_log_consistency(&store, &pipeline()).unwrap();
        assert_eq!(extent.high_address, 0);
        assert!(extent.blocks.is_empty());
    }

    #[test]
    fn tail_cut_after_last_hash_record() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        full_file(&store, &p, 0);

        let mut tail = tail_with_hash(&p, 4096, 20);
        tail.extend_from_slice(&[0x82; 7]);
        store.set_block_data(4096, tail);

        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 4096 + 29);
        assert_eq!(store.block_data(4096).unwrap().len(), 29);
    }

    #[test]
    fn damaged_complete_page_truncates_last_file() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        hashed_file(&store, &p, 0);
        let mut data = store.block_data(0).unwrap();
        data[2048 + 5] ^= 0x10;
        store.set_block_data(0, data);

        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 2048);
    }

    #[test]
    fn damaged_earlier_file_is_corruption() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        full_file(&store, &p, 0);
        full_file(&store, &p, 4096);
        let mut data = store.block_data(0).unwrap();
        data[10] ^= 1;
        store.set_block_data(0, data);

        assert!(check_log_consistency(&store, &p).unwrap_err().is_corruption());
    }

    #[test]
    fn tail_without_hash_is_dropped() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        hashed_file(&store, &p, 0);
        store.set_block_data(4096, vec![0x81; 40]);

        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 4096);
        assert!(store.block_data(4096).is_none());
    }

    #[test]
    fn complete_pages_after_last_hash_are_dropped() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        let mut first = vec![0x81u8; 20];
        let record = p.hash_record(&first);
        first.extend_from_slice(&record);
        first.resize(1024, 0x82);
        let mut data = p.seal_page(0, &first);
        data.extend(p.seal_page(1024, &vec![0x82; 1024]));
        data.extend(p.seal_range(2048, &[0x82; 100]));
        store.set_block_data(0, data);

        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 29);
        assert_eq!(store.block_data(0).unwrap().len(), 29);
    }

    #[test]
    fn unfinished_session_spanning_files_is_removed() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        let mut data = hashed_page(&p, 0);
        for page in 1..4 {
            data.extend(p.seal_page(page * 1024, &vec![NULL_BYTE; 1024]));
        }
        store.set_block_data(0, data);
        store.set_block_data(4096, p.seal_range(4096, &[0x81; 40]));

        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 1024);
        assert_eq!(extent.blocks.len(), 1);
        assert!(store.block_data(4096).is_none());
        assert_eq!(store.block_data(0).unwrap().len(), 1024);
    }

    #[test]
    fn completed_file_cut_back_becomes_writable() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        let mut data = hashed_page(&p, 0);
        for page in 1..4 {
            data.extend(p.seal_page(page * 1024, &vec![NULL_BYTE; 1024]));
        }
        store.set_block_data(0, data);
        store.open_block(0).unwrap().set_read_only().unwrap();

        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 1024);
        assert!(!store.open_block(0).unwrap().is_read_only());
    }

    #[test]
    fn log_without_finished_session_is_emptied() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        full_file(&store, &p, 0);
        full_file(&store, &p, 4096);

        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 0);
        assert!(store.list_blocks().unwrap().is_empty());
    }

    #[test]
    fn lost_trailer_is_restored() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        let sealed = tail_with_hash(&p, 0, 1016 - 9);
        store.set_block_data(0, sealed);

        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 1024);
        let mut raw = store.block_data(0).unwrap();
        assert_eq!(raw.len(), 1024);
        p.open_page(0, &mut raw, 1024).unwrap();
    }

    #[test]
    fn clean_layout_checks() {
        let store = InMemoryBlockStore::new();
        let p = pipeline();
        let geometry = *p.geometry();
        full_file(&store, &p, 0);
        store.set_block_data(4096, vec![0x80; 100]);
        let extent = open_clean(&store, &geometry).unwrap().unwrap();
        assert_eq!(extent.high_address, 4196);

        store.set_block_data(4096, vec![0x80; 1020]);
        assert!(open_clean(&store, &geometry).unwrap().is_none());

        store.set_block_data(0, vec![0x80; 100]);
        assert!(open_clean(&store, &geometry).unwrap().is_none());
    }

    #[test]
    fn legacy_tail_kept() {
        let store = InMemoryBlockStore::new();
        let p = PagePipeline::new(LogGeometry::new(1024, 4096, false).unwrap(), None);
        store.set_block_data(0, vec![0x81; 1500]);
        let extent = check_log_consistency(&store, &p).unwrap();
        assert_eq!(extent.high_address, 1500);
    }
}
