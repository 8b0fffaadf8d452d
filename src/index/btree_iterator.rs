use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::NodeView;

/// Forward iterator over the B+Tree's leaf chain, yielding owned
/// `(key, RecordId)` pairs in key order. Each step pins the current leaf
/// only for the duration of the read.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    key_size: usize,
    current_page_id: PageId,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        key_size: usize,
        start_page_id: PageId,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            key_size,
            current_page_id: start_page_id,
            index,
        }
    }

    /// An iterator that is already exhausted (empty tree).
    pub(crate) fn finished(bpm: Arc<BufferPoolManager>, key_size: usize) -> Self {
        Self::new(bpm, key_size, INVALID_PAGE_ID, 0)
    }

    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, RecordId)>> {
        loop {
            if self.current_page_id == INVALID_PAGE_ID {
                return Ok(None);
            }

            let (entry, next_page_id) = {
                let guard = self.bpm.read_page(self.current_page_id)?;
                let node = NodeView::new(guard.data(), self.key_size);
                if self.index < node.size() {
                    (
                        Some((node.key_at(self.index).to_vec(), node.rid_at(self.index))),
                        self.current_page_id,
                    )
                } else {
                    (None, node.next_page_id())
                }
            };

            match entry {
                Some(entry) => {
                    self.index += 1;
                    return Ok(Some(entry));
                }
                None => {
                    self.current_page_id = next_page_id;
                    self.index = 0;
                }
            }
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
