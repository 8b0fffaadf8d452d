use std::sync::Arc;

use tracing::debug;

use crate::buffer::BufferPoolManager;
use crate::common::{
    PageId, RecordId, Result, StrataError, Transaction, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{
    NodeView, NodeViewMut, INTERNAL_VALUE_SIZE, LEAF_VALUE_SIZE, NODE_HEADER_SIZE,
};
use super::{IndexIterator, KeyComparator};

/// Disk-backed B+Tree index over fixed-width opaque keys.
///
/// Nodes live one per page and are fetched through the buffer pool; every
/// page touch goes through a read or write guard, so each fetch is paired
/// with exactly one unpin on every path. Mutations take `&mut self` - the
/// tree does not latch-crab, callers serialize structural changes.
///
/// The current root page id is mirrored into the header page (page 0)
/// under the index name after every root transition, so an index can be
/// reopened from the same file.
pub struct BPlusTree {
    index_name: String,
    root_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    key_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Opens (or creates) the index named `index_name`. `None` fanouts are
    /// computed from the page size minus the node header.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        key_size: usize,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> Result<Self> {
        assert!(key_size > 0, "key_size must be positive");
        let leaf_max_size = leaf_max_size
            .unwrap_or((PAGE_SIZE - NODE_HEADER_SIZE) / (key_size + LEAF_VALUE_SIZE));
        let internal_max_size = internal_max_size
            .unwrap_or((PAGE_SIZE - NODE_HEADER_SIZE) / (key_size + INTERNAL_VALUE_SIZE));

        let index_name = index_name.into();
        let root_page_id = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_root_id(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_name,
            root_page_id,
            bpm,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Point lookup. At most one value since keys are unique.
    pub fn get_value(&self, key: &[u8], _txn: &Transaction) -> Result<Vec<RecordId>> {
        debug_assert_eq!(key.len(), self.key_size);
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let leaf_page_id = self.find_leaf_page(key, false)?;
        let guard = self.bpm.read_page(leaf_page_id)?;
        let node = NodeView::new(guard.data(), self.key_size);

        Ok(match node.find_key(key, self.comparator.as_ref()) {
            Some(index) => vec![node.rid_at(index)],
            None => Vec::new(),
        })
    }

    /// Inserts a key/value pair. Returns false on a duplicate key.
    pub fn insert(&mut self, key: &[u8], rid: RecordId, _txn: &Transaction) -> Result<bool> {
        debug_assert_eq!(key.len(), self.key_size);
        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, rid)
    }

    /// Removes a key if present. Underflowing nodes redistribute from or
    /// merge with a sibling; merges can cascade up to the root.
    pub fn remove(&mut self, key: &[u8], _txn: &Transaction) -> Result<()> {
        debug_assert_eq!(key.len(), self.key_size);
        if self.is_empty() {
            return Ok(());
        }

        let leaf_page_id = self.find_leaf_page(key, false)?;
        let deleted = {
            let mut guard = self.bpm.write_page(leaf_page_id)?;
            let view = NodeView::new(guard.data(), self.key_size);
            match view.find_key(key, self.comparator.as_ref()) {
                None => false,
                Some(index) => {
                    NodeViewMut::new(guard.data_mut(), self.key_size).leaf_remove_at(index);
                    true
                }
            }
        };

        if deleted {
            self.coalesce_or_redistribute(leaf_page_id)?;
        }
        Ok(())
    }

    /// Iterator over the whole leaf chain in key order.
    pub fn iter(&self) -> Result<IndexIterator> {
        if self.is_empty() {
            return Ok(IndexIterator::finished(Arc::clone(&self.bpm), self.key_size));
        }
        let leftmost = self.find_leaf_page(&[], true)?;
        Ok(IndexIterator::new(
            Arc::clone(&self.bpm),
            self.key_size,
            leftmost,
            0,
        ))
    }

    /// Iterator starting at the first key >= `key`.
    pub fn iter_from(&self, key: &[u8]) -> Result<IndexIterator> {
        debug_assert_eq!(key.len(), self.key_size);
        if self.is_empty() {
            return Ok(IndexIterator::finished(Arc::clone(&self.bpm), self.key_size));
        }
        let leaf_page_id = self.find_leaf_page(key, false)?;
        let start = {
            let guard = self.bpm.read_page(leaf_page_id)?;
            let node = NodeView::new(guard.data(), self.key_size);
            node.lower_bound(key, self.comparator.as_ref(), 0)
        };
        Ok(IndexIterator::new(
            Arc::clone(&self.bpm),
            self.key_size,
            leaf_page_id,
            start,
        ))
    }

    /// Walks from the root to the leaf responsible for `key`, releasing
    /// each node before fetching its child. With `leftmost` the descent
    /// always takes child 0.
    fn find_leaf_page(&self, key: &[u8], leftmost: bool) -> Result<PageId> {
        let mut current = self.root_page_id;
        loop {
            let next = {
                let guard = self.bpm.read_page(current)?;
                let node = NodeView::new(guard.data(), self.key_size);
                if node.is_leaf() {
                    return Ok(current);
                }
                if leftmost {
                    node.child_at(0)
                } else {
                    node.internal_child_for(key, self.comparator.as_ref())
                }
            };
            current = next;
        }
    }

    fn start_new_tree(&mut self, key: &[u8], rid: RecordId) -> Result<()> {
        let root_page_id = {
            let mut guard = self.bpm.new_page_guard()?;
            let page_id = guard.page_id();
            let mut node = NodeViewMut::new(guard.data_mut(), self.key_size);
            node.init_leaf(page_id, self.leaf_max_size);
            node.leaf_insert_at(0, key, rid);
            page_id
        };

        self.root_page_id = root_page_id;
        debug!(root = root_page_id.as_u32(), "btree.root.create");
        self.update_root_page_id(true)
    }

    fn insert_into_leaf(&mut self, key: &[u8], rid: RecordId) -> Result<bool> {
        let leaf_page_id = self.find_leaf_page(key, false)?;

        // In-place cases resolve inside this block; an overflow stages the
        // full entry union for the split below.
        let (entries, old_next, parent_page_id) = {
            let mut guard = self.bpm.write_page(leaf_page_id)?;
            let view = NodeView::new(guard.data(), self.key_size);

            if view.find_key(key, self.comparator.as_ref()).is_some() {
                return Ok(false);
            }

            let position = view.lower_bound(key, self.comparator.as_ref(), 0);
            if view.size() < view.max_size() {
                let mut node = NodeViewMut::new(guard.data_mut(), self.key_size);
                node.leaf_insert_at(position, key, rid);
                return Ok(true);
            }

            let mut entries: Vec<(Vec<u8>, RecordId)> = Vec::with_capacity(view.size() + 1);
            for i in 0..view.size() {
                entries.push((view.key_at(i).to_vec(), view.rid_at(i)));
            }
            entries.insert(position, (key.to_vec(), rid));
            (entries, view.next_page_id(), view.parent_page_id())
        };

        // Entries at and after the split point move to a new right leaf;
        // its first key becomes the separator pushed into the parent.
        let split_at = (entries.len() + 1) / 2;
        let separator = entries[split_at].0.clone();

        let new_page_id = {
            let mut guard = self.bpm.new_page_guard()?;
            let page_id = guard.page_id();
            let mut node = NodeViewMut::new(guard.data_mut(), self.key_size);
            node.init_leaf(page_id, self.leaf_max_size);
            for (i, (entry_key, entry_rid)) in entries[split_at..].iter().enumerate() {
                node.leaf_insert_at(i, entry_key, *entry_rid);
            }
            node.set_parent_page_id(parent_page_id);
            node.set_next_page_id(old_next);
            page_id
        };

        {
            let mut guard = self.bpm.write_page(leaf_page_id)?;
            let mut node = NodeViewMut::new(guard.data_mut(), self.key_size);
            node.set_size(split_at);
            for (i, (entry_key, entry_rid)) in entries[..split_at].iter().enumerate() {
                node.set_key_at(i, entry_key);
                node.set_rid_at(i, *entry_rid);
            }
            node.set_next_page_id(new_page_id);
        }

        self.insert_into_parent(leaf_page_id, parent_page_id, separator, new_page_id)?;
        Ok(true)
    }

    /// Links `new_page_id` (right sibling of `old_page_id`, separated by
    /// `separator`) into the parent, growing a new root or splitting the
    /// parent as needed.
    fn insert_into_parent(
        &mut self,
        old_page_id: PageId,
        parent_page_id: PageId,
        separator: Vec<u8>,
        new_page_id: PageId,
    ) -> Result<()> {
        if parent_page_id == INVALID_PAGE_ID {
            // The old node was the root: grow the tree by one level.
            let new_root_id = {
                let mut guard = self.bpm.new_page_guard()?;
                let page_id = guard.page_id();
                let mut root = NodeViewMut::new(guard.data_mut(), self.key_size);
                root.init_internal(page_id, self.internal_max_size);
                root.set_size(2);
                root.set_child_at(0, old_page_id);
                root.set_key_at(1, &separator);
                root.set_child_at(1, new_page_id);
                page_id
            };

            for child in [old_page_id, new_page_id] {
                let mut guard = self.bpm.write_page(child)?;
                NodeViewMut::new(guard.data_mut(), self.key_size).set_parent_page_id(new_root_id);
            }

            self.root_page_id = new_root_id;
            debug!(root = new_root_id.as_u32(), "btree.root.grow");
            return self.update_root_page_id(false);
        }

        let (keys, children, grandparent_id) = {
            let mut guard = self.bpm.write_page(parent_page_id)?;
            let view = NodeView::new(guard.data(), self.key_size);
            let old_index = view.child_index_of(old_page_id).ok_or_else(|| {
                StrataError::Corrupted(format!(
                    "page {} not found in parent {}",
                    old_page_id, parent_page_id
                ))
            })?;

            if view.size() < view.max_size() {
                let mut node = NodeViewMut::new(guard.data_mut(), self.key_size);
                node.internal_insert_at(old_index + 1, &separator, new_page_id);
                return Ok(());
            }

            // Parent overflow: stage its entries plus the new one. Key 0
            // is the sentinel slot and never read.
            let size = view.size();
            let mut keys: Vec<Vec<u8>> = Vec::with_capacity(size + 1);
            let mut children: Vec<PageId> = Vec::with_capacity(size + 1);
            keys.push(vec![0u8; self.key_size]);
            children.push(view.child_at(0));
            for i in 1..size {
                keys.push(view.key_at(i).to_vec());
                children.push(view.child_at(i));
            }
            keys.insert(old_index + 1, separator);
            children.insert(old_index + 1, new_page_id);
            (keys, children, view.parent_page_id())
        };

        let total = children.len();
        let split_at = (total + 1) / 2;
        // The split-point key is promoted, not copied into either half;
        // capture it before the staging vectors are consumed.
        let promoted = keys[split_at].clone();

        let sibling_id = {
            let mut guard = self.bpm.new_page_guard()?;
            let page_id = guard.page_id();
            let mut node = NodeViewMut::new(guard.data_mut(), self.key_size);
            node.init_internal(page_id, self.internal_max_size);
            node.set_size(total - split_at);
            node.set_child_at(0, children[split_at]);
            for i in 1..(total - split_at) {
                node.set_key_at(i, &keys[split_at + i]);
                node.set_child_at(i, children[split_at + i]);
            }
            node.set_parent_page_id(grandparent_id);
            page_id
        };

        {
            let mut guard = self.bpm.write_page(parent_page_id)?;
            let mut node = NodeViewMut::new(guard.data_mut(), self.key_size);
            node.set_size(split_at);
            node.set_child_at(0, children[0]);
            for i in 1..split_at {
                node.set_key_at(i, &keys[i]);
                node.set_child_at(i, children[i]);
            }
        }

        for &child in &children[split_at..] {
            let mut guard = self.bpm.write_page(child)?;
            NodeViewMut::new(guard.data_mut(), self.key_size).set_parent_page_id(sibling_id);
        }

        self.insert_into_parent(parent_page_id, grandparent_id, promoted, sibling_id)
    }

    /// Restores the minimum-occupancy invariant for an underflowing node,
    /// preferring to borrow from the left sibling and merging when the
    /// sibling has nothing to spare.
    fn coalesce_or_redistribute(&mut self, page_id: PageId) -> Result<()> {
        if page_id == self.root_page_id {
            return self.adjust_root();
        }

        let (size, min_size, parent_page_id) = {
            let guard = self.bpm.read_page(page_id)?;
            let node = NodeView::new(guard.data(), self.key_size);
            (node.size(), node.min_size(), node.parent_page_id())
        };
        if size >= min_size {
            return Ok(());
        }

        let (node_index, sibling_id, sibling_is_left) = {
            let guard = self.bpm.read_page(parent_page_id)?;
            let parent = NodeView::new(guard.data(), self.key_size);
            let node_index = parent.child_index_of(page_id).ok_or_else(|| {
                StrataError::Corrupted(format!(
                    "page {} not found in parent {}",
                    page_id, parent_page_id
                ))
            })?;
            if parent.size() < 2 {
                // Single-child parent: no sibling to borrow from or merge
                // with. Leave the node under-full.
                return Ok(());
            }
            if node_index > 0 {
                (node_index, parent.child_at(node_index - 1), true)
            } else {
                (node_index, parent.child_at(node_index + 1), false)
            }
        };

        let sibling_can_lend = {
            let guard = self.bpm.read_page(sibling_id)?;
            let sibling = NodeView::new(guard.data(), self.key_size);
            sibling.size() > sibling.min_size()
        };

        if sibling_can_lend {
            self.redistribute(page_id, sibling_id, parent_page_id, node_index, sibling_is_left)
        } else {
            self.coalesce(page_id, sibling_id, parent_page_id, node_index, sibling_is_left)
        }
    }

    /// Rotates one entry from the sibling into the deficient node through
    /// the parent's separator key.
    fn redistribute(
        &mut self,
        page_id: PageId,
        sibling_id: PageId,
        parent_page_id: PageId,
        node_index: usize,
        sibling_is_left: bool,
    ) -> Result<()> {
        let mut moved_child: Option<PageId> = None;
        {
            let mut parent_guard = self.bpm.write_page(parent_page_id)?;
            let mut node_guard = self.bpm.write_page(page_id)?;
            let mut sibling_guard = self.bpm.write_page(sibling_id)?;

            let mut parent = NodeViewMut::new(parent_guard.data_mut(), self.key_size);
            let mut node = NodeViewMut::new(node_guard.data_mut(), self.key_size);
            let mut sibling = NodeViewMut::new(sibling_guard.data_mut(), self.key_size);

            if node.is_leaf() {
                if sibling_is_left {
                    // Move the left sibling's last entry to our front; the
                    // separator becomes our new first key.
                    let donor = sibling.size() - 1;
                    let entry_key = sibling.key_at(donor).to_vec();
                    let entry_rid = sibling.rid_at(donor);
                    sibling.set_size(donor);
                    node.leaf_insert_at(0, &entry_key, entry_rid);
                    parent.set_key_at(node_index, &entry_key);
                } else {
                    // Move the right sibling's first entry to our back; the
                    // separator becomes the sibling's new first key.
                    let entry_key = sibling.key_at(0).to_vec();
                    let entry_rid = sibling.rid_at(0);
                    sibling.leaf_remove_at(0);
                    let size = node.size();
                    node.leaf_insert_at(size, &entry_key, entry_rid);
                    let new_first = sibling.key_at(0).to_vec();
                    parent.set_key_at(node_index + 1, &new_first);
                }
            } else if sibling_is_left {
                // Pull the separator down as our new key 1, adopt the
                // sibling's last child, push the sibling's last key up.
                let donor = sibling.size() - 1;
                let child = sibling.child_at(donor);
                let donor_key = sibling.key_at(donor).to_vec();
                let separator = parent.key_at(node_index).to_vec();
                node.internal_insert_front(child, &separator);
                parent.set_key_at(node_index, &donor_key);
                sibling.set_size(donor);
                moved_child = Some(child);
            } else {
                // Pull the separator down to our back, adopt the sibling's
                // first child, push the sibling's key 1 up.
                let separator = parent.key_at(node_index + 1).to_vec();
                let child = sibling.child_at(0);
                let size = node.size();
                node.set_size(size + 1);
                node.set_key_at(size, &separator);
                node.set_child_at(size, child);
                let pushed_up = sibling.key_at(1).to_vec();
                parent.set_key_at(node_index + 1, &pushed_up);
                sibling.internal_remove_front();
                moved_child = Some(child);
            }
        }

        if let Some(child) = moved_child {
            let mut guard = self.bpm.write_page(child)?;
            NodeViewMut::new(guard.data_mut(), self.key_size).set_parent_page_id(page_id);
        }
        Ok(())
    }

    /// Merges the right node of the pair into the left, removes their
    /// separator from the parent, and recurses on the parent.
    fn coalesce(
        &mut self,
        page_id: PageId,
        sibling_id: PageId,
        parent_page_id: PageId,
        node_index: usize,
        sibling_is_left: bool,
    ) -> Result<()> {
        let (left_id, right_id, separator_index) = if sibling_is_left {
            (sibling_id, page_id, node_index)
        } else {
            (page_id, sibling_id, node_index + 1)
        };

        let mut moved_children: Vec<PageId> = Vec::new();
        {
            let mut parent_guard = self.bpm.write_page(parent_page_id)?;
            let mut left_guard = self.bpm.write_page(left_id)?;
            let right_guard = self.bpm.read_page(right_id)?;

            let mut parent = NodeViewMut::new(parent_guard.data_mut(), self.key_size);
            let mut left = NodeViewMut::new(left_guard.data_mut(), self.key_size);
            let right = NodeView::new(right_guard.data(), self.key_size);

            let left_size = left.size();
            let right_size = right.size();

            if left.is_leaf() {
                left.set_size(left_size + right_size);
                for i in 0..right_size {
                    left.set_key_at(left_size + i, right.key_at(i));
                    left.set_rid_at(left_size + i, right.rid_at(i));
                }
                left.set_next_page_id(right.next_page_id());
            } else {
                // The separator comes down between the halves; the right
                // node's sentinel child attaches under it.
                let separator = parent.key_at(separator_index).to_vec();
                left.set_size(left_size + right_size);
                left.set_key_at(left_size, &separator);
                left.set_child_at(left_size, right.child_at(0));
                moved_children.push(right.child_at(0));
                for i in 1..right_size {
                    left.set_key_at(left_size + i, right.key_at(i));
                    left.set_child_at(left_size + i, right.child_at(i));
                    moved_children.push(right.child_at(i));
                }
            }

            parent.internal_remove_at(separator_index);
        }

        for child in moved_children {
            let mut guard = self.bpm.write_page(child)?;
            NodeViewMut::new(guard.data_mut(), self.key_size).set_parent_page_id(left_id);
        }

        self.bpm.delete_page(right_id)?;
        self.coalesce_or_redistribute(parent_page_id)
    }

    /// Handles underflow at the root: an internal root with a single child
    /// hands the tree to that child; an empty leaf root empties the tree.
    fn adjust_root(&mut self) -> Result<()> {
        enum RootChange {
            Promote(PageId),
            Clear,
            Keep,
        }

        let old_root = self.root_page_id;
        let change = {
            let guard = self.bpm.read_page(old_root)?;
            let node = NodeView::new(guard.data(), self.key_size);
            if !node.is_leaf() && node.size() == 1 {
                RootChange::Promote(node.child_at(0))
            } else if node.is_leaf() && node.size() == 0 {
                RootChange::Clear
            } else {
                RootChange::Keep
            }
        };

        match change {
            RootChange::Promote(child) => {
                {
                    let mut guard = self.bpm.write_page(child)?;
                    NodeViewMut::new(guard.data_mut(), self.key_size)
                        .set_parent_page_id(INVALID_PAGE_ID);
                }
                self.root_page_id = child;
                debug!(root = child.as_u32(), "btree.root.collapse");
                self.update_root_page_id(false)?;
                self.bpm.delete_page(old_root)?;
            }
            RootChange::Clear => {
                self.root_page_id = INVALID_PAGE_ID;
                debug!("btree.root.clear");
                self.update_root_page_id(false)?;
                self.bpm.delete_page(old_root)?;
            }
            RootChange::Keep => {}
        }
        Ok(())
    }

    /// Mirrors the in-memory root page id into the header page record for
    /// this index. `insert_record` on first creation, update thereafter;
    /// either falls back to the other so a re-created index reuses its
    /// record.
    fn update_root_page_id(&self, insert_record: bool) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());

        let recorded = if insert_record {
            header.insert_record(&self.index_name, self.root_page_id)
                || header.update_record(&self.index_name, self.root_page_id)
        } else {
            header.update_record(&self.index_name, self.root_page_id)
                || header.insert_record(&self.index_name, self.root_page_id)
        };

        if recorded {
            Ok(())
        } else {
            Err(StrataError::HeaderFull)
        }
    }
}
