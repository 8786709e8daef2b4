//! # ItemIndex
//!
//! An ordered index of cached items, keyed by byte-string key, where
//! every node additionally carries a three-bit *dirty summary*
//! (`SELF` / `LEFT` / `RIGHT`) so that dirty items can be enumerated in
//! key order without a separate tree.
//!
//! ## Representation
//!
//! The tree is an AVL tree stored in an arena (`Vec<Node>`) addressed by
//! `usize` index, with inline `left`/`right`/`parent` links and a free
//! list for reclaimed slots. An arena avoids the cyclic `Rc<RefCell<_>>`
//! parent pointers a safe from-scratch tree would otherwise need.
//!
//! ## Augmentation invariant
//!
//! At every node `n`: `n.dirty_left == (n.left exists and has any dirty
//! descendant, including itself)`, and symmetrically for `dirty_right`.
//! Because the field is direction-sensitive (not a plain OR of children),
//! **every** rotation recomputes both the rotated node and its new parent
//! from scratch rather than copying bits across. [`Tree::audit`]
//! recomputes the whole tree from scratch and is used by tests to check
//! this invariant holds after arbitrary operation sequences.
//!
//! ## What lives here vs. in `cache`
//!
//! This module owns tree structure and the dirty bits/accounting that
//! are intimately tied to it (`mark_dirty`/`clear_dirty` must update
//! [`Accounting`] atomically with the bit flip). It has no notion of the
//! cache-wide lock, the manifest, or the lock-drop-and-retry loop; those
//! live in `cache`.

#[cfg(test)]
mod tests;

use crate::accounting::Accounting;
use crate::item::{ItemState, ItemView};
use crate::key::Key;

type Link = Option<usize>;

#[derive(Debug, Clone)]
struct Node {
    key: Key,
    state: ItemState,
    dirty_self: bool,
    dirty_left: bool,
    dirty_right: bool,
    height: i32,
    left: Link,
    right: Link,
    parent: Link,
}

/// Outcome of [`Tree::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Exists,
}

/// The augmented ordered item index.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: Link,
    len: usize,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // --------------------------------------------------------------
    // Arena plumbing
    // --------------------------------------------------------------

    fn alloc_node(&mut self, key: Key, state: ItemState, parent: Link) -> usize {
        let node = Node {
            key,
            state,
            dirty_self: false,
            dirty_left: false,
            dirty_right: false,
            height: 1,
            left: None,
            right: None,
            parent,
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id] = node;
            id
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn height(&self, id: Link) -> i32 {
        id.map(|i| self.nodes[i].height).unwrap_or(0)
    }

    fn combined_dirty(&self, id: Link) -> bool {
        id.map(|i| {
            let n = &self.nodes[i];
            n.dirty_self || n.dirty_left || n.dirty_right
        })
        .unwrap_or(false)
    }

    fn update_height(&mut self, id: usize) {
        let h = 1 + self.height(self.nodes[id].left).max(self.height(self.nodes[id].right));
        self.nodes[id].height = h;
    }

    fn balance_factor(&self, id: usize) -> i32 {
        self.height(self.nodes[id].left) - self.height(self.nodes[id].right)
    }

    /// Recomputes `dirty_left`/`dirty_right` at `id` from its current
    /// children. Never touches `dirty_self`, which belongs to the item
    /// stored at this node, not to its position in the tree.
    fn recompute_summary(&mut self, id: usize) {
        let left = self.nodes[id].left;
        let right = self.nodes[id].right;
        self.nodes[id].dirty_left = self.combined_dirty(left);
        self.nodes[id].dirty_right = self.combined_dirty(right);
    }

    /// Rotates the right-heavy subtree rooted at `z` left, returning the
    /// new subtree root `y`. Both `z` (child after rotation) and `y`
    /// (new parent) have their summaries recomputed from scratch, child
    /// first, per the augmentation algorithm.
    fn rotate_left(&mut self, z: usize) -> usize {
        let y = self.nodes[z].right.expect("rotate_left requires a right child");
        let t2 = self.nodes[y].left;

        self.nodes[z].right = t2;
        if let Some(t2id) = t2 {
            self.nodes[t2id].parent = Some(z);
        }
        let z_parent = self.nodes[z].parent;
        self.nodes[y].left = Some(z);
        self.nodes[y].parent = z_parent;
        self.nodes[z].parent = Some(y);

        self.update_height(z);
        self.update_height(y);
        self.recompute_summary(z);
        self.recompute_summary(y);
        y
    }

    fn rotate_right(&mut self, z: usize) -> usize {
        let y = self.nodes[z].left.expect("rotate_right requires a left child");
        let t2 = self.nodes[y].right;

        self.nodes[z].left = t2;
        if let Some(t2id) = t2 {
            self.nodes[t2id].parent = Some(z);
        }
        let z_parent = self.nodes[z].parent;
        self.nodes[y].right = Some(z);
        self.nodes[y].parent = z_parent;
        self.nodes[z].parent = Some(y);

        self.update_height(z);
        self.update_height(y);
        self.recompute_summary(z);
        self.recompute_summary(y);
        y
    }

    /// Updates height/summary at `id` and rebalances if needed, returning
    /// the (possibly different) id of the subtree root after rotation.
    fn rebalance(&mut self, id: usize) -> usize {
        self.update_height(id);
        let bf = self.balance_factor(id);

        let new_root = if bf > 1 {
            let l = self.nodes[id].left.expect("bf>1 implies a left child");
            if self.balance_factor(l) < 0 {
                let new_l = self.rotate_left(l);
                self.nodes[id].left = Some(new_l);
            }
            self.rotate_right(id)
        } else if bf < -1 {
            let r = self.nodes[id].right.expect("bf<-1 implies a right child");
            if self.balance_factor(r) > 0 {
                let new_r = self.rotate_right(r);
                self.nodes[id].right = Some(new_r);
            }
            self.rotate_left(id)
        } else {
            self.recompute_summary(id);
            id
        };
        new_root
    }

    /// Re-homes the (possibly rotated) subtree root under `parent`,
    /// walking the rest of the path to the tree root and rebalancing
    /// each ancestor in turn.
    fn rebalance_path_from(&mut self, mut cur: Link) {
        while let Some(id) = cur {
            let gp = self.nodes[id].parent;
            let was_left = gp.map(|g| self.nodes[g].left == Some(id));
            let new_root = self.rebalance(id);
            match gp {
                None => self.root = Some(new_root),
                Some(g) => {
                    if was_left == Some(true) {
                        self.nodes[g].left = Some(new_root);
                    } else {
                        self.nodes[g].right = Some(new_root);
                    }
                }
            }
            cur = gp;
        }
    }

    fn find_node_id(&self, key: &[u8]) -> Link {
        let mut cur = self.root;
        while let Some(id) = cur {
            match key.cmp(self.nodes[id].key.as_slice()) {
                std::cmp::Ordering::Equal => return Some(id),
                std::cmp::Ordering::Less => cur = self.nodes[id].left,
                std::cmp::Ordering::Greater => cur = self.nodes[id].right,
            }
        }
        None
    }

    /// Inserts a brand-new node for `key` (caller guarantees absence) and
    /// rebalances. The new node starts non-dirty; callers that need it
    /// dirty call [`Tree::mark_dirty_fresh`] afterwards, once the tree
    /// shape (and thus its final parent) is settled.
    fn insert_new_node(&mut self, key: Key, state: ItemState) -> usize {
        let mut cur = self.root;
        let mut parent: Link = None;
        let mut went_left = false;
        while let Some(id) = cur {
            parent = Some(id);
            if key < self.nodes[id].key {
                went_left = true;
                cur = self.nodes[id].left;
            } else {
                went_left = false;
                cur = self.nodes[id].right;
            }
        }

        let new_id = self.alloc_node(key, state, parent);
        match parent {
            None => self.root = Some(new_id),
            Some(p) => {
                if went_left {
                    self.nodes[p].left = Some(new_id);
                } else {
                    self.nodes[p].right = Some(new_id);
                }
            }
        }
        self.len += 1;
        self.rebalance_path_from(parent);
        new_id
    }

    /// Structural-only removal of `id` (including two-children
    /// successor-copy). Never touches [`Accounting`] — callers must
    /// clear dirty accounting for `id` *before* calling this.
    fn remove_node(&mut self, id: usize) {
        let left = self.nodes[id].left;
        let right = self.nodes[id].right;
        match (left, right) {
            (None, None) => self.detach_and_rebalance(id, None),
            (Some(l), None) => self.detach_and_rebalance(id, Some(l)),
            (None, Some(r)) => self.detach_and_rebalance(id, Some(r)),
            (Some(_), Some(r)) => {
                let mut succ = r;
                while let Some(l) = self.nodes[succ].left {
                    succ = l;
                }
                let succ_key = std::mem::replace(&mut self.nodes[succ].key, Vec::new());
                let succ_state = std::mem::replace(&mut self.nodes[succ].state, ItemState::Tombstone);
                let succ_dirty = self.nodes[succ].dirty_self;
                self.nodes[id].key = succ_key;
                self.nodes[id].state = succ_state;
                self.nodes[id].dirty_self = succ_dirty;
                self.remove_node(succ);
            }
        }
    }

    fn detach_and_rebalance(&mut self, id: usize, replacement: Link) {
        let parent = self.nodes[id].parent;
        if let Some(rep) = replacement {
            self.nodes[rep].parent = parent;
        }
        match parent {
            None => self.root = replacement,
            Some(p) => {
                if self.nodes[p].left == Some(id) {
                    self.nodes[p].left = replacement;
                } else {
                    self.nodes[p].right = replacement;
                }
            }
        }
        self.free.push(id);
        self.len -= 1;
        self.rebalance_path_from(parent);
    }

    // --------------------------------------------------------------
    // Dirty-bit propagation & accounting-coupled mutation
    // --------------------------------------------------------------

    /// Bubbles a change to `id`'s own `dirty_self` up to the root,
    /// recomputing each ancestor's `LEFT`/`RIGHT` bit from its (possibly
    /// unchanged) children, stopping as soon as a step produces no
    /// change.
    fn propagate_up(&mut self, id: usize) {
        let mut cur = id;
        loop {
            let Some(parent) = self.nodes[cur].parent else {
                break;
            };
            let is_left = self.nodes[parent].left == Some(cur);
            let new_bit = self.combined_dirty(Some(cur));
            let changed = if is_left {
                let changed = self.nodes[parent].dirty_left != new_bit;
                self.nodes[parent].dirty_left = new_bit;
                changed
            } else {
                let changed = self.nodes[parent].dirty_right != new_bit;
                self.nodes[parent].dirty_right = new_bit;
                changed
            };
            if !changed {
                break;
            }
            cur = parent;
        }
    }

    fn mark_dirty_fresh(&mut self, acct: &mut Accounting, id: usize) {
        debug_assert!(!self.nodes[id].dirty_self);
        self.nodes[id].dirty_self = true;
        self.propagate_up(id);
        let key_len = self.nodes[id].key.len();
        let val_len = self.nodes[id].state.value_len();
        acct.add(key_len, val_len);
    }

    fn clear_dirty_only(&mut self, acct: &mut Accounting, id: usize) {
        if self.nodes[id].dirty_self {
            let key_len = self.nodes[id].key.len();
            let val_len = self.nodes[id].state.value_len();
            acct.remove(key_len, val_len);
            self.nodes[id].dirty_self = false;
            self.propagate_up(id);
        }
    }

    /// Clears any existing dirty accounting for `id`, replaces its
    /// state, and (re-)marks it dirty — exact accounting is kept by
    /// always clearing before mutating, so a value-length change never
    /// leaves stale byte counts behind.
    fn restate_dirty(&mut self, acct: &mut Accounting, id: usize, new_state: ItemState) {
        self.clear_dirty_only(acct, id);
        self.nodes[id].state = new_state;
        self.mark_dirty_fresh(acct, id);
    }

    // --------------------------------------------------------------
    // Public operations
    // --------------------------------------------------------------

    /// Live item at `key`, or `None` if absent *or* a tombstone.
    pub fn find(&self, key: &[u8]) -> Option<ItemView> {
        let id = self.find_node_id(key)?;
        match &self.nodes[id].state {
            ItemState::Live(v) => Some(ItemView {
                key: self.nodes[id].key.clone(),
                value: v.clone(),
            }),
            ItemState::Tombstone => None,
        }
    }

    /// The raw (tombstone-visible) entry at `key`, if any.
    pub fn raw(&self, key: &[u8]) -> Option<(Key, ItemState)> {
        let id = self.find_node_id(key)?;
        Some((self.nodes[id].key.clone(), self.nodes[id].state.clone()))
    }

    /// First entry (live or tombstone) with a key strictly greater than
    /// `key`, ignoring dirty state — used by `cache::next` to walk
    /// forward over raw entries, skipping tombstones at that layer.
    pub fn successor(&self, key: &[u8]) -> Option<(Key, ItemState)> {
        let mut result: Link = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            if self.nodes[id].key.as_slice() > key {
                result = Some(id);
                cur = self.nodes[id].left;
            } else {
                cur = self.nodes[id].right;
            }
        }
        result.map(|id| (self.nodes[id].key.clone(), self.nodes[id].state.clone()))
    }

    /// First entry (live or tombstone) with a key strictly less than
    /// `key`, ignoring dirty state — the mirror image of [`Tree::successor`].
    pub fn predecessor(&self, key: &[u8]) -> Option<(Key, ItemState)> {
        let mut result: Link = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            if self.nodes[id].key.as_slice() < key {
                result = Some(id);
                cur = self.nodes[id].right;
            } else {
                cur = self.nodes[id].left;
            }
        }
        result.map(|id| (self.nodes[id].key.clone(), self.nodes[id].state.clone()))
    }

    /// Exact match at `key` (live or tombstone) plus its in-order
    /// predecessor and successor, for range-walking callers that need all
    /// three without three separate tree descents worth of duplicated
    /// logic — `raw`, `predecessor`, and `successor` are each a single
    /// descent, so this is three, not one, but every one stays a plain
    /// read with no allocation.
    pub fn locate(&self, key: &[u8]) -> (Option<(Key, ItemState)>, Option<(Key, ItemState)>, Option<(Key, ItemState)>) {
        (self.raw(key), self.predecessor(key), self.successor(key))
    }

    /// Creates a new dirty live item at `key`. Replaces a tombstone in
    /// place if one exists; returns [`InsertOutcome::Exists`] if a live
    /// item is already present.
    pub fn create(&mut self, acct: &mut Accounting, key: Key, value: Vec<u8>) -> InsertOutcome {
        match self.find_node_id(&key) {
            Some(id) => match &self.nodes[id].state {
                ItemState::Live(_) => InsertOutcome::Exists,
                ItemState::Tombstone => {
                    self.restate_dirty(acct, id, ItemState::Live(value));
                    InsertOutcome::Inserted
                }
            },
            None => {
                let new_id = self.insert_new_node(key, ItemState::Live(value));
                self.mark_dirty_fresh(acct, new_id);
                InsertOutcome::Inserted
            }
        }
    }

    /// Swaps in a new value for an existing live item. Returns `false`
    /// if the key is absent or a tombstone.
    pub fn update(&mut self, acct: &mut Accounting, key: &[u8], new_value: Vec<u8>) -> bool {
        match self.find_node_id(key) {
            Some(id) if matches!(self.nodes[id].state, ItemState::Live(_)) => {
                self.restate_dirty(acct, id, ItemState::Live(new_value));
                true
            }
            _ => false,
        }
    }

    /// Ensures a live item at `key` has its dirty bit set. Returns
    /// `false` if absent or a tombstone.
    pub fn dirty(&mut self, acct: &mut Accounting, key: &[u8]) -> bool {
        match self.find_node_id(key) {
            Some(id) if matches!(self.nodes[id].state, ItemState::Live(_)) => {
                if !self.nodes[id].dirty_self {
                    self.mark_dirty_fresh(acct, id);
                }
                true
            }
            _ => false,
        }
    }

    /// Converts the live item at `key` into a dirty tombstone. Returns
    /// `false` if absent or already a tombstone.
    pub fn delete(&mut self, acct: &mut Accounting, key: &[u8]) -> bool {
        match self.find_node_id(key) {
            Some(id) if matches!(self.nodes[id].state, ItemState::Live(_)) => {
                self.restate_dirty(acct, id, ItemState::Tombstone);
                true
            }
            _ => false,
        }
    }

    /// Converts an already-dirtied live item into a tombstone.
    /// Precondition: `dirty(key)` previously succeeded for this key, so
    /// the item is known present and live — this cannot fail.
    pub fn delete_dirty(&mut self, acct: &mut Accounting, key: &[u8]) {
        let id = self
            .find_node_id(key)
            .expect("delete_dirty precondition: key must be present (caller must call dirty() first)");
        debug_assert!(matches!(self.nodes[id].state, ItemState::Live(_)));
        self.restate_dirty(acct, id, ItemState::Tombstone);
    }

    /// Inserts a clean (non-dirty) item, used for bulk manifest-read
    /// installation. Returns `false` (duplicate dropped) if a live or
    /// tombstone entry already occupies `key`.
    pub fn insert_clean(&mut self, key: Key, value: Vec<u8>) -> bool {
        if self.find_node_id(&key).is_some() {
            return false;
        }
        self.insert_new_node(key, ItemState::Live(value));
        true
    }

    /// Clears the dirty bit of a live item without removing it from the
    /// index — used when flushing a non-tombstone dirty item.
    pub fn mark_clean(&mut self, acct: &mut Accounting, key: &[u8]) -> bool {
        match self.find_node_id(key) {
            Some(id) if matches!(self.nodes[id].state, ItemState::Live(_)) => {
                self.clear_dirty_only(acct, id);
                true
            }
            _ => false,
        }
    }

    /// Clears a tombstone's dirty accounting and removes it from the
    /// index entirely — used when flushing a dirty tombstone.
    pub fn erase_tombstone(&mut self, acct: &mut Accounting, key: &[u8]) -> bool {
        match self.find_node_id(key) {
            Some(id) if matches!(self.nodes[id].state, ItemState::Tombstone) => {
                self.clear_dirty_only(acct, id);
                self.remove_node(id);
                true
            }
            _ => false,
        }
    }

    // --------------------------------------------------------------
    // Dirty-order traversal
    // --------------------------------------------------------------

    fn subtree_first_dirty(&self, mut id: usize) -> Option<usize> {
        loop {
            let n = &self.nodes[id];
            if n.dirty_left {
                id = n.left.expect("dirty_left implies a left child");
                continue;
            }
            if n.dirty_self {
                return Some(id);
            }
            if n.dirty_right {
                id = n.right.expect("dirty_right implies a right child");
                continue;
            }
            return None;
        }
    }

    pub fn first_dirty(&self) -> Option<Key> {
        let root = self.root?;
        if !self.combined_dirty(Some(root)) {
            return None;
        }
        self.subtree_first_dirty(root).map(|id| self.nodes[id].key.clone())
    }

    pub fn next_dirty(&self, key: &[u8]) -> Option<Key> {
        let id = self.find_node_id(key)?;
        self.next_dirty_id(id).map(|i| self.nodes[i].key.clone())
    }

    fn next_dirty_id(&self, id: usize) -> Option<usize> {
        let n = &self.nodes[id];
        if n.dirty_right {
            return self.subtree_first_dirty(n.right.expect("dirty_right implies a right child"));
        }
        let mut cur = id;
        loop {
            let parent = self.nodes[cur].parent?;
            let is_left_child = self.nodes[parent].left == Some(cur);
            if is_left_child {
                if self.nodes[parent].dirty_self {
                    return Some(parent);
                }
                if self.nodes[parent].dirty_right {
                    return self.subtree_first_dirty(
                        self.nodes[parent].right.expect("dirty_right implies a right child"),
                    );
                }
            }
            cur = parent;
        }
    }

    // --------------------------------------------------------------
    // Debug / test support
    // --------------------------------------------------------------

    /// Recomputes every node's summary from scratch and compares against
    /// the stored bits. Used by tests to check the augmentation invariant
    /// holds after arbitrary operation sequences.
    pub fn audit(&self) -> bool {
        match self.root {
            None => true,
            Some(r) => self.audit_rec(r).0,
        }
    }

    fn audit_rec(&self, id: usize) -> (bool, bool) {
        let n = &self.nodes[id];
        let (left_ok, left_dirty) = match n.left {
            Some(l) => self.audit_rec(l),
            None => (true, false),
        };
        let (right_ok, right_dirty) = match n.right {
            Some(r) => self.audit_rec(r),
            None => (true, false),
        };
        let bits_ok = n.dirty_left == left_dirty && n.dirty_right == right_dirty;
        (left_ok && right_ok && bits_ok, n.dirty_self || left_dirty || right_dirty)
    }

    /// Independent recomputation of dirty accounting totals by scanning
    /// every node, ignoring the summary bits entirely. Used by tests to
    /// cross-check invariant 2 against [`Accounting`].
    pub fn recompute_accounting(&self) -> Accounting {
        let mut acct = Accounting::new();
        self.for_each(&mut |key, state, dirty_self| {
            if dirty_self {
                acct.add(key.len(), state.value_len());
            }
        });
        acct
    }

    /// Full in-order snapshot of every entry (live and tombstone), for
    /// tests that want to assert on the whole tree shape.
    pub fn entries_in_order(&self) -> Vec<(Key, ItemState)> {
        let mut out = Vec::with_capacity(self.len);
        self.for_each(&mut |key, state, _| out.push((key.to_vec(), state.clone())));
        out
    }

    fn for_each(&self, f: &mut dyn FnMut(&[u8], &ItemState, bool)) {
        if let Some(root) = self.root {
            self.for_each_rec(root, f);
        }
    }

    fn for_each_rec(&self, id: usize, f: &mut dyn FnMut(&[u8], &ItemState, bool)) {
        let n = &self.nodes[id];
        if let Some(l) = n.left {
            self.for_each_rec(l, f);
        }
        f(&n.key, &n.state, n.dirty_self);
        if let Some(r) = n.right {
            self.for_each_rec(r, f);
        }
    }
}
