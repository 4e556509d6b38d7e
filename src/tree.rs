//! The augmented timeline index: a red-black tree keyed by `vdeadline`, each
//! subtree carrying the minimum `vruntime` under it.
//!
//! Nodes live in an arena (`Vec<Slot<T>>`) addressed by [`SlotIndex`] rather
//! than behind raw pointers, so a node's address never has to stay fixed
//! while it's linked into the tree. The tree algorithms below are otherwise
//! a standard augmented red-black tree (the same shape Linux's
//! `rbtree_augmented.h` uses): BST insert keyed by deadline, textbook
//! red-black fixups, and a `min_vruntime` recompute that runs bottom-up with
//! fixed-point early termination on every structural change.

use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::node::{deadline_order, Color, Entry, NodeState, SlotIndex};

enum Slot<T> {
    Occupied(Entry<T>),
    Free,
}

/// Augmented red-black tree, keyed by `vdeadline`, arena-backed by `SlotIndex`.
pub(crate) struct Timeline<T> {
    slots: Vec<Slot<T>>,
    generations: Vec<u32>,
    free: Vec<SlotIndex>,
    root: Option<SlotIndex>,
    leftmost: Option<SlotIndex>,
}

impl<T> Timeline<T> {
    pub fn new() -> Self {
        Timeline {
            slots: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            root: None,
            leftmost: None,
        }
    }

    // ---- arena bookkeeping -------------------------------------------------

    fn entry(&self, idx: SlotIndex) -> &Entry<T> {
        match &self.slots[idx as usize] {
            Slot::Occupied(e) => e,
            Slot::Free => unreachable!("eevdf-queue: access to a freed timeline slot"),
        }
    }

    fn entry_mut(&mut self, idx: SlotIndex) -> &mut Entry<T> {
        match &mut self.slots[idx as usize] {
            Slot::Occupied(e) => e,
            Slot::Free => unreachable!("eevdf-queue: access to a freed timeline slot"),
        }
    }

    pub fn generation_of(&self, idx: SlotIndex) -> u32 {
        self.generations[idx as usize]
    }

    pub fn payload(&self, idx: SlotIndex) -> &T {
        &self.entry(idx).payload
    }

    pub fn payload_mut(&mut self, idx: SlotIndex) -> &mut T {
        &mut self.entry_mut(idx).payload
    }

    pub fn weight_of(&self, idx: SlotIndex) -> u32 {
        self.entry(idx).weight
    }

    pub fn vruntime_of(&self, idx: SlotIndex) -> i64 {
        self.entry(idx).vruntime
    }

    pub fn state_of(&self, idx: SlotIndex) -> NodeState {
        self.entry(idx).state
    }

    pub fn set_state(&mut self, idx: SlotIndex, state: NodeState) {
        self.entry_mut(idx).state = state;
    }

    /// Advance `vruntime` by `delta_vruntime` and recompute `vdeadline`. Used
    /// by the accountant while the node is `Current` (outside the tree), so
    /// no tree structure needs fixing here.
    pub fn accumulate(&mut self, idx: SlotIndex, delta_vruntime: i64) {
        let e = self.entry_mut(idx);
        e.vruntime += delta_vruntime;
        e.refresh_deadline();
    }

    /// Allocate a fresh (or recycled) arena slot for a new node. Does not
    /// link it into the tree; call [`Self::link`] for that.
    pub fn alloc(&mut self, weight: u32, time_slice: u32, vruntime: i64, payload: T) -> (SlotIndex, u32) {
        let entry = Entry::new(weight, time_slice, vruntime, payload);
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Slot::Occupied(entry);
            (idx, self.generations[idx as usize])
        } else {
            let idx = self.slots.len() as SlotIndex;
            self.slots.push(Slot::Occupied(entry));
            self.generations.push(0);
            (idx, 0)
        }
    }

    /// Free an arena slot that is not currently linked into the tree,
    /// returning its payload and bumping its generation so stale `NodeId`s
    /// referencing it are rejected.
    pub fn dealloc(&mut self, idx: SlotIndex) -> T {
        let slot = core::mem::replace(&mut self.slots[idx as usize], Slot::Free);
        self.generations[idx as usize] = self.generations[idx as usize].wrapping_add(1);
        self.free.push(idx);
        match slot {
            Slot::Occupied(e) => e.payload,
            Slot::Free => unreachable!("eevdf-queue: double free of timeline slot"),
        }
    }

    // ---- tree linkage -------------------------------------------------

    fn color_of(&self, idx: Option<SlotIndex>) -> Color {
        match idx {
            Some(i) => self.entry(i).color,
            None => Color::Black,
        }
    }

    fn set_color(&mut self, idx: SlotIndex, color: Color) {
        self.entry_mut(idx).color = color;
    }

    fn parent_of(&self, idx: SlotIndex) -> Option<SlotIndex> {
        self.entry(idx).parent
    }

    fn left_of(&self, idx: SlotIndex) -> Option<SlotIndex> {
        self.entry(idx).left
    }

    fn right_of(&self, idx: SlotIndex) -> Option<SlotIndex> {
        self.entry(idx).right
    }

    fn set_parent(&mut self, idx: SlotIndex, p: Option<SlotIndex>) {
        self.entry_mut(idx).parent = p;
    }

    fn set_left(&mut self, idx: SlotIndex, l: Option<SlotIndex>) {
        self.entry_mut(idx).left = l;
    }

    fn set_right(&mut self, idx: SlotIndex, r: Option<SlotIndex>) {
        self.entry_mut(idx).right = r;
    }

    fn min_vruntime_of(&self, idx: Option<SlotIndex>) -> i64 {
        match idx {
            Some(i) => self.entry(i).min_vruntime,
            None => i64::MAX,
        }
    }

    /// Recompute `idx`'s `min_vruntime` from its current children. Returns
    /// `true` if the value changed, so propagation upward can stop at the
    /// first ancestor whose value didn't change.
    fn recompute_min(&mut self, idx: SlotIndex) -> bool {
        let left = self.left_of(idx);
        let right = self.right_of(idx);
        let own = self.entry(idx).vruntime;
        let new_min = own.min(self.min_vruntime_of(left)).min(self.min_vruntime_of(right));
        let e = self.entry_mut(idx);
        let changed = e.min_vruntime != new_min;
        e.min_vruntime = new_min;
        changed
    }

    /// Walk from `start` up to the root, recomputing `min_vruntime` at each
    /// ancestor, stopping as soon as a recompute doesn't change anything.
    fn propagate(&mut self, start: Option<SlotIndex>) {
        let mut cursor = start;
        while let Some(idx) = cursor {
            if !self.recompute_min(idx) {
                break;
            }
            cursor = self.parent_of(idx);
        }
    }

    fn rotate_left(&mut self, x: SlotIndex) {
        let y = self.right_of(x).expect("rotate_left requires a right child");
        let beta = self.left_of(y);
        self.set_right(x, beta);
        if let Some(b) = beta {
            self.set_parent(b, Some(x));
        }
        let xp = self.parent_of(x);
        match xp {
            None => self.root = Some(y),
            Some(p) => {
                if self.left_of(p) == Some(x) {
                    self.set_left(p, Some(y));
                } else {
                    self.set_right(p, Some(y));
                }
            }
        }
        self.set_parent(y, xp);
        self.set_left(y, Some(x));
        self.set_parent(x, Some(y));

        // Augmentation: y's new subtree is exactly x's old subtree, so y
        // inherits x's pre-rotation aggregate; x then recomputes fresh from
        // its (now smaller) new children.
        let old_x_min = self.entry(x).min_vruntime;
        self.recompute_min(x);
        self.entry_mut(y).min_vruntime = old_x_min;
    }

    fn rotate_right(&mut self, x: SlotIndex) {
        let y = self.left_of(x).expect("rotate_right requires a left child");
        let beta = self.right_of(y);
        self.set_left(x, beta);
        if let Some(b) = beta {
            self.set_parent(b, Some(x));
        }
        let xp = self.parent_of(x);
        match xp {
            None => self.root = Some(y),
            Some(p) => {
                if self.left_of(p) == Some(x) {
                    self.set_left(p, Some(y));
                } else {
                    self.set_right(p, Some(y));
                }
            }
        }
        self.set_parent(y, xp);
        self.set_right(y, Some(x));
        self.set_parent(x, Some(y));

        let old_x_min = self.entry(x).min_vruntime;
        self.recompute_min(x);
        self.entry_mut(y).min_vruntime = old_x_min;
    }

    /// Link a freshly-allocated (or detached-and-ready-to-requeue) slot into
    /// the tree by its current `vdeadline`, then rebalance.
    pub fn link(&mut self, idx: SlotIndex) {
        {
            let e = self.entry_mut(idx);
            e.parent = None;
            e.left = None;
            e.right = None;
            e.color = Color::Red;
            e.min_vruntime = e.vruntime;
            e.state = NodeState::Queued;
        }
        let my_deadline = self.entry(idx).vdeadline;

        let mut parent = None;
        let mut cursor = self.root;
        let mut went_left = true;
        while let Some(c) = cursor {
            parent = Some(c);
            let ord = deadline_order(my_deadline, idx, self.entry(c).vdeadline, c);
            if ord == Ordering::Less {
                went_left = true;
                cursor = self.left_of(c);
            } else {
                went_left = false;
                cursor = self.right_of(c);
            }
        }
        self.set_parent(idx, parent);
        match parent {
            None => self.root = Some(idx),
            Some(p) => {
                if went_left {
                    self.set_left(p, Some(idx));
                } else {
                    self.set_right(p, Some(idx));
                }
            }
        }

        match self.leftmost {
            None => self.leftmost = Some(idx),
            Some(lm) => {
                // A new insertion can only beat the cached minimum-deadline
                // node by landing as its left child (the BST-insert walk
                // only reaches `lm` when every earlier comparison went left).
                if went_left && parent == Some(lm) {
                    self.leftmost = Some(idx);
                }
            }
        }

        self.propagate(parent);
        self.insert_fixup(idx);
    }

    fn insert_fixup(&mut self, mut z: SlotIndex) {
        while let Some(zp) = self.parent_of(z) {
            if self.color_of(Some(zp)) == Color::Black {
                break;
            }
            let zpp = match self.parent_of(zp) {
                Some(p) => p,
                None => break, // zp is the root; a red root cannot happen if invariants held before this call.
            };
            if Some(zp) == self.left_of(zpp) {
                let uncle = self.right_of(zpp);
                if self.color_of(uncle) == Color::Red {
                    self.set_color(zp, Color::Black);
                    self.set_color(uncle.unwrap(), Color::Black);
                    self.set_color(zpp, Color::Red);
                    z = zpp;
                } else {
                    if Some(z) == self.right_of(zp) {
                        z = zp;
                        self.rotate_left(z);
                    }
                    let p = self.parent_of(z).unwrap();
                    let gp = self.parent_of(p).unwrap();
                    self.set_color(p, Color::Black);
                    self.set_color(gp, Color::Red);
                    self.rotate_right(gp);
                }
            } else {
                let uncle = self.left_of(zpp);
                if self.color_of(uncle) == Color::Red {
                    self.set_color(zp, Color::Black);
                    self.set_color(uncle.unwrap(), Color::Black);
                    self.set_color(zpp, Color::Red);
                    z = zpp;
                } else {
                    if Some(z) == self.left_of(zp) {
                        z = zp;
                        self.rotate_right(z);
                    }
                    let p = self.parent_of(z).unwrap();
                    let gp = self.parent_of(p).unwrap();
                    self.set_color(p, Color::Black);
                    self.set_color(gp, Color::Red);
                    self.rotate_left(gp);
                }
            }
        }
        let root = self.root.expect("insert_fixup called on an empty tree");
        self.set_color(root, Color::Black);
    }

    fn minimum(&self, mut idx: SlotIndex) -> SlotIndex {
        while let Some(l) = self.left_of(idx) {
            idx = l;
        }
        idx
    }

    /// Detach `z` from the tree. `z` remains a valid (occupied) arena slot
    /// afterward — the caller decides whether to [`Self::dealloc`] it or
    /// [`Self::link`] it back in later (the `Current`/requeue path).
    pub fn remove(&mut self, z: SlotIndex) {
        if self.leftmost == Some(z) {
            self.leftmost = match self.right_of(z) {
                Some(r) => Some(self.minimum(r)),
                None => self.parent_of(z),
            };
        }

        let z_left = self.left_of(z);
        let z_right = self.right_of(z);
        let y_original_color;
        let x: Option<SlotIndex>;
        let propagate_from: Option<SlotIndex>;
        let fixup_parent: Option<SlotIndex>;

        if z_left.is_none() {
            x = z_right;
            let zp = self.parent_of(z);
            y_original_color = self.color_of(Some(z));
            self.transplant(z, z_right);
            propagate_from = zp;
            fixup_parent = zp;
        } else if z_right.is_none() {
            x = z_left;
            let zp = self.parent_of(z);
            y_original_color = self.color_of(Some(z));
            self.transplant(z, z_left);
            propagate_from = zp;
            fixup_parent = zp;
        } else {
            let y = self.minimum(z_right.unwrap());
            y_original_color = self.color_of(Some(y));
            x = self.right_of(y);
            if self.parent_of(y) == Some(z) {
                if let Some(xx) = x {
                    self.set_parent(xx, Some(y));
                }
                fixup_parent = Some(y);
                propagate_from = Some(y);
            } else {
                let yp = self.parent_of(y).unwrap();
                self.transplant(y, self.right_of(y));
                self.set_right(y, z_right);
                if let Some(r) = self.right_of(y) {
                    self.set_parent(r, Some(y));
                }
                fixup_parent = Some(yp);
                propagate_from = Some(yp);
            }
            self.transplant(z, Some(y));
            self.set_left(y, z_left);
            if let Some(l) = self.left_of(y) {
                self.set_parent(l, Some(y));
            }
            self.set_color(y, self.color_of(Some(z)));
        }

        self.propagate(propagate_from);

        if y_original_color == Color::Black {
            self.delete_fixup(x, fixup_parent);
        }

        let e = self.entry_mut(z);
        e.parent = None;
        e.left = None;
        e.right = None;
    }

    fn transplant(&mut self, u: SlotIndex, v: Option<SlotIndex>) {
        let up = self.parent_of(u);
        match up {
            None => self.root = v,
            Some(p) => {
                if self.left_of(p) == Some(u) {
                    self.set_left(p, v);
                } else {
                    self.set_right(p, v);
                }
            }
        }
        if let Some(vv) = v {
            self.set_parent(vv, up);
        }
    }

    fn delete_fixup(&mut self, mut x: Option<SlotIndex>, mut x_parent: Option<SlotIndex>) {
        while x != self.root && self.color_of(x) == Color::Black {
            let xp = match x_parent {
                Some(p) => p,
                None => break,
            };
            if x == self.left_of(xp) {
                let mut w = self.right_of(xp);
                if self.color_of(w) == Color::Red {
                    self.set_color(w.unwrap(), Color::Black);
                    self.set_color(xp, Color::Red);
                    self.rotate_left(xp);
                    w = self.right_of(xp);
                }
                let w_idx = w.expect("red-black invariant violated: missing sibling");
                if self.color_of(self.left_of(w_idx)) == Color::Black
                    && self.color_of(self.right_of(w_idx)) == Color::Black
                {
                    self.set_color(w_idx, Color::Red);
                    x = Some(xp);
                    x_parent = self.parent_of(xp);
                } else {
                    if self.color_of(self.right_of(w_idx)) == Color::Black {
                        if let Some(wl) = self.left_of(w_idx) {
                            self.set_color(wl, Color::Black);
                        }
                        self.set_color(w_idx, Color::Red);
                        self.rotate_right(w_idx);
                        w = self.right_of(xp);
                    }
                    let w_idx = w.unwrap();
                    self.set_color(w_idx, self.color_of(Some(xp)));
                    self.set_color(xp, Color::Black);
                    if let Some(wr) = self.right_of(w_idx) {
                        self.set_color(wr, Color::Black);
                    }
                    self.rotate_left(xp);
                    x = self.root;
                    x_parent = None;
                }
            } else {
                let mut w = self.left_of(xp);
                if self.color_of(w) == Color::Red {
                    self.set_color(w.unwrap(), Color::Black);
                    self.set_color(xp, Color::Red);
                    self.rotate_right(xp);
                    w = self.left_of(xp);
                }
                let w_idx = w.expect("red-black invariant violated: missing sibling");
                if self.color_of(self.right_of(w_idx)) == Color::Black
                    && self.color_of(self.left_of(w_idx)) == Color::Black
                {
                    self.set_color(w_idx, Color::Red);
                    x = Some(xp);
                    x_parent = self.parent_of(xp);
                } else {
                    if self.color_of(self.left_of(w_idx)) == Color::Black {
                        if let Some(wr) = self.right_of(w_idx) {
                            self.set_color(wr, Color::Black);
                        }
                        self.set_color(w_idx, Color::Red);
                        self.rotate_left(w_idx);
                        w = self.left_of(xp);
                    }
                    let w_idx = w.unwrap();
                    self.set_color(w_idx, self.color_of(Some(xp)));
                    self.set_color(xp, Color::Black);
                    if let Some(wl) = self.left_of(w_idx) {
                        self.set_color(wl, Color::Black);
                    }
                    self.rotate_right(xp);
                    x = self.root;
                    x_parent = None;
                }
            }
        }
        if let Some(xi) = x {
            self.set_color(xi, Color::Black);
        }
    }

    // ---- selector -------------------------------------------

    /// Return the eligible node (`vruntime <= vtime`) with the smallest
    /// `vdeadline`, without removing it.
    pub fn select(&self, vtime: i64) -> Option<SlotIndex> {
        let root = self.root?;
        if let Some(lm) = self.leftmost {
            if self.entry(lm).is_eligible(vtime) {
                return Some(lm);
            }
        }
        let mut node = root;
        loop {
            if let Some(l) = self.left_of(node) {
                if self.entry(l).min_vruntime <= vtime {
                    node = l;
                    continue;
                }
            }
            if self.entry(node).is_eligible(vtime) {
                return Some(node);
            }
            node = self
                .right_of(node)
                .expect("selector invariant violated: no eligible node in a non-empty subtree");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    // ---- test-only introspection -------------------------------------------

    #[cfg(test)]
    pub fn inorder_deadlines(&self) -> Vec<i64> {
        fn walk<T>(tree: &Timeline<T>, idx: Option<SlotIndex>, out: &mut Vec<i64>) {
            if let Some(i) = idx {
                walk(tree, tree.left_of(i), out);
                out.push(tree.entry(i).vdeadline);
                walk(tree, tree.right_of(i), out);
            }
        }
        let mut out = Vec::new();
        walk(self, self.root, &mut out);
        out
    }

    /// Every occupied slot's `(vruntime, weight)`, regardless of whether it
    /// is currently linked into the tree — this covers `Queued` nodes and
    /// the detached-but-still-`Current` node alike, which is exactly the set
    /// the lag-sum-zero invariant quantifies over.
    #[cfg(test)]
    pub fn all_occupied(&self) -> Vec<(i64, u32)> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                Slot::Occupied(e) => Some((e.vruntime, e.weight)),
                Slot::Free => None,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn check_augmentation(&self) -> bool {
        fn walk<T>(tree: &Timeline<T>, idx: Option<SlotIndex>) -> Option<i64> {
            let i = idx?;
            let left_min = walk(tree, tree.left_of(i));
            let right_min = walk(tree, tree.right_of(i));
            let mut expected = tree.entry(i).vruntime;
            if let Some(lm) = left_min {
                expected = expected.min(lm);
            }
            if let Some(rm) = right_min {
                expected = expected.min(rm);
            }
            assert_eq!(
                expected,
                tree.entry(i).min_vruntime,
                "min_vruntime augmentation violated at slot {}",
                i
            );
            Some(expected)
        }
        walk(self, self.root);
        true
    }
}
