//! Red-black sibling trees over the directory arena.
//!
//! Every storage keeps its children in a red-black tree whose root is the
//! storage's `child` link; nodes are linked through `left`/`right` and the
//! in-memory `tree_parent`. All operations address nodes by SID, `NOSTREAM`
//! plays the role of the black NIL leaf.

use super::entry::{Color, DirectoryEntry};
use crate::ole::consts::NOSTREAM;
use std::cmp::Ordering;

/// Compound-file name order: shorter UTF-16 names first, then a code-unit
/// comparison of the upper-cased names.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let a_units: Vec<u16> = a.encode_utf16().collect();
    let b_units: Vec<u16> = b.encode_utf16().collect();
    a_units.len().cmp(&b_units.len()).then_with(|| {
        a_units
            .iter()
            .map(|&u| upper_unit(u))
            .cmp(b_units.iter().map(|&u| upper_unit(u)))
    })
}

/// Simple upper-case mapping of one UTF-16 code unit (surrogates unchanged).
fn upper_unit(unit: u16) -> u16 {
    let Some(ch) = char::from_u32(u32::from(unit)) else {
        return unit;
    };
    let mut upper = ch.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(single), None) => u16::try_from(u32::from(single)).unwrap_or(unit),
        _ => unit,
    }
}

/// Index-based red-black tree operations for the children of one storage.
pub(crate) struct SiblingTree<'a> {
    entries: &'a mut [DirectoryEntry],
    storage: u32,
}

impl<'a> SiblingTree<'a> {
    pub(crate) fn new(entries: &'a mut [DirectoryEntry], storage: u32) -> Self {
        Self { entries, storage }
    }

    fn root(&self) -> u32 {
        self.entries[self.storage as usize].child
    }

    fn set_root(&mut self, sid: u32) {
        self.entries[self.storage as usize].child = sid;
    }

    fn left(&self, sid: u32) -> u32 {
        self.entries[sid as usize].left
    }

    fn right(&self, sid: u32) -> u32 {
        self.entries[sid as usize].right
    }

    fn parent(&self, sid: u32) -> u32 {
        self.entries[sid as usize].tree_parent
    }

    fn color(&self, sid: u32) -> Color {
        if sid == NOSTREAM {
            Color::Black
        } else {
            self.entries[sid as usize].color
        }
    }

    fn set_left(&mut self, sid: u32, value: u32) {
        self.entries[sid as usize].left = value;
    }

    fn set_right(&mut self, sid: u32, value: u32) {
        self.entries[sid as usize].right = value;
    }

    fn set_parent(&mut self, sid: u32, value: u32) {
        if sid != NOSTREAM {
            self.entries[sid as usize].tree_parent = value;
        }
    }

    fn set_color(&mut self, sid: u32, color: Color) {
        if sid != NOSTREAM {
            self.entries[sid as usize].color = color;
        }
    }

    fn rotate_left(&mut self, x: u32) {
        let y = self.right(x);
        let y_left = self.left(y);
        self.set_right(x, y_left);
        self.set_parent(y_left, x);
        self.replace_child(x, y);
        self.set_left(y, x);
        self.set_parent(x, y);
    }

    fn rotate_right(&mut self, x: u32) {
        let y = self.left(x);
        let y_right = self.right(y);
        self.set_left(x, y_right);
        self.set_parent(y_right, x);
        self.replace_child(x, y);
        self.set_right(y, x);
        self.set_parent(x, y);
    }

    /// Put `new` where `old` hangs in the tree (the parent link of `new` follows).
    fn replace_child(&mut self, old: u32, new: u32) {
        let parent = self.parent(old);
        if parent == NOSTREAM {
            self.set_root(new);
        } else if self.left(parent) == old {
            self.set_left(parent, new);
        } else {
            self.set_right(parent, new);
        }
        self.set_parent(new, parent);
    }

    fn minimum(&self, mut sid: u32) -> u32 {
        while self.left(sid) != NOSTREAM {
            sid = self.left(sid);
        }
        sid
    }

    /// Insert `node`, whose name must not collide with an existing sibling.
    pub(crate) fn insert(&mut self, node: u32) {
        let mut parent = NOSTREAM;
        let mut current = self.root();
        let mut went_left = false;
        while current != NOSTREAM {
            parent = current;
            went_left = compare_names(
                &self.entries[node as usize].name,
                &self.entries[current as usize].name,
            ) == Ordering::Less;
            current = if went_left {
                self.left(current)
            } else {
                self.right(current)
            };
        }

        {
            let entry = &mut self.entries[node as usize];
            entry.left = NOSTREAM;
            entry.right = NOSTREAM;
            entry.tree_parent = parent;
            entry.color = Color::Red;
        }
        if parent == NOSTREAM {
            self.set_root(node);
        } else if went_left {
            self.set_left(parent, node);
        } else {
            self.set_right(parent, node);
        }
        self.insert_fixup(node);
    }

    fn insert_fixup(&mut self, mut z: u32) {
        while self.color(self.parent(z)) == Color::Red {
            let p = self.parent(z);
            let g = self.parent(p);
            if p == self.left(g) {
                let uncle = self.right(g);
                if self.color(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(g, Color::Red);
                    z = g;
                } else {
                    if z == self.right(p) {
                        z = p;
                        self.rotate_left(z);
                    }
                    let p = self.parent(z);
                    let g = self.parent(p);
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_right(g);
                }
            } else {
                let uncle = self.left(g);
                if self.color(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(g, Color::Red);
                    z = g;
                } else {
                    if z == self.left(p) {
                        z = p;
                        self.rotate_right(z);
                    }
                    let p = self.parent(z);
                    let g = self.parent(p);
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_left(g);
                }
            }
        }
        let root = self.root();
        self.set_color(root, Color::Black);
    }

    /// Unlink `z` from the tree and rebalance.
    pub(crate) fn remove(&mut self, z: u32) {
        let mut removed_color = self.color(z);
        let x;
        let x_parent;

        if self.left(z) == NOSTREAM {
            x = self.right(z);
            x_parent = self.parent(z);
            self.replace_child(z, x);
        } else if self.right(z) == NOSTREAM {
            x = self.left(z);
            x_parent = self.parent(z);
            self.replace_child(z, x);
        } else {
            let y = self.minimum(self.right(z));
            removed_color = self.color(y);
            x = self.right(y);
            if self.parent(y) == z {
                x_parent = y;
            } else {
                x_parent = self.parent(y);
                self.replace_child(y, x);
                let z_right = self.right(z);
                self.set_right(y, z_right);
                self.set_parent(z_right, y);
            }
            self.replace_child(z, y);
            let z_left = self.left(z);
            self.set_left(y, z_left);
            self.set_parent(z_left, y);
            let z_color = self.color(z);
            self.set_color(y, z_color);
        }

        {
            let entry = &mut self.entries[z as usize];
            entry.left = NOSTREAM;
            entry.right = NOSTREAM;
            entry.tree_parent = NOSTREAM;
        }

        if removed_color == Color::Black {
            self.remove_fixup(x, x_parent);
        }
    }

    fn remove_fixup(&mut self, mut x: u32, mut x_parent: u32) {
        while x != self.root() && self.color(x) == Color::Black && x_parent != NOSTREAM {
            if x == self.left(x_parent) {
                let mut w = self.right(x_parent);
                if w == NOSTREAM {
                    break;
                }
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(x_parent, Color::Red);
                    self.rotate_left(x_parent);
                    w = self.right(x_parent);
                    if w == NOSTREAM {
                        break;
                    }
                }
                if self.color(self.left(w)) == Color::Black && self.color(self.right(w)) == Color::Black {
                    self.set_color(w, Color::Red);
                    x = x_parent;
                    x_parent = self.parent(x);
                } else {
                    if self.color(self.right(w)) == Color::Black {
                        let w_left = self.left(w);
                        self.set_color(w_left, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_right(w);
                        w = self.right(x_parent);
                    }
                    let parent_color = self.color(x_parent);
                    self.set_color(w, parent_color);
                    self.set_color(x_parent, Color::Black);
                    let w_right = self.right(w);
                    self.set_color(w_right, Color::Black);
                    self.rotate_left(x_parent);
                    x = self.root();
                    x_parent = NOSTREAM;
                }
            } else {
                let mut w = self.left(x_parent);
                if w == NOSTREAM {
                    break;
                }
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(x_parent, Color::Red);
                    self.rotate_right(x_parent);
                    w = self.left(x_parent);
                    if w == NOSTREAM {
                        break;
                    }
                }
                if self.color(self.right(w)) == Color::Black && self.color(self.left(w)) == Color::Black {
                    self.set_color(w, Color::Red);
                    x = x_parent;
                    x_parent = self.parent(x);
                } else {
                    if self.color(self.left(w)) == Color::Black {
                        let w_right = self.right(w);
                        self.set_color(w_right, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_left(w);
                        w = self.left(x_parent);
                    }
                    let parent_color = self.color(x_parent);
                    self.set_color(w, parent_color);
                    self.set_color(x_parent, Color::Black);
                    let w_left = self.left(w);
                    self.set_color(w_left, Color::Black);
                    self.rotate_right(x_parent);
                    x = self.root();
                    x_parent = NOSTREAM;
                }
            }
        }
        self.set_color(x, Color::Black);
    }

    /// Relink `sorted` (already in name order) as a balanced tree.
    ///
    /// Nodes on the last, incomplete level are red and all others black,
    /// which satisfies the red-black rules for any number of nodes.
    pub(crate) fn rebuild(&mut self, sorted: &[u32]) {
        let full_levels = usize::BITS - (sorted.len() + 1).leading_zeros() - 1;
        let root = self.build(sorted, NOSTREAM, 0, full_levels);
        self.set_root(root);
    }

    fn build(&mut self, nodes: &[u32], parent: u32, depth: u32, full_levels: u32) -> u32 {
        if nodes.is_empty() {
            return NOSTREAM;
        }
        let mid = nodes.len() / 2;
        let sid = nodes[mid];
        let left = self.build(&nodes[..mid], sid, depth + 1, full_levels);
        let right = self.build(&nodes[mid + 1..], sid, depth + 1, full_levels);
        let entry = &mut self.entries[sid as usize];
        entry.left = left;
        entry.right = right;
        entry.tree_parent = parent;
        entry.color = if depth >= full_levels {
            Color::Red
        } else {
            Color::Black
        };
        sid
    }
}

/// Check that the sibling tree under `root` is an ordered red-black tree:
/// strictly increasing names in order, black root, no red node with a red
/// child and equal black height on every path.
///
/// A red-black tree of `n` nodes is at most `2 * log2(n + 1)` deep, so the
/// walk gives up past that depth instead of following a long sibling list.
pub(crate) fn is_well_formed(entries: &[DirectoryEntry], root: u32) -> bool {
    fn walk<'e>(
        entries: &'e [DirectoryEntry],
        sid: u32,
        parent_red: bool,
        depth: u32,
        max_depth: u32,
        previous: &mut Option<&'e str>,
    ) -> Option<u32> {
        if sid == NOSTREAM {
            return Some(1);
        }
        if depth > max_depth {
            return None;
        }
        let entry = entries.get(sid as usize)?;
        let red = entry.color == Color::Red;
        if red && parent_red {
            return None;
        }
        let left = walk(entries, entry.left, red, depth + 1, max_depth, previous)?;
        if let Some(prev) = previous {
            if compare_names(prev, &entry.name) != Ordering::Less {
                return None;
            }
        }
        *previous = Some(&entry.name);
        let right = walk(entries, entry.right, red, depth + 1, max_depth, previous)?;
        if left != right {
            return None;
        }
        Some(left + u32::from(!red))
    }

    if root == NOSTREAM {
        return true;
    }
    let root_black = entries
        .get(root as usize)
        .is_some_and(|e| e.color == Color::Black);
    let max_depth = 2 * (usize::BITS - (entries.len() + 1).leading_zeros());
    root_black && walk(entries, root, false, 1, max_depth, &mut None).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ole::directory::entry::DirectoryEntry;

    fn arena(names: &[&str]) -> Vec<DirectoryEntry> {
        let mut entries = vec![DirectoryEntry::root()];
        for (i, name) in names.iter().enumerate() {
            let mut entry = DirectoryEntry::stream(name);
            entry.sid = i as u32 + 1;
            entries.push(entry);
        }
        entries
    }

    fn in_order(entries: &[DirectoryEntry], sid: u32, out: &mut Vec<String>) {
        if sid == NOSTREAM {
            return;
        }
        in_order(entries, entries[sid as usize].left, out);
        out.push(entries[sid as usize].name.clone());
        in_order(entries, entries[sid as usize].right, out);
    }

    #[test]
    fn test_compare_names() {
        assert_eq!(compare_names("Data", "1Table"), Ordering::Less);
        assert_eq!(compare_names("abc", "ABD"), Ordering::Less);
        assert_eq!(compare_names("foo", "FOO"), Ordering::Equal);
        assert_eq!(compare_names("WordDocument", "1Table"), Ordering::Greater);
    }

    #[test]
    fn test_insert_keeps_order_and_balance() {
        let names: Vec<String> = (0..50).map(|i| format!("S{:02}", (i * 37) % 50)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut entries = arena(&refs);
        for sid in 1..=50 {
            SiblingTree::new(&mut entries, 0).insert(sid);
        }
        let root = entries[0].child;
        assert!(is_well_formed(&entries, root));

        let mut order = Vec::new();
        in_order(&entries, root, &mut order);
        let mut expected = names.clone();
        expected.sort();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_remove_keeps_invariants() {
        let names: Vec<String> = (0..40).map(|i| format!("N{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut entries = arena(&refs);
        for sid in 1..=40 {
            SiblingTree::new(&mut entries, 0).insert(sid);
        }
        for sid in (1..=40).step_by(3) {
            SiblingTree::new(&mut entries, 0).remove(sid);
            assert!(is_well_formed(&entries, entries[0].child));
        }
        let mut order = Vec::new();
        in_order(&entries, entries[0].child, &mut order);
        assert_eq!(order.len(), 40 - 14);

        for sid in (1..=40).filter(|s| (s - 1) % 3 != 0) {
            SiblingTree::new(&mut entries, 0).remove(sid);
        }
        assert_eq!(entries[0].child, NOSTREAM);
    }

    #[test]
    fn test_rebuild_is_well_formed() {
        for n in 0..20u32 {
            let names: Vec<String> = (0..n).map(|i| format!("E{i:02}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut entries = arena(&refs);
            let sorted: Vec<u32> = (1..=n).collect();
            SiblingTree::new(&mut entries, 0).rebuild(&sorted);
            assert!(is_well_formed(&entries, entries[0].child), "n = {n}");
        }
    }

    #[test]
    fn test_all_black_chain_is_not_well_formed() {
        let mut entries = arena(&["A", "B", "C"]);
        entries[0].child = 1;
        entries[1].right = 2;
        entries[2].right = 3;
        assert!(!is_well_formed(&entries, 1));
    }
}
