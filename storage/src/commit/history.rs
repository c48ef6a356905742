use super::CommitTree;
use lanes_utils::Digest;

/// Every [CommitTree] a client has committed (or reverted to), oldest first.
///
/// Roots are unique: recording a tree whose root is already present is a no-op.
/// Lookups scan from the newest tree, which is almost always the one wanted.
#[derive(Clone, Debug, Default)]
pub struct History {
    trees: Vec<CommitTree>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `tree` unless its root is already recorded.
    ///
    /// Returns `true` if the tree was appended.
    pub fn push(&mut self, tree: CommitTree) -> bool {
        if self.contains(&tree.root()) {
            return false;
        }
        self.trees.push(tree);
        true
    }

    /// Position of the tree with `root`.
    pub fn find(&self, root: &Digest) -> Option<usize> {
        self.trees.iter().rposition(|tree| tree.root() == *root)
    }

    pub fn get(&self, index: usize) -> Option<&CommitTree> {
        self.trees.get(index)
    }

    pub fn contains(&self, root: &Digest) -> bool {
        self.find(root).is_some()
    }

    /// Drop every tree recorded after position `index`.
    pub fn truncate_after(&mut self, index: usize) {
        self.trees.truncate(index + 1);
    }

    /// Replace the whole history with `tree`.
    pub fn reset(&mut self, tree: CommitTree) {
        self.trees.clear();
        self.trees.push(tree);
    }

    /// The most recently recorded tree.
    pub fn last(&self) -> Option<&CommitTree> {
        self.trees.last()
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}
