//! A generic prefix trie keyed by node names.
//!
//! Reads use it to hold the set of requested field paths, so that a walk
//! can decide in O(depth) whether a child lies on, above or below one of
//! them.

use std::collections::BTreeMap;

/// A prefix trie keyed by path segments.
///
/// # Example
///
/// ```rust
/// use xlate_core::PathTrie;
///
/// let mut trie: PathTrie<i32> = PathTrie::new();
/// trie.insert(&["config", "mtu"], 1);
/// trie.insert(&["state"], 2);
///
/// assert_eq!(trie.get(&["config", "mtu"]), Some(&1));
/// assert!(trie.get_subtrie(&["config"]).is_some());
///
/// // find_ancestor returns the deepest value along the path
/// let (value, depth) = trie.find_ancestor(&["state", "counters", "in-octets"]).unwrap();
/// assert_eq!(*value, 2);
/// assert_eq!(depth, 1);
/// ```
#[derive(Debug, Clone)]
pub struct PathTrie<T> {
    value: Option<T>,
    children: BTreeMap<String, PathTrie<T>>,
}

impl<T> Default for PathTrie<T> {
    fn default() -> Self {
        Self {
            value: None,
            children: BTreeMap::new(),
        }
    }
}

impl<T> PathTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_node<S: AsRef<str>>(&self, path: &[S]) -> Option<&PathTrie<T>> {
        let mut current = self;
        for segment in path {
            current = current.children.get(segment.as_ref())?;
        }
        Some(current)
    }

    /// Insert a value at path. Returns previous value if any.
    pub fn insert<S: AsRef<str>>(&mut self, path: &[S], value: T) -> Option<T> {
        let mut current = self;
        for segment in path {
            current = current
                .children
                .entry(segment.as_ref().to_string())
                .or_default();
        }
        current.value.replace(value)
    }

    /// Get reference to value at exact path.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&T> {
        self.get_node(path)?.value.as_ref()
    }

    /// Get reference to subtrie at path. `Some` means `path` is a prefix of
    /// (or equal to) some inserted path.
    pub fn get_subtrie<S: AsRef<str>>(&self, path: &[S]) -> Option<&PathTrie<T>> {
        self.get_node(path)
    }

    pub fn contains_value<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.get(path).is_some()
    }

    /// Count of values in trie (not nodes).
    pub fn len(&self) -> usize {
        let self_count = usize::from(self.value.is_some());
        let children_count: usize = self.children.values().map(|child| child.len()).sum();
        self_count + children_count
    }

    /// True if no values anywhere in trie.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.values().all(|c| c.is_empty())
    }

    /// Find the deepest value along `path`.
    ///
    /// Returns the value and the number of segments consumed to reach it.
    pub fn find_ancestor<S: AsRef<str>>(&self, path: &[S]) -> Option<(&T, usize)> {
        let mut current = self;
        let mut last = self.value.as_ref().map(|v| (v, 0));

        for (depth, segment) in path.iter().enumerate() {
            match current.children.get(segment.as_ref()) {
                Some(child) => {
                    current = child;
                    if let Some(v) = child.value.as_ref() {
                        last = Some((v, depth + 1));
                    }
                }
                None => break,
            }
        }

        last
    }
}
