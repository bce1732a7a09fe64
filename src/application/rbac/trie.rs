//! Permission trie
//!
//! Stores literal permission paths one segment per level. Queries may use
//! `*` and `**`; stored paths never do.

use std::collections::BTreeMap;
use std::fmt;

use crate::application::errors::RbacError;
use crate::domain::entities::permission::{ANY_DEPTH, ANY_SEGMENT};
use crate::domain::entities::PermissionPath;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TrieNode {
    children: BTreeMap<String, TrieNode>,
}

/// Set of valid permission paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTrie {
    root: TrieNode,
    case_sensitive: bool,
}

impl PermissionTrie {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            root: TrieNode::default(),
            case_sensitive,
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Parse `raw` the way this trie compares paths
    pub fn normalize(&self, raw: &str) -> Result<PermissionPath, RbacError> {
        PermissionPath::normalized(raw, self.case_sensitive)
    }

    /// Insert a literal path, creating every missing node
    pub fn add(&mut self, raw: &str) -> Result<PermissionPath, RbacError> {
        let path = self.normalize(raw)?;
        if path.has_wildcard() {
            return Err(RbacError::invalid_path(raw, "stored paths cannot contain '*' or '**'"));
        }
        let mut node = &mut self.root;
        for segment in path.segments() {
            node = node.children.entry(segment.clone()).or_default();
        }
        Ok(path)
    }

    /// Remove a path; returns whether any node was removed
    ///
    /// With `cascading`, ancestors left without children are removed too.
    /// A terminal `**` removes the node before it along with its subtree.
    pub fn delete(&mut self, raw: &str, cascading: bool) -> Result<bool, RbacError> {
        let path = self.normalize(raw)?;
        let segments = path.segments();
        if let Some(pos) = segments.iter().position(|s| s == ANY_DEPTH) {
            if pos != segments.len() - 1 {
                return Err(RbacError::invalid_path(raw, "'**' must be the last segment"));
            }
        }
        Ok(remove_from(&mut self.root.children, segments, cascading))
    }

    /// Whether `raw` matches a stored path
    ///
    /// `*` matches any one child, `**` matches as soon as it is reached.
    /// With `complete`, `**` has to be the last segment and a literal match
    /// must end on a node without children. Unparseable paths never exist.
    pub fn exists(&self, raw: &str, complete: bool) -> bool {
        match self.normalize(raw) {
            Ok(path) => self.exists_path(&path, complete),
            Err(_) => false,
        }
    }

    pub fn exists_path(&self, path: &PermissionPath, complete: bool) -> bool {
        exists_in(&self.root, path.segments(), complete)
    }

    /// Every stored path ending on a leaf, in lexical order
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect_leaves(&self.root, &mut prefix, &mut out);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    pub fn clear(&mut self) {
        self.root.children.clear();
    }
}

impl Default for PermissionTrie {
    fn default() -> Self {
        Self::new(false)
    }
}

fn remove_from(children: &mut BTreeMap<String, TrieNode>, segments: &[String], cascading: bool) -> bool {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return false,
    };

    if head == ANY_DEPTH {
        let removed = !children.is_empty();
        children.clear();
        return removed;
    }

    let keys: Vec<String> = if head == ANY_SEGMENT {
        children.keys().cloned().collect()
    } else if children.contains_key(head) {
        vec![head.clone()]
    } else {
        Vec::new()
    };

    let drops_subtree = rest.is_empty() || (rest.len() == 1 && rest[0] == ANY_DEPTH);
    let mut removed = false;
    for key in keys {
        let drop_child = if drops_subtree {
            true
        } else {
            match children.get_mut(&key) {
                Some(child) => {
                    let below = remove_from(&mut child.children, rest, cascading);
                    removed |= below;
                    below && cascading && child.children.is_empty()
                }
                None => false,
            }
        };
        if drop_child {
            children.remove(&key);
            removed = true;
        }
    }
    removed
}

fn exists_in(node: &TrieNode, segments: &[String], complete: bool) -> bool {
    match segments.split_first() {
        None => !complete || node.children.is_empty(),
        Some((head, rest)) if head == ANY_DEPTH => !complete || rest.is_empty(),
        Some((head, rest)) if head == ANY_SEGMENT => node
            .children
            .values()
            .any(|child| exists_in(child, rest, complete)),
        Some((head, rest)) => node
            .children
            .get(head)
            .map(|child| exists_in(child, rest, complete))
            .unwrap_or(false),
    }
}

fn collect_leaves(node: &TrieNode, prefix: &mut Vec<String>, out: &mut Vec<String>) {
    for (segment, child) in &node.children {
        prefix.push(segment.clone());
        if child.children.is_empty() {
            out.push(prefix.join("."));
        } else {
            collect_leaves(child, prefix, out);
        }
        prefix.pop();
    }
}

fn render(node: &TrieNode, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (segment, child) in &node.children {
        writeln!(f, "{}{}", "  ".repeat(depth), segment)?;
        render(child, depth + 1, f)?;
    }
    Ok(())
}

impl fmt::Display for PermissionTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "*")?;
        render(&self.root, 1, f)
    }
}
