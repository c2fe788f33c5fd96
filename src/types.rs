//! The content tree shared by every pipeline stage.
//!
//! The scanner produces a [`Tree`], the sidebar serializer renders it, the
//! download pipeline reads it from many threads at once, and the patcher
//! rebuilds one from edited Markdown. Nothing mutates a tree after the stage
//! that built it hands it on; `Tree` is `Sync` and is shared by reference.
//!
//! ## Invariants
//!
//! - Strict forest: every node is owned by exactly one parent (or is a root).
//! - `id` is unique across the whole tree.
//! - Sibling order is the order the scanner (or a human editor) produced.
//! - Nodes pruned during the scan never appear; there is no "excluded" flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One exported unit: a downloaded page, or a folder created in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    /// Output-relative path without extension (`pages/<slug>--<id>`).
    /// `None` for folders, which have no backing file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// A page node with its local path derived from title and id.
    pub fn page(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        let title = title.into();
        let local_path = Some(crate::naming::local_path(&title, &id));
        Self {
            id,
            title,
            author: None,
            modified_at: None,
            labels: BTreeSet::new(),
            local_path,
            children: Vec::new(),
        }
    }

    /// A grouping node with no file behind it.
    pub fn folder(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: None,
            modified_at: None,
            labels: BTreeSet::new(),
            local_path: None,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TreeNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_folder(&self) -> bool {
        self.local_path.is_none()
    }

    /// File name of the rendered page inside `pages/`, e.g. `Home--42.html`.
    pub fn file_name(&self) -> Option<String> {
        self.local_path
            .as_deref()
            .map(|p| format!("{}.html", p.rsplit('/').next().unwrap_or(p)))
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(TreeNode::subtree_len).sum::<usize>()
    }
}

/// Metadata of a remote attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub filename: String,
    /// Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// An ordered forest of [`TreeNode`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub roots: Vec<TreeNode>,
}

impl Tree {
    pub fn new(roots: Vec<TreeNode>) -> Self {
        Self { roots }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total node count.
    pub fn len(&self) -> usize {
        self.roots.iter().map(TreeNode::subtree_len).sum()
    }

    /// Pre-order, depth-first iteration in sibling order.
    pub fn iter(&self) -> TreeIter<'_> {
        TreeIter {
            stack: self.roots.iter().rev().collect(),
        }
    }

    /// Pre-order iteration yielding each node with its depth (roots are 0).
    pub fn iter_with_depth(&self) -> impl Iterator<Item = (usize, &TreeNode)> {
        let mut stack: Vec<(usize, &TreeNode)> = self.roots.iter().rev().map(|n| (0, n)).collect();
        std::iter::from_fn(move || {
            let (depth, node) = stack.pop()?;
            stack.extend(node.children.iter().rev().map(|c| (depth + 1, c)));
            Some((depth, node))
        })
    }

    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        self.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Map of page id → local path, for cross-reference rewriting.
    pub fn path_index(&self) -> HashMap<&str, &str> {
        self.iter()
            .filter_map(|n| n.local_path.as_deref().map(|p| (n.id.as_str(), p)))
            .collect()
    }

    /// Ids of the nodes on the path from a root down to `id`, excluding `id`.
    ///
    /// Empty when `id` is a root or absent.
    pub fn ancestors_of(&self, id: &str) -> Vec<&str> {
        fn walk<'a>(nodes: &'a [TreeNode], id: &str, path: &mut Vec<&'a str>) -> bool {
            for node in nodes {
                if node.id == id {
                    return true;
                }
                path.push(&node.id);
                if walk(&node.children, id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }
        let mut path = Vec::new();
        if walk(&self.roots, id, &mut path) {
            path
        } else {
            Vec::new()
        }
    }
}

/// Iterator returned by [`Tree::iter`].
pub struct TreeIter<'a> {
    stack: Vec<&'a TreeNode>,
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
