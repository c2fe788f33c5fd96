//! Inventory scanning: the remote hierarchy → an in-memory [`Tree`].
//!
//! Stage 1 of the export. Walks the [`Gateway`] depth-first from one or more
//! roots, preserving the source's manual sibling order, and returns the
//! committed tree together with a [`ScanReport`] of everything it left out.
//!
//! ## Pruning
//!
//! Pruning happens *before* insertion and before any further fetch:
//!
//! - An id in `exclude_ids` is dropped as soon as it shows up in a child
//!   listing, so neither its metadata nor its children are ever requested.
//! - A node carrying `exclude_label` is dropped after its metadata is read,
//!   and its children are never listed.
//!
//! ## Label forests
//!
//! With `include_label` set, every supplied root must carry the label and each
//! one becomes an independent root, unless it is already part of another
//! root's subtree. Matches nested under other matches therefore stay nested
//! and are exported once, whatever order the label search returned them in:
//! a root committed earlier that turns up later as a descendant of another
//! root is moved under its real parent.
//!
//! ## Cycles
//!
//! A well-formed hierarchy has none, but a child whose id is already an
//! ancestor of the current branch is recorded as a [`CycleDetected`] and that
//! link is not followed. The rest of the scan continues.
//!
//! The scanner is strictly sequential; manual order and prune-before-fetch
//! both depend on it.

use crate::gateway::{Gateway, GatewayError, PageMetadata};
use crate::types::{Tree, TreeNode};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ScanError {
    /// The tree cannot be built: a root did not resolve or the gateway failed.
    #[error("discovery failed at {id}: {source}")]
    Discovery {
        id: String,
        #[source]
        source: GatewayError,
    },
}

/// A child link that points back at one of its own ancestors.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cycle detected: {id} is an ancestor of itself (via {})", .path.join(" > "))]
pub struct CycleDetected {
    pub id: String,
    /// Ids from the root down to the node that listed `id` as a child.
    pub path: Vec<String>,
}

/// Why a node was left out of the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PruneReason {
    ExcludedId,
    ExcludedLabel(String),
    MissingIncludeLabel(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pruned {
    pub id: String,
    pub title: String,
    pub reason: PruneReason,
}

/// Everything the scan skipped, for the final report.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub pruned: Vec<Pruned>,
    pub cycles: Vec<CycleDetected>,
    /// Ids reached a second time outside a cycle; only the first placement is kept.
    pub duplicates: Vec<String>,
    /// Earlier roots moved under a parent found later (label forests).
    pub regrafted: Vec<String>,
    /// Children listed by the gateway whose metadata could no longer be found.
    pub vanished: Vec<String>,
}

/// The result of a scan: the frozen tree and its report.
#[derive(Debug)]
pub struct Inventory {
    pub tree: Tree,
    pub report: ScanReport,
}

/// What to scan and what to leave out.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub roots: Vec<String>,
    pub exclude_ids: HashSet<String>,
    pub include_label: Option<String>,
    pub exclude_label: Option<String>,
    /// `false` commits only the roots themselves (single-page export).
    pub recurse: bool,
}

impl ScanRequest {
    /// A full subtree below one root.
    pub fn tree(root: impl Into<String>) -> Self {
        Self {
            roots: vec![root.into()],
            recurse: true,
            ..Self::default()
        }
    }

    /// A single page with no descendants.
    pub fn single(root: impl Into<String>) -> Self {
        Self {
            roots: vec![root.into()],
            recurse: false,
            ..Self::default()
        }
    }

    /// One independent root per item carrying `label`.
    pub fn forest(roots: Vec<String>, label: impl Into<String>) -> Self {
        Self {
            roots,
            include_label: Some(label.into()),
            recurse: true,
            ..Self::default()
        }
    }

    pub fn exclude_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn exclude_label(mut self, label: Option<String>) -> Self {
        self.exclude_label = label;
        self
    }
}

/// Build the tree described by `request`.
pub fn scan<G: Gateway + ?Sized>(gateway: &G, request: &ScanRequest) -> Result<Inventory, ScanError> {
    info!("Scanning inventory from {} root(s)", request.roots.len());
    let mut scanner = Scanner {
        gateway,
        request,
        committed: HashSet::new(),
        roots: Vec::new(),
        report: ScanReport::default(),
    };

    for root_id in &request.roots {
        if scanner.committed.contains(root_id) {
            debug!("Root {} already exported inside another root", root_id);
            continue;
        }
        if request.exclude_ids.contains(root_id) {
            scanner.prune(root_id, "", PruneReason::ExcludedId);
            continue;
        }
        let meta = gateway
            .get_metadata(root_id)
            .map_err(|source| ScanError::Discovery {
                id: root_id.clone(),
                source,
            })?;
        if let Some(label) = &request.include_label
            && !meta.labels.contains(label)
        {
            scanner.prune(&meta.id, &meta.title, PruneReason::MissingIncludeLabel(label.clone()));
            continue;
        }
        let mut ancestors = Vec::new();
        if let Some(node) = scanner.expand(meta, true, &mut ancestors)? {
            scanner.roots.push(node);
        }
    }

    let tree = Tree::new(scanner.roots);
    info!(
        "Inventory complete: {} page(s), {} pruned",
        tree.len(),
        scanner.report.pruned.len()
    );
    Ok(Inventory {
        tree,
        report: scanner.report,
    })
}

struct Scanner<'a, G: ?Sized> {
    gateway: &'a G,
    request: &'a ScanRequest,
    /// Every id placed in the tree so far.
    committed: HashSet<String>,
    roots: Vec<TreeNode>,
    report: ScanReport,
}

impl<G: Gateway + ?Sized> Scanner<'_, G> {
    /// Turn one item into a node, recursing into its children.
    ///
    /// Returns `None` when the item itself is pruned.
    fn expand(
        &mut self,
        meta: PageMetadata,
        has_children: bool,
        ancestors: &mut Vec<String>,
    ) -> Result<Option<TreeNode>, ScanError> {
        if let Some(label) = &self.request.exclude_label
            && meta.labels.contains(label)
        {
            self.prune(&meta.id, &meta.title, PruneReason::ExcludedLabel(label.clone()));
            return Ok(None);
        }

        self.committed.insert(meta.id.clone());
        let mut node = node_from_metadata(meta);
        debug!("Scanned {} ({})", node.id, node.title);

        if !self.request.recurse || !has_children {
            return Ok(Some(node));
        }

        let children = self
            .gateway
            .list_children(&node.id)
            .map_err(|source| ScanError::Discovery {
                id: node.id.clone(),
                source,
            })?;

        ancestors.push(node.id.clone());
        for child in children {
            if child.id == node.id || ancestors.contains(&child.id) {
                let cycle = CycleDetected {
                    id: child.id.clone(),
                    path: ancestors.clone(),
                };
                warn!("{}", cycle);
                self.report.cycles.push(cycle);
                continue;
            }
            if self.request.exclude_ids.contains(&child.id) {
                self.prune(&child.id, &child.title, PruneReason::ExcludedId);
                continue;
            }
            if self.committed.contains(&child.id) {
                if let Some(pos) = self.roots.iter().position(|r| r.id == child.id) {
                    debug!("Moving root {} under {}", child.id, node.id);
                    node.children.push(self.roots.remove(pos));
                    self.report.regrafted.push(child.id);
                } else {
                    warn!("Page {} reached twice; keeping first placement", child.id);
                    self.report.duplicates.push(child.id);
                }
                continue;
            }

            let meta = match self.gateway.get_metadata(&child.id) {
                Ok(meta) => meta,
                Err(GatewayError::NotFound(_)) => {
                    warn!("Page {} listed under {} but not found", child.id, node.id);
                    self.report.vanished.push(child.id);
                    continue;
                }
                Err(source) => {
                    return Err(ScanError::Discovery {
                        id: child.id,
                        source,
                    });
                }
            };
            let mut meta = meta;
            if meta.title.is_empty() {
                meta.title = child.title;
            }
            if let Some(child_node) = self.expand(meta, child.has_children, ancestors)? {
                node.children.push(child_node);
            }
        }
        ancestors.pop();

        Ok(Some(node))
    }

    fn prune(&mut self, id: &str, title: &str, reason: PruneReason) {
        match &reason {
            PruneReason::ExcludedId => warn!("[Excluded by ID] Pruning tree at page {}", id),
            PruneReason::ExcludedLabel(label) => {
                warn!("[Excluded by label '{}'] Pruning tree at page {}", label, id)
            }
            PruneReason::MissingIncludeLabel(label) => {
                warn!("Root {} does not carry label '{}'; skipped", id, label)
            }
        }
        self.report.pruned.push(Pruned {
            id: id.to_string(),
            title: title.to_string(),
            reason,
        });
    }
}

fn node_from_metadata(meta: PageMetadata) -> TreeNode {
    let mut node = TreeNode::page(meta.id, meta.title);
    node.author = meta.author;
    node.modified_at = meta.modified_at;
    node.labels = meta.labels;
    node
}
