//! Download phase: fetch every page of a frozen [`Tree`] and write the archive.
//!
//! The tree is complete before this stage starts, so every worker sees the
//! same sidebar and the same set of link targets. Work is the pre-order list
//! of page nodes, processed by a dedicated [rayon](https://docs.rs/rayon) pool
//! of `concurrency` threads:
//!
//! ```text
//! for each node (in parallel):
//!     body        ← gateway.get_rendered_body
//!     attachments ← gateway.list_attachments, each downloaded to
//!                   attachments/<node-id>/<filename>
//!     icons       ← /images/icons/ images of the body, downloaded once per
//!                   run to attachments/_icons/
//!     body        ← rewrite references (rewrite.rs)
//!     document    ← assemble with the node's sidebar (inject.rs)
//!     write pages/<slug>--<id>.html (+ .json metadata)
//! ```
//!
//! ## Failure policy
//!
//! Failures are per node and never stop the pool. A failed body fetch,
//! attachment listing or page write leaves no page file and is recorded as
//! [`NodeStatus::Failed`]. A single attachment that fails to download is
//! recorded on the node, and the page is still written with that reference
//! marked unresolved. So is an attachment whose sanitized file name collides
//! with an earlier one of the same page; the first keeps the file. An icon
//! that cannot be fetched stays remote and is listed as unresolved.
//!
//! ## Cancellation
//!
//! When the shared cancel flag is raised, nodes that have not started yet are
//! recorded as [`NodeStatus::Cancelled`]. Nodes already in flight finish; every
//! file goes through [`write_atomic`], so nothing is left half-written.
//!
//! ## Reporting
//!
//! Outcomes are collected from the pool in tree order into a
//! [`DownloadReport`]. Progress is streamed as [`DownloadEvent`]s over an
//! optional channel so the CLI can print while workers run.

use crate::fsutil::write_atomic;
use crate::gateway::Gateway;
use crate::inject::{SITE_CSS_PATH, assemble};
use crate::naming::{attachment_path, icon_path};
use crate::rewrite::{LinkTargets, LocalFiles, icon_references, rewrite_body};
use crate::sidebar::render_fragment;
use crate::types::{AttachmentRef, Tree, TreeNode};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Step of a node's download that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Body,
    AttachmentList,
    Write,
}

impl std::fmt::Display for FetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FetchStage::Body => "body fetch",
            FetchStage::AttachmentList => "attachment listing",
            FetchStage::Write => "page write",
        })
    }
}

/// A node that produced no page file.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{stage} failed for page {node_id}: {message}")]
pub struct FetchFailure {
    pub node_id: String,
    pub stage: FetchStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttachment {
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeStatus {
    Written {
        /// Output-relative path of the page file.
        path: String,
        attachments: usize,
        failed_attachments: Vec<FailedAttachment>,
        /// References in the body that still point at the server.
        unresolved: Vec<String>,
    },
    Failed(FetchFailure),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub id: String,
    pub title: String,
    pub status: NodeStatus,
}

/// Outcome of every page node, in tree order.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub outcomes: Vec<NodeOutcome>,
}

impl DownloadReport {
    pub fn written(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, NodeStatus::Written { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchFailure> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            NodeStatus::Failed(failure) => Some(failure),
            _ => None,
        })
    }

    pub fn cancelled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == NodeStatus::Cancelled)
            .count()
    }

    pub fn attachments(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                NodeStatus::Written { attachments, .. } => *attachments,
                _ => 0,
            })
            .sum()
    }

    pub fn failed_attachments(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                NodeStatus::Written {
                    failed_attachments, ..
                } => failed_attachments.len(),
                _ => 0,
            })
            .sum()
    }

    /// Every node was written.
    pub fn is_complete(&self) -> bool {
        self.written() == self.outcomes.len()
    }
}

/// Progress events streamed while the pool runs.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Started { total: usize },
    NodeFinished(NodeOutcome),
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Worker thread count (at least 1).
    pub concurrency: usize,
    /// Output-relative stylesheet paths, standard first.
    pub css_refs: Vec<String>,
    /// Also write `<page>.json` next to every page.
    pub write_metadata_json: bool,
    /// Site URL; references that stay remote resolve against its origin.
    pub base_url: Option<String>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            css_refs: vec![SITE_CSS_PATH.to_string()],
            write_metadata_json: true,
            base_url: None,
            cancel: None,
        }
    }
}

impl DownloadOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Icons already attempted in this run, keyed like [`icon_path`].
#[derive(Debug, Default)]
struct IconCache(Mutex<HashMap<String, bool>>);

impl IconCache {
    /// Whether `key` is in the archive, running `fetch` the first time it is seen.
    ///
    /// Two workers may fetch the same icon concurrently; both writes are
    /// atomic and carry the same bytes.
    fn ensure(&self, key: &str, fetch: impl FnOnce() -> Result<(), String>) -> bool {
        if let Some(&present) = self.0.lock().unwrap_or_else(PoisonError::into_inner).get(key) {
            return present;
        }
        let present = match fetch() {
            Ok(()) => true,
            Err(message) => {
                warn!("Icon {} could not be downloaded: {}", key, message);
                false
            }
        };
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), present);
        present
    }
}

/// Metadata written next to each page as `<page>.json`.
#[derive(Debug, Serialize)]
struct PageRecord<'a> {
    id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified_at: Option<DateTime<Utc>>,
    labels: &'a BTreeSet<String>,
    attachments: &'a [AttachmentRef],
    downloaded_at: DateTime<Utc>,
}

/// Download every page of `tree` into `output_root`.
///
/// Only setup problems (output directory, worker pool) are errors; everything
/// that goes wrong for an individual page ends up in the report.
pub fn download<G: Gateway + ?Sized>(
    gateway: &G,
    tree: &Tree,
    output_root: &Path,
    options: &DownloadOptions,
    events: Option<Sender<DownloadEvent>>,
) -> Result<DownloadReport, DownloadError> {
    let nodes: Vec<&TreeNode> = tree.iter().filter(|n| !n.is_folder()).collect();
    std::fs::create_dir_all(output_root.join(crate::naming::PAGES_DIR))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.concurrency.max(1))
        .build()?;
    let targets = LinkTargets::new(tree).with_base_url(options.base_url.as_deref());
    let icons = IconCache::default();

    info!(
        "Downloading {} page(s) with {} worker(s)",
        nodes.len(),
        options.concurrency.max(1)
    );
    if let Some(tx) = &events {
        tx.send(DownloadEvent::Started { total: nodes.len() }).ok();
    }

    let outcomes: Vec<NodeOutcome> = pool.install(|| {
        nodes
            .par_iter()
            .map_with(events, |tx, node| {
                let status = if options.is_cancelled() {
                    NodeStatus::Cancelled
                } else {
                    let worker = Worker {
                        gateway,
                        tree,
                        targets: &targets,
                        icons: &icons,
                        output_root,
                        options,
                    };
                    worker.run(node)
                };
                let outcome = NodeOutcome {
                    id: node.id.clone(),
                    title: node.title.clone(),
                    status,
                };
                if let Some(tx) = tx {
                    tx.send(DownloadEvent::NodeFinished(outcome.clone())).ok();
                }
                outcome
            })
            .collect()
    });

    let report = DownloadReport { outcomes };
    info!(
        "Download finished: {} written, {} failed, {} cancelled",
        report.written(),
        report.failures().count(),
        report.cancelled()
    );
    Ok(report)
}

struct Worker<'a, G: ?Sized> {
    gateway: &'a G,
    tree: &'a Tree,
    targets: &'a LinkTargets<'a>,
    icons: &'a IconCache,
    output_root: &'a Path,
    options: &'a DownloadOptions,
}

impl<G: Gateway + ?Sized> Worker<'_, G> {
    fn run(&self, node: &TreeNode) -> NodeStatus {
        match self.download_node(node) {
            Ok(status) => status,
            Err(failure) => {
                warn!("{}", failure);
                NodeStatus::Failed(failure)
            }
        }
    }

    fn download_node(&self, node: &TreeNode) -> Result<NodeStatus, FetchFailure> {
        let fail = |stage: FetchStage, message: String| FetchFailure {
            node_id: node.id.clone(),
            stage,
            message,
        };
        let Some(local_path) = node.local_path.as_deref() else {
            return Err(fail(FetchStage::Write, "node has no local path".into()));
        };

        let body = self
            .gateway
            .get_rendered_body(&node.id)
            .map_err(|e| fail(FetchStage::Body, e.to_string()))?;
        let attachments = self
            .gateway
            .list_attachments(&node.id)
            .map_err(|e| fail(FetchStage::AttachmentList, e.to_string()))?;

        let mut downloaded = HashSet::new();
        let mut failed_attachments = Vec::new();
        // sanitized path → original file name
        let mut claimed: HashMap<String, &str> = HashMap::new();
        for attachment in &attachments {
            let target = attachment_path(&node.id, &attachment.filename);
            if let Some(first) = claimed.get(&target) {
                let message = format!("file name collides with {first} after sanitizing");
                warn!("Attachment {} of page {}: {}", attachment.filename, node.id, message);
                failed_attachments.push(FailedAttachment {
                    filename: attachment.filename.clone(),
                    message,
                });
                continue;
            }
            claimed.insert(target.clone(), &attachment.filename);
            match self.download_attachment(node, attachment, &target) {
                Ok(()) => {
                    downloaded.insert(attachment.filename.clone());
                }
                Err(message) => {
                    warn!(
                        "Attachment {} of page {} failed: {}",
                        attachment.filename, node.id, message
                    );
                    failed_attachments.push(FailedAttachment {
                        filename: attachment.filename.clone(),
                        message,
                    });
                }
            }
        }

        let mut local = LocalFiles {
            attachments: downloaded,
            icons: HashSet::new(),
        };
        for (key, src) in icon_references(&body) {
            if self.icons.ensure(&key, || self.download_icon(&key, &src)) {
                local.icons.insert(key);
            }
        }

        let rewritten = rewrite_body(&body, &node.id, self.targets, &local);
        let sidebar = render_fragment(self.tree, Some(&node.id), "");
        let html = assemble(node, &sidebar, &self.options.css_refs, Some(&rewritten.html));

        let page_path = format!("{local_path}.html");
        write_atomic(&self.output_root.join(&page_path), html.as_bytes())
            .map_err(|e| fail(FetchStage::Write, e.to_string()))?;

        if self.options.write_metadata_json {
            self.write_metadata(node, local_path, &attachments);
        }

        debug!(
            "Wrote {} ({} attachment(s), {} unresolved reference(s))",
            page_path,
            local.attachments.len(),
            rewritten.unresolved.len()
        );
        Ok(NodeStatus::Written {
            path: page_path,
            attachments: local.attachments.len(),
            failed_attachments,
            unresolved: rewritten.unresolved,
        })
    }

    fn download_attachment(
        &self,
        node: &TreeNode,
        attachment: &AttachmentRef,
        target: &str,
    ) -> Result<(), String> {
        let bytes = self
            .gateway
            .get_attachment_bytes(&node.id, attachment)
            .map_err(|e| e.to_string())?;
        write_atomic(&self.output_root.join(target), &bytes).map_err(|e| e.to_string())
    }

    fn download_icon(&self, key: &str, src: &str) -> Result<(), String> {
        let bytes = self.gateway.get_resource_bytes(src).map_err(|e| e.to_string())?;
        write_atomic(&self.output_root.join(icon_path(key)), &bytes).map_err(|e| e.to_string())
    }

    /// Metadata is informational; a failure here does not fail the page.
    fn write_metadata(&self, node: &TreeNode, local_path: &str, attachments: &[AttachmentRef]) {
        let record = PageRecord {
            id: &node.id,
            title: &node.title,
            author: node.author.as_deref(),
            modified_at: node.modified_at,
            labels: &node.labels,
            attachments,
            downloaded_at: Utc::now(),
        };
        let result = serde_json::to_vec_pretty(&record)
            .map_err(std::io::Error::other)
            .and_then(|json| write_atomic(&self.output_root.join(format!("{local_path}.json")), &json));
        if let Err(e) = result {
            warn!("Could not write metadata for page {}: {}", node.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::scan::{ScanRequest, scan};
    use crate::test_helpers::{flat_gateway, read, sample_gateway};
    use tempfile::TempDir;

    fn scanned(gw: &MemoryGateway, root: &str) -> Tree {
        scan(gw, &ScanRequest::tree(root)).unwrap().tree
    }

    fn opts(concurrency: usize) -> DownloadOptions {
        DownloadOptions {
            concurrency,
            ..DownloadOptions::default()
        }
    }

    #[test]
    fn one_failing_node_does_not_stop_the_others() {
        let gw = flat_gateway(9).fail_body("3");
        let tree = scanned(&gw, "0");
        assert_eq!(tree.len(), 10);
        let tmp = TempDir::new().unwrap();

        let report = download(&gw, &tree, tmp.path(), &opts(4), None).unwrap();

        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(report.written(), 9);
        let failures: Vec<&FetchFailure> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].node_id, "3");
        assert_eq!(failures[0].stage, FetchStage::Body);
        assert!(!tmp.path().join("pages/Page-3--3.html").exists());
        assert!(tmp.path().join("pages/Page-4--4.html").exists());
    }

    #[test]
    fn outcomes_follow_tree_order() {
        let gw = flat_gateway(6);
        let tree = scanned(&gw, "0");
        let tmp = TempDir::new().unwrap();
        let report = download(&gw, &tree, tmp.path(), &opts(3), None).unwrap();
        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5", "6"]);
        assert!(report.is_complete());
    }

    #[test]
    fn attachments_are_downloaded_and_referenced_locally() {
        let gw = sample_gateway();
        let tree = scanned(&gw, "100");
        let tmp = TempDir::new().unwrap();
        let report = download(&gw, &tree, tmp.path(), &opts(2), None).unwrap();

        assert_eq!(report.attachments(), 1);
        assert_eq!(
            std::fs::read(tmp.path().join("attachments/120/diagram.png")).unwrap(),
            b"\x89PNG fake"
        );
        let page = read(tmp.path(), "pages/Setup-Guide--120.html");
        assert!(page.contains(r#"src="../attachments/120/diagram.png""#));
        assert!(page.contains(r#"href="Troubleshooting--121.html""#));
    }

    #[test]
    fn failed_attachment_keeps_page() {
        let gw = sample_gateway().fail_attachment("att-1");
        let tree = scanned(&gw, "100");
        let tmp = TempDir::new().unwrap();
        let report = download(&gw, &tree, tmp.path(), &opts(2), None).unwrap();

        let outcome = report.outcomes.iter().find(|o| o.id == "120").unwrap();
        match &outcome.status {
            NodeStatus::Written {
                failed_attachments,
                unresolved,
                ..
            } => {
                assert_eq!(failed_attachments.len(), 1);
                assert_eq!(failed_attachments[0].filename, "diagram.png");
                assert_eq!(unresolved.len(), 1);
            }
            other => panic!("expected written page, got {other:?}"),
        }
        let page = read(tmp.path(), "pages/Setup-Guide--120.html");
        assert!(page.contains(r#"data-unresolved="true""#));
    }

    #[test]
    fn colliding_attachment_names_do_not_overwrite() {
        let gw = MemoryGateway::new()
            .page("1", "Home", r#"<img src="/download/attachments/1/a_b.png">"#)
            .attachment("1", "att-1", "a:b.png", b"first")
            .attachment("1", "att-2", "a_b.png", b"second");
        let tree = scanned(&gw, "1");
        let tmp = TempDir::new().unwrap();
        let report = download(&gw, &tree, tmp.path(), &opts(1), None).unwrap();

        assert_eq!(report.attachments(), 1);
        match &report.outcomes[0].status {
            NodeStatus::Written {
                failed_attachments,
                unresolved,
                ..
            } => {
                assert_eq!(failed_attachments.len(), 1);
                assert_eq!(failed_attachments[0].filename, "a_b.png");
                assert!(failed_attachments[0].message.contains("a:b.png"));
                assert_eq!(unresolved, &vec!["/download/attachments/1/a_b.png".to_string()]);
            }
            other => panic!("expected written page, got {other:?}"),
        }
        assert_eq!(std::fs::read(tmp.path().join("attachments/1/a_b.png")).unwrap(), b"first");
        assert!(!gw.was_touched("att-2"));
    }

    #[test]
    fn icons_are_fetched_once_and_shared() {
        let smile = r#"<p><img class="emoticon" src="/wiki/images/icons/emoticons/smile.svg"></p>"#;
        let gw = MemoryGateway::new()
            .page("1", "Home", smile)
            .child("1", "2", "Other", smile)
            .child("1", "3", "Third", smile)
            .resource("/wiki/images/icons/emoticons/smile.svg", b"<svg/>");
        let tree = scanned(&gw, "1");
        let tmp = TempDir::new().unwrap();
        let report = download(&gw, &tree, tmp.path(), &opts(1), None).unwrap();

        assert!(report.is_complete());
        assert_eq!(
            std::fs::read(tmp.path().join("attachments/_icons/emoticons/smile.svg")).unwrap(),
            b"<svg/>"
        );
        let fetches = gw.calls().iter().filter(|c| c.starts_with("resource:")).count();
        assert_eq!(fetches, 1);
        let page = read(tmp.path(), "pages/Other--2.html");
        assert!(page.contains(r#"src="../attachments/_icons/emoticons/smile.svg""#));
    }

    #[test]
    fn missing_icon_stays_remote_and_is_reported() {
        let gw = MemoryGateway::new().page(
            "1",
            "Home",
            r#"<img src="/wiki/images/icons/emoticons/sad.svg">"#,
        );
        let tree = scanned(&gw, "1");
        let tmp = TempDir::new().unwrap();
        let options = DownloadOptions {
            base_url: Some("https://acme.atlassian.net/wiki".to_string()),
            ..opts(1)
        };
        let report = download(&gw, &tree, tmp.path(), &options, None).unwrap();

        assert!(matches!(
            &report.outcomes[0].status,
            NodeStatus::Written { unresolved, .. }
                if unresolved == &vec!["/wiki/images/icons/emoticons/sad.svg".to_string()]
        ));
        let page = read(tmp.path(), "pages/Home--1.html");
        assert!(page.contains(
            r#"src="https://acme.atlassian.net/wiki/images/icons/emoticons/sad.svg" data-unresolved="true""#
        ));
    }

    #[test]
    fn unresolved_cross_link_is_reported() {
        let gw = sample_gateway();
        let tree = scanned(&gw, "100");
        let tmp = TempDir::new().unwrap();
        let report = download(&gw, &tree, tmp.path(), &opts(2), None).unwrap();
        let outcome = report.outcomes.iter().find(|o| o.id == "121").unwrap();
        assert!(matches!(
            &outcome.status,
            NodeStatus::Written { unresolved, .. } if unresolved == &vec!["/pages/999".to_string()]
        ));
    }

    #[test]
    fn each_page_marks_itself_active() {
        let gw = sample_gateway();
        let tree = scanned(&gw, "100");
        let tmp = TempDir::new().unwrap();
        download(&gw, &tree, tmp.path(), &opts(2), None).unwrap();

        let faq = read(tmp.path(), "pages/FAQ--130.html");
        assert!(faq.contains(r#"<a href="FAQ--130.html" class="active-page">FAQ</a>"#));
        assert_eq!(faq.matches("active-page").count(), 1);
    }

    #[test]
    fn empty_body_writes_shell() {
        let gw = MemoryGateway::new().page("1", "Container", "");
        let tree = scanned(&gw, "1");
        let tmp = TempDir::new().unwrap();
        download(&gw, &tree, tmp.path(), &opts(1), None).unwrap();
        let page = read(tmp.path(), "pages/Container--1.html");
        assert!(page.contains("<h1>Container</h1>"));
        assert!(!page.contains("<article"));
    }

    #[test]
    fn metadata_json_is_optional() {
        let gw = MemoryGateway::new().page("1", "Home", "<p>x</p>").label("1", "kb");
        let tree = scanned(&gw, "1");

        let tmp = TempDir::new().unwrap();
        download(&gw, &tree, tmp.path(), &opts(1), None).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&read(tmp.path(), "pages/Home--1.json")).unwrap();
        assert_eq!(json["id"], "1");
        assert_eq!(json["labels"][0], "kb");

        let tmp = TempDir::new().unwrap();
        let options = DownloadOptions {
            write_metadata_json: false,
            ..opts(1)
        };
        download(&gw, &tree, tmp.path(), &options, None).unwrap();
        assert!(!tmp.path().join("pages/Home--1.json").exists());
    }

    #[test]
    fn cancelled_run_writes_nothing() {
        let gw = flat_gateway(5);
        let tree = scanned(&gw, "0");
        let tmp = TempDir::new().unwrap();
        let options = DownloadOptions {
            cancel: Some(Arc::new(AtomicBool::new(true))),
            ..opts(2)
        };
        let report = download(&gw, &tree, tmp.path(), &options, None).unwrap();

        assert_eq!(report.cancelled(), 6);
        assert_eq!(report.written(), 0);
        assert_eq!(std::fs::read_dir(tmp.path().join("pages")).unwrap().count(), 0);
    }

    #[test]
    fn events_report_every_node() {
        let gw = flat_gateway(4);
        let tree = scanned(&gw, "0");
        let tmp = TempDir::new().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        download(&gw, &tree, tmp.path(), &opts(2), Some(tx)).unwrap();

        let events: Vec<DownloadEvent> = rx.iter().collect();
        assert!(matches!(events[0], DownloadEvent::Started { total: 5 }));
        let finished = events
            .iter()
            .filter(|e| matches!(e, DownloadEvent::NodeFinished(_)))
            .count();
        assert_eq!(finished, 5);
    }
}
