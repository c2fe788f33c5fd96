//! Shared test utilities for the spacedump test suite.
//!
//! Provides a realistic in-memory space, tree lookups and shape assertions
//! that work with [`Tree`] and the files an export writes.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let gw = sample_gateway();
//! let inv = scan(&gw, &ScanRequest::tree("100")).unwrap();
//!
//! assert_tree_shape(&inv.tree, &[
//!     ("100", &["110", "120", "130"]),
//! ]);
//! assert_eq!(find_node(&inv.tree, "120").title, "Setup Guide");
//! ```

use std::path::Path;

use crate::gateway::MemoryGateway;
use crate::types::{Tree, TreeNode};

// =========================================================================
// Fixture setup
// =========================================================================

/// A small space with cross links, an attachment and a three-level hierarchy.
///
/// ```text
/// 100 Home
/// ├── 110 Overview
/// ├── 120 Setup Guide      (diagram.png)
/// │   └── 121 Troubleshooting
/// └── 130 FAQ
/// ```
pub fn sample_gateway() -> MemoryGateway {
    MemoryGateway::new()
        .page("100", "Home", r#"<p>Start with the <a href="/wiki/spaces/DOC/pages/120/Setup+Guide">setup guide</a>.</p>"#)
        .child("100", "110", "Overview", "<p>What this is.</p>")
        .child(
            "100",
            "120",
            "Setup Guide",
            r#"<p>See <img src="/wiki/download/attachments/120/diagram.png?version=1"></p><p><a href="/pages/viewpage.action?pageId=121">Trouble?</a></p>"#,
        )
        .child("120", "121", "Troubleshooting", r#"<p>Back to <a href="/pages/120">setup</a>, or <a href="/pages/999">elsewhere</a>.</p>"#)
        .child("100", "130", "FAQ", "<p>Questions.</p>")
        .attachment("120", "att-1", "diagram.png", b"\x89PNG fake")
}

/// A flat space: one root with `count` children numbered `1..=count`.
pub fn flat_gateway(count: usize) -> MemoryGateway {
    (1..=count).fold(MemoryGateway::new().page("0", "Root", "<p>root</p>"), |gw, n| {
        let id = n.to_string();
        gw.child("0", &id, &format!("Page {n}"), &format!("<p>body {n}</p>"))
    })
}

// =========================================================================
// Tree lookups: panic with a clear message on miss
// =========================================================================

/// Find a node by id. Panics if not found.
pub fn find_node<'a>(tree: &'a Tree, id: &str) -> &'a TreeNode {
    tree.find(id).unwrap_or_else(|| {
        let ids = tree_ids(tree);
        panic!("node '{id}' not found. Available: {ids:?}")
    })
}

// =========================================================================
// Bulk extractors
// =========================================================================

/// Every id in pre-order.
pub fn tree_ids(tree: &Tree) -> Vec<&str> {
    tree.iter().map(|n| n.id.as_str()).collect()
}

/// Root ids in order.
pub fn root_ids(tree: &Tree) -> Vec<&str> {
    tree.roots.iter().map(|n| n.id.as_str()).collect()
}

/// Direct child ids of `parent`. Panics if `parent` is not found.
pub fn child_ids<'a>(tree: &'a Tree, parent: &str) -> Vec<&'a str> {
    find_node(tree, parent)
        .children
        .iter()
        .map(|c| c.id.as_str())
        .collect()
}

// =========================================================================
// Shape assertions
// =========================================================================

/// Assert the roots of `tree` and their direct children.
///
/// Each entry is `(root id, child ids)`. Use `&[]` for childless roots.
///
/// ```rust
/// assert_tree_shape(&tree, &[
///     ("A", &["B", "C"]),
///     ("D", &[]),
/// ]);
/// ```
pub fn assert_tree_shape(tree: &Tree, expected: &[(&str, &[&str])]) {
    let expected_roots: Vec<&str> = expected.iter().map(|(id, _)| *id).collect();
    assert_eq!(root_ids(tree), expected_roots, "root ids mismatch");

    for (id, children) in expected {
        assert_eq!(
            child_ids(tree, id),
            children.to_vec(),
            "children of '{id}' mismatch"
        );
    }
}

/// Read a file under `root` to a string. Panics with the path on failure.
pub fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel))
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", root.join(rel).display()))
}

/// A document with everything between the navigation delimiters removed.
///
/// Two versions of a page have the same content exactly when this is equal.
pub fn outside_nav(html: &str) -> String {
    use crate::inject::{NAV_BEGIN, NAV_END};
    let begin = html.find(NAV_BEGIN).expect("no nav begin") + NAV_BEGIN.len();
    let end = html.find(NAV_END).expect("no nav end");
    format!("{}{}", &html[..begin], &html[end..])
}
