//! CLI output formatting for every stage of an export.
//!
//! # Information-First Display
//!
//! Every page is shown by its positional index and title first; the file it
//! ends up in follows after an arrow. The output reads as an inventory of the
//! archive while still letting users find each file.
//!
//! # Output Format
//!
//! ## Scan
//!
//! ```text
//! Pages
//! 001 Home → pages/Home--100.html
//!     001 Overview → pages/Overview--110.html
//!     002 Setup Guide → pages/Setup-Guide--120.html
//!
//! Pruned
//!     300 Drafts (excluded by id)
//!
//! Scanned 3 pages
//! ```
//!
//! ## Download
//!
//! ```text
//! Downloading 3 pages
//!     Home → pages/Home--100.html
//!     Setup Guide → pages/Setup-Guide--120.html (1 attachment)
//!         1 unresolved link
//!     FAQ FAILED: body fetch failed for page 130: HTTP error: 500 - boom
//! ```
//!
//! ## Patch
//!
//! ```text
//! Applying sidebar_edit.md
//! Patched 7 files, 0 unchanged
//!     index.html
//!     pages/Home--100.html
//! ```
//!
//! # Architecture
//!
//! Each stage has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::download::{DownloadEvent, DownloadReport, NodeOutcome, NodeStatus};
use crate::editor::EditorOutput;
use crate::export::ExportReport;
use crate::gateway::SpaceSummary;
use crate::patch::{PatchReport, PatchWarning};
use crate::scan::{PruneReason, ScanReport};
use crate::types::{Tree, TreeNode};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 page`, `2 pages`.
fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{} {}", n, noun)
    } else {
        format!("{} {}s", n, noun)
    }
}

/// Entity header: positional index, title and destination.
///
/// ```text
/// 002 Setup Guide → pages/Setup-Guide--120.html
/// 003 Archive (folder)
/// ```
fn entity_line(index: usize, node: &TreeNode) -> String {
    match &node.local_path {
        Some(path) => format!("{} {} \u{2192} {}.html", format_index(index), node.title, path),
        None => format!("{} {} (folder)", format_index(index), node.title),
    }
}

// ============================================================================
// Tree walker
// ============================================================================

/// A flattened node with its depth and 1-based position among its siblings.
struct WalkedNode<'a> {
    depth: usize,
    position: usize,
    node: &'a TreeNode,
}

fn walk_tree(tree: &Tree) -> Vec<WalkedNode<'_>> {
    let mut nodes = Vec::new();
    walk_tree_recursive(&tree.roots, 0, &mut nodes);
    nodes
}

fn walk_tree_recursive<'a>(items: &'a [TreeNode], depth: usize, nodes: &mut Vec<WalkedNode<'a>>) {
    for (i, node) in items.iter().enumerate() {
        nodes.push(WalkedNode {
            depth,
            position: i + 1,
            node,
        });
        walk_tree_recursive(&node.children, depth + 1, nodes);
    }
}

// ============================================================================
// Scan output
// ============================================================================

/// Format the discovered tree and everything the scan left out.
pub fn format_scan_output(tree: &Tree, report: &ScanReport) -> Vec<String> {
    let mut lines = vec!["Pages".to_string()];
    for walked in walk_tree(tree) {
        lines.push(format!(
            "{}{}",
            indent(walked.depth),
            entity_line(walked.position, walked.node)
        ));
    }

    if !report.pruned.is_empty() {
        lines.push(String::new());
        lines.push("Pruned".to_string());
        for pruned in &report.pruned {
            let reason = match &pruned.reason {
                PruneReason::ExcludedId => "excluded by id".to_string(),
                PruneReason::ExcludedLabel(label) => format!("label \"{}\"", label),
                PruneReason::MissingIncludeLabel(label) => format!("missing label \"{}\"", label),
            };
            let title = if pruned.title.is_empty() {
                String::new()
            } else {
                format!(" {}", pruned.title)
            };
            lines.push(format!("    {}{} ({})", pruned.id, title, reason));
        }
    }

    let skipped = [
        ("Cycles", report.cycles.iter().map(|c| c.to_string()).collect::<Vec<_>>()),
        ("Duplicates", report.duplicates.clone()),
        ("Vanished", report.vanished.clone()),
    ];
    for (heading, entries) in skipped {
        if !entries.is_empty() {
            lines.push(String::new());
            lines.push(heading.to_string());
            lines.extend(entries.into_iter().map(|e| format!("    {}", e)));
        }
    }

    lines.push(String::new());
    lines.push(format!("Scanned {}", plural(tree.len(), "page")));
    lines
}

/// Print scan output to stdout.
pub fn print_scan_output(tree: &Tree, report: &ScanReport) {
    for line in format_scan_output(tree, report) {
        println!("{}", line);
    }
}

// ============================================================================
// Download output
// ============================================================================

/// Format a single download progress event as display lines.
pub fn format_download_event(event: &DownloadEvent) -> Vec<String> {
    match event {
        DownloadEvent::Started { total } => vec![format!("Downloading {}", plural(*total, "page"))],
        DownloadEvent::NodeFinished(outcome) => format_outcome(outcome),
    }
}

fn format_outcome(outcome: &NodeOutcome) -> Vec<String> {
    match &outcome.status {
        NodeStatus::Written {
            path,
            attachments,
            failed_attachments,
            unresolved,
        } => {
            let detail = if *attachments > 0 {
                format!(" ({})", plural(*attachments, "attachment"))
            } else {
                String::new()
            };
            let mut lines = vec![format!("    {} \u{2192} {}{}", outcome.title, path, detail)];
            for failed in failed_attachments {
                lines.push(format!(
                    "        attachment {} failed: {}",
                    failed.filename, failed.message
                ));
            }
            if !unresolved.is_empty() {
                lines.push(format!("        {}", plural(unresolved.len(), "unresolved link")));
            }
            lines
        }
        NodeStatus::Failed(failure) => vec![format!("    {} FAILED: {}", outcome.title, failure)],
        NodeStatus::Cancelled => vec![format!("    {} (cancelled)", outcome.title)],
    }
}

/// Format the closing summary of a download.
pub fn format_download_report(report: &DownloadReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Downloaded {} of {}, {}",
        report.written(),
        plural(report.outcomes.len(), "page"),
        plural(report.attachments(), "attachment")
    )];
    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        lines.push(format!("{} failed:", plural(failures.len(), "page")));
        for failure in failures {
            lines.push(format!("    {}", failure));
        }
    }
    if report.failed_attachments() > 0 {
        lines.push(format!(
            "{} could not be downloaded",
            plural(report.failed_attachments(), "attachment")
        ));
    }
    if report.cancelled() > 0 {
        lines.push(format!(
            "Interrupted: {} not downloaded",
            plural(report.cancelled(), "page")
        ));
    }
    lines
}

/// Format the result of a whole export run.
pub fn format_export_report(report: &ExportReport) -> Vec<String> {
    let mut lines = format_download_report(&report.download);
    let scan = &report.scan;
    let skipped = scan.pruned.len() + scan.cycles.len() + scan.duplicates.len() + scan.vanished.len();
    if skipped > 0 {
        lines.push(format!("Skipped during scan: {}", plural(skipped, "page")));
    }
    lines.push(format!(
        "{} \u{2192} {}",
        report.title,
        report.output_root.join("index.html").display()
    ));
    lines
}

/// Print the result of a whole export run to stdout.
pub fn print_export_report(report: &ExportReport) {
    for line in format_export_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Patch output
// ============================================================================

/// Format what a patch run changed.
pub fn format_patch_report(report: &PatchReport, sidebar: &Path, unwrap_requested: bool) -> Vec<String> {
    let mut lines = vec![format!(
        "Applying {}",
        sidebar
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| sidebar.display().to_string())
    )];
    if report.unwrapped {
        lines.push("Unwrapped the single root".to_string());
    } else if unwrap_requested {
        lines.push("Not unwrapped: the sidebar does not have exactly one root".to_string());
    }
    lines.push(format!(
        "Patched {}, {} unchanged",
        plural(report.patched.len(), "file"),
        report.unchanged.len()
    ));
    for path in &report.patched {
        lines.push(format!("    {}", path.display()));
    }
    for warning in &report.warnings {
        match warning {
            PatchWarning::DelimiterNotFound(_) => lines.push(format!("Warning: {}", warning)),
        }
    }
    if !report.unresolved.is_empty() {
        lines.push(format!(
            "Not in the archive: {}",
            plural(report.unresolved.len(), "page")
        ));
        for id in &report.unresolved {
            lines.push(format!("    {}", id));
        }
    }
    if !report.orphaned.is_empty() {
        lines.push(format!(
            "Not in the sidebar: {}",
            plural(report.orphaned.len(), "file")
        ));
        for path in &report.orphaned {
            lines.push(format!("    {}", path.display()));
        }
    }
    lines
}

/// Print patch output to stdout.
pub fn print_patch_report(report: &PatchReport, sidebar: &Path, unwrap_requested: bool) {
    for line in format_patch_report(report, sidebar, unwrap_requested) {
        println!("{}", line);
    }
}

// ============================================================================
// Editor output
// ============================================================================

/// Format where the editor was written and where its output belongs.
pub fn format_editor_output(output: &EditorOutput) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Editor for {} written to {}",
            plural(output.entries, "item"),
            output.editor.display()
        ),
        format!("    from {}", output.source.display()),
    ];
    if output.created_working_copy {
        lines.push(format!("    created {}", output.working_copy.display()));
    }
    lines.push(format!(
        "Save the exported Markdown as {} and run 'spacedump patch'",
        output.working_copy.display()
    ));
    lines
}

pub fn print_editor_output(output: &EditorOutput) {
    for line in format_editor_output(output) {
        println!("{}", line);
    }
}

// ============================================================================
// Space listing
// ============================================================================

/// Format the spaces an `all-spaces` run is about to export.
pub fn format_space_list(spaces: &[SpaceSummary]) -> Vec<String> {
    let mut lines = vec![format!("Spaces ({})", spaces.len())];
    for (i, space) in spaces.iter().enumerate() {
        lines.push(format!("{} {} ({})", format_index(i + 1), space.name, space.key));
    }
    lines
}

pub fn print_space_list(spaces: &[SpaceSummary]) {
    for line in format_space_list(spaces) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{FailedAttachment, FetchFailure, FetchStage};
    use crate::scan::{CycleDetected, Pruned};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn tree() -> Tree {
        Tree::new(vec![
            TreeNode::page("100", "Home").with_children(vec![
                TreeNode::page("110", "Overview"),
                TreeNode::folder("folder-abc", "Archive")
                    .with_children(vec![TreeNode::page("120", "Setup Guide")]),
            ]),
        ])
    }

    fn written(title: &str, path: &str, attachments: usize) -> NodeOutcome {
        NodeOutcome {
            id: title.to_string(),
            title: title.to_string(),
            status: NodeStatus::Written {
                path: path.to_string(),
                attachments,
                failed_attachments: vec![],
                unresolved: vec![],
            },
        }
    }

    fn failed(id: &str) -> NodeOutcome {
        NodeOutcome {
            id: id.to_string(),
            title: "FAQ".to_string(),
            status: NodeStatus::Failed(FetchFailure {
                node_id: id.to_string(),
                stage: FetchStage::Body,
                message: "HTTP error: 500 - boom".to_string(),
            }),
        }
    }

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(1234), "1234");
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "page"), "1 page");
        assert_eq!(plural(0, "page"), "0 pages");
    }

    #[test]
    fn walk_tree_positions_per_level() {
        let tree = tree();
        let walked: Vec<(usize, usize, &str)> = walk_tree(&tree)
            .iter()
            .map(|w| (w.depth, w.position, w.node.id.as_str()))
            .collect();
        assert_eq!(
            walked,
            vec![(0, 1, "100"), (1, 1, "110"), (1, 2, "folder-abc"), (2, 1, "120")]
        );
    }

    // =========================================================================
    // Scan output tests
    // =========================================================================

    #[test]
    fn scan_output_lists_tree() {
        let lines = format_scan_output(&tree(), &ScanReport::default());
        assert_eq!(
            lines,
            vec![
                "Pages",
                "001 Home \u{2192} pages/Home--100.html",
                "    001 Overview \u{2192} pages/Overview--110.html",
                "    002 Archive (folder)",
                "        001 Setup Guide \u{2192} pages/Setup-Guide--120.html",
                "",
                "Scanned 4 pages",
            ]
        );
    }

    #[test]
    fn scan_output_reports_skipped_pages() {
        let report = ScanReport {
            pruned: vec![
                Pruned {
                    id: "300".into(),
                    title: String::new(),
                    reason: PruneReason::ExcludedId,
                },
                Pruned {
                    id: "301".into(),
                    title: "Old".into(),
                    reason: PruneReason::ExcludedLabel("archive".into()),
                },
            ],
            cycles: vec![CycleDetected {
                id: "100".into(),
                path: vec!["100".into(), "110".into()],
            }],
            vanished: vec!["ghost".into()],
            ..ScanReport::default()
        };
        let lines = format_scan_output(&Tree::default(), &report);
        assert!(lines.contains(&"    300 (excluded by id)".to_string()));
        assert!(lines.contains(&"    301 Old (label \"archive\")".to_string()));
        assert!(lines.contains(&"Cycles".to_string()));
        assert!(lines.contains(&"    ghost".to_string()));
        assert_eq!(lines.last().unwrap(), "Scanned 0 pages");
    }

    // =========================================================================
    // Download output tests
    // =========================================================================

    #[test]
    fn download_started_event() {
        let lines = format_download_event(&DownloadEvent::Started { total: 1 });
        assert_eq!(lines, vec!["Downloading 1 page"]);
    }

    #[test]
    fn written_event_shows_attachments_and_problems() {
        let mut outcome = written("Setup Guide", "pages/Setup-Guide--120.html", 2);
        if let NodeStatus::Written {
            failed_attachments,
            unresolved,
            ..
        } = &mut outcome.status
        {
            failed_attachments.push(FailedAttachment {
                filename: "big.zip".into(),
                message: "timeout".into(),
            });
            unresolved.push("/pages/999".into());
        }
        let lines = format_download_event(&DownloadEvent::NodeFinished(outcome));
        assert_eq!(
            lines,
            vec![
                "    Setup Guide \u{2192} pages/Setup-Guide--120.html (2 attachments)",
                "        attachment big.zip failed: timeout",
                "        1 unresolved link",
            ]
        );
    }

    #[test]
    fn failed_and_cancelled_events() {
        let lines = format_download_event(&DownloadEvent::NodeFinished(failed("130")));
        assert_eq!(
            lines,
            vec!["    FAQ FAILED: body fetch failed for page 130: HTTP error: 500 - boom"]
        );
        let cancelled = NodeOutcome {
            id: "1".into(),
            title: "Later".into(),
            status: NodeStatus::Cancelled,
        };
        let lines = format_download_event(&DownloadEvent::NodeFinished(cancelled));
        assert_eq!(lines, vec!["    Later (cancelled)"]);
    }

    #[test]
    fn download_report_summarises_failures() {
        let report = DownloadReport {
            outcomes: vec![
                written("Home", "pages/Home--100.html", 1),
                failed("130"),
                NodeOutcome {
                    id: "140".into(),
                    title: "Later".into(),
                    status: NodeStatus::Cancelled,
                },
            ],
        };
        let lines = format_download_report(&report);
        assert_eq!(lines[0], "Downloaded 1 of 3 pages, 1 attachment");
        assert_eq!(lines[1], "1 page failed:");
        assert!(lines[2].contains("page 130"));
        assert_eq!(lines.last().unwrap(), "Interrupted: 1 page not downloaded");
    }

    #[test]
    fn complete_download_is_one_line() {
        let report = DownloadReport {
            outcomes: vec![written("Home", "pages/Home--100.html", 0)],
        };
        assert_eq!(
            format_download_report(&report),
            vec!["Downloaded 1 of 1 page, 0 attachments"]
        );
    }

    // =========================================================================
    // Patch output tests
    // =========================================================================

    #[test]
    fn patch_report_lists_changes() {
        let report = PatchReport {
            patched: vec![PathBuf::from("index.html"), PathBuf::from("pages/Home--100.html")],
            unchanged: vec![PathBuf::from("pages/FAQ--130.html")],
            warnings: vec![PatchWarning::DelimiterNotFound(PathBuf::from("pages/old.html"))],
            unresolved: vec!["555".into()],
            orphaned: vec![],
            unwrapped: false,
        };
        let lines = format_patch_report(&report, Path::new("/site/sidebar_edit.md"), false);
        assert_eq!(lines[0], "Applying sidebar_edit.md");
        assert_eq!(lines[1], "Patched 2 files, 1 unchanged");
        assert_eq!(lines[2], "    index.html");
        assert!(lines.iter().any(|l| l.starts_with("Warning: pages/old.html")));
        assert!(lines.contains(&"Not in the archive: 1 page".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("Not in the sidebar")));
    }

    #[test]
    fn patch_report_explains_skipped_unwrap() {
        let lines = format_patch_report(&PatchReport::default(), Path::new("sidebar.md"), true);
        assert_eq!(
            lines[1],
            "Not unwrapped: the sidebar does not have exactly one root"
        );
        let unwrapped = PatchReport {
            unwrapped: true,
            ..PatchReport::default()
        };
        let lines = format_patch_report(&unwrapped, Path::new("sidebar.md"), true);
        assert_eq!(lines[1], "Unwrapped the single root");
    }

    #[test]
    fn editor_output_mentions_seeded_working_copy() {
        let output = EditorOutput {
            source: PathBuf::from("/site/sidebar.md"),
            editor: PathBuf::from("/site/editor.html"),
            working_copy: PathBuf::from("/site/sidebar_edit.md"),
            created_working_copy: true,
            entries: 1,
        };
        assert_eq!(
            format_editor_output(&output),
            vec![
                "Editor for 1 item written to /site/editor.html",
                "    from /site/sidebar.md",
                "    created /site/sidebar_edit.md",
                "Save the exported Markdown as /site/sidebar_edit.md and run 'spacedump patch'",
            ]
        );
        let existing = EditorOutput {
            created_working_copy: false,
            ..output
        };
        assert!(!format_editor_output(&existing).iter().any(|l| l.contains("created")));
    }

    #[test]
    fn space_list() {
        let spaces = vec![
            SpaceSummary {
                key: "DOC".into(),
                name: "Documentation".into(),
            },
            SpaceSummary {
                key: "OPS".into(),
                name: "Operations".into(),
            },
        ];
        assert_eq!(
            format_space_list(&spaces),
            vec!["Spaces (2)", "001 Documentation (DOC)", "002 Operations (OPS)"]
        );
    }
}
