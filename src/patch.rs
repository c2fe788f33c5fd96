//! Re-apply an edited sidebar to an existing archive, offline.
//!
//! The patcher is the second half of the sidebar round trip: a human edits
//! `sidebar.md` (or a copy named `sidebar_edit.md`), and [`apply_patch`]
//! rebuilds the tree from it and splices the new navigation into every
//! document of the archive. Page content is never touched and the gateway is
//! never contacted.
//!
//! Documents patched:
//!
//! - `sidebar.html` is rewritten as a whole.
//! - `index.html` and every `pages/*.html` get the region between the
//!   navigation delimiters replaced, with that page marked active.
//!
//! HTML files elsewhere (attachments, for example) are left alone.
//!
//! A page file belongs to the new tree when its path is the one a sidebar
//! entry links to. Entries whose file is missing are reported as unresolved,
//! and page files no entry links to as orphaned; both are matched by path, so
//! a stale copy of a page under an old name is never mistaken for it.
//!
//! Files whose content would not change are not written, so running the same
//! patch twice leaves every byte and timestamp as it was.

use crate::fsutil::write_if_changed;
use crate::inject::splice_navigation;
use crate::naming::PAGES_DIR;
use crate::sidebar::{MalformedSidebarError, SidebarDocument, SidebarMode, render_fragment, unwrap_single_root};
use crate::types::Tree;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Sidebar file written by an export.
pub const SIDEBAR_MD: &str = "sidebar.md";
/// Working copy preferred by the patcher when present.
pub const SIDEBAR_EDIT_MD: &str = "sidebar_edit.md";
/// Standalone sidebar fragment written by an export.
pub const SIDEBAR_HTML: &str = "sidebar.html";

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("malformed sidebar: {0}")]
    Malformed(#[from] MalformedSidebarError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("no {SIDEBAR_EDIT_MD} or {SIDEBAR_MD} in {0}")]
    SidebarNotFound(PathBuf),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchWarning {
    #[error("{}: navigation delimiters not found, file left unchanged", .0.display())]
    DelimiterNotFound(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct PatchOptions {
    /// Promote the children of a single root, as `<!-- mode: space -->` does.
    pub unwrap: bool,
}

/// What a patch run did. Paths are relative to the output root.
#[derive(Debug, Default)]
pub struct PatchReport {
    pub patched: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub warnings: Vec<PatchWarning>,
    /// Local paths of pages in the edited tree with no file in the archive.
    pub unresolved: Vec<String>,
    /// Page files in the archive that the edited tree does not list.
    pub orphaned: Vec<PathBuf>,
    /// The single root was unwrapped.
    pub unwrapped: bool,
}

/// Read the sidebar to apply: `sidebar_edit.md` if present, else `sidebar.md`.
///
/// With `restore_original`, the edit file is ignored.
pub fn load_edited_sidebar(
    site_dir: &Path,
    restore_original: bool,
) -> Result<(PathBuf, String), PatchError> {
    let edit = site_dir.join(SIDEBAR_EDIT_MD);
    let original = site_dir.join(SIDEBAR_MD);
    let path = if !restore_original && edit.is_file() {
        edit
    } else if original.is_file() {
        original
    } else {
        return Err(PatchError::SidebarNotFound(site_dir.to_path_buf()));
    };
    let text = std::fs::read_to_string(&path)?;
    Ok((path, text))
}

/// Apply `edited_markdown` to the archive at `output_root`.
///
/// A malformed sidebar is rejected before any file is touched.
pub fn apply_patch(
    output_root: &Path,
    edited_markdown: &str,
    options: &PatchOptions,
) -> Result<PatchReport, PatchError> {
    let document = SidebarDocument::parse(edited_markdown)?;
    let mut report = PatchReport::default();

    let tree = if options.unwrap || document.mode == SidebarMode::Space {
        match unwrap_single_root(&document.tree) {
            Some(tree) => {
                report.unwrapped = true;
                tree
            }
            None => {
                info!("Unwrap requested but the sidebar has {} roots; skipping", document.tree.roots.len());
                document.tree
            }
        }
    } else {
        document.tree
    };
    info!("Applying sidebar with {} entries to {}", tree.len(), output_root.display());

    let standalone = render_fragment(&tree, None, "pages/");
    record(
        &mut report,
        PathBuf::from(SIDEBAR_HTML),
        write_if_changed(&output_root.join(SIDEBAR_HTML), &standalone)?,
    );

    let listed = page_files(&tree);
    for rel in documents(output_root)? {
        let path = output_root.join(&rel);
        let html = std::fs::read_to_string(&path)?;
        let in_pages = rel.starts_with(PAGES_DIR);

        let active = listed.get(&rel).copied();
        if in_pages && active.is_none() {
            report.orphaned.push(rel.clone());
        }

        let prefix = if in_pages { "" } else { "pages/" };
        let fragment = render_fragment(&tree, active, prefix);
        match splice_navigation(&html, &fragment) {
            Some(patched) => {
                let changed = write_if_changed(&path, &patched)?;
                debug!("{} {}", if changed { "Patched" } else { "Unchanged" }, rel.display());
                record(&mut report, rel, changed);
            }
            None => {
                let warning = PatchWarning::DelimiterNotFound(rel);
                warn!("{}", warning);
                report.warnings.push(warning);
            }
        }
    }

    report.unresolved = unresolved_pages(&tree, output_root);
    info!(
        "Patch complete: {} patched, {} unchanged, {} warning(s)",
        report.patched.len(),
        report.unchanged.len(),
        report.warnings.len()
    );
    Ok(report)
}

fn record(report: &mut PatchReport, rel: PathBuf, changed: bool) {
    if changed {
        report.patched.push(rel);
    } else {
        report.unchanged.push(rel);
    }
}

/// `index.html` plus every `pages/*.html`, relative to `root`, sorted.
fn documents(root: &Path) -> Result<Vec<PathBuf>, PatchError> {
    let mut docs = Vec::new();
    if root.join("index.html").is_file() {
        docs.push(PathBuf::from("index.html"));
    }
    let pages = root.join(PAGES_DIR);
    if pages.is_dir() {
        for entry in WalkDir::new(&pages)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let is_html = entry.path().extension().is_some_and(|e| e == "html");
            if entry.file_type().is_file() && is_html {
                docs.push(Path::new(PAGES_DIR).join(entry.file_name()));
            }
        }
    }
    Ok(docs)
}

/// Output-relative page file → id, for every page entry of `tree`.
fn page_files(tree: &Tree) -> HashMap<PathBuf, &str> {
    tree.iter()
        .filter_map(|node| {
            let path = node.local_path.as_deref()?;
            Some((PathBuf::from(format!("{path}.html")), node.id.as_str()))
        })
        .collect()
}

/// Local paths of page entries whose file does not exist under `root`.
fn unresolved_pages(tree: &Tree, root: &Path) -> Vec<String> {
    tree.iter()
        .filter_map(|node| {
            let path = node.local_path.as_deref()?;
            (!root.join(format!("{path}.html")).is_file()).then(|| path.to_string())
        })
        .collect()
}
