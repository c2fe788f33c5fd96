//! A drag-and-drop sidebar editor, written into the archive as one HTML file.
//!
//! `editor.html` shows the current sidebar as a tree. Entries can be dragged
//! (top of a row inserts before it, bottom after it, middle nests inside),
//! renamed in place, marked deleted, and grouped under new folders. The
//! *Export* button produces Markdown in the sidebar grammar, ready to be saved
//! as `sidebar_edit.md` and applied with `spacedump patch`.
//!
//! The page needs no server and no network: the stylesheet and the script are
//! compiled into the binary and inlined. Page links are relative to the
//! archive root (`pages/<slug>--<id>.html`), which the sidebar parser accepts
//! just like the `file://` links of `sidebar.md`.
//!
//! [`editor_markdown`] is the export written in Rust. The script produces
//! exactly the same text for an unchanged tree, which is what the round-trip
//! tests pin down.

use crate::fsutil::write_atomic;
use crate::naming::href;
use crate::patch::{PatchError, SIDEBAR_EDIT_MD, load_edited_sidebar};
use crate::sidebar::{MODE_SPACE_DIRECTIVE, MalformedSidebarError, SidebarDocument, SidebarMode, escape_title};
use crate::types::{Tree, TreeNode};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// The editor page, written to the archive root.
pub const EDITOR_HTML: &str = "editor.html";

const EDITOR_CSS: &str = include_str!("../static/editor.css");
const EDITOR_JS: &str = include_str!("../static/editor.js");

/// Title given to folders created in the editor.
const NEW_FOLDER_TITLE: &str = "New folder";
/// Exported in place of a title that was edited down to nothing.
const UNTITLED: &str = "Untitled";

#[derive(Error, Debug)]
pub enum EditorError {
    #[error(transparent)]
    Load(#[from] PatchError),
    #[error("malformed sidebar: {0}")]
    Malformed(#[from] MalformedSidebarError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the editor.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorItem {
    pub title: String,
    /// Archive-relative link to the page file; `None` for folders.
    pub href: Option<String>,
    pub children: Vec<EditorItem>,
}

impl EditorItem {
    fn from_node(node: &TreeNode) -> Self {
        Self {
            title: node.title.clone(),
            href: node
                .local_path
                .as_deref()
                .map(|path| href(&format!("{path}.html"))),
            children: node.children.iter().map(Self::from_node).collect(),
        }
    }
}

/// What [`write_editor`] produced.
#[derive(Debug)]
pub struct EditorOutput {
    /// The sidebar file the editor was built from.
    pub source: PathBuf,
    pub editor: PathBuf,
    /// The working copy the exported Markdown belongs in.
    pub working_copy: PathBuf,
    /// `sidebar_edit.md` did not exist and was seeded from the source.
    pub created_working_copy: bool,
    pub entries: usize,
}

/// Editor rows for every node of `tree`, in order.
pub fn editor_items(tree: &Tree) -> Vec<EditorItem> {
    tree.roots.iter().map(EditorItem::from_node).collect()
}

/// The Markdown the editor exports for `items`.
pub fn editor_markdown(items: &[EditorItem], mode: SidebarMode) -> String {
    let mut out = String::new();
    if mode == SidebarMode::Space {
        out.push_str(MODE_SPACE_DIRECTIVE);
        out.push('\n');
    }
    push_lines(items, 0, &mut out);
    out
}

fn push_lines(items: &[EditorItem], depth: usize, out: &mut String) {
    for item in items {
        let mut title = escape_title(item.title.trim());
        if title.is_empty() {
            title = UNTITLED.to_string();
        }
        out.push_str(&"  ".repeat(depth));
        out.push_str("- ");
        match &item.href {
            Some(target) => out.push_str(&format!("[{title}]({target})")),
            None => out.push_str(&title),
        }
        out.push('\n');
        push_lines(&item.children, depth + 1, out);
    }
}

/// The complete editor page for `document`.
pub fn render_editor(document: &SidebarDocument) -> String {
    let items = editor_items(&document.tree);
    let new_folder = EditorItem {
        title: NEW_FOLDER_TITLE.to_string(),
        href: None,
        children: Vec::new(),
    };
    let markup = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "Sidebar editor" }
                style { (PreEscaped(EDITOR_CSS)) }
            }
            body {
                header {
                    div.toolbar {
                        h1 { "Sidebar editor " span.count #node-count {} }
                        button #expand-all type="button" { "Expand all" }
                        button #collapse-all type="button" { "Collapse all" }
                    }
                    div.toolbar {
                        input #filter type="search" placeholder="Filter…";
                        label {
                            input #space-mode type="checkbox"
                                checked[document.mode == SidebarMode::Space];
                            " Space mode"
                        }
                        button #new-root-folder type="button" { "+ Folder" }
                        button.primary #export type="button" { "Export Markdown" }
                    }
                }
                main.workspace {
                    ul #root-tree {
                        @for item in &items {
                            (render_item(item))
                        }
                    }
                }
                template #folder-template { (render_item(&new_folder)) }
                dialog #export-dialog {
                    p {
                        "Save this as " strong { (SIDEBAR_EDIT_MD) }
                        " next to this file, then run " code { "spacedump patch" } "."
                    }
                    textarea #export-text spellcheck="false" {}
                    div.buttons {
                        button #export-close type="button" { "Close" }
                        button #export-copy type="button" { "Copy" }
                        button.primary #export-download type="button" { "Download" }
                    }
                }
                script { (PreEscaped(EDITOR_JS)) }
            }
        }
    };
    markup.into_string()
}

fn render_item(item: &EditorItem) -> Markup {
    html! {
        li {
            div.node-row draggable="true" {
                span.toggle data-action="toggle" { "▾" }
                span.drag-handle { "☰" }
                div.node-title contenteditable="true" data-href=[item.href.as_deref()] {
                    (item.title)
                }
                div.actions {
                    @if item.href.is_some() {
                        button type="button" data-action="open" title="Open page" { "↗" }
                    }
                    button type="button" data-action="add-folder" title="Add a folder inside" { "+ Folder" }
                    button.delete type="button" data-action="delete" title="Mark deleted" { "Del" }
                }
            }
            ul {
                @for child in &item.children {
                    (render_item(child))
                }
            }
        }
    }
}

/// Write `editor.html` into the archive at `site_dir`.
///
/// The editor shows `sidebar_edit.md` when present (unless `restore_original`
/// asks for `sidebar.md`). A missing working copy is seeded with the source
/// sidebar; an existing one is never overwritten.
pub fn write_editor(site_dir: &Path, restore_original: bool) -> Result<EditorOutput, EditorError> {
    let (source, markdown) = load_edited_sidebar(site_dir, restore_original)?;
    let document = SidebarDocument::parse(&markdown)?;

    let editor = site_dir.join(EDITOR_HTML);
    write_atomic(&editor, render_editor(&document).as_bytes())?;
    info!("Editor for {} written to {}", source.display(), editor.display());

    let working_copy = site_dir.join(SIDEBAR_EDIT_MD);
    let created_working_copy = !working_copy.exists();
    if created_working_copy {
        write_atomic(&working_copy, markdown.as_bytes())?;
    }

    Ok(EditorOutput {
        source,
        editor,
        working_copy,
        created_working_copy,
        entries: document.tree.len(),
    })
}
