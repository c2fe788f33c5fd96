//! The sidebar: a [`Tree`] written as an editable Markdown list, and as HTML.
//!
//! ## Markdown format
//!
//! One list item per node, two spaces of indentation per depth level:
//!
//! ```text
//! <!-- mode: space -->
//! - [Home](file:///srv/export/pages/Home--100.html)
//!   - [Setup Guide](file:///srv/export/pages/Setup-Guide--120.html)
//!   - Reference
//!     - [API](file:///srv/export/pages/API--130.html)
//! ```
//!
//! Page items link to the page file with an absolute `file://` URI, so the
//! list is clickable in any Markdown viewer. The page id is recovered from the
//! file name alone (`<slug>--<id>.html`, see [`crate::naming`]), which means an
//! editor can cut, paste and re-indent lines freely. A plain item without a
//! link is a *folder*: a grouping node with no page behind it.
//!
//! HTML comments carry directives; `<!-- mode: space -->` asks the patcher to
//! unwrap a single root. Lines that are not list items are ignored.
//!
//! Parsing is strict where a mistake would silently change the structure:
//! an indentation jump of more than one level, the same page listed twice, and
//! a link that does not name a page file are all errors.
//!
//! ## HTML fragment
//!
//! [`render_fragment`] produces the `<div class="sidebar-tree">` block that is
//! embedded in every page. Nodes with children become collapsible `<details>`
//! elements. The output has no insignificant whitespace, so rendering the same
//! tree twice yields identical bytes.

use crate::naming::{HREF_ESCAPE, PAGES_DIR, href, parse_file_stem};
use crate::types::{Tree, TreeNode};
use maud::{Markup, html};
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Directive line that marks a whole-space export.
pub const MODE_SPACE_DIRECTIVE: &str = "<!-- mode: space -->";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedSidebarError {
    #[error("line {line}: indentation jumps from level {from} to level {to}")]
    IndentJump { line: usize, from: usize, to: usize },
    #[error("line {line}: '{path}' is listed more than once")]
    DuplicatePath { line: usize, path: String },
    #[error("line {line}: cannot resolve link target '{target}'")]
    UnresolvableTarget { line: usize, target: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SidebarMode {
    #[default]
    Default,
    /// The export started at a space homepage; the patcher may unwrap it.
    Space,
}

/// A sidebar file: the tree plus its directives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidebarDocument {
    pub mode: SidebarMode,
    pub tree: Tree,
}

impl SidebarDocument {
    pub fn new(tree: Tree, mode: SidebarMode) -> Self {
        Self { mode, tree }
    }

    /// Render as Markdown with links pointing into `output_root`.
    pub fn render(&self, output_root: &Path) -> String {
        render_markdown(&self.tree, self.mode, output_root)
    }

    pub fn parse(text: &str) -> Result<Self, MalformedSidebarError> {
        Parser::default().parse(text)
    }
}

/// Render `tree` as a Markdown list with `file://` links into `output_root`.
pub fn to_markdown(tree: &Tree, output_root: &Path) -> String {
    render_markdown(tree, SidebarMode::Default, output_root)
}

/// Parse a Markdown sidebar back into a tree, ignoring directives.
pub fn from_markdown(text: &str) -> Result<Tree, MalformedSidebarError> {
    SidebarDocument::parse(text).map(|doc| doc.tree)
}

/// Promote the children of a single root to roots.
///
/// Returns `None` (and leaves the decision to the caller) when the tree does
/// not have exactly one root.
pub fn unwrap_single_root(tree: &Tree) -> Option<Tree> {
    match tree.roots.as_slice() {
        [only] => Some(Tree::new(only.children.clone())),
        _ => None,
    }
}

fn render_markdown(tree: &Tree, mode: SidebarMode, output_root: &Path) -> String {
    let root_uri = file_uri_prefix(output_root);
    let mut out = String::new();
    if mode == SidebarMode::Space {
        out.push_str(MODE_SPACE_DIRECTIVE);
        out.push('\n');
    }
    for (depth, node) in tree.iter_with_depth() {
        out.push_str(&"  ".repeat(depth));
        out.push_str("- ");
        let title = escape_title(&node.title);
        match &node.local_path {
            Some(path) => {
                let target = format!("{root_uri}/{}.html", utf8_percent_encode(path, HREF_ESCAPE));
                out.push_str(&format!("[{title}]({target})"));
            }
            None => out.push_str(&title),
        }
        out.push('\n');
    }
    out
}

/// `file://` URI of the output root, without a trailing slash.
fn file_uri_prefix(output_root: &Path) -> String {
    let absolute = std::path::absolute(output_root).unwrap_or_else(|_| output_root.to_path_buf());
    let path = absolute.to_string_lossy().replace('\\', "/");
    let path = path.trim_end_matches('/');
    let encoded = utf8_percent_encode(path, HREF_ESCAPE).to_string();
    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}

pub(crate) fn escape_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        match c {
            '\\' | '[' | ']' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

// ============================================================================
// Parsing
// ============================================================================

/// One meaningful list line.
enum Item {
    Page { title: String, target: String },
    Folder { title: String },
}

#[derive(Default)]
struct Parser {
    mode: SidebarMode,
    roots: Vec<TreeNode>,
    /// Open nodes on the path to the current line; index = depth.
    stack: Vec<TreeNode>,
    seen_ids: HashSet<String>,
    seen_paths: HashSet<String>,
}

impl Parser {
    fn parse(mut self, text: &str) -> Result<SidebarDocument, MalformedSidebarError> {
        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end();
            let trimmed = line.trim_start();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with("<!--") {
                self.directive(trimmed);
                continue;
            }
            let Some(rest) = ["- ", "* ", "+ "]
                .iter()
                .find_map(|bullet| trimmed.strip_prefix(bullet))
            else {
                continue;
            };

            let level = indent_level(&line[..line.len() - trimmed.len()]);
            if level > self.stack.len() {
                return Err(MalformedSidebarError::IndentJump {
                    line: line_no,
                    from: self.stack.len().saturating_sub(1),
                    to: level,
                });
            }
            while self.stack.len() > level {
                self.close_top();
            }

            let node = match parse_item(rest.trim(), line_no)? {
                Item::Page { title, target } => self.page_node(title, &target, line_no)?,
                Item::Folder { title } => {
                    let id = self.folder_id(&title, line_no);
                    TreeNode::folder(id, title)
                }
            };
            self.stack.push(node);
        }
        while !self.stack.is_empty() {
            self.close_top();
        }
        Ok(SidebarDocument {
            mode: self.mode,
            tree: Tree::new(self.roots),
        })
    }

    fn directive(&mut self, comment: &str) {
        let inner = comment
            .trim_start_matches("<!--")
            .trim_end_matches("-->")
            .trim();
        if let Some((key, value)) = inner.split_once(':')
            && key.trim() == "mode"
        {
            self.mode = match value.trim() {
                "space" => SidebarMode::Space,
                _ => SidebarMode::Default,
            };
        }
    }

    fn close_top(&mut self) {
        if let Some(node) = self.stack.pop() {
            match self.stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => self.roots.push(node),
            }
        }
    }

    fn page_node(
        &mut self,
        title: String,
        target: &str,
        line: usize,
    ) -> Result<TreeNode, MalformedSidebarError> {
        let unresolvable = || MalformedSidebarError::UnresolvableTarget {
            line,
            target: target.to_string(),
        };
        let (stem, id) = resolve_target(target).ok_or_else(unresolvable)?;
        let path = format!("{PAGES_DIR}/{stem}");
        if !self.seen_ids.insert(id.clone()) || !self.seen_paths.insert(path.clone()) {
            return Err(MalformedSidebarError::DuplicatePath { line, path });
        }
        let mut node = TreeNode::page(id, title);
        node.local_path = Some(path);
        Ok(node)
    }

    /// Deterministic id for a folder from its position in the document.
    fn folder_id(&self, title: &str, line: usize) -> String {
        let mut hasher = Sha256::new();
        for ancestor in &self.stack {
            hasher.update(ancestor.title.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(title.as_bytes());
        hasher.update(b"\0");
        hasher.update(line.to_le_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("folder-{}", &digest[..12])
    }
}

/// Depth of a line: one level per tab or per two spaces, rounding down.
fn indent_level(indent: &str) -> usize {
    let tabs = indent.chars().filter(|&c| c == '\t').count();
    let spaces = indent.chars().filter(|&c| c == ' ').count();
    tabs + spaces / 2
}

fn parse_item(text: &str, line: usize) -> Result<Item, MalformedSidebarError> {
    let Some(after_bracket) = text.strip_prefix('[') else {
        return Ok(Item::Folder {
            title: unescape_title(text),
        });
    };

    let mut title = String::new();
    let mut chars = after_bracket.char_indices();
    let mut close = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    title.push(escaped);
                }
            }
            ']' => {
                close = Some(i);
                break;
            }
            c => title.push(c),
        }
    }

    let link = close
        .map(|i| &after_bracket[i + 1..])
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'));
    match link {
        Some(target) => Ok(Item::Page {
            title,
            target: target.trim().to_string(),
        }),
        None => Err(MalformedSidebarError::UnresolvableTarget {
            line,
            target: text.to_string(),
        }),
    }
}

fn unescape_title(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(next) = chars.next()
        {
            out.push(next);
        } else {
            out.push(c);
        }
    }
    out
}

/// Page file stem and id named by a link target.
///
/// Accepts `file://` URIs and plain relative or absolute paths, as long as
/// they name `<slug>--<id>.html` directly inside a `pages` directory.
fn resolve_target(target: &str) -> Option<(String, String)> {
    let raw = target.strip_prefix("file://").unwrap_or(target);
    let raw = raw.split(['#', '?']).next().unwrap_or(raw);
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    let path = Path::new(decoded.as_ref());

    let parent = path.parent()?.file_name()?.to_str()?;
    if parent != PAGES_DIR || path.extension()?.to_str()? != "html" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let parsed = parse_file_stem(stem)?;
    Some((stem.to_string(), parsed.id))
}

// ============================================================================
// HTML fragment
// ============================================================================

/// Sidebar fragment with no active page: root folders start open.
pub fn to_html_fragment(tree: &Tree) -> String {
    render_fragment(tree, None, "")
}

/// Sidebar fragment for one document.
///
/// With `active` set, that page's link carries `class="active-page"` and the
/// `<details>` on the path to it are open; otherwise only root folders are.
/// `link_prefix` is prepended to every page href (`"pages/"` for files at the
/// output root, `""` for files inside `pages/`).
pub fn render_fragment(tree: &Tree, active: Option<&str>, link_prefix: &str) -> String {
    let open: HashSet<&str> = match active {
        Some(id) if tree.contains(id) => {
            let mut path = tree.ancestors_of(id);
            path.push(id);
            path.into_iter().collect()
        }
        _ => tree.roots.iter().map(|n| n.id.as_str()).collect(),
    };
    let ctx = FragmentContext {
        active,
        open: &open,
        link_prefix,
    };
    html! {
        div.sidebar-tree {
            ul {
                @for node in &tree.roots {
                    (render_node(node, &ctx))
                }
            }
        }
    }
    .into_string()
}

struct FragmentContext<'a> {
    active: Option<&'a str>,
    open: &'a HashSet<&'a str>,
    link_prefix: &'a str,
}

fn render_node(node: &TreeNode, ctx: &FragmentContext<'_>) -> Markup {
    html! {
        @if node.children.is_empty() {
            li.leaf { (entry_label(node, ctx)) }
        } @else {
            li.folder {
                details open[ctx.open.contains(node.id.as_str())] {
                    summary { (entry_label(node, ctx)) }
                    ul {
                        @for child in &node.children {
                            (render_node(child, ctx))
                        }
                    }
                }
            }
        }
    }
}

fn entry_label(node: &TreeNode, ctx: &FragmentContext<'_>) -> Markup {
    let is_active = ctx.active == Some(node.id.as_str());
    html! {
        @if let Some(file) = node.file_name() {
            a href=(format!("{}{}", ctx.link_prefix, href(&file)))
              class=[is_active.then_some("active-page")] { (node.title) }
        } @else {
            span { (node.title) }
        }
    }
}
