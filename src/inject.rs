//! Page assembly: a downloaded body plus the shared sidebar → a full document.
//!
//! Every document spacedump writes has the same shell:
//!
//! ```text
//! <head>  title, page-id / page-labels meta, stylesheets (standard, then custom)
//! <body>
//!   <aside id="sidebar">
//!     <!-- spacedump:nav:begin --> sidebar fragment <!-- spacedump:nav:end -->
//!   </aside>
//!   <main>  banner (title, author, last update), then the page body
//! ```
//!
//! The navigation delimiters are the contract with the patcher: it replaces
//! exactly the bytes between them and nothing else, so a restructured sidebar
//! can be applied to an archive without touching any page content.
//!
//! All functions here are pure string transformations.

use crate::sidebar::render_fragment;
use crate::types::{Tree, TreeNode};
use maud::{DOCTYPE, Markup, PreEscaped, html};

/// Opening navigation delimiter.
pub const NAV_BEGIN: &str = "<!-- spacedump:nav:begin -->";
/// Closing navigation delimiter.
pub const NAV_END: &str = "<!-- spacedump:nav:end -->";

/// The standard stylesheet, written to [`SITE_CSS_PATH`].
pub const SITE_CSS: &str = include_str!("../static/site.css");
/// Output-relative path of the standard stylesheet.
pub const SITE_CSS_PATH: &str = "styles/site.css";

/// Assemble the document for one page living in `pages/`.
///
/// `css_refs` are output-relative stylesheet paths in link order. A `None` or
/// blank body produces the shell with banner and sidebar only.
pub fn assemble(
    node: &TreeNode,
    sidebar_fragment: &str,
    css_refs: &[String],
    body_html: Option<&str>,
) -> String {
    let labels = node.labels.iter().cloned().collect::<Vec<_>>().join(", ");
    let body = body_html.filter(|b| !b.trim().is_empty());
    let content = html! {
        header.page-banner {
            h1 { (node.title) }
            (page_meta(node))
        }
        @if let Some(body) = body {
            article.page-content { (PreEscaped(body)) }
        }
    };
    document(
        &node.title,
        Some(&node.id),
        Some(&labels),
        css_refs,
        "../",
        sidebar_fragment,
        content,
    )
    .into_string()
}

/// The archive's `index.html`: the landing page, with the full sidebar.
pub fn render_index(tree: &Tree, title: &str, css_refs: &[String]) -> String {
    let toc = render_fragment(tree, None, "pages/");
    let content = html! {
        header.page-banner {
            h1 { (title) }
            p.page-meta { (tree.len()) " pages" }
        }
        article.page-content {
            p { "Choose a page from the navigation." }
        }
    };
    document(title, None, None, css_refs, "", &toc, content).into_string()
}

/// Replace the region between the navigation delimiters with `fragment`.
///
/// Returns `None` when either delimiter is missing.
pub fn splice_navigation(document: &str, fragment: &str) -> Option<String> {
    let begin = document.find(NAV_BEGIN)? + NAV_BEGIN.len();
    let end = begin + document[begin..].find(NAV_END)?;
    let mut out = String::with_capacity(document.len() + fragment.len());
    out.push_str(&document[..begin]);
    out.push_str(fragment);
    out.push_str(&document[end..]);
    Some(out)
}

fn document(
    title: &str,
    page_id: Option<&str>,
    labels: Option<&str>,
    css_refs: &[String],
    root_prefix: &str,
    sidebar_fragment: &str,
    content: Markup,
) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                @if let Some(id) = page_id {
                    meta name="page-id" content=(id);
                }
                @if let Some(labels) = labels {
                    meta name="page-labels" content=(labels);
                }
                @for css in css_refs {
                    link rel="stylesheet" type="text/css" href={ (root_prefix) (css) };
                }
            }
            body {
                aside #sidebar {
                    a.site-home href={ (root_prefix) "index.html" } { "Contents" }
                    (PreEscaped(NAV_BEGIN))
                    (PreEscaped(sidebar_fragment))
                    (PreEscaped(NAV_END))
                }
                main {
                    (content)
                }
            }
        }
    }
}

fn page_meta(node: &TreeNode) -> Markup {
    html! {
        @if node.author.is_some() || node.modified_at.is_some() {
            p.page-meta {
                @if let Some(author) = &node.author {
                    "Created by " (author)
                }
                @if node.author.is_some() && node.modified_at.is_some() {
                    ", "
                }
                @if let Some(at) = node.modified_at {
                    "last updated " (at.format("%Y-%m-%d %H:%M UTC"))
                }
            }
        }
    }
}
