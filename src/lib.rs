//! # spacedump
//!
//! Exports a Confluence page hierarchy into a self-contained, browsable
//! offline archive with a static navigation sidebar. The sidebar is also
//! written as a Markdown list that a human can restructure and patch back into
//! the archive without downloading anything again.
//!
//! # Architecture: Phases With Explicit Data Between Them
//!
//! ```text
//! 1. Scan       Gateway    →  Tree                 (order-preserving discovery + pruning)
//! 2. Sidebar    Tree       →  sidebar.md / .html   (written before any download)
//! 3. Download   Tree       →  pages/ attachments/  (parallel fetch, link rewriting)
//! 4. Patch      sidebar.md →  pages/*.html         (re-inject navigation, no network)
//! ```
//!
//! Between export and patch, [`editor`] can turn the sidebar into a
//! drag-and-drop page whose output is the edited Markdown.
//!
//! The [`Tree`](types::Tree) is frozen once the scan returns. The download
//! workers share it by reference; the patcher rebuilds a new one from the
//! edited Markdown. Remote access goes through the [`Gateway`](gateway::Gateway)
//! trait only, so every phase is testable against the in-memory gateway
//! (`gateway::MemoryGateway`, behind the `test-support` feature).
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | `TreeNode`, `Tree`, `AttachmentRef` shared by every phase |
//! | [`naming`] | Slugs, `<slug>--<id>` file stems, attachment paths |
//! | [`gateway`] | The remote capability (`Gateway`, `RootDirectory`) and the in-memory test double |
//! | [`confluence`] | REST adapter: Cloud and Data Center auth, pagination, error mapping |
//! | [`scan`] | Phase 1: recursive discovery with exclusion, label and cycle rules |
//! | [`rewrite`] | Body link/image rewriting to local paths |
//! | [`download`] | Phase 3: the worker pool, page assembly and atomic writes |
//! | [`sidebar`] | Tree ↔ Markdown list, and the HTML navigation fragment |
//! | [`inject`] | The page shell and the navigation delimiters |
//! | [`editor`] | Standalone drag-and-drop editor page for the sidebar |
//! | [`patch`] | Phase 4: idempotent re-injection of an edited sidebar |
//! | [`export`] | The whole run: scan, sidebar artifacts, download, index |
//! | [`fsutil`] | Temp-then-rename writes |
//! | [`config`] | `spacedump.toml` loading, layering and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Sidebar Written Before Download
//!
//! `sidebar.md` describes the intended archive, not the downloaded one. An
//! export interrupted half way still leaves a sidebar the patcher can apply,
//! and a page that failed to download shows up as an unresolved entry rather
//! than silently vanishing from the navigation.
//!
//! ## Delimited Navigation
//!
//! Every page carries its sidebar between two HTML comments
//! ([`inject::NAV_BEGIN`], [`inject::NAV_END`]). The patcher replaces those
//! bytes and nothing else, and only writes files whose content changes, so a
//! second run with the same sidebar touches no file.
//!
//! ## Maud for Markup
//!
//! The page shell and the sidebar fragment are [Maud](https://maud.lambda.xyz/)
//! templates. Interpolated titles are escaped by default, which matters here:
//! page titles come from a wiki and routinely contain `<`, `&` and quotes.

pub mod config;
pub mod confluence;
pub mod download;
pub mod editor;
pub mod export;
pub mod fsutil;
pub mod gateway;
pub mod inject;
pub mod naming;
pub mod output;
pub mod patch;
pub mod rewrite;
pub mod scan;
pub mod sidebar;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
