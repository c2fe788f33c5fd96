//! End-to-end tests: export an in-memory space, then restructure its sidebar.
//!
//! Everything goes through the public API with a `MemoryGateway`, the same
//! way the CLI drives a `ConfluenceClient`.

use spacedump::editor::{EDITOR_HTML, editor_items, editor_markdown, write_editor};
use spacedump::export::{ExportOptions, TREE_JSON, export};
use spacedump::gateway::{MemoryGateway, RootDirectory};
use spacedump::inject::{NAV_BEGIN, NAV_END};
use spacedump::patch::{PatchOptions, SIDEBAR_EDIT_MD, SIDEBAR_MD, apply_patch, load_edited_sidebar};
use spacedump::scan::ScanRequest;
use spacedump::sidebar::{SidebarDocument, SidebarMode, from_markdown};
use spacedump::types::Tree;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// ```text
/// 100 Home
/// ├── 110 Overview
/// ├── 120 Setup Guide      (diagram.png)
/// │   └── 121 Troubleshooting
/// └── 130 FAQ
/// ```
fn space() -> MemoryGateway {
    MemoryGateway::new()
        .page(
            "100",
            "Home",
            r#"<p>Read the <a href="/wiki/spaces/DOC/pages/120/Setup+Guide#install">guide</a>.</p>"#,
        )
        .child("100", "110", "Overview", "<p>What this is.</p>")
        .child(
            "100",
            "120",
            "Setup Guide",
            r#"<p><img src="/wiki/download/attachments/120/diagram.png?version=2"></p>"#,
        )
        .child("120", "121", "Troubleshooting", r#"<p><a href="/pages/viewpage.action?pageId=555">Old notes</a></p>"#)
        .child("100", "130", "FAQ", "<p>Questions.</p>")
        .attachment("120", "att-1", "diagram.png", b"\x89PNG fake")
        .label("100", "handbook")
        .label("120", "handbook")
        .space("DOC", "Documentation", "100")
}

fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap_or_else(|e| panic!("{rel}: {e}"))
}

/// The navigation region of a document.
fn nav(html: &str) -> &str {
    let begin = html.find(NAV_BEGIN).unwrap() + NAV_BEGIN.len();
    let end = html.find(NAV_END).unwrap();
    &html[begin..end]
}

/// Everything outside the navigation region, for `index.html` and each page.
fn content_regions(root: &Path) -> Vec<(PathBuf, String)> {
    let mut files = vec![PathBuf::from("index.html")];
    let mut pages: Vec<PathBuf> = std::fs::read_dir(root.join("pages"))
        .unwrap()
        .map(|entry| Path::new("pages").join(entry.unwrap().file_name()))
        .collect();
    pages.sort();
    files.extend(pages);
    files
        .into_iter()
        .map(|rel| {
            let html = read(root, rel.to_str().unwrap());
            let begin = html.find(NAV_BEGIN).unwrap() + NAV_BEGIN.len();
            let end = html.find(NAV_END).unwrap();
            let outside = format!("{}{}", &html[..begin], &html[end..]);
            (rel, outside)
        })
        .collect()
}

fn export_space(gw: &MemoryGateway, root: &Path) -> spacedump::export::ExportReport {
    let homepage = gw.space_homepage("DOC").unwrap();
    let options = ExportOptions {
        title: Some("DOC".to_string()),
        mode: SidebarMode::Space,
        ..ExportOptions::default()
    };
    export(gw, &ScanRequest::tree(homepage), root, &options, None).unwrap()
}

#[test]
fn export_produces_a_browsable_archive() {
    let gw = space();
    let tmp = TempDir::new().unwrap();
    let report = export_space(&gw, tmp.path());

    assert!(report.download.is_complete());
    assert_eq!(report.download.written(), 5);
    assert_eq!(report.download.attachments(), 1);

    let home = read(tmp.path(), "pages/Home--100.html");
    assert!(home.contains(r#"href="Setup-Guide--120.html#install""#));
    assert!(nav(&home).contains(r#"class="active-page""#));

    let guide = read(tmp.path(), "pages/Setup-Guide--120.html");
    assert!(guide.contains(r#"src="../attachments/120/diagram.png""#));
    assert_eq!(
        std::fs::read(tmp.path().join("attachments/120/diagram.png")).unwrap(),
        b"\x89PNG fake"
    );

    // Links to pages outside the export stay visible but are marked.
    let trouble = read(tmp.path(), "pages/Troubleshooting--121.html");
    assert!(trouble.contains(r#"data-unresolved="true""#));

    let tree: Tree = serde_json::from_str(&read(tmp.path(), TREE_JSON)).unwrap();
    assert_eq!(tree, report.tree);
    let sidebar = from_markdown(&read(tmp.path(), SIDEBAR_MD)).unwrap();
    assert_eq!(sidebar.len(), tree.len());
}

#[test]
fn excluded_subtree_is_missing_everywhere() {
    let gw = space();
    let tmp = TempDir::new().unwrap();
    let request = ScanRequest::tree("100").exclude_ids(["120"]);
    let report = export(&gw, &request, tmp.path(), &ExportOptions::default(), None).unwrap();

    assert_eq!(report.tree.len(), 3);
    assert_eq!(report.scan.pruned.len(), 1);
    assert!(!tmp.path().join("pages/Setup-Guide--120.html").exists());
    assert!(!tmp.path().join("pages/Troubleshooting--121.html").exists());
    assert!(!gw.was_touched("121"));
    assert!(!read(tmp.path(), SIDEBAR_MD).contains("Troubleshooting"));
}

#[test]
fn label_forest_keeps_nested_matches_nested() {
    let gw = space();
    let tmp = TempDir::new().unwrap();
    let roots = gw.pages_with_label("handbook").unwrap();
    let request = ScanRequest::forest(roots, "handbook");
    let report = export(&gw, &request, tmp.path(), &ExportOptions::default(), None).unwrap();

    // 120 carries the label too, but is exported once, under Home.
    assert_eq!(report.tree.roots.len(), 1);
    assert_eq!(report.tree.len(), 5);
    assert_eq!(report.tree.ancestors_of("121"), vec!["100", "120"]);
}

#[test]
fn restructured_sidebar_is_patched_in_without_network() {
    let gw = space();
    let tmp = TempDir::new().unwrap();
    export_space(&gw, tmp.path());
    let calls_after_export = gw.calls().len();
    let content_before = content_regions(tmp.path());

    // Guides becomes a folder holding the setup pages; Home keeps the rest.
    let edited = "\
- Guides
  - [Setup Guide](pages/Setup-Guide--120.html)
    - [Troubleshooting](pages/Troubleshooting--121.html)
- [Home](pages/Home--100.html)
  - [FAQ](pages/FAQ--130.html)
  - [Overview](pages/Overview--110.html)
";
    std::fs::write(tmp.path().join(SIDEBAR_EDIT_MD), edited).unwrap();
    let (source, markdown) = load_edited_sidebar(tmp.path(), false).unwrap();
    assert_eq!(source, tmp.path().join(SIDEBAR_EDIT_MD));

    let report = apply_patch(tmp.path(), &markdown, &PatchOptions::default()).unwrap();
    assert!(report.warnings.is_empty());
    assert!(report.unresolved.is_empty());
    assert!(report.orphaned.is_empty());
    // sidebar.html, index.html and five pages
    assert_eq!(report.patched.len(), 7);
    assert_eq!(gw.calls().len(), calls_after_export);
    assert_eq!(content_regions(tmp.path()), content_before);

    let faq = read(tmp.path(), "pages/FAQ--130.html");
    let faq_nav = nav(&faq);
    let guides = faq_nav.find("Guides").unwrap();
    let setup = faq_nav.find("Setup-Guide--120.html").unwrap();
    let faq_link = faq_nav.find("FAQ--130.html").unwrap();
    let overview = faq_nav.find("Overview--110.html").unwrap();
    assert!(guides < setup && setup < faq_link && faq_link < overview);
    assert!(faq.contains("<p>Questions.</p>"));

    // Idempotent: the same sidebar again touches nothing.
    let again = apply_patch(tmp.path(), &markdown, &PatchOptions::default()).unwrap();
    assert!(again.patched.is_empty());
}

#[test]
fn restore_original_reapplies_sidebar_md_with_its_directive() {
    let gw = space();
    let tmp = TempDir::new().unwrap();
    export_space(&gw, tmp.path());
    let original_faq = read(tmp.path(), "pages/FAQ--130.html");

    std::fs::write(
        tmp.path().join(SIDEBAR_EDIT_MD),
        "- [FAQ](pages/FAQ--130.html)\n- [Home](pages/Home--100.html)\n",
    )
    .unwrap();
    let (_, edited) = load_edited_sidebar(tmp.path(), false).unwrap();
    apply_patch(tmp.path(), &edited, &PatchOptions::default()).unwrap();
    assert_ne!(read(tmp.path(), "pages/FAQ--130.html"), original_faq);

    let (source, original) = load_edited_sidebar(tmp.path(), true).unwrap();
    assert_eq!(source, tmp.path().join(SIDEBAR_MD));
    let report = apply_patch(tmp.path(), &original, &PatchOptions::default()).unwrap();
    // The space directive in sidebar.md promotes Home's children; Home's own
    // page drops out of the navigation.
    assert!(report.unwrapped);
    assert!(report.unresolved.is_empty());
    assert_eq!(report.orphaned, vec![PathBuf::from("pages/Home--100.html")]);
    let faq = read(tmp.path(), "pages/FAQ--130.html");
    assert!(!nav(&faq).contains("Home--100.html"));
}

#[test]
fn failed_page_stays_in_sidebar_and_is_reported_by_patch() {
    let gw = space().fail_body("130");
    let tmp = TempDir::new().unwrap();
    let report = export(
        &gw,
        &ScanRequest::tree("100"),
        tmp.path(),
        &ExportOptions::default(),
        None,
    )
    .unwrap();

    assert!(!report.download.is_complete());
    assert_eq!(report.download.written(), 4);
    let failures: Vec<_> = report.download.failures().map(|f| f.node_id.clone()).collect();
    assert_eq!(failures, vec!["130"]);
    assert!(read(tmp.path(), SIDEBAR_MD).contains("FAQ--130"));

    let markdown = read(tmp.path(), SIDEBAR_MD);
    let patch = apply_patch(tmp.path(), &markdown, &PatchOptions::default()).unwrap();
    assert_eq!(patch.unresolved, vec!["pages/FAQ--130".to_string()]);
    let patched: Vec<PathBuf> = patch.patched;
    assert!(!patched.iter().any(|p| p.ends_with("FAQ--130.html")));
}

#[test]
fn editor_export_is_accepted_by_the_patcher() {
    let gw = space();
    let tmp = TempDir::new().unwrap();
    export_space(&gw, tmp.path());

    let written = write_editor(tmp.path(), false).unwrap();
    assert!(written.created_working_copy);
    assert_eq!(written.entries, 5);
    let editor = read(tmp.path(), EDITOR_HTML);
    assert!(editor.contains(r#"data-href="pages/Setup-Guide--120.html""#));

    // What the editor exports for an untouched tree is the same sidebar.
    let (source, markdown) = load_edited_sidebar(tmp.path(), false).unwrap();
    assert_eq!(source, tmp.path().join(SIDEBAR_EDIT_MD));
    let document = SidebarDocument::parse(&markdown).unwrap();
    let exported = editor_markdown(&editor_items(&document.tree), document.mode);
    assert_eq!(SidebarDocument::parse(&exported).unwrap(), document);

    let from_editor = apply_patch(tmp.path(), &exported, &PatchOptions::default()).unwrap();
    let from_original = apply_patch(tmp.path(), &markdown, &PatchOptions::default()).unwrap();
    assert!(from_editor.unresolved.is_empty());
    assert!(from_editor.warnings.is_empty());
    assert_eq!(from_editor.orphaned, from_original.orphaned);
    // Same navigation, so the second run has nothing left to change.
    assert!(from_original.patched.is_empty());
}
