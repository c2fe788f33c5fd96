//! A complete export: scan → sidebar artifacts → download → index.
//!
//! ```text
//! outputRoot/
//! ├── index.html
//! ├── sidebar.md  sidebar.html  tree.json
//! ├── styles/site.css  styles/<custom>.css
//! ├── pages/<slug>--<id>.html  pages/<slug>--<id>.json
//! └── attachments/<node-id>/<filename>
//! ```
//!
//! The sidebar artifacts are written from the frozen tree before any page is
//! downloaded, so an interrupted run still leaves an editable `sidebar.md`
//! that describes the intended archive.

use crate::download::{DownloadError, DownloadEvent, DownloadOptions, DownloadReport, download};
use crate::fsutil::write_atomic;
use crate::gateway::Gateway;
use crate::inject::{SITE_CSS, SITE_CSS_PATH, render_index};
use crate::naming::sanitize_filename;
use crate::patch::{SIDEBAR_HTML, SIDEBAR_MD};
use crate::scan::{ScanError, ScanReport, ScanRequest, scan};
use crate::sidebar::{SidebarDocument, SidebarMode, render_fragment};
use crate::types::Tree;
use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::info;

/// The frozen tree, as JSON.
pub const TREE_JSON: &str = "tree.json";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("custom CSS file {0} could not be read: {1}")]
    CustomCss(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Title of the archive; defaults to the first root's title.
    pub title: Option<String>,
    /// Written as a directive into `sidebar.md`.
    pub mode: SidebarMode,
    /// Stylesheet linked after the standard one.
    pub custom_css: Option<PathBuf>,
    pub download: DownloadOptions,
}

#[derive(Debug)]
pub struct ExportReport {
    pub output_root: PathBuf,
    pub title: String,
    pub tree: Tree,
    pub scan: ScanReport,
    pub download: DownloadReport,
}

/// Export everything `request` selects into `output_root`.
pub fn export<G: Gateway + ?Sized>(
    gateway: &G,
    request: &ScanRequest,
    output_root: &Path,
    options: &ExportOptions,
    events: Option<Sender<DownloadEvent>>,
) -> Result<ExportReport, ExportError> {
    let inventory = scan(gateway, request)?;
    let tree = inventory.tree;
    let title = options
        .title
        .clone()
        .or_else(|| tree.roots.first().map(|r| r.title.clone()))
        .unwrap_or_else(|| "Export".to_string());

    std::fs::create_dir_all(output_root)?;
    let css_refs = write_styles(output_root, options.custom_css.as_deref())?;
    write_sidebar_artifacts(&tree, options.mode, output_root)?;

    let download_options = DownloadOptions {
        css_refs: css_refs.clone(),
        ..options.download.clone()
    };
    let report = download(gateway, &tree, output_root, &download_options, events)?;

    write_atomic(
        &output_root.join("index.html"),
        render_index(&tree, &title, &css_refs).as_bytes(),
    )?;
    info!("Export written to {}", output_root.display());

    Ok(ExportReport {
        output_root: output_root.to_path_buf(),
        title,
        tree,
        scan: inventory.report,
        download: report,
    })
}

/// Write `sidebar.md`, `sidebar.html` and `tree.json`.
pub fn write_sidebar_artifacts(
    tree: &Tree,
    mode: SidebarMode,
    output_root: &Path,
) -> Result<(), ExportError> {
    let document = SidebarDocument::new(tree.clone(), mode);
    write_atomic(
        &output_root.join(SIDEBAR_MD),
        document.render(output_root).as_bytes(),
    )?;
    write_atomic(
        &output_root.join(SIDEBAR_HTML),
        render_fragment(tree, None, "pages/").as_bytes(),
    )?;
    write_atomic(
        &output_root.join(TREE_JSON),
        &serde_json::to_vec_pretty(tree)?,
    )?;
    Ok(())
}

/// Write the standard stylesheet and copy the custom one.
///
/// Returns the output-relative references in link order.
fn write_styles(output_root: &Path, custom_css: Option<&Path>) -> Result<Vec<String>, ExportError> {
    write_atomic(&output_root.join(SITE_CSS_PATH), SITE_CSS.as_bytes())?;
    let mut refs = vec![SITE_CSS_PATH.to_string()];

    if let Some(css) = custom_css {
        let bytes = std::fs::read(css).map_err(|e| ExportError::CustomCss(css.to_path_buf(), e))?;
        let name = css
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .unwrap_or_else(|| "custom.css".to_string());
        let name = if format!("styles/{name}") == SITE_CSS_PATH {
            format!("custom-{name}")
        } else {
            name
        };
        let rel = format!("styles/{name}");
        write_atomic(&output_root.join(&rel), &bytes)?;
        refs.push(rel);
    }
    Ok(refs)
}

/// `<outdir>/<YYYY-MM-DD HHMM> <title>` for a timestamped run.
pub fn run_directory<Tz: TimeZone>(outdir: &Path, title: &str, started: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    outdir.join(format!(
        "{} {}",
        started.format("%Y-%m-%d %H%M"),
        sanitize_filename(title)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{read, sample_gateway};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn export_writes_the_full_layout() {
        let gw = sample_gateway();
        let tmp = TempDir::new().unwrap();
        let report = export(
            &gw,
            &ScanRequest::tree("100"),
            tmp.path(),
            &ExportOptions::default(),
            None,
        )
        .unwrap();

        assert_eq!(report.title, "Home");
        assert!(report.download.is_complete());
        for file in [
            "index.html",
            "sidebar.md",
            "sidebar.html",
            "tree.json",
            "styles/site.css",
            "pages/Home--100.html",
            "pages/Home--100.json",
            "pages/Troubleshooting--121.html",
            "attachments/120/diagram.png",
        ] {
            assert!(tmp.path().join(file).is_file(), "missing {file}");
        }

        let tree: Tree = serde_json::from_str(&read(tmp.path(), TREE_JSON)).unwrap();
        assert_eq!(tree, report.tree);
        let md = read(tmp.path(), SIDEBAR_MD);
        assert_eq!(crate::sidebar::from_markdown(&md).unwrap().len(), 5);
    }

    #[test]
    fn custom_css_is_linked_after_standard() {
        let gw = sample_gateway();
        let tmp = TempDir::new().unwrap();
        let css = tmp.path().join("brand.css");
        std::fs::write(&css, "body { color: red; }").unwrap();
        let out = tmp.path().join("out");
        let options = ExportOptions {
            custom_css: Some(css),
            ..ExportOptions::default()
        };
        export(&gw, &ScanRequest::tree("100"), &out, &options, None).unwrap();

        assert_eq!(read(&out, "styles/brand.css"), "body { color: red; }");
        let page = read(&out, "pages/FAQ--130.html");
        let site = page.find("../styles/site.css").unwrap();
        let brand = page.find("../styles/brand.css").unwrap();
        assert!(site < brand);
    }

    #[test]
    fn missing_custom_css_is_an_error() {
        let gw = sample_gateway();
        let tmp = TempDir::new().unwrap();
        let options = ExportOptions {
            custom_css: Some(tmp.path().join("nope.css")),
            ..ExportOptions::default()
        };
        let err = export(&gw, &ScanRequest::tree("100"), tmp.path(), &options, None).unwrap_err();
        assert!(matches!(err, ExportError::CustomCss(..)));
    }

    #[test]
    fn space_mode_is_recorded_in_sidebar() {
        let gw = sample_gateway();
        let tmp = TempDir::new().unwrap();
        let options = ExportOptions {
            mode: SidebarMode::Space,
            ..ExportOptions::default()
        };
        export(&gw, &ScanRequest::tree("100"), tmp.path(), &options, None).unwrap();
        assert!(read(tmp.path(), SIDEBAR_MD).starts_with(crate::sidebar::MODE_SPACE_DIRECTIVE));
    }

    #[test]
    fn excluded_root_exports_an_empty_archive() {
        let gw = sample_gateway();
        let tmp = TempDir::new().unwrap();
        let request = ScanRequest::tree("100").exclude_ids(["100"]);
        let report = export(&gw, &request, tmp.path(), &ExportOptions::default(), None).unwrap();

        assert!(report.tree.is_empty());
        assert_eq!(report.title, "Export");
        assert_eq!(read(tmp.path(), SIDEBAR_MD), "");
        assert!(tmp.path().join("index.html").is_file());
    }

    #[test]
    fn unreachable_gateway_fails_before_writing() {
        let gw = sample_gateway().unreachable();
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let err = export(&gw, &ScanRequest::tree("100"), &out, &ExportOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, ExportError::Scan(_)));
        assert!(!out.exists());
    }

    #[test]
    fn run_directory_is_timestamped_and_sanitized() {
        let started = Utc.with_ymd_and_hms(2025, 1, 31, 14, 5, 0).unwrap();
        let dir = run_directory(Path::new("/out"), "Ops: Runbooks/2025", &started);
        assert_eq!(dir, PathBuf::from("/out/2025-01-31 1405 Ops_ Runbooks_2025"));
    }
}
