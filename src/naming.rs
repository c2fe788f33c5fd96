//! Local file naming for exported pages and attachments.
//!
//! Every page is written to `pages/<slug>--<id>.html`:
//!
//! - `Release Notes 2.0` with id `42` → `pages/Release-Notes-2-0--42.html`
//! - `Ärger & Co.` with id `7` → `pages/Ärger-Co--7.html`
//! - `???` with id `9` → `pages/page--9.html`
//!
//! The slug collapses every run of non-alphanumeric characters into a single
//! dash and never starts or ends with one, so it can never contain `--`. That
//! makes the first `--` in a file stem an unambiguous separator and lets the
//! sidebar parser recover the id from a link target alone. Ids that contain
//! characters unsafe in file names are percent-encoded.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Directory (relative to the output root) holding rendered pages.
pub const PAGES_DIR: &str = "pages";

/// Directory (relative to the output root) holding downloaded attachments.
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Directory under [`ATTACHMENTS_DIR`] shared by site icons and emoticons.
pub const ICONS_DIR: &str = "_icons";

/// Separator between slug and id in a page file stem.
const ID_SEPARATOR: &str = "--";

/// Characters kept verbatim when an id is embedded in a file name.
const ID_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Characters escaped when a local path is used inside an `href` or URI.
pub(crate) const HREF_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Result of splitting a page file stem like `Release-Notes--42`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPageName {
    pub slug: String,
    pub id: String,
}

/// Turn a title into a file-name-safe slug.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "page".to_string()
    } else {
        slug
    }
}

/// Output-relative path (no extension) for a page.
pub fn local_path(title: &str, id: &str) -> String {
    format!("{PAGES_DIR}/{}", file_stem(title, id))
}

/// File stem for a page: `<slug>--<escaped id>`.
pub fn file_stem(title: &str, id: &str) -> String {
    format!(
        "{}{ID_SEPARATOR}{}",
        slugify(title),
        utf8_percent_encode(id, ID_ESCAPE)
    )
}

/// Split a page file stem back into slug and id.
///
/// Returns `None` when the stem does not follow the `<slug>--<id>` shape.
pub fn parse_file_stem(stem: &str) -> Option<ParsedPageName> {
    let (slug, raw_id) = stem.split_once(ID_SEPARATOR)?;
    if raw_id.is_empty() {
        return None;
    }
    let id = percent_decode_str(raw_id).decode_utf8().ok()?.into_owned();
    Some(ParsedPageName {
        slug: slug.to_string(),
        id,
    })
}

/// Make an arbitrary name safe to use as a single path component.
///
/// Replaces characters that are invalid on Windows, Linux or macOS with `_`
/// and strips surrounding whitespace and dots.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Output-relative path of an attachment.
pub fn attachment_path(node_id: &str, filename: &str) -> String {
    format!(
        "{ATTACHMENTS_DIR}/{}/{}",
        sanitize_filename(node_id),
        sanitize_filename(filename)
    )
}

/// Output-relative path of a site icon, keeping its sub-directories.
///
/// `emoticons/smile.svg` → `attachments/_icons/emoticons/smile.svg`.
pub fn icon_path(key: &str) -> String {
    let parts: Vec<String> = key
        .split('/')
        .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        .map(sanitize_filename)
        .collect();
    format!("{ATTACHMENTS_DIR}/{ICONS_DIR}/{}", parts.join("/"))
}

/// Percent-encode a relative path for use in an `href`/`src` attribute.
pub fn href(path: &str) -> String {
    utf8_percent_encode(path, HREF_ESCAPE).to_string()
}
