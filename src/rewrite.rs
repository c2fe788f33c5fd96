//! Rewriting of references inside downloaded page bodies.
//!
//! The rendered body of a page still points at the remote server: images load
//! from `/download/attachments/<page>/<file>`, and links to other pages use one
//! of several URL shapes. This module turns those references into paths inside
//! the archive, as seen from a page in `pages/`:
//!
//! | Reference | Becomes |
//! |-----------|---------|
//! | `<img src=".../download/attachments/42/a.png?version=2">` | `../attachments/42/a.png` |
//! | `<a data-linked-resource-id="42">` | `<slug>--42.html` |
//! | `<a href="/spaces/X/pages/42/Title">` | `<slug>--42.html` |
//! | `<a href="/pages/viewpage.action?pageId=42">` | `<slug>--42.html` |
//! | `<img src="/wiki/images/icons/emoticons/smile.svg">` | `../attachments/_icons/emoticons/smile.svg` |
//!
//! A reference to a page, attachment or icon that is not part of the export
//! keeps pointing at the server and gets a `data-unresolved="true"` attribute,
//! so the archive stays honest about what it does not contain. Root-relative
//! URLs resolve against the origin (scheme and host) of the site, since the
//! bodies already carry the context path (`/wiki/...`).
//!
//! Only `<img>` and `<a>` opening tags are touched; everything else passes
//! through byte for byte.

use crate::naming::{attachment_path, href, icon_path};
use crate::types::Tree;
use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<(img|a)\b[^>]*>").unwrap());

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\s([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static PAGES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/pages/(\d+)").unwrap());

static PAGE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"pageId=(\d+)").unwrap());

static ATTACHMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/download/(?:attachments|thumbnails)/([^/?#]+)/([^/?#]+)").unwrap()
});

static ICON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/images/icons/([^?#]+)").unwrap());

/// Scheme and host of `url`, without any path.
///
/// `https://acme.atlassian.net/wiki` → `https://acme.atlassian.net`.
pub fn url_origin(url: &str) -> &str {
    let url = url.trim().trim_end_matches('/');
    let host_start = url.find("://").map_or(0, |i| i + 3);
    match url[host_start..].find('/') {
        Some(i) => &url[..host_start + i],
        None => url,
    }
}

/// Files present in the archive for the page being rewritten.
#[derive(Debug, Clone, Default)]
pub struct LocalFiles {
    /// Attachment file names downloaded for this page.
    pub attachments: HashSet<String>,
    /// Icon keys (`emoticons/smile.svg`) present under `attachments/_icons/`.
    pub icons: HashSet<String>,
}

/// Where references may point: the pages of the frozen tree.
#[derive(Debug)]
pub struct LinkTargets<'a> {
    pages: HashMap<&'a str, &'a str>,
    base_url: Option<String>,
}

impl<'a> LinkTargets<'a> {
    pub fn new(tree: &'a Tree) -> Self {
        Self {
            pages: tree.path_index(),
            base_url: None,
        }
    }

    /// Site URL for references that stay remote.
    ///
    /// Only its origin is kept: root-relative references resolve against it.
    pub fn with_base_url(mut self, base_url: Option<&str>) -> Self {
        self.base_url = base_url.map(|u| url_origin(u).to_string());
        self
    }

    /// `href` from one page file to the page with `id`, if it is exported.
    fn page_href(&self, id: &str) -> Option<String> {
        let path = self.pages.get(id)?;
        let file = path.rsplit('/').next().unwrap_or(path);
        Some(format!("{}.html", href(file)))
    }

    fn absolutize(&self, url: &str) -> Option<String> {
        match &self.base_url {
            Some(base) if url.starts_with('/') && !url.starts_with("//") => {
                Some(format!("{base}{url}"))
            }
            _ => None,
        }
    }
}

/// A rewritten body and the references that could not be made local.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Rewritten {
    pub html: String,
    /// Original `href`/`src` values left pointing at the server.
    pub unresolved: Vec<String>,
}

/// Icons referenced by `<img>` tags of a body, as `(key, src)` pairs.
///
/// The key is the path below `/images/icons/`, decoded; each key appears once.
pub fn icon_references(body: &str) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    TAG_RE
        .captures_iter(body)
        .filter(|caps| caps[1].eq_ignore_ascii_case("img"))
        .filter_map(|caps| attr_value(&caps[0], "src"))
        .filter_map(|src| icon_key(&src).map(|key| (key, src)))
        .filter(|(key, _)| seen.insert(key.clone()))
        .collect()
}

fn icon_key(url: &str) -> Option<String> {
    let caps = ICON_RE.captures(url)?;
    let key = percent_decode_str(&caps[1]).decode_utf8_lossy().into_owned();
    (!key.is_empty()).then_some(key)
}

/// Rewrite the `<img>` and `<a>` references of one page body.
///
/// `local` holds what was actually downloaded for `node_id`. Attachments of
/// *other* exported pages are assumed present, since every page downloads its
/// own.
pub fn rewrite_body(
    body: &str,
    node_id: &str,
    targets: &LinkTargets<'_>,
    local: &LocalFiles,
) -> Rewritten {
    let mut unresolved = Vec::new();
    let html = TAG_RE
        .replace_all(body, |caps: &Captures| {
            let tag = &caps[0];
            let rewritten = if caps[1].eq_ignore_ascii_case("img") {
                rewrite_img(tag, node_id, targets, local)
            } else {
                rewrite_anchor(tag, node_id, targets, local)
            };
            match rewritten {
                Rewrite::Keep => tag.to_string(),
                Rewrite::Local { attr, value } | Rewrite::Remote { attr, value } => {
                    set_attr(tag, attr, &value)
                }
                Rewrite::Unresolved { attr, original } => {
                    let tag = match targets.absolutize(&original) {
                        Some(abs) => set_attr(tag, attr, &abs),
                        None => tag.to_string(),
                    };
                    unresolved.push(original);
                    mark_unresolved(&tag)
                }
            }
        })
        .into_owned();
    Rewritten { html, unresolved }
}

enum Rewrite {
    Keep,
    Local { attr: &'static str, value: String },
    Remote { attr: &'static str, value: String },
    Unresolved { attr: &'static str, original: String },
}

fn rewrite_img(tag: &str, node_id: &str, targets: &LinkTargets<'_>, local: &LocalFiles) -> Rewrite {
    let Some(src) = attr_value(tag, "src") else {
        return Rewrite::Keep;
    };
    if let Some(rewrite) = rewrite_attachment("src", &src, node_id, targets, &local.attachments) {
        return rewrite;
    }
    if let Some(key) = icon_key(&src) {
        return if local.icons.contains(&key) {
            Rewrite::Local {
                attr: "src",
                value: href(&format!("../{}", icon_path(&key))),
            }
        } else {
            Rewrite::Unresolved {
                attr: "src",
                original: src,
            }
        };
    }
    match targets.absolutize(&src) {
        Some(value) => Rewrite::Remote { attr: "src", value },
        None => Rewrite::Keep,
    }
}

fn rewrite_anchor(tag: &str, node_id: &str, targets: &LinkTargets<'_>, local: &LocalFiles) -> Rewrite {
    let Some(link) = attr_value(tag, "href") else {
        return Rewrite::Keep;
    };
    if link.starts_with('#') {
        return Rewrite::Keep;
    }
    if let Some(rewrite) = rewrite_attachment("href", &link, node_id, targets, &local.attachments) {
        return rewrite;
    }

    let Some(target) = linked_page_id(tag, &link) else {
        return match targets.absolutize(&link) {
            Some(value) => Rewrite::Remote { attr: "href", value },
            None => Rewrite::Keep,
        };
    };
    match targets.page_href(&target) {
        Some(mut value) => {
            if let Some((_, fragment)) = link.split_once('#') {
                value.push('#');
                value.push_str(fragment);
            }
            Rewrite::Local { attr: "href", value }
        }
        None => Rewrite::Unresolved {
            attr: "href",
            original: link,
        },
    }
}

/// Map a `/download/attachments/<page>/<file>` URL to the archive.
///
/// `None` when `url` is not an attachment URL at all.
fn rewrite_attachment(
    attr: &'static str,
    url: &str,
    node_id: &str,
    targets: &LinkTargets<'_>,
    local_attachments: &HashSet<String>,
) -> Option<Rewrite> {
    let caps = ATTACHMENT_RE.captures(url)?;
    let owner = percent_decode_str(&caps[1]).decode_utf8_lossy().into_owned();
    let filename = percent_decode_str(&caps[2]).decode_utf8_lossy().into_owned();

    let present = if owner == node_id {
        local_attachments.contains(&filename)
    } else {
        targets.pages.contains_key(owner.as_str())
    };
    Some(if present {
        Rewrite::Local {
            attr,
            value: href(&format!("../{}", attachment_path(&owner, &filename))),
        }
    } else {
        Rewrite::Unresolved {
            attr,
            original: url.to_string(),
        }
    })
}

/// Page id an anchor points at, from the linked-resource attribute or the URL.
fn linked_page_id(tag: &str, link: &str) -> Option<String> {
    if let Some(id) = attr_value(tag, "data-linked-resource-id") {
        let kind = attr_value(tag, "data-linked-resource-type");
        if kind.as_deref().is_none_or(|k| k == "page") {
            return Some(id);
        }
    }
    PAGES_RE
        .captures(link)
        .or_else(|| PAGE_ID_RE.captures(link))
        .map(|c| c[1].to_string())
}

fn attr_value(tag: &str, name: &str) -> Option<String> {
    ATTR_RE
        .captures_iter(tag)
        .find(|c| c[1].eq_ignore_ascii_case(name))
        .and_then(|c| c.get(2).or_else(|| c.get(3)))
        .map(|m| m.as_str().replace("&amp;", "&"))
}

/// Replace the value of attribute `name` in an opening tag.
fn set_attr(tag: &str, name: &str, value: &str) -> String {
    let Some(value_span) = ATTR_RE
        .captures_iter(tag)
        .find(|c| c[1].eq_ignore_ascii_case(name))
        .and_then(|c| c.get(2).or_else(|| c.get(3)))
    else {
        return tag.to_string();
    };
    let escaped = value.replace('&', "&amp;").replace('"', "&quot;");
    format!(
        "{}{}{}",
        &tag[..value_span.start()],
        escaped,
        &tag[value_span.end()..]
    )
}

fn mark_unresolved(tag: &str) -> String {
    if attr_value(tag, "data-unresolved").is_some() {
        return tag.to_string();
    }
    let body = tag.trim_end_matches('>');
    match body.strip_suffix('/') {
        Some(inner) => format!("{} data-unresolved=\"true\" />", inner.trim_end()),
        None => format!("{body} data-unresolved=\"true\">"),
    }
}
