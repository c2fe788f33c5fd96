//! Confluence REST adapter.
//!
//! [`ConfluenceClient`] implements [`Gateway`] and [`RootDirectory`] on top of
//! the v1 content API with a blocking `ureq` agent. It is the only place that
//! knows about URL templates, `expand` parameters, pagination links and
//! authentication headers.
//!
//! Two deployments are supported:
//!
//! | platform | auth (default)                       | context path |
//! |----------|--------------------------------------|--------------|
//! | Cloud    | basic, `CONFLUENCE_USER` + `CONFLUENCE_TOKEN` | `/wiki` |
//! | Data Center | bearer PAT, `CONFLUENCE_TOKEN`   | none         |
//!
//! A response that is not JSON almost always means an SSO login page or a
//! proxy got in the way; it is reported as [`GatewayError::Decode`] with a
//! hint instead of a parse error.

use crate::gateway::{ChildSummary, Gateway, GatewayError, PageMetadata, RootDirectory, SpaceSummary};
use crate::rewrite::url_origin;
use crate::types::AttachmentRef;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use ureq::Agent;

/// Page size for every listing endpoint.
const PAGE_LIMIT: u32 = 200;

/// Largest attachment accepted, in bytes.
const MAX_ATTACHMENT_BYTES: u64 = 1 << 30;

const SEGMENT_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Platform {
    #[default]
    #[serde(rename = "cloud")]
    Cloud,
    #[serde(rename = "dc")]
    DataCenter,
}

impl Platform {
    fn default_context_path(self) -> &'static str {
        match self {
            Platform::Cloud => "/wiki",
            Platform::DataCenter => "",
        }
    }
}

/// How credentials are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Basic for Cloud, bearer for Data Center.
    #[default]
    Auto,
    Basic,
    Bearer,
    None,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing environment variable {0} ({1})")]
    MissingVar(&'static str, &'static str),
}

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Basic { user: String, token: String },
    Bearer(String),
    Anonymous,
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::Basic { user, .. } => write!(f, "Basic({user}, ***)"),
            Auth::Bearer(_) => write!(f, "Bearer(***)"),
            Auth::Anonymous => write!(f, "Anonymous"),
        }
    }
}

impl Auth {
    /// Credentials from `CONFLUENCE_USER` / `CONFLUENCE_TOKEN`.
    pub fn from_env(platform: Platform, method: AuthMethod) -> Result<Self, AuthError> {
        Self::from_lookup(platform, method, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        platform: Platform,
        method: AuthMethod,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AuthError> {
        let method = match (method, platform) {
            (AuthMethod::Auto, Platform::Cloud) => AuthMethod::Basic,
            (AuthMethod::Auto, Platform::DataCenter) => AuthMethod::Bearer,
            (method, _) => method,
        };
        let var = |key: &'static str, hint: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(AuthError::MissingVar(key, hint))
        };
        Ok(match method {
            AuthMethod::Basic => Auth::Basic {
                user: var("CONFLUENCE_USER", "account e-mail for basic auth")?,
                token: var("CONFLUENCE_TOKEN", "API token for basic auth")?,
            },
            AuthMethod::Bearer => Auth::Bearer(var("CONFLUENCE_TOKEN", "personal access token")?),
            AuthMethod::None | AuthMethod::Auto => Auth::Anonymous,
        })
    }

    /// Value of the `Authorization` header, if any.
    pub fn header(&self) -> Option<String> {
        match self {
            Auth::Basic { user, token } => {
                Some(format!("Basic {}", STANDARD.encode(format!("{user}:{token}"))))
            }
            Auth::Bearer(token) => Some(format!("Bearer {token}")),
            Auth::Anonymous => None,
        }
    }

    fn hint(&self) -> &'static str {
        match self {
            Auth::Basic { .. } => "verify CONFLUENCE_USER and CONFLUENCE_TOKEN",
            Auth::Bearer(_) => {
                "check VPN/intranet access, that personal access tokens are not disabled by SSO, and CONFLUENCE_TOKEN"
            }
            Auth::Anonymous => "the site probably requires authentication",
        }
    }
}

/// Root URL of the site including its context path, without trailing slash.
///
/// REST and download URLs are built on it. Root-relative links inside page
/// bodies already carry the context path and resolve against its origin.
pub fn site_url(base_url: &str, platform: Platform, context_path: Option<&str>) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let context = context_path
        .unwrap_or(platform.default_context_path())
        .trim()
        .trim_matches('/');
    if context.is_empty() || base.ends_with(&format!("/{context}")) {
        base.to_string()
    } else {
        format!("{base}/{context}")
    }
}

/// Blocking Confluence client; cheap to share between threads.
pub struct ConfluenceClient {
    agent: Agent,
    site_url: String,
    auth: Auth,
}

impl ConfluenceClient {
    pub fn new(site_url: impl Into<String>, auth: Auth, timeout: Duration) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            site_url: site_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    fn api_url(&self) -> String {
        format!("{}/rest/api", self.site_url)
    }

    /// Resolve a `_links.next` style link against the site.
    fn absolute(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.site_url, link.trim_start_matches('/'))
        }
    }

    fn get(&self, url: &str, accept: &str) -> Result<ureq::http::Response<ureq::Body>, GatewayError> {
        debug!("GET {url}");
        let mut request = self.agent.get(url).header("Accept", accept);
        if let Some(authorization) = self.auth.header() {
            request = request.header("Authorization", &authorization);
        }
        request
            .call()
            .map_err(|e| GatewayError::Unreachable(format!("{url}: {e}")))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, item: &str) -> Result<T, GatewayError> {
        let response = self.get(url, "application/json")?;
        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let mut body = response.into_body();
        check_status(status, &mut body, item)?;
        if !is_json {
            return Err(GatewayError::Decode(format!(
                "non-JSON response for {item}, likely an authentication or SSO issue: {}",
                self.auth.hint()
            )));
        }
        body.read_json()
            .map_err(|e| GatewayError::Decode(format!("{item}: {e}")))
    }

    /// Follow `_links.next` until the listing is exhausted.
    fn get_all<T: DeserializeOwned>(&self, first: String, item: &str) -> Result<Vec<T>, GatewayError> {
        let mut results = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            let page: Paged<T> = self.get_json(&url, item)?;
            results.extend(page.results);
            next = page.links.next.map(|link| self.absolute(&link));
        }
        Ok(results)
    }

    /// Download a binary body, capped at [`MAX_ATTACHMENT_BYTES`].
    fn get_bytes(&self, url: &str, item: &str) -> Result<Vec<u8>, GatewayError> {
        let response = self.get(url, "*/*")?;
        let status = response.status().as_u16();
        let mut body = response.into_body();
        check_status(status, &mut body, item)?;
        body.with_config()
            .limit(MAX_ATTACHMENT_BYTES)
            .read_to_vec()
            .map_err(|e| GatewayError::Unreachable(format!("{url}: {e}")))
    }

    fn content(&self, id: &str, expand: &str) -> Result<Content, GatewayError> {
        let url = format!("{}/content/{}?expand={}", self.api_url(), segment(id), expand);
        self.get_json(&url, id)
    }
}

fn check_status(status: u16, body: &mut ureq::Body, item: &str) -> Result<(), GatewayError> {
    if status == 404 {
        return Err(GatewayError::NotFound(item.to_string()));
    }
    if status >= 400 {
        let body = body
            .read_to_string()
            .unwrap_or_else(|_| "(unable to read error body)".to_string());
        return Err(GatewayError::Http { status, body });
    }
    Ok(())
}

/// Absolute URL of a body reference, if it points at this site.
///
/// Credentials are only ever sent to `origin`, so references to other hosts
/// yield `None`.
fn resource_url(origin: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.starts_with('/') && !reference.starts_with("//") {
        return Some(format!("{origin}{reference}"));
    }
    reference
        .strip_prefix(origin)
        .filter(|rest| rest.starts_with('/'))
        .map(|_| reference.to_string())
}

fn segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT_ESCAPE).to_string()
}

fn cql_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl Gateway for ConfluenceClient {
    fn list_children(&self, id: &str) -> Result<Vec<ChildSummary>, GatewayError> {
        debug!("Listing children of page {id}");
        let url = format!(
            "{}/content/{}/child/page?limit={PAGE_LIMIT}&expand=children.page",
            self.api_url(),
            segment(id)
        );
        let children: Vec<Content> = self.get_all(url, id)?;
        Ok(children.into_iter().map(child_summary).collect())
    }

    fn get_metadata(&self, id: &str) -> Result<PageMetadata, GatewayError> {
        self.content(id, "version,metadata.labels,history")
            .map(page_metadata)
    }

    fn get_rendered_body(&self, id: &str) -> Result<String, GatewayError> {
        info!("Getting page {id}");
        self.content(id, "body.export_view").map(rendered_body)
    }

    fn list_attachments(&self, id: &str) -> Result<Vec<AttachmentRef>, GatewayError> {
        let url = format!(
            "{}/content/{}/child/attachment?limit={PAGE_LIMIT}",
            self.api_url(),
            segment(id)
        );
        let attachments: Vec<AttachmentJson> = self.get_all(url, id)?;
        Ok(attachments.into_iter().map(attachment_ref).collect())
    }

    fn get_attachment_bytes(
        &self,
        page_id: &str,
        attachment: &AttachmentRef,
    ) -> Result<Vec<u8>, GatewayError> {
        let url = format!(
            "{}/download/attachments/{}/{}",
            self.site_url,
            segment(page_id),
            segment(&attachment.filename)
        );
        self.get_bytes(&url, &attachment.filename)
    }

    fn get_resource_bytes(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        let origin = url_origin(&self.site_url);
        let absolute = resource_url(origin, url)
            .ok_or_else(|| GatewayError::NotFound(format!("{url} is not served by {origin}")))?;
        self.get_bytes(&absolute, url)
    }
}

impl RootDirectory for ConfluenceClient {
    fn space_homepage(&self, space_key: &str) -> Result<String, GatewayError> {
        info!("Resolving homepage of space {space_key}");
        let url = format!("{}/space/{}?expand=homepage", self.api_url(), segment(space_key));
        let space: SpaceJson = self.get_json(&url, space_key)?;
        space
            .homepage
            .map(|h| h.id)
            .ok_or_else(|| GatewayError::NotFound(format!("homepage of space {space_key}")))
    }

    fn pages_with_label(&self, label: &str) -> Result<Vec<String>, GatewayError> {
        info!("Searching pages labelled {label}");
        let cql = format!("label={} and type=page", cql_string(label));
        let url = format!(
            "{}/content/search?cql={}&limit={PAGE_LIMIT}",
            self.api_url(),
            segment(&cql)
        );
        let pages: Vec<Content> = self.get_all(url, label)?;
        Ok(pages.into_iter().map(|p| p.id).collect())
    }

    fn list_spaces(&self) -> Result<Vec<SpaceSummary>, GatewayError> {
        let url = format!("{}/space?limit={PAGE_LIMIT}", self.api_url());
        let spaces: Vec<SpaceJson> = self.get_all(url, "space list")?;
        Ok(spaces
            .into_iter()
            .map(|s| SpaceSummary {
                name: s.name.unwrap_or_else(|| s.key.clone()),
                key: s.key,
            })
            .collect())
    }
}

// =============================================================================
// Wire types. Only the fields that are read; serde ignores the rest.
// =============================================================================

#[derive(Debug, Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(rename = "_links", default)]
    links: PagedLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PagedLinks {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    id: String,
    #[serde(default)]
    title: String,
    body: Option<ContentBody>,
    version: Option<VersionJson>,
    history: Option<HistoryJson>,
    metadata: Option<MetadataJson>,
    children: Option<ChildrenJson>,
}

#[derive(Debug, Deserialize)]
struct ContentBody {
    export_view: Option<Representation>,
    view: Option<Representation>,
}

#[derive(Debug, Deserialize)]
struct Representation {
    value: String,
}

#[derive(Debug, Deserialize)]
struct VersionJson {
    when: Option<String>,
    by: Option<UserJson>,
}

#[derive(Debug, Deserialize)]
struct HistoryJson {
    #[serde(rename = "createdBy")]
    created_by: Option<UserJson>,
}

#[derive(Debug, Deserialize)]
struct UserJson {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataJson {
    labels: Option<Paged<LabelJson>>,
}

#[derive(Debug, Deserialize)]
struct LabelJson {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChildrenJson {
    page: Option<ChildPagesJson>,
}

#[derive(Debug, Deserialize)]
struct ChildPagesJson {
    #[serde(default)]
    results: Vec<serde::de::IgnoredAny>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AttachmentJson {
    id: String,
    title: String,
    extensions: Option<AttachmentExtensions>,
}

#[derive(Debug, Deserialize)]
struct AttachmentExtensions {
    #[serde(rename = "fileSize")]
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SpaceJson {
    key: String,
    name: Option<String>,
    homepage: Option<HomepageJson>,
}

#[derive(Debug, Deserialize)]
struct HomepageJson {
    id: String,
}

fn child_summary(content: Content) -> ChildSummary {
    // Without the expansion we cannot tell, so let the scanner look.
    let has_children = content
        .children
        .and_then(|c| c.page)
        .map(|p| p.size.unwrap_or(0) > 0 || !p.results.is_empty())
        .unwrap_or(true);
    ChildSummary {
        id: content.id,
        title: content.title,
        has_children,
    }
}

fn page_metadata(content: Content) -> PageMetadata {
    let modified_at = content
        .version
        .as_ref()
        .and_then(|v| v.when.as_deref())
        .and_then(|when| DateTime::parse_from_rfc3339(when).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let created_by = content
        .history
        .and_then(|h| h.created_by)
        .and_then(|u| u.display_name);
    let author = created_by.or_else(|| {
        content
            .version
            .and_then(|v| v.by)
            .and_then(|u| u.display_name)
    });
    let labels = content
        .metadata
        .and_then(|m| m.labels)
        .map(|l| l.results.into_iter().map(|l| l.name).collect())
        .unwrap_or_default();
    PageMetadata {
        id: content.id,
        title: content.title,
        author,
        modified_at,
        labels,
    }
}

fn rendered_body(content: Content) -> String {
    content
        .body
        .and_then(|b| b.export_view.or(b.view))
        .map(|r| r.value)
        .unwrap_or_default()
}

fn attachment_ref(attachment: AttachmentJson) -> AttachmentRef {
    AttachmentRef {
        id: attachment.id,
        filename: attachment.title,
        size: attachment.extensions.and_then(|e| e.file_size),
    }
}
