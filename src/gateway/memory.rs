//! In-memory [`Gateway`] for tests.

use super::{ChildSummary, Gateway, GatewayError, PageMetadata, RootDirectory, SpaceSummary};
use crate::types::AttachmentRef;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct MemoryPage {
    metadata: PageMetadata,
    body: String,
    children: Vec<String>,
    attachments: Vec<(AttachmentRef, Vec<u8>)>,
}

/// A complete document space held in memory.
///
/// Build it with [`MemoryGateway::page`] / [`MemoryGateway::child`] and friends.
/// Failures can be injected per id to exercise error paths. The gateway also
/// counts calls so tests can assert that pruned subtrees were never fetched.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    pages: HashMap<String, MemoryPage>,
    spaces: Vec<(SpaceSummary, String)>,
    resources: HashMap<String, Vec<u8>>,
    failing_bodies: HashSet<String>,
    failing_attachments: HashSet<String>,
    unreachable: bool,
    calls: std::sync::Mutex<Vec<String>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a page with a title and body.
    pub fn page(mut self, id: &str, title: &str, body: &str) -> Self {
        let entry = self.pages.entry(id.to_string()).or_default();
        entry.metadata.id = id.to_string();
        entry.metadata.title = title.to_string();
        entry.body = body.to_string();
        self
    }

    /// Add a page and append it to `parent`'s children.
    pub fn child(self, parent: &str, id: &str, title: &str, body: &str) -> Self {
        let mut gw = self.page(id, title, body);
        gw.pages
            .entry(parent.to_string())
            .or_default()
            .children
            .push(id.to_string());
        gw
    }

    /// Link an existing page under `parent` (used to build malformed hierarchies).
    pub fn link(mut self, parent: &str, child: &str) -> Self {
        self.pages
            .entry(parent.to_string())
            .or_default()
            .children
            .push(child.to_string());
        self
    }

    pub fn label(mut self, id: &str, label: &str) -> Self {
        self.pages
            .entry(id.to_string())
            .or_default()
            .metadata
            .labels
            .insert(label.to_string());
        self
    }

    pub fn author(mut self, id: &str, author: &str, modified_at: DateTime<Utc>) -> Self {
        let meta = &mut self.pages.entry(id.to_string()).or_default().metadata;
        meta.author = Some(author.to_string());
        meta.modified_at = Some(modified_at);
        self
    }

    pub fn attachment(mut self, page_id: &str, att_id: &str, filename: &str, bytes: &[u8]) -> Self {
        let attachment = AttachmentRef {
            id: att_id.to_string(),
            filename: filename.to_string(),
            size: Some(bytes.len() as u64),
        };
        self.pages
            .entry(page_id.to_string())
            .or_default()
            .attachments
            .push((attachment, bytes.to_vec()));
        self
    }

    pub fn space(mut self, key: &str, name: &str, homepage: &str) -> Self {
        self.spaces.push((
            SpaceSummary {
                key: key.to_string(),
                name: name.to_string(),
            },
            homepage.to_string(),
        ));
        self
    }

    /// Serve `bytes` for a resource URL as it appears in a body.
    pub fn resource(mut self, url: &str, bytes: &[u8]) -> Self {
        self.resources.insert(url.to_string(), bytes.to_vec());
        self
    }

    /// Make `get_rendered_body` fail for `id`.
    pub fn fail_body(mut self, id: &str) -> Self {
        self.failing_bodies.insert(id.to_string());
        self
    }

    /// Make downloading attachment `att_id` fail.
    pub fn fail_attachment(mut self, att_id: &str) -> Self {
        self.failing_attachments.insert(att_id.to_string());
        self
    }

    /// Make every call fail as if the network were down.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Recorded calls as `"<operation>:<id>"`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Whether any call touched `id`.
    pub fn was_touched(&self, id: &str) -> bool {
        let suffix = format!(":{id}");
        self.calls().iter().any(|c| c.ends_with(&suffix))
    }

    fn record(&self, op: &str, id: &str) -> Result<(), GatewayError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{op}:{id}"));
        }
        if self.unreachable {
            return Err(GatewayError::Unreachable("memory gateway offline".into()));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<&MemoryPage, GatewayError> {
        self.pages
            .get(id)
            .filter(|p| !p.metadata.id.is_empty())
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }
}

impl Gateway for MemoryGateway {
    fn list_children(&self, id: &str) -> Result<Vec<ChildSummary>, GatewayError> {
        self.record("children", id)?;
        let page = self.get(id)?;
        Ok(page
            .children
            .iter()
            .map(|cid| match self.pages.get(cid) {
                Some(child) => ChildSummary {
                    id: cid.clone(),
                    title: child.metadata.title.clone(),
                    has_children: !child.children.is_empty(),
                },
                // Dangling link: listed, but its metadata lookup will fail.
                None => ChildSummary {
                    id: cid.clone(),
                    title: String::new(),
                    has_children: false,
                },
            })
            .collect())
    }

    fn get_metadata(&self, id: &str) -> Result<PageMetadata, GatewayError> {
        self.record("metadata", id)?;
        Ok(self.get(id)?.metadata.clone())
    }

    fn get_rendered_body(&self, id: &str) -> Result<String, GatewayError> {
        self.record("body", id)?;
        if self.failing_bodies.contains(id) {
            return Err(GatewayError::Http {
                status: 500,
                body: format!("injected failure for {id}"),
            });
        }
        Ok(self.get(id)?.body.clone())
    }

    fn list_attachments(&self, id: &str) -> Result<Vec<AttachmentRef>, GatewayError> {
        self.record("attachments", id)?;
        Ok(self
            .get(id)?
            .attachments
            .iter()
            .map(|(a, _)| a.clone())
            .collect())
    }

    fn get_attachment_bytes(
        &self,
        page_id: &str,
        attachment: &AttachmentRef,
    ) -> Result<Vec<u8>, GatewayError> {
        self.record("download", &attachment.id)?;
        if self.failing_attachments.contains(&attachment.id) {
            return Err(GatewayError::Http {
                status: 404,
                body: format!("injected failure for {}", attachment.id),
            });
        }
        self.get(page_id)?
            .attachments
            .iter()
            .find(|(a, _)| a.id == attachment.id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| GatewayError::NotFound(attachment.id.clone()))
    }

    fn get_resource_bytes(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        self.record("resource", url)?;
        self.resources
            .get(url)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(url.to_string()))
    }
}

impl RootDirectory for MemoryGateway {
    fn space_homepage(&self, space_key: &str) -> Result<String, GatewayError> {
        self.spaces
            .iter()
            .find(|(s, _)| s.key == space_key)
            .map(|(_, home)| home.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("space {space_key}")))
    }

    fn pages_with_label(&self, label: &str) -> Result<Vec<String>, GatewayError> {
        let mut ids: Vec<&String> = self
            .pages
            .iter()
            .filter(|(_, p)| p.metadata.labels.contains(label))
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        Ok(ids.into_iter().cloned().collect())
    }

    fn list_spaces(&self) -> Result<Vec<SpaceSummary>, GatewayError> {
        Ok(self.spaces.iter().map(|(s, _)| s.clone()).collect())
    }
}
