//! The remote content capability consumed by the scanner and the downloader.
//!
//! The [`Gateway`] trait covers the read operations the core needs. It is
//! typed: authentication, URL templates and pagination belong to the adapter
//! that implements it ([`ConfluenceClient`](crate::confluence::ConfluenceClient)
//! in production, `MemoryGateway` in tests), never to the core.
//!
//! `MemoryGateway` is compiled for this crate's unit tests and, with the
//! `test-support` feature, for integration tests and downstream crates.
//!
//! [`RootDirectory`] is a separate, smaller capability used only to resolve the
//! starting points of an export (space homepage, label search, space list).

use crate::types::AttachmentRef;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

#[cfg(any(test, feature = "test-support"))]
mod memory;
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryGateway;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("gateway unreachable: {0}")]
    Unreachable(String),
    #[error("HTTP error: {status} - {body}")]
    Http { status: u16, body: String },
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// One entry of a child listing, in the source's manual order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSummary {
    pub id: String,
    pub title: String,
    pub has_children: bool,
}

/// Display metadata and labels of a single item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageMetadata {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub labels: BTreeSet<String>,
}

/// A space as reported by [`RootDirectory::list_spaces`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceSummary {
    pub key: String,
    pub name: String,
}

/// Read access to the remote document space.
///
/// Implementations must be `Sync`: the download pipeline calls them from every
/// worker thread at once.
pub trait Gateway: Sync {
    /// Children of `id` in manual order.
    fn list_children(&self, id: &str) -> Result<Vec<ChildSummary>, GatewayError>;

    fn get_metadata(&self, id: &str) -> Result<PageMetadata, GatewayError>;

    /// Rendered (view) HTML of the page body. Empty for pure containers.
    fn get_rendered_body(&self, id: &str) -> Result<String, GatewayError>;

    fn list_attachments(&self, id: &str) -> Result<Vec<AttachmentRef>, GatewayError>;

    fn get_attachment_bytes(
        &self,
        page_id: &str,
        attachment: &AttachmentRef,
    ) -> Result<Vec<u8>, GatewayError>;

    /// Bytes of a site resource referenced from a body (icons, emoticons),
    /// addressed by the URL exactly as the body has it.
    fn get_resource_bytes(&self, url: &str) -> Result<Vec<u8>, GatewayError>;
}

/// Resolution of export starting points.
pub trait RootDirectory {
    fn space_homepage(&self, space_key: &str) -> Result<String, GatewayError>;

    /// Ids of every item carrying `label`, in the source's search order.
    fn pages_with_label(&self, label: &str) -> Result<Vec<String>, GatewayError>;

    fn list_spaces(&self) -> Result<Vec<SpaceSummary>, GatewayError>;
}
