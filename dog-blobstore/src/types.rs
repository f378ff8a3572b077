use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BlobStoreResult;

/// Identifier of a multipart upload, as assigned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    /// Generate a new random upload ID
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UploadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Metadata reported alongside each listed object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub checksum: Option<String>,
    pub size: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl BlobMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checksum<S: Into<String>>(mut self, checksum: S) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }
}

/// One object in a listing: its key and whatever metadata the provider returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    pub key: String,
    pub metadata: BlobMetadata,
}

impl BlobEntry {
    pub fn new<S: Into<String>>(key: S, metadata: BlobMetadata) -> Self {
        Self {
            key: key.into(),
            metadata,
        }
    }
}

/// One fetched batch from a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` once the listing is exhausted
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_token: Option<String>) -> Self {
        Self { items, next_token }
    }

    /// A final page with no continuation
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_token.is_none()
    }
}

/// Position in a listing from which a fresh iterator can resume.
///
/// `token` addresses the provider page holding the last consumed item and
/// `start_after_key` is that item's key inside the page. A checkpoint with
/// both fields `None` starts from the listing head.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationCheckpoint {
    pub token: Option<String>,
    pub start_after_key: Option<String>,
}

impl IterationCheckpoint {
    /// Checkpoint pointing at the head of the listing
    pub fn start() -> Self {
        Self::default()
    }

    pub fn new(token: Option<String>, start_after_key: Option<String>) -> Self {
        Self {
            token,
            start_after_key,
        }
    }

    pub fn with_token<S: Into<String>>(mut self, token: S) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_start_after_key<S: Into<String>>(mut self, key: S) -> Self {
        self.start_after_key = Some(key.into());
        self
    }

    pub fn is_start(&self) -> bool {
        self.token.is_none() && self.start_after_key.is_none()
    }

    /// Serialize for hand-off to another process
    pub fn to_json(&self) -> BlobStoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> BlobStoreResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A part the provider reports as stored for a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_number: u32,
    pub size: u64,
    pub etag: Option<String>,
}

impl PartRecord {
    pub fn new(part_number: u32, size: u64) -> Self {
        Self {
            part_number,
            size,
            etag: None,
        }
    }

    pub fn with_etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// One page of a multipart part listing, ascending by part number
pub type PartPage = Page<PartRecord>;
