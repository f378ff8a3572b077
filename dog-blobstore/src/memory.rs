use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    BlobEntry, BlobMetadata, BlobStore, BlobStoreError, BlobStoreResult, ListFilters, Page,
    PageFetcher, PartLister, PartPage, PartRecord, UploadId,
};

/// Page size used when the caller gives no hint, matching S3
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Highest part number accepted by [`MemoryBlobStore::upload_part`], matching S3
pub const MAX_PART_NUMBER: u32 = 10_000;

struct StoredObject {
    data: Bytes,
    metadata: BlobMetadata,
}

struct MultipartState {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, PartRecord>,
}

#[derive(Default)]
struct MemoryState {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<UploadId, MultipartState>,
}

/// In-process object store with S3-like listing semantics
#[derive(Clone)]
pub struct MemoryBlobStore {
    state: Arc<RwLock<MemoryState>>,
    part_page_size: u32,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            part_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Number of parts returned per part-listing page
    pub fn with_part_page_size(mut self, page_size: u32) -> Self {
        self.part_page_size = page_size.max(1);
        self
    }

    pub async fn create_bucket<S: Into<String>>(&self, bucket: S) {
        let mut state = self.state.write().await;
        state.buckets.entry(bucket.into()).or_default();
    }

    /// Store an object, replacing any previous version
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
    ) -> BlobStoreResult<BlobMetadata> {
        let data = data.into();
        let now = Utc::now();
        let metadata = BlobMetadata::new()
            .with_checksum(Uuid::new_v4().simple().to_string())
            .with_size(data.len() as u64)
            .with_created(now)
            .with_last_modified(now);

        let mut state = self.state.write().await;
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| BlobStoreError::not_found(bucket))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> BlobStoreResult<Bytes> {
        let state = self.state.read().await;
        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
            .ok_or_else(|| BlobStoreError::not_found(key))
    }

    /// Returns `false` if nothing was deleted
    pub async fn delete(&self, bucket: &str, key: &str) -> BlobStoreResult<bool> {
        let mut state = self.state.write().await;
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| BlobStoreError::not_found(bucket))?;
        Ok(objects.remove(key).is_some())
    }

    pub async fn create_multipart_upload(&self, bucket: &str, key: &str) -> BlobStoreResult<UploadId> {
        let mut state = self.state.write().await;
        if !state.buckets.contains_key(bucket) {
            return Err(BlobStoreError::not_found(bucket));
        }

        let upload_id = UploadId::new();
        state.uploads.insert(
            upload_id.clone(),
            MultipartState {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    /// Record a part; uploading the same part number again replaces it
    pub async fn upload_part(
        &self,
        upload_id: &UploadId,
        part_number: u32,
        data: impl Into<Bytes>,
    ) -> BlobStoreResult<PartRecord> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(BlobStoreError::invalid(format!(
                "Invalid part number: {} (must be 1-{})",
                part_number, MAX_PART_NUMBER
            )));
        }

        let data = data.into();
        let record = PartRecord::new(part_number, data.len() as u64)
            .with_etag(Uuid::new_v4().simple().to_string());

        let mut state = self.state.write().await;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| BlobStoreError::not_found(upload_id.as_str()))?;
        upload.parts.insert(part_number, record.clone());
        Ok(record)
    }

    pub async fn abort_multipart_upload(&self, upload_id: &UploadId) -> BlobStoreResult<()> {
        let mut state = self.state.write().await;
        state
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| BlobStoreError::not_found(upload_id.as_str()))
    }

    pub fn object_pages(&self, bucket: &str) -> MemoryObjectPages {
        MemoryObjectPages {
            state: self.state.clone(),
            bucket: bucket.to_string(),
        }
    }

    pub fn part_pages(&self, bucket: &str, key: &str) -> MemoryPartPages {
        MemoryPartPages {
            state: self.state.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            page_size: self.part_page_size,
        }
    }
}

impl BlobStore for MemoryBlobStore {
    type Objects = MemoryObjectPages;
    type Parts = MemoryPartPages;

    fn object_pages(&self, bucket: &str) -> Self::Objects {
        MemoryBlobStore::object_pages(self, bucket)
    }

    fn part_pages(&self, bucket: &str, key: &str) -> Self::Parts {
        MemoryBlobStore::part_pages(self, bucket, key)
    }
}

/// Object listing over one in-memory bucket.
///
/// The cursor is the last key of the previous page, so it stays valid when
/// objects are added or removed elsewhere in the bucket.
pub struct MemoryObjectPages {
    state: Arc<RwLock<MemoryState>>,
    bucket: String,
}

#[async_trait]
impl PageFetcher for MemoryObjectPages {
    type Page = Page<BlobEntry>;
    type Item = BlobEntry;

    async fn fetch_page(
        &self,
        filters: &ListFilters,
        cursor: Option<&str>,
    ) -> BlobStoreResult<Self::Page> {
        let state = self.state.read().await;
        let objects = state
            .buckets
            .get(&self.bucket)
            .ok_or_else(|| BlobStoreError::not_found(self.bucket.as_str()))?;

        let prefix = filters.prefix.as_deref().unwrap_or("");
        let page_size = filters.page_size.unwrap_or(DEFAULT_PAGE_SIZE) as usize;
        let lower = match cursor {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut matching = objects
            .range::<String, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| match filters.delimiter.as_deref() {
                Some(delimiter) => !key[prefix.len()..].contains(delimiter),
                None => true,
            });

        let mut items = Vec::with_capacity(page_size.min(1024));
        for (key, object) in matching.by_ref().take(page_size) {
            items.push(BlobEntry::new(key.clone(), object.metadata.clone()));
        }

        let next_token = match (matching.next(), items.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };
        Ok(Page::new(items, next_token))
    }

    fn extract_cursor(&self, page: &Self::Page) -> Option<String> {
        page.next_token.clone()
    }

    fn extract_items(&self, page: Self::Page) -> Vec<Self::Item> {
        page.items
    }

    fn item_key<'a>(&self, item: &'a Self::Item) -> &'a str {
        &item.key
    }
}

/// Part listing for multipart uploads of one in-memory object.
///
/// Seeks directly to `start_offset`; the cursor is the last part number of
/// the previous page.
pub struct MemoryPartPages {
    state: Arc<RwLock<MemoryState>>,
    bucket: String,
    key: String,
    page_size: u32,
}

#[async_trait]
impl PartLister for MemoryPartPages {
    async fn fetch_parts_page(
        &self,
        upload_id: &UploadId,
        start_offset: u32,
        cursor: Option<&str>,
    ) -> BlobStoreResult<PartPage> {
        let after = match cursor {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| BlobStoreError::invalid(format!("malformed part cursor {:?}", raw)))?,
            None => start_offset.saturating_sub(1),
        };

        let state = self.state.read().await;
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|upload| upload.bucket == self.bucket && upload.key == self.key)
            .ok_or_else(|| BlobStoreError::not_found(upload_id.as_str()))?;

        let mut remaining = upload
            .parts
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(_, record)| record);

        let items: Vec<PartRecord> = remaining
            .by_ref()
            .take(self.page_size as usize)
            .cloned()
            .collect();

        let next_token = match (remaining.next(), items.last()) {
            (Some(_), Some(last)) => Some(last.part_number.to_string()),
            _ => None,
        };
        Ok(PartPage::new(items, next_token))
    }
}
