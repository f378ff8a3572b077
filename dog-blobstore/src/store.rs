use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::TryStreamExt;

use crate::{
    find_missing_parts, BlobEntry, BlobStoreResult, ListOptions, MissingPartQuery, PageFetcher,
    PagedIter, PartLister, UploadId,
};

/// A cloud object store seen through its listing capabilities.
///
/// Implementors only hand out per-bucket fetchers; listing, checkpointing and
/// the missing-part search are shared.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetcher for object listings in one bucket
    type Objects: PageFetcher<Item = BlobEntry> + 'static;

    /// Lister for the parts of multipart uploads targeting one key
    type Parts: PartLister;

    fn object_pages(&self, bucket: &str) -> Self::Objects;

    fn part_pages(&self, bucket: &str, key: &str) -> Self::Parts;

    /// Resumable listing of `(key, metadata)` entries
    fn list_v2(&self, bucket: &str, options: ListOptions) -> BlobStoreResult<PagedIter<Self::Objects>> {
        PagedIter::new(self.object_pages(bucket), options)
    }

    /// Keys under `prefix`, skipping any that contain `delimiter` past the prefix
    fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> BlobStoreResult<BoxStream<'static, BlobStoreResult<String>>> {
        let mut options = ListOptions::new();
        if let Some(prefix) = prefix {
            options = options.with_prefix(prefix);
        }
        if let Some(delimiter) = delimiter {
            options = options.with_delimiter(delimiter);
        }

        let listing = self.list_v2(bucket, options)?;
        Ok(Box::pin(listing.into_stream().map_ok(|entry| entry.key)))
    }

    /// Part numbers of `upload_id` that have not been received yet
    async fn find_next_missing_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        query: MissingPartQuery,
    ) -> BlobStoreResult<Vec<u32>> {
        let parts = self.part_pages(bucket, key);
        find_missing_parts(&parts, upload_id, &query).await
    }
}
