//! # dog-blobstore: Provider-agnostic listings for cloud blob stores
//!
//! `dog-blobstore` masks the pagination wire format of each object store behind
//! one lazy, resumable interface, and answers the question every resumable
//! multipart uploader asks: *which parts are still missing?*
//!
//! ## Key Features
//!
//! - **Resumable listings**: checkpoint a listing after any item, hand the
//!   checkpoint to another process, continue with no gaps and no duplicates
//! - **Lazy paging**: one provider round trip per page, only when the buffered
//!   page is drained
//! - **Missing-part search**: merge the expected part range against the
//!   provider's part listing, fetching only the pages needed
//! - **Typed failures**: paging, timeout and not-found conditions are distinct
//!   error kinds so callers know what is safe to retry
//! - **Storage agnostic**: S3 and in-memory providers included; anything that
//!   can fetch a page can plug in
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_blobstore::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobStoreResult<()> {
//! let store = MemoryBlobStore::new();
//! store.create_bucket("media").await;
//! store.put_object("media", "videos/intro.mp4", vec![0u8; 16]).await?;
//!
//! // 1. List with checkpoints
//! let mut listing = store.list_v2("media", ListOptions::new().with_prefix("videos/"))?;
//! while let Some(entry) = listing.next().await? {
//!     println!("{} ({:?} bytes)", entry.key, entry.metadata.size);
//! }
//!
//! // 2. Find the parts a multipart upload still needs
//! let upload_id = store.create_multipart_upload("media", "videos/long.mp4").await?;
//! store.upload_part(&upload_id, 1, vec![0u8; 8]).await?;
//!
//! let query = MissingPartQuery::new(3).with_return_count(10);
//! let missing = store
//!     .find_next_missing_parts("media", "videos/long.mp4", &upload_id, query)
//!     .await?;
//! assert_eq!(missing, vec![2, 3]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │   BlobStore              │  ← list / list_v2 / find_next_missing_parts
//! ├────────────┬─────────────┤
//! │ PagedIter  │ find_missing│  ← provider-agnostic algorithms
//! ├────────────┴─────────────┤
//! │ PageFetcher / PartLister │  ← one round trip per call, per provider
//! └──────────────────────────┘
//! ```

mod config;
mod error;
mod memory;
pub mod paging;
mod parts;
mod s3_store;
pub mod store;
mod types;

// Re-export main types for clean API
pub use config::{ListFilters, ListOptions, MissingPartQuery};
pub use error::{BlobStoreError, BlobStoreResult};
pub use memory::{MemoryBlobStore, MemoryObjectPages, MemoryPartPages, DEFAULT_PAGE_SIZE, MAX_PART_NUMBER};
pub use paging::{PageFetcher, PagedIter};
pub use parts::{find_missing_parts, MissingPartFinder, PartLister};
pub use s3_store::{map_sdk_error, S3BlobStore, S3Config, S3ObjectPages, S3PartPages};
pub use store::BlobStore;
pub use types::{
    BlobEntry, BlobMetadata, IterationCheckpoint, Page, PartPage, PartRecord, UploadId,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobEntry, BlobStore, BlobStoreError, BlobStoreResult, IterationCheckpoint, ListOptions,
        MemoryBlobStore, MissingPartQuery, PagedIter, UploadId,
    };
}
