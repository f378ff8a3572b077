//! Resumable, lazy iteration over paginated provider listings.
//!
//! A provider only has to implement [`PageFetcher`]: fetch one raw page for a
//! cursor, and pull the items and the next cursor out of it. [`PagedIter`]
//! turns that into a single forward-only sequence that can be checkpointed
//! after any item and resumed later, possibly by another process.
//!
//! ```rust,no_run
//! use dog_blobstore::{ListOptions, MemoryBlobStore, PagedIter};
//!
//! # #[tokio::main]
//! # async fn main() -> dog_blobstore::BlobStoreResult<()> {
//! let store = MemoryBlobStore::new();
//! store.create_bucket("media").await;
//!
//! let options = ListOptions::new().with_prefix("videos/").with_page_size(100);
//! let mut listing = PagedIter::new(store.object_pages("media"), options.clone())?;
//! let first = listing.next().await?;
//! let checkpoint = listing.checkpoint();
//!
//! // later, somewhere else
//! let mut resumed = PagedIter::new(store.object_pages("media"), options.resume_from(checkpoint))?;
//! while let Some(entry) = resumed.next().await? {
//!     println!("{}", entry.key);
//! }
//! # let _ = first;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use tracing::debug;

use crate::error::with_deadline;
use crate::{BlobStoreError, BlobStoreResult, IterationCheckpoint, ListFilters, ListOptions};

/// Provider capability consumed by [`PagedIter`]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Raw provider response for one page
    type Page: Send;

    /// Item yielded to callers
    type Item: Send;

    /// One provider round trip. `cursor` is `None` for the listing head.
    async fn fetch_page(
        &self,
        filters: &ListFilters,
        cursor: Option<&str>,
    ) -> BlobStoreResult<Self::Page>;

    /// Continuation cursor, `None` when the listing is exhausted
    fn extract_cursor(&self, page: &Self::Page) -> Option<String>;

    /// Items of the page in provider order
    fn extract_items(&self, page: Self::Page) -> Vec<Self::Item>;

    /// Key used to locate the item again when resuming
    fn item_key<'a>(&self, item: &'a Self::Item) -> &'a str;
}

#[async_trait]
impl<F: PageFetcher + ?Sized> PageFetcher for Arc<F> {
    type Page = F::Page;
    type Item = F::Item;

    async fn fetch_page(
        &self,
        filters: &ListFilters,
        cursor: Option<&str>,
    ) -> BlobStoreResult<Self::Page> {
        (**self).fetch_page(filters, cursor).await
    }

    fn extract_cursor(&self, page: &Self::Page) -> Option<String> {
        (**self).extract_cursor(page)
    }

    fn extract_items(&self, page: Self::Page) -> Vec<Self::Item> {
        (**self).extract_items(page)
    }

    fn item_key<'a>(&self, item: &'a Self::Item) -> &'a str {
        (**self).item_key(item)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterState {
    /// Nothing fetched yet; the checkpoint still has to be located
    Pending,
    Buffered,
    Exhausted,
    /// A fetch or resume failed; the session is over
    Failed,
}

/// Lazy, restartable sequence over a paginated listing
pub struct PagedIter<F: PageFetcher> {
    fetcher: F,
    filters: ListFilters,
    fetch_timeout: Option<Duration>,

    // checkpoint
    token: Option<String>,
    start_after_key: Option<String>,

    buffer: VecDeque<F::Item>,
    next_token: Option<String>,
    state: IterState,
    pages_fetched: u64,
}

impl<F: PageFetcher> PagedIter<F> {
    /// Create an iterator. Nothing is fetched until the first call to [`next`](Self::next).
    pub fn new(fetcher: F, options: ListOptions) -> BlobStoreResult<Self> {
        options.validate()?;

        let ListOptions {
            filters,
            checkpoint,
            fetch_timeout,
        } = options;

        Ok(Self {
            fetcher,
            filters,
            fetch_timeout,
            token: checkpoint.token,
            start_after_key: checkpoint.start_after_key,
            buffer: VecDeque::new(),
            next_token: None,
            state: IterState::Pending,
            pages_fetched: 0,
        })
    }

    /// Next item, fetching another page when the buffered one is drained.
    ///
    /// Returns `Ok(None)` once the listing is exhausted. After an error the
    /// iterator is fused and keeps returning `Ok(None)`; the last checkpoint
    /// stays readable so the caller can start a fresh session from it.
    pub async fn next(&mut self) -> BlobStoreResult<Option<F::Item>> {
        match self.advance().await {
            Ok(item) => Ok(item),
            Err(err) => {
                self.state = IterState::Failed;
                Err(err)
            }
        }
    }

    async fn advance(&mut self) -> BlobStoreResult<Option<F::Item>> {
        loop {
            match self.state {
                IterState::Exhausted | IterState::Failed => return Ok(None),
                IterState::Pending => {
                    let cursor = self.token.clone();
                    self.load_page(cursor).await?;
                    if let Some(key) = self.start_after_key.clone() {
                        self.skip_past(&key)?;
                    }
                    self.state = IterState::Buffered;
                }
                IterState::Buffered => {
                    if let Some(item) = self.buffer.pop_front() {
                        self.start_after_key = Some(self.fetcher.item_key(&item).to_string());
                        return Ok(Some(item));
                    }

                    match self.next_token.take() {
                        Some(next) => {
                            // Everything on the current page is consumed.
                            self.token = Some(next.clone());
                            self.start_after_key = None;
                            self.load_page(Some(next)).await?;
                        }
                        None => {
                            debug!(pages = self.pages_fetched, "listing exhausted");
                            self.state = IterState::Exhausted;
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    async fn load_page(&mut self, cursor: Option<String>) -> BlobStoreResult<()> {
        debug!(cursor = ?cursor, prefix = ?self.filters.prefix, "fetching listing page");

        let page = with_deadline(
            self.fetch_timeout,
            "list page fetch",
            self.fetcher.fetch_page(&self.filters, cursor.as_deref()),
        )
        .await?;
        self.pages_fetched += 1;

        self.next_token = self.fetcher.extract_cursor(&page);
        self.buffer = VecDeque::from(self.fetcher.extract_items(page));
        Ok(())
    }

    /// Drop buffered items up to and including `key`.
    fn skip_past(&mut self, key: &str) -> BlobStoreResult<()> {
        let fetcher = &self.fetcher;
        let position = self
            .buffer
            .iter()
            .position(|item| fetcher.item_key(item) == key);

        match position {
            Some(ix) => {
                self.buffer.drain(..=ix);
                Ok(())
            }
            None => {
                debug!(start_after_key = key, token = ?self.token, "checkpoint key not found in page");
                Err(BlobStoreError::paging(key))
            }
        }
    }

    /// Cursor of the page holding the last consumed item
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Key of the last consumed item within the current page
    pub fn start_after_key(&self) -> Option<&str> {
        self.start_after_key.as_deref()
    }

    /// Snapshot of where a fresh iterator should resume
    pub fn checkpoint(&self) -> IterationCheckpoint {
        IterationCheckpoint::new(self.token.clone(), self.start_after_key.clone())
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, IterState::Exhausted | IterState::Failed)
    }

    /// Drain the rest of the listing into a `Vec`
    pub async fn collect_remaining(&mut self) -> BlobStoreResult<Vec<F::Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Adapt into a `Stream`. Checkpoints are not observable once converted.
    pub fn into_stream(mut self) -> impl Stream<Item = BlobStoreResult<F::Item>> + Send
    where
        F: 'static,
    {
        async_stream::try_stream! {
            while let Some(item) = self.next().await? {
                yield item;
            }
        }
    }
}
