use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::with_deadline;
use crate::{BlobStoreResult, MissingPartQuery, PartPage, UploadId};

/// Provider capability listing the parts stored for a multipart upload
#[async_trait]
pub trait PartLister: Send + Sync {
    /// One provider round trip.
    ///
    /// `start_offset` is the lowest part number the caller cares about.
    /// Providers that can seek should skip everything below it; others may
    /// ignore it and return earlier parts. `cursor` is the continuation from
    /// the previous page, `None` on the first call. Parts within a page must
    /// be in ascending order, and successive pages must continue that order.
    async fn fetch_parts_page(
        &self,
        upload_id: &UploadId,
        start_offset: u32,
        cursor: Option<&str>,
    ) -> BlobStoreResult<PartPage>;
}

#[async_trait]
impl<L: PartLister + ?Sized> PartLister for Arc<L> {
    async fn fetch_parts_page(
        &self,
        upload_id: &UploadId,
        start_offset: u32,
        cursor: Option<&str>,
    ) -> BlobStoreResult<PartPage> {
        (**self).fetch_parts_page(upload_id, start_offset, cursor).await
    }
}

/// First `return_count` part numbers in `search_start..=part_count` that the
/// provider does not report as uploaded, ascending.
///
/// Walks the expected range and the uploaded listing side by side, fetching
/// another page only when the one in hand is used up, so a query near the
/// start of a 10,000 part upload costs a single round trip.
pub async fn find_missing_parts<L>(
    lister: &L,
    upload_id: &UploadId,
    query: &MissingPartQuery,
) -> BlobStoreResult<Vec<u32>>
where
    L: PartLister + ?Sized,
{
    MissingPartFinder::new(lister)
        .find_missing_parts(upload_id, query)
        .await
}

/// Missing-part search bound to a lister, with an optional per-page deadline
pub struct MissingPartFinder<'a, L: PartLister + ?Sized> {
    lister: &'a L,
    fetch_timeout: Option<Duration>,
}

impl<'a, L: PartLister + ?Sized> MissingPartFinder<'a, L> {
    pub fn new(lister: &'a L) -> Self {
        Self {
            lister,
            fetch_timeout: None,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    #[instrument(skip(self))]
    pub async fn find_missing_parts(
        &self,
        upload_id: &UploadId,
        query: &MissingPartQuery,
    ) -> BlobStoreResult<Vec<u32>> {
        query.validate()?;

        // Widened so stepping past `u32::MAX` cannot wrap.
        let part_count = u64::from(query.part_count);
        let wanted = query.return_count as usize;

        let mut missing: Vec<u32> = Vec::with_capacity(wanted.min(1024));
        // Next expected part number not yet resolved as present or missing.
        // Always <= part_count when pushed.
        let mut expected = u64::from(query.search_start);
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        'pages: loop {
            let page = with_deadline(
                self.fetch_timeout,
                "list parts",
                self.lister
                    .fetch_parts_page(upload_id, query.search_start, cursor.as_deref()),
            )
            .await?;
            pages += 1;

            for part in &page.items {
                let part_number = u64::from(part.part_number);
                if part_number < expected {
                    // duplicate, or below the offset on providers that cannot seek
                    continue;
                }

                while expected < part_number {
                    missing.push(expected as u32);
                    if missing.len() == wanted {
                        break 'pages;
                    }
                    expected += 1;
                    if expected > part_count {
                        break 'pages;
                    }
                }

                // present
                expected += 1;
                if expected > part_count {
                    break 'pages;
                }
            }

            match page.next_token {
                Some(next) => cursor = Some(next),
                None => {
                    // Listing exhausted: everything left in range is missing.
                    while expected <= part_count && missing.len() < wanted {
                        missing.push(expected as u32);
                        expected += 1;
                    }
                    break;
                }
            }
        }

        debug!(pages, found = missing.len(), "missing part search finished");
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlobStoreError, PartRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fixed set of part numbers, ignoring the start offset.
    struct FixedParts {
        numbers: Vec<u32>,
        page_size: usize,
        fetches: AtomicUsize,
    }

    impl FixedParts {
        fn new(numbers: Vec<u32>, page_size: usize) -> Self {
            Self {
                numbers,
                page_size,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PartLister for FixedParts {
        async fn fetch_parts_page(
            &self,
            _upload_id: &UploadId,
            _start_offset: u32,
            cursor: Option<&str>,
        ) -> BlobStoreResult<PartPage> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let start: usize = match cursor {
                Some(raw) => raw.parse().map_err(|_| BlobStoreError::invalid("bad cursor"))?,
                None => 0,
            };
            let end = (start + self.page_size).min(self.numbers.len());
            let items = self.numbers[start..end]
                .iter()
                .map(|n| PartRecord::new(*n, 5))
                .collect();
            let next = (end < self.numbers.len()).then(|| end.to_string());
            Ok(PartPage::new(items, next))
        }
    }

    fn upload() -> UploadId {
        UploadId::from("upl_test")
    }

    #[tokio::test]
    async fn test_single_gap() {
        let lister = FixedParts::new(vec![1], 1000);
        for search_start in [1, 2] {
            for return_count in [1, 2, 10] {
                let query = MissingPartQuery::new(2)
                    .with_search_start(search_start)
                    .with_return_count(return_count);
                let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
                assert_eq!(found, vec![2]);
            }
        }
    }

    #[tokio::test]
    async fn test_rejects_before_any_fetch() {
        let lister = FixedParts::new(vec![1], 1000);
        let query = MissingPartQuery::new(2)
            .with_search_start(3)
            .with_return_count(2);

        let err = find_missing_parts(&lister, &upload(), &query).await.unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(lister.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_present_is_empty() {
        let lister = FixedParts::new((1..=50).collect(), 7);
        let query = MissingPartQuery::new(50).with_return_count(50);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_empty_listing_truncated_by_return_count() {
        let lister = FixedParts::new(vec![], 1000);
        let query = MissingPartQuery::new(100)
            .with_search_start(10)
            .with_return_count(5);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert_eq!(found, vec![10, 11, 12, 13, 14]);
    }

    #[tokio::test]
    async fn test_duplicates_do_not_double_advance() {
        let lister = FixedParts::new(vec![1, 2, 2, 2, 4, 4, 6], 2);
        let query = MissingPartQuery::new(7).with_return_count(10);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert_eq!(found, vec![3, 5, 7]);
    }

    #[tokio::test]
    async fn test_parts_below_offset_are_skipped() {
        let lister = FixedParts::new(vec![1, 2, 3, 5, 8], 2);
        let query = MissingPartQuery::new(9)
            .with_search_start(4)
            .with_return_count(10);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert_eq!(found, vec![4, 6, 7, 9]);
    }

    #[tokio::test]
    async fn test_stops_fetching_once_enough_found() {
        let lister = FixedParts::new((1..=10_000).filter(|n| n % 2 == 1).collect(), 1000);
        let query = MissingPartQuery::new(10_000).with_return_count(3);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert_eq!(found, vec![2, 4, 6]);
        assert_eq!(lister.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uploaded_parts_past_part_count_ignored() {
        let lister = FixedParts::new(vec![2, 12, 13], 1000);
        let query = MissingPartQuery::new(4).with_return_count(10);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert_eq!(found, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_last_representable_part_number() {
        let lister = FixedParts::new(vec![], 1000);
        let query = MissingPartQuery::new(u32::MAX)
            .with_search_start(u32::MAX - 1)
            .with_return_count(5);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert_eq!(found, vec![u32::MAX - 1, u32::MAX]);

        let lister = FixedParts::new(vec![u32::MAX], 1000);
        let query = MissingPartQuery::new(u32::MAX)
            .with_search_start(u32::MAX)
            .with_return_count(5);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert!(found.is_empty());

        let lister = FixedParts::new(vec![u32::MAX], 1000);
        let query = MissingPartQuery::new(u32::MAX)
            .with_search_start(u32::MAX - 2)
            .with_return_count(5);
        let found = find_missing_parts(&lister, &upload(), &query).await.unwrap();
        assert_eq!(found, vec![u32::MAX - 2, u32::MAX - 1]);
    }

    struct SlowParts;

    #[async_trait]
    impl PartLister for SlowParts {
        async fn fetch_parts_page(
            &self,
            _upload_id: &UploadId,
            _start_offset: u32,
            _cursor: Option<&str>,
        ) -> BlobStoreResult<PartPage> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(PartPage::last(vec![]))
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout_surfaces_as_timeout() {
        let lister = SlowParts;
        let finder = MissingPartFinder::new(&lister).with_fetch_timeout(Duration::from_millis(10));
        let err = finder
            .find_missing_parts(&upload(), &MissingPartQuery::new(3))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
