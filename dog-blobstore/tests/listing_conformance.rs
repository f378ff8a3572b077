use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

use dog_blobstore::{
    BlobEntry, BlobStore, BlobStoreError, BlobStoreResult, IterationCheckpoint, ListFilters,
    ListOptions, MemoryBlobStore, MemoryObjectPages, Page, PageFetcher, PagedIter,
};

const BUCKET: &str = "fixtures";

/// Test factory functions
async fn store_with_objects(count: usize) -> MemoryBlobStore {
    let store = MemoryBlobStore::new();
    store.create_bucket(BUCKET).await;
    for ix in 0..count {
        store
            .put_object(BUCKET, &format!("testList/prefix.{:03}", ix), format!("body-{}", ix))
            .await
            .unwrap();
    }
    store
}

fn keys(entries: &[BlobEntry]) -> Vec<String> {
    entries.iter().map(|entry| entry.key.clone()).collect()
}

fn prefix_options(page_size: u32) -> ListOptions {
    ListOptions::new()
        .with_prefix("testList/prefix")
        .with_page_size(page_size)
}

/// Break after `break_size` items, resume from the checkpoint, and check the
/// two sessions add up to the whole listing.
async fn split_listing(page_size: u32, break_size: usize) {
    let store = store_with_objects(10).await;

    let mut first = store.list_v2(BUCKET, prefix_options(page_size)).unwrap();
    let mut items1 = Vec::new();
    while let Some(entry) = first.next().await.unwrap() {
        items1.push(entry.key);
        if items1.len() >= break_size {
            break;
        }
    }

    let resume = prefix_options(page_size).resume_from(first.checkpoint());
    let mut second = store.list_v2(BUCKET, resume).unwrap();
    let mut items2 = Vec::new();
    while let Some(entry) = second.next().await.unwrap() {
        assert_eq!(second.start_after_key(), Some(entry.key.as_str()));
        items2.push(entry.key);
    }

    assert_eq!(items1.len() + items2.len(), 10);
    let mut combined = items1;
    combined.extend(items2);
    let everything = keys(&store.list_v2(BUCKET, prefix_options(1000)).unwrap().collect_remaining().await.unwrap());
    assert_eq!(combined, everything);
}

/// L1. Listing returns every matching key with full metadata
#[tokio::test]
async fn test_list_v2_returns_all_items() {
    let store = store_with_objects(10).await;

    let entries = store
        .list_v2(BUCKET, ListOptions::new().with_prefix("testList/prefix"))
        .unwrap()
        .collect_remaining()
        .await
        .unwrap();

    assert_eq!(entries.len(), 10);
    for (ix, entry) in entries.iter().enumerate() {
        assert!(entry.key.contains(&format!("prefix.00{}", ix)));
        assert!(entry.metadata.checksum.is_some());
        assert!(entry.metadata.size.is_some());
        assert!(entry.metadata.created.is_some());
        assert!(entry.metadata.last_modified.is_some());
    }
}

/// L2. Small pages still produce the whole listing
#[tokio::test]
async fn test_list_v2_small_pages() {
    let store = store_with_objects(10).await;
    let mut listing = store.list_v2(BUCKET, prefix_options(3)).unwrap();
    let entries = listing.collect_remaining().await.unwrap();

    assert_eq!(entries.len(), 10);
    assert_eq!(listing.pages_fetched(), 4);
}

/// L3. Continuation across sessions, breaking mid-page and on a page boundary
#[tokio::test]
async fn test_list_v2_continuation() {
    split_listing(2, 3).await;
    split_listing(2, 4).await;
    split_listing(3, 9).await;
    split_listing(5, 10).await;
}

/// L4. Unknown start_after_key is a paging error, never a silent restart
#[tokio::test]
async fn test_unfound_start_after_key_is_paging_error() {
    let store = store_with_objects(10).await;
    let options = ListOptions::new()
        .resume_from(IterationCheckpoint::start().with_start_after_key("nonsensicalnonsense"));

    let err = store
        .list_v2(BUCKET, options)
        .unwrap()
        .collect_remaining()
        .await
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::Paging { ref start_after_key } if start_after_key == "nonsensicalnonsense"));
}

/// L5. A checkpoint survives a JSON round trip into a "new process"
#[tokio::test]
async fn test_checkpoint_handoff_between_processes() {
    let store = store_with_objects(10).await;

    let saved = {
        let mut listing = store.list_v2(BUCKET, prefix_options(4)).unwrap();
        for _ in 0..6 {
            listing.next().await.unwrap();
        }
        listing.checkpoint().to_json().unwrap()
    };

    let checkpoint = IterationCheckpoint::from_json(&saved).unwrap();
    let rest = store
        .list_v2(BUCKET, prefix_options(4).resume_from(checkpoint))
        .unwrap()
        .collect_remaining()
        .await
        .unwrap();
    assert_eq!(keys(&rest).first().map(String::as_str), Some("testList/prefix.006"));
    assert_eq!(rest.len(), 4);
}

/// L6. Items appended after the checkpoint are picked up on resume
#[tokio::test]
async fn test_resume_sees_appended_items() {
    let store = store_with_objects(5).await;

    let mut listing = store.list_v2(BUCKET, prefix_options(2)).unwrap();
    for _ in 0..3 {
        listing.next().await.unwrap();
    }
    let checkpoint = listing.checkpoint();
    drop(listing);

    store.put_object(BUCKET, "testList/prefix.100", "late").await.unwrap();

    let rest = store
        .list_v2(BUCKET, prefix_options(2).resume_from(checkpoint))
        .unwrap()
        .collect_remaining()
        .await
        .unwrap();
    assert_eq!(
        keys(&rest),
        vec!["testList/prefix.003", "testList/prefix.004", "testList/prefix.100"]
    );
}

/// L6b. Items removed before the checkpoint do not disturb the resume
#[tokio::test]
async fn test_resume_after_earlier_items_removed() {
    let store = store_with_objects(5).await;

    let mut listing = store.list_v2(BUCKET, prefix_options(2)).unwrap();
    for _ in 0..3 {
        listing.next().await.unwrap();
    }
    let checkpoint = listing.checkpoint();
    drop(listing);
    assert_eq!(checkpoint.token.as_deref(), Some("testList/prefix.001"));
    assert_eq!(checkpoint.start_after_key.as_deref(), Some("testList/prefix.002"));

    // including the key the token points at
    assert!(store.delete(BUCKET, "testList/prefix.000").await.unwrap());
    assert!(store.delete(BUCKET, "testList/prefix.001").await.unwrap());

    let rest = store
        .list_v2(BUCKET, prefix_options(2).resume_from(checkpoint))
        .unwrap()
        .collect_remaining()
        .await
        .unwrap();
    assert_eq!(keys(&rest), vec!["testList/prefix.003", "testList/prefix.004"]);
}

/// L7. Collaborator NotFound propagates unchanged
#[tokio::test]
async fn test_not_found_propagates() {
    let store = MemoryBlobStore::new();
    let err = store
        .list_v2("no-such-bucket", ListOptions::new())
        .unwrap()
        .collect_remaining()
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Wraps a fetcher and fails or stalls on a chosen call.
struct FlakyPages {
    inner: MemoryObjectPages,
    calls: AtomicUsize,
    fail_on_call: usize,
    stall: bool,
}

#[async_trait]
impl PageFetcher for FlakyPages {
    type Page = Page<BlobEntry>;
    type Item = BlobEntry;

    async fn fetch_page(
        &self,
        filters: &ListFilters,
        cursor: Option<&str>,
    ) -> BlobStoreResult<Self::Page> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_on_call {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(5)).await;
            } else {
                return Err(BlobStoreError::backend(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
        }
        self.inner.fetch_page(filters, cursor).await
    }

    fn extract_cursor(&self, page: &Self::Page) -> Option<String> {
        self.inner.extract_cursor(page)
    }

    fn extract_items(&self, page: Self::Page) -> Vec<Self::Item> {
        self.inner.extract_items(page)
    }

    fn item_key<'a>(&self, item: &'a Self::Item) -> &'a str {
        self.inner.item_key(item)
    }
}

/// L8. A stalled fetch surfaces as Timeout; the checkpoint still resumes cleanly
#[tokio::test]
async fn test_stalled_fetch_times_out_and_resumes() {
    let store = store_with_objects(10).await;
    let flaky = FlakyPages {
        inner: store.object_pages(BUCKET),
        calls: AtomicUsize::new(0),
        fail_on_call: 1,
        stall: true,
    };
    let options = prefix_options(4).with_fetch_timeout(Duration::from_millis(20));
    let mut listing = PagedIter::new(flaky, options).unwrap();

    let mut seen = Vec::new();
    let err = loop {
        match listing.next().await {
            Ok(Some(entry)) => seen.push(entry.key),
            Ok(None) => panic!("listing should have timed out"),
            Err(err) => break err,
        }
    };
    assert!(err.is_timeout());
    assert_eq!(seen.len(), 4);
    assert!(listing.next().await.unwrap().is_none());

    let rest = store
        .list_v2(BUCKET, prefix_options(4).resume_from(listing.checkpoint()))
        .unwrap()
        .collect_remaining()
        .await
        .unwrap();
    seen.extend(keys(&rest));
    assert_eq!(seen.len(), 10);
}

/// L9. Other collaborator failures pass through unmodified
#[tokio::test]
async fn test_backend_failure_passes_through() {
    let store = store_with_objects(10).await;
    let flaky = Arc::new(FlakyPages {
        inner: store.object_pages(BUCKET),
        calls: AtomicUsize::new(0),
        fail_on_call: 0,
        stall: false,
    });

    let mut listing = PagedIter::new(flaky.clone(), prefix_options(4)).unwrap();
    let err = listing.next().await.unwrap_err();
    assert!(matches!(err, BlobStoreError::Backend { .. }));
    assert!(listing.is_exhausted());
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Splitting a listing at any item and resuming from the checkpoint
    /// yields exactly the single-session sequence.
    #[test]
    fn prop_checkpoint_split_concatenates(
        total in 0usize..40,
        page_size in 1u32..12,
        split_seed in any::<usize>(),
    ) {
        let (whole, split) = tokio_test::block_on(async {
            let store = store_with_objects(total).await;
            let split_at = split_seed % (total + 1);

            let whole = keys(&store.list_v2(BUCKET, prefix_options(page_size)).unwrap().collect_remaining().await.unwrap());

            let mut first = store.list_v2(BUCKET, prefix_options(page_size)).unwrap();
            let mut split = Vec::new();
            for _ in 0..split_at {
                split.push(first.next().await.unwrap().unwrap().key);
            }
            let resume = prefix_options(page_size).resume_from(first.checkpoint());
            let rest = store.list_v2(BUCKET, resume).unwrap().collect_remaining().await.unwrap();
            split.extend(keys(&rest));
            (whole, split)
        });

        prop_assert_eq!(whole.len(), total);
        prop_assert_eq!(whole, split);
    }

    /// Any key absent from the listing is rejected as a resume point.
    #[test]
    fn prop_absent_start_after_key_is_paging_error(key in "[a-z]{1,12}") {
        let result = tokio_test::block_on(async {
            let store = store_with_objects(5).await;
            let options = prefix_options(2)
                .resume_from(IterationCheckpoint::start().with_start_after_key(key));
            store.list_v2(BUCKET, options).unwrap().collect_remaining().await
        });

        prop_assert!(matches!(result, Err(BlobStoreError::Paging { .. })), "expected Paging error, got {:?}", result);
    }
}
