use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BlobStoreError, BlobStoreResult, IterationCheckpoint};

/// Filters forwarded untouched to the provider on every page fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilters {
    /// Only keys starting with this prefix
    pub prefix: Option<String>,

    /// Roll up keys containing this delimiter past the prefix
    pub delimiter: Option<String>,

    /// Upper bound on items per page. `None` uses the provider default
    /// (1000 for S3 and the in-memory store).
    pub page_size: Option<u32>,
}

impl ListFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_delimiter<S: Into<String>>(mut self, delimiter: S) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Everything a [`crate::PagedIter`] needs besides its fetcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub filters: ListFilters,

    /// Where to resume; defaults to the listing head
    pub checkpoint: IterationCheckpoint,

    /// Deadline applied to each individual page fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout: Option<Duration>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filters(mut self, filters: ListFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.filters.prefix = Some(prefix.into());
        self
    }

    pub fn with_delimiter<S: Into<String>>(mut self, delimiter: S) -> Self {
        self.filters.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.filters.page_size = Some(page_size);
        self
    }

    /// Resume from a previously captured checkpoint
    pub fn resume_from(mut self, checkpoint: IterationCheckpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> BlobStoreResult<()> {
        if self.filters.page_size == Some(0) {
            return Err(BlobStoreError::invalid("page_size must be at least 1"));
        }
        if self.fetch_timeout == Some(Duration::ZERO) {
            return Err(BlobStoreError::invalid("fetch_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Which expected part numbers to probe for absence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPartQuery {
    /// Last part number of the upload; parts are expected in `1..=part_count`
    pub part_count: u32,

    /// First part number to consider (1-based)
    pub search_start: u32,

    /// Maximum number of missing part numbers to return
    pub return_count: u32,
}

impl MissingPartQuery {
    /// Query for the first missing part of an upload with `part_count` parts
    pub fn new(part_count: u32) -> Self {
        Self {
            part_count,
            search_start: 1,
            return_count: 1,
        }
    }

    pub fn with_search_start(mut self, search_start: u32) -> Self {
        self.search_start = search_start;
        self
    }

    pub fn with_return_count(mut self, return_count: u32) -> Self {
        self.return_count = return_count;
        self
    }

    /// Reject ranges that cannot be answered. Runs before any network call.
    pub fn validate(&self) -> BlobStoreResult<()> {
        if self.part_count == 0 {
            return Err(BlobStoreError::invalid("part_count must be at least 1"));
        }
        if self.return_count == 0 {
            return Err(BlobStoreError::invalid("return_count must be at least 1"));
        }
        if self.search_start == 0 {
            return Err(BlobStoreError::invalid("part numbers start at 1"));
        }
        if self.search_start > self.part_count {
            return Err(BlobStoreError::invalid(format!(
                "search_start {} is past the last part {}",
                self.search_start, self.part_count
            )));
        }
        Ok(())
    }
}
