use thiserror::Error;

/// Result type for blob store operations
pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

/// Errors that can occur while listing objects or inspecting multipart uploads
#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    /// A checkpoint's `start_after_key` could not be located in the listing.
    #[error("Paging error: start_after_key {start_after_key:?} not found in listing page")]
    Paging { start_after_key: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A page fetch exceeded its connect/read deadline. Safe to retry with backoff.
    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl BlobStoreError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a paging error for a checkpoint key that could not be located
    pub fn paging<S: Into<String>>(start_after_key: S) -> Self {
        Self::Paging {
            start_after_key: start_after_key.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_paging(&self) -> bool {
        matches!(self, Self::Paging { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Only timeouts are worth retrying; everything else is deterministic for
    /// an unchanged listing.
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
    }
}

/// Await a provider call, translating an elapsed deadline into [`BlobStoreError::Timeout`].
pub(crate) async fn with_deadline<T, F>(
    limit: Option<std::time::Duration>,
    operation: &str,
    call: F,
) -> BlobStoreResult<T>
where
    F: std::future::Future<Output = BlobStoreResult<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("{} exceeded deadline of {:?}", operation, limit);
                Err(BlobStoreError::timeout(operation))
            }
        },
        None => call.await,
    }
}
