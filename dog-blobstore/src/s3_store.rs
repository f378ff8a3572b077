use std::env;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::types::{Object, Part};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    BlobEntry, BlobMetadata, BlobStore, BlobStoreError, BlobStoreResult, ListFilters, PageFetcher,
    PartLister, PartPage, PartRecord, UploadId,
};

/// Error codes S3 uses for a missing bucket, key or upload
const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NoSuchUpload", "NoSuchBucket", "NotFound"];

/// S3 connection settings
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    /// Falls back to the SDK's region chain when unset
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores
    pub endpoint_url: Option<String>,

    /// Static credentials; the SDK's default chain is used unless both are set
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,

    pub force_path_style: bool,

    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl S3Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from `S3_*` environment variables.
    ///
    /// All variables are optional. A custom endpoint turns on path-style
    /// addressing, which most S3-compatible servers require.
    pub fn from_env() -> BlobStoreResult<Self> {
        fn get_env(key: &str) -> Option<String> {
            env::var(key).ok().filter(|value| !value.is_empty())
        }

        let endpoint_url = get_env("S3_ENDPOINT_URL");
        Ok(Self {
            region: get_env("S3_REGION"),
            force_path_style: endpoint_url.is_some(),
            endpoint_url,
            access_key_id: get_env("S3_ACCESS_KEY_ID"),
            secret_access_key: get_env("S3_SECRET_ACCESS_KEY"),
            connect_timeout: parse_secs("S3_CONNECT_TIMEOUT_SECS", get_env("S3_CONNECT_TIMEOUT_SECS"))?,
            read_timeout: parse_secs("S3_READ_TIMEOUT_SECS", get_env("S3_READ_TIMEOUT_SECS"))?,
        })
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint_url<S: Into<String>>(mut self, endpoint_url: S) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self.force_path_style = true;
        self
    }

    pub fn with_credentials<S: Into<String>>(mut self, access_key_id: S, secret_access_key: S) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

fn parse_secs(name: &str, raw: Option<String>) -> BlobStoreResult<Option<Duration>> {
    raw.map(|value| {
        value
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| BlobStoreError::invalid(format!("{} must be a positive number of seconds, got {:?}", name, value)))
    })
    .transpose()
}

/// Translate an SDK failure into a [`BlobStoreError`].
///
/// Connect and read timeouts become `Timeout` whichever layer reported them;
/// missing buckets, keys and uploads become `NotFound`; everything else is
/// passed through as `Backend`.
pub fn map_sdk_error<E, R>(operation: &str, resource: &str, err: SdkError<E, R>) -> BlobStoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let timed_out = match &err {
        SdkError::TimeoutError(_) => true,
        SdkError::DispatchFailure(failure) => failure.is_timeout(),
        _ => false,
    };
    if timed_out {
        debug!("{} on {} timed out", operation, resource);
        return BlobStoreError::timeout(operation);
    }

    if let Some(code) = err.code() {
        if NOT_FOUND_CODES.contains(&code) {
            return BlobStoreError::not_found(resource);
        }
    }

    BlobStoreError::backend(err)
}

/// Object store backed by the AWS SDK; works with any S3-compatible endpoint
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
}

impl S3BlobStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_config(config: S3Config) -> Self {
        Self::new(Self::create_client(config).await)
    }

    pub async fn from_env() -> BlobStoreResult<Self> {
        let config = S3Config::from_env()?;
        Ok(Self::from_config(config).await)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn create_client(config: S3Config) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = config.region {
            loader = loader.region(Region::new(region));
        }
        if let (Some(access_key_id), Some(secret_access_key)) =
            (config.access_key_id, config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "dog-blobstore",
            ));
        }
        if let Some(endpoint_url) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let mut timeouts = TimeoutConfig::builder();
        if let Some(timeout) = config.connect_timeout {
            timeouts = timeouts.connect_timeout(timeout);
        }
        if let Some(timeout) = config.read_timeout {
            timeouts = timeouts.read_timeout(timeout);
        }
        loader = loader.timeout_config(timeouts.build());

        let sdk_config = loader.load().await;
        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&sdk_config)
                .force_path_style(config.force_path_style)
                .build(),
        )
    }
}

impl BlobStore for S3BlobStore {
    type Objects = S3ObjectPages;
    type Parts = S3PartPages;

    fn object_pages(&self, bucket: &str) -> Self::Objects {
        S3ObjectPages {
            client: self.client.clone(),
            bucket: bucket.to_string(),
        }
    }

    fn part_pages(&self, bucket: &str, key: &str) -> Self::Parts {
        S3PartPages {
            client: self.client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            page_size: None,
        }
    }
}

fn to_chrono(timestamp: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

fn strip_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn entry_from_object(object: &Object) -> Option<BlobEntry> {
    let key = object.key()?;
    let mut metadata = BlobMetadata::new();
    if let Some(etag) = object.e_tag() {
        metadata = metadata.with_checksum(strip_etag(etag));
    }
    if let Some(size) = object.size() {
        metadata = metadata.with_size(size.max(0) as u64);
    }
    if let Some(modified) = object.last_modified().and_then(to_chrono) {
        // S3 only exposes the last write time.
        metadata = metadata.with_created(modified).with_last_modified(modified);
    }
    Some(BlobEntry::new(key, metadata))
}

fn record_from_part(part: &Part) -> Option<PartRecord> {
    let part_number = u32::try_from(part.part_number()?).ok().filter(|n| *n > 0)?;
    let size = part.size().unwrap_or_default().max(0) as u64;
    let mut record = PartRecord::new(part_number, size);
    if let Some(etag) = part.e_tag() {
        record = record.with_etag(strip_etag(etag));
    }
    Some(record)
}

/// `ListObjectsV2` pages for one bucket
pub struct S3ObjectPages {
    client: Client,
    bucket: String,
}

#[async_trait]
impl PageFetcher for S3ObjectPages {
    type Page = ListObjectsV2Output;
    type Item = BlobEntry;

    async fn fetch_page(
        &self,
        filters: &ListFilters,
        cursor: Option<&str>,
    ) -> BlobStoreResult<Self::Page> {
        debug!(bucket = %self.bucket, cursor = ?cursor, "ListObjectsV2");

        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(filters.prefix.clone())
            .set_delimiter(filters.delimiter.clone())
            .set_max_keys(filters.page_size.map(|size| size.min(i32::MAX as u32) as i32))
            .set_continuation_token(cursor.map(str::to_string))
            .send()
            .await
            .map_err(|err| map_sdk_error("list_objects_v2", &self.bucket, err))
    }

    fn extract_cursor(&self, page: &Self::Page) -> Option<String> {
        page.next_continuation_token().map(str::to_string)
    }

    fn extract_items(&self, page: Self::Page) -> Vec<Self::Item> {
        page.contents().iter().filter_map(entry_from_object).collect()
    }

    fn item_key<'a>(&self, item: &'a Self::Item) -> &'a str {
        &item.key
    }
}

/// `ListParts` pages for multipart uploads of one key.
///
/// The start offset is sent as `PartNumberMarker = start_offset - 1`; after
/// that the cursor is the `NextPartNumberMarker` of a truncated response.
pub struct S3PartPages {
    client: Client,
    bucket: String,
    key: String,
    page_size: Option<i32>,
}

impl S3PartPages {
    /// Override `MaxParts` (S3 defaults to 1000)
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size.clamp(1, 1000) as i32);
        self
    }
}

#[async_trait]
impl PartLister for S3PartPages {
    async fn fetch_parts_page(
        &self,
        upload_id: &UploadId,
        start_offset: u32,
        cursor: Option<&str>,
    ) -> BlobStoreResult<PartPage> {
        let marker = match cursor {
            Some(next) => Some(next.to_string()),
            None if start_offset > 1 => Some((start_offset - 1).to_string()),
            None => None,
        };
        debug!(bucket = %self.bucket, key = %self.key, marker = ?marker, "ListParts");

        let response = self
            .client
            .list_parts()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id.as_str())
            .set_part_number_marker(marker)
            .set_max_parts(self.page_size)
            .send()
            .await
            .map_err(|err| map_sdk_error("list_parts", upload_id.as_str(), err))?;

        let items: Vec<PartRecord> = response.parts().iter().filter_map(record_from_part).collect();
        let next_token = if response.is_truncated() == Some(true) {
            response.next_part_number_marker().map(str::to_string)
        } else {
            None
        };
        Ok(PartPage::new(items, next_token))
    }
}
