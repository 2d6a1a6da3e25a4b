//! Remote time-series store.
//!
//! [`RemoteStore`] is the narrow seam the batch writer delivers through.
//! [`InfluxStore`] implements it against the InfluxDB v2 write API.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::storage::StoreError;
use crate::storage::line_protocol::encode_batch;
use crate::storage::types::{Precision, Record};

/// Default request timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination of a write: organization and bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub org: String,
    pub bucket: String,
}

impl WriteTarget {
    pub fn new(org: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            bucket: bucket.into(),
        }
    }
}

/// A store that accepts batches of records.
///
/// One call is one write attempt; retrying is the caller's concern.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn write(&self, target: &WriteTarget, records: &[Record]) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<S> {
    async fn write(&self, target: &WriteTarget, records: &[Record]) -> Result<(), StoreError> {
        (**self).write(target, records).await
    }
}

/// InfluxDB v2 HTTP client.
pub struct InfluxStore {
    client: Client,
    write_url: Url,
    token: String,
    precision: Precision,
}

impl std::fmt::Debug for InfluxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxStore")
            .field("write_url", &self.write_url.as_str())
            .field("precision", &self.precision)
            .finish_non_exhaustive()
    }
}

impl InfluxStore {
    /// Create a client for the server at `base_url`.
    ///
    /// # Errors
    /// Returns `StoreError::Network` if the URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        precision: Precision,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base = Url::parse(base_url)
            .map_err(|e| StoreError::Network(format!("invalid store URL '{base_url}': {e}")))?;
        let write_url = base
            .join("api/v2/write")
            .map_err(|e| StoreError::Network(format!("invalid store URL '{base_url}': {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            write_url,
            token: token.into(),
            precision,
        })
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    fn request_url(&self, target: &WriteTarget) -> Url {
        let mut url = self.write_url.clone();
        url.query_pairs_mut()
            .append_pair("org", &target.org)
            .append_pair("bucket", &target.bucket)
            .append_pair("precision", self.precision.as_ref());
        url
    }
}

#[async_trait::async_trait]
impl RemoteStore for InfluxStore {
    async fn write(&self, target: &WriteTarget, records: &[Record]) -> Result<(), StoreError> {
        let (body, skipped) = encode_batch(records, self.precision);
        if body.is_empty() {
            return Err(StoreError::Encode(format!(
                "none of {} records had encodable fields",
                records.len()
            )));
        }

        let mut request = self
            .client
            .post(self.request_url(target))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if !self.token.is_empty() {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.token),
            );
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout
            } else {
                StoreError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                count = records.len() - skipped,
                bucket = %target.bucket,
                "Batch written"
            );
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(StoreError::from_status(status.as_u16(), message))
    }
}
