//! GCS JSON API client
//!
//! Implements the raw [`ObjectStore`] operations against the Google Cloud
//! Storage JSON API: object metadata and media via
//! `/storage/v1/b/{bucket}/o/{object}`, uploads via
//! `/upload/storage/v1/b/{bucket}/o`. Conditional writes use the
//! `ifGenerationMatch` query parameter (`0` means "must not exist"), which
//! is what gives the gateway its compare-and-swap semantics.

use std::env;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::StoreError;
use crate::store_trait::{ObjectAttrs, ObjectBody, ObjectStore, WritePrecondition};

/// Public GCS endpoint; overridden by `STORAGE_EMULATOR_HOST`.
pub const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// How the client obtains its bearer token.
#[derive(Debug, Clone)]
enum TokenSource {
    /// Explicit token from `GOOGLE_OAUTH_ACCESS_TOKEN`.
    Static(String),
    /// Default credentials from the GCE metadata server.
    MetadataServer,
    /// No authentication (emulator).
    Anonymous,
}

/// GCS object store client
///
/// Cheap to construct; callers are expected to open one per operation scope
/// rather than sharing a long-lived instance.
pub struct GcsClient {
    client: Client,
    api_base: String,
    token_source: TokenSource,
}

/// Object metadata as returned by the JSON API. Numeric fields arrive as
/// strings.
#[derive(Debug, Deserialize)]
struct GcsObjectMeta {
    generation: String,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

impl GcsClient {
    /// Create a new client.
    ///
    /// `GOOGLE_OAUTH_ACCESS_TOKEN` selects an explicit static token source;
    /// otherwise the GCE metadata server provides default credentials.
    /// `STORAGE_EMULATOR_HOST` redirects the client at an emulator and
    /// disables authentication.
    pub fn new() -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(StoreError::Http)?;

        let (api_base, token_source) = match env::var("STORAGE_EMULATOR_HOST") {
            Ok(host) if !host.is_empty() => {
                let base = if host.starts_with("http") {
                    host
                } else {
                    format!("http://{host}")
                };
                (base.trim_end_matches('/').to_string(), TokenSource::Anonymous)
            }
            _ => {
                let source = match env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
                    Ok(token) if !token.is_empty() => TokenSource::Static(token),
                    _ => TokenSource::MetadataServer,
                };
                (DEFAULT_API_BASE.to_string(), source)
            }
        };

        Ok(Self {
            client,
            api_base,
            token_source,
        })
    }

    /// Resolve the bearer token for the next request, if any.
    async fn access_token(&self) -> Result<Option<String>, StoreError> {
        match &self.token_source {
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::Anonymous => Ok(None),
            TokenSource::MetadataServer => {
                let response = self
                    .client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(StoreError::Http)?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(StoreError::Api(format!(
                        "failed to fetch default credentials from metadata server: {status} - {body}"
                    )));
                }
                let token: MetadataToken = response.json().await.map_err(StoreError::Http)?;
                Ok(Some(token.access_token))
            }
        }
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.api_base,
            bucket,
            urlencoding::encode(path)
        )
    }

    fn upload_url(&self, bucket: &str, path: &str, precondition: WritePrecondition) -> String {
        let generation_match = match precondition {
            WritePrecondition::DoesNotExist => 0,
            WritePrecondition::GenerationMatch(generation) => generation,
        };
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}&ifGenerationMatch={}",
            self.api_base,
            bucket,
            urlencoding::encode(path),
            generation_match
        )
    }

    async fn request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StoreError> {
        let builder = match self.access_token().await? {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        };
        builder.send().await.map_err(StoreError::Http)
    }
}

#[async_trait::async_trait]
impl ObjectStore for GcsClient {
    async fn get(&self, bucket: &str, path: &str) -> Result<ObjectBody, StoreError> {
        // Metadata first (for the generation), then the media. Two requests,
        // mirroring an attrs-then-reader access pattern.
        let attrs = self.get_attrs(bucket, path).await?;

        let url = format!("{}?alt=media", self.object_url(bucket, path));
        debug!("Fetching object {}/{}", bucket, path);
        let response = self.request(self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api(format!(
                "failed to read object {bucket}/{path}: {status} - {body}"
            )));
        }
        let bytes = response.bytes().await.map_err(StoreError::Http)?.to_vec();
        Ok(ObjectBody { bytes, attrs })
    }

    async fn get_attrs(&self, bucket: &str, path: &str) -> Result<ObjectAttrs, StoreError> {
        let url = self.object_url(bucket, path);
        debug!("Fetching attributes for {}/{}", bucket, path);
        let response = self.request(self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api(format!(
                "failed to get attributes of {bucket}/{path}: {status} - {body}"
            )));
        }
        let meta: GcsObjectMeta = response.json().await.map_err(StoreError::Http)?;
        let generation = meta
            .generation
            .parse::<i64>()
            .map_err(|err| StoreError::Api(format!(
                "unparseable generation '{}' for {bucket}/{path}: {err}",
                meta.generation
            )))?;
        Ok(ObjectAttrs { generation })
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        body: Vec<u8>,
        precondition: WritePrecondition,
    ) -> Result<ObjectAttrs, StoreError> {
        let url = self.upload_url(bucket, path, precondition);
        debug!("Writing object {}/{} ({:?})", bucket, path, precondition);
        let response = self
            .request(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .body(body),
            )
            .await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            let generation = match precondition {
                WritePrecondition::DoesNotExist => 0,
                WritePrecondition::GenerationMatch(generation) => generation,
            };
            return Err(StoreError::Conflict {
                path: path.to_string(),
                generation,
            });
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api(format!(
                "failed to write object {bucket}/{path}: {status} - {body}"
            )));
        }
        let meta: GcsObjectMeta = response.json().await.map_err(StoreError::Http)?;
        let generation = meta
            .generation
            .parse::<i64>()
            .map_err(|err| StoreError::Api(format!(
                "unparseable generation '{}' for {bucket}/{path}: {err}",
                meta.generation
            )))?;
        Ok(ObjectAttrs { generation })
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<(), StoreError> {
        let url = self.object_url(bucket, path);
        debug!("Deleting object {}/{}", bucket, path);
        let response = self.request(self.client.delete(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api(format!(
                "failed to delete object {bucket}/{path}: {status} - {body}"
            )));
        }
        Ok(())
    }
}
