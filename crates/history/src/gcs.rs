//! Google Cloud Storage object store over the JSON API.
//!
//! Reads use `alt=media` and take the generation from the
//! `x-goog-generation` header. Writes are simple media uploads with an
//! `ifGenerationMatch` precondition (`0` means "must not exist"); GCS
//! answers `412` when the precondition fails.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::object_store::{ObjectStore, ObjectStoreError, Precondition, StoredObject};

const DEFAULT_API_URL: &str = "https://storage.googleapis.com";

pub struct GcsObjectStore {
    base_url: String,
    bucket: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ObjectResource {
    generation: String,
}

impl GcsObjectStore {
    pub fn new(
        bucket: impl Into<String>,
        access_token: Option<String>,
        api_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ObjectStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ObjectStoreError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: api_url
                .unwrap_or(DEFAULT_API_URL)
                .trim_end_matches('/')
                .to_string(),
            bucket: bucket.into(),
            access_token,
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, ObjectStoreError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ObjectStoreError::Unavailable(format!("Bad storage URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Unavailable("Storage URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn transport_error(e: reqwest::Error) -> ObjectStoreError {
    if e.is_timeout() {
        ObjectStoreError::Timeout(e.to_string())
    } else {
        ObjectStoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    fn name(&self) -> &str {
        "gcs"
    }

    async fn get(&self, name: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        let mut url = self.url(&["storage", "v1", "b", &self.bucket, "o", name])?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Unavailable(format!(
                "GET {name} returned {status}: {body}"
            )));
        }

        let generation = response
            .headers()
            .get("x-goog-generation")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                ObjectStoreError::Unavailable(format!("GET {name} carried no generation"))
            })?;
        let bytes = response.bytes().await.map_err(transport_error)?.to_vec();

        debug!(object = name, generation, size = bytes.len(), "Read object");
        Ok(Some(StoredObject { bytes, generation }))
    }

    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> Result<u64, ObjectStoreError> {
        let if_generation = match precondition {
            Precondition::DoesNotExist => 0,
            Precondition::GenerationMatch(g) => g,
        };

        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", name)
            .append_pair("ifGenerationMatch", &if_generation.to_string());

        let response = self
            .authorize(self.client.post(url))
            .header("Content-Type", "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status == 412 {
            return Err(ObjectStoreError::PreconditionFailed {
                name: name.to_string(),
            });
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Unavailable(format!(
                "Upload of {name} returned {status}: {body}"
            )));
        }

        let resource: ObjectResource = response
            .json()
            .await
            .map_err(|e| ObjectStoreError::Unavailable(format!("Upload response: {e}")))?;
        resource.generation.parse().map_err(|_| {
            ObjectStoreError::Unavailable(format!("Bad generation {:?}", resource.generation))
        })
    }
}
