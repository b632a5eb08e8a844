//! A synchronous wrapper around the S3 `ListObjectsV2`/`HeadObject`/
//! `GetObject` calls a staging bucket needs, with full pagination.
//!
//! Mirrors `s3_bucket.py`'s `EESSIS3Bucket`: constructed from `[aws]`/
//! `[secrets]` config, not instance-role credentials, and with the same
//! custom-endpoint-vs-AWS-virtual-host URL derivation for `bucket_url()`.

use std::io::Write;
use std::path::Path;

use futures::TryStreamExt;
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_credential::StaticProvider;
use rusoto_s3::{GetObjectRequest, HeadObjectRequest, ListObjectsV2Request, S3, S3Client};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("transport error talking to object store: {0}")]
    Transport(String),
}

impl<E: std::error::Error + 'static> From<RusotoError<E>> for ObjectStoreError {
    fn from(err: RusotoError<E>) -> Self {
        match &err {
            RusotoError::Unknown(resp) if resp.status.as_u16() == 404 => {
                ObjectStoreError::NotFound(err.to_string())
            }
            _ => ObjectStoreError::Transport(err.to_string()),
        }
    }
}

/// One entry returned by a bucket listing.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub etag: Option<String>,
}

/// Metadata returned by a `HeadObject` call.
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub etag: Option<String>,
    pub content_length: Option<i64>,
}

/// Configuration needed to talk to one staging bucket.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Set for S3-compatible services (MinIO, Ceph); when absent the
    /// client talks to AWS directly.
    pub endpoint_url: Option<String>,
}

impl BucketConfig {
    /// The browsable URL for an object in this bucket, embedded in PR
    /// and issue bodies.
    ///
    /// Mirrors `get_bucket_url`: a custom endpoint always gets a
    /// path-style URL; AWS gets virtual-hosted-style, and the region is
    /// omitted from the host entirely for `us-east-1`.
    pub fn bucket_url(&self) -> String {
        if let Some(endpoint) = &self.endpoint_url {
            format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket)
        } else if self.region == "us-east-1" {
            format!("https://{}.s3.amazonaws.com", self.bucket)
        } else {
            format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    fn region(&self) -> Region {
        match &self.endpoint_url {
            Some(endpoint) => Region::Custom {
                name: self.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => self.region.parse().unwrap_or(Region::UsEast1),
        }
    }
}

/// Blocking client for one staging bucket, backed by a single-threaded
/// Tokio runtime (the same runtime dependency the rest of the workspace
/// already carries for webhook delivery).
pub struct RemoteObjectClient {
    client: S3Client,
    bucket: String,
    runtime: tokio::runtime::Runtime,
}

impl RemoteObjectClient {
    pub fn new(config: &BucketConfig) -> anyhow::Result<Self> {
        let credentials =
            StaticProvider::new_minimal(config.access_key.clone(), config.secret_key.clone());
        let http = HttpClient::new()?;
        let client = S3Client::new_with(http, credentials, config.region());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { client, bucket: config.bucket.clone(), runtime })
    }

    /// List every object under `prefix`, following `NextContinuationToken`
    /// to completion. `ListObjectsV2` caps a single response at 1000 keys;
    /// this never stops at the first page.
    pub fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        self.runtime.block_on(async {
            let mut results = Vec::new();
            let mut continuation_token = None;

            loop {
                let request = ListObjectsV2Request {
                    bucket: self.bucket.clone(),
                    prefix: prefix.map(|p| p.to_string()),
                    continuation_token: continuation_token.clone(),
                    ..Default::default()
                };

                let response = self.client.list_objects_v2(request).await?;

                for object in response.contents.unwrap_or_default() {
                    if let Some(key) = object.key {
                        results.push(ObjectSummary {
                            key,
                            size: object.size.unwrap_or(0),
                            etag: object.e_tag.map(|t| t.trim_matches('"').to_string()),
                        });
                    }
                }

                match response.next_continuation_token {
                    Some(token) => continuation_token = Some(token),
                    None => break,
                }
            }

            Ok(results)
        })
    }

    /// `HeadObject`, used to compare remote and local ETags before
    /// deciding whether to re-download.
    pub fn head(&self, key: &str) -> Result<ObjectMetadata, ObjectStoreError> {
        self.runtime.block_on(async {
            let request = HeadObjectRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                ..Default::default()
            };
            let response = self.client.head_object(request).await?;
            Ok(ObjectMetadata {
                etag: response.e_tag.map(|t| t.trim_matches('"').to_string()),
                content_length: response.content_length,
            })
        })
    }

    /// Download an object to `local_path`, returning its ETag.
    ///
    /// The body is written to a scoped temporary path alongside
    /// `local_path` and renamed into place only once the write succeeds,
    /// so a crash or I/O error mid-download never leaves a partial file
    /// at the final path.
    pub fn get(&self, key: &str, local_path: &Path) -> Result<Option<String>, ObjectStoreError> {
        self.runtime.block_on(async {
            let request = GetObjectRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                ..Default::default()
            };
            let response = self.client.get_object(request).await?;
            let etag = response.e_tag.map(|t| t.trim_matches('"').to_string());

            let body = response
                .body
                .ok_or_else(|| ObjectStoreError::Transport("empty response body".to_string()))?;
            let bytes = body
                .map_ok(|chunk| chunk.to_vec())
                .try_concat()
                .await
                .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;

            if let Some(parent) = local_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
            }

            let file_name = local_path
                .file_name()
                .ok_or_else(|| ObjectStoreError::Transport("local path has no file name".to_string()))?;
            let tmp_path = local_path.with_file_name(format!("{}.part", file_name.to_string_lossy()));

            let write_result = (|| -> std::io::Result<()> {
                let mut file = std::fs::File::create(&tmp_path)?;
                file.write_all(&bytes)
            })();

            if let Err(e) = write_result {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(ObjectStoreError::Transport(e.to_string()));
            }

            std::fs::rename(&tmp_path, local_path).map_err(|e| ObjectStoreError::Transport(e.to_string()))?;

            Ok(etag)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_url_uses_virtual_host_style_for_aws() {
        let config = BucketConfig {
            bucket: "my-bucket".to_string(),
            region: "eu-west-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint_url: None,
        };
        assert_eq!(
            config.bucket_url(),
            "https://my-bucket.s3.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn bucket_url_omits_region_for_us_east_1() {
        let config = BucketConfig {
            bucket: "my-bucket".to_string(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint_url: None,
        };
        assert_eq!(config.bucket_url(), "https://my-bucket.s3.amazonaws.com");
    }

    #[test]
    fn bucket_url_uses_path_style_for_custom_endpoint() {
        let config = BucketConfig {
            bucket: "my-bucket".to_string(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint_url: Some("https://minio.example.com".to_string()),
        };
        assert_eq!(
            config.bucket_url(),
            "https://minio.example.com/my-bucket"
        );
    }
}
