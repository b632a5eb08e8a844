//! Remote staging-bucket access and the local ETag-gated mirror built on
//! top of it.

mod client;
mod mirror;

pub use client::{BucketConfig, ObjectMetadata, ObjectStoreError, ObjectSummary, RemoteObjectClient};
pub use mirror::{LocalMirror, MirrorOutcome};

pub use ingestor_types::DownloadMode;
