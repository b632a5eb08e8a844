//! Local, ETag-gated mirror of a payload object and its signature.
//!
//! Grounded on `eessi_data_object.py`'s `EESSIDataAndSignatureObject`: an
//! ETag sidecar file (`<local>.etag`) records the remote ETag of the last
//! successful download, so a `CheckRemote` pass can skip re-downloading
//! unchanged objects without trusting local mtimes.

use std::fs;
use std::path::{Path, PathBuf};

use ingestor_types::DownloadMode;

use crate::client::RemoteObjectClient;

/// Mirrors Python's `Path.with_suffix('.etag')`: only the final suffix is
/// replaced, so `foo.tar.gz` becomes `foo.tar.etag`, not `foo.etag`.
fn etag_sidecar_path(local_path: &Path) -> PathBuf {
    local_path.with_extension("etag")
}

fn read_local_etag(local_path: &Path) -> Option<String> {
    fs::read_to_string(etag_sidecar_path(local_path))
        .ok()
        .map(|s| s.trim().to_string())
}

fn write_local_etag(local_path: &Path, etag: &str) -> anyhow::Result<()> {
    fs::write(etag_sidecar_path(local_path), etag)?;
    Ok(())
}

fn remove_if_exists(path: &Path) {
    let _ = fs::remove_file(path);
}

/// The result of a `LocalMirror::ensure` call.
#[derive(Debug, Clone)]
pub struct MirrorOutcome {
    pub payload_path: PathBuf,
    /// `None` when the signature failed to download and signatures are
    /// not required for this artifact.
    pub signature_path: Option<PathBuf>,
    pub downloaded: bool,
}

/// Decide, per `mode`, whether `payload_path`/`signature_path` need a
/// fresh download, then perform it.
pub struct LocalMirror<'a> {
    client: &'a RemoteObjectClient,
}

impl<'a> LocalMirror<'a> {
    pub fn new(client: &'a RemoteObjectClient) -> Self {
        Self { client }
    }

    pub fn ensure(
        &self,
        payload_key: &str,
        signature_key: &str,
        payload_path: &Path,
        signature_path: &Path,
        mode: DownloadMode,
        signatures_required: bool,
    ) -> anyhow::Result<MirrorOutcome> {
        let needs_download = self.needs_download(payload_key, signature_key, payload_path, signature_path, mode);

        if !needs_download {
            return Ok(MirrorOutcome {
                payload_path: payload_path.to_path_buf(),
                signature_path: Some(signature_path.to_path_buf()),
                downloaded: false,
            });
        }

        if let Some(parent) = payload_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let download_result = self.download_pair(payload_key, signature_key, payload_path, signature_path, signatures_required);

        if download_result.is_err() {
            remove_if_exists(payload_path);
            remove_if_exists(signature_path);
            remove_if_exists(&etag_sidecar_path(payload_path));
            remove_if_exists(&etag_sidecar_path(signature_path));
        }

        download_result
    }

    fn needs_download(
        &self,
        payload_key: &str,
        signature_key: &str,
        payload_path: &Path,
        signature_path: &Path,
        mode: DownloadMode,
    ) -> bool {
        match mode {
            DownloadMode::Force => true,
            DownloadMode::CheckLocal => !payload_path.exists() || !signature_path.exists(),
            DownloadMode::CheckRemote => {
                if !payload_path.exists() || !signature_path.exists() {
                    return true;
                }

                let local_payload_etag = read_local_etag(payload_path);
                let local_sig_etag = read_local_etag(signature_path);

                let (Some(local_payload_etag), Some(local_sig_etag)) =
                    (local_payload_etag, local_sig_etag)
                else {
                    return true;
                };

                let remote_matches = (|| -> anyhow::Result<bool> {
                    let payload_meta = self.client.head(payload_key)?;
                    let sig_meta = self.client.head(signature_key)?;
                    Ok(payload_meta.etag.as_deref() == Some(local_payload_etag.as_str())
                        && sig_meta.etag.as_deref() == Some(local_sig_etag.as_str()))
                })();

                // Any failure while comparing falls back to downloading,
                // matching the source's broad `except Exception`.
                !remote_matches.unwrap_or(false)
            }
        }
    }

    fn download_pair(
        &self,
        payload_key: &str,
        signature_key: &str,
        payload_path: &Path,
        signature_path: &Path,
        signatures_required: bool,
    ) -> anyhow::Result<MirrorOutcome> {
        let payload_etag = self
            .client
            .get(payload_key, payload_path)
            .map_err(|e| anyhow::anyhow!("failed to download payload {payload_key}: {e}"))?;
        if let Some(etag) = payload_etag {
            write_local_etag(payload_path, &etag)?;
        }

        match self.client.get(signature_key, signature_path) {
            Ok(etag) => {
                if let Some(etag) = etag {
                    write_local_etag(signature_path, &etag)?;
                }
                Ok(MirrorOutcome {
                    payload_path: payload_path.to_path_buf(),
                    signature_path: Some(signature_path.to_path_buf()),
                    downloaded: true,
                })
            }
            Err(sig_err) => {
                if signatures_required {
                    Err(anyhow::anyhow!(
                        "failed to download required signature {signature_key}: {sig_err}"
                    ))
                } else {
                    remove_if_exists(signature_path);
                    remove_if_exists(&etag_sidecar_path(signature_path));
                    tracing::warn!(%signature_key, error = %sig_err, "signature download failed, continuing without it");
                    Ok(MirrorOutcome {
                        payload_path: payload_path.to_path_buf(),
                        signature_path: None,
                        downloaded: true,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_sidecar_path_replaces_only_final_suffix() {
        let path = Path::new("/tmp/foo.tar.gz");
        assert_eq!(etag_sidecar_path(path), Path::new("/tmp/foo.tar.etag"));
    }

    #[test]
    fn read_local_etag_none_when_missing() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("foo.tar.gz");
        assert!(read_local_etag(&path).is_none());
    }

    #[test]
    fn write_then_read_local_etag_round_trips() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("foo.tar.gz");
        write_local_etag(&path, "abc123").expect("write");
        assert_eq!(read_local_etag(&path), Some("abc123".to_string()));
    }

    #[test]
    fn check_remote_forces_download_when_local_files_are_missing() {
        let td = tempfile::tempdir().expect("tempdir");
        let payload_path = td.path().join("foo.tar.gz");
        let signature_path = td.path().join("foo.tar.gz.sig");

        let config = crate::client::BucketConfig {
            bucket: "bucket".to_string(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint_url: None,
        };
        let client = RemoteObjectClient::new(&config).expect("client");
        let mirror = LocalMirror::new(&client);

        assert!(mirror.needs_download(
            "payload-key",
            "sig-key",
            &payload_path,
            &signature_path,
            DownloadMode::CheckRemote,
        ));
    }

    #[test]
    fn check_remote_skips_etag_comparison_when_only_payload_is_missing() {
        let td = tempfile::tempdir().expect("tempdir");
        let payload_path = td.path().join("foo.tar.gz");
        let signature_path = td.path().join("foo.tar.gz.sig");
        std::fs::write(&signature_path, b"sig").unwrap();
        write_local_etag(&signature_path, "etag").unwrap();

        let config = crate::client::BucketConfig {
            bucket: "bucket".to_string(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint_url: None,
        };
        let client = RemoteObjectClient::new(&config).expect("client");
        let mirror = LocalMirror::new(&client);

        assert!(mirror.needs_download(
            "payload-key",
            "sig-key",
            &payload_path,
            &signature_path,
            DownloadMode::CheckRemote,
        ));
    }
}
