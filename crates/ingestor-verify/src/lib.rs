//! Payload verification: external signature checking and SHA-256 checksum
//! comparison against the metadata document.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use ingestor_process::run_command_with_timeout;
use sha2::{Digest, Sha256};

/// Configuration for the external signature-verification executable.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub verify_script: std::path::PathBuf,
    pub allowed_signers_file: std::path::PathBuf,
    pub timeout: Option<Duration>,
}

/// Verify `file` against `signature_file` by invoking the configured
/// external verification executable with
/// `--verify --allowed-signers-file <f> --file <file> --signature-file <sig>`.
///
/// If `signature_file` does not exist, no subprocess is run: the result is
/// `Ok(true)` when signatures are not required and `Ok(false)` when they
/// are. The external script is only ever invoked when the signature file
/// is actually present.
pub fn verify_signature(
    config: &VerifierConfig,
    file: &Path,
    signature_file: &Path,
    signatures_required: bool,
) -> Result<bool> {
    if !signature_file.exists() {
        return Ok(!signatures_required);
    }

    let working_dir = file.parent().unwrap_or_else(|| Path::new("."));
    let program = config
        .verify_script
        .to_str()
        .context("verify script path is not valid UTF-8")?;
    let allowed_signers = config
        .allowed_signers_file
        .to_str()
        .context("allowed signers path is not valid UTF-8")?;
    let file_str = file.to_str().context("file path is not valid UTF-8")?;
    let sig_str = signature_file
        .to_str()
        .context("signature file path is not valid UTF-8")?;

    let output = run_command_with_timeout(
        program,
        &[
            "--verify",
            "--allowed-signers-file",
            allowed_signers,
            "--file",
            file_str,
            "--signature-file",
            sig_str,
        ],
        working_dir,
        config.timeout,
    )?;

    Ok(output.exit_code == 0 && !output.timed_out)
}

/// Verify both the payload and its accompanying metadata document,
/// succeeding only when both signatures check out.
pub fn verify_signature_pair(
    config: &VerifierConfig,
    payload: &Path,
    payload_sig: &Path,
    metadata: &Path,
    metadata_sig: &Path,
    signatures_required: bool,
) -> Result<bool> {
    let payload_ok = verify_signature(config, payload, payload_sig, signatures_required)?;
    let metadata_ok = verify_signature(config, metadata, metadata_sig, signatures_required)?;
    Ok(payload_ok && metadata_ok)
}

/// Stream `path` through SHA-256 in 8 KiB blocks and return the lowercase
/// hex digest.
pub fn sha256sum(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {} for checksumming", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file's checksum against the expected value (case-insensitive).
pub fn verify_checksum(path: &Path, expected_sha256: &str) -> Result<bool> {
    let actual = sha256sum(path)?;
    Ok(actual.eq_ignore_ascii_case(expected_sha256))
}
