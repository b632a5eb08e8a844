//! INI configuration loading.
//!
//! Sections and required keys mirror `REQUIRED_CONFIG` in the original
//! tooling's CLI entrypoint: validation happens eagerly, at load time, and
//! reports every missing section/key in one error rather than failing on
//! the first.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use configparser::ini::Ini;
use ingestor_types::StagingPrMethod;

#[derive(Debug, Clone)]
pub struct SecretsConfig {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub github_token: String,
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// Bucket name -> the CVMFS repository artifacts from that bucket are
    /// ingested into. Configured as a JSON object, not a flat list: each
    /// staging bucket feeds exactly one CVMFS repo.
    pub staging_buckets: BTreeMap<String, String>,
    pub region: String,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub download_dir: PathBuf,
    pub ingestion_script: PathBuf,
    pub metadata_file_extension: String,
    pub pidfile: PathBuf,
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub repository: String,
    pub staging_pr_method: StagingPrMethod,
    pub individual_pr_body: Option<String>,
    pub grouped_pr_body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SignaturesConfig {
    pub required: bool,
    pub verify_script: PathBuf,
    pub allowed_signers_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CvmfsConfig {
    pub ingest_as_root: bool,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub webhook: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub log_file: Option<PathBuf>,
    pub console_level: Option<String>,
    pub file_level: Option<String>,
    pub scopes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub secrets: SecretsConfig,
    pub aws: AwsConfig,
    pub paths: PathsConfig,
    pub github: GithubConfig,
    pub signatures: SignaturesConfig,
    pub cvmfs: CvmfsConfig,
    pub slack: Option<SlackConfig>,
    pub logging: LoggingConfig,
}

/// Reads a required key, collecting a human-readable note into `missing`
/// instead of failing eagerly, so every problem in a config can be
/// reported in one pass.
struct Reader<'a> {
    ini: &'a Ini,
    missing: Vec<String>,
}

impl<'a> Reader<'a> {
    fn required(&mut self, section: &str, key: &str) -> String {
        match self.ini.get(section, key) {
            Some(v) if !v.trim().is_empty() => v,
            _ => {
                self.missing.push(format!("[{section}] {key}"));
                String::new()
            }
        }
    }

    fn optional(&self, section: &str, key: &str) -> Option<String> {
        self.ini.get(section, key).filter(|v| !v.trim().is_empty())
    }

    fn optional_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.ini
            .getbool(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }
}

pub fn load_from_str(contents: &str) -> Result<Config> {
    let mut ini = Ini::new();
    ini.read(contents.to_string())
        .map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;
    build_config(&ini)
}

pub fn load(path: &Path) -> Result<Config> {
    let mut ini = Ini::new();
    ini.load(path)
        .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
    build_config(&ini)
}

fn build_config(ini: &Ini) -> Result<Config> {
    let mut r = Reader { ini, missing: Vec::new() };

    let secrets = SecretsConfig {
        aws_access_key_id: r.required("secrets", "aws_access_key_id"),
        aws_secret_access_key: r.required("secrets", "aws_secret_access_key"),
        github_token: r.required("secrets", "github_token"),
    };

    let staging_buckets_raw = r.required("aws", "staging_buckets");
    let staging_buckets = if staging_buckets_raw.is_empty() {
        BTreeMap::new()
    } else {
        parse_bucket_map(&staging_buckets_raw).unwrap_or_else(|e| {
            r.missing.push(e);
            BTreeMap::new()
        })
    };
    let aws = AwsConfig {
        staging_buckets,
        region: r.optional("aws", "region").unwrap_or_else(|| "us-east-1".to_string()),
        endpoint_url: r.optional("aws", "endpoint_url"),
    };

    let paths = PathsConfig {
        download_dir: PathBuf::from(r.required("paths", "download_dir")),
        ingestion_script: PathBuf::from(r.required("paths", "ingestion_script")),
        metadata_file_extension: r.required("paths", "metadata_file_extension"),
        pidfile: PathBuf::from(
            r.optional("paths", "pidfile")
                .unwrap_or_else(|| "automated_ingestion.pid".to_string()),
        ),
    };

    let staging_pr_method_raw = r
        .optional("github", "staging_pr_method")
        .unwrap_or_else(|| "individual".to_string());
    let staging_pr_method = match staging_pr_method_raw.as_str() {
        "individual" => StagingPrMethod::Individual,
        "grouped" => StagingPrMethod::Grouped,
        other => {
            r.missing.push(format!(
                "[github] staging_pr_method must be 'individual' or 'grouped', got '{other}'"
            ));
            StagingPrMethod::Individual
        }
    };
    let github = GithubConfig {
        repository: r.required("github", "repository"),
        staging_pr_method,
        individual_pr_body: r.optional("github", "individual_pr_body"),
        grouped_pr_body: r.optional("github", "grouped_pr_body"),
    };

    let signatures = SignaturesConfig {
        required: r.optional_bool("signatures", "required", true),
        verify_script: PathBuf::from(r.required("signatures", "verify_script")),
        allowed_signers_file: PathBuf::from(r.required("signatures", "allowed_signers_file")),
    };

    let cvmfs = CvmfsConfig {
        ingest_as_root: r.optional_bool("cvmfs", "ingest_as_root", true),
    };

    let slack = r.optional("slack", "webhook").map(|webhook| SlackConfig { webhook });

    let logging = LoggingConfig {
        log_file: r.optional("logging", "log_file").map(PathBuf::from),
        console_level: r.optional("logging", "console_level"),
        file_level: r.optional("logging", "file_level"),
        scopes: r.optional("logging", "log_scopes"),
    };

    if !r.missing.is_empty() {
        bail!(
            "configuration is missing required settings:\n  {}",
            r.missing.join("\n  ")
        );
    }

    match github.staging_pr_method {
        StagingPrMethod::Individual if github.individual_pr_body.is_none() => {
            bail!("[github] individual_pr_body is required when staging_pr_method = individual");
        }
        StagingPrMethod::Grouped if github.grouped_pr_body.is_none() => {
            bail!("[github] grouped_pr_body is required when staging_pr_method = grouped");
        }
        _ => {}
    }

    Ok(Config { secrets, aws, paths, github, signatures, cvmfs, slack, logging })
}

/// `aws.staging_buckets` is a JSON object in the original config, mapping
/// each staging bucket name to the CVMFS repository its artifacts are
/// ingested into, e.g. `{"staging-bucket": "software.eessi.io"}`.
fn parse_bucket_map(raw: &str) -> Result<BTreeMap<String, String>, String> {
    serde_json::from_str(raw.trim()).map_err(|e| {
        format!("[aws] staging_buckets must be a JSON object mapping bucket name to cvmfs repo: {e}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_config() -> String {
        r#"
[secrets]
aws_access_key_id = AKIA
aws_secret_access_key = secret
github_token = ghp_token

[aws]
staging_buckets = {"staging-bucket": "software.eessi.io"}

[paths]
download_dir = /var/lib/ingestion/downloads
ingestion_script = /usr/local/bin/ingest.sh
metadata_file_extension = meta.txt

[github]
repository = EESSI/staging
individual_pr_body = Ingest {tarball}

[signatures]
verify_script = /usr/local/bin/verify.sh
allowed_signers_file = /etc/ingestion/allowed_signers
"#
        .to_string()
    }

    #[test]
    fn loads_a_minimal_valid_config() {
        let config = load_from_str(&minimal_valid_config()).expect("load");
        assert_eq!(
            config.aws.staging_buckets.get("staging-bucket").map(String::as_str),
            Some("software.eessi.io")
        );
        assert_eq!(config.github.staging_pr_method, StagingPrMethod::Individual);
        assert!(config.signatures.required);
        assert!(config.cvmfs.ingest_as_root);
    }

    #[test]
    fn reports_every_missing_required_key_at_once() {
        let err = load_from_str("[secrets]\naws_access_key_id = x\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("aws_secret_access_key"));
        assert!(msg.contains("github_token"));
        assert!(msg.contains("staging_buckets"));
        assert!(msg.contains("download_dir"));
        assert!(msg.contains("ingestion_script"));
        assert!(msg.contains("metadata_file_extension"));
    }

    #[test]
    fn grouped_method_requires_grouped_pr_body() {
        let mut content = minimal_valid_config();
        content.push_str("\n[github]\nrepository = EESSI/staging\nstaging_pr_method = grouped\n");
        let err = load_from_str(&content).unwrap_err();
        assert!(err.to_string().contains("grouped_pr_body"));
    }

    #[test]
    fn parses_bucket_to_cvmfs_repo_map() {
        let map = parse_bucket_map(r#"{"bucket-a": "repo-a", "bucket-b": "repo-b"}"#).expect("parse");
        assert_eq!(map.get("bucket-a").map(String::as_str), Some("repo-a"));
        assert_eq!(map.get("bucket-b").map(String::as_str), Some("repo-b"));
    }

    #[test]
    fn rejects_non_object_bucket_config() {
        assert!(parse_bucket_map("[\"bucket-a\"]").is_err());
    }

    #[test]
    fn ingest_as_root_defaults_to_true() {
        let config = load_from_str(&minimal_valid_config()).expect("load");
        assert!(config.cvmfs.ingest_as_root);
    }

    #[test]
    fn ingest_as_root_can_be_disabled() {
        let mut content = minimal_valid_config();
        content.push_str("\n[cvmfs]\ningest_as_root = false\n");
        let config = load_from_str(&content).expect("load");
        assert!(!config.cvmfs.ingest_as_root);
    }
}
