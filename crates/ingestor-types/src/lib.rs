//! Domain types shared across the ingestion control plane: artifact
//! identifiers, the metadata document schema, state enums and the
//! filename convention parser.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

/// The state an artifact occupies in the directory-as-state git repository.
///
/// Mirrors the `states` table of the original handler dispatch: every
/// variant but `Unknown` corresponds 1:1 with a top-level directory name in
/// the state-store repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    New,
    Staged,
    Approved,
    Ingested,
    Rejected,
    /// Not found under any known state directory.
    Unknown,
}

impl ArtifactState {
    /// All states that correspond to a real directory in the state store,
    /// in search order (mirrors `find_state`'s iteration over `self.states`).
    pub const DIRECTORY_STATES: [ArtifactState; 5] = [
        ArtifactState::New,
        ArtifactState::Staged,
        ArtifactState::Approved,
        ArtifactState::Ingested,
        ArtifactState::Rejected,
    ];

    /// The directory name this state lives under, or `None` for `Unknown`
    /// and `New` (artifacts in the `new` state have not yet been written
    /// anywhere; see `ArtifactState::DIRECTORY_STATES`).
    pub fn directory(&self) -> Option<&'static str> {
        match self {
            ArtifactState::New => None,
            ArtifactState::Staged => Some("staged"),
            ArtifactState::Approved => Some("approved"),
            ArtifactState::Ingested => Some("ingested"),
            ArtifactState::Rejected => Some("rejected"),
            ArtifactState::Unknown => None,
        }
    }

    /// The state this one transitions into when its handler runs to
    /// completion, if any (terminal states have no next state).
    pub fn next(&self) -> Option<ArtifactState> {
        match self {
            ArtifactState::New => Some(ArtifactState::Staged),
            ArtifactState::Staged => Some(ArtifactState::Approved),
            ArtifactState::Approved => Some(ArtifactState::Ingested),
            ArtifactState::Ingested | ArtifactState::Rejected | ArtifactState::Unknown => None,
        }
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactState::New => "new",
            ArtifactState::Staged => "staged",
            ArtifactState::Approved => "approved",
            ArtifactState::Ingested => "ingested",
            ArtifactState::Rejected => "rejected",
            ArtifactState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// `task.action` from the metadata document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Nop,
    Delete,
    #[default]
    Add,
    Update,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskAction::Nop => "nop",
            TaskAction::Delete => "delete",
            TaskAction::Add => "add",
            TaskAction::Update => "update",
            TaskAction::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Components of an artifact filename, per the fixed naming convention:
///
/// ```text
/// eessi-<version>-<component>-<os>-<architecture>-<timestamp>.<suffix>
/// ```
///
/// `architecture` may itself contain hyphens (e.g. `x86_64-amd-zen2`);
/// `suffix` is everything after the first `.` and is never split further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameComponents {
    pub prefix: String,
    pub version: String,
    pub component: String,
    pub os: String,
    pub architecture: String,
    pub timestamp: String,
    pub suffix: String,
}

impl FilenameComponents {
    /// Parse a filename into its convention components.
    ///
    /// Unlike the source this is modeled on, this does not depend on two
    /// undefined local variables left over from a refactor — it derives
    /// `file_name_without_suffix` and `suffix` directly from the input.
    pub fn parse(filename: &str) -> Result<Self> {
        let (stem, suffix) = filename
            .split_once('.')
            .with_context(|| format!("filename has no suffix: {filename}"))?;

        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() < 6 {
            bail!("filename does not match the naming convention: {filename}");
        }

        let prefix = parts[0].to_string();
        let version = parts[1].to_string();
        let component = parts[2].to_string();
        let os = parts[3].to_string();
        let timestamp = parts[parts.len() - 1].to_string();
        let architecture = parts[4..parts.len() - 1].join("-");

        Ok(Self {
            prefix,
            version,
            component,
            os,
            architecture,
            timestamp,
            suffix: suffix.to_string(),
        })
    }
}

/// Identifies an artifact by its remote payload path within a staging
/// bucket. The signature and metadata paths are derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId {
    pub bucket: String,
    /// Remote key of the payload (tarball) object, e.g. `foo/bar.tar.gz`.
    pub payload_key: String,
}

impl ArtifactId {
    pub fn new(bucket: impl Into<String>, payload_key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            payload_key: payload_key.into(),
        }
    }

    /// Remote key of the payload signature object.
    pub fn signature_key(&self) -> String {
        format!("{}.sig", self.payload_key)
    }

    /// Remote key of the metadata document, with the given extension
    /// (configured per-deployment, e.g. `meta.txt`).
    pub fn metadata_key(&self, metadata_ext: &str) -> String {
        format!("{}.{}", self.payload_key, metadata_ext)
    }

    /// Remote key of the metadata document's signature.
    pub fn metadata_signature_key(&self, metadata_ext: &str) -> String {
        format!("{}.{}.sig", self.payload_key, metadata_ext)
    }

    /// Basename of the payload key.
    pub fn basename(&self) -> &str {
        self.payload_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.payload_key)
    }

    /// Local mirror path for the payload file, under `download_dir`.
    pub fn local_payload_path(&self, download_dir: &Path) -> PathBuf {
        download_dir.join(self.payload_key.trim_start_matches('/'))
    }
}

/// `link2pr` block of the metadata document: which upstream repository and
/// pull request this artifact was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link2Pr {
    pub repo: String,
    pub pr: u64,
}

impl Link2Pr {
    /// Grouping key under which sibling artifacts share a staging PR and a
    /// sequence-number namespace.
    pub fn group_key(&self) -> String {
        format!("{}#{}", self.repo, self.pr)
    }

    /// `repo` with `/` replaced by `-`, as embedded in staging branch names.
    pub fn repo_dashed(&self) -> String {
        self.repo.replace('/', "-")
    }
}

/// `task` block of the metadata document.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(default)]
    pub action: TaskAction,
    #[serde(default)]
    pub cvmfs_repo: Option<String>,
}

/// The metadata document accompanying every payload object: JSON, signed
/// independently of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub link2pr: Link2Pr,
    #[serde(default)]
    pub task: Option<TaskDescriptor>,
    pub payload: PayloadDescriptor,
}

/// `payload` block of the metadata document: checksum and size of the
/// tarball this metadata document describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    pub sha256sum: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Download-mode for the local object mirror. See `ingestor-objectstore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadMode {
    /// Always re-download regardless of local/remote ETag state.
    Force,
    /// Compare local and remote ETags; download when they differ or are
    /// unavailable.
    CheckRemote,
    /// Download only if the local file is missing.
    CheckLocal,
}

/// PR grouping mode, mirrors `staging_pr_method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingPrMethod {
    #[default]
    Individual,
    Grouped,
}

/// A single recorded lifecycle event, appended to the run's JSONL event log.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub artifact: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default)]
    pub elapsed: std::time::Duration,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Tagged union of everything worth recording about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Discovered,
    Downloaded { bytes: u64 },
    SignatureVerified { ok: bool },
    ChecksumVerified { ok: bool },
    StateChanged { from: ArtifactState, to: ArtifactState },
    PullRequestOpened { number: u64 },
    PullRequestMerged { number: u64 },
    Ingested { exit_code: i32 },
    IngestionFailed { exit_code: i32 },
    IssueCreated { number: u64, title: String },
    IssueSkippedDuplicate { title: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_filename() {
        let c =
            FilenameComponents::parse("eessi-2023.06-software-linux-x86_64-amd-zen2-1745557626.tar.gz")
                .expect("parse");
        assert_eq!(c.prefix, "eessi");
        assert_eq!(c.version, "2023.06");
        assert_eq!(c.component, "software");
        assert_eq!(c.os, "linux");
        assert_eq!(c.architecture, "x86_64-amd-zen2");
        assert_eq!(c.timestamp, "1745557626");
        assert_eq!(c.suffix, "tar.gz");
    }

    #[test]
    fn rejects_a_filename_with_no_suffix() {
        assert!(FilenameComponents::parse("eessi-2023.06-software-linux-x86_64-1745557626").is_err());
    }

    #[test]
    fn rejects_a_filename_with_too_few_components() {
        assert!(FilenameComponents::parse("eessi-2023.06.tar.gz").is_err());
    }

    #[test]
    fn artifact_id_derives_sibling_keys() {
        let id = ArtifactId::new("staging-bucket", "2023.06/foo.tar.gz");
        assert_eq!(id.signature_key(), "2023.06/foo.tar.gz.sig");
        assert_eq!(id.metadata_key("meta.txt"), "2023.06/foo.tar.gz.meta.txt");
        assert_eq!(
            id.metadata_signature_key("meta.txt"),
            "2023.06/foo.tar.gz.meta.txt.sig"
        );
        assert_eq!(id.basename(), "foo.tar.gz");
    }

    #[test]
    fn group_key_combines_repo_and_pr() {
        let l2p = Link2Pr { repo: "EESSI/software-layer".to_string(), pr: 42 };
        assert_eq!(l2p.group_key(), "EESSI/software-layer#42");
        assert_eq!(l2p.repo_dashed(), "EESSI-software-layer");
    }

    #[test]
    fn artifact_state_directory_round_trips() {
        for state in ArtifactState::DIRECTORY_STATES {
            let dir = state.directory().expect("directory state has a directory");
            assert_eq!(dir, state.to_string());
        }
        assert!(ArtifactState::New.directory().is_none());
        assert!(ArtifactState::Unknown.directory().is_none());
    }

    #[test]
    fn artifact_state_next_chain_reaches_ingested() {
        let mut state = ArtifactState::New;
        let mut steps = 0;
        while let Some(next) = state.next() {
            state = next;
            steps += 1;
            assert!(steps <= 4, "state chain should terminate quickly");
        }
        assert_eq!(state, ArtifactState::Ingested);
    }

    #[test]
    fn task_action_defaults_to_add_and_parses_unknown_as_fallback() {
        assert_eq!(TaskAction::default(), TaskAction::Add);
        let v: TaskAction = serde_json::from_str("\"frobnicate\"").unwrap();
        assert_eq!(v, TaskAction::Unknown);
    }

    #[test]
    fn metadata_document_round_trips_through_json() {
        let doc = MetadataDocument {
            link2pr: Link2Pr { repo: "EESSI/software-layer".to_string(), pr: 7 },
            task: Some(TaskDescriptor { action: TaskAction::Add, cvmfs_repo: Some("software.eessi.io".to_string()) }),
            payload: PayloadDescriptor { sha256sum: "abc123".to_string(), filename: None },
        };
        let json = serde_json::to_string(&doc).expect("serialize");
        let back: MetadataDocument = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(doc, back);
    }
}
