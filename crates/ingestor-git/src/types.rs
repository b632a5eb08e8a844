use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GitHostError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("git host transport error: {0}")]
    Transport(String),
}

impl GitHostError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GitHostError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, GitHostError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone)]
pub struct ContentFile {
    pub path: String,
    pub sha: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub state: PrState,
    pub merged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
}

/// One file to add, change or remove in an atomic multi-file commit.
#[derive(Debug, Clone)]
pub enum FileChange {
    Write { path: String, content: Vec<u8> },
    Delete { path: String },
}
