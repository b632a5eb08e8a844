//! State-store access: a narrow [`GitHost`] trait covering exactly what
//! the ingestion control plane needs from the hosted staging repository,
//! a GitHub REST implementation, and an in-memory test double.

mod github;
mod host;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use github::GitHubRestClient;
pub use host::GitHost;
pub use types::{
    ContentFile, DirEntry, EntryKind, FileChange, GitHostError, Issue, IssueState, PrState, PullRequest, Result,
};
