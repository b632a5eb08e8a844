use crate::types::{ContentFile, DirEntry, FileChange, Issue, IssueState, PrState, PullRequest, Result};

/// Everything the ingestion control plane needs from a hosted state-store
/// repository. Narrow by design: one method per operation the core state
/// machine and PR controller actually perform, not a general-purpose
/// GitHub SDK surface.
pub trait GitHost: Send + Sync {
    fn get_contents(&self, path: &str, branch: &str) -> Result<ContentFile>;
    fn list_dir(&self, path: &str, branch: &str) -> Result<Vec<DirEntry>>;

    fn create_file(&self, path: &str, branch: &str, content: &[u8], message: &str) -> Result<()>;
    fn update_file(&self, path: &str, branch: &str, content: &[u8], message: &str) -> Result<()>;
    /// Idempotent: a missing file is treated as already deleted.
    fn delete_file(&self, path: &str, branch: &str, message: &str) -> Result<()>;

    /// Moves a file by deleting the source and creating the destination.
    /// Not atomic on its own; callers that need atomicity should use
    /// [`GitHost::multi_file_commit`] instead.
    fn move_file(&self, from: &str, to: &str, branch: &str, message: &str) -> Result<()> {
        let file = self.get_contents(from, branch)?;
        self.create_file(to, branch, &file.content, message)?;
        self.delete_file(from, branch, message)
    }

    fn default_branch_sha(&self) -> Result<String>;
    fn branch_exists(&self, branch: &str) -> Result<bool>;
    fn create_branch(&self, branch: &str, from_sha: &str) -> Result<()>;
    fn delete_branch(&self, branch: &str) -> Result<()>;

    /// Applies every change in one atomic commit on `branch`, via the
    /// Git Data API (tree + commit + ref update) rather than a sequence
    /// of single-file commits.
    fn multi_file_commit(&self, branch: &str, changes: &[FileChange], message: &str) -> Result<String>;

    fn merge_into_branch(&self, head: &str, base: &str, message: &str) -> Result<()>;

    fn create_pr(&self, title: &str, body: &str, head: &str, base: &str) -> Result<PullRequest>;
    fn find_pr(&self, head: &str, base: &str) -> Result<Option<PullRequest>>;
    fn edit_pr_body(&self, number: u64, body: &str) -> Result<()>;
    fn is_merged(&self, number: u64) -> Result<bool>;
    fn is_closed(&self, number: u64) -> Result<bool>;

    fn list_issues(&self, state: IssueState) -> Result<Vec<Issue>>;
    fn create_issue(&self, title: &str, body: &str) -> Result<Issue>;
}

pub(crate) fn pr_is_open(pr: &PullRequest) -> bool {
    pr.state == PrState::Open
}
