//! An in-memory [`GitHost`] used by the core crate's state-machine and
//! PR-controller tests, so they can exercise full ingestion scenarios
//! without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::host::GitHost;
use crate::types::{
    ContentFile, DirEntry, EntryKind, FileChange, GitHostError, Issue, IssueState, PrState, PullRequest, Result,
};

#[derive(Default)]
struct State {
    branches: HashMap<String, HashMap<String, Vec<u8>>>,
    prs: Vec<PullRequest>,
    issues: Vec<Issue>,
    next_pr: u64,
    next_issue: u64,
}

pub struct FakeGitHost {
    state: Mutex<State>,
    default_branch: String,
}

impl FakeGitHost {
    pub fn new(default_branch: impl Into<String>) -> Self {
        let default_branch = default_branch.into();
        let mut branches = HashMap::new();
        branches.insert(default_branch.clone(), HashMap::new());
        Self {
            state: Mutex::new(State { branches, prs: Vec::new(), issues: Vec::new(), next_pr: 1, next_issue: 1 }),
            default_branch,
        }
    }

    pub fn seed_file(&self, branch: &str, path: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state
            .branches
            .entry(branch.to_string())
            .or_default()
            .insert(path.to_string(), content.to_vec());
    }

    pub fn merge_pr(&self, number: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(pr) = state.prs.iter_mut().find(|p| p.number == number) {
            pr.merged = true;
            pr.state = PrState::Closed;
        }
    }

    pub fn close_pr(&self, number: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(pr) = state.prs.iter_mut().find(|p| p.number == number) {
            pr.state = PrState::Closed;
        }
    }
}

impl GitHost for FakeGitHost {
    fn get_contents(&self, path: &str, branch: &str) -> Result<ContentFile> {
        let state = self.state.lock().unwrap();
        let files = state.branches.get(branch).ok_or_else(|| GitHostError::NotFound(branch.to_string()))?;
        let content = files.get(path).ok_or_else(|| GitHostError::NotFound(path.to_string()))?;
        Ok(ContentFile { path: path.to_string(), sha: format!("fake-{path}"), content: content.clone() })
    }

    fn list_dir(&self, path: &str, branch: &str) -> Result<Vec<DirEntry>> {
        let state = self.state.lock().unwrap();
        let files = state.branches.get(branch).ok_or_else(|| GitHostError::NotFound(branch.to_string()))?;
        let prefix = if path.is_empty() { String::new() } else { format!("{path}/") };
        let mut seen = std::collections::BTreeSet::new();
        for key in files.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                let name = rest.split('/').next().unwrap_or(rest);
                seen.insert(name.to_string());
            }
        }
        Ok(seen
            .into_iter()
            .map(|name| DirEntry { path: format!("{prefix}{name}"), name, kind: EntryKind::File })
            .collect())
    }

    fn create_file(&self, path: &str, branch: &str, content: &[u8], _message: &str) -> Result<()> {
        self.seed_file(branch, path, content);
        Ok(())
    }

    fn update_file(&self, path: &str, branch: &str, content: &[u8], _message: &str) -> Result<()> {
        self.get_contents(path, branch)?;
        self.seed_file(branch, path, content);
        Ok(())
    }

    fn delete_file(&self, path: &str, branch: &str, _message: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(files) = state.branches.get_mut(branch) {
            files.remove(path);
        }
        Ok(())
    }

    fn default_branch_sha(&self) -> Result<String> {
        Ok(format!("fake-sha-{}", self.default_branch))
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().branches.contains_key(branch))
    }

    fn create_branch(&self, branch: &str, _from_sha: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let base_files = state.branches.get(&self.default_branch).cloned().unwrap_or_default();
        state.branches.insert(branch.to_string(), base_files);
        Ok(())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.state.lock().unwrap().branches.remove(branch);
        Ok(())
    }

    fn multi_file_commit(&self, branch: &str, changes: &[FileChange], _message: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let files = state.branches.entry(branch.to_string()).or_default();
        for change in changes {
            match change {
                FileChange::Write { path, content } => {
                    files.insert(path.clone(), content.clone());
                }
                FileChange::Delete { path } => {
                    files.remove(path);
                }
            }
        }
        Ok(format!("fake-commit-{branch}"))
    }

    fn merge_into_branch(&self, head: &str, base: &str, _message: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let head_files = state.branches.get(head).cloned().ok_or_else(|| GitHostError::NotFound(head.to_string()))?;
        let base_files = state.branches.get_mut(base).ok_or_else(|| GitHostError::NotFound(base.to_string()))?;
        base_files.extend(head_files);
        Ok(())
    }

    fn create_pr(&self, title: &str, body: &str, head: &str, base: &str) -> Result<PullRequest> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_pr;
        state.next_pr += 1;
        let pr = PullRequest {
            number,
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
            state: PrState::Open,
            merged: false,
        };
        state.prs.push(pr.clone());
        Ok(pr)
    }

    fn find_pr(&self, head: &str, base: &str) -> Result<Option<PullRequest>> {
        let state = self.state.lock().unwrap();
        Ok(state.prs.iter().find(|p| p.head == head && p.base == base).cloned())
    }

    fn edit_pr_body(&self, number: u64, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state.prs.iter_mut().find(|p| p.number == number).ok_or_else(|| GitHostError::NotFound(number.to_string()))?;
        pr.body = body.to_string();
        Ok(())
    }

    fn is_merged(&self, number: u64) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.prs.iter().any(|p| p.number == number && p.merged))
    }

    fn is_closed(&self, number: u64) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.prs.iter().any(|p| p.number == number && p.state == PrState::Closed))
    }

    fn list_issues(&self, filter_state: IssueState) -> Result<Vec<Issue>> {
        let state = self.state.lock().unwrap();
        Ok(state.issues.iter().filter(|i| i.state == filter_state).cloned().collect())
    }

    fn create_issue(&self, title: &str, body: &str) -> Result<Issue> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_issue;
        state.next_issue += 1;
        let issue = Issue { number, title: title.to_string(), body: body.to_string(), state: IssueState::Open };
        state.issues.push(issue.clone());
        Ok(issue)
    }
}
