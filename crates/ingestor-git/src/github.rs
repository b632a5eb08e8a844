//! A minimal, synchronous GitHub REST client.
//!
//! Built on `reqwest::blocking` rather than an async SDK so that the
//! single-threaded ingestion loop never has to carry a runtime just to
//! talk to the state-store repository.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::json;

use crate::host::GitHost;
use crate::types::{
    ContentFile, DirEntry, EntryKind, FileChange, GitHostError, Issue, IssueState, PrState, PullRequest, Result,
};

pub struct GitHubRestClient {
    http: Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl GitHubRestClient {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("ingestor"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);

        let http = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            api_base: "https://api.github.com".to_string(),
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_base, self.owner, self.repo, suffix)
    }

    fn map_status(status: StatusCode, body: String) -> GitHostError {
        if status == StatusCode::NOT_FOUND {
            GitHostError::NotFound(body)
        } else {
            GitHostError::Transport(format!("{status}: {body}"))
        }
    }

    fn get(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(url)
            .send()
            .map_err(|e| GitHostError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_status(status, body));
        }
        serde_json::from_str(&body).map_err(|e| GitHostError::Transport(e.to_string()))
    }

    fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let resp = self
            .http
            .request(method, url)
            .json(body)
            .send()
            .map_err(|e| GitHostError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_status(status, text));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| GitHostError::Transport(e.to_string()))
    }

    fn delete(&self, url: &str, body: Option<&serde_json::Value>) -> Result<()> {
        let mut req = self.http.delete(url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().map_err(|e| GitHostError::Transport(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(Self::map_status(status, text));
        }
        Ok(())
    }

    fn head_ref_url(&self, branch: &str) -> String {
        self.repo_url(&format!("/git/ref/heads/{branch}"))
    }

    fn ref_sha(&self, branch: &str) -> Result<String> {
        let v = self.get(&self.head_ref_url(branch))?;
        v["object"]["sha"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GitHostError::Transport("malformed ref response".into()))
    }

    fn blob_sha(&self, content: &[u8]) -> Result<String> {
        let url = self.repo_url("/git/blobs");
        let body = json!({ "content": BASE64.encode(content), "encoding": "base64" });
        let v = self.send_json(reqwest::Method::POST, &url, &body)?;
        v["sha"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GitHostError::Transport("malformed blob response".into()))
    }
}

impl GitHost for GitHubRestClient {
    fn get_contents(&self, path: &str, branch: &str) -> Result<ContentFile> {
        let url = self.repo_url(&format!("/contents/{path}?ref={branch}"));
        let v = self.get(&url)?;
        let sha = v["sha"].as_str().unwrap_or_default().to_string();
        let encoded = v["content"].as_str().unwrap_or_default().replace('\n', "");
        let content = BASE64
            .decode(encoded)
            .map_err(|e| GitHostError::Transport(format!("invalid base64 content: {e}")))?;
        Ok(ContentFile { path: path.to_string(), sha, content })
    }

    fn list_dir(&self, path: &str, branch: &str) -> Result<Vec<DirEntry>> {
        let url = self.repo_url(&format!("/contents/{path}?ref={branch}"));
        let v = self.get(&url)?;
        let entries = v
            .as_array()
            .ok_or_else(|| GitHostError::Transport(format!("{path} is not a directory")))?;

        Ok(entries
            .iter()
            .map(|e| DirEntry {
                name: e["name"].as_str().unwrap_or_default().to_string(),
                path: e["path"].as_str().unwrap_or_default().to_string(),
                kind: if e["type"].as_str() == Some("dir") { EntryKind::Dir } else { EntryKind::File },
            })
            .collect())
    }

    fn create_file(&self, path: &str, branch: &str, content: &[u8], message: &str) -> Result<()> {
        let url = self.repo_url(&format!("/contents/{path}"));
        let body = json!({ "message": message, "content": BASE64.encode(content), "branch": branch });
        self.send_json(reqwest::Method::PUT, &url, &body)?;
        Ok(())
    }

    fn update_file(&self, path: &str, branch: &str, content: &[u8], message: &str) -> Result<()> {
        let existing = self.get_contents(path, branch)?;
        let url = self.repo_url(&format!("/contents/{path}"));
        let body = json!({
            "message": message,
            "content": BASE64.encode(content),
            "branch": branch,
            "sha": existing.sha,
        });
        self.send_json(reqwest::Method::PUT, &url, &body)?;
        Ok(())
    }

    fn delete_file(&self, path: &str, branch: &str, message: &str) -> Result<()> {
        let existing = match self.get_contents(path, branch) {
            Ok(f) => f,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let url = self.repo_url(&format!("/contents/{path}"));
        let body = json!({ "message": message, "sha": existing.sha, "branch": branch });
        self.delete(&url, Some(&body))
    }

    fn default_branch_sha(&self) -> Result<String> {
        let repo = self.get(&self.repo_url(""))?;
        let default_branch = repo["default_branch"]
            .as_str()
            .ok_or_else(|| GitHostError::Transport("missing default_branch".into()))?;
        self.ref_sha(default_branch)
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        match self.ref_sha(branch) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_branch(&self, branch: &str, from_sha: &str) -> Result<()> {
        let url = self.repo_url("/git/refs");
        let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": from_sha });
        self.send_json(reqwest::Method::POST, &url, &body)?;
        Ok(())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.delete(&self.repo_url(&format!("/git/refs/heads/{branch}")), None)
    }

    fn multi_file_commit(&self, branch: &str, changes: &[FileChange], message: &str) -> Result<String> {
        let parent_sha = self.ref_sha(branch)?;
        let parent_commit = self.get(&self.repo_url(&format!("/git/commits/{parent_sha}")))?;
        let base_tree = parent_commit["tree"]["sha"]
            .as_str()
            .ok_or_else(|| GitHostError::Transport("malformed parent commit".into()))?;

        let mut tree_entries = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                FileChange::Write { path, content } => {
                    let blob = self.blob_sha(content)?;
                    tree_entries.push(json!({
                        "path": path, "mode": "100644", "type": "blob", "sha": blob,
                    }));
                }
                FileChange::Delete { path } => {
                    tree_entries.push(json!({
                        "path": path, "mode": "100644", "type": "blob", "sha": serde_json::Value::Null,
                    }));
                }
            }
        }

        let tree_url = self.repo_url("/git/trees");
        let tree_body = json!({ "base_tree": base_tree, "tree": tree_entries });
        let tree = self.send_json(reqwest::Method::POST, &tree_url, &tree_body)?;
        let tree_sha = tree["sha"]
            .as_str()
            .ok_or_else(|| GitHostError::Transport("malformed tree response".into()))?;

        let commit_url = self.repo_url("/git/commits");
        let commit_body = json!({ "message": message, "tree": tree_sha, "parents": [parent_sha] });
        let commit = self.send_json(reqwest::Method::POST, &commit_url, &commit_body)?;
        let commit_sha = commit["sha"]
            .as_str()
            .ok_or_else(|| GitHostError::Transport("malformed commit response".into()))?
            .to_string();

        let ref_url = self.repo_url(&format!("/git/refs/heads/{branch}"));
        let ref_body = json!({ "sha": commit_sha, "force": false });
        self.send_json(reqwest::Method::PATCH, &ref_url, &ref_body)?;

        Ok(commit_sha)
    }

    fn merge_into_branch(&self, head: &str, base: &str, message: &str) -> Result<()> {
        let url = self.repo_url("/merges");
        let body = json!({ "base": base, "head": head, "commit_message": message });
        self.send_json(reqwest::Method::POST, &url, &body)?;
        Ok(())
    }

    fn create_pr(&self, title: &str, body: &str, head: &str, base: &str) -> Result<PullRequest> {
        let url = self.repo_url("/pulls");
        let req = json!({ "title": title, "body": body, "head": head, "base": base });
        let v = self.send_json(reqwest::Method::POST, &url, &req)?;
        parse_pr(&v)
    }

    fn find_pr(&self, head: &str, base: &str) -> Result<Option<PullRequest>> {
        let url = self.repo_url(&format!("/pulls?head={}:{head}&base={base}&state=all", self.owner));
        let v = self.get(&url)?;
        let arr = v.as_array().cloned().unwrap_or_default();
        match arr.first() {
            Some(pr) => Ok(Some(parse_pr(pr)?)),
            None => Ok(None),
        }
    }

    fn edit_pr_body(&self, number: u64, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("/pulls/{number}"));
        self.send_json(reqwest::Method::PATCH, &url, &json!({ "body": body }))?;
        Ok(())
    }

    fn is_merged(&self, number: u64) -> Result<bool> {
        let url = self.repo_url(&format!("/pulls/{number}/merge"));
        match self.get(&url) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn is_closed(&self, number: u64) -> Result<bool> {
        let url = self.repo_url(&format!("/pulls/{number}"));
        let v = self.get(&url)?;
        Ok(v["state"].as_str() == Some("closed"))
    }

    fn list_issues(&self, state: IssueState) -> Result<Vec<Issue>> {
        let state_str = match state {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        };
        let url = self.repo_url(&format!("/issues?state={state_str}"));
        let v = self.get(&url)?;
        let arr = v.as_array().cloned().unwrap_or_default();
        Ok(arr
            .iter()
            .filter(|i| i["pull_request"].is_null())
            .map(parse_issue)
            .collect::<Result<Vec<_>>>()?)
    }

    fn create_issue(&self, title: &str, body: &str) -> Result<Issue> {
        let url = self.repo_url("/issues");
        let v = self.send_json(reqwest::Method::POST, &url, &json!({ "title": title, "body": body }))?;
        parse_issue(&v)
    }
}

fn parse_pr(v: &serde_json::Value) -> Result<PullRequest> {
    Ok(PullRequest {
        number: v["number"].as_u64().unwrap_or_default(),
        title: v["title"].as_str().unwrap_or_default().to_string(),
        body: v["body"].as_str().unwrap_or_default().to_string(),
        head: v["head"]["ref"].as_str().unwrap_or_default().to_string(),
        base: v["base"]["ref"].as_str().unwrap_or_default().to_string(),
        state: if v["state"].as_str() == Some("closed") { PrState::Closed } else { PrState::Open },
        merged: v["merged"].as_bool().unwrap_or(false),
    })
}

fn parse_issue(v: &serde_json::Value) -> Result<Issue> {
    Ok(Issue {
        number: v["number"].as_u64().unwrap_or_default(),
        title: v["title"].as_str().unwrap_or_default().to_string(),
        body: v["body"].as_str().unwrap_or_default().to_string(),
        state: if v["state"].as_str() == Some("closed") { IssueState::Closed } else { IssueState::Open },
    })
}
