//! Invokes the CVMFS ingest script and reports the outcome: on success,
//! the caller moves the artifact's metadata into `ingested/`; on failure,
//! a de-duplicated tracking issue is filed with the full command output.

use std::path::Path;

use anyhow::Result;
use ingestor_git::{GitHost, IssueState};
use ingestor_process::CommandOutput;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Succeeded,
    IssueCreated { number: u64 },
    IssueAlreadyOpen,
}

/// Builds the ingest script's argv, prepending `sudo` when the artifact's
/// CVMFS repository is configured to require root.
pub fn build_argv(ingest_script: &Path, cvmfs_repo: &str, payload_path: &Path, ingest_as_root: bool) -> Vec<String> {
    let mut argv = Vec::new();
    if ingest_as_root {
        argv.push("sudo".to_string());
    }
    argv.push(ingest_script.to_string_lossy().into_owned());
    argv.push(cvmfs_repo.to_string());
    argv.push(payload_path.to_string_lossy().into_owned());
    argv
}

/// Reports the result of running `argv` for `artifact_name` via `git`,
/// creating or suppressing a tracking issue as appropriate.
pub fn report_outcome(
    git: &dyn GitHost,
    artifact_name: &str,
    argv: &[String],
    output: &CommandOutput,
) -> Result<IngestOutcome> {
    if output.exit_code == 0 && !output.timed_out {
        return Ok(IngestOutcome::Succeeded);
    }

    let title = format!("Ingestion failed: {artifact_name}");
    let already_open = git
        .list_issues(IssueState::Open)
        .map_err(|e| anyhow::anyhow!("failed to list open issues: {e}"))?
        .into_iter()
        .any(|issue| issue.title == title);

    if already_open {
        return Ok(IngestOutcome::IssueAlreadyOpen);
    }

    let body = format!(
        "Ingestion of `{artifact_name}` failed.\n\n\
         **argv**: `{argv:?}`\n\
         **exit code**: {}\n\
         **timed out**: {}\n\n\
         **stdout**:\n```\n{}\n```\n\n\
         **stderr**:\n```\n{}\n```\n",
        output.exit_code, output.timed_out, output.stdout, output.stderr
    );

    let issue = git
        .create_issue(&title, &body)
        .map_err(|e| anyhow::anyhow!("failed to create tracking issue: {e}"))?;
    Ok(IngestOutcome::IssueCreated { number: issue.number })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestor_git::testing::FakeGitHost;
    use std::time::Duration;

    fn output(exit_code: i32, timed_out: bool) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
            timed_out,
            duration: Duration::from_secs(1),
        }
    }

    #[test]
    fn build_argv_prepends_sudo_only_when_required() {
        let script = Path::new("/usr/local/bin/ingest.sh");
        let payload = Path::new("/tmp/foo.tar.gz");
        assert_eq!(
            build_argv(script, "software.eessi.io", payload, false),
            vec!["/usr/local/bin/ingest.sh", "software.eessi.io", "/tmp/foo.tar.gz"]
        );
        assert_eq!(
            build_argv(script, "software.eessi.io", payload, true),
            vec!["sudo", "/usr/local/bin/ingest.sh", "software.eessi.io", "/tmp/foo.tar.gz"]
        );
    }

    #[test]
    fn success_reports_succeeded_without_touching_issues() {
        let git = FakeGitHost::new("main");
        let outcome = report_outcome(&git, "foo.tar.gz", &[], &output(0, false)).unwrap();
        assert_eq!(outcome, IngestOutcome::Succeeded);
        assert!(git.list_issues(IssueState::Open).unwrap().is_empty());
    }

    #[test]
    fn failure_creates_a_tracking_issue() {
        let git = FakeGitHost::new("main");
        let outcome = report_outcome(&git, "foo.tar.gz", &["ingest.sh".into()], &output(1, false)).unwrap();
        assert!(matches!(outcome, IngestOutcome::IssueCreated { .. }));
        assert_eq!(git.list_issues(IssueState::Open).unwrap().len(), 1);
    }

    #[test]
    fn repeated_failure_does_not_duplicate_the_issue() {
        let git = FakeGitHost::new("main");
        report_outcome(&git, "foo.tar.gz", &[], &output(1, false)).unwrap();
        let second = report_outcome(&git, "foo.tar.gz", &[], &output(1, false)).unwrap();
        assert_eq!(second, IngestOutcome::IssueAlreadyOpen);
        assert_eq!(git.list_issues(IssueState::Open).unwrap().len(), 1);
    }

    #[test]
    fn timeout_is_treated_as_failure() {
        let git = FakeGitHost::new("main");
        let outcome = report_outcome(&git, "foo.tar.gz", &[], &output(0, true)).unwrap();
        assert!(matches!(outcome, IngestOutcome::IssueCreated { .. }));
    }
}
