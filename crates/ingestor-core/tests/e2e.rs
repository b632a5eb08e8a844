//! End-to-end scenarios against [`FakeGitHost`], covering the full
//! lifecycle a single artifact walks through the state machine, the PR
//! controller, and the ingestion executor.

use ingestor_core::{ingest, machine, pr};
use ingestor_git::testing::FakeGitHost;
use ingestor_git::{GitHost, IssueState};
use ingestor_process::CommandOutput;
use ingestor_types::{ArtifactState, Link2Pr, TaskAction};
use std::path::Path;
use std::time::Duration;

/// S1: a fresh `Add` artifact is staged, approved via a merged PR, and
/// successfully ingested.
#[test]
fn happy_path_from_new_to_ingested() {
    let git = FakeGitHost::new("main");
    let link2pr = Link2Pr { repo: "EESSI/software-layer".to_string(), pr: 7 };

    assert_eq!(machine::decide(TaskAction::Add, ArtifactState::New), machine::StepOutcome::Stage);

    let branch = pr::staging_branch_name(&link2pr, 1);
    git.create_branch(&branch, "sha").unwrap();
    let title = pr::individual_pr_title("foo.tar.gz", &link2pr);
    let request = git.create_pr(&title, "initial body", &branch, "main").unwrap();

    assert_eq!(machine::decide(TaskAction::Add, ArtifactState::Staged), machine::StepOutcome::AwaitApproval);
    assert!(!git.is_merged(request.number).unwrap());

    git.merge_pr(request.number);
    assert!(git.is_merged(request.number).unwrap());

    assert_eq!(machine::decide(TaskAction::Add, ArtifactState::Approved), machine::StepOutcome::Ingest);

    let argv = ingest::build_argv(Path::new("/usr/local/bin/ingest.sh"), "software.eessi.io", Path::new("/tmp/foo.tar.gz"), false);
    let output = CommandOutput { exit_code: 0, stdout: String::new(), stderr: String::new(), timed_out: false, duration: Duration::from_secs(1) };
    let outcome = ingest::report_outcome(&git, "foo.tar.gz", &argv, &output).unwrap();

    assert_eq!(outcome, ingest::IngestOutcome::Succeeded);
    assert_eq!(machine::decide(TaskAction::Add, ArtifactState::Ingested), machine::StepOutcome::Terminal);
    assert!(git.list_issues(IssueState::Open).unwrap().is_empty());
}

/// S4-equivalent: a failing ingest script files exactly one tracking
/// issue even across repeated scheduler passes over the same artifact.
#[test]
fn failed_ingest_opens_a_single_deduplicated_issue() {
    let git = FakeGitHost::new("main");
    let argv = vec!["ingest.sh".to_string()];
    let output = CommandOutput {
        exit_code: 1,
        stdout: "partial output".to_string(),
        stderr: "boom".to_string(),
        timed_out: false,
        duration: Duration::from_secs(1),
    };

    let first = ingest::report_outcome(&git, "foo.tar.gz", &argv, &output).unwrap();
    let second = ingest::report_outcome(&git, "foo.tar.gz", &argv, &output).unwrap();

    assert!(matches!(first, ingest::IngestOutcome::IssueCreated { .. }));
    assert_eq!(second, ingest::IngestOutcome::IssueAlreadyOpen);
    assert_eq!(git.list_issues(IssueState::Open).unwrap().len(), 1);
}

/// Non-`Add` actions never advance the state machine, regardless of the
/// artifact's current state.
#[test]
fn non_add_actions_are_inert() {
    for state in ArtifactState::DIRECTORY_STATES {
        for action in [TaskAction::Nop, TaskAction::Delete, TaskAction::Update, TaskAction::Unknown] {
            assert!(matches!(machine::decide(action, state), machine::StepOutcome::Skip { .. }));
        }
    }
}

/// Grouped-mode approval: a staging PR only advances once every member's
/// checkbox is checked.
#[test]
fn grouped_pr_requires_every_checkbox_before_merge() {
    let git = FakeGitHost::new("main");
    let link2pr = Link2Pr { repo: "EESSI/software-layer".to_string(), pr: 9 };
    let branch = pr::staging_branch_name(&link2pr, 1);
    git.create_branch(&branch, "sha").unwrap();

    let body = "- [x] a.tar.gz\n- [ ] b.tar.gz\n";
    let title = pr::grouped_pr_title(&link2pr, 2);
    let request = git.create_pr(&title, body, &branch, "main").unwrap();

    assert!(!pr::all_approved(&request.body));

    git.edit_pr_body(request.number, "- [x] a.tar.gz\n- [x] b.tar.gz\n").unwrap();
    let updated = git.find_pr(&branch, "main").unwrap().unwrap();
    assert!(pr::all_approved(&updated.body));
}
