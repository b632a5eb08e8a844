use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use ingestor_config::Config;
use ingestor_core::{events, ingest, lock, logging, machine, pr, scheduler};
use ingestor_git::{FileChange, GitHost, GitHubRestClient, IssueState};
use ingestor_objectstore::{BucketConfig, DownloadMode, LocalMirror, RemoteObjectClient};
use ingestor_types::{ArtifactState, Link2Pr, MetadataDocument, StagingPrMethod};
use ingestor_verify::VerifierConfig;

#[derive(Parser, Debug)]
#[command(name = "ingestor", version, about = "Ingestion control plane for the staging bucket -> CVMFS pipeline")]
struct Cli {
    /// Path to the INI configuration file.
    #[arg(short = 'c', long = "config", default_value = "ingestor.conf")]
    config: PathBuf,

    /// Run at debug verbosity.
    #[arg(short = 'd', long)]
    debug: bool,

    /// List discovered tasks and their states without acting on them.
    #[arg(short = 'l', long)]
    list: bool,

    /// Suppress console logging (file logging, if configured, is unaffected).
    #[arg(long)]
    quiet: bool,

    /// Override the configured log file path.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Override the configured console log level.
    #[arg(long)]
    console_level: Option<String>,

    /// Override the configured file log level.
    #[arg(long)]
    file_level: Option<String>,

    /// Override the configured log scopes expression (e.g. "+git,-objectstore").
    #[arg(long)]
    log_scopes: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ingestor_config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e:#}", cli.config.display());
            return ExitCode::from(1);
        }
    };

    let _guard = init_logging(&cli, &config);

    match run(&cli, &config) {
        Ok(()) => ExitCode::from(0),
        Err(e) if e.downcast_ref::<LockBusy>().is_some() => {
            warn!("{e:#}");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct LockBusy(String);

fn init_logging(cli: &Cli, config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_level = cli
        .console_level
        .clone()
        .or_else(|| config.logging.console_level.clone())
        .unwrap_or_else(|| if cli.debug { "debug".to_string() } else { "info".to_string() });
    let file_level = cli.file_level.clone().or_else(|| config.logging.file_level.clone()).unwrap_or_else(|| console_level.clone());
    let scopes = cli.log_scopes.clone().or_else(|| config.logging.scopes.clone());

    let registry = tracing_subscriber::registry();

    let (file_layer, guard) = match cli.log_file.clone().or_else(|| config.logging.log_file.clone()) {
        Some(path) => {
            let directive = logging::build_filter_directives(scopes.as_deref(), &file_level);
            let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "ingestor.log".to_string());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false).with_filter(filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = (!cli.quiet).then(|| {
        let directive = logging::build_filter_directives(scopes.as_deref(), &console_level);
        let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt::layer().with_filter(filter)
    });

    let _ = registry.with(console_layer).with(file_layer).try_init();
    guard
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    let mut run_lock = lock::RunLock::acquire(&config.paths.pidfile).map_err(|e| anyhow::Error::new(LockBusy(e.to_string())))?;

    let mut events_log = events::EventLog::new();
    let result = run_inner(cli, config, &mut events_log);

    let state_dir = config.paths.pidfile.parent().unwrap_or_else(|| std::path::Path::new("."));
    if let Err(e) = events_log.write_to_file(&events::events_path(state_dir)) {
        warn!("failed to persist event log: {e:#}");
    }
    run_lock.release().ok();

    result
}

/// Buckets are independent: each owns its own object-store client and its
/// own re-dispatch loop, so a bounded pool of worker threads (one per
/// bucket, up to this cap) processes them concurrently rather than the
/// control plane waiting on one slow bucket before looking at the next.
/// Tasks within a single bucket remain strictly serial.
const MAX_BUCKET_WORKERS: usize = 4;

fn run_inner(cli: &Cli, config: &Config, events_log: &mut events::EventLog) -> Result<()> {
    let (owner, repo) = config
        .github
        .repository
        .split_once('/')
        .context("[github] repository must be formatted as owner/repo")?;
    let git: Box<dyn GitHost> = Box::new(GitHubRestClient::new(owner, repo, &config.secrets.github_token)?);

    let verifier = VerifierConfig {
        verify_script: config.signatures.verify_script.clone(),
        allowed_signers_file: config.signatures.allowed_signers_file.clone(),
        timeout: Some(Duration::from_secs(60)),
    };

    // Each staging bucket feeds exactly one CVMFS repo, per the
    // `aws.staging_buckets` bucket->cvmfsRepo mapping.
    let buckets: Vec<(&String, &String)> = config.aws.staging_buckets.iter().collect();

    for batch in buckets.chunks(MAX_BUCKET_WORKERS) {
        let results: Vec<Result<events::EventLog>> = std::thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|pair| {
                    let (bucket_name, cvmfs_repo): (&String, &String) = *pair;
                    let git = git.as_ref();
                    let verifier = &verifier;
                    scope.spawn(move || {
                        let bucket_config = BucketConfig {
                            bucket: bucket_name.clone(),
                            region: config.aws.region.clone(),
                            access_key: config.secrets.aws_access_key_id.clone(),
                            secret_key: config.secrets.aws_secret_access_key.clone(),
                            endpoint_url: config.aws.endpoint_url.clone(),
                        };
                        let client = RemoteObjectClient::new(&bucket_config)?;
                        let mut bucket_events = events::EventLog::new();
                        scheduler::run_until_stable(|| {
                            process_bucket_once(cli, config, bucket_name, cvmfs_repo, &client, git, verifier, &mut bucket_events)
                        })?;
                        Ok(bucket_events)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Err(anyhow::anyhow!("bucket worker thread panicked")))).collect()
        });

        for result in results {
            events_log.merge(result?);
        }
    }

    Ok(())
}

fn process_bucket_once(
    cli: &Cli,
    config: &Config,
    bucket: &str,
    cvmfs_repo: &str,
    client: &RemoteObjectClient,
    git: &dyn GitHost,
    verifier: &VerifierConfig,
    events_log: &mut events::EventLog,
) -> Result<usize> {
    let objects = client.list(None)?;
    let tasks = scheduler::discover_tasks(bucket, &objects, &config.paths.metadata_file_extension);

    if cli.list {
        for task in &tasks {
            println!("{}", task.artifact.payload_key);
        }
        return Ok(0);
    }

    let mut processed = 0usize;
    for task in tasks {
        let metadata_filename = task.metadata_key.rsplit('/').next().unwrap_or(&task.metadata_key).to_string();
        let state = find_state(git, "main", &metadata_filename)?;

        let metadata = match load_metadata(git, client, config, &task.metadata_key, &metadata_filename, state) {
            Ok(m) => m,
            Err(e) => {
                warn!(artifact = %task.artifact.payload_key, "failed to load metadata: {e:#}");
                continue;
            }
        };
        let action = metadata.task.as_ref().map(|t| t.action).unwrap_or_default();

        match machine::decide(action, state) {
            machine::StepOutcome::Skip { reason } => {
                info!(artifact = %task.artifact.payload_key, "{reason}");
            }
            machine::StepOutcome::Stage => {
                stage_artifact(config, client, git, verifier, cvmfs_repo, &task.artifact, &metadata, &metadata_filename)?;
                processed += 1;
            }
            machine::StepOutcome::AwaitApproval => {
                try_advance_staged(config, git, cvmfs_repo, &metadata.link2pr, &metadata_filename, task.artifact.basename())?;
            }
            machine::StepOutcome::Approve => {}
            machine::StepOutcome::Ingest => {
                ingest_artifact(config, git, cvmfs_repo, &task.artifact, &metadata_filename, events_log)?;
                processed += 1;
            }
            machine::StepOutcome::Terminal => {}
        }
    }

    Ok(processed)
}

fn find_state(git: &dyn GitHost, branch: &str, metadata_filename: &str) -> Result<ArtifactState> {
    for state in ArtifactState::DIRECTORY_STATES {
        if let Some(dir) = state.directory() {
            let path = format!("{dir}/{metadata_filename}");
            if git.get_contents(&path, branch).is_ok() {
                return Ok(state);
            }
        }
    }
    Ok(ArtifactState::New)
}

fn load_metadata(
    git: &dyn GitHost,
    client: &RemoteObjectClient,
    config: &Config,
    metadata_key: &str,
    metadata_filename: &str,
    state: ArtifactState,
) -> Result<MetadataDocument> {
    let bytes = if state == ArtifactState::New {
        let local = config.paths.download_dir.join(metadata_filename);
        client.get(metadata_key, &local)?;
        std::fs::read(&local)?
    } else {
        let dir = state.directory().context("non-New state must have a directory")?;
        git.get_contents(&format!("{dir}/{metadata_filename}"), "main").map(|f| f.content).map_err(|e| anyhow::anyhow!("{e}"))?
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Creates a tracking issue titled `title` unless one with the same title
/// is already open. Mandatory for every issue-creating path so a flapping
/// verification failure doesn't spam a new issue on every poll.
fn file_issue_if_absent(git: &dyn GitHost, title: &str, body: &str) -> Result<()> {
    let already_open = git
        .list_issues(IssueState::Open)
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .into_iter()
        .any(|issue| issue.title == title);
    if already_open {
        return Ok(());
    }
    git.create_issue(title, body).map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(())
}

fn ensure_staging_branch(git: &dyn GitHost, branch: &str) -> Result<()> {
    if !git.branch_exists(branch).map_err(|e| anyhow::anyhow!("{e}"))? {
        let base_sha = git.default_branch_sha().map_err(|e| anyhow::anyhow!("{e}"))?;
        git.create_branch(branch, &base_sha).map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    Ok(())
}

/// Opens the staging PR for `link2pr` on `branch`, or, in grouped mode,
/// accretes `artifact_basename` onto the PR that already exists for this
/// `(repo, pr)` pair as a new pending checkbox line.
fn ensure_staging_pr(
    config: &Config,
    git: &dyn GitHost,
    branch: &str,
    cvmfs_repo: &str,
    link2pr: &Link2Pr,
    artifact_basename: &str,
) -> Result<()> {
    match git.find_pr(branch, "main").map_err(|e| anyhow::anyhow!("{e}"))? {
        None => {
            let (title, body) = match config.github.staging_pr_method {
                StagingPrMethod::Individual => {
                    let title = pr::individual_pr_title(cvmfs_repo, artifact_basename);
                    let template = config.github.individual_pr_body.as_deref().unwrap_or("Staging {artifact}");
                    let body = pr::render_body(template, &[("artifact", artifact_basename)]);
                    (title, body)
                }
                StagingPrMethod::Grouped => {
                    let title = pr::grouped_pr_title(cvmfs_repo, link2pr, 1);
                    let template = config.github.grouped_pr_body.as_deref().unwrap_or("Staging PR for {repo}#{pr}");
                    let pr_number = link2pr.pr.to_string();
                    let rendered = pr::render_body(template, &[("repo", &link2pr.repo), ("pr", &pr_number)]);
                    let body = format!("{rendered}\n\n- [ ] {artifact_basename}\n");
                    (title, body)
                }
            };
            git.create_pr(&title, &body, branch, "main").map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        Some(existing) if config.github.staging_pr_method == StagingPrMethod::Grouped => {
            let already_listed = pr::decode_checkboxes(&existing.body).iter().any(|(key, _)| key == artifact_basename);
            if !already_listed {
                let updated_body = format!("{}\n- [ ] {artifact_basename}\n", existing.body.trim_end());
                git.edit_pr_body(existing.number, &updated_body).map_err(|e| anyhow::anyhow!("{e}"))?;
            }
        }
        Some(_) => {}
    }
    Ok(())
}

/// Moves a metadata file's content from one state directory to another on
/// the default branch, in a single atomic commit.
fn move_metadata(git: &dyn GitHost, metadata_filename: &str, from_dir: &str, to_dir: &str) -> Result<()> {
    let file = git
        .get_contents(&format!("{from_dir}/{metadata_filename}"), "main")
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    git.multi_file_commit(
        "main",
        &[
            FileChange::Delete { path: format!("{from_dir}/{metadata_filename}") },
            FileChange::Write { path: format!("{to_dir}/{metadata_filename}"), content: file.content },
        ],
        &format!("Move {metadata_filename}: {from_dir} -> {to_dir}"),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(())
}

fn stage_artifact(
    config: &Config,
    client: &RemoteObjectClient,
    git: &dyn GitHost,
    verifier: &VerifierConfig,
    cvmfs_repo: &str,
    artifact: &ingestor_types::ArtifactId,
    metadata: &MetadataDocument,
    metadata_filename: &str,
) -> Result<()> {
    let payload_path = artifact.local_payload_path(&config.paths.download_dir);
    let signature_path = payload_path.with_extension(format!(
        "{}.sig",
        payload_path.extension().and_then(|e| e.to_str()).unwrap_or_default()
    ));

    let mirror = LocalMirror::new(client);
    mirror.ensure(
        &artifact.payload_key,
        &artifact.signature_key(),
        &payload_path,
        &signature_path,
        DownloadMode::CheckRemote,
        config.signatures.required,
    )?;

    let sig_ok = ingestor_verify::verify_signature(verifier, &payload_path, &signature_path, config.signatures.required)?;
    if !sig_ok {
        warn!(artifact = %artifact.payload_key, "signature verification failed");
        file_issue_if_absent(
            git,
            &format!("Failed to verify signatures for '{}'", artifact.payload_key),
            &format!("Signature verification failed for `{}`.", artifact.payload_key),
        )?;
        return Ok(());
    }

    let checksum_ok = ingestor_verify::verify_checksum(&payload_path, &metadata.payload.sha256sum)?;
    if !checksum_ok {
        warn!(artifact = %artifact.payload_key, "checksum mismatch");
        file_issue_if_absent(
            git,
            &format!("Failed to verify checksum for '{}'", artifact.payload_key),
            &format!(
                "Checksum mismatch for `{}`: expected `{}`.",
                artifact.payload_key, metadata.payload.sha256sum
            ),
        )?;
        return Ok(());
    }

    let branch = pr::staging_branch_name(&metadata.link2pr, 1);
    ensure_staging_branch(git, &branch)?;

    let metadata_json = serde_json::to_vec_pretty(metadata)?;
    git.multi_file_commit(
        &branch,
        &[FileChange::Write { path: format!("staged/{metadata_filename}"), content: metadata_json }],
        &format!("Stage {metadata_filename}"),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    ensure_staging_pr(config, git, &branch, cvmfs_repo, &metadata.link2pr, artifact.basename())
}

/// Polls the staging PR for a `Staged` artifact, replicating
/// `make_approval_request`'s branch/PR-state decision tree:
/// - PR open: wait.
/// - PR closed and merged: move to `approved/` (or `rejected/` for an
///   unchecked artifact in grouped mode).
/// - PR closed and not merged: move to `rejected/`.
/// - branch exists with no matching PR: self-repair by deleting the
///   branch and re-opening a fresh one.
fn try_advance_staged(
    config: &Config,
    git: &dyn GitHost,
    cvmfs_repo: &str,
    link2pr: &Link2Pr,
    metadata_filename: &str,
    artifact_basename: &str,
) -> Result<()> {
    let branch = pr::staging_branch_name(link2pr, 1);
    if !git.branch_exists(&branch).map_err(|e| anyhow::anyhow!("{e}"))? {
        return Ok(());
    }

    let Some(request) = git.find_pr(&branch, "main").map_err(|e| anyhow::anyhow!("{e}"))? else {
        git.delete_branch(&branch).map_err(|e| anyhow::anyhow!("{e}"))?;
        ensure_staging_branch(git, &branch)?;
        return ensure_staging_pr(config, git, &branch, cvmfs_repo, link2pr, artifact_basename);
    };

    if !git.is_closed(request.number).map_err(|e| anyhow::anyhow!("{e}"))? {
        return Ok(());
    }

    if !git.is_merged(request.number).map_err(|e| anyhow::anyhow!("{e}"))? {
        move_metadata(git, metadata_filename, "staged", "rejected")?;
        return Ok(());
    }

    let approved = match config.github.staging_pr_method {
        StagingPrMethod::Individual => Some(true),
        StagingPrMethod::Grouped => pr::decode_checkboxes(&request.body)
            .into_iter()
            .find(|(key, _)| key == artifact_basename)
            .map(|(_, checked)| checked),
    };

    match approved {
        Some(true) => move_metadata(git, metadata_filename, "staged", "approved")?,
        Some(false) => move_metadata(git, metadata_filename, "staged", "rejected")?,
        None => {}
    }

    Ok(())
}

fn ingest_artifact(
    config: &Config,
    git: &dyn GitHost,
    cvmfs_repo: &str,
    artifact: &ingestor_types::ArtifactId,
    metadata_filename: &str,
    events_log: &mut events::EventLog,
) -> Result<()> {
    let payload_path = artifact.local_payload_path(&config.paths.download_dir);
    let argv = ingest::build_argv(&config.paths.ingestion_script, cvmfs_repo, &payload_path, config.cvmfs.ingest_as_root);

    let (program, args) = argv.split_first().context("empty ingest argv")?;
    let output = ingestor_process::run_command_with_timeout(program, &args.iter().map(String::as_str).collect::<Vec<_>>(), &config.paths.download_dir, Some(Duration::from_secs(3600)))?;

    let outcome = ingest::report_outcome(git, artifact.basename(), &argv, &output).map_err(|e| anyhow::anyhow!("{e}"))?;

    match outcome {
        ingest::IngestOutcome::Succeeded => {
            move_metadata(git, metadata_filename, "approved", "ingested")?;

            if let Some(slack) = &config.slack {
                let webhook_config = ingestor_webhook::WebhookConfig::new(slack.webhook.clone());
                if let Err(e) = ingestor_webhook::send_webhook(&webhook_config, &format!("Ingested {}", artifact.basename())) {
                    warn!("webhook notification failed: {e:#}");
                }
            }

            events_log.record(ingestor_types::IngestionEvent {
                timestamp: chrono::Utc::now(),
                artifact: artifact.payload_key.clone(),
                elapsed: Duration::from_secs(0),
                kind: ingestor_types::EventKind::Ingested { exit_code: output.exit_code },
            });
        }
        ingest::IngestOutcome::IssueCreated { .. } | ingest::IngestOutcome::IssueAlreadyOpen => {
            events_log.record(ingestor_types::IngestionEvent {
                timestamp: chrono::Utc::now(),
                artifact: artifact.payload_key.clone(),
                elapsed: Duration::from_secs(0),
                kind: ingestor_types::EventKind::IngestionFailed { exit_code: output.exit_code },
            });
        }
    }

    Ok(())
}
