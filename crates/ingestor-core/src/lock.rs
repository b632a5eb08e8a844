//! Pidfile-based guard ensuring only one ingestion run executes at a time.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
}

/// Holds the pidfile for the lifetime of one ingestion run; removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquires the lock at `pidfile`, failing if another run already
    /// holds it.
    pub fn acquire(pidfile: &Path) -> Result<Self> {
        if let Some(parent) = pidfile.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create pidfile directory {}", parent.display()))?;
        }

        if pidfile.exists() {
            let existing = read_lock_info(pidfile)?;
            bail!(
                "ingestion run already in progress: pid {} on {} since {}",
                existing.pid,
                existing.hostname,
                existing.acquired_at
            );
        }

        let info = LockInfo {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            acquired_at: Utc::now(),
        };

        let tmp_path = pidfile.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("failed to create pidfile tmp file {}", tmp_path.display()))?;
            let json = serde_json::to_string_pretty(&info).context("failed to serialize pidfile")?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("failed to write pidfile tmp file {}", tmp_path.display()))?;
            file.sync_all().context("failed to sync pidfile")?;
        }
        fs::rename(&tmp_path, pidfile)
            .with_context(|| format!("failed to rename pidfile into place at {}", pidfile.display()))?;

        Ok(Self { path: pidfile.to_path_buf() })
    }

    pub fn release(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove pidfile {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn read_lock_info(pidfile: &Path) -> Result<LockInfo> {
    let content = fs::read_to_string(pidfile)
        .with_context(|| format!("failed to read pidfile {}", pidfile.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse pidfile {}", pidfile.display()))
}
