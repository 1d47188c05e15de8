//! Janitor for the storage directories.
//!
//! Processed images are evicted by age and by count when a policy is set.
//! Staged uploads left behind by an interrupted request are always removed
//! once they are older than one sweep interval. Only names this service
//! generates are ever touched.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant, SystemTime},
};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::service::{
    config::RetentionPolicy,
    storage::{Storage, StoredName, UploadKey},
    telemetry::spawn_thread,
};

const JANITOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Processed images older than the TTL.
    pub expired: usize,
    /// Processed images beyond the file cap.
    pub evicted: usize,
    /// Staged uploads nobody finished.
    pub orphans: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired + self.evicted + self.orphans
    }
}

/// Run one retention pass as of `now`.
pub fn sweep(storage: &Storage, policy: &RetentionPolicy, now: SystemTime) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let mut processed = list(storage.processed_dir(), |name| StoredName::parse(name).is_some())?;
    if let Some(max_age) = policy.max_age {
        processed.retain(|(path, modified)| {
            if age(now, *modified) <= max_age {
                return true;
            }
            if remove(path) {
                report.expired += 1;
            }
            false
        });
    }
    if let Some(max_files) = policy.max_files {
        if processed.len() > max_files {
            processed.sort_by(|a, b| b.1.cmp(&a.1));
            for (path, _) in processed.drain(max_files..) {
                if remove(&path) {
                    report.evicted += 1;
                }
            }
        }
    }

    for (path, modified) in list(storage.uploads_dir(), |name| UploadKey::parse(name).is_some())? {
        if age(now, modified) > policy.sweep_interval && remove(&path) {
            report.orphans += 1;
        }
    }

    metrics::counter!("pose_retention_deleted_total", "reason" => "expired")
        .increment(report.expired as u64);
    metrics::counter!("pose_retention_deleted_total", "reason" => "evicted")
        .increment(report.evicted as u64);
    metrics::counter!("pose_retention_deleted_total", "reason" => "orphan")
        .increment(report.orphans as u64);

    Ok(report)
}

fn list(dir: &Path, accept: impl Fn(&str) -> bool) -> Result<Vec<(PathBuf, SystemTime)>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let name = entry.file_name();
        if !name.to_str().is_some_and(&accept) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(err) => {
                debug!("skipping {}: {err}", entry.path().display());
                continue;
            }
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((entry.path(), modified));
    }
    Ok(files)
}

fn age(now: SystemTime, modified: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or_default()
}

fn remove(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            warn!("failed to remove {}: {err}", path.display());
            false
        }
    }
}

/// Handle for the background janitor thread.
pub struct Janitor {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Janitor {
    /// Signal the janitor to stop and wait for it.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn spawn_janitor(storage: Arc<Storage>, policy: RetentionPolicy) -> Result<Janitor> {
    let running = Arc::new(AtomicBool::new(true));
    let thread_running = running.clone();
    let handle = spawn_thread("retention-janitor", move || {
        let mut next_sweep = Instant::now() + policy.sweep_interval;
        while thread_running.load(Ordering::Relaxed) {
            thread::sleep(JANITOR_POLL_INTERVAL);
            if Instant::now() < next_sweep {
                continue;
            }
            next_sweep = Instant::now() + policy.sweep_interval;
            match sweep(&storage, &policy, SystemTime::now()) {
                Ok(report) if report.total() > 0 => info!(
                    expired = report.expired,
                    evicted = report.evicted,
                    orphans = report.orphans,
                    "retention sweep removed files"
                ),
                Ok(_) => debug!("retention sweep found nothing to remove"),
                Err(err) => warn!("retention sweep failed: {err:#}"),
            }
        }
    })
    .context("failed to spawn retention janitor")?;

    Ok(Janitor {
        running,
        handle: Some(handle),
    })
}
