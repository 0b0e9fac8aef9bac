// Copyright (C) 2022 Cendyne.
// This file is part of Frame Server.

// Frame Server is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// Frame Server is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cloud_sync::{self, CloudSync};
use crate::error::Error;
use crate::models::{BackupLog, BackupRun, RunStatus};
use crate::store::JsonStore;

pub const TRANSFER_TIMEOUT_SECS: u64 = 3600;

/// A lock older than this is assumed to belong to a crashed process and is
/// reclaimed. Twice the worst-case transfer.
pub const LOCK_STALE_SECS: i64 = 2 * TRANSFER_TIMEOUT_SECS as i64;

pub const HISTORY_LIMIT: usize = 30;

/// Never shipped off the machine: credentials, locks and tokens.
pub const DATA_EXCLUDES: &[&str] = &[
    "rclone/**",
    ".backup.lock",
    ".*.lock",
    ".manage_token",
    ".admin_token",
    ".display_token",
];

/// Cooperative exclusion between whole backup/restore runs. Coarser than the
/// store lock and file-based so it works across processes; the holder's
/// timestamp lives in the file for staleness checks.
pub struct BackupLock {
    path: PathBuf,
}

#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    // release must happen on every exit path, success or not
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl BackupLock {
    pub fn new(data_dir: &Path) -> Self {
        BackupLock {
            path: data_dir.join(".backup.lock"),
        }
    }

    pub fn acquire(&self) -> Result<LockGuard, Error> {
        match self.try_create() {
            Ok(guard) => Ok(guard),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if self.holder_is_stale() {
                    println!(
                        "Reclaiming stale backup lock {}",
                        self.path.display()
                    );
                    let _ = std::fs::remove_file(&self.path);
                    match self.try_create() {
                        Ok(guard) => Ok(guard),
                        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                            Err(Error::AlreadyRunning)
                        }
                        Err(err) => Err(Error::storage(err)),
                    }
                } else {
                    Err(Error::AlreadyRunning)
                }
            }
            Err(err) => Err(Error::storage(err)),
        }
    }

    fn try_create(&self) -> std::io::Result<LockGuard> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        write!(file, "{}", Utc::now().timestamp())?;
        Ok(LockGuard {
            path: self.path.clone(),
        })
    }

    fn holder_is_stale(&self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match content.trim().parse::<i64>() {
                Ok(held_at) => Utc::now().timestamp() - held_at > LOCK_STALE_SECS,
                // a lock file we cannot read the holder out of is a crash
                // leftover
                Err(_) => true,
            },
            Err(_) => true,
        }
    }
}

pub struct BackupOrchestrator {
    data_dir: PathBuf,
    uploads_dir: PathBuf,
    lock: BackupLock,
    log: JsonStore<BackupLog>,
    backup_running: AtomicBool,
    restore_running: AtomicBool,
}

impl BackupOrchestrator {
    pub fn new(data_dir: PathBuf, uploads_dir: PathBuf) -> Self {
        BackupOrchestrator {
            lock: BackupLock::new(&data_dir),
            log: JsonStore::open(&data_dir, "backup_log"),
            data_dir,
            uploads_dir,
            backup_running: AtomicBool::new(false),
            restore_running: AtomicBool::new(false),
        }
    }

    pub fn configured(&self) -> bool {
        cloud_sync::is_configured(&self.data_dir)
    }

    pub fn backup_running(&self) -> bool {
        self.backup_running.load(Ordering::SeqCst)
    }

    pub fn restore_running(&self) -> bool {
        self.restore_running.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Result<BackupLog, Error> {
        self.log.load()
    }

    pub fn history(&self) -> Result<Vec<BackupRun>, Error> {
        Ok(self.log.load()?.history)
    }

    /// One full backup run. The store lock is never held across the
    /// transfer; only the history append at the end is a store write. A
    /// failed transfer is a recorded result, not an error.
    pub fn run(&self, sync: &dyn CloudSync, remote_path: &str) -> Result<BackupRun, Error> {
        if !self.configured() {
            return Err(Error::validation("backup is not configured"));
        }
        let _guard = self.lock.acquire()?;
        self.backup_running.store(true, Ordering::SeqCst);
        let run = self.transfer(sync, remote_path);
        self.backup_running.store(false, Ordering::SeqCst);
        let run = run?;
        self.record(&run)?;
        Ok(run)
    }

    fn transfer(&self, sync: &dyn CloudSync, remote_path: &str) -> Result<BackupRun, Error> {
        let started = Utc::now();
        let outcome = sync
            .push(&self.uploads_dir, &format!("{}/uploads", remote_path), &[])
            .and_then(|uploads| {
                sync.push(
                    &self.data_dir,
                    &format!("{}/data", remote_path),
                    DATA_EXCLUDES,
                )
                .map(|data| match (uploads.bytes, data.bytes) {
                    (Some(a), Some(b)) => Some(a + b),
                    (a, b) => a.or(b),
                })
            });
        let finished = Utc::now();
        Ok(match outcome {
            Ok(bytes) => BackupRun {
                started_at: started.to_rfc3339(),
                finished_at: finished.to_rfc3339(),
                status: RunStatus::Success,
                detail: None,
                bytes,
            },
            Err(err) => {
                eprintln!("Backup transfer failed: {}", err);
                BackupRun {
                    started_at: started.to_rfc3339(),
                    finished_at: finished.to_rfc3339(),
                    status: RunStatus::Error,
                    detail: Some(err),
                    bytes: None,
                }
            }
        })
    }

    pub fn record(&self, run: &BackupRun) -> Result<(), Error> {
        self.log.update(|log| {
            log.last_backup = Some(run.started_at.clone());
            log.last_result = Some(run.status);
            log.last_error = run.detail.clone();
            log.history.push(run.clone());
            if log.history.len() > HISTORY_LIMIT {
                let excess = log.history.len() - HISTORY_LIMIT;
                log.history.drain(..excess);
            }
            Ok(())
        })
    }

    /// Pulls the remote copy back down under the same lock, so a backup and
    /// a restore can never run over each other.
    pub fn restore(&self, sync: &dyn CloudSync, remote_path: &str) -> Result<(), Error> {
        if !self.configured() {
            return Err(Error::validation("backup is not configured"));
        }
        let _guard = self.lock.acquire()?;
        self.restore_running.store(true, Ordering::SeqCst);
        let outcome = sync
            .pull(
                &format!("{}/uploads", remote_path),
                &self.uploads_dir,
                &[],
            )
            .and_then(|_| {
                sync.pull(
                    &format!("{}/data", remote_path),
                    &self.data_dir,
                    DATA_EXCLUDES,
                )
            });
        self.restore_running.store(false, Ordering::SeqCst);
        outcome
            .map(|_| ())
            .map_err(|err| Error::CollaboratorUnavailable("cloud sync", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud_sync::SyncOutcome;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeSync {
        fail_on: Option<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSync {
        fn good() -> Self {
            FakeSync {
                fail_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(fragment: &'static str) -> Self {
            FakeSync {
                fail_on: Some(fragment),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CloudSync for FakeSync {
        fn push(&self, _local: &Path, remote: &str, _excludes: &[&str]) -> Result<SyncOutcome, String> {
            self.calls.lock().unwrap().push(format!("push {}", remote));
            match self.fail_on {
                Some(fragment) if remote.contains(fragment) => Err("remote rejected us".to_string()),
                _ => Ok(SyncOutcome { bytes: Some(1000) }),
            }
        }

        fn pull(&self, remote: &str, _local: &Path, _excludes: &[&str]) -> Result<SyncOutcome, String> {
            self.calls.lock().unwrap().push(format!("pull {}", remote));
            match self.fail_on {
                Some(fragment) if remote.contains(fragment) => Err("remote rejected us".to_string()),
                _ => Ok(SyncOutcome { bytes: Some(500) }),
            }
        }
    }

    fn orchestrator() -> (TempDir, TempDir, BackupOrchestrator) {
        let data = TempDir::new().unwrap();
        let uploads = TempDir::new().unwrap();
        cloud_sync::write_rclone_config(data.path(), r#"{"access_token":"t"}"#).unwrap();
        let orchestrator =
            BackupOrchestrator::new(data.path().to_path_buf(), uploads.path().to_path_buf());
        (data, uploads, orchestrator)
    }

    #[test]
    fn lock_is_exclusive_until_released() {
        let dir = TempDir::new().unwrap();
        let lock = BackupLock::new(dir.path());
        let guard = lock.acquire().unwrap();
        assert!(matches!(lock.acquire().unwrap_err(), Error::AlreadyRunning));
        drop(guard);
        assert!(lock.acquire().is_ok());
    }

    #[test]
    fn release_happens_even_when_the_run_fails() {
        let dir = TempDir::new().unwrap();
        let lock = BackupLock::new(dir.path());
        let result: Result<(), &str> = (|| {
            let _guard = lock.acquire().unwrap();
            Err("transfer blew up")
        })();
        assert!(result.is_err());
        assert!(lock.acquire().is_ok());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let lock = BackupLock::new(dir.path());
        let old = Utc::now().timestamp() - LOCK_STALE_SECS - 60;
        std::fs::write(dir.path().join(".backup.lock"), old.to_string()).unwrap();
        assert!(lock.acquire().is_ok());
    }

    #[test]
    fn fresh_lock_is_not_reclaimed() {
        let dir = TempDir::new().unwrap();
        let lock = BackupLock::new(dir.path());
        let recent = Utc::now().timestamp() - 60;
        std::fs::write(dir.path().join(".backup.lock"), recent.to_string()).unwrap();
        assert!(matches!(lock.acquire().unwrap_err(), Error::AlreadyRunning));
    }

    #[test]
    fn garbage_lock_file_counts_as_stale() {
        let dir = TempDir::new().unwrap();
        let lock = BackupLock::new(dir.path());
        std::fs::write(dir.path().join(".backup.lock"), "??").unwrap();
        assert!(lock.acquire().is_ok());
    }

    #[test]
    fn successful_run_records_history_with_bytes() {
        let (_data, _uploads, orchestrator) = orchestrator();
        let sync = FakeSync::good();
        let run = orchestrator.run(&sync, "PhotoFrameBackup").unwrap();
        assert_eq!(RunStatus::Success, run.status);
        assert_eq!(Some(2000), run.bytes);

        let log = orchestrator.log().unwrap();
        assert_eq!(Some(RunStatus::Success), log.last_result);
        assert_eq!(None, log.last_error);
        assert_eq!(1, log.history.len());

        let calls = sync.calls.lock().unwrap();
        assert_eq!(
            vec![
                "push PhotoFrameBackup/uploads".to_string(),
                "push PhotoFrameBackup/data".to_string()
            ],
            *calls
        );
    }

    #[test]
    fn failed_run_is_recorded_and_releases_the_lock() {
        let (_data, _uploads, orchestrator) = orchestrator();
        let sync = FakeSync::failing_on("data");
        let run = orchestrator.run(&sync, "PhotoFrameBackup").unwrap();
        assert_eq!(RunStatus::Error, run.status);
        assert!(run.detail.unwrap().contains("remote rejected"));

        let log = orchestrator.log().unwrap();
        assert_eq!(Some(RunStatus::Error), log.last_result);
        assert!(log.last_error.is_some());

        // lock was released, a second run can start
        let sync = FakeSync::good();
        assert!(orchestrator.run(&sync, "PhotoFrameBackup").is_ok());
    }

    #[test]
    fn run_without_configuration_is_rejected() {
        let data = TempDir::new().unwrap();
        let uploads = TempDir::new().unwrap();
        let orchestrator =
            BackupOrchestrator::new(data.path().to_path_buf(), uploads.path().to_path_buf());
        let err = orchestrator.run(&FakeSync::good(), "x").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn concurrent_run_hits_already_running() {
        let (data, _uploads, orchestrator) = orchestrator();
        let lock = BackupLock::new(data.path());
        let _held = lock.acquire().unwrap();
        let err = orchestrator.run(&FakeSync::good(), "x").unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));
    }

    #[test]
    fn restore_shares_the_backup_lock() {
        let (data, _uploads, orchestrator) = orchestrator();
        let lock = BackupLock::new(data.path());
        let held = lock.acquire().unwrap();
        let err = orchestrator
            .restore(&FakeSync::good(), "PhotoFrameBackup")
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));
        drop(held);
        assert!(orchestrator
            .restore(&FakeSync::good(), "PhotoFrameBackup")
            .is_ok());
    }

    #[test]
    fn restore_failure_maps_to_collaborator_unavailable() {
        let (_data, _uploads, orchestrator) = orchestrator();
        let err = orchestrator
            .restore(&FakeSync::failing_on("uploads"), "PhotoFrameBackup")
            .unwrap_err();
        assert!(matches!(err, Error::CollaboratorUnavailable(_, _)));
    }

    #[test]
    fn history_is_trimmed_to_the_retention_limit() {
        let (_data, _uploads, orchestrator) = orchestrator();
        for i in 0..(HISTORY_LIMIT + 5) {
            orchestrator
                .record(&BackupRun {
                    started_at: format!("2024-05-01T00:{:02}:00Z", i % 60),
                    finished_at: format!("2024-05-01T00:{:02}:30Z", i % 60),
                    status: RunStatus::Success,
                    detail: Some(format!("run {}", i)),
                    bytes: None,
                })
                .unwrap();
        }
        let history = orchestrator.history().unwrap();
        assert_eq!(HISTORY_LIMIT, history.len());
        // oldest entries fell off the front
        assert_eq!(Some("run 5".to_string()), history[0].detail);
        assert_eq!(
            Some(format!("run {}", HISTORY_LIMIT + 4)),
            history[HISTORY_LIMIT - 1].detail
        );
    }
}
