use std::fs::create_dir_all;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

pub struct SyncOutcome {
    pub bytes: Option<u64>,
}

/// The transfer side of backups. Opaque pass/fail plus a byte count when the
/// tool reports one; everything else about the remote is none of our
/// business.
pub trait CloudSync: Send + Sync {
    fn push(&self, local: &Path, remote: &str, excludes: &[&str]) -> Result<SyncOutcome, String>;
    fn pull(&self, remote: &str, local: &Path, excludes: &[&str]) -> Result<SyncOutcome, String>;
}

pub const REMOTE_NAME: &str = "dropbox";

pub fn rclone_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("rclone").join("rclone.conf")
}

pub fn is_configured(data_dir: &Path) -> bool {
    match std::fs::read_to_string(rclone_config_path(data_dir)) {
        Ok(content) => content.contains(&format!("[{}]", REMOTE_NAME)),
        Err(_) => false,
    }
}

/// The credential reference is an opaque rclone token blob; we write it into
/// a config file rclone can use and never look inside it again.
pub fn write_rclone_config(data_dir: &Path, token: &str) -> Result<(), String> {
    let path = rclone_config_path(data_dir);
    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(|err| format!("{}", err))?;
    }
    let content = format!("[{}]\ntype = dropbox\ntoken = {}\n", REMOTE_NAME, token);
    std::fs::write(&path, content).map_err(|err| format!("{}", err))
}

pub fn remove_rclone_config(data_dir: &Path) -> Result<(), String> {
    match std::fs::remove_file(rclone_config_path(data_dir)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(format!("{}", err)),
    }
}

/// Run a command under a hard deadline. On timeout the child is killed and
/// reaped; a stuck transfer never leaves the caller waiting forever.
pub(crate) fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    stdin: Option<&[u8]>,
) -> Result<Output, String> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    let mut child = cmd.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            "command not installed".to_string()
        } else {
            format!("{}", err)
        }
    })?;
    if let Some(input) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(input).map_err(|err| format!("{}", err))?;
        }
    }
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait().map_err(|err| format!("{}", err))? {
            Some(_) => {
                return child
                    .wait_with_output()
                    .map_err(|err| format!("{}", err));
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("timed out after {}s", timeout.as_secs()));
                }
                std::thread::sleep(Duration::from_millis(250));
            }
        }
    }
}

// rclone reports "Transferred:   10.500 MiB / 10.500 MiB, 100%, ..." on
// stderr; the first amount is what actually moved.
fn parse_transferred(stderr: &str) -> Option<u64> {
    for line in stderr.lines() {
        let rest = match line.trim().strip_prefix("Transferred:") {
            Some(rest) => rest,
            None => continue,
        };
        let mut parts = rest.split_whitespace();
        let value: f64 = parts.next()?.parse().ok()?;
        let multiplier: f64 = match parts.next()? {
            "B" | "Bytes" => 1.0,
            "KiB" => 1024.0,
            "MiB" => 1024.0 * 1024.0,
            "GiB" => 1024.0 * 1024.0 * 1024.0,
            "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            // the file-count line has no unit
            _ => continue,
        };
        return Some((value * multiplier) as u64);
    }
    None
}

fn truncate_error(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() > 500 {
        trimmed.chars().take(500).collect()
    } else {
        trimmed.to_string()
    }
}

pub struct RcloneSync {
    config: PathBuf,
    timeout: Duration,
}

impl RcloneSync {
    pub fn new(config: PathBuf, timeout: Duration) -> Self {
        RcloneSync { config, timeout }
    }

    fn run_transfer(&self, verb: &str, from: &str, to: &str, excludes: &[&str]) -> Result<SyncOutcome, String> {
        let mut cmd = Command::new("rclone");
        cmd.arg(verb)
            .arg(from)
            .arg(to)
            .arg("--config")
            .arg(&self.config)
            .arg("--stats-one-line");
        for exclude in excludes {
            cmd.arg("--exclude").arg(exclude);
        }
        let output = run_with_timeout(cmd, self.timeout, None)
            .map_err(|err| format!("rclone {}: {}", verb, err))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(truncate_error(&stderr));
        }
        Ok(SyncOutcome {
            bytes: parse_transferred(&stderr),
        })
    }
}

impl CloudSync for RcloneSync {
    fn push(&self, local: &Path, remote: &str, excludes: &[&str]) -> Result<SyncOutcome, String> {
        self.run_transfer(
            "sync",
            &local.display().to_string(),
            &format!("{}:{}", REMOTE_NAME, remote),
            excludes,
        )
    }

    // copy rather than sync so a restore never deletes local files that are
    // missing from the remote
    fn pull(&self, remote: &str, local: &Path, excludes: &[&str]) -> Result<SyncOutcome, String> {
        self.run_transfer(
            "copy",
            &format!("{}:{}", REMOTE_NAME, remote),
            &local.display().to_string(),
            excludes,
        )
    }
}

/// Quick sanity check that the stored credential actually reaches the
/// remote, used right after configuration.
pub fn test_connection(config: &Path) -> Result<(), String> {
    let mut cmd = Command::new("rclone");
    cmd.arg("lsd")
        .arg(format!("{}:", REMOTE_NAME))
        .arg("--config")
        .arg(config);
    let output = run_with_timeout(cmd, Duration::from_secs(30), None)?;
    if output.status.success() {
        Ok(())
    } else {
        Err(truncate_error(&String::from_utf8_lossy(&output.stderr)))
    }
}
