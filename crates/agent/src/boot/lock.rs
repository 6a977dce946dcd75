//! Single-instance lock.
//!
//! `<data_dir>/nebo.lock` holds the current PID under an exclusive
//! advisory lock. The lock is held for the process lifetime; a lock file
//! whose owner PID is no longer alive is reclaimed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use nebo_domain::error::{Error, Result};

const LOCK_FILE: &str = "nebo.lock";

/// Holds the advisory lock. Keep it alive for the process lifetime; drop
/// releases the lock and removes the file.
pub struct InstanceLock {
    file: Option<File>,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock, reclaiming a stale one if its PID is dead.
    pub fn acquire(data_dir: &Path) -> Result<InstanceLock> {
        let path = data_dir.join(LOCK_FILE);

        match try_lock(&path) {
            Ok(lock) => Ok(lock),
            Err(first_err) => {
                let holder = read_pid(&path);
                match holder {
                    Some(pid) if pid_alive(pid) => Err(Error::Config(format!(
                        "another Nebo agent is running (pid {pid}, lock {})",
                        path.display()
                    ))),
                    Some(pid) => {
                        tracing::warn!(pid, path = %path.display(), "reclaiming stale lock");
                        let _ = std::fs::remove_file(&path);
                        try_lock(&path)
                    }
                    None => Err(first_err),
                }
            }
        }
    }
}

fn try_lock(path: &Path) -> Result<InstanceLock> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::Config(format!("opening lock file {}: {e}", path.display())))?;

    file.try_lock_exclusive()
        .map_err(|_| Error::Config(format!("lock {} is held", path.display())))?;

    // Lock acquired: stamp our PID.
    let pid = std::process::id();
    {
        let mut f = &file;
        f.set_len(0).map_err(Error::Io)?;
        writeln!(f, "{pid}").map_err(Error::Io)?;
        f.flush().map_err(Error::Io)?;
    }

    tracing::info!(path = %path.display(), pid, "instance lock acquired");
    Ok(InstanceLock {
        file: Some(file),
        path: path.to_path_buf(),
    })
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(windows)]
fn pid_alive(_pid: u32) -> bool {
    // No cheap liveness probe; never reclaim automatically.
    true
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Release the lock before removing the file.
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "lock file cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn second_acquire_in_same_process_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = InstanceLock::acquire(dir.path()).unwrap();
        // Our own PID is alive, so the second acquire must fail.
        assert!(InstanceLock::acquire(dir.path()).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        // A lock file left by a dead process: nobody holds the advisory
        // lock, the PID does not exist.
        std::fs::write(dir.path().join(LOCK_FILE), "3999999999\n").unwrap();

        let lock = InstanceLock::acquire(dir.path()).unwrap();
        let content = std::fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());
        drop(lock);
    }
}
