//! Data directory resolution.
//!
//! `NEBO_DATA_DIR` overrides everything; otherwise the platform default:
//! `~/Library/Application Support/Nebo` (macOS), `%AppData%\Nebo`
//! (Windows), `~/.config/nebo` (Linux).

use std::path::PathBuf;

use nebo_domain::error::{Error, Result};

pub const DATA_DIR_ENV: &str = "NEBO_DATA_DIR";

/// Resolve and create the data directory.
pub fn resolve() -> Result<PathBuf> {
    let dir = match std::env::var(DATA_DIR_ENV) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v),
        _ => platform_default()?,
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| Error::Config(format!("creating data dir {}: {e}", dir.display())))?;
    Ok(dir)
}

fn platform_default() -> Result<PathBuf> {
    #[cfg(any(target_os = "macos", target_os = "windows"))]
    {
        dirs::data_dir()
            .map(|d| d.join("Nebo"))
            .ok_or_else(|| Error::Config("cannot determine platform data dir".into()))
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        dirs::config_dir()
            .map(|d| d.join("nebo"))
            .ok_or_else(|| Error::Config("cannot determine platform config dir".into()))
    }
}

/// Serializes env-var mutation across this crate's tests.
#[cfg(test)]
pub(crate) static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("custom");
        let _guard = ENV_LOCK.lock();
        std::env::set_var(DATA_DIR_ENV, &target);
        let resolved = resolve().unwrap();
        std::env::remove_var(DATA_DIR_ENV);
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }
}
