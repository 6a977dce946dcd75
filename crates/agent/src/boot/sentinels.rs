//! Platform sentinels: browser auto-open suppression and setup state.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nebo_domain::error::{Error, Result};

const BROWSER_SENTINEL: &str = "browser_opened";
const SETUP_SENTINEL: &str = ".setup-complete";
const NO_BROWSER_ENV: &str = "NEBO_NO_BROWSER";

/// Suppression window after an auto-open.
const BROWSER_SUPPRESS: Duration = Duration::from_secs(8 * 60 * 60);

/// Whether the agent should auto-open the web UI: not when
/// `NEBO_NO_BROWSER=1`, and not when the sentinel is younger than 8 h.
pub fn should_open_browser(data_dir: &Path) -> bool {
    if std::env::var(NO_BROWSER_ENV).is_ok_and(|v| v == "1") {
        return false;
    }
    let path = data_dir.join(BROWSER_SENTINEL);
    match std::fs::metadata(&path).and_then(|m| m.modified()) {
        Ok(mtime) => match mtime.elapsed() {
            Ok(age) => age >= BROWSER_SUPPRESS,
            // mtime in the future (clock skew): treat as fresh.
            Err(_) => false,
        },
        Err(_) => true,
    }
}

/// Record that the browser was just opened.
pub fn touch_browser_opened(data_dir: &Path) -> Result<()> {
    std::fs::write(data_dir.join(BROWSER_SENTINEL), b"").map_err(Error::Io)
}

/// Whether first-run setup has completed.
pub fn is_setup_complete(data_dir: &Path) -> bool {
    data_dir.join(SETUP_SENTINEL).is_file()
}

/// Mark setup complete with a unix-timestamp payload.
pub fn mark_setup_complete(data_dir: &Path) -> Result<()> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    std::fs::write(data_dir.join(SETUP_SENTINEL), format!("{ts}\n")).map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_dir_opens_browser() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = crate::boot::data_dir::ENV_LOCK.lock();
        std::env::remove_var(NO_BROWSER_ENV);
        assert!(should_open_browser(dir.path()));
    }

    #[test]
    fn young_sentinel_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = crate::boot::data_dir::ENV_LOCK.lock();
        std::env::remove_var(NO_BROWSER_ENV);
        touch_browser_opened(dir.path()).unwrap();
        assert!(!should_open_browser(dir.path()));
    }

    #[test]
    fn env_flag_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = crate::boot::data_dir::ENV_LOCK.lock();
        std::env::set_var(NO_BROWSER_ENV, "1");
        let suppressed = !should_open_browser(dir.path());
        std::env::remove_var(NO_BROWSER_ENV);
        assert!(suppressed);
    }

    #[test]
    fn setup_sentinel_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_setup_complete(dir.path()));
        mark_setup_complete(dir.path()).unwrap();
        assert!(is_setup_complete(dir.path()));

        let raw = std::fs::read_to_string(dir.path().join(SETUP_SENTINEL)).unwrap();
        let ts: u64 = raw.trim().parse().unwrap();
        assert!(ts > 1_600_000_000);
    }
}
