//! Bot identity.
//!
//! The 36-char UUID in `<data_dir>/bot_id` (mode 0400) is the source of
//! truth; it survives database deletion. The database keeps a cached
//! copy that is synced to the file value on every read.

use std::path::Path;

use nebo_domain::error::{Error, Result};
use nebo_sessions::MetaStore;

const BOT_ID_FILE: &str = "bot_id";
const META_KEY: &str = "bot_id";

/// Load the bot id, creating it if absent. File-first precedence:
/// 1. A valid file value wins and is synced into the meta cache.
/// 2. No file but a cached value: the file is rewritten from the cache.
/// 3. Neither: a fresh UUID is minted and stored in both.
pub fn load_or_create(data_dir: &Path, meta: &MetaStore) -> Result<String> {
    let path = data_dir.join(BOT_ID_FILE);

    if let Ok(raw) = std::fs::read_to_string(&path) {
        let value = raw.trim().to_owned();
        if is_valid(&value) {
            if meta.get(META_KEY).as_deref() != Some(value.as_str()) {
                meta.set(META_KEY, &value);
            }
            return Ok(value);
        }
        tracing::warn!(path = %path.display(), "bot_id file is malformed; regenerating");
    }

    let value = match meta.get(META_KEY).filter(|v| is_valid(v)) {
        Some(cached) => {
            tracing::info!("restoring bot_id file from cached copy");
            cached
        }
        None => uuid::Uuid::new_v4().to_string(),
    };

    write_read_only(&path, &value)?;
    meta.set(META_KEY, &value);
    Ok(value)
}

fn is_valid(value: &str) -> bool {
    value.len() == 36 && uuid::Uuid::parse_str(value).is_ok()
}

fn write_read_only(path: &Path, value: &str) -> Result<()> {
    // A previous 0400 file must be removed before rewriting.
    if path.exists() {
        std::fs::remove_file(path).map_err(Error::Io)?;
    }
    std::fs::write(path, format!("{value}\n")).map_err(Error::Io)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o400);
        std::fs::set_permissions(path, perms).map_err(Error::Io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, MetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let meta = MetaStore::new(dir.path());
        (dir, meta)
    }

    #[test]
    fn fresh_install_mints_and_caches() {
        let (dir, meta) = setup();
        let id = load_or_create(dir.path(), &meta).unwrap();
        assert_eq!(id.len(), 36);
        assert_eq!(meta.get("bot_id").as_deref(), Some(id.as_str()));
        assert!(dir.path().join("bot_id").is_file());
    }

    #[test]
    fn file_wins_and_cache_is_synced() {
        let (dir, meta) = setup();
        let file_value = "11111111-1111-4111-8111-111111111111";
        std::fs::write(dir.path().join("bot_id"), format!("{file_value}\n")).unwrap();
        meta.set("bot_id", "22222222-2222-4222-8222-222222222222");

        let id = load_or_create(dir.path(), &meta).unwrap();
        assert_eq!(id, file_value);
        assert_eq!(meta.get("bot_id").as_deref(), Some(file_value));
    }

    #[test]
    fn missing_file_is_restored_from_cache() {
        let (dir, meta) = setup();
        let cached = "33333333-3333-4333-8333-333333333333";
        meta.set("bot_id", cached);

        let id = load_or_create(dir.path(), &meta).unwrap();
        assert_eq!(id, cached);
        let on_disk = std::fs::read_to_string(dir.path().join("bot_id")).unwrap();
        assert_eq!(on_disk.trim(), cached);
    }

    #[test]
    fn stable_across_loads() {
        let (dir, meta) = setup();
        let first = load_or_create(dir.path(), &meta).unwrap();
        let second = load_or_create(dir.path(), &meta).unwrap();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn file_mode_is_0400() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, meta) = setup();
        load_or_create(dir.path(), &meta).unwrap();
        let mode = std::fs::metadata(dir.path().join("bot_id"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o400);
    }
}
