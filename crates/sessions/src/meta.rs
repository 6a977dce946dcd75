//! Small key/value metadata shared with the local server.
//!
//! Holds cached values like the bot id (whose source of truth is the
//! `bot_id` file). Backed by `meta.json` in the data dir.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

pub struct MetaStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl MetaStore {
    pub fn new(data_dir: &Path) -> Self {
        let path = data_dir.join("meta.json");
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock();
        values.insert(key.to_owned(), value.to_owned());
        match serde_json::to_string_pretty(&*values) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.path, raw) {
                    tracing::warn!(error = %e, "failed to persist meta.json");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize meta.json"),
        }
    }
}
