//! Durable, best-effort local copy of session display data.
//!
//! The mirror is written when the backend confirms an identity, cleared on sign-out,
//! and read only as a display hint while the backend is unreachable. The same
//! key/value stores also carry the one-shot registration handoff consumed by the
//! profile viewer.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use adapters::{Identity, Record};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed key of the persisted session snapshot.
pub const AUTH_STATE_KEY: &str = "usra_auth_state";
/// Page-scoped key of the registration result handed to the profile viewer.
pub const REGISTRATION_KEY: &str = "registrationData";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage key {0:?} is not a plain name")]
    InvalidKey(String),
    #[error("storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// String key/value storage in the manner of browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One JSON file per key under a directory; survives restarts.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let plain = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !plain {
            return Err(StoreError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_owned(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        let staging = path.with_extension("json.tmp");
        let io_err = |source| StoreError::Io {
            key: key.to_owned(),
            source,
        };
        fs::write(&staging, value).map_err(io_err)?;
        fs::rename(&staging, &path).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_owned(),
                source,
            }),
        }
    }
}

/// Process-lifetime storage, the equivalent of page-scoped session storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Identity and profile display fields. Never carries tokens or passwords.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub user: Option<Identity>,
    pub profile: Option<Record>,
}

#[derive(Clone)]
pub struct PersistenceMirror {
    store: Arc<dyn KeyValueStore>,
}

impl PersistenceMirror {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, snapshot: &PersistedSnapshot) {
        let encoded = match serde_json::to_string(snapshot) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "could not encode session snapshot");
                return;
            }
        };
        if let Err(err) = self.store.set(AUTH_STATE_KEY, &encoded) {
            warn!(error = %err, "could not persist session snapshot");
        }
    }

    /// Returns the stored snapshot; a corrupt one is logged, cleared and ignored.
    pub fn load(&self) -> Option<PersistedSnapshot> {
        let raw = match self.store.get(AUTH_STATE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "could not read session snapshot");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(error = %err, "discarding corrupt session snapshot");
                self.clear();
                None
            }
        }
    }

    pub fn clear(&self) {
        if let Err(err) = self.store.remove(AUTH_STATE_KEY) {
            warn!(error = %err, "could not clear session snapshot");
        }
    }
}

/// Registration result passed to the profile viewer, readable exactly once.
#[derive(Clone)]
pub struct RegistrationHandoff {
    store: Arc<dyn KeyValueStore>,
}

impl RegistrationHandoff {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn stash(&self, data: &Record) -> Result<(), StoreError> {
        let encoded = serde_json::Value::Object(data.clone()).to_string();
        self.store.set(REGISTRATION_KEY, &encoded)
    }

    /// Reads and deletes the stashed result.
    pub fn take(&self) -> Option<Record> {
        let raw = match self.store.get(REGISTRATION_KEY) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(error = %err, "could not read registration handoff");
                return None;
            }
        };
        if let Err(err) = self.store.remove(REGISTRATION_KEY) {
            warn!(error = %err, "could not clear registration handoff");
        }
        match serde_json::from_str(&raw) {
            Ok(data) => {
                debug!("registration handoff consumed");
                Some(data)
            }
            Err(err) => {
                warn!(error = %err, "discarding corrupt registration handoff");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;

    #[fixture]
    fn dir() -> TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    fn snapshot() -> PersistedSnapshot {
        PersistedSnapshot {
            user: Some(Identity::new("u1", Some("a@b.com"))),
            profile: json!({"admin_full_name": "Jane Doe"}).as_object().cloned(),
        }
    }

    #[rstest]
    fn file_mirror_survives_reopen(dir: TempDir) {
        let mirror = PersistenceMirror::new(Arc::new(FileStore::open(dir.path()).expect("store")));
        mirror.save(&snapshot());

        let reopened =
            PersistenceMirror::new(Arc::new(FileStore::open(dir.path()).expect("store")));
        assert_eq!(reopened.load(), Some(snapshot()));
    }

    #[rstest]
    fn load_after_clear_is_absent(dir: TempDir) {
        let mirror = PersistenceMirror::new(Arc::new(FileStore::open(dir.path()).expect("store")));
        mirror.save(&snapshot());
        mirror.clear();
        assert_eq!(mirror.load(), None);
        // Clearing twice is harmless.
        mirror.clear();
    }

    #[rstest]
    fn corrupt_snapshot_is_discarded(dir: TempDir) {
        let store = Arc::new(FileStore::open(dir.path()).expect("store"));
        store.set(AUTH_STATE_KEY, "{not json").expect("write");
        let mirror = PersistenceMirror::new(store.clone());

        assert_eq!(mirror.load(), None);
        assert_eq!(store.get(AUTH_STATE_KEY).expect("read"), None);
    }

    #[rstest]
    fn file_store_rejects_path_like_keys(dir: TempDir) {
        let store = FileStore::open(dir.path()).expect("store");
        assert!(matches!(
            store.set("../escape", "x"),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn handoff_is_consumed_once() {
        let handoff = RegistrationHandoff::new(Arc::new(MemoryStore::default()));
        let data = json!({"school_name": "Kampala High", "admin_password": "********"})
            .as_object()
            .cloned()
            .expect("object");
        handoff.stash(&data).expect("stash");

        assert_eq!(handoff.take(), Some(data));
        assert_eq!(handoff.take(), None);
    }
}
