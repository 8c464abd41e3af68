//! Small persistent key-value store for UI preferences.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use toml::{Table, Value};
use tracing::warn;

pub const SELECTED_ACCOUNT_KEY: &str = "ui.selected_account";
pub const PRIVACY_MODE_KEY: &str = "ui.privacy_mode";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("preference file is corrupt: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to encode preferences: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("preference store is unavailable")]
    Unavailable,
}

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// `None` removes the key.
    fn set(&self, key: &str, value: Option<&str>) -> Result<(), StorageError>;
}

/// Trim an account identifier; blank input means "no account".
pub fn normalize_account(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

/// TOML table on disk, rewritten on every change. Only string values are read back.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<Table, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Table::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };
        Ok(toml::from_str(&raw)?)
    }

    fn write_table(&self, values: &Table) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = toml::to_string(values)?;
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, encoded)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.read_table()?.remove(key) {
            Some(Value::String(value)) => Ok(Some(value)),
            Some(other) => {
                warn!(key, kind = other.type_str(), "ignoring non-string preference value");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Entries other than `key` are written back untouched, whatever their type.
    fn set(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = match self.read_table() {
            Ok(values) => values,
            Err(StorageError::Parse(err)) => {
                warn!(path = %self.path.display(), error = %err, "discarding corrupt preference file");
                Table::new()
            }
            Err(err) => return Err(err),
        };
        let changed = match value {
            Some(value) => {
                let previous = values.insert(key.to_string(), Value::String(value.to_string()));
                previous.as_ref().and_then(Value::as_str) != Some(value)
            }
            None => values.remove(key).is_some(),
        };
        if !changed && self.path.exists() {
            return Ok(());
        }
        self.write_table(&values)
    }
}

/// Volatile store used when nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(value) => {
                values.insert(key.to_string(), value.to_string());
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}

/// Best-effort persistence of the last confirmed account.
///
/// Storage failures are logged and absorbed; callers only ever see a value or `None`.
#[derive(Clone)]
pub struct SelectedAccountPreference {
    store: Arc<dyn PreferenceStore>,
}

impl SelectedAccountPreference {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn read(&self) -> Option<String> {
        match self.store.get(SELECTED_ACCOUNT_KEY) {
            Ok(value) => normalize_account(value.as_deref()),
            Err(err) => {
                warn!(error = %err, "could not read the remembered account");
                None
            }
        }
    }

    pub fn write(&self, value: Option<&str>) {
        let normalized = normalize_account(value);
        if let Err(err) = self.store.set(SELECTED_ACCOUNT_KEY, normalized.as_deref()) {
            warn!(error = %err, "could not remember the selected account");
        }
    }
}
