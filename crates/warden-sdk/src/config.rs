use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration binding does not match capability {0}")]
    TargetMismatch(String),
}

/// Record types that can back a module configuration.
pub trait ConfigRecord:
    Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
}

impl<T> ConfigRecord for T where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
}

/// Where a configuration value came from at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Loaded,
    Defaulted,
}

pub fn read_json<C: DeserializeOwned>(path: &Path) -> Result<C, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_json<C: Serialize>(path: &Path, value: &C) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err)
}

/// Read `path`, or write and return `C::default()` when the file is missing
/// or cannot be parsed.
pub fn load_or_default<C: ConfigRecord>(path: &Path) -> Result<(C, ConfigSource), ConfigError> {
    if path.exists() {
        match read_json::<C>(path) {
            Ok(value) => return Ok((value, ConfigSource::Loaded)),
            Err(err) => warn!("replacing unreadable configuration with defaults: {err}"),
        }
    }
    let value = C::default();
    write_json(path, &value)?;
    Ok((value, ConfigSource::Defaulted))
}

/// Configuration owned by a module, persisted on every update once the host
/// has bound it to a file.
#[derive(Debug, Default)]
pub struct ConfigSlot<C> {
    value: RwLock<C>,
    path: Mutex<Option<PathBuf>>,
}

impl<C: ConfigRecord> ConfigSlot<C> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(C::default()),
            path: Mutex::new(None),
        }
    }

    pub fn install(&self, value: C, path: PathBuf) {
        *self.value.write() = value;
        *self.path.lock() = Some(path);
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(&self.value.read())
    }

    /// Mutate the configuration and write it back to its file. The new
    /// value only becomes visible once it has been written.
    pub fn update<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R, ConfigError> {
        let mut value = self.value.write();
        let mut next = value.clone();
        let result = f(&mut next);
        if let Some(path) = self.path.lock().as_deref() {
            write_json(path, &next)?;
        }
        *value = next;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use tempfile::tempdir;

    use super::*;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        total: u64,
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/counter.json");
        let (value, source) = load_or_default::<Counter>(&path).unwrap();
        assert_eq!(value, Counter::default());
        assert_eq!(source, ConfigSource::Defaulted);
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_replaced_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.json");
        fs::write(&path, "not json").unwrap();
        let (_, source) = load_or_default::<Counter>(&path).unwrap();
        assert_eq!(source, ConfigSource::Defaulted);
        assert_eq!(read_json::<Counter>(&path).unwrap(), Counter::default());
    }

    #[test]
    fn slot_updates_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.json");
        write_json(&path, &Counter { total: 3 }).unwrap();

        let (value, source) = load_or_default::<Counter>(&path).unwrap();
        assert_eq!(source, ConfigSource::Loaded);
        let slot = ConfigSlot::<Counter>::new();
        slot.install(value, path.clone());
        let total = slot
            .update(|counter| {
                counter.total += 1;
                counter.total
            })
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(read_json::<Counter>(&path).unwrap(), Counter { total: 4 });
    }

    #[test]
    fn failed_write_keeps_the_previous_value() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "a file, not a directory").unwrap();

        let slot = ConfigSlot::<Counter>::new();
        slot.install(Counter { total: 7 }, blocker.join("counter.json"));
        let err = slot.update(|counter| counter.total += 1).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert_eq!(slot.read(|counter| counter.total), 7);
    }
}
