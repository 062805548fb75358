use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;
use warden_queue::{Pending, Persistence, QueueOptions, QueuePool};
use warden_sdk::prelude::*;

use crate::error::FileIoError;

/// Serialises file access: every operation on a file runs on that file's
/// resource queue, keyed by its canonical path.
#[derive(Debug, Default)]
pub struct FileIoModule {
    pool: QueuePool,
}

impl Capability for FileIoModule {
    const ID: &'static str = "file_io";
}

impl Module for FileIoModule {
    fn name(&self) -> &str {
        "FileIO"
    }

    fn initialise(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    fn shutdown(&self) {
        self.pool.drain_all();
    }
}

impl FileIoModule {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            pool: QueuePool::new(options),
        }
    }

    pub fn descriptor(options: QueueOptions) -> CapabilityDescriptor {
        CapabilityDescriptor::module::<Self>().build(move |_| Ok(Self::new(options)))
    }

    pub fn pool(&self) -> &QueuePool {
        &self.pool
    }

    /// Create `path` (and its parent directories) if needed and open the
    /// queue for it. Returns the canonical path used as the queue key.
    pub fn open_reader(
        &self,
        path: impl AsRef<Path>,
        persistence: Persistence,
    ) -> Result<PathBuf, FileIoError> {
        let path = path.as_ref();
        let prepare = |source| FileIoError::Prepare {
            path: path.to_path_buf(),
            source,
        };
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(prepare)?;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(prepare)?;
        }
        let key = fs::canonicalize(path).map_err(prepare)?;
        self.pool.open(&queue_key(&key), persistence)?;
        debug!(path = %key.display(), ?persistence, "opened file queue");
        Ok(key)
    }

    /// Queue `operation` against `path`. The operation receives the
    /// canonical path.
    pub fn perform<R, F>(&self, path: impl AsRef<Path>, operation: F) -> Result<Pending<R>, FileIoError>
    where
        R: Send + 'static,
        F: FnOnce(&Path) -> anyhow::Result<R> + Send + 'static,
    {
        let key = self.key_for(path.as_ref())?;
        let pending = self
            .pool
            .submit(&queue_key(&key), move || operation(&key))?;
        Ok(pending)
    }

    pub fn read_all(&self, path: impl AsRef<Path>) -> Result<Pending<Vec<u8>>, FileIoError> {
        self.perform(path, |file| {
            fs::read(file).with_context(|| format!("failed to read {}", file.display()))
        })
    }

    pub fn append(
        &self,
        path: impl AsRef<Path>,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<Pending<()>, FileIoError> {
        let bytes = bytes.into();
        self.perform(path, move |file| {
            let mut handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .with_context(|| format!("failed to open {}", file.display()))?;
            handle.write_all(&bytes)?;
            handle.flush()?;
            Ok(())
        })
    }

    pub fn append_text(&self, path: impl AsRef<Path>, text: &str) -> Result<Pending<()>, FileIoError> {
        self.append(path, text.as_bytes())
    }

    fn key_for(&self, path: &Path) -> Result<PathBuf, FileIoError> {
        let not_opened = || FileIoError::NotOpened {
            path: path.to_path_buf(),
        };
        let key = fs::canonicalize(path).map_err(|_| not_opened())?;
        if self.pool.get(&queue_key(&key)).is_none() {
            return Err(not_opened());
        }
        Ok(key)
    }
}

fn queue_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
