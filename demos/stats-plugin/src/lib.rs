//! Example Warden bundle: counts every captured frame and keeps a running
//! total across sessions in `stats.json`.
//!
//! Build it as a `cdylib` and drop the library into the host's plugin
//! directory to get the `stats list` command.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use warden_core::modules::{FileIoModule, ListenerModule, TerminalModule};
use warden_core::queue::Persistence;
use warden_sdk::prelude::*;
use warden_sdk::{declare_warden_modules, write_json};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub total: u64,
}

pub struct ExampleStatistics {
    terminal: Arc<TerminalModule>,
    listener: Arc<ListenerModule>,
    files: Arc<FileIoModule>,
    session: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    config: ConfigSlot<StatsConfig>,
}

impl Capability for ExampleStatistics {
    const ID: &'static str = "stats";
}

impl Module for ExampleStatistics {
    fn name(&self) -> &str {
        "Statistics"
    }

    fn initialise(&self) -> Result<(), ModuleError> {
        let path = self
            .config
            .path()
            .ok_or_else(|| ModuleError::Initialisation("configuration is not bound".into()))?;
        let key = self
            .files
            .open_reader(&path, Persistence::Dedicated)
            .map_err(|err| ModuleError::Initialisation(err.to_string()))?;
        self.total
            .store(self.config.read(|stats| stats.total), Ordering::SeqCst);

        let files = Arc::clone(&self.files);
        let session = Arc::clone(&self.session);
        let total = Arc::clone(&self.total);
        self.listener.subscribe(move |_| {
            session.fetch_add(1, Ordering::SeqCst);
            let total = total.fetch_add(1, Ordering::SeqCst) + 1;
            let persisted = files.perform(&key, move |file| {
                write_json(file, &StatsConfig { total })?;
                Ok(())
            });
            if let Err(err) = persisted {
                warn!("statistics not persisted: {err}");
            }
        });

        self.terminal
            .info(self.name(), "Custom statistics module loaded");
        Ok(())
    }
}

impl ExampleStatistics {
    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::module::<Self>()
            .depends_on::<TerminalModule>()
            .depends_on::<ListenerModule>()
            .depends_on::<FileIoModule>()
            .base_command("stats")
            .command(
                CommandSpec::new("list").about("Show frame capture statistics"),
                |stats, _| {
                    stats.list();
                    Ok(())
                },
            )
            .config("stats.json", |stats| &stats.config)
            .build(|deps| {
                Ok(Self {
                    terminal: deps.get::<TerminalModule>()?,
                    listener: deps.get::<ListenerModule>()?,
                    files: deps.get::<FileIoModule>()?,
                    session: Arc::new(AtomicU64::new(0)),
                    total: Arc::new(AtomicU64::new(0)),
                    config: ConfigSlot::new(),
                })
            })
    }

    pub fn session_count(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.path()
    }

    fn list(&self) {
        self.terminal.info(
            self.name(),
            &format!("Caught this session: {}", self.session_count()),
        );
        self.terminal.info(
            self.name(),
            &format!("Caught overall     : {}", self.total_count()),
        );
    }
}

declare_warden_modules!(ExampleStatistics::descriptor());
