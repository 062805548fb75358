use std::path::PathBuf;

use thiserror::Error;
use warden_queue::QueueError;
use warden_sdk::{CapabilityId, CommandError, ModuleError};

/// Fatal errors raised while registering or constructing capabilities.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no capability registered as {0}")]
    UnknownCapability(CapabilityId),
    #[error("capability {0} is registered twice")]
    DuplicateCapability(CapabilityId),
    #[error("cyclic dependency: {}", format_cycle(.path))]
    CyclicDependency { path: Vec<CapabilityId> },
    #[error("failed to construct {id}: {source}")]
    Construction {
        id: CapabilityId,
        #[source]
        source: ModuleError,
    },
}

fn format_cycle(path: &[CapabilityId]) -> String {
    path.iter()
        .map(CapabilityId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn plural(count: &usize) -> &'static str {
    if *count == 1 {
        ""
    } else {
        "s"
    }
}

/// A plugin bundle that could not be used. Always recovered.
#[derive(Debug, Error)]
pub enum PluginLoadError {
    #[error("failed to prepare plugin directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load plugin library {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("{path} is built against SDK version {found}, host expects {expected}")]
    IncompatibleVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("{path} does not export any capabilities")]
    Empty { path: PathBuf },
    #[error("{path} exports capability {id} which is already registered")]
    DuplicateCapability { path: PathBuf, id: CapabilityId },
    #[error("{path} is not a capability bundle: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Recovered errors surfaced by the dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No command found")]
    CommandNotFound,
    #[error("expected {expected} argument{}, received {received}", plural(.expected))]
    ArgumentArityMismatch { expected: usize, received: usize },
    #[error("{0}")]
    Capability(#[from] RegistryError),
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("command panicked: {0}")]
    Panicked(String),
}

/// Errors raised by the file I/O module before work reaches a queue.
#[derive(Debug, Error)]
pub enum FileIoError {
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} does not have an open reader")]
    NotOpened { path: PathBuf },
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors that abort host startup.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
