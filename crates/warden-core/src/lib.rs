//! Warden host core.
//!
//! Startup flows through the modules of this crate in order: the
//! [`PluginLoader`] merges core and plugin descriptors, the [`Registry`]
//! builds singletons, modules load their configuration and initialise, the
//! [`CommandTree`] is built from the modules that came up, and the
//! [`Dispatcher`] routes operator lines to command handlers.

pub mod commands;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod modules;
pub mod plugins;
pub mod registry;

pub use commands::{CommandConflict, CommandTree, ConflictKind, Resolution};
pub use console::{ConsoleWriter, Level, MemoryWriter, ShutdownSignal, StdoutWriter};
pub use dispatch::{tokenize, DispatchOutcome, Dispatcher};
pub use error::{DispatchError, FileIoError, HostError, PluginLoadError, RegistryError};
pub use host::{Host, HostConfig};
pub use plugins::{BundleLoader, DiscoveryReport, LoadedBundle, NativeBundleLoader, PluginLoader};
pub use registry::{Registry, RegistryBuilder};

pub use warden_queue as queue;
pub use warden_sdk as sdk;
