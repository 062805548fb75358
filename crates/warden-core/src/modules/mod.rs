//! Modules shipped with the host.

mod catalog;
mod files;
mod listener;
mod logging;
mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use warden_queue::QueueOptions;
use warden_sdk::CapabilityDescriptor;

use crate::console::{ConsoleWriter, ShutdownSignal};

pub use catalog::{ModuleCatalog, ServiceModule};
pub use files::FileIoModule;
pub use listener::{
    CaptureBackend, CapturedFrame, FrameSubscriber, ListenerModule, NullCaptureBackend, Transport,
};
pub use logging::{LoggingConfig, LoggingModule, NETWORK_LOG};
pub use terminal::TerminalModule;

/// Everything the core modules need from the host.
pub struct CoreContext {
    pub writer: Arc<dyn ConsoleWriter>,
    pub shutdown: ShutdownSignal,
    pub backend: Arc<dyn CaptureBackend>,
    pub log_dir: PathBuf,
    pub queue: QueueOptions,
}

/// Descriptors of the built-in modules, in registration order. The module
/// catalog service is added by the host once plugins are known.
pub fn core_capabilities(context: CoreContext) -> Vec<CapabilityDescriptor> {
    vec![
        TerminalModule::descriptor(context.writer, context.shutdown),
        ServiceModule::descriptor(),
        FileIoModule::descriptor(context.queue),
        ListenerModule::descriptor(context.backend, context.log_dir.clone()),
        LoggingModule::descriptor(context.log_dir),
    ]
}
