//! Warden Module SDK
//! =================
//!
//! Everything a capability needs to take part in a Warden host: the
//! [`Module`] contract, identities, descriptor builders that declare
//! dependencies and operator commands, argument coercion, persisted
//! configuration slots and the entry point used by plugin bundles.
//!
//! Capabilities describe themselves explicitly. A descriptor names the
//! capability, the capabilities its constructor needs, an optional base
//! command and the commands it handles:
//!
//! ```ignore
//! CapabilityDescriptor::module::<StatsModule>()
//!     .depends_on::<TerminalModule>()
//!     .base_command("stats")
//!     .command(CommandSpec::new("list"), |stats, _| stats.list())
//!     .build(|deps| Ok(StatsModule::new(deps.get::<TerminalModule>()?)))
//! ```

mod args;
mod capability;
mod config;
mod descriptor;
mod export;

pub use args::{CommandArgs, CommandError};
pub use capability::{Capability, CapabilityId, Instance, Module, ModuleError};
pub use config::{
    load_or_default, read_json, write_json, ConfigError, ConfigRecord, ConfigSlot, ConfigSource,
};
pub use descriptor::{
    CapabilityDescriptor, CommandDescriptor, CommandHandler, CommandSpec, ConfigBinding,
    Dependencies, DescriptorBuilder,
};
pub use export::{
    EntryPoint, ModuleSet, PluginExport, VersionPoint, ENTRY_SYMBOL, SDK_VERSION, VERSION_SYMBOL,
};

/// Common imports for capability authors.
pub mod prelude {
    pub use crate::{
        Capability, CapabilityDescriptor, CapabilityId, CommandArgs, CommandError, CommandSpec,
        ConfigSlot, Dependencies, Module, ModuleError, ModuleSet, PluginExport,
    };
}

/// Declare the entry points of a Warden plugin bundle.
///
/// The macro takes one or more expressions evaluating to
/// [`CapabilityDescriptor`]s and exports them, together with the SDK version
/// the bundle was built against, from the compiled library.
///
/// # Example
///
/// ```ignore
/// use warden_sdk::declare_warden_modules;
///
/// declare_warden_modules!(stats::descriptor());
/// ```
#[macro_export]
macro_rules! declare_warden_modules {
    ($($descriptor:expr),+ $(,)?) => {
        #[no_mangle]
        pub extern "C" fn warden_sdk_version() -> u32 {
            $crate::SDK_VERSION
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn warden_module_entrypoint() -> $crate::PluginExport {
            let mut modules = $crate::ModuleSet::new();
            $(modules.register($descriptor);)+
            $crate::PluginExport::new(modules)
        }
    };
}
