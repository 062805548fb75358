use std::sync::Arc;

use warden_sdk::prelude::*;

use super::TerminalModule;

/// Identities of every module the host registered, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: Vec<CapabilityId>,
}

impl Capability for ModuleCatalog {
    const ID: &'static str = "module_catalog";
}

impl ModuleCatalog {
    pub fn new(modules: Vec<CapabilityId>) -> Self {
        Self { modules }
    }

    pub fn descriptor(modules: Vec<CapabilityId>) -> CapabilityDescriptor {
        CapabilityDescriptor::service::<Self>().build(move |_| Ok(Self::new(modules.clone())))
    }

    pub fn modules(&self) -> &[CapabilityId] {
        &self.modules
    }
}

/// Reports on the installed modules.
pub struct ServiceModule {
    terminal: Arc<TerminalModule>,
    catalog: Arc<ModuleCatalog>,
}

impl Capability for ServiceModule {
    const ID: &'static str = "modules";
}

impl Module for ServiceModule {
    fn name(&self) -> &str {
        "Modules"
    }

    fn initialise(&self) -> Result<(), ModuleError> {
        self.list();
        Ok(())
    }
}

impl ServiceModule {
    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::module::<Self>()
            .depends_on::<TerminalModule>()
            .depends_on::<ModuleCatalog>()
            .base_command("modules")
            .command(
                CommandSpec::new("list").about("List loaded modules"),
                |service, _| {
                    service.list();
                    Ok(())
                },
            )
            .build(|deps| {
                Ok(Self {
                    terminal: deps.get::<TerminalModule>()?,
                    catalog: deps.get::<ModuleCatalog>()?,
                })
            })
    }

    pub fn list(&self) {
        let modules = self.catalog.modules();
        let names: String = modules.iter().map(|id| format!(" {id}")).collect();
        self.terminal
            .write_line(&format!("Modules: ({}){names}", modules.len()));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::console::{MemoryWriter, ShutdownSignal};
    use crate::registry::RegistryBuilder;

    #[test]
    fn lists_modules_on_initialise() {
        let writer = MemoryWriter::new();
        let mut builder = RegistryBuilder::new();
        builder
            .register(TerminalModule::descriptor(
                Arc::new(writer.clone()),
                ShutdownSignal::new(),
            ))
            .unwrap();
        builder.register(ServiceModule::descriptor()).unwrap();
        builder
            .register(ModuleCatalog::descriptor(vec![
                "terminal".into(),
                "modules".into(),
            ]))
            .unwrap();
        let registry = builder.build();

        let service = registry.resolve_as::<ServiceModule>().unwrap();
        service.initialise().unwrap();
        assert_eq!(
            writer.lines(),
            vec!["Modules: (2) terminal modules".to_string()]
        );
    }
}
