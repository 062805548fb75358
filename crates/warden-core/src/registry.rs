//! Capability registry and singleton container.
//!
//! Registration happens once, during startup, through [`RegistryBuilder`].
//! The resulting [`Registry`] is immutable: singletons are constructed on
//! first demand and cached in `OnceCell`s, so reads after startup never take
//! a lock.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use tracing::debug;
use warden_sdk::{Capability, CapabilityDescriptor, CapabilityId, Dependencies, Instance};

use crate::error::RegistryError;

struct Entry {
    descriptor: Arc<CapabilityDescriptor>,
    instance: OnceCell<Instance>,
}

/// Mutable registration phase of the registry.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: IndexMap<CapabilityId, Entry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how to build a capability. Identities are unique.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> Result<&mut Self, RegistryError> {
        let id = descriptor.id().clone();
        if self.entries.contains_key(&id) {
            return Err(RegistryError::DuplicateCapability(id));
        }
        debug!(capability = %id, "registered capability");
        self.entries.insert(
            id,
            Entry {
                descriptor: Arc::new(descriptor),
                instance: OnceCell::new(),
            },
        );
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries,
        }
    }
}

/// Read-only capability container.
pub struct Registry {
    entries: IndexMap<CapabilityId, Entry>,
}

impl Registry {
    /// Every registered identity, in registration order.
    pub fn all_capabilities(&self) -> Vec<CapabilityId> {
        self.entries.keys().cloned().collect()
    }

    /// Registered identities carrying the module marker, in registration
    /// order.
    pub fn all_modules(&self) -> Vec<CapabilityId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.descriptor.is_module())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn descriptor(&self, id: &CapabilityId) -> Option<&Arc<CapabilityDescriptor>> {
        self.entries.get(id).map(|entry| &entry.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<CapabilityDescriptor>> {
        self.entries.values().map(|entry| &entry.descriptor)
    }

    /// Whether the singleton for `id` has been constructed yet.
    pub fn is_constructed(&self, id: &CapabilityId) -> bool {
        self.entries
            .get(id)
            .map(|entry| entry.instance.get().is_some())
            .unwrap_or(false)
    }

    /// Return the singleton for `id`, constructing it and its dependencies
    /// on first demand.
    pub fn resolve(&self, id: &CapabilityId) -> Result<Instance, RegistryError> {
        let mut stack = Vec::new();
        self.resolve_inner(id, &mut stack)
    }

    pub fn resolve_as<T: Capability>(&self) -> Result<Arc<T>, RegistryError> {
        let id = T::capability_id();
        self.resolve(&id)?
            .downcast::<T>()
            .map_err(|source| RegistryError::Construction { id, source })
    }

    fn resolve_inner(
        &self,
        id: &CapabilityId,
        stack: &mut Vec<CapabilityId>,
    ) -> Result<Instance, RegistryError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| RegistryError::UnknownCapability(id.clone()))?;
        if let Some(instance) = entry.instance.get() {
            return Ok(instance.clone());
        }

        if let Some(start) = stack.iter().position(|seen| seen == id) {
            let mut path = stack[start..].to_vec();
            path.push(id.clone());
            return Err(RegistryError::CyclicDependency { path });
        }

        stack.push(id.clone());
        let mut resolved = HashMap::new();
        for dependency in entry.descriptor.dependencies() {
            let instance = self.resolve_inner(dependency, stack)?;
            resolved.insert(dependency.clone(), instance);
        }
        stack.pop();

        let instance = entry
            .descriptor
            .construct(&Dependencies::new(resolved))
            .map_err(|source| RegistryError::Construction {
                id: id.clone(),
                source,
            })?;
        debug!(capability = %id, "constructed capability");
        Ok(entry.instance.get_or_init(|| instance).clone())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("capabilities", &self.all_capabilities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use warden_sdk::{Module, ModuleError};

    use super::*;

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Clock;
    impl Capability for Clock {
        const ID: &'static str = "clock";
    }

    struct Journal {
        clock: Arc<Clock>,
    }
    impl Capability for Journal {
        const ID: &'static str = "journal";
    }
    impl Module for Journal {
        fn name(&self) -> &str {
            "JournalModule"
        }

        fn initialise(&self) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    struct Ping;
    impl Capability for Ping {
        const ID: &'static str = "ping";
    }

    struct Pong;
    impl Capability for Pong {
        const ID: &'static str = "pong";
    }

    fn clock() -> CapabilityDescriptor {
        CapabilityDescriptor::service::<Clock>().build(|_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(Clock)
        })
    }

    fn journal() -> CapabilityDescriptor {
        CapabilityDescriptor::module::<Journal>()
            .depends_on::<Clock>()
            .build(|deps| {
                Ok(Journal {
                    clock: deps.get::<Clock>()?,
                })
            })
    }

    #[test]
    fn resolves_dependencies_once_and_filters_modules() {
        let mut builder = RegistryBuilder::new();
        builder.register(journal()).unwrap();
        builder.register(clock()).unwrap();
        let registry = builder.build();

        assert_eq!(
            registry.all_capabilities(),
            vec![CapabilityId::new("journal"), CapabilityId::new("clock")]
        );
        assert_eq!(registry.all_modules(), vec![CapabilityId::new("journal")]);

        let before = BUILT.load(Ordering::SeqCst);
        let journal = registry.resolve_as::<Journal>().unwrap();
        let clock = registry.resolve_as::<Clock>().unwrap();
        assert!(Arc::ptr_eq(&journal.clock, &clock));
        registry.resolve_as::<Journal>().unwrap();
        assert_eq!(BUILT.load(Ordering::SeqCst) - before, 1);
    }

    #[test]
    fn unknown_and_duplicate_capabilities_are_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(journal()).unwrap();
        assert!(matches!(
            builder.register(journal()),
            Err(RegistryError::DuplicateCapability(id)) if id.as_str() == "journal"
        ));
        let registry = builder.build();
        assert!(matches!(
            registry.resolve(&CapabilityId::new("journal")),
            Err(RegistryError::UnknownCapability(id)) if id.as_str() == "clock"
        ));
    }

    #[test]
    fn cycles_are_fatal() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                CapabilityDescriptor::service::<Ping>()
                    .depends_on::<Pong>()
                    .build(|_| Ok(Ping)),
            )
            .unwrap();
        builder
            .register(
                CapabilityDescriptor::service::<Pong>()
                    .depends_on::<Ping>()
                    .build(|_| Ok(Pong)),
            )
            .unwrap();
        let registry = builder.build();

        let err = registry.resolve(&CapabilityId::new("ping")).unwrap_err();
        assert_eq!(err.to_string(), "cyclic dependency: ping -> pong -> ping");
        assert!(!registry.is_constructed(&CapabilityId::new("ping")));
    }
}
