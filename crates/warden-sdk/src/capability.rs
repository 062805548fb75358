use std::any::{type_name, Any};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::ConfigError;

/// Stable identity of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId(String);

impl CapabilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CapabilityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for CapabilityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A concrete type the registry can construct and hand out.
pub trait Capability: Any + Send + Sync {
    /// Identity under which the type is registered.
    const ID: &'static str;

    fn capability_id() -> CapabilityId
    where
        Self: Sized,
    {
        CapabilityId::new(Self::ID)
    }
}

/// Contract implemented by every module hosted by Warden.
pub trait Module: Send + Sync + 'static {
    /// Name used to tag operator-facing messages.
    fn name(&self) -> &str;

    /// Called once after construction and configuration loading.
    fn initialise(&self) -> Result<(), ModuleError>;

    /// Called during host shutdown, in reverse initialisation order.
    fn shutdown(&self) {}
}

/// Errors raised while constructing or initialising a module.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("dependency {0} was not declared by this capability")]
    UndeclaredDependency(CapabilityId),
    #[error("capability {id} is not a {expected}")]
    TypeMismatch {
        id: CapabilityId,
        expected: &'static str,
    },
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("initialisation failed: {0}")]
    Initialisation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A constructed singleton as stored by the registry.
#[derive(Clone)]
pub struct Instance {
    id: CapabilityId,
    object: Arc<dyn Any + Send + Sync>,
    module: Option<Arc<dyn Module>>,
}

impl Instance {
    pub(crate) fn new(
        id: CapabilityId,
        object: Arc<dyn Any + Send + Sync>,
        module: Option<Arc<dyn Module>>,
    ) -> Self {
        Self { id, object, module }
    }

    pub fn id(&self) -> &CapabilityId {
        &self.id
    }

    /// The module view of this instance, if the capability is a module.
    pub fn module(&self) -> Option<&Arc<dyn Module>> {
        self.module.as_ref()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.object).downcast_ref::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ModuleError> {
        Arc::clone(&self.object)
            .downcast::<T>()
            .map_err(|_| ModuleError::TypeMismatch {
                id: self.id.clone(),
                expected: type_name::<T>(),
            })
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("is_module", &self.module.is_some())
            .finish()
    }
}
