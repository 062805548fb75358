use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::{
    load_or_default, Capability, CapabilityId, CommandArgs, CommandError, ConfigError,
    ConfigRecord, ConfigSlot, ConfigSource, Instance, Module, ModuleError,
};

type Constructor = Arc<dyn Fn(&Dependencies) -> Result<Instance, ModuleError> + Send + Sync>;
type ConfigLoader = Arc<dyn Fn(&Instance, &Path) -> Result<ConfigSource, ConfigError> + Send + Sync>;

/// Type-erased command callable bound to its owning capability type.
pub type CommandHandler =
    Arc<dyn Fn(&Instance, &CommandArgs) -> Result<(), CommandError> + Send + Sync>;

/// Resolved dependencies handed to a constructor.
///
/// Only the dependencies the descriptor declared are visible.
#[derive(Debug, Default)]
pub struct Dependencies {
    resolved: HashMap<CapabilityId, Instance>,
}

impl Dependencies {
    pub fn new(resolved: HashMap<CapabilityId, Instance>) -> Self {
        Self { resolved }
    }

    pub fn get<T: Capability>(&self) -> Result<Arc<T>, ModuleError> {
        self.instance(&T::capability_id())?.downcast::<T>()
    }

    pub fn instance(&self, id: &CapabilityId) -> Result<&Instance, ModuleError> {
        self.resolved
            .get(id)
            .ok_or_else(|| ModuleError::UndeclaredDependency(id.clone()))
    }
}

/// Declaration of a single operator command, before it is bound to a
/// handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    alias: String,
    group: Option<String>,
    params: Vec<String>,
    about: Option<String>,
}

impl CommandSpec {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            group: None,
            params: Vec::new(),
            about: None,
        }
    }

    /// Space-delimited group path, e.g. `"rules ip"`.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = Some(about.into());
        self
    }
}

/// A command bound to its owning capability.
#[derive(Clone)]
pub struct CommandDescriptor {
    alias: String,
    group: Vec<String>,
    params: Vec<String>,
    about: Option<String>,
    owner: CapabilityId,
    handler: CommandHandler,
}

impl CommandDescriptor {
    pub fn new(spec: CommandSpec, owner: CapabilityId, handler: CommandHandler) -> Self {
        let group = spec
            .group
            .as_deref()
            .map(|group| {
                group
                    .split(' ')
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            alias: spec.alias,
            group,
            params: spec.params,
            about: spec.about,
            owner,
            handler,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn group(&self) -> &[String] {
        &self.group
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn about(&self) -> Option<&str> {
        self.about.as_deref()
    }

    pub fn owner(&self) -> &CapabilityId {
        &self.owner
    }

    /// Group path followed by the alias and parameter placeholders, e.g.
    /// `rules ip add <address>`.
    pub fn usage(&self) -> String {
        let mut parts: Vec<String> = self.group.clone();
        parts.push(self.alias.clone());
        parts.extend(self.params.iter().map(|param| format!("<{param}>")));
        parts.join(" ")
    }

    pub fn invoke(&self, instance: &Instance, args: &CommandArgs) -> Result<(), CommandError> {
        (self.handler)(instance, args)
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("alias", &self.alias)
            .field("group", &self.group)
            .field("params", &self.params)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Binds a persisted configuration file to a capability's [`ConfigSlot`].
#[derive(Clone)]
pub struct ConfigBinding {
    file_name: String,
    load: ConfigLoader,
}

impl ConfigBinding {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Load `<config_dir>/<file_name>` (or its defaults) into the instance.
    pub fn load_into(
        &self,
        instance: &Instance,
        config_dir: &Path,
    ) -> Result<ConfigSource, ConfigError> {
        (self.load)(instance, &config_dir.join(&self.file_name))
    }
}

impl fmt::Debug for ConfigBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBinding")
            .field("file_name", &self.file_name)
            .finish()
    }
}

/// Everything the host knows about a capability before constructing it.
pub struct CapabilityDescriptor {
    id: CapabilityId,
    is_module: bool,
    dependencies: Vec<CapabilityId>,
    base_command: Option<String>,
    commands: Vec<CommandDescriptor>,
    config: Option<ConfigBinding>,
    constructor: Constructor,
}

impl CapabilityDescriptor {
    /// Start describing a module capability.
    pub fn module<M: Capability + Module>() -> DescriptorBuilder<M> {
        DescriptorBuilder::new(true, upcast_module::<M>)
    }

    /// Start describing a plain service capability.
    pub fn service<S: Capability>() -> DescriptorBuilder<S> {
        DescriptorBuilder::new(false, |_| None)
    }

    pub fn id(&self) -> &CapabilityId {
        &self.id
    }

    pub fn is_module(&self) -> bool {
        self.is_module
    }

    pub fn dependencies(&self) -> &[CapabilityId] {
        &self.dependencies
    }

    pub fn base_command(&self) -> Option<&str> {
        self.base_command.as_deref()
    }

    pub fn commands(&self) -> &[CommandDescriptor] {
        &self.commands
    }

    pub fn config(&self) -> Option<&ConfigBinding> {
        self.config.as_ref()
    }

    pub fn construct(&self, dependencies: &Dependencies) -> Result<Instance, ModuleError> {
        (self.constructor)(dependencies)
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("id", &self.id)
            .field("is_module", &self.is_module)
            .field("dependencies", &self.dependencies)
            .field("base_command", &self.base_command)
            .field("commands", &self.commands)
            .field("config", &self.config)
            .finish()
    }
}

fn upcast_module<M: Module>(module: Arc<M>) -> Option<Arc<dyn Module>> {
    Some(module)
}

/// Builder returned by [`CapabilityDescriptor::module`] and
/// [`CapabilityDescriptor::service`].
pub struct DescriptorBuilder<T> {
    is_module: bool,
    dependencies: Vec<CapabilityId>,
    base_command: Option<String>,
    commands: Vec<CommandDescriptor>,
    config: Option<ConfigBinding>,
    upcast: fn(Arc<T>) -> Option<Arc<dyn Module>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Capability> DescriptorBuilder<T> {
    fn new(is_module: bool, upcast: fn(Arc<T>) -> Option<Arc<dyn Module>>) -> Self {
        Self {
            is_module,
            dependencies: Vec::new(),
            base_command: None,
            commands: Vec::new(),
            config: None,
            upcast,
            _marker: PhantomData,
        }
    }

    pub fn depends_on<D: Capability>(self) -> Self {
        self.depends_on_id(D::capability_id())
    }

    pub fn depends_on_id(mut self, id: impl Into<CapabilityId>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    pub fn base_command(mut self, name: impl Into<String>) -> Self {
        self.base_command = Some(name.into());
        self
    }

    pub fn command<F>(mut self, spec: CommandSpec, handler: F) -> Self
    where
        F: Fn(&T, &CommandArgs) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        let handler: CommandHandler = Arc::new(move |instance: &Instance, args: &CommandArgs| {
            let target = instance.downcast_ref::<T>().ok_or_else(|| {
                CommandError::Rejected(format!("capability {} has an unexpected type", instance.id()))
            })?;
            handler(target, args)
        });
        self.commands
            .push(CommandDescriptor::new(spec, T::capability_id(), handler));
        self
    }

    /// Bind a configuration record stored in `file_name` to the slot returned
    /// by `slot`.
    pub fn config<C, A>(mut self, file_name: impl Into<String>, slot: A) -> Self
    where
        C: ConfigRecord,
        A: Fn(&T) -> &ConfigSlot<C> + Send + Sync + 'static,
    {
        let load: ConfigLoader = Arc::new(move |instance: &Instance, path: &Path| {
            let target = instance
                .downcast_ref::<T>()
                .ok_or_else(|| ConfigError::TargetMismatch(instance.id().to_string()))?;
            let (value, source) = load_or_default::<C>(path)?;
            slot(target).install(value, path.to_path_buf());
            Ok(source)
        });
        self.config = Some(ConfigBinding {
            file_name: file_name.into(),
            load,
        });
        self
    }

    /// Finish the descriptor with the constructor used by the registry.
    pub fn build<F>(self, constructor: F) -> CapabilityDescriptor
    where
        F: Fn(&Dependencies) -> Result<T, ModuleError> + Send + Sync + 'static,
    {
        let id = T::capability_id();
        let upcast = self.upcast;
        let instance_id = id.clone();
        let constructor: Constructor = Arc::new(move |dependencies: &Dependencies| {
            let object = Arc::new(constructor(dependencies)?);
            let module = upcast(Arc::clone(&object));
            Ok(Instance::new(instance_id.clone(), object, module))
        });
        CapabilityDescriptor {
            id,
            is_module: self.is_module,
            dependencies: self.dependencies,
            base_command: self.base_command,
            commands: self.commands,
            config: self.config,
            constructor,
        }
    }
}
