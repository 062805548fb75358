use std::collections::HashSet;
use std::io::BufRead;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};
use warden_queue::QueueOptions;
use warden_sdk::{Capability, CapabilityId, Instance, Module, ModuleError};

use crate::commands::CommandTree;
use crate::console::{ConsoleWriter, ShutdownSignal};
use crate::dispatch::Dispatcher;
use crate::error::HostError;
use crate::modules::{
    core_capabilities, CaptureBackend, CoreContext, FileIoModule, ModuleCatalog, TerminalModule,
};
use crate::plugins::{LoadedBundle, PluginLoader};
use crate::registry::{Registry, RegistryBuilder};

const HOST_TAG: &str = "Host";

/// Locations and tunables for a host instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub plugin_dir: PathBuf,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub queue: QueueOptions,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("plugins"),
            config_dir: PathBuf::from("config"),
            log_dir: PathBuf::from("logs"),
            queue: QueueOptions::default(),
        }
    }
}

/// A started host: every module constructed and initialised, the command
/// tree built and ready for operator input.
pub struct Host {
    config: HostConfig,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    terminal: Arc<TerminalModule>,
    initialised: Vec<(CapabilityId, Arc<dyn Module>)>,
    failed: Vec<CapabilityId>,
    plugin_failures: Vec<String>,
    signal: ShutdownSignal,
    stopped: AtomicBool,
    bundles: Vec<LoadedBundle>,
}

impl Host {
    /// Start a host that loads native bundles from `config.plugin_dir`.
    pub fn start(
        config: HostConfig,
        writer: Arc<dyn ConsoleWriter>,
        backend: Arc<dyn CaptureBackend>,
    ) -> Result<Self, HostError> {
        let loader = PluginLoader::new(config.plugin_dir.clone());
        Self::start_with_loader(config, writer, backend, loader)
    }

    pub fn start_with_loader(
        config: HostConfig,
        writer: Arc<dyn ConsoleWriter>,
        backend: Arc<dyn CaptureBackend>,
        loader: PluginLoader,
    ) -> Result<Self, HostError> {
        let signal = ShutdownSignal::new();
        let core = core_capabilities(CoreContext {
            writer,
            shutdown: signal.clone(),
            backend,
            log_dir: config.log_dir.clone(),
            queue: config.queue,
        });

        let report = loader
            .reserve(ModuleCatalog::capability_id())
            .discover(core);
        let plugin_failures: Vec<String> =
            report.failures.iter().map(ToString::to_string).collect();
        let (descriptors, bundles) = report.into_parts();

        let module_ids: Vec<CapabilityId> = descriptors
            .iter()
            .filter(|descriptor| descriptor.is_module())
            .map(|descriptor| descriptor.id().clone())
            .collect();
        let mut builder = RegistryBuilder::new();
        for descriptor in descriptors {
            builder.register(descriptor)?;
        }
        builder.register(ModuleCatalog::descriptor(module_ids))?;
        let registry = Arc::new(builder.build());

        let terminal = registry.resolve_as::<TerminalModule>()?;
        for failure in &plugin_failures {
            terminal.warn(HOST_TAG, &format!("Skipped plugin: {failure}"));
        }

        let mut modules = Vec::new();
        for id in registry.all_modules() {
            let instance = registry.resolve(&id)?;
            if let Some(module) = instance.module() {
                modules.push((id, instance.clone(), Arc::clone(module)));
            }
        }

        let mut initialised = Vec::new();
        let mut failed = Vec::new();
        for (id, instance, module) in modules {
            let outcome = load_config(&registry, &instance, &config.config_dir)
                .and_then(|()| module.initialise());

            match outcome {
                Ok(()) => initialised.push((id, module)),
                Err(err) => {
                    error!(capability = %id, "module failed to initialise: {err}");
                    terminal.critical(module.name(), &format!("Failed to initialise: {err}"));
                    failed.push(id);
                }
            }
        }

        let inactive: HashSet<&CapabilityId> = failed.iter().collect();
        let (tree, conflicts) = CommandTree::build(
            registry
                .descriptors()
                .filter(|descriptor| !inactive.contains(descriptor.id()))
                .map(Arc::as_ref),
        );
        for conflict in &conflicts {
            terminal.warn(HOST_TAG, &format!("Command conflict: {conflict}"));
        }
        terminal.set_commands(tree.describe());

        info!(
            modules = initialised.len(),
            failed = failed.len(),
            bundles = bundles.len(),
            "host started"
        );
        let dispatcher = Arc::new(Dispatcher::new(
            tree,
            Arc::clone(&registry),
            Arc::clone(&terminal),
        ));

        Ok(Self {
            config,
            registry,
            dispatcher,
            terminal,
            initialised,
            failed,
            plugin_failures,
            signal,
            stopped: AtomicBool::new(false),
            bundles,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn terminal(&self) -> &Arc<TerminalModule> {
        &self.terminal
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    /// Modules that initialised successfully, in initialisation order.
    pub fn active_modules(&self) -> Vec<CapabilityId> {
        self.initialised.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn failed_modules(&self) -> &[CapabilityId] {
        &self.failed
    }

    pub fn plugin_failures(&self) -> &[String] {
        &self.plugin_failures
    }

    /// Feed `input` to the dispatcher on the `input-loop` thread until end
    /// of input or the shutdown signal, then shut the host down.
    pub fn run_until_stopped<I>(&self, input: I) -> Result<(), HostError>
    where
        I: BufRead + Send + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        let signal = self.signal.clone();
        thread::Builder::new()
            .name("input-loop".into())
            .spawn(move || {
                for line in input.lines() {
                    if signal.is_triggered() {
                        break;
                    }
                    match line {
                        Ok(line) => {
                            let _ = dispatcher.dispatch(&line);
                        }
                        Err(err) => {
                            warn!("failed to read operator input: {err}");
                            break;
                        }
                    }
                }
                signal.trigger();
            })
            .map_err(|source| HostError::Thread {
                name: "input-loop",
                source,
            })?;

        self.signal.wait();
        self.shutdown();
        Ok(())
    }

    /// Shut modules down in reverse initialisation order and drain every
    /// resource queue. Runs once.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.signal.trigger();
        for (id, module) in self.initialised.iter().rev() {
            if catch_unwind(AssertUnwindSafe(|| module.shutdown())).is_err() {
                warn!(capability = %id, "module panicked during shutdown");
            }
        }
        if let Ok(files) = self.registry.resolve_as::<FileIoModule>() {
            files.pool().drain_all();
        }
        info!("host stopped");
    }
}

/// Load the configuration record bound to `instance`, if any, before it is
/// initialised.
fn load_config(
    registry: &Registry,
    instance: &Instance,
    config_dir: &Path,
) -> Result<(), ModuleError> {
    let Some(binding) = registry
        .descriptor(instance.id())
        .and_then(|descriptor| descriptor.config())
    else {
        return Ok(());
    };
    let source = binding.load_into(instance, config_dir)?;
    debug!(capability = %instance.id(), file = binding.file_name(), ?source, "configuration ready");
    Ok(())
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
        // Instances built from plugin code may still be referenced by the
        // input thread, so bundle code stays mapped until the process exits.
        for bundle in self.bundles.drain(..) {
            std::mem::forget(bundle);
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("modules", &self.active_modules())
            .field("failed", &self.failed)
            .field("bundles", &self.bundles)
            .finish()
    }
}
