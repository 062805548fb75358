use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, info, warn};
use warden_sdk::{
    CapabilityDescriptor, CapabilityId, EntryPoint, VersionPoint, ENTRY_SYMBOL, SDK_VERSION,
    VERSION_SYMBOL,
};

use crate::error::PluginLoadError;

/// A bundle that produced descriptors. The library, if any, must outlive
/// every instance built from those descriptors.
pub struct LoadedBundle {
    path: PathBuf,
    descriptors: Vec<CapabilityDescriptor>,
    library: Option<Arc<Library>>,
}

impl LoadedBundle {
    pub fn new(path: PathBuf, descriptors: Vec<CapabilityDescriptor>) -> Self {
        Self {
            path,
            descriptors,
            library: None,
        }
    }

    pub fn with_library(mut self, library: Library) -> Self {
        self.library = Some(Arc::new(library));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptors(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }
}

impl std::fmt::Debug for LoadedBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBundle")
            .field("path", &self.path)
            .field("descriptors", &self.descriptors.len())
            .field("native", &self.library.is_some())
            .finish()
    }
}

/// Turns one candidate file into a bundle.
pub trait BundleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedBundle, PluginLoadError>;
}

/// Loads native shared libraries built with `declare_warden_modules!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBundleLoader;

impl BundleLoader for NativeBundleLoader {
    fn load(&self, path: &Path) -> Result<LoadedBundle, PluginLoadError> {
        let path_buf = path.to_path_buf();
        // SAFETY: loading runs the library's initialisers. Bundles are
        // trusted code placed in the plugin directory by the operator.
        let library = unsafe { Library::new(&path_buf) }.map_err(|source| {
            PluginLoadError::LibraryLoad {
                path: path_buf.clone(),
                source,
            }
        })?;

        let found = unsafe {
            let version = library
                .get::<VersionPoint>(VERSION_SYMBOL)
                .map_err(|err| PluginLoadError::Invalid {
                    path: path_buf.clone(),
                    reason: format!("missing SDK version symbol: {err}"),
                })?;
            version()
        };
        if found != SDK_VERSION {
            return Err(PluginLoadError::IncompatibleVersion {
                path: path_buf,
                found,
                expected: SDK_VERSION,
            });
        }

        let export = unsafe {
            let entry = library
                .get::<EntryPoint>(ENTRY_SYMBOL)
                .map_err(|err| PluginLoadError::Invalid {
                    path: path_buf.clone(),
                    reason: format!("missing entry symbol: {err}"),
                })?;
            entry()
        };
        let descriptors = export.into_modules().into_descriptors();
        if descriptors.is_empty() {
            return Err(PluginLoadError::Empty { path: path_buf });
        }
        Ok(LoadedBundle::new(path_buf, descriptors).with_library(library))
    }
}

/// Outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Core descriptors first, then every accepted plugin descriptor.
    pub descriptors: Vec<CapabilityDescriptor>,
    /// Bundles whose libraries must stay loaded.
    pub bundles: Vec<LoadedBundle>,
    pub failures: Vec<PluginLoadError>,
}

impl DiscoveryReport {
    /// Split the report into descriptors and the bundle handles that keep
    /// their code mapped.
    pub fn into_parts(self) -> (Vec<CapabilityDescriptor>, Vec<LoadedBundle>) {
        (self.descriptors, self.bundles)
    }
}

pub struct PluginLoader {
    directory: PathBuf,
    loader: Box<dyn BundleLoader>,
    reserved: Vec<CapabilityId>,
}

impl PluginLoader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_loader(directory, NativeBundleLoader)
    }

    pub fn with_loader(directory: impl Into<PathBuf>, loader: impl BundleLoader + 'static) -> Self {
        Self {
            directory: directory.into(),
            loader: Box::new(loader),
            reserved: Vec::new(),
        }
    }

    /// Keep `id` away from plugins; the host registers it itself after
    /// discovery.
    pub fn reserve(mut self, id: CapabilityId) -> Self {
        self.reserved.push(id);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Collect `core` followed by every capability the plugin directory
    /// offers. Nothing in here is fatal.
    pub fn discover(&self, core: Vec<CapabilityDescriptor>) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut taken: HashSet<CapabilityId> = core
            .iter()
            .map(|descriptor| descriptor.id().clone())
            .chain(self.reserved.iter().cloned())
            .collect();
        report.descriptors = core;

        let candidates = match self.candidates() {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("plugin discovery skipped: {err}");
                report.failures.push(err);
                return report;
            }
        };

        for path in candidates {
            let bundle = match self.loader.load(&path) {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!("skipping plugin: {err}");
                    report.failures.push(err);
                    continue;
                }
            };

            let LoadedBundle {
                path,
                descriptors,
                library,
            } = bundle;
            let mut accepted = 0;
            for descriptor in descriptors {
                let id = descriptor.id().clone();
                if !taken.insert(id.clone()) {
                    let err = PluginLoadError::DuplicateCapability {
                        path: path.clone(),
                        id,
                    };
                    warn!("skipping capability: {err}");
                    report.failures.push(err);
                    continue;
                }
                debug!(capability = %id, path = %path.display(), "accepted plugin capability");
                report.descriptors.push(descriptor);
                accepted += 1;
            }
            info!("loaded {accepted} capabilities from {}", path.display());
            report.bundles.push(LoadedBundle {
                path,
                descriptors: Vec::new(),
                library,
            });
        }
        report
    }

    fn candidates(&self) -> Result<Vec<PathBuf>, PluginLoadError> {
        let dir_err = |source| PluginLoadError::Directory {
            path: self.directory.clone(),
            source,
        };
        fs::create_dir_all(&self.directory).map_err(dir_err)?;
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.directory)
            .map_err(dir_err)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("directory", &self.directory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use warden_sdk::Capability;

    use super::*;

    struct Alpha;
    impl Capability for Alpha {
        const ID: &'static str = "alpha";
    }

    struct Beta;
    impl Capability for Beta {
        const ID: &'static str = "beta";
    }

    /// Treats `*.bundle` files as bundles exporting the capabilities listed
    /// in their contents, one per line.
    struct ListingLoader;

    impl BundleLoader for ListingLoader {
        fn load(&self, path: &Path) -> Result<LoadedBundle, PluginLoadError> {
            if path.extension().and_then(|ext| ext.to_str()) != Some("bundle") {
                return Err(PluginLoadError::Invalid {
                    path: path.to_path_buf(),
                    reason: "not a bundle".into(),
                });
            }
            let contents = fs::read_to_string(path).unwrap();
            let descriptors = contents
                .lines()
                .map(|line| match line {
                    "alpha" => CapabilityDescriptor::service::<Alpha>().build(|_| Ok(Alpha)),
                    _ => CapabilityDescriptor::service::<Beta>().build(|_| Ok(Beta)),
                })
                .collect();
            Ok(LoadedBundle::new(path.to_path_buf(), descriptors))
        }
    }

    fn ids(report: &DiscoveryReport) -> Vec<&str> {
        report
            .descriptors
            .iter()
            .map(|descriptor| descriptor.id().as_str())
            .collect()
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        let report = PluginLoader::with_loader(&plugins, ListingLoader).discover(Vec::new());
        assert!(plugins.is_dir());
        assert!(report.descriptors.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn bad_files_do_not_block_other_bundles() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a-notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.bundle"), "beta\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let core = vec![CapabilityDescriptor::service::<Alpha>().build(|_| Ok(Alpha))];
        let report = PluginLoader::with_loader(dir.path(), ListingLoader).discover(core);

        assert_eq!(ids(&report), vec!["alpha", "beta"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.bundles.len(), 1);
    }

    #[test]
    fn duplicate_identities_are_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("dup.bundle"), "alpha\nbeta\n").unwrap();

        let core = vec![CapabilityDescriptor::service::<Alpha>().build(|_| Ok(Alpha))];
        let report = PluginLoader::with_loader(dir.path(), ListingLoader).discover(core);

        assert_eq!(ids(&report), vec!["alpha", "beta"]);
        assert!(matches!(
            &report.failures[..],
            [PluginLoadError::DuplicateCapability { id, .. }] if id.as_str() == "alpha"
        ));
    }

    #[test]
    fn reserved_identities_are_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("late.bundle"), "beta\n").unwrap();

        let report = PluginLoader::with_loader(dir.path(), ListingLoader)
            .reserve(CapabilityId::new("beta"))
            .discover(Vec::new());

        assert!(report.descriptors.is_empty());
        assert!(matches!(
            &report.failures[..],
            [PluginLoadError::DuplicateCapability { id, .. }] if id.as_str() == "beta"
        ));
    }

    #[test]
    fn native_loader_rejects_plain_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("libfake.so");
        fs::write(&path, "definitely not an ELF").unwrap();
        assert!(matches!(
            NativeBundleLoader.load(&path),
            Err(PluginLoadError::LibraryLoad { .. })
        ));
    }
}
