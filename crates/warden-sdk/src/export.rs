use crate::CapabilityDescriptor;

/// Version of the module contract. Bundles built against a different
/// version are refused by the loader.
pub const SDK_VERSION: u32 = 1;

/// Symbol exported by [`declare_warden_modules!`](crate::declare_warden_modules).
pub const ENTRY_SYMBOL: &[u8] = b"warden_module_entrypoint\0";

/// Symbol reporting the SDK version a bundle was compiled against.
pub const VERSION_SYMBOL: &[u8] = b"warden_sdk_version\0";

#[allow(improper_ctypes_definitions)]
pub type EntryPoint = unsafe extern "C" fn() -> PluginExport;

pub type VersionPoint = unsafe extern "C" fn() -> u32;

/// Ordered set of capability descriptors exported by one bundle.
#[derive(Debug, Default)]
pub struct ModuleSet {
    descriptors: Vec<CapabilityDescriptor>,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn into_descriptors(self) -> Vec<CapabilityDescriptor> {
        self.descriptors
    }
}

/// Value returned from a bundle's entry point.
#[derive(Debug)]
pub struct PluginExport {
    modules: ModuleSet,
}

impl PluginExport {
    pub fn new(modules: ModuleSet) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    pub fn into_modules(self) -> ModuleSet {
        self.modules
    }
}
