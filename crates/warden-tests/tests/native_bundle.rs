use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use warden_core::modules::NullCaptureBackend;
use warden_core::{BundleLoader, Host, HostConfig, MemoryWriter, NativeBundleLoader};
use warden_sdk::CapabilityId;

/// The stats cdylib cargo built next to this test binary.
fn stats_library() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    let stem = format!("{DLL_PREFIX}warden_stats_plugin");

    for dir in [deps, deps.parent().unwrap()] {
        let exact = dir.join(format!("{stem}{DLL_SUFFIX}"));
        if exact.is_file() {
            return exact;
        }
    }
    fs::read_dir(deps)
        .unwrap()
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&stem) && name.ends_with(DLL_SUFFIX))
        })
        .unwrap_or_else(|| panic!("{stem}{DLL_SUFFIX} not found under {}", deps.display()))
}

fn install_stats(plugins: &Path) -> PathBuf {
    fs::create_dir_all(plugins).unwrap();
    let installed = plugins.join(format!("{DLL_PREFIX}warden_stats_plugin{DLL_SUFFIX}"));
    fs::copy(stats_library(), &installed).unwrap();
    installed
}

#[test]
fn native_loader_reads_the_stats_bundle() {
    let dir = tempdir().unwrap();
    let installed = install_stats(dir.path());

    let bundle = NativeBundleLoader.load(&installed).unwrap();
    let ids: Vec<_> = bundle
        .descriptors()
        .iter()
        .map(|descriptor| descriptor.id().clone())
        .collect();
    assert_eq!(ids, vec![CapabilityId::new("stats")]);
    assert_eq!(bundle.path(), installed.as_path());
    // Keep the library mapped for the rest of the process, as the host does.
    std::mem::forget(bundle);
}

#[test]
fn stats_bundle_loads_beside_a_stray_file() {
    let dir = tempdir().unwrap();
    let plugins = dir.path().join("plugins");
    install_stats(&plugins);
    fs::write(plugins.join("README.txt"), "drop bundles here").unwrap();

    let writer = MemoryWriter::new();
    let host = Host::start(
        HostConfig {
            plugin_dir: plugins,
            config_dir: dir.path().join("config"),
            log_dir: dir.path().join("logs"),
            ..HostConfig::default()
        },
        Arc::new(writer.clone()),
        Arc::new(NullCaptureBackend),
    )
    .unwrap();

    assert_eq!(host.plugin_failures().len(), 1);
    assert!(host.plugin_failures()[0].contains("README.txt"));
    assert!(host.failed_modules().is_empty());
    assert!(host.active_modules().contains(&CapabilityId::new("stats")));
    assert!(writer.contains("[INFO] Statistics >> Custom statistics module loaded"));

    writer.clear();
    host.dispatcher().dispatch("stats list").unwrap();
    assert_eq!(
        writer.lines(),
        vec![
            "[INFO] Statistics >> Caught this session: 0".to_string(),
            "[INFO] Statistics >> Caught overall     : 0".to_string(),
        ]
    );
}
