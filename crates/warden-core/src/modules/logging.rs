use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use warden_queue::Persistence;
use warden_sdk::prelude::*;

use super::{CapturedFrame, FileIoModule, ListenerModule, TerminalModule};

/// Name of the file frames are logged to, inside the log directory.
pub const NETWORK_LOG: &str = "network.log";

/// Persisted frame logging rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Frames from these source addresses are logged.
    pub source_addresses: Vec<String>,
    /// Log every ICMP frame regardless of its source.
    pub log_icmp: bool,
}

impl LoggingConfig {
    /// Source rules that parse as addresses. Anything else in the file is
    /// kept but ignored.
    pub fn source_ips(&self) -> Vec<IpAddr> {
        self.source_addresses
            .iter()
            .filter_map(|rule| rule.parse().ok())
            .collect()
    }

    pub fn matches(&self, frame: &CapturedFrame) -> bool {
        (self.log_icmp && frame.is_icmp()) || self.source_ips().contains(&frame.source)
    }
}

/// Writes captured frames matching the configured rules to the network log.
pub struct LoggingModule {
    terminal: Arc<TerminalModule>,
    listener: Arc<ListenerModule>,
    files: Arc<FileIoModule>,
    config: Arc<ConfigSlot<LoggingConfig>>,
    log_path: PathBuf,
}

impl Capability for LoggingModule {
    const ID: &'static str = "logging";
}

impl Module for LoggingModule {
    fn name(&self) -> &str {
        "Logging"
    }

    fn initialise(&self) -> Result<(), ModuleError> {
        let key = self
            .files
            .open_reader(&self.log_path, Persistence::Dedicated)
            .map_err(|err| ModuleError::Initialisation(err.to_string()))?;

        let files = Arc::clone(&self.files);
        let config = Arc::clone(&self.config);
        self.listener.subscribe(move |frame| {
            if !config.read(|rules| rules.matches(frame)) {
                return;
            }
            if let Err(err) = files.append_text(&key, &format!("{frame}\n")) {
                warn!("dropping frame log entry: {err}");
            }
        });
        Ok(())
    }
}

impl LoggingModule {
    pub fn descriptor(log_dir: PathBuf) -> CapabilityDescriptor {
        CapabilityDescriptor::module::<Self>()
            .depends_on::<FileIoModule>()
            .depends_on::<ListenerModule>()
            .depends_on::<TerminalModule>()
            .base_command("logging")
            .command(
                CommandSpec::new("start")
                    .param("device")
                    .about("Dump a device's traffic to disk"),
                |logging, args| {
                    logging.listener.start_dump(args.get(0)?);
                    Ok(())
                },
            )
            .command(
                CommandSpec::new("stop")
                    .param("device")
                    .about("Stop dumping a device"),
                |logging, args| {
                    logging.listener.stop_dump(args.get(0)?);
                    Ok(())
                },
            )
            .command(
                CommandSpec::new("list").group("rules").about("Show logging rules"),
                |logging, _| {
                    logging.list_rules();
                    Ok(())
                },
            )
            .command(
                CommandSpec::new("icmp")
                    .group("rules")
                    .param("enabled")
                    .about("Log ICMP frames (true or false)"),
                |logging, args| logging.set_icmp(args.get(0)?),
            )
            .command(
                CommandSpec::new("add")
                    .group("rules ip")
                    .param("address")
                    .about("Log frames from a source address"),
                |logging, args| logging.add_source(args.get(0)?),
            )
            .command(
                CommandSpec::new("remove")
                    .group("rules ip")
                    .param("address")
                    .about("Stop logging a source address"),
                |logging, args| logging.remove_source(args.get(0)?),
            )
            .command(
                CommandSpec::new("list")
                    .group("rules ips")
                    .about("List logged source addresses"),
                |logging, _| {
                    logging.list_sources();
                    Ok(())
                },
            )
            .config("logging.json", |logging| logging.config.as_ref())
            .build(move |deps| {
                Ok(Self {
                    terminal: deps.get::<TerminalModule>()?,
                    listener: deps.get::<ListenerModule>()?,
                    files: deps.get::<FileIoModule>()?,
                    config: Arc::new(ConfigSlot::new()),
                    log_path: log_dir.join(NETWORK_LOG),
                })
            })
    }

    pub fn config(&self) -> LoggingConfig {
        self.config.read(LoggingConfig::clone)
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    fn info(&self, text: &str) {
        self.terminal.info(self.name(), text);
    }

    fn error(&self, text: &str) {
        self.terminal.error(self.name(), text);
    }

    fn list_rules(&self) {
        self.info("LOGGING RULES");
        self.info("| Source IP Rules");
        self.list_sources();
        let log_icmp = self.config.read(|rules| rules.log_icmp);
        self.info(&format!("| Log ICMP : {log_icmp}"));
    }

    fn list_sources(&self) {
        for ip in self.config.read(LoggingConfig::source_ips) {
            self.info(&format!(" - {ip}"));
        }
    }

    fn set_icmp(&self, raw: &str) -> Result<(), CommandError> {
        let Ok(enabled) = raw.parse::<bool>() else {
            self.error("Invalid argument; either true or false");
            return Ok(());
        };
        self.config
            .update(|rules| rules.log_icmp = enabled)
            .map_err(anyhow::Error::from)?;
        self.info("ICMP logging rule updated");
        Ok(())
    }

    fn add_source(&self, raw: &str) -> Result<(), CommandError> {
        let Ok(ip) = raw.parse::<IpAddr>() else {
            self.error("Input is not a valid IP address");
            return Ok(());
        };
        let added = self
            .config
            .update(|rules| {
                if rules.source_ips().contains(&ip) {
                    false
                } else {
                    rules.source_addresses.push(ip.to_string());
                    true
                }
            })
            .map_err(anyhow::Error::from)?;
        if added {
            self.info("Logging rule added");
        } else {
            self.error("Logging rule already exists");
        }
        Ok(())
    }

    fn remove_source(&self, raw: &str) -> Result<(), CommandError> {
        let Ok(ip) = raw.parse::<IpAddr>() else {
            self.error("Input is not a valid IP address");
            return Ok(());
        };
        let removed = self
            .config
            .update(|rules| {
                let before = rules.source_addresses.len();
                rules
                    .source_addresses
                    .retain(|rule| rule.parse::<IpAddr>().ok() != Some(ip));
                rules.source_addresses.len() != before
            })
            .map_err(anyhow::Error::from)?;
        if removed {
            self.info("Logging rule removed");
        } else {
            self.error("Logging rule does not exist");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use warden_queue::QueueOptions;
    use warden_sdk::read_json;

    use super::*;
    use crate::console::{MemoryWriter, ShutdownSignal};
    use crate::modules::listener::tests::{frame, FakeBackend};
    use crate::modules::Transport;
    use crate::registry::{Registry, RegistryBuilder};

    fn registry(root: &std::path::Path, writer: &MemoryWriter) -> Registry {
        let mut builder = RegistryBuilder::new();
        builder
            .register(TerminalModule::descriptor(
                Arc::new(writer.clone()),
                ShutdownSignal::new(),
            ))
            .unwrap();
        builder
            .register(FileIoModule::descriptor(QueueOptions::default()))
            .unwrap();
        builder
            .register(ListenerModule::descriptor(
                Arc::new(FakeBackend::default()),
                root.join("logs"),
            ))
            .unwrap();
        builder
            .register(LoggingModule::descriptor(root.join("logs")))
            .unwrap();
        builder.build()
    }

    fn run(registry: &Registry, usage: &str, args: &[&str]) {
        let descriptor = registry.descriptor(&LoggingModule::capability_id()).unwrap();
        let command = descriptor
            .commands()
            .iter()
            .find(|command| command.usage().starts_with(usage))
            .unwrap();
        let instance = registry.resolve(descriptor.id()).unwrap();
        let args = CommandArgs::new(args.iter().map(|arg| arg.to_string()).collect());
        command.invoke(&instance, &args).unwrap();
    }

    #[test]
    fn rule_commands_update_and_persist_config() {
        let dir = tempdir().unwrap();
        let writer = MemoryWriter::new();
        let registry = registry(dir.path(), &writer);
        let descriptor = registry.descriptor(&LoggingModule::capability_id()).unwrap();
        let instance = registry.resolve(descriptor.id()).unwrap();
        descriptor
            .config()
            .unwrap()
            .load_into(&instance, &dir.path().join("config"))
            .unwrap();

        run(&registry, "rules ip add", &["10.0.0.1"]);
        run(&registry, "rules ip add", &["10.0.0.1"]);
        run(&registry, "rules ip add", &["not-an-ip"]);
        run(&registry, "rules icmp", &["true"]);
        run(&registry, "rules icmp", &["maybe"]);
        run(&registry, "rules ip remove", &["10.0.0.9"]);

        let stored: LoggingConfig = read_json(&dir.path().join("config/logging.json")).unwrap();
        assert_eq!(
            stored,
            LoggingConfig {
                source_addresses: vec!["10.0.0.1".into()],
                log_icmp: true,
            }
        );

        writer.clear();
        run(&registry, "rules list", &[]);
        assert_eq!(
            writer.lines(),
            vec![
                "[INFO] Logging >> LOGGING RULES".to_string(),
                "[INFO] Logging >> | Source IP Rules".to_string(),
                "[INFO] Logging >>  - 10.0.0.1".to_string(),
                "[INFO] Logging >> | Log ICMP : true".to_string(),
            ]
        );
    }

    #[test]
    fn matching_frames_are_appended_to_network_log() {
        let dir = tempdir().unwrap();
        let writer = MemoryWriter::new();
        let registry = registry(dir.path(), &writer);
        let logging = registry.resolve_as::<LoggingModule>().unwrap();
        logging.initialise().unwrap();
        logging
            .config
            .update(|rules| rules.source_addresses.push("10.0.0.1".into()))
            .unwrap();

        let listener = registry.resolve_as::<ListenerModule>().unwrap();
        let tcp = Transport::Tcp {
            source_port: 22,
            destination_port: 40000,
        };
        listener.publish(&frame([10, 0, 0, 1], tcp));
        listener.publish(&frame([10, 0, 0, 2], tcp));
        listener.publish(&frame([10, 0, 0, 3], Transport::Icmp { checksum: 1, sequence: 1 }));

        let files = registry.resolve_as::<FileIoModule>().unwrap();
        let contents = files.read_all(logging.log_path()).unwrap().wait().unwrap();
        let contents = String::from_utf8(contents).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("TCP 10.0.0.1:22 => 10.0.0.254:40000"));
        assert!(fs::metadata(logging.log_path()).unwrap().is_file());
    }
}
