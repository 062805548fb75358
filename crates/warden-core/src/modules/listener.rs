use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::warn;
use warden_sdk::prelude::*;

use super::TerminalModule;

/// Transport layer summary of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp { source_port: u16, destination_port: u16 },
    Udp { source_port: u16, destination_port: u16 },
    Icmp { checksum: u16, sequence: u16 },
    Other { protocol: u8 },
}

/// A frame delivered by the capture backend, already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub device: String,
    pub timestamp: DateTime<Utc>,
    pub source: IpAddr,
    pub destination: IpAddr,
    pub transport: Transport,
}

impl CapturedFrame {
    pub fn is_icmp(&self) -> bool {
        matches!(self.transport, Transport::Icmp { .. })
    }
}

impl fmt::Display for CapturedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Captured on DEV {} [{}] ",
            self.device,
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f")
        )?;
        match self.transport {
            Transport::Tcp {
                source_port,
                destination_port,
            } => write!(
                f,
                "TCP {}:{source_port} => {}:{destination_port}",
                self.source, self.destination
            ),
            Transport::Udp {
                source_port,
                destination_port,
            } => write!(
                f,
                "UDP {}:{source_port} => {}:{destination_port}",
                self.source, self.destination
            ),
            Transport::Icmp { checksum, sequence } => write!(
                f,
                "ICMP {} - CHECK {checksum} SEQ {sequence}",
                self.source
            ),
            Transport::Other { protocol } => write!(
                f,
                "PROTO {protocol} {} => {}",
                self.source, self.destination
            ),
        }
    }
}

/// Boundary to the packet capture library.
pub trait CaptureBackend: Send + Sync {
    /// Names of the devices that can be captured.
    fn devices(&self) -> Vec<String>;

    /// Start writing the traffic of `device` to `destination`.
    fn start_dump(&self, device: &str, destination: &Path) -> anyhow::Result<()>;

    fn stop_dump(&self, device: &str) -> anyhow::Result<()>;
}

/// Backend used when no capture library is linked in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCaptureBackend;

impl CaptureBackend for NullCaptureBackend {
    fn devices(&self) -> Vec<String> {
        Vec::new()
    }

    fn start_dump(&self, device: &str, _destination: &Path) -> anyhow::Result<()> {
        Err(anyhow!("no capture backend available for {device}"))
    }

    fn stop_dump(&self, device: &str) -> anyhow::Result<()> {
        Err(anyhow!("no capture backend available for {device}"))
    }
}

pub type FrameSubscriber = Arc<dyn Fn(&CapturedFrame) + Send + Sync>;

/// Owns the capture backend, fans decoded frames out to subscribers and
/// tracks which devices are being dumped to disk.
pub struct ListenerModule {
    terminal: Arc<TerminalModule>,
    backend: Arc<dyn CaptureBackend>,
    dump_dir: PathBuf,
    subscribers: RwLock<Vec<FrameSubscriber>>,
    dumping: Mutex<BTreeSet<String>>,
}

impl Capability for ListenerModule {
    const ID: &'static str = "listener";
}

impl Module for ListenerModule {
    fn name(&self) -> &str {
        "Listener"
    }

    fn initialise(&self) -> Result<(), ModuleError> {
        let devices: String = self
            .backend
            .devices()
            .iter()
            .map(|device| format!(" {device}"))
            .collect();
        self.terminal
            .info(self.name(), &format!("Devices detected:{devices}"));
        self.terminal.info(self.name(), "Loaded listener service");
        Ok(())
    }

    fn shutdown(&self) {
        let devices: Vec<String> = self.dumping.lock().iter().cloned().collect();
        for device in devices {
            self.stop_dump(&device);
        }
    }
}

impl ListenerModule {
    pub fn descriptor(backend: Arc<dyn CaptureBackend>, dump_dir: PathBuf) -> CapabilityDescriptor {
        CapabilityDescriptor::module::<Self>()
            .depends_on::<TerminalModule>()
            .base_command("listener")
            .command(
                CommandSpec::new("list").about("List devices being dumped"),
                |listener, _| {
                    listener.list();
                    Ok(())
                },
            )
            .build(move |deps| {
                Ok(Self {
                    terminal: deps.get::<TerminalModule>()?,
                    backend: Arc::clone(&backend),
                    dump_dir: dump_dir.clone(),
                    subscribers: RwLock::new(Vec::new()),
                    dumping: Mutex::new(BTreeSet::new()),
                })
            })
    }

    pub fn subscribe(&self, subscriber: impl Fn(&CapturedFrame) + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(subscriber));
    }

    /// Deliver `frame` to every subscriber. A panicking subscriber does not
    /// stop delivery to the others.
    pub fn publish(&self, frame: &CapturedFrame) {
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            if catch_unwind(AssertUnwindSafe(|| subscriber(frame))).is_err() {
                warn!(device = %frame.device, "frame subscriber panicked");
            }
        }
    }

    pub fn devices(&self) -> Vec<String> {
        self.backend.devices()
    }

    pub fn dumping(&self) -> Vec<String> {
        self.dumping.lock().iter().cloned().collect()
    }

    /// Start writing the traffic of `device` to `<dump_dir>/<device>.pcap`.
    pub fn start_dump(&self, device: &str) -> bool {
        if !self.backend.devices().iter().any(|known| known == device) {
            self.terminal
                .error(self.name(), &format!("No such device {device}"));
            return false;
        }
        let mut dumping = self.dumping.lock();
        if dumping.contains(device) {
            self.terminal
                .error(self.name(), &format!("Device {device} is already capturing"));
            return false;
        }
        let destination = self.dump_dir.join(format!("{device}.pcap"));
        if let Err(err) = self.backend.start_dump(device, &destination) {
            self.terminal.error(
                self.name(),
                &format!("Could not capture on device {device}: {err:#}"),
            );
            return false;
        }
        dumping.insert(device.to_string());
        self.terminal
            .info(self.name(), &format!("Started capturing on device {device}"));
        true
    }

    pub fn stop_dump(&self, device: &str) -> bool {
        let mut dumping = self.dumping.lock();
        if !dumping.contains(device) {
            if self.backend.devices().iter().any(|known| known == device) {
                self.terminal
                    .error(self.name(), &format!("Device {device} is not capturing"));
            } else {
                self.terminal
                    .error(self.name(), &format!("No such device {device}"));
            }
            return false;
        }
        if let Err(err) = self.backend.stop_dump(device) {
            warn!(device, "capture backend failed to stop cleanly: {err:#}");
        }
        dumping.remove(device);
        self.terminal
            .info(self.name(), &format!("Stopped capturing on device {device}"));
        true
    }

    fn list(&self) {
        for device in self.dumping.lock().iter() {
            self.terminal.info(self.name(), &format!(" - {device}"));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::console::{MemoryWriter, ShutdownSignal};
    use crate::registry::RegistryBuilder;

    /// Backend exposing a fixed device list that records dump requests.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub(crate) started: Mutex<Vec<(String, PathBuf)>>,
    }

    impl CaptureBackend for FakeBackend {
        fn devices(&self) -> Vec<String> {
            vec!["eth0".into(), "lo".into()]
        }

        fn start_dump(&self, device: &str, destination: &Path) -> anyhow::Result<()> {
            self.started
                .lock()
                .push((device.to_string(), destination.to_path_buf()));
            Ok(())
        }

        fn stop_dump(&self, _device: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn frame(source: [u8; 4], transport: Transport) -> CapturedFrame {
        CapturedFrame {
            device: "eth0".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            source: IpAddr::V4(Ipv4Addr::from(source)),
            destination: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 254)),
            transport,
        }
    }

    fn listener(backend: Arc<FakeBackend>) -> (Arc<ListenerModule>, MemoryWriter) {
        let writer = MemoryWriter::new();
        let mut builder = RegistryBuilder::new();
        builder
            .register(TerminalModule::descriptor(
                Arc::new(writer.clone()),
                ShutdownSignal::new(),
            ))
            .unwrap();
        builder
            .register(ListenerModule::descriptor(backend, PathBuf::from("logs")))
            .unwrap();
        let listener = builder.build().resolve_as::<ListenerModule>().unwrap();
        (listener, writer)
    }

    #[test]
    fn frames_render_like_log_lines() {
        let tcp = frame(
            [10, 0, 0, 1],
            Transport::Tcp {
                source_port: 443,
                destination_port: 51000,
            },
        );
        assert_eq!(
            tcp.to_string(),
            "Captured on DEV eth0 [2024-05-01 12:00:00.000] TCP 10.0.0.1:443 => 10.0.0.254:51000"
        );
        let icmp = frame([10, 0, 0, 1], Transport::Icmp { checksum: 7, sequence: 2 });
        assert!(icmp.is_icmp());
        assert!(icmp.to_string().ends_with("ICMP 10.0.0.1 - CHECK 7 SEQ 2"));
    }

    #[test]
    fn dumps_are_tracked_per_device() {
        let backend = Arc::new(FakeBackend::default());
        let (listener, writer) = listener(Arc::clone(&backend));

        assert!(!listener.start_dump("wlan9"));
        assert!(listener.start_dump("eth0"));
        assert!(!listener.start_dump("eth0"));
        assert_eq!(listener.dumping(), vec!["eth0".to_string()]);
        assert_eq!(
            *backend.started.lock(),
            vec![("eth0".to_string(), PathBuf::from("logs/eth0.pcap"))]
        );
        assert!(!listener.stop_dump("lo"));
        assert!(listener.stop_dump("eth0"));
        assert!(listener.dumping().is_empty());

        assert_eq!(
            writer.lines(),
            vec![
                "[ERROR] Listener >> No such device wlan9".to_string(),
                "[INFO] Listener >> Started capturing on device eth0".to_string(),
                "[ERROR] Listener >> Device eth0 is already capturing".to_string(),
                "[ERROR] Listener >> Device lo is not capturing".to_string(),
                "[INFO] Listener >> Stopped capturing on device eth0".to_string(),
            ]
        );
    }

    #[test]
    fn publish_survives_panicking_subscribers() {
        let (listener, _) = listener(Arc::new(FakeBackend::default()));
        let seen = Arc::new(AtomicUsize::new(0));
        listener.subscribe(|_| panic!("bad subscriber"));
        let counter = Arc::clone(&seen);
        listener.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let udp = frame(
            [10, 0, 0, 1],
            Transport::Udp {
                source_port: 53,
                destination_port: 5353,
            },
        );
        listener.publish(&udp);
        listener.publish(&udp);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
