use std::sync::Arc;

use once_cell::sync::OnceCell;
use warden_sdk::prelude::*;

use crate::console::{format_line, ConsoleWriter, Level, ShutdownSignal};

/// Operator console: leveled output plus the `console` commands.
pub struct TerminalModule {
    writer: Arc<dyn ConsoleWriter>,
    shutdown: ShutdownSignal,
    commands: OnceCell<Vec<String>>,
}

impl Capability for TerminalModule {
    const ID: &'static str = "terminal";
}

impl Module for TerminalModule {
    fn name(&self) -> &str {
        "Terminal"
    }

    fn initialise(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}

impl TerminalModule {
    pub fn new(writer: Arc<dyn ConsoleWriter>, shutdown: ShutdownSignal) -> Self {
        Self {
            writer,
            shutdown,
            commands: OnceCell::new(),
        }
    }

    pub fn descriptor(writer: Arc<dyn ConsoleWriter>, shutdown: ShutdownSignal) -> CapabilityDescriptor {
        CapabilityDescriptor::module::<Self>()
            .base_command("console")
            .command(
                CommandSpec::new("clear").about("Clear the terminal"),
                |terminal, _| {
                    terminal.clear();
                    Ok(())
                },
            )
            .command(
                CommandSpec::new("exit").about("Stop the host"),
                |terminal, _| {
                    terminal.info(terminal.name(), "Shutting down");
                    terminal.shutdown.trigger();
                    Ok(())
                },
            )
            .command(
                CommandSpec::new("help").about("List every available command"),
                |terminal, _| {
                    terminal.help();
                    Ok(())
                },
            )
            .build(move |_| Ok(Self::new(Arc::clone(&writer), shutdown.clone())))
    }

    pub fn write_line(&self, text: &str) {
        self.writer.write_line(text);
    }

    pub fn log(&self, level: Level, tag: &str, text: &str) {
        self.writer.write_line(&format_line(level, tag, text));
    }

    pub fn info(&self, tag: &str, text: &str) {
        self.log(Level::Info, tag, text);
    }

    pub fn warn(&self, tag: &str, text: &str) {
        self.log(Level::Warn, tag, text);
    }

    pub fn error(&self, tag: &str, text: &str) {
        self.log(Level::Error, tag, text);
    }

    pub fn critical(&self, tag: &str, text: &str) {
        self.log(Level::Critical, tag, text);
    }

    pub fn clear(&self) {
        self.writer.clear();
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Record the command listing shown by `console help`. Only the first
    /// call has an effect.
    pub fn set_commands(&self, usage: Vec<String>) {
        let _ = self.commands.set(usage);
    }

    fn help(&self) {
        let Some(commands) = self.commands.get() else {
            self.warn(self.name(), "Command listing is not available yet");
            return;
        };
        self.info(self.name(), &format!("Commands: ({})", commands.len()));
        for usage in commands {
            self.write_line(&format!("  {usage}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use warden_sdk::Dependencies;

    use super::*;
    use crate::console::MemoryWriter;

    #[test]
    fn console_commands_drive_writer_and_signal() {
        let writer = MemoryWriter::new();
        let signal = ShutdownSignal::new();
        let descriptor = TerminalModule::descriptor(Arc::new(writer.clone()), signal.clone());
        let instance = descriptor.construct(&Dependencies::default()).unwrap();
        let terminal = instance.downcast::<TerminalModule>().unwrap();
        let run = |alias: &str| {
            let command = descriptor
                .commands()
                .iter()
                .find(|command| command.alias() == alias)
                .unwrap();
            command.invoke(&instance, &CommandArgs::default()).unwrap();
        };

        run("help");
        assert_eq!(
            writer.lines(),
            vec!["[WARN] Terminal >> Command listing is not available yet".to_string()]
        );

        terminal.set_commands(vec!["console clear".into(), "console exit".into()]);
        run("clear");
        run("help");
        assert_eq!(
            writer.lines(),
            vec![
                "[INFO] Terminal >> Commands: (2)".to_string(),
                "  console clear".to_string(),
                "  console exit".to_string(),
            ]
        );

        run("exit");
        assert!(signal.is_triggered());
    }
}
