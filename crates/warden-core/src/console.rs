use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Severity of an operator-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    pub fn label(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Critical => "CRIT",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Formats a leveled, tagged operator line.
pub fn format_line(level: Level, tag: &str, text: &str) -> String {
    format!("[{level}] {tag} >> {text}")
}

/// Sink for operator output.
pub trait ConsoleWriter: Send + Sync {
    fn write_line(&self, line: &str);

    fn clear(&self);
}

/// Writes operator output to stdout.
#[derive(Debug, Default)]
pub struct StdoutWriter;

impl ConsoleWriter for StdoutWriter {
    fn write_line(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }

    fn clear(&self) {
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\x1b[2J\x1b[H");
        let _ = stdout.flush();
    }
}

/// Keeps operator output in memory. Used by tests and embedders.
#[derive(Debug, Default, Clone)]
pub struct MemoryWriter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl ConsoleWriter for MemoryWriter {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    fn clear(&self) {
        MemoryWriter::clear(self);
    }
}

#[derive(Debug, Default)]
struct SignalState {
    triggered: Mutex<bool>,
    condvar: Condvar,
}

/// One-shot process stop flag shared by the input loop, `console exit` and
/// the Ctrl-C handler.
#[derive(Debug, Default, Clone)]
pub struct ShutdownSignal {
    state: Arc<SignalState>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut triggered = self.state.triggered.lock();
        *triggered = true;
        self.state.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.state.triggered.lock()
    }

    pub fn wait(&self) {
        let mut triggered = self.state.triggered.lock();
        while !*triggered {
            self.state.condvar.wait(&mut triggered);
        }
    }

    /// Returns whether the signal fired within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut triggered = self.state.triggered.lock();
        if !*triggered {
            self.state.condvar.wait_for(&mut triggered, timeout);
        }
        *triggered
    }
}
