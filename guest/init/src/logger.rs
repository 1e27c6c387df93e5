//! Early-boot logging.
//!
//! Before any logging daemon exists, the only places a message can go are
//! the console device and the kernel ring buffer. [`DeviceLog`] writes to
//! both; [`MemoryLog`] records messages in memory instead.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Prefix applied to every kernel log record.
pub const KMSG_PREFIX: &str = "init: ";

/// Boot status sink handed to every component.
///
/// Logging is best effort: implementations must never fail or block the
/// boot sequence.
pub trait BootLog: Send + Sync {
    fn log(&self, message: &str);
}

/// Console + kernel log writer.
///
/// Both devices are opened once, at construction, and stay open for the
/// lifetime of the process.
#[derive(Debug)]
pub struct DeviceLog {
    console: Option<File>,
    kmsg: Option<File>,
}

impl DeviceLog {
    /// Open the console and kernel log devices for writing.
    ///
    /// A device that cannot be opened is skipped silently.
    pub fn open(console: impl AsRef<Path>, kmsg: impl AsRef<Path>) -> Self {
        Self {
            console: open_sink(console.as_ref()),
            kmsg: open_sink(kmsg.as_ref()),
        }
    }
}

fn open_sink(path: &Path) -> Option<File> {
    match OpenOptions::new().append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Log device unavailable");
            None
        }
    }
}

impl BootLog for DeviceLog {
    fn log(&self, message: &str) {
        tracing::debug!(target: "fc_guest_init::boot", "{}", message);

        if let Some(mut console) = self.console.as_ref() {
            let _ = console.write_all(format!("{}\n", message).as_bytes());
        }

        // One write per record: /dev/kmsg treats each write(2) as a message.
        if let Some(mut kmsg) = self.kmsg.as_ref() {
            let _ = kmsg.write_all(format!("{}{}\n", KMSG_PREFIX, message).as_bytes());
        }
    }
}

/// In-memory sink for exercising components without devices.
#[derive(Debug, Default)]
pub struct MemoryLog {
    messages: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every message logged so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Whether any logged message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

impl BootLog for MemoryLog {
    fn log(&self, message: &str) {
        tracing::debug!(target: "fc_guest_init::boot", "{}", message);
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}
