//! Boot bootstrap agent for Firecracker microVM guests.
//!
//! Runs as the first user-space process: fetches user-data from the
//! metadata service with bounded retry, launches it as a detached script,
//! and replaces itself with the real init.

pub mod boot;
pub mod config;
pub mod error;
pub mod handoff;
pub mod logger;
pub mod metadata;
pub mod script;

pub use boot::BootAgent;
pub use config::{BootConfig, RetryPolicy};
pub use error::{InitError, Result};
pub use handoff::{Execve, ImageReplace, InitDelegator};
pub use logger::{BootLog, DeviceLog, MemoryLog};
pub use metadata::{HttpTransport, MetadataClient, MetadataTransport, UserData};
pub use script::{DetachedScript, ScriptRunner};
