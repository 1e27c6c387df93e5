//! Boot agent configuration.
//!
//! Every path and timing knob is a constant with an environment override.
//! The kernel hands unrecognised `key=value` command-line parameters to init
//! as environment variables, so the `ds=nocloud-net;s=http://<ip>/latest/`
//! parameter written by the host tooling is visible here as `ds`.
//!
//! Environment variables:
//! - `FC_INIT_MMDS_ADDR`: metadata service address (e.g., "169.254.169.254")
//! - `FC_INIT_REQUEST_TIMEOUT_MS`: per-request timeout
//! - `FC_INIT_ATTEMPTS`: token + user-data cycles before giving up
//! - `FC_INIT_RETRY_INTERVAL_MS`: delay between cycles
//! - `FC_INIT_SCRIPT`: scratch path for the user-data script
//! - `FC_INIT_SCRIPT_LOG`: append-only log for script output
//! - `FC_INIT_SHELL`: interpreter used to run the script
//! - `FC_INIT_CONSOLE`, `FC_INIT_KMSG`: boot log devices
//! - `FC_INIT_REAL_INIT`: program to hand off to

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Link-local address of the Firecracker metadata service.
pub const DEFAULT_METADATA_ADDR: &str = "169.254.169.254";

/// Per-request timeout for metadata calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Token + user-data cycles attempted before giving up.
pub const DEFAULT_ATTEMPTS: u32 = 10;

/// Fixed delay between failed cycles.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_SCRIPT_PATH: &str = "/tmp/user-data.sh";
pub const DEFAULT_SCRIPT_LOG: &str = "/var/log/user-data.log";
pub const DEFAULT_INTERPRETER: &str = "/bin/sh";
pub const DEFAULT_CONSOLE: &str = "/dev/console";
pub const DEFAULT_KMSG: &str = "/dev/kmsg";
pub const DEFAULT_REAL_INIT: &str = "/sbin/init";

/// Retry policy for the metadata client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of token + user-data cycles.
    pub attempts: u32,
    /// Blocking sleep between two failed cycles.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Complete boot agent configuration.
#[derive(Debug, Clone)]
pub struct BootConfig {
    /// Metadata service host (and optional port).
    pub metadata_addr: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub script_path: PathBuf,
    pub script_log: PathBuf,
    pub interpreter: PathBuf,
    pub console: PathBuf,
    pub kmsg: PathBuf,
    pub real_init: PathBuf,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            metadata_addr: DEFAULT_METADATA_ADDR.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            script_path: PathBuf::from(DEFAULT_SCRIPT_PATH),
            script_log: PathBuf::from(DEFAULT_SCRIPT_LOG),
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            console: PathBuf::from(DEFAULT_CONSOLE),
            kmsg: PathBuf::from(DEFAULT_KMSG),
            real_init: PathBuf::from(DEFAULT_REAL_INIT),
        }
    }
}

impl BootConfig {
    /// Build the configuration from defaults and environment overrides.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let metadata_addr = std::env::var("FC_INIT_MMDS_ADDR")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("ds").ok().and_then(|ds| seed_addr(&ds)))
            .unwrap_or(defaults.metadata_addr);

        let retry = RetryPolicy {
            attempts: env_parse("FC_INIT_ATTEMPTS").unwrap_or(defaults.retry.attempts),
            interval: env_parse("FC_INIT_RETRY_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.interval),
        };

        Self {
            metadata_addr,
            request_timeout: env_parse("FC_INIT_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            retry,
            script_path: env_path("FC_INIT_SCRIPT").unwrap_or(defaults.script_path),
            script_log: env_path("FC_INIT_SCRIPT_LOG").unwrap_or(defaults.script_log),
            interpreter: env_path("FC_INIT_SHELL").unwrap_or(defaults.interpreter),
            console: env_path("FC_INIT_CONSOLE").unwrap_or(defaults.console),
            kmsg: env_path("FC_INIT_KMSG").unwrap_or(defaults.kmsg),
            real_init: env_path("FC_INIT_REAL_INIT").unwrap_or(defaults.real_init),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = key, value = %value, "Ignoring unparseable override");
            None
        }
    }
}

/// Extract the metadata host from a NoCloud seed parameter.
///
/// `nocloud-net;s=http://169.254.169.254/latest/` yields `169.254.169.254`.
pub fn seed_addr(ds: &str) -> Option<String> {
    let url = ds.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("s=")
            .or_else(|| part.strip_prefix("seedfrom="))
    })?;
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
