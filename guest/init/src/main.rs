//! Boot bootstrap agent for Firecracker microVM guests.
//!
//! This process runs as PID 1 inside the MicroVM and is responsible for:
//! - Fetching user-data from the metadata service (bounded retry)
//! - Launching the user-data as a detached one-shot script
//! - Replacing itself with the real init, forwarding its arguments

use std::ffi::OsString;
use std::process;

use fc_guest_init::{BootAgent, BootConfig, DeviceLog};
use tracing::{error, info};

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("fc-guest-init starting (PID {})", process::id());

    let config = BootConfig::from_env();
    info!(
        metadata = %config.metadata_addr,
        attempts = config.retry.attempts,
        real_init = %config.real_init.display(),
        "Boot configuration loaded"
    );

    // Arguments the kernel passed to init, forwarded untouched.
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();

    let log = DeviceLog::open(&config.console, &config.kmsg);
    let err = BootAgent::from_config(&config, &log).run(&args);

    error!("Handoff failed: {}", err);
    process::exit(1);
}
