//! Command-line tool for inspecting the instance user-data from a running guest.
//!
//! Uses the same retry client as the boot agent. With `--run`, the payload is
//! launched through the same script runner and awaited.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use fc_guest_init::config::{self, BootConfig};
use fc_guest_init::{BootLog, HttpTransport, MetadataClient, RetryPolicy, ScriptRunner, UserData};

/// Exit status when the service holds no user-data.
const EXIT_ABSENT: i32 = 2;
/// Exit status when the metadata service never answered.
const EXIT_EXHAUSTED: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "fc-userdata")]
#[command(about = "Fetch (and optionally run) the instance user-data from the metadata service")]
struct Args {
    /// Metadata service address (host or host:port)
    #[arg(short, long)]
    address: Option<String>,

    /// Token + user-data cycles before giving up
    #[arg(long)]
    attempts: Option<u32>,

    /// Delay between failed cycles, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Run the user-data as the boot agent would and wait for it
    #[arg(long)]
    run: bool,

    /// Scratch path for the script when using --run
    #[arg(long)]
    script: Option<PathBuf>,

    /// Log file for script output when using --run
    #[arg(long)]
    log: Option<PathBuf>,
}

/// Status lines go to stderr so stdout carries only the payload.
struct StderrLog;

impl BootLog for StderrLog {
    fn log(&self, message: &str) {
        eprintln!("{}", message);
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = BootConfig::from_env();
    if let Some(address) = args.address {
        config.metadata_addr = address;
    }
    if let Some(script) = args.script {
        config.script_path = script;
    }
    if let Some(log) = args.log {
        config.script_log = log;
    }
    let policy = RetryPolicy {
        attempts: args.attempts.unwrap_or(config.retry.attempts),
        interval: args
            .interval_ms
            .map(Duration::from_millis)
            .unwrap_or(config.retry.interval),
    };

    let transport = match HttpTransport::new(&config.metadata_addr, config.request_timeout) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Failed to create metadata client: {}", e);
            process::exit(1);
        }
    };

    let log = StderrLog;
    let data = MetadataClient::new(transport, policy, &log).fetch_user_data();

    match &data {
        UserData::Present(payload) if !args.run => {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            if let Err(e) = stdout.write_all(payload).and_then(|_| stdout.flush()) {
                eprintln!("Failed to write user-data: {}", e);
                process::exit(1);
            }
        }
        UserData::Present(_) => {
            let runner = ScriptRunner::from_config(&config);
            match runner.maybe_run(&data, &log).map(|script| script.wait()) {
                Some(Ok(status)) => process::exit(status.code().unwrap_or(1)),
                Some(Err(e)) => {
                    eprintln!("Error waiting for script: {}", e);
                    process::exit(1);
                }
                None => process::exit(1),
            }
        }
        UserData::Absent => {
            eprintln!("No user-data configured");
            process::exit(EXIT_ABSENT);
        }
        UserData::Exhausted => {
            eprintln!(
                "Metadata service at {} unreachable (default {})",
                config.metadata_addr,
                config::DEFAULT_METADATA_ADDR
            );
            process::exit(EXIT_EXHAUSTED);
        }
    }
}
