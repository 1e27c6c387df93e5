//! Boot sequence: user-data discovery, script launch, init handoff.

use std::ffi::OsString;

use crate::config::BootConfig;
use crate::error::InitError;
use crate::handoff::{Execve, ImageReplace, InitDelegator};
use crate::logger::BootLog;
use crate::metadata::{HttpTransport, MetadataClient, MetadataTransport, UserData};
use crate::script::ScriptRunner;

/// The bootstrap agent with all of its collaborators.
pub struct BootAgent<'a, T, R = Execve> {
    metadata: MetadataClient<'a, T>,
    runner: ScriptRunner,
    delegator: InitDelegator<R>,
    log: &'a dyn BootLog,
}

impl<'a> BootAgent<'a, Option<HttpTransport>, Execve> {
    /// Wire the agent from configuration.
    ///
    /// If the HTTP client cannot be built the agent still boots, it just
    /// never reaches the metadata service.
    pub fn from_config(config: &BootConfig, log: &'a dyn BootLog) -> Self {
        let transport = match HttpTransport::new(&config.metadata_addr, config.request_timeout) {
            Ok(transport) => Some(transport),
            Err(e) => {
                log.log(&format!("metadata client unavailable: {}", e));
                None
            }
        };

        Self::new(
            MetadataClient::new(transport, config.retry, log),
            ScriptRunner::from_config(config),
            InitDelegator::new(&config.real_init),
            log,
        )
    }
}

impl<'a, T: MetadataTransport, R: ImageReplace> BootAgent<'a, T, R> {
    pub fn new(
        metadata: MetadataClient<'a, T>,
        runner: ScriptRunner,
        delegator: InitDelegator<R>,
        log: &'a dyn BootLog,
    ) -> Self {
        Self {
            metadata,
            runner,
            delegator,
            log,
        }
    }

    /// Run the boot sequence and hand off to the real init.
    ///
    /// Returns only if the handoff failed.
    pub fn run(self, args: &[OsString]) -> InitError {
        self.log.log("fetching user-data from metadata service");

        let data = self.metadata.fetch_user_data();
        match &data {
            UserData::Present(payload) => {
                self.log
                    .log(&format!("user-data received ({} bytes)", payload.len()));
            }
            UserData::Absent => self.log.log("metadata service has no user-data"),
            UserData::Exhausted => {}
        }

        // Launched, not awaited: init reaps it after the handoff.
        let _script = self.runner.maybe_run(&data, self.log);

        self.delegator.handoff(args, self.log)
    }
}

impl MetadataTransport for Option<HttpTransport> {
    fn token(&self) -> crate::Result<String> {
        match self {
            Some(transport) => transport.token(),
            None => Err(no_client()),
        }
    }

    fn user_data(&self, token: &str) -> crate::Result<Vec<u8>> {
        match self {
            Some(transport) => transport.user_data(token),
            None => Err(no_client()),
        }
    }
}

fn no_client() -> InitError {
    InitError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "metadata client unavailable",
    ))
}
