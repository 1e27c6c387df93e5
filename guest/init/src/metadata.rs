//! Metadata service client (MMDS V2).
//!
//! A session token is requested with `PUT /latest/api/token`, then the
//! user-data is read with `GET /latest/user-data`. Both calls form one cycle;
//! a failed cycle is retried as a whole after a fixed delay.

use std::time::Duration;

use tracing::debug;

use crate::config::RetryPolicy;
use crate::error::{InitError, Result};
use crate::logger::BootLog;

pub const TOKEN_PATH: &str = "/latest/api/token";
pub const USER_DATA_PATH: &str = "/latest/user-data";
pub const TOKEN_TTL_HEADER: &str = "X-metadata-token-ttl-seconds";
pub const TOKEN_HEADER: &str = "X-metadata-token";

/// Lifetime requested for session tokens, in seconds.
pub const TOKEN_TTL_SECS: u32 = 21600;

/// Body the service returns when no user-data was configured.
const NOT_FOUND_SENTINEL: &[u8] = b"404 - Not Found";

/// Outcome of a user-data fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserData {
    /// User-data was supplied.
    Present(Vec<u8>),
    /// The service answered but holds no user-data.
    Absent,
    /// Every cycle failed.
    Exhausted,
}

impl UserData {
    pub fn is_present(&self) -> bool {
        matches!(self, UserData::Present(_))
    }
}

/// Map a user-data response body to its outcome.
pub fn classify(body: Vec<u8>) -> UserData {
    if body.is_empty() || body == NOT_FOUND_SENTINEL {
        UserData::Absent
    } else {
        UserData::Present(body)
    }
}

/// The two requests a metadata cycle is made of.
pub trait MetadataTransport {
    /// Acquire a session token.
    fn token(&self) -> Result<String>;

    /// Read the raw user-data body using `token`.
    fn user_data(&self, token: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP transport to the metadata service.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport for `addr` (host or host:port) with a per-request
    /// timeout.
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| InitError::Metadata {
                url: addr.to_string(),
                source: e,
            })?;

        Ok(Self {
            base_url: format!("http://{}", addr),
            client,
        })
    }

    fn send(
        &self,
        url: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<(reqwest::StatusCode, Vec<u8>)> {
        let response = request.send().map_err(|e| InitError::Metadata {
            url: url.to_string(),
            source: e,
        })?;

        let status = response.status();
        let body = response.bytes().map_err(|e| InitError::Metadata {
            url: url.to_string(),
            source: e,
        })?;
        Ok((status, body.to_vec()))
    }
}

fn status_error(url: String, status: reqwest::StatusCode) -> InitError {
    InitError::Status {
        url,
        status: status.as_u16(),
    }
}

impl MetadataTransport for HttpTransport {
    fn token(&self) -> Result<String> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let request = self
            .client
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS.to_string());
        let (status, body) = self.send(&url, request)?;
        if !status.is_success() {
            return Err(status_error(url, status));
        }
        Ok(String::from_utf8_lossy(&body).trim().to_string())
    }

    fn user_data(&self, token: &str) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, USER_DATA_PATH);
        let request = self.client.get(&url).header(TOKEN_HEADER, token);
        let (status, body) = self.send(&url, request)?;

        // "No user-data" is a completed fetch, whatever status carries it.
        if status == reqwest::StatusCode::NOT_FOUND || body == NOT_FOUND_SENTINEL {
            debug!(status = status.as_u16(), "Metadata service has no user-data");
            return Ok(NOT_FOUND_SENTINEL.to_vec());
        }
        if !status.is_success() {
            return Err(status_error(url, status));
        }
        Ok(body)
    }
}

/// Bounded-retry user-data fetcher.
pub struct MetadataClient<'a, T> {
    transport: T,
    policy: RetryPolicy,
    log: &'a dyn BootLog,
}

impl<'a, T: MetadataTransport> MetadataClient<'a, T> {
    pub fn new(transport: T, policy: RetryPolicy, log: &'a dyn BootLog) -> Self {
        Self {
            transport,
            policy,
            log,
        }
    }

    /// Run up to `policy.attempts` token + user-data cycles.
    ///
    /// Never fails: running out of attempts yields [`UserData::Exhausted`].
    pub fn fetch_user_data(&self) -> UserData {
        for attempt in 1..=self.policy.attempts {
            match self.cycle() {
                Ok(body) => {
                    debug!(attempt, bytes = body.len(), "User-data fetched");
                    return classify(body);
                }
                Err(e) => {
                    self.log.log(&format!(
                        "metadata attempt {}/{} failed: {}",
                        attempt, self.policy.attempts, e
                    ));
                    if attempt < self.policy.attempts {
                        std::thread::sleep(self.policy.interval);
                    }
                }
            }
        }

        self.log.log(&format!(
            "metadata service unavailable after {} attempts",
            self.policy.attempts
        ));
        UserData::Exhausted
    }

    fn cycle(&self) -> Result<Vec<u8>> {
        let token = self.transport.token()?;
        self.transport.user_data(&token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLog;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Scripted transport recording every call in order.
    #[derive(Default)]
    struct ScriptedTransport {
        tokens: RefCell<VecDeque<Result<String>>>,
        bodies: RefCell<VecDeque<Result<Vec<u8>>>>,
        calls: RefCell<Vec<String>>,
    }

    fn unavailable() -> InitError {
        InitError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
    }

    impl ScriptedTransport {
        fn token_ok(self, token: &str) -> Self {
            self.tokens.borrow_mut().push_back(Ok(token.to_string()));
            self
        }

        fn token_err(self) -> Self {
            self.tokens.borrow_mut().push_back(Err(unavailable()));
            self
        }

        fn body_ok(self, body: &[u8]) -> Self {
            self.bodies.borrow_mut().push_back(Ok(body.to_vec()));
            self
        }

        fn body_err(self) -> Self {
            self.bodies.borrow_mut().push_back(Err(unavailable()));
            self
        }
    }

    impl MetadataTransport for &ScriptedTransport {
        fn token(&self) -> Result<String> {
            self.calls.borrow_mut().push("token".to_string());
            self.tokens
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(unavailable()))
        }

        fn user_data(&self, token: &str) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push(format!("user-data:{}", token));
            self.bodies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(unavailable()))
        }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(Vec::new()), UserData::Absent);
        assert_eq!(classify(b"404 - Not Found".to_vec()), UserData::Absent);
        assert_eq!(
            classify(b"404 - Not Found\n".to_vec()),
            UserData::Present(b"404 - Not Found\n".to_vec())
        );
        assert_eq!(
            classify(b"echo hi".to_vec()),
            UserData::Present(b"echo hi".to_vec())
        );
    }

    #[test]
    fn test_first_attempt_success() {
        let transport = ScriptedTransport::default()
            .token_ok("T1")
            .body_ok(b"\"echo hi\"");
        let log = MemoryLog::new();
        let client = MetadataClient::new(&transport, fast_policy(10), &log);

        assert_eq!(
            client.fetch_user_data(),
            UserData::Present(b"\"echo hi\"".to_vec())
        );
        assert_eq!(*transport.calls.borrow(), vec!["token", "user-data:T1"]);
        assert!(log.messages().is_empty());
    }

    #[test]
    fn test_token_failure_skips_user_data() {
        let transport = ScriptedTransport::default()
            .token_err()
            .token_ok("T2")
            .body_ok(b"echo hi");
        let log = MemoryLog::new();
        let client = MetadataClient::new(&transport, fast_policy(10), &log);

        assert!(client.fetch_user_data().is_present());
        assert_eq!(
            *transport.calls.borrow(),
            vec!["token", "token", "user-data:T2"]
        );
        assert!(log.contains("metadata attempt 1/10 failed"));
    }

    #[test]
    fn test_user_data_failure_retries_whole_cycle() {
        let transport = ScriptedTransport::default()
            .token_ok("T1")
            .body_err()
            .token_ok("T2")
            .body_ok(b"echo hi");
        let log = MemoryLog::new();
        let client = MetadataClient::new(&transport, fast_policy(10), &log);

        assert!(client.fetch_user_data().is_present());
        // The stale token is never reused.
        assert_eq!(
            *transport.calls.borrow(),
            vec!["token", "user-data:T1", "token", "user-data:T2"]
        );
    }

    #[test]
    fn test_not_found_ends_cycle_without_retry() {
        let transport = ScriptedTransport::default()
            .token_ok("T1")
            .body_ok(b"404 - Not Found");
        let log = MemoryLog::new();
        let client = MetadataClient::new(&transport, fast_policy(10), &log);

        assert_eq!(client.fetch_user_data(), UserData::Absent);
        assert_eq!(transport.calls.borrow().len(), 2);
    }

    #[test]
    fn test_exhausted_after_all_attempts() {
        let transport = ScriptedTransport::default();
        let log = MemoryLog::new();
        let client = MetadataClient::new(&transport, fast_policy(10), &log);

        assert_eq!(client.fetch_user_data(), UserData::Exhausted);
        let calls = transport.calls.borrow();
        assert_eq!(calls.len(), 10);
        assert!(calls.iter().all(|c| c == "token"));
        assert!(log.contains("metadata attempt 10/10 failed"));
        assert!(log.contains("unavailable after 10 attempts"));
    }

    #[test]
    fn test_every_failure_count_terminates() {
        for failures in 0..=10u32 {
            let mut transport = ScriptedTransport::default();
            for _ in 0..failures {
                transport = transport.token_err();
            }
            let transport = transport.token_ok("T").body_ok(b"true");
            let log = MemoryLog::new();
            let client = MetadataClient::new(&transport, fast_policy(10), &log);

            let outcome = client.fetch_user_data();
            if failures < 10 {
                assert!(outcome.is_present(), "failures = {}", failures);
            } else {
                assert_eq!(outcome, UserData::Exhausted);
            }
        }
    }

    #[test]
    fn test_sleeps_between_attempts_only() {
        let transport = ScriptedTransport::default();
        let log = MemoryLog::new();
        let policy = RetryPolicy {
            attempts: 3,
            interval: Duration::from_millis(100),
        };
        let client = MetadataClient::new(&transport, policy, &log);

        let start = Instant::now();
        assert_eq!(client.fetch_user_data(), UserData::Exhausted);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300) + Duration::from_secs(1));
    }

    #[test]
    fn test_zero_attempts_is_exhausted() {
        let transport = ScriptedTransport::default().token_ok("T").body_ok(b"x");
        let log = MemoryLog::new();
        let client = MetadataClient::new(&transport, fast_policy(0), &log);
        assert_eq!(client.fetch_user_data(), UserData::Exhausted);
        assert!(transport.calls.borrow().is_empty());
    }
}
