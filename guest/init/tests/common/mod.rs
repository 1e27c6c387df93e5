//! Fake metadata service shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;

use tiny_http::{Method, Response, Server};

/// How the fake service answers.
#[derive(Clone)]
pub struct Behaviour {
    /// Token handed out, or `None` to refuse tokens with a 503.
    pub token: Option<String>,
    /// Status and body of the user-data response.
    pub user_data: (u16, String),
}

/// A running fake MMDS recording `METHOD path token` for each request.
pub struct FakeMmds {
    pub addr: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeMmds {
    pub fn start(behaviour: Behaviour) -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let header = |name: &'static str| {
                    request
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv(name))
                        .map(|h| h.value.as_str().to_string())
                };

                let response = match (request.method(), request.url()) {
                    (Method::Put, "/latest/api/token") => {
                        let ttl = header("X-metadata-token-ttl-seconds").unwrap_or_default();
                        seen.lock().unwrap().push(format!("PUT token ttl={}", ttl));
                        match &behaviour.token {
                            Some(token) => Response::from_string(token.clone()),
                            None => Response::from_string("unavailable").with_status_code(503),
                        }
                    }
                    (Method::Get, "/latest/user-data") => {
                        let token = header("X-metadata-token").unwrap_or_default();
                        seen.lock().unwrap().push(format!("GET user-data token={}", token));
                        if behaviour.token.as_deref() == Some(token.as_str()) {
                            let (status, body) = &behaviour.user_data;
                            Response::from_string(body.clone()).with_status_code(*status)
                        } else {
                            Response::from_string("bad token").with_status_code(401)
                        }
                    }
                    (method, url) => {
                        seen.lock().unwrap().push(format!("{} {}", method, url));
                        Response::from_string("").with_status_code(404)
                    }
                };
                let _ = request.respond(response);
            }
        });

        Self {
            addr: format!("127.0.0.1:{}", port),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Address on which nothing listens.
pub fn closed_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{}", port)
}
