//! Raw HTTP exchange underneath [`crate::client::AristonClient`].
//!
//! The client builds an [`HttpRequest`] (absolute URL, headers, optional JSON
//! body) and hands it to an [`HttpBackend`]. Status interpretation, session
//! recovery and JSON decoding all happen in the client; a backend only moves
//! bytes. Production uses [`UreqBackend`].

use http::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::client::ClientError;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

pub trait HttpBackend: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError>;
}

impl<B: HttpBackend + ?Sized> HttpBackend for Arc<B> {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
        (**self).execute(request)
    }
}

/// Blocking backend built on a shared `ureq` agent.
pub struct UreqBackend {
    agent: ureq::Agent,
}

impl UreqBackend {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            // non-2xx statuses are classified by the client, not by ureq
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        UreqBackend {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl HttpBackend for UreqBackend {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
        let result = if request.method == Method::POST {
            let mut req = self.agent.post(&request.url);
            for (k, v) in &request.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            for (k, v) in &request.query {
                req = req.query(k, v);
            }
            match &request.body {
                Some(body) => req.send_json(body),
                None => req.send_empty(),
            }
        } else {
            let mut req = self.agent.get(&request.url);
            for (k, v) in &request.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            for (k, v) in &request.query {
                req = req.query(k, v);
            }
            req.call()
        };

        let mut response = result.map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub const TEST_BASE_URL: &str = "http://ariston.test/api/v2/";

    /// Loads a JSON fixture from `tests/data/`.
    pub fn fixture(name: &str) -> Value {
        let json = std::fs::read_to_string(format!("tests/data/{name}")).expect("fixture present");
        serde_json::from_str(&json).expect("parse fixture")
    }

    struct Route {
        method: Method,
        path: String,
        replies: VecDeque<(u16, String)>,
        // the front reply has been served at least once as the last one
        drained: bool,
    }

    /// In-memory backend answering from per-route reply queues.
    ///
    /// The last queued reply for a route is repeated until another reply is
    /// queued for it. Unrouted requests answer 404.
    #[derive(Default)]
    pub struct ScriptedBackend {
        routes: Mutex<Vec<Route>>,
        log: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedBackend {
        pub fn new() -> Arc<Self> {
            Arc::new(ScriptedBackend::default())
        }

        pub fn reply(&self, method: Method, path: &str, status: u16, body: Value) {
            let text = if body.is_null() { String::new() } else { body.to_string() };
            self.reply_raw(method, path, status, text);
        }

        pub fn reply_raw(&self, method: Method, path: &str, status: u16, body: String) {
            let mut routes = self.routes.lock().unwrap();
            match routes.iter_mut().find(|r| r.method == method && r.path == path) {
                Some(route) => {
                    if route.drained {
                        route.replies.clear();
                        route.drained = false;
                    }
                    route.replies.push_back((status, body));
                }
                None => routes.push(Route {
                    method,
                    path: path.to_string(),
                    replies: VecDeque::from([(status, body)]),
                    drained: false,
                }),
            }
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.log.lock().unwrap().clone()
        }

        pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
            self.requests()
                .into_iter()
                .filter(|r| r.url.strip_prefix(TEST_BASE_URL) == Some(path))
                .collect()
        }

        pub fn last_body(&self, path: &str) -> Option<Value> {
            self.requests_to(path).last().and_then(|r| r.body.clone())
        }
    }

    impl HttpBackend for ScriptedBackend {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
            self.log.lock().unwrap().push(request.clone());
            let path = request.url.strip_prefix(TEST_BASE_URL).unwrap_or(&request.url);
            let mut routes = self.routes.lock().unwrap();
            let reply = routes
                .iter_mut()
                .find(|r| r.method == request.method && r.path == path)
                .and_then(|route| {
                    if route.replies.len() > 1 {
                        route.replies.pop_front()
                    } else {
                        route.drained = true;
                        route.replies.front().cloned()
                    }
                });
            let (status, body) = reply.unwrap_or((404, String::new()));
            Ok(HttpResponse {
                status: StatusCode::from_u16(status).unwrap(),
                body,
            })
        }
    }
}
