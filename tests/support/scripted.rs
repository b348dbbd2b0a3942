//! In-memory [`Transport`] answering from a script of canned responses.
//!
//! Routes match on path plus query (`/manga/api?page=1`) or on path alone
//! when no query route matches. Every executed request is recorded with the
//! paused-clock instant it reached the transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sourcekit_core::ratelimit::RateLimiter;
use sourcekit_core::runtime::SourceRuntime;
use sourcekit_core::session::SessionStore;
use sourcekit_core::transport::{Headers, Request, Response, Transport, TransportError};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Canned {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Canned {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub request: Request,
    pub at: Instant,
}

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Canned>>,
    fallback: Mutex<Option<Canned>>,
    log: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers `route` (path, optionally with `?query`) with `canned`.
    pub fn route(&self, route: &str, canned: Canned) {
        self.routes.lock().unwrap().insert(route.to_string(), canned);
    }

    /// Answers every unmatched request with `canned` instead of a 404.
    pub fn fallback(&self, canned: Canned) {
        *self.fallback.lock().unwrap() = Some(canned);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    fn lookup(&self, request: &Request) -> Canned {
        let path = request.url.path().to_string();
        let full = match request.url.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.clone(),
        };
        let routes = self.routes.lock().unwrap();
        routes
            .get(&full)
            .or_else(|| routes.get(&path))
            .cloned()
            .or_else(|| self.fallback.lock().unwrap().clone())
            .unwrap_or_else(|| Canned::status(404))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let canned = self.lookup(&request);
        let url = request.url.clone();
        self.log.lock().unwrap().push(Recorded {
            request,
            at: Instant::now(),
        });
        let headers: Headers = canned.headers.into_iter().collect();
        Ok(Response::new(canned.status, url, headers, canned.body))
    }
}

/// Runtime over `transport` with limiting disabled and an empty session store.
pub fn unlimited_runtime(transport: Arc<ScriptedTransport>) -> SourceRuntime {
    SourceRuntime::new(
        transport,
        Arc::new(RateLimiter::disabled()),
        Arc::new(SessionStore::new()),
    )
}
