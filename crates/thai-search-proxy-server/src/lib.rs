//! HTTP surface for the Thai search proxy.
//!
//! Serves the v1 REST API over asupersync's HTTP/1.1 listener, owns the
//! background workers (dictionary watcher, backend probe), and is the one
//! place where structured error kinds become HTTP status codes.

#![forbid(unsafe_code)]

mod health;
mod metrics_text;
pub mod probe;
mod routes;
pub mod watcher;

use std::sync::Arc;
use std::time::Instant;

use asupersync::http::h1::listener::Http1Listener;
use asupersync::http::h1::types::{
    Method as Http1Method, Request as Http1Request, Response as Http1Response, default_reason,
};
use asupersync::runtime::RuntimeBuilder;
use thai_search_proxy_core::{Config, Error, global_metrics};
use thai_search_proxy_search::{BackendClient, SearchProxy, VariantSearcher};
use thai_search_proxy_tokenizer::{CompoundTokenizer, DictionaryStore};

/// Paths that bypass the API-key gate (probes and scrapers).
const AUTH_EXEMPT_PREFIXES: &[&str] = &["/health", "/metrics"];

/// Build the full proxy stack from config and serve until the listener
/// stops. Blocks the calling thread.
pub fn run_http(config: &Config) -> std::io::Result<()> {
    let store = DictionaryStore::open(config.dict_path.clone());
    let tokenizer = Arc::new(
        CompoundTokenizer::from_config(config)
            .map_err(|e| std::io::Error::other(e.to_string()))?,
    );
    let client: Arc<BackendClient> = Arc::new(BackendClient::new(
        &config.backend_url,
        config.backend_api_key.clone(),
        &config.backend_primary_key,
    ));
    let searcher: Arc<dyn VariantSearcher> = client;
    let proxy = Arc::new(SearchProxy::new(
        config.clone(),
        Arc::clone(&store),
        tokenizer,
        Arc::clone(&searcher),
    ));

    watcher::start(config, Arc::clone(&store));
    probe::start(config, Arc::clone(&searcher));

    let state = Arc::new(HttpState::new(Arc::clone(&proxy)));
    let addr = config.listen_addr.clone();
    tracing::info!(addr = %addr, "thai-search-proxy listening");

    let runtime = RuntimeBuilder::new()
        .build()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let handle = runtime.handle();
    let result = runtime.block_on(async move {
        let handler_state = Arc::clone(&state);
        let listener = Http1Listener::bind(addr, move |req| {
            let inner = Arc::clone(&handler_state);
            async move { inner.handle(req).await }
        })
        .await?;
        listener.run(&handle).await?;
        Ok::<(), std::io::Error>(())
    });

    probe::shutdown();
    watcher::shutdown();
    proxy.shutdown();
    result
}

/// Per-process HTTP state shared by every connection task.
pub struct HttpState {
    proxy: Arc<SearchProxy>,
    started_at: Instant,
}

struct InflightGuard;

impl InflightGuard {
    fn begin() -> Self {
        global_metrics().http.requests_inflight.add(1);
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        global_metrics().http.requests_inflight.sub_saturating(1);
    }
}

impl HttpState {
    #[must_use]
    pub fn new(proxy: Arc<SearchProxy>) -> Self {
        Self {
            proxy,
            started_at: Instant::now(),
        }
    }

    #[allow(clippy::unused_async)] // Required by the Http1Listener interface
    pub async fn handle(&self, req: Http1Request) -> Http1Response {
        let _inflight = InflightGuard::begin();
        let started = Instant::now();
        let (path, query) = split_path_query(&req.uri);

        let resp = self.handle_inner(&req, &path, query.as_deref());

        let latency_us =
            u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        global_metrics().http.record_response(resp.status, latency_us);
        tracing::debug!(
            method = ?req.method,
            path = %path,
            status = resp.status,
            elapsed_us = latency_us,
            "request"
        );
        resp
    }

    fn handle_inner(
        &self,
        req: &Http1Request,
        path: &str,
        query: Option<&str>,
    ) -> Http1Response {
        if matches!(req.method, Http1Method::Options) {
            return self.preflight_response(req);
        }

        let auth_exempt = AUTH_EXEMPT_PREFIXES
            .iter()
            .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")));
        if !auth_exempt {
            if let Some(resp) = self.check_api_key(req) {
                return resp;
            }
        }

        match (req.method.clone(), path) {
            (Http1Method::Get, "/") => routes::service_info(self, req),
            (Http1Method::Post, "/api/v1/tokenize") => routes::tokenize(self, req, false),
            (Http1Method::Post, "/api/v1/tokenize/compound") => routes::tokenize(self, req, true),
            (Http1Method::Post, "/api/v1/search") => routes::search(self, req),
            (Http1Method::Post, "/api/v1/batch-search") => routes::batch_search(self, req),
            (Http1Method::Get, "/api/v1/compounds") => routes::list_compounds(self, req, query),
            (Http1Method::Post, "/api/v1/compounds") => routes::add_compound(self, req),
            (Http1Method::Put | Http1Method::Delete, _)
                if path.starts_with("/api/v1/compounds/") =>
            {
                let surface = percent_decode(&path["/api/v1/compounds/".len()..]);
                if matches!(req.method, Http1Method::Put) {
                    routes::update_compound(self, req, &surface)
                } else {
                    routes::remove_compound(self, req, &surface)
                }
            }
            (Http1Method::Get, "/health") => health::basic(self, req),
            (Http1Method::Get, "/health/detailed") => health::detailed(self, req),
            (Http1Method::Get, "/metrics") => {
                let body = metrics_text::render(&global_metrics().snapshot());
                self.raw_response(req, 200, "text/plain; version=0.0.4", body.into_bytes())
            }
            // Known paths with the wrong verb get a 405 rather than a 404.
            (_, "/api/v1/tokenize" | "/api/v1/tokenize/compound" | "/api/v1/search"
                | "/api/v1/batch-search" | "/api/v1/compounds" | "/health"
                | "/health/detailed" | "/metrics") => self.method_not_allowed(req),
            _ => self.not_found(req),
        }
    }

    pub(crate) fn proxy(&self) -> &Arc<SearchProxy> {
        &self.proxy
    }

    pub(crate) fn config(&self) -> &Config {
        self.proxy.config()
    }

    pub(crate) fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    // -- Auth ---------------------------------------------------------------

    fn check_api_key(&self, req: &Http1Request) -> Option<Http1Response> {
        let config = self.config();
        if !config.api_key_required {
            return None;
        }
        // Requiring a key without configuring one rejects everything: a
        // misconfiguration must fail closed.
        let Some(expected) = config.api_key.as_deref() else {
            return Some(self.failure_response(req, &Error::Unauthorized));
        };
        let presented = header_value(req, "x-api-key");
        if presented == Some(expected) {
            None
        } else {
            Some(self.failure_response(req, &Error::Unauthorized))
        }
    }

    // -- Response helpers ---------------------------------------------------

    fn preflight_response(&self, req: &Http1Request) -> Http1Response {
        let mut resp = Http1Response::new(204, default_reason(204), Vec::new());
        self.apply_cors(req, &mut resp);
        resp.headers.push((
            "access-control-allow-headers".to_string(),
            "content-type, x-api-key".to_string(),
        ));
        resp.headers.push((
            "access-control-allow-methods".to_string(),
            "GET, POST, PUT, DELETE, OPTIONS".to_string(),
        ));
        resp
    }

    pub(crate) fn json_response(
        &self,
        req: &Http1Request,
        status: u16,
        value: &serde_json::Value,
    ) -> Http1Response {
        let mut resp = Http1Response::new(
            status,
            default_reason(status),
            serde_json::to_vec(value).unwrap_or_default(),
        );
        resp.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        self.apply_cors(req, &mut resp);
        resp
    }

    fn raw_response(
        &self,
        req: &Http1Request,
        status: u16,
        content_type: &str,
        body: Vec<u8>,
    ) -> Http1Response {
        let mut resp = Http1Response::new(status, default_reason(status), body);
        resp.headers
            .push(("content-type".to_string(), content_type.to_string()));
        self.apply_cors(req, &mut resp);
        resp
    }

    /// Map a structured error to the JSON error body and its status code.
    pub(crate) fn failure_response(&self, req: &Http1Request, err: &Error) -> Http1Response {
        let mut body = serde_json::json!({
            "error": err.error_code(),
            "message": err.to_string(),
        });
        if let Some(details) = err.details() {
            body["details"] = details;
        }
        if err.is_retryable() {
            body["details"]["retry_after_ms"] = serde_json::json!(1000);
        }
        self.json_response(req, err.http_status(), &body)
    }

    pub(crate) fn not_found(&self, req: &Http1Request) -> Http1Response {
        let body = serde_json::json!({
            "error": "NOT_FOUND",
            "message": "no such endpoint",
        });
        self.json_response(req, 404, &body)
    }

    fn method_not_allowed(&self, req: &Http1Request) -> Http1Response {
        let body = serde_json::json!({
            "error": "INVALID_INPUT",
            "message": "method not allowed",
        });
        self.json_response(req, 405, &body)
    }

    fn apply_cors(&self, req: &Http1Request, resp: &mut Http1Response) {
        let origins = &self.config().cors_origins;
        if origins.is_empty() {
            return;
        }
        let request_origin = header_value(req, "origin");
        let allowed = if origins.iter().any(|o| o == "*") {
            Some("*".to_string())
        } else {
            request_origin
                .filter(|origin| origins.iter().any(|o| o == origin))
                .map(ToString::to_string)
        };
        if let Some(origin) = allowed {
            resp.headers
                .push(("access-control-allow-origin".to_string(), origin));
        }
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub(crate) fn split_path_query(uri: &str) -> (String, Option<String>) {
    let mut parts = uri.splitn(2, '?');
    let path = parts.next().unwrap_or("/").to_string();
    let query = parts.next().map(std::string::ToString::to_string);
    (path, query)
}

pub(crate) fn header_value<'a>(req: &'a Http1Request, name: &str) -> Option<&'a str> {
    req.headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Extract one query-string parameter (first occurrence), percent-decoded.
pub(crate) fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if kv.next() == Some(name) {
            return Some(percent_decode(kv.next().unwrap_or_default()));
        }
    }
    None
}

/// Minimal percent decoding for path segments and query values. Invalid
/// escapes pass through untouched; `+` becomes a space.
#[must_use]
pub fn percent_decode(input: &str) -> String {
    fn hex_digit(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
