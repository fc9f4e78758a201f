//! End-to-end handler tests: real `HttpState` + pipeline over a stub
//! backend, driven through `handle` exactly as the listener would.

use std::io::Write as _;
use std::sync::Arc;

use asupersync::http::h1::types::{
    Method as Http1Method, Request as Http1Request, Response as Http1Response,
    Version as Http1Version,
};
use asupersync::runtime::RuntimeBuilder;
use thai_search_proxy_core::{
    Config, Error, QueryVariant, Result, SearchHit, VariantKind, global_metrics, now_micros,
};
use thai_search_proxy_search::{SearchProxy, VariantSearcher};
use thai_search_proxy_server::HttpState;
use thai_search_proxy_tokenizer::{CompoundTokenizer, DictionaryStore};

struct StubBackend {
    fail_kinds: Vec<VariantKind>,
}

impl VariantSearcher for StubBackend {
    fn search_variant(
        &self,
        variant: &QueryVariant,
        _index: &str,
        _fetch_limit: usize,
        _timeout_ms: u64,
    ) -> Result<Vec<SearchHit>> {
        if self.fail_kinds.contains(&variant.kind) {
            return Err(Error::BackendTimeout(7));
        }
        Ok(vec![SearchHit {
            doc_id: format!("doc-{}", variant.kind),
            raw_score: 0.9,
            variant_kind: variant.kind,
            highlights: None,
            payload: serde_json::json!({"id": format!("doc-{}", variant.kind)}),
        }])
    }

    fn probe(&self, _timeout_ms: u64) -> Result<()> {
        Ok(())
    }
}

const DICT: &str = r#"{"entries": [
    {"surface": "วากาเมะ", "category": "thai_japanese",
     "components": ["วา", "กา", "เมะ"], "confidence": 0.9}
]}"#;

struct Harness {
    state: Arc<HttpState>,
    _dict: tempfile::NamedTempFile,
}

fn harness_with(config_patch: impl FnOnce(&mut Config), fail_kinds: Vec<VariantKind>) -> Harness {
    let mut dict = tempfile::NamedTempFile::new().unwrap();
    dict.write_all(DICT.as_bytes()).unwrap();
    dict.flush().unwrap();

    let mut config = Config {
        backend_index_default: Some("docs".to_string()),
        backend_pool_size: 2,
        backend_queue_max: 8,
        ..Config::default()
    };
    config_patch(&mut config);

    let store = DictionaryStore::open(dict.path());
    let tokenizer = Arc::new(CompoundTokenizer::from_config(&config).unwrap());
    let proxy = Arc::new(SearchProxy::new(
        config,
        store,
        tokenizer,
        Arc::new(StubBackend { fail_kinds }),
    ));
    Harness {
        state: Arc::new(HttpState::new(proxy)),
        _dict: dict,
    }
}

fn harness() -> Harness {
    harness_with(|_| {}, Vec::new())
}

fn request(method: Http1Method, uri: &str, body: serde_json::Value) -> Http1Request {
    request_with_headers(method, uri, body, &[])
}

fn request_with_headers(
    method: Http1Method,
    uri: &str,
    body: serde_json::Value,
    headers: &[(&str, &str)],
) -> Http1Request {
    Http1Request {
        method,
        uri: uri.to_string(),
        version: Http1Version::Http11,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: if body.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&body).unwrap()
        },
        trailers: Vec::new(),
        peer_addr: None,
    }
}

fn call(harness: &Harness, req: Http1Request) -> Http1Response {
    let runtime = RuntimeBuilder::current_thread().build().expect("runtime");
    let state = Arc::clone(&harness.state);
    runtime.block_on(async move { state.handle(req).await })
}

fn body_json(resp: &Http1Response) -> serde_json::Value {
    serde_json::from_slice(&resp.body).expect("JSON body")
}

#[test]
fn tokenize_endpoint_returns_result() {
    let h = harness();
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/tokenize",
            serde_json::json!({"text": "กินวากาเมะ"}),
        ),
    );
    assert_eq!(resp.status, 200);
    let body = body_json(&resp);
    assert_eq!(body["tokens"][0], "กิน");
    assert_eq!(body["tokens"][1], "วากาเมะ");
    assert_eq!(body["is_compound"][1], true);
}

#[test]
fn tokenize_compound_endpoint_annotates_spans() {
    let h = harness();
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/tokenize/compound",
            serde_json::json!({"text": "กินวากาเมะ"}),
        ),
    );
    assert_eq!(resp.status, 200);
    let body = body_json(&resp);
    let spans = body["compound_spans"].as_array().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0]["surface"], "วากาเมะ");
    assert_eq!(spans[0]["start"], 3);
    assert_eq!(spans[0]["end"], 10);
}

#[test]
fn tokenize_rejects_empty_and_malformed() {
    let h = harness();
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/tokenize",
            serde_json::json!({"text": ""}),
        ),
    );
    assert_eq!(resp.status, 400);
    assert_eq!(body_json(&resp)["error"], "INVALID_INPUT");

    let mut bad = request(Http1Method::Post, "/api/v1/tokenize", serde_json::Value::Null);
    bad.body = b"{not json".to_vec();
    let resp = call(&h, bad);
    assert_eq!(resp.status, 400);
}

#[test]
fn search_endpoint_happy_path() {
    let h = harness();
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/search",
            serde_json::json!({"query": "กินวากาเมะ", "index_name": "docs"}),
        ),
    );
    assert_eq!(resp.status, 200);
    let body = body_json(&resp);
    assert!(body["total_hits"].as_u64().unwrap() >= 1);
    assert_eq!(body["fallback_used"], false);
}

#[test]
fn search_partial_failure_is_200_with_diagnostics() {
    // S7: one variant kind fails; response is 200, fallback_used=true,
    // and the error list names the failed variant.
    let h = harness_with(|_| {}, vec![VariantKind::Tokenised]);
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/search",
            serde_json::json!({"query": "กินวากาเมะ", "index_name": "docs"}),
        ),
    );
    assert_eq!(resp.status, 200);
    let body = body_json(&resp);
    assert_eq!(body["fallback_used"], true);
    let errors = body["variant_errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["kind"], "tokenised");
    assert_eq!(errors[0]["error"], "BACKEND_TIMEOUT");
}

#[test]
fn search_all_failed_is_502() {
    let h = harness_with(
        |_| {},
        vec![
            VariantKind::Original,
            VariantKind::Tokenised,
            VariantKind::CompoundSplit,
            VariantKind::FallbackChar,
        ],
    );
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/search",
            serde_json::json!({"query": "กินวากาเมะ", "index_name": "docs"}),
        ),
    );
    assert_eq!(resp.status, 502);
    let body = body_json(&resp);
    assert_eq!(body["error"], "SEARCH_BACKEND_UNAVAILABLE");
    assert_eq!(body["details"]["retry_after_ms"], 1000);
}

#[test]
fn batch_search_parallel_results() {
    let h = harness();
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/batch-search",
            serde_json::json!({
                "queries": ["วากาเมะ", ""],
                "index_name": "docs",
            }),
        ),
    );
    assert_eq!(resp.status, 200);
    let body = body_json(&resp);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].get("hits").is_some());
    assert_eq!(results[1]["error"], "INVALID_INPUT");
}

#[test]
fn compounds_crud_cycle() {
    let h = harness();

    // List the seeded dictionary.
    let resp = call(
        &h,
        request(Http1Method::Get, "/api/v1/compounds", serde_json::Value::Null),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(body_json(&resp)["total"], 1);

    // Add.
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/compounds",
            serde_json::json!({"surface": "เทมปุระ", "category": "thai_japanese"}),
        ),
    );
    assert_eq!(resp.status, 201);
    assert_eq!(body_json(&resp)["source"], "overlay");

    // Duplicate → 409.
    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/compounds",
            serde_json::json!({"surface": "เทมปุระ", "category": "thai_japanese"}),
        ),
    );
    assert_eq!(resp.status, 409);
    assert_eq!(body_json(&resp)["error"], "CONFLICT");

    // Update (surface percent-encoded in the path).
    let encoded = "%E0%B9%80%E0%B8%97%E0%B8%A1%E0%B8%9B%E0%B8%B8%E0%B8%A3%E0%B8%B0";
    let resp = call(
        &h,
        request(
            Http1Method::Put,
            &format!("/api/v1/compounds/{encoded}"),
            serde_json::json!({
                "surface": "เทมปุระ",
                "category": "thai_japanese",
                "confidence": 0.8,
            }),
        ),
    );
    assert_eq!(resp.status, 200);

    // Category filter sees both entries.
    let resp = call(
        &h,
        request(
            Http1Method::Get,
            "/api/v1/compounds?category=thai_japanese",
            serde_json::Value::Null,
        ),
    );
    assert_eq!(body_json(&resp)["total"], 2);

    // Delete, then 404 on a second delete.
    let resp = call(
        &h,
        request(
            Http1Method::Delete,
            &format!("/api/v1/compounds/{encoded}"),
            serde_json::Value::Null,
        ),
    );
    assert_eq!(resp.status, 200);
    let resp = call(
        &h,
        request(
            Http1Method::Delete,
            &format!("/api/v1/compounds/{encoded}"),
            serde_json::Value::Null,
        ),
    );
    assert_eq!(resp.status, 404);
}

#[test]
fn api_key_gate_applies_to_api_not_health() {
    let h = harness_with(
        |config| {
            config.api_key_required = true;
            config.api_key = Some("sesame".to_string());
        },
        Vec::new(),
    );

    let resp = call(
        &h,
        request(
            Http1Method::Post,
            "/api/v1/tokenize",
            serde_json::json!({"text": "สวัสดี"}),
        ),
    );
    assert_eq!(resp.status, 401);
    assert_eq!(body_json(&resp)["error"], "UNAUTHORIZED");

    let resp = call(
        &h,
        request_with_headers(
            Http1Method::Post,
            "/api/v1/tokenize",
            serde_json::json!({"text": "สวัสดี"}),
            &[("X-API-Key", "sesame")],
        ),
    );
    assert_eq!(resp.status, 200);

    // Health and metrics bypass the gate.
    let resp = call(
        &h,
        request(Http1Method::Get, "/metrics", serde_json::Value::Null),
    );
    assert_eq!(resp.status, 200);
}

#[test]
fn health_reflects_backend_probe_state() {
    let h = harness();

    // Mark the backend probe healthy as the probe worker would.
    global_metrics().backend.probe_healthy.set(1);
    global_metrics().backend.probe_last_ok_us.set(now_micros());
    let resp = call(
        &h,
        request(Http1Method::Get, "/health", serde_json::Value::Null),
    );
    assert_eq!(resp.status, 200);
    let body = body_json(&resp);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["segmenter"], true);

    let resp = call(
        &h,
        request(Http1Method::Get, "/health/detailed", serde_json::Value::Null),
    );
    let body = body_json(&resp);
    assert_eq!(body["dictionary"]["entry_count"], 1);
    assert!(body["dictionary"]["generation"].as_u64().unwrap() >= 1);
    assert!(body["latencies_us"]["search"].is_object());
}

#[test]
fn unknown_path_is_404_and_wrong_verb_is_405() {
    let h = harness();
    let resp = call(
        &h,
        request(Http1Method::Get, "/api/v2/nope", serde_json::Value::Null),
    );
    assert_eq!(resp.status, 404);

    let resp = call(
        &h,
        request(Http1Method::Get, "/api/v1/search", serde_json::Value::Null),
    );
    assert_eq!(resp.status, 405);
}

#[test]
fn cors_headers_follow_configuration() {
    let h = harness_with(
        |config| config.cors_origins = vec!["*".to_string()],
        Vec::new(),
    );
    let resp = call(
        &h,
        request_with_headers(
            Http1Method::Post,
            "/api/v1/tokenize",
            serde_json::json!({"text": "สวัสดี"}),
            &[("Origin", "https://app.example")],
        ),
    );
    assert!(resp
        .headers
        .iter()
        .any(|(k, v)| k == "access-control-allow-origin" && v == "*"));

    let preflight = call(
        &h,
        request(Http1Method::Options, "/api/v1/search", serde_json::Value::Null),
    );
    assert_eq!(preflight.status, 204);
}
