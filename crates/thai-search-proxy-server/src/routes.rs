//! REST endpoint handlers for the v1 API.
//!
//! Each handler parses and validates its body, calls into the pipeline,
//! and serialises either the success payload or the structured error.

use asupersync::http::h1::types::{Request as Http1Request, Response as Http1Response};
use serde::Deserialize;
use thai_search_proxy_core::{CompoundEntry, Error, TokenizationResult};
use thai_search_proxy_search::SearchOptions;

use crate::{HttpState, query_param};

/// Parse a JSON request body, mapping malformed input to `INVALID_INPUT`.
fn parse_body<'a, T: Deserialize<'a>>(req: &'a Http1Request) -> Result<T, Error> {
    if req.body.is_empty() {
        return Err(Error::InvalidInput("request body is required".to_string()));
    }
    serde_json::from_slice(&req.body)
        .map_err(|e| Error::InvalidInput(format!("malformed JSON body: {e}")))
}

pub(crate) fn service_info(state: &HttpState, req: &Http1Request) -> Http1Response {
    let body = serde_json::json!({
        "service": "thai-search-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /api/v1/tokenize",
            "POST /api/v1/tokenize/compound",
            "POST /api/v1/search",
            "POST /api/v1/batch-search",
            "GET /api/v1/compounds",
            "POST /api/v1/compounds",
            "PUT /api/v1/compounds/{surface}",
            "DELETE /api/v1/compounds/{surface}",
            "GET /health",
            "GET /health/detailed",
            "GET /metrics"
        ],
    });
    state.json_response(req, 200, &body)
}

// ---------------------------------------------------------------------------
// Tokenize
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenizeBody {
    text: String,
}

/// Compound span annotation for the `/tokenize/compound` flavour.
fn compound_spans(result: &TokenizationResult) -> serde_json::Value {
    let spans: Vec<serde_json::Value> = result
        .tokens
        .iter()
        .zip(&result.spans)
        .zip(&result.is_compound)
        .filter_map(|((token, span), is_compound)| {
            is_compound.then(|| {
                serde_json::json!({
                    "surface": token,
                    "start": span.start,
                    "end": span.end,
                })
            })
        })
        .collect();
    serde_json::Value::Array(spans)
}

pub(crate) fn tokenize(
    state: &HttpState,
    req: &Http1Request,
    annotate_compounds: bool,
) -> Http1Response {
    let body: TokenizeBody = match parse_body(req) {
        Ok(body) => body,
        Err(err) => return state.failure_response(req, &err),
    };
    match state.proxy().tokenize(&body.text) {
        Ok(result) => {
            let mut value = serde_json::to_value(&result).unwrap_or_default();
            if annotate_compounds {
                value["compound_spans"] = compound_spans(&result);
            }
            state.json_response(req, 200, &value)
        }
        Err(err) => state.failure_response(req, &err),
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    index_name: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    filters: Option<serde_json::Value>,
    #[serde(default)]
    sort: Option<serde_json::Value>,
    #[serde(default)]
    include_tokenization_info: bool,
}

impl SearchBody {
    fn options(&self) -> SearchOptions {
        SearchOptions {
            index_name: self.index_name.clone(),
            limit: self.limit.unwrap_or(20),
            offset: self.offset.unwrap_or(0),
            filters: self.filters.clone(),
            sort: self.sort.clone(),
            include_tokenization_info: self.include_tokenization_info,
        }
    }
}

pub(crate) fn search(state: &HttpState, req: &Http1Request) -> Http1Response {
    let body: SearchBody = match parse_body(req) {
        Ok(body) => body,
        Err(err) => return state.failure_response(req, &err),
    };
    match state.proxy().search(&body.query, &body.options()) {
        Ok(response) => {
            let value = serde_json::to_value(&response).unwrap_or_default();
            state.json_response(req, 200, &value)
        }
        Err(err) => state.failure_response(req, &err),
    }
}

#[derive(Debug, Deserialize)]
struct BatchSearchBody {
    queries: Vec<String>,
    #[serde(default)]
    index_name: Option<String>,
    #[serde(default)]
    options: Option<BatchOptions>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchOptions {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    filters: Option<serde_json::Value>,
    #[serde(default)]
    sort: Option<serde_json::Value>,
    #[serde(default)]
    include_tokenization_info: bool,
}

pub(crate) fn batch_search(state: &HttpState, req: &Http1Request) -> Http1Response {
    let body: BatchSearchBody = match parse_body(req) {
        Ok(body) => body,
        Err(err) => return state.failure_response(req, &err),
    };
    let opts = body.options.unwrap_or_default();
    let options = SearchOptions {
        index_name: body.index_name,
        limit: opts.limit.unwrap_or(20),
        offset: opts.offset.unwrap_or(0),
        filters: opts.filters,
        sort: opts.sort,
        include_tokenization_info: opts.include_tokenization_info,
    };
    match state.proxy().batch_search(&body.queries, &options) {
        Ok(items) => {
            let value = serde_json::json!({ "results": items });
            state.json_response(req, 200, &value)
        }
        Err(err) => state.failure_response(req, &err),
    }
}

// ---------------------------------------------------------------------------
// Compounds CRUD
// ---------------------------------------------------------------------------

pub(crate) fn list_compounds(
    state: &HttpState,
    req: &Http1Request,
    query: Option<&str>,
) -> Http1Response {
    let category = query_param(query, "category");
    let offset = query_param(query, "offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0usize);
    let limit = query_param(query, "limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(50usize)
        .clamp(1, 500);

    let store = state.proxy().store();
    let (entries, total) = store.list(category.as_deref(), offset, limit);
    let body = serde_json::json!({
        "entries": entries,
        "total": total,
        "offset": offset,
        "limit": limit,
        "generation": store.generation(),
    });
    state.json_response(req, 200, &body)
}

#[derive(Debug, Deserialize)]
struct CompoundBody {
    surface: String,
    #[serde(default)]
    components: Option<Vec<String>>,
    category: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    origin_language: Option<String>,
}

impl CompoundBody {
    fn into_entry(self) -> CompoundEntry {
        let mut entry = CompoundEntry::new(self.surface, self.category);
        entry.components = self.components;
        if let Some(confidence) = self.confidence {
            entry.confidence = confidence;
        }
        entry.origin_language = self.origin_language;
        entry
    }
}

pub(crate) fn add_compound(state: &HttpState, req: &Http1Request) -> Http1Response {
    let body: CompoundBody = match parse_body(req) {
        Ok(body) => body,
        Err(err) => return state.failure_response(req, &err),
    };
    match state.proxy().store().add(body.into_entry()) {
        Ok(entry) => {
            let value = serde_json::to_value(&entry).unwrap_or_default();
            state.json_response(req, 201, &value)
        }
        Err(err) => state.failure_response(req, &err),
    }
}

pub(crate) fn update_compound(
    state: &HttpState,
    req: &Http1Request,
    surface: &str,
) -> Http1Response {
    let body: CompoundBody = match parse_body(req) {
        Ok(body) => body,
        Err(err) => return state.failure_response(req, &err),
    };
    match state.proxy().store().update(surface, body.into_entry()) {
        Ok(entry) => {
            let value = serde_json::to_value(&entry).unwrap_or_default();
            state.json_response(req, 200, &value)
        }
        Err(err) => state.failure_response(req, &err),
    }
}

pub(crate) fn remove_compound(
    state: &HttpState,
    req: &Http1Request,
    surface: &str,
) -> Http1Response {
    match state.proxy().store().remove(surface) {
        Ok(()) => {
            let body = serde_json::json!({ "deleted": surface });
            state.json_response(req, 200, &body)
        }
        Err(err) => state.failure_response(req, &err),
    }
}
