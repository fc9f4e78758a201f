//! Meilisearch backend client.
//!
//! One [`BackendClient`] is shared by every executor worker. Calls are
//! plain HTTP/1.1 through the asupersync client; each call runs on a
//! short-lived current-thread runtime so the sync [`VariantSearcher`]
//! surface can be driven from worker threads.

use std::time::Duration;

use asupersync::http::h1::{HttpClient, Method};
use asupersync::runtime::RuntimeBuilder;
use asupersync::time::{timeout, wall_now};
use thai_search_proxy_core::{
    Error, QueryVariant, Result, SearchHit, VariantKind, global_metrics,
};

/// Sync capability the executor fans out over. The production impl talks to
/// Meilisearch; tests substitute stubs.
pub trait VariantSearcher: Send + Sync + 'static {
    /// Run one variant against `index`, returning up to `fetch_limit` hits
    /// within `timeout_ms`.
    fn search_variant(
        &self,
        variant: &QueryVariant,
        index: &str,
        fetch_limit: usize,
        timeout_ms: u64,
    ) -> Result<Vec<SearchHit>>;

    /// Cheap reachability check for the health probe.
    fn probe(&self, timeout_ms: u64) -> Result<()>;
}

/// HTTP client for a Meilisearch instance.
pub struct BackendClient {
    base_url: String,
    api_key: Option<String>,
    primary_key: String,
    client: HttpClient,
}

impl BackendClient {
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<String>, primary_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            primary_key: primary_key.to_string(),
            client: HttpClient::new(),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )];
        if let Some(key) = &self.api_key {
            headers.push(("Authorization".to_string(), format!("Bearer {key}")));
        }
        headers
    }

    /// Build the Meilisearch search payload for one variant.
    ///
    /// `engine_options` entries pass through untouched, so callers can set
    /// `filter`, `sort`, or any other engine knob without the proxy
    /// needing to understand it.
    fn payload(
        variant: &QueryVariant,
        fetch_limit: usize,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut body = serde_json::Map::new();
        body.insert("q".to_string(), variant.text.clone().into());
        body.insert("limit".to_string(), fetch_limit.into());
        body.insert("showRankingScore".to_string(), true.into());
        body.insert(
            "attributesToHighlight".to_string(),
            serde_json::json!(["*"]),
        );
        for (key, value) in &variant.engine_options {
            body.insert(key.clone(), value.clone());
        }
        body
    }

    /// Map one Meilisearch hit object into a [`SearchHit`].
    fn map_hit(
        &self,
        rank: usize,
        hit: &serde_json::Value,
        kind: VariantKind,
    ) -> Option<SearchHit> {
        let doc_id = match hit.get(&self.primary_key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        #[allow(clippy::cast_precision_loss)]
        let raw_score = hit
            .get("_rankingScore")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or_else(|| 1.0 / (1.0 + rank as f64));
        let highlights = hit.get("_formatted").cloned();
        let mut payload = hit.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("_formatted");
            obj.remove("_rankingScore");
        }
        Some(SearchHit {
            doc_id,
            raw_score,
            variant_kind: kind,
            highlights,
            payload,
        })
    }

    async fn post_search(
        &self,
        url: &str,
        body: Vec<u8>,
        timeout_ms: u64,
    ) -> Result<serde_json::Value> {
        let metrics = global_metrics();
        metrics.backend.requests_total.inc();

        let request = Box::pin(self.client.request(
            Method::Post,
            url,
            self.headers(),
            body,
        ));
        let response = match timeout(wall_now(), Duration::from_millis(timeout_ms), request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                metrics.backend.errors_total.inc();
                return Err(Error::BackendUnavailable(err.to_string()));
            }
            Err(_) => {
                metrics.backend.errors_total.inc();
                return Err(Error::BackendTimeout(timeout_ms));
            }
        };

        if response.status != 200 {
            metrics.backend.errors_total.inc();
            let detail = String::from_utf8_lossy(&response.body);
            let detail = detail.chars().take(512).collect::<String>();
            return Err(Error::BackendStatus {
                status: response.status,
                detail,
            });
        }

        serde_json::from_slice(&response.body)
            .map_err(|e| Error::BackendUnavailable(format!("invalid backend JSON: {e}")))
    }

    async fn get_health(&self, timeout_ms: u64) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let request = Box::pin(self.client.get(&url));
        match timeout(wall_now(), Duration::from_millis(timeout_ms), request).await {
            Ok(Ok(resp)) if resp.status == 200 => Ok(()),
            Ok(Ok(resp)) => Err(Error::BackendStatus {
                status: resp.status,
                detail: "health probe".to_string(),
            }),
            Ok(Err(err)) => Err(Error::BackendUnavailable(err.to_string())),
            Err(_) => Err(Error::BackendTimeout(timeout_ms)),
        }
    }
}

impl VariantSearcher for BackendClient {
    fn search_variant(
        &self,
        variant: &QueryVariant,
        index: &str,
        fetch_limit: usize,
        timeout_ms: u64,
    ) -> Result<Vec<SearchHit>> {
        let url = format!("{}/indexes/{index}/search", self.base_url);
        let body = serde_json::to_vec(&Self::payload(variant, fetch_limit))?;

        let runtime = RuntimeBuilder::current_thread()
            .build()
            .map_err(|e| Error::Internal(format!("runtime: {e}")))?;
        let parsed = runtime.block_on(self.post_search(&url, body, timeout_ms))?;

        let hits = parsed
            .get("hits")
            .and_then(serde_json::Value::as_array)
            .map(|hits| {
                hits.iter()
                    .enumerate()
                    .filter_map(|(rank, hit)| self.map_hit(rank, hit, variant.kind))
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    fn probe(&self, timeout_ms: u64) -> Result<()> {
        let runtime = RuntimeBuilder::current_thread()
            .build()
            .map_err(|e| Error::Internal(format!("runtime: {e}")))?;
        runtime.block_on(self.get_health(timeout_ms))
    }
}
