//! Configuration for the Thai search proxy.
//!
//! All settings come from environment variables with documented defaults.
//! `Config::from_env()` never fails: unparsable values fall back to the
//! default for that key so a typo cannot keep the service from starting.

use std::env;
use std::path::PathBuf;

/// Whitespace handling policy for tokenization output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhitespacePolicy {
    /// Collapse each whitespace run to one separator token (`"␠"`).
    #[default]
    Collapse,
    /// Drop whitespace runs from the token stream entirely.
    Elide,
}

impl WhitespacePolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collapse => "collapse",
            Self::Elide => "elide",
        }
    }
}

/// Ranker weights per variant kind, overridable via `W_*` variables.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct VariantWeights {
    pub original: f64,
    pub tokenised: f64,
    pub compound_split: f64,
    pub fallback_char: f64,
}

impl Default for VariantWeights {
    fn default() -> Self {
        Self {
            original: 1.0,
            tokenised: 1.2,
            compound_split: 0.7,
            fallback_char: 0.4,
        }
    }
}

/// Main configuration struct for the Thai search proxy.
#[derive(Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    // Listener
    /// `LISTEN_ADDR` (default `0.0.0.0:8000`).
    pub listen_addr: String,

    // Backend (Meilisearch)
    /// `BACKEND_URL` (default `http://127.0.0.1:7700`).
    pub backend_url: String,
    /// `BACKEND_API_KEY` — bearer key for the backend; optional.
    pub backend_api_key: Option<String>,
    /// `BACKEND_INDEX_DEFAULT` — index used when a request omits `index_name`.
    pub backend_index_default: Option<String>,
    /// `BACKEND_PRIMARY_KEY` (default `id`) — document field used as `doc_id`.
    pub backend_primary_key: String,
    /// `BACKEND_POOL_SIZE` (default 10) — executor worker threads.
    pub backend_pool_size: usize,
    /// `BACKEND_QUEUE_MAX` (default 32) — pending variant queue bound.
    pub backend_queue_max: usize,
    /// `BACKEND_PROBE_INTERVAL_S` (default 30) — health probe cadence.
    pub backend_probe_interval_s: u64,

    // Dictionary
    /// `DICT_PATH` (default `./dictionaries/thai_compounds.json`).
    pub dict_path: PathBuf,
    /// `DICT_WATCH_ENABLED` (default true).
    pub dict_watch_enabled: bool,
    /// `DICT_WATCH_INTERVAL_MS` (default 2000).
    pub dict_watch_interval_ms: u64,

    // Segmenters
    /// `SEGMENTER_PRIMARY` (default `maxmatch`).
    pub segmenter_primary: String,
    /// `SEGMENTER_FALLBACKS` (default `cluster,script`) — comma list, tried in order.
    pub segmenter_fallbacks: Vec<String>,
    /// `SEGMENTER_TIMEOUT_MS` (default 50) — per-engine budget before falling back.
    pub segmenter_timeout_ms: u64,

    // Query pipeline
    /// `MAX_VARIANTS` (default 5).
    pub max_variants: usize,
    /// `QUERY_PROCESS_TIMEOUT_MS` (default 20).
    pub query_process_timeout_ms: u64,
    /// `VARIANT_TIMEOUT_MS` (default 2000).
    pub variant_timeout_ms: u64,
    /// `SEARCH_TIMEOUT_MS` (default 5000).
    pub search_timeout_ms: u64,
    /// `REQUEST_DEADLINE_MS` (default 10000).
    pub request_deadline_ms: u64,
    /// `W_ORIGINAL` / `W_TOKENISED` / `W_COMPOUND_SPLIT` / `W_FALLBACK_CHAR`.
    pub weights: VariantWeights,
    /// `COMPOUND_SPLIT_GATED` (default true) — gate splitting on confidence.
    pub compound_split_gated: bool,
    /// `COMPOUND_SPLIT_MIN_CONFIDENCE` (default 0.5).
    pub compound_split_min_confidence: f64,
    /// `WHITESPACE_POLICY` (default `collapse`).
    pub whitespace_policy: WhitespacePolicy,

    // Auth / CORS
    /// `API_KEY_REQUIRED` (default false).
    pub api_key_required: bool,
    /// `API_KEY` — compared against the `X-API-Key` header when required.
    pub api_key: Option<String>,
    /// `CORS_ORIGINS` — comma list; `*` allows any origin.
    pub cors_origins: Vec<String>,

    // Logging
    /// `LOG_LEVEL` (default `info`).
    pub log_level: String,
    /// `LOG_JSON_ENABLED` (default false).
    pub log_json_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            backend_url: "http://127.0.0.1:7700".to_string(),
            backend_api_key: None,
            backend_index_default: None,
            backend_primary_key: "id".to_string(),
            backend_pool_size: 10,
            backend_queue_max: 32,
            backend_probe_interval_s: 30,
            dict_path: PathBuf::from("./dictionaries/thai_compounds.json"),
            dict_watch_enabled: true,
            dict_watch_interval_ms: 2000,
            segmenter_primary: "maxmatch".to_string(),
            segmenter_fallbacks: vec!["cluster".to_string(), "script".to_string()],
            segmenter_timeout_ms: 50,
            max_variants: 5,
            query_process_timeout_ms: 20,
            variant_timeout_ms: 2000,
            search_timeout_ms: 5000,
            request_deadline_ms: 10_000,
            weights: VariantWeights::default(),
            compound_split_gated: true,
            compound_split_min_confidence: 0.5,
            whitespace_policy: WhitespacePolicy::Collapse,
            api_key_required: false,
            api_key: None,
            cors_origins: Vec::new(),
            log_level: "info".to_string(),
            log_json_enabled: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("backend_url", &self.backend_url)
            .field(
                "backend_api_key",
                &self.backend_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("backend_index_default", &self.backend_index_default)
            .field("backend_pool_size", &self.backend_pool_size)
            .field("backend_queue_max", &self.backend_queue_max)
            .field("dict_path", &self.dict_path)
            .field("segmenter_primary", &self.segmenter_primary)
            .field("segmenter_fallbacks", &self.segmenter_fallbacks)
            .field("max_variants", &self.max_variants)
            .field("weights", &self.weights)
            .field("api_key_required", &self.api_key_required)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("cors_origins", &self.cors_origins)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_value("LISTEN_ADDR") {
            config.listen_addr = v;
        }

        // Backend
        if let Some(v) = env_value("BACKEND_URL") {
            config.backend_url = v.trim_end_matches('/').to_string();
        }
        config.backend_api_key = env_value("BACKEND_API_KEY").filter(|s| !s.is_empty());
        config.backend_index_default =
            env_value("BACKEND_INDEX_DEFAULT").filter(|s| !s.is_empty());
        if let Some(v) = env_value("BACKEND_PRIMARY_KEY") {
            config.backend_primary_key = v;
        }
        config.backend_pool_size =
            env_usize("BACKEND_POOL_SIZE", config.backend_pool_size).max(1);
        config.backend_queue_max =
            env_usize("BACKEND_QUEUE_MAX", config.backend_queue_max).max(1);
        config.backend_probe_interval_s = env_u64(
            "BACKEND_PROBE_INTERVAL_S",
            config.backend_probe_interval_s,
        );

        // Dictionary
        if let Some(v) = env_value("DICT_PATH") {
            config.dict_path = PathBuf::from(shellexpand::tilde(&v).into_owned());
        }
        config.dict_watch_enabled = env_bool("DICT_WATCH_ENABLED", config.dict_watch_enabled);
        config.dict_watch_interval_ms =
            env_u64("DICT_WATCH_INTERVAL_MS", config.dict_watch_interval_ms);

        // Segmenters
        if let Some(v) = env_value("SEGMENTER_PRIMARY") {
            config.segmenter_primary = v.trim().to_lowercase();
        }
        if let Some(v) = env_value("SEGMENTER_FALLBACKS") {
            config.segmenter_fallbacks = parse_csv(&v);
        }
        config.segmenter_timeout_ms =
            env_u64("SEGMENTER_TIMEOUT_MS", config.segmenter_timeout_ms);

        // Query pipeline
        config.max_variants = env_usize("MAX_VARIANTS", config.max_variants).clamp(1, 16);
        config.query_process_timeout_ms = env_u64(
            "QUERY_PROCESS_TIMEOUT_MS",
            config.query_process_timeout_ms,
        );
        config.variant_timeout_ms = env_u64("VARIANT_TIMEOUT_MS", config.variant_timeout_ms);
        config.search_timeout_ms = env_u64("SEARCH_TIMEOUT_MS", config.search_timeout_ms);
        config.request_deadline_ms = env_u64("REQUEST_DEADLINE_MS", config.request_deadline_ms);
        config.weights = VariantWeights {
            original: env_weight("W_ORIGINAL", config.weights.original),
            tokenised: env_weight("W_TOKENISED", config.weights.tokenised),
            compound_split: env_weight("W_COMPOUND_SPLIT", config.weights.compound_split),
            fallback_char: env_weight("W_FALLBACK_CHAR", config.weights.fallback_char),
        };
        config.compound_split_gated =
            env_bool("COMPOUND_SPLIT_GATED", config.compound_split_gated);
        config.compound_split_min_confidence = env_f64(
            "COMPOUND_SPLIT_MIN_CONFIDENCE",
            config.compound_split_min_confidence,
        )
        .clamp(0.0, 1.0);
        if let Some(v) = env_value("WHITESPACE_POLICY") {
            config.whitespace_policy = match v.trim().to_lowercase().as_str() {
                "elide" => WhitespacePolicy::Elide,
                _ => WhitespacePolicy::Collapse,
            };
        }

        // Auth / CORS
        config.api_key_required = env_bool("API_KEY_REQUIRED", config.api_key_required);
        config.api_key = env_value("API_KEY").filter(|s| !s.is_empty());
        if let Some(v) = env_value("CORS_ORIGINS") {
            config.cors_origins = parse_csv(&v);
        }

        // Logging
        if let Some(v) = env_value("LOG_LEVEL") {
            config.log_level = v.trim().to_lowercase();
        }
        config.log_json_enabled = env_bool("LOG_JSON_ENABLED", config.log_json_enabled);

        config
    }

    /// Effective config as JSON with secrets redacted (for `config-show`).
    #[must_use]
    pub fn redacted_json(&self) -> serde_json::Value {
        serde_json::json!({
            "listen_addr": self.listen_addr,
            "backend_url": self.backend_url,
            "backend_api_key": self.backend_api_key.as_ref().map(|_| "[REDACTED]"),
            "backend_index_default": self.backend_index_default,
            "backend_primary_key": self.backend_primary_key,
            "backend_pool_size": self.backend_pool_size,
            "backend_queue_max": self.backend_queue_max,
            "backend_probe_interval_s": self.backend_probe_interval_s,
            "dict_path": self.dict_path.display().to_string(),
            "dict_watch_enabled": self.dict_watch_enabled,
            "dict_watch_interval_ms": self.dict_watch_interval_ms,
            "segmenter_primary": self.segmenter_primary,
            "segmenter_fallbacks": self.segmenter_fallbacks,
            "segmenter_timeout_ms": self.segmenter_timeout_ms,
            "max_variants": self.max_variants,
            "query_process_timeout_ms": self.query_process_timeout_ms,
            "variant_timeout_ms": self.variant_timeout_ms,
            "search_timeout_ms": self.search_timeout_ms,
            "request_deadline_ms": self.request_deadline_ms,
            "weights": self.weights,
            "compound_split_gated": self.compound_split_gated,
            "compound_split_min_confidence": self.compound_split_min_confidence,
            "whitespace_policy": self.whitespace_policy.as_str(),
            "api_key_required": self.api_key_required,
            "api_key": self.api_key.as_ref().map(|_| "[REDACTED]"),
            "cors_origins": self.cors_origins,
            "log_level": self.log_level,
            "log_json_enabled": self.log_json_enabled,
        })
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string())
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env_value(key).map_or(default, |v| parse_bool(&v, default))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_value(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_value(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_value(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Weights must stay within (0, 2] per the ranking contract.
fn env_weight(key: &str, default: f64) -> f64 {
    let v = env_f64(key, default);
    if v > 0.0 && v <= 2.0 { v } else { default }
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}
