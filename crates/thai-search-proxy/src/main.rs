//! Thai search proxy — compound-aware search front for Meilisearch.
//!
//! This is the main entry point. `serve` (the default) runs the HTTP
//! service; the remaining subcommands are operator utilities that reuse
//! the same configuration and dictionary pipeline.

#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use thai_search_proxy_core::Config;
use thai_search_proxy_tokenizer::{CompoundTokenizer, DictionaryStore, parse_dictionary};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "thai-search-proxy")]
#[command(
    version,
    about = "Compound-aware Thai search proxy for Meilisearch",
    after_help = "Configuration comes from environment variables; run `thai-search-proxy config-show` to inspect the effective values."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging (overrides LOG_LEVEL with debug)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP service (default)
    Serve,
    /// Tokenize a string with the configured dictionary and print JSON
    Tokenize {
        /// Text to tokenize
        text: String,
    },
    /// Validate a dictionary file and report every offending row
    CheckDict {
        /// Path to the dictionary (defaults to DICT_PATH)
        path: Option<std::path::PathBuf>,
    },
    /// Print the effective configuration with secrets redacted
    ConfigShow,
}

fn init_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json_enabled {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(&config, cli.verbose);

    let exit = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config),
        Commands::Tokenize { text } => tokenize(&config, &text),
        Commands::CheckDict { path } => check_dict(&config, path.as_deref()),
        Commands::ConfigShow => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config.redacted_json())
                    .unwrap_or_else(|_| "{}".to_string())
            );
            0
        }
    };
    std::process::exit(exit);
}

fn serve(config: &Config) -> i32 {
    tracing::info!(config = ?config, "starting thai-search-proxy");
    match thai_search_proxy_server::run_http(config) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "server exited with error");
            eprintln!("error: {err}");
            1
        }
    }
}

fn tokenize(config: &Config, text: &str) -> i32 {
    let tokenizer = match CompoundTokenizer::from_config(config) {
        Ok(tokenizer) => tokenizer,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };
    let store = DictionaryStore::open(config.dict_path.clone());
    let result = tokenizer.tokenize(text, &store.snapshot());
    match serde_json::to_string_pretty(&result) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

fn check_dict(config: &Config, path: Option<&std::path::Path>) -> i32 {
    let path = path.unwrap_or(&config.dict_path);
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", path.display());
            return 1;
        }
    };
    match parse_dictionary(&raw, &path.display().to_string()) {
        Ok(entries) => {
            println!("{}: OK ({} entries)", path.display(), entries.len());
            0
        }
        Err(err) => {
            eprintln!("{}: {err}", path.display());
            if let Some(details) = err.details() {
                if let Some(rows) = details.get("rows").and_then(serde_json::Value::as_array) {
                    for row in rows {
                        eprintln!(
                            "  {}: {:?} — {}",
                            row["row"].as_str().unwrap_or("?"),
                            row["surface"].as_str().unwrap_or(""),
                            row["reason"].as_str().unwrap_or("invalid"),
                        );
                    }
                }
            }
            1
        }
    }
}
