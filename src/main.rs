//! Beacon Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - BEACON_HOST: Bind address (default: 0.0.0.0)
//! - BEACON_PORT: Port number (default: 8080)
//! - BEACON_CHECK_INTERVAL_SECS: Threshold check interval (default: 10)
//! - BEACON_RESET_CHECKS: Consecutive good checks that close an alert (default: 1)
//! - BEACON_RETENTION_SECS: How long samples and closed alerts are kept (default: 3600)
//! - BEACON_DEFINITIONS: Path to a JSON file with alerting definitions (optional)
//! - BEACON_WEBHOOK_URLS: Comma-separated webhook endpoints (optional)
//! - BEACON_WEBHOOK_HEADERS: Comma-separated "Name:Value" headers for webhooks (optional)
//! - BEACON_NOTIFY_ONGOING: Also send webhooks for ongoing alerts (default: false)
//! - RUST_LOG: Log level (default: info)

use beacon::api::{run_server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let defaults = ServerConfig::default();

    // Parse webhook list: "http://a/hook,http://b/hook" format
    let webhook_urls: Vec<String> = std::env::var("BEACON_WEBHOOK_URLS")
        .ok()
        .map(|urls| {
            urls.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    // Parse webhook headers: "Authorization:Bearer abc,X-Team:ops" format
    let webhook_headers: Vec<(String, String)> = std::env::var("BEACON_WEBHOOK_HEADERS")
        .ok()
        .map(|headers| {
            headers
                .split(',')
                .filter_map(|h| h.split_once(':'))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let config = ServerConfig {
        host: std::env::var("BEACON_HOST").unwrap_or(defaults.host),
        port: env_or("BEACON_PORT", defaults.port),
        check_interval_secs: env_or("BEACON_CHECK_INTERVAL_SECS", defaults.check_interval_secs),
        reset_checks: env_or("BEACON_RESET_CHECKS", defaults.reset_checks),
        retention_secs: env_or("BEACON_RETENTION_SECS", defaults.retention_secs),
        retention_check_interval_secs: defaults.retention_check_interval_secs,
        max_samples_per_series: defaults.max_samples_per_series,
        definitions_path: std::env::var("BEACON_DEFINITIONS").ok().map(Into::into),
        webhook_urls,
        webhook_headers,
        notify_ongoing: env_or("BEACON_NOTIFY_ONGOING", defaults.notify_ongoing),
    };

    tracing::info!("Beacon configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Check interval: {} seconds", config.check_interval_secs);
    tracing::info!("  Reset checks: {}", config.reset_checks);
    tracing::info!("  Retention: {} seconds", config.retention_secs);
    match &config.definitions_path {
        Some(path) => tracing::info!("  Definitions: {}", path.display()),
        None => tracing::info!("  Definitions: none (add them via POST /definitions)"),
    }
    tracing::info!("  Webhooks: {}", config.webhook_urls.len());
    for url in &config.webhook_urls {
        tracing::info!("    - {}", url);
    }

    println!(
        r#"
  ____
 | __ )  ___  __ _  ___ ___  _ __
 |  _ \ / _ \/ _` |/ __/ _ \| '_ \
 | |_) |  __/ (_| | (_| (_) | | | |
 |____/ \___|\__,_|\___\___/|_| |_|

 Application Performance Monitoring Server
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
