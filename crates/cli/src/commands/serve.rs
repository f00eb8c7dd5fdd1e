//! `promptgate serve`: start the HTTP gateway.

use std::path::Path;

use promptgate_config::AppConfig;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        AppConfig::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("promptgate {}", env!("CARGO_PKG_VERSION"));
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:      {}", config.default_model);
    println!("   Store:      {:?}", config.store.backend);
    println!("   Cache:      {:?}", config.cache.backend);
    println!(
        "   Rate limit: {} req / {}s ({:?})",
        config.rate_limit.max_requests, config.rate_limit.window_secs, config.rate_limit.backend
    );

    promptgate_gateway::start(config).await?;

    Ok(())
}
