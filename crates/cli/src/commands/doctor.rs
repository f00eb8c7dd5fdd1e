//! `promptgate doctor`: check every collaborator the gateway depends on.

use std::path::Path;

use promptgate_cache::{CacheHealth, FingerprintCache};
use promptgate_config::AppConfig;
use promptgate_core::CompletionClient;
use promptgate_providers::OpenAiCompatClient;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("promptgate doctor");
    println!("=================\n");

    let mut issues = 0;

    let config = match AppConfig::load_with(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Err(e.into());
        }
    };

    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key configured");
        issues += 1;
    }

    if config.gateway.tokens.is_empty() {
        println!("  ⚠️  No bearer tokens configured");
        issues += 1;
    } else {
        println!("  ✅ {} bearer token(s) configured", config.gateway.tokens.len());
    }

    match promptgate_store::open(&config.store).await {
        Ok(store) => match store.ping().await {
            Ok(()) => println!("  ✅ Store reachable ({})", store.name()),
            Err(e) => {
                println!("  ❌ Store ping failed: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Store unavailable: {e}");
            issues += 1;
        }
    }

    let cache = FingerprintCache::open(&config.cache).await;
    match cache.health().await {
        CacheHealth::Up => println!("  ✅ Cache reachable ({})", cache.backend_name()),
        CacheHealth::Disabled => println!("  ➖ Cache disabled"),
        CacheHealth::Down => {
            println!("  ⚠️  Cache unreachable, requests will run uncached");
            issues += 1;
        }
    }

    let client = OpenAiCompatClient::from_config(&config);
    match client.health_check().await {
        Ok(true) => println!("  ✅ Completion backend reachable ({})", client.base_url()),
        Ok(false) => {
            println!("  ⚠️  Completion backend answered but is not healthy");
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Completion backend unreachable: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
