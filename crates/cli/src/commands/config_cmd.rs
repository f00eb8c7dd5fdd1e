//! `promptgate config`: configuration helpers.

use std::path::Path;

use promptgate_config::AppConfig;

pub fn print_default() {
    print!("{}", AppConfig::default_toml());
}

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load_with(config_path) {
        Ok(config) => {
            println!("   ✅ Config parsed and validated");
            if !config.has_api_key() {
                println!("   ⚠️  No API key set (set PROMPTGATE_API_KEY or OPENAI_API_KEY)");
            }
            if config.gateway.tokens.is_empty() {
                println!("   ⚠️  No bearer tokens in [gateway.tokens]; every API call will be rejected");
            }
            println!();
            println!("{config:#?}");
            Ok(())
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            Err(e.into())
        }
    }
}

pub fn path() {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}
