//! `kbchat serve`: start the WebSocket gateway.

use kbchat_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if !config.has_api_key() {
        return Err("No API key found. Set KBCHAT_API_KEY or ANTHROPIC_API_KEY, or add \
                    provider.api_key to the config file."
            .into());
    }

    println!("kbchat gateway");
    println!("   Listening: ws://{}:{}/ws", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.provider.model);
    println!(
        "   Tokens:    {}",
        if config.gateway.bearer_tokens.is_empty() {
            "any (no bearer tokens configured)".to_string()
        } else {
            format!("{} configured", config.gateway.bearer_tokens.len())
        }
    );
    println!("   Sessions:  {}", if config.gateway.persist_sessions {
        config.sessions.backend.as_str()
    } else {
        "disabled"
    });

    kbchat_gateway::start(config).await?;

    Ok(())
}
