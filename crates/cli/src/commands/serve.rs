//! `tripmate serve`: start the HTTP gateway.

use tripmate_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("TripMate Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model);
    if !config.has_api_key() {
        println!("   Warning:   no model API key, /api/chat will answer 503");
    }

    tripmate_gateway::start(config).await?;

    Ok(())
}
