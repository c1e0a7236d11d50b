//! `tripmate status`: show the effective configuration.

use tripmate_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let yes_no = |b: bool| if b { "configured" } else { "missing" };

    println!("TripMate Status");
    println!("===============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Endpoint:     {}", config.base_url);
    println!("  Model:        {}", config.model);
    println!("  API key:      {}", yes_no(config.has_api_key()));
    println!("  Weather key:  {}", yes_no(config.weather.api_key.is_some()));
    println!("  Max steps:    {}", config.agent.max_steps);
    println!("  Later steps:  {:?}", config.agent.later_steps);
    println!(
        "  History:      {} messages/conversation, compact above {} conversations",
        config.history.capacity, config.history.compact_threshold
    );
    println!(
        "  Guardrail:    {} ({} keywords)",
        if config.guardrail.enabled { "enabled" } else { "disabled" },
        config.guardrail.keywords.len()
    );
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file, run `tripmate init` first");
    }

    Ok(())
}
