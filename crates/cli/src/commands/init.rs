//! `tripmate init`: first-time setup.

use tripmate_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("TripMate Setup");
    println!("==============\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or delete it and re-run `tripmate init`.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created config.toml at: {}", config_path.display());
    println!("\nNext steps:");
    println!("   1. Set TRIPMATE_API_KEY (or AI_GATEWAY_API_KEY) or add api_key to the file");
    println!("   2. Optionally set OPENWEATHER_API_KEY for live weather");
    println!("   3. Run: tripmate chat\n");

    Ok(())
}
