//! Built-in tool implementations for TripMate.
//!
//! Tools give the assistant structured abilities: check the weather,
//! summarise a destination as a trip card, and build a packing list.

pub mod packing_list;
pub mod trip_card;
pub mod weather;

use std::sync::Arc;
use std::time::Duration;
use tripmate_config::AppConfig;
use tripmate_core::tool::ToolRegistry;

pub use packing_list::PackingListTool;
pub use trip_card::TripCardTool;
pub use weather::{OpenWeatherSource, WeatherSource, WeatherTool};

/// Create the default tool registry, with weather backed by OpenWeatherMap.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let source = Arc::new(OpenWeatherSource::from_config(&config.weather));
    registry_with_source(source, Duration::from_secs(config.agent.tool_timeout_secs))
}

/// Create the built-in registry over an arbitrary weather source.
pub fn registry_with_source(source: Arc<dyn WeatherSource>, timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new().with_timeout(timeout);
    registry.register(Box::new(WeatherTool::new(source)));
    registry.register(Box::new(TripCardTool));
    registry.register(Box::new(PackingListTool));
    registry
}
