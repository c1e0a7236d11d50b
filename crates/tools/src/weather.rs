//! Weather tool: current conditions plus a short daily forecast.
//!
//! The data comes from a [`WeatherSource`]. The production source talks to
//! OpenWeatherMap (`/weather` and `/forecast`, metric units) and condenses
//! the 3-hourly forecast into one entry per weekday.

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tripmate_config::WeatherConfig;
use tripmate_core::error::ToolError;
use tripmate_core::tool::Tool;

/// Weather for one city, temperatures rounded to whole °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub city: String,
    pub temp: i64,
    pub condition: String,
    pub alert: String,
    /// Offset from UTC in seconds
    pub timezone: i64,
    pub forecast: Vec<ForecastDay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    /// Short weekday name, e.g. "Mon"
    pub date: String,
    pub temp: i64,
    pub condition: String,
}

/// Why a weather lookup failed. The text is shown to the model verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeatherError {
    #[error("API configuration error. Please contact support.")]
    NotConfigured,

    #[error("{0}")]
    Api(String),

    #[error("Network error or API unavailable. Please try again later.")]
    Network,
}

/// Where weather data comes from.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, city: &str) -> Result<WeatherReport, WeatherError>;
}

/// The `weather` tool exposed to the model.
pub struct WeatherTool {
    source: Arc<dyn WeatherSource>,
}

impl WeatherTool {
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Get weather for a city (°C) with short forecast"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name, e.g., \"Lagos\""
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let location = arguments["location"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'location' argument".into()))?;

        tracing::info!(location, "Fetching weather");
        match self.source.fetch(location).await {
            Ok(report) => serde_json::to_value(report).map_err(|e| ToolError::InvalidOutput(e.to_string())),
            Err(err) => {
                tracing::warn!(location, error = %err, "Weather lookup failed");
                Ok(serde_json::json!({ "error": err.to_string() }))
            }
        }
    }
}

// --- OpenWeatherMap ---

#[derive(Deserialize)]
struct OwmCurrent {
    #[serde(default)]
    name: String,
    main: OwmMain,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    #[serde(default)]
    timezone: i64,
    #[serde(default)]
    alerts: Vec<OwmAlert>,
}

#[derive(Deserialize)]
struct OwmForecast {
    #[serde(default)]
    list: Vec<OwmForecastEntry>,
}

#[derive(Deserialize)]
struct OwmForecastEntry {
    dt: i64,
    main: OwmMain,
    #[serde(default)]
    weather: Vec<OwmCondition>,
}

#[derive(Deserialize)]
struct OwmMain {
    temp: f64,
}

#[derive(Deserialize)]
struct OwmCondition {
    main: String,
}

#[derive(Deserialize)]
struct OwmAlert {
    #[serde(default)]
    description: String,
}

fn condition_of(weather: &[OwmCondition]) -> String {
    weather
        .first()
        .map(|w| w.main.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "Unknown".into())
}

/// One entry per distinct weekday, first reading of each day, at most `max_days`.
/// Weekdays are computed in the city's local time.
fn condense_forecast(entries: &[OwmForecastEntry], tz_offset_secs: i64, max_days: usize) -> Vec<ForecastDay> {
    let mut days: Vec<ForecastDay> = Vec::new();
    for entry in entries {
        if days.len() >= max_days {
            break;
        }
        let Some(local) = DateTime::from_timestamp(entry.dt + tz_offset_secs, 0) else {
            continue;
        };
        let day = local.format("%a").to_string();
        if days.iter().any(|d| d.date == day) {
            continue;
        }
        days.push(ForecastDay {
            date: day,
            temp: entry.main.temp.round() as i64,
            condition: condition_of(&entry.weather),
        });
    }
    days
}

/// OpenWeatherMap-backed [`WeatherSource`].
pub struct OpenWeatherSource {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    forecast_days: usize,
}

impl OpenWeatherSource {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>, forecast_days: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            forecast_days,
        }
    }

    pub fn from_config(config: &WeatherConfig) -> Self {
        Self::new(config.api_key.clone(), config.base_url.clone(), config.forecast_days)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        city: &str,
        api_key: &str,
        fallback: &str,
    ) -> Result<T, WeatherError> {
        let response = self
            .client
            .get(format!("{}/{endpoint}", self.base_url))
            .query(&[("q", city), ("units", "metric"), ("appid", api_key)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, endpoint, "Weather request failed");
                WeatherError::Network
            })?;

        if !response.status().is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body["message"]
                .as_str()
                .filter(|m| !m.is_empty())
                .unwrap_or(fallback);
            return Err(WeatherError::Api(message.to_string()));
        }

        response.json::<T>().await.map_err(|e| {
            tracing::error!(error = %e, endpoint, "Unreadable weather response");
            WeatherError::Network
        })
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherSource {
    async fn fetch(&self, city: &str) -> Result<WeatherReport, WeatherError> {
        let api_key = self.api_key.as_deref().ok_or(WeatherError::NotConfigured)?;

        let current: OwmCurrent = self
            .get("weather", city, api_key, "Weather API failed. Check city name or API key.")
            .await?;
        let forecast: OwmForecast = self
            .get("forecast", city, api_key, "Forecast API failed. Check city name or API key.")
            .await?;

        Ok(WeatherReport {
            city: current.name,
            temp: current.main.temp.round() as i64,
            condition: condition_of(&current.weather),
            alert: current
                .alerts
                .first()
                .map(|a| a.description.clone())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "No alerts available".into()),
            timezone: current.timezone,
            forecast: condense_forecast(&forecast.list, current.timezone, self.forecast_days),
        })
    }
}
