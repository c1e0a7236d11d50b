//! Configuration loading, validation, and management for TripMate.
//!
//! Loads configuration from `~/.tripmate/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tripmate_core::history::{DEFAULT_CAPACITY, DEFAULT_COMPACT_THRESHOLD};

/// The root configuration structure.
///
/// Maps directly to `~/.tripmate/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model gateway API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible gateway base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier, routed by the gateway
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Instructions sent ahead of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub guardrail: GuardrailConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub weather: WeatherConfig,
}

fn default_base_url() -> String {
    "https://ai-gateway.vercel.sh/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_system_prompt() -> String {
    "You are TripMate, a smart travel companion that provides users with travel suggestions, \
     local event updates, and real-time weather insights to help them plan better trips."
        .into()
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("agent", &self.agent)
            .field("history", &self.history)
            .field("guardrail", &self.guardrail)
            .field("gateway", &self.gateway)
            .field("weather", &self.weather)
            .finish()
    }
}

impl std::fmt::Debug for WeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("forecast_days", &self.forecast_days)
            .finish()
    }
}

/// Tool choice applied on steps that do not force a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LaterSteps {
    /// The model may call any registered tool.
    #[default]
    Auto,
    /// Tool calls are disabled after the first step.
    None,
}

/// Step orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on model steps per exchange
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default)]
    pub later_steps: LaterSteps,

    /// Tool forced on step 0 when a trigger keyword is present
    #[serde(default = "default_forced_tool")]
    pub forced_tool: String,

    #[serde(default = "default_trigger_keywords")]
    pub trigger_keywords: Vec<String>,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Capacity of the orchestrator → assembler event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_steps() -> usize {
    5
}
fn default_forced_tool() -> String {
    "weather".into()
}
fn default_trigger_keywords() -> Vec<String> {
    vec!["weather".into(), "temperature".into()]
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_event_buffer() -> usize {
    32
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            later_steps: LaterSteps::default(),
            forced_tool: default_forced_tool(),
            trigger_keywords: default_trigger_keywords(),
            tool_timeout_secs: default_tool_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages retained per conversation
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Tracked conversations above which compaction evicts
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: usize,

    /// Seconds between compaction runs in the gateway
    #[serde(default = "default_compact_interval_secs")]
    pub compact_interval_secs: u64,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_compact_threshold() -> usize {
    DEFAULT_COMPACT_THRESHOLD
}
fn default_compact_interval_secs() -> u64 {
    300
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            compact_threshold: default_compact_threshold(),
            compact_interval_secs: default_compact_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Any of these (case-insensitive substring) marks a turn in-scope
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Canned replies for out-of-scope turns
    #[serde(default = "default_redirects")]
    pub redirects: Vec<String>,
}

fn default_keywords() -> Vec<String> {
    [
        "travel", "trip", "destination", "hotel", "hostel", "packing", "pack", "luggage",
        "weather", "temperature", "forecast", "flight", "airport", "vacation", "holiday",
        "itinerary", "visa", "passport", "tour", "sightseeing", "beach", "resort", "booking",
        "journey", "backpack",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_redirects() -> Vec<String> {
    [
        "I'm TripMate, your travel companion. Ask me about destinations, weather or what to pack for your next trip!",
        "That's outside what I can help with. I can suggest destinations, check the weather or build a packing list for you.",
        "I focus on travel. Tell me where you're headed and I'll help you plan the trip.",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: default_keywords(),
            redirects: default_redirects(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Request body limit for `POST /api/chat`
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// CORS origins; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
            allowed_origins: vec![],
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// OpenWeatherMap API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_weather_base_url")]
    pub base_url: String,

    /// Max distinct days in the condensed forecast
    #[serde(default = "default_forecast_days")]
    pub forecast_days: usize,
}

fn default_weather_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".into()
}
fn default_forecast_days() -> usize {
    7
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_weather_base_url(),
            forecast_days: default_forecast_days(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.tripmate/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `TRIPMATE_API_KEY`, then `AI_GATEWAY_API_KEY`
    /// - `OPENWEATHER_API_KEY`
    /// - `TRIPMATE_MODEL`, `TRIPMATE_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path, |key| std::env::var(key).ok())
    }

    /// Load from `path`, then apply overrides resolved through `env`.
    pub fn load_with_env(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("TRIPMATE_API_KEY").or_else(|| non_empty("AI_GATEWAY_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(key) = non_empty("OPENWEATHER_API_KEY") {
            self.weather.api_key = Some(key);
        }
        if let Some(model) = non_empty("TRIPMATE_MODEL") {
            self.model = model;
        }
        if let Some(url) = non_empty("TRIPMATE_BASE_URL") {
            self.base_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tripmate")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError("agent.max_steps must be > 0".into()));
        }
        if self.agent.event_buffer == 0 {
            return Err(ConfigError::ValidationError("agent.event_buffer must be > 0".into()));
        }
        if self.history.capacity == 0 {
            return Err(ConfigError::ValidationError("history.capacity must be > 0".into()));
        }
        if self.guardrail.enabled && self.guardrail.redirects.is_empty() {
            return Err(ConfigError::ValidationError(
                "guardrail.redirects must not be empty when the guardrail is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Check if a model API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            agent: AgentConfig::default(),
            history: HistoryConfig::default(),
            guardrail: GuardrailConfig::default(),
            gateway: GatewayConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
