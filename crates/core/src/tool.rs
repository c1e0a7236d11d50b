//! Tool trait: the abstraction over assistant capabilities.
//!
//! Tools give the assistant structured abilities: look up the weather,
//! build a trip card, produce a packing list. The registry is built once at
//! startup and shared read-only across every exchange.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::warn;

use crate::error::ToolError;

/// Default per-call execution limit.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub parameters: serde_json::Value,
}

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// What a tool call produced. Always present, even on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub output: serde_json::Value,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(output: serde_json::Value) -> Self {
        // Tools may report their own failures as `{ "error": ... }`.
        let is_error = output.get("error").is_some();
        Self { output, is_error }
    }

    pub fn failure(err: &ToolError) -> Self {
        Self {
            output: err.to_output(),
            is_error: true,
        }
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn parameters_schema(&self) -> serde_json::Value;

    /// JSON Schema the output must satisfy, if the tool declares one.
    fn output_schema(&self) -> Option<serde_json::Value> {
        None
    }

    /// Execute the tool with already-validated arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Validate a JSON value against a JSON Schema, collecting every violation.
pub fn validate_against_schema(
    schema: &serde_json::Value,
    value: &serde_json::Value,
) -> std::result::Result<(), String> {
    let validator =
        jsonschema::Validator::new(schema).map_err(|e| format!("invalid tool schema: {e}"))?;
    if validator.is_valid(value) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}

/// A registry of available tools.
///
/// The orchestrator uses this to:
/// 1. Get the definitions of the tools active on a step
/// 2. Execute tool calls, with every failure folded into a [`ToolOutcome`]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the per-call execution limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Definitions for the named tools only, in the order given.
    /// Unknown names are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.to_definition())
            .collect()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call. Never fails: an unknown tool, a schema
    /// violation, an execution error, a timeout or a panic all become an
    /// error outcome the model can read.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        match self.try_execute(call).await {
            Ok(output) => ToolOutcome::success(output),
            Err(err) => {
                warn!(tool = %call.name, call_id = %call.id, error = %err, "Tool call failed");
                ToolOutcome::failure(&err)
            }
        }
    }

    async fn try_execute(
        &self,
        call: &ToolCall,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        validate_against_schema(&tool.parameters_schema(), &call.arguments)
            .map_err(ToolError::InvalidArguments)?;

        let run = AssertUnwindSafe(tool.execute(call.arguments.clone())).catch_unwind();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            Ok(Err(panic)) => return Err(ToolError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result?,
        };

        if let Some(schema) = tool.output_schema() {
            // Self-reported failures are passed through untouched.
            if output.get("error").is_none() {
                validate_against_schema(&schema, &output).map_err(ToolError::InvalidOutput)?;
            }
        }

        Ok(output)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
