//! Per-step tool activation.
//!
//! Before every model step the orchestrator asks the policy which tools the
//! model may see and whether one of them must be called. The decision is a
//! pure function of the step number and the accumulated message list.

use serde::Serialize;
use tripmate_config::{AgentConfig, LaterSteps};
use tripmate_core::message::{Message, latest_user_text};
use tripmate_core::provider::ToolChoice;

/// Tool settings for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSettings {
    pub tool_choice: ToolChoice,
    pub active_tools: Vec<String>,
}

/// Decides tool choice and active tools per step.
#[derive(Debug, Clone)]
pub struct StepPolicy {
    forced_tool: String,
    trigger_keywords: Vec<String>,
    later_steps: LaterSteps,
}

impl StepPolicy {
    pub fn new(forced_tool: impl Into<String>, trigger_keywords: Vec<String>, later_steps: LaterSteps) -> Self {
        Self {
            forced_tool: forced_tool.into(),
            trigger_keywords: trigger_keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            later_steps,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        if config.later_steps == LaterSteps::None {
            tracing::warn!(
                "agent.later_steps = \"none\": tool calls are disabled on every step that does not force a tool"
            );
        }
        Self::new(config.forced_tool.clone(), config.trigger_keywords.clone(), config.later_steps)
    }

    /// Settings for step `step_number` given the messages so far and the
    /// names of every registered tool.
    pub fn prepare(&self, step_number: usize, messages: &[Message], registered: &[String]) -> StepSettings {
        if step_number == 0 && registered.contains(&self.forced_tool) {
            let text = latest_user_text(messages);
            if self.trigger_keywords.iter().any(|k| text.contains(k.as_str())) {
                return StepSettings {
                    tool_choice: ToolChoice::tool(self.forced_tool.clone()),
                    active_tools: vec![self.forced_tool.clone()],
                };
            }
        }

        let tool_choice = match self.later_steps {
            LaterSteps::Auto => ToolChoice::Auto,
            LaterSteps::None => ToolChoice::None,
        };
        StepSettings {
            tool_choice,
            active_tools: registered.to_vec(),
        }
    }
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}
