//! The step orchestrator: drives the bounded multi-step model/tool loop.
//!
//! Each exchange runs in its own task:
//!
//! 1. **Prepare** the step: the policy picks tool choice and active tools
//! 2. **Stream** the model output, forwarding text and reasoning deltas
//! 3. **If tool calls**: execute them, append the results, go to step 1
//! 4. **Otherwise** (or once `max_steps` is reached): emit `Finish`
//!
//! Events flow to the assembler over a bounded channel, so a slow client
//! slows the loop down instead of growing a buffer.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use tripmate_config::AppConfig;
use tripmate_core::message::{Message, Part, Role};
use tripmate_core::provider::{ModelRequest, Provider, Usage};
use tripmate_core::tool::{ToolCall, ToolRegistry};

use crate::policy::StepPolicy;
use crate::stream_event::StepEvent;

/// Why a run stopped before finishing.
enum Halt {
    /// The cancellation token fired.
    Cancelled,
    /// The model failed.
    Failed(String),
    /// Nobody is listening any more.
    Closed,
}

struct Finished {
    generated: Vec<Message>,
    usage: Usage,
    steps: usize,
    finish_reason: String,
}

/// Runs exchanges against one provider and one tool registry.
#[derive(Clone)]
pub struct StepOrchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    policy: StepPolicy,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_steps: usize,
    event_buffer: usize,
}

impl StepOrchestrator {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            policy: StepPolicy::default(),
            model: model.into(),
            system_prompt: String::new(),
            temperature: 0.7,
            max_tokens: None,
            max_steps: 5,
            event_buffer: 32,
        }
    }

    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            policy: StepPolicy::from_config(&config.agent),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            max_steps: config.agent.max_steps.max(1),
            event_buffer: config.agent.event_buffer.max(1),
        }
    }

    pub fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Start an exchange over `messages` (prior history plus the new user
    /// message). The returned receiver yields events in order and ends
    /// with exactly one of `Finish`, `Error` or `Aborted`.
    pub fn run(&self, messages: Vec<Message>, cancel: CancellationToken) -> mpsc::Receiver<StepEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let this = self.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let terminal = match this.drive(messages, &cancel, &tx).await {
                Ok(done) => {
                    info!(
                        steps = done.steps,
                        total_tokens = done.usage.total_tokens,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Exchange finished"
                    );
                    StepEvent::Finish {
                        generated: done.generated,
                        usage: done.usage,
                        steps: done.steps,
                        finish_reason: done.finish_reason,
                    }
                }
                Err(Halt::Cancelled) => {
                    info!("Exchange cancelled");
                    StepEvent::Aborted
                }
                Err(Halt::Failed(message)) => {
                    error!(error = %message, "Model step failed");
                    StepEvent::Error { message }
                }
                Err(Halt::Closed) => {
                    debug!("Event receiver dropped, stopping exchange");
                    return;
                }
            };
            let _ = tx.send(terminal).await;
        });

        rx
    }

    async fn drive(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<StepEvent>,
    ) -> Result<Finished, Halt> {
        let registered = self.tools.names();
        let mut working = messages;
        let mut generated: Vec<Message> = Vec::new();
        let mut total_usage = Usage::default();
        let mut finish_reason = None;
        let mut steps = 0;

        for step in 0..self.max_steps {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }

            let settings = self.policy.prepare(step, &working, &registered);
            debug!(step, tool_choice = ?settings.tool_choice, active = ?settings.active_tools, "Starting step");
            emit(
                tx,
                StepEvent::StepStart {
                    step,
                    tool_choice: settings.tool_choice.clone(),
                    active_tools: settings.active_tools.clone(),
                },
            )
            .await?;

            let request = ModelRequest {
                model: self.model.clone(),
                system_prompt: self.system_prompt.clone(),
                messages: working.clone(),
                tools: self.tools.definitions_for(&settings.active_tools),
                tool_choice: settings.tool_choice,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let mut chunks = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Halt::Cancelled),
                opened = self.provider.stream(request) => opened.map_err(|e| Halt::Failed(e.to_string()))?,
            };

            let mut parts = PartBuffer::default();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut step_reason = None;
            let mut step_usage = None;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Halt::Cancelled),
                    next = chunks.recv() => next,
                };
                let Some(chunk) = next else {
                    return Err(Halt::Failed("model stream closed before the step completed".into()));
                };
                let chunk = chunk.map_err(|e| Halt::Failed(e.to_string()))?;

                if let Some(delta) = chunk.reasoning.filter(|r| !r.is_empty()) {
                    trace!(step, reasoning = %delta, "Reasoning");
                    parts.push_reasoning(&delta);
                    emit(tx, StepEvent::ReasoningDelta { step, delta }).await?;
                }
                if let Some(delta) = chunk.content.filter(|c| !c.is_empty()) {
                    parts.push_text(&delta);
                    emit(tx, StepEvent::TextDelta { step, delta }).await?;
                }
                calls.extend(chunk.tool_calls);
                if chunk.finish_reason.is_some() {
                    step_reason = chunk.finish_reason;
                }
                if chunk.usage.is_some() {
                    step_usage = chunk.usage;
                }
                if chunk.done {
                    break;
                }
            }

            let mut assistant_parts = parts.into_parts();
            for call in calls.iter_mut() {
                if call.id.is_empty() {
                    call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                }
                assistant_parts.push(Part::ToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: call.arguments.clone(),
                });
                emit(tx, StepEvent::ToolCall { step, call: call.clone() }).await?;
            }
            if !assistant_parts.is_empty() {
                let message = Message::new(Role::Assistant, assistant_parts);
                working.push(message.clone());
                generated.push(message);
            }

            if !calls.is_empty() {
                let mut results = Vec::with_capacity(calls.len());
                for call in &calls {
                    debug!(step, tool = %call.name, call_id = %call.id, "Executing tool");
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Halt::Cancelled),
                        outcome = self.tools.execute(call) => outcome,
                    };
                    results.push(Part::ToolResult {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        output: outcome.output.clone(),
                        is_error: outcome.is_error,
                    });
                    emit(
                        tx,
                        StepEvent::ToolResult {
                            step,
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            outcome,
                        },
                    )
                    .await?;
                }
                let message = Message::new(Role::Tool, results);
                working.push(message.clone());
                generated.push(message);
            }

            if let Some(usage) = step_usage {
                total_usage += usage;
            }
            debug!(
                step,
                finish_reason = ?step_reason,
                tool_calls = calls.len(),
                usage = ?step_usage,
                "Step finished"
            );
            emit(
                tx,
                StepEvent::StepFinish {
                    step,
                    finish_reason: step_reason.clone(),
                    usage: step_usage,
                },
            )
            .await?;

            steps = step + 1;
            finish_reason = step_reason;
            if calls.is_empty() {
                break;
            }
        }

        Ok(Finished {
            generated,
            usage: total_usage,
            steps,
            finish_reason: finish_reason.unwrap_or_else(|| "stop".into()),
        })
    }
}

async fn emit(tx: &mpsc::Sender<StepEvent>, event: StepEvent) -> Result<(), Halt> {
    tx.send(event).await.map_err(|_| Halt::Closed)
}

/// Collects streamed deltas into parts, starting a new part whenever the
/// kind of delta changes.
#[derive(Default)]
struct PartBuffer {
    parts: Vec<Part>,
}

impl PartBuffer {
    fn push_text(&mut self, delta: &str) {
        match self.parts.last_mut() {
            Some(Part::Text { text }) => text.push_str(delta),
            _ => self.parts.push(Part::text(delta)),
        }
    }

    fn push_reasoning(&mut self, delta: &str) {
        match self.parts.last_mut() {
            Some(Part::Reasoning { text }) => text.push_str(delta),
            _ => self.parts.push(Part::reasoning(delta)),
        }
    }

    fn into_parts(self) -> Vec<Part> {
        self.parts
    }
}
