//! Response assembly: turns orchestrator events into client stream parts
//! and commits the finished exchange to history.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tripmate_core::history::HistoryStore;
use tripmate_core::message::{ConversationId, Message, Role};
use tripmate_core::provider::Usage;

use crate::stream_event::StepEvent;
use crate::ui_stream::{UiStreamPart, ui_finish_reason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Reasoning,
}

#[derive(Debug)]
struct OpenBlock {
    kind: BlockKind,
    id: String,
}

/// Pure state machine that orders stream parts.
///
/// Open text and reasoning blocks are closed before a tool call, a step
/// boundary or the terminal part. Deltas from a step other than the current
/// one are dropped, as are tool results whose call was never announced.
/// Once a terminal part has been produced every later event is ignored.
#[derive(Debug)]
pub struct PartSequencer {
    conversation_id: ConversationId,
    message_id: String,
    current_step: Option<usize>,
    step_open: bool,
    block: Option<OpenBlock>,
    next_block: usize,
    pending_calls: HashSet<String>,
    closed: bool,
}

impl PartSequencer {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            current_step: None,
            step_open: false,
            block: None,
            next_block: 0,
            pending_calls: HashSet::new(),
            closed: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The opening `start` part.
    pub fn start(&self) -> UiStreamPart {
        UiStreamPart::Start {
            message_id: self.message_id.clone(),
            message_metadata: Some(serde_json::json!({
                "conversationId": self.conversation_id.as_str(),
            })),
        }
    }

    pub fn on_event(&mut self, event: &StepEvent) -> Vec<UiStreamPart> {
        if self.closed {
            return Vec::new();
        }

        let mut out = Vec::new();
        match event {
            StepEvent::StepStart { step, .. } => {
                self.close_step(&mut out);
                self.current_step = Some(*step);
                self.step_open = true;
                out.push(UiStreamPart::StartStep);
            }
            StepEvent::TextDelta { step, delta } => {
                if self.is_current(*step) {
                    let id = self.ensure_block(BlockKind::Text, &mut out);
                    out.push(UiStreamPart::TextDelta { id, delta: delta.clone() });
                }
            }
            StepEvent::ReasoningDelta { step, delta } => {
                if self.is_current(*step) {
                    let id = self.ensure_block(BlockKind::Reasoning, &mut out);
                    out.push(UiStreamPart::ReasoningDelta { id, delta: delta.clone() });
                }
            }
            StepEvent::ToolCall { step, call } => {
                if self.is_current(*step) {
                    self.close_block(&mut out);
                    self.pending_calls.insert(call.id.clone());
                    out.push(UiStreamPart::ToolInputAvailable {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
            }
            StepEvent::ToolResult {
                tool_call_id,
                tool_name,
                outcome,
                ..
            } => {
                if self.pending_calls.remove(tool_call_id) {
                    out.push(UiStreamPart::ToolOutputAvailable {
                        tool_call_id: tool_call_id.clone(),
                        output: outcome.output.clone(),
                    });
                } else {
                    warn!(tool = %tool_name, call_id = %tool_call_id, "Dropping result for unknown tool call");
                }
            }
            StepEvent::StepFinish { step, .. } => {
                if self.is_current(*step) {
                    self.close_step(&mut out);
                }
            }
            StepEvent::Finish {
                usage, finish_reason, ..
            } => {
                out.extend(self.finish(finish_reason, *usage));
            }
            StepEvent::Error { message } => {
                out.extend(self.fail(message));
            }
            StepEvent::Aborted => {
                out.extend(self.abort(None));
            }
        }
        out
    }

    /// Close everything and emit `finish`.
    pub fn finish(&mut self, finish_reason: &str, usage: Usage) -> Vec<UiStreamPart> {
        self.terminate(UiStreamPart::Finish {
            finish_reason: Some(ui_finish_reason(finish_reason).to_string()),
            message_metadata: Some(serde_json::json!({
                "conversationId": self.conversation_id.as_str(),
                "usage": usage,
            })),
        })
    }

    /// Close everything and emit `error`.
    pub fn fail(&mut self, message: &str) -> Vec<UiStreamPart> {
        self.terminate(UiStreamPart::Error {
            error_text: message.to_string(),
        })
    }

    /// Close everything and emit `abort`.
    pub fn abort(&mut self, reason: Option<String>) -> Vec<UiStreamPart> {
        self.terminate(UiStreamPart::Abort { reason })
    }

    fn terminate(&mut self, terminal: UiStreamPart) -> Vec<UiStreamPart> {
        if self.closed {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.close_step(&mut out);
        out.push(terminal);
        self.closed = true;
        out
    }

    fn is_current(&self, step: usize) -> bool {
        if self.step_open && self.current_step == Some(step) {
            true
        } else {
            debug!(step, current = ?self.current_step, "Ignoring event outside the open step");
            false
        }
    }

    fn ensure_block(&mut self, kind: BlockKind, out: &mut Vec<UiStreamPart>) -> String {
        if let Some(block) = self.block.as_ref().filter(|b| b.kind == kind) {
            return block.id.clone();
        }
        self.close_block(out);

        let id = match kind {
            BlockKind::Text => format!("text-{}", self.next_block),
            BlockKind::Reasoning => format!("reasoning-{}", self.next_block),
        };
        self.next_block += 1;
        out.push(match kind {
            BlockKind::Text => UiStreamPart::TextStart { id: id.clone() },
            BlockKind::Reasoning => UiStreamPart::ReasoningStart { id: id.clone() },
        });
        self.block = Some(OpenBlock { kind, id: id.clone() });
        id
    }

    fn close_block(&mut self, out: &mut Vec<UiStreamPart>) {
        if let Some(block) = self.block.take() {
            out.push(match block.kind {
                BlockKind::Text => UiStreamPart::TextEnd { id: block.id },
                BlockKind::Reasoning => UiStreamPart::ReasoningEnd { id: block.id },
            });
        }
    }

    fn close_step(&mut self, out: &mut Vec<UiStreamPart>) {
        self.close_block(out);
        if self.step_open {
            out.push(UiStreamPart::FinishStep);
            self.step_open = false;
        }
    }
}

/// Drives a [`PartSequencer`] over an orchestrator event stream and owns
/// the single history commit of an exchange.
#[derive(Clone)]
pub struct ResponseAssembler {
    history: Arc<dyn HistoryStore>,
    buffer: usize,
}

impl ResponseAssembler {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self { history, buffer: 32 }
    }

    pub fn with_buffer(mut self, capacity: usize) -> Self {
        self.buffer = capacity.max(1);
        self
    }

    /// Assemble one exchange.
    ///
    /// On `Finish` the transcript `prior ++ [user] ++ [merged assistant]` is
    /// written once, before the `finish` part goes out. Any other ending
    /// leaves history untouched. Dropping the returned receiver cancels the
    /// exchange through `cancel`.
    pub fn spawn(
        &self,
        conversation_id: ConversationId,
        prior: Vec<Message>,
        user: Message,
        mut events: mpsc::Receiver<StepEvent>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<UiStreamPart> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let history = self.history.clone();

        tokio::spawn(async move {
            let mut sequencer = PartSequencer::new(conversation_id.clone());
            let mut uncommitted = Some((prior, user));

            if tx.send(sequencer.start()).await.is_err() {
                cancel.cancel();
                return;
            }

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        info!(conversation = %conversation_id, "Client disconnected, cancelling exchange");
                        cancel.cancel();
                        return;
                    }
                    next = events.recv() => next,
                };

                let parts = match next {
                    Some(StepEvent::Finish {
                        generated,
                        usage,
                        finish_reason,
                        ..
                    }) => {
                        if let Some((prior, user)) = uncommitted.take() {
                            let merged = Message::merge_generated(generated)
                                .unwrap_or_else(|| Message::new(Role::Assistant, Vec::new()));
                            let mut transcript = prior;
                            transcript.push(user);
                            transcript.push(merged);
                            history.set(&conversation_id, transcript).await;
                            debug!(conversation = %conversation_id, "Exchange committed");
                        }
                        sequencer.finish(&finish_reason, usage)
                    }
                    Some(event) => sequencer.on_event(&event),
                    None => {
                        warn!(conversation = %conversation_id, "Event stream ended without a terminal event");
                        sequencer.fail("The response ended unexpectedly. Please try again.")
                    }
                };

                for part in parts {
                    if tx.send(part).await.is_err() {
                        cancel.cancel();
                        return;
                    }
                }
                if sequencer.is_closed() {
                    return;
                }
            }
        });

        rx
    }
}
