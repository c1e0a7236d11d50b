//! The chat pipeline: guardrail, then orchestrator, then assembler.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tripmate_config::AppConfig;
use tripmate_core::history::HistoryStore;
use tripmate_core::message::{ConversationId, Message};
use tripmate_core::provider::{Provider, ToolChoice, Usage};
use tripmate_core::tool::ToolRegistry;
use tripmate_guardrail::TopicGuardrail;

use crate::assembler::{PartSequencer, ResponseAssembler};
use crate::orchestrator::StepOrchestrator;
use crate::stream_event::StepEvent;
use crate::ui_stream::UiStreamPart;

/// A running exchange as seen by a transport.
pub struct ChatStream {
    pub conversation_id: ConversationId,
    /// Ordered client parts; the last one is terminal.
    pub parts: mpsc::Receiver<UiStreamPart>,
    /// Cancels the exchange. Dropping `parts` has the same effect.
    pub cancel: CancellationToken,
    /// False when the guardrail answered with a redirect.
    pub in_scope: bool,
}

#[derive(Clone)]
pub struct ChatPipeline {
    guardrail: Arc<TopicGuardrail>,
    orchestrator: StepOrchestrator,
    assembler: ResponseAssembler,
    history: Arc<dyn HistoryStore>,
}

impl ChatPipeline {
    pub fn new(guardrail: TopicGuardrail, orchestrator: StepOrchestrator, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            guardrail: Arc::new(guardrail),
            orchestrator,
            assembler: ResponseAssembler::new(history.clone()),
            history,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let orchestrator = StepOrchestrator::from_config(config, provider, tools);
        let mut pipeline = Self::new(TopicGuardrail::from_config(&config.guardrail), orchestrator, history);
        pipeline.assembler = pipeline.assembler.with_buffer(config.agent.event_buffer);
        pipeline
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn orchestrator(&self) -> &StepOrchestrator {
        &self.orchestrator
    }

    /// Start one exchange for `user` on `conversation_id`.
    ///
    /// Out-of-scope requests get a short redirect stream without touching
    /// the model or history.
    pub async fn handle(&self, conversation_id: ConversationId, user: Message) -> ChatStream {
        let cancel = CancellationToken::new();

        let decision = self.guardrail.classify(&user.text());
        if !decision.in_scope {
            info!(conversation = %conversation_id, "Off-topic request redirected");
            let text = decision.redirect_text.unwrap_or_default();
            return ChatStream {
                parts: redirect_stream(conversation_id.clone(), &text).await,
                conversation_id,
                cancel,
                in_scope: false,
            };
        }

        let prior = self.history.get(&conversation_id).await;
        info!(conversation = %conversation_id, prior = prior.len(), "Exchange started");

        let mut messages = prior.clone();
        messages.push(user.clone());
        let events = self.orchestrator.run(messages, cancel.clone());
        let parts = self
            .assembler
            .spawn(conversation_id.clone(), prior, user, events, cancel.clone());

        ChatStream {
            conversation_id,
            parts,
            cancel,
            in_scope: true,
        }
    }
}

/// A complete single-step stream carrying `text`.
async fn redirect_stream(conversation_id: ConversationId, text: &str) -> mpsc::Receiver<UiStreamPart> {
    let mut sequencer = PartSequencer::new(conversation_id);
    let events = [
        StepEvent::StepStart {
            step: 0,
            tool_choice: ToolChoice::None,
            active_tools: Vec::new(),
        },
        StepEvent::TextDelta {
            step: 0,
            delta: text.to_string(),
        },
        StepEvent::StepFinish {
            step: 0,
            finish_reason: Some("stop".into()),
            usage: None,
        },
    ];

    let mut parts = vec![sequencer.start()];
    parts.extend(events.iter().flat_map(|e| sequencer.on_event(e)));
    parts.extend(sequencer.finish("stop", Usage::default()));

    let (tx, rx) = mpsc::channel(parts.len());
    for part in parts {
        let _ = tx.send(part).await;
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use tripmate_config::GuardrailConfig;
    use tripmate_core::message::Role;
    use tripmate_guardrail::FixedRedirect;
    use tripmate_history::InMemoryHistoryStore;

    fn pipeline(provider: Arc<ScriptedProvider>, history: Arc<InMemoryHistoryStore>) -> ChatPipeline {
        let guardrail = TopicGuardrail::from_config_with_policy(&GuardrailConfig::default(), Box::new(FixedRedirect(0)));
        let orchestrator = StepOrchestrator::new(provider, Arc::new(test_registry()), "mock-model");
        ChatPipeline::new(guardrail, orchestrator, history)
    }

    async fn drain(stream: ChatStream) -> Vec<UiStreamPart> {
        let mut rx = stream.parts;
        let mut parts = Vec::new();
        while let Some(part) = rx.recv().await {
            parts.push(part);
        }
        parts
    }

    fn streamed_text(parts: &[UiStreamPart]) -> String {
        parts
            .iter()
            .filter_map(|p| match p {
                UiStreamPart::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn off_topic_request_is_redirected_without_model_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let id = ConversationId::from("c1");

        let stream = pipeline(provider.clone(), history.clone())
            .handle(id.clone(), Message::user("Can you help me file my taxes?"))
            .await;
        assert!(!stream.in_scope);

        let parts = drain(stream).await;
        assert!(!streamed_text(&parts).is_empty());
        assert!(matches!(parts.last(), Some(UiStreamPart::Finish { .. })));
        assert_eq!(provider.call_count(), 0);
        assert!(history.get(&id).await.is_empty());
    }

    #[tokio::test]
    async fn turns_accumulate_in_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::text("Lisbon is lovely in May."),
            Script::text("Bring a light jacket."),
        ]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let pipeline = pipeline(provider.clone(), history.clone());
        let id = ConversationId::from("c1");

        drain(pipeline.handle(id.clone(), Message::user("Planning a trip to Lisbon")).await).await;
        drain(pipeline.handle(id.clone(), Message::user("What should I pack for the trip?")).await).await;

        let stored = history.get(&id).await;
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[3].role, Role::Assistant);
        assert_eq!(stored[3].text(), "Bring a light jacket.");
        // The second request saw the first turn.
        assert_eq!(provider.requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn failure_mid_exchange_keeps_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tool_calls(vec![make_tool_call("weather", serde_json::json!({"location": "Rome"}))]),
            Script::fail("upstream exploded"),
        ]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let id = ConversationId::from("c1");
        let before = vec![Message::user("trip to Rome"), Message::assistant("Great choice.")];
        history.set(&id, before.clone()).await;

        let parts = drain(
            pipeline(provider, history.clone())
                .handle(id.clone(), Message::user("weather in Rome"))
                .await,
        )
        .await;

        assert!(matches!(parts.last(), Some(UiStreamPart::Error { .. })));
        assert_eq!(history.get(&id).await, before);
    }

    #[tokio::test]
    async fn interrupted_model_stream_reports_error_and_keeps_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::interrupted(
            "Lisbon in May is ",
            "upstream overloaded",
        )]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let id = ConversationId::from("c1");
        let before = vec![Message::user("trip to Lisbon"), Message::assistant("Sounds fun.")];
        history.set(&id, before.clone()).await;

        let parts = drain(
            pipeline(provider, history.clone())
                .handle(id.clone(), Message::user("Is Lisbon nice in May?"))
                .await,
        )
        .await;

        assert_eq!(streamed_text(&parts), "Lisbon in May is ");
        assert!(matches!(parts.last(), Some(UiStreamPart::Error { .. })));
        assert!(!parts.iter().any(|p| matches!(p, UiStreamPart::Finish { .. })));
        assert_eq!(history.get(&id).await, before);
    }

    #[tokio::test]
    async fn cancel_while_tool_runs_aborts_and_keeps_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tool_calls(vec![make_tool_call("weather", serde_json::json!({"location": "Oslo"}))]),
            Script::text("Never requested."),
        ]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let id = ConversationId::from("c1");
        let before = vec![Message::user("trip to Oslo"), Message::assistant("Pack warm layers.")];
        history.set(&id, before.clone()).await;

        let guardrail = TopicGuardrail::from_config_with_policy(&GuardrailConfig::default(), Box::new(FixedRedirect(0)));
        let orchestrator = StepOrchestrator::new(provider.clone(), Arc::new(hanging_registry()), "mock-model");
        let pipeline = ChatPipeline::new(guardrail, orchestrator, history.clone());

        let mut chat = pipeline.handle(id.clone(), Message::user("weather in Oslo")).await;
        let mut parts = Vec::new();
        while let Some(part) = chat.parts.recv().await {
            let tool_started = matches!(part, UiStreamPart::ToolInputAvailable { .. });
            parts.push(part);
            if tool_started {
                break;
            }
        }
        chat.cancel.cancel();
        while let Some(part) = chat.parts.recv().await {
            parts.push(part);
        }

        assert!(matches!(parts.last(), Some(UiStreamPart::Abort { .. })));
        assert!(!parts.iter().any(|p| matches!(p, UiStreamPart::ToolOutputAvailable { .. })));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(history.get(&id).await, before);
    }

    #[tokio::test]
    async fn concurrent_exchanges_on_one_conversation_last_writer_wins() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::text("First answer."),
            Script::text("Second answer."),
        ]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let pipeline = pipeline(provider, history.clone());
        let id = ConversationId::from("shared");

        let a = pipeline.handle(id.clone(), Message::user("trip to Paris")).await;
        let b = pipeline.handle(id.clone(), Message::user("trip to Berlin")).await;
        let (_, _) = tokio::join!(drain(a), drain(b));

        // Both exchanges read an empty history, so one overwrote the other.
        let stored = history.get(&id).await;
        assert_eq!(stored.len(), 2);
    }
}
