//! `tripmate chat`: interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tripmate_agent::{ChatPipeline, UiStreamPart};
use tripmate_config::AppConfig;
use tripmate_core::history::HistoryStore;
use tripmate_core::message::{ConversationId, Message};
use tripmate_history::InMemoryHistoryStore;

pub async fn run(message: Option<String>, conversation: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No model API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    TRIPMATE_API_KEY=...");
        eprintln!("    AI_GATEWAY_API_KEY=...");
        eprintln!();
        eprintln!("  Or add api_key to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = tripmate_providers::from_config(&config)?;
    let tools = Arc::new(tripmate_tools::default_registry(&config));
    let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::with_limits(
        config.history.capacity,
        config.history.compact_threshold,
    ));
    let pipeline = ChatPipeline::from_config(&config, provider, tools, history);
    let conversation_id = conversation.map(|c| ConversationId::from(&c)).unwrap_or_default();

    if let Some(msg) = message {
        send(&pipeline, &conversation_id, &msg).await?;
        return Ok(());
    }

    println!();
    println!("  TripMate, interactive mode");
    println!();
    println!("  Model:         {}", config.model);
    println!("  Tools:         {}", pipeline.orchestrator().tools().names().join(", "));
    println!("  Conversation:  {conversation_id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        send(&pipeline, &conversation_id, line).await?;
        println!();
    }

    println!();
    println!("  Safe travels!");
    println!();

    Ok(())
}

async fn send(
    pipeline: &ChatPipeline,
    conversation_id: &ConversationId,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut chat = pipeline.handle(conversation_id.clone(), Message::user(text)).await;
    let mut stdout = std::io::stdout();

    print!("  TripMate > ");
    while let Some(part) = chat.parts.recv().await {
        if let Some(out) = render(&part) {
            print!("{out}");
            stdout.flush()?;
        }
    }
    println!();
    Ok(())
}

/// Terminal rendering of one stream part.
fn render(part: &UiStreamPart) -> Option<String> {
    match part {
        UiStreamPart::TextDelta { delta, .. } => Some(delta.clone()),
        UiStreamPart::ToolInputAvailable { tool_name, input, .. } => Some(format!("\n  [{tool_name}] {input}\n  ")),
        UiStreamPart::ToolOutputAvailable { output, .. } => match output.get("error") {
            Some(error) => Some(format!("  [tool error] {error}\n  ")),
            None => Some(format!("  [result] {output}\n  ")),
        },
        UiStreamPart::Error { error_text } => Some(format!("\n  [Error] {error_text}")),
        UiStreamPart::Abort { .. } => Some("\n  [Aborted]".to_string()),
        _ => None,
    }
}
