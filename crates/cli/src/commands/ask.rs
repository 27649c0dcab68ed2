//! `kbchat ask`: send one question to a running gateway.
//!
//! Answer text goes to stdout as it streams; status lines go to stderr.

use kbchat_client::{ChatClient, ClientEvent};
use kbchat_config::AppConfig;
use kbchat_core::knowledge::Source;
use kbchat_core::protocol::ChatRequest;
use std::io::Write;

pub async fn run(
    message: String,
    session: Option<String>,
    user: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let client = ChatClient::from_config(&config.client);

    let request = ChatRequest {
        user_message: message,
        user_id: user,
        session_id: session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        chat_history: Vec::new(),
        retrieval_source: None,
    };

    let mut stream = client
        .send(&request)
        .await
        .map_err(|e| format!("Could not reach {}: {e}", config.client.url))?;

    let mut stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        match event {
            ClientEvent::Chunk { delta, .. } => {
                write!(stdout, "{delta}")?;
                stdout.flush()?;
            }
            ClientEvent::Status { text, active: true } => eprintln!("[{text}]"),
            ClientEvent::Status { .. } => {}
            ClientEvent::Sources(sources) => {
                writeln!(stdout)?;
                write!(stdout, "{}", format_sources(&sources))?;
            }
            ClientEvent::Complete { .. } => {
                eprintln!("(session {})", request.session_id);
            }
            ClientEvent::Error(message) => {
                writeln!(stdout)?;
                return Err(message.into());
            }
        }
    }

    Ok(())
}

fn format_sources(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nSources:\n");
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!("  {}. {}\n     {}\n", i + 1, source.title, source.uri));
    }
    out
}
