//! Streams an answer from the reasoner model, printing the chain of thought
//! and then the answer. Ctrl-C cancels the stream.
//!
//! Run:
//!   DEEPSEEK_API_KEY=your_key cargo run --example stream_chat -- "which is greater, 9.11 or 9.8?"

use anyhow::Context;
use deepseek_stream::{ChatRequest, DeepSeekClient, DeepSeekError, Message, REASONER_MODEL};
use futures::StreamExt;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "which is greater between 9.11 and 9.8?".to_string());

    let client = DeepSeekClient::new().context("failed to load client configuration")?;
    let request = ChatRequest::new(REASONER_MODEL, vec![Message::user(question)]);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut stream = client.chat_stream(request, cancel);
    let mut stdout = std::io::stdout();
    let mut answering = false;

    while let Some(item) = stream.next().await {
        let choice = match item {
            Ok(choice) => choice,
            Err(DeepSeekError::Cancelled) => {
                eprintln!("\n[cancelled]");
                break;
            }
            Err(err) => return Err(err).context("stream failed"),
        };

        if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
            write!(stdout, "{}", reasoning)?;
        }
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            if !answering {
                writeln!(stdout, "\n\n--- answer ---")?;
                answering = true;
            }
            write!(stdout, "{}", content)?;
        }
        stdout.flush()?;
    }
    writeln!(stdout)?;

    if let Some(usage) = stream.usage() {
        eprintln!(
            "tokens: {} total ({} reasoning)",
            usage.total_tokens,
            usage.reasoning_tokens().unwrap_or(0)
        );
    }

    Ok(())
}
