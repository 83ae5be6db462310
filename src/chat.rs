// Terminal front end: an interactive question loop over one local file.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::catalog::{ModelId, MODELS};
use crate::session::Session;

const HELP: &str = "Commands:
  :history        show the questions and answers so far
  :clear          clear the chat history
  :model <id>     switch model (see :models)
  :models         list the available models
  :help           show this help
  :quit           leave the chat";

/// Reads questions line by line from `input` and writes answers to `output`
/// until `:quit` or end of input. Returns the number of answered questions.
pub async fn run_chat<R, W>(session: &mut Session, input: R, mut output: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(doc) = session.document() {
        let banner = format!(
            "Loaded {} ({} bytes). Model: {}. Type :help for commands.\n",
            doc.name(),
            doc.size_bytes(),
            session.model()
        );
        output.write_all(banner.as_bytes()).await?;
    }

    let mut answered = 0;
    let mut lines = input.lines();
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match line.split_once(' ').unwrap_or((line, "")) {
            (":quit" | ":q" | ":exit", _) => break,
            (":help", _) => HELP.to_string(),
            (":history", _) => format_history(session),
            (":clear", _) => {
                session.clear_history();
                "History cleared.".to_string()
            }
            (":models", _) => MODELS
                .iter()
                .map(|m| {
                    let marker = if m.id == session.model().as_str() { "*" } else { " " };
                    format!("{} {} ({})", marker, m.id, m.label)
                })
                .collect::<Vec<_>>()
                .join("\n"),
            (":model", id) => match id.parse::<ModelId>() {
                Ok(model) => {
                    session.select_model(model);
                    format!("Model set to {}.", model)
                }
                Err(e) => format!("Error: {}", e),
            },
            _ => match session.ask(line, None).await {
                Ok(turn) => {
                    answered += 1;
                    turn.answer
                }
                Err(e) => format!("Error: {}", e),
            },
        };

        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }

    output.flush().await?;
    info!(answered, "Chat session finished");
    Ok(answered)
}

fn format_history(session: &Session) -> String {
    if session.history().is_empty() {
        return "No questions yet.".to_string();
    }
    session
        .history()
        .iter()
        .map(|turn| {
            format!(
                "[{}] You: {}\n[{}] {}: {}",
                turn.asked_at, turn.question, turn.asked_at, turn.model, turn.answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
