#[cfg(test)]
#[path = "repl_test.rs"]
mod tests;

use std::collections::HashMap;

use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use yansi::Paint;

use super::cli::format_thread;
use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::Message;
use crate::domain::models::SessionEvent;
use crate::domain::models::SlashCommand;
use crate::domain::models::INTERIM_TEXT;
use crate::domain::services::SessionController;

pub fn help_text() -> String {
    let text = r#"
COMMANDS:
- /threads (/t) - Lists threads available on the backend.
- /switch (/sw) [THREAD_ID] - Switches to a thread and loads its history.
- /new (/n) [TITLE?] - Creates a new thread and switches to it.
- /stop (/s) - Stops the reply currently being streamed.
- /quit /exit (/q) - Exit Parley.
- /help (/h) - Provides this help menu.

Anything else is sent as a message to the active thread.
        "#;

    return text.trim().to_string();
}

/// Turns transcript snapshots into terminal output, printing only what
/// changed since the last snapshot of the same thread.
#[derive(Default)]
pub struct TranscriptPrinter {
    thread_id: Option<String>,
    printed: HashMap<String, String>,
}

impl TranscriptPrinter {
    pub fn render(&mut self, thread_id: &str, messages: &[Message]) -> String {
        if self.thread_id.as_deref() != Some(thread_id) {
            self.thread_id = Some(thread_id.to_string());
            self.printed.clear();
        }

        let mut out = String::new();
        for message in messages {
            let shown = if message.text == INTERIM_TEXT {
                ""
            } else {
                message.text.as_str()
            };

            match self.printed.get(message.id()) {
                Some(previous) if previous == shown => {
                    continue;
                }
                Some(previous) if shown.starts_with(previous.as_str()) => {
                    out.push_str(&shown[previous.len()..]);
                }
                _ => {
                    out.push_str(&format!("\n{}: {shown}", message.role));
                }
            }

            self.printed
                .insert(message.id().to_string(), shown.to_string());
        }

        return out;
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> Result<()> {
    let mut printer = TranscriptPrinter::default();
    let mut stdout = tokio::io::stdout();

    while let Some(event) = rx.recv().await {
        let out = match event {
            SessionEvent::TranscriptChanged {
                thread_id,
                messages,
            } => printer.render(&thread_id, &messages),
            SessionEvent::ThreadStatusChanged { thread_id, status } => match status.error {
                Some(err) => format!(
                    "\n{}",
                    Paint::red(format!("Failed to load thread {thread_id}: {err}"))
                ),
                None => "".to_string(),
            },
            SessionEvent::StreamingChanged(false) => "\n".to_string(),
            SessionEvent::StreamingChanged(true) | SessionEvent::ThreadsChanged(_) => {
                "".to_string()
            }
        };

        if !out.is_empty() {
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    return Ok(());
}

async fn print_threads(controller: &SessionController) {
    match controller.refresh_threads().await {
        Ok(threads) if threads.is_empty() => {
            println!("There are no threads yet. Start one with /new.");
        }
        Ok(threads) => {
            let list = threads
                .iter()
                .map(|thread| {
                    return format_thread(thread);
                })
                .collect::<Vec<String>>();
            println!("{}", list.join("\n"));
        }
        Err(err) => {
            println!("{}", Paint::red(format!("Failed to list threads: {err}")));
        }
    }
}

/// Returns false once the user asked to quit.
async fn run_command(controller: &SessionController, command: SlashCommand) -> bool {
    if command.is_quit() {
        return false;
    }

    if command.is_stop() {
        if !controller.stop() {
            println!("Nothing to stop.");
        }
    } else if command.is_thread_list() {
        print_threads(controller).await;
    } else if command.is_thread_switch() {
        let thread_id = command.rest();
        if thread_id.is_empty() {
            println!("Usage: /switch [THREAD_ID]");
        } else {
            println!("{}", Paint::new(format!("Switched to thread {thread_id}")).bold());
            controller.switch_thread(&thread_id).await;
        }
    } else if command.is_thread_new() {
        let mut title = command.rest();
        if title.is_empty() {
            title = "New chat".to_string();
        }
        match controller.create_thread(&title).await {
            Ok(thread_id) => {
                println!("{}", Paint::new(format!("Created thread {thread_id}")).bold());
            }
            Err(err) => {
                println!("{}", Paint::red(format!("Failed to create thread: {err}")));
            }
        }
    } else if command.is_help() {
        println!("{}", help_text());
    }

    return true;
}

pub async fn start(
    controller: SessionController,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
) -> Result<()> {
    let printer = tokio::spawn(print_events(rx));

    let thread_id = Config::get(ConfigKey::ThreadId);
    if thread_id.is_empty() {
        print_threads(&controller).await;
        println!("Pick a thread with /switch [THREAD_ID], or start one with /new. /help lists all commands.");
    } else {
        controller.switch_thread(&thread_id).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(command) = SlashCommand::parse(&line) {
            if !run_command(&controller, command).await {
                break;
            }
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }
        if controller.active_thread_id().is_none() {
            println!("No thread selected. Use /switch or /new first.");
            continue;
        }

        let sender = controller.clone();
        tokio::spawn(async move {
            if let Err(err) = sender.send_message(&line).await {
                tracing::error!(error = ?err, "send failed");
            }
        });
    }

    if controller.can_stop() {
        controller.stop();
    }
    printer.abort();

    return Ok(());
}
