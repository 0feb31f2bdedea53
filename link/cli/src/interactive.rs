//! Interactive session loop
//!
//! Reads lines from stdin and sends them, printing whatever the server sends
//! back. Lines starting with `/` go out as commands. `/quit` or Ctrl-C ends
//! the session.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use agent_link_core::{
    AgentMessage, ErrorCategory, LinkContext, MessageKind, RecoveryOutcome, SessionEvent,
    SessionState, TransportError,
};

/// Send one line, as a command when it starts with `/`
pub async fn send_line(ctx: &LinkContext, line: &str) -> Result<(), TransportError> {
    if line.starts_with('/') {
        ctx.session.send_command(line).await
    } else {
        ctx.session.send_text(line).await
    }
}

/// Print the session's last error and try to recover from network failures
///
/// One recovery attempt is made per reported failure.
pub async fn report_failure(ctx: &LinkContext) {
    let Some(error) = ctx.session.last_error() else {
        return;
    };

    eprintln!("error: {}", error.user_facing_message);
    for action in &error.suggested_actions {
        eprintln!("  - {action}");
    }

    if error.category != ErrorCategory::Network {
        return;
    }

    eprintln!("Trying to recover...");
    match ctx.recovery.attempt_recovery(&error).await {
        RecoveryOutcome::Recovered { attempts, .. } => {
            eprintln!("Recovered after {attempts} attempt(s). {}", ctx.session.status_text());
        }
        RecoveryOutcome::Failed {
            attempts, reason, ..
        } => {
            eprintln!("Recovery failed after {attempts} attempt(s): {reason}");
        }
        RecoveryOutcome::Unsupported { category } => {
            eprintln!("No recovery available for {category} errors");
        }
    }
}

fn print_inbound(message: &AgentMessage) {
    match message.kind {
        MessageKind::Error => println!("[error] {}", message.content),
        MessageKind::Status => println!("[status] {}", message.content),
        _ => println!("< {}", message.content),
    }
}

/// Run the interactive loop until stdin closes, `/quit` or Ctrl-C
pub async fn run(ctx: &LinkContext) -> Result<()> {
    let mut events = ctx.session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}. Type /quit to exit.", ctx.session.status_text());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if !ctx.session.is_connected() {
                    eprintln!("{}", ctx.session.status_text());
                }
                if let Err(e) = send_line(ctx, line).await {
                    warn!(error = %e, "Send failed");
                    report_failure(ctx).await;
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::MessageAppended(message)) if !message.originated_locally => {
                    print_inbound(&message);
                }
                Ok(SessionEvent::StateChanged {
                    previous: SessionState::Connected,
                    current: SessionState::Disconnected,
                }) => {
                    eprintln!("Connection closed.");
                    report_failure(ctx).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    ctx.session.disconnect();
    Ok(())
}
