//! Companion - terminal chat with a streaming companion
//!
//! Prompts for a persona, then relays each line typed to the backend and
//! prints the reply as it streams. `/new` starts over, `/quit` exits.

use companion_chat::api::{HttpCompanionApi, Tone};
use companion_chat::config::ClientConfig;
use companion_chat::reconciler::FALLBACK_REPLY;
use companion_chat::session::{
    ConversationUpdate, SessionController, SessionError, DEFAULT_COMPANION_NAME,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{broadcast, Notify};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Input = Lines<BufReader<Stdin>>;

/// Upper bound on waiting for the renderer to print a settled reply
const RENDER_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they never interleave with the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "companion_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    let api = HttpCompanionApi::new(&config)?;
    tracing::info!(api_base = %api.base_url(), "Companion client configured");

    match api.health().await {
        Ok(status) if status.is_ok() => {
            tracing::info!(message = %status.message, "Backend healthy");
        }
        Ok(status) => tracing::warn!(status = %status.status, "Backend reports unhealthy"),
        Err(e) => tracing::warn!(error = %e, "Backend unreachable, sessions will fail until it is up"),
    }

    let controller = SessionController::new(api).with_user_external_id(config.user_external_id);
    let reply_rendered = Arc::new(Notify::new());
    tokio::spawn(render(
        controller.subscribe(),
        Arc::clone(&reply_rendered),
        std::io::stdout(),
    ));

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    'sessions: loop {
        if !start_session(&controller, &mut input).await? {
            break;
        }

        loop {
            prompt("> ")?;
            let Some(line) = input.next_line().await? else {
                break 'sessions;
            };
            match line.trim() {
                "/quit" => break 'sessions,
                "/new" => {
                    controller.reset();
                    continue 'sessions;
                }
                text => {
                    if let Some(reply) = controller.send(text) {
                        reply.await?;
                        // Let the renderer finish the reply line before prompting
                        let rendered = reply_rendered.notified();
                        if tokio::time::timeout(RENDER_SETTLE_TIMEOUT, rendered).await.is_err() {
                            tracing::debug!("Renderer did not confirm the settled reply");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Ask for a persona until a session starts. Returns false on end of input.
async fn start_session(
    controller: &SessionController<HttpCompanionApi>,
    input: &mut Input,
) -> Result<bool, Box<dyn std::error::Error>> {
    loop {
        let Some(user_name) = ask(input, "Your name: ").await? else {
            return Ok(false);
        };
        let label = format!("Companion name [{DEFAULT_COMPANION_NAME}]: ");
        let Some(companion) = ask(input, &label).await? else {
            return Ok(false);
        };
        let companion = if companion.trim().is_empty() {
            DEFAULT_COMPANION_NAME.to_string()
        } else {
            companion
        };
        let Some(vibe) = ask(input, "Vibe (warm, calm, playful) [warm]: ").await? else {
            return Ok(false);
        };
        let tone = if vibe.trim().is_empty() {
            Tone::default()
        } else {
            match vibe.trim().parse::<Tone>() {
                Ok(tone) => tone,
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            }
        };

        match controller.start(&user_name, &companion, tone).await {
            Ok(_) => return Ok(true),
            Err(SessionError::InvalidInput { field }) => println!("Please enter a {field}."),
            Err(e) => println!("{e}"),
        }
    }
}

async fn ask(input: &mut Input, label: &str) -> std::io::Result<Option<String>> {
    prompt(label)?;
    input.next_line().await
}

fn prompt(label: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{label}")?;
    stdout.flush()
}

/// Print conversation updates as they arrive.
///
/// `reply_rendered` is notified once a finished or failed reply is on screen.
async fn render(
    mut updates: broadcast::Receiver<ConversationUpdate>,
    reply_rendered: Arc<Notify>,
    mut out: impl Write,
) {
    let mut companion = DEFAULT_COMPANION_NAME.to_string();
    loop {
        let update = match updates.recv().await {
            Ok(update) => update,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Renderer fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let settles_reply = matches!(
            update,
            ConversationUpdate::ReplyFinished { .. } | ConversationUpdate::ReplyFailed { .. }
        );
        let written = match update {
            ConversationUpdate::Started {
                session,
                opening_message,
            } => {
                companion = session.companion_name;
                writeln!(out, "\n{companion}: {opening_message}")
            }
            ConversationUpdate::UserMessage { .. } => write!(out, "{companion}: "),
            ConversationUpdate::ReplyDelta { delta } => write!(out, "{delta}"),
            ConversationUpdate::ReplyFinished { .. } => writeln!(out),
            ConversationUpdate::ReplyFailed { .. } => {
                writeln!(out, "\n{companion}: {FALLBACK_REPLY}")
            }
            ConversationUpdate::Reset => {
                DEFAULT_COMPANION_NAME.clone_into(&mut companion);
                writeln!(out, "\nStarting over.\n")
            }
        };
        if written.and_then(|()| out.flush()).is_err() {
            return;
        }
        if settles_reply {
            reply_rendered.notify_one();
        }
    }
}
