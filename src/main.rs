//! Application entry point — Voice Lounge.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Build the live transport, microphone source and audio output.
//! 4. Hand them to a [`SessionController`].
//! 5. Run a line-oriented command loop on stdin — the stand-in for the
//!    "Start Conversation" / "End Call" button.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use voice_lounge::{
    audio::{CpalOutput, MicSource},
    config::AppConfig,
    provider::GeminiLiveTransport,
    session::{new_shared_state, SessionController},
};

// ---------------------------------------------------------------------------
// Command loop
// ---------------------------------------------------------------------------

const HELP: &str = "commands: start | stop | status | quit";

async fn run(controller: Arc<SessionController>) -> Result<()> {
    let stdin = std::io::stdin();
    println!("voice-lounge ready. {HELP}");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }

        match line.trim() {
            "start" => match controller.start().await {
                Ok(()) => println!("connected — speak whenever you like"),
                Err(e) => println!("could not start: {e}"),
            },
            "stop" => {
                controller.stop();
                println!("call ended");
            }
            "status" => {
                let state = controller.state();
                let st = state.lock().unwrap();
                println!(
                    "{} | you: {} | host: {}{}",
                    st.connection.label(),
                    if st.user_speaking { "speaking" } else { "quiet" },
                    if st.agent_speaking { "speaking" } else { "quiet" },
                    st.error_message
                        .as_deref()
                        .map(|m| format!(" | last error: {m}"))
                        .unwrap_or_default(),
                );
            }
            "quit" | "exit" => break,
            "" => {}
            other => println!("unknown command '{other}'. {HELP}"),
        }
    }

    controller.stop();
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load()?;
    let api_key = config.provider.resolved_api_key();
    if api_key.is_empty() {
        anyhow::bail!(
            "no API key configured — set provider.api_key in settings.toml \
             or export GEMINI_API_KEY"
        );
    }

    log::info!(
        "voice-lounge starting (live model {}, voice {})",
        config.provider.live_model,
        config.provider.voice
    );

    let transport = Arc::new(GeminiLiveTransport::new(
        config.provider.ws_host.clone(),
        api_key,
    ));
    let controller = Arc::new(SessionController::new(
        config.session_options(),
        transport,
        Arc::new(MicSource),
        Arc::new(CpalOutput),
        new_shared_state(),
    ));

    run(controller).await
}
