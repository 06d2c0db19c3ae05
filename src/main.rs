use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};
use voxstream::{
    format_elapsed, ApiClient, Config, SessionConfig, SessionController, SessionEvent,
    TranscriptionAction, WhisperModel,
};

#[derive(Parser)]
#[command(name = "voxstream", about = "Real-time speech-to-text streaming client")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config/voxstream")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record from the microphone and stream live transcription
    Live {
        #[arg(long, value_enum, default_value = "medium")]
        model: WhisperModel,

        #[arg(long, value_enum, default_value = "transcribe")]
        action: TranscriptionAction,

        /// Target language code (required for translate-language)
        #[arg(long)]
        target_language: Option<String>,
    },
    /// Transcribe an audio file via the upload endpoint
    Upload {
        file: PathBuf,

        #[arg(long, value_enum, default_value = "medium")]
        model: WhisperModel,

        #[arg(long, value_enum, default_value = "transcribe")]
        action: TranscriptionAction,

        #[arg(long)]
        target_language: Option<String>,
    },
    /// Check that the transcription service is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Live {
            model,
            action,
            target_language,
        } => {
            run_live(
                config,
                SessionConfig {
                    model,
                    action,
                    target_language,
                },
            )
            .await
        }
        Command::Upload {
            file,
            model,
            action,
            target_language,
        } => {
            let api = ApiClient::new(config.service.api_url);
            let result = api
                .transcribe_file(
                    &file,
                    &SessionConfig {
                        model,
                        action,
                        target_language,
                    },
                )
                .await?;
            println!("{}", result.text);
            Ok(())
        }
        Command::Health => {
            let api = ApiClient::new(config.service.api_url);
            let health = api.health().await?;
            println!("{} ({})", health.status, health.service);
            Ok(())
        }
    }
}

async fn run_live(config: Config, session: SessionConfig) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let mut controller = SessionController::new(config, session, event_tx);

    controller
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("could not start session: {e}"))?;
    info!("recording; press Ctrl-C to stop");

    // Partials redraw in place; finals get their own line.
    let render = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::Transcript { text, partial } => {
                    if partial {
                        print!("\r{text}");
                        let _ = std::io::stdout().flush();
                    } else {
                        println!("\n{text}");
                    }
                }
                SessionEvent::BackendError(message) => error!("server error: {message}"),
                SessionEvent::Disconnected => {
                    error!("connection lost; stop and start again to resume")
                }
                SessionEvent::Started | SessionEvent::Stopped => {}
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    let stats = controller.stats();
    controller.stop().await;
    render.abort();
    println!();
    info!(
        "session {} stopped after {}",
        stats.session_id,
        format_elapsed(stats.elapsed_seconds)
    );

    Ok(())
}
