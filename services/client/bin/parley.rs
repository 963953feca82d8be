//! Main entrypoint for the Parley command-line client.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building a session connection with a health probe.
//! 3. Running a chat (stdin to server) or voice (server audio to a file) session.
//! 4. Disconnecting cleanly on Ctrl+C or end of input.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use parley_client::{
    audio::{AudioPlayer, Pcm16Decoder, PcmFileSink},
    audio_utils::DEFAULT_STREAM_SAMPLE_RATE,
    config::ClientConfig,
    credentials::StaticToken,
    health::HttpHealthProbe,
    ws::{
        ClientMessage, ConnectionState, ConnectionStatus, EnhancementLevel, Endpoint,
        SessionConnection, SessionEvent, SessionTarget, VoiceConfig, events,
    },
};
use std::path::PathBuf;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};
use tracing::{error, info, warn};

/// Real-time chat and voice client.
#[derive(Parser, Debug)]
#[command(name = "parley", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a text chat; each stdin line is sent as a message.
    Chat {
        /// Chat identifier.
        chat_id: String,
    },
    /// Open a voice stream and write received audio to a PCM16 file.
    Voice(VoiceArgs),
}

#[derive(Args, Debug)]
struct VoiceArgs {
    #[arg(long, default_value = "en-US")]
    language: String,
    #[arg(long, default_value = "default")]
    voice: String,
    /// Sample rate of the audio the server streams.
    #[arg(long, default_value_t = DEFAULT_STREAM_SAMPLE_RATE)]
    sample_rate: u32,
    /// Sample rate written to the output file.
    #[arg(long, default_value_t = DEFAULT_STREAM_SAMPLE_RATE)]
    output_rate: u32,
    #[arg(long, value_enum, default_value_t = Enhancement::Medium)]
    enhancement: Enhancement,
    #[arg(long)]
    emotion: bool,
    #[arg(long)]
    rag: bool,
    #[arg(long, short, default_value = "parley-output.pcm")]
    output: PathBuf,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Enhancement {
    Off,
    Low,
    Medium,
    High,
}

impl From<Enhancement> for EnhancementLevel {
    fn from(level: Enhancement) -> Self {
        match level {
            Enhancement::Off => Self::Off,
            Enhancement::Low => Self::Low,
            Enhancement::Medium => Self::Medium,
            Enhancement::High => Self::High,
        }
    }
}

impl VoiceArgs {
    fn voice_config(&self) -> VoiceConfig {
        VoiceConfig {
            language: self.language.clone(),
            voice: self.voice.clone(),
            sample_rate: self.sample_rate,
            enhancement_level: self.enhancement.into(),
            emotion_detection: self.emotion,
            rag_enabled: self.rag,
        }
    }
}

/// Logs lifecycle events and prints what the server says.
fn report_events(connection: &SessionConnection) {
    connection.on(events::CONNECTED, |_| {
        info!("Session ready");
        Ok(())
    });
    connection.on(events::DISCONNECTED, |event| {
        if let SessionEvent::Disconnected { code, reason } = event {
            info!(code, %reason, "Disconnected");
        }
        Ok(())
    });
    connection.on(events::ERROR, |event| {
        if let SessionEvent::Error { message, source } = event {
            warn!(source = source.map(|s| s.as_str()), "{message}");
        }
        Ok(())
    });
    connection.on(events::RECONNECT_FAILED, |event| {
        if let SessionEvent::ReconnectFailed { attempts } = event {
            error!(attempts, "Gave up reconnecting");
        }
        Ok(())
    });
    connection.on(events::TRANSCRIPT, |event| {
        if let SessionEvent::Transcript(update) = event {
            if update.is_final {
                println!("{}", update.text);
            }
        }
        Ok(())
    });
}

/// Resolves once the session has failed for good.
async fn until_failed(mut status: watch::Receiver<ConnectionStatus>) {
    let _ = status
        .wait_for(|status| status.state == ConnectionState::Failed)
        .await;
}

async fn run_chat(connection: &SessionConnection, chat_id: String) -> anyhow::Result<()> {
    connection.on(events::MESSAGE, |event| {
        if let SessionEvent::Message(message) = event {
            if let Some(content) = message.body.get("content").and_then(|c| c.as_str()) {
                println!("< {content}");
            }
        }
        Ok(())
    });
    connection
        .connect(SessionTarget::chat(chat_id))
        .await
        .context("Failed to open chat session")?;

    let failed = until_failed(connection.subscribe_status());
    tokio::pin!(failed);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => continue,
                Some(content) => {
                    let sent = connection
                        .send_json(&ClientMessage::Message { content })
                        .await?;
                    if !sent {
                        info!("Message queued until the session is ready");
                    }
                }
                None => break,
            },
            _ = &mut failed => {
                error!("Session failed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C. Disconnecting...");
                break;
            }
        }
    }
    Ok(())
}

async fn run_voice(connection: &SessionConnection, args: VoiceArgs) -> anyhow::Result<()> {
    let sink = PcmFileSink::create(&args.output).await?;
    let player = AudioPlayer::attach(
        connection,
        Pcm16Decoder::new(args.sample_rate, args.output_rate),
        sink,
    );
    info!(output = %args.output.display(), rate = args.output_rate, "Writing received audio");

    connection
        .connect(SessionTarget::voice(args.voice_config()))
        .await
        .context("Failed to open voice session")?;

    tokio::select! {
        _ = until_failed(connection.subscribe_status()) => error!("Session failed"),
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C. Disconnecting..."),
    }
    player.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = ClientConfig::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(host = %config.server_host, secure = config.secure, "Configuration loaded");

    // --- 3. Build the Session ---
    let endpoint = Endpoint::new(config.server_host.clone(), config.secure);
    let health_url = endpoint
        .health_url()
        .context("SERVER_HOST does not form a valid URL")?;
    let connection = SessionConnection::builder(endpoint)
        .credentials(StaticToken::from(config.auth_token.clone()))
        .health_probe(HttpHealthProbe::new(
            health_url,
            config.session.health_timeout,
        ))
        .settings(config.session.clone())
        .build();
    report_events(&connection);

    // --- 4. Run ---
    let result = match cli.command {
        Command::Chat { chat_id } => run_chat(&connection, chat_id).await,
        Command::Voice(args) => run_voice(&connection, args).await,
    };

    connection.disconnect().await;
    info!("Session closed");
    result
}
