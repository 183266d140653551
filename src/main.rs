use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use duckling_chat::chat::{ChatSession, Message, RequestRouter, Role};
use duckling_chat::db::{self, AnalyzedChatRepo, InteractionRepo};
use duckling_chat::sync::Reconciler;
use duckling_chat::voice::AudioPlayback;
use duckling_chat::Config;

/// Duckling - streaming voice chat client
#[derive(Parser)]
#[command(name = "duckling", version, about)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable speaker output
    #[arg(long)]
    no_audio: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync pass against the remote store
    Sync,
    /// Show unsynced counts and recent interactions
    Status {
        /// Number of recent interactions to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show how an utterance would be routed
    Classify {
        /// Utterance to classify
        text: String,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,duckling_chat=info",
        1 => "info,duckling_chat=debug",
        2 => "debug",
        _ => "trace",
    };

    // Chat output owns stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref(), cli.no_audio)?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Some(Command::Sync) => cmd_sync(&config).await,
        Some(Command::Status { limit }) => cmd_status(&config, limit),
        Some(Command::Classify { text }) => {
            cmd_classify(&config, &text);
            Ok(())
        }
        Some(Command::TestSpeaker) => test_speaker().await,
        None => chat(config).await,
    }
}

/// Interactive chat loop
#[allow(clippy::future_not_send)]
async fn chat(config: Config) -> anyhow::Result<()> {
    let pool = db::init(config.database_path())?;

    tracing::info!(
        ws_url = %config.backend.ws_url,
        audio = config.audio.enabled,
        sync = config.sync.is_enabled(),
        "starting chat session"
    );

    let mut session = ChatSession::open(config, pool).await?;
    let renderer = tokio::spawn(render(session.subscribe()));

    println!("Connected ({}). Type a message, /state, /reconnect or /quit.", session.state().socket);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };

        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/state" => {
                let state = session.state();
                println!(
                    "socket: {} | playing: {} | first audio: {}",
                    state.socket, state.is_playing, state.is_first_audio
                );
            }
            "/reconnect" => {
                let state = session.reconnect().await;
                println!("socket: {state}");
            }
            text => {
                session.submit(text).await;
            }
        }
    }

    session.close();
    renderer.abort();
    println!();

    Ok(())
}

/// Print assistant replies as they stream in
async fn render(mut messages: watch::Receiver<Vec<Message>>) {
    let mut current: Option<usize> = None;
    let mut printed = 0;
    let mut finished = false;

    while messages.changed().await.is_ok() {
        let list = messages.borrow_and_update().clone();
        let Some((index, message)) = list
            .iter()
            .enumerate()
            .rev()
            .find(|(_, m)| m.role == Role::Assistant)
        else {
            continue;
        };

        let mut out = std::io::stdout().lock();

        if current != Some(index) {
            current = Some(index);
            printed = 0;
            finished = false;
            let _ = write!(out, "duck> ");
        }

        if let Some(image) = &message.image {
            if !finished {
                let _ = writeln!(out, "[image] {image}");
                finished = true;
            }
            continue;
        }

        let content = &message.content;
        if content.len() >= printed && content.is_char_boundary(printed) {
            let _ = write!(out, "{}", &content[printed..]);
        } else {
            // Replaced with different text
            let _ = write!(out, "\nduck> {content}");
        }
        printed = content.len();

        if !message.open && !finished {
            let _ = writeln!(out);
            finished = true;
        }
        let _ = out.flush();
    }
}

/// Run one reconciler tick
async fn cmd_sync(config: &Config) -> anyhow::Result<()> {
    let pool = db::init(config.database_path())?;
    let reconciler = Reconciler::from_config(pool, &config.sync).ok_or_else(|| {
        anyhow::anyhow!("sync not configured: set DUCKLING_SYNC_URL and DUCKLING_USER_ID")
    })?;

    let report = reconciler.tick().await?;
    println!(
        "Synced {} interactions and {} analyzed chats ({} failed)",
        report.interactions_synced, report.chats_synced, report.failed
    );

    Ok(())
}

/// Show local store status
fn cmd_status(config: &Config, limit: usize) -> anyhow::Result<()> {
    let pool = db::init(config.database_path())?;
    let interactions = InteractionRepo::new(pool.clone());
    let chats = AnalyzedChatRepo::new(pool);

    println!("Database: {}", config.database_path().display());
    println!(
        "Sync: {}",
        config
            .sync
            .remote_url
            .as_ref()
            .map_or_else(|| "not configured".to_string(), ToString::to_string)
    );
    println!("Unsynced interactions: {}", interactions.count_unsynced()?);
    println!("Unsynced analyzed chats: {}", chats.count_unsynced()?);

    let recent = interactions.recent(limit)?;
    if !recent.is_empty() {
        println!("---");
    }
    for record in recent {
        println!(
            "{} [{}]{} {} -> {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.chat_type.as_deref().unwrap_or("-"),
            if record.synced { "" } else { " *" },
            record.message,
            record.response.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

/// Print the route for an utterance
fn cmd_classify(config: &Config, text: &str) {
    let router = RequestRouter::from(&config.router);
    println!("{:?}", router.classify(text));
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    tokio::task::spawn_blocking(move || {
        let playback = AudioPlayback::new(sample_rate)?;
        playback.play_blocking(samples, &std::sync::atomic::AtomicBool::new(false))
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
