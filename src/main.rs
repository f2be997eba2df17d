#![deny(clippy::all)]

mod batch;
mod codec;
mod conversation;
mod credentials;
mod error;
mod export;
mod gateway;
mod gemini;
mod persist;
mod session;
mod store;

use anyhow::{bail, Context};
use clap::Parser;
use codec::AudioPayload;
use conversation::SendOutcome;
use session::{Session, SessionStatus};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::Store;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Application configuration
#[derive(serde::Deserialize)]
struct Config {
    gateway: GatewayConfig,
}

#[derive(serde::Deserialize)]
struct GatewayConfig {
    base_url: String,
    default_model: String,
    models: Vec<String>,
}

/// Load configuration from embedded config.toml
fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    const CONFIG_TOML: &str = include_str!("../config.toml");
    let config: Config = toml::from_str(CONFIG_TOML)?;
    Ok(config)
}

/// Transcribe audio with Gemini and chat about the recording
#[derive(Parser)]
#[command(name = "retell", version)]
struct Args {
    /// Audio file to transcribe
    audio_file: Option<PathBuf>,

    /// Model to use (must be listed in config.toml)
    #[arg(long)]
    model: Option<String>,

    /// Transcribe several files into the batch history
    #[arg(long, num_args = 1.., value_name = "FILE", conflicts_with = "audio_file")]
    batch: Vec<PathBuf>,

    /// Print the saved batch history, then exit
    #[arg(long)]
    batch_history: bool,

    /// Discard the saved session, then exit
    #[arg(long)]
    reset: bool,

    /// Discard all saved single and batch history, then exit
    #[arg(long)]
    clear_all: bool,

    /// Forget the stored API key, then exit
    #[arg(long)]
    clear_key: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();
    // Allow RETELL_API_KEY to come from a .env file
    dotenvy::dotenv().ok();

    let config = load_config()
        .map_err(|e| anyhow::anyhow!("Failed to load embedded config: {}", e))?;
    let args = Args::parse();
    let store = Store::open_default().context("Failed to open the saved-state store")?;

    if args.clear_key {
        if confirm("Are you sure you want to clear your API key? You will need to re-enter it to use the app.")? {
            credentials::delete_api_key(&store)?;
            println!("API key cleared.");
        }
        return Ok(());
    }

    if args.clear_all {
        if confirm("Are you sure you want to clear all saved single and batch processing history? This action cannot be undone.")? {
            store.remove(store::SESSION_KEY)?;
            batch::BatchRunner::clear_history(&store);
            println!("All saved history cleared.");
        }
        return Ok(());
    }

    if args.reset {
        if store.contains(store::SESSION_KEY) {
            store.remove(store::SESSION_KEY)?;
            println!("Saved session discarded.");
        } else {
            println!("No saved session.");
        }
        return Ok(());
    }

    if args.batch_history {
        print_batch_history(&store);
        return Ok(());
    }

    let model = resolve_model(&config, args.model.as_deref())?;
    let api_key = obtain_api_key(&store)?;
    let gateway = Arc::new(
        gemini::GeminiClient::new(&api_key, &config.gateway.base_url)
            .context("Failed to create Gemini client")?,
    );
    drop(api_key);

    if !args.batch.is_empty() {
        return run_batch(gateway, store, model, &args.batch).await;
    }

    let mut session = Session::new(gateway, store.clone(), model);
    let _persistence = persist::spawn(store.clone(), session.subscribe());

    // Pick up where the user left off, if a completed session was saved
    session.recover().await;
    if session.status() == SessionStatus::Success {
        println!("Restored previous session (model {}).", session.model());
        print_conversation(&session);
    }

    if let Some(path) = &args.audio_file {
        let audio = read_audio(path)?;
        println!("Analyzing audio and creating transcript...");
        session.submit_audio(audio).await;
        match session.status() {
            SessionStatus::Success => print_conversation(&session),
            SessionStatus::Error => {
                bail!(
                    "An error occurred: {}",
                    session.error().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
    }

    if session.status() == SessionStatus::Success {
        chat_loop(&mut session, &config).await?;
    } else if args.audio_file.is_none() {
        println!("No saved session to resume. Pass an audio file to transcribe (see --help).");
    }

    Ok(())
}

/// Interactive follow-up loop over stdin
async fn chat_loop(session: &mut Session, config: &Config) -> anyhow::Result<()> {
    println!();
    println!("Ask follow-up questions about the recording.");
    println!("Commands: /audio <file>, /reprocess <model>, /export, /reset, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut words = command.splitn(2, ' ');
            match (words.next().unwrap_or(""), words.next().map(str::trim)) {
                ("quit", _) | ("exit", _) => break,
                ("reset", _) => {
                    session.reset();
                    println!("Session discarded.");
                    break;
                }
                ("export", _) => {
                    let turns = session
                        .conversation()
                        .map(|c| c.turns())
                        .unwrap_or_default();
                    match export::export_session(session.transcript(), &turns) {
                        Ok(path) => println!("Exported to {}", path.display()),
                        Err(e) => println!("Export failed: {}", e),
                    }
                }
                ("reprocess", Some(model)) => {
                    let model = match resolve_model(config, Some(model)) {
                        Ok(model) => model,
                        Err(e) => {
                            println!("{}", e);
                            continue;
                        }
                    };
                    println!("Reprocessing with {}...", model);
                    session.reprocess(&model).await;
                    match session.status() {
                        SessionStatus::Success => print_conversation(session),
                        SessionStatus::Error => {
                            println!(
                                "An error occurred: {}",
                                session.error().unwrap_or("unknown error")
                            );
                            break;
                        }
                        _ => {}
                    }
                }
                ("audio", Some(path)) => {
                    match read_audio(Path::new(path)) {
                        Ok(audio) => send_follow_up(session, None, Some(audio)).await,
                        Err(e) => println!("Could not read audio: {}", e),
                    }
                }
                (other, _) => println!("Unknown command: /{}", other),
            }
            continue;
        }

        send_follow_up(session, Some(line), None).await;
    }

    Ok(())
}

/// Relay one follow-up message and print the reply
async fn send_follow_up(session: &Session, text: Option<String>, audio: Option<AudioPayload>) {
    let Some(conversation) = session.conversation() else {
        println!("No active conversation.");
        return;
    };

    match conversation.send(text, audio).await {
        SendOutcome::Sent => {
            if let Some(turn) = conversation.turns().last() {
                println!("AI: {}", turn.text);
            }
        }
        SendOutcome::Busy => println!("Still waiting for the previous reply."),
        SendOutcome::Empty => {}
    }
}

/// Transcribe a list of files into the batch history
async fn run_batch(
    gateway: Arc<gemini::GeminiClient>,
    store: Store,
    model: String,
    paths: &[PathBuf],
) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push((name, read_audio(path)?));
    }

    let runner = batch::BatchRunner::new(gateway, store, model);
    let entries = runner.run(files).await;

    let succeeded = entries.iter().filter(|e| e.succeeded()).count();
    println!("Processed {} file(s), {} succeeded.", entries.len(), succeeded);
    for entry in &entries {
        match (&entry.transcript, &entry.error) {
            (Some(transcript), _) => println!("\n--- {} ---\n{}", entry.file_name, transcript),
            (None, Some(error)) => println!("\n--- {} ---\nFailed: {}", entry.file_name, error),
            (None, None) => {}
        }
    }
    Ok(())
}

fn print_batch_history(store: &Store) {
    let history = batch::BatchRunner::saved_history(store);
    if history.is_empty() {
        println!("No saved batch history.");
        return;
    }
    for entry in &history {
        let outcome = entry
            .transcript
            .as_deref()
            .or(entry.error.as_deref())
            .unwrap_or("");
        println!(
            "{}  {}  [{}]  {}",
            entry.processed_at.format("%Y-%m-%d %H:%M"),
            entry.file_name,
            entry.model,
            outcome
        );
    }
}

fn print_conversation(session: &Session) {
    let Some(conversation) = session.conversation() else {
        return;
    };
    println!();
    for turn in conversation.turns() {
        match turn.author {
            conversation::Author::You => println!("You: {}", turn.text),
            conversation::Author::Ai => println!("AI: {}", turn.text),
        }
    }
}

/// Validate the chosen model against the configured catalog
fn resolve_model(config: &Config, requested: Option<&str>) -> anyhow::Result<String> {
    match requested {
        None => Ok(config.gateway.default_model.clone()),
        Some(model) => {
            if config.gateway.models.iter().any(|m| m == model) {
                Ok(model.to_string())
            } else {
                bail!(
                    "Unknown model {:?}. Available models: {}",
                    model,
                    config.gateway.models.join(", ")
                );
            }
        }
    }
}

/// Get the API key: environment, stored credential, or interactive prompt
fn obtain_api_key(store: &Store) -> anyhow::Result<credentials::ApiKey> {
    if let Ok(key) = std::env::var("RETELL_API_KEY") {
        let key = key.trim().to_string();
        if !key.is_empty() {
            credentials::store_api_key(store, &key)
                .context("Failed to store API key from environment")?;
            info!("Using API key from environment");
            return Ok(credentials::ApiKey::new(key));
        }
    }

    if let Some(key) = credentials::load_api_key(store) {
        info!("Gemini API key found in store");
        return Ok(key);
    }

    print!("Enter your Gemini API key: ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read API key")?;
    let key = line.trim();
    if key.is_empty() {
        bail!("API Key is not set.");
    }
    credentials::store_api_key(store, key).context("Failed to store API key")?;
    Ok(credentials::ApiKey::new(key))
}

/// Ask for explicit confirmation before a destructive action
fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read confirmation")?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Read an audio file into a payload, inferring the mime type from the
/// file extension
fn read_audio(path: &Path) -> anyhow::Result<AudioPayload> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read audio file {}", path.display()))?;
    Ok(AudioPayload::new(bytes, mime_for_path(path)))
}

fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mp3",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        Some("aiff") | Some("aif") => "audio/aiff",
        _ => "application/octet-stream",
    }
}
