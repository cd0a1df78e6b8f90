use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sanctuary::{
    ConfigError, RemoteStore, SanctuaryConfig, SanctuaryController, StoreError, SyncEvent, SystemClock, WriteKind,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const SYNC_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned error for {syscall}: {message}")]
    ServerError { syscall: String, message: String },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("note text is blank")]
    BlankNote,
    #[error("timed out waiting for the room to sync")]
    Timeout,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "sanctuary-cli", about = "Hydration sanctuary CLI")]
struct Cli {
    #[arg(long, env = "SANCTUARY_URL", default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Overrides `SANCTUARY_ROOM_ID`.
    #[arg(long)]
    room: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the server health endpoint.
    Ping,
    /// Print the stored room document as JSON.
    Get,
    /// Sync and print the bottle and note state.
    Status,
    /// Add sips of water.
    Sip {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Leave a note for the other viewer.
    Note { text: String },
    /// Read the current note and mark it read.
    Open,
    /// Print every sync event until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = SanctuaryConfig::from_env()?;
    if let Some(room) = cli.room {
        config.room_id = room;
        config.validate()?;
    }

    match cli.command {
        Command::Ping => run_ping(&cli.url).await,
        Command::Get => run_get(&cli.url, &config).await,
        Command::Status => run_status(&cli.url, config).await,
        Command::Sip { count } => run_sip(&cli.url, config, count).await,
        Command::Note { text } => run_note(&cli.url, config, &text).await,
        Command::Open => run_open(&cli.url, config).await,
        Command::Watch => run_watch(&cli.url, config).await,
    }
}

// =============================================================================
// HTTP
// =============================================================================

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError {
            syscall: format!("HTTP {}", status.as_u16()),
            message: "health check failed".to_owned(),
        });
    }
    println!("ok");
    Ok(())
}

async fn run_get(base_url: &str, config: &SanctuaryConfig) -> Result<(), CliError> {
    let url = format!("{}/api/rooms/{}", base_url.trim_end_matches('/'), config.room_id);
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    let value = response.json::<Value>().await.unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(CliError::ServerError { syscall: format!("HTTP {}", status.as_u16()), message: value.to_string() });
    }
    print_json(&value)
}

// =============================================================================
// CONTROLLER COMMANDS
// =============================================================================

type Controller = SanctuaryController<RemoteStore>;

/// Connect, subscribe, and wait until local state mirrors the room.
async fn attach(base_url: &str, config: SanctuaryConfig) -> Result<(Controller, broadcast::Receiver<SyncEvent>), CliError> {
    let timeout = Duration::from_millis(config.request_timeout_ms);
    let store = RemoteStore::connect(&ws_url(base_url)?, timeout).await?;
    let mut controller = SanctuaryController::new(Arc::new(store), Arc::new(SystemClock), config);
    let mut events = controller.events();
    controller.subscribe().await?;
    wait_until_synced(&mut events).await?;
    Ok((controller, events))
}

async fn wait_until_synced(events: &mut broadcast::Receiver<SyncEvent>) -> Result<(), CliError> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SyncEvent::SnapshotAdopted { .. }) => return Ok(()),
                Ok(SyncEvent::WriteFailed { error, .. }) => return Err(CliError::Store(error)),
                Ok(SyncEvent::SubscriptionEnded { error }) => {
                    return Err(CliError::Store(error.unwrap_or(StoreError::Closed)));
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(CliError::Store(StoreError::Closed)),
            }
        }
    };
    tokio::time::timeout(SYNC_TIMEOUT, wait).await.map_err(|_| CliError::Timeout)?
}

async fn run_status(base_url: &str, config: SanctuaryConfig) -> Result<(), CliError> {
    let (controller, _) = attach(base_url, config).await?;
    print_status(&controller);
    controller.close().await;
    Ok(())
}

async fn run_sip(base_url: &str, config: SanctuaryConfig, count: u32) -> Result<(), CliError> {
    let (controller, _) = attach(base_url, config).await?;
    for _ in 0..count {
        controller.add_water().outcome().await?;
    }
    print_status(&controller);
    controller.close().await;
    Ok(())
}

async fn run_note(base_url: &str, config: SanctuaryConfig, text: &str) -> Result<(), CliError> {
    let (controller, _) = attach(base_url, config).await?;
    let Some(pending) = controller.send_note(text) else {
        controller.close().await;
        return Err(CliError::BlankNote);
    };
    pending.outcome().await?;
    println!("note sent");
    controller.close().await;
    Ok(())
}

async fn run_open(base_url: &str, config: SanctuaryConfig) -> Result<(), CliError> {
    let (controller, _) = attach(base_url, config).await?;
    let was_unread = controller.state().has_unread_message;
    controller.open_note().outcome().await?;
    let note = controller.state().revealed_note.unwrap_or_default();
    println!("{}{note}", if was_unread { "(new) " } else { "" });
    controller.close().await;
    Ok(())
}

async fn run_watch(base_url: &str, config: SanctuaryConfig) -> Result<(), CliError> {
    let (controller, mut events) = attach(base_url, config).await?;
    print_status(&controller);
    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", describe_event(&event));
                    match event {
                        SyncEvent::SnapshotAdopted { .. } => print_status(&controller),
                        SyncEvent::SubscriptionEnded { error } => break error.map_or(Ok(()), |e| Err(CliError::Store(e))),
                        _ => {}
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => println!("... {skipped} events skipped"),
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };
    controller.close().await;
    outcome
}

// =============================================================================
// HELPERS
// =============================================================================

fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

fn print_status(controller: &Controller) {
    let state = controller.state();
    println!(
        "water: {:.1}% ({} / {} ml)",
        state.water_level,
        controller.water_ml(),
        controller.config().daily_goal_ml
    );
    println!("note: {}", if state.has_unread_message { "unread" } else { "read" });
}

fn describe_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::SnapshotAdopted { version } => format!("snapshot v{version} adopted"),
        SyncEvent::SnapshotIgnored { version, floor } => format!("snapshot v{version} ignored (acked v{floor})"),
        SyncEvent::ResetIssued { stale_date, today } => format!("new day {today}; reset from {stale_date}"),
        SyncEvent::WritePersisted { kind, version } => format!("{} persisted at v{version}", kind_label(*kind)),
        SyncEvent::WriteFailed { kind, error } => format!("{} failed: {error}", kind_label(*kind)),
        SyncEvent::SubscriptionEnded { error: Some(error) } => format!("subscription ended: {error}"),
        SyncEvent::SubscriptionEnded { error: None } => "subscription ended".to_owned(),
    }
}

fn kind_label(kind: WriteKind) -> &'static str {
    match kind {
        WriteKind::Seed => "seed",
        WriteKind::DailyReset => "daily reset",
        WriteKind::AddWater => "sip",
        WriteKind::SendNote => "note",
        WriteKind::OpenNote => "note read",
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
