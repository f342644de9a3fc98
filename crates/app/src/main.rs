use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use songstatus_core::{AppConfig, TextFilter, WordListFilter};
use songstatus_engine::{
    CoordinatorConfig, PresenceApi, ServiceConfig, StatusCoordinator, SubscriberSink, SyncService,
};
use songstatus_hub::SubscriberHub;
use songstatus_providers::{build_media_source, fetch_bounded};
use songstatus_slack::{SlackError, SlackPresenceClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod config_file;

use config_file::{default_config_path, file_mtime, init_config, load_or_default};

#[derive(Parser, Debug)]
#[command(
    name = "songstatus",
    about = "Now Playing -> Slack status + live subscribers"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run,
    Doctor,
    Status,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg).await
        }
        Commands::Status => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            status(&cfg).await
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            run(cfg, cfg_path).await
        }
    }
}

async fn run(mut cfg: AppConfig, cfg_path: PathBuf) -> Result<()> {
    let source = build_media_source(&cfg.polling);

    let hub = SubscriberHub::new(cfg.subscribers.queue_capacity);
    let listener = TcpListener::bind(&cfg.subscribers.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.subscribers.bind_addr))?;
    tokio::spawn(hub.clone().serve(listener));

    let filter: Arc<dyn TextFilter> = Arc::new(WordListFilter::from_config(&cfg.filter));
    let sink: Arc<dyn SubscriberSink> = Arc::new(hub);
    let coordinator = StatusCoordinator::new(
        CoordinatorConfig::from_app_config(&cfg),
        cfg.sync,
        presence_client(&cfg),
        sink,
        filter,
    );
    let service = SyncService::spawn(
        source.clone(),
        coordinator,
        ServiceConfig::from_app_config(&cfg),
    );
    service.start_polling().await?;

    info!(
        source = source.name(),
        subscribers = %cfg.subscribers.bind_addr,
        "songstatus started"
    );

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
    spawn_reload_watchers(cfg_path.clone(), cfg.polling.file_watch_poll_ms, reload_tx);

    loop {
        tokio::select! {
            msg = reload_rx.recv() => {
                if msg.is_none() {
                    continue;
                }
                match load_or_default(&cfg_path) {
                    Ok(new_cfg) => {
                        if new_cfg.sync != cfg.sync {
                            service.update_settings(new_cfg.sync).await?;
                        }
                        if new_cfg.polling.poll_interval_ms != cfg.polling.poll_interval_ms {
                            service
                                .set_poll_interval(Duration::from_millis(new_cfg.polling.poll_interval_ms))
                                .await?;
                        }
                        if new_cfg.polling.provider != cfg.polling.provider
                            || new_cfg.presence != cfg.presence
                            || new_cfg.filter != cfg.filter
                            || new_cfg.subscribers != cfg.subscribers
                        {
                            warn!("source, presence, filter and subscriber changes apply after a restart");
                        }
                        cfg = new_cfg;
                        info!("configuration reloaded");
                    }
                    Err(err) => {
                        error!(error = %err, "failed to reload config");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

fn presence_client(cfg: &AppConfig) -> Option<Arc<dyn PresenceApi>> {
    match SlackPresenceClient::from_config(&cfg.presence) {
        Ok(client) => Some(Arc::new(client)),
        Err(SlackError::MissingToken) => {
            warn!("no Slack token configured; status sync disabled, broadcasting only");
            None
        }
        Err(err) => {
            error!(error = %err, "Slack client unavailable; status sync disabled");
            None
        }
    }
}

async fn doctor(cfg: &AppConfig) -> Result<()> {
    println!("== songstatus doctor ==");

    let source = build_media_source(&cfg.polling);
    println!("Media source: {}", source.name());
    match fetch_bounded(
        source.as_ref(),
        Duration::from_millis(cfg.polling.fetch_timeout_ms),
    )
    .await
    {
        Ok(Some(snapshot)) if snapshot.has_album() => {
            println!("Now playing: {} - {}", snapshot.artist, snapshot.title);
        }
        Ok(Some(_)) => println!("Audio without album metadata (ignored as non-music)"),
        Ok(None) => println!("No active media session"),
        Err(err) => println!("Media source error: {err}"),
    }

    match presence_client(cfg) {
        Some(client) => match client.read().await {
            Ok(status) => println!("Slack: reachable (emoji {:?})", status.emoji),
            Err(err) => println!("Slack: token configured but read failed: {err:#}"),
        },
        None => println!("Slack: no usable token configured"),
    }

    match TcpListener::bind(&cfg.subscribers.bind_addr).await {
        Ok(_) => println!("Subscriber address {} is free", cfg.subscribers.bind_addr),
        Err(err) => println!(
            "Subscriber address {} unavailable: {err}",
            cfg.subscribers.bind_addr
        ),
    }

    #[cfg(target_os = "macos")]
    {
        if cfg.polling.provider == "media_control" {
            println!("macOS: media-control must be installed and on PATH (brew install media-control)");
        }
    }

    Ok(())
}

async fn status(cfg: &AppConfig) -> Result<()> {
    let source = build_media_source(&cfg.polling);
    println!("source: {}", source.name());

    match fetch_bounded(
        source.as_ref(),
        Duration::from_millis(cfg.polling.fetch_timeout_ms),
    )
    .await
    {
        Ok(Some(snapshot)) => {
            println!("state: {}", if snapshot.playing { "playing" } else { "paused" });
            println!("track: {} - {}", snapshot.artist, snapshot.title);
            match &snapshot.album {
                Some(album) => println!("album: {album}"),
                None => println!("album: <none>"),
            }
            match &snapshot.artwork_data {
                Some(bytes) => println!(
                    "artwork: {} bytes ({})",
                    bytes.len(),
                    snapshot.artwork_mime_type.as_deref().unwrap_or("unknown type")
                ),
                None => println!("artwork: <none>"),
            }
        }
        Ok(None) => println!("track: <none>"),
        Err(err) => println!("error: {err}"),
    }

    if let Some(client) = presence_client(cfg) {
        match client.read().await {
            Ok(status) => println!("slack status: {} {}", status.emoji, status.text),
            Err(err) => println!("slack status: <unreadable: {err:#}>"),
        }
    }

    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

fn spawn_reload_watchers(path: PathBuf, poll_ms: u64, tx: mpsc::Sender<()>) {
    let tx_poll = tx.clone();
    tokio::spawn(async move {
        let mut known_mtime = file_mtime(&path);
        let sleep = Duration::from_millis(poll_ms.max(2_000));
        loop {
            tokio::time::sleep(sleep).await;
            let current = file_mtime(&path);
            if current.is_some() && current != known_mtime {
                known_mtime = current;
                let _ = tx_poll.send(()).await;
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::hangup()) {
                while sig.recv().await.is_some() {
                    let _ = tx.send(()).await;
                }
            }
        });
    }
}
