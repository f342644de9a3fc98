use crate::coordinator::StatusCoordinator;
use crate::tracker::NowPlayingTracker;
use anyhow::{anyhow, Result};
use songstatus_core::{AppConfig, PlaybackSnapshot, SyncSettings, TrackEvent};
use songstatus_providers::{fetch_bounded, FetchError, MediaSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.polling.poll_interval_ms),
            fetch_timeout: Duration::from_millis(cfg.polling.fetch_timeout_ms),
        }
    }
}

enum PollCommand {
    Start,
    Stop,
    SetInterval(Duration),
    Current(oneshot::Sender<Option<PlaybackSnapshot>>),
    Shutdown,
}

enum CoordinatorCommand {
    Event(TrackEvent),
    Settings(SyncSettings),
}

type FetchResult = (u64, Result<Option<PlaybackSnapshot>, FetchError>);

/// Runs the tracker on its own polling timeline and hands events to the
/// coordinator task over a channel, so slow status writes never delay a
/// poll.
pub struct SyncService {
    poll_tx: mpsc::Sender<PollCommand>,
    coord_tx: mpsc::Sender<CoordinatorCommand>,
    poll_task: JoinHandle<()>,
    coord_task: JoinHandle<()>,
}

impl SyncService {
    pub fn spawn(
        source: Arc<dyn MediaSource>,
        coordinator: StatusCoordinator,
        cfg: ServiceConfig,
    ) -> Self {
        let (poll_tx, poll_rx) = mpsc::channel(16);
        let (coord_tx, coord_rx) = mpsc::channel(32);

        let poller = Poller {
            source,
            tracker: NowPlayingTracker::new(),
            cfg,
            events: coord_tx.clone(),
            polling: false,
            generation: 0,
            in_flight: false,
        };

        Self {
            poll_tx,
            coord_tx,
            poll_task: tokio::spawn(poller.run(poll_rx)),
            coord_task: tokio::spawn(run_coordinator(coordinator, coord_rx)),
        }
    }

    /// Starts polling; if already polling, restarts the timer.
    pub async fn start_polling(&self) -> Result<()> {
        self.send(PollCommand::Start).await
    }

    /// Stops the timer. A fetch already running completes and is discarded.
    pub async fn stop_polling(&self) -> Result<()> {
        self.send(PollCommand::Stop).await
    }

    pub async fn set_poll_interval(&self, interval: Duration) -> Result<()> {
        self.send(PollCommand::SetInterval(interval)).await
    }

    pub async fn update_settings(&self, settings: SyncSettings) -> Result<()> {
        self.coord_tx
            .send(CoordinatorCommand::Settings(settings))
            .await
            .map_err(|_| anyhow!("coordinator task is gone"))
    }

    pub async fn current(&self) -> Result<Option<PlaybackSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.send(PollCommand::Current(tx)).await?;
        rx.await.map_err(|_| anyhow!("poller task is gone"))
    }

    /// Stops polling and waits for queued events to be handled.
    pub async fn shutdown(self) {
        let _ = self.poll_tx.send(PollCommand::Shutdown).await;
        if let Err(err) = self.poll_task.await {
            warn!(error = %err, "poller task ended abnormally");
        }
        drop(self.coord_tx);
        if let Err(err) = self.coord_task.await {
            warn!(error = %err, "coordinator task ended abnormally");
        }
    }

    async fn send(&self, cmd: PollCommand) -> Result<()> {
        self.poll_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("poller task is gone"))
    }
}

struct Poller {
    source: Arc<dyn MediaSource>,
    tracker: NowPlayingTracker,
    cfg: ServiceConfig,
    events: mpsc::Sender<CoordinatorCommand>,
    polling: bool,
    /// Bumped on every start/stop; fetches from an older generation are
    /// discarded.
    generation: u64,
    in_flight: bool,
}

impl Poller {
    async fn run(mut self, mut commands: mpsc::Receiver<PollCommand>) {
        let (fetch_tx, mut fetch_rx) = mpsc::channel::<FetchResult>(1);
        let mut ticker = new_ticker(self.cfg.poll_interval);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(PollCommand::Start) => {
                        self.generation += 1;
                        self.polling = true;
                        ticker = new_ticker(self.cfg.poll_interval);
                        info!(source = self.source.name(), interval = ?self.cfg.poll_interval, "polling started");
                    }
                    Some(PollCommand::Stop) => {
                        if self.polling {
                            self.polling = false;
                            self.generation += 1;
                            info!("polling stopped");
                        }
                    }
                    Some(PollCommand::SetInterval(interval)) => {
                        self.cfg.poll_interval = interval;
                        if self.polling {
                            ticker = new_ticker(interval);
                        }
                    }
                    Some(PollCommand::Current(reply)) => {
                        let _ = reply.send(self.tracker.current().cloned());
                    }
                    Some(PollCommand::Shutdown) | None => break,
                },
                _ = ticker.tick(), if self.polling => {
                    if self.in_flight {
                        debug!("previous fetch still running; skipping tick");
                        continue;
                    }
                    self.in_flight = true;
                    let source = Arc::clone(&self.source);
                    let timeout = self.cfg.fetch_timeout;
                    let generation = self.generation;
                    let tx = fetch_tx.clone();
                    tokio::spawn(async move {
                        let result = fetch_bounded(source.as_ref(), timeout).await;
                        let _ = tx.send((generation, result)).await;
                    });
                }
                Some((generation, result)) = fetch_rx.recv() => {
                    self.in_flight = false;
                    if !self.polling || generation != self.generation {
                        debug!("discarding fetch that finished after polling stopped");
                        continue;
                    }
                    if !self.on_fetch(result).await {
                        break;
                    }
                }
            }
        }

        debug!("poller finished");
    }

    async fn on_fetch(&mut self, result: Result<Option<PlaybackSnapshot>, FetchError>) -> bool {
        let fetched = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "media source fetch failed; treating as nothing playing");
                None
            }
        };

        let Some(event) = self.tracker.classify(fetched) else {
            return true;
        };

        match event.snapshot() {
            Some(s) => info!(
                event = event.kind(),
                title = %s.title,
                artist = %s.artist,
                playing = s.playing,
                "now playing changed"
            ),
            None => info!(event = event.kind(), "now playing changed"),
        }

        if self.events.send(CoordinatorCommand::Event(event)).await.is_err() {
            warn!("coordinator task is gone; stopping poller");
            return false;
        }
        true
    }
}

async fn run_coordinator(
    mut coordinator: StatusCoordinator,
    mut commands: mpsc::Receiver<CoordinatorCommand>,
) {
    let mut refresh = new_ticker(coordinator.refresh_interval() / 2);

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(CoordinatorCommand::Event(event)) => {
                    coordinator.handle(&event).await;
                }
                Some(CoordinatorCommand::Settings(settings)) => {
                    coordinator.apply_settings(settings).await;
                }
                None => break,
            },
            _ = refresh.tick() => {
                if coordinator.refresh_due(Instant::now()) {
                    debug!("refreshing status before it expires");
                    coordinator.refresh().await;
                }
            }
        }
    }

    debug!("coordinator finished");
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
