use crate::{BroadcastReport, PresenceApi, SubscriberSink, SyncError};
use songstatus_core::{AppConfig, PlaybackSnapshot, SyncSettings, TextFilter, TrackEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Emoji marking a status as written by us.
    pub marker_emoji: String,
    pub status_ttl: Duration,
    pub refresh_interval: Duration,
}

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

impl CoordinatorConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        let status_ttl = Duration::from_secs(cfg.presence.status_ttl_secs);
        Self {
            marker_emoji: cfg.presence.status_emoji.clone(),
            status_ttl,
            refresh_interval: clamp_refresh(
                Duration::from_millis(cfg.presence.refresh_interval_ms),
                status_ttl,
            ),
        }
    }
}

/// Keeps refreshes at least 30s apart and, when the TTL allows it, at most
/// half a TTL apart so a playing song's status never lapses.
fn clamp_refresh(requested: Duration, ttl: Duration) -> Duration {
    let mut refresh = requested.max(MIN_REFRESH_INTERVAL);
    let ceiling = ttl / 2;
    if ceiling >= MIN_REFRESH_INTERVAL && refresh > ceiling {
        refresh = ceiling;
    }
    if refresh != requested {
        warn!(
            requested = ?requested,
            ttl = ?ttl,
            using = ?refresh,
            "refresh_interval_ms out of range; clamped"
        );
    }
    refresh
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceOutcome {
    Written(String),
    Cleared,
    /// The event does not touch the external status.
    Untouched,
    SkippedDisabled,
    /// Someone else's status is showing; carries its emoji.
    SkippedForeign(String),
    NothingToClear,
    /// No presence client is configured.
    Unavailable,
    Failed(SyncError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleReport {
    pub broadcast: Option<Result<BroadcastReport, SyncError>>,
    pub presence: PresenceOutcome,
}

/// Turns tracker events into subscriber broadcasts and external status
/// writes.
///
/// The ownership guard (read the status, only touch it when it carries our
/// marker or nothing) races with other writers between the read and the
/// write. It is a best-effort heuristic, not a lock.
pub struct StatusCoordinator {
    cfg: CoordinatorConfig,
    settings: SyncSettings,
    presence: Option<Arc<dyn PresenceApi>>,
    sink: Arc<dyn SubscriberSink>,
    filter: Arc<dyn TextFilter>,
    last_known: Option<PlaybackSnapshot>,
    last_write_at: Option<Instant>,
}

impl StatusCoordinator {
    pub fn new(
        cfg: CoordinatorConfig,
        settings: SyncSettings,
        presence: Option<Arc<dyn PresenceApi>>,
        sink: Arc<dyn SubscriberSink>,
        filter: Arc<dyn TextFilter>,
    ) -> Self {
        Self {
            cfg,
            settings,
            presence,
            sink,
            filter,
            last_known: None,
            last_write_at: None,
        }
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    pub fn refresh_interval(&self) -> Duration {
        self.cfg.refresh_interval
    }

    pub async fn handle(&mut self, event: &TrackEvent) -> HandleReport {
        // One settings value for the whole event.
        let settings = self.settings;
        self.remember(event);

        let outgoing = match event {
            TrackEvent::SongChanged(s) => TrackEvent::SongChanged(self.filtered(s, settings)),
            TrackEvent::ArtworkFilled(s) => TrackEvent::ArtworkFilled(self.filtered(s, settings)),
            other => other.clone(),
        };
        let broadcast = self.publish(&outgoing);

        let presence = match &outgoing {
            TrackEvent::SongChanged(song) => {
                if settings.sync_external_status {
                    self.write_song(song).await
                } else {
                    PresenceOutcome::SkippedDisabled
                }
            }
            TrackEvent::Resumed => match self.last_known.clone() {
                Some(song) if settings.sync_external_status => {
                    let song = self.filtered(&song, settings);
                    self.write_song(&song).await
                }
                Some(_) => PresenceOutcome::SkippedDisabled,
                None => PresenceOutcome::Untouched,
            },
            TrackEvent::Paused if settings.clear_on_pause => {
                if settings.sync_external_status {
                    self.clear_owned().await
                } else {
                    PresenceOutcome::SkippedDisabled
                }
            }
            TrackEvent::Paused | TrackEvent::ArtworkFilled(_) => PresenceOutcome::Untouched,
            TrackEvent::Stopped => {
                if settings.sync_external_status {
                    self.clear_owned().await
                } else {
                    PresenceOutcome::SkippedDisabled
                }
            }
        };

        debug!(event = event.kind(), ?presence, "event handled");
        HandleReport {
            broadcast: Some(broadcast),
            presence,
        }
    }

    /// Swaps in a new settings value and replays whatever the change implies
    /// for the current song.
    pub async fn apply_settings(&mut self, next: SyncSettings) -> HandleReport {
        let prev = std::mem::replace(&mut self.settings, next);
        info!(?prev, ?next, "sync settings updated");

        let mut report = HandleReport {
            broadcast: None,
            presence: PresenceOutcome::Untouched,
        };

        let filter_toggled = prev.content_filter_enabled != next.content_filter_enabled;
        let current = self.last_known.clone().map(|s| self.filtered(&s, next));

        if filter_toggled {
            if let Some(song) = &current {
                report.broadcast = Some(self.publish(&TrackEvent::SongChanged(song.clone())));
            }
        }

        if prev.sync_external_status && !next.sync_external_status {
            report.presence = self.clear_owned().await;
        } else if next.sync_external_status
            && (filter_toggled || !prev.sync_external_status)
        {
            if let Some(song) = current.filter(|s| s.playing || !next.clear_on_pause) {
                report.presence = self.write_song(&song).await;
            }
        }

        report
    }

    /// True when a playing song's status has gone long enough without a
    /// write that its TTL could lapse.
    pub fn refresh_due(&self, now: Instant) -> bool {
        let playing = self.last_known.as_ref().map(|s| s.playing).unwrap_or(false);
        let stale = self
            .last_write_at
            .map(|at| now.duration_since(at) >= self.cfg.refresh_interval)
            .unwrap_or(false);
        self.settings.sync_external_status && playing && stale
    }

    pub async fn refresh(&mut self) -> PresenceOutcome {
        let settings = self.settings;
        match self.last_known.clone() {
            Some(song) => {
                let song = self.filtered(&song, settings);
                self.write_song(&song).await
            }
            None => PresenceOutcome::Untouched,
        }
    }

    fn remember(&mut self, event: &TrackEvent) {
        match event {
            TrackEvent::SongChanged(s) | TrackEvent::ArtworkFilled(s) => {
                self.last_known = Some(s.clone());
            }
            TrackEvent::Paused => {
                if let Some(s) = self.last_known.as_mut() {
                    s.playing = false;
                }
            }
            TrackEvent::Resumed => {
                if let Some(s) = self.last_known.as_mut() {
                    s.playing = true;
                }
            }
            TrackEvent::Stopped => self.last_known = None,
        }
    }

    fn filtered(&self, snapshot: &PlaybackSnapshot, settings: SyncSettings) -> PlaybackSnapshot {
        let mut out = snapshot.clone();
        if settings.content_filter_enabled {
            out.title = self.filter.clean(&snapshot.title);
            out.artist = self.filter.clean(&snapshot.artist);
        }
        out
    }

    fn publish(&self, event: &TrackEvent) -> Result<BroadcastReport, SyncError> {
        let result = self.sink.publish(event);
        match &result {
            Ok(report) if report.dropped > 0 => {
                warn!(
                    event = event.kind(),
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "some subscribers missed an event"
                );
            }
            Ok(_) => {}
            Err(err) => warn!(event = event.kind(), error = %err, "subscriber broadcast failed"),
        }
        result
    }

    /// Reads the external status and reports whether we may touch it.
    /// A failed read assumes ownership so one transient error cannot block
    /// writes forever.
    async fn check_owner(&self, presence: &dyn PresenceApi) -> Result<Option<String>, String> {
        match presence.read().await {
            Ok(status) if status.emoji.is_empty() => Ok(None),
            Ok(status) if status.emoji == self.cfg.marker_emoji => Ok(Some(status.emoji)),
            Ok(status) => Err(status.emoji),
            Err(err) => {
                let err = SyncError::PresenceRead(format!("{err:#}"));
                warn!(error = %err, "assuming we own the status");
                Ok(Some(self.cfg.marker_emoji.clone()))
            }
        }
    }

    async fn write_song(&mut self, song: &PlaybackSnapshot) -> PresenceOutcome {
        let Some(presence) = self.presence.clone() else {
            return PresenceOutcome::Unavailable;
        };

        if let Err(foreign) = self.check_owner(presence.as_ref()).await {
            info!(emoji = %foreign, "status set by someone else; leaving it alone");
            return PresenceOutcome::SkippedForeign(foreign);
        }

        let text = song.status_text();
        match presence
            .write(&text, &self.cfg.marker_emoji, self.cfg.status_ttl)
            .await
        {
            Ok(()) => {
                self.last_write_at = Some(Instant::now());
                info!(status = %text, "status updated");
                PresenceOutcome::Written(text)
            }
            Err(err) => {
                let err = SyncError::PresenceWrite(format!("{err:#}"));
                warn!(error = %err, "status update failed; next song change retries");
                PresenceOutcome::Failed(err)
            }
        }
    }

    async fn clear_owned(&mut self) -> PresenceOutcome {
        let Some(presence) = self.presence.clone() else {
            return PresenceOutcome::Unavailable;
        };

        match self.check_owner(presence.as_ref()).await {
            Err(foreign) => {
                info!(emoji = %foreign, "status set by someone else; not clearing");
                return PresenceOutcome::SkippedForeign(foreign);
            }
            Ok(None) => return PresenceOutcome::NothingToClear,
            Ok(Some(_)) => {}
        }

        match presence.clear().await {
            Ok(()) => {
                self.last_write_at = None;
                info!("status cleared");
                PresenceOutcome::Cleared
            }
            Err(err) => {
                let err = SyncError::PresenceClear(format!("{err:#}"));
                warn!(error = %err, "status clear failed");
                PresenceOutcome::Failed(err)
            }
        }
    }
}
