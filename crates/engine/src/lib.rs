use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use songstatus_core::TrackEvent;
use std::time::Duration;

mod coordinator;
mod service;
mod tracker;

pub use coordinator::{CoordinatorConfig, HandleReport, PresenceOutcome, StatusCoordinator};
pub use service::{ServiceConfig, SyncService};
pub use tracker::NowPlayingTracker;

/// The external status record. Shared with the user and other integrations,
/// so it is observed, never owned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub text: String,
    pub emoji: String,
    /// Unix seconds; `None` when the status never expires.
    pub expires_at: Option<i64>,
}

#[async_trait]
pub trait PresenceApi: Send + Sync {
    async fn read(&self) -> anyhow::Result<PresenceStatus>;

    /// Implementations truncate `text` to the API's maximum length.
    async fn write(&self, text: &str, emoji: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Fan-out to live subscribers. One unreachable subscriber must not keep
/// the others from receiving the event.
pub trait SubscriberSink: Send + Sync {
    fn publish(&self, event: &TrackEvent) -> Result<BroadcastReport, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("presence read failed: {0}")]
    PresenceRead(String),
    #[error("presence write failed: {0}")]
    PresenceWrite(String),
    #[error("presence clear failed: {0}")]
    PresenceClear(String),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}
