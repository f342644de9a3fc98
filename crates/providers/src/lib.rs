use async_trait::async_trait;
use songstatus_core::{PlaybackSnapshot, PollingConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

mod media_control;
#[cfg(target_os = "linux")]
mod mpris;

pub use media_control::MediaControlSource;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` wrote to stderr: {stderr}")]
    Stderr { command: String, stderr: String },
    #[error("malformed media source output: {0}")]
    Malformed(String),
    #[error("media source did not answer within {0:?}")]
    Timeout(Duration),
    #[error("media source unavailable: {0}")]
    Unavailable(String),
}

/// A place to read the currently playing media from.
///
/// `Ok(None)` means nothing is playing. Implementations must tolerate being
/// called once per poll interval for the lifetime of the process.
#[async_trait]
pub trait MediaSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self) -> Result<Option<PlaybackSnapshot>, FetchError>;
}

/// Runs one fetch bounded by `timeout`.
pub async fn fetch_bounded(
    source: &dyn MediaSource,
    timeout: Duration,
) -> Result<Option<PlaybackSnapshot>, FetchError> {
    match tokio::time::timeout(timeout, source.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

pub fn build_media_source(cfg: &PollingConfig) -> Arc<dyn MediaSource> {
    match cfg.provider.as_str() {
        "media_control" => Arc::new(MediaControlSource::new(
            cfg.command.clone(),
            cfg.args.clone(),
        )),
        "mpris" => match platform::mpris_source() {
            Some(source) => source,
            None => {
                warn!("mpris is only available on linux; falling back to the null source");
                Arc::new(NullSource)
            }
        },
        "null" => Arc::new(NullSource),
        other => {
            warn!(provider = %other, "unknown media source; falling back to the null source");
            Arc::new(NullSource)
        }
    }
}

/// Never reports anything playing.
pub struct NullSource;

#[async_trait]
impl MediaSource for NullSource {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn fetch(&self) -> Result<Option<PlaybackSnapshot>, FetchError> {
        Ok(None)
    }
}

mod platform {
    use super::MediaSource;
    use std::sync::Arc;

    #[cfg(target_os = "linux")]
    pub fn mpris_source() -> Option<Arc<dyn MediaSource>> {
        Some(Arc::new(crate::mpris::MprisSource::new()))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn mpris_source() -> Option<Arc<dyn MediaSource>> {
        None
    }
}
