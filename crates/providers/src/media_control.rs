use crate::{FetchError, MediaSource};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use songstatus_core::PlaybackSnapshot;
use tokio::process::Command;
use tracing::debug;

/// Reads now-playing data by running `media-control get` (or a compatible
/// command) that prints one JSON object, or `null`, on stdout.
pub struct MediaControlSource {
    command: String,
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaControlOutput {
    #[serde(default)]
    playing: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    artwork_data: Option<String>,
    #[serde(default)]
    artwork_mime_type: Option<String>,
}

impl MediaControlSource {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl MediaSource for MediaControlSource {
    fn name(&self) -> &'static str {
        "media_control"
    }

    async fn fetch(&self) -> Result<Option<PlaybackSnapshot>, FetchError> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FetchError::Spawn {
                command: self.display_command(),
                source,
            })?;

        // media-control exits non-zero when nothing is playing.
        if !output.status.success() {
            debug!(status = ?output.status.code(), "media source reported no media");
            return Ok(None);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return Err(FetchError::Stderr {
                command: self.display_command(),
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|err| FetchError::Malformed(format!("invalid UTF-8: {err}")))?;
        parse_output(&stdout)
    }
}

pub(crate) fn parse_output(stdout: &str) -> Result<Option<PlaybackSnapshot>, FetchError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let parsed: Option<MediaControlOutput> =
        serde_json::from_str(trimmed).map_err(|err| FetchError::Malformed(err.to_string()))?;

    Ok(parsed.map(|raw| {
        let artwork_data = raw.artwork_data.as_deref().and_then(|encoded| {
            match STANDARD.decode(encoded.trim()) {
                Ok(bytes) if !bytes.is_empty() => Some(bytes),
                Ok(_) => None,
                Err(err) => {
                    debug!(error = %err, "dropping undecodable artwork");
                    None
                }
            }
        });
        let artwork_mime_type = artwork_data.as_ref().and(raw.artwork_mime_type);

        PlaybackSnapshot {
            playing: raw.playing,
            title: raw.title.unwrap_or_default(),
            artist: raw.artist.unwrap_or_default(),
            album: raw.album.filter(|a| !a.trim().is_empty()),
            artwork_data,
            artwork_mime_type,
        }
    }))
}
