use crate::{FetchError, MediaSource};
use async_trait::async_trait;
use songstatus_core::PlaybackSnapshot;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use url::Url;
use zbus::zvariant::{OwnedValue, Str};
use zbus::{Connection, Proxy};

#[derive(Default)]
pub struct MprisSource;

impl MprisSource {
    pub fn new() -> Self {
        Self
    }

    async fn find_player(conn: &Connection) -> zbus::Result<Option<String>> {
        let proxy = Proxy::new(
            conn,
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
        )
        .await?;

        let names: Vec<String> = proxy.call("ListNames", &()).await?;
        let mut players: Vec<String> = names
            .into_iter()
            .filter(|n| n.starts_with("org.mpris.MediaPlayer2."))
            .collect();
        players.sort();
        Ok(players.into_iter().next())
    }

    fn ov_to_string(v: &OwnedValue) -> Option<String> {
        let owned = v.try_clone().ok()?;
        if let Ok(s) = String::try_from(owned.try_clone().ok()?) {
            return Some(s);
        }
        if let Ok(s) = Str::try_from(owned) {
            return Some(s.to_string());
        }
        None
    }

    fn artist_from_value(v: &OwnedValue) -> Option<String> {
        let artists = Vec::<String>::try_from(v.try_clone().ok()?).ok()?;
        if artists.is_empty() {
            None
        } else {
            Some(artists.join(", "))
        }
    }

    /// Only local `file://` artwork is read; players that hand out http
    /// URLs get no artwork.
    async fn read_artwork(art_url: &str) -> Option<(Vec<u8>, String)> {
        let url = Url::parse(art_url).ok()?;
        if url.scheme() != "file" {
            return None;
        }
        let path = url.to_file_path().ok()?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return None,
            Err(err) => {
                debug!(error = %err, path = %path.display(), "mpris artwork not readable");
                return None;
            }
        };
        Some((bytes, mime_from_path(&path).to_string()))
    }

    async fn read_snapshot(&self) -> zbus::Result<Option<PlaybackSnapshot>> {
        let conn = Connection::session().await?;
        let player = match Self::find_player(&conn).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let proxy = Proxy::new_owned(
            conn.clone(),
            player,
            "/org/mpris/MediaPlayer2",
            "org.mpris.MediaPlayer2.Player",
        )
        .await?;

        let status: String = proxy.get_property("PlaybackStatus").await?;
        if status == "Stopped" {
            return Ok(None);
        }

        let metadata: HashMap<String, OwnedValue> = proxy.get_property("Metadata").await?;

        let title = metadata
            .get("xesam:title")
            .and_then(Self::ov_to_string)
            .unwrap_or_default();
        let artist = metadata
            .get("xesam:artist")
            .and_then(Self::artist_from_value)
            .unwrap_or_default();
        let album = metadata
            .get("xesam:album")
            .and_then(Self::ov_to_string)
            .filter(|a| !a.trim().is_empty());

        let artwork = match metadata.get("mpris:artUrl").and_then(Self::ov_to_string) {
            Some(url) => Self::read_artwork(&url).await,
            None => None,
        };
        let (artwork_data, artwork_mime_type) = match artwork {
            Some((bytes, mime)) => (Some(bytes), Some(mime)),
            None => (None, None),
        };

        Ok(Some(PlaybackSnapshot {
            playing: status == "Playing",
            title,
            artist,
            album,
            artwork_data,
            artwork_mime_type,
        }))
    }
}

#[async_trait]
impl MediaSource for MprisSource {
    fn name(&self) -> &'static str {
        "mpris"
    }

    async fn fetch(&self) -> Result<Option<PlaybackSnapshot>, FetchError> {
        self.read_snapshot()
            .await
            .map_err(|err| FetchError::Unavailable(format!("dbus: {err}")))
    }
}

fn mime_from_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
