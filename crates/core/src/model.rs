use serde::{Deserialize, Serialize};

/// One point-in-time read of the local media source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub playing: bool,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    #[serde(default, with = "artwork_base64")]
    pub artwork_data: Option<Vec<u8>>,
    #[serde(default)]
    pub artwork_mime_type: Option<String>,
}

/// The (title, artist, album) triple that decides whether two snapshots are
/// the same song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackIdentity<'a> {
    pub title: &'a str,
    pub artist: &'a str,
    pub album: Option<&'a str>,
}

impl PlaybackSnapshot {
    pub fn identity(&self) -> TrackIdentity<'_> {
        TrackIdentity {
            title: &self.title,
            artist: &self.artist,
            album: self.album.as_deref(),
        }
    }

    pub fn same_track(&self, other: &PlaybackSnapshot) -> bool {
        self.identity() == other.identity()
    }

    /// Audio without album metadata is not treated as music.
    pub fn has_album(&self) -> bool {
        self.album
            .as_deref()
            .map(|a| !a.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn has_artwork(&self) -> bool {
        self.artwork_data
            .as_ref()
            .map(|d| !d.is_empty())
            .unwrap_or(false)
    }

    /// Text used for the external status, e.g. `Get Lucky - Daft Punk`.
    pub fn status_text(&self) -> String {
        format!("{} - {}", self.title, self.artist)
    }
}

/// Output of the tracker: at most one per poll cycle.
///
/// Serialises as `{"type": "SONG_CHANGED", "data": {...}}`; the unit variants
/// carry no `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEvent {
    SongChanged(PlaybackSnapshot),
    Paused,
    Resumed,
    Stopped,
    ArtworkFilled(PlaybackSnapshot),
}

impl TrackEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackEvent::SongChanged(_) => "song_changed",
            TrackEvent::Paused => "paused",
            TrackEvent::Resumed => "resumed",
            TrackEvent::Stopped => "stopped",
            TrackEvent::ArtworkFilled(_) => "artwork_filled",
        }
    }

    pub fn snapshot(&self) -> Option<&PlaybackSnapshot> {
        match self {
            TrackEvent::SongChanged(s) | TrackEvent::ArtworkFilled(s) => Some(s),
            _ => None,
        }
    }
}

mod artwork_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(text) => STANDARD
                .decode(text.trim())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PlaybackSnapshot, TrackEvent};

    fn song() -> PlaybackSnapshot {
        PlaybackSnapshot {
            playing: true,
            title: "Get Lucky".to_string(),
            artist: "Daft Punk".to_string(),
            album: Some("Random Access Memories".to_string()),
            artwork_data: Some(vec![0xff, 0xd8, 0xff]),
            artwork_mime_type: Some("image/jpeg".to_string()),
        }
    }

    #[test]
    fn identity_ignores_play_state_and_artwork() {
        let a = song();
        let mut b = song();
        b.playing = false;
        b.artwork_data = None;
        assert!(a.same_track(&b));

        b.album = Some("Homework".to_string());
        assert!(!a.same_track(&b));
    }

    #[test]
    fn blank_album_is_not_music() {
        let mut s = song();
        assert!(s.has_album());
        s.album = Some("  ".to_string());
        assert!(!s.has_album());
        s.album = None;
        assert!(!s.has_album());
    }

    #[test]
    fn event_payload_shape() {
        let paused = serde_json::to_value(TrackEvent::Paused).unwrap();
        assert_eq!(paused, serde_json::json!({ "type": "PAUSED" }));

        let changed = serde_json::to_value(TrackEvent::SongChanged(song())).unwrap();
        assert_eq!(changed["type"], "SONG_CHANGED");
        assert_eq!(changed["data"]["title"], "Get Lucky");
        assert_eq!(changed["data"]["artworkMimeType"], "image/jpeg");
        assert_eq!(changed["data"]["artworkData"], "/9j/");
    }
}
