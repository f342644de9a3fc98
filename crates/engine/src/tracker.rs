use songstatus_core::{PlaybackSnapshot, TrackEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffKind {
    TrackChanged,
    ArtworkArrived,
    StateChanged,
    Gone,
    Ignored,
    Nothing,
}

/// Diffs successive polls into discrete events.
///
/// Holds exactly one retained snapshot, the last one classified as current.
/// Checks run in a fixed order (identity, artwork, play state) and at most
/// one event comes out of each call.
#[derive(Debug, Default)]
pub struct NowPlayingTracker {
    current: Option<PlaybackSnapshot>,
}

impl NowPlayingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&PlaybackSnapshot> {
        self.current.as_ref()
    }

    pub fn classify(&mut self, fetched: Option<PlaybackSnapshot>) -> Option<TrackEvent> {
        let (diff, event) = self.apply(fetched);
        tracing::trace!(?diff, "classified poll");
        event
    }

    fn apply(&mut self, fetched: Option<PlaybackSnapshot>) -> (DiffKind, Option<TrackEvent>) {
        let Some(next) = fetched else {
            return match self.current.take() {
                Some(_) => (DiffKind::Gone, Some(TrackEvent::Stopped)),
                None => (DiffKind::Nothing, None),
            };
        };

        // System sounds and other non-music audio carry no album.
        if !next.has_album() {
            return (DiffKind::Ignored, None);
        }

        let same_track = self
            .current
            .as_ref()
            .map(|current| current.same_track(&next))
            .unwrap_or(false);
        if !same_track {
            self.current = Some(next.clone());
            return (DiffKind::TrackChanged, Some(TrackEvent::SongChanged(next)));
        }
        let Some(current) = self.current.as_mut() else {
            return (DiffKind::Nothing, None);
        };

        // Artwork only ever fills in; a later poll without it never clears it.
        if !current.has_artwork() && next.has_artwork() {
            current.artwork_data = next.artwork_data;
            current.artwork_mime_type = next.artwork_mime_type;
            return (
                DiffKind::ArtworkArrived,
                Some(TrackEvent::ArtworkFilled(current.clone())),
            );
        }

        if current.playing != next.playing {
            current.playing = next.playing;
            let event = if next.playing {
                TrackEvent::Resumed
            } else {
                TrackEvent::Paused
            };
            return (DiffKind::StateChanged, Some(event));
        }

        (DiffKind::Nothing, None)
    }
}
