pub mod config;
pub mod filter;
pub mod model;

pub use config::{
    AppConfig, FilterConfig, PollingConfig, PresenceConfig, SubscriberConfig, SyncSettings,
};
pub use filter::{PassthroughFilter, TextFilter, WordListFilter};
pub use model::{PlaybackSnapshot, TrackEvent, TrackIdentity};
