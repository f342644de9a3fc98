use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use songstatus_core::{PlaybackSnapshot, TrackEvent};
use songstatus_engine::{BroadcastReport, SubscriberSink, SyncError};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Fans now-playing events out to connected WebSocket clients.
///
/// Every subscriber has its own bounded queue: a slow client loses events
/// once its queue is full, a gone client is unregistered, and neither
/// affects anyone else. New subscribers first receive the current song.
#[derive(Clone)]
pub struct SubscriberHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    // Lock order: `current` before `subscribers`.
    current: Mutex<Option<PlaybackSnapshot>>,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    capacity: usize,
}

pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<String>,
    hub: SubscriberHub,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next serialized event, or `None` once the hub dropped this subscriber.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SubscriberHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                current: Mutex::new(None),
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: queue_capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        let current = lock(&self.inner.current);
        if let Some(snapshot) = current.as_ref() {
            send_current_state(&tx, snapshot);
        }
        lock(&self.inner.subscribers).insert(id, tx);
        drop(current);

        debug!(subscriber = id, "subscriber joined");
        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        if lock(&self.inner.subscribers).remove(&id).is_some() {
            debug!(subscriber = id, "subscriber left");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// The song late joiners are greeted with.
    pub fn current(&self) -> Option<PlaybackSnapshot> {
        lock(&self.inner.current).clone()
    }

    /// Accepts WebSocket subscribers until the process exits. Accept errors
    /// (fd exhaustion, aborted handshakes) are logged and retried.
    pub async fn serve(self, listener: TcpListener) {
        info!(addr = ?listener.local_addr().ok(), "subscriber hub listening");
        self.accept_loop(|| listener.accept()).await
    }

    async fn accept_loop<F, Fut, S>(self, mut accept: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<(S, SocketAddr)>>,
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let (stream, peer) = match accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "failed to accept subscriber; retrying");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let hub = self.clone();
            tokio::spawn(async move {
                if let Err(err) = hub.handle_connection(stream, peer).await {
                    debug!(%peer, error = %err, "subscriber connection ended with error");
                }
            });
        }
    }

    async fn handle_connection<S>(&self, stream: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ws = accept_async(stream).await?;
        let (mut outgoing, mut incoming) = ws.split();
        let mut subscription = self.subscribe();
        info!(%peer, subscriber = subscription.id(), "subscriber connected");

        loop {
            tokio::select! {
                msg = subscription.recv() => match msg {
                    Some(text) => outgoing.send(Message::Text(text)).await?,
                    None => break,
                },
                frame = incoming.next() => match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                },
            }
        }

        info!(%peer, subscriber = subscription.id(), "subscriber disconnected");
        Ok(())
    }

    fn track(current: &mut Option<PlaybackSnapshot>, event: &TrackEvent) {
        match event {
            TrackEvent::SongChanged(s) | TrackEvent::ArtworkFilled(s) => {
                *current = Some(s.clone());
            }
            TrackEvent::Paused => {
                if let Some(s) = current.as_mut() {
                    s.playing = false;
                }
            }
            TrackEvent::Resumed => {
                if let Some(s) = current.as_mut() {
                    s.playing = true;
                }
            }
            TrackEvent::Stopped => *current = None,
        }
    }
}

fn send_current_state(tx: &mpsc::Sender<String>, snapshot: &PlaybackSnapshot) {
    match serde_json::to_string(&TrackEvent::SongChanged(snapshot.clone())) {
        Ok(payload) => {
            let _ = tx.try_send(payload);
        }
        Err(err) => warn!(error = %err, "failed to serialize current state"),
    }
}

impl SubscriberSink for SubscriberHub {
    fn publish(&self, event: &TrackEvent) -> Result<BroadcastReport, SyncError> {
        let payload =
            serde_json::to_string(event).map_err(|err| SyncError::Broadcast(err.to_string()))?;

        let mut current = lock(&self.inner.current);
        Self::track(&mut current, event);

        let mut report = BroadcastReport::default();
        lock(&self.inner.subscribers).retain(|id, tx| match tx.try_send(payload.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = *id, "subscriber queue full; dropping event");
                report.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = *id, "subscriber gone");
                false
            }
        });
        drop(current);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::SubscriberHub;
    use futures_util::StreamExt;
    use songstatus_core::{PlaybackSnapshot, TrackEvent};
    use songstatus_engine::{BroadcastReport, SubscriberSink};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    fn song(title: &str) -> PlaybackSnapshot {
        PlaybackSnapshot {
            playing: true,
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: Some("Album".to_string()),
            artwork_data: None,
            artwork_mime_type: None,
        }
    }

    fn decode(text: &str) -> TrackEvent {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let hub = SubscriberHub::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        let report = hub.publish(&TrackEvent::SongChanged(song("A"))).unwrap();
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 2,
                dropped: 0
            }
        );
        assert_eq!(decode(&a.recv().await.unwrap()), TrackEvent::SongChanged(song("A")));
        assert_eq!(decode(&b.recv().await.unwrap()), TrackEvent::SongChanged(song("A")));
    }

    #[tokio::test]
    async fn late_joiner_gets_current_state() {
        let hub = SubscriberHub::new(8);
        let mut early = hub.subscribe();
        assert!(hub.current().is_none());

        hub.publish(&TrackEvent::SongChanged(song("A"))).unwrap();
        hub.publish(&TrackEvent::Paused).unwrap();

        let mut late = hub.subscribe();
        let mut expected = song("A");
        expected.playing = false;
        assert_eq!(
            decode(&late.recv().await.unwrap()),
            TrackEvent::SongChanged(expected)
        );
        assert_eq!(early.recv().await.map(|t| decode(&t)), Some(TrackEvent::SongChanged(song("A"))));

        hub.publish(&TrackEvent::Stopped).unwrap();
        assert!(hub.current().is_none());
        let mut after_stop = hub.subscribe();
        assert!(after_stop.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_is_isolated() {
        let hub = SubscriberHub::new(1);
        let _slow = hub.subscribe();
        let mut healthy = hub.subscribe();

        hub.publish(&TrackEvent::Paused).unwrap();
        assert_eq!(decode(&healthy.recv().await.unwrap()), TrackEvent::Paused);

        let report = hub.publish(&TrackEvent::Resumed).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(decode(&healthy.recv().await.unwrap()), TrackEvent::Resumed);
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let hub = SubscriberHub::new(4);
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn serves_websocket_clients() {
        let hub = SubscriberHub::new(8);
        hub.publish(&TrackEvent::SongChanged(song("A"))).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(hub.clone().serve(listener));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        let greeting = ws.next().await.unwrap().unwrap();
        match greeting {
            Message::Text(text) => assert_eq!(decode(&text), TrackEvent::SongChanged(song("A"))),
            other => panic!("unexpected frame {other:?}"),
        }

        for _ in 0..100 {
            if hub.subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        hub.publish(&TrackEvent::Paused).unwrap();

        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value, serde_json::json!({ "type": "PAUSED" }));
            }
            other => panic!("unexpected frame {other:?}"),
        }

        ws.close(None).await.unwrap();
        for _ in 0..100 {
            if hub.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn keeps_accepting_after_accept_errors() {
        let hub = SubscriberHub::new(8);
        hub.publish(&TrackEvent::SongChanged(song("A"))).unwrap();

        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        tokio::spawn(hub.clone().accept_loop(move || {
            let listener = listener.clone();
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted"))
                } else {
                    listener.accept().await
                }
            }
        }));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => assert_eq!(decode(&text), TrackEvent::SongChanged(song("A"))),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }
}
