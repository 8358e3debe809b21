//! Live change feed
//!
//! A [`ChangeFeed`] turns remote mutations into an ordered stream of
//! [`RemoteChangeEvent`]s per collection.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{RemoteError, RemoteResult};
use crate::models::Record;
use crate::store::Collection;
use crate::util::{is_ws_url, normalize_text_option};

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One remote mutation, as sent on the wire:
/// `{"event": "update", "record": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChangeEvent {
    #[serde(rename = "event")]
    pub kind: ChangeKind,
    pub record: Record,
}

impl RemoteChangeEvent {
    pub const fn new(kind: ChangeKind, record: Record) -> Self {
        Self { kind, record }
    }
}

/// An active feed subscription. Dropping it cancels the underlying stream.
pub struct FeedSubscription {
    receiver: mpsc::UnboundedReceiver<RemoteChangeEvent>,
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub const fn new(
        receiver: mpsc::UnboundedReceiver<RemoteChangeEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { receiver, task }
    }

    /// Next event in arrival order; `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<RemoteChangeEvent> {
        self.receiver.recv().await
    }

    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.receiver.close();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.abort();
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("active", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

/// Source of live remote mutations.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, collection: Collection) -> RemoteResult<FeedSubscription>;
}

/// In-process feed hub. Platform glue publishes events it receives from
/// its own realtime client; every subscriber of that collection sees them.
#[derive(Debug, Clone)]
pub struct BroadcastChangeFeed {
    sender: broadcast::Sender<(Collection, RemoteChangeEvent)>,
}

impl Default for BroadcastChangeFeed {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }
}

impl BroadcastChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, collection: Collection, event: RemoteChangeEvent) -> usize {
        self.sender.send((collection, event)).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl ChangeFeed for BroadcastChangeFeed {
    async fn subscribe(&self, collection: Collection) -> RemoteResult<FeedSubscription> {
        let mut source = self.sender.subscribe();
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok((event_collection, event)) => {
                        if event_collection == collection && sender.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            collection = collection.name(),
                            skipped,
                            "Change feed subscriber lagged; events were dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(FeedSubscription::new(receiver, Some(task)))
    }
}

/// Feed backed by a WebSocket endpoint streaming JSON text frames.
#[derive(Clone)]
pub struct WsChangeFeed {
    url: String,
    token: Option<String>,
}

impl std::fmt::Debug for WsChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsChangeFeed")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl WsChangeFeed {
    pub fn new(url: impl Into<String>, token: Option<String>) -> RemoteResult<Self> {
        let url = normalize_text_option(Some(url.into()))
            .filter(|url| is_ws_url(url))
            .ok_or_else(|| {
                RemoteError::InvalidPayload("feed URL must include ws:// or wss://".to_string())
            })?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            token: normalize_text_option(token),
        })
    }

    fn endpoint(&self, collection: Collection) -> String {
        format!("{}/{}", self.url, collection.name())
    }
}

#[async_trait]
impl ChangeFeed for WsChangeFeed {
    async fn subscribe(&self, collection: Collection) -> RemoteResult<FeedSubscription> {
        let mut request = self
            .endpoint(collection)
            .into_client_request()
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut stream, _) = connect_async(request)
            .await
            .map_err(|error| RemoteError::Transport(error.to_string()))?;
        tracing::debug!(collection = collection.name(), "Change feed connected");

        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match parse_frame(&text) {
                        Ok(event) => {
                            if sender.send(event).is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!("Ignoring malformed change feed frame: {error}");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!("Change feed stream failed: {error}");
                        break;
                    }
                }
            }
            tracing::debug!(collection = collection.name(), "Change feed closed");
        });

        Ok(FeedSubscription::new(receiver, Some(task)))
    }
}

fn parse_frame(text: &str) -> Result<RemoteChangeEvent, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn event(kind: ChangeKind, id: &str) -> RemoteChangeEvent {
        RemoteChangeEvent::new(kind, Record::new(id))
    }

    #[test]
    fn frames_use_event_tag() {
        let parsed = parse_frame(
            r#"{"event":"update","record":{"id":"p1","updated_at":"2024-01-01T00:00:00Z","label":"A"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind, ChangeKind::Update);
        assert_eq!(parsed.record.label(), Some("A"));
        assert!(parse_frame(r#"{"event":"rename","record":{"id":"p1"}}"#).is_err());
    }

    #[test]
    fn ws_feed_requires_ws_scheme() {
        assert!(WsChangeFeed::new("https://feed.example.com", None).is_err());
        let feed = WsChangeFeed::new("wss://feed.example.com/", Some("t".to_string())).unwrap();
        assert_eq!(
            feed.endpoint(Collection::Plans),
            "wss://feed.example.com/plans"
        );
        assert!(!format!("{feed:?}").contains("\"t\""));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn broadcast_feed_filters_by_collection_in_order() {
        let feed = BroadcastChangeFeed::new();
        let mut plans = feed.subscribe(Collection::Plans).await.unwrap();

        assert_eq!(feed.publish(Collection::Plans, event(ChangeKind::Insert, "p1")), 1);
        feed.publish(Collection::Packs, event(ChangeKind::Insert, "x"));
        feed.publish(Collection::Plans, event(ChangeKind::Delete, "p1"));

        let first = tokio::time::timeout(Duration::from_secs(5), plans.next())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), plans.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, event(ChangeKind::Insert, "p1"));
        assert_eq!(second, event(ChangeKind::Delete, "p1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publish_without_subscribers_is_dropped() {
        let feed = BroadcastChangeFeed::new();
        assert_eq!(feed.publish(Collection::Plans, event(ChangeKind::Insert, "p1")), 0);

        let subscription = feed.subscribe(Collection::Plans).await.unwrap();
        subscription.cancel();
    }
}
