//! Event stream at `/api/ws`
//!
//! A client starts subscribed to the gadget, store and capture topics and
//! immediately receives the current state of each as ordinary events, so a
//! dashboard never has to poll before its first update. `subscribe` replaces
//! the topic list and re-sends whatever state the new list covers.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::events::SystemEvent;
use crate::state::AppState;

const DEFAULT_TOPICS: [&str; 3] = ["gadget.*", "store.*", "capture.*"];

const HEARTBEAT: Duration = Duration::from_secs(30);

/// `{"type": "subscribe", "topics": [...]}` and friends
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    /// Re-send current state for the subscribed topics
    Snapshot,
}

/// Topic filter of one connection
struct Subscription {
    topics: Vec<String>,
}

impl Subscription {
    fn new() -> Self {
        Self {
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Connection-level errors always go through
    fn wants(&self, event: &SystemEvent) -> bool {
        matches!(event, SystemEvent::Error { .. })
            || self.topics.iter().any(|topic| event.matches_topic(topic))
    }

    /// Returns whether the client should get a fresh state snapshot
    fn apply(&mut self, msg: ClientMessage) -> bool {
        match msg {
            ClientMessage::Subscribe { topics } => {
                debug!("Client subscribed to {:?}", topics);
                self.topics = topics;
                true
            }
            ClientMessage::Unsubscribe { topics } => {
                self.topics.retain(|t| !topics.contains(t));
                false
            }
            ClientMessage::Snapshot => true,
        }
    }

    /// Current-state events this subscription covers
    fn snapshot(&self, current: Vec<SystemEvent>) -> Vec<SystemEvent> {
        current.into_iter().filter(|e| self.wants(e)).collect()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_event<S>(sender: &mut S, event: &SystemEvent) -> bool
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize {}: {}", event.event_name(), e);
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the snapshot so nothing falls between the two
    let mut event_rx = state.events.subscribe();
    let mut subscription = Subscription::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT);

    info!("WebSocket client connected");
    for event in subscription.snapshot(state.snapshot_events()) {
        if !send_event(&mut sender, &event).await {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let resend = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => subscription.apply(msg),
                        Err(e) => {
                            warn!("Ignoring client message: {}", e);
                            false
                        }
                    };
                    if resend {
                        for event in subscription.snapshot(state.snapshot_events()) {
                            if !send_event(&mut sender, &event).await {
                                return;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },

            event = event_rx.recv() => match event {
                Ok(event) => {
                    if subscription.wants(&event) && !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged by {} events", n);
                    let notice = SystemEvent::Error {
                        message: format!("Lagged by {} events", n),
                    };
                    if !send_event(&mut sender, &notice).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },

            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::GadgetMode;
    use crate::store::MountState;

    fn current() -> Vec<SystemEvent> {
        vec![
            SystemEvent::GadgetModeChanged {
                mode: GadgetMode::Multi,
                read_only: false,
                generation: 2,
            },
            SystemEvent::StoreStateChanged {
                state: MountState::ExposedToHost,
            },
            SystemEvent::CaptureStarted {
                case_id: "USB_20260301_140509".into(),
                output_path: "/o/captures/USB_20260301_140509.pcap".into(),
            },
        ]
    }

    fn parse(text: &str) -> ClientMessage {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_defaults_cover_device_state() {
        let sub = Subscription::new();
        assert_eq!(sub.snapshot(current()).len(), 3);
        assert!(!sub.wants(&SystemEvent::SyncCompleted {
            succeeded: true,
            files_copied: 1,
            bytes_copied: 10,
            error: None,
        }));
        assert!(sub.wants(&SystemEvent::Error {
            message: "lag".into()
        }));
    }

    #[test]
    fn test_subscribe_replaces_and_resends() {
        let mut sub = Subscription::new();
        assert!(sub.apply(parse(
            r#"{"type":"subscribe","topics":["gadget.mode_changed","sync.completed"]}"#
        )));

        let snapshot = sub.snapshot(current());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].event_name(), "gadget.mode_changed");
        assert!(!sub.wants(&current()[1]));
    }

    #[test]
    fn test_unsubscribe_and_snapshot_request() {
        let mut sub = Subscription::new();
        assert!(!sub.apply(parse(r#"{"type":"unsubscribe","topics":["capture.*"]}"#)));
        assert!(!sub.wants(&current()[2]));
        assert!(sub.wants(&current()[1]));

        assert!(sub.apply(parse(r#"{"type":"snapshot"}"#)));
        assert_eq!(sub.snapshot(current()).len(), 2);
    }

    #[test]
    fn test_wildcard_and_empty() {
        let mut sub = Subscription::new();
        sub.apply(parse(r#"{"type":"subscribe","topics":["*"]}"#));
        assert_eq!(sub.snapshot(current()).len(), 3);

        sub.apply(parse(r#"{"type":"subscribe","topics":[]}"#));
        assert!(sub.snapshot(current()).is_empty());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }
}
