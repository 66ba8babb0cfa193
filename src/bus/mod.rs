//! In-process topic broker.
//!
//! A single hub task owns all routing state and handles one command at a
//! time, which gives every topic a total delivery order. Delivery itself is
//! decoupled from routing: each subscriber reads from its own bounded queue,
//! and the hub never waits on a subscriber.
//!
//! ```text
//! publish() ──► command queue ──► Hub ──try_send──► Stream (per subscriber)
//!                                  │
//!                                  └──► backlog (fire-once topics without subscribers)
//! ```

mod hub;
pub mod topic;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::BusConfig;

pub use topic::{is_fire_once, once_topic, user_topic, FILE_TOPIC, WIDGET_TOPIC};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Event bus is closed")]
    Closed,
}

/// A published payload in flight through the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    /// JSON-encoded payload
    pub payload: Bytes,
}

impl Message {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Snapshot of the hub's routing tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub topics: usize,
    pub subscribers: usize,
    pub backlog_topics: usize,
    pub backlog_messages: usize,
}

pub(crate) enum Command {
    Subscribe {
        topic: String,
        reply: oneshot::Sender<(u64, mpsc::Receiver<Message>)>,
    },
    Unsubscribe {
        topic: String,
        id: u64,
        ack: Option<oneshot::Sender<()>>,
    },
    Publish(Message),
    Stats(oneshot::Sender<BusStats>),
    Shutdown,
}

/// Handle to the hub. Cheap to clone; all clones talk to the same hub.
#[derive(Clone)]
pub struct EventBus {
    commands: mpsc::UnboundedSender<Command>,
}

impl EventBus {
    /// Spawn the hub task and return a handle to it.
    pub fn start(config: BusConfig) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(hub::Hub::new(config).run(rx));
        (Self { commands }, handle)
    }

    /// Register a new stream for `topic`.
    ///
    /// Resolves once the hub has registered the stream, so anything published
    /// afterwards is delivered to it. A pending fire-once backlog is delivered
    /// first, in publish order.
    pub async fn subscribe(&self, topic: impl Into<String>) -> Result<Stream, BusError> {
        let topic = topic.into();
        let (reply, registered) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                topic: topic.clone(),
                reply,
            })
            .map_err(|_| BusError::Closed)?;
        let (id, messages) = registered.await.map_err(|_| BusError::Closed)?;

        Ok(Stream {
            topic,
            id,
            messages,
            commands: self.commands.clone(),
            registered: true,
        })
    }

    /// Serialize `data` as JSON and route it to the subscribers of `topic`.
    ///
    /// Having no subscriber is not an error: the message is either kept in the
    /// topic's backlog (fire-once topics) or dropped with a warning.
    pub fn publish<T: Serialize + ?Sized>(&self, topic: &str, data: &T) -> Result<(), BusError> {
        let payload = serde_json::to_vec(data)?;
        debug!(topic, payload = %String::from_utf8_lossy(&payload), "Send event");
        self.commands
            .send(Command::Publish(Message {
                topic: topic.to_string(),
                payload: Bytes::from(payload),
            }))
            .map_err(|_| BusError::Closed)
    }

    pub async fn stats(&self) -> Result<BusStats, BusError> {
        let (reply, stats) = oneshot::channel();
        self.commands
            .send(Command::Stats(reply))
            .map_err(|_| BusError::Closed)?;
        stats.await.map_err(|_| BusError::Closed)
    }

    /// Close every registered stream and stop the hub.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// A subscription to one topic. Dropping it unsubscribes.
pub struct Stream {
    topic: String,
    id: u64,
    messages: mpsc::Receiver<Message>,
    commands: mpsc::UnboundedSender<Command>,
    registered: bool,
}

impl Stream {
    /// Next message, or `None` once the stream has been closed and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.messages.try_recv().ok()
    }

    /// Remove this stream from its topic and close it.
    ///
    /// Messages queued before the call can still be read; nothing published
    /// afterwards is delivered.
    pub async fn unsubscribe(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;

        let (ack, done) = oneshot::channel();
        let sent = self.commands.send(Command::Unsubscribe {
            topic: self.topic.clone(),
            id: self.id,
            ack: Some(ack),
        });
        if sent.is_ok() {
            // An error means the hub already stopped, which closes the stream too
            let _ = done.await;
        }
        self.messages.close();
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.registered {
            let _ = self.commands.send(Command::Unsubscribe {
                topic: std::mem::take(&mut self.topic),
                id: self.id,
                ack: None,
            });
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
