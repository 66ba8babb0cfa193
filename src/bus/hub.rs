use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::topic::is_fire_once;
use super::{BusStats, Command, Message};
use crate::config::BusConfig;

/// Upper bound on how often expired backlogs are looked for
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Undelivered messages of a fire-once topic
struct Backlog {
    messages: VecDeque<Message>,
    touched: Instant,
}

/// Routing state, owned exclusively by the hub task.
pub(super) struct Hub {
    config: BusConfig,
    next_id: u64,
    subscribers: HashMap<String, HashMap<u64, mpsc::Sender<Message>>>,
    backlogs: HashMap<String, Backlog>,
}

impl Hub {
    pub(super) fn new(config: BusConfig) -> Self {
        Self {
            config,
            next_id: 0,
            subscribers: HashMap::new(),
            backlogs: HashMap::new(),
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Hub opened");
        let sweep_every = self.config.backlog_ttl.clamp(Duration::from_millis(10), MAX_SWEEP_INTERVAL);
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = sweep.tick() => self.sweep_backlogs(),
            }
        }

        // Dropping the senders ends every stream
        let closed: usize = self.subscribers.values().map(HashMap::len).sum();
        self.subscribers.clear();
        debug!(closed, "Hub closed");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe { topic, reply } => self.subscribe(topic, reply),
            Command::Unsubscribe { topic, id, ack } => {
                self.unsubscribe(&topic, id);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Publish(message) => self.publish(message),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown => {}
        }
    }

    fn subscribe(
        &mut self,
        topic: String,
        reply: tokio::sync::oneshot::Sender<(u64, mpsc::Receiver<Message>)>,
    ) {
        debug!(topic = %topic, "Subscribe");
        let pending = self.backlogs.get(&topic).map_or(0, |b| b.messages.len());

        // Room for the whole backlog, so flushing it can never overflow
        let capacity = self.config.subscriber_capacity.max(pending).max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let id = self.next_id;
        self.next_id += 1;

        // The backlog stays put until someone is actually there to take it
        if reply.send((id, rx)).is_err() {
            debug!(topic = %topic, "Subscriber went away before registration");
            return;
        }

        if let Some(backlog) = self.backlogs.remove(&topic) {
            debug!(topic = %topic, count = pending, "Push waiting events");
            for message in backlog.messages {
                let _ = tx.try_send(message);
            }
        }
        self.subscribers.entry(topic).or_default().insert(id, tx);
    }

    fn unsubscribe(&mut self, topic: &str, id: u64) {
        if let Some(subs) = self.subscribers.get_mut(topic) {
            if subs.remove(&id).is_some() {
                debug!(topic, subscriber = id, "Unsubscribe");
            }
            if subs.is_empty() {
                self.subscribers.remove(topic);
            }
        }
    }

    fn publish(&mut self, message: Message) {
        let Some(subs) = self.subscribers.get_mut(&message.topic) else {
            self.no_subscribers(message);
            return;
        };

        debug!(topic = %message.topic, subscribers = subs.len(), "Hub message");
        subs.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    topic = %message.topic,
                    subscriber = id,
                    "Subscriber queue full, dropping message"
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(topic = %message.topic, subscriber = id, "Subscriber gone");
                false
            }
        });

        if subs.is_empty() {
            self.subscribers.remove(&message.topic);
        }
    }

    fn no_subscribers(&mut self, message: Message) {
        if !is_fire_once(&message.topic) {
            warn!(topic = %message.topic, "No subscribers for topic");
            return;
        }

        let limit = self.config.backlog_limit.max(1);
        let backlog = self
            .backlogs
            .entry(message.topic.clone())
            .or_insert_with(|| Backlog {
                messages: VecDeque::new(),
                touched: Instant::now(),
            });

        if backlog.messages.len() >= limit {
            backlog.messages.pop_front();
            warn!(topic = %message.topic, limit, "Backlog full, dropping oldest message");
        }
        backlog.messages.push_back(message);
        backlog.touched = Instant::now();
    }

    fn sweep_backlogs(&mut self) {
        let ttl = self.config.backlog_ttl;
        self.backlogs.retain(|topic, backlog| {
            let keep = backlog.touched.elapsed() < ttl;
            if !keep {
                warn!(
                    topic = %topic,
                    dropped = backlog.messages.len(),
                    "Discarding backlog nobody subscribed to"
                );
            }
            keep
        });
    }

    fn stats(&self) -> BusStats {
        BusStats {
            topics: self.subscribers.len(),
            subscribers: self.subscribers.values().map(HashMap::len).sum(),
            backlog_topics: self.backlogs.len(),
            backlog_messages: self.backlogs.values().map(|b| b.messages.len()).sum(),
        }
    }
}
