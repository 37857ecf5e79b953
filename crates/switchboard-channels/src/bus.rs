//! Named publish/subscribe channels and the hub that owns them
//!
//! Delivery is at-most-once and in-memory only: a subscriber that registers
//! after a publish never sees that message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{BusError, Result};
use crate::message::Message;

/// Which messages a subscription receives
#[derive(Clone)]
pub enum Filter {
    /// Every message on the channel
    Any,
    /// Messages whose `type` equals the given name
    Type(String),
    /// Messages whose `target` equals the given name
    Target(String),
    /// Arbitrary predicate
    Custom(Arc<dyn Fn(&Message) -> bool + Send + Sync>),
}

impl Filter {
    pub fn of_type(kind: impl Into<String>) -> Self {
        Self::Type(kind.into())
    }

    pub fn targeting(target: impl Into<String>) -> Self {
        Self::Target(target.into())
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, msg: &Message) -> bool {
        match self {
            Self::Any => true,
            Self::Type(kind) => msg.kind == *kind,
            Self::Target(target) => msg.target.as_deref() == Some(target.as_str()),
            Self::Custom(predicate) => predicate(msg),
        }
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Type(kind) => write!(f, "Type({})", kind),
            Self::Target(target) => write!(f, "Target({})", target),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

struct Subscriber {
    id: String,
    agent: String,
    filter: Filter,
    tx: mpsc::UnboundedSender<Message>,
}

struct ChannelInner {
    name: String,
    subscribers: RwLock<Vec<Subscriber>>,
    closed: AtomicBool,
}

/// A named topic. Cheap to clone; all clones share one subscriber list.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                subscribers: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Deliver a message to every matching subscriber without waiting for
    /// any of them to process it. Returns the number of deliveries.
    pub fn publish(&self, msg: Message) -> Result<usize> {
        if self.is_closed() {
            return Err(BusError::ChannelClosed(self.inner.name.clone()));
        }

        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut delivered = 0;
        for sub in subscribers.iter().filter(|s| s.filter.matches(&msg)) {
            if sub.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(
                    "Subscriber {} ({}) on '{}' is gone, skipping",
                    sub.id, sub.agent, self.inner.name
                );
            }
        }

        debug!(
            "Published {} message {} on '{}' to {} subscriber(s)",
            msg.kind, msg.id, self.inner.name, delivered
        );
        Ok(delivered)
    }

    /// Register a new receiving end on this channel
    pub fn subscribe(&self, agent: &str, filter: Filter) -> Result<Subscription> {
        if self.is_closed() {
            return Err(BusError::ChannelClosed(self.inner.name.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = format!("sub_{}_{}", self.inner.name, uuid::Uuid::new_v4());

        debug!(
            "Agent {} subscribed to '{}' with filter {:?} ({})",
            agent, self.inner.name, filter, id
        );
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id: id.clone(),
                agent: agent.to_string(),
                filter,
                tx,
            });

        Ok(Subscription {
            id,
            channel: self.inner.name.clone(),
            rx,
        })
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscription_id);
        let removed = subscribers.len() != before;
        if removed {
            debug!("Unsubscribed {} from '{}'", subscription_id, self.inner.name);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the channel and drop every subscriber sender, which ends the
    /// receiving loops on the other side.
    pub(crate) fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Closed channel '{}'", self.inner.name);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("subscriber_count", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving end of a channel subscription
pub struct Subscription {
    id: String,
    channel: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message. Returns None once the channel is closed
    /// or the subscription has been removed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

/// Registry of every channel in the process.
///
/// Replaces a global channel singleton: the runtime builds one hub and hands
/// clones of it (or of its channels) to whoever needs them.
#[derive(Clone, Default)]
pub struct ChannelHub {
    channels: Arc<DashMap<String, Channel>>,
    stopped: Arc<AtomicBool>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the channel with this name, creating it on first use
    pub fn channel(&self, name: &str) -> Result<Channel> {
        if self.is_stopped() {
            return Err(BusError::HubStopped);
        }
        let channel = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Created channel '{}'", name);
                Channel::new(name)
            })
            .clone();
        // A stop() racing the insert may have missed this channel
        if self.is_stopped() {
            channel.close();
            return Err(BusError::HubStopped);
        }
        Ok(channel)
    }

    pub fn get(&self, name: &str) -> Option<Channel> {
        self.channels.get(name).map(|c| c.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Close every channel. Safe to call more than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Channel hub already stopped");
            return;
        }
        info!("Stopping {} channel(s)", self.channels.len());
        for entry in self.channels.iter() {
            entry.value().close();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ChannelHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHub")
            .field("channels", &self.names())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
