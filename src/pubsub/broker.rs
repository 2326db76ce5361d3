//! Topic Registry and Fan-out
//!
//! The broker maps a topic name to the mailboxes currently subscribed to it.
//! A mailbox is a bounded Tokio channel; the receiving half belongs to the
//! subscriber, the sending half stays in the registry.
//!
//! ```text
//!   PUBLISH news "hi"
//!         │
//!         ▼
//!  ┌──────────────┐   try_send   ┌───────────┐
//!  │ "news" ──────┼─────────────>│ mailbox 1 │──> delivery task (conn A)
//!  │        ──────┼─────────────>│ mailbox 7 │──> delivery task (conn B)
//!  │ "sports" ... │              └───────────┘
//!  └──────────────┘
//! ```
//!
//! Publishing never blocks. A full mailbox misses the message and is not
//! counted; a closed mailbox is removed from its topic. Topics with no
//! subscribers left are pruned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// Default number of undelivered messages a mailbox can hold.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Identifies one registration. Unique for the lifetime of a broker.
pub type SubscriberId = u64;

type Topics = HashMap<String, HashMap<SubscriberId, mpsc::Sender<String>>>;

/// A single registration returned by [`Broker::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub topic: String,
    /// Messages published to `topic` after the registration, in publish order
    pub receiver: mpsc::Receiver<String>,
}

/// The pub/sub topic registry shared by all connections.
#[derive(Debug)]
pub struct Broker {
    topics: Mutex<Topics>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

impl Broker {
    /// Creates a broker whose mailboxes hold up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn topics(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new mailbox for `topic`.
    ///
    /// Every call creates an independent registration, even for a topic the
    /// caller is already subscribed to.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        self.topics()
            .entry(topic.to_owned())
            .or_default()
            .insert(id, tx);

        debug!(topic = %topic, subscriber = id, "Subscriber registered");

        Subscription {
            id,
            topic: topic.to_owned(),
            receiver: rx,
        }
    }

    /// Removes a registration. Unknown topics or ids are ignored.
    ///
    /// # Returns
    /// `true` if a registration was removed.
    pub fn unsubscribe(&self, topic: &str, id: SubscriberId) -> bool {
        let mut topics = self.topics();
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };

        let removed = subscribers.remove(&id).is_some();
        if subscribers.is_empty() {
            topics.remove(topic);
        }

        if removed {
            debug!(topic = %topic, subscriber = id, "Subscriber removed");
        }
        removed
    }

    /// Delivers `message` to every mailbox currently subscribed to `topic`.
    ///
    /// # Returns
    /// The number of mailboxes that accepted the message.
    pub fn publish(&self, topic: &str, message: &str) -> usize {
        let mut topics = self.topics();
        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        let mut closed = Vec::new();

        for (&id, tx) in subscribers.iter() {
            match tx.try_send(message.to_owned()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!(topic = %topic, subscriber = id, "Mailbox full, message dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            subscribers.remove(&id);
        }
        if subscribers.is_empty() {
            topics.remove(topic);
        }

        delivered
    }

    /// Number of live registrations for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics().get(topic).map(HashMap::len).unwrap_or(0)
    }

    /// Number of topics with at least one registration.
    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }
}
