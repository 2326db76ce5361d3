//! Publish/Subscribe
//!
//! The [`Broker`] is the only shared pub/sub state. Connections call
//! `subscribe`, `unsubscribe` and `publish`; each subscription's delivery
//! loop lives in the connection module.

pub mod broker;

pub use broker::{Broker, SubscriberId, Subscription, DEFAULT_MAILBOX_CAPACITY};
