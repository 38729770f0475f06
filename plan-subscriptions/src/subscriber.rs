//! Subscription ownership.
//!
//! Any host entity can own subscriptions; the engine only ever sees an opaque
//! `(kind, id)` pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to the entity that owns a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberRef {
    /// Type tag chosen by the host, e.g. "user" or "team".
    pub kind: String,
    pub id: String,
}

impl SubscriberRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for SubscriberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Implemented by host entities that can hold subscriptions.
pub trait Subscriber {
    fn subscriber_ref(&self) -> SubscriberRef;
}

impl Subscriber for SubscriberRef {
    fn subscriber_ref(&self) -> SubscriberRef {
        self.clone()
    }
}
