//! Domain events published after a lifecycle transaction commits.

use crate::Subscription;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubscriptionEvent {
    NewSubscription {
        subscription: Subscription,
    },
    SubscriptionCancelled {
        subscription: Subscription,
    },
    SubscriptionRenewed {
        subscription: Subscription,
    },
    SubscriptionPlanChanged {
        old: Subscription,
        new: Subscription,
    },
}

impl SubscriptionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewSubscription { .. } => "new_subscription",
            Self::SubscriptionCancelled { .. } => "subscription_cancelled",
            Self::SubscriptionRenewed { .. } => "subscription_renewed",
            Self::SubscriptionPlanChanged { .. } => "subscription_plan_changed",
        }
    }

    /// The subscription the event is about; the new one for plan changes.
    pub fn subscription(&self) -> &Subscription {
        match self {
            Self::NewSubscription { subscription }
            | Self::SubscriptionCancelled { subscription }
            | Self::SubscriptionRenewed { subscription } => subscription,
            Self::SubscriptionPlanChanged { new, .. } => new,
        }
    }
}

/// Receives events once the owning transaction has committed.
///
/// Delivery is fire-and-forget: a sink cannot fail the operation that
/// produced the event.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SubscriptionEvent);
}

/// Logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SubscriptionEvent) {
        let subscription = event.subscription();
        tracing::info!(
            event = event.name(),
            subscription_id = %subscription.id,
            subscriber = %subscription.subscriber,
            plan_id = %subscription.plan_id,
            "subscription event"
        );
    }
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SubscriptionEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SubscriptionEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(SubscriptionEvent::name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: SubscriptionEvent) {
        tracing::debug!(event = event.name(), "recording subscription event");
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Amount, Plan, SubscriberRef};
    use chrono::Utc;

    #[test]
    fn test_recording_sink_keeps_order() {
        let plan = Plan::new("Pro", Amount::from_int(10));
        let now = Utc::now();
        let first = Subscription::start(SubscriberRef::new("user", "1"), &plan, None, now).unwrap();
        let second = Subscription::start(SubscriberRef::new("user", "1"), &plan, None, now).unwrap();

        let sink = RecordingEventSink::new();
        assert!(sink.is_empty());
        sink.emit(SubscriptionEvent::NewSubscription {
            subscription: first.clone(),
        });
        sink.emit(SubscriptionEvent::SubscriptionPlanChanged {
            old: first,
            new: second.clone(),
        });

        assert_eq!(sink.names(), vec!["new_subscription", "subscription_plan_changed"]);
        assert_eq!(sink.events()[1].subscription().id, second.id);

        sink.clear();
        assert_eq!(sink.len(), 0);
    }
}
