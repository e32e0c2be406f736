//! Event Bus (component C11, spec §4.11): a best-effort, at-least-once
//! topic/payload pub-sub used to fan call and campaign lifecycle events
//! out to whatever is listening (a status API, a log sink, metrics).
//!
//! Built on a broadcast channel rather than a custom registry — the
//! topics are a closed, small set (spec §4.11) and subscribers that
//! fall behind a bounded lag are expected to miss old events rather
//! than stall publishers, which is exactly `tokio::sync::broadcast`'s
//! behavior.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// The fixed topic set from spec §4.11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CallInitiated,
    CallRinging,
    CallAnswered,
    CallAmd,
    CallIvrProgress,
    CallEnded,
    CampaignProgress,
    SipStatus,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::CallInitiated => "call.initiated",
            Topic::CallRinging => "call.ringing",
            Topic::CallAnswered => "call.answered",
            Topic::CallAmd => "call.amd",
            Topic::CallIvrProgress => "call.ivr.progress",
            Topic::CallEnded => "call.ended",
            Topic::CampaignProgress => "campaign.progress",
            Topic::SipStatus => "sip.status",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: &'static str,
    pub payload: serde_json::Value,
}

/// A single broadcast channel shared by every topic; subscribers filter
/// by `Event::topic` themselves. Simpler than per-topic channels and
/// cheap enough at this event volume (spec §4.11 doesn't call for
/// per-topic backpressure).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, topic: Topic, payload: impl Serialize) {
        let payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        trace!(topic = topic.as_str(), "publishing event");
        // A publish with no subscribers is not an error (spec §4.11
        // best-effort delivery): `send` only fails when the receiver
        // count is zero.
        let _ = self.sender.send(Event {
            topic: topic.as_str(),
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Topic::CallAnswered, serde_json::json!({"call_id": "abc"}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "call.answered");
        assert_eq!(event.payload["call_id"], "abc");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(Topic::SipStatus, serde_json::json!({"registered": true}));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(Topic::CampaignProgress, serde_json::json!({"campaign_id": "c1"}));
        assert_eq!(rx1.recv().await.unwrap().topic, "campaign.progress");
        assert_eq!(rx2.recv().await.unwrap().topic, "campaign.progress");
    }
}
