use crate::session::{PlayerView, ResultView, SessionCode, SnapshotView};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

// Bounded so a stalled subscriber cannot grow memory; full channels get pruned.
const EVENT_CHANNEL_BUFFER: usize = 1000;

pub type EventSender = mpsc::Sender<RoomEvent>;
pub type EventReceiver = mpsc::Receiver<RoomEvent>;

pub struct EventSubscription {
    bus: EventBus,
    code: SessionCode,
    subscriber_id: usize,
    pub receiver: EventReceiver,
}

impl EventSubscription {
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Consume the subscription as a stream. The room membership lasts as
    /// long as the stream does.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = RoomEvent> + Send + 'static {
        futures_util::stream::unfold(self, |mut subscription| async move {
            let event = subscription.receiver.recv().await?;
            Some((event, subscription))
        })
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.code, self.subscriber_id);
    }
}

/// Publish/subscribe channel scoped to a session code.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

#[derive(Debug, Default)]
struct EventBusInner {
    subscribers: RwLock<HashMap<SessionCode, Vec<(usize, EventSender)>>>,
    next_id: AtomicUsize,
    published: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, code: SessionCode) -> EventSubscription {
        let (subscriber_id, receiver) = self.subscribe_raw(code.clone());
        EventSubscription {
            bus: self.clone(),
            code,
            subscriber_id,
            receiver,
        }
    }

    fn subscribe_raw(&self, code: SessionCode) -> (usize, EventReceiver) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        let mut guard = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.entry(code.clone()).or_default().push((id, tx));

        tracing::debug!(code = %code, subscriber_id = id, "subscribed to room");

        (id, rx)
    }

    /// Deliver `event` to every subscriber of `code`.
    ///
    /// Never blocks: a subscriber whose buffer is full or whose receiver is
    /// gone is dropped from the room.
    pub fn publish(&self, code: &str, event: RoomEvent) {
        tracing::debug!(code = %code, event = event.name(), "publishing room event");
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let subscribers = {
            let guard = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            guard.get(code).cloned()
        };

        let Some(list) = subscribers else {
            tracing::trace!(code = %code, "no subscribers for room");
            return;
        };

        let mut failed = Vec::new();
        for (id, sender) in list {
            if let Err(err) = sender.try_send(event.clone()) {
                tracing::warn!(
                    code = %code,
                    subscriber_id = id,
                    error = %err,
                    "dropping room subscriber"
                );
                failed.push(id);
            }
        }
        if !failed.is_empty() {
            self.remove_subscribers(code, &failed);
        }
    }

    pub fn unsubscribe(&self, code: &str, subscriber_id: usize) {
        self.remove_subscribers(code, &[subscriber_id]);
    }

    /// Release every subscription of a room. Receivers drain what was
    /// already delivered and then observe the channel closing.
    pub fn drop_room(&self, code: &str) {
        let mut guard = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.remove(code);
    }

    pub fn subscriber_count(&self) -> usize {
        let guard = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        guard.values().map(|list| list.len()).sum()
    }

    pub fn room_subscriber_count(&self, code: &str) -> usize {
        let guard = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        guard.get(code).map(Vec::len).unwrap_or(0)
    }

    pub fn published_count(&self) -> usize {
        self.inner.published.load(Ordering::Relaxed)
    }

    fn remove_subscribers(&self, code: &str, ids: &[usize]) {
        let mut guard = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = guard.get_mut(code) {
            list.retain(|(id, _)| !ids.contains(id));
            if list.is_empty() {
                guard.remove(code);
            }
        }
    }
}

/// Everything a room member can be told about a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    SessionSnapshot {
        code: SessionCode,
        snapshot: Box<SnapshotView>,
    },
    ActionApplied {
        code: SessionCode,
        seat: &'static str,
        turn: u32,
        effect: serde_json::Value,
        /// Set when the action was chosen by the server (timeout fallback or bot).
        automatic: bool,
    },
    PhaseChanged {
        code: SessionCode,
        phase: &'static str,
        turn: u32,
        awaiting: Vec<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        deadline: Option<DateTime<Utc>>,
    },
    ParticipantJoined {
        code: SessionCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        seat: Option<&'static str>,
        player: PlayerView,
    },
    ParticipantDisconnected {
        code: SessionCode,
        seat: &'static str,
        player: PlayerView,
        at: DateTime<Utc>,
    },
    ParticipantReconnected {
        code: SessionCode,
        seat: &'static str,
        player: PlayerView,
    },
    ObserverLeft {
        code: SessionCode,
        player: PlayerView,
    },
    DrawOffered {
        code: SessionCode,
        seat: &'static str,
    },
    DrawDeclined {
        code: SessionCode,
        seat: &'static str,
    },
    AbandonmentClaimable {
        code: SessionCode,
        seat: &'static str,
    },
    Chat {
        code: SessionCode,
        player: PlayerView,
        message: String,
        at: DateTime<Utc>,
    },
    SessionTerminal {
        code: SessionCode,
        result: ResultView,
    },
    SessionReset {
        code: SessionCode,
        match_number: u32,
    },
    SessionTorndown {
        code: SessionCode,
        reason: String,
    },
    Error {
        code: SessionCode,
        error: String,
        message: String,
    },
}

impl RoomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::SessionSnapshot { .. } => "session_snapshot",
            RoomEvent::ActionApplied { .. } => "action_applied",
            RoomEvent::PhaseChanged { .. } => "phase_changed",
            RoomEvent::ParticipantJoined { .. } => "participant_joined",
            RoomEvent::ParticipantDisconnected { .. } => "participant_disconnected",
            RoomEvent::ParticipantReconnected { .. } => "participant_reconnected",
            RoomEvent::ObserverLeft { .. } => "observer_left",
            RoomEvent::DrawOffered { .. } => "draw_offered",
            RoomEvent::DrawDeclined { .. } => "draw_declined",
            RoomEvent::AbandonmentClaimable { .. } => "abandonment_claimable",
            RoomEvent::Chat { .. } => "chat",
            RoomEvent::SessionTerminal { .. } => "session_terminal",
            RoomEvent::SessionReset { .. } => "session_reset",
            RoomEvent::SessionTorndown { .. } => "session_torndown",
            RoomEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(code: &str, message: &str) -> RoomEvent {
        RoomEvent::Chat {
            code: code.to_string(),
            player: PlayerView {
                id: "p".into(),
                name: "P".into(),
                bot: false,
            },
            message: message.to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn subscription_drop_unsubscribes() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe("ABC123".to_string());
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn publish_reaches_all_room_subscribers_only() {
        let bus = EventBus::new();
        let mut sub1 = bus.subscribe("room-a".to_string());
        let mut sub2 = bus.subscribe("room-a".to_string());
        let mut other = bus.subscribe("room-b".to_string());

        bus.publish("room-a", chat("room-a", "hello"));

        assert!(matches!(sub1.receiver.try_recv(), Ok(RoomEvent::Chat { .. })));
        assert!(matches!(sub2.receiver.try_recv(), Ok(RoomEvent::Chat { .. })));
        assert!(other.receiver.try_recv().is_err());
        assert_eq!(bus.published_count(), 1);
    }

    #[test]
    fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("room".to_string());
        for n in 0..5 {
            bus.publish("room", chat("room", &n.to_string()));
        }
        for n in 0..5 {
            match sub.receiver.try_recv() {
                Ok(RoomEvent::Chat { message, .. }) => assert_eq!(message, n.to_string()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn stale_receiver_is_pruned() {
        let bus = EventBus::new();
        let (id, rx) = bus.subscribe_raw("room".to_string());
        drop(rx);
        bus.publish("room", chat("room", "gone"));
        assert_eq!(bus.subscriber_count(), 0);
        bus.unsubscribe("room", id);
    }

    #[test]
    fn drop_room_closes_receivers_after_buffered_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("room".to_string());
        bus.publish("room", chat("room", "last words"));
        bus.drop_room("room");

        assert!(matches!(sub.receiver.try_recv(), Ok(RoomEvent::Chat { .. })));
        assert!(matches!(
            sub.receiver.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(bus.room_subscriber_count("room"), 0);
    }

    #[test]
    fn events_serialize_with_snake_case_type_tag() {
        let json = serde_json::to_value(chat("room", "hi")).expect("serialize");
        assert_eq!(json["type"], "chat");
        assert_eq!(json["code"], "room");
        assert_eq!(json["player"]["name"], "P");
    }
}
