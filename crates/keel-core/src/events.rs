//! In-process event bus.
//!
//! Components publish [`SyncEvent`]s; front ends subscribe to show notices or
//! refresh views. Publishing never blocks and never fails.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::CollectionKind;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Action a front end may offer alongside a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeAction {
    Retry,
}

/// User-visible message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub action: Option<NoticeAction>,
    /// Stays visible until the condition clears
    pub persistent: bool,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action: None,
            persistent: false,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }

    #[must_use]
    pub fn with_retry(mut self) -> Self {
        self.action = Some(NoticeAction::Retry);
        self
    }

    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    Notice(Notice),
    #[serde(rename_all = "camelCase")]
    ConnectivityChanged { online: bool },
    /// Stored data changed; `None` means every collection
    #[serde(rename_all = "camelCase")]
    DataChanged { collection: Option<CollectionKind> },
    /// A queue pass finished
    #[serde(rename_all = "camelCase")]
    QueueDrained {
        succeeded: usize,
        failed: usize,
        dropped: usize,
        remaining: usize,
    },
    #[serde(rename_all = "camelCase")]
    OperationDropped {
        operation_id: String,
        endpoint: String,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    SyncCompleted {
        collection: Option<CollectionKind>,
        conflicts: usize,
    },
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver to current subscribers. Without subscribers the event is dropped.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    pub fn notify(&self, notice: Notice) {
        self.publish(SyncEvent::Notice(notice));
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving side of the bus. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<SyncEvent>,
}

impl Subscription {
    /// Next event, skipping any missed while lagging. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("event subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event, if any.
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    /// Every event published so far and not yet received.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(SyncEvent::ConnectivityChanged { online: false });
        bus.notify(Notice::error("Sync failed").with_retry());

        let expected = vec![
            SyncEvent::ConnectivityChanged { online: false },
            SyncEvent::Notice(Notice {
                level: NoticeLevel::Error,
                message: "Sync failed".into(),
                action: Some(NoticeAction::Retry),
                persistent: false,
            }),
        ];
        assert_eq!(first.drain(), expected);
        assert_eq!(second.drain(), expected);
    }

    #[test]
    fn unsubscribe_detaches_receiver() {
        let bus = EventBus::default();
        let subscription = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        subscription.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(SyncEvent::DataChanged { collection: None });
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(SyncEvent::DataChanged {
            collection: Some(CollectionKind::Tasks),
        })
        .unwrap();
        assert_eq!(value["event"], "dataChanged");
        assert_eq!(value["collection"], "tasks");
    }
}
