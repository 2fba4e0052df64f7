//! Progress events and cache invalidation fan-out.
//!
//! ## Architecture
//!
//! ```text
//! +-----------+     +----------+     +---------------------+
//! | XpAwarder | --> | EventBus | --> | ProgressAggregator  |
//! | Content   |     | (fanout) |     | UserStatsReader ... |
//! +-----------+     +----------+     +---------------------+
//! ```
//!
//! Publishers never name the readers whose caches go stale; each reader
//! subscribes and evicts its own entries. Dispatch is synchronous, so by the
//! time `publish` returns every subscriber has dropped its stale data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// State change that may make cached aggregates stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// Lesson completion state (and XP) changed for a user
    ProgressChanged { user_id: i64 },
    /// Only the user's XP total changed
    XpChanged { user_id: i64 },
    /// Lesson membership of the catalogue changed, affecting every user
    CatalogChanged,
}

impl ProgressEvent {
    /// The user whose records changed, `None` for catalogue-wide changes
    pub fn user_id(&self) -> Option<i64> {
        match self {
            ProgressEvent::ProgressChanged { user_id } | ProgressEvent::XpChanged { user_id } => {
                Some(*user_id)
            }
            ProgressEvent::CatalogChanged => None,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::ProgressChanged { user_id } => {
                write!(f, "progress-changed({})", user_id)
            }
            ProgressEvent::XpChanged { user_id } => write!(f, "xp-changed({})", user_id),
            ProgressEvent::CatalogChanged => write!(f, "catalog-changed"),
        }
    }
}

/// Reader that owns cached state derived from progress records
pub trait ProgressSubscriber: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Synchronous in-process event fan-out
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn ProgressSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ProgressSubscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(subscriber);
    }

    pub fn publish(&self, event: ProgressEvent) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        tracing::debug!(%event, subscribers = subscribers.len(), "Publishing progress event");
        for subscriber in subscribers {
            subscriber.on_event(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSubscriber for Recorder {
        fn on_event(&self, event: &ProgressEvent) {
            self.seen.lock().unwrap().push(*event);
        }
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());

        bus.publish(ProgressEvent::XpChanged { user_id: 4 });
        bus.publish(ProgressEvent::ProgressChanged { user_id: 4 });

        assert_eq!(a.seen.lock().unwrap().len(), 2);
        assert_eq!(
            b.seen.lock().unwrap()[1],
            ProgressEvent::ProgressChanged { user_id: 4 }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish(ProgressEvent::XpChanged { user_id: 1 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(
            ProgressEvent::ProgressChanged { user_id: 3 }.to_string(),
            "progress-changed(3)"
        );
        assert_eq!(ProgressEvent::XpChanged { user_id: 3 }.user_id(), Some(3));
        assert_eq!(ProgressEvent::CatalogChanged.to_string(), "catalog-changed");
        assert_eq!(ProgressEvent::CatalogChanged.user_id(), None);
    }
}
