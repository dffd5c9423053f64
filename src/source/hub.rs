//! Session-owned registry of sources and their subscribers.
//!
//! Several inputs may read the same physical source (e.g. one experiment
//! input for the accelerometer axes, another for its magnitude). The hub
//! starts a source when it gains its first subscriber, fans every emission out
//! to all current subscribers, and stops the source when the last one leaves.

use crate::descriptor::ConfigurationError;
use crate::source::types::{Emission, SampleSink, SampleSource, SourceRequest, SourceUnavailable};
use crate::timebase::EventClock;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct Subscriber {
    id: u64,
    receiver: String,
    handler: SampleSink,
}

type SubscriberSlots = Arc<RwLock<Vec<Option<Subscriber>>>>;

struct SourceEntry {
    source: Box<dyn SampleSource>,
    subscribers: SubscriberSlots,
    active: usize,
}

/// Handle returned by [`SensorHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    source: usize,
    slot: usize,
    id: u64,
}

/// Registry of sources shared by the inputs of one session.
pub struct SensorHub {
    clock: EventClock,
    sources: Vec<SourceEntry>,
    index: HashMap<String, usize>,
    next_id: u64,
}

impl SensorHub {
    pub fn new(clock: EventClock) -> Self {
        Self {
            clock,
            sources: Vec::new(),
            index: HashMap::new(),
            next_id: 0,
        }
    }

    /// Event clock shared by the hub's sources and the session.
    pub fn clock(&self) -> EventClock {
        self.clock
    }

    /// Register a source under its id.
    pub fn register(&mut self, source: Box<dyn SampleSource>) -> Result<(), ConfigurationError> {
        let id = source.id().to_string();
        if self.index.contains_key(&id) {
            return Err(ConfigurationError::DuplicateSource(id));
        }
        self.index.insert(id, self.sources.len());
        self.sources.push(SourceEntry {
            source,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            active: 0,
        });
        Ok(())
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.index.contains_key(source_id)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Subscribe `receiver` to a source, starting it if needed.
    ///
    /// The request of the first subscriber decides how the source is started.
    pub fn subscribe(
        &mut self,
        source_id: &str,
        receiver: &str,
        request: &SourceRequest,
        handler: SampleSink,
    ) -> Result<SubscriptionHandle, SourceUnavailable> {
        let Some(&source_index) = self.index.get(source_id) else {
            return Err(SourceUnavailable::new(source_id, "not registered"));
        };
        let id = self.next_id;
        self.next_id += 1;

        let entry = &mut self.sources[source_index];
        let slot = {
            let mut slots = entry.subscribers.write();
            let subscriber = Subscriber {
                id,
                receiver: receiver.to_string(),
                handler,
            };
            match slots.iter().position(Option::is_none) {
                Some(free) => {
                    slots[free] = Some(subscriber);
                    free
                }
                None => {
                    slots.push(Some(subscriber));
                    slots.len() - 1
                }
            }
        };

        if entry.active == 0 {
            let subscribers = Arc::clone(&entry.subscribers);
            let sink: SampleSink = Arc::new(move |emission: Emission| {
                for subscriber in subscribers.read().iter().flatten() {
                    (subscriber.handler)(emission.clone());
                }
            });
            if let Err(e) = entry.source.start(request, sink) {
                entry.subscribers.write()[slot] = None;
                tracing::warn!(source = source_id, "Source failed to start: {}", e);
                return Err(e);
            }
            tracing::info!(source = source_id, rate = request.rate, "Source started");
        }
        entry.active += 1;
        tracing::debug!(source = source_id, receiver, "Subscribed");

        Ok(SubscriptionHandle {
            source: source_index,
            slot,
            id,
        })
    }

    /// Remove a subscription, stopping the source if it was the last one.
    ///
    /// Unknown or already removed handles are ignored.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        let Some(entry) = self.sources.get_mut(handle.source) else {
            return;
        };
        let removed = {
            let mut slots = entry.subscribers.write();
            match slots.get_mut(handle.slot) {
                Some(slot) if slot.as_ref().map(|s| s.id) == Some(handle.id) => slot.take(),
                _ => None,
            }
        };
        let Some(subscriber) = removed else {
            return;
        };

        entry.active = entry.active.saturating_sub(1);
        tracing::debug!(source = entry.source.id(), receiver = %subscriber.receiver, "Unsubscribed");
        if entry.active == 0 {
            entry.source.stop();
            tracing::info!(source = entry.source.id(), "Source stopped");
        }
    }

    /// Number of live subscriptions on a source.
    pub fn subscriber_count(&self, source_id: &str) -> usize {
        self.index
            .get(source_id)
            .map_or(0, |&i| self.sources[i].active)
    }

    /// Stop every source and drop all subscriptions.
    pub fn stop_all(&mut self) {
        for entry in &mut self.sources {
            entry.subscribers.write().clear();
            if entry.active > 0 {
                entry.source.stop();
                entry.active = 0;
            }
        }
    }
}

impl Drop for SensorHub {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::synthetic::ManualSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: &Arc<AtomicUsize>) -> SampleSink {
        let counter = Arc::clone(counter);
        Arc::new(move |_: Emission| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fan_out_and_reference_counting() {
        let mut hub = SensorHub::new(EventClock::new());
        let (source, handle) = ManualSource::new("acc");
        hub.register(Box::new(source)).unwrap();

        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let request = SourceRequest::default();
        let sub_a = hub
            .subscribe("acc", "a", &request, counting_handler(&a))
            .unwrap();
        let sub_b = hub
            .subscribe("acc", "b", &request, counting_handler(&b))
            .unwrap();
        assert_eq!(hub.subscriber_count("acc"), 2);

        handle.emit(Emission::scalar(1.0, 0.0));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);

        hub.unsubscribe(sub_a);
        hub.unsubscribe(sub_a);
        assert!(handle.is_running());
        handle.emit(Emission::scalar(1.0, 0.1));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);

        hub.unsubscribe(sub_b);
        assert!(!handle.is_running());
        assert_eq!(hub.subscriber_count("acc"), 0);
    }

    #[test]
    fn test_unavailable_source_leaves_no_subscription() {
        let mut hub = SensorHub::new(EventClock::new());
        hub.register(Box::new(ManualSource::unavailable("gps")))
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let result = hub.subscribe(
            "gps",
            "input",
            &SourceRequest::default(),
            counting_handler(&counter),
        );
        assert!(result.is_err());
        assert_eq!(hub.subscriber_count("gps"), 0);
    }

    #[test]
    fn test_unknown_source_is_unavailable() {
        let mut hub = SensorHub::new(EventClock::new());
        let result = hub.subscribe("nope", "input", &SourceRequest::default(), Arc::new(|_: Emission| {}));
        assert_eq!(result.unwrap_err().source_id, "nope");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut hub = SensorHub::new(EventClock::new());
        let (first, _) = ManualSource::new("acc");
        let (second, _) = ManualSource::new("acc");
        hub.register(Box::new(first)).unwrap();
        assert!(matches!(
            hub.register(Box::new(second)),
            Err(ConfigurationError::DuplicateSource(_))
        ));
    }
}
