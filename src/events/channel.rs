//! Event channel built on crossbeam-channel.
//!
//! Batch runs report through an `EventSender`; whoever holds the matching
//! `EventReceiver` (the CLI progress bar, a test) drains it.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::{BatchEvent, Event, RecordEvent};

/// Sending half, cloneable across rayon workers.
///
/// Sends never fail: once the receiver is gone, events are dropped and
/// the run carries on without progress reporting.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    /// Wrap a raw crossbeam sender
    pub fn new(sender: Sender<Event>) -> Self {
        Self { inner: sender }
    }

    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }

    pub fn batch(&self, event: BatchEvent) {
        self.send(Event::Batch(event));
    }

    pub fn record(&self, event: RecordEvent) {
        self.send(Event::Record(event));
    }
}

/// Receiving half
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event; `None` once every sender is dropped
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Blocking iterator that ends when every sender is dropped
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }

    /// Everything queued right now, without blocking
    pub fn drain(&self) -> Vec<Event> {
        self.inner.try_iter().collect()
    }
}

/// Constructors for sender/receiver pairs
pub struct EventChannel;

impl EventChannel {
    /// Unbounded channel; batch events are small and infrequent
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }

    /// Bounded channel, for listeners that need backpressure
    pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }
}

/// A sender nobody listens to
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::RecordId;
    use crate::events::BatchProgress;
    use std::thread;

    #[test]
    fn events_can_be_sent_across_threads() {
        let (sender, receiver) = EventChannel::new();

        let handle = thread::spawn(move || {
            sender.batch(BatchEvent::Progress(BatchProgress {
                batch: 1,
                batches: 3,
                processed: 25,
                total: 75,
                failures: 0,
            }));
        });

        handle.join().unwrap();

        match receiver.recv().unwrap() {
            Event::Batch(BatchEvent::Progress(p)) => assert_eq!(p.processed, 25),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn null_sender_does_not_panic() {
        let sender = null_sender();
        sender.record(RecordEvent::Deferred { record: RecordId(1) });
    }

    #[test]
    fn drain_returns_queued_events_in_order() {
        let (sender, receiver) = EventChannel::bounded(2);

        sender.batch(BatchEvent::ResetApplied { records: 1 });
        sender.record(RecordEvent::Deferred { record: RecordId(7) });

        let events = receiver.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Batch(BatchEvent::ResetApplied { records: 1 })));
        assert!(matches!(events[1], Event::Record(RecordEvent::Deferred { .. })));
        assert!(receiver.try_recv().is_none());
    }
}
