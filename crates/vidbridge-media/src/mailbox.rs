//! Single-slot handoff between the demux thread and the transport consumer.
//!
//! The slot holds at most one NAL unit. Publishing while the previous unit
//! is still unconsumed replaces it: real-time delivery wants the newest
//! unit, not every unit. The replaced unit is handed back to the publisher
//! so the drop is explicit.

use crate::h264::{NalUnit, TransportBuffer};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Notifier = Arc<dyn Fn() + Send + Sync>;

/// Bounded-size-1 mailbox with replace semantics.
#[derive(Default)]
pub struct NalMailbox {
    slot: Mutex<Option<NalUnit>>,
    notifier: RwLock<Option<Notifier>>,
    published: AtomicU64,
    replaced: AtomicU64,
}

impl NalMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `unit`, returning the unconsumed unit it displaced, if any.
    ///
    /// The notifier runs after the lock is released.
    pub fn replace(&self, unit: NalUnit) -> Option<NalUnit> {
        let displaced = self.slot.lock().replace(unit);
        self.published.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            self.replaced.fetch_add(1, Ordering::Relaxed);
        }

        let notifier = self.notifier.read().clone();
        if let Some(notify) = notifier {
            notify();
        }
        displaced
    }

    /// Remove and return the held unit. Never blocks waiting for data.
    pub fn take(&self) -> Option<NalUnit> {
        self.slot.lock().take()
    }

    /// Take the held unit and frame it for the transport.
    pub fn pull(&self) -> Option<TransportBuffer> {
        self.take().map(|unit| unit.to_transport())
    }

    /// Whether a unit is waiting.
    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Install a hook called after every publish.
    pub fn set_notifier<F>(&self, notify: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.notifier.write() = Some(Arc::new(notify));
    }

    pub fn clear_notifier(&self) {
        *self.notifier.write() = None;
    }

    /// Units published so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Units dropped because a newer one replaced them before a pull.
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for NalMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NalMailbox")
            .field("pending", &self.has_pending())
            .field("published", &self.published())
            .field("replaced", &self.replaced())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h264::NalUnitType;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    fn unit(byte: u8, timestamp: u64) -> NalUnit {
        NalUnit {
            payload: Bytes::from(vec![byte, 0xAB]),
            nal_type: NalUnitType::from_header_byte(byte),
            timestamp,
            marker: true,
        }
    }

    #[test]
    fn test_pull_empty_returns_none() {
        let mailbox = NalMailbox::new();
        assert!(mailbox.pull().is_none());
    }

    #[test]
    fn test_second_unit_overwrites_first() {
        let mailbox = NalMailbox::new();
        assert!(mailbox.replace(unit(0x65, 1)).is_none());
        let displaced = mailbox.replace(unit(0x41, 2)).unwrap();
        assert_eq!(displaced.timestamp, 1);

        let buf = mailbox.pull().unwrap();
        assert_eq!(buf.timestamp, 2);
        assert_eq!(buf.nal_bytes(), &[0, 0, 0, 1, 0x41, 0xAB]);
        assert!(mailbox.pull().is_none());
        assert_eq!(mailbox.replaced(), 1);
        assert_eq!(mailbox.published(), 2);
    }

    #[test]
    fn test_notifier_fires_per_publish() {
        let mailbox = NalMailbox::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        mailbox.set_notifier(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        mailbox.replace(unit(0x67, 0));
        mailbox.replace(unit(0x68, 0));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        mailbox.clear_notifier();
        mailbox.replace(unit(0x65, 0));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_notifier_may_pull_without_deadlock() {
        let mailbox = Arc::new(NalMailbox::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mb, sink) = (Arc::clone(&mailbox), Arc::clone(&seen));
        mailbox.set_notifier(move || {
            if let Some(buf) = mb.pull() {
                sink.lock().push(buf.timestamp);
            }
        });

        for ts in 0..5 {
            mailbox.replace(unit(0x41, ts));
        }
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(mailbox.replaced(), 0);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let mailbox = Arc::new(NalMailbox::new());
        let producer = {
            let mailbox = Arc::clone(&mailbox);
            std::thread::spawn(move || {
                for ts in 0..10_000u64 {
                    mailbox.replace(unit(0x41, ts));
                }
            })
        };

        let mut last = None;
        while !producer.is_finished() || mailbox.has_pending() {
            if let Some(buf) = mailbox.pull() {
                if let Some(prev) = last {
                    assert!(buf.timestamp > prev);
                }
                last = Some(buf.timestamp);
            }
        }
        producer.join().unwrap();
        assert_eq!(mailbox.published(), 10_000);
    }
}
