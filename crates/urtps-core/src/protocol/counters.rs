//! Lock-free traffic counters for a running engine.
//!
//! The engine loops bump these counters from the scheduler thread while the
//! embedding application reads them from its own thread, so each counter is an
//! `AtomicU64`. `Ordering::Relaxed` is enough: the values are observability
//! data and never used to synchronise other memory.

use std::sync::atomic::{AtomicU64, Ordering};

/// A single monotonically increasing counter.
///
/// Wraps from `u64::MAX` back to 0 without panicking.
#[derive(Debug, Default)]
pub struct Counter {
    inner: AtomicU64,
}

impl Counter {
    /// Creates a new counter starting at 0.
    pub const fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Adds one and returns the value before the increment.
    pub fn incr(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without incrementing.
    pub fn get(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

/// All traffic counters kept by one engine.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    /// Datagrams read from the transport.
    pub frames_received: Counter,
    /// Frames written into a subscribing node.
    pub frames_delivered: Counter,
    /// Frames whose topic matched no subscribing node.
    pub unknown_topics: Counter,
    /// Datagrams dropped because they could not be decoded.
    pub decode_errors: Counter,
    /// Frames handed to the transport for sending.
    pub frames_sent: Counter,
    /// Transport receive/send failures other than would-block.
    pub io_errors: Counter,
}

/// A point-in-time copy of [`TrafficCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub frames_received: u64,
    pub frames_delivered: u64,
    pub unknown_topics: u64,
    pub decode_errors: u64,
    pub frames_sent: u64,
    pub io_errors: u64,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every counter. Values are read one by one, so a snapshot taken
    /// while the engine runs may mix counts from adjacent passes.
    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            frames_received: self.frames_received.get(),
            frames_delivered: self.frames_delivered.get(),
            unknown_topics: self.unknown_topics.get(),
            decode_errors: self.decode_errors.get(),
            frames_sent: self.frames_sent.get(),
            io_errors: self.io_errors.get(),
        }
    }
}
