//! Bandwidth accounting for a link: bytes and frames per direction, plus
//! what the unreliable lane lost or shuffled.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::Channel;

// ---------------------------------------------------------------------------
// NetworkCounters
// ---------------------------------------------------------------------------

/// Live counters for one endpoint.
///
/// Atomics so a counters handle can be shared with a diagnostics thread
/// without locking.
#[derive(Debug, Default)]
pub struct NetworkCounters {
    /// Wire bytes handed to the link.
    pub bytes_sent: AtomicU64,
    /// Wire bytes taken off the link.
    pub bytes_received: AtomicU64,
    /// Frames sent on the reliable channel.
    pub reliable_sent: AtomicU64,
    /// Frames sent on the unreliable channel (including dropped ones).
    pub unreliable_sent: AtomicU64,
    /// Frames received.
    pub messages_received: AtomicU64,
    /// Unreliable frames the link discarded.
    pub frames_dropped: AtomicU64,
    /// Unreliable frames delivered behind a later one.
    pub frames_reordered: AtomicU64,
}

impl NetworkCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outgoing frame.
    pub fn record_send(&self, channel: Channel, wire_bytes: u64) {
        self.bytes_sent.fetch_add(wire_bytes, Ordering::Relaxed);
        let counter = match channel {
            Channel::ReliableOrdered => &self.reliable_sent,
            Channel::UnreliableUnordered => &self.unreliable_sent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an incoming frame.
    pub fn record_receive(&self, wire_bytes: u64) {
        self.bytes_received.fetch_add(wire_bytes, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame the lossy lane discarded.
    pub fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame the lossy lane delivered late.
    pub fn record_reorder(&self) {
        self.frames_reordered.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters without resetting them.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            reliable_sent: self.reliable_sent.load(Ordering::Relaxed),
            unreliable_sent: self.unreliable_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_reordered: self.frames_reordered.load(Ordering::Relaxed),
        }
    }

    /// Snapshot and reset all counters (swap with 0).
    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.swap(0, Ordering::Relaxed),
            bytes_received: self.bytes_received.swap(0, Ordering::Relaxed),
            reliable_sent: self.reliable_sent.swap(0, Ordering::Relaxed),
            unreliable_sent: self.unreliable_sent.swap(0, Ordering::Relaxed),
            messages_received: self.messages_received.swap(0, Ordering::Relaxed),
            frames_dropped: self.frames_dropped.swap(0, Ordering::Relaxed),
            frames_reordered: self.frames_reordered.swap(0, Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// StatsSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of [`NetworkCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Wire bytes handed to the link.
    pub bytes_sent: u64,
    /// Wire bytes taken off the link.
    pub bytes_received: u64,
    /// Frames sent on the reliable channel.
    pub reliable_sent: u64,
    /// Frames sent on the unreliable channel.
    pub unreliable_sent: u64,
    /// Frames received.
    pub messages_received: u64,
    /// Unreliable frames discarded.
    pub frames_dropped: u64,
    /// Unreliable frames delivered late.
    pub frames_reordered: u64,
}

impl StatsSnapshot {
    /// Frames sent on either channel.
    pub fn messages_sent(&self) -> u64 {
        self.reliable_sent + self.unreliable_sent
    }

    /// Element-wise sum, for totals across links.
    pub fn merged(self, other: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent + other.bytes_sent,
            bytes_received: self.bytes_received + other.bytes_received,
            reliable_sent: self.reliable_sent + other.reliable_sent,
            unreliable_sent: self.unreliable_sent + other.unreliable_sent,
            messages_received: self.messages_received + other.messages_received,
            frames_dropped: self.frames_dropped + other.frames_dropped,
            frames_reordered: self.frames_reordered + other.frames_reordered,
        }
    }
}
