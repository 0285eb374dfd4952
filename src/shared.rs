//! State shared between the radio receive callback and the polling tasks.
//!
//! Every record is published as a whole: writers build a new value and swap
//! the `Arc` in, readers clone the `Arc` and look at a value that can no
//! longer change. The mutex only guards the pointer swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::DeviceConfig;
use crate::link::{Clock, LinkTracker};
use crate::packet::{CHANNEL_COUNT, ControlPacket};

pub struct Snapshot<T> {
    current: Mutex<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Snapshot {
            current: Mutex::new(Arc::new(value)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Arc<T>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.slot())
    }

    pub fn publish(&self, value: T) {
        let next = Arc::new(value);
        let previous = std::mem::replace(&mut *self.slot(), next);
        drop(previous);
    }

    /// Read-modify-write against the latest value, so a concurrent writer is
    /// never overwritten with a decision taken on a stale snapshot.
    /// Returning `None` leaves the current value in place.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> Option<T>,
    {
        let mut slot = self.slot();
        match f(&slot) {
            Some(next) => {
                *slot = Arc::new(next);
                true
            }
            None => false,
        }
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Snapshot::new(T::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub packet: ControlPacket,
    pub sequence: u64,
    pub received_at_ms: u64,
}

/// Most recently accepted packet. Overwrite semantics, no queue.
#[derive(Default)]
pub struct PacketCache {
    latest: Snapshot<Option<ReceivedPacket>>,
    sequence: AtomicU64,
}

impl PacketCache {
    pub fn new() -> Self {
        PacketCache::default()
    }

    pub fn publish(&self, packet: ControlPacket, now_ms: u64) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest.publish(Some(ReceivedPacket {
            packet,
            sequence,
            received_at_ms: now_ms,
        }));
        sequence
    }

    pub fn latest(&self) -> Option<ReceivedPacket> {
        *self.latest.load()
    }

    /// Latest packet only if it is newer than `sequence`.
    pub fn newer_than(&self, sequence: u64) -> Option<ReceivedPacket> {
        self.latest().filter(|received| received.sequence > sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationOutputs {
    pub pulses_us: [u16; CHANNEL_COUNT],
    pub digital: u8,
}

impl Default for ActuationOutputs {
    fn default() -> Self {
        ActuationOutputs {
            pulses_us: [crate::mapping::SERVO_US_CENTER; CHANNEL_COUNT],
            digital: 0,
        }
    }
}

/// Last values written to the output hardware, for telemetry.
#[derive(Default)]
pub struct OutputBoard {
    outputs: Snapshot<ActuationOutputs>,
}

impl OutputBoard {
    pub fn new() -> Self {
        OutputBoard::default()
    }

    pub fn publish(&self, outputs: ActuationOutputs) {
        self.outputs.publish(outputs);
    }

    pub fn current(&self) -> ActuationOutputs {
        *self.outputs.load()
    }
}

/// Everything the role tasks, the supervisor and the configuration
/// interface look at.
pub struct NodeState {
    pub clock: Clock,
    pub config: Snapshot<DeviceConfig>,
    pub link: LinkTracker,
    pub packets: PacketCache,
    pub outputs: OutputBoard,
}

impl NodeState {
    pub fn new(config: DeviceConfig) -> Self {
        NodeState {
            clock: Clock::new(),
            config: Snapshot::new(config),
            link: LinkTracker::new(),
            packets: PacketCache::new(),
            outputs: OutputBoard::new(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_snapshot_readers_keep_their_copy() {
        let snapshot = Snapshot::new(1u32);
        let before = snapshot.load();
        snapshot.publish(2);
        assert_eq!(*before, 1);
        assert_eq!(*snapshot.load(), 2);
    }

    #[test]
    fn test_snapshot_update_can_decline() {
        let snapshot = Snapshot::new(5u32);
        assert!(!snapshot.update(|_| None));
        assert!(snapshot.update(|v| Some(v + 1)));
        assert_eq!(*snapshot.load(), 6);
    }

    #[test]
    fn test_packet_cache_overwrites() {
        let cache = PacketCache::new();
        assert!(cache.latest().is_none());

        let first = cache.publish(ControlPacket::new([1; CHANNEL_COUNT], 0), 10);
        let second = cache.publish(ControlPacket::new([2; CHANNEL_COUNT], 0), 20);
        assert!(second > first);

        let latest = cache.latest().unwrap();
        assert_eq!(latest.packet.channels[0], 2);
        assert_eq!(latest.received_at_ms, 20);
        assert!(cache.newer_than(first).is_some());
        assert!(cache.newer_than(second).is_none());
    }

    #[test]
    fn test_concurrent_publish_never_tears() {
        let cache = Arc::new(PacketCache::new());
        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..2000u16 {
                    cache.publish(ControlPacket::new([i; CHANNEL_COUNT], (i & 0x7F) as u8), i as u64);
                }
            })
        };
        for _ in 0..2000 {
            if let Some(received) = cache.latest() {
                let first = received.packet.channels[0];
                assert!(received.packet.channels.iter().all(|&c| c == first));
                assert_eq!(received.received_at_ms, first as u64);
            }
        }
        writer.join().unwrap();
    }
}
