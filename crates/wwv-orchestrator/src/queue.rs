//! Bounded per-channel packet queue (§5 back-pressure): on overflow the
//! oldest queued packet is dropped and a `queue_overflow` discontinuity
//! is recorded, never blocking the ingress thread indefinitely.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use wwv_core::Packet;

/// A bounded queue backed by a doorbell channel: the buffer itself lives
/// behind a short-held mutex (push/pop are O(1) `VecDeque` operations),
/// while `crossbeam_channel` provides the blocking wait a worker thread
/// uses instead of busy-polling.
pub struct BoundedPacketQueue {
    buffer: Mutex<VecDeque<Packet>>,
    capacity: usize,
    doorbell_tx: Sender<()>,
    doorbell_rx: Receiver<()>,
    /// Packets dropped to back-pressure since the last `take_overflow_count`,
    /// polled by the owning worker thread and recorded in its gap manifest.
    overflow_count: AtomicU64,
}

/// Whether `push` had to evict an older packet to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    AcceptedWithEviction,
}

impl BoundedPacketQueue {
    pub fn new(capacity: usize) -> Self {
        let (doorbell_tx, doorbell_rx) = bounded(capacity.max(1));
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            doorbell_tx,
            doorbell_rx,
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Pushes `packet`, evicting the oldest queued packet first if the
    /// queue is already at capacity.
    pub fn push(&self, packet: Packet) -> PushOutcome {
        let mut buf = self.buffer.lock();
        let outcome = if buf.len() >= self.capacity {
            buf.pop_front();
            PushOutcome::AcceptedWithEviction
        } else {
            PushOutcome::Accepted
        };
        buf.push_back(packet);
        drop(buf);
        if outcome == PushOutcome::AcceptedWithEviction {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self.doorbell_tx.try_send(());
        outcome
    }

    /// Returns the number of packets evicted under back-pressure since
    /// the last call, resetting the counter to zero.
    pub fn take_overflow_count(&self) -> u64 {
        self.overflow_count.swap(0, Ordering::Relaxed)
    }

    /// Blocks up to `timeout` for a packet to become available, then
    /// pops the oldest one.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Packet> {
        loop {
            if let Some(packet) = self.buffer.lock().pop_front() {
                return Some(packet);
            }
            if self.doorbell_rx.recv_timeout(timeout).is_err() {
                return None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every remaining packet in FIFO order, used during
    /// shutdown to flush the resequencer before closing archive files.
    pub fn drain_all(&self) -> Vec<Packet> {
        self.buffer.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16) -> Packet {
        Packet {
            seq,
            rtp_ts: seq as u32 * 320,
            ssrc: 1,
            payload: Vec::new(),
        }
    }

    #[test]
    fn overflow_evicts_oldest() {
        let queue = BoundedPacketQueue::new(2);
        assert_eq!(queue.push(packet(1)), PushOutcome::Accepted);
        assert_eq!(queue.push(packet(2)), PushOutcome::Accepted);
        assert_eq!(queue.push(packet(3)), PushOutcome::AcceptedWithEviction);
        let drained: Vec<u16> = queue.drain_all().iter().map(|p| p.seq).collect();
        assert_eq!(drained, vec![2, 3]);
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let queue = BoundedPacketQueue::new(4);
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn fifo_order_preserved() {
        let queue = BoundedPacketQueue::new(10);
        for i in 0..5 {
            queue.push(packet(i));
        }
        for i in 0..5 {
            let p = queue.pop_timeout(Duration::from_millis(10)).unwrap();
            assert_eq!(p.seq, i);
        }
    }
}
