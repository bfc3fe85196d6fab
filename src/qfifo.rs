//! Single-producer-many-consumer dispatch queue feeding the router task
//! (spec.md §4.7). Any link receiver (`cfp_rx`, `kiss_rx`, `i2c_rx`,
//! `zmq_rx`) calls [`DispatchSender::write`] once it has assembled a full
//! packet; the router task drains [`DispatchReceiver`] in FIFO order across
//! all producers.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use crate::buffer::Packet;
use crate::iface::Interface;

/// A packet paired with the interface it arrived on, queued for the router.
pub struct QfifoEntry {
    pub packet: Packet,
    pub iface: Arc<dyn Interface>,
}

#[derive(Clone)]
pub struct DispatchSender {
    tx: SyncSender<QfifoEntry>,
}

pub struct DispatchReceiver {
    rx: Receiver<QfifoEntry>,
}

/// Creates a bounded dispatch fifo of the given capacity.
pub fn channel(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = sync_channel(capacity.max(1));
    (DispatchSender { tx }, DispatchReceiver { rx })
}

impl DispatchSender {
    /// Enqueues `(packet, iface)` for the router task. If the queue is
    /// full, the packet is dropped and the interface's `drop` counter is
    /// incremented (spec.md §4.7). `task_woken` has no meaning in a
    /// userspace thread model; it is accepted for contract fidelity with
    /// the original ISR-safe signature and is always left untouched here.
    pub fn write(&self, packet: Packet, iface: Arc<dyn Interface>, _task_woken: Option<&mut bool>) {
        match self.tx.try_send(QfifoEntry { packet, iface }) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                entry.iface.counters().drop.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(iface = entry.iface.name(), "dispatch fifo full, dropping packet");
                // `entry.packet` drops here, releasing its slot back to the pool.
            }
            Err(TrySendError::Disconnected(entry)) => {
                entry.iface.counters().drop.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(iface = entry.iface.name(), "dispatch fifo has no receiver, dropping packet");
            }
        }
    }
}

impl DispatchReceiver {
    /// Blocks until the next entry is available, or returns `None` once all
    /// senders have been dropped (used to shut the router task down).
    pub fn recv(&self) -> Option<QfifoEntry> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::iface::{Counters, NexthopError};
    use std::time::Duration;

    struct Stub {
        counters: Counters,
    }
    impl Interface for Stub {
        fn name(&self) -> &str {
            "A"
        }
        fn mtu(&self) -> usize {
            64
        }
        fn counters(&self) -> &Counters {
            &self.counters
        }
        fn nexthop(&self, _p: Packet, _t: Duration) -> Result<(), NexthopError> {
            Ok(())
        }
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (tx, _rx) = channel(1);
        let pool = BufferPool::new(4, 32).unwrap();
        let iface: Arc<dyn Interface> = Arc::new(Stub {
            counters: Counters::default(),
        });

        let p1 = pool.get(4, Duration::from_millis(10)).unwrap();
        tx.write(p1, iface.clone(), None);
        let p2 = pool.get(4, Duration::from_millis(10)).unwrap();
        tx.write(p2, iface.clone(), None);

        assert_eq!(iface.counters().snapshot().drop, 1);
    }

    #[test]
    fn fifo_preserves_order_across_producers() {
        let (tx, rx) = channel(8);
        let pool = BufferPool::new(4, 32).unwrap();
        let iface: Arc<dyn Interface> = Arc::new(Stub {
            counters: Counters::default(),
        });

        for n in 0..3u8 {
            let mut p = pool.get(1, Duration::from_millis(10)).unwrap();
            p.data_mut()[0] = n;
            tx.write(p, iface.clone(), None);
        }

        for n in 0..3u8 {
            let entry = rx.recv().unwrap();
            assert_eq!(entry.packet.data()[0], n);
        }
    }
}
