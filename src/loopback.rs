//! In-memory loopback interface for tests (grounded in
//! `examples/original_source/tests/vcan_test.c`'s virtual CAN harness,
//! minus the real CAN framing): `nexthop` hands the packet straight back
//! onto the dispatch fifo as if a peer had sent it, with no encoding step.
//! Useful for exercising the router/route-table layer in isolation from
//! CFP/KISS wire formats.

use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use crate::buffer::Packet;
use crate::error::CspError;
use crate::iface::{Counters, Interface, NexthopError};
use crate::qfifo::DispatchSender;

pub struct LoopbackInterface {
    name: String,
    mtu: usize,
    counters: Counters,
    dispatch: DispatchSender,
    // `Weak` so the registry's `Arc<dyn Interface>` isn't kept alive by a
    // cycle back to itself.
    self_handle: OnceLock<Weak<dyn Interface>>,
}

impl LoopbackInterface {
    /// Builds the interface and ties its self-reference, so `nexthop` can
    /// tag the looped-back packet with its own `Arc<dyn Interface>` handle
    /// without the caller threading one through on every call.
    pub fn new(name: impl Into<String>, mtu: usize, dispatch: DispatchSender) -> Arc<Self> {
        let iface = Arc::new(Self {
            name: name.into(),
            mtu,
            counters: Counters::default(),
            dispatch,
            self_handle: OnceLock::new(),
        });
        let handle: Arc<dyn Interface> = iface.clone();
        let _ = iface.self_handle.set(Arc::downgrade(&handle));
        iface
    }
}

impl Interface for LoopbackInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn counters(&self) -> &Counters {
        &self.counters
    }

    fn nexthop(&self, packet: Packet, _timeout: Duration) -> Result<(), NexthopError> {
        let Some(handle) = self.self_handle.get().and_then(Weak::upgrade) else {
            return Err(NexthopError {
                packet,
                error: CspError::NotSup("loopback interface not fully initialized"),
            });
        };
        self.counters.tx.fetch_add(1, Ordering::Relaxed);
        self.counters.rx.fetch_add(1, Ordering::Relaxed);
        self.dispatch.write(packet, handle, None);
        Ok(())
    }
}
