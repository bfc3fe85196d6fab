//! Router task contract (spec.md §4.3, §4.7): consumes the dispatch fifo,
//! resolves the next hop via the route table, and invokes the interface's
//! transmit function. Local delivery (packets addressed to this node) is
//! handed to an opaque [`LocalDelivery`] sink — the listening-socket layer
//! itself is out of scope for this crate (spec.md §1).

use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::buffer::Packet;
use crate::qfifo::DispatchReceiver;
use crate::route::RouteTable;

/// Receives packets addressed to this node. The socket-layer/application
/// implementation lives outside this crate.
pub trait LocalDelivery: Send + Sync {
    fn deliver(&self, packet: Packet);
}

pub struct Router {
    own_address: u8,
    routes: Arc<RwLock<RouteTable>>,
    local: Arc<dyn LocalDelivery>,
    nexthop_timeout: Duration,
}

impl Router {
    pub fn new(
        own_address: u8,
        routes: Arc<RwLock<RouteTable>>,
        local: Arc<dyn LocalDelivery>,
        nexthop_timeout: Duration,
    ) -> Self {
        Self {
            own_address,
            routes,
            local,
            nexthop_timeout,
        }
    }

    /// Processes one dispatch-fifo entry. Returns `false` once the fifo has
    /// no remaining producers, signaling the caller's loop to stop.
    pub fn step(&self, receiver: &DispatchReceiver) -> bool {
        let Some(entry) = receiver.recv() else {
            return false;
        };

        if entry.packet.id.destination == self.own_address {
            self.local.deliver(entry.packet);
            return true;
        }

        let route = self.routes.read().unwrap().find(entry.packet.id.destination).cloned();
        let Some(route) = route else {
            // "The router silently drops packets with no route" (spec.md §7).
            tracing::warn!(dst = entry.packet.id.destination, "no route, dropping packet");
            return true;
        };

        let iface = route.iface.clone();
        if let Err(err) = iface.nexthop(entry.packet, self.nexthop_timeout) {
            // `err.packet` drops here, releasing its slot back to the pool
            // (spec.md §7: ownership remains with the caller on failure).
            tracing::warn!(error = %err.error, "nexthop failed");
            iface.counters().tx_error.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Runs the router loop on the calling thread until the fifo is closed.
    pub fn run(&self, receiver: &DispatchReceiver) {
        while self.step(receiver) {}
    }
}
