//! ZeroMQ hub transport (spec.md §4.6, §6): a leading "via" byte, then the
//! 4-byte network-order CSP id, then payload, published on a PUB socket and
//! received from a SUB socket. The publisher side is serialized by a
//! binary semaphore in the original; `std::sync::Mutex<()>` already gives
//! that mutual-exclusion semantics for a single permit.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::buffer::{BufferPool, Packet};
use crate::error::CspError;
use crate::iface::{Counters, Interface, NexthopError};
use crate::packet_id::CspId;
use crate::qfifo::DispatchSender;
use crate::route::{RouteTable, CSP_NODE_MAC};

const CSP_ID_LEN: usize = 4;
const HEADER_LEN: usize = 1 + CSP_ID_LEN;

/// Publishes one already-framed ZeroMQ message: `[via, id (4 bytes), payload...]`.
pub trait ZmqDriver: Send + Sync {
    fn publish(&self, message: &[u8]) -> Result<(), CspError>;
}

pub struct ZmqInterface {
    name: String,
    mtu: usize,
    counters: Counters,
    pool: BufferPool,
    routes: Arc<RwLock<RouteTable>>,
    driver: Arc<dyn ZmqDriver>,
    dispatch: DispatchSender,
    /// Guards the publisher; ZeroMQ sockets are not thread-safe (spec.md §5).
    publish_lock: Mutex<()>,
}

impl ZmqInterface {
    pub fn new(
        name: impl Into<String>,
        mtu: usize,
        pool: BufferPool,
        routes: Arc<RwLock<RouteTable>>,
        driver: Arc<dyn ZmqDriver>,
        dispatch: DispatchSender,
    ) -> Self {
        Self {
            name: name.into(),
            mtu,
            counters: Counters::default(),
            pool,
            routes,
            driver,
            dispatch,
            publish_lock: Mutex::new(()),
        }
    }

    /// Feeds one received SUB-socket message (still carrying its leading
    /// "via" byte) through the receive path (spec.md §4.6).
    pub fn rx(&self, self_handle: &Arc<dyn Interface>, message: &[u8]) {
        if message.len() < HEADER_LEN {
            self.counters.rx_error.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let id = CspId::from_network_bytes(message[1..HEADER_LEN].try_into().unwrap());
        let payload = &message[HEADER_LEN..];

        let Ok(mut packet) = self.pool.get_isr(payload.len()) else {
            self.counters.rx_error.fetch_add(1, Ordering::Relaxed);
            return;
        };
        packet.id = id;
        packet.data_mut().copy_from_slice(payload);

        self.counters.rx.fetch_add(1, Ordering::Relaxed);
        self.dispatch.write(packet, self_handle.clone(), None);
    }
}

impl Interface for ZmqInterface {
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
        let via = self.routes.read().unwrap().find_mac(packet.id.destination);
        let via = if via == CSP_NODE_MAC {
            packet.id.destination
        } else {
            via
        };

        let mut message = Vec::with_capacity(HEADER_LEN + packet.len());
        message.push(via);
        message.extend_from_slice(&packet.id.to_network_bytes());
        message.extend_from_slice(packet.data());

        let result = {
            let _guard = self.publish_lock.lock().unwrap();
            self.driver.publish(&message)
        };
        if let Err(error) = result {
            return Err(NexthopError { packet, error });
        }
        self.counters.tx.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
