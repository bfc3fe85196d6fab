//! I²C transport (spec.md §4.6, §6): leading destination byte, then the
//! 4-byte network-order CSP id, then payload. MTU is fixed at 256 bytes.

use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::buffer::{BufferPool, Packet};
use crate::error::CspError;
use crate::iface::{Counters, Interface, NexthopError};
use crate::packet_id::CspId;
use crate::qfifo::DispatchSender;
use crate::route::{RouteTable, CSP_NODE_MAC};

pub const I2C_MTU: usize = 256;
const CSP_ID_LEN: usize = 4;

/// Sends one already-framed I²C transaction: `[dest, id (4 bytes), payload...]`.
pub trait I2cDriver: Send + Sync {
    fn send(&self, frame: &[u8]) -> Result<(), CspError>;
}

pub struct I2cInterface {
    name: String,
    counters: Counters,
    pool: BufferPool,
    routes: Arc<RwLock<RouteTable>>,
    driver: Arc<dyn I2cDriver>,
    dispatch: DispatchSender,
}

impl I2cInterface {
    pub fn new(
        name: impl Into<String>,
        pool: BufferPool,
        routes: Arc<RwLock<RouteTable>>,
        driver: Arc<dyn I2cDriver>,
        dispatch: DispatchSender,
    ) -> Self {
        Self {
            name: name.into(),
            counters: Counters::default(),
            pool,
            routes,
            driver,
            dispatch,
        }
    }

    /// Feeds one received I²C transaction's payload (id + payload, with the
    /// destination-address byte and any bus addressing already stripped by
    /// the driver) through the receive path (spec.md §4.6).
    pub fn rx(&self, self_handle: &Arc<dyn Interface>, data: &[u8]) {
        if data.len() < CSP_ID_LEN || data.len() > I2C_MTU {
            self.counters.rx_error.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let id = CspId::from_network_bytes(data[..CSP_ID_LEN].try_into().unwrap());
        let payload = &data[CSP_ID_LEN..];

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

impl Interface for I2cInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> usize {
        I2C_MTU
    }

    fn counters(&self) -> &Counters {
        &self.counters
    }

    fn nexthop(&self, packet: Packet, _timeout: Duration) -> Result<(), NexthopError> {
        let via = self.routes.read().unwrap().find_mac(packet.id.destination);
        let dest = if via == CSP_NODE_MAC {
            packet.id.destination
        } else {
            via
        };

        let mut frame = Vec::with_capacity(1 + CSP_ID_LEN + packet.len());
        frame.push(dest);
        frame.extend_from_slice(&packet.id.to_network_bytes());
        frame.extend_from_slice(packet.data());

        if let Err(error) = self.driver.send(&frame) {
            return Err(NexthopError { packet, error });
        }
        self.counters.tx.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
