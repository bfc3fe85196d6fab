//! Named registry of installed link interfaces (spec.md §3, §4.3's router
//! contract leans on this; libcsp's `csp_iflist_add`/`csp_iflist_get_by_name`).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::Packet;
use crate::error::{CspError, CspResult};

pub const MAX_NAME_LEN: usize = 10;

/// A failed [`Interface::nexthop`] call, returning the packet so the caller
/// retains ownership and can free it.
pub struct NexthopError {
    pub packet: Packet,
    pub error: CspError,
}

/// Per-interface received/transmitted/dropped/frame-error counters
/// (spec.md §3). Atomic so drivers, the router, and diagnostics code can
/// all read/increment without a lock.
#[derive(Default)]
pub struct Counters {
    pub rx: AtomicU32,
    pub tx: AtomicU32,
    pub rx_error: AtomicU32,
    pub tx_error: AtomicU32,
    pub frame: AtomicU32,
    pub drop: AtomicU32,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            rx: self.rx.load(Ordering::Relaxed),
            tx: self.tx.load(Ordering::Relaxed),
            rx_error: self.rx_error.load(Ordering::Relaxed),
            tx_error: self.tx_error.load(Ordering::Relaxed),
            frame: self.frame.load(Ordering::Relaxed),
            drop: self.drop.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub rx: u32,
    pub tx: u32,
    pub rx_error: u32,
    pub tx_error: u32,
    pub frame: u32,
    pub drop: u32,
}

/// A link interface: a named, MTU-bounded transmit path plus its counters.
/// Created during init and lives for the process (spec.md §3's lifecycle —
/// interfaces are never destroyed).
pub trait Interface: Send + Sync {
    fn name(&self) -> &str;
    fn mtu(&self) -> usize;
    fn counters(&self) -> &Counters;

    /// Transmits `packet` toward its destination, resolving the link-layer
    /// "via" address from the route table itself (matching
    /// `csp_rtable_find_mac` being called from inside `csp_can_tx`/
    /// `csp_i2c_tx`, not passed down by the router). On success, ownership
    /// of `packet` has moved into this call. On failure, the packet is
    /// handed back inside [`NexthopError`] so the caller retains ownership
    /// and is responsible for freeing it (spec.md §7's ownership-transfer
    /// contract): "on success, ownership transfers to the transport; on
    /// failure, ownership remains with the caller".
    fn nexthop(&self, packet: Packet, timeout: Duration) -> Result<(), NexthopError>;
}

/// Write-once at init, read-only thereafter (spec.md §5).
#[derive(Default, Clone)]
pub struct InterfaceRegistry {
    interfaces: Vec<Arc<dyn Interface>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, iface: Arc<dyn Interface>) -> CspResult<()> {
        if iface.name().is_empty() || iface.name().len() > MAX_NAME_LEN {
            return Err(CspError::Inval("interface name must be 1..=10 characters"));
        }
        if self.get(iface.name()).is_some() {
            return Err(CspError::Already("interface with this name already exists"));
        }
        self.interfaces.push(iface);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Interface>> {
        self.interfaces
            .iter()
            .find(|i| i.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Interface>> {
        self.interfaces.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Stub {
        name: String,
        counters: Counters,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl Interface for Stub {
        fn name(&self) -> &str {
            &self.name
        }
        fn mtu(&self) -> usize {
            256
        }
        fn counters(&self) -> &Counters {
            &self.counters
        }
        fn nexthop(&self, packet: Packet, _timeout: Duration) -> Result<(), NexthopError> {
            self.sent.lock().unwrap().push(packet.data().to_vec());
            Ok(())
        }
    }

    #[test]
    fn duplicate_name_is_rejected_case_insensitively() {
        let mut reg = InterfaceRegistry::new();
        reg.register(Arc::new(Stub {
            name: "CAN0".into(),
            counters: Counters::default(),
            sent: Mutex::new(vec![]),
        }))
        .unwrap();
        let err = reg
            .register(Arc::new(Stub {
                name: "can0".into(),
                counters: Counters::default(),
                sent: Mutex::new(vec![]),
            }))
            .unwrap_err();
        assert_eq!(err, CspError::Already("interface with this name already exists"));
    }

    #[test]
    fn name_too_long_is_rejected() {
        let mut reg = InterfaceRegistry::new();
        let err = reg
            .register(Arc::new(Stub {
                name: "way-too-long-name".into(),
                counters: Counters::default(),
                sent: Mutex::new(vec![]),
            }))
            .unwrap_err();
        assert!(matches!(err, CspError::Inval(_)));
    }
}
