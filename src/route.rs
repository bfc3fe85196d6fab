//! Address→(interface, via) route table with default-route fallback
//! (spec.md §3, §4.3; libcsp's `csp_rtable_set`/`csp_rtable_find_mac`).

use std::sync::Arc;

use crate::error::{CspError, CspResult};
use crate::iface::Interface;

/// Sentinel via-address meaning "use the packet's destination as the
/// link-layer address" (spec.md §3, §4.4 step 2).
pub const CSP_NODE_MAC: u8 = 255;

const MAX_ADDRESS: u8 = 31;

#[derive(Clone)]
pub struct RouteEntry {
    pub iface: Arc<dyn Interface>,
    pub via: u8,
}

/// `dst = None` installs the fallback ("default") route.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: [Option<RouteEntry>; 32],
    default: Option<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, dst: Option<u8>, iface: Arc<dyn Interface>, via: u8) -> CspResult<()> {
        match dst {
            None => self.default = Some(RouteEntry { iface, via }),
            Some(addr) => {
                if addr > MAX_ADDRESS {
                    return Err(CspError::Inval("destination address must be 0..=31"));
                }
                self.routes[addr as usize] = Some(RouteEntry { iface, via });
            }
        }
        Ok(())
    }

    /// Returns the installed route for `dst`, falling back to the default
    /// route if no specific entry exists.
    pub fn find(&self, dst: u8) -> Option<&RouteEntry> {
        if dst <= MAX_ADDRESS {
            if let Some(entry) = &self.routes[dst as usize] {
                return Some(entry);
            }
        }
        self.default.as_ref()
    }

    /// Returns the route's `via` address, or [`CSP_NODE_MAC`] if unset.
    pub fn find_mac(&self, dst: u8) -> u8 {
        self.find(dst).map(|e| e.via).unwrap_or(CSP_NODE_MAC)
    }
}
