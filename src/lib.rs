//! CubeSat Space Protocol engine: packet model and buffer pool, the CAN
//! Fragmentation Protocol, the KISS serial framer, and the interface/
//! routing/dispatch layer that ties link drivers to an address-based route
//! table (spec.md §1).
//!
//! [`CspContext`] is the one owned container for what the original keeps as
//! process-global state (interface list, route table, buffer pool, CFP
//! session counter, ZMQ publisher singleton) — created by one init call and
//! threaded through by `Arc`, per spec.md §9's design note.

pub mod buffer;
pub mod cfp;
pub mod config;
pub mod error;
pub mod iface;
pub mod kiss;
pub mod loopback;
pub mod packet_id;
pub mod platform;
pub mod qfifo;
pub mod rdp;
pub mod route;
pub mod router;
pub mod transport;

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

pub use buffer::{BufferPool, Packet};
pub use config::CspConfig;
pub use error::{CspError, CspResult};
pub use packet_id::CspId;

use iface::InterfaceRegistry;
use platform::{Clock, SystemClock};
use qfifo::{DispatchReceiver, DispatchSender};
use route::RouteTable;
use router::{LocalDelivery, Router};

/// The single owned container for node-wide state: the buffer pool, the
/// interface registry, the route table, and the dispatch fifo. Replaces the
/// original's scattered module-level statics (spec.md §9).
pub struct CspContext {
    config: CspConfig,
    pool: BufferPool,
    interfaces: RwLock<InterfaceRegistry>,
    routes: Arc<RwLock<RouteTable>>,
    clock: Arc<dyn Clock>,
    dispatch_tx: DispatchSender,
    dispatch_rx: Mutex<Option<DispatchReceiver>>,
}

impl CspContext {
    pub fn new(config: CspConfig) -> CspResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: CspConfig, clock: Arc<dyn Clock>) -> CspResult<Self> {
        let pool = BufferPool::new(config.buffer_count, config.buffer_size)?;
        let (dispatch_tx, dispatch_rx) = qfifo::channel(config.dispatch_queue_capacity);
        Ok(Self {
            config,
            pool,
            interfaces: RwLock::new(InterfaceRegistry::new()),
            routes: Arc::new(RwLock::new(RouteTable::new())),
            clock,
            dispatch_tx,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
        })
    }

    pub fn config(&self) -> &CspConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn routes(&self) -> &Arc<RwLock<RouteTable>> {
        &self.routes
    }

    pub fn dispatch_sender(&self) -> DispatchSender {
        self.dispatch_tx.clone()
    }

    /// Registers a link interface (spec.md §3: write-once at init,
    /// read-only thereafter).
    pub fn register_interface(&self, iface: Arc<dyn iface::Interface>) -> CspResult<()> {
        self.interfaces.write().unwrap().register(iface)
    }

    pub fn interface(&self, name: &str) -> Option<Arc<dyn iface::Interface>> {
        self.interfaces.read().unwrap().get(name)
    }

    pub fn set_route(&self, dst: Option<u8>, iface: Arc<dyn iface::Interface>, via: u8) -> CspResult<()> {
        self.routes.write().unwrap().set(dst, iface, via)
    }

    /// Takes ownership of the dispatch fifo's receive end and builds a
    /// [`Router`] bound to it. Can only be called once; the router task
    /// owns the receiver for the rest of the process lifetime.
    pub fn take_router(&self, local: Arc<dyn LocalDelivery>, nexthop_timeout: Duration) -> Option<(Router, DispatchReceiver)> {
        let receiver = self.dispatch_rx.lock().unwrap().take()?;
        let router = Router::new(self.config.own_address, self.routes.clone(), local, nexthop_timeout);
        Some((router, receiver))
    }
}
