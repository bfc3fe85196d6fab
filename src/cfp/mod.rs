//! CAN Fragmentation Protocol: 29-bit header codec, reassembly table, and
//! the transmit/receive engine (spec.md §4.4).

pub mod engine;
pub mod id;
pub mod pbuf;

pub use engine::{CanDriver, CfpEngine};
pub use id::{CfpConnKey, CfpId, FrameType};
