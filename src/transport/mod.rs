//! Non-CAN/KISS link transports (spec.md §4.6): thin MTU-bounded framing
//! over a driver trait object standing in for the original's weak-symbol
//! driver hooks (spec.md §9's design note — Rust has no weak symbols, so an
//! explicit trait plus an `Err(CspError::NotSup)`-returning default is the
//! direct analogue).

pub mod i2c;
pub mod zmq;

pub use i2c::{I2cDriver, I2cInterface};
pub use zmq::{ZmqDriver, ZmqInterface};
