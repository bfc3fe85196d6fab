//! Crate-wide error kinds.
//!
//! Mirrors the `CSP_ERR_*` family from libcsp. Frame-boundary failures are
//! never propagated as `CspError` to a peer — they are counted on the
//! interface and the frame is dropped (see [`crate::iface::Counters`]).
//! `CspError` is only returned across the transmit API boundary, where the
//! caller retains ownership of the packet on failure.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CspError {
    /// Pool exhausted at init or on a runtime `get`.
    #[error("buffer pool exhausted")]
    NoBufs,
    /// Pool could not be allocated at init time.
    #[error("not enough memory to initialize pool")]
    NoMem,
    /// Bad arguments or malformed frame.
    #[error("invalid argument or frame: {0}")]
    Inval(&'static str),
    /// Generic transmit failure.
    #[error("transmit failed")]
    Tx,
    /// Link driver refused the frame.
    #[error("link driver refused frame")]
    TxDriver,
    /// A wait elapsed without the awaited condition becoming true.
    #[error("operation timed out")]
    Timedout,
    /// Duplicate interface name or route.
    #[error("already exists: {0}")]
    Already(&'static str),
    /// Optional feature not implemented by this driver.
    #[error("not supported: {0}")]
    NotSup(&'static str),
}

pub type CspResult<T> = Result<T, CspError>;
