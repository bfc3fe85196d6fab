//! CFP reassembly table (spec.md §3's pbuf element, §4.4 steps 2-5).
//!
//! Slots are scanned and claimed under one short critical section per
//! operation (spec.md §4.7: "the pbuf table is protected by a short
//! critical section held only around the slot scan").

use std::sync::Mutex;

use crate::buffer::Packet;
use crate::cfp::id::CfpConnKey;
use crate::error::{CspError, CspResult};

/// A reassembly slot holding one in-progress CFP packet.
pub struct PbufElement {
    pub key: CfpConnKey,
    pub packet: Packet,
    pub rx_count: usize,
    /// Frames still expected, decremented each frame (spec.md §3).
    pub remain: u16,
    pub last_used_ms: u64,
}

pub struct PbufTable {
    slots: Mutex<Vec<Option<PbufElement>>>,
    timeout_ms: u64,
}

impl PbufTable {
    pub fn new(capacity: usize, timeout_ms: u64) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
            timeout_ms,
        }
    }

    /// Removes and returns the slot matching `key`, if any currently used
    /// slot holds that connection.
    pub fn take_matching(&self, key: CfpConnKey) -> Option<PbufElement> {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|e| e.key == key) {
                return slot.take();
            }
        }
        None
    }

    /// Inserts `elem` into a free slot, reclaiming the first slot whose
    /// `last_used_ms` is older than the timeout if none is free outright
    /// (spec.md §3: "reclaimed if now - last_used > PBUF_TIMEOUT_MS ... when
    /// the allocator scans for a free slot").
    pub fn insert(&self, elem: PbufElement, now_ms: u64) -> CspResult<()> {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(elem);
            return Ok(());
        }
        let timeout_ms = self.timeout_ms;
        if let Some(slot) = slots.iter_mut().find(|s| {
            s.as_ref()
                .is_some_and(|e| now_ms.saturating_sub(e.last_used_ms) > timeout_ms)
        }) {
            *slot = Some(elem);
            return Ok(());
        }
        Err(CspError::NoBufs)
    }
}
