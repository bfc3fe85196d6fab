//! Fixed-count, fixed-size packet buffer pool (spec.md §3, §4.1).
//!
//! The pool never splits or coalesces: allocation is slot-index based, and
//! every slot is exactly `slot_size` bytes of storage. `get`/`free` are the
//! blocking, thread-safe pair; `get_isr`/`free_isr` never block, modeling
//! the original's non-blocking ISR-context variants via `try_lock` instead
//! of `lock`.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{CspError, CspResult};
use crate::packet_id::CspId;

/// Scratch bytes preceding the identifier field, reserved for transports
/// that prepend a link-layer "via" byte before the CSP header (spec.md §3).
pub const HEADER_PADDING_LEN: usize = 4;

enum Slot {
    Free(Vec<u8>),
    InUse,
}

struct Inner {
    slots: Vec<Mutex<Slot>>,
    not_full: Condvar,
    /// Paired with `not_full` for every `wait`/`wait_timeout` call.
    /// `Condvar` binds to the first mutex it's used with and panics if a
    /// later call passes a different one, so this must be the single,
    /// persistent mutex for the lifetime of the pool — never a fresh
    /// `Mutex::new(())` per wait.
    wait_lock: Mutex<()>,
    slot_size: usize,
}

/// A fixed-count buffer pool shared by drivers, the application, and the
/// router. Cloning a `BufferPool` shares the same underlying slots.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    /// Pre-allocates `count` slots of `slot_size` bytes each.
    pub fn new(count: usize, slot_size: usize) -> CspResult<Self> {
        if count == 0 || slot_size == 0 {
            return Err(CspError::NoMem);
        }
        let slots = (0..count)
            .map(|_| Mutex::new(Slot::Free(vec![0u8; slot_size])))
            .collect();
        Ok(Self {
            inner: Arc::new(Inner {
                slots,
                not_full: Condvar::new(),
                wait_lock: Mutex::new(()),
                slot_size,
            }),
        })
    }

    pub fn slot_size(&self) -> usize {
        self.inner.slot_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    fn try_claim(&self, size: usize) -> Option<Packet> {
        for (index, slot) in self.inner.slots.iter().enumerate() {
            let mut guard = match slot.try_lock() {
                Ok(g) => g,
                Err(_) => continue,
            };
            if let Slot::Free(mut data) = std::mem::replace(&mut *guard, Slot::InUse) {
                data.clear();
                data.resize(size, 0);
                return Some(Packet {
                    pool: self.clone(),
                    index,
                    data,
                    id: CspId::default(),
                    header_padding: [0u8; HEADER_PADDING_LEN],
                    released: false,
                });
            }
            *guard = Slot::InUse;
        }
        None
    }

    /// Blocks until a slot frees or `timeout` elapses.
    pub fn get(&self, size: usize, timeout: Duration) -> CspResult<Packet> {
        if size > self.inner.slot_size {
            return Err(CspError::Inval("requested size exceeds slot size"));
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(p) = self.try_claim(size) {
                return Ok(p);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CspError::Timedout);
            }
            // Park on the pool's single persistent mutex and re-poll the
            // slot array on wake; `Condvar` requires the same mutex across
            // every wait on it.
            let guard = self.inner.wait_lock.lock().unwrap();
            let _ = self
                .inner
                .not_full
                .wait_timeout(guard, deadline - now)
                .unwrap();
        }
    }

    /// Never blocks. Returns `NoBufs` immediately if no slot is free.
    pub fn get_isr(&self, size: usize) -> CspResult<Packet> {
        if size > self.inner.slot_size {
            return Err(CspError::Inval("requested size exceeds slot size"));
        }
        self.try_claim(size).ok_or(CspError::NoBufs)
    }

    fn release(&self, index: usize, mut data: Vec<u8>) {
        data.clear();
        data.resize(self.inner.slot_size, 0);
        let mut guard = self.inner.slots[index].lock().unwrap();
        *guard = Slot::Free(data);
        drop(guard);
        self.inner.not_full.notify_all();
    }

    /// Idempotent-safe against an already-released packet.
    pub fn free(&self, mut packet: Packet) {
        packet.release_to(self);
    }

    /// ISR-safe release (no blocking primitives on this target either way).
    pub fn free_isr(&self, packet: Packet) {
        self.free(packet);
    }
}

/// An owned, in-use buffer slot. Exactly one component owns a `Packet` at a
/// time (spec.md §3's lifecycle invariant). `Drop` releases the slot back to
/// the pool as a safety net if the owner never called [`BufferPool::free`]
/// explicitly — normal control flow still goes through the explicit API so
/// behavior matches the C original's explicit `csp_buffer_free` calls.
pub struct Packet {
    pool: BufferPool,
    index: usize,
    data: Vec<u8>,
    pub id: CspId,
    pub header_padding: [u8; HEADER_PADDING_LEN],
    released: bool,
}

impl Packet {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn set_len(&mut self, len: usize) -> CspResult<()> {
        if len > self.pool.slot_size() {
            return Err(CspError::Inval("length exceeds slot capacity"));
        }
        self.data.resize(len, 0);
        Ok(())
    }

    fn release_to(&mut self, pool: &BufferPool) {
        if self.released {
            return;
        }
        self.released = true;
        let data = std::mem::take(&mut self.data);
        pool.release(self.index, data);
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if !self.released {
            let pool = self.pool.clone();
            self.release_to(&pool);
        }
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("length", &self.data.len())
            .finish()
    }
}
