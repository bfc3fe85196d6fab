//! Crate-wide configuration builder, in the style of the teacher's template
//! configuration types: defaults that work out of the box, overridable one
//! field at a time before the immutable value is built.

use crate::error::{CspError, CspResult};

const MAX_ADDRESS: u8 = 31;

#[derive(Debug, Clone)]
pub struct CspConfig {
    pub own_address: u8,
    pub buffer_count: usize,
    pub buffer_size: usize,
    pub pbuf_capacity: usize,
    pub pbuf_timeout_ms: u64,
    pub dispatch_queue_capacity: usize,
}

impl Default for CspConfig {
    fn default() -> Self {
        Self {
            own_address: 0,
            buffer_count: 16,
            buffer_size: 256,
            pbuf_capacity: 8,
            pbuf_timeout_ms: 10_000,
            dispatch_queue_capacity: 16,
        }
    }
}

impl CspConfig {
    pub fn builder() -> CspConfigBuilder {
        CspConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CspConfigBuilder {
    config: CspConfig,
}

impl CspConfigBuilder {
    pub fn own_address(mut self, address: u8) -> Self {
        self.config.own_address = address;
        self
    }

    pub fn buffers(mut self, count: usize, size: usize) -> Self {
        self.config.buffer_count = count;
        self.config.buffer_size = size;
        self
    }

    pub fn pbuf_table(mut self, capacity: usize, timeout_ms: u64) -> Self {
        self.config.pbuf_capacity = capacity;
        self.config.pbuf_timeout_ms = timeout_ms;
        self
    }

    pub fn dispatch_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatch_queue_capacity = capacity;
        self
    }

    pub fn build(self) -> CspResult<CspConfig> {
        if self.config.own_address > MAX_ADDRESS {
            return Err(CspError::Inval("own_address must be 0..=31"));
        }
        if self.config.buffer_count == 0 || self.config.buffer_size == 0 {
            return Err(CspError::NoMem);
        }
        Ok(self.config)
    }
}
