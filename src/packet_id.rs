//! CSP identifier bitfield codec and CRC32 append/verify (spec.md §3, §4.2).
//!
//! The 32-bit identifier is packed MSB to LSB as: priority(2), source(5),
//! destination(5), destination port(6), source port(6), reserved(4), hmac
//! flag(1), xtea flag(1), rdp flag(1), crc32 flag(1). It is carried on the
//! wire in network byte order, matching `csp_hton32`/`csp_ntoh32` call
//! sites throughout `csp_if_can.c`/`csp_if_kiss.c`.

use serde::Serialize;

use crate::error::{CspError, CspResult};

/// Sentinel address meaning "broadcast/any" (spec.md §3).
pub const CSP_ANY: u8 = 255;

const PRIORITY_BITS: u32 = 2;
const ADDR_BITS: u32 = 5;
const PORT_BITS: u32 = 6;
const RESERVED_BITS: u32 = 4;

const CRC_SHIFT: u32 = 0;
const RDP_SHIFT: u32 = CRC_SHIFT + 1;
const XTEA_SHIFT: u32 = RDP_SHIFT + 1;
const HMAC_SHIFT: u32 = XTEA_SHIFT + 1;
const RESERVED_SHIFT: u32 = HMAC_SHIFT + 1;
const SPORT_SHIFT: u32 = RESERVED_SHIFT + RESERVED_BITS;
const DPORT_SHIFT: u32 = SPORT_SHIFT + PORT_BITS;
const DST_SHIFT: u32 = DPORT_SHIFT + PORT_BITS;
const SRC_SHIFT: u32 = DST_SHIFT + ADDR_BITS;
const PRIO_SHIFT: u32 = SRC_SHIFT + ADDR_BITS;

fn mask(bits: u32) -> u32 {
    (1u32 << bits) - 1
}

/// The 32-bit CSP header identifier, decoded into its constituent fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CspId {
    pub priority: u8,
    pub source: u8,
    pub destination: u8,
    pub destination_port: u8,
    pub source_port: u8,
    pub reserved: u8,
    pub hmac: bool,
    pub xtea: bool,
    pub rdp: bool,
    pub crc: bool,
}

impl Default for CspId {
    fn default() -> Self {
        Self {
            priority: 0,
            source: 0,
            destination: 0,
            destination_port: 0,
            source_port: 0,
            reserved: 0,
            hmac: false,
            xtea: false,
            rdp: false,
            crc: false,
        }
    }
}

impl CspId {
    /// Validates source/destination are within the 5-bit address space or
    /// the broadcast sentinel (spec.md §3 invariant).
    pub fn validate_addresses(&self) -> CspResult<()> {
        let ok = |a: u8| a <= 31 || a == CSP_ANY;
        if !ok(self.source) || !ok(self.destination) {
            return Err(CspError::Inval("source/destination out of range"));
        }
        Ok(())
    }

    /// Packs the fields into the 32-bit host-order identifier.
    pub fn to_u32(self) -> u32 {
        (u32::from(self.priority) & mask(PRIORITY_BITS)) << PRIO_SHIFT
            | (u32::from(self.source) & mask(ADDR_BITS)) << SRC_SHIFT
            | (u32::from(self.destination) & mask(ADDR_BITS)) << DST_SHIFT
            | (u32::from(self.destination_port) & mask(PORT_BITS)) << DPORT_SHIFT
            | (u32::from(self.source_port) & mask(PORT_BITS)) << SPORT_SHIFT
            | (u32::from(self.reserved) & mask(RESERVED_BITS)) << RESERVED_SHIFT
            | (self.hmac as u32) << HMAC_SHIFT
            | (self.xtea as u32) << XTEA_SHIFT
            | (self.rdp as u32) << RDP_SHIFT
            | (self.crc as u32) << CRC_SHIFT
    }

    /// Unpacks a 32-bit host-order identifier into its fields.
    pub fn from_u32(raw: u32) -> Self {
        Self {
            priority: ((raw >> PRIO_SHIFT) & mask(PRIORITY_BITS)) as u8,
            source: ((raw >> SRC_SHIFT) & mask(ADDR_BITS)) as u8,
            destination: ((raw >> DST_SHIFT) & mask(ADDR_BITS)) as u8,
            destination_port: ((raw >> DPORT_SHIFT) & mask(PORT_BITS)) as u8,
            source_port: ((raw >> SPORT_SHIFT) & mask(PORT_BITS)) as u8,
            reserved: ((raw >> RESERVED_SHIFT) & mask(RESERVED_BITS)) as u8,
            hmac: (raw >> HMAC_SHIFT) & 1 != 0,
            xtea: (raw >> XTEA_SHIFT) & 1 != 0,
            rdp: (raw >> RDP_SHIFT) & 1 != 0,
            crc: (raw >> CRC_SHIFT) & 1 != 0,
        }
    }

    /// Encodes to the 4-byte network-byte-order wire representation.
    pub fn to_network_bytes(self) -> [u8; 4] {
        self.to_u32().to_be_bytes()
    }

    /// Decodes from the 4-byte network-byte-order wire representation.
    pub fn from_network_bytes(bytes: [u8; 4]) -> Self {
        Self::from_u32(u32::from_be_bytes(bytes))
    }
}

/// Appends a little-endian CRC32 (IEEE polynomial, via `crc32fast`) computed
/// over the encoded identifier and the packet payload, and sets the CRC
/// flag. Matches `csp_crc32_append`'s contract in spec.md §4.2.
pub fn crc32_append(id: CspId, payload: &[u8]) -> (CspId, [u8; 4]) {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&id.to_network_bytes());
    hasher.update(payload);
    let crc = hasher.finalize();
    let mut id = id;
    id.crc = true;
    (id, crc.to_le_bytes())
}

/// Verifies a trailing little-endian CRC32 against the identifier and the
/// payload preceding it. On success, returns the identifier with the CRC
/// flag cleared (spec.md §4.2: "verify clears the CRC flag on success").
pub fn crc32_verify(id: CspId, payload_with_crc: &[u8]) -> CspResult<(CspId, &[u8])> {
    if payload_with_crc.len() < 4 {
        return Err(CspError::Inval("frame too short to carry a CRC32"));
    }
    let split_at = payload_with_crc.len() - 4;
    let (payload, tail) = payload_with_crc.split_at(split_at);
    let expected = u32::from_le_bytes(tail.try_into().unwrap());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&id.to_network_bytes());
    hasher.update(payload);
    let actual = hasher.finalize();

    if actual != expected {
        return Err(CspError::Inval("CRC32 mismatch"));
    }
    let mut id = id;
    id.crc = false;
    Ok((id, payload))
}
