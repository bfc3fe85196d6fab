//! Upper-layer interface to the RDP reliability state machine (spec.md §6):
//! an opaque collaborator. This crate only recognizes that a received
//! packet's identifier carries the RDP flag and hands it off; the
//! retransmit/reorder/ack machinery itself is out of scope (spec.md §1).

use crate::buffer::Packet;

/// Receives packets whose [`crate::packet_id::CspId::rdp`] flag is set.
/// Implementations own reassembly, ordering, and retransmission; this core
/// only routes matching packets here instead of to ordinary local delivery.
pub trait RdpSink: Send + Sync {
    fn accept(&self, packet: Packet);
}
