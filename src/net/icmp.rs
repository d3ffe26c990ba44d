//! ICMP echo handling (spec §4.L), grounded on
//! `examples/original_source/src/net/ipv4/icmp.c`.
//!
//! The original dispatches echo replies through a worker thread since the
//! handler itself sends a packet (`socket_sendto` on its own raw socket),
//! and doing that straight off the packet-processing path could deadlock
//! against the very queue it's servicing. This reply is built as a plain
//! function instead; the caller decides whether to run it inline or hand
//! it to a worker, matching how the rest of this crate keeps dispatch and
//! policy apart.

use alloc::vec::Vec;

use crate::net::checksum;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const ICMP_HEADER_LEN: usize = 8;

/// Given an inbound ICMP datagram (header + payload, checksum as received),
/// returns the reply datagram to send back to the same source, or `None`
/// for any type besides echo-request.
pub fn build_reply(datagram: &[u8]) -> Option<Vec<u8>> {
    if datagram.len() < ICMP_HEADER_LEN || datagram[0] != TYPE_ECHO_REQUEST {
        return None;
    }
    let mut reply = datagram.to_vec();
    reply[0] = TYPE_ECHO_REPLY;
    reply[2] = 0;
    reply[3] = 0;
    let csum = checksum::checksum(&reply);
    reply[2..4].copy_from_slice(&csum.to_be_bytes());
    Some(reply)
}
