//! TCP engine (spec §4.K), grounded on
//! `examples/original_source/src/net/ipv4/{tcp.h,tcp_input.c,tcp_output.c,tcp_timer.c,tcp_data.c}`.
//!
//! The original's "Segment Arrives" handling is, in its own comment, "a
//! pretty literal translation of RFC793". This module keeps that shape:
//! `input::segment_arrives` mirrors `tcp_rx`'s switch-on-state structure
//! almost line for line.

pub mod input;
pub mod output;
pub mod socket;
pub mod timer;

use alloc::vec::Vec;

use crate::net::checksum;
use crate::net::packet::Ipv4Addr;

pub const TCP_HEADER_LEN: usize = 20;
const LOWEST_AUTOBIND_PORT: u16 = 50000;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const FIN = 1 << 0;
        const SYN = 1 << 1;
        const RST = 1 << 2;
        const PSH = 1 << 3;
        const ACK = 1 << 4;
        const URG = 1 << 5;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub source_port: u16,
    pub dest_port: u16,
    pub seq: u32,
    pub ack_seq: u32,
    pub flags: Flags,
    pub window: u16,
    pub payload: Vec<u8>,
}

/// `tcp_seq_before`: wraparound-safe 32-bit sequence comparison.
pub fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub fn seq_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Checks `seq1 < seq2 < seq3` with wraparound.
pub fn seq_between(seq1: u32, seq2: u32, seq3: u32) -> bool {
    seq_before(seq1, seq2) && seq_before(seq2, seq3)
}

/// Parses a TCP segment out of `data` (header + payload), verifying the
/// pseudo-header checksum the way `tcp_checksum_valid` does.
pub fn parse(src_addr: Ipv4Addr, dest_addr: Ipv4Addr, data: &[u8]) -> Option<Segment> {
    if data.len() < TCP_HEADER_LEN {
        return None;
    }
    let data_offset = ((data[12] >> 4) * 4) as usize;
    if data_offset < TCP_HEADER_LEN || data.len() < data_offset {
        return None;
    }

    if checksum::pseudo_header_checksum(src_addr, dest_addr, crate::net::packet::IPPROTO_TCP, data) != 0 {
        return None;
    }

    Some(Segment {
        source_port: u16::from_be_bytes([data[0], data[1]]),
        dest_port: u16::from_be_bytes([data[2], data[3]]),
        seq: u32::from_be_bytes(data[4..8].try_into().unwrap()),
        ack_seq: u32::from_be_bytes(data[8..12].try_into().unwrap()),
        flags: Flags::from_bits_truncate(data[13]),
        window: u16::from_be_bytes([data[14], data[15]]),
        payload: data[data_offset..].to_vec(),
    })
}

/// `tcp_state`: distilled from `enum tcp_state` in `tcp.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Close,
    Listen,
    SynSent,
    SynRecv,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// `tcp_socket_private`: the per-connection sequence-space bookkeeping
/// `tcp_input.c`/`tcp_output.c` thread through every packet.
#[derive(Debug, Clone)]
pub struct Connection {
    pub state: State,
    pub src_addr: Ipv4Addr,
    pub src_port: u16,
    pub dest_addr: Ipv4Addr,
    pub dest_port: u16,

    pub iss: u32,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub snd_wnd: u16,
    pub snd_wl1: u32,
    pub snd_wl2: u32,

    pub irs: u32,
    pub rcv_nxt: u32,
    pub rcv_wnd: u16,

    pub last_error: Option<crate::error::Errno>,

    /// Sequence number one past the last byte of the FIN we sent, once
    /// we've sent one. `input::segment_arrives` compares incoming
    /// `ack_seq` against this to detect when our FIN has been acked.
    pub fin_seq: Option<u32>,

    pub retransmit: RetransmitQueue,
}

impl Connection {
    pub fn new_active(src_addr: Ipv4Addr, src_port: u16, dest_addr: Ipv4Addr, dest_port: u16, iss: u32, rcv_wnd: u16) -> Self {
        Connection {
            state: State::Close,
            src_addr,
            src_port,
            dest_addr,
            dest_port,
            iss,
            snd_una: iss,
            snd_nxt: iss,
            snd_wnd: 0,
            snd_wl1: 0,
            snd_wl2: 0,
            irs: 0,
            rcv_nxt: 0,
            rcv_wnd,
            last_error: None,
            fin_seq: None,
            retransmit: RetransmitQueue::new(),
        }
    }
}

/// One segment sent but not yet acked, grounded on the
/// `/* FIXME: remove packets from retransmit queue */` comment in
/// `tcp_input.c`'s ACK handling — the original names the need but never
/// actually builds the queue it refers to.
#[derive(Debug, Clone)]
pub struct RetransmitEntry {
    /// Sequence number of the first byte/flag this entry covers.
    pub seq: u32,
    /// Number of sequence numbers it consumes (payload length, plus one
    /// if it carried a SYN or FIN).
    pub len: u32,
    /// The fully built segment (header + payload), ready to resend as-is.
    pub segment: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct RetransmitQueue {
    entries: Vec<RetransmitEntry>,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        RetransmitQueue { entries: Vec::new() }
    }

    /// Called by `output::send`/`send_syn` right after transmitting a
    /// segment that consumes sequence space.
    pub fn record(&mut self, seq: u32, len: u32, segment: Vec<u8>) {
        self.entries.push(RetransmitEntry { seq, len, segment });
    }

    /// Drop every entry fully covered by `snd_una`'s advance: this is the
    /// "remove packets from retransmit queue" step the original's ACK
    /// handling only ever commented on.
    pub fn ack(&mut self, snd_una: u32) {
        self.entries.retain(|e| seq_before(snd_una, e.seq.wrapping_add(e.len)));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetransmitEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_before_handles_wraparound() {
        assert!(seq_before(u32::MAX, 0));
        assert!(!seq_before(0, u32::MAX));
    }

    #[test]
    fn seq_between_checks_open_interval() {
        assert!(seq_between(10, 15, 20));
        assert!(!seq_between(10, 25, 20));
        assert!(!seq_between(10, 10, 20));
    }

    #[test]
    fn retransmit_queue_drops_entries_fully_covered_by_snd_una() {
        let mut q = RetransmitQueue::new();
        q.record(100, 10, alloc::vec![0u8; 1]);
        q.record(110, 5, alloc::vec![0u8; 1]);
        q.ack(110);
        let remaining: Vec<u32> = q.iter().map(|e| e.seq).collect();
        assert_eq!(remaining, alloc::vec![110]);
        assert!(!q.is_empty());
        q.ack(115);
        assert!(q.is_empty());
    }
}
