//! Segment construction (spec §4.K), grounded on
//! `examples/original_source/src/net/ipv4/tcp_output.c`.

use alloc::vec::Vec;

use crate::error::KResult;
use crate::net::checksum;
use crate::net::ip::{self, LinkLayer};
use crate::net::packet::IPPROTO_TCP;
use crate::net::route::RouteTable;
use crate::net::tcp::{Connection, Flags, TCP_HEADER_LEN};

fn build_segment(conn: &Connection, flags: Flags, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut segment = alloc::vec![0u8; TCP_HEADER_LEN + payload.len()];
    segment[0..2].copy_from_slice(&conn.src_port.to_be_bytes());
    segment[2..4].copy_from_slice(&conn.dest_port.to_be_bytes());
    segment[4..8].copy_from_slice(&seq.to_be_bytes());
    segment[8..12].copy_from_slice(&conn.rcv_nxt.to_be_bytes());
    segment[12] = ((TCP_HEADER_LEN / 4) as u8) << 4;
    segment[13] = flags.bits();
    segment[14..16].copy_from_slice(&conn.rcv_wnd.to_be_bytes());
    segment[20..].copy_from_slice(payload);

    let csum = checksum::pseudo_header_checksum(conn.src_addr, conn.dest_addr, IPPROTO_TCP, &segment);
    segment[16..18].copy_from_slice(&csum.to_be_bytes());
    segment
}

/// `tcp_send`: ships a segment carrying `payload` at `conn.snd_nxt`,
/// advancing it by the payload length (plus one more if this segment
/// carries a FIN, which consumes a sequence number of its own), and
/// records it on the retransmit queue so an unacked send can be resent.
pub fn send(conn: &mut Connection, flags: Flags, payload: &[u8], routes: &RouteTable, iface: &dyn LinkLayer) -> KResult<()> {
    let seq = conn.snd_nxt;
    let full_flags = flags | Flags::ACK;
    let segment = build_segment(conn, full_flags, seq, payload);
    let route = routes.lookup(conn.dest_addr)?;
    ip::transmit(&route, iface, IPPROTO_TCP, conn.src_addr, &segment)?;

    let seq_len = payload.len() as u32 + if full_flags.contains(Flags::FIN) { 1 } else { 0 };
    if seq_len > 0 {
        conn.retransmit.record(seq, seq_len, segment);
    }
    if full_flags.contains(Flags::FIN) {
        conn.fin_seq = Some(seq.wrapping_add(payload.len() as u32));
    }
    conn.snd_nxt = conn.snd_nxt.wrapping_add(seq_len);
    Ok(())
}

/// `tcp_send_syn`: the initial SYN carries no ack and consumes one sequence
/// number.
pub fn send_syn(conn: &mut Connection, routes: &RouteTable, iface: &dyn LinkLayer) -> KResult<()> {
    let segment = build_segment(conn, Flags::SYN, conn.iss, &[]);
    let route = routes.lookup(conn.dest_addr)?;
    ip::transmit(&route, iface, IPPROTO_TCP, conn.src_addr, &segment)?;
    conn.retransmit.record(conn.iss, 1, segment);
    conn.snd_nxt = conn.iss.wrapping_add(1);
    Ok(())
}

/// `tcp_send_ack`: a bare ACK, doesn't advance `snd_nxt`.
pub fn send_ack(conn: &Connection, routes: &RouteTable, iface: &dyn LinkLayer) -> KResult<()> {
    let segment = build_segment(conn, Flags::ACK, conn.snd_nxt, &[]);
    let route = routes.lookup(conn.dest_addr)?;
    ip::transmit(&route, iface, IPPROTO_TCP, conn.src_addr, &segment)
}
