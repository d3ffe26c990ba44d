//! Socket demultiplexing (spec §4.L "Socket demux"), grounded on
//! `examples/original_source/src/net/ipv4/ip_socket_lookup.c`'s
//! `__ipaf_find_socket`, plus the per-socket receive buffer every protocol
//! (UDP, raw, TCP) shares.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::net::packet::{Ipv4Addr, Packet, INADDR_ANY};
use crate::sync::mutex::{Mutex, Parker};
use crate::sync::waitqueue::WaitQueue;

pub const MAX_SOCKET_SCORE: u32 = 4;

/// The 5-tuple (minus protocol duplication) an incoming packet is scored
/// against.
#[derive(Debug, Clone, Copy)]
pub struct SocketKey {
    pub proto: u8,
    pub src_port: u16,
    pub src_addr: Ipv4Addr,
    pub dest_port: u16,
    pub dest_addr: Ipv4Addr,
}

/// `__ipaf_find_socket`: each non-wildcard field that matches scores one
/// point; the highest-scoring socket wins, ties keep the first found,
/// with an early return the moment every field matches.
pub fn score(bound: &SocketKey, incoming: &SocketKey) -> Option<u32> {
    if bound.proto != incoming.proto {
        return None;
    }
    let mut matched = 0u32;

    if bound.src_port != 0 {
        if bound.src_port != incoming.src_port {
            return None;
        }
        matched += 1;
    }
    if bound.src_addr != INADDR_ANY {
        if bound.src_addr != incoming.src_addr {
            return None;
        }
        matched += 1;
    }
    if bound.dest_port != 0 {
        if bound.dest_port != incoming.dest_port {
            return None;
        }
        matched += 1;
    }
    if bound.dest_addr != INADDR_ANY {
        if bound.dest_addr != incoming.dest_addr {
            return None;
        }
        matched += 1;
    }
    Some(matched)
}

pub fn find_socket<'a, T>(sockets: &'a [T], key_of: impl Fn(&T) -> SocketKey, incoming: &SocketKey) -> Option<&'a T> {
    let mut best: Option<(&'a T, u32)> = None;
    for sock in sockets {
        let Some(s) = score(&key_of(sock), incoming) else { continue };
        if s == MAX_SOCKET_SCORE {
            return Some(sock);
        }
        if best.is_none_or(|(_, best_score)| s > best_score) {
            best = Some((sock, s));
        }
    }
    best.map(|(s, _)| s)
}

/// The sleepable receive buffer every socket type (`udp::UdpSocket`,
/// `raw::RawSocket`, a TCP connection's `net::tcp::Connection`) embeds.
pub struct SocketBuffer {
    queue: Mutex<VecDeque<Packet>>,
    readers: WaitQueue,
}

impl SocketBuffer {
    pub fn new() -> Self {
        SocketBuffer {
            queue: Mutex::new(VecDeque::new()),
            readers: WaitQueue::new(),
        }
    }

    pub fn enqueue(&self, packet: Packet, parker: &dyn Parker) {
        self.queue.lock(parker).push_back(packet);
        self.readers.wake_all(|id| {
            parker.wake(id);
        });
    }

    /// Returns `None` immediately when empty and `nonblock`; otherwise
    /// parks until a packet arrives.
    pub fn recv(&self, nonblock: bool, me: crate::sync::waitqueue::TaskId, parker: &dyn Parker) -> Option<Packet> {
        loop {
            let mut guard = self.queue.lock(parker);
            if let Some(packet) = guard.pop_front() {
                return Some(packet);
            }
            if nonblock {
                return None;
            }
            drop(guard);
            self.readers.register(me);
            parker.park_and_yield(me, true);
            self.readers.unregister(me);
        }
    }

    pub fn is_empty(&self, parker: &dyn Parker) -> bool {
        self.queue.lock(parker).is_empty()
    }
}

impl Default for SocketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(proto: u8, src_port: u16, src_addr: u32, dest_port: u16, dest_addr: u32) -> SocketKey {
        SocketKey { proto, src_port, src_addr, dest_port, dest_addr }
    }

    #[test]
    fn exact_match_outscores_wildcard_listener() {
        let listener = key(17, 0, 0, 80, 0);
        let connected = key(17, 4000, 0x0A000001, 80, 0x0A0000FF);
        let sockets = [listener, connected];
        let incoming = key(17, 4000, 0x0A000001, 80, 0x0A0000FF);

        let found = find_socket(&sockets, |s| *s, &incoming).unwrap();
        assert_eq!(found.src_addr, 0x0A000001);
    }

    #[test]
    fn wildcard_listener_matches_when_nothing_more_specific_exists() {
        let listener = key(17, 0, 0, 80, 0);
        let sockets = [listener];
        let incoming = key(17, 4000, 0x0A000001, 80, 0x0A0000FF);
        assert!(find_socket(&sockets, |s| *s, &incoming).is_some());
    }

    #[test]
    fn mismatched_protocol_never_matches() {
        let sockets = [key(6, 0, 0, 80, 0)];
        let incoming = key(17, 0, 0, 80, 0);
        assert!(find_socket(&sockets, |s| *s, &incoming).is_none());
    }

    #[test]
    fn non_wildcard_field_mismatch_excludes_the_socket() {
        let sockets = [key(17, 81, 0, 0, 0)];
        let incoming = key(17, 80, 0, 0, 0);
        assert!(find_socket(&sockets, |s| *s, &incoming).is_none());
    }
}
