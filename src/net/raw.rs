//! Raw IP sockets (spec §4.L), grounded on
//! `examples/original_source/src/net/ipv4/ip_raw.c`.
//!
//! Unlike UDP/TCP, a raw socket is keyed by protocol and source address
//! alone and receives whole IP datagrams unchanged (`ip_raw_rx` just
//! queues the packet, no header stripped).

use alloc::vec::Vec;

use crate::error::KResult;
use crate::net::ip::{self, LinkLayer};
use crate::net::packet::{Ipv4Addr, Packet, INADDR_ANY};
use crate::net::route::RouteTable;
use crate::net::socket::{SocketBuffer, SocketKey};
use crate::sync::mutex::Parker;
use crate::sync::spinlock::IrqSpinlock;
use crate::sync::waitqueue::TaskId;

pub struct RawSocket {
    protocol: u8,
    src_addr: IrqSpinlock<Ipv4Addr>,
    pub recv: SocketBuffer,
}

impl RawSocket {
    pub fn new(protocol: u8) -> Self {
        RawSocket { protocol, src_addr: IrqSpinlock::new(INADDR_ANY), recv: SocketBuffer::new() }
    }

    pub fn key(&self) -> SocketKey {
        SocketKey { proto: self.protocol, src_port: 0, src_addr: *self.src_addr.acquire(), dest_port: 0, dest_addr: INADDR_ANY }
    }

    /// `ip_raw_bind`.
    pub fn bind(&self, addr: Ipv4Addr) {
        *self.src_addr.acquire() = addr;
    }

    /// `ip_raw_autobind`.
    pub fn autobind(&self) {
        *self.src_addr.acquire() = INADDR_ANY;
    }

    pub fn getsockname(&self) -> Ipv4Addr {
        *self.src_addr.acquire()
    }

    /// `ip_raw_sendto`: the caller already built the full IP payload
    /// (header fields beyond source/dest are this socket's responsibility
    /// upstream, e.g. ICMP's own checksum); this just routes and transmits.
    pub fn sendto(&self, payload: &[u8], dest_addr: Ipv4Addr, routes: &RouteTable, iface: &dyn LinkLayer) -> KResult<()> {
        let route = routes.lookup(dest_addr)?;
        let src_addr = *self.src_addr.acquire();
        ip::transmit(&route, iface, self.protocol, src_addr, payload)
    }

    /// `ip_raw_rx`: whole datagram enqueued unchanged.
    pub fn receive(&self, src_addr: Ipv4Addr, datagram: Vec<u8>, parker: &dyn Parker) {
        self.recv.enqueue(Packet::new(self.protocol, src_addr, 0, *self.src_addr.acquire(), 0, datagram), parker);
    }

    pub fn recv(&self, nonblock: bool, me: TaskId, parker: &dyn Parker) -> Option<Packet> {
        self.recv.recv(nonblock, me, parker)
    }
}
