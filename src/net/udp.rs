//! UDP sockets (spec §4.L), grounded on
//! `examples/original_source/src/net/ipv4/udp.c`.

use alloc::vec::Vec;

use crate::error::{Errno, KResult};
use crate::net::checksum;
use crate::net::ip::{self, LinkLayer};
use crate::net::packet::{Ipv4Addr, Packet, INADDR_ANY, IPPROTO_UDP};
use crate::net::route::RouteTable;
use crate::net::socket::{SocketBuffer, SocketKey};
use crate::sync::mutex::Parker;
use crate::sync::spinlock::IrqSpinlock;
use crate::sync::waitqueue::TaskId;

pub const UDP_HEADER_LEN: usize = 8;
const LOWEST_AUTOBIND_PORT: u16 = 50000;

/// `udp_find_port`: a single monotonically-wrapping counter shared by every
/// socket autobinding on this address family.
pub struct PortAllocator {
    next: IrqSpinlock<u16>,
}

impl PortAllocator {
    pub fn new() -> Self {
        PortAllocator { next: IrqSpinlock::new(LOWEST_AUTOBIND_PORT) }
    }

    pub fn allocate(&self) -> u16 {
        let mut next = self.next.acquire();
        let port = *next;
        *next = next.checked_add(1).unwrap_or(LOWEST_AUTOBIND_PORT);
        if *next == 0 {
            *next = LOWEST_AUTOBIND_PORT;
        }
        port
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unconnected,
    Connected,
}

pub struct UdpSocket {
    src_addr: IrqSpinlock<Ipv4Addr>,
    src_port: IrqSpinlock<u16>,
    dest_addr: IrqSpinlock<Ipv4Addr>,
    dest_port: IrqSpinlock<u16>,
    state: IrqSpinlock<State>,
    pub recv: SocketBuffer,
}

impl UdpSocket {
    pub fn new() -> Self {
        UdpSocket {
            src_addr: IrqSpinlock::new(INADDR_ANY),
            src_port: IrqSpinlock::new(0),
            dest_addr: IrqSpinlock::new(INADDR_ANY),
            dest_port: IrqSpinlock::new(0),
            state: IrqSpinlock::new(State::Unconnected),
            recv: SocketBuffer::new(),
        }
    }

    pub fn key(&self) -> SocketKey {
        SocketKey {
            proto: IPPROTO_UDP,
            src_port: *self.src_port.acquire(),
            src_addr: *self.src_addr.acquire(),
            dest_port: *self.dest_port.acquire(),
            dest_addr: *self.dest_addr.acquire(),
        }
    }

    /// `udp_bind`: caller has already checked `existing` has no socket with
    /// this key via `socket::find_socket`.
    pub fn bind(&self, addr: Ipv4Addr, port: u16) -> KResult<()> {
        *self.src_addr.acquire() = addr;
        *self.src_port.acquire() = port;
        Ok(())
    }

    /// `udp_autobind`.
    pub fn autobind(&self, ports: &PortAllocator) {
        *self.src_addr.acquire() = INADDR_ANY;
        *self.src_port.acquire() = ports.allocate();
    }

    /// `udp_connect`.
    pub fn connect(&self, addr: Ipv4Addr, port: u16) {
        *self.dest_addr.acquire() = addr;
        *self.dest_port.acquire() = port;
        *self.state.acquire() = State::Connected;
    }

    pub fn is_connected(&self) -> bool {
        *self.state.acquire() == State::Connected
    }

    /// `udp_sendto`: builds the UDP header over `payload` and hands the
    /// datagram to `ip::transmit` via a route looked up from `routes`.
    pub fn sendto(
        &self,
        payload: &[u8],
        dest: Option<(Ipv4Addr, u16)>,
        routes: &RouteTable,
        iface: &dyn LinkLayer,
    ) -> KResult<()> {
        let (dest_addr, dest_port) = match dest {
            Some(pair) => pair,
            None if self.is_connected() => (*self.dest_addr.acquire(), *self.dest_port.acquire()),
            None => return Err(Errno::Inval),
        };

        let route = routes.lookup(dest_addr)?;
        let src_addr = *self.src_addr.acquire();
        let src_port = *self.src_port.acquire();

        let mut segment = Vec::with_capacity(UDP_HEADER_LEN + payload.len());
        segment.extend_from_slice(&src_port.to_be_bytes());
        segment.extend_from_slice(&dest_port.to_be_bytes());
        segment.extend_from_slice(&((UDP_HEADER_LEN + payload.len()) as u16).to_be_bytes());
        segment.extend_from_slice(&0u16.to_be_bytes());
        segment.extend_from_slice(payload);

        let csum = checksum::pseudo_header_checksum(src_addr, dest_addr, IPPROTO_UDP, &segment);
        segment[6..8].copy_from_slice(&csum.to_be_bytes());

        ip::transmit(&route, iface, IPPROTO_UDP, src_addr, &segment)
    }

    /// `udp_rx`: parses the header off the front of `segment` and enqueues
    /// the payload for `recv`.
    pub fn receive(&self, src_addr: Ipv4Addr, segment: &[u8], parker: &dyn Parker) -> KResult<()> {
        if segment.len() < UDP_HEADER_LEN {
            return Err(Errno::Io);
        }
        let source_port = u16::from_be_bytes([segment[0], segment[1]]);
        let dest_port = u16::from_be_bytes([segment[2], segment[3]]);
        let length = u16::from_be_bytes([segment[4], segment[5]]) as usize;
        let end = length.min(segment.len());
        let payload = segment[UDP_HEADER_LEN..end].to_vec();

        self.recv.enqueue(
            Packet::new(IPPROTO_UDP, src_addr, source_port, *self.src_addr.acquire(), dest_port, payload),
            parker,
        );
        Ok(())
    }

    pub fn recv(&self, nonblock: bool, me: TaskId, parker: &dyn Parker) -> Option<Packet> {
        self.recv.recv(nonblock, me, parker)
    }
}

impl Default for UdpSocket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubParker;
    impl Parker for StubParker {
        fn current(&self) -> TaskId {
            1
        }
        fn park_and_yield(&self, _id: TaskId, _interruptible: bool) {}
        fn wake(&self, _id: TaskId) -> bool {
            false
        }
    }

    struct FakeIface {
        up: bool,
        sent: core::cell::RefCell<Vec<Vec<u8>>>,
    }
    impl LinkLayer for FakeIface {
        fn name(&self) -> &'static str {
            "eth0"
        }
        fn is_up(&self) -> bool {
            self.up
        }
        fn transmit(&self, datagram: &[u8]) -> KResult<()> {
            self.sent.borrow_mut().push(datagram.to_vec());
            Ok(())
        }
    }

    fn routes_with_default() -> RouteTable {
        let routes = RouteTable::new();
        routes.add(0, 0, 0, "eth0", false);
        routes
    }

    #[test]
    fn autobind_allocates_increasing_ports() {
        let ports = PortAllocator::new();
        let a = ports.allocate();
        let b = ports.allocate();
        assert_eq!(b, a + 1);
        assert!(a >= LOWEST_AUTOBIND_PORT);
    }

    #[test]
    fn sendto_without_dest_or_connect_fails() {
        let sock = UdpSocket::new();
        let routes = routes_with_default();
        let iface = FakeIface { up: true, sent: core::cell::RefCell::new(Vec::new()) };
        assert_eq!(sock.sendto(&[1, 2, 3], None, &routes, &iface), Err(Errno::Inval));
    }

    #[test]
    fn sendto_after_connect_uses_connected_destination() {
        let sock = UdpSocket::new();
        sock.bind(0x0A000001, 4000);
        sock.connect(0x0A0000FF, 9000);
        let routes = routes_with_default();
        let iface = FakeIface { up: true, sent: core::cell::RefCell::new(Vec::new()) };
        sock.sendto(b"hello", None, &routes, &iface).unwrap();

        let sent = iface.sent.borrow();
        let datagram = &sent[0];
        let segment = &datagram[ip::IP_HEADER_LEN..];
        assert_eq!(u16::from_be_bytes([segment[0], segment[1]]), 4000);
        assert_eq!(u16::from_be_bytes([segment[2], segment[3]]), 9000);
        assert_eq!(&segment[UDP_HEADER_LEN..], b"hello");
    }

    #[test]
    fn receive_then_recv_round_trips_payload() {
        let sock = UdpSocket::new();
        sock.bind(0x0A0000FF, 9000);
        let parker = StubParker;

        let mut segment = Vec::new();
        segment.extend_from_slice(&4000u16.to_be_bytes());
        segment.extend_from_slice(&9000u16.to_be_bytes());
        segment.extend_from_slice(&((UDP_HEADER_LEN + 5) as u16).to_be_bytes());
        segment.extend_from_slice(&0u16.to_be_bytes());
        segment.extend_from_slice(b"hello");

        sock.receive(0x0A000001, &segment, &parker).unwrap();
        let packet = sock.recv(true, 1, &parker).unwrap();
        assert_eq!(packet.data, b"hello");
        assert_eq!(packet.src_port, 4000);
    }
}
