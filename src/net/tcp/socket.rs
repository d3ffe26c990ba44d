//! Per-connection socket glue (spec §4.K), binding a `Connection` to the
//! shared `SocketBuffer` every protocol uses for received data and to a
//! `timer::DelayedAck`, grounded on `tcp_timer.c`'s delayed-ACK start/stop
//! calls from the receive path. `input::segment_arrives` is a pure
//! function and has no way to start a timer or enqueue data itself; this
//! is the stateful driver that does both.

use crate::error::KResult;
use crate::net::ip::LinkLayer;
use crate::net::packet::{Packet, IPPROTO_TCP};
use crate::net::route::RouteTable;
use crate::net::socket::SocketBuffer;
use crate::net::tcp::timer::DelayedAck;
use crate::net::tcp::{input, output, Connection, Flags, Segment, State};
use crate::sync::mutex::{Mutex, Parker};

/// Ticks to hold a pure ACK before sending it standalone, giving a reply
/// or further data a chance to piggyback it instead (spec §4.K).
pub const DELAYED_ACK_TICKS: u64 = 20;

pub struct TcpSocket {
    conn: Mutex<Connection>,
    delack: Mutex<DelayedAck>,
    pub recv: SocketBuffer,
}

impl TcpSocket {
    pub fn new(conn: Connection) -> Self {
        TcpSocket {
            conn: Mutex::new(conn),
            delack: Mutex::new(DelayedAck::new()),
            recv: SocketBuffer::new(),
        }
    }

    pub fn state(&self, parker: &dyn Parker) -> State {
        self.conn.lock(parker).state
    }

    /// Feed one incoming segment through the state machine. Delivered data
    /// goes straight to `recv`; whether to ack immediately or coalesce is
    /// decided the way `tcp_delack_timer_start` is: a segment that itself
    /// carried data or a FIN gets acked right away, a bare in-window ACK
    /// (nothing new to report) can wait for the delayed-ack timer.
    pub fn receive(&self, seg: &Segment, now_tick: u64, routes: &RouteTable, iface: &dyn LinkLayer, parker: &dyn Parker) -> KResult<()> {
        let mut conn = self.conn.lock(parker);
        let outcome = if conn.state == State::SynSent {
            input::syn_sent(&mut conn, seg)
        } else {
            input::segment_arrives(&mut conn, seg)
        };

        let (src_addr, src_port, dest_addr, dest_port) = (conn.dest_addr, conn.dest_port, conn.src_addr, conn.src_port);

        if !outcome.deliver.is_empty() {
            self.recv.enqueue(Packet::new(IPPROTO_TCP, src_addr, src_port, dest_addr, dest_port, outcome.deliver), parker);
        }

        if outcome.send_ack {
            let needs_prompt_ack = !seg.payload.is_empty() || seg.flags.contains(Flags::FIN);
            if needs_prompt_ack {
                self.delack.lock(parker).stop();
                output::send_ack(&conn, routes, iface)?;
            } else {
                self.delack.lock(parker).start(now_tick, DELAYED_ACK_TICKS);
            }
        }

        Ok(())
    }

    /// Called on every tick (spec §4.K); sends the coalesced ACK once the
    /// delayed-ack timer fires.
    pub fn poll_delayed_ack(&self, now_tick: u64, routes: &RouteTable, iface: &dyn LinkLayer, parker: &dyn Parker) -> KResult<()> {
        if self.delack.lock(parker).poll(now_tick) {
            let conn = self.conn.lock(parker);
            output::send_ack(&conn, routes, iface)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    use crate::net::ip;
    use crate::sync::waitqueue::TaskId;

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
        sent: core::cell::RefCell<Vec<Vec<u8>>>,
    }
    impl LinkLayer for FakeIface {
        fn name(&self) -> &'static str {
            "eth0"
        }
        fn is_up(&self) -> bool {
            true
        }
        fn transmit(&self, datagram: &[u8]) -> KResult<()> {
            self.sent.borrow_mut().push(datagram.to_vec());
            Ok(())
        }
    }

    fn routes() -> RouteTable {
        let routes = RouteTable::new();
        routes.add(0, 0, 0, "eth0", false);
        routes
    }

    fn seg(flags: Flags, seq: u32, ack_seq: u32, payload: &[u8]) -> Segment {
        Segment { source_port: 80, dest_port: 4000, seq, ack_seq, flags, window: 4096, payload: payload.to_vec() }
    }

    #[test]
    fn data_segment_delivers_to_recv_and_acks_immediately() {
        let mut conn = Connection::new_active(0x0A000001, 4000, 0x0A0000FF, 80, 100, 4096);
        conn.state = State::Established;
        conn.rcv_nxt = 500;
        conn.snd_una = 100;
        conn.snd_nxt = 101;
        let sock = TcpSocket::new(conn);
        let parker = StubParker;
        let iface = FakeIface { sent: core::cell::RefCell::new(Vec::new()) };

        let data = seg(Flags::ACK | Flags::PSH, 500, 101, b"hello");
        sock.receive(&data, 0, &routes(), &iface, &parker).unwrap();

        let packet = sock.recv.recv(true, 1, &parker).unwrap();
        assert_eq!(packet.data, b"hello");
        assert_eq!(iface.sent.borrow().len(), 1);
        let segment = crate::net::tcp::parse(0x0A000001, 0x0A0000FF, &iface.sent.borrow()[0][ip::IP_HEADER_LEN..]).unwrap();
        assert!(segment.flags.contains(Flags::ACK));
    }

    #[test]
    fn bare_ack_request_is_coalesced_until_the_timer_fires() {
        let mut conn = Connection::new_active(0x0A000001, 4000, 0x0A0000FF, 80, 100, 4096);
        conn.state = State::Established;
        conn.rcv_nxt = 500;
        let sock = TcpSocket::new(conn);
        let parker = StubParker;
        let iface = FakeIface { sent: core::cell::RefCell::new(Vec::new()) };

        // Stale sequence: sequence_valid() fails, segment_arrives() asks
        // for a bare ack with nothing new to report.
        let stale = seg(Flags::ACK, 10, 101, &[]);
        sock.receive(&stale, 0, &routes(), &iface, &parker).unwrap();
        assert!(iface.sent.borrow().is_empty());

        sock.poll_delayed_ack(DELAYED_ACK_TICKS, &routes(), &iface, &parker).unwrap();
        assert_eq!(iface.sent.borrow().len(), 1);
    }
}
