//! `/proc` surface (spec §6), supplemented per
//! `examples/original_source/src/net/ipv4/tcp_procfs.c` and the pack's
//! `procfs` example (`other_examples/..._procfs-pid-task-stat.rs.rs`).
//!
//! Each file is a line-oriented sequence generator rather than a live VFS
//! inode: callers snapshot the owning subsystem's state into one of the
//! small `*Row` structs below (scheduler task table, IDT handler counts,
//! routing table, TCP/UDP socket tables) and hand it to the matching
//! `render_*` function, which is a pure function over that snapshot and is
//! exercised directly in tests without needing a live scheduler or network
//! stack. `/proc/devices` is the one stateful exception: it drains a real
//! event ring (`sync::ring::RingBuffer`) so an `O_NONBLOCK` reader observes
//! `(type, add|remove, major, minor)` hotplug events rather than a
//! recomputed snapshot.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::sync::ring::RingBuffer;
use crate::sync::spinlock::IrqSpinlock;

pub const KERNEL_VERSION: &str = "0.1.0";

/// One row of `/proc/tasks`.
pub struct TaskRow {
    pub pid: u64,
    pub name: &'static str,
    /// `R`unning, `S`leeping, `D`isk-sleep (uninterruptible), `Z`ombie.
    pub state: char,
    pub ticks: u64,
}

pub fn render_tasks(rows: &[TaskRow]) -> Vec<String> {
    let mut lines = alloc::vec![format!("{:>6} {:<16} {:<1} {:>10}", "PID", "NAME", "S", "TICKS")];
    for r in rows {
        lines.push(format!("{:>6} {:<16} {:<1} {:>10}", r.pid, r.name, r.state, r.ticks));
    }
    lines
}

/// One row of `/proc/interrupts`: a vector index plus how many handlers are
/// chained on it and how many times it has fired.
pub struct InterruptRow {
    pub vector: u8,
    pub handlers: usize,
    pub count: u64,
}

pub fn render_interrupts(rows: &[InterruptRow]) -> Vec<String> {
    rows.iter()
        .filter(|r| r.handlers > 0)
        .map(|r| format!("{:>3}: {:>10} {} handler(s)", r.vector, r.count, r.handlers))
        .collect()
}

pub fn render_filesystems(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| format!("nodev\t{n}")).collect()
}

pub struct MountRow {
    pub device: String,
    pub mount_point: String,
    pub fs_type: &'static str,
    pub read_only: bool,
}

pub fn render_mounts(rows: &[MountRow]) -> Vec<String> {
    rows.iter()
        .map(|r| {
            format!(
                "{} {} {} {} 0 0",
                r.device,
                r.mount_point,
                r.fs_type,
                if r.read_only { "ro" } else { "rw" }
            )
        })
        .collect()
}

/// `/proc/uptime`: seconds since boot and idle-task seconds, derived from
/// the scheduler's tick counter (`config::TIMER_TICKS_PER_SEC`).
pub fn render_uptime(ticks_since_boot: u64, idle_ticks: u64, ticks_per_sec: u32) -> Vec<String> {
    let hz = ticks_per_sec as u64;
    alloc::vec![format!(
        "{}.{:02} {}.{:02}",
        ticks_since_boot / hz,
        (ticks_since_boot % hz) * 100 / hz,
        idle_ticks / hz,
        (idle_ticks % hz) * 100 / hz,
    )]
}

pub fn render_version() -> Vec<String> {
    alloc::vec![format!("kernel version {KERNEL_VERSION}")]
}

/// `/proc/net/route`: one row per routing table entry (spec §4.L longest
/// prefix match table).
pub struct RouteRow {
    pub iface: &'static str,
    pub destination: u32,
    pub gateway: u32,
    pub mask: u32,
}

pub fn render_route(rows: &[RouteRow]) -> Vec<String> {
    let mut lines = alloc::vec![String::from("Iface\tDestination\tGateway \tMask")];
    for r in rows {
        lines.push(format!(
            "{}\t{:08X}\t{:08X}\t{:08X}",
            r.iface, r.destination, r.gateway, r.mask
        ));
    }
    lines
}

pub struct NetDevRow {
    pub iface: &'static str,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

pub fn render_netdev(rows: &[NetDevRow]) -> Vec<String> {
    let mut lines = alloc::vec![String::from("Iface RX-bytes RX-packets TX-bytes TX-packets")];
    for r in rows {
        lines.push(format!(
            "{} {} {} {} {}",
            r.iface, r.rx_bytes, r.rx_packets, r.tx_bytes, r.tx_packets
        ));
    }
    lines
}

pub struct UdpRow {
    pub local_addr: u32,
    pub local_port: u16,
    pub remote_addr: u32,
    pub remote_port: u16,
}

pub fn render_udp(rows: &[UdpRow]) -> Vec<String> {
    let mut lines = alloc::vec![String::from("local_address rem_address")];
    for r in rows {
        lines.push(format!(
            "{:08X}:{:04X} {:08X}:{:04X}",
            r.local_addr, r.local_port, r.remote_addr, r.remote_port
        ));
    }
    lines
}

/// `/proc/net/tcp`: grounded on `tcp_procfs.c`'s per-connection row, which
/// dumps the connection 4-tuple plus `tcp_state`.
pub struct TcpRow {
    pub local_addr: u32,
    pub local_port: u16,
    pub remote_addr: u32,
    pub remote_port: u16,
    pub state: &'static str,
}

pub fn render_tcp(rows: &[TcpRow]) -> Vec<String> {
    let mut lines = alloc::vec![String::from("local_address rem_address st")];
    for r in rows {
        lines.push(format!(
            "{:08X}:{:04X} {:08X}:{:04X} {}",
            r.local_addr, r.local_port, r.remote_addr, r.remote_port, r.state
        ));
    }
    lines
}

pub struct PciDeviceRow {
    pub bus: u8,
    pub slot: u8,
    pub function: u8,
    pub vendor_id: u16,
    pub device_id: u16,
}

pub fn render_pci_devices(rows: &[PciDeviceRow]) -> Vec<String> {
    rows.iter()
        .map(|r| {
            format!(
                "{:02x}:{:02x}.{} {:04x}:{:04x}",
                r.bus, r.slot, r.function, r.vendor_id, r.device_id
            )
        })
        .collect()
}

/// `/proc/devices`: device hotplug events, delivered through a ring rather
/// than recomputed per read (spec §6: "O_NONBLOCK-capable... drains an
/// internal event ring").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub device_type: &'static str,
    pub major: u32,
    pub minor: u32,
}

pub struct DeviceEventRing {
    ring: IrqSpinlock<RingBuffer<DeviceEvent>>,
}

impl DeviceEventRing {
    pub fn new(capacity: usize) -> Self {
        DeviceEventRing {
            ring: IrqSpinlock::new(RingBuffer::new(capacity)),
        }
    }

    pub fn publish(&self, event: DeviceEvent) {
        self.ring.acquire().push_overwrite(event);
    }

    /// Drain every event queued so far, formatted as
    /// `(type, add|remove, major, minor)` text rows. A non-blocking reader
    /// that finds this empty should treat it as `EAGAIN`, not EOF.
    pub fn drain(&self) -> Vec<String> {
        let mut g = self.ring.acquire();
        let mut lines = Vec::new();
        while let Some(ev) = g.pop() {
            let verb = match ev.kind {
                DeviceEventKind::Add => "add",
                DeviceEventKind::Remove => "remove",
            };
            lines.push(format!("{} {} {} {}", ev.device_type, verb, ev.major, ev.minor));
        }
        lines
    }

    pub fn is_empty(&self) -> bool {
        self.ring.acquire().is_empty()
    }
}
