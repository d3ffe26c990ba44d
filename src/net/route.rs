//! IP routing table (spec §4.L), grounded on
//! `examples/original_source/src/net/ipv4/ip_route.c`.
//!
//! 33 zones indexed by prefix length (0 = default route, 32 = host route).
//! Lookup scans from the most specific zone down, exactly as `ip_route_get`
//! does, so a host route always wins over a matching supernet.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Errno, KResult};
use crate::net::packet::Ipv4Addr;
use crate::sync::spinlock::IrqSpinlock;

fn netmask_for_prefix(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    }
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub dest: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub iface: String,
    pub is_gateway: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub dest: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub iface: String,
    pub is_gateway: bool,
}

struct Zone {
    mask: u32,
    entries: Vec<RouteEntry>,
}

pub struct RouteTable {
    zones: IrqSpinlock<[Zone; 33]>,
    /// `iface_up`: kept separate from `RouteEntry` since "up" is a property
    /// of the interface, not the route, the way `NET_IFACE_UP` is checked
    /// against `route->iface->flags` at lookup time rather than cached.
    up_check: fn(&str) -> bool,
}

fn always_up(_: &str) -> bool {
    true
}

impl RouteTable {
    pub fn new() -> Self {
        Self::with_up_check(always_up)
    }

    pub fn with_up_check(up_check: fn(&str) -> bool) -> Self {
        let zones = core::array::from_fn(|i| Zone {
            mask: netmask_for_prefix(i as u8),
            entries: Vec::new(),
        });
        RouteTable { zones: IrqSpinlock::new(zones), up_check }
    }

    /// `ip_route_add`: `prefix_len` is the netmask's bit count (`/24`, etc).
    pub fn add(&self, dest: Ipv4Addr, gateway: Ipv4Addr, prefix_len: u8, iface: &str, is_gateway: bool) {
        let mut zones = self.zones.acquire();
        let zone = &mut zones[prefix_len as usize];
        zone.entries.push(RouteEntry {
            dest: dest & zone.mask,
            gateway,
            iface: String::from(iface),
            is_gateway,
        });
    }

    /// `ip_route_del`.
    pub fn del(&self, dest: Ipv4Addr, prefix_len: u8) -> KResult<()> {
        let mut zones = self.zones.acquire();
        let zone = &mut zones[prefix_len as usize];
        let masked = dest & zone.mask;
        let before = zone.entries.len();
        zone.entries.retain(|e| e.dest != masked);
        if zone.entries.len() == before {
            Err(Errno::NoEnt)
        } else {
            Ok(())
        }
    }

    /// `ip_route_get`: most-specific (`/32` first) matching entry whose
    /// interface reports up.
    pub fn lookup(&self, query: Ipv4Addr) -> KResult<ResolvedRoute> {
        let zones = self.zones.acquire();
        for prefix_len in (0..=32u8).rev() {
            let zone = &zones[prefix_len as usize];
            for entry in &zone.entries {
                if !(self.up_check)(&entry.iface) {
                    continue;
                }
                if entry.dest == (query & zone.mask) {
                    return Ok(ResolvedRoute {
                        dest: query,
                        gateway: entry.gateway,
                        iface: entry.iface.clone(),
                        is_gateway: entry.is_gateway,
                    });
                }
            }
        }
        Err(Errno::Perm) // EACCES in the original
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
