//! Networking stack (spec §4.K "TCP engine", §4.L "IP/UDP/routing/raw"),
//! grounded on `examples/original_source/src/net/ipv4/`.

pub mod checksum;
pub mod icmp;
pub mod ip;
pub mod packet;
pub mod raw;
pub mod route;
pub mod socket;
pub mod tcp;
pub mod udp;
