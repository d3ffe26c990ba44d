//! Internet checksum (RFC 1071), grounded on the pattern every protocol
//! file in `examples/original_source/src/net/ipv4/` reaches for
//! (`ip_chksum`, `tcp_checksum`): sum 16-bit words with end-around carry,
//! then one's-complement the result.

/// Ones-complement sum of `data` as big-endian 16-bit words, odd trailing
/// byte padded with zero.
fn sum16(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Plain internet checksum over one buffer (used for ICMP and the IP
/// header itself).
pub fn checksum(data: &[u8]) -> u16 {
    fold(sum16(data))
}

/// TCP/UDP pseudo-header + segment checksum: `src`/`dst` addresses and
/// `protocol`/`len` are summed before the segment bytes, the way
/// `tcp_checksum`'s `struct pseudo_header` does.
pub fn pseudo_header_checksum(src: u32, dst: u32, protocol: u8, segment: &[u8]) -> u16 {
    let mut sum = sum16(&src.to_be_bytes());
    sum += sum16(&dst.to_be_bytes());
    sum += protocol as u32;
    sum += segment.len() as u32;
    sum += sum16(segment);
    fold(sum)
}
