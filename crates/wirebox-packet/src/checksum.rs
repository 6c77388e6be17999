#![forbid(unsafe_code)]

//! Internet checksum (RFC 1071) helpers shared by the IPv4/ICMP/TCP/UDP
//! builders.

use core::net::Ipv4Addr;

/// Sums `data` as big-endian 16-bit words into `acc`. An odd trailing byte is
/// treated as the high byte of a final word.
fn sum_be_words(data: &[u8], mut acc: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        acc += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        acc += u32::from(*last) << 8;
    }
    acc
}

/// Folds carries until none remain and returns the one's complement.
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// One's-complement checksum over a plain byte buffer (ICMP, and the IPv4
/// header with its checksum field zeroed).
pub fn internet_checksum(data: &[u8]) -> u16 {
    fold(sum_be_words(data, 0))
}

/// IPv4 header checksum. The caller must have zeroed the checksum field.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    internet_checksum(header)
}

/// TCP/UDP checksum: 12-byte pseudo-header (src, dst, zero, protocol,
/// segment length) followed by the segment itself.
///
/// Computed over a segment whose checksum field is zeroed this yields the
/// value to write; computed over a correctly checksummed segment it yields 0.
pub fn transport_checksum_ipv4(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: u8,
    segment: &[u8],
) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src_ip.octets());
    pseudo[4..8].copy_from_slice(&dst_ip.octets());
    pseudo[8] = 0;
    pseudo[9] = protocol;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let acc = sum_be_words(&pseudo, 0);
    fold(sum_be_words(segment, acc))
}
