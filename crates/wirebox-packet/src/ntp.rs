#![forbid(unsafe_code)]

use crate::{ensure_len, PacketError};

pub const NTP_PORT: u16 = 123;

/// One NTPv3/v4 message: the fixed 48-byte structure, no extensions.
/// Timestamps stay in raw 64-bit NTP format (seconds since 1900 in the high
/// word, fraction in the low word).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpMessage {
    /// Leap indicator, version and mode packed as on the wire
    /// (`LL VVV MMM`).
    pub li_vn_mode: u8,
    pub stratum: u8,
    pub poll: u8,
    pub precision: i8,
    pub root_delay: u32,
    pub root_dispersion: u32,
    pub reference_id: u32,
    pub reference_timestamp: u64,
    pub origin_timestamp: u64,
    pub receive_timestamp: u64,
    pub transmit_timestamp: u64,
}

impl NtpMessage {
    pub const LEN: usize = 48;

    pub fn version(&self) -> u8 {
        (self.li_vn_mode >> 3) & 0x07
    }

    pub fn mode(&self) -> u8 {
        self.li_vn_mode & 0x07
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        ensure_len(buf, Self::LEN)?;
        let u32_at = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let u64_at = |i: usize| {
            u64::from_be_bytes([
                buf[i],
                buf[i + 1],
                buf[i + 2],
                buf[i + 3],
                buf[i + 4],
                buf[i + 5],
                buf[i + 6],
                buf[i + 7],
            ])
        };
        Ok(Self {
            li_vn_mode: buf[0],
            stratum: buf[1],
            poll: buf[2],
            precision: buf[3] as i8,
            root_delay: u32_at(4),
            root_dispersion: u32_at(8),
            reference_id: u32_at(12),
            reference_timestamp: u64_at(16),
            origin_timestamp: u64_at(24),
            receive_timestamp: u64_at(32),
            transmit_timestamp: u64_at(40),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.li_vn_mode);
        out.push(self.stratum);
        out.push(self.poll);
        out.push(self.precision as u8);
        out.extend_from_slice(&self.root_delay.to_be_bytes());
        out.extend_from_slice(&self.root_dispersion.to_be_bytes());
        out.extend_from_slice(&self.reference_id.to_be_bytes());
        out.extend_from_slice(&self.reference_timestamp.to_be_bytes());
        out.extend_from_slice(&self.origin_timestamp.to_be_bytes());
        out.extend_from_slice(&self.receive_timestamp.to_be_bytes());
        out.extend_from_slice(&self.transmit_timestamp.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let msg = NtpMessage {
            li_vn_mode: (4 << 3) | 3, // v4, client
            stratum: 0,
            poll: 6,
            precision: -20,
            root_delay: 0,
            root_dispersion: 0,
            reference_id: 0,
            reference_timestamp: 0,
            origin_timestamp: 0,
            receive_timestamp: 0,
            transmit_timestamp: 0xe70f_0f0f_8000_0000,
        };
        let mut buf = Vec::new();
        msg.write(&mut buf);
        assert_eq!(buf.len(), NtpMessage::LEN);
        let parsed = NtpMessage::parse(&buf).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.version(), 4);
        assert_eq!(parsed.mode(), 3);
    }

    #[test]
    fn truncated_is_rejected() {
        assert!(matches!(
            NtpMessage::parse(&[0u8; 40]),
            Err(PacketError::Truncated)
        ));
    }
}
