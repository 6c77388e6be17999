#![forbid(unsafe_code)]

use core::net::Ipv4Addr;

use crate::ethernet::MacAddr;
use crate::{ensure_len, PacketError};

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

pub const DHCP_OP_REQUEST: u8 = 1;
pub const DHCP_OP_REPLY: u8 = 2;

/// Option 53 message-type values.
pub const DHCP_DISCOVER: u8 = 1;
pub const DHCP_OFFER: u8 = 2;
pub const DHCP_REQUEST: u8 = 3;
pub const DHCP_ACK: u8 = 5;

const MAGIC_COOKIE: u32 = 0x6382_5363;
const FIXED_LEN: usize = 240; // through the magic cookie
const OPT_PAD: u8 = 0;
const OPT_END: u8 = 0xff;

/// One TLV entry from the options stream. Pad (0) and end (0xff) tags are
/// consumed by the codec and never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub tag: u8,
    pub data: Vec<u8>,
}

impl DhcpOption {
    pub fn message_type(kind: u8) -> Self {
        Self {
            tag: 53,
            data: vec![kind],
        }
    }

    pub fn ip(tag: u8, addr: Ipv4Addr) -> Self {
        Self {
            tag,
            data: addr.octets().to_vec(),
        }
    }
}

/// Decoded BOOTP/DHCP message. The 16-byte `chaddr` field is modeled as a
/// 6-byte Ethernet MAC (hlen is fixed at 6, the tail is zero padding); the
/// legacy `sname`/`file` fields are always zero and not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub op: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddr,
    pub options: Vec<DhcpOption>,
}

impl DhcpMessage {
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        ensure_len(buf, FIXED_LEN)?;
        if buf[1] != 1 || buf[2] != 6 {
            return Err(PacketError::Malformed("DHCP htype/hlen not Ethernet"));
        }
        let cookie = u32::from_be_bytes([buf[236], buf[237], buf[238], buf[239]]);
        if cookie != MAGIC_COOKIE {
            return Err(PacketError::Malformed("bad DHCP magic cookie"));
        }

        let mut options = Vec::new();
        let mut i = FIXED_LEN;
        while i < buf.len() {
            let tag = buf[i];
            i += 1;
            if tag == OPT_PAD {
                continue;
            }
            if tag == OPT_END {
                break;
            }
            ensure_len(buf, i + 1)?;
            let len = buf[i] as usize;
            i += 1;
            ensure_len(buf, i + len)?;
            options.push(DhcpOption {
                tag,
                data: buf[i..i + len].to_vec(),
            });
            i += len;
        }

        Ok(Self {
            op: buf[0],
            xid: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            secs: u16::from_be_bytes([buf[8], buf[9]]),
            flags: u16::from_be_bytes([buf[10], buf[11]]),
            ciaddr: Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]),
            yiaddr: Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]),
            siaddr: Ipv4Addr::new(buf[20], buf[21], buf[22], buf[23]),
            giaddr: Ipv4Addr::new(buf[24], buf[25], buf[26], buf[27]),
            chaddr: MacAddr(buf[28..34].try_into().unwrap()),
            options,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + FIXED_LEN, 0);
        let fixed = &mut out[start..start + FIXED_LEN];
        fixed[0] = self.op;
        fixed[1] = 1; // htype: Ethernet
        fixed[2] = 6; // hlen
        fixed[4..8].copy_from_slice(&self.xid.to_be_bytes());
        fixed[8..10].copy_from_slice(&self.secs.to_be_bytes());
        fixed[10..12].copy_from_slice(&self.flags.to_be_bytes());
        fixed[12..16].copy_from_slice(&self.ciaddr.octets());
        fixed[16..20].copy_from_slice(&self.yiaddr.octets());
        fixed[20..24].copy_from_slice(&self.siaddr.octets());
        fixed[24..28].copy_from_slice(&self.giaddr.octets());
        fixed[28..34].copy_from_slice(&self.chaddr.0);
        fixed[236..240].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());

        for opt in &self.options {
            out.push(opt.tag);
            out.push(opt.data.len() as u8);
            out.extend_from_slice(&opt.data);
        }
        out.push(OPT_END);
    }

    /// The value of option 53, if present.
    pub fn message_type(&self) -> Option<u8> {
        self.options
            .iter()
            .find(|o| o.tag == 53)
            .and_then(|o| o.data.first().copied())
    }
}
