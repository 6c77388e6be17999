#![forbid(unsafe_code)]

//! Per-machine TCP/ARP/ICMP endpoint for the wirebox virtual network.
//!
//! The endpoint is sans-IO: it never touches a wire or a clock by itself.
//! Every input (`handle_frame`, `connect`, `send`, `on_tick`) takes the
//! current time as an explicit `Millis` value and returns a list of
//! [`Action`]s for the caller to perform. Waiting states (ARP resolution,
//! connect handshakes) are plain bookkeeping with deadlines that `on_tick`
//! expires, so dropping the endpoint cancels everything outstanding.

mod endpoint;

pub use endpoint::{
    Action, ConnectError, Endpoint, EndpointConfig, TcpState, ARP_CACHE_TTL_MS,
    ARP_RESOLVE_TIMEOUT_MS, CONNECT_TIMEOUT_MS, DYNAMIC_PORT_MAX, DYNAMIC_PORT_MIN, TCP_WINDOW,
};

use thiserror::Error;

/// Milliseconds on the caller's clock. Only differences matter; tests run on
/// a virtual clock starting at zero.
pub type Millis = u64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("no such connection")]
    ConnectionNotFound,
    #[error("connection not established")]
    ConnectionNotEstablished,
    #[error("no dynamic ports available")]
    NoPortsAvailable,
    #[error("packet codec: {0}")]
    Packet(#[from] wirebox_packet::PacketError),
}
