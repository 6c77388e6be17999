#![forbid(unsafe_code)]

//! Engine for a wirebox network: machine lifecycle, frame routing over the
//! configured pipeline graph, the fetch bridge, and per-machine log rings.
//!
//! The engine is single-threaded and clock-free; callers pass the current
//! time to every entry point and drive timeouts with [`Engine::tick`].

pub mod bridge;
pub mod config;
pub mod engine;
pub mod log;
pub mod machine;
pub mod modules;

pub use bridge::{FetchRequest, FetchResponse};
pub use config::{MachineConfig, MachineKind, NetworkConfig, PipelineLink};
pub use engine::{Engine, EngineStatus};
pub use log::{LogLevel, LogRecord, LogRing, ENGINE_LOG_CAPACITY, MACHINE_LOG_CAPACITY};
pub use machine::{FrameOut, Machine, MachineEvent, MachineOutputs};
pub use wirebox_net_stack::Millis;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration: {0}")]
    Config(String),
    #[error("no machine with id {0:?}")]
    UnknownMachine(String),
    #[error("engine is not running")]
    NotRunning,
    #[error(transparent)]
    Stack(#[from] wirebox_net_stack::StackError),
    #[error(transparent)]
    Fs(#[from] wirebox_fs::FsError),
    #[error(transparent)]
    Packet(#[from] wirebox_packet::PacketError),
}
