#![forbid(unsafe_code)]

//! Network configuration document. Deserialized once at engine construction;
//! the machine set and pipeline graph are immutable for the engine's
//! lifetime.

use std::collections::BTreeMap;

use core::net::Ipv4Addr;
use serde::Deserialize;

use wirebox_fs::SeedNode;

use crate::EngineError;

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub machines: Vec<MachineConfig>,
    #[serde(default)]
    pub pipelines: Vec<PipelineLink>,
}

impl NetworkConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: MachineKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MachineKind {
    /// CPU-emulator machine; a black box from the network's point of view.
    V86 { mac: String, ip: Ipv4Addr },
    StaticServer {
        mac: String,
        ip: Ipv4Addr,
        /// Document root, seeded into the in-memory filesystem.
        #[serde(default)]
        files: BTreeMap<String, SeedNode>,
        #[serde(default)]
        show_directory_listing: bool,
    },
    Browser {
        mac: String,
        ip: Ipv4Addr,
        /// Where fetches go, e.g. `http://192.168.1.2`.
        target_url: String,
    },
    /// Gateway placeholder; frames routed here are dropped.
    Internet {},
}

/// Undirected pipeline edge. Frames emitted by either endpoint machine on
/// the named port are delivered to the other endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineLink {
    pub source_id: String,
    pub source_port: u16,
    pub destination_id: String,
    pub destination_port: u16,
}
