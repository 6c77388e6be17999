#![forbid(unsafe_code)]

use wirebox_net_stack::Millis;

use crate::bridge::{FetchRequest, FetchResponse};
use crate::log::LogRecord;
use crate::EngineError;

/// Command delivered to one machine from outside the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    /// Fetch bridge command; only browser machines act on it.
    Fetch(FetchRequest),
    /// Changes a browser machine's configured target URL.
    UpdateDomain { url: String },
    /// Console input line for a CPU-emulator machine.
    SendInput { line: String },
}

/// A frame a machine wants on the wire, tagged with the machine-local port
/// the router matches against the pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOut {
    pub port: u16,
    pub frame: Vec<u8>,
}

/// Everything a machine produced for one input. Returned by value so the
/// router stays single-threaded and loop-driven.
#[derive(Debug, Default)]
pub struct MachineOutputs {
    pub frames: Vec<FrameOut>,
    pub fetch_responses: Vec<FetchResponse>,
    pub logs: Vec<LogRecord>,
}

impl MachineOutputs {
    pub fn merge(&mut self, other: MachineOutputs) {
        self.frames.extend(other.frames);
        self.fetch_responses.extend(other.fetch_responses);
        self.logs.extend(other.logs);
    }
}

/// One machine on the network. Failures are isolated per machine: an `Err`
/// from any method is logged against the machine and never reaches its
/// neighbors.
pub trait Machine {
    fn start(&mut self, _now: Millis) -> Result<MachineOutputs, EngineError> {
        Ok(MachineOutputs::default())
    }

    fn stop(&mut self, _now: Millis) -> Result<MachineOutputs, EngineError> {
        Ok(MachineOutputs::default())
    }

    fn handle_frame(
        &mut self,
        _port: u16,
        _frame: &[u8],
        _now: Millis,
    ) -> Result<MachineOutputs, EngineError> {
        Ok(MachineOutputs::default())
    }

    fn handle_event(
        &mut self,
        _event: MachineEvent,
        _now: Millis,
    ) -> Result<MachineOutputs, EngineError> {
        Ok(MachineOutputs::default())
    }

    fn on_tick(&mut self, _now: Millis) -> Result<MachineOutputs, EngineError> {
        Ok(MachineOutputs::default())
    }
}
