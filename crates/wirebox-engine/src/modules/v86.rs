#![forbid(unsafe_code)]

use core::net::Ipv4Addr;

use wirebox_net_stack::Millis;
use wirebox_packet::MacAddr;

use crate::log::{LogLevel, LogRecord};
use crate::machine::{Machine, MachineEvent, MachineOutputs};
use crate::EngineError;

/// CPU-emulator machine. The emulator itself runs elsewhere; on this network
/// it is a black box that receives frames and console input.
pub struct V86 {
    id: String,
    mac: MacAddr,
    ip: Ipv4Addr,
    frames_received: u64,
}

impl V86 {
    pub fn new(id: &str, mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self {
            id: id.to_string(),
            mac,
            ip,
            frames_received: 0,
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }
}

impl Machine for V86 {
    fn start(&mut self, now: Millis) -> Result<MachineOutputs, EngineError> {
        let mut out = MachineOutputs::default();
        out.logs.push(LogRecord::new(
            now,
            LogLevel::Info,
            &self.id,
            format!("v86 machine up (mac {}, ip {})", self.mac, self.ip),
        ));
        Ok(out)
    }

    fn handle_frame(
        &mut self,
        _port: u16,
        frame: &[u8],
        now: Millis,
    ) -> Result<MachineOutputs, EngineError> {
        self.frames_received += 1;
        let mut out = MachineOutputs::default();
        out.logs.push(LogRecord::new(
            now,
            LogLevel::Debug,
            &self.id,
            format!("frame #{} received ({} bytes)", self.frames_received, frame.len()),
        ));
        Ok(out)
    }

    fn handle_event(
        &mut self,
        event: MachineEvent,
        now: Millis,
    ) -> Result<MachineOutputs, EngineError> {
        let mut out = MachineOutputs::default();
        if let MachineEvent::SendInput { line } = event {
            out.logs.push(LogRecord::new(
                now,
                LogLevel::Info,
                &self.id,
                format!("console input: {line}"),
            ));
        }
        Ok(out)
    }
}
