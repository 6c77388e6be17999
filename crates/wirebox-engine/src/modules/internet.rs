#![forbid(unsafe_code)]

use wirebox_net_stack::Millis;

use crate::log::{LogLevel, LogRecord};
use crate::machine::{Machine, MachineOutputs};
use crate::EngineError;

/// Gateway placeholder. Frames routed here go nowhere; real upstream
/// connectivity is out of scope.
pub struct Internet {
    id: String,
}

impl Internet {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl Machine for Internet {
    fn handle_frame(
        &mut self,
        _port: u16,
        frame: &[u8],
        now: Millis,
    ) -> Result<MachineOutputs, EngineError> {
        let mut out = MachineOutputs::default();
        out.logs.push(LogRecord::new(
            now,
            LogLevel::Debug,
            &self.id,
            format!("dropping {}-byte frame bound for the internet", frame.len()),
        ));
        Ok(out)
    }
}
