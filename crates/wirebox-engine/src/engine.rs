#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};

use wirebox_net_stack::Millis;
use wirebox_packet::MacAddr;

use crate::bridge::{FetchRequest, FetchResponse};
use crate::config::{MachineConfig, MachineKind, NetworkConfig};
use crate::log::{
    LogLevel, LogRecord, LogRing, ENGINE_LOG_CAPACITY, MACHINE_LOG_CAPACITY,
};
use crate::machine::{Machine, MachineEvent, MachineOutputs};
use crate::modules::{Browser, Internet, StaticServer, V86};
use crate::EngineError;

const ENGINE_ORIGIN: &str = "engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Owns the machines, routes frames over the pipeline graph, and carries
/// the fetch bridge and log rings.
pub struct Engine {
    config: NetworkConfig,
    machines: HashMap<String, Box<dyn Machine>>,
    order: Vec<String>,
    status: EngineStatus,
    machine_logs: HashMap<String, LogRing>,
    engine_log: LogRing,
    fetch_responses: Vec<FetchResponse>,
}

impl Engine {
    /// Validates the configuration and prepares a stopped engine. Machines
    /// are instantiated on `start`.
    pub fn new(config: NetworkConfig) -> Result<Self, EngineError> {
        let mut ids = HashSet::new();
        for machine in &config.machines {
            if !ids.insert(machine.id.clone()) {
                return Err(EngineError::Config(format!(
                    "duplicate machine id {:?}",
                    machine.id
                )));
            }
            // Surface bad MAC strings now rather than at start time.
            build_machine(machine)?;
        }
        for link in &config.pipelines {
            for id in [&link.source_id, &link.destination_id] {
                if !ids.contains(id) {
                    return Err(EngineError::Config(format!(
                        "pipeline references unknown machine {id:?}"
                    )));
                }
            }
        }

        let order: Vec<String> = config.machines.iter().map(|m| m.id.clone()).collect();
        let machine_logs = order
            .iter()
            .map(|id| (id.clone(), LogRing::new(MACHINE_LOG_CAPACITY)))
            .collect();
        Ok(Self {
            config,
            machines: HashMap::new(),
            order,
            status: EngineStatus::Stopped,
            machine_logs,
            engine_log: LogRing::new(ENGINE_LOG_CAPACITY),
            fetch_responses: Vec::new(),
        })
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn engine_logs(&self) -> &LogRing {
        &self.engine_log
    }

    pub fn machine_logs(&self, id: &str) -> Option<&LogRing> {
        self.machine_logs.get(id)
    }

    /// Instantiates and starts every machine in configuration order.
    pub fn start(&mut self, now: Millis) {
        if self.status == EngineStatus::Running {
            return;
        }
        self.status = EngineStatus::Starting;
        self.engine_log
            .push(LogRecord::new(now, LogLevel::Info, ENGINE_ORIGIN, "starting"));

        for machine_cfg in self.config.machines.clone() {
            match build_machine(&machine_cfg) {
                Ok(machine) => {
                    self.machines.insert(machine_cfg.id.clone(), machine);
                }
                Err(err) => self.log_machine_error(&machine_cfg.id, now, &err),
            }
        }
        for id in self.order.clone() {
            let result = match self.machines.get_mut(&id) {
                Some(machine) => machine.start(now),
                None => continue,
            };
            match result {
                Ok(outputs) => self.route_outputs(&id, outputs, now),
                Err(err) => self.log_machine_error(&id, now, &err),
            }
        }

        self.status = EngineStatus::Running;
        self.engine_log
            .push(LogRecord::new(now, LogLevel::Info, ENGINE_ORIGIN, "running"));
    }

    /// Stops machines in reverse start order and drops them, cancelling any
    /// waits their endpoints were tracking.
    pub fn stop(&mut self, now: Millis) {
        if self.status == EngineStatus::Stopped {
            return;
        }
        self.status = EngineStatus::Stopping;
        self.engine_log
            .push(LogRecord::new(now, LogLevel::Info, ENGINE_ORIGIN, "stopping"));

        for id in self.order.clone().into_iter().rev() {
            let result = match self.machines.get_mut(&id) {
                Some(machine) => machine.stop(now),
                None => continue,
            };
            match result {
                Ok(outputs) => self.route_outputs(&id, outputs, now),
                Err(err) => self.log_machine_error(&id, now, &err),
            }
        }
        self.machines.clear();

        self.status = EngineStatus::Stopped;
        self.engine_log
            .push(LogRecord::new(now, LogLevel::Info, ENGINE_ORIGIN, "stopped"));
    }

    /// Hands a fetch command to the machines; browser instances filter by
    /// client id themselves.
    pub fn push_fetch_request(
        &mut self,
        request: FetchRequest,
        now: Millis,
    ) -> Result<(), EngineError> {
        if self.status != EngineStatus::Running {
            return Err(EngineError::NotRunning);
        }
        for id in self.order.clone() {
            self.deliver_event(&id, MachineEvent::Fetch(request.clone()), now);
        }
        Ok(())
    }

    pub fn drain_fetch_responses(&mut self) -> Vec<FetchResponse> {
        std::mem::take(&mut self.fetch_responses)
    }

    pub fn send_event_to_machine(
        &mut self,
        id: &str,
        event: MachineEvent,
        now: Millis,
    ) -> Result<(), EngineError> {
        if self.status != EngineStatus::Running {
            return Err(EngineError::NotRunning);
        }
        if !self.machines.contains_key(id) {
            return Err(EngineError::UnknownMachine(id.to_string()));
        }
        self.deliver_event(id, event, now);
        Ok(())
    }

    /// Advances every machine's clock, expiring endpoint waits.
    pub fn tick(&mut self, now: Millis) {
        for id in self.order.clone() {
            let result = match self.machines.get_mut(&id) {
                Some(machine) => machine.on_tick(now),
                None => continue,
            };
            match result {
                Ok(outputs) => self.route_outputs(&id, outputs, now),
                Err(err) => self.log_machine_error(&id, now, &err),
            }
        }
    }

    fn deliver_event(&mut self, id: &str, event: MachineEvent, now: Millis) {
        let result = match self.machines.get_mut(id) {
            Some(machine) => machine.handle_event(event, now),
            None => return,
        };
        match result {
            Ok(outputs) => self.route_outputs(id, outputs, now),
            Err(err) => self.log_machine_error(id, now, &err),
        }
    }

    /// Drains one machine's outputs and every frame exchange they trigger.
    /// Delivery is a work queue, not recursion, so request/response chains
    /// over cyclic pipelines cannot overflow the stack.
    fn route_outputs(&mut self, origin: &str, outputs: MachineOutputs, now: Millis) {
        let mut queue: VecDeque<(String, u16, Vec<u8>)> = VecDeque::new();
        self.absorb(origin, outputs, &mut queue);
        while let Some((id, port, frame)) = queue.pop_front() {
            tracing::trace!(to = %id, port, bytes = frame.len(), "delivering frame");
            let result = match self.machines.get_mut(&id) {
                Some(machine) => machine.handle_frame(port, &frame, now),
                None => continue,
            };
            match result {
                Ok(outputs) => self.absorb(&id, outputs, &mut queue),
                Err(err) => self.log_machine_error(&id, now, &err),
            }
        }
    }

    fn absorb(
        &mut self,
        origin: &str,
        outputs: MachineOutputs,
        queue: &mut VecDeque<(String, u16, Vec<u8>)>,
    ) {
        for record in outputs.logs {
            if let Some(ring) = self.machine_logs.get_mut(origin) {
                ring.push(record);
            }
        }
        self.fetch_responses.extend(outputs.fetch_responses);
        for out in outputs.frames {
            for link in &self.config.pipelines {
                if link.source_id == origin && link.source_port == out.port {
                    queue.push_back((
                        link.destination_id.clone(),
                        link.destination_port,
                        out.frame.clone(),
                    ));
                } else if link.destination_id == origin && link.destination_port == out.port {
                    queue.push_back((link.source_id.clone(), link.source_port, out.frame.clone()));
                }
            }
        }
    }

    fn log_machine_error(&mut self, id: &str, now: Millis, err: &EngineError) {
        tracing::error!(machine = %id, %err, "machine failure isolated");
        let record = LogRecord::new(now, LogLevel::Error, id, err.to_string());
        if let Some(ring) = self.machine_logs.get_mut(id) {
            ring.push(record.clone());
        }
        self.engine_log.push(LogRecord::new(
            now,
            LogLevel::Error,
            ENGINE_ORIGIN,
            format!("machine {id}: {err}"),
        ));
    }
}

fn build_machine(cfg: &MachineConfig) -> Result<Box<dyn Machine>, EngineError> {
    let seed = machine_seed(&cfg.id);
    Ok(match &cfg.kind {
        MachineKind::V86 { mac, ip } => Box::new(V86::new(&cfg.id, parse_mac(mac)?, *ip)),
        MachineKind::StaticServer {
            mac,
            ip,
            files,
            show_directory_listing,
        } => Box::new(StaticServer::new(
            &cfg.id,
            parse_mac(mac)?,
            *ip,
            files,
            *show_directory_listing,
            seed,
        )),
        MachineKind::Browser { mac, ip, target_url } => Box::new(Browser::new(
            &cfg.id,
            parse_mac(mac)?,
            *ip,
            target_url,
            seed,
        )),
        MachineKind::Internet {} => Box::new(Internet::new(&cfg.id)),
    })
}

fn parse_mac(mac: &str) -> Result<MacAddr, EngineError> {
    mac.parse::<MacAddr>()
        .map_err(|_| EngineError::Config(format!("bad MAC address {mac:?}")))
}

/// FNV-1a over the machine id. Seeds port and ISN generation so runs are
/// reproducible without a per-machine config knob.
fn machine_seed(id: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
