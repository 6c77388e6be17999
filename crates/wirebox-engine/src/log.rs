#![forbid(unsafe_code)]

use std::collections::VecDeque;

use serde::Serialize;

use wirebox_net_stack::Millis;

pub const MACHINE_LOG_CAPACITY: usize = 100;
pub const ENGINE_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub time: Millis,
    pub level: LogLevel,
    /// Machine id, or `engine` for engine-level records.
    pub origin: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(time: Millis, level: LogLevel, origin: &str, message: impl Into<String>) -> Self {
        Self {
            time,
            level,
            origin: origin.to_string(),
            message: message.into(),
        }
    }
}

/// Bounded log buffer; the oldest record is dropped when full.
#[derive(Debug, Clone)]
pub struct LogRing {
    capacity: usize,
    records: VecDeque<LogRecord>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }
}
