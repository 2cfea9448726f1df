// SPDX-License-Identifier: MIT
//
// The host-facing surface: a small set of plain data types the pipeline
// hands in, and `LogTransport`, a thin wrapper over the coordinator that
// stamps timestamps, maps properties onto coordinator state, and otherwise
// gets out of the way.

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::clock;
use crate::config::TransportConfig;
use crate::coordinator::{Coordinator, TransportStats};
use crate::error::Result;

/// One log event from the host pipeline.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub source_id: i32,
    pub level_id: i32,
    pub pid: i32,
    pub text: String,
}

impl LogMessage {
    pub fn new(source_id: i32, level_id: i32, text: impl Into<String>) -> Self {
        Self { source_id, level_id, pid: std::process::id() as i32, text: text.into() }
    }

    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }
}

/// A log level the host has introduced, to be announced before any message
/// references its id.
#[derive(Debug, Clone)]
pub struct LogLevel {
    pub id: i32,
    pub name: String,
}

impl LogLevel {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// A log source ("writer") the host has introduced.
#[derive(Debug, Clone)]
pub struct LogWriter {
    pub id: i32,
    pub name: String,
}

impl LogWriter {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// The transport client. Construct one per application, `initialize()` it
/// once, and `shutdown()` it before exit.
pub struct LogTransport {
    coordinator: Coordinator,
}

impl LogTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { coordinator: Coordinator::new(config) }
    }

    pub fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        self.coordinator.initialize(cancel)
    }

    pub fn shutdown(&self, cancel: &CancellationToken) -> Result<()> {
        self.coordinator.shutdown(cancel)
    }

    pub fn enqueue_message(&self, message: LogMessage) -> bool {
        let ft_timestamp = clock::file_time_now();
        let hp_timestamp_us = clock::high_precision_micros_now();
        self.coordinator.enqueue_message(ft_timestamp, hp_timestamp_us, message.source_id, message.level_id, message.pid, &message.text)
    }

    pub fn enqueue_log_level_added(&self, level: LogLevel) -> bool {
        self.coordinator.enqueue_log_level_added(level.id, &level.name)
    }

    pub fn enqueue_log_writer_added(&self, writer: LogWriter) -> bool {
        self.coordinator.enqueue_log_writer_added(writer.id, &writer.name)
    }

    pub fn enqueue_clear_viewer(&self) -> bool {
        let ft_timestamp = clock::file_time_now();
        let hp_timestamp_us = clock::high_precision_micros_now();
        self.coordinator.enqueue_clear_viewer(ft_timestamp, std::process::id() as i32, hp_timestamp_us)
    }

    pub fn enqueue_save_snapshot(&self) -> bool {
        let ft_timestamp = clock::file_time_now();
        let hp_timestamp_us = clock::high_precision_micros_now();
        self.coordinator.enqueue_save_snapshot(ft_timestamp, std::process::id() as i32, hp_timestamp_us)
    }

    pub fn auto_reconnect_interval(&self) -> Duration {
        self.coordinator.config_snapshot().auto_reconnect_interval
    }

    pub fn set_auto_reconnect_interval(&self, interval: Duration) {
        self.coordinator.set_auto_reconnect_interval(interval);
    }

    pub fn peak_buffer_capacity(&self) -> usize {
        self.coordinator.config_snapshot().peak_buffer_capacity
    }

    pub fn set_peak_buffer_capacity(&self, capacity: usize) {
        self.coordinator.set_peak_buffer_capacity(capacity);
    }

    pub fn lossless_mode(&self) -> bool {
        self.coordinator.config_snapshot().lossless_mode
    }

    pub fn set_lossless_mode(&self, enabled: bool) {
        self.coordinator.set_lossless_mode(enabled);
    }

    pub fn write_to_log_file(&self) -> bool {
        self.coordinator.write_to_log_file()
    }

    pub fn set_write_to_log_file(&self, enabled: bool) {
        self.coordinator.set_write_to_log_file(enabled);
    }

    pub fn is_initialized(&self) -> bool {
        self.coordinator.is_initialized()
    }

    pub fn is_established(&self) -> bool {
        self.coordinator.is_established()
    }

    pub fn stats(&self) -> TransportStats {
        self.coordinator.stats()
    }
}
