// SPDX-License-Identifier: MIT
//
// The connection state machine: handshake, metadata replay, ring/peak-buffer
// routing, liveness monitoring, and reconnect. A single mutex guards every
// mutable field here, matching the "no interleaved partial sequences"
// requirement — the ring's own CAS protocol is what makes it safe across
// processes, this mutex is what makes it safe within one.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, trace, warn};

use crate::cancel::CancellationToken;
use crate::config::{TransportConfig, CONNECTIVITY_CHECK_INTERVAL, CONNECT_TIMEOUT, LOSSLESS_RETRY_INTERVAL};
use crate::control::{self, Request};
use crate::error::{LogSinkError, Result};
use crate::frame::{split_message, Frame};
use crate::levels;
use crate::peak_buffer::{PeakBuffer, PendingEntry};
use crate::process::ProcessHandle;
use crate::ring::Ring;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Handshaking,
    Operational,
    Degraded,
    ShuttingDown,
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    pub lost_message_count: u64,
    pub frames_committed: u64,
    pub reconnect_count: u32,
}

struct KnownLevel {
    id: i32,
    name: String,
}

struct KnownSource {
    id: i32,
    name: String,
}

struct Inner {
    state: ConnectionState,
    config: TransportConfig,
    ring: Option<Ring>,
    service_handle: Option<ProcessHandle>,
    peak_buffer: PeakBuffer,
    known_levels: Vec<KnownLevel>,
    known_sources: Vec<KnownSource>,
    last_sent_level: i32,
    last_sent_source: i32,
    lost_message_count: u64,
    frames_committed: u64,
    reconnect_count: u32,
    write_to_log_file_value: bool,
    write_to_log_file_inflight: bool,
    trigger_reconnect: bool,
}

/// The connection coordinator. Cheaply cloneable — clones share the same
/// underlying state and background monitor.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Mutex<Inner>>,
    trigger: Arc<Condvar>,
    monitor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Coordinator {
    pub fn new(config: TransportConfig) -> Self {
        let message_capacity = config.peak_buffer_capacity;
        let inner = Inner {
            state: ConnectionState::Uninitialized,
            config,
            ring: None,
            service_handle: None,
            peak_buffer: PeakBuffer::new(message_capacity),
            known_levels: Vec::new(),
            known_sources: Vec::new(),
            last_sent_level: -1,
            last_sent_source: -1,
            lost_message_count: 0,
            frames_committed: 0,
            reconnect_count: 0,
            write_to_log_file_value: true,
            write_to_log_file_inflight: false,
            trigger_reconnect: false,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            trigger: Arc::new(Condvar::new()),
            monitor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        !matches!(self.inner.lock().unwrap().state, ConnectionState::Uninitialized | ConnectionState::Shutdown)
    }

    pub fn is_established(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, ConnectionState::Operational)
    }

    pub fn stats(&self) -> TransportStats {
        let g = self.inner.lock().unwrap();
        TransportStats {
            lost_message_count: g.lost_message_count,
            frames_committed: g.frames_committed,
            reconnect_count: g.reconnect_count,
        }
    }

    pub fn set_peak_buffer_capacity(&self, capacity: usize) {
        let mut g = self.inner.lock().unwrap();
        g.config.peak_buffer_capacity = capacity;
        g.peak_buffer.set_message_capacity(capacity);
    }

    pub fn set_lossless_mode(&self, enabled: bool) {
        self.inner.lock().unwrap().config.lossless_mode = enabled;
    }

    pub fn set_auto_reconnect_interval(&self, interval: Duration) {
        self.inner.lock().unwrap().config.auto_reconnect_interval = interval;
    }

    pub fn config_snapshot(&self) -> TransportConfig {
        self.inner.lock().unwrap().config.clone()
    }

    pub fn write_to_log_file(&self) -> bool {
        self.inner.lock().unwrap().write_to_log_file_value
    }

    // -- life cycle ---------------------------------------------------

    pub fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        {
            let g = self.inner.lock().unwrap();
            if g.state == ConnectionState::Operational {
                return Ok(()); // already alive, a redundant initialize is a no-op
            }
            if !matches!(g.state, ConnectionState::Uninitialized | ConnectionState::Degraded) {
                return Err(LogSinkError::InvalidState("initialize called while another initialize/shutdown is in progress"));
            }
        }
        // Start unconditionally, before attempting the handshake: a failed
        // first connect must still leave the background reconnect timer
        // running, or `Degraded` becomes a dead end nothing ever retries.
        self.ensure_monitor_started();
        self.run_handshake(cancel)?;
        Ok(())
    }

    pub fn shutdown(&self, cancel: &CancellationToken) -> Result<()> {
        {
            let mut g = self.inner.lock().unwrap();
            if g.state == ConnectionState::Shutdown {
                return Ok(()); // idempotent
            }
            if g.state == ConnectionState::ShuttingDown {
                return Err(LogSinkError::InvalidState("shutdown already in progress"));
            }
            g.state = ConnectionState::ShuttingDown;
        }

        // Stop the monitor thread before touching shared state further.
        self.trigger.notify_all();
        if let Some(handle) = self.monitor.lock().unwrap().take() {
            if !cancel.is_cancelled() {
                let _ = handle.join();
            }
        }

        let pid = std::process::id();
        let prefix = self.inner.lock().unwrap().config.kernel_object_prefix.clone();
        // Best-effort: failures are logged and ignored, cleanup proceeds regardless.
        if let Err(e) = control::exchange(&prefix, Request::UnregisterLogSource { pid }, Duration::from_millis(0)) {
            warn!("unregister on shutdown failed (ignored): {e}");
        }

        let mut g = self.inner.lock().unwrap();
        g.ring = None;
        g.service_handle = None;
        g.peak_buffer.clear();
        g.last_sent_level = -1;
        g.last_sent_source = -1;
        g.state = ConnectionState::Shutdown;
        Ok(())
    }

    fn run_handshake(&self, cancel: &CancellationToken) -> Result<()> {
        self.inner.lock().unwrap().state = ConnectionState::Handshaking;

        let pid = std::process::id();
        let prefix = self.inner.lock().unwrap().config.kernel_object_prefix.clone();

        if cancel.is_cancelled() {
            return self.fail_handshake_cancelled(&prefix, pid);
        }

        // 1. Register this producer's pid.
        match control::exchange(&prefix, Request::RegisterLogSource { pid }, CONNECT_TIMEOUT) {
            Ok(r) if r.success => {}
            Ok(_) => return self.fail_handshake(LogSinkError::ServiceUnreachable),
            Err(e) => return self.fail_handshake(e),
        }
        debug!("registered pid {pid} with log service");

        if cancel.is_cancelled() {
            return self.fail_handshake_cancelled(&prefix, pid);
        }

        // 2. Query the service's pid and open a liveness handle to it.
        let service_pid = match control::exchange(&prefix, Request::QueryProcessId, CONNECT_TIMEOUT) {
            Ok(r) if r.success => match r.pid {
                Some(pid) => pid,
                None => return self.fail_handshake(LogSinkError::ServiceUnreachable),
            },
            Ok(_) => return self.fail_handshake(LogSinkError::ServiceUnreachable),
            Err(e) => return self.fail_handshake(e),
        };
        let service_handle = ProcessHandle::open(service_pid);
        debug!("log service pid is {service_pid}");

        // 3. Push the current persistence setting — non-fatal if it fails.
        // Carries this client's own pid, the same one used in step 1's
        // registration, not the service's.
        let write_to_log_file = self.inner.lock().unwrap().config.write_to_log_file;
        if let Err(e) = control::exchange(&prefix, Request::SetWritingToLogFile { pid, enable: write_to_log_file }, CONNECT_TIMEOUT) {
            warn!("pushing persistence setting during handshake failed (non-fatal): {e}");
        }

        // 4. Open the ring.
        let ring = match Ring::open(&prefix, service_pid) {
            Ok(r) => r,
            Err(e) => {
                error!("failed to open ring during handshake: {e}");
                return self.fail_handshake(e);
            }
        };
        debug!("ring opened");

        {
            let mut g = self.inner.lock().unwrap();
            g.ring = Some(ring);
            g.service_handle = Some(service_handle);
            g.last_sent_level = -1;
            g.last_sent_source = -1;
        }

        // 5. Emit the start marker.
        self.write_handshake_frame(Frame::StartMarker { max_log_level_count: -1 })?;

        // 6. Emit the application name.
        let app_name = self.inner.lock().unwrap().config.application_name.clone();
        self.write_handshake_frame(Frame::SetApplicationName { name: app_name })?;

        // 7. Replay every known log level in ascending id order.
        let levels_to_send: Vec<(i32, String)> = {
            let g = self.inner.lock().unwrap();
            g.known_levels.iter().map(|l| (l.id, l.name.clone())).collect()
        };
        for (id, name) in levels_to_send {
            let mapped = levels::resolve_name(id, &name).into_owned();
            {
                let g = self.inner.lock().unwrap();
                assert_eq!(id, g.last_sent_level + 1, "log level ids must be replayed in strictly ascending order");
            }
            self.write_handshake_frame(Frame::AddLogLevelName { id, name: mapped })?;
            self.inner.lock().unwrap().last_sent_level = id;
        }

        // 8. Replay every known source in ascending id order.
        let sources_to_send: Vec<(i32, String)> = {
            let g = self.inner.lock().unwrap();
            g.known_sources.iter().map(|s| (s.id, s.name.clone())).collect()
        };
        for (id, name) in sources_to_send {
            {
                let g = self.inner.lock().unwrap();
                assert_eq!(id, g.last_sent_source + 1, "source ids must be replayed in strictly ascending order");
            }
            self.write_handshake_frame(Frame::AddSourceName { id, name })?;
            self.inner.lock().unwrap().last_sent_source = id;
        }

        self.inner.lock().unwrap().state = ConnectionState::Operational;
        debug!("handshake complete, session operational");
        Ok(())
    }

    fn fail_handshake(&self, err: LogSinkError) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        g.ring = None;
        g.service_handle = None;
        g.state = ConnectionState::Degraded;
        drop(g);
        self.trigger_reconnect_soon();
        Err(err)
    }

    /// Aborts the handshake on cancellation, best-effort unregistering
    /// whatever pid was (or was about to be) registered in step 1.
    fn fail_handshake_cancelled(&self, prefix: &str, pid: u32) -> Result<()> {
        if let Err(e) = control::exchange(prefix, Request::UnregisterLogSource { pid }, Duration::from_millis(0)) {
            warn!("unregister on cancelled handshake failed (ignored): {e}");
        }
        self.fail_handshake(LogSinkError::CancellationRequested)
    }

    /// Writes a frame during handshake, where a full ring is fatal (the
    /// session must be fully self-describing before any message is sent).
    fn write_handshake_frame(&self, frame: Frame) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let ring = g.ring.as_ref().ok_or(LogSinkError::RingUnavailable("ring not open".into()))?;
        let outcome = match ring.begin_writing() {
            Ok(Some(reserved)) => {
                ring.write_frame(reserved, &frame, 0);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(true) => {
                g.frames_committed += 1;
                Ok(())
            }
            Ok(false) => {
                drop(g);
                self.fail_handshake(LogSinkError::NoFreeBlockDuringHandshake)
            }
            Err(e) => {
                drop(g);
                self.fail_handshake(e)
            }
        }
    }

    // -- monitor --------------------------------------------------------

    fn ensure_monitor_started(&self) {
        let mut slot = self.monitor.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let this = self.clone();
        *slot = Some(std::thread::spawn(move || this.monitor_loop()));
    }

    fn trigger_reconnect_soon(&self) {
        self.inner.lock().unwrap().trigger_reconnect = true;
        self.trigger.notify_all();
    }

    fn monitor_loop(&self) {
        loop {
            let interval = {
                let g = self.inner.lock().unwrap();
                match g.state {
                    ConnectionState::Shutdown | ConnectionState::ShuttingDown => return,
                    ConnectionState::Degraded => g.config.auto_reconnect_interval,
                    _ => CONNECTIVITY_CHECK_INTERVAL,
                }
            };

            let guard = self.inner.lock().unwrap();
            let (guard, _) = self
                .trigger
                .wait_timeout_while(guard, interval, |g| {
                    !g.trigger_reconnect && !matches!(g.state, ConnectionState::Shutdown | ConnectionState::ShuttingDown)
                })
                .unwrap();
            let state = guard.state;
            drop(guard);

            if matches!(state, ConnectionState::Shutdown | ConnectionState::ShuttingDown) {
                return;
            }

            self.inner.lock().unwrap().trigger_reconnect = false;

            match state {
                ConnectionState::Operational => {
                    let alive = {
                        let g = self.inner.lock().unwrap();
                        g.service_handle.as_ref().map(|h| h.is_alive()).unwrap_or(false)
                    };
                    if !alive {
                        warn!("log service heartbeat failed, transitioning to degraded");
                        let mut g = self.inner.lock().unwrap();
                        g.ring = None;
                        g.service_handle = None;
                        g.state = ConnectionState::Degraded;
                        drop(g);
                        self.trigger_reconnect_soon();
                    } else {
                        trace!("log service heartbeat ok");
                    }
                }
                ConnectionState::Degraded => {
                    debug!("attempting reconnect");
                    let cancel = CancellationToken::new();
                    if self.run_handshake(&cancel).is_ok() {
                        self.inner.lock().unwrap().reconnect_count += 1;
                    }
                }
                _ => {}
            }
        }
    }

    // -- frame dispatch ---------------------------------------------------

    fn drain_peak_buffer_locked(inner: &mut Inner) {
        let Some(ring) = inner.ring.as_ref() else { return };
        while let Some(entry) = if inner.peak_buffer.is_empty() { None } else { inner.peak_buffer.pop_front() } {
            match entry {
                PendingEntry::Single(frame) => match ring.begin_writing() {
                    Ok(Some(reserved)) => {
                        let overflow = inner.lost_message_count.min(u32::MAX as u64) as u32;
                        ring.write_frame(reserved, &frame, overflow);
                        inner.lost_message_count = 0;
                        inner.frames_committed += 1;
                    }
                    _ => {
                        // Could not drain right now: put it back at the front and stop.
                        inner.peak_buffer.push_front(PendingEntry::Single(frame));
                        break;
                    }
                },
                PendingEntry::Sequence(frames) => match ring.begin_writing_sequence(frames.len()) {
                    Ok(Some(reserved)) => {
                        let overflow = inner.lost_message_count.min(u32::MAX as u64) as u32;
                        let n = frames.len() as u64;
                        ring.write_frame_sequence(reserved, &frames, overflow);
                        inner.lost_message_count = 0;
                        inner.frames_committed += n;
                    }
                    _ => {
                        inner.peak_buffer.push_front(PendingEntry::Sequence(frames));
                        break;
                    }
                },
            }
        }
    }

    /// Attempts to reserve space for `entry` in `ring` and write it. Kept as
    /// a standalone function (rather than inlined in `dispatch`) so the
    /// borrowed `ReservedBlock`s never escape into a scope that also needs
    /// to mutably borrow the coordinator's `Inner` guard.
    fn try_write(ring: &Ring, entry: PendingEntry, overflow: u32) -> Result<std::result::Result<u64, PendingEntry>> {
        match entry {
            PendingEntry::Single(frame) => match ring.begin_writing()? {
                Some(reserved) => {
                    ring.write_frame(reserved, &frame, overflow);
                    Ok(Ok(1))
                }
                None => Ok(Err(PendingEntry::Single(frame))),
            },
            PendingEntry::Sequence(frames) => match ring.begin_writing_sequence(frames.len())? {
                Some(reserved) => {
                    let n = frames.len() as u64;
                    ring.write_frame_sequence(reserved, &frames, overflow);
                    Ok(Ok(n))
                }
                None => Ok(Err(PendingEntry::Sequence(frames))),
            },
        }
    }

    /// Routes one already-built frame (or sequence) through the ring, the
    /// peak buffer, or the drop path, per the admission policy.
    fn dispatch(&self, mut entry: PendingEntry, is_message: bool) -> bool {
        let mut g = self.inner.lock().unwrap();
        if !matches!(g.state, ConnectionState::Operational) {
            return false;
        }

        Self::drain_peak_buffer_locked(&mut g);

        let lossless = g.config.lossless_mode;
        loop {
            let Some(ring) = g.ring.as_ref() else { return false };
            let overflow = g.lost_message_count.min(u32::MAX as u64) as u32;
            let write_result = Self::try_write(ring, entry, overflow);

            match write_result {
                Ok(Ok(n)) => {
                    g.frames_committed += n;
                    g.lost_message_count = 0;
                    return true;
                }
                Ok(Err(returned_entry)) => {
                    entry = returned_entry;
                    let alive = g.service_handle.as_ref().map(|h| h.is_alive()).unwrap_or(false);
                    if !alive {
                        g.ring = None;
                        g.service_handle = None;
                        g.state = ConnectionState::Degraded;
                        drop(g);
                        self.trigger_reconnect_soon();
                        return false;
                    }
                    if lossless {
                        drop(g);
                        std::thread::sleep(LOSSLESS_RETRY_INTERVAL);
                        g = self.inner.lock().unwrap();
                        continue;
                    }
                    let admitted = g.peak_buffer.push(entry);
                    if !admitted && is_message {
                        g.lost_message_count += 1;
                    }
                    return admitted;
                }
                Err(e) => {
                    error!("ring access failed: {e}");
                    g.ring = None;
                    g.service_handle = None;
                    g.state = ConnectionState::Degraded;
                    drop(g);
                    self.trigger_reconnect_soon();
                    return false;
                }
            }
        }
    }

    pub fn enqueue_message(&self, ft_timestamp: i64, hp_timestamp_us: i64, source_id: i32, level_id: i32, pid: i32, text: &str) -> bool {
        let frames = split_message(ft_timestamp, hp_timestamp_us, source_id, level_id, pid, text);
        let entry = if frames.len() == 1 {
            PendingEntry::Single(frames.into_iter().next().unwrap())
        } else {
            PendingEntry::Sequence(frames)
        };
        self.dispatch(entry, true)
    }

    pub fn enqueue_log_level_added(&self, id: i32, name: &str) -> bool {
        {
            let mut g = self.inner.lock().unwrap();
            g.known_levels.push(KnownLevel { id, name: name.to_string() });
        }
        let mapped = levels::resolve_name(id, name).into_owned();
        self.dispatch(PendingEntry::Single(Frame::AddLogLevelName { id, name: mapped }), false);
        true
    }

    pub fn enqueue_log_writer_added(&self, id: i32, name: &str) -> bool {
        {
            let mut g = self.inner.lock().unwrap();
            g.known_sources.push(KnownSource { id, name: name.to_string() });
        }
        self.dispatch(PendingEntry::Single(Frame::AddSourceName { id, name: name.to_string() }), false);
        true
    }

    pub fn enqueue_clear_viewer(&self, ft_timestamp: i64, pid: i32, hp_timestamp_us: i64) -> bool {
        self.dispatch(PendingEntry::Single(Frame::ClearLogViewer { ft_timestamp, pid, hp_timestamp_us }), false)
    }

    pub fn enqueue_save_snapshot(&self, ft_timestamp: i64, pid: i32, hp_timestamp_us: i64) -> bool {
        self.dispatch(PendingEntry::Single(Frame::SaveSnapshot { ft_timestamp, pid, hp_timestamp_us }), false)
    }

    /// Pushes `SetWritingToLogFile` asynchronously, coalescing a redundant
    /// request for the same value while the first is still in flight.
    pub fn set_write_to_log_file(&self, enable: bool) {
        let mut g = self.inner.lock().unwrap();
        if g.write_to_log_file_value == enable && g.write_to_log_file_inflight {
            return;
        }
        g.write_to_log_file_value = enable;
        g.config.write_to_log_file = enable;
        if g.write_to_log_file_inflight {
            return;
        }
        g.write_to_log_file_inflight = true;
        let prefix = g.config.kernel_object_prefix.clone();
        // Only push while a session is live; the pid carried is this client's
        // own, the same one registered in step 1 of the handshake, not the
        // service's.
        let session_live = g.service_handle.is_some();
        let pid = std::process::id();
        drop(g);

        let this = self.clone();
        std::thread::spawn(move || {
            if session_live {
                if let Err(e) = control::exchange(&prefix, Request::SetWritingToLogFile { pid, enable }, CONNECT_TIMEOUT) {
                    warn!("set_write_to_log_file push failed (logged and ignored): {e}");
                }
            }
            this.inner.lock().unwrap().write_to_log_file_inflight = false;
        });
    }
}
