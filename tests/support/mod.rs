// SPDX-License-Identifier: MIT
//
// Stand-in service support for exercising the coordinator end to end: a
// hand-built shared-memory ring region (the real service's creation side,
// which this crate never implements) plus a control-channel stub that
// answers Register/QueryProcessId/SetWritingToLogFile/Unregister. Unix only,
// matching the crate's own ring/control unit tests.

#![cfg(unix)]
#![allow(dead_code)]

use std::ffi::CString;
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use logsink::shm_name;

const HEADER_SIZE: usize = 64;
const BLOCK_HEADER_SIZE: usize = 16;
pub const PAYLOAD_SIZE: usize = 496;
pub const BLOCK_STRIDE: usize = BLOCK_HEADER_SIZE + PAYLOAD_SIZE; // 512, already 64-aligned

fn unique_prefix(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!("logsink-it-{tag}-{}-{}", std::process::id(), COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Raw byte-level view of the ring, built and owned by the test as the
/// service-side creator. Exposes the same stack-walking primitives the real
/// consumer would use, for draining and inspecting committed frames.
pub struct RingFixture {
    logical_name: String,
    posix_name: String,
    mem: *mut u8,
    size: usize,
    block_count: u32,
}

unsafe impl Send for RingFixture {}

impl RingFixture {
    /// Creates a ring under the *local* (non-`Global\`) name for `prefix`/
    /// `service_pid`, matching what `Ring::open`'s fallback path expects.
    pub fn create(prefix: &str, service_pid: u32, block_count: u32) -> Self {
        let logical_name = shm_name::local_region_name(prefix, service_pid);
        let posix_name = shm_name::make_shm_name(&logical_name);
        let total = HEADER_SIZE + block_count as usize * BLOCK_STRIDE;

        let c_name = CString::new(posix_name.as_bytes()).unwrap();
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR | libc::O_CREAT | libc::O_EXCL, 0o666) };
        assert!(fd != -1, "shm_open failed: {:?}", std::io::Error::last_os_error());
        assert_eq!(unsafe { libc::ftruncate(fd, total as libc::off_t) }, 0);
        let mem = unsafe {
            libc::mmap(std::ptr::null_mut(), total, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0)
        };
        assert_ne!(mem, libc::MAP_FAILED);
        unsafe { libc::close(fd) };
        let mem = mem as *mut u8;

        unsafe {
            mem.copy_from_nonoverlapping(b"ALVA".as_ptr(), 4);
            (mem.add(4) as *mut i32).write(if block_count == 0 { -1 } else { 0 });
            (mem.add(8) as *mut i32).write(-1);
            (mem.add(12) as *mut u32).write(block_count);
            (mem.add(16) as *mut u32).write(PAYLOAD_SIZE as u32);
            (mem.add(20) as *mut u32).write(BLOCK_STRIDE as u32);
        }

        for i in 0..block_count {
            let base = unsafe { mem.add(HEADER_SIZE + i as usize * BLOCK_STRIDE) };
            let next = if i + 1 < block_count { i as i32 + 1 } else { -1 };
            unsafe {
                (base as *mut u32).write(0x1122_3344); // magic
                (base.add(4) as *mut i32).write(next);
                (base.add(8) as *mut u32).write(0); // data_size
                (base.add(12) as *mut u32).write(0); // overflow_count
            }
        }

        Self { logical_name, posix_name, mem, size: total, block_count }
    }

    fn free_head(&self) -> &AtomicU32 {
        unsafe { &*(self.mem.add(4) as *const AtomicU32) }
    }

    fn used_head(&self) -> &AtomicU32 {
        unsafe { &*(self.mem.add(8) as *const AtomicU32) }
    }

    fn block_next(&self, index: i32) -> i32 {
        let base = unsafe { self.mem.add(HEADER_SIZE + index as usize * BLOCK_STRIDE) };
        unsafe { (base.add(4) as *const i32).read() }
    }

    fn set_block_next(&self, index: i32, next: i32) {
        let base = unsafe { self.mem.add(HEADER_SIZE + index as usize * BLOCK_STRIDE) };
        unsafe { (base.add(4) as *mut i32).write(next) };
    }

    pub fn overflow_count_of(&self, index: i32) -> u32 {
        let base = unsafe { self.mem.add(HEADER_SIZE + index as usize * BLOCK_STRIDE) };
        unsafe { (base.add(12) as *const u32).read() }
    }

    pub fn payload_of(&self, index: i32) -> [u8; PAYLOAD_SIZE] {
        let base = unsafe { self.mem.add(HEADER_SIZE + index as usize * BLOCK_STRIDE + BLOCK_HEADER_SIZE) };
        let mut out = [0u8; PAYLOAD_SIZE];
        unsafe { out.as_mut_ptr().copy_from_nonoverlapping(base, PAYLOAD_SIZE) };
        out
    }

    /// Steals the entire used stack and reverses it, as the real consumer's
    /// `begin_reading` would, returning block indices in submission order.
    pub fn steal_used_in_submission_order(&self) -> Vec<i32> {
        let stolen = self.used_head().swap(u32::MAX, Ordering::AcqRel) as i32;
        let mut order = Vec::new();
        let mut cur = if stolen == -1 { -1 } else { stolen };
        while cur != -1 {
            order.push(cur);
            cur = self.block_next(cur);
        }
        order.reverse();
        order
    }

    /// Returns blocks to the free stack, as `end_reading` would.
    pub fn release_to_free(&self, indices: &[i32]) {
        for &idx in indices {
            loop {
                let head = self.free_head().load(Ordering::Acquire) as i32;
                self.set_block_next(idx, head);
                if self
                    .free_head()
                    .compare_exchange(head as u32, idx as u32, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    /// Convenience: drains and releases exactly one committed block, as if a
    /// consumer read and acknowledged it. Returns its index, if any existed.
    pub fn drain_one(&self) -> Option<i32> {
        let order = self.steal_used_in_submission_order();
        if order.is_empty() {
            return None;
        }
        let (first, rest) = order.split_first().unwrap();
        // Put everything but the first back on the used stack, oldest first,
        // so a later steal-and-reverse reproduces the same submission order
        // for what's left (push order ends up reversed by that walk).
        for &idx in rest.iter() {
            loop {
                let head = self.used_head().load(Ordering::Acquire) as i32;
                self.set_block_next(idx, head);
                if self
                    .used_head()
                    .compare_exchange(head as u32, idx as u32, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
        }
        self.release_to_free(&[*first]);
        Some(*first)
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }
}

impl Drop for RingFixture {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.mem as *mut libc::c_void, self.size);
        }
        let c_name = CString::new(self.posix_name.as_bytes()).unwrap();
        unsafe {
            libc::shm_unlink(c_name.as_ptr());
        }
    }
}

const CMD_REGISTER: u32 = 1;
const CMD_UNREGISTER: u32 = 2;
const CMD_QUERY_PID: u32 = 3;
const CMD_SET_WRITING_TO_LOG_FILE: u32 = 4;
const REQUEST_SIZE: usize = 12;
const REPLY_SIZE: usize = 8;

#[derive(Default)]
pub struct ServiceCalls {
    pub registered_pid: AtomicU32,
    pub register_count: AtomicUsize,
    pub query_pid_count: AtomicUsize,
    pub set_writing_calls: AtomicUsize,
    pub last_set_writing_enable: AtomicBool,
    pub unregister_count: AtomicUsize,
}

/// A control-channel stand-in: binds the socket `prefix` resolves to and
/// answers every request with success, reporting `service_pid` from
/// `QueryProcessId`. Runs until dropped.
pub struct StubService {
    pub calls: Arc<ServiceCalls>,
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl StubService {
    pub fn spawn(prefix: &str, service_pid: u32) -> Self {
        use std::io::{Read, Write};

        let name = shm_name::control_channel_name(prefix);
        let path = posix_control_path(&name);
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).expect("bind control stub socket");
        listener.set_nonblocking(true).unwrap();

        let calls = Arc::new(ServiceCalls::default());
        let stop = Arc::new(AtomicBool::new(false));
        let calls2 = calls.clone();
        let stop2 = stop.clone();

        let handle = std::thread::spawn(move || {
            while !stop2.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        let mut req = [0u8; REQUEST_SIZE];
                        if stream.read_exact(&mut req).is_err() {
                            continue;
                        }
                        let tag = u32::from_le_bytes(req[0..4].try_into().unwrap());
                        let mut reply = [0u8; REPLY_SIZE];
                        match tag {
                            CMD_REGISTER => {
                                let pid = i32::from_le_bytes(req[4..8].try_into().unwrap()) as u32;
                                calls2.registered_pid.store(pid, Ordering::Relaxed);
                                calls2.register_count.fetch_add(1, Ordering::Relaxed);
                                reply[0..4].copy_from_slice(&1i32.to_le_bytes());
                            }
                            CMD_UNREGISTER => {
                                calls2.unregister_count.fetch_add(1, Ordering::Relaxed);
                                reply[0..4].copy_from_slice(&1i32.to_le_bytes());
                            }
                            CMD_QUERY_PID => {
                                calls2.query_pid_count.fetch_add(1, Ordering::Relaxed);
                                reply[0..4].copy_from_slice(&1i32.to_le_bytes());
                                reply[4..8].copy_from_slice(&(service_pid as i32).to_le_bytes());
                            }
                            CMD_SET_WRITING_TO_LOG_FILE => {
                                let enable = i32::from_le_bytes(req[8..12].try_into().unwrap()) != 0;
                                calls2.set_writing_calls.fetch_add(1, Ordering::Relaxed);
                                calls2.last_set_writing_enable.store(enable, Ordering::Relaxed);
                                reply[0..4].copy_from_slice(&1i32.to_le_bytes());
                            }
                            _ => {
                                reply[0..4].copy_from_slice(&0i32.to_le_bytes());
                            }
                        }
                        let _ = stream.write_all(&reply);
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(std::time::Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
            let _ = std::fs::remove_file(&path);
        });

        Self { calls, stop, handle: Some(handle) }
    }
}

impl Drop for StubService {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn posix_control_path(name: &str) -> std::path::PathBuf {
    let hash = shm_name::fnv1a_64(name.as_bytes());
    std::env::temp_dir().join(format!("{hash:016x}.logsink.sock"))
}

/// A pid the liveness probe (`kill(pid, 0)`) will treat as alive. Tests that
/// don't exercise reconnect use this as the fake service pid, standing in
/// for a service process that is up.
pub fn live_service_pid() -> u32 {
    std::process::id()
}

/// A pid guaranteed not to correspond to a running process, for exercising
/// the liveness-probe-triggers-degraded path.
pub fn dead_service_pid() -> u32 {
    u32::MAX - 1
}

pub fn prefix_for(tag: &str) -> String {
    unique_prefix(tag)
}
