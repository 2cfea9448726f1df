// SPDX-License-Identifier: MIT
//
// POSIX primitives: opening (never creating) a named shared-memory region,
// and a bidirectional byte-stream control channel over a Unix domain socket.

use std::ffi::CString;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use crate::shm_name;

/// A shared-memory region mapped read/write, opened but never created by
/// this process. The backing object outlives this mapping; dropping an
/// `OpenRegion` unmaps it without unlinking the kernel object.
pub struct OpenRegion {
    mem: *mut u8,
    size: usize,
}

unsafe impl Send for OpenRegion {}
unsafe impl Sync for OpenRegion {}

impl OpenRegion {
    /// Open an existing POSIX shared-memory object by logical name.
    /// `name` is transformed through [`shm_name::make_shm_name`] the same
    /// way the creating process names the segment.
    pub fn open(name: &str) -> io::Result<Self> {
        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            let e = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(e);
        }
        let size = stat.st_size as usize;
        if size == 0 {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(io::ErrorKind::InvalidData, "region has zero size"));
        }

        let mem = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { mem: mem as *mut u8, size })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for OpenRegion {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe {
                libc::munmap(self.mem as *mut libc::c_void, self.size);
            }
        }
    }
}

/// Derives a filesystem path for the control channel's Unix domain socket
/// from its logical name. There is no POSIX notion of the Win32 kernel
/// object namespace the logical name format alludes to, so the name is
/// hashed into a stable path under the system temp directory.
pub fn control_socket_path(name: &str) -> PathBuf {
    let hash = shm_name::fnv1a_64(name.as_bytes());
    std::env::temp_dir().join(format!("{hash:016x}.logsink.sock"))
}

/// One end of a control-channel exchange: connect, write the request image,
/// read the reply image, close.
pub struct ControlStream {
    inner: UnixStream,
}

impl ControlStream {
    /// Connect with a bounded timeout. Unix domain connects do not block on
    /// the wire, but a stuck or overloaded service could still stall accept();
    /// the connect itself is bounded by racing it against a timer thread.
    pub fn connect(name: &str, timeout: Duration) -> io::Result<Self> {
        let path = control_socket_path(name);
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(UnixStream::connect(&path));
        });
        match rx.recv_timeout(timeout) {
            Ok(Ok(stream)) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                Ok(Self { inner: stream })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "control channel connect timed out")),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.inner.write_all(buf)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        use std::io::Read;
        self.inner.read_exact(buf)
    }
}

/// Test/service-side support: binds the control channel socket so a stand-in
/// service can be driven from integration tests.
pub struct ControlListener {
    inner: UnixListener,
}

impl ControlListener {
    pub fn bind(name: &str) -> io::Result<Self> {
        let path = control_socket_path(name);
        let _ = std::fs::remove_file(&path);
        Ok(Self { inner: UnixListener::bind(path)? })
    }

    pub fn accept_one(&self) -> io::Result<ControlStream> {
        let (stream, _) = self.inner.accept()?;
        Ok(ControlStream { inner: stream })
    }
}
