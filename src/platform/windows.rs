// SPDX-License-Identifier: MIT
//
// Windows primitives: opening (never creating) a named file-mapping object,
// and a bidirectional byte-stream control channel over a named pipe.

use std::io;
use std::time::Duration;

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// A shared-memory region mapped read/write, opened but never created by
/// this process.
pub struct OpenRegion {
    handle: windows_sys::Win32::Foundation::HANDLE,
    mem: *mut u8,
    size: usize,
}

unsafe impl Send for OpenRegion {}
unsafe impl Sync for OpenRegion {}

impl OpenRegion {
    /// Open an existing file-mapping object by logical name (used verbatim —
    /// callers pass the fully formatted `"Global\..."` or local variant).
    pub fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::*;
        use windows_sys::Win32::System::Memory::*;

        let wide_name = to_wide(name);
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }

        let mem = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        if mem.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(e);
        }

        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            VirtualQuery(
                mem as *const _,
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if ret == 0 {
            let e = io::Error::last_os_error();
            unsafe {
                UnmapViewOfFile(mem);
                CloseHandle(handle);
            }
            return Err(e);
        }

        Ok(Self {
            handle,
            mem: mem as *mut u8,
            size: info.RegionSize,
        })
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
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::UnmapViewOfFile;
        unsafe {
            if !self.mem.is_null() {
                UnmapViewOfFile(self.mem as *const _);
            }
            if self.handle != 0 {
                CloseHandle(self.handle);
            }
        }
    }
}

fn pipe_path(name: &str) -> Vec<u16> {
    to_wide(&format!(r"\\.\pipe\{name}"))
}

/// One end of a control-channel exchange over a named pipe.
pub struct ControlStream {
    handle: windows_sys::Win32::Foundation::HANDLE,
}

unsafe impl Send for ControlStream {}

impl ControlStream {
    pub fn connect(name: &str, timeout: Duration) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::*;
        use windows_sys::Win32::Storage::FileSystem::*;
        use windows_sys::Win32::System::Pipes::WaitNamedPipeW;

        let path = pipe_path(name);
        let deadline_ms = timeout.as_millis().min(u32::MAX as u128) as u32;

        loop {
            let handle = unsafe {
                CreateFileW(
                    path.as_ptr(),
                    (GENERIC_READ | GENERIC_WRITE) as u32,
                    0,
                    std::ptr::null(),
                    OPEN_EXISTING,
                    0,
                    0,
                )
            };
            if handle != INVALID_HANDLE_VALUE {
                return Ok(Self { handle });
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) {
                let waited = unsafe { WaitNamedPipeW(path.as_ptr(), deadline_ms) };
                if waited == 0 {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "control channel connect timed out"));
                }
                continue;
            }
            return Err(err);
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        use windows_sys::Win32::Storage::FileSystem::WriteFile;
        let mut written = 0u32;
        let ok = unsafe {
            WriteFile(
                self.handle,
                buf.as_ptr(),
                buf.len() as u32,
                &mut written,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 || written as usize != buf.len() {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        use windows_sys::Win32::Storage::FileSystem::ReadFile;
        let mut total = 0usize;
        while total < buf.len() {
            let mut read = 0u32;
            let ok = unsafe {
                ReadFile(
                    self.handle,
                    buf[total..].as_mut_ptr(),
                    (buf.len() - total) as u32,
                    &mut read,
                    std::ptr::null_mut(),
                )
            };
            if ok == 0 || read == 0 {
                return Err(io::Error::last_os_error());
            }
            total += read as usize;
        }
        Ok(())
    }
}

impl Drop for ControlStream {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

/// Test/service-side support: creates the named pipe instance so a stand-in
/// service can be driven from integration tests.
pub struct ControlListener {
    name: String,
}

impl ControlListener {
    pub fn bind(name: &str) -> io::Result<Self> {
        Ok(Self { name: name.to_string() })
    }

    pub fn accept_one(&self) -> io::Result<ControlStream> {
        use windows_sys::Win32::Foundation::*;
        use windows_sys::Win32::Storage::FileSystem::PIPE_ACCESS_DUPLEX;
        use windows_sys::Win32::System::Pipes::*;

        let path = pipe_path(&self.name);
        let handle = unsafe {
            CreateNamedPipeW(
                path.as_ptr(),
                PIPE_ACCESS_DUPLEX,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                4096,
                4096,
                0,
                std::ptr::null(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        let ok = unsafe { ConnectNamedPipe(handle, std::ptr::null_mut()) };
        if ok == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(ERROR_PIPE_CONNECTED as i32) {
                unsafe { CloseHandle(handle) };
                return Err(err);
            }
        }
        Ok(ControlStream { handle })
    }
}
