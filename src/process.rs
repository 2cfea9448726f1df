// SPDX-License-Identifier: MIT
//
// A read-only liveness handle to the service process. This core never spawns
// or terminates the service — it only learns its pid via `QueryProcessId`
// and polls whether it is still running.

/// Handle to the log service process, obtained from a `QueryProcessId` reply.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    #[cfg(windows)]
    hprocess: isize,
}

impl ProcessHandle {
    /// Open a liveness handle to `pid`.
    #[cfg(unix)]
    pub fn open(pid: u32) -> Self {
        Self { pid }
    }

    #[cfg(windows)]
    pub fn open(pid: u32) -> Self {
        use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_INFORMATION};
        let hprocess = unsafe { OpenProcess(PROCESS_QUERY_INFORMATION, 0, pid) };
        Self { pid, hprocess }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the service process is still running.
    pub fn is_alive(&self) -> bool {
        #[cfg(unix)]
        {
            let ret = unsafe { libc::kill(self.pid as libc::pid_t, 0) };
            ret == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::Foundation::STILL_ACTIVE;
            use windows_sys::Win32::System::Threading::GetExitCodeProcess;
            if self.hprocess == 0 {
                return false;
            }
            unsafe {
                let mut code: u32 = 0;
                GetExitCodeProcess(self.hprocess, &mut code) != 0 && code == STILL_ACTIVE as u32
            }
        }
        #[cfg(not(any(unix, windows)))]
        {
            true
        }
    }
}

#[cfg(windows)]
impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.hprocess != 0 {
            unsafe {
                windows_sys::Win32::Foundation::CloseHandle(self.hprocess);
            }
        }
    }
}
