// SPDX-License-Identifier: MIT
//
// The bidirectional control channel: rare, synchronous request/reply
// exchanges with the log service. Each call opens a fresh connection, writes
// the request image, reads the reply image, and closes — no persistent
// session, no partial-message semantics.

use std::time::Duration;

use crate::error::{LogSinkError, Result};
use crate::platform::ControlStream;
use crate::shm_name;

const CMD_REGISTER: u32 = 1;
const CMD_UNREGISTER: u32 = 2;
const CMD_QUERY_PID: u32 = 3;
const CMD_SET_WRITING_TO_LOG_FILE: u32 = 4;

/// Widest request variant: a `command` tag followed by the union payload.
/// `pid: i32` / `enable: i32` cover every variant defined in §4.3.
const REQUEST_SIZE: usize = 4 + 8; // tag + pid(4) + enable(4), 4-aligned

/// `result: i32` followed by the union payload (only `QueryProcessId`
/// returns anything beyond the result flag).
const REPLY_SIZE: usize = 4 + 4;

#[derive(Debug, Clone, Copy)]
pub enum Request {
    RegisterLogSource { pid: u32 },
    UnregisterLogSource { pid: u32 },
    QueryProcessId,
    SetWritingToLogFile { pid: u32, enable: bool },
}

impl Request {
    fn encode(&self) -> [u8; REQUEST_SIZE] {
        let mut buf = [0u8; REQUEST_SIZE];
        match *self {
            Request::RegisterLogSource { pid } => {
                buf[0..4].copy_from_slice(&CMD_REGISTER.to_le_bytes());
                buf[4..8].copy_from_slice(&(pid as i32).to_le_bytes());
            }
            Request::UnregisterLogSource { pid } => {
                buf[0..4].copy_from_slice(&CMD_UNREGISTER.to_le_bytes());
                buf[4..8].copy_from_slice(&(pid as i32).to_le_bytes());
            }
            Request::QueryProcessId => {
                buf[0..4].copy_from_slice(&CMD_QUERY_PID.to_le_bytes());
            }
            Request::SetWritingToLogFile { pid, enable } => {
                buf[0..4].copy_from_slice(&CMD_SET_WRITING_TO_LOG_FILE.to_le_bytes());
                buf[4..8].copy_from_slice(&(pid as i32).to_le_bytes());
                buf[8..12].copy_from_slice(&(enable as i32).to_le_bytes());
            }
        }
        buf
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Reply {
    pub success: bool,
    pub pid: Option<u32>,
}

impl Reply {
    fn decode(buf: &[u8; REPLY_SIZE], request: &Request) -> Self {
        let result = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let pid = match request {
            Request::QueryProcessId if result != 0 => {
                Some(i32::from_le_bytes(buf[4..8].try_into().unwrap()) as u32)
            }
            _ => None,
        };
        Self { success: result != 0, pid }
    }
}

/// Performs one request/reply exchange against the control channel named
/// from `prefix`, with the given connect timeout (0 for best-effort calls
/// like the shutdown-time unregister).
pub fn exchange(prefix: &str, request: Request, timeout: Duration) -> Result<Reply> {
    let name = shm_name::control_channel_name(prefix);
    let effective_timeout = timeout.max(Duration::from_millis(1));
    let mut stream = ControlStream::connect(&name, effective_timeout).map_err(LogSinkError::TransportFailure)?;

    let req_bytes = request.encode();
    stream.write_all(&req_bytes).map_err(LogSinkError::TransportFailure)?;

    let mut reply_bytes = [0u8; REPLY_SIZE];
    stream.read_exact(&mut reply_bytes).map_err(LogSinkError::TransportFailure)?;

    Ok(Reply::decode(&reply_bytes, &request))
}
