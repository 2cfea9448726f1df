// SPDX-License-Identifier: MIT

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use posix::{OpenRegion, ControlStream, ControlListener};
#[cfg(windows)]
pub use windows::{OpenRegion, ControlStream, ControlListener};
