// SPDX-License-Identifier: MIT
//
// A minimal cooperative cancellation token. The coordinator's background
// monitor and long-running handshake/shutdown calls poll this rather than
// being forcibly interrupted — cancellation here only stops further
// waiting, it never aborts in-flight cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
