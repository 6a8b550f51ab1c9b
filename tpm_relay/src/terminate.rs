// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Relay termination signalling.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// One-shot broadcast termination signal shared by a relayer's accept loop
/// and its exchange threads.
///
/// Any holder may fire it, any number of times; firing is idempotent, so
/// simultaneous exits of both lanes of a dual-lane relay cannot wedge a
/// sender.
#[derive(Clone, Debug, Default)]
pub struct TerminateSignal(Arc<AtomicBool>);

impl TerminateSignal {
    /// Makes an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal.
    pub fn fire(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_is_idempotent_and_shared() {
        let signal = TerminateSignal::new();
        assert!(!signal.is_fired());
        let clone = signal.clone();
        clone.fire();
        clone.fire();
        assert!(signal.is_fired());
    }
}
