// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Tears the output connection down once every source has closed.
///
/// Cloning is cheap; all clones share the same state. Only the first call to
/// [`ShutdownCoordinator::all_sources_closed`] cancels the connection token,
/// later calls are no-ops.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
    triggered: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by the output connection.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Signals that the open-source count reached zero.
    ///
    /// Returns `true` only for the call that actually triggered the shutdown.
    pub fn all_sources_closed(&self) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("All sources closed, shutting down output connection");
        self.cancel_token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triggers_once() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.cancel_token();
        assert!(!coordinator.is_triggered());
        assert!(!token.is_cancelled());

        assert!(coordinator.all_sources_closed());
        assert!(token.is_cancelled());
        assert!(!coordinator.all_sources_closed());
        assert!(!coordinator.clone().all_sources_closed());
        assert!(coordinator.is_triggered());
    }
}
