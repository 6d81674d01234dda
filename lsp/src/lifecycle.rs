//! Connection lifecycle state machine.
//!
//! ```text
//! Uninitialized -> Connecting -> Initializing -> Ready -> ShuttingDown -> Closed
//!                      |              |
//!                      +--------------+--> Closed   (handshake failure)
//! ```
//!
//! Transitions only move forward. Skipping ahead is allowed (a failed
//! handshake jumps straight to `Closed`); going back is not.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Connecting,
    Initializing,
    Ready,
    ShuttingDown,
    Closed,
}

impl LifecycleState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid lifecycle transition from {from} to {to}")]
pub struct TransitionError {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Move to `next`, which must be strictly later than the current state.
    pub fn advance(&mut self, next: LifecycleState) -> Result<(), TransitionError> {
        if next <= self.state {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
        Ok(())
    }
}
