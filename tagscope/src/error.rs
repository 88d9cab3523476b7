use std::sync::Arc;

use crate::{Backtrace as FrameTrace, TagState, Value};

/// Errors surfaced to the embedding engine once a jump escapes every region
/// willing to take it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("uncaught exception {exception}")]
    UncaughtException {
        exception: Value,
        trace: FrameTrace,
    },
    #[error("{message} (in {origin})")]
    LocalJump {
        reason: TagState,
        message: &'static str,
        origin: Arc<str>,
        value: Value,
    },
    #[error("uncaught throw {label}")]
    UncaughtThrow { label: Value, value: Value },
    #[error("fatal: {0}")]
    Fatal(Value),
    #[error("fiber {0} was already started")]
    FiberStarted(Arc<str>),
    #[error("thread {0} panicked")]
    ThreadPanicked(Arc<str>),
    #[error("failed to spawn thread {name}: {reason}")]
    ThreadSpawn { name: Arc<str>, reason: String },
}

impl RuntimeError {
    /// Builds the local-jump error for a loop or block escape that found no
    /// eligible region. Returns `None` for kinds that are not local jumps.
    pub fn local_jump(
        reason: TagState,
        origin: Option<Arc<str>>,
        value: Value,
    ) -> Option<Self> {
        let message = reason.local_jump_message()?;
        Some(Self::LocalJump {
            reason,
            message,
            origin: origin.unwrap_or_else(|| Arc::from("<main>")),
            value,
        })
    }

    pub fn backtrace(&self) -> Option<&FrameTrace> {
        match self {
            Self::UncaughtException { trace, .. } => Some(trace),
            _ => None,
        }
    }
}
