use alloc::collections::TryReserveError;

use thiserror::Error;

use crate::CallstackMode;

/// Reasons a callstack context cannot be registered.
///
/// Capture itself never fails: every runtime problem degrades into an empty or shorter
/// callstack for the event at hand.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The platform does not provide the unwind routine.
    #[error("symbol lookup failed: {0}")]
    CapabilityUnavailable(&'static str),
    /// Capture buffers could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// A context with the same name is already installed.
    #[error("context {0} already registered")]
    AlreadyRegistered(&'static str),
    /// This kind of callstack is disabled on this platform.
    #[error("{0} callstacks are not supported on this platform")]
    Unsupported(CallstackMode),
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfMemory
    }
}
