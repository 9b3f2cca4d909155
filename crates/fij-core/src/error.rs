/// An error that can occur while driving the fault injection engine.
#[derive(thiserror::Error, Debug)]
pub enum FijError {
    /// The target process, thread, or memory region no longer exists.
    ///
    /// Typical when the target exits mid-injection; aborts the single
    /// injection attempt, not the session.
    #[error("target not found")]
    NotFound,

    /// A request field is out of range for this architecture or target.
    ///
    /// Rejected before any side effect: an out-of-range bit index, an
    /// unknown register id, or a VA outside the executable's mapping.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The session is not `Idle`; the request was rejected rather than
    /// queued.
    #[error("session is busy")]
    Busy,

    /// The result is not ready yet.
    #[error("result not ready, try again")]
    Retry,

    /// The descendant list could not grow to hold another entry.
    #[error("out of memory")]
    OutOfMemory,

    /// A worker was signaled to stop while sleeping or waiting.
    #[error("interrupted")]
    Interrupted,

    /// A ptrace or `/proc` operation was denied.
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    /// A remote memory read or write returned fewer bytes than requested.
    #[error("incomplete i/o on target: {0}")]
    IoFailure(&'static str),

    /// An underlying OS call failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FijError {
    /// Returns `true` for errors that represent ordinary control flow
    /// (`Busy`, `Retry`) rather than a failure worth logging as an error.
    pub fn is_control_flow(&self) -> bool {
        matches!(self, FijError::Busy | FijError::Retry)
    }
}
