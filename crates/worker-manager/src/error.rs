use std::fmt;

/// The invariant-violation taxonomy the manager surfaces as typed errors,
/// distinct from the `anyhow::Result` used for I/O-fallible paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerManagerError {
    MaxWorkersReached { max: usize },
    DuplicateHandle { handle: String },
    SpawnDenied { reason: String },
    NativeRequiredButUnavailable,
    InvalidModeInNativeOnly { requested: &'static str },
}

impl fmt::Display for WorkerManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerManagerError::MaxWorkersReached { max } => {
                write!(f, "max workers reached ({max})")
            }
            WorkerManagerError::DuplicateHandle { handle } => {
                write!(f, "handle already in use: {handle}")
            }
            WorkerManagerError::SpawnDenied { reason } => {
                write!(f, "spawn denied: {reason}")
            }
            WorkerManagerError::NativeRequiredButUnavailable => {
                write!(f, "native spawn mode required but the native binary is unavailable")
            }
            WorkerManagerError::InvalidModeInNativeOnly { requested } => {
                write!(f, "spawn mode '{requested}' is not permitted in native-only mode")
            }
        }
    }
}

impl std::error::Error for WorkerManagerError {}
