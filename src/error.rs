use core::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SchedError {
    /// A configuration value was rejected by `Config::validate`.
    InvalidConfig(&'static str),

    /// The stack size cannot change once the first context has been created.
    StackSizeFrozen,

    /// The OS refused to start a hart worker thread.
    SpawnFailed,
}

pub type SchedResult<T> = Result<T, SchedError>;

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
            SchedError::StackSizeFrozen => {
                write!(f, "stack size is frozen after the first context creation")
            }
            SchedError::SpawnFailed => write!(f, "failed to spawn a hart worker thread"),
        }
    }
}

impl std::error::Error for SchedError {}

/// Reports an unrecoverable resource failure and aborts the process.
pub fn out_of_memory(what: &str, err: &dyn fmt::Display) -> ! {
    log::error!("fatal: {}: {}", what, err);
    std::process::abort()
}
