use thiserror::Error;

#[derive(Error, Debug)]
pub enum IgtError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DRM ioctl {op} failed: errno {errno}")]
    Driver { op: &'static str, errno: i32 },

    #[error("Operation timed out")]
    WaitTimeout,

    #[error("Out of GPU Memory")]
    OutOfMemory,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Result mismatch at dword {index}: expected 0x{expected:08x}, found 0x{found:08x}")]
    CompareMismatch {
        index: usize,
        expected: u32,
        found: u32,
    },

    #[error("No matching DRM device found")]
    DeviceNotFound,

    #[error("General Error: {0}")]
    General(String),
}

impl IgtError {
    /// Wraps a failed ioctl, keeping the errno for callers that tolerate specific codes.
    #[must_use]
    pub fn driver(op: &'static str, err: &std::io::Error) -> Self {
        Self::Driver {
            op,
            errno: err.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// The positive errno carried by this error, if any.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Driver { errno, .. } => Some(*errno),
            Self::Io(e) => e.raw_os_error(),
            Self::WaitTimeout => Some(libc::ETIME),
            Self::OutOfMemory => Some(libc::ENOMEM),
            _ => None,
        }
    }
}

// A convenient alias
pub type IgtResult<T> = Result<T, IgtError>;
