use std::fmt::{Debug, Display};

#[derive(Debug)]
pub enum OperationError<T: Debug> {
    NoPlatform(usize),
    NoDevice { platform: usize, device: usize },
    InvalidQueue(usize),
    KernelNotFound(String),
    BuildFailure(String),
    UnsupportedKernel(String),
    InvalidArguments(String),
    IndexOutOfBounds,
    DeviceError(Box<T>),
}

impl<T: Debug> From<T> for OperationError<T> {
    fn from(value: T) -> Self {
        Self::DeviceError(Box::new(value))
    }
}

impl<T: Debug + Display> Display for OperationError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPlatform(idx) => write!(f, "compute platform {idx} not available"),
            Self::NoDevice { platform, device } => {
                write!(f, "no compatible device {device} on platform {platform}")
            }
            Self::InvalidQueue(idx) => write!(f, "command queue {idx} does not exist"),
            Self::KernelNotFound(name) => write!(f, "kernel `{name}` not found in program source"),
            Self::BuildFailure(log) => write!(f, "building program failed:\n{log}"),
            Self::UnsupportedKernel(name) => write!(f, "kernel `{name}` cannot be executed by this backend"),
            Self::InvalidArguments(msg) => write!(f, "invalid kernel arguments: {msg}"),
            Self::IndexOutOfBounds => write!(f, "launch range exceeds a buffer argument"),
            Self::DeviceError(err) => write!(f, "device error: {err}"),
        }
    }
}

impl<T: Debug + Display> std::error::Error for OperationError<T> {}

pub type OperationResult<T> = Result<(), OperationError<T>>;
