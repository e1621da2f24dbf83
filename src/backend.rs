mod cpu;
pub mod error;
#[cfg(feature = "opencl")]
mod opencl;

use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

pub use cpu::{CpuBackend, CpuBuffer, CpuError, CpuKernel};
pub use error::{OperationError, OperationResult};
#[cfg(feature = "opencl")]
pub use opencl::{OclBackend, OclBuffer, OclError, OclKernel};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceKind {
    #[default]
    All,
    Gpu,
    Cpu,
    Accelerator,
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "gpu" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            "accelerator" => Ok(Self::Accelerator),
            _ => Err(format!("unknown device type `{s}` (expected all, gpu, cpu or accelerator)")),
        }
    }
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
            Self::Accelerator => "accelerator",
        };

        write!(f, "{name}")
    }
}

/// Which device to open and how many command queues to create on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextConfig {
    pub platform: usize,
    pub device: usize,
    pub kind: DeviceKind,
    pub queues: usize,
    /// Worker threads for host execution, ignored by device backends.
    pub threads: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { platform: 0, device: 0, kind: DeviceKind::All, queues: 1, threads: 1 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub platform: usize,
    pub platform_name: String,
    pub device: usize,
    pub name: String,
    pub kind: Option<DeviceKind>,
}

impl Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = self.kind.map_or_else(|| String::from("other"), |kind| kind.to_string());
        write!(f, "[{}:{}] {} / {} ({kind})", self.platform, self.device, self.platform_name, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// One kernel launch: `len` work-items starting at global index `offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkRange {
    pub offset: usize,
    pub len: usize,
    pub local: Option<usize>,
}

impl WorkRange {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len, local: None }
    }

    pub fn with_local(mut self, local: Option<usize>) -> Self {
        self.local = local;
        self
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Global size rounded up to a multiple of the work-group size.
    pub fn padded_len(&self) -> usize {
        match self.local {
            Some(local) if local > 0 => self.len.div_ceil(local) * local,
            _ => self.len,
        }
    }

    /// Splits into at most `parts` contiguous ranges. Every range but the
    /// last is a multiple of the work-group size, so only the last is padded.
    pub fn split(self, parts: usize) -> Vec<Self> {
        let align = self.local.unwrap_or(1).max(1);
        let chunk = self.len.div_ceil(parts.max(1)).div_ceil(align) * align;

        let mut ranges = Vec::new();
        let mut covered = 0;

        while covered < self.len {
            let len = chunk.min(self.len - covered);
            ranges.push(Self { offset: self.offset + covered, len, local: self.local });
            covered += len;
        }

        ranges
    }
}

pub enum KernelArg<'a, B: ComputeBackend> {
    Input(&'a B::Buffer),
    Output(&'a mut B::Buffer),
    Uint(u32),
}

impl<B: ComputeBackend> KernelArg<'_, B> {
    pub fn buffer_size(&self) -> Option<usize> {
        match self {
            Self::Input(buf) => Some(buf.size()),
            Self::Output(buf) => Some(buf.size()),
            Self::Uint(_) => None,
        }
    }
}

/// Every work-item indexes every buffer argument with its global id, so each
/// buffer must cover the whole (unpadded) range. Outputs may not be read-only
/// and inputs may not be write-only.
pub fn check_launch<B: ComputeBackend>(
    args: &[KernelArg<'_, B>],
    range: &WorkRange,
) -> OperationResult<B::BackendError> {
    if args.iter().filter_map(|arg| arg.buffer_size()).any(|size| size < range.end()) {
        return Err(OperationError::IndexOutOfBounds);
    }

    for (idx, arg) in args.iter().enumerate() {
        match arg {
            KernelArg::Input(buf) if buf.access() == BufferAccess::WriteOnly => {
                return Err(OperationError::InvalidArguments(format!("argument {idx} reads a write-only buffer")))
            }
            KernelArg::Output(buf) if buf.access() == BufferAccess::ReadOnly => {
                return Err(OperationError::InvalidArguments(format!("argument {idx} writes a read-only buffer")))
            }
            _ => {}
        }
    }

    Ok(())
}

pub trait DeviceBuffer: Sized {
    fn size(&self) -> usize;

    fn access(&self) -> BufferAccess;
}

pub trait ComputeBackend: Sized + Send + Sync + 'static {
    type BackendError: Debug + Display + Send + Sync + 'static;
    type Buffer: DeviceBuffer;
    type Kernel;

    fn list_devices() -> Result<Vec<DeviceInfo>, OperationError<Self::BackendError>>;

    fn create_context(config: &ContextConfig) -> Result<Self, OperationError<Self::BackendError>>;

    fn device_name(&self) -> String;

    fn queue_count(&self) -> usize;

    /// Allocates a buffer of `host.len()` elements initialised from `host`.
    fn allocate_buffer(
        &self,
        access: BufferAccess,
        host: &[f32],
    ) -> Result<Self::Buffer, OperationError<Self::BackendError>>;

    fn compile_kernel(&self, source: &str, entry: &str) -> Result<Self::Kernel, OperationError<Self::BackendError>>;

    /// Arguments are bound in order.
    fn enqueue(
        &self,
        queue: usize,
        kernel: &Self::Kernel,
        args: &mut [KernelArg<'_, Self>],
        range: WorkRange,
    ) -> OperationResult<Self::BackendError>;

    /// Blocks until every queue has drained.
    fn synchronise(&self) -> OperationResult<Self::BackendError>;

    /// Blocking copy of the first `host.len()` elements of `buffer`.
    fn read_back(&self, buffer: &Self::Buffer, host: &mut [f32]) -> OperationResult<Self::BackendError>;
}

#[cfg(test)]
mod range_tests {
    use super::*;

    #[test]
    fn padded_len() {
        assert_eq!(WorkRange::new(0, 100).padded_len(), 100);
        assert_eq!(WorkRange::new(0, 100).with_local(Some(64)).padded_len(), 128);
        assert_eq!(WorkRange::new(0, 128).with_local(Some(64)).padded_len(), 128);
    }

    #[test]
    fn split_even() {
        let ranges = WorkRange::new(0, 12).split(3);
        assert_eq!(ranges, vec![WorkRange::new(0, 4), WorkRange::new(4, 4), WorkRange::new(8, 4)]);
    }

    #[test]
    fn split_uneven() {
        let ranges = WorkRange::new(0, 10).split(3);
        assert_eq!(ranges, vec![WorkRange::new(0, 4), WorkRange::new(4, 4), WorkRange::new(8, 2)]);
        assert_eq!(ranges.iter().map(|r| r.len).sum::<usize>(), 10);
    }

    #[test]
    fn split_aligns_to_work_groups() {
        let ranges = WorkRange::new(0, 100).with_local(Some(16)).split(3);
        let lens = ranges.iter().map(|r| r.len).collect::<Vec<_>>();
        assert_eq!(lens, [48, 48, 4]);
        assert!(ranges[..2].iter().all(|r| r.padded_len() == r.len));
        assert_eq!(ranges[2].padded_len(), 16);
    }

    #[test]
    fn split_more_parts_than_items() {
        let ranges = WorkRange::new(0, 2).split(5);
        assert_eq!(ranges, vec![WorkRange::new(0, 1), WorkRange::new(1, 1)]);
        assert!(WorkRange::new(0, 0).split(2).is_empty());
    }

    #[test]
    fn device_kind_parse() {
        assert_eq!("GPU".parse::<DeviceKind>(), Ok(DeviceKind::Gpu));
        assert_eq!("all".parse::<DeviceKind>(), Ok(DeviceKind::All));
        assert!("fpga".parse::<DeviceKind>().is_err());
    }
}
