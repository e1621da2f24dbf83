pub mod backend;
pub mod config;
pub mod pipeline;
pub mod sequence;

pub use backend::{ComputeBackend, ContextConfig, CpuBackend, DeviceKind};
#[cfg(feature = "opencl")]
pub use backend::OclBackend;
pub use config::{InputMode, RunConfig};
pub use pipeline::{Job, PipelineError};

/// Source of the element-wise addition kernel shipped in `kernels/vecadd.cl`.
pub const VECADD_KERNEL_SRC: &str = include_str!("../kernels/vecadd.cl");

/// Entry point exported by [`VECADD_KERNEL_SRC`].
pub const VECADD_ENTRY: &str = "vecadd";
