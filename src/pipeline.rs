//! Host side of the vector addition: upload, compile, launch, read back.

use std::{
    fmt::{Debug, Display},
    time::Instant,
};

use log::{debug, info, warn};

use crate::backend::{BufferAccess, ComputeBackend, KernelArg, OperationError, WorkRange};

/// Inputs for one run. `a` may be longer than `b`; the output has `b.len()` elements.
#[derive(Clone, Debug)]
pub struct Job {
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    pub source: String,
    pub entry: String,
    pub local_work_size: Option<usize>,
    pub verify: bool,
}

#[derive(Debug)]
pub enum PipelineError<T: Debug> {
    Operation(OperationError<T>),
    InputTooShort { a: usize, b: usize },
    TooManyElements(usize),
    Mismatch { index: usize, host: f32, device: f32 },
}

impl<T: Debug> From<OperationError<T>> for PipelineError<T> {
    fn from(value: OperationError<T>) -> Self {
        Self::Operation(value)
    }
}

impl<T: Debug + Display> Display for PipelineError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operation(err) => write!(f, "{err}"),
            Self::InputTooShort { a, b } => write!(f, "input A has {a} elements but input B has {b}"),
            Self::TooManyElements(n) => write!(f, "{n} elements cannot be addressed by the kernel"),
            Self::Mismatch { index, host, device } => {
                write!(f, "mismatch at index {index}: host computed {host}, device returned {device}")
            }
        }
    }
}

impl<T: Debug + Display> std::error::Error for PipelineError<T> {}

pub fn sum_on_host(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// First index at which `device` disagrees with the host sum.
pub fn verify<T: Debug>(a: &[f32], b: &[f32], device: &[f32]) -> Result<(), PipelineError<T>> {
    let timer = Instant::now();
    let host = sum_on_host(a, b);
    debug!("host reference computed in {:.6}ms", timer.elapsed().as_secs_f64() * 1000.0);

    match host.iter().zip(device).position(|(h, d)| h != d) {
        Some(index) => Err(PipelineError::Mismatch { index, host: host[index], device: device[index] }),
        None => Ok(()),
    }
}

/// Runs the kernel over `job.b.len()` work-items with arguments `(a, b, c, n)`
/// and returns `c`. The buffers are released before returning.
pub fn run<B: ComputeBackend>(backend: &B, job: &Job) -> Result<Vec<f32>, PipelineError<B::BackendError>> {
    let n = job.b.len();

    if job.a.len() < n {
        return Err(PipelineError::InputTooShort { a: job.a.len(), b: n });
    }

    let count = u32::try_from(n).map_err(|_| PipelineError::TooManyElements(n))?;
    let mut c = vec![0.0; n];

    let timer = Instant::now();

    let buf_a = backend.allocate_buffer(BufferAccess::ReadOnly, &job.a)?;
    let buf_b = backend.allocate_buffer(BufferAccess::ReadOnly, &job.b)?;
    let mut buf_c = backend.allocate_buffer(BufferAccess::WriteOnly, &c)?;
    debug!("allocated buffers of {}, {} and {} elements", job.a.len(), n, n);

    let kernel = backend.compile_kernel(&job.source, &job.entry)?;
    debug!("compiled kernel `{}`", job.entry);

    let local = job.local_work_size.filter(|&local| local > 0);

    if let Some(local) = local {
        if n % local != 0 {
            warn!("work-group size {local} does not divide {n}, padding the global size");
        }
    }

    let ranges = WorkRange::new(0, n).with_local(local).split(backend.queue_count());

    for (queue, range) in ranges.into_iter().enumerate() {
        debug!("queue {queue}: {} work-items from {}", range.padded_len(), range.offset);

        let mut args = [
            KernelArg::Input(&buf_a),
            KernelArg::Input(&buf_b),
            KernelArg::Output(&mut buf_c),
            KernelArg::Uint(count),
        ];
        backend.enqueue(queue, &kernel, &mut args, range)?;
    }

    backend.synchronise()?;
    backend.read_back(&buf_c, &mut c)?;

    let device_time = timer.elapsed();
    info!("device time: {:.6}ms", device_time.as_secs_f64() * 1000.0);

    if job.verify {
        let timer = Instant::now();
        verify::<B::BackendError>(&job.a, &job.b, &c)?;
        let host_time = timer.elapsed();

        info!(
            "verified {n} elements, host time: {:.6}ms, speedup: {:.2}x",
            host_time.as_secs_f64() * 1000.0,
            host_time.as_secs_f64() / device_time.as_secs_f64().max(f64::EPSILON)
        );
    }

    Ok(c)
}
