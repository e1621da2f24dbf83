use std::{fs, num::NonZeroUsize, path::PathBuf};

use anyhow::Context;
use structopt::StructOpt;
use vecadd::{
    pipeline::{self, Job},
    sequence::Listing,
    ComputeBackend, ContextConfig, CpuBackend, DeviceKind, InputMode, RunConfig,
};

use crate::BackendKind;

#[derive(StructOpt)]
pub struct RunOptions {
    #[structopt(long, default_value = "cpu")]
    backend: BackendKind,
    #[structopt(long, default_value = "0")]
    platform: usize,
    #[structopt(long, default_value = "0")]
    device: usize,
    #[structopt(long, default_value = "all")]
    device_type: DeviceKind,
    #[structopt(long, default_value = "1")]
    queues: usize,
    #[structopt(long)]
    local_work_size: Option<usize>,
    #[structopt(short = "n", long, default_value = "256")]
    length: usize,
    /// Extra elements in A beyond the length of B.
    #[structopt(long, default_value = "10")]
    offset: usize,
    /// First element of A.
    #[structopt(long, default_value = "10")]
    start: f32,
    /// Fill A and B with seeded random values instead of progressions.
    #[structopt(long)]
    seed: Option<u64>,
    #[structopt(long, default_value = "kernels/vecadd.cl", parse(from_os_str))]
    kernel: PathBuf,
    #[structopt(long, default_value = "vecadd")]
    entry: String,
    /// Check C against a sum computed on the host.
    #[structopt(long)]
    verify: bool,
    /// Worker threads for the cpu backend.
    #[structopt(long)]
    threads: Option<usize>,
}

impl RunOptions {
    fn config(&self) -> RunConfig {
        let inputs = match self.seed {
            Some(seed) => InputMode::Random { seed },
            None => InputMode::Progression { start: self.start, offset: self.offset },
        };

        let threads = self.threads.unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get));

        RunConfig {
            length: self.length,
            inputs,
            context: ContextConfig {
                platform: self.platform,
                device: self.device,
                kind: self.device_type,
                queues: self.queues,
                threads,
            },
            local_work_size: self.local_work_size,
            entry: self.entry.clone(),
            verify: self.verify,
        }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let config = self.config();
        config.validate().with_context(|| "Invalid configuration.")?;

        let source = fs::read_to_string(&self.kernel)
            .with_context(|| format!("Failed to read kernel source [{}].", self.kernel.display()))?;

        let job = config.job(source);

        let c = match self.backend {
            BackendKind::Cpu => execute::<CpuBackend>(&config.context, &job)?,
            BackendKind::OpenCl => execute_opencl(&config.context, &job)?,
        };

        println!("{}", Listing(&job.a));
        println!("{}", Listing(&job.b));
        println!("{}", Listing(&c));

        Ok(())
    }
}

/// The context lives only for the duration of this call.
fn execute<B: ComputeBackend>(context: &ContextConfig, job: &Job) -> anyhow::Result<Vec<f32>> {
    let backend = B::create_context(context).with_context(|| "Failed to acquire a compute context.")?;
    log::info!("Running on {}", backend.device_name());

    let c = pipeline::run(&backend, job)?;

    Ok(c)
}

#[cfg(feature = "opencl")]
fn execute_opencl(context: &ContextConfig, job: &Job) -> anyhow::Result<Vec<f32>> {
    execute::<vecadd::OclBackend>(context, job)
}

#[cfg(not(feature = "opencl"))]
fn execute_opencl(_: &ContextConfig, _: &Job) -> anyhow::Result<Vec<f32>> {
    anyhow::bail!("Built without OpenCL support, rebuild with `--features opencl`.")
}
