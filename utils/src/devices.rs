use anyhow::Context;
use structopt::StructOpt;
use vecadd::{backend::DeviceInfo, ComputeBackend, CpuBackend};

use crate::BackendKind;

#[derive(StructOpt)]
pub struct DevicesOptions {
    #[structopt(long, default_value = "cpu")]
    backend: BackendKind,
}

impl DevicesOptions {
    pub fn run(&self) -> anyhow::Result<()> {
        let devices = match self.backend {
            BackendKind::Cpu => CpuBackend::list_devices().with_context(|| "Failed to query host device.")?,
            BackendKind::OpenCl => list_opencl()?,
        };

        if devices.is_empty() {
            println!("No devices found.");
        }

        for device in devices {
            println!("{device}");
        }

        Ok(())
    }
}

#[cfg(feature = "opencl")]
fn list_opencl() -> anyhow::Result<Vec<DeviceInfo>> {
    vecadd::OclBackend::list_devices().with_context(|| "Failed to query OpenCL platforms.")
}

#[cfg(not(feature = "opencl"))]
fn list_opencl() -> anyhow::Result<Vec<DeviceInfo>> {
    anyhow::bail!("Built without OpenCL support, rebuild with `--features opencl`.")
}
