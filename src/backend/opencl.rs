use std::fmt::Display;

use ocl::{
    enums::{DeviceInfo as ClDeviceInfo, DeviceInfoResult, ProgramInfo, ProgramInfoResult},
    flags, Buffer, Context, Device, Kernel, Platform, Program, Queue,
};

use super::{
    check_launch, BufferAccess, ComputeBackend, ContextConfig, DeviceBuffer, DeviceInfo, DeviceKind, KernelArg,
    OperationError, OperationResult, WorkRange,
};

#[derive(Debug)]
pub enum OclError {
    Driver(ocl::Error),
}

impl Display for OclError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver(err) => write!(f, "{err}"),
        }
    }
}

fn driver<E: Into<ocl::Error>>(err: E) -> OperationError<OclError> {
    OclError::Driver(err.into()).into()
}

fn device_type(kind: DeviceKind) -> Option<flags::DeviceType> {
    match kind {
        DeviceKind::All => None,
        DeviceKind::Gpu => Some(flags::DEVICE_TYPE_GPU),
        DeviceKind::Cpu => Some(flags::DEVICE_TYPE_CPU),
        DeviceKind::Accelerator => Some(flags::DEVICE_TYPE_ACCELERATOR),
    }
}

fn device_kind(device: &Device) -> Option<DeviceKind> {
    match device.info(ClDeviceInfo::Type) {
        Ok(DeviceInfoResult::Type(ty)) if ty.contains(flags::DEVICE_TYPE_GPU) => Some(DeviceKind::Gpu),
        Ok(DeviceInfoResult::Type(ty)) if ty.contains(flags::DEVICE_TYPE_CPU) => Some(DeviceKind::Cpu),
        Ok(DeviceInfoResult::Type(ty)) if ty.contains(flags::DEVICE_TYPE_ACCELERATOR) => Some(DeviceKind::Accelerator),
        _ => None,
    }
}

/// Platforms in driver order. An ICD loader with no platforms installed
/// reports an error rather than an empty list.
fn platforms() -> Result<Vec<Platform>, OperationError<OclError>> {
    let ids = ocl::core::get_platform_ids().map_err(driver)?;
    Ok(ids.into_iter().map(Platform::new).collect())
}

#[derive(Debug)]
pub struct OclBackend {
    device: Device,
    context: Context,
    queues: Vec<Queue>,
}

#[derive(Debug)]
pub struct OclBuffer {
    buf: Buffer<f32>,
    access: BufferAccess,
}

impl DeviceBuffer for OclBuffer {
    fn size(&self) -> usize {
        self.buf.len()
    }

    fn access(&self) -> BufferAccess {
        self.access
    }
}

#[derive(Debug)]
pub struct OclKernel {
    program: Program,
    entry: String,
}

impl ComputeBackend for OclBackend {
    type BackendError = OclError;
    type Buffer = OclBuffer;
    type Kernel = OclKernel;

    fn list_devices() -> Result<Vec<DeviceInfo>, OperationError<OclError>> {
        let mut infos = Vec::new();

        for (platform_idx, platform) in platforms()?.into_iter().enumerate() {
            let platform_name = platform.name().unwrap_or_else(|_| String::from("unknown platform"));

            for (device_idx, device) in Device::list_all(platform).map_err(driver)?.into_iter().enumerate() {
                infos.push(DeviceInfo {
                    platform: platform_idx,
                    platform_name: platform_name.clone(),
                    device: device_idx,
                    name: device.name().unwrap_or_else(|_| String::from("unknown device")),
                    kind: device_kind(&device),
                });
            }
        }

        Ok(infos)
    }

    fn create_context(config: &ContextConfig) -> Result<Self, OperationError<OclError>> {
        let platform =
            platforms()?.into_iter().nth(config.platform).ok_or(OperationError::NoPlatform(config.platform))?;

        let device = Device::list(platform, device_type(config.kind))
            .map_err(driver)?
            .get(config.device)
            .copied()
            .ok_or(OperationError::NoDevice { platform: config.platform, device: config.device })?;

        let context = Context::builder().platform(platform).devices(device).build().map_err(driver)?;

        let queues = (0..config.queues.max(1))
            .map(|_| Queue::new(&context, device, None))
            .collect::<Result<Vec<_>, _>>()
            .map_err(driver)?;

        log::debug!("created context with {} command queues", queues.len());

        Ok(Self { device, context, queues })
    }

    fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| String::from("unknown device"))
    }

    fn queue_count(&self) -> usize {
        self.queues.len()
    }

    fn allocate_buffer(&self, access: BufferAccess, host: &[f32]) -> Result<OclBuffer, OperationError<OclError>> {
        let flags = match access {
            BufferAccess::ReadOnly => flags::MEM_READ_ONLY,
            BufferAccess::WriteOnly => flags::MEM_WRITE_ONLY,
            BufferAccess::ReadWrite => flags::MEM_READ_WRITE,
        };

        let buf = Buffer::<f32>::builder()
            .queue(self.queues[0].clone())
            .flags(flags)
            .len(host.len())
            .copy_host_slice(host)
            .build()
            .map_err(driver)?;

        Ok(OclBuffer { buf, access })
    }

    fn compile_kernel(&self, source: &str, entry: &str) -> Result<OclKernel, OperationError<OclError>> {
        let program = Program::builder()
            .devices(self.device)
            .src(source)
            .build(&self.context)
            .map_err(|err| OperationError::BuildFailure(err.to_string()))?;

        let names = match program.info(ProgramInfo::KernelNames).map_err(driver)? {
            ProgramInfoResult::KernelNames(names) => names,
            _ => String::new(),
        };

        if !names.split(';').any(|name| name.trim() == entry) {
            return Err(OperationError::KernelNotFound(entry.to_string()));
        }

        Ok(OclKernel { program, entry: entry.to_string() })
    }

    fn enqueue(
        &self,
        queue: usize,
        kernel: &OclKernel,
        args: &mut [KernelArg<'_, Self>],
        range: WorkRange,
    ) -> OperationResult<OclError> {
        let queue = self.queues.get(queue).ok_or(OperationError::InvalidQueue(queue))?;

        check_launch(args, &range)?;

        let mut builder = Kernel::builder();
        builder.program(&kernel.program).name(kernel.entry.as_str()).queue(queue.clone());

        for arg in args.iter() {
            match arg {
                KernelArg::Input(buf) => builder.arg(&buf.buf),
                KernelArg::Output(buf) => builder.arg(&buf.buf),
                KernelArg::Uint(x) => builder.arg(*x),
            };
        }

        let cl_kernel = builder.build().map_err(driver)?;

        let mut cmd =
            cl_kernel.cmd().queue(queue).global_work_offset(range.offset).global_work_size(range.padded_len());

        if let Some(local) = range.local {
            cmd = cmd.local_work_size(local);
        }

        // Safety: every buffer argument covers the launch range (checked
        // above) and the kernel guards padded work-items with `n`.
        unsafe {
            cmd.enq().map_err(driver)?;
        }

        Ok(())
    }

    fn synchronise(&self) -> OperationResult<OclError> {
        for queue in &self.queues {
            queue.finish().map_err(driver)?;
        }

        Ok(())
    }

    fn read_back(&self, buffer: &OclBuffer, host: &mut [f32]) -> OperationResult<OclError> {
        if host.len() > buffer.buf.len() {
            return Err(OperationError::IndexOutOfBounds);
        }

        buffer.buf.read(host).queue(&self.queues[0]).enq().map_err(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests;

    tests::make_tests! {
        OclBackend,
        vecadd_small,
        vecadd_single_element,
        vecadd_reference_inputs,
        vecadd_idempotent,
        vecadd_multi_queue,
        vecadd_padded_work_groups,
        rejects_out_of_bounds_launch,
        rejects_invalid_queue,
        unknown_entry_point,
        build_failure,
        enforces_buffer_access,
        read_write_output,
    }

    #[test]
    fn lists_the_opened_device() {
        let devices = OclBackend::list_devices().unwrap();
        assert!(!devices.is_empty());

        let backend = OclBackend::create_context(&ContextConfig::default()).unwrap();
        assert_eq!(backend.device_name(), devices[0].name);
    }
}
