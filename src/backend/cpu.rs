use std::{
    fmt::Display,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use super::{
    check_launch, BufferAccess, ComputeBackend, ContextConfig, DeviceBuffer, DeviceInfo, DeviceKind, KernelArg,
    OperationError, OperationResult, WorkRange,
};

#[derive(Debug)]
pub enum CpuError {
    WorkerPanicked,
}

impl Display for CpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorkerPanicked => write!(f, "a worker thread panicked"),
        }
    }
}

/// Computes the output element for one work-item, or `None` if the
/// work-item is guarded out.
type HostFn = fn(idx: usize, inputs: &[&[f32]], scalars: &[u32]) -> Option<f32>;

#[derive(Clone, Copy, Debug)]
struct HostKernel {
    name: &'static str,
    inputs: usize,
    scalars: usize,
    func: HostFn,
}

const HOST_KERNELS: [HostKernel; 1] = [HostKernel { name: "vecadd", inputs: 2, scalars: 1, func: vecadd }];

fn vecadd(idx: usize, inputs: &[&[f32]], scalars: &[u32]) -> Option<f32> {
    let n = scalars[0] as usize;
    (idx < n).then(|| inputs[0][idx] + inputs[1][idx])
}

/// Executes kernels on the host, one scoped thread per chunk of work-items.
#[derive(Debug)]
pub struct CpuBackend {
    threads: usize,
    queues: usize,
    live: Arc<AtomicUsize>,
}

impl CpuBackend {
    /// Number of buffers allocated by this backend that have not been dropped.
    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn available_threads() -> usize {
        std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
    }
}

#[derive(Debug)]
pub struct CpuBuffer {
    buf: Vec<f32>,
    access: BufferAccess,
    live: Arc<AtomicUsize>,
}

impl Drop for CpuBuffer {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DeviceBuffer for CpuBuffer {
    fn size(&self) -> usize {
        self.buf.len()
    }

    fn access(&self) -> BufferAccess {
        self.access
    }
}

#[derive(Clone, Debug)]
pub struct CpuKernel {
    kernel: HostKernel,
}

impl ComputeBackend for CpuBackend {
    type BackendError = CpuError;
    type Buffer = CpuBuffer;
    type Kernel = CpuKernel;

    fn list_devices() -> Result<Vec<DeviceInfo>, OperationError<CpuError>> {
        Ok(vec![DeviceInfo {
            platform: 0,
            platform_name: String::from("Host"),
            device: 0,
            name: format!("host ({} threads)", Self::available_threads()),
            kind: Some(DeviceKind::Cpu),
        }])
    }

    fn create_context(config: &ContextConfig) -> Result<Self, OperationError<CpuError>> {
        if config.platform != 0 {
            return Err(OperationError::NoPlatform(config.platform));
        }

        if config.device != 0 || !matches!(config.kind, DeviceKind::All | DeviceKind::Cpu) {
            return Err(OperationError::NoDevice { platform: config.platform, device: config.device });
        }

        Ok(Self { threads: config.threads.max(1), queues: config.queues.max(1), live: Arc::default() })
    }

    fn device_name(&self) -> String {
        format!("host ({} threads)", self.threads)
    }

    fn queue_count(&self) -> usize {
        self.queues
    }

    fn allocate_buffer(&self, access: BufferAccess, host: &[f32]) -> Result<CpuBuffer, OperationError<CpuError>> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(CpuBuffer { buf: host.to_vec(), access, live: self.live.clone() })
    }

    fn compile_kernel(&self, source: &str, entry: &str) -> Result<CpuKernel, OperationError<CpuError>> {
        let source = strip_comments(source);

        check_delimiters(&source).map_err(OperationError::BuildFailure)?;

        if !kernel_entries(&source).contains(&entry) {
            return Err(OperationError::KernelNotFound(entry.to_string()));
        }

        let kernel = HOST_KERNELS
            .iter()
            .find(|kernel| kernel.name == entry)
            .copied()
            .ok_or_else(|| OperationError::UnsupportedKernel(entry.to_string()))?;

        log::debug!("resolved `{entry}` to a host kernel");

        Ok(CpuKernel { kernel })
    }

    fn enqueue(
        &self,
        queue: usize,
        kernel: &CpuKernel,
        args: &mut [KernelArg<'_, Self>],
        range: WorkRange,
    ) -> OperationResult<CpuError> {
        if queue >= self.queues {
            return Err(OperationError::InvalidQueue(queue));
        }

        check_launch(args, &range)?;

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut scalars = Vec::new();

        for arg in args.iter_mut() {
            match arg {
                KernelArg::Input(buf) => inputs.push(buf.buf.as_slice()),
                KernelArg::Output(buf) => outputs.push(&mut buf.buf[range.offset..range.end()]),
                KernelArg::Uint(x) => scalars.push(*x),
            }
        }

        let HostKernel { name, func, .. } = kernel.kernel;

        if inputs.len() != kernel.kernel.inputs || scalars.len() != kernel.kernel.scalars || outputs.len() != 1 {
            return Err(OperationError::InvalidArguments(format!(
                "`{name}` takes {} inputs, 1 output and {} scalars, got {}, {} and {}",
                kernel.kernel.inputs,
                kernel.kernel.scalars,
                inputs.len(),
                outputs.len(),
                scalars.len()
            )));
        }

        let output = outputs.pop().ok_or(OperationError::IndexOutOfBounds)?;
        let chunk_size = range.len.div_ceil(self.threads).max(1);
        let inputs = &inputs;
        let scalars = &scalars;

        std::thread::scope(|s| {
            let handles = output
                .chunks_mut(chunk_size)
                .enumerate()
                .map(|(chunk, part)| {
                    let start = range.offset + chunk * chunk_size;

                    s.spawn(move || {
                        for (idx, out) in (start..).zip(part.iter_mut()) {
                            if let Some(val) = func(idx, inputs, scalars) {
                                *out = val;
                            }
                        }
                    })
                })
                .collect::<Vec<_>>();

            let panicked = handles.into_iter().map(|handle| handle.join()).filter(Result::is_err).count();

            if panicked > 0 {
                log::error!("{panicked} worker(s) panicked running `{name}`");
                return Err(CpuError::WorkerPanicked);
            }

            Ok(())
        })?;

        Ok(())
    }

    fn synchronise(&self) -> OperationResult<CpuError> {
        Ok(())
    }

    fn read_back(&self, buffer: &CpuBuffer, host: &mut [f32]) -> OperationResult<CpuError> {
        if host.len() > buffer.buf.len() {
            return Err(OperationError::IndexOutOfBounds);
        }

        host.copy_from_slice(&buffer.buf[..host.len()]);
        Ok(())
    }
}

/// Removes comments and blanks the contents of string and character
/// literals, keeping line breaks so diagnostics still point at the right line.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        match (ch, chars.peek()) {
            ('/', Some('/')) => {
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && ch == '/' {
                        break;
                    }
                    prev = ch;
                }
                out.push(' ');
            }
            ('"' | '\'', _) => {
                out.push(ch);
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => {
                            chars.next();
                            out.push(' ');
                        }
                        '\n' => {
                            out.push('\n');
                            break;
                        }
                        _ if inner == ch => {
                            out.push(ch);
                            break;
                        }
                        _ => out.push(' '),
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

fn check_delimiters(source: &str) -> Result<(), String> {
    let mut stack = Vec::new();

    for (line, text) in source.lines().enumerate() {
        for ch in text.chars() {
            match ch {
                '(' | '{' | '[' => stack.push((ch, line + 1)),
                ')' | '}' | ']' => {
                    let expected = match ch {
                        ')' => '(',
                        '}' => '{',
                        _ => '[',
                    };

                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, opened)) => {
                            return Err(format!("{}: error: `{ch}` does not close `{open}` opened on line {opened}", line + 1))
                        }
                        None => return Err(format!("{}: error: unexpected `{ch}`", line + 1)),
                    }
                }
                _ => {}
            }
        }
    }

    match stack.pop() {
        Some((open, line)) => Err(format!("{line}: error: unclosed `{open}`")),
        None => Ok(()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Punct(char),
}

fn tokenise(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            let mut end = start + ch.len_utf8();
            while let Some(&(idx, next)) = chars.peek() {
                if !(next.is_ascii_alphanumeric() || next == '_') {
                    break;
                }
                end = idx + next.len_utf8();
                chars.next();
            }
            tokens.push(Token::Ident(&source[start..end]));
        } else if !ch.is_whitespace() {
            tokens.push(Token::Punct(ch));
        }
    }

    tokens
}

/// Skips any `__attribute__((...))` groups starting at `pos`.
fn skip_attributes(tokens: &[Token<'_>], mut pos: usize) -> usize {
    while let Some(Token::Ident("__attribute__" | "__attribute")) = tokens.get(pos) {
        pos += 1;
        let mut depth = 0usize;

        while let Some(token) = tokens.get(pos) {
            match token {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => depth = depth.saturating_sub(1),
                _ if depth == 0 => break,
                _ => {}
            }

            pos += 1;

            if depth == 0 {
                break;
            }
        }
    }

    pos
}

/// Names of the functions declared `kernel void` / `__kernel void`, with
/// optional attributes on either side of `void`.
fn kernel_entries(source: &str) -> Vec<&str> {
    let tokens = tokenise(source);
    let mut entries = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        if !matches!(token, Token::Ident("kernel" | "__kernel")) {
            continue;
        }

        let pos = skip_attributes(&tokens, idx + 1);
        if tokens.get(pos) != Some(&Token::Ident("void")) {
            continue;
        }

        let pos = skip_attributes(&tokens, pos + 1);
        if let (Some(Token::Ident(name)), Some(Token::Punct('('))) = (tokens.get(pos), tokens.get(pos + 1)) {
            entries.push(*name);
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::tests, VECADD_KERNEL_SRC};

    tests::make_tests! {
        CpuBackend,
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

    fn backend(threads: usize) -> CpuBackend {
        CpuBackend::create_context(&ContextConfig { threads, ..ContextConfig::default() }).unwrap()
    }

    #[test]
    fn finds_kernel_entries() {
        let src = strip_comments(VECADD_KERNEL_SRC);
        assert_eq!(kernel_entries(&src), ["vecadd"]);

        let src = "kernel void a(global float *x) {}\n__kernel void b() {}\nvoid helper() {}";
        assert_eq!(kernel_entries(src), ["a", "b"]);
    }

    #[test]
    fn commented_out_kernels_are_ignored() {
        let src = strip_comments("// __kernel void hidden() {}\n/* kernel void also_hidden() {} */\nkernel void shown() {}");
        assert_eq!(kernel_entries(&src), ["shown"]);
    }

    #[test]
    fn attributes_around_kernel_declarations() {
        let src = "__kernel __attribute__((reqd_work_group_size(1, 1, 1))) void vecadd(global float *a) {}\n\
                   kernel void __attribute__((vec_type_hint(float4))) scale(global float *a) {}\n\
                   __kernel __attribute__((work_group_size_hint(64, 1, 1))) __attribute__((packed)) void pack() {}";
        assert_eq!(kernel_entries(src), ["vecadd", "scale", "pack"]);
    }

    #[test]
    fn literals_do_not_count_as_delimiters() {
        let src = strip_comments("kernel void a() {\n  printf(\":) \\\" ]\\n\");\n  char c = '{';\n}\n");
        assert!(check_delimiters(&src).is_ok(), "{src}");
        assert_eq!(src.lines().count(), 4);

        let src = strip_comments("kernel void a() { printf(\"// not a comment\"); }\nkernel void b() {}");
        assert_eq!(kernel_entries(&src), ["a", "b"]);
    }

    #[test]
    fn compiles_kernel_with_attributes_and_printf() {
        let backend = backend(1);
        let src = "__kernel __attribute__((reqd_work_group_size(1, 1, 1)))\n\
                   void vecadd(__global const float *a, __global const float *b, __global float *c, const uint n) {\n\
                   \x20   if (get_global_id(0) == 0) printf(\":)\\n\");\n\
                   }\n";
        assert!(backend.compile_kernel(src, "vecadd").is_ok());
    }

    #[test]
    fn delimiter_diagnostics_name_the_line() {
        assert!(check_delimiters("kernel void a() {\n}\n").is_ok());

        let err = check_delimiters("kernel void a() {\n  x = (1;\n}\n").unwrap_err();
        assert!(err.starts_with("3:"), "{err}");

        let err = check_delimiters("kernel void a() {\n").unwrap_err();
        assert!(err.contains("unclosed `{`"), "{err}");
    }

    #[test]
    fn no_gpu_on_host_platform() {
        let config = ContextConfig { kind: DeviceKind::Gpu, ..ContextConfig::default() };
        assert!(matches!(CpuBackend::create_context(&config), Err(OperationError::NoDevice { .. })));

        let config = ContextConfig { platform: 1, ..ContextConfig::default() };
        assert!(matches!(CpuBackend::create_context(&config), Err(OperationError::NoPlatform(1))));

        let config = ContextConfig { device: 2, ..ContextConfig::default() };
        assert!(matches!(CpuBackend::create_context(&config), Err(OperationError::NoDevice { device: 2, .. })));
    }

    #[test]
    fn unsupported_host_kernel() {
        let backend = backend(1);
        let err = backend.compile_kernel("kernel void vecmul(global float *a) {}", "vecmul").unwrap_err();
        assert!(matches!(err, OperationError::UnsupportedKernel(name) if name == "vecmul"));
    }

    #[test]
    fn buffers_are_released_on_drop() {
        let backend = backend(1);

        let a = backend.allocate_buffer(BufferAccess::ReadOnly, &[1.0, 2.0]).unwrap();
        let b = backend.allocate_buffer(BufferAccess::WriteOnly, &[0.0; 2]).unwrap();
        assert_eq!(backend.live_buffers(), 2);
        assert_eq!(a.access(), BufferAccess::ReadOnly);
        assert_eq!(b.size(), 2);

        drop(a);
        assert_eq!(backend.live_buffers(), 1);
        drop(b);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn threads_cover_every_work_item() {
        for threads in [1, 3, 8, 64] {
            let backend = backend(threads);
            let kernel = backend.compile_kernel(VECADD_KERNEL_SRC, "vecadd").unwrap();

            let a = (0..37).map(|x| x as f32).collect::<Vec<_>>();
            let b = vec![1.0; 37];
            let buf_a = backend.allocate_buffer(BufferAccess::ReadOnly, &a).unwrap();
            let buf_b = backend.allocate_buffer(BufferAccess::ReadOnly, &b).unwrap();
            let mut buf_c = backend.allocate_buffer(BufferAccess::WriteOnly, &[0.0; 37]).unwrap();

            let mut args =
                [KernelArg::Input(&buf_a), KernelArg::Input(&buf_b), KernelArg::Output(&mut buf_c), KernelArg::Uint(37)];
            backend.enqueue(0, &kernel, &mut args, WorkRange::new(0, 37)).unwrap();

            let mut c = [0.0; 37];
            backend.read_back(&buf_c, &mut c).unwrap();

            for (i, &val) in c.iter().enumerate() {
                assert_eq!(val, i as f32 + 1.0, "threads = {threads}");
            }
        }
    }

    #[test]
    fn guard_leaves_tail_untouched() {
        let backend = backend(2);
        let kernel = backend.compile_kernel(VECADD_KERNEL_SRC, "vecadd").unwrap();

        let buf_a = backend.allocate_buffer(BufferAccess::ReadOnly, &[1.0; 4]).unwrap();
        let buf_b = backend.allocate_buffer(BufferAccess::ReadOnly, &[1.0; 4]).unwrap();
        let mut buf_c = backend.allocate_buffer(BufferAccess::WriteOnly, &[-1.0; 4]).unwrap();

        let mut args =
            [KernelArg::Input(&buf_a), KernelArg::Input(&buf_b), KernelArg::Output(&mut buf_c), KernelArg::Uint(2)];
        backend.enqueue(0, &kernel, &mut args, WorkRange::new(0, 4)).unwrap();

        let mut c = [0.0; 4];
        backend.read_back(&buf_c, &mut c).unwrap();
        assert_eq!(c, [2.0, 2.0, -1.0, -1.0]);
    }

    #[test]
    fn wrong_argument_count() {
        let backend = backend(1);
        let kernel = backend.compile_kernel(VECADD_KERNEL_SRC, "vecadd").unwrap();

        let buf_a = backend.allocate_buffer(BufferAccess::ReadOnly, &[1.0; 4]).unwrap();
        let mut buf_c = backend.allocate_buffer(BufferAccess::WriteOnly, &[0.0; 4]).unwrap();

        let mut args = [KernelArg::Input(&buf_a), KernelArg::Output(&mut buf_c), KernelArg::Uint(4)];
        let err = backend.enqueue(0, &kernel, &mut args, WorkRange::new(0, 4)).unwrap_err();
        assert!(matches!(err, OperationError::InvalidArguments(_)));
    }

    #[test]
    fn every_panicking_worker_is_joined() {
        let backend = backend(4);
        let kernel = CpuKernel {
            kernel: HostKernel { name: "explode", inputs: 2, scalars: 1, func: |_, _, _| -> Option<f32> { panic!("explode") } },
        };

        let buf_a = backend.allocate_buffer(BufferAccess::ReadOnly, &[1.0; 16]).unwrap();
        let buf_b = backend.allocate_buffer(BufferAccess::ReadOnly, &[1.0; 16]).unwrap();
        let mut buf_c = backend.allocate_buffer(BufferAccess::WriteOnly, &[0.0; 16]).unwrap();

        let mut args =
            [KernelArg::Input(&buf_a), KernelArg::Input(&buf_b), KernelArg::Output(&mut buf_c), KernelArg::Uint(16)];
        let err = backend.enqueue(0, &kernel, &mut args, WorkRange::new(0, 16)).unwrap_err();
        assert!(matches!(err, OperationError::DeviceError(err) if matches!(*err, CpuError::WorkerPanicked)));
    }
}
