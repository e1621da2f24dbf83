use std::fmt::Display;

use crate::{backend::ContextConfig, pipeline::Job, sequence};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputMode {
    /// `a = [start, start + 1, ...]` with `offset` more elements than `b = [0, 1, ...]`.
    Progression { start: f32, offset: usize },
    /// Both inputs drawn from a generator seeded with `seed`.
    Random { seed: u64 },
}

impl Default for InputMode {
    fn default() -> Self {
        Self::Progression { start: 10.0, offset: 10 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub length: usize,
    pub inputs: InputMode,
    pub context: ContextConfig,
    pub local_work_size: Option<usize>,
    pub entry: String,
    pub verify: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            length: 256,
            inputs: InputMode::default(),
            context: ContextConfig::default(),
            local_work_size: None,
            entry: crate::VECADD_ENTRY.to_string(),
            verify: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    EmptyInput,
    TooLong(usize),
    NoQueues,
    TooManyQueues { queues: usize, length: usize },
    ZeroWorkGroupSize,
    NoThreads,
    EmptyEntryPoint,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "input length must be at least 1"),
            Self::TooLong(len) => write!(f, "input length {len} exceeds {}", u32::MAX),
            Self::NoQueues => write!(f, "at least one command queue is required"),
            Self::TooManyQueues { queues, length } => {
                write!(f, "{queues} command queues cannot share {length} elements")
            }
            Self::ZeroWorkGroupSize => write!(f, "work-group size must be at least 1"),
            Self::NoThreads => write!(f, "at least one host thread is required"),
            Self::EmptyEntryPoint => write!(f, "kernel entry point must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.length == 0 {
            return Err(ConfigError::EmptyInput);
        }

        if u32::try_from(self.length).is_err() {
            return Err(ConfigError::TooLong(self.length));
        }

        if self.context.queues == 0 {
            return Err(ConfigError::NoQueues);
        }

        if self.context.queues > self.length {
            return Err(ConfigError::TooManyQueues { queues: self.context.queues, length: self.length });
        }

        if self.local_work_size == Some(0) {
            return Err(ConfigError::ZeroWorkGroupSize);
        }

        if self.context.threads == 0 {
            return Err(ConfigError::NoThreads);
        }

        if self.entry.is_empty() {
            return Err(ConfigError::EmptyEntryPoint);
        }

        Ok(())
    }

    /// Builds the two input sequences.
    pub fn inputs(&self) -> (Vec<f32>, Vec<f32>) {
        match self.inputs {
            InputMode::Progression { start, offset } => {
                (sequence::progression(start, self.length + offset), sequence::progression(0.0, self.length))
            }
            InputMode::Random { seed } => {
                (sequence::random(seed, self.length), sequence::random(seed.wrapping_add(1), self.length))
            }
        }
    }

    pub fn job(&self, source: String) -> Job {
        let (a, b) = self.inputs();

        Job { a, b, source, entry: self.entry.clone(), local_work_size: self.local_work_size, verify: self.verify }
    }
}
