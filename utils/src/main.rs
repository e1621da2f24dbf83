mod devices;
mod run;

use std::str::FromStr;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "vecadd", about = "Adds two vectors on a compute device and prints A, B and C")]
pub enum Options {
    Run(run::RunOptions),
    Devices(devices::DevicesOptions),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Cpu,
    OpenCl,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "opencl" | "cl" => Ok(Self::OpenCl),
            _ => Err(format!("unknown backend `{s}` (expected cpu or opencl)")),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Options::from_args() {
        Options::Run(options) => options.run(),
        Options::Devices(options) => options.run(),
    }
}
