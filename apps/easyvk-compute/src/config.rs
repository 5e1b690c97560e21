//! Command line handling.

use anyhow::{bail, Context};
use std::path::PathBuf;

/// Elements copied when `--elements` is not given.
pub const DEFAULT_ELEMENTS: u32 = 1000;

/// Demo settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    /// Number of `u32` values sent through the device.
    pub elements: u32,
    /// Compute shader run over the device buffer between the two copies.
    pub shader: Option<PathBuf>,
    pub validation: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            elements: DEFAULT_ELEMENTS,
            shader: None,
            validation: cfg!(debug_assertions),
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(DemoConfig),
    Help,
}

/// Parse arguments, excluding the program name.
pub fn parse_args(args: &[String]) -> anyhow::Result<Invocation> {
    let mut config = DemoConfig::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--elements" | "-n" => {
                let value = args.get(i + 1).context("--elements needs a value")?;
                config.elements = value
                    .parse()
                    .with_context(|| format!("invalid element count {value:?}"))?;
                if config.elements == 0 {
                    bail!("--elements must be at least 1");
                }
                i += 1;
            }
            "--shader" | "-s" => {
                let value = args.get(i + 1).context("--shader needs a path")?;
                config.shader = Some(PathBuf::from(value));
                i += 1;
            }
            "--no-validation" => config.validation = false,
            "--validation" => config.validation = true,
            "-h" | "--help" => return Ok(Invocation::Help),
            other => bail!("unknown argument {other:?} (see --help)"),
        }
        i += 1;
    }

    Ok(Invocation::Run(config))
}

pub fn print_help() {
    eprintln!(
        "easyvk compute demo

Copies 0..N through host -> device -> host memory and checks the result. With --shader,
a compute shader runs over the device buffer between the copies instead.

USAGE:
    cargo run -p easyvk-compute -- [OPTIONS]

OPTIONS:
    -n, --elements <N>      Number of u32 elements (default: {DEFAULT_ELEMENTS})
    -s, --shader <PATH>     SPIR-V compute shader; binding 0 is the storage buffer and
                            the push constant block holds the element count
    --no-validation         Disable validation layers
    --validation            Enable validation layers (default in debug builds)
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
