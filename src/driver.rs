//! Comparative driver
//!
//! Runs every variant of every chain shape under identical workloads and
//! times each call. Before timing a workload, all variants are checked
//! against the direct computation, so a faster variant can't also be a
//! wrong one.

use crate::kernel::callback::{
    chain_deferred, chain_with_callback, complex_chain_deferred, complex_chain_with_callback,
    start_with_callback, Deferred,
};
use crate::kernel::chain::{
    chain, chain_blocking, chain_direct, chain_from, complex_chain, complex_chain_blocking,
    complex_chain_direct, complex_chain_from, compute_task,
};
use crate::kernel::{compute, Guarded, TaskError, TaskResult, Unguarded, Workload};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::hint::black_box;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Variants and shapes
// ============================================================================

/// One way of sequencing the steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Nested continuations
    Callback,
    /// Continuations composed with `then`
    Deferred,
    /// Tasks pulled with `get`, faults captured
    Blocking,
    /// Tasks pulled with `get`, no capture
    BlockingUnguarded,
    /// Tasks awaited, faults captured
    Awaiting,
    /// Tasks awaited, no capture
    AwaitingUnguarded,
    /// Tasks awaited, first step started by the caller
    Elided,
}

impl Variant {
    pub const ALL: [Variant; 7] = [
        Variant::Callback,
        Variant::Deferred,
        Variant::Blocking,
        Variant::BlockingUnguarded,
        Variant::Awaiting,
        Variant::AwaitingUnguarded,
        Variant::Elided,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variant::Callback => "callback",
            Variant::Deferred => "deferred",
            Variant::Blocking => "blocking",
            Variant::BlockingUnguarded => "blocking-unguarded",
            Variant::Awaiting => "awaiting",
            Variant::AwaitingUnguarded => "awaiting-unguarded",
            Variant::Elided => "elided",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How many dependent steps a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Shape {
    /// One kernel call
    Simple,
    /// Two dependent steps
    Chain,
    /// Three dependent steps
    ComplexChain,
}

impl Shape {
    pub const ALL: [Shape; 3] = [Shape::Simple, Shape::Chain, Shape::ComplexChain];

    pub fn name(self) -> &'static str {
        match self {
            Shape::Simple => "simple",
            Shape::Chain => "chain",
            Shape::ComplexChain => "complex-chain",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// The result every variant must produce
    pub fn expected(self, workload: Workload) -> i64 {
        match self {
            Shape::Simple => compute(workload),
            Shape::Chain => chain_direct(workload),
            Shape::ComplexChain => complex_chain_direct(workload),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Running
// ============================================================================

/// One full start-to-completion cycle, returning the final result
pub fn run_once(variant: Variant, shape: Shape, workload: Workload) -> TaskResult<i64> {
    match variant {
        Variant::Callback => Ok(run_callback(shape, workload)),
        Variant::Deferred => Ok(run_deferred(shape, workload)),
        Variant::Blocking => match shape {
            Shape::Simple => compute_task::<Guarded>(workload).get(),
            Shape::Chain => chain_blocking::<Guarded>(workload).get(),
            Shape::ComplexChain => complex_chain_blocking::<Guarded>(workload).get(),
        },
        Variant::BlockingUnguarded => match shape {
            Shape::Simple => compute_task::<Unguarded>(workload).get(),
            Shape::Chain => chain_blocking::<Unguarded>(workload).get(),
            Shape::ComplexChain => complex_chain_blocking::<Unguarded>(workload).get(),
        },
        Variant::Awaiting => match shape {
            Shape::Simple => compute_task::<Guarded>(workload).get(),
            Shape::Chain => chain::<Guarded>(workload).get(),
            Shape::ComplexChain => complex_chain::<Guarded>(workload).get(),
        },
        Variant::AwaitingUnguarded => match shape {
            Shape::Simple => compute_task::<Unguarded>(workload).get(),
            Shape::Chain => chain::<Unguarded>(workload).get(),
            Shape::ComplexChain => complex_chain::<Unguarded>(workload).get(),
        },
        Variant::Elided => {
            let first = compute_task::<Guarded>(workload);
            match shape {
                Shape::Simple => first.get(),
                Shape::Chain => chain_from(first).get(),
                Shape::ComplexChain => complex_chain_from(first).get(),
            }
        }
    }
}

fn run_callback(shape: Shape, workload: Workload) -> i64 {
    let mut result = 0;
    match shape {
        Shape::Simple => start_with_callback(workload, |v| result = v),
        Shape::Chain => chain_with_callback(workload, |v| result = v),
        Shape::ComplexChain => complex_chain_with_callback(workload, |v| result = v),
    }
    result
}

fn run_deferred(shape: Shape, workload: Workload) -> i64 {
    let result = Rc::new(Cell::new(0));
    let sink = result.clone();
    let pipeline = match shape {
        Shape::Simple => Deferred::compute(workload),
        Shape::Chain => chain_deferred(workload),
        Shape::ComplexChain => complex_chain_deferred(workload),
    };
    pipeline.finish(move |v| sink.set(v));
    result.get()
}

/// Check every variant against the direct computation, for every shape
pub fn verify(workload: Workload) -> Result<(), DriverError> {
    for shape in Shape::ALL {
        let expected = shape.expected(workload);
        for variant in Variant::ALL {
            let actual = run_once(variant, shape, workload)?;
            if actual != expected {
                return Err(DriverError::Mismatch {
                    variant,
                    shape,
                    workload,
                    expected,
                    actual,
                });
            }
        }
    }
    debug!(workload, "all variants agree");
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Output {
    #[default]
    Table,
    Json,
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub workloads: Vec<Workload>,
    /// Timed calls per measurement
    pub iterations: u32,
    /// Untimed calls before timing starts
    pub warmup: u32,
    pub variants: Vec<Variant>,
    pub shapes: Vec<Shape>,
    pub output: Output,
    pub verbose: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            workloads: vec![1000],
            iterations: 10_000,
            warmup: 100,
            variants: Variant::ALL.to_vec(),
            shapes: Shape::ALL.to_vec(),
            output: Output::Table,
            verbose: false,
        }
    }
}

/// What the command line asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(DriverConfig),
    Help,
}

/// Command line errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("invalid number for {flag}: {value}")]
    InvalidNumber { flag: String, value: String },
    #[error("unknown variant: {0}")]
    UnknownVariant(String),
    #[error("unknown shape: {0}")]
    UnknownShape(String),
    #[error("unknown flag: {0}")]
    UnknownFlag(String),
    #[error("iterations must be at least 1")]
    ZeroIterations,
}

impl DriverConfig {
    /// Workloads 8 up to 8 << 10, growing by a factor of 8 and capped at the top
    pub fn varying_loads() -> Vec<Workload> {
        vec![8, 64, 512, 4096, 8192]
    }

    /// Parse command line arguments (without the program name).
    ///
    /// `--workload`, `--variant` and `--shape` are repeatable; the first use
    /// replaces the default list.
    pub fn parse_args<I, S>(args: I) -> Result<Command, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = DriverConfig::default();
        let mut workloads = Vec::new();
        let mut variants = Vec::new();
        let mut shapes = Vec::new();

        let mut args = args.into_iter().map(Into::<String>::into);
        while let Some(flag) = args.next() {
            match flag.as_str() {
                "-h" | "--help" => return Ok(Command::Help),
                "--json" => config.output = Output::Json,
                "-v" | "--verbose" => config.verbose = true,
                "--varying" => workloads.extend(Self::varying_loads()),
                "--workload" => workloads.push(number(&flag, args.next())?),
                "--iterations" => config.iterations = number(&flag, args.next())?,
                "--warmup" => config.warmup = number(&flag, args.next())?,
                "--variant" => {
                    let name = value(&flag, args.next())?;
                    let variant =
                        Variant::from_name(&name).ok_or(ConfigError::UnknownVariant(name))?;
                    variants.push(variant);
                }
                "--shape" => {
                    let name = value(&flag, args.next())?;
                    let shape = Shape::from_name(&name).ok_or(ConfigError::UnknownShape(name))?;
                    shapes.push(shape);
                }
                _ => return Err(ConfigError::UnknownFlag(flag)),
            }
        }

        if config.iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if !workloads.is_empty() {
            config.workloads = workloads;
        }
        if !variants.is_empty() {
            config.variants = variants;
        }
        if !shapes.is_empty() {
            config.shapes = shapes;
        }
        Ok(Command::Run(config))
    }
}

fn value(flag: &str, next: Option<String>) -> Result<String, ConfigError> {
    next.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn number<N: std::str::FromStr>(flag: &str, next: Option<String>) -> Result<N, ConfigError> {
    let raw = value(flag, next)?;
    raw.parse().map_err(|_| ConfigError::InvalidNumber {
        flag: flag.to_string(),
        value: raw,
    })
}

// ============================================================================
// Measurement
// ============================================================================

/// Driver errors
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("{variant} {shape}({workload}) returned {actual}, expected {expected}")]
    Mismatch {
        variant: Variant,
        shape: Shape,
        workload: Workload,
        expected: i64,
        actual: i64,
    },
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Timing of one variant/shape/workload combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub variant: Variant,
    pub shape: Shape,
    pub workload: Workload,
    pub iterations: u32,
    /// Result of the last timed call
    pub result: i64,
    pub min_ns: u64,
    pub median_ns: u64,
    pub mean_ns: f64,
    pub max_ns: u64,
}

impl Measurement {
    fn from_samples(
        variant: Variant,
        shape: Shape,
        workload: Workload,
        result: i64,
        mut samples: Vec<u64>,
    ) -> Self {
        samples.sort_unstable();
        let count = samples.len();
        let mean_ns = if count == 0 {
            0.0
        } else {
            samples.iter().map(|&s| s as f64).sum::<f64>() / count as f64
        };
        Self {
            variant,
            shape,
            workload,
            iterations: count as u32,
            result,
            min_ns: samples.first().copied().unwrap_or(0),
            median_ns: samples.get(count / 2).copied().unwrap_or(0),
            mean_ns,
            max_ns: samples.last().copied().unwrap_or(0),
        }
    }
}

/// Warm up, then time `config.iterations` calls
pub fn measure(
    config: &DriverConfig,
    variant: Variant,
    shape: Shape,
    workload: Workload,
) -> TaskResult<Measurement> {
    for _ in 0..config.warmup {
        black_box(run_once(variant, shape, black_box(workload))?);
    }

    let mut samples = Vec::with_capacity(config.iterations as usize);
    let mut result = 0;
    for _ in 0..config.iterations {
        let start = Instant::now();
        result = black_box(run_once(variant, shape, black_box(workload))?);
        samples.push(start.elapsed().as_nanos() as u64);
    }

    let measurement = Measurement::from_samples(variant, shape, workload, result, samples);
    debug!(
        %variant,
        %shape,
        workload,
        median_ns = measurement.median_ns,
        "measured"
    );
    Ok(measurement)
}

/// All measurements of one driver run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Report {
    pub measurements: Vec<Measurement>,
}

impl Report {
    pub fn to_json(&self) -> Result<String, DriverError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_table(&self) -> String {
        let mut out = format!(
            "{:<20} {:<14} {:>9} {:>12} {:>12} {:>12} {:>12}\n",
            "variant", "shape", "workload", "median ns", "mean ns", "min ns", "max ns"
        );
        for m in &self.measurements {
            out.push_str(&format!(
                "{:<20} {:<14} {:>9} {:>12} {:>12.1} {:>12} {:>12}\n",
                m.variant.name(),
                m.shape.name(),
                m.workload,
                m.median_ns,
                m.mean_ns,
                m.min_ns,
                m.max_ns
            ));
        }
        out
    }
}

/// Verify, then measure every configured combination
pub fn run(config: &DriverConfig) -> Result<Report, DriverError> {
    let mut report = Report::default();
    for &workload in &config.workloads {
        verify(workload)?;
        for &shape in &config.shapes {
            for &variant in &config.variants {
                report
                    .measurements
                    .push(measure(config, variant, shape, workload)?);
            }
        }
    }
    debug!(measurements = report.measurements.len(), "driver run complete");
    Ok(report)
}
