//! sequent-bench - compare callback and suspension chaining
//!
//! Run with: cargo run --release --bin sequent-bench -- --varying --json

use sequent::driver::{self, Command, DriverConfig, Output};
use std::process::ExitCode;
use tracing::Level;

const USAGE: &str = "\
usage: sequent-bench [options]

options:
  --workload N     workload to run (repeatable, default 1000)
  --varying        add the workloads 8, 64, 512, 4096, 8192
  --iterations N   timed calls per measurement (default 10000)
  --warmup N       untimed calls before timing (default 100)
  --variant NAME   callback, deferred, blocking, blocking-unguarded,
                   awaiting, awaiting-unguarded, elided (repeatable)
  --shape NAME     simple, chain, complex-chain (repeatable)
  --json           print the report as JSON
  -v, --verbose    log driver progress to stderr
  -h, --help       show this help";

fn main() -> ExitCode {
    let config = match DriverConfig::parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("sequent-bench: {}", e);
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let report = match driver::run(&config) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("sequent-bench: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.output {
        Output::Table => print!("{}", report.render_table()),
        Output::Json => match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("sequent-bench: {}", e);
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}
