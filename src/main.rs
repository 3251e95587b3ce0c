// Copyright 2025 Cornell University
// released under MIT License

use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use acm_synth::diagnostic::DiagnosticHandler;
use acm_synth::errors::ConfigError;
use acm_synth::ir::{Policy, System};
use acm_synth::parser::parse_file;
use acm_synth::serialize::serialize;
use acm_synth::sim::Simulator;
use acm_synth::statespace::synthesize;
use clap::{ArgGroup, ColorChoice, Parser};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::info;

/// Synthesizes an asynchronous communication mechanism and prints it as a
/// petrify state graph
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(group(
    ArgGroup::new("model")
        .required(true)
        .args(["rrbb", "owbb", "owrrbb", "policy", "system"])
))]
struct Cli {
    /// Re-read (message) channel with N cells
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(2..))]
    rrbb: Option<u32>,

    /// Overwrite (signal) channel with N cells
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(2..))]
    owbb: Option<u32>,

    /// Overwrite and re-read (pool) channel with N cells
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(2..))]
    owrrbb: Option<u32>,

    /// Policy given by name or numeric code, used together with `--cells`
    #[arg(long, value_name = "POLICY", requires = "cells")]
    policy: Option<String>,

    /// Cell count for `--policy`
    #[arg(long, value_name = "N", requires = "policy", value_parser = clap::value_parser!(u32).range(2..))]
    cells: Option<u32>,

    /// Path to a system description file
    #[arg(long, value_name = "SYSTEM_FILE")]
    system: Option<PathBuf>,

    /// Channel to synthesize if the system file declares more than one
    #[arg(long, value_name = "CHANNEL", requires = "system")]
    channel: Option<String>,

    /// Print a random trace of this many events instead of the state graph
    #[arg(long, value_name = "STEPS")]
    sim: Option<usize>,

    /// Seed for `--sim`
    #[arg(long, default_value_t = 0, requires = "sim")]
    seed: u64,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    /// Pass in `--color never` to suppress colored error messages.
    #[arg(long, value_name = "COLOR_CHOICE", default_value = "auto")]
    color: ColorChoice,
}

impl Cli {
    fn load_system(&self) -> anyhow::Result<System> {
        let default = |policy: Policy, cells: u32| -> anyhow::Result<System> {
            Ok(System::default_topology(policy, cells)?)
        };
        if let Some(cells) = self.rrbb {
            default(Policy::Rr, cells)
        } else if let Some(cells) = self.owbb {
            default(Policy::Ow, cells)
        } else if let Some(cells) = self.owrrbb {
            default(Policy::OwRr, cells)
        } else if let (Some(policy), Some(cells)) = (&self.policy, self.cells) {
            default(policy.parse::<Policy>()?, cells)
        } else if let Some(path) = &self.system {
            let mut handler = DiagnosticHandler::new(self.color);
            parse_file(path, &mut handler)
        } else {
            unreachable!("clap requires a model")
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let system = cli.load_system()?;
    let channel = match &cli.channel {
        Some(name) => system
            .channel_by_name(name)
            .map_err(|_| ConfigError::UnknownChannel(name.clone()))?,
        None => system.sole_channel()?,
    };
    let graph = synthesize(&system, channel)?;

    let mut out = BufWriter::new(std::io::stdout().lock());
    if let Some(steps) = cli.sim {
        info!("Simulating {} steps with seed {}", steps, cli.seed);
        for label in Simulator::new(&graph.acm, cli.seed).trace(steps) {
            writeln!(out, "{label}")?;
        }
    } else {
        let command_line: Vec<String> = std::env::args().collect();
        serialize(&mut out, &graph.acm, &command_line)?;
    }
    out.flush()?;
    Ok(())
}

/// Examples:
/// ```
/// $ cargo run -- --rrbb 2
/// $ cargo run -- --owbb 3 -v
/// $ cargo run -- --system tests/systems/pipeline.acm --sim 20 --seed 4
/// ```
fn main() -> ExitCode {
    let cli = Cli::parse();

    // For concision, we disable timestamps in the log
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            match err.downcast_ref::<ConfigError>() {
                Some(config) => ExitCode::from(config.exit_code()),
                None => ExitCode::FAILURE,
            }
        }
    }
}
