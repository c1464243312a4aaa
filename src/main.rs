//! pipe-sieve - Main Entry Point
//!
//! Without a subcommand this is the feeder: it prints every prime below the
//! bound, one `prime P` line each. The hidden `stage` subcommand is the
//! worker entry point used by the process backend.

use anyhow::Context;
use clap::{value_parser, Arg, ArgMatches, Command};
use pipe_sieve::backend::{CEILING_FLAG, STAGE_SUBCOMMAND};
use pipe_sieve::{
    Backend, Feeder, ProcessLauncher, SharedRecord, SieveConfig, Stage, ThreadLauncher,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    // stdout carries the record, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,pipe_sieve=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let matches = cli().get_matches();

    let result = match matches.subcommand() {
        Some((STAGE_SUBCOMMAND, sub)) => run_stage(sub),
        _ => run_feeder(&matches),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn cli() -> Command {
    Command::new("pipe-sieve")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .args_conflicts_with_subcommands(true)
        .arg(
            Arg::new("bound")
                .value_name("BOUND")
                .help("Exclusive upper bound of the candidate range (default 35).")
                .value_parser(value_parser!(i32))
                .allow_negative_numbers(true),
        )
        .arg(
            Arg::new("low")
                .long("low")
                .value_name("N")
                .help("First candidate (default 2).")
                .value_parser(value_parser!(i32))
                .allow_negative_numbers(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML config file; command line values take precedence.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_name("BACKEND")
                .help("Run stages as processes or as threads.")
                .value_parser(["process", "thread"]),
        )
        .subcommand(
            Command::new(STAGE_SUBCOMMAND)
                .hide(true)
                .about("Run one pipeline stage on stdin.")
                .arg(
                    Arg::new("ceiling")
                        .long(CEILING_FLAG.trim_start_matches('-'))
                        .value_name("N")
                        .value_parser(value_parser!(i32))
                        .allow_negative_numbers(true),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<SieveConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SieveConfig::load(path)?,
        None => SieveConfig::default(),
    };

    if let Some(&high) = matches.get_one::<i32>("bound") {
        config.high = high;
    }
    if let Some(&low) = matches.get_one::<i32>("low") {
        config.low = low;
    }
    if let Some(backend) = matches.get_one::<String>("backend") {
        config.backend = backend.parse()?;
    }

    config.validate()?;
    Ok(config)
}

fn run_feeder(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches)?;
    let feeder = Feeder::from_config(&config);

    tracing::info!(
        "Sieving [{}, {}) with the {} backend",
        config.low,
        config.high,
        config.backend.as_str()
    );

    let report = match config.backend {
        Backend::Process => {
            let launcher = ProcessLauncher::current_exe()?.with_ceiling(config.ceiling());
            feeder.run(&launcher)?
        }
        Backend::Thread => {
            let record = SharedRecord::new();
            let launcher = ThreadLauncher::new(record.clone()).with_ceiling(config.ceiling());
            let result = feeder.run(&launcher);

            // Lines already recorded stay valid even if a later stage failed
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(record.contents().as_bytes())
                .and_then(|()| stdout.flush())
                .context("Writing record")?;
            result?
        }
    };

    tracing::info!("Pipeline finished after {} values", report.values_fed);
    Ok(())
}

fn run_stage(matches: &ArgMatches) -> anyhow::Result<()> {
    let ceiling = matches.get_one::<i32>("ceiling").copied();
    let launcher = ProcessLauncher::current_exe()?.with_ceiling(ceiling);

    let report = Stage::new(io::stdin().lock(), io::stdout().lock(), launcher)
        .with_ceiling(ceiling)
        .run()?;

    tracing::debug!(
        "Stage process {} finished: {:?}",
        std::process::id(),
        report
    );
    Ok(())
}
