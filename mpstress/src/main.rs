//! mpstress - CPU load recorder for distributed stress tests
//!
//! Reads a host list on stdin, runs `mpstat` on every host through orgalorg and
//! writes one time series per host and metric while a workload runs:
//! - `output/<host>/{usr,sys,iowait,idle,total}`, one `"<time> <value>"` line per second
//! - collection ends when the workload command exits, or on ctrl-c with `-w`

mod config;
mod error;
mod hosts;
mod lifecycle;
mod report;
mod signal;
mod stream;
mod supervisor;
mod writer;

use anyhow::{Context, Result};
use clap::Parser;
use config::{CollectorConfig, ConfigOverrides};
use lifecycle::{Workload, WorkloadOutcome};
use signal::Interrupts;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Command line, mirroring `mpstress [options] <command>...` and `mpstress [options] -w`
#[derive(Debug, Parser)]
#[command(name = "mpstress", version, about = "Record per-host CPU usage while a stress test runs")]
struct Cli {
    /// User to authorize on hosts [default: root]
    #[arg(short, long, value_name = "NAME")]
    user: Option<String>,

    /// Just wait for SIGINT (ctrl-c)
    #[arg(short, long, conflicts_with = "command")]
    wait: bool,

    /// mpstat <interval> field value, in seconds [default: 1]
    #[arg(short, long, value_name = "N")]
    interval: Option<u32>,

    /// Directory to write data [default: output]
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Remote execution helper [default: orgalorg]
    #[arg(long, value_name = "PATH")]
    helper: Option<String>,

    /// Configuration file [default: <config dir>/mpstress/config.toml if present]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Workload command to run while collecting
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required_unless_present = "wait"
    )]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            user: self.user.clone(),
            interval: self.interval,
            output_dir: self.output.clone(),
            helper_program: self.helper.clone(),
        }
    }

    fn workload(&self) -> Workload {
        if self.wait {
            Workload::WaitForInterrupt
        } else {
            Workload::Command(self.command.clone())
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "mpstress=debug" } else { "mpstress=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    info!("mpstress {} starting", env!("CARGO_PKG_VERSION"));

    let config = CollectorConfig::load(cli.config.as_deref())
        .await?
        .apply(cli.overrides());
    config.validate().context("Invalid configuration")?;

    let hosts = hosts::read_hosts(tokio::io::stdin())
        .await
        .context("unable to read stdin")?;

    let interrupts = Interrupts::new();
    signal::spawn_interrupt_listener(interrupts.clone());

    let workload = cli.workload();
    let report = lifecycle::run(&config, &hosts, workload, interrupts)
        .await
        .map_err(|e| {
            let context = if e.is_fatal() { "unable to start mpstat" } else { "collection failed" };
            anyhow::Error::new(e).context(context)
        })?;

    match &report.workload {
        WorkloadOutcome::Exited(status) => info!("workload finished: {}", status),
        WorkloadOutcome::Interrupted => info!("collection interrupted"),
        WorkloadOutcome::Failed(_) => {}
    }
    if let Some(status) = report.drain.helper_status {
        debug!("helper exit status: {}", status);
    }
    if report.drain.forced {
        warn!("helper was killed, trailing samples may be missing");
    }
    info!(
        "samples written to {} ({} samples)",
        config.output_dir.display(),
        report.drain.decode.samples_written
    );

    if report.exit_code != 0 {
        std::process::exit(report.exit_code);
    }
    Ok(())
}
