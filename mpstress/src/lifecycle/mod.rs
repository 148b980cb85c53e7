//! Collection lifecycle
//!
//! A run moves through `Starting -> Collecting -> Stopping -> Drained`:
//! - Starting: the helper is spawned, then the decode loop and the wait loop
//! - Collecting: a workload command runs, or the run waits for SIGINT
//! - Stopping: SIGINT is sent to the helper, which closes its stdout
//! - Drained: both loops have returned
//!
//! Stopping is reached exactly once per started run, whatever the workload
//! did. A second interrupt while draining SIGKILLs the helper.

use crate::config::CollectorConfig;
use crate::error::Result;
use crate::signal::Interrupts;
use crate::stream::{DecodeStats, StreamDecoder};
use crate::supervisor::{HelperLaunch, HelperSignal, HelperWaiter};
use crate::writer::MetricWriter;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// Run phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Collecting,
    Stopping,
    Drained,
}

/// What bounds the collection window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// Run this command (program and arguments) in the foreground
    Command(Vec<String>),
    /// Collect until SIGINT
    WaitForInterrupt,
}

/// How the collection window ended
#[derive(Debug)]
pub enum WorkloadOutcome {
    Exited(ExitStatus),
    Failed(String),
    Interrupted,
}

impl WorkloadOutcome {
    /// Process exit code to report once the run is drained
    pub fn exit_code(&self, workload: &Workload) -> i32 {
        match self {
            WorkloadOutcome::Exited(status) => status
                .code()
                .or_else(|| status.signal().map(|sig| 128 + sig))
                .unwrap_or(1),
            WorkloadOutcome::Failed(_) => 1,
            WorkloadOutcome::Interrupted => match workload {
                Workload::WaitForInterrupt => 0,
                Workload::Command(_) => 130,
            },
        }
    }
}

/// Summary of a drained run
#[derive(Debug)]
pub struct DrainReport {
    pub decode: DecodeStats,
    pub helper_status: Option<ExitStatus>,
    pub forced: bool,
}

/// A started helper with its two background loops
pub struct Collection {
    phase: Phase,
    signal: HelperSignal,
    interrupts: Interrupts,
    shutdown_requested: CancellationToken,
    decoder: JoinHandle<DecodeStats>,
    waiter: JoinHandle<Option<ExitStatus>>,
    span: Span,
}

impl Collection {
    /// Spawn the helper and start the decode and wait loops.
    /// Nothing is left running when this fails.
    pub async fn start(
        config: &CollectorConfig,
        hosts: &[String],
        interrupts: Interrupts,
    ) -> Result<Self> {
        log_phase(None, Phase::Starting);
        config.validate()?;

        let launch = HelperLaunch {
            helper: config.helper.clone(),
            user: config.user.clone(),
            interval: config.interval,
        };
        let process = launch.spawn(hosts).await?;

        let span = info_span!("collect", helper_pid = process.pid(), hosts = hosts.len());
        let (stdout, signal, waiter) = process.into_parts();
        let shutdown_requested = CancellationToken::new();

        let decoder = StreamDecoder::new(MetricWriter::new(config.output_dir.clone()));
        let decoder = tokio::spawn(decoder.run(stdout).instrument(span.clone()));
        let waiter = tokio::spawn(
            wait_helper(waiter, shutdown_requested.clone()).instrument(span.clone()),
        );

        log_phase(Some(Phase::Starting), Phase::Collecting);
        Ok(Self {
            phase: Phase::Collecting,
            signal,
            interrupts,
            shutdown_requested,
            decoder,
            waiter,
            span,
        })
    }

    /// Block until the workload finishes or the user interrupts
    pub async fn collect(&mut self, workload: &Workload) -> WorkloadOutcome {
        let user_interrupt = self.interrupts.user_interrupt.clone();
        let outcome = match workload {
            Workload::WaitForInterrupt => {
                info!("collecting until SIGINT");
                user_interrupt.cancelled().await;
                WorkloadOutcome::Interrupted
            }
            Workload::Command(argv) => run_workload(argv, &user_interrupt).await,
        };

        match &outcome {
            WorkloadOutcome::Exited(status) if !status.success() => {
                error!("workload exited with {}", status)
            }
            WorkloadOutcome::Failed(e) => error!("unable to run command: {}", e),
            _ => {}
        }
        outcome
    }

    /// Stop the helper and wait for both loops to return
    pub async fn stop(self) -> DrainReport {
        let Collection {
            phase,
            signal,
            interrupts,
            shutdown_requested,
            decoder,
            waiter,
            span,
        } = self;

        log_phase(Some(phase), Phase::Stopping);
        shutdown_requested.cancel();
        signal.interrupt();

        let drain = async { tokio::join!(decoder, waiter) };
        tokio::pin!(drain);

        let joined = tokio::select! {
            joined = &mut drain => Some(joined),
            _ = interrupts.force_stop.cancelled() => None,
        };
        let forced = joined.is_none();
        let (decode, helper) = match joined {
            Some(joined) => joined,
            None => {
                signal.kill();
                drain.await
            }
        };

        let decode = decode.unwrap_or_else(|e| {
            error!("decode loop failed: {}", e);
            DecodeStats::default()
        });
        let helper_status = helper.unwrap_or_else(|e| {
            error!("wait loop failed: {}", e);
            None
        });

        let _entered = span.enter();
        log_phase(Some(Phase::Stopping), Phase::Drained);
        info!(
            "drained: {} lines, {} records, {} samples written, {} errors",
            decode.lines,
            decode.records,
            decode.samples_written,
            decode.errors()
        );

        DrainReport {
            decode,
            helper_status,
            forced,
        }
    }
}

/// Complete result of [`run`]
#[derive(Debug)]
pub struct RunReport {
    pub workload: WorkloadOutcome,
    pub drain: DrainReport,
    pub exit_code: i32,
}

/// Start collecting, run the workload, then stop and drain
pub async fn run(
    config: &CollectorConfig,
    hosts: &[String],
    workload: Workload,
    interrupts: Interrupts,
) -> Result<RunReport> {
    let mut collection = Collection::start(config, hosts, interrupts).await?;
    info!("mpstat started on {} nodes", hosts.len());

    let outcome = collection.collect(&workload).await;
    let drain = collection.stop().await;
    let exit_code = outcome.exit_code(&workload);

    Ok(RunReport {
        workload: outcome,
        drain,
        exit_code,
    })
}

fn log_phase(from: Option<Phase>, to: Phase) {
    match from {
        Some(from) => info!("{:?} -> {:?}", from, to),
        None => info!("{:?}", to),
    }
}

async fn wait_helper(
    waiter: HelperWaiter,
    shutdown_requested: CancellationToken,
) -> Option<ExitStatus> {
    match waiter.wait().await {
        Ok(status) if status.success() => {
            info!("helper exited");
            Some(status)
        }
        Ok(status) if shutdown_requested.is_cancelled() => {
            info!("helper stopped: {}", status);
            Some(status)
        }
        Ok(status) => {
            warn!("helper exited before shutdown: {}", status);
            Some(status)
        }
        Err(e) => {
            error!("error while waiting for helper: {}", e);
            None
        }
    }
}

async fn run_workload(argv: &[String], user_interrupt: &CancellationToken) -> WorkloadOutcome {
    let Some((program, args)) = argv.split_first() else {
        return WorkloadOutcome::Failed("empty command".to_string());
    };

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return WorkloadOutcome::Failed(format!("{}: {}", program, e)),
    };
    info!("running {:?}", argv);

    tokio::select! {
        status = child.wait() => {
            return match status {
                Ok(status) => WorkloadOutcome::Exited(status),
                Err(e) => WorkloadOutcome::Failed(format!("{}: {}", program, e)),
            };
        }
        _ = user_interrupt.cancelled() => {}
    }

    warn!("interrupted, stopping {}", program);
    if let Err(e) = child.start_kill() {
        warn!("unable to kill {}: {}", program, e);
    }
    if let Err(e) = child.wait().await {
        warn!("error while waiting for {}: {}", program, e);
    }
    WorkloadOutcome::Interrupted
}
