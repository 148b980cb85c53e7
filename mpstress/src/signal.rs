//! Ctrl-C handling

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code used when the user gives up on draining
pub const ABORT_EXIT_CODE: i32 = 130;

/// What one interrupt delivery escalated to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Stop the workload and start draining
    Stop,
    /// Kill the helper
    Kill,
    /// Draining is stuck; leave without waiting
    Abort,
}

/// Tokens cancelled by interrupts, in delivery order
#[derive(Debug, Clone, Default)]
pub struct Interrupts {
    /// First interrupt: stop waiting / stop the workload
    pub user_interrupt: CancellationToken,
    /// Any later interrupt: stop draining politely
    pub force_stop: CancellationToken,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interrupt delivery
    pub fn notify(&self) -> Escalation {
        if !self.user_interrupt.is_cancelled() {
            info!("got SIGINT, terminating process");
            self.user_interrupt.cancel();
            Escalation::Stop
        } else if !self.force_stop.is_cancelled() {
            warn!("got second SIGINT, killing helper");
            self.force_stop.cancel();
            Escalation::Kill
        } else {
            Escalation::Abort
        }
    }
}

/// Route every SIGINT received by this process into `interrupts`
pub fn spawn_interrupt_listener(interrupts: Interrupts) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("unable to listen for SIGINT: {}", e);
                return;
            }
            if interrupts.notify() == Escalation::Abort {
                error!("got third SIGINT, exiting without draining");
                std::process::exit(ABORT_EXIT_CODE);
            }
        }
    });
}
