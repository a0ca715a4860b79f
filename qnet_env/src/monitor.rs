//! Observation hooks for network traffic.
//!
//! A [`Monitor`] sees every transfer and the summary of every trial. It has
//! no influence on the simulation itself.

use crate::types::{AgentId, Payload, TransferKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// One send or receive, as journaled by the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Local time of the acting agent after the transfer (seconds)
    pub time: f64,

    pub kind: TransferKind,

    pub source: AgentId,

    pub target: AgentId,

    pub payload: Payload,
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransferKind::Sent => write!(
                f,
                "{} sent from {} to {} at {}",
                self.payload, self.source, self.target, self.time
            ),
            TransferKind::Received => write!(
                f,
                "{} received by {} from {} at {}",
                self.payload, self.target, self.source, self.time
            ),
        }
    }
}

/// End-of-trial summary handed to monitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    /// Zero-based trial index
    pub trial: usize,

    /// Final master clock time (seconds)
    pub final_time: f64,

    /// Number of journaled transfers
    pub transactions: usize,

    /// Qubit slots observed lost by receivers
    pub lost_qubits: usize,

    /// Instructions in the resulting program
    pub instructions: usize,
}

/// Observer for transfers and trial summaries.
pub trait Monitor: Send + Sync {
    /// Called by an agent after each send or receive.
    fn on_transfer(&self, event: &TransferEvent);

    /// Called by the simulation once all agents of a trial have finished.
    fn on_trial_end(&self, summary: &TrialSummary);
}

/// Monitor that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn on_transfer(&self, event: &TransferEvent) {
        let lost = event.payload.lost_count();
        if lost > 0 && event.kind == TransferKind::Received {
            warn!("{} ({} lost)", event, lost);
        } else {
            debug!("{}", event);
        }
    }

    fn on_trial_end(&self, summary: &TrialSummary) {
        info!(
            "trial {} finished at t={:e}s: {} transfers, {} qubits lost, {} instructions",
            summary.trial,
            summary.final_time,
            summary.transactions,
            summary.lost_qubits,
            summary.instructions
        );
    }
}
