//! Master clock and transfer journal.
//!
//! Every agent of a simulation shares one [`Clock`]. Agents advance their own
//! local time; the clock only remembers the largest time it has been told
//! about plus an ordered journal of transfers.

use qnet_env::{AgentId, Payload, TransferEvent, TransferKind};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Default)]
struct ClockState {
    /// Largest local time recorded so far (seconds)
    time: f64,

    /// Transfers in record order
    journal: Vec<TransferEvent>,
}

/// Shared simulation clock.
#[derive(Debug, Default)]
pub struct Clock {
    inner: Mutex<ClockState>,
}

impl Clock {
    /// Creates a clock at `t = 0` with an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock ready to be handed to several agents.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Journals a transfer and raises the master time to `time` if larger.
    ///
    /// The master time never decreases. A NaN time is journaled but does not
    /// touch the master time.
    pub fn record(
        &self,
        time: f64,
        kind: TransferKind,
        source: &AgentId,
        target: &AgentId,
        payload: Payload,
    ) -> TransferEvent {
        let event = TransferEvent {
            time,
            kind,
            source: source.clone(),
            target: target.clone(),
            payload,
        };

        let mut state = self.lock();
        if time > state.time {
            state.time = time;
        }
        state.journal.push(event.clone());
        event
    }

    /// Current master time.
    pub fn time(&self) -> f64 {
        self.lock().time
    }

    /// Copy of the journal.
    pub fn journal(&self) -> Vec<TransferEvent> {
        self.lock().journal.clone()
    }

    /// Number of journaled transfers.
    pub fn len(&self) -> usize {
        self.lock().journal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().journal.is_empty()
    }

    /// Logs every journal entry at info level.
    pub fn dump(&self) {
        for event in self.lock().journal.iter() {
            info!("{}", event);
        }
    }

    /// Writes the journal, one transfer per line.
    pub fn write_journal<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for event in self.lock().journal.iter() {
            writeln!(out, "{}", event)?;
        }
        Ok(())
    }

    /// Rewinds to `t = 0` and clears the journal.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.time = 0.0;
        state.journal.clear();
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
