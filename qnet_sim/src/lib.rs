//! qnet Simulation Harness
//!
//! Runs agent protocols over a shared master clock, one thread per agent,
//! and repeats them for any number of trials from the same initial state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Simulation                         │
//! │   trial k: fresh Clock, restored agents, drained lanes   │
//! │                                                          │
//! │  ┌─────────┐   QChannel / CChannel   ┌─────────┐         │
//! │  │  Agent  │◄───────────────────────►│  Agent  │  ...    │
//! │  │ thread  │   source ▸ transit ▸    │ thread  │         │
//! │  └────┬────┘        target devices   └────┬────┘         │
//! │       │                                   │              │
//! │  ┌────▼───────────────────────────────────▼────┐         │
//! │  │  SharedProgram (circuit)  +  Clock journal  │         │
//! │  └─────────────────────────────────────────────┘         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use qnet_sim::{SimConfig, Simulation};
//! use qnet_core::Agent;
//!
//! let mut sim = Simulation::new(SimConfig { trials: 3, ..Default::default() });
//! sim.add_agent(Agent::new("alice").with_qubits(&[0]), || |a: &mut Agent| a.send("bob", &[0]).map(|_| ()));
//! sim.add_agent(Agent::new("bob"), || |b: &mut Agent| b.receive("alice").map(|_| ()));
//! let outcomes = sim.run_configured()?;
//! ```

mod exporter;
mod runner;
pub mod scenarios;
mod simulation;

pub use exporter::{JournalExport, TrialExport};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use simulation::{AgentReport, ProtocolFactory, SimConfig, Simulation, TrialOutcome};
