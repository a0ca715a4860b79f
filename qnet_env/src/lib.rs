//! qnet Environment Boundary
//!
//! This crate holds everything the simulation engine shares with the world
//! outside of it:
//! - The **circuit accumulator** agents and devices append instructions to
//! - The **execution backend** that runs a finished program
//! - The **monitor** sink that observes traffic
//! - Identifiers, the loss-marker slot and the error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use qnet_env::{CircuitAccumulator, Instruction, SharedProgram};
//!
//! let program = SharedProgram::default();
//! program.lock().declare_register("ro", 2);
//! program.lock().append_instruction(Instruction::gate("H", &[0]));
//! ```

mod backend;
mod circuit;
mod error;
mod monitor;
mod types;

pub use backend::{Amplitude, ExecutionBackend};
pub use circuit::{CircuitAccumulator, Instruction, Program, SharedProgram};
pub use error::{NetError, Result};
pub use monitor::{Monitor, TracingMonitor, TransferEvent, TrialSummary};
pub use types::{AgentId, Payload, QubitSlot, TransferKind};
