//! Execution backend abstraction.

use crate::circuit::Program;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Complex amplitude of a computational basis state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Amplitude {
    pub re: f64,
    pub im: f64,
}

impl Amplitude {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Probability of observing this basis state.
    pub fn probability(&self) -> f64 {
        self.re * self.re + self.im * self.im
    }
}

/// Something that can run a finished program.
///
/// The simulator never calls a backend on its own. Callers hand each trial's
/// program to a backend after `Simulation::run` returns.
///
/// # Implementations
///
/// - **Production**: a QVM / wavefunction simulator client
/// - **Tests**: stubs returning canned results
pub trait ExecutionBackend {
    /// Runs the program `shots` times and returns the classical readout of
    /// every shot, registers concatenated in declaration order.
    fn execute(&self, program: &Program, shots: usize) -> Result<Vec<Vec<u8>>>;

    /// Returns the final state vector of the program.
    fn simulate_state(&self, program: &Program) -> Result<Vec<Amplitude>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplitude_probability() {
        let amp = Amplitude::new(std::f64::consts::FRAC_1_SQRT_2, 0.0);
        assert!((amp.probability() - 0.5).abs() < 1e-12);
    }
}
