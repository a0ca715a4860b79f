//! Optical fiber: propagation delay plus length-dependent photon loss.

use super::{Device, DeviceOutcome, DeviceStats, SIGNAL_SPEED};
use qnet_env::{CircuitAccumulator, Instruction};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Attenuation coefficient of standard telecom fiber (dB/km).
pub const ATTENUATION_COEFFICIENT_DEFAULT: f64 = -0.16;

/// Classical register that receives the readout of photons lost in fiber.
pub const FIBER_REGISTER: &str = "fiber";

/// An optical fiber of a given length.
///
/// Each qubit survives with probability `10^(length * coefficient / 10)`.
/// A lost photon is modelled as a measurement into [`FIBER_REGISTER`] and is
/// reported back as lost.
#[derive(Debug, Clone)]
pub struct Fiber {
    /// Length in km
    length: f64,

    /// dB per km (negative)
    attenuation_coefficient: f64,

    /// Survival probability per qubit
    attenuation: f64,

    /// When false the fiber only delays
    apply_error: bool,

    seed: u64,
    rng: ChaCha8Rng,
    stats: DeviceStats,
}

impl Fiber {
    /// Creates a lossy fiber of `length` km with the default coefficient.
    pub fn new(length: f64) -> Self {
        let length = length.max(0.0);
        Self {
            length,
            attenuation_coefficient: ATTENUATION_COEFFICIENT_DEFAULT,
            attenuation: attenuation(length, ATTENUATION_COEFFICIENT_DEFAULT),
            apply_error: true,
            seed: 0,
            rng: ChaCha8Rng::seed_from_u64(0),
            stats: DeviceStats::default(),
        }
    }

    pub fn with_attenuation_coefficient(mut self, coefficient: f64) -> Self {
        self.attenuation_coefficient = coefficient;
        self.attenuation = attenuation(self.length, coefficient);
        self
    }

    pub fn with_error(mut self, apply_error: bool) -> Self {
        self.apply_error = apply_error;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Probability that a single photon makes it through.
    pub fn attenuation(&self) -> f64 {
        self.attenuation
    }

    /// Propagation delay in seconds.
    pub fn propagation_delay(&self) -> f64 {
        self.length / SIGNAL_SPEED
    }
}

fn attenuation(length: f64, coefficient: f64) -> f64 {
    let decibel_loss = length * coefficient;
    10f64.powf(decibel_loss / 10.0).clamp(0.0, 1.0)
}

impl Device for Fiber {
    fn name(&self) -> &str {
        "Fiber"
    }

    fn apply(&mut self, circuit: &mut dyn CircuitAccumulator, qubits: &[u32]) -> DeviceOutcome {
        let mut lost = Vec::new();

        if self.apply_error {
            for &qubit in qubits {
                self.stats.trials += 1;
                let draw: f64 = self.rng.gen();
                if draw > self.attenuation {
                    let offset = circuit.register_width(FIBER_REGISTER).unwrap_or(0);
                    circuit.declare_register(FIBER_REGISTER, offset + 1);
                    circuit.append_instruction(Instruction::measure(qubit, FIBER_REGISTER, offset));
                    lost.push(qubit);
                } else {
                    self.stats.success += 1;
                }
            }
        }

        DeviceOutcome {
            delay: self.propagation_delay(),
            lost,
        }
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }

    fn reset(&mut self) {
        self.stats = DeviceStats::default();
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qnet_env::Program;

    #[test]
    fn test_attenuation_formula() {
        let fiber = Fiber::new(50.0);
        // 50 km * -0.16 dB/km = -8 dB
        assert_relative_eq!(fiber.attenuation(), 10f64.powf(-0.8), epsilon = 1e-12);
        assert_relative_eq!(Fiber::new(0.0).attenuation(), 1.0);
    }

    #[test]
    fn test_error_free_fiber_only_delays() {
        let mut fiber = Fiber::new(1000.0).with_error(false);
        let mut program = Program::new();
        let outcome = fiber.apply(&mut program, &[0, 1, 2]);

        assert!(outcome.lost.is_empty());
        assert_relative_eq!(outcome.delay, 1000.0 / SIGNAL_SPEED);
        assert!(program.is_empty());
    }

    #[test]
    fn test_lost_photons_are_measured() {
        // 1000 km of fiber: survival probability 1e-16
        let mut fiber = Fiber::new(1000.0).with_seed(3);
        let mut program = Program::new();
        let outcome = fiber.apply(&mut program, &[4, 5]);

        assert_eq!(outcome.lost, vec![4, 5]);
        assert_eq!(program.register_width(FIBER_REGISTER), Some(2));
        assert_eq!(program.len(), 2);
        assert_eq!(fiber.stats().trials, 2);
        assert_eq!(fiber.stats().success, 0);
    }

    #[test]
    fn test_reset_replays_same_losses() {
        let mut fiber = Fiber::new(20.0).with_seed(11);
        let qubits: Vec<u32> = (0..64).collect();

        let mut program = Program::new();
        let first = fiber.apply(&mut program, &qubits);
        fiber.reset();
        assert_eq!(fiber.stats(), DeviceStats::default());

        let second = fiber.apply(&mut program, &qubits);
        assert_eq!(first.lost, second.lost);
    }

    #[test]
    fn test_negative_length_is_clamped() {
        let fiber = Fiber::new(-3.0);
        assert_eq!(fiber.length(), 0.0);
        assert!(fiber.propagation_delay() >= 0.0);
    }
}
