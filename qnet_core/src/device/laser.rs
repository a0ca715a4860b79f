//! Pulsed laser source.

use super::{Device, DeviceOutcome, DeviceStats, PULSE_LENGTH_DEFAULT};
use qnet_env::CircuitAccumulator;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};

/// Default emission wavelength (nm).
pub const WAVELENGTH_DEFAULT: f64 = 1550.0;

/// A source device emitting one pulse per qubit.
///
/// The number of photons per pulse is Poisson distributed around
/// `expected_photons`. A pulse counts as a success when its photon count equals
/// the expectation exactly, so a fractional expectation never succeeds.
#[derive(Debug, Clone)]
pub struct Laser {
    /// Pulse length in seconds
    pulse_length: f64,

    expected_photons: f64,

    /// Wavelength in nm (reported only)
    wavelength: f64,

    apply_error: bool,

    /// `None` when `expected_photons <= 0` (no photons are ever emitted)
    distribution: Option<Poisson<f64>>,

    seed: u64,
    rng: ChaCha8Rng,
    stats: DeviceStats,
}

impl Laser {
    pub fn new() -> Self {
        Self {
            pulse_length: PULSE_LENGTH_DEFAULT,
            expected_photons: 1.0,
            wavelength: WAVELENGTH_DEFAULT,
            apply_error: true,
            distribution: Poisson::new(1.0).ok(),
            seed: 0,
            rng: ChaCha8Rng::seed_from_u64(0),
            stats: DeviceStats::default(),
        }
    }

    pub fn with_pulse_length(mut self, pulse_length: f64) -> Self {
        self.pulse_length = pulse_length.max(0.0);
        self
    }

    pub fn with_expected_photons(mut self, expected: f64) -> Self {
        self.expected_photons = expected;
        self.distribution = Poisson::new(expected).ok();
        self
    }

    pub fn with_wavelength(mut self, wavelength: f64) -> Self {
        self.wavelength = wavelength;
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

    pub fn pulse_length(&self) -> f64 {
        self.pulse_length
    }

    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    fn sample_photons(&mut self) -> f64 {
        match &self.distribution {
            Some(poisson) => poisson.sample(&mut self.rng),
            None => 0.0,
        }
    }
}

impl Default for Laser {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Laser {
    fn name(&self) -> &str {
        "Laser"
    }

    fn apply(&mut self, _circuit: &mut dyn CircuitAccumulator, qubits: &[u32]) -> DeviceOutcome {
        if self.apply_error {
            for _ in qubits {
                let photons = self.sample_photons();
                self.stats.trials += 1;
                if photons == self.expected_photons {
                    self.stats.success += 1;
                }
            }
        }

        DeviceOutcome::delay(self.pulse_length)
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
    use qnet_env::Program;

    #[test]
    fn test_laser_counts_one_trial_per_qubit() {
        let mut laser = Laser::new().with_seed(42);
        let mut program = Program::new();
        let outcome = laser.apply(&mut program, &[0, 1, 2, 3]);

        assert_eq!(outcome.delay, PULSE_LENGTH_DEFAULT);
        assert!(outcome.lost.is_empty());
        assert_eq!(laser.stats().trials, 4);
        assert!(laser.stats().success <= 4);
        assert!(program.is_empty());
    }

    #[test]
    fn test_laser_without_error_keeps_counters_at_zero() {
        let mut laser = Laser::new().with_error(false).with_pulse_length(1e-9);
        let mut program = Program::new();
        let outcome = laser.apply(&mut program, &[0]);
        assert_eq!(outcome.delay, 1e-9);
        assert_eq!(laser.stats(), DeviceStats::default());
    }

    #[test]
    fn test_laser_reset_is_deterministic() {
        let mut laser = Laser::new().with_seed(9).with_expected_photons(2.0);
        let mut program = Program::new();
        let qubits: Vec<u32> = (0..200).collect();

        laser.apply(&mut program, &qubits);
        let first = laser.stats();
        laser.reset();
        laser.apply(&mut program, &qubits);

        assert_eq!(first, laser.stats());
    }

    #[test]
    fn test_fractional_expectation_never_succeeds() {
        let mut laser = Laser::new().with_seed(3).with_expected_photons(1.5);
        let mut program = Program::new();
        let qubits: Vec<u32> = (0..100).collect();
        laser.apply(&mut program, &qubits);
        assert_eq!(laser.stats().trials, 100);
        assert_eq!(laser.stats().success, 0);
    }

    #[test]
    fn test_dark_laser_matches_its_expectation() {
        let mut laser = Laser::new().with_expected_photons(0.0);
        let mut program = Program::new();
        laser.apply(&mut program, &[0, 1]);
        assert_eq!(laser.stats().trials, 2);
        assert_eq!(laser.stats().success, 2);
    }
}
