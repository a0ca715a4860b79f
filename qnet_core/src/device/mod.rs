//! Physical devices that qubits pass through.
//!
//! Every agent owns two ordered device lists (source and target) and every
//! quantum channel owns a transit list. A qubit sent from A to B runs through
//! `A.source + transit + B.target`, in that order. Each device may add delay
//! and may lose some of the qubits it sees; later devices only see survivors.

mod fiber;
mod laser;

pub use fiber::{Fiber, ATTENUATION_COEFFICIENT_DEFAULT, FIBER_REGISTER};
pub use laser::{Laser, WAVELENGTH_DEFAULT};

use qnet_env::{CircuitAccumulator, NetError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::warn;

/// Speed of light in fiber, km/s.
pub const SIGNAL_SPEED: f64 = 2.998e5;

/// Default photon pulse length (10 ps), used when a sender has no source devices.
pub const PULSE_LENGTH_DEFAULT: f64 = 10e-12;

/// Default fiber length (km) assumed when a channel has no transit devices.
pub const FIBER_LENGTH_DEFAULT: f64 = 0.0;

/// Result of pushing qubits through one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceOutcome {
    /// Time the qubits spent in the device (seconds, per qubit)
    pub delay: f64,

    /// Qubits the device lost (must be a subset of the input)
    pub lost: Vec<u32>,
}

impl DeviceOutcome {
    /// Outcome with a delay and no loss.
    pub fn delay(delay: f64) -> Self {
        Self {
            delay,
            lost: Vec::new(),
        }
    }
}

/// Success / trial counters kept by a device for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub success: u64,
    pub trials: u64,
}

/// Named counters of one device, as reported at the end of a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub name: String,
    pub success: u64,
    pub trials: u64,
}

impl std::fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} has a signal to noise ratio of {}/{}",
            self.name, self.success, self.trials
        )
    }
}

/// A physical element on a qubit's path.
pub trait Device: Send {
    /// Human readable device name.
    fn name(&self) -> &str;

    /// Pushes `qubits` through the device.
    ///
    /// Devices may append instructions (e.g. a measurement modelling photon
    /// loss) to `circuit`. Any qubit the device removes from flight must be
    /// listed in [`DeviceOutcome::lost`].
    fn apply(&mut self, circuit: &mut dyn CircuitAccumulator, qubits: &[u32]) -> DeviceOutcome;

    /// Current counters.
    fn stats(&self) -> DeviceStats {
        DeviceStats::default()
    }

    /// Clears counters and rewinds any randomness to its initial seed.
    fn reset(&mut self) {}
}

/// A device shared between an agent and the channels that reference it.
pub type SharedDevice = Arc<Mutex<Box<dyn Device>>>;

/// Locks a shared device, recovering from poisoning.
pub(crate) fn lock_device(device: &SharedDevice) -> MutexGuard<'_, Box<dyn Device>> {
    device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ordered, live-shared list of devices.
///
/// Cloning a chain clones the handle: an agent and every channel touching it
/// see the same list, so devices added after a channel was built still apply.
#[derive(Clone, Default)]
pub struct DeviceChain {
    devices: Arc<RwLock<Vec<SharedDevice>>>,
}

impl DeviceChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a chain from owned devices.
    pub fn from_devices(devices: Vec<Box<dyn Device>>) -> Self {
        let chain = Self::new();
        for device in devices {
            chain.push_boxed(device);
        }
        chain
    }

    /// Appends a device.
    pub fn push<D: Device + 'static>(&self, device: D) {
        self.push_boxed(Box::new(device));
    }

    /// Appends a boxed device.
    pub fn push_boxed(&self, device: Box<dyn Device>) {
        self.push_shared(Arc::new(Mutex::new(device)));
    }

    /// Appends an already shared device (e.g. one fiber used by two chains).
    pub fn push_shared(&self, device: SharedDevice) {
        self.write().push(device);
    }

    /// Current devices, in order.
    pub fn snapshot(&self) -> Vec<SharedDevice> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Resets every device in the chain.
    pub fn reset_all(&self) {
        for device in self.read().iter() {
            lock_device(device).reset();
        }
    }

    /// Counters of every device in the chain.
    pub fn reports(&self) -> Vec<DeviceReport> {
        self.read()
            .iter()
            .map(|device| {
                let device = lock_device(device);
                let stats = device.stats();
                DeviceReport {
                    name: device.name().to_string(),
                    success: stats.success,
                    trials: stats.trials,
                }
            })
            .collect()
    }

    /// True if both handles refer to the same list.
    pub fn same_as(&self, other: &DeviceChain) -> bool {
        Arc::ptr_eq(&self.devices, &other.devices)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<SharedDevice>> {
        self.devices.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<SharedDevice>> {
        self.devices.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for DeviceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.reports().into_iter().map(|r| r.name).collect();
        f.debug_struct("DeviceChain").field("devices", &names).finish()
    }
}

/// Runs `qubits` through `devices` in order.
///
/// Returns the accumulated delay and the lost qubits in loss order. Each
/// device only sees the survivors of the previous one; a device losing
/// everything does not stop the rest of the pipeline from adding its delay.
pub(crate) fn run_pipeline(
    devices: &[SharedDevice],
    circuit: &mut dyn CircuitAccumulator,
    qubits: &[u32],
) -> (f64, Vec<u32>) {
    let mut survivors: Vec<u32> = qubits.to_vec();
    let mut lost: Vec<u32> = Vec::new();
    let mut delay = 0.0;

    for device in devices {
        let mut device = lock_device(device);
        let outcome = device.apply(circuit, &survivors);
        delay += outcome.delay.max(0.0);

        // Ignore loss reports for qubits the device never saw
        let newly_lost: Vec<u32> = outcome
            .lost
            .into_iter()
            .filter(|q| survivors.contains(q))
            .collect();
        if !newly_lost.is_empty() {
            warn!("{} lost qubits {:?}", device.name(), newly_lost);
            survivors.retain(|q| !newly_lost.contains(q));
            lost.extend(newly_lost);
        }
    }

    (delay, lost)
}

/// Where a device sits relative to its owning agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePlacement {
    /// Applied to every qubit the agent sends
    Source,

    /// Applied to every qubit the agent receives
    Target,
}

impl FromStr for DevicePlacement {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "source" => Ok(DevicePlacement::Source),
            "target" => Ok(DevicePlacement::Target),
            _ => Err(NetError::configuration(format!(
                "Invalid device placement '{}' (expected 'source' or 'target')",
                s
            ))),
        }
    }
}

/// Device categories that can be built from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceKind {
    Fiber,
    Laser,
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Fiber => "fiber",
            DeviceKind::Laser => "laser",
        }
    }
}

impl FromStr for DeviceKind {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fiber" => Ok(DeviceKind::Fiber),
            "laser" => Ok(DeviceKind::Laser),
            _ => Err(NetError::configuration(format!("Unknown device category '{}'", s))),
        }
    }
}

impl TryFrom<String> for DeviceKind {
    type Error = NetError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.name().to_string()
    }
}

/// Serializable description of a device.
///
/// Parameters that do not apply to `kind` are ignored by [`DeviceSpec::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub kind: DeviceKind,

    /// Fiber length in km
    #[serde(default)]
    pub length: f64,

    /// Fiber attenuation in dB/km
    #[serde(default = "default_attenuation_coefficient")]
    pub attenuation_coefficient: f64,

    /// Laser pulse length in seconds
    #[serde(default = "default_pulse_length")]
    pub pulse_length: f64,

    #[serde(default = "default_expected_photons")]
    pub expected_photons: f64,

    /// Laser wavelength in nm
    #[serde(default = "default_wavelength")]
    pub wavelength: f64,

    #[serde(default = "default_apply_error")]
    pub apply_error: bool,
}

fn default_attenuation_coefficient() -> f64 {
    fiber::ATTENUATION_COEFFICIENT_DEFAULT
}

fn default_apply_error() -> bool {
    true
}

fn default_pulse_length() -> f64 {
    PULSE_LENGTH_DEFAULT
}

fn default_expected_photons() -> f64 {
    1.0
}

fn default_wavelength() -> f64 {
    laser::WAVELENGTH_DEFAULT
}

impl DeviceSpec {
    /// Default parameters for a device category.
    pub fn default_for(kind: DeviceKind) -> Self {
        Self {
            kind,
            length: 0.0,
            attenuation_coefficient: default_attenuation_coefficient(),
            pulse_length: default_pulse_length(),
            expected_photons: default_expected_photons(),
            wavelength: default_wavelength(),
            apply_error: default_apply_error(),
        }
    }

    /// A lossy fiber of `length` km.
    pub fn fiber(length: f64) -> Self {
        Self {
            length,
            ..Self::default_for(DeviceKind::Fiber)
        }
    }

    /// A laser with default pulse length and photon expectation.
    pub fn laser() -> Self {
        Self::default_for(DeviceKind::Laser)
    }

    pub fn with_error(mut self, apply_error: bool) -> Self {
        self.apply_error = apply_error;
        self
    }

    /// Instantiates the device with its own random stream.
    pub fn build(&self, seed: u64) -> Box<dyn Device> {
        match self.kind {
            DeviceKind::Fiber => Box::new(
                Fiber::new(self.length)
                    .with_attenuation_coefficient(self.attenuation_coefficient)
                    .with_error(self.apply_error)
                    .with_seed(seed),
            ),
            DeviceKind::Laser => Box::new(
                Laser::new()
                    .with_pulse_length(self.pulse_length)
                    .with_expected_photons(self.expected_photons)
                    .with_wavelength(self.wavelength)
                    .with_error(self.apply_error)
                    .with_seed(seed),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnet_env::Program;

    /// Loses every qubit whose index is in `drop`.
    struct Dropper {
        drop: Vec<u32>,
    }

    impl Device for Dropper {
        fn name(&self) -> &str {
            "Dropper"
        }

        fn apply(&mut self, _circuit: &mut dyn CircuitAccumulator, qubits: &[u32]) -> DeviceOutcome {
            DeviceOutcome {
                delay: 1.0,
                lost: qubits.iter().copied().filter(|q| self.drop.contains(q)).collect(),
            }
        }
    }

    /// Misbehaving device: negative delay, reports a qubit it never saw.
    struct Liar;

    impl Device for Liar {
        fn name(&self) -> &str {
            "Liar"
        }

        fn apply(&mut self, _circuit: &mut dyn CircuitAccumulator, _qubits: &[u32]) -> DeviceOutcome {
            DeviceOutcome {
                delay: -5.0,
                lost: vec![99],
            }
        }
    }

    #[test]
    fn test_pipeline_feeds_survivors_forward() {
        let first: SharedDevice = Arc::new(Mutex::new(Box::new(Dropper {
            drop: vec![1],
        })));
        let chain = DeviceChain::new();
        chain.push_shared(first);
        chain.push(Dropper {
            drop: vec![2],
        });

        let mut program = Program::new();
        let (delay, lost) = run_pipeline(&chain.snapshot(), &mut program, &[0, 1, 2]);

        assert_eq!(delay, 2.0);
        assert_eq!(lost, vec![1, 2]);
    }

    #[test]
    fn test_pipeline_clamps_delay_and_ignores_unknown_loss() {
        let chain = DeviceChain::new();
        chain.push(Liar);
        let mut program = Program::new();
        let (delay, lost) = run_pipeline(&chain.snapshot(), &mut program, &[0, 1]);
        assert_eq!(delay, 0.0);
        assert!(lost.is_empty());
    }

    #[test]
    fn test_chain_is_live_shared() {
        let chain = DeviceChain::new();
        let seen_by_channel = chain.clone();
        assert!(seen_by_channel.is_empty());

        chain.push(Fiber::new(1.0));
        assert_eq!(seen_by_channel.len(), 1);
        assert!(chain.same_as(&seen_by_channel));
    }

    #[test]
    fn test_unknown_device_category() {
        assert_eq!("Fiber".parse::<DeviceKind>().unwrap(), DeviceKind::Fiber);
        let err = "beam_splitter".parse::<DeviceKind>().unwrap_err();
        assert!(matches!(err, NetError::Configuration(_)));
    }

    #[test]
    fn test_unknown_placement() {
        assert_eq!("target".parse::<DevicePlacement>().unwrap(), DevicePlacement::Target);
        assert!(matches!(
            "middle".parse::<DevicePlacement>(),
            Err(NetError::Configuration(_))
        ));
    }

    #[test]
    fn test_device_spec_defaults_build() {
        let spec = DeviceSpec::default_for("laser".parse().unwrap());
        assert_eq!(spec.kind, DeviceKind::Laser);
        let device = spec.build(7);
        assert_eq!(device.name(), "Laser");
        assert_eq!(device.stats(), DeviceStats::default());
    }

    #[test]
    fn test_device_spec_from_json() {
        let spec: DeviceSpec = serde_json::from_str(r#"{ "kind": "Fiber", "length": 2.5 }"#).unwrap();
        assert_eq!(spec, DeviceSpec::fiber(2.5));

        let err = serde_json::from_str::<DeviceSpec>(r#"{ "kind": "beam_splitter" }"#).unwrap_err();
        assert!(err.to_string().contains("Unknown device category 'beam_splitter'"));
    }

    #[test]
    fn test_report_display() {
        let report = DeviceReport {
            name: "Laser".into(),
            success: 3,
            trials: 4,
        };
        assert_eq!(report.to_string(), "Laser has a signal to noise ratio of 3/4");
    }
}
