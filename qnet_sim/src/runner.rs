//! Scenario runner - builds a reference network and checks what it produced.

use crate::scenarios::ScenarioId;
use crate::simulation::{SimConfig, Simulation, TrialOutcome};

use qnet_core::{
    Agent, CChannel, Device, DevicePlacement, DeviceSpec, Protocol, QChannel, FIBER_REGISTER,
    PULSE_LENGTH_DEFAULT, SIGNAL_SPEED,
};
use qnet_env::{CircuitAccumulator, Instruction, NetError, Program, QubitSlot, Result, SharedProgram};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether every trial met the scenario's expectations
    pub passed: bool,

    /// Trials completed
    pub trials: usize,

    /// Master clock time at the end of the last trial (seconds)
    pub final_time_secs: f64,

    /// Lost qubit slots summed over all trials
    pub lost_qubits: usize,

    /// Instructions in the last trial's program
    pub instructions: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,
}

/// Classical link length of the ping-pong scenario (km).
const PING_PONG_LENGTH: f64 = 5.0;

const PING_PONG_ROUNDS: usize = 50;

/// Fiber length of the lossy link scenario (km).
const LOSSY_LINK_LENGTH: f64 = 100.0;

const LOSSY_LINK_QUBITS: u32 = 32;

/// Classical link length used for teleportation corrections (km).
const TELEPORT_CLASSICAL_LENGTH: f64 = 10.0;

/// Outcomes plus the first expectation that did not hold.
type Checked = (Vec<TrialOutcome>, Option<String>);

/// Runs reference scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Trials per scenario
    trials: usize,

    /// Dump journals and device counters after each trial
    monitor: bool,

    receive_timeout: Option<Duration>,

    /// Replaces every scenario's transit devices when set
    transit: Option<Vec<DeviceSpec>>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            trials: 1,
            monitor: false,
            receive_timeout: SimConfig::default().receive_timeout(),
            transit: None,
        }
    }

    /// Creates a runner from a simulation configuration.
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            seed: config.seed,
            trials: config.trials.max(1),
            monitor: config.monitor,
            receive_timeout: config.receive_timeout(),
            transit: config.transit.clone(),
        }
    }

    /// Sets the number of trials.
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials.max(1);
        self
    }

    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Runs every quantum link through `transit` instead of the scenario's devices.
    pub fn with_transit(mut self, transit: Vec<DeviceSpec>) -> Self {
        self.transit = Some(transit);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_outcomes(scenario).0
    }

    /// Runs a scenario and also returns every trial's outcome.
    pub fn run_with_outcomes(&self, scenario: ScenarioId) -> (ScenarioResult, Vec<TrialOutcome>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        if scenario.is_lossy() {
            debug!("{} uses lossy devices", scenario.name());
        }

        let attempt = match scenario {
            ScenarioId::Superdense => self.run_superdense(),
            ScenarioId::Teleportation => self.run_teleportation(),
            ScenarioId::PingPong => self.run_ping_pong(),
            ScenarioId::LossyLink => self.run_lossy_link(),
        };

        let (outcomes, failure_reason) = match attempt {
            Ok(checked) => checked,
            Err(e) => {
                warn!("{} aborted: {}", scenario.name(), e);
                (Vec::new(), Some(e.to_string()))
            }
        };

        let last = outcomes.last();
        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            trials: outcomes.len(),
            final_time_secs: last.map_or(0.0, |o| o.final_time),
            lost_qubits: outcomes.iter().map(TrialOutcome::lost_qubits).sum(),
            instructions: last.map_or(0, |o| o.program.len()),
            failure_reason,
        };
        (result, outcomes)
    }

    fn simulation(&self) -> Simulation {
        Simulation::new(SimConfig {
            seed: self.seed,
            trials: self.trials,
            monitor: self.monitor,
            receive_timeout_ms: self.receive_timeout.map(|d| d.as_millis() as u64),
            transit: self.transit.clone(),
        })
    }

    /// Seed for the `index`-th device of a scenario.
    fn device_seed(&self, index: u64) -> u64 {
        self.seed
            .wrapping_mul(0x9e3779b97f4a7c15)
            .wrapping_add(index)
    }

    /// Builds transit devices from the configured specs, or from `defaults`.
    ///
    /// Device `i` is seeded with `device_seed(first_index + i)`.
    fn transit_devices(&self, defaults: Vec<DeviceSpec>, first_index: u64) -> Vec<Box<dyn Device>> {
        self.transit
            .clone()
            .unwrap_or(defaults)
            .iter()
            .enumerate()
            .map(|(i, spec)| spec.build(self.device_seed(first_index + i as u64)))
            .collect()
    }

    /// Charlie shares a Bell pair (qubits 0, 1) between Alice and Bob.
    fn bell_source(a: &'static str, b: &'static str) -> impl Fn() -> CharlieProtocol {
        move || CharlieProtocol { a, b }
    }

    /// SC-001: Superdense coding.
    fn run_superdense(&self) -> Result<Checked> {
        let bits = [0u8, 1];
        let program = SharedProgram::default();
        program.lock().declare_register("ro", 2);

        let mut alice = Agent::new("alice")
            .with_cmem(bits.to_vec())?
            .with_circuit(program.clone());
        alice.add_device_at(DevicePlacement::Source, DeviceSpec::laser().build(self.device_seed(0)));
        let mut bob = Agent::new("bob").with_circuit(program.clone());
        let mut charlie = Agent::new("charlie")
            .with_qubits(&[0, 1])
            .with_circuit(program.clone());

        let transit = self.transit_devices(vec![DeviceSpec::laser().with_error(false)], 1);
        QChannel::connect(&mut [&mut alice, &mut bob, &mut charlie], transit)?;

        let mut sim = self.simulation();
        sim.add_agent(charlie, Self::bell_source("alice", "bob"));
        sim.add_agent(alice, || {
            |a: &mut Agent| -> Result<()> {
                let q = first_slot(&a.receive("charlie")?)?;
                let (bit1, bit2) = match a.cmem() {
                    [b1, b2, ..] => (*b1, *b2),
                    _ => return Err(NetError::configuration("alice needs two bits to encode")),
                };
                if bit2 == 1 {
                    a.circuit().gate("X", &[q])?;
                }
                if bit1 == 1 {
                    a.circuit().gate("Z", &[q])?;
                }
                a.send("bob", &[q])?;
                Ok(())
            }
        });
        sim.add_agent(bob, || {
            |b: &mut Agent| -> Result<()> {
                let a = first_slot(&b.receive("alice")?)?;
                let c = first_slot(&b.receive("charlie")?)?;
                let circuit = b.circuit();
                circuit.gate("CNOT", &[a, c])?;
                circuit.gate("H", &[a])?;
                circuit.measure(a, "ro", 0)?;
                circuit.measure(c, "ro", 1)
            }
        });

        let outcomes = sim.run(self.trials)?;
        let expected = 6 + bits.iter().filter(|&&b| b == 1).count();
        let failure = outcomes.iter().find_map(|o| {
            let bob = o.agent("bob")?;
            if bob.qubits != vec![0, 1] {
                return Some(format!("trial {}: bob holds {:?}, expected [0, 1]", o.trial, bob.qubits));
            }
            if o.program.len() != expected {
                return Some(format!(
                    "trial {}: {} instructions, expected {}",
                    o.trial,
                    o.program.len(),
                    expected
                ));
            }
            // Only alice's source laser samples; the default transit laser is error free
            let pulses: u64 = o.devices.iter().filter(|d| d.name == "Laser").map(|d| d.trials).sum();
            if self.transit.is_none() && pulses != 1 {
                return Some(format!("trial {}: {} laser pulses sampled, expected 1", o.trial, pulses));
            }
            None
        });
        Ok((outcomes, failure))
    }

    /// SC-002: Teleportation of qubit 2 from Alice to Bob.
    fn run_teleportation(&self) -> Result<Checked> {
        let mut prep = Program::new();
        prep.declare_register("ro", 2);
        prep.append_instruction(Instruction::gate("H", &[2]));
        prep.append_instruction(Instruction::gate("Z", &[2]));
        prep.append_instruction(Instruction::gate_with_params("RZ", &[1.2], &[2]));
        let program = SharedProgram::new(prep);

        let mut alice = Agent::new("alice").with_qubits(&[2]).with_circuit(program.clone());
        let mut bob = Agent::new("bob").with_circuit(program.clone());
        let mut charlie = Agent::new("charlie")
            .with_qubits(&[0, 1])
            .with_circuit(program.clone());

        QChannel::connect(&mut [&mut alice, &mut charlie, &mut bob], self.transit_devices(Vec::new(), 1))?;
        CChannel::connect(&mut [&mut alice, &mut bob], TELEPORT_CLASSICAL_LENGTH)?;

        let mut sim = self.simulation();
        sim.add_agent(charlie, Self::bell_source("alice", "bob"));
        sim.add_agent(alice, || {
            |a: &mut Agent| -> Result<()> {
                let phi = 2;
                let q = first_slot(&a.receive("charlie")?)?;
                {
                    let circuit = a.circuit();
                    circuit.gate("CNOT", &[phi, q])?;
                    circuit.gate("H", &[phi])?;
                    circuit.measure(q, "ro", 0)?;
                    circuit.measure(phi, "ro", 1)?;
                }
                // Tells bob which register offsets hold the X and Z corrections
                a.send_classical("bob", &[0, 1])?;
                Ok(())
            }
        });
        sim.add_agent(bob, || {
            |b: &mut Agent| -> Result<()> {
                let q = first_slot(&b.receive("charlie")?)?;
                let offsets = b.receive_classical("alice")?;
                let circuit = b.circuit();
                for (offset, gate) in offsets.iter().zip(["X", "Z"]) {
                    circuit.conditional("ro", *offset as usize, Instruction::gate(gate, &[q]))?;
                }
                Ok(())
            }
        });

        let outcomes = sim.run(self.trials)?;
        let failure = outcomes.iter().find_map(|o| {
            let bob = o.agent("bob")?;
            let alice = o.agent("alice")?;
            if bob.qubits != vec![1] {
                return Some(format!("trial {}: bob holds {:?}, expected [1]", o.trial, bob.qubits));
            }
            let tail = &o.program.instructions()[o.program.len().saturating_sub(2)..];
            if !tail
                .iter()
                .all(|i| matches!(i, Instruction::Conditional { .. }))
            {
                return Some(format!("trial {}: corrections are not the last instructions", o.trial));
            }
            if bob.local_time < alice.local_time {
                return Some(format!(
                    "trial {}: bob finished at {:e}s before alice at {:e}s",
                    o.trial, bob.local_time, alice.local_time
                ));
            }
            None
        });
        Ok((outcomes, failure))
    }

    /// SC-003: Classical ping-pong.
    fn run_ping_pong(&self) -> Result<Checked> {
        let program = SharedProgram::default();
        let mut alice = Agent::new("alice").with_circuit(program.clone());
        let mut bob = Agent::new("bob").with_circuit(program.clone());
        CChannel::connect(&mut [&mut alice, &mut bob], PING_PONG_LENGTH)?;

        let mut sim = self.simulation();
        sim.add_agent(alice, || {
            |a: &mut Agent| -> Result<()> {
                for round in 0..PING_PONG_ROUNDS {
                    a.send_classical("bob", &[(round % 2) as u8])?;
                    a.receive_classical("bob")?;
                }
                Ok(())
            }
        });
        sim.add_agent(bob, || {
            |b: &mut Agent| -> Result<()> {
                for _ in 0..PING_PONG_ROUNDS {
                    let bits = b.receive_classical("alice")?;
                    b.send_classical("alice", &bits)?;
                }
                Ok(())
            }
        });

        let outcomes = sim.run(self.trials)?;
        let hop = 8.0 * PULSE_LENGTH_DEFAULT + PING_PONG_LENGTH / SIGNAL_SPEED;
        let expected = 2.0 * PING_PONG_ROUNDS as f64 * hop;
        let failure = outcomes.iter().find_map(|o| {
            let alice = o.agent("alice")?;
            if ((alice.local_time - expected) / expected).abs() > 1e-9 {
                return Some(format!(
                    "trial {}: alice at {:e}s, expected {:e}s",
                    o.trial, alice.local_time, expected
                ));
            }
            if o.journal.len() != 4 * PING_PONG_ROUNDS {
                return Some(format!("trial {}: {} journal entries", o.trial, o.journal.len()));
            }
            None
        });
        Ok((outcomes, failure))
    }

    /// SC-004: Qubits over a long lossy fiber.
    fn run_lossy_link(&self) -> Result<Checked> {
        let program = SharedProgram::default();
        let qubits: Vec<u32> = (0..LOSSY_LINK_QUBITS).collect();
        let mut alice = Agent::new("alice").with_qubits(&qubits).with_circuit(program.clone());
        let mut bob = Agent::new("bob").with_circuit(program.clone());

        let transit = self.transit_devices(vec![DeviceSpec::fiber(LOSSY_LINK_LENGTH)], 1);
        QChannel::connect(&mut [&mut alice, &mut bob], transit)?;

        let mut sim = self.simulation();
        sim.add_agent(alice, || {
            |a: &mut Agent| -> Result<()> {
                let owned = a.qubits();
                a.send("bob", &owned)?;
                Ok(())
            }
        });
        sim.add_agent(bob, || {
            |b: &mut Agent| -> Result<()> {
                let slots = b.receive("alice")?;
                let circuit = b.circuit();
                for (offset, q) in slots.iter().filter_map(QubitSlot::present).enumerate() {
                    circuit.measure(q, "ro", offset)?;
                }
                Ok(())
            }
        });

        let outcomes = sim.run(self.trials)?;
        let first_lost = outcomes.first().map(TrialOutcome::lost_qubits);
        let failure = outcomes.iter().find_map(|o| {
            let bob = o.agent("bob")?;
            let lost = o.lost_qubits();
            if lost + bob.qubits.len() != LOSSY_LINK_QUBITS as usize {
                return Some(format!(
                    "trial {}: {} lost + {} received != {}",
                    o.trial,
                    lost,
                    bob.qubits.len(),
                    LOSSY_LINK_QUBITS
                ));
            }
            if o.program.register_width(FIBER_REGISTER).unwrap_or(0) != lost {
                return Some(format!("trial {}: fiber register does not match losses", o.trial));
            }
            if Some(lost) != first_lost {
                return Some(format!("trial {}: losses differ from trial 0", o.trial));
            }
            None
        });
        Ok((outcomes, failure))
    }
}

/// Sends one half of a Bell pair to each of two agents.
struct CharlieProtocol {
    a: &'static str,
    b: &'static str,
}

impl Protocol for CharlieProtocol {
    fn run(&mut self, agent: &mut Agent) -> Result<()> {
        {
            let circuit = agent.circuit();
            circuit.gate("H", &[0])?;
            circuit.gate("CNOT", &[0, 1])?;
        }
        agent.send(self.a, &[0])?;
        agent.send(self.b, &[1])?;
        Ok(())
    }
}

/// Index of the first slot of a delivery, lost or not.
///
/// A lost qubit is no longer owned, so any gate on it fails the ownership
/// check rather than silently acting on a missing photon.
fn first_slot(slots: &[QubitSlot]) -> Result<u32> {
    slots
        .first()
        .map(QubitSlot::index)
        .ok_or_else(|| NetError::configuration("received an empty qubit delivery"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42).with_receive_timeout(Some(Duration::from_secs(5)))
    }

    #[test]
    fn test_superdense_passes() {
        let result = runner().run(ScenarioId::Superdense);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.instructions, 7);
        assert_eq!(result.lost_qubits, 0);
    }

    #[test]
    fn test_teleportation_passes() {
        let (result, outcomes) = runner().run_with_outcomes(ScenarioId::Teleportation);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.instructions, 11);
        let text = outcomes[0].program.to_string();
        assert!(text.contains("IF ro[0] X 1"));
        assert!(text.contains("IF ro[1] Z 1"));
    }

    #[test]
    fn test_ping_pong_time() {
        let result = runner().run(ScenarioId::PingPong);
        assert!(result.passed, "{:?}", result.failure_reason);
        let hop = 8.0 * PULSE_LENGTH_DEFAULT + PING_PONG_LENGTH / SIGNAL_SPEED;
        approx::assert_relative_eq!(result.final_time_secs, 100.0 * hop, max_relative = 1e-9);
    }

    #[test]
    fn test_lossy_link_is_repeatable() {
        let result = runner().with_trials(3).run(ScenarioId::LossyLink);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.trials, 3);
        // 100 km at -0.16 dB/km keeps ~2.5% of photons
        assert!(result.lost_qubits > 0);
        assert_eq!(result.lost_qubits % 3, 0);
    }

    #[test]
    fn test_all_scenarios_pass_over_trials() {
        let runner = runner().with_trials(2);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
            assert_eq!(result.trials, 2);
        }
    }

    #[test]
    fn test_device_seeds_differ() {
        let runner = ScenarioRunner::new(7);
        assert_ne!(runner.device_seed(0), runner.device_seed(1));
        assert_ne!(runner.device_seed(0), ScenarioRunner::new(8).device_seed(0));
    }

    #[test]
    fn test_config_seed_drives_device_seeds() {
        let config = SimConfig { seed: 9, ..Default::default() };
        let runner = ScenarioRunner::from_config(&config);
        assert_eq!(runner.device_seed(1), ScenarioRunner::new(9).device_seed(1));
        assert_eq!(runner.run(ScenarioId::PingPong).seed, 9);
    }

    #[test]
    fn test_configured_transit_replaces_scenario_devices() {
        let lossless = runner()
            .with_transit(vec![DeviceSpec::fiber(LOSSY_LINK_LENGTH).with_error(false)])
            .run(ScenarioId::LossyLink);
        assert!(lossless.passed, "{:?}", lossless.failure_reason);
        assert_eq!(lossless.lost_qubits, 0);

        // Nothing survives 1000 km, so alice's encoding gate hits a lost qubit
        let config = SimConfig {
            receive_timeout_ms: Some(300),
            transit: Some(vec![DeviceSpec::fiber(1000.0)]),
            ..Default::default()
        };
        let result = ScenarioRunner::from_config(&config).run(ScenarioId::Superdense);
        assert!(!result.passed);
        let reason = result.failure_reason.unwrap_or_default();
        assert!(reason.contains("alice"), "{}", reason);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn test_lossy_link_accounts_for_every_qubit(seed in any::<u64>()) {
            let result = ScenarioRunner::new(seed)
                .with_receive_timeout(Some(Duration::from_secs(5)))
                .run(ScenarioId::LossyLink);
            prop_assert!(result.passed, "{:?}", result.failure_reason);
            prop_assert!(result.lost_qubits <= LOSSY_LINK_QUBITS as usize);
        }
    }
}
