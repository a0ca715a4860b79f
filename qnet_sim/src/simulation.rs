//! Simulation - runs every agent of a network for one or more trials.

use qnet_core::{
    Agent, AgentSnapshot, CChannel, Clock, DeviceChain, DeviceReport, DeviceSpec, Protocol, QChannel,
};
use qnet_env::{
    AgentId, ExecutionBackend, Monitor, NetError, Program, Result, SharedProgram,
    TracingMonitor, TransferEvent, TransferKind, TrialSummary,
};
use crossbeam::channel::unbounded;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed; scenario devices derive their own seeds from it
    pub seed: u64,

    /// Number of trials to run
    pub trials: usize,

    /// Dump device counters and the journal after each trial
    pub monitor: bool,

    /// Receive timeout in milliseconds (`None` = wait forever)
    pub receive_timeout_ms: Option<u64>,

    /// Transit devices for every scenario quantum link (`None` keeps each
    /// scenario's own devices)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transit: Option<Vec<DeviceSpec>>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            trials: 1,
            monitor: false,
            receive_timeout_ms: Some(30_000),
            transit: None,
        }
    }
}

impl SimConfig {
    /// Loads a configuration from a JSON file; missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            NetError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            NetError::configuration(format!("invalid config {}: {}", path.display(), e))
        })
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms.map(Duration::from_millis)
    }
}

/// Builds a fresh protocol instance for each trial.
pub type ProtocolFactory = Box<dyn Fn() -> Box<dyn Protocol> + Send + Sync>;

/// End-of-trial state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub name: AgentId,
    pub qubits: Vec<u32>,
    pub cmem: Vec<u8>,
    pub local_time: f64,
}

/// Everything a trial produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialOutcome {
    /// Zero-based trial index
    pub trial: usize,

    /// The accumulated program, ready for an execution backend
    pub program: Program,

    /// Transfers in record order
    pub journal: Vec<TransferEvent>,

    /// Master clock time at the end of the trial (seconds)
    pub final_time: f64,

    pub agents: Vec<AgentReport>,

    pub devices: Vec<DeviceReport>,
}

impl TrialOutcome {
    /// Qubit slots receivers saw as lost.
    pub fn lost_qubits(&self) -> usize {
        self.journal
            .iter()
            .filter(|e| e.kind == TransferKind::Received)
            .map(|e| e.payload.lost_count())
            .sum()
    }

    pub fn agent(&self, name: &str) -> Option<&AgentReport> {
        self.agents.iter().find(|a| a.name.as_str() == name)
    }

    /// Runs this trial's program on `backend`.
    pub fn execute<B: ExecutionBackend + ?Sized>(&self, backend: &B, shots: usize) -> Result<Vec<Vec<u8>>> {
        backend.execute(&self.program, shots)
    }

    fn summary(&self) -> TrialSummary {
        TrialSummary {
            trial: self.trial,
            final_time: self.final_time,
            transactions: self.journal.len(),
            lost_qubits: self.lost_qubits(),
            instructions: self.program.len(),
        }
    }
}

struct Member {
    agent: Agent,
    factory: ProtocolFactory,
}

/// State captured before the first trial.
struct InitialState {
    agents: Vec<AgentSnapshot>,
    program: Program,

    /// The accumulator every agent writes to
    shared: SharedProgram,
}

/// Runs a network of agents.
///
/// Agents are connected to their channels before being added. Each trial
/// starts every agent's protocol on its own thread and waits for all of
/// them; later trials restart from the state captured before the first.
pub struct Simulation {
    config: SimConfig,
    members: Vec<Member>,
    monitor: Option<Arc<dyn Monitor>>,
    initial: Option<InitialState>,
    trials_run: usize,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            members: Vec::new(),
            monitor: None,
            initial: None,
            trials_run: 0,
        }
    }

    /// Routes transfer events and trial summaries to `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Adds an agent with the factory that builds its protocol for each trial.
    pub fn add_agent<F, P>(&mut self, agent: Agent, factory: F)
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Protocol + 'static,
    {
        self.members.push(Member {
            agent,
            factory: Box::new(move || Box::new(factory()) as Box<dyn Protocol>),
        });
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.members
            .iter()
            .map(|m| &m.agent)
            .find(|a| a.name().as_str() == name)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.members.iter().map(|m| &m.agent)
    }

    /// Trials completed so far.
    pub fn trials_run(&self) -> usize {
        self.trials_run
    }

    /// Runs `config.trials` trials.
    pub fn run_configured(&mut self) -> Result<Vec<TrialOutcome>> {
        self.run(self.config.trials)
    }

    /// Runs `trials` trials and returns the outcome of each.
    ///
    /// Stops at the first trial in which an agent fails, returning the
    /// earliest failure to complete as [`NetError::AgentFailed`] or
    /// [`NetError::AgentPanicked`].
    pub fn run(&mut self, trials: usize) -> Result<Vec<TrialOutcome>> {
        if trials == 0 {
            return Err(NetError::configuration("at least one trial is required"));
        }
        let shared = match self.initial.as_ref().map(|i| i.shared.clone()) {
            Some(shared) => shared,
            None => {
                let shared = self.validate()?;
                self.initial = Some(InitialState {
                    agents: self.members.iter().map(|m| m.agent.snapshot()).collect(),
                    program: shared.snapshot(),
                    shared: shared.clone(),
                });
                shared
            }
        };

        let mut outcomes = Vec::with_capacity(trials);
        for _ in 0..trials {
            if self.trials_run > 0 {
                self.reset()?;
            }
            // A failed trial still counts, so the next run starts from a reset
            let outcome = self.run_trial(self.trials_run, &shared);
            self.trials_run += 1;
            outcomes.push(outcome?);
        }
        Ok(outcomes)
    }

    /// Checks that names are unique, initial qubits disjoint and that every
    /// agent writes to the same program; returns that program.
    fn validate(&self) -> Result<SharedProgram> {
        let program = match self.members.first() {
            Some(member) => member.agent.program().clone(),
            None => return Err(NetError::configuration("simulation has no agents")),
        };

        let mut names = BTreeSet::new();
        let mut owned: BTreeSet<u32> = BTreeSet::new();

        for agent in self.agents() {
            if !names.insert(agent.name().clone()) {
                return Err(NetError::configuration(format!(
                    "duplicate agent name {}",
                    agent.name()
                )));
            }
            for q in agent.qubits() {
                if !owned.insert(q) {
                    return Err(NetError::configuration(format!(
                        "qubit {} is owned by more than one agent",
                        q
                    )));
                }
            }
            if !agent.program().same_as(&program) {
                return Err(NetError::configuration(format!(
                    "agent {} writes to a different program",
                    agent.name()
                )));
            }
        }
        Ok(program)
    }

    /// Restores agents, program, devices and channel queues to their
    /// pre-first-trial state.
    fn reset(&mut self) -> Result<()> {
        let initial = match &self.initial {
            Some(initial) => initial,
            None => return Ok(()),
        };

        for (member, snapshot) in self.members.iter_mut().zip(&initial.agents) {
            member.agent.restore(snapshot)?;
        }
        *initial.shared.lock() = initial.program.clone();

        for chain in self.device_chains() {
            chain.reset_all();
        }

        let (quantum, classical) = self.channels();
        let dropped: usize = quantum.iter().map(|c| c.reset()).sum::<usize>()
            + classical.iter().map(|c| c.reset()).sum::<usize>();
        if dropped > 0 {
            debug!("dropped {} undelivered messages between trials", dropped);
        }
        Ok(())
    }

    fn run_trial(&mut self, trial: usize, program: &SharedProgram) -> Result<TrialOutcome> {
        let clock = Clock::shared();
        let monitor = self.active_monitor();
        let timeout = self.config.receive_timeout();

        for member in self.members.iter_mut() {
            member.agent.bind_clock(Arc::clone(&clock));
            member.agent.set_monitor(monitor.clone());
            member.agent.set_receive_timeout(timeout);
        }

        info!("trial {} starting with {} agents", trial, self.members.len());

        // Failures arrive in the order agents finish
        let (failures_tx, failures_rx) = unbounded::<(AgentId, NetError)>();
        std::thread::scope(|s| {
            for member in self.members.iter_mut() {
                let name = member.agent.name().clone();
                let mut protocol = (member.factory)();
                let agent = &mut member.agent;
                let failures = failures_tx.clone();
                s.spawn(move || {
                    let result = match panic::catch_unwind(AssertUnwindSafe(|| protocol.run(agent))) {
                        Ok(result) => result,
                        Err(payload) => Err(NetError::AgentPanicked {
                            agent: name.to_string(),
                            message: panic_message(payload.as_ref()),
                        }),
                    };
                    if let Err(e) = result {
                        let _ = failures.send((name, e));
                    }
                });
            }
        });
        drop(failures_tx);

        let mut first_failure = None;
        for (name, e) in failures_rx.try_iter() {
            error!("agent {} failed in trial {}: {}", name, trial, e);
            if first_failure.is_none() {
                first_failure = Some(match e {
                    panicked @ NetError::AgentPanicked { .. } => panicked,
                    other => NetError::AgentFailed {
                        agent: name.to_string(),
                        trial,
                        source: Box::new(other),
                    },
                });
            }
        }
        if let Some(failure) = first_failure {
            return Err(failure);
        }

        let outcome = TrialOutcome {
            trial,
            program: program.snapshot(),
            journal: clock.journal(),
            final_time: clock.time(),
            agents: self
                .agents()
                .map(|a| AgentReport {
                    name: a.name().clone(),
                    qubits: a.qubits(),
                    cmem: a.cmem().to_vec(),
                    local_time: a.local_time(),
                })
                .collect(),
            devices: self
                .device_chains()
                .iter()
                .flat_map(|chain| chain.reports())
                .collect(),
        };

        if self.config.monitor {
            for report in &outcome.devices {
                info!("{}", report);
            }
            clock.dump();
        }
        if let Some(monitor) = &monitor {
            monitor.on_trial_end(&outcome.summary());
        }

        Ok(outcome)
    }

    fn active_monitor(&self) -> Option<Arc<dyn Monitor>> {
        match (&self.monitor, self.config.monitor) {
            (Some(monitor), _) => Some(Arc::clone(monitor)),
            (None, true) => Some(Arc::new(TracingMonitor)),
            (None, false) => None,
        }
    }

    /// Every distinct device chain reachable from any agent.
    fn device_chains(&self) -> Vec<DeviceChain> {
        let mut chains: Vec<DeviceChain> = Vec::new();
        let mut push = |chain: &DeviceChain| {
            if !chains.iter().any(|c| c.same_as(chain)) {
                chains.push(chain.clone());
            }
        };
        for agent in self.agents() {
            push(agent.source_devices());
            push(agent.target_devices());
            for channel in agent.quantum_channels() {
                push(channel.transit());
            }
        }
        chains
    }

    /// Every distinct channel reachable from any agent.
    fn channels(&self) -> (Vec<Arc<QChannel>>, Vec<Arc<CChannel>>) {
        let mut quantum: Vec<Arc<QChannel>> = Vec::new();
        let mut classical: Vec<Arc<CChannel>> = Vec::new();
        for agent in self.agents() {
            for channel in agent.quantum_channels() {
                if !quantum.iter().any(|c| Arc::ptr_eq(c, channel)) {
                    quantum.push(Arc::clone(channel));
                }
            }
            for channel in agent.classical_channels() {
                if !classical.iter().any(|c| Arc::ptr_eq(c, channel)) {
                    classical.push(Arc::clone(channel));
                }
            }
        }
        (quantum, classical)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
