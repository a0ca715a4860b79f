//! Agent - a named network node owning qubits and classical memory.
//!
//! An agent runs user protocol code on its own thread. It sends and
//! receives over the channels it has been connected to, folds channel
//! delays into its local time and journals every transfer on the shared
//! [`Clock`].
//!
//! Ownership is enforced at two points:
//! - [`Agent::send`] rejects qubits the agent does not hold
//! - [`Agent::circuit`] hands out an [`AuthorizedCircuit`] that rejects any
//!   instruction touching a foreign qubit before it reaches the program

use crate::channel::{CChannel, QChannel};
use crate::clock::Clock;
use crate::device::{Device, DeviceChain, DevicePlacement, DeviceReport};
use crate::guard::AuthorizedCircuit;
use qnet_env::{
    AgentId, Monitor, NetError, Payload, QubitSlot, Result, SharedProgram, TransferEvent,
    TransferKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Protocol logic run by one agent during a trial.
///
/// Closures of the form `FnMut(&mut Agent) -> Result<()>` implement this
/// trait directly.
pub trait Protocol: Send {
    fn run(&mut self, agent: &mut Agent) -> Result<()>;
}

impl<F> Protocol for F
where
    F: FnMut(&mut Agent) -> Result<()> + Send,
{
    fn run(&mut self, agent: &mut Agent) -> Result<()> {
        self(agent)
    }
}

/// Plain data state of an agent, used to replay trials from the same start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub name: AgentId,
    pub qubits: Vec<u32>,
    pub cmem: Vec<u8>,

    /// Names of source devices, in order (informational)
    pub source_devices: Vec<String>,

    /// Names of target devices, in order (informational)
    pub target_devices: Vec<String>,
}

/// A network node.
pub struct Agent {
    /// Unique name; agents are compared by name only
    name: AgentId,

    /// Qubits currently owned
    qubits: BTreeSet<u32>,

    /// Classical memory, every entry 0 or 1
    cmem: Vec<u8>,

    /// Local simulated time (seconds), never decreases within a trial
    local_time: f64,

    /// Applied to every qubit this agent sends
    source_devices: DeviceChain,

    /// Applied to every qubit this agent receives
    target_devices: DeviceChain,

    q_channels: HashMap<AgentId, Arc<QChannel>>,
    c_channels: HashMap<AgentId, Arc<CChannel>>,

    clock: Arc<Clock>,
    program: SharedProgram,
    monitor: Option<Arc<dyn Monitor>>,

    /// `None` blocks forever on receive
    receive_timeout: Option<Duration>,
}

impl Agent {
    /// Creates an agent with no qubits, no memory and no devices.
    pub fn new(name: impl Into<AgentId>) -> Self {
        Self {
            name: name.into(),
            qubits: BTreeSet::new(),
            cmem: Vec::new(),
            local_time: 0.0,
            source_devices: DeviceChain::new(),
            target_devices: DeviceChain::new(),
            q_channels: HashMap::new(),
            c_channels: HashMap::new(),
            clock: Clock::shared(),
            program: SharedProgram::default(),
            monitor: None,
            receive_timeout: None,
        }
    }

    pub fn with_qubits(mut self, qubits: &[u32]) -> Self {
        self.qubits = qubits.iter().copied().collect();
        self
    }

    /// Sets the initial classical memory; every bit must be 0 or 1.
    pub fn with_cmem(mut self, cmem: Vec<u8>) -> Result<Self> {
        self.set_cmem(cmem)?;
        Ok(self)
    }

    pub fn with_circuit(mut self, program: SharedProgram) -> Self {
        self.program = program;
        self
    }

    pub fn name(&self) -> &AgentId {
        &self.name
    }

    /// Owned qubits in ascending order.
    pub fn qubits(&self) -> Vec<u32> {
        self.qubits.iter().copied().collect()
    }

    pub fn owns(&self, qubit: u32) -> bool {
        self.qubits.contains(&qubit)
    }

    pub fn cmem(&self) -> &[u8] {
        &self.cmem
    }

    /// Replaces classical memory. Rejects the whole update on any non-bit.
    pub fn set_cmem(&mut self, cmem: Vec<u8>) -> Result<()> {
        check_bits(&cmem)?;
        self.cmem = cmem;
        Ok(())
    }

    /// Appends bits to classical memory.
    pub fn add_cmem(&mut self, bits: &[u8]) -> Result<()> {
        check_bits(bits)?;
        self.cmem.extend_from_slice(bits);
        Ok(())
    }

    pub fn local_time(&self) -> f64 {
        self.local_time
    }

    /// Time of the shared clock.
    pub fn master_time(&self) -> f64 {
        self.clock.time()
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn bind_clock(&mut self, clock: Arc<Clock>) {
        self.clock = clock;
    }

    /// The shared program this agent appends to.
    pub fn program(&self) -> &SharedProgram {
        &self.program
    }

    pub fn bind_circuit(&mut self, program: SharedProgram) {
        self.program = program;
    }

    pub fn set_monitor(&mut self, monitor: Option<Arc<dyn Monitor>>) {
        self.monitor = monitor;
    }

    pub fn set_receive_timeout(&mut self, timeout: Option<Duration>) {
        self.receive_timeout = timeout;
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    pub fn source_devices(&self) -> &DeviceChain {
        &self.source_devices
    }

    pub fn target_devices(&self) -> &DeviceChain {
        &self.target_devices
    }

    pub fn add_source_device<D: Device + 'static>(&self, device: D) {
        self.source_devices.push(device);
    }

    pub fn add_target_device<D: Device + 'static>(&self, device: D) {
        self.target_devices.push(device);
    }

    /// Adds a device by placement name (`"source"` or `"target"`).
    pub fn add_device(&self, placement: &str, device: Box<dyn Device>) -> Result<()> {
        self.add_device_at(placement.parse()?, device);
        Ok(())
    }

    pub fn add_device_at(&self, placement: DevicePlacement, device: Box<dyn Device>) {
        match placement {
            DevicePlacement::Source => self.source_devices.push_boxed(device),
            DevicePlacement::Target => self.target_devices.push_boxed(device),
        }
    }

    /// Counters of every source then target device.
    pub fn device_reports(&self) -> Vec<DeviceReport> {
        let mut reports = self.source_devices.reports();
        reports.extend(self.target_devices.reports());
        reports
    }

    pub(crate) fn attach_quantum(&mut self, peer: AgentId, channel: Arc<QChannel>) {
        self.q_channels.insert(peer, channel);
    }

    pub(crate) fn attach_classical(&mut self, peer: AgentId, channel: Arc<CChannel>) {
        self.c_channels.insert(peer, channel);
    }

    pub fn has_quantum_channel(&self, peer: &AgentId) -> bool {
        self.q_channels.contains_key(peer)
    }

    pub fn has_classical_channel(&self, peer: &AgentId) -> bool {
        self.c_channels.contains_key(peer)
    }

    /// Every quantum channel this agent is connected to (one entry per peer).
    pub fn quantum_channels(&self) -> impl Iterator<Item = &Arc<QChannel>> {
        self.q_channels.values()
    }

    pub fn classical_channels(&self) -> impl Iterator<Item = &Arc<CChannel>> {
        self.c_channels.values()
    }

    /// Sends `qubits` to `target`; returns the sender-side delay.
    ///
    /// Fails without side effects if any qubit is not owned, appears twice,
    /// or if there is no quantum channel to `target`.
    pub fn send(&mut self, target: impl Into<AgentId>, qubits: &[u32]) -> Result<f64> {
        let target = target.into();

        let foreign: Vec<u32> = qubits.iter().copied().filter(|q| !self.owns(*q)).collect();
        if !foreign.is_empty() {
            return Err(NetError::ownership(&self.name, &foreign));
        }
        let distinct: BTreeSet<u32> = qubits.iter().copied().collect();
        if distinct.len() != qubits.len() {
            return Err(NetError::configuration(format!(
                "{} sent a qubit twice in {:?}",
                self.name, qubits
            )));
        }

        let channel = self
            .q_channels
            .get(&target)
            .ok_or_else(|| NetError::no_channel(&self.name, &target))?;
        let (delay, slots) = channel.put(&self.name, &target, qubits, self.local_time, &self.program)?;

        for q in qubits {
            self.qubits.remove(q);
        }
        self.local_time += delay;

        self.journal(TransferKind::Sent, &self.name, &target, Payload::Qubits(slots));
        Ok(delay)
    }

    /// Blocks until `source` has sent qubits to this agent.
    ///
    /// Returns one slot per qubit sent; lost qubits stay in their slot as
    /// [`QubitSlot::Lost`] and are not added to this agent's qubits.
    pub fn receive(&mut self, source: impl Into<AgentId>) -> Result<Vec<QubitSlot>> {
        let source = source.into();
        let channel = self
            .q_channels
            .get(&source)
            .ok_or_else(|| NetError::no_channel(&self.name, &source))?;

        let delivery = channel.get(&source, &self.name, &self.program, self.receive_timeout)?;

        self.advance_to(delivery.source_time + delivery.delay);
        self.qubits
            .extend(delivery.slots.iter().filter_map(|s| s.present()));

        self.journal(
            TransferKind::Received,
            &source,
            &self.name,
            Payload::Qubits(delivery.slots.clone()),
        );
        Ok(delivery.slots)
    }

    /// Sends classical bits to `target`; returns the sender-side delay.
    pub fn send_classical(&mut self, target: impl Into<AgentId>, bits: &[u8]) -> Result<f64> {
        let target = target.into();
        check_bits(bits)?;

        let channel = self
            .c_channels
            .get(&target)
            .ok_or_else(|| NetError::no_channel(&self.name, &target))?;
        let delay = channel.put(&self.name, &target, bits, self.local_time)?;
        self.local_time += delay;

        self.journal(
            TransferKind::Sent,
            &self.name,
            &target,
            Payload::Bits(bits.to_vec()),
        );
        Ok(delay)
    }

    /// Blocks until `source` has sent classical bits to this agent.
    pub fn receive_classical(&mut self, source: impl Into<AgentId>) -> Result<Vec<u8>> {
        let source = source.into();
        let channel = self
            .c_channels
            .get(&source)
            .ok_or_else(|| NetError::no_channel(&self.name, &source))?;

        let delivery = channel.get(&source, &self.name, self.receive_timeout)?;
        self.advance_to(delivery.source_time + delivery.delay);

        self.journal(
            TransferKind::Received,
            &source,
            &self.name,
            Payload::Bits(delivery.bits.clone()),
        );
        Ok(delivery.bits)
    }

    /// Guarded access to the shared program.
    pub fn circuit(&self) -> AuthorizedCircuit<'_> {
        AuthorizedCircuit::new(&self.name, &self.qubits, &self.program)
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            name: self.name.clone(),
            qubits: self.qubits(),
            cmem: self.cmem.clone(),
            source_devices: self.source_devices.reports().into_iter().map(|r| r.name).collect(),
            target_devices: self.target_devices.reports().into_iter().map(|r| r.name).collect(),
        }
    }

    /// Rewinds data state to `snapshot` and local time to zero.
    ///
    /// Channels, devices, clock and program bindings are left untouched.
    pub fn restore(&mut self, snapshot: &AgentSnapshot) -> Result<()> {
        if snapshot.name != self.name {
            return Err(NetError::configuration(format!(
                "snapshot of {} cannot restore {}",
                snapshot.name, self.name
            )));
        }
        check_bits(&snapshot.cmem)?;
        self.qubits = snapshot.qubits.iter().copied().collect();
        self.cmem = snapshot.cmem.clone();
        self.local_time = 0.0;
        debug!("restored {} with qubits {:?}", self.name, snapshot.qubits);
        Ok(())
    }

    fn advance_to(&mut self, arrival: f64) {
        if arrival > self.local_time {
            self.local_time = arrival;
        }
    }

    fn journal(&self, kind: TransferKind, source: &AgentId, target: &AgentId, payload: Payload) {
        let event: TransferEvent = self
            .clock
            .record(self.local_time, kind, source, target, payload);
        trace!("{}", event);
        if let Some(monitor) = &self.monitor {
            monitor.on_transfer(&event);
        }
    }
}

fn check_bits(bits: &[u8]) -> Result<()> {
    match bits.iter().find(|&&b| b > 1) {
        Some(&value) => Err(NetError::InvalidMemory { value }),
        None => Ok(()),
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Agent {}

impl std::hash::Hash for Agent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("qubits", &self.qubits)
            .field("cmem", &self.cmem)
            .field("local_time", &self.local_time)
            .finish()
    }
}
