//! Quantum channel: device pipeline plus per-direction qubit queues.

use super::{lanes_for, validate_members, Lane};
use crate::agent::Agent;
use crate::device::{
    run_pipeline, Device, DeviceChain, SharedDevice, FIBER_LENGTH_DEFAULT, PULSE_LENGTH_DEFAULT,
    SIGNAL_SPEED,
};
use qnet_env::{AgentId, NetError, QubitSlot, Result, SharedProgram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Device lists of one connected agent, shared live with the agent.
struct Endpoint {
    source_devices: DeviceChain,
    target_devices: DeviceChain,
}

/// Qubits in flight between `put` and `get`.
struct QPacket {
    /// Slots in send order; qubits lost at the source are already marked
    slots: Vec<QubitSlot>,

    /// Transit devices at the time of sending
    transit: Vec<SharedDevice>,

    /// Receiver's target devices at the time of sending
    target: Vec<SharedDevice>,

    /// Source delay already scaled by the number of qubits
    source_delay: f64,

    /// Sender's local time before the send
    source_time: f64,
}

/// What a receiver pops off a quantum channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// One slot per qubit sent, lost qubits marked rather than dropped
    pub slots: Vec<QubitSlot>,

    /// Total delay: source delay plus travel through transit and target devices
    pub delay: f64,

    /// Sender's local time before the send
    pub source_time: f64,
}

/// A quantum connection shared by a group of agents.
///
/// A qubit sent from `A` to `B` runs through `A`'s source devices at send
/// time, and through the transit devices and `B`'s target devices at
/// receive time.
pub struct QChannel {
    endpoints: HashMap<AgentId, Endpoint>,
    transit: DeviceChain,
    lanes: HashMap<(AgentId, AgentId), Lane<QPacket>>,
}

impl QChannel {
    /// Connects every pair of `agents` through one channel.
    ///
    /// Each agent gets the channel registered under every other member's
    /// name. The agents' device lists are shared, not copied: devices added
    /// afterwards still apply.
    pub fn connect(agents: &mut [&mut Agent], transit: Vec<Box<dyn Device>>) -> Result<Arc<Self>> {
        Self::connect_with_chain(agents, DeviceChain::from_devices(transit))
    }

    /// Like [`QChannel::connect`], with an existing (possibly shared) transit chain.
    pub fn connect_with_chain(agents: &mut [&mut Agent], transit: DeviceChain) -> Result<Arc<Self>> {
        let members: Vec<AgentId> = agents.iter().map(|a| a.name().clone()).collect();
        validate_members(&members)?;

        let endpoints = agents
            .iter()
            .map(|a| {
                (
                    a.name().clone(),
                    Endpoint {
                        source_devices: a.source_devices().clone(),
                        target_devices: a.target_devices().clone(),
                    },
                )
            })
            .collect();

        let channel = Arc::new(Self {
            endpoints,
            transit,
            lanes: lanes_for(&members),
        });

        for agent in agents.iter_mut() {
            let name = agent.name().clone();
            for peer in members.iter().filter(|m| **m != name) {
                agent.attach_quantum(peer.clone(), Arc::clone(&channel));
            }
        }

        debug!("quantum channel connecting {:?}", members);
        Ok(channel)
    }

    /// Sends `qubits` from `source` toward `target`.
    ///
    /// Applies the source devices immediately. Returns the sender-side delay
    /// (the summed source device delay, or one default pulse length when the
    /// sender has no source devices, times the number of qubits) together
    /// with the slots as queued, source losses already marked.
    pub fn put(
        &self,
        source: &AgentId,
        target: &AgentId,
        qubits: &[u32],
        source_time: f64,
        circuit: &SharedProgram,
    ) -> Result<(f64, Vec<QubitSlot>)> {
        let sender = self.endpoint(source, target)?;
        let receiver = self.endpoint(target, source)?;
        let lane = self.lane(source, target)?;

        let source_devices = sender.source_devices.snapshot();
        let (raw_delay, lost) = if source_devices.is_empty() {
            (PULSE_LENGTH_DEFAULT, Vec::new())
        } else {
            let mut program = circuit.lock();
            run_pipeline(&source_devices, &mut *program, qubits)
        };
        let source_delay = raw_delay * qubits.len() as f64;

        let slots: Vec<QubitSlot> = qubits
            .iter()
            .map(|&q| {
                if lost.contains(&q) {
                    QubitSlot::Lost(q)
                } else {
                    QubitSlot::Present(q)
                }
            })
            .collect();

        lane.push(QPacket {
            slots: slots.clone(),
            transit: self.transit.snapshot(),
            target: receiver.target_devices.snapshot(),
            source_delay,
            source_time,
        })
        .map_err(|e| e.into_net_error(target, source))?;

        trace!("{} -> {}: {} qubits queued", source, target, qubits.len());
        Ok((source_delay, slots))
    }

    /// Pops the oldest packet `source` sent to `target`, blocking until one
    /// arrives or `timeout` elapses.
    ///
    /// Runs the surviving qubits through transit and target devices. The
    /// returned slots keep the order and count of the send.
    pub fn get(
        &self,
        source: &AgentId,
        target: &AgentId,
        circuit: &SharedProgram,
        timeout: Option<Duration>,
    ) -> Result<Delivery> {
        self.endpoint(target, source)?;
        let lane = self.lane(source, target)?;
        let packet = lane
            .pop(timeout)
            .map_err(|e| e.into_net_error(target, source))?;

        let remaining: Vec<u32> = packet.slots.iter().filter_map(|s| s.present()).collect();

        let mut travel_delay = 0.0;
        if packet.transit.is_empty() {
            travel_delay += FIBER_LENGTH_DEFAULT / SIGNAL_SPEED;
        }

        let pipeline: Vec<SharedDevice> = packet
            .transit
            .iter()
            .chain(packet.target.iter())
            .cloned()
            .collect();
        let lost = if pipeline.is_empty() {
            Vec::new()
        } else {
            let mut program = circuit.lock();
            let (delay, lost) = run_pipeline(&pipeline, &mut *program, &remaining);
            travel_delay += delay;
            lost
        };

        let slots: Vec<QubitSlot> = packet
            .slots
            .into_iter()
            .map(|slot| match slot {
                QubitSlot::Present(q) if lost.contains(&q) => QubitSlot::Lost(q),
                other => other,
            })
            .collect();

        let delay = travel_delay * slots.len() as f64 + packet.source_delay;
        Ok(Delivery {
            slots,
            delay,
            source_time: packet.source_time,
        })
    }

    /// Packets queued from `source` to `target` and not yet received.
    pub fn pending(&self, source: &AgentId, target: &AgentId) -> usize {
        self.lanes
            .get(&(source.clone(), target.clone()))
            .map_or(0, Lane::len)
    }

    /// Drops every queued packet; returns how many were discarded.
    pub fn reset(&self) -> usize {
        self.lanes.values().map(Lane::drain).sum()
    }

    /// Transit devices, shared live with the channel.
    pub fn transit(&self) -> &DeviceChain {
        &self.transit
    }

    /// Names of every connected agent.
    pub fn members(&self) -> impl Iterator<Item = &AgentId> {
        self.endpoints.keys()
    }

    fn endpoint(&self, name: &AgentId, peer: &AgentId) -> Result<&Endpoint> {
        self.endpoints
            .get(name)
            .ok_or_else(|| NetError::no_channel(peer, name))
    }

    fn lane(&self, source: &AgentId, target: &AgentId) -> Result<&Lane<QPacket>> {
        self.lanes
            .get(&(source.clone(), target.clone()))
            .ok_or_else(|| NetError::no_channel(source, target))
    }
}

impl std::fmt::Debug for QChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut members: Vec<&AgentId> = self.endpoints.keys().collect();
        members.sort();
        f.debug_struct("QChannel")
            .field("members", &members)
            .field("transit", &self.transit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceOutcome, Fiber};
    use approx::assert_relative_eq;
    use qnet_env::{CircuitAccumulator, Program};

    struct DropAll;

    impl Device for DropAll {
        fn name(&self) -> &str {
            "DropAll"
        }

        fn apply(&mut self, _circuit: &mut dyn CircuitAccumulator, qubits: &[u32]) -> DeviceOutcome {
            DeviceOutcome {
                delay: 0.0,
                lost: qubits.to_vec(),
            }
        }
    }

    fn pair() -> (Agent, Agent) {
        (
            Agent::new("alice").with_qubits(&[0, 1, 2]),
            Agent::new("bob"),
        )
    }

    #[test]
    fn test_default_source_delay_is_scaled() {
        let (mut alice, mut bob) = pair();
        let channel = QChannel::connect(&mut [&mut alice, &mut bob], vec![]).unwrap();
        let program = SharedProgram::default();

        let (delay, queued) = channel
            .put(alice.name(), bob.name(), &[0, 1], 0.0, &program)
            .unwrap();
        assert_relative_eq!(delay, 2.0 * PULSE_LENGTH_DEFAULT);
        assert_eq!(queued, vec![QubitSlot::Present(0), QubitSlot::Present(1)]);
        assert_eq!(channel.pending(alice.name(), bob.name()), 1);

        let delivery = channel.get(alice.name(), bob.name(), &program, None).unwrap();
        assert_eq!(
            delivery.slots,
            vec![QubitSlot::Present(0), QubitSlot::Present(1)]
        );
        assert_relative_eq!(delivery.delay, 2.0 * PULSE_LENGTH_DEFAULT);
    }

    #[test]
    fn test_transit_delay_scales_with_slot_count() {
        let (mut alice, mut bob) = pair();
        let transit: Vec<Box<dyn Device>> = vec![Box::new(Fiber::new(10.0).with_error(false))];
        let channel = QChannel::connect(&mut [&mut alice, &mut bob], transit).unwrap();
        let program = SharedProgram::default();

        channel
            .put(alice.name(), bob.name(), &[0, 1, 2], 1.0, &program)
            .unwrap();
        let delivery = channel.get(alice.name(), bob.name(), &program, None).unwrap();

        let expected = 3.0 * (10.0 / SIGNAL_SPEED) + 3.0 * PULSE_LENGTH_DEFAULT;
        assert_relative_eq!(delivery.delay, expected, epsilon = 1e-15);
        assert_eq!(delivery.source_time, 1.0);
    }

    #[test]
    fn test_loss_keeps_slot_count_and_order() {
        let (mut alice, mut bob) = pair();
        bob.add_target_device(DropAll);
        let channel = QChannel::connect(&mut [&mut alice, &mut bob], vec![]).unwrap();
        let program = SharedProgram::new(Program::new());

        channel
            .put(alice.name(), bob.name(), &[2, 0], 0.0, &program)
            .unwrap();
        let delivery = channel.get(alice.name(), bob.name(), &program, None).unwrap();

        assert_eq!(delivery.slots, vec![QubitSlot::Lost(2), QubitSlot::Lost(0)]);
        let encoded: Vec<f64> = delivery.slots.iter().map(|s| s.encode()).collect();
        assert_eq!(encoded, vec![-2.0, f64::NEG_INFINITY]);
    }

    #[test]
    fn test_source_loss_skips_later_devices() {
        let (mut alice, mut bob) = pair();
        alice.add_source_device(DropAll);
        let channel = QChannel::connect(&mut [&mut alice, &mut bob], vec![]).unwrap();
        let program = SharedProgram::default();

        let (_, queued) = channel
            .put(alice.name(), bob.name(), &[1], 0.0, &program)
            .unwrap();
        assert_eq!(queued, vec![QubitSlot::Lost(1)]);
        let delivery = channel.get(alice.name(), bob.name(), &program, None).unwrap();
        assert_eq!(delivery.slots, vec![QubitSlot::Lost(1)]);
    }

    #[test]
    fn test_three_agents_have_separate_lanes() {
        let mut a = Agent::new("a").with_qubits(&[0]);
        let mut b = Agent::new("b").with_qubits(&[1]);
        let mut c = Agent::new("c");
        let channel = QChannel::connect(&mut [&mut a, &mut b, &mut c], vec![]).unwrap();
        let program = SharedProgram::default();

        channel.put(a.name(), c.name(), &[0], 0.0, &program).unwrap();
        channel.put(b.name(), c.name(), &[1], 0.0, &program).unwrap();

        // c asks for b first even though a's packet was queued earlier
        let from_b = channel.get(b.name(), c.name(), &program, None).unwrap();
        assert_eq!(from_b.slots, vec![QubitSlot::Present(1)]);
        let from_a = channel.get(a.name(), c.name(), &program, None).unwrap();
        assert_eq!(from_a.slots, vec![QubitSlot::Present(0)]);
    }

    #[test]
    fn test_get_times_out() {
        let (mut alice, mut bob) = pair();
        let channel = QChannel::connect(&mut [&mut alice, &mut bob], vec![]).unwrap();
        let err = channel
            .get(
                alice.name(),
                bob.name(),
                &SharedProgram::default(),
                Some(Duration::from_millis(10)),
            )
            .unwrap_err();
        assert!(matches!(err, NetError::ReceiveTimeout { .. }));
    }

    #[test]
    fn test_unknown_member() {
        let (mut alice, mut bob) = pair();
        let channel = QChannel::connect(&mut [&mut alice, &mut bob], vec![]).unwrap();
        let err = channel
            .put(alice.name(), &"eve".into(), &[0], 0.0, &SharedProgram::default())
            .unwrap_err();
        assert!(matches!(err, NetError::ChannelProtocol { .. }));
    }

    #[test]
    fn test_reset_drains_lanes() {
        let (mut alice, mut bob) = pair();
        let channel = QChannel::connect(&mut [&mut alice, &mut bob], vec![]).unwrap();
        let program = SharedProgram::default();
        channel.put(alice.name(), bob.name(), &[0], 0.0, &program).unwrap();
        channel.put(alice.name(), bob.name(), &[1], 0.0, &program).unwrap();

        assert_eq!(channel.reset(), 2);
        assert_eq!(channel.pending(alice.name(), bob.name()), 0);
    }

    #[test]
    fn test_connect_registers_peers() {
        let (mut alice, mut bob) = pair();
        QChannel::connect(&mut [&mut alice, &mut bob], vec![]).unwrap();
        assert!(alice.has_quantum_channel(&"bob".into()));
        assert!(bob.has_quantum_channel(&"alice".into()));
        assert!(!alice.has_quantum_channel(&"alice".into()));
    }
}
