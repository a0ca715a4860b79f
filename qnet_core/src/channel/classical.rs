//! Classical channel: bit lists with a length-scaled delay.

use super::{lanes_for, validate_members, Lane};
use crate::agent::Agent;
use crate::device::{PULSE_LENGTH_DEFAULT, SIGNAL_SPEED};
use qnet_env::{AgentId, NetError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Bits per byte of payload on the wire.
const BITS_PER_BYTE: f64 = 8.0;

struct CPacket {
    bits: Vec<u8>,
    source_delay: f64,
    source_time: f64,
}

/// What a receiver pops off a classical channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassicalDelivery {
    pub bits: Vec<u8>,

    /// Source delay plus `length / c` per bit
    pub delay: f64,

    /// Sender's local time before the send
    pub source_time: f64,
}

/// A classical connection of a given length shared by a group of agents.
pub struct CChannel {
    /// Length in km
    length: f64,
    lanes: HashMap<(AgentId, AgentId), Lane<CPacket>>,
}

impl CChannel {
    /// Connects every pair of `agents` over `length` km.
    pub fn connect(agents: &mut [&mut Agent], length: f64) -> Result<Arc<Self>> {
        let members: Vec<AgentId> = agents.iter().map(|a| a.name().clone()).collect();
        validate_members(&members)?;

        let channel = Arc::new(Self {
            length: length.max(0.0),
            lanes: lanes_for(&members),
        });

        for agent in agents.iter_mut() {
            let name = agent.name().clone();
            for peer in members.iter().filter(|m| **m != name) {
                agent.attach_classical(peer.clone(), Arc::clone(&channel));
            }
        }

        debug!("classical channel of {} km connecting {:?}", length, members);
        Ok(channel)
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Sender-side delay for a payload: one pulse per serialized bit.
    pub fn source_delay(bits: &[u8]) -> f64 {
        PULSE_LENGTH_DEFAULT * BITS_PER_BYTE * std::mem::size_of_val(bits) as f64
    }

    /// Queues `bits` from `source` to `target`; returns the sender-side delay.
    pub fn put(
        &self,
        source: &AgentId,
        target: &AgentId,
        bits: &[u8],
        source_time: f64,
    ) -> Result<f64> {
        let source_delay = Self::source_delay(bits);
        self.lane(source, target)?
            .push(CPacket {
                bits: bits.to_vec(),
                source_delay,
                source_time,
            })
            .map_err(|e| e.into_net_error(target, source))?;
        Ok(source_delay)
    }

    /// Pops the oldest bits `source` sent to `target`.
    pub fn get(
        &self,
        source: &AgentId,
        target: &AgentId,
        timeout: Option<Duration>,
    ) -> Result<ClassicalDelivery> {
        let packet = self
            .lane(source, target)?
            .pop(timeout)
            .map_err(|e| e.into_net_error(target, source))?;

        let travel_delay = self.length / SIGNAL_SPEED;
        Ok(ClassicalDelivery {
            delay: travel_delay * packet.bits.len() as f64 + packet.source_delay,
            bits: packet.bits,
            source_time: packet.source_time,
        })
    }

    pub fn pending(&self, source: &AgentId, target: &AgentId) -> usize {
        self.lanes
            .get(&(source.clone(), target.clone()))
            .map_or(0, Lane::len)
    }

    /// Drops every queued message; returns how many were discarded.
    pub fn reset(&self) -> usize {
        self.lanes.values().map(Lane::drain).sum()
    }

    fn lane(&self, source: &AgentId, target: &AgentId) -> Result<&Lane<CPacket>> {
        self.lanes
            .get(&(source.clone(), target.clone()))
            .ok_or_else(|| NetError::no_channel(source, target))
    }
}

impl std::fmt::Debug for CChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CChannel")
            .field("length", &self.length)
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_classical_delays() {
        let mut alice = Agent::new("alice");
        let mut bob = Agent::new("bob");
        let channel = CChannel::connect(&mut [&mut alice, &mut bob], 30.0).unwrap();

        let sent = channel.put(alice.name(), bob.name(), &[1, 0, 1], 2.0).unwrap();
        assert_relative_eq!(sent, 3.0 * 8.0 * PULSE_LENGTH_DEFAULT);

        let delivery = channel.get(alice.name(), bob.name(), None).unwrap();
        assert_eq!(delivery.bits, vec![1, 0, 1]);
        assert_eq!(delivery.source_time, 2.0);
        assert_relative_eq!(
            delivery.delay,
            3.0 * 30.0 / SIGNAL_SPEED + sent,
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_classical_fifo_per_direction() {
        let mut alice = Agent::new("alice");
        let mut bob = Agent::new("bob");
        let channel = CChannel::connect(&mut [&mut alice, &mut bob], 0.0).unwrap();

        channel.put(alice.name(), bob.name(), &[0], 0.0).unwrap();
        channel.put(alice.name(), bob.name(), &[1], 0.0).unwrap();
        channel.put(bob.name(), alice.name(), &[1, 1], 0.0).unwrap();

        assert_eq!(channel.pending(alice.name(), bob.name()), 2);
        assert_eq!(channel.get(alice.name(), bob.name(), None).unwrap().bits, vec![0]);
        assert_eq!(channel.get(alice.name(), bob.name(), None).unwrap().bits, vec![1]);
        assert_eq!(channel.get(bob.name(), alice.name(), None).unwrap().bits, vec![1, 1]);
    }

    #[test]
    fn test_empty_payload_costs_nothing() {
        assert_eq!(CChannel::source_delay(&[]), 0.0);
    }

    #[test]
    fn test_classical_timeout() {
        let mut alice = Agent::new("alice");
        let mut bob = Agent::new("bob");
        let channel = CChannel::connect(&mut [&mut alice, &mut bob], 1.0).unwrap();
        let err = channel
            .get(bob.name(), alice.name(), Some(Duration::from_millis(5)))
            .unwrap_err();
        assert!(matches!(err, NetError::ReceiveTimeout { .. }));
    }
}
