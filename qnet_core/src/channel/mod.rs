//! Channels between agents.
//!
//! A channel connects a group of agents. Internally it keeps one FIFO lane
//! per ordered `(source, target)` pair, so traffic in one direction is
//! delivered in order while independent flows never block each other.
//!
//! ```text
//! Agent A                    QChannel                    Agent B
//!   |                           |                          |
//!   |-- put(A, B, qubits) ----->|  source devices (A)      |
//!   |<-- source delay ----------|                          |
//!   |                           |== lane (A, B) ==========>|
//!   |                           |  transit + target (B)    |-- get(A, B)
//! ```

mod classical;
mod quantum;

pub use classical::{CChannel, ClassicalDelivery};
pub use quantum::{Delivery, QChannel};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use qnet_env::{AgentId, NetError};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Failure popping from or pushing to a lane.
#[derive(Debug, Error)]
pub(crate) enum LaneError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("lane closed")]
    Disconnected,
}

impl LaneError {
    /// Converts to the public error, naming the waiting agent and its peer.
    pub(crate) fn into_net_error(self, agent: &AgentId, peer: &AgentId) -> NetError {
        match self {
            LaneError::Timeout(waited) => NetError::ReceiveTimeout {
                agent: agent.to_string(),
                peer: peer.to_string(),
                waited_ms: waited.as_millis() as u64,
            },
            LaneError::Disconnected => {
                NetError::Disconnected(format!("lane {} -> {}", peer, agent))
            }
        }
    }
}

/// Unbounded FIFO queue for one direction of traffic.
pub(crate) struct Lane<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Lane<T> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub(crate) fn push(&self, item: T) -> Result<(), LaneError> {
        self.tx.send(item).map_err(|_| LaneError::Disconnected)
    }

    /// Blocks until an item is available, or until `timeout` elapses.
    pub(crate) fn pop(&self, timeout: Option<Duration>) -> Result<T, LaneError> {
        match timeout {
            None => self.rx.recv().map_err(|_| LaneError::Disconnected),
            Some(limit) => self.rx.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => LaneError::Timeout(limit),
                RecvTimeoutError::Disconnected => LaneError::Disconnected,
            }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Discards everything queued; returns how many items were dropped.
    pub(crate) fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

/// One lane per ordered pair of distinct members.
pub(crate) fn lanes_for<T>(members: &[AgentId]) -> HashMap<(AgentId, AgentId), Lane<T>> {
    let mut lanes = HashMap::new();
    for source in members {
        for target in members {
            if source != target {
                lanes.insert((source.clone(), target.clone()), Lane::new());
            }
        }
    }
    lanes
}

/// Rejects groups that are too small or contain the same name twice.
pub(crate) fn validate_members(members: &[AgentId]) -> Result<(), NetError> {
    if members.len() < 2 {
        return Err(NetError::configuration(
            "a channel needs at least two agents",
        ));
    }
    for (i, name) in members.iter().enumerate() {
        if members[..i].contains(name) {
            return Err(NetError::configuration(format!(
                "agent {} appears twice in one channel",
                name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_is_fifo() {
        let lane = Lane::new();
        for i in 0..5 {
            lane.push(i).unwrap();
        }
        let popped: Vec<i32> = (0..5).map(|_| lane.pop(None).unwrap()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_lane_timeout() {
        let lane: Lane<u8> = Lane::new();
        let err = lane.pop(Some(Duration::from_millis(5))).unwrap_err();
        assert!(matches!(err, LaneError::Timeout(_)));

        let net = err.into_net_error(&"bob".into(), &"alice".into());
        assert!(matches!(net, NetError::ReceiveTimeout { waited_ms: 5, .. }));
    }

    #[test]
    fn test_lane_drain() {
        let lane = Lane::new();
        lane.push("a").unwrap();
        lane.push("b").unwrap();
        assert_eq!(lane.len(), 2);
        assert_eq!(lane.drain(), 2);
        assert_eq!(lane.len(), 0);
    }

    #[test]
    fn test_lanes_cover_every_direction() {
        let members: Vec<AgentId> = vec!["a".into(), "b".into(), "c".into()];
        let lanes: HashMap<_, Lane<()>> = lanes_for(&members);
        assert_eq!(lanes.len(), 6);
        assert!(lanes.contains_key(&("c".into(), "a".into())));
    }

    #[test]
    fn test_validate_members() {
        assert!(validate_members(&["a".into()]).is_err());
        assert!(validate_members(&["a".into(), "a".into()]).is_err());
        assert!(validate_members(&["a".into(), "b".into()]).is_ok());
    }
}
