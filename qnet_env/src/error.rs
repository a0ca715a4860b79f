//! Error types shared by every qnet crate.

use thiserror::Error;

/// Errors raised by agents, channels, devices and the simulation harness.
#[derive(Debug, Error)]
pub enum NetError {
    /// Agent tried to send or operate on qubits it does not currently own
    #[error("Agent {agent} does not own qubits {qubits:?}")]
    Ownership { agent: String, qubits: Vec<u32> },

    /// Classical memory holds a value other than 0 or 1
    #[error("Classical bits must be 0 or 1, got {value}")]
    InvalidMemory { value: u8 },

    /// Unknown device category, inconsistent network setup, etc.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No channel was established between the two agents
    #[error("Agent {agent} has no channel to {peer}")]
    ChannelProtocol { agent: String, peer: String },

    /// A receive waited longer than the configured timeout
    #[error("Agent {agent} timed out after {waited_ms}ms waiting on {peer}")]
    ReceiveTimeout {
        agent: String,
        peer: String,
        waited_ms: u64,
    },

    /// Channel queue was closed
    #[error("Channel disconnected: {0}")]
    Disconnected(String),

    /// First failure reported by an agent thread during a trial
    #[error("Agent {agent} failed in trial {trial}: {source}")]
    AgentFailed {
        agent: String,
        trial: usize,
        #[source]
        source: Box<NetError>,
    },

    /// Protocol code panicked
    #[error("Agent {agent} panicked: {message}")]
    AgentPanicked { agent: String, message: String },

    /// Journal export failed
    #[error("Export error: {0}")]
    Export(String),
}

impl NetError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an ownership error for the given agent and qubits.
    pub fn ownership(agent: impl std::fmt::Display, qubits: &[u32]) -> Self {
        Self::Ownership {
            agent: agent.to_string(),
            qubits: qubits.to_vec(),
        }
    }

    /// Creates a channel protocol error.
    pub fn no_channel(agent: impl std::fmt::Display, peer: impl std::fmt::Display) -> Self {
        Self::ChannelProtocol {
            agent: agent.to_string(),
            peer: peer.to_string(),
        }
    }

    /// Returns the innermost error, unwrapping `AgentFailed` layers.
    pub fn root_cause(&self) -> &NetError {
        match self {
            NetError::AgentFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_message() {
        let err = NetError::ownership("alice", &[7]);
        let msg = err.to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("7"));
    }

    #[test]
    fn test_root_cause_unwraps_agent_failure() {
        let err = NetError::AgentFailed {
            agent: "bob".into(),
            trial: 2,
            source: Box::new(NetError::InvalidMemory { value: 3 }),
        };
        assert!(matches!(err.root_cause(), NetError::InvalidMemory { value: 3 }));
        assert!(err.to_string().contains("trial 2"));
    }
}
