//! Common types for the qnet environment boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique name of an agent.
///
/// Agents are hashed and compared by name only, so two handles with the same
/// name always refer to the same network node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates an id from any string-like name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AgentId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&AgentId> for AgentId {
    fn from(id: &AgentId) -> Self {
        id.clone()
    }
}

/// One qubit slot of a transfer.
///
/// A transfer always delivers as many slots as were sent; qubits lost in
/// transit stay in their slot as `Lost` so protocol code can tell exactly
/// which part of a send went missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QubitSlot {
    /// The qubit arrived and is now owned by the receiver
    Present(u32),

    /// The qubit was lost by a device on the way
    Lost(u32),
}

impl QubitSlot {
    /// Returns the underlying qubit index regardless of loss.
    pub fn index(&self) -> u32 {
        match self {
            QubitSlot::Present(q) | QubitSlot::Lost(q) => *q,
        }
    }

    /// Returns true if the qubit was lost in transit.
    pub fn is_lost(&self) -> bool {
        matches!(self, QubitSlot::Lost(_))
    }

    /// Returns the index if the qubit arrived.
    pub fn present(&self) -> Option<u32> {
        match self {
            QubitSlot::Present(q) => Some(*q),
            QubitSlot::Lost(_) => None,
        }
    }

    /// Sign-flipped loss marker.
    ///
    /// Present qubits encode as their index, lost qubits as `-index`.
    /// Qubit 0 cannot be negated, so a lost qubit 0 encodes as negative infinity.
    pub fn encode(&self) -> f64 {
        match *self {
            QubitSlot::Present(q) => q as f64,
            QubitSlot::Lost(0) => f64::NEG_INFINITY,
            QubitSlot::Lost(q) => -(q as f64),
        }
    }

    /// Inverse of [`QubitSlot::encode`]. Returns `None` for values that are
    /// not a valid marker (NaN, fractions, out of range).
    pub fn decode(value: f64) -> Option<Self> {
        if value == f64::NEG_INFINITY {
            return Some(QubitSlot::Lost(0));
        }
        if !value.is_finite() || value.fract() != 0.0 || value.abs() > u32::MAX as f64 {
            return None;
        }
        if value < 0.0 {
            Some(QubitSlot::Lost(-value as u32))
        } else {
            Some(QubitSlot::Present(value as u32))
        }
    }
}

impl fmt::Display for QubitSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QubitSlot::Present(q) => write!(f, "{}", q),
            QubitSlot::Lost(0) => f.write_str("-inf"),
            QubitSlot::Lost(q) => write!(f, "-{}", q),
        }
    }
}

/// Direction of a journaled transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Sent,
    Received,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Sent => f.write_str("sent"),
            TransferKind::Received => f.write_str("received"),
        }
    }
}

/// What travelled over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Qubits(Vec<QubitSlot>),
    Bits(Vec<u8>),
}

impl Payload {
    /// Number of slots (qubits) or bits carried.
    pub fn len(&self) -> usize {
        match self {
            Payload::Qubits(slots) => slots.len(),
            Payload::Bits(bits) => bits.len(),
        }
    }

    /// Returns true if nothing was carried.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of qubit slots marked lost (always 0 for bits).
    pub fn lost_count(&self) -> usize {
        match self {
            Payload::Qubits(slots) => slots.iter().filter(|s| s.is_lost()).count(),
            Payload::Bits(_) => 0,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Qubits(slots) => {
                let items: Vec<String> = slots.iter().map(|s| s.to_string()).collect();
                write!(f, "Qubits [{}]", items.join(", "))
            }
            Payload::Bits(bits) => write!(f, "Bits {:?}", bits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lost_zero_encodes_to_negative_infinity() {
        assert_eq!(QubitSlot::Lost(0).encode(), f64::NEG_INFINITY);
        assert_eq!(QubitSlot::Lost(4).encode(), -4.0);
        assert_eq!(QubitSlot::Present(0).encode(), 0.0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(QubitSlot::decode(f64::NAN), None);
        assert_eq!(QubitSlot::decode(1.5), None);
        assert_eq!(QubitSlot::decode(f64::INFINITY), None);
    }

    #[test]
    fn test_payload_display() {
        let payload = Payload::Qubits(vec![QubitSlot::Present(1), QubitSlot::Lost(0)]);
        assert_eq!(payload.to_string(), "Qubits [1, -inf]");
        assert_eq!(payload.lost_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_slot_encoding_is_reversible(q in 0u32..100_000, lost in any::<bool>()) {
            let slot = if lost { QubitSlot::Lost(q) } else { QubitSlot::Present(q) };
            prop_assert_eq!(QubitSlot::decode(slot.encode()), Some(slot));
        }
    }
}
