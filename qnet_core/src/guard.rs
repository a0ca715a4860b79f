//! Ownership-checked access to the shared program.
//!
//! Protocol code never locks the [`SharedProgram`] directly. It goes through
//! an [`AuthorizedCircuit`] obtained from `Agent::circuit`, which refuses any
//! instruction that touches a qubit the agent does not currently own.

use qnet_env::{AgentId, CircuitAccumulator, Instruction, NetError, Result, SharedProgram};
use std::collections::BTreeSet;
use std::f64::consts::PI;

/// Program handle bound to one agent's current qubits.
pub struct AuthorizedCircuit<'a> {
    owner: &'a AgentId,
    owned: &'a BTreeSet<u32>,
    program: &'a SharedProgram,
}

impl<'a> AuthorizedCircuit<'a> {
    pub(crate) fn new(owner: &'a AgentId, owned: &'a BTreeSet<u32>, program: &'a SharedProgram) -> Self {
        Self {
            owner,
            owned,
            program,
        }
    }

    pub fn owner(&self) -> &AgentId {
        self.owner
    }

    /// Appends a parameterless gate, e.g. `gate("CNOT", &[0, 1])`.
    pub fn gate(&self, name: &str, qubits: &[u32]) -> Result<()> {
        self.append(Instruction::gate(name, qubits))
    }

    pub fn gate_with_params(&self, name: &str, params: &[f64], qubits: &[u32]) -> Result<()> {
        self.append(Instruction::gate_with_params(name, params, qubits))
    }

    /// Measures `qubit` into `register[offset]`, widening the register if needed.
    pub fn measure(&self, qubit: u32, register: &str, offset: usize) -> Result<()> {
        self.check(&[qubit])?;
        let mut program = self.program.lock();
        program.declare_register(register, offset + 1);
        program.append_instruction(Instruction::measure(qubit, register, offset));
        Ok(())
    }

    /// Applies `gate` only if `register[offset]` reads 1.
    pub fn conditional(&self, register: &str, offset: usize, gate: Instruction) -> Result<()> {
        self.append(Instruction::Conditional {
            register: register.to_string(),
            offset,
            gate: Box::new(gate),
        })
    }

    /// Declares a classical register. Touches no qubits.
    pub fn declare_register(&self, name: &str, width: usize) {
        self.program.lock().declare_register(name, width);
    }

    /// Appends the quantum Fourier transform over `qubits`, most significant first.
    ///
    /// Emits `H` on each qubit followed by `CPHASE(pi / 2^k)` to every later
    /// qubit, then swaps to restore bit order. All qubits are checked up
    /// front, so a rejected call appends nothing.
    pub fn qft(&self, qubits: &[u32]) -> Result<()> {
        self.check(qubits)?;
        let mut program = self.program.lock();
        for (i, &target) in qubits.iter().enumerate() {
            program.append_instruction(Instruction::gate("H", &[target]));
            for (k, &control) in qubits[i + 1..].iter().enumerate() {
                let angle = PI / 2f64.powi(k as i32 + 1);
                program.append_instruction(Instruction::gate_with_params(
                    "CPHASE",
                    &[angle],
                    &[control, target],
                ));
            }
        }
        let n = qubits.len();
        for i in 0..n / 2 {
            program.append_instruction(Instruction::gate("SWAP", &[qubits[i], qubits[n - 1 - i]]));
        }
        Ok(())
    }

    /// Appends any instruction after checking every qubit it touches.
    pub fn append(&self, instruction: Instruction) -> Result<()> {
        self.check(&instruction.qubits())?;
        self.program.lock().append_instruction(instruction);
        Ok(())
    }

    fn check(&self, qubits: &[u32]) -> Result<()> {
        let foreign: Vec<u32> = qubits
            .iter()
            .copied()
            .filter(|q| !self.owned.contains(q))
            .collect();
        if foreign.is_empty() {
            Ok(())
        } else {
            Err(NetError::ownership(self.owner, &foreign))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::agent::Agent;
    use qnet_env::{CircuitAccumulator, Instruction, NetError, SharedProgram};

    fn agent(qubits: &[u32]) -> (Agent, SharedProgram) {
        let program = SharedProgram::default();
        let agent = Agent::new("alice")
            .with_qubits(qubits)
            .with_circuit(program.clone());
        (agent, program)
    }

    #[test]
    fn test_owned_gate_is_appended() {
        let (alice, program) = agent(&[0, 1]);
        alice.circuit().gate("CNOT", &[0, 1]).unwrap();
        assert_eq!(program.snapshot().instructions(), &[Instruction::gate("CNOT", &[0, 1])]);
    }

    #[test]
    fn test_foreign_gate_never_reaches_program() {
        let (alice, program) = agent(&[0]);
        let err = alice.circuit().gate("CNOT", &[0, 3]).unwrap_err();
        assert!(matches!(err, NetError::Ownership { ref qubits, .. } if qubits == &vec![3]));
        assert!(program.snapshot().is_empty());
    }

    #[test]
    fn test_measure_widens_register() {
        let (alice, program) = agent(&[4]);
        alice.circuit().measure(4, "ro", 2).unwrap();
        let snapshot = program.snapshot();
        assert_eq!(snapshot.register_width("ro"), Some(3));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_conditional_checks_inner_gate() {
        let (alice, program) = agent(&[0]);
        let circuit = alice.circuit();
        assert!(circuit.conditional("ro", 0, Instruction::gate("X", &[0])).is_ok());
        assert!(circuit.conditional("ro", 0, Instruction::gate("X", &[9])).is_err());
        assert_eq!(program.snapshot().len(), 1);
    }

    #[test]
    fn test_qft_shape() {
        let (alice, program) = agent(&[0, 1, 2]);
        alice.circuit().qft(&[0, 1, 2]).unwrap();
        let text = program.snapshot().to_string();

        // 3 H + 3 CPHASE + 1 SWAP
        assert_eq!(program.snapshot().len(), 7);
        assert!(text.contains("SWAP 0 2"));
        assert!(text.lines().any(|l| l.starts_with("CPHASE(") && l.ends_with(" 2 0")));
    }

    #[test]
    fn test_qft_rejected_atomically() {
        let (alice, program) = agent(&[0, 1]);
        assert!(alice.circuit().qft(&[0, 1, 5]).is_err());
        assert!(program.snapshot().is_empty());
    }

    #[test]
    fn test_declare_register_needs_no_qubits() {
        let (alice, program) = agent(&[]);
        alice.circuit().declare_register("ro", 4);
        assert_eq!(program.snapshot().register_width("ro"), Some(4));
    }
}
