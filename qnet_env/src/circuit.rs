//! Circuit accumulator boundary.
//!
//! Agents and devices never build gates themselves; they append opaque
//! [`Instruction`]s to a shared [`Program`] that an external backend executes
//! after the trial. The program is shared across agent threads behind a mutex
//! ([`SharedProgram`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// One instruction of the cooperative program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// Named gate on one or more qubits, e.g. `CNOT 0 1`
    Gate {
        name: String,
        qubits: Vec<u32>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<f64>,
    },

    /// Measure a qubit into `register[offset]`
    Measure {
        qubit: u32,
        register: String,
        offset: usize,
    },

    /// Gate applied only if `register[offset]` reads 1
    Conditional {
        register: String,
        offset: usize,
        gate: Box<Instruction>,
    },
}

impl Instruction {
    /// Builds a parameterless gate.
    pub fn gate(name: impl Into<String>, qubits: &[u32]) -> Self {
        Instruction::Gate {
            name: name.into(),
            qubits: qubits.to_vec(),
            params: Vec::new(),
        }
    }

    /// Builds a parameterized gate.
    pub fn gate_with_params(name: impl Into<String>, params: &[f64], qubits: &[u32]) -> Self {
        Instruction::Gate {
            name: name.into(),
            qubits: qubits.to_vec(),
            params: params.to_vec(),
        }
    }

    /// Builds a measurement.
    pub fn measure(qubit: u32, register: impl Into<String>, offset: usize) -> Self {
        Instruction::Measure {
            qubit,
            register: register.into(),
            offset,
        }
    }

    /// Every qubit index this instruction touches.
    pub fn qubits(&self) -> Vec<u32> {
        match self {
            Instruction::Gate { qubits, .. } => qubits.clone(),
            Instruction::Measure { qubit, .. } => vec![*qubit],
            Instruction::Conditional { gate, .. } => gate.qubits(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Gate { name, qubits, params } => {
                write!(f, "{}", name)?;
                if !params.is_empty() {
                    let ps: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                    write!(f, "({})", ps.join(", "))?;
                }
                for q in qubits {
                    write!(f, " {}", q)?;
                }
                Ok(())
            }
            Instruction::Measure { qubit, register, offset } => {
                write!(f, "MEASURE {} {}[{}]", qubit, register, offset)
            }
            Instruction::Conditional { register, offset, gate } => {
                write!(f, "IF {}[{}] {}", register, offset, gate)
            }
        }
    }
}

/// The accumulator contract consumed by agents and devices.
pub trait CircuitAccumulator {
    /// Appends an instruction at the end of the program.
    fn append_instruction(&mut self, instruction: Instruction);

    /// Declares a classical register. Redeclaring an existing register widens
    /// it to `width` if larger and is otherwise a no-op.
    fn declare_register(&mut self, name: &str, width: usize);

    /// Width of a declared register.
    fn register_width(&self, name: &str) -> Option<usize>;
}

/// In-memory program: declared registers plus an ordered instruction list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Registers in declaration order
    registers: Vec<(String, usize)>,

    /// Instructions in append order
    instructions: Vec<Instruction>,
}

impl Program {
    /// Creates an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn registers(&self) -> &[(String, usize)] {
        &self.registers
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Highest qubit index referenced by any instruction, if any.
    pub fn max_qubit(&self) -> Option<u32> {
        self.instructions
            .iter()
            .flat_map(|i| i.qubits())
            .max()
    }
}

impl CircuitAccumulator for Program {
    fn append_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn declare_register(&mut self, name: &str, width: usize) {
        match self.registers.iter_mut().find(|(n, _)| n == name) {
            Some((_, w)) => *w = (*w).max(width),
            None => self.registers.push((name.to_string(), width)),
        }
    }

    fn register_width(&self, name: &str) -> Option<usize> {
        self.registers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, w)| *w)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, width) in &self.registers {
            writeln!(f, "DECLARE {} BIT[{}]", name, width)?;
        }
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

/// Shared handle to the program being built during one trial.
///
/// Every agent of a simulation holds a clone of the same handle; all writes
/// go through the mutex.
#[derive(Debug, Clone, Default)]
pub struct SharedProgram {
    inner: Arc<Mutex<Program>>,
}

impl SharedProgram {
    /// Wraps a program in a new shared handle.
    pub fn new(program: Program) -> Self {
        Self {
            inner: Arc::new(Mutex::new(program)),
        }
    }

    /// Locks the program for writing.
    ///
    /// A poisoned lock is recovered: a panicking agent cannot leave an
    /// instruction half-appended, so the data is still consistent.
    pub fn lock(&self) -> MutexGuard<'_, Program> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clones the current program.
    pub fn snapshot(&self) -> Program {
        self.lock().clone()
    }

    /// True if both handles point at the same accumulator.
    pub fn same_as(&self, other: &SharedProgram) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_register_widens() {
        let mut program = Program::new();
        program.declare_register("ro", 2);
        program.declare_register("ro", 1);
        assert_eq!(program.register_width("ro"), Some(2));
        program.declare_register("ro", 3);
        assert_eq!(program.register_width("ro"), Some(3));
        assert_eq!(program.registers().len(), 1);
    }

    #[test]
    fn test_program_display() {
        let mut program = Program::new();
        program.declare_register("ro", 1);
        program.append_instruction(Instruction::gate("H", &[0]));
        program.append_instruction(Instruction::gate_with_params("RZ", &[1.5], &[2]));
        program.append_instruction(Instruction::measure(0, "ro", 0));
        program.append_instruction(Instruction::Conditional {
            register: "ro".into(),
            offset: 0,
            gate: Box::new(Instruction::gate("X", &[1])),
        });

        let text = program.to_string();
        assert!(text.contains("DECLARE ro BIT[1]"));
        assert!(text.contains("H 0"));
        assert!(text.contains("RZ(1.5) 2"));
        assert!(text.contains("MEASURE 0 ro[0]"));
        assert!(text.contains("IF ro[0] X 1"));
        assert_eq!(program.max_qubit(), Some(2));
    }

    #[test]
    fn test_shared_program_across_threads() {
        let shared = SharedProgram::default();
        std::thread::scope(|s| {
            for q in 0..8u32 {
                let handle = shared.clone();
                s.spawn(move || handle.lock().append_instruction(Instruction::gate("X", &[q])));
            }
        });
        assert_eq!(shared.snapshot().len(), 8);
    }

    #[test]
    fn test_same_as_is_identity() {
        let a = SharedProgram::default();
        let b = a.clone();
        let c = SharedProgram::default();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
