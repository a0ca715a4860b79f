//! qnet Core - Agents, Channels and Devices of a Quantum Network
//!
//! The engine behind a discrete-event quantum network simulation:
//! 1. **Agents** own qubits and classical memory and run protocol code on
//!    their own thread
//! 2. **Channels** queue traffic per direction and push qubits through an
//!    ordered device pipeline (source, transit, target)
//! 3. **Devices** (fiber, laser) add delay and lose photons
//! 4. **Clock** keeps the master time and a journal of every transfer
//!
//! Simulated time is pure bookkeeping: channel delays are folded into each
//! agent's local time, nothing ever sleeps.

pub mod agent;
pub mod channel;
pub mod clock;
pub mod device;
pub mod guard;

// Re-export key types for convenience
pub use agent::{Agent, AgentSnapshot, Protocol};
pub use channel::{CChannel, ClassicalDelivery, Delivery, QChannel};
pub use clock::Clock;
pub use device::{
    Device, DeviceChain, DeviceKind, DeviceOutcome, DevicePlacement, DeviceReport, DeviceSpec,
    DeviceStats, Fiber, Laser, SharedDevice, FIBER_LENGTH_DEFAULT, FIBER_REGISTER,
    PULSE_LENGTH_DEFAULT, SIGNAL_SPEED,
};
pub use guard::AuthorizedCircuit;
