//! Discrete-event scoring rounds over the signalized corridor.

pub mod corridor;
pub mod environment;
pub mod flow;
pub mod penalty;
pub mod policy;
pub mod simulator;
pub mod tracker;

pub use corridor::CorridorSim;
pub use environment::SimulationEnvironment;
pub use penalty::PenaltyTable;
pub use policy::{Decision, DecisionPolicyAdapter, OBSERVATION_LEN, Observation, Policy};
pub use simulator::Simulator;
