//! Coevolutionary training of traffic-signal controllers for a
//! three-intersection corridor.

pub mod coevolution;
pub mod error;
pub mod experiment;
pub mod ga;
pub mod role;
pub mod scoring;
pub mod sim;
pub mod util;

pub use coevolution::{Coevolution, RoleOutcome};
pub use error::TrainError;
pub use role::{AgentRole, RoleMap};
pub use util::{PopEvaluation, blueprint};
