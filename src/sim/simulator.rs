use anyhow::Result;

use crate::role::AgentRole;

use super::flow::Approach;

/// Stepped microscopic traffic simulator driven by a
/// [`SimulationEnvironment`](super::environment::SimulationEnvironment).
///
/// Ids are the simulator's own strings: traffic lights are named after the
/// intersection role, induction loops follow `<ROLE>_<name>_<N|S|E|W>`.
/// Times are in seconds, one step per second.
pub trait Simulator {
    fn time(&self) -> f64;
    fn advance(&mut self) -> Result<()>;
    /// Release the simulator. Called exactly once per round.
    fn close(&mut self) -> Result<()>;

    // Vehicles

    fn add_vehicle(&mut self, id: &str, route: &str) -> Result<()>;
    fn vehicle_ids(&self) -> Result<Vec<String>>;
    fn is_stopped(&self, vehicle: &str) -> Result<bool>;
    /// Next traffic light on the vehicle's route, `None` past the last one
    fn next_tls(&self, vehicle: &str) -> Result<Option<String>>;
    /// Vehicles that had to brake harder than their emergency deceleration
    /// during the last step
    fn emergency_stopping_vehicles(&self) -> Result<Vec<String>>;

    // Induction loops

    fn detector_ids(&self) -> Result<Vec<String>>;
    /// Vehicles over the loop during the last step
    fn detector_vehicle_ids(&self, detector: &str) -> Result<Vec<String>>;
    /// Mean speed of the last step's vehicles, negative when there were none
    fn detector_mean_speed(&self, detector: &str) -> Result<f64>;

    // Traffic lights

    fn tls_ids(&self) -> Result<Vec<String>>;
    fn phase(&self, tls: &str) -> Result<usize>;
    fn phase_count(&self, tls: &str) -> Result<usize>;
    /// Absolute time of the next programmed phase switch
    fn next_switch(&self, tls: &str) -> Result<f64>;
    /// One signal character per controlled link (`G`, `y`, `r`)
    fn signal_state(&self, tls: &str) -> Result<String>;
    fn set_phase(&mut self, tls: &str, phase: usize) -> Result<()>;
    /// Remaining duration of the current phase, counted from now
    fn set_phase_duration(&mut self, tls: &str, duration: f64) -> Result<()>;
}

/// Splits an induction loop id into the intersection and approach it watches
pub fn parse_detector_id(id: &str) -> Option<(AgentRole, Approach)> {
    let mut parts = id.split('_');
    let role = parts.next()?.parse::<AgentRole>().ok()?;
    let approach = parts.next_back()?.parse::<Approach>().ok()?;
    Some((role, approach))
}
