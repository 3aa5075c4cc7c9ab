use anyhow::{Context, Result};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, trace, warn};

use crate::{
    role::{AgentRole, RoleMap},
    util::blueprint::SimulationConfig,
};

use super::{
    flow,
    penalty::PenaltyTable,
    policy::{DecisionPolicyAdapter, Observation, TriggerSource},
    simulator::{Simulator, parse_detector_id},
    tracker::{Credit, VehicleTracker},
};

/// Everything one scoring round accumulates while it steps the simulator
#[derive(Debug, Default)]
pub struct SimulationState {
    pub step: u64,
    pub vehicles_added: u64,
    pub tracker: VehicleTracker,
    pub penalties: PenaltyTable,
    /// Vehicles served since each role's last decision
    pub served: RoleMap<u32>,
    /// Positive detector mean speeds seen this round
    pub speed_samples: RoleMap<Vec<f64>>,
    /// Step of the last credited arrival per approach, N, S, E, W
    pub last_arrival: RoleMap<[u64; 4]>,
}

/// One scoring round: three policies controlling the corridor's signals
/// against the same seeded traffic.
///
/// The simulator is closed exactly once, when the round finishes or when the
/// environment is dropped on an error path.
pub struct SimulationEnvironment<S: Simulator> {
    sim: S,
    config: SimulationConfig,
    state: SimulationState,
    rng: StdRng,
    closed: bool,
}

impl<S: Simulator> SimulationEnvironment<S> {
    pub fn new(sim: S, config: SimulationConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            sim,
            config,
            state: SimulationState::default(),
            rng,
            closed: false,
        }
    }

    /// Steps the simulation to the horizon and returns the final penalties
    pub fn run(mut self, mut policies: RoleMap<DecisionPolicyAdapter>) -> Result<PenaltyTable> {
        let lights = self
            .sim
            .tls_ids()?
            .into_iter()
            .map(|tls| {
                let role = tls
                    .parse::<AgentRole>()
                    .with_context(|| format!("No policy for traffic light `{}`", tls))?;
                Ok((role, tls))
            })
            .collect::<Result<Vec<_>>>()?;
        let detectors = self
            .sim
            .detector_ids()?
            .into_iter()
            .filter_map(|id| parse_detector_id(&id).map(|(role, approach)| (id, role, approach)))
            .collect::<Vec<_>>();

        loop {
            let step = self.state.step;
            if step > self.config.max_steps {
                final_sweep(&self.sim, &mut self.state)?;
                break;
            }

            if step % self.config.arrival_interval == 0 {
                spawn_arrivals(&mut self.sim, &self.config, &mut self.rng, &mut self.state)?;
            }
            self.sim.advance()?;
            track_vehicles(&self.sim, &mut self.state)?;
            penalize_emergency_stops(&self.sim, &self.config, &mut self.state)?;
            credit_detectors(&self.sim, &detectors, &mut self.state)?;
            trigger_decisions(&mut self.sim, &lights, &mut policies, &mut self.state)?;

            self.state.step += 1;
        }

        self.close()?;
        debug!(
            "Round finished after {} steps, {} vehicles added",
            self.state.step, self.state.vehicles_added
        );
        Ok(std::mem::take(&mut self.state.penalties))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sim.close()
    }
}

impl<S: Simulator> Drop for SimulationEnvironment<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close simulation: {:?}", e);
        }
    }
}

fn spawn_arrivals<S: Simulator>(
    sim: &mut S,
    config: &SimulationConfig,
    rng: &mut StdRng,
    state: &mut SimulationState,
) -> Result<()> {
    let count = rng.random_range(config.min_arrivals..=config.max_arrivals);
    for _ in 0..count {
        let r = rng.random::<f64>();
        let route = if r < config.main_route_probability {
            0
        } else if r < 2.0 * config.main_route_probability {
            1
        } else {
            rng.random_range(2..config.num_routes)
        };
        let id = format!("vehicle_{}", state.vehicles_added);
        sim.add_vehicle(&id, &format!("route_{}", route))?;
        state.vehicles_added += 1;
    }
    trace!("Step {}: {} vehicles added", state.step, count);
    Ok(())
}

fn track_vehicles<S: Simulator>(sim: &S, state: &mut SimulationState) -> Result<()> {
    let ids = sim.vehicle_ids()?;
    for id in &ids {
        let stopped = sim.is_stopped(id)?;
        state.tracker.observe(id, state.step, stopped);
    }
    state.tracker.forget_departed(&ids);
    Ok(())
}

fn penalize_emergency_stops<S: Simulator>(
    sim: &S,
    config: &SimulationConfig,
    state: &mut SimulationState,
) -> Result<()> {
    for vehicle in sim.emergency_stopping_vehicles()? {
        let Some(role) = next_role(sim, &vehicle)? else {
            continue;
        };
        warn!(
            "Emergency stop from vehicle {}, penalising {}",
            vehicle, role
        );
        state.penalties.debit(role, config.emergency_penalty);
    }
    Ok(())
}

fn credit_detectors<S: Simulator>(
    sim: &S,
    detectors: &[(String, AgentRole, flow::Approach)],
    state: &mut SimulationState,
) -> Result<()> {
    let step = state.step;
    for (detector, role, approach) in detectors {
        let speed = sim.detector_mean_speed(detector)?;
        if speed > 0.0 {
            state.speed_samples[*role].push(speed);
        }

        for vehicle in sim.detector_vehicle_ids(detector)? {
            match state.tracker.credit(&vehicle, detector, step) {
                Some(credit @ Credit::Arrival { .. }) => {
                    state.penalties.debit(*role, credit.penalty());
                    state.served[*role] += 1;
                    state.last_arrival[*role][approach.ix()] = step;
                }
                Some(Credit::Repeat) => state.penalties.debit(*role, Credit::Repeat.penalty()),
                None => {}
            }
        }
    }
    Ok(())
}

fn trigger_decisions<S: Simulator>(
    sim: &mut S,
    lights: &[(AgentRole, String)],
    policies: &mut RoleMap<DecisionPolicyAdapter>,
    state: &mut SimulationState,
) -> Result<()> {
    for (role, tls) in lights {
        if sim.next_switch(tls)? - state.step as f64 != 1.0 {
            continue;
        }

        let observation = observe(sim, state, *role, tls, TriggerSource::Timeout)?;
        let decision = policies[*role].decide(&observation)?;

        let phase = sim.phase(tls)?;
        let phase_count = sim.phase_count(tls)?;
        let next_phase = (phase + decision.phase_advance as usize) % phase_count;
        sim.set_phase(tls, next_phase)?;
        sim.set_phase_duration(tls, decision.duration)?;
        state.served[*role] = 0;

        debug!(
            "Step {}: {} phase {} -> {} for {:.1}s",
            state.step, role, phase, next_phase, decision.duration
        );
    }
    Ok(())
}

/// Builds `role`'s observation from the round state and its signal
pub fn observe<S: Simulator>(
    sim: &S,
    state: &SimulationState,
    role: AgentRole,
    tls: &str,
    source: TriggerSource,
) -> Result<Observation> {
    let samples = &state.speed_samples[role];
    let av_speed = if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    };

    Ok(Observation {
        num_cars: state.served[role],
        av_speed,
        dets_time: state.last_arrival[role].map(|t| state.step.saturating_sub(t) as f64),
        car_flow: flow::flow(role, sim.phase(tls)?).unwrap_or_default(),
        yellow_phase: sim.signal_state(tls)?.contains('y'),
        source: Some(source),
    })
}

/// Debits every vehicle still in the network with the time since its last
/// credit, against the intersection it is heading to
fn final_sweep<S: Simulator>(sim: &S, state: &mut SimulationState) -> Result<()> {
    for vehicle in sim.vehicle_ids()? {
        let Some(role) = next_role(sim, &vehicle)? else {
            continue;
        };
        if let Some(record) = state.tracker.get(&vehicle) {
            let outstanding = record.outstanding(state.step);
            state.penalties.debit(role, outstanding);
        }
    }
    Ok(())
}

fn next_role<S: Simulator>(sim: &S, vehicle: &str) -> Result<Option<AgentRole>> {
    sim.next_tls(vehicle)?
        .map(|tls| {
            tls.parse::<AgentRole>()
                .with_context(|| format!("Unknown traffic light `{}`", tls))
        })
        .transpose()
}
