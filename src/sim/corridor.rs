//! Built-in cell model of the three-intersection corridor.
//!
//! Every intersection has one inbound lane per approach. A lane is a row of
//! [`LANE_CELLS`] cells of [`CELL_LENGTH`] metres, cell 0 being the stop line.
//! Vehicles advance at most one cell per step and only into a free cell, and
//! cross the stop line while their approach shows `G`. Crossing puts the
//! vehicle at the upstream end of the next lane of its route, or takes it out
//! of the network after its last intersection.

use std::collections::{BTreeMap, VecDeque};

use anyhow::{Context, Result, bail};
use strum::VariantArray;
use tracing::trace;

use crate::role::{AgentRole, RoleMap};

use super::{
    flow::{self, Approach},
    simulator::{Simulator, parse_detector_id},
};

pub const LANE_CELLS: usize = 24;
pub const CELL_LENGTH: f64 = 7.5;
/// Cell holding each lane's induction loop
pub const DETECTOR_CELL: usize = 2;

const GREEN_DURATION: u64 = 30;
const YELLOW_DURATION: u64 = 3;

type Hop = (AgentRole, Approach);

/// Route names and the inbound lanes they use, in travel order
pub const ROUTES: [(&str, &[Hop]); 14] = {
    use AgentRole::{CC, EC, WC};
    use Approach::{E, N, S, W};
    // CC has no southern arm
    [
        ("route_0", &[(WC, W), (CC, W), (EC, W)]),
        ("route_1", &[(EC, E), (CC, E), (WC, E)]),
        ("route_2", &[(WC, N)]),
        ("route_3", &[(WC, S)]),
        ("route_4", &[(CC, N)]),
        ("route_5", &[(CC, N), (EC, W)]),
        ("route_6", &[(EC, N)]),
        ("route_7", &[(EC, S)]),
        ("route_8", &[(WC, N), (CC, W), (EC, W)]),
        ("route_9", &[(EC, S), (CC, E), (WC, E)]),
        ("route_10", &[(WC, W), (CC, W)]),
        ("route_11", &[(EC, E), (CC, E)]),
        ("route_12", &[(CC, N), (WC, E)]),
        ("route_13", &[(EC, N), (CC, E), (WC, E)]),
    ]
};

pub fn detector_id(role: AgentRole, approach: Approach) -> String {
    format!("{}_e1_{}", role, approach)
}

#[derive(Clone, Debug)]
struct SignalPhase {
    state: String,
    duration: u64,
}

/// Fixed-time program derived from the flow table. An approach is green
/// whenever its phase sends cars out of it, and yellow for one phase after
/// losing green.
#[derive(Clone, Debug)]
struct Signal {
    program: Vec<SignalPhase>,
    phase: usize,
    next_switch: u64,
}

impl Signal {
    fn new(role: AgentRole) -> Self {
        let flows = flow::flows(role);
        let program = flows
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let prev = flows[(i + flows.len() - 1) % flows.len()];
                let state = f
                    .iter()
                    .zip(prev)
                    .map(|(&now, before)| match (now > 0, before > 0) {
                        (true, _) => 'G',
                        (false, true) => 'y',
                        (false, false) => 'r',
                    })
                    .collect::<String>();
                let duration = if state.contains('y') {
                    YELLOW_DURATION
                } else {
                    GREEN_DURATION
                };
                SignalPhase { state, duration }
            })
            .collect::<Vec<_>>();
        let next_switch = program[0].duration;

        Self {
            program,
            phase: 0,
            next_switch,
        }
    }

    fn state(&self) -> &str {
        &self.program[self.phase].state
    }

    fn is_green(&self, approach: Approach) -> bool {
        self.state().as_bytes()[approach.ix()] == b'G'
    }
}

#[derive(Clone, Copy, Debug)]
struct Vehicle {
    route: usize,
    hop: usize,
    pos: usize,
    speed: f64,
    moved_at: u64,
}

#[derive(Clone, Debug, Default)]
struct DetectorReading {
    vehicles: Vec<String>,
    mean_speed: f64,
}

enum Move {
    Stay,
    Advance,
    Transfer(Hop),
    Exit,
}

/// Deterministic [`Simulator`] of the corridor
#[derive(Debug)]
pub struct CorridorSim {
    time: u64,
    closed: bool,
    signals: RoleMap<Signal>,
    lanes: RoleMap<[VecDeque<String>; 4]>,
    was_green: RoleMap<[bool; 4]>,
    vehicles: BTreeMap<String, Vehicle>,
    pending: VecDeque<(String, usize)>,
    emergency: Vec<String>,
    detectors: RoleMap<[DetectorReading; 4]>,
}

impl CorridorSim {
    pub fn new() -> Self {
        Self {
            time: 0,
            closed: false,
            signals: RoleMap::from_fn(Signal::new),
            lanes: RoleMap::default(),
            was_green: RoleMap::default(),
            vehicles: BTreeMap::new(),
            pending: VecDeque::new(),
            emergency: Vec::new(),
            detectors: RoleMap::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn signal(&self, tls: &str) -> Result<&Signal> {
        let role = parse_role(tls)?;
        Ok(&self.signals[role])
    }

    fn signal_mut(&mut self, tls: &str) -> Result<&mut Signal> {
        let role = parse_role(tls)?;
        Ok(&mut self.signals[role])
    }

    fn vehicle(&self, id: &str) -> Result<&Vehicle> {
        self.vehicles
            .get(id)
            .with_context(|| format!("Unknown vehicle `{}`", id))
    }

    fn detector(&self, id: &str) -> Result<&DetectorReading> {
        let (role, approach) =
            parse_detector_id(id).with_context(|| format!("Unknown detector `{}`", id))?;
        Ok(&self.detectors[role][approach.ix()])
    }

    fn entry_free(&self, (role, approach): Hop) -> bool {
        self.lanes[role][approach.ix()]
            .back()
            .and_then(|id| self.vehicles.get(id))
            .is_none_or(|v| v.pos < LANE_CELLS - 1)
    }

    fn switch_signals(&mut self) {
        for (role, signal) in self.signals.iter_mut() {
            if self.time >= signal.next_switch {
                signal.phase = (signal.phase + 1) % signal.program.len();
                signal.next_switch = self.time + signal.program[signal.phase].duration;
                trace!("{} switched to phase {}", role, signal.phase);
            }
        }
    }

    fn move_vehicles(&mut self) {
        let tick = self.time;
        for role in AgentRole::all() {
            for &approach in Approach::VARIANTS {
                let green = self.signals[role].is_green(approach);
                let lost_green = self.was_green[role][approach.ix()] && !green;
                self.was_green[role][approach.ix()] = green;

                let mut lane = std::mem::take(&mut self.lanes[role][approach.ix()]);
                let mut kept = VecDeque::with_capacity(lane.len());
                let mut ahead: Option<usize> = None;

                while let Some(id) = lane.pop_front() {
                    let Some(mut v) = self.vehicles.get(&id).copied() else {
                        continue;
                    };
                    if v.moved_at == tick {
                        ahead = Some(v.pos);
                        kept.push_back(id);
                        continue;
                    }

                    let step = if v.pos == 0 {
                        if green {
                            match ROUTES[v.route].1.get(v.hop + 1) {
                                None => Move::Exit,
                                Some(&hop) if self.entry_free(hop) => Move::Transfer(hop),
                                Some(_) => Move::Stay,
                            }
                        } else {
                            Move::Stay
                        }
                    } else if ahead.is_none_or(|p| p + 1 < v.pos) {
                        Move::Advance
                    } else {
                        Move::Stay
                    };

                    match step {
                        Move::Exit => {
                            self.vehicles.remove(&id);
                        }
                        Move::Transfer((next_role, next_approach)) => {
                            v.hop += 1;
                            v.pos = LANE_CELLS - 1;
                            v.speed = CELL_LENGTH;
                            v.moved_at = tick;
                            self.vehicles.insert(id.clone(), v);
                            self.lanes[next_role][next_approach.ix()].push_back(id);
                        }
                        Move::Advance => {
                            v.pos -= 1;
                            v.speed = CELL_LENGTH;
                            v.moved_at = tick;
                            ahead = Some(v.pos);
                            self.vehicles.insert(id.clone(), v);
                            kept.push_back(id);
                        }
                        Move::Stay => {
                            if v.speed > 0.0 && lost_green && v.pos <= 1 {
                                self.emergency.push(id.clone());
                            }
                            v.speed = 0.0;
                            ahead = Some(v.pos);
                            self.vehicles.insert(id.clone(), v);
                            kept.push_back(id);
                        }
                    }
                }

                // Transfers from lanes processed earlier landed behind `lane`'s
                // own vehicles
                kept.extend(std::mem::take(&mut self.lanes[role][approach.ix()]));
                self.lanes[role][approach.ix()] = kept;
            }
        }
    }

    fn insert_pending(&mut self) {
        let mut waiting = VecDeque::new();
        while let Some((id, route)) = self.pending.pop_front() {
            let (role, approach) = ROUTES[route].1[0];
            if self.entry_free((role, approach)) {
                self.vehicles.insert(
                    id.clone(),
                    Vehicle {
                        route,
                        hop: 0,
                        pos: LANE_CELLS - 1,
                        speed: CELL_LENGTH,
                        moved_at: self.time,
                    },
                );
                self.lanes[role][approach.ix()].push_back(id);
            } else {
                waiting.push_back((id, route));
            }
        }
        self.pending = waiting;
    }

    fn read_detectors(&mut self) {
        for role in AgentRole::all() {
            for &approach in Approach::VARIANTS {
                let vehicles = self.lanes[role][approach.ix()]
                    .iter()
                    .filter(|id| self.vehicles.get(*id).is_some_and(|v| v.pos == DETECTOR_CELL))
                    .cloned()
                    .collect::<Vec<_>>();
                let mean_speed = if vehicles.is_empty() {
                    -1.0
                } else {
                    vehicles
                        .iter()
                        .filter_map(|id| self.vehicles.get(id))
                        .map(|v| v.speed)
                        .sum::<f64>()
                        / vehicles.len() as f64
                };
                self.detectors[role][approach.ix()] = DetectorReading {
                    vehicles,
                    mean_speed,
                };
            }
        }
    }
}

impl Default for CorridorSim {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_role(tls: &str) -> Result<AgentRole> {
    tls.parse::<AgentRole>()
        .with_context(|| format!("Unknown traffic light `{}`", tls))
}

impl Simulator for CorridorSim {
    fn time(&self) -> f64 {
        self.time as f64
    }

    fn advance(&mut self) -> Result<()> {
        if self.closed {
            bail!("Simulation is closed");
        }
        self.emergency.clear();
        self.switch_signals();
        self.time += 1;
        self.move_vehicles();
        self.insert_pending();
        self.read_detectors();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!("Simulation is already closed");
        }
        self.closed = true;
        self.vehicles.clear();
        self.pending.clear();
        Ok(())
    }

    fn add_vehicle(&mut self, id: &str, route: &str) -> Result<()> {
        let Some(route) = ROUTES.iter().position(|(name, _)| *name == route) else {
            bail!("Unknown route `{}`", route);
        };
        if self.vehicles.contains_key(id) || self.pending.iter().any(|(p, _)| p == id) {
            bail!("Vehicle `{}` already exists", id);
        }
        self.pending.push_back((id.to_string(), route));
        Ok(())
    }

    fn vehicle_ids(&self) -> Result<Vec<String>> {
        Ok(self.vehicles.keys().cloned().collect())
    }

    fn is_stopped(&self, vehicle: &str) -> Result<bool> {
        Ok(self.vehicle(vehicle)?.speed == 0.0)
    }

    fn next_tls(&self, vehicle: &str) -> Result<Option<String>> {
        let v = self.vehicle(vehicle)?;
        Ok(ROUTES[v.route]
            .1
            .get(v.hop)
            .map(|(role, _)| role.to_string()))
    }

    fn emergency_stopping_vehicles(&self) -> Result<Vec<String>> {
        Ok(self.emergency.clone())
    }

    fn detector_ids(&self) -> Result<Vec<String>> {
        Ok(AgentRole::all()
            .flat_map(|role| {
                Approach::VARIANTS
                    .iter()
                    .map(move |&approach| detector_id(role, approach))
            })
            .collect())
    }

    fn detector_vehicle_ids(&self, detector: &str) -> Result<Vec<String>> {
        Ok(self.detector(detector)?.vehicles.clone())
    }

    fn detector_mean_speed(&self, detector: &str) -> Result<f64> {
        Ok(self.detector(detector)?.mean_speed)
    }

    fn tls_ids(&self) -> Result<Vec<String>> {
        Ok(AgentRole::all().map(|role| role.to_string()).collect())
    }

    fn phase(&self, tls: &str) -> Result<usize> {
        Ok(self.signal(tls)?.phase)
    }

    fn phase_count(&self, tls: &str) -> Result<usize> {
        Ok(self.signal(tls)?.program.len())
    }

    fn next_switch(&self, tls: &str) -> Result<f64> {
        Ok(self.signal(tls)?.next_switch as f64)
    }

    fn signal_state(&self, tls: &str) -> Result<String> {
        Ok(self.signal(tls)?.state().to_string())
    }

    fn set_phase(&mut self, tls: &str, phase: usize) -> Result<()> {
        let time = self.time;
        let signal = self.signal_mut(tls)?;
        if phase >= signal.program.len() {
            bail!("Phase {} out of range for `{}`", phase, tls);
        }
        signal.phase = phase;
        signal.next_switch = time + signal.program[phase].duration;
        Ok(())
    }

    fn set_phase_duration(&mut self, tls: &str, duration: f64) -> Result<()> {
        if !duration.is_finite() || duration < 0.0 {
            bail!("Invalid phase duration {} for `{}`", duration, tls);
        }
        let time = self.time;
        let signal = self.signal_mut(tls)?;
        signal.next_switch = time + duration.ceil() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_programs_follow_flow_table() -> Result<()> {
        let sim = CorridorSim::new();
        assert_eq!(sim.phase_count("WC")?, 8);
        assert_eq!(sim.signal_state("EC")?, "rrGG");
        assert_eq!(sim.next_switch("CC")?, GREEN_DURATION as f64);

        let ec = Signal::new(AgentRole::EC);
        assert_eq!(ec.program[1].state, "rryy");
        assert_eq!(ec.program[1].duration, YELLOW_DURATION);
        assert_eq!(ec.program[2].state, "GGrr");
        Ok(())
    }

    #[test]
    fn phase_duration_counts_from_now() -> Result<()> {
        let mut sim = CorridorSim::new();
        for _ in 0..5 {
            sim.advance()?;
        }
        sim.set_phase("EC", 2)?;
        sim.set_phase_duration("EC", 4.2)?;
        assert_eq!(sim.phase("EC")?, 2);
        assert_eq!(sim.next_switch("EC")?, 10.0);
        assert!(sim.set_phase("EC", 4).is_err());
        Ok(())
    }

    #[test]
    fn vehicle_travels_its_route() -> Result<()> {
        let mut sim = CorridorSim::new();
        sim.add_vehicle("vehicle_0", "route_0")?;
        assert!(sim.vehicle_ids()?.is_empty());

        sim.advance()?;
        assert_eq!(sim.vehicle_ids()?, vec!["vehicle_0".to_string()]);
        assert_eq!(sim.next_tls("vehicle_0")?.as_deref(), Some("WC"));

        let detector = detector_id(AgentRole::WC, Approach::W);
        let mut detected = false;
        for _ in 0..300 {
            sim.advance()?;
            detected |= sim.detector_vehicle_ids(&detector)? == vec!["vehicle_0".to_string()];
            if sim.vehicle_ids()?.is_empty() {
                break;
            }
        }
        assert!(detected);
        assert!(sim.vehicle_ids()?.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_unknown_ids() {
        let mut sim = CorridorSim::new();
        assert!(sim.add_vehicle("v", "route_14").is_err());
        assert!(sim.phase("NC").is_err());
        assert!(sim.detector_vehicle_ids("XX_e1_N").is_err());
        assert!(sim.is_stopped("ghost").is_err());
    }

    #[test]
    fn closed_simulation_refuses_to_advance() -> Result<()> {
        let mut sim = CorridorSim::new();
        sim.close()?;
        assert!(sim.is_closed());
        assert!(sim.advance().is_err());
        assert!(sim.close().is_err());
        Ok(())
    }
}
