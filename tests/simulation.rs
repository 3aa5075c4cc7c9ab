use std::{cell::Cell, rc::Rc};

use anyhow::{Result, bail};
use rand::{SeedableRng, rngs::StdRng};
use signet::{
    AgentRole, RoleMap, TrainError,
    blueprint::{Blueprint, SimulationConfig},
    ga::{FeedForwardGenome, Genome, Individual, Population},
    scoring::{SENTINEL_FITNESS, assign_scores, score_genomes},
    sim::{
        CorridorSim, Decision, DecisionPolicyAdapter, Observation, PenaltyTable, Policy,
        SimulationEnvironment, Simulator, flow,
        tracker::{Credit, VehicleTracker},
    },
};

/// Always answers with the same outputs
struct ConstantPolicy(Vec<f64>);

impl Policy for ConstantPolicy {
    fn activate(&mut self, _: &[f64]) -> Vec<f64> {
        self.0.clone()
    }
}

fn constant_policies(outputs: &[f64]) -> RoleMap<DecisionPolicyAdapter> {
    RoleMap::from_fn(|_| DecisionPolicyAdapter::new(Box::new(ConstantPolicy(outputs.to_vec()))))
}

/// Counts `close` calls and can fail `advance` at a given time
struct Probe {
    inner: CorridorSim,
    closes: Rc<Cell<u32>>,
    fail_at: Option<f64>,
}

impl Probe {
    fn new(fail_at: Option<f64>) -> (Self, Rc<Cell<u32>>) {
        let closes = Rc::new(Cell::new(0));
        let probe = Self {
            inner: CorridorSim::new(),
            closes: Rc::clone(&closes),
            fail_at,
        };
        (probe, closes)
    }
}

impl Simulator for Probe {
    fn time(&self) -> f64 {
        self.inner.time()
    }

    fn advance(&mut self) -> Result<()> {
        if self.fail_at == Some(self.inner.time()) {
            bail!("connection lost");
        }
        self.inner.advance()
    }

    fn close(&mut self) -> Result<()> {
        self.closes.set(self.closes.get() + 1);
        self.inner.close()
    }

    fn add_vehicle(&mut self, id: &str, route: &str) -> Result<()> {
        self.inner.add_vehicle(id, route)
    }

    fn vehicle_ids(&self) -> Result<Vec<String>> {
        self.inner.vehicle_ids()
    }

    fn is_stopped(&self, vehicle: &str) -> Result<bool> {
        self.inner.is_stopped(vehicle)
    }

    fn next_tls(&self, vehicle: &str) -> Result<Option<String>> {
        self.inner.next_tls(vehicle)
    }

    fn emergency_stopping_vehicles(&self) -> Result<Vec<String>> {
        self.inner.emergency_stopping_vehicles()
    }

    fn detector_ids(&self) -> Result<Vec<String>> {
        self.inner.detector_ids()
    }

    fn detector_vehicle_ids(&self, detector: &str) -> Result<Vec<String>> {
        self.inner.detector_vehicle_ids(detector)
    }

    fn detector_mean_speed(&self, detector: &str) -> Result<f64> {
        self.inner.detector_mean_speed(detector)
    }

    fn tls_ids(&self) -> Result<Vec<String>> {
        self.inner.tls_ids()
    }

    fn phase(&self, tls: &str) -> Result<usize> {
        self.inner.phase(tls)
    }

    fn phase_count(&self, tls: &str) -> Result<usize> {
        self.inner.phase_count(tls)
    }

    fn next_switch(&self, tls: &str) -> Result<f64> {
        self.inner.next_switch(tls)
    }

    fn signal_state(&self, tls: &str) -> Result<String> {
        self.inner.signal_state(tls)
    }

    fn set_phase(&mut self, tls: &str, phase: usize) -> Result<()> {
        self.inner.set_phase(tls, phase)
    }

    fn set_phase_duration(&mut self, tls: &str, duration: f64) -> Result<()> {
        self.inner.set_phase_duration(tls, duration)
    }
}

/// One vehicle parked on `WC_e1_W` for the whole round, heading to `CC`.
/// It stops on step 3 and brakes hard on step 2. Signals never switch.
#[derive(Default)]
struct ScriptedCorridor {
    advances: u64,
}

impl ScriptedCorridor {
    /// Index of the step currently being played
    fn step(&self) -> u64 {
        self.advances.saturating_sub(1)
    }
}

impl Simulator for ScriptedCorridor {
    fn time(&self) -> f64 {
        self.advances as f64
    }

    fn advance(&mut self) -> Result<()> {
        self.advances += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn add_vehicle(&mut self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    fn vehicle_ids(&self) -> Result<Vec<String>> {
        Ok(vec!["vehicle_0".into()])
    }

    fn is_stopped(&self, _: &str) -> Result<bool> {
        Ok(self.step() == 3)
    }

    fn next_tls(&self, _: &str) -> Result<Option<String>> {
        Ok(Some("CC".into()))
    }

    fn emergency_stopping_vehicles(&self) -> Result<Vec<String>> {
        Ok(if self.step() == 2 {
            vec!["vehicle_0".into()]
        } else {
            vec![]
        })
    }

    fn detector_ids(&self) -> Result<Vec<String>> {
        Ok(vec!["WC_e1_W".into()])
    }

    fn detector_vehicle_ids(&self, _: &str) -> Result<Vec<String>> {
        Ok(vec!["vehicle_0".into()])
    }

    fn detector_mean_speed(&self, _: &str) -> Result<f64> {
        Ok(0.0)
    }

    fn tls_ids(&self) -> Result<Vec<String>> {
        Ok(AgentRole::all().map(|role| role.to_string()).collect())
    }

    fn phase(&self, _: &str) -> Result<usize> {
        Ok(0)
    }

    fn phase_count(&self, _: &str) -> Result<usize> {
        Ok(4)
    }

    fn next_switch(&self, _: &str) -> Result<f64> {
        Ok(1000.0)
    }

    fn signal_state(&self, _: &str) -> Result<String> {
        Ok("GGrr".into())
    }

    fn set_phase(&mut self, _: &str, _: usize) -> Result<()> {
        bail!("no decision is due")
    }

    fn set_phase_duration(&mut self, _: &str, _: f64) -> Result<()> {
        bail!("no decision is due")
    }
}

fn run_round(outputs: &[f64]) -> Result<PenaltyTable> {
    SimulationEnvironment::new(CorridorSim::new(), SimulationConfig::default())
        .run(constant_policies(outputs))
}

#[test]
fn flow_table_covers_every_phase() -> Result<()> {
    let sim = CorridorSim::new();
    for role in AgentRole::all() {
        let count = sim.phase_count(&role.to_string())?;
        assert_eq!(count, flow::phase_count(role));
        for phase in 0..count {
            assert!(flow::flow(role, phase).is_some());
            assert_eq!(flow::flow(role, phase), flow::flow(role, phase));
        }
        assert_eq!(flow::flow(role, count), None);
    }
    Ok(())
}

#[test]
fn duration_stays_in_range() {
    for i in 0..=100 {
        let o = i as f64 / 100.0;
        let d = Decision::from_outputs(0.0, o).duration;
        assert!((1.5..=100.0).contains(&d), "{o} -> {d}");
    }
    assert_eq!(Decision::from_outputs(0.0, 0.0).duration, 1.5);
    assert_eq!(Decision::from_outputs(0.0, 1.0).duration, 100.0);
    assert_eq!(Decision::from_outputs(0.0, 0.5).duration, 50.75);
}

#[test]
fn phase_output_rounds_half_to_even() {
    assert_eq!(Decision::from_outputs(0.5, 0.0).phase_advance, 0);
    assert_eq!(Decision::from_outputs(0.49, 0.0).phase_advance, 0);
    assert_eq!(Decision::from_outputs(0.51, 0.0).phase_advance, 1);
    assert_eq!(Decision::from_outputs(1.0, 0.0).phase_advance, 1);
}

#[test]
fn adapter_rejects_invalid_outputs() {
    let obs = Observation::default();
    for outputs in [vec![0.5], vec![1.2, 0.5], vec![0.5, -0.1], vec![f64::NAN, 0.5]] {
        let mut adapter = DecisionPolicyAdapter::new(Box::new(ConstantPolicy(outputs.clone())));
        assert!(
            matches!(adapter.decide(&obs), Err(TrainError::PolicyOutput(_))),
            "{outputs:?}"
        );
    }

    let mut adapter = DecisionPolicyAdapter::new(Box::new(ConstantPolicy(vec![0.6, 0.5])));
    assert_eq!(
        adapter.decide(&obs),
        Ok(Decision {
            phase_advance: 1,
            duration: 50.75
        })
    );
}

#[test]
fn repeat_sighting_costs_one() {
    let mut tracker = VehicleTracker::new();
    tracker.observe("vehicle_0", 3, false);

    let first = tracker.credit("vehicle_0", "WC_e1_W", 10);
    assert_eq!(first, Some(Credit::Arrival { elapsed: 7, stops: 0 }));

    let second = tracker.credit("vehicle_0", "WC_e1_W", 11);
    assert_eq!(second, Some(Credit::Repeat));
    assert_eq!(Credit::Repeat.penalty(), 1.0);

    let next = tracker.credit("vehicle_0", "CC_e1_W", 15);
    assert_eq!(next, Some(Credit::Arrival { elapsed: 4, stops: 0 }));
    assert_eq!(tracker.credit("ghost", "CC_e1_W", 15), None);
}

#[test]
fn stops_are_counted_on_transitions() {
    let mut tracker = VehicleTracker::new();
    for (step, stopped) in [(0, false), (1, true), (2, true), (3, false), (4, true)] {
        tracker.observe("vehicle_1", step, stopped);
    }
    let record = tracker.get("vehicle_1").expect("vehicle is tracked");
    assert_eq!(record.stop_count, 2);
    assert_eq!(record.last_stop_step, Some(4));
    assert!(record.is_stopped);

    let credit = tracker.credit("vehicle_1", "EC_e1_N", 9);
    assert_eq!(credit, Some(Credit::Arrival { elapsed: 9, stops: 2 }));
    assert_eq!(credit.map(Credit::penalty), Some(11.0));

    tracker.forget_departed(&[]);
    assert!(tracker.is_empty());
}

#[test]
fn round_penalties_follow_the_vehicle() -> Result<()> {
    let config = SimulationConfig {
        max_steps: 5,
        min_arrivals: 0,
        max_arrivals: 0,
        ..Default::default()
    };
    let penalties = SimulationEnvironment::new(ScriptedCorridor::default(), config)
        .run(constant_policies(&[0.6, 0.5]))?;

    // free first arrival at step 0, then one per repeat sighting on steps 1..=5
    assert_eq!(penalties.get(AgentRole::WC), -5.0);
    // emergency stop, then the sweep at step 6: one step since the last credit plus one stop
    assert_eq!(penalties.get(AgentRole::CC), -22.0);
    assert_eq!(penalties.get(AgentRole::EC), 0.0);
    Ok(())
}

#[test]
fn invalid_policy_output_scores_the_whole_round_as_sentinel() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    let mut blueprint: Blueprint = toml::from_str(include_str!("../templates/signet.toml"))?;
    blueprint.genome.num_outputs = 1;
    let sizes = RoleMap::from_fn(|role| if role == AgentRole::WC { 2 } else { 1 });
    let mut populations = RoleMap::from_fn(|role| {
        (1..=sizes[role])
            .map(|key| Individual {
                fitness: Some(0.0),
                ..Individual::new(key, FeedForwardGenome::random(&blueprint.genome, &mut rng))
            })
            .collect::<Population<_>>()
    });
    let config = SimulationConfig {
        max_steps: 120,
        ..Default::default()
    };

    score_genomes(&mut populations, &blueprint.genome, &config, 0, CorridorSim::new)?;

    for (role, population) in populations.iter() {
        assert_eq!(population.len() as u64, sizes[role]);
        assert!(
            population.iter().all(|x| x.fitness == Some(SENTINEL_FITNESS)),
            "{role}"
        );
    }
    Ok(())
}

#[test]
fn seeded_rounds_are_identical() -> Result<()> {
    let first = run_round(&[0.6, 0.5])?;
    let second = run_round(&[0.6, 0.5])?;
    assert_eq!(first, second);

    let scores = first.scores();
    for (role, score) in scores.iter() {
        let score = score.expect("penalties are finite");
        assert!(score <= 0.0, "{role}: {score}");
    }
    assert!(scores.values().flatten().sum::<f64>() < 0.0);
    Ok(())
}

#[test]
fn simulator_closed_once_after_round() -> Result<()> {
    let (probe, closes) = Probe::new(None);
    let config = SimulationConfig {
        max_steps: 100,
        ..Default::default()
    };
    SimulationEnvironment::new(probe, config).run(constant_policies(&[0.6, 0.5]))?;
    assert_eq!(closes.get(), 1);
    Ok(())
}

#[test]
fn simulator_closed_once_on_policy_error() {
    let (probe, closes) = Probe::new(None);
    let err = SimulationEnvironment::new(probe, SimulationConfig::default())
        .run(constant_policies(&[0.5]))
        .err()
        .expect("a single output is rejected");
    assert!(matches!(
        err.downcast_ref::<TrainError>(),
        Some(TrainError::PolicyOutput(_))
    ));
    assert_eq!(closes.get(), 1);
}

#[test]
fn simulator_closed_once_on_simulator_error() {
    let (probe, closes) = Probe::new(Some(42.0));
    let result = SimulationEnvironment::new(probe, SimulationConfig::default())
        .run(constant_policies(&[0.6, 0.5]));
    assert!(result.is_err());
    assert_eq!(closes.get(), 1);
}

#[test]
fn undefined_score_becomes_sentinel() {
    let mut rng = StdRng::seed_from_u64(1);
    let blueprint: Blueprint =
        toml::from_str(include_str!("../templates/signet.toml")).expect("template parses");
    let mut populations = RoleMap::from_fn(|_| {
        (1..=2)
            .map(|key| Individual::new(key, FeedForwardGenome::random(&blueprint.genome, &mut rng)))
            .collect::<Population<_>>()
    });

    let keys = RoleMap::from_fn(|_| 2);
    let scores = RoleMap::from_fn(|role| match role {
        AgentRole::CC => None,
        _ => Some(-10.0),
    });
    assign_scores(&mut populations, &keys, &scores);

    assert_eq!(populations[AgentRole::CC].get(2).and_then(|x| x.fitness), Some(SENTINEL_FITNESS));
    assert_eq!(populations[AgentRole::WC].get(2).and_then(|x| x.fitness), Some(-10.0));
    assert_eq!(populations[AgentRole::EC].get(1).and_then(|x| x.fitness), None);
}

#[test]
fn every_genome_is_scored() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(2);
    let blueprint: Blueprint = toml::from_str(include_str!("../templates/signet.toml"))?;
    let sizes = RoleMap::from_fn(|role| if role == AgentRole::WC { 3 } else { 1 });
    let mut populations = RoleMap::from_fn(|role| {
        (1..=sizes[role])
            .map(|key| Individual::new(key, FeedForwardGenome::random(&blueprint.genome, &mut rng)))
            .collect::<Population<_>>()
    });
    let config = SimulationConfig {
        max_steps: 120,
        ..Default::default()
    };

    let mut rounds = 0;
    score_genomes(&mut populations, &blueprint.genome, &config, 0, || {
        rounds += 1;
        CorridorSim::new()
    })?;

    assert_eq!(rounds, 3);
    for (_, population) in populations.iter() {
        assert!(population.iter().all(|x| x.fitness.is_some()));
    }
    Ok(())
}
