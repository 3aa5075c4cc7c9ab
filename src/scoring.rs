//! Fitness evaluation of the three populations through simulation rounds.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::{
    error::TrainError,
    ga::{Genome, GenomeId, Population},
    role::{AgentRole, RoleMap},
    sim::{DecisionPolicyAdapter, PenaltyTable, SimulationEnvironment, Simulator},
    util::blueprint::SimulationConfig,
};

/// Fitness given to a genome whose round produced no score
pub const SENTINEL_FITNESS: f64 = -1500.0;

/// Plays one round with one genome per role
pub fn play_round<G: Genome, S: Simulator>(
    sim: S,
    genomes: RoleMap<&G>,
    genome_config: &G::Config,
    config: &SimulationConfig,
) -> Result<PenaltyTable> {
    let policies = genomes
        .map(|_, genome| DecisionPolicyAdapter::new(Box::new(genome.network(genome_config))));
    SimulationEnvironment::new(sim, config.clone()).run(policies)
}

/// Writes one round's scores to the genomes that played it. An undefined
/// score becomes [`SENTINEL_FITNESS`].
pub fn assign_scores<G>(
    populations: &mut RoleMap<Population<G>>,
    keys: &RoleMap<GenomeId>,
    scores: &RoleMap<Option<f64>>,
) {
    for (role, &key) in keys.iter() {
        let fitness = scores[role].unwrap_or_else(|| {
            warn!(
                "{}, setting fitness of genome {} to {}",
                TrainError::UndefinedScore(role),
                key,
                SENTINEL_FITNESS
            );
            SENTINEL_FITNESS
        });
        if let Some(individual) = populations[role].get_mut(key) {
            individual.fitness = Some(fitness);
        }
    }
}

/// Scores every genome of every population.
///
/// Round `i` plays genome `i % len` of each population, so the round count is
/// the largest population size and members of smaller populations play more
/// than once. A reused genome keeps the score of its last round. A round cut
/// short by invalid policy output scores all three of its genomes with
/// [`SENTINEL_FITNESS`].
pub fn score_genomes<G, S>(
    populations: &mut RoleMap<Population<G>>,
    genome_config: &G::Config,
    config: &SimulationConfig,
    generation: usize,
    mut new_sim: impl FnMut() -> S,
) -> Result<()>
where
    G: Genome,
    S: Simulator,
{
    let keys = RoleMap::from_fn(|role| populations[role].keys().collect::<Vec<_>>());
    if keys.values().any(Vec::is_empty) {
        warn!("Generation {}: a population is empty, skipping evaluation", generation);
        return Ok(());
    }
    let rounds = keys.values().map(Vec::len).max().unwrap_or(0);
    debug!("Generation {}: playing {} rounds", generation, rounds);

    for i in 0..rounds {
        let round_keys = RoleMap::from_fn(|role| keys[role][i % keys[role].len()]);
        let genomes = RoleMap::try_from_fn(|role: AgentRole| {
            populations[role]
                .get(round_keys[role])
                .map(|x| &x.genome)
                .with_context(|| format!("Genome {} missing from {}", round_keys[role], role))
        })?;

        let scores = match play_round(new_sim(), genomes, genome_config, config) {
            Ok(penalties) => penalties.scores(),
            Err(e) if matches!(e.downcast_ref::<TrainError>(), Some(TrainError::PolicyOutput(_))) => {
                warn!("Round {} of generation {} aborted: {}", i, generation, e);
                RoleMap::default()
            }
            Err(e) => return Err(e),
        };
        debug!(
            "Round {}: genomes {:?} scored {:?}",
            i,
            round_keys.values().collect::<Vec<_>>(),
            scores.values().collect::<Vec<_>>()
        );
        assign_scores(populations, &round_keys, &scores);
    }

    Ok(())
}
