use std::collections::BTreeMap;

use crate::util::blueprint::StagnationConfig;

use super::{
    population::Population,
    species::{Species, SpeciesId},
};

/// Decides which species have stopped improving and should be culled
pub trait Stagnation<G> {
    /// Update species fitness bookkeeping for `generation` and return every
    /// species id paired with its stagnation verdict, worst species first.
    fn update(
        &self,
        species: &mut BTreeMap<SpeciesId, Species<G>>,
        population: &Population<G>,
        generation: usize,
    ) -> Vec<(SpeciesId, bool)>;
}

/// A species stagnates after `max_stagnation` generations without a new best
/// species fitness. The `species_elitism` fittest species are never culled.
#[derive(Debug, Clone)]
pub struct MaxStagnation {
    config: StagnationConfig,
}

impl MaxStagnation {
    pub fn new(config: StagnationConfig) -> Self {
        Self { config }
    }
}

impl<G> Stagnation<G> for MaxStagnation {
    fn update(
        &self,
        species: &mut BTreeMap<SpeciesId, Species<G>>,
        population: &Population<G>,
        generation: usize,
    ) -> Vec<(SpeciesId, bool)> {
        let mut ranked = Vec::with_capacity(species.len());
        for (sid, s) in species.iter_mut() {
            let prev_fitness = s.fitness_history.iter().copied().reduce(f64::max);
            let fitness = self
                .config
                .species_fitness_func
                .aggregate(s.member_individuals(population).map(|x| x.rank_fitness()))
                .unwrap_or(f64::NEG_INFINITY);
            s.fitness = Some(fitness);
            s.fitness_history.push(fitness);
            s.adjusted_fitness = None;
            if prev_fitness.is_none_or(|prev| fitness > prev) {
                s.last_improved = generation;
            }
            ranked.push((*sid, fitness, s.last_improved));
        }

        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        let total = ranked.len();
        let mut num_non_stagnant = total;
        ranked
            .into_iter()
            .enumerate()
            .map(|(ix, (sid, _, last_improved))| {
                let mut is_stagnant = false;
                if num_non_stagnant > self.config.species_elitism {
                    is_stagnant =
                        generation.saturating_sub(last_improved) >= self.config.max_stagnation;
                }
                if total - ix <= self.config.species_elitism {
                    is_stagnant = false;
                }
                if is_stagnant {
                    num_non_stagnant -= 1;
                }
                (sid, is_stagnant)
            })
            .collect()
    }
}
