use rand::{SeedableRng, rngs::StdRng};
use tracing::debug;

use crate::{role::AgentRole, util::blueprint::ReproductionConfig};

use super::{
    genome::Genome,
    population::{GenomeId, Individual, Population},
    reporter::Reporter,
    selector::Selector,
    species::SpeciesSet,
    stagnation::Stagnation,
};

/// Creates initial populations and breeds the next generation from a
/// speciated, evaluated one
pub trait Reproduction<G: Genome> {
    fn create_new(&mut self, genome_config: &G::Config, pop_size: usize) -> Population<G>;

    /// Returns an empty population, and leaves `species_set` empty, when
    /// every species was culled for stagnation.
    #[allow(clippy::too_many_arguments)]
    fn reproduce<S: SpeciesSet<G>>(
        &mut self,
        genome_config: &G::Config,
        species_set: &mut S,
        population: &Population<G>,
        pop_size: usize,
        generation: usize,
        reporter: &mut dyn Reporter<G>,
        role: AgentRole,
    ) -> Population<G>;
}

/// Elitism plus fitness-proportional offspring allocation across species
pub struct DefaultReproduction<St> {
    config: ReproductionConfig,
    stagnation: St,
    rng: StdRng,
    next_key: GenomeId,
}

impl<St> DefaultReproduction<St> {
    pub fn new(config: ReproductionConfig, stagnation: St, seed: Option<u64>) -> Self {
        Self {
            config,
            stagnation,
            rng: seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64),
            next_key: 1,
        }
    }

    fn next_key(&mut self) -> GenomeId {
        let key = self.next_key;
        self.next_key += 1;
        key
    }
}

impl<G: Genome, St: Stagnation<G>> Reproduction<G> for DefaultReproduction<St> {
    fn create_new(&mut self, genome_config: &G::Config, pop_size: usize) -> Population<G> {
        (0..pop_size)
            .map(|_| {
                let genome = G::random(genome_config, &mut self.rng);
                Individual::new(self.next_key(), genome)
            })
            .collect()
    }

    fn reproduce<S: SpeciesSet<G>>(
        &mut self,
        genome_config: &G::Config,
        species_set: &mut S,
        population: &Population<G>,
        pop_size: usize,
        generation: usize,
        reporter: &mut dyn Reporter<G>,
        role: AgentRole,
    ) -> Population<G> {
        let verdicts = self
            .stagnation
            .update(species_set.species_mut(), population, generation);
        for (sid, stagnant) in verdicts {
            if stagnant && let Some(s) = species_set.species_mut().remove(&sid) {
                reporter.species_stagnant(role, sid, s.members.len());
            }
        }

        if species_set.is_empty() {
            return Population::new();
        }

        // Unscored members count as the worst scored fitness
        let scored = species_set
            .species()
            .values()
            .flat_map(|s| s.member_individuals(population))
            .filter_map(|x| x.fitness.filter(|f| f.is_finite()))
            .collect::<Vec<_>>();
        let min_fitness = scored.iter().copied().reduce(f64::min).unwrap_or(0.0);
        let max_fitness = scored.iter().copied().reduce(f64::max).unwrap_or(0.0);
        let fitness_range = (max_fitness - min_fitness).max(1.0);

        let mut adjusted = Vec::with_capacity(species_set.species().len());
        for s in species_set.species_mut().values_mut() {
            let (sum, n) = s
                .members
                .iter()
                .filter_map(|key| population.get(*key))
                .map(|x| x.fitness.filter(|f| f.is_finite()).unwrap_or(min_fitness))
                .fold((0.0, 0usize), |(sum, n), f| (sum + f, n + 1));
            let mean = if n == 0 { min_fitness } else { sum / n as f64 };
            let af = (mean - min_fitness) / fitness_range;
            s.adjusted_fitness = Some(af);
            adjusted.push(af);
        }

        let spawn_amounts = compute_spawn(&adjusted, pop_size, self.config.min_species_size);
        debug!("[{}] spawn amounts {:?}", role, spawn_amounts);

        let mut next = Population::new();
        for (s, spawn) in species_set.species().values().zip(spawn_amounts) {
            let mut members = s.member_individuals(population).collect::<Vec<_>>();
            if members.is_empty() {
                continue;
            }
            members.sort_by(|a, b| b.rank_fitness().total_cmp(&a.rank_fitness()));

            let num_elites = self.config.elitism.min(spawn);
            for elite in &members[..num_elites.min(members.len())] {
                next.insert(Individual::new(elite.key, elite.genome.clone()));
            }
            let spawn = spawn - num_elites.min(members.len());
            if spawn == 0 {
                continue;
            }

            let cutoff = ((self.config.survival_threshold * members.len() as f64).ceil() as usize)
                .max(2)
                .min(members.len());
            let parents = &members[..cutoff];
            let selector = Selector::new(self.config.selection_method, parents);

            for _ in 0..spawn {
                let p1 = selector.select(&mut self.rng);
                let p2 = selector.select(&mut self.rng);
                let (fitter, other) = if p1.rank_fitness() >= p2.rank_fitness() {
                    (p1, p2)
                } else {
                    (p2, p1)
                };
                let mut child = fitter
                    .genome
                    .crossover(&other.genome, genome_config, &mut self.rng);
                child.mutate(genome_config, &mut self.rng);
                let key = self.next_key();
                next.insert(Individual::new(key, child));
            }
        }

        next
    }
}

/// Offspring count per species, proportional to adjusted fitness, at least
/// `min_species_size` where the total allows it, and summing to `pop_size`.
pub fn compute_spawn(adjusted: &[f64], pop_size: usize, min_species_size: usize) -> Vec<usize> {
    let n = adjusted.len();
    if n == 0 {
        return Vec::new();
    }

    let af_sum = adjusted.iter().sum::<f64>();
    let shares = if af_sum > 0.0 {
        adjusted
            .iter()
            .map(|af| af / af_sum * pop_size as f64)
            .collect::<Vec<_>>()
    } else {
        vec![pop_size as f64 / n as f64; n]
    };

    let mut spawn = shares
        .iter()
        .map(|s| (s.floor() as usize).max(min_species_size))
        .collect::<Vec<_>>();
    let mut total = spawn.iter().sum::<usize>();

    while total > pop_size {
        let ix = argmax(spawn.iter().map(|&s| s as f64));
        spawn[ix] -= 1;
        total -= 1;
    }
    while total < pop_size {
        let ix = argmax(shares.iter().zip(&spawn).map(|(share, &s)| share - s as f64));
        spawn[ix] += 1;
        total += 1;
    }

    spawn
}

/// Index of the first maximum
fn argmax(values: impl Iterator<Item = f64>) -> usize {
    values
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| {
            if v > bv { (i, v) } else { (bi, bv) }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_sums_to_pop_size() {
        for (adjusted, pop_size, min) in [
            (vec![0.0, 0.0, 0.0], 10, 2),
            (vec![0.9, 0.1], 15, 2),
            (vec![0.3, 0.3, 0.3, 0.1], 7, 2),
            (vec![1.0], 20, 2),
            (vec![0.5, 0.2, 0.0, 0.0, 0.0], 4, 2),
        ] {
            let spawn = compute_spawn(&adjusted, pop_size, min);
            assert_eq!(spawn.iter().sum::<usize>(), pop_size, "{adjusted:?}");
        }
    }

    #[test]
    fn spawn_favors_fitter_species() {
        let spawn = compute_spawn(&[0.8, 0.2], 20, 2);
        assert!(spawn[0] > spawn[1]);
        assert!(spawn[1] >= 2);
    }
}
