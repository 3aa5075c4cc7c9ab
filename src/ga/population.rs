use std::collections::{BTreeMap, btree_map};

use serde::{Deserialize, Serialize};

use crate::util::PopEvaluation;

pub type GenomeId = u64;

/// A genome together with its identity and the fitness it scored this generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual<G> {
    pub key: GenomeId,
    pub genome: G,
    pub fitness: Option<f64>,
}

impl<G> Individual<G> {
    pub fn new(key: GenomeId, genome: G) -> Self {
        Self {
            key,
            genome,
            fitness: None,
        }
    }

    /// Fitness for ranking purposes. A genome that was never scored ranks last.
    pub fn rank_fitness(&self) -> f64 {
        self.fitness.unwrap_or(f64::NEG_INFINITY)
    }
}

/// Genomes of one agent role, keyed by id in ascending order
#[derive(Debug, Clone)]
pub struct Population<G> {
    members: BTreeMap<GenomeId, Individual<G>>,
}

impl<G> Default for Population<G> {
    fn default() -> Self {
        Self {
            members: BTreeMap::new(),
        }
    }
}

impl<G> Population<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, individual: Individual<G>) {
        self.members.insert(individual.key, individual);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, key: GenomeId) -> Option<&Individual<G>> {
        self.members.get(&key)
    }

    pub fn get_mut(&mut self, key: GenomeId) -> Option<&mut Individual<G>> {
        self.members.get_mut(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = GenomeId> + '_ {
        self.members.keys().copied()
    }

    pub fn iter(&self) -> btree_map::Values<'_, GenomeId, Individual<G>> {
        self.members.values()
    }

    pub fn iter_mut(&mut self) -> btree_map::ValuesMut<'_, GenomeId, Individual<G>> {
        self.members.values_mut()
    }

    /// First individual with the highest fitness
    pub fn best(&self) -> Option<&Individual<G>> {
        self.iter().fold(None, |best: Option<&Individual<G>>, x| match best {
            Some(b) if b.rank_fitness() >= x.rank_fitness() => Some(b),
            _ => Some(x),
        })
    }

    pub fn fitness_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.iter().map(Individual::rank_fitness)
    }

    /// Best and average over the scored members. `None` until one is scored.
    pub fn evaluate(&self) -> Option<PopEvaluation> {
        let scored = self.iter().filter_map(|x| x.fitness).collect::<Vec<_>>();
        if scored.is_empty() {
            return None;
        }
        let best_fitness = scored.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg_fitness = scored.iter().sum::<f64>() / scored.len() as f64;

        Some(PopEvaluation {
            best_fitness,
            avg_fitness,
        })
    }
}

impl<G> FromIterator<Individual<G>> for Population<G> {
    fn from_iter<T: IntoIterator<Item = Individual<G>>>(iter: T) -> Self {
        Self {
            members: iter.into_iter().map(|x| (x.key, x)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(fitness: &[Option<f64>]) -> Population<()> {
        fitness
            .iter()
            .enumerate()
            .map(|(i, &fitness)| Individual {
                key: i as GenomeId + 1,
                genome: (),
                fitness,
            })
            .collect()
    }

    #[test]
    fn unscored_members_are_left_out_of_the_average() {
        let population = scored(&[Some(-10.0), None, Some(-20.0)]);
        assert_eq!(
            population.evaluate(),
            Some(PopEvaluation {
                best_fitness: -10.0,
                avg_fitness: -15.0,
            })
        );
        assert_eq!(population.best().map(|x| x.key), Some(1));
    }

    #[test]
    fn unscored_population_has_no_evaluation() {
        assert_eq!(scored(&[None, None]).evaluate(), None);
        assert_eq!(scored(&[]).evaluate(), None);
    }
}
