use rand::{Rng, seq::IndexedRandom};
use rand_distr::{Distribution, weighted::WeightedIndex};

use crate::util::blueprint::SelectionMethod;

use super::population::Individual;

/// Selects parents for reproduction from a species' surviving members
pub struct Selector<'a, G> {
    parents: &'a [&'a Individual<G>],
    method: MethodState,
}

/// Stores method-specific data transforms used for selection
enum MethodState {
    Softmax { dist: WeightedIndex<f64> },
    Tournament { size: u32 },
}

impl<'a, G> Selector<'a, G> {
    /// `parents` must not be empty
    pub fn new(method: SelectionMethod, parents: &'a [&'a Individual<G>]) -> Self {
        let method = match method {
            SelectionMethod::Softmax => {
                let max_fitness = parents
                    .iter()
                    .map(|x| x.rank_fitness())
                    .reduce(f64::max)
                    .expect("Parents slice is not empty");
                let exps = if max_fitness.is_finite() {
                    parents
                        .iter()
                        .map(|x| (x.rank_fitness() - max_fitness).exp())
                        .collect::<Vec<_>>()
                } else {
                    vec![1.0; parents.len()]
                };
                let dist = WeightedIndex::new(exps)
                    .expect("The fittest parent always carries weight 1");
                MethodState::Softmax { dist }
            }
            SelectionMethod::Tournament { size } => MethodState::Tournament { size },
        };

        Self { parents, method }
    }

    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &'a Individual<G> {
        match self.method {
            MethodState::Softmax { ref dist } => self.parents[dist.sample(rng)],
            MethodState::Tournament { size } => self
                .parents
                .choose_multiple(rng, size as usize)
                .max_by(|x, y| x.rank_fitness().total_cmp(&y.rank_fitness()))
                .copied()
                .expect("Parents slice is not empty"),
        }
    }
}
