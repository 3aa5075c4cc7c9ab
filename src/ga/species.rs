use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::util::blueprint::SpeciesSetConfig;

use super::{
    genome::Genome,
    population::{GenomeId, Individual, Population},
};

pub type SpeciesId = u64;

/// A cluster of genetically similar genomes within one population
#[derive(Debug, Clone)]
pub struct Species<G> {
    pub key: SpeciesId,
    pub created: usize,
    pub last_improved: usize,
    pub representative: Individual<G>,
    pub members: Vec<GenomeId>,
    pub fitness: Option<f64>,
    pub adjusted_fitness: Option<f64>,
    pub fitness_history: Vec<f64>,
}

impl<G> Species<G> {
    pub fn new(key: SpeciesId, generation: usize, representative: Individual<G>) -> Self {
        Self {
            key,
            created: generation,
            last_improved: generation,
            members: vec![representative.key],
            representative,
            fitness: None,
            adjusted_fitness: None,
            fitness_history: Vec::new(),
        }
    }

    /// Member individuals as currently stored in `population`
    pub fn member_individuals<'a>(
        &'a self,
        population: &'a Population<G>,
    ) -> impl Iterator<Item = &'a Individual<G>> {
        self.members.iter().filter_map(|key| population.get(*key))
    }
}

/// Partition of a population into species.
///
/// One species set exists per agent role and lives across generations; its
/// contents are recomputed by [`SpeciesSet::speciate`] every generation.
pub trait SpeciesSet<G: Genome> {
    fn speciate(&mut self, genome_config: &G::Config, population: &Population<G>, generation: usize);
    fn species(&self) -> &BTreeMap<SpeciesId, Species<G>>;
    fn species_mut(&mut self) -> &mut BTreeMap<SpeciesId, Species<G>>;

    fn is_empty(&self) -> bool {
        self.species().is_empty()
    }
}

/// Clusters genomes by distance to each species' representative
#[derive(Debug, Clone)]
pub struct DistanceSpeciesSet<G> {
    config: SpeciesSetConfig,
    next_key: SpeciesId,
    species: BTreeMap<SpeciesId, Species<G>>,
}

impl<G> DistanceSpeciesSet<G> {
    pub fn new(config: SpeciesSetConfig) -> Self {
        Self {
            config,
            next_key: 1,
            species: BTreeMap::new(),
        }
    }
}

impl<G: Genome> SpeciesSet<G> for DistanceSpeciesSet<G> {
    fn speciate(&mut self, genome_config: &G::Config, population: &Population<G>, generation: usize) {
        let mut unspeciated = population.keys().collect::<BTreeSet<_>>();
        let mut assignments = BTreeMap::<SpeciesId, (GenomeId, Vec<GenomeId>)>::new();

        // Surviving species keep the genome closest to their old representative
        for (sid, species) in &self.species {
            let closest = unspeciated
                .iter()
                .filter_map(|key| population.get(*key))
                .map(|x| (x.genome.distance(&species.representative.genome, genome_config), x.key))
                .min_by(|a, b| a.0.total_cmp(&b.0));
            if let Some((_, key)) = closest {
                unspeciated.remove(&key);
                assignments.insert(*sid, (key, vec![key]));
            }
        }

        for key in unspeciated {
            let genome = &population
                .get(key)
                .expect("Unspeciated keys come from the population")
                .genome;
            let closest = assignments
                .iter()
                .map(|(sid, (rep, _))| {
                    let rep = population.get(*rep).expect("Representative is in the population");
                    (genome.distance(&rep.genome, genome_config), *sid)
                })
                .filter(|(d, _)| *d < self.config.compatibility_threshold)
                .min_by(|a, b| a.0.total_cmp(&b.0));

            match closest {
                Some((_, sid)) => {
                    assignments
                        .get_mut(&sid)
                        .expect("Species id was just looked up")
                        .1
                        .push(key);
                }
                None => {
                    let sid = self.next_key;
                    self.next_key += 1;
                    assignments.insert(sid, (key, vec![key]));
                }
            }
        }

        let mut species = BTreeMap::new();
        for (sid, (rep, members)) in assignments {
            let representative = population
                .get(rep)
                .expect("Representative is in the population")
                .clone();
            let mut s = self
                .species
                .remove(&sid)
                .unwrap_or_else(|| Species::new(sid, generation, representative.clone()));
            s.representative = representative;
            s.members = members;
            species.insert(sid, s);
        }

        trace!(
            "Speciated {} genomes into {} species (dropped {})",
            population.len(),
            species.len(),
            self.species.len()
        );
        self.species = species;
    }

    fn species(&self) -> &BTreeMap<SpeciesId, Species<G>> {
        &self.species
    }

    fn species_mut(&mut self) -> &mut BTreeMap<SpeciesId, Species<G>> {
        &mut self.species
    }
}
