use anyhow::Result;
use tracing::{debug, info};

use crate::{
    error::TrainError,
    ga::{Genome, Individual, Population, Reporter, ReporterSet, Reproduction, SpeciesSet},
    role::{AgentRole, RoleMap},
    util::blueprint::{FitnessCriterion, NeatConfig},
};

/// What happened to one role's population at the end of a generation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleOutcome {
    Reproduced,
    SolutionFound,
    Extinct,
}

/// Three populations, one per [`AgentRole`], evolved in lockstep.
///
/// Each role has its own species set but all roles share the generation
/// counter, the reproduction strategy and the reporters. Fitness comes from a
/// single callback that sees all three populations at once, so genomes of
/// different roles are scored against each other.
pub struct Coevolution<G: Genome, S, R> {
    config: NeatConfig,
    genome_config: G::Config,
    criterion: Option<FitnessCriterion>,
    reproduction: R,
    populations: RoleMap<Population<G>>,
    species: RoleMap<S>,
    best_genome: RoleMap<Option<Individual<G>>>,
    solved: RoleMap<bool>,
    generation: usize,
    reporters: ReporterSet<G>,
}

impl<G, S, R> Coevolution<G, S, R>
where
    G: Genome,
    S: SpeciesSet<G>,
    R: Reproduction<G>,
{
    /// Creates and speciates the three initial populations
    pub fn new(
        config: NeatConfig,
        genome_config: G::Config,
        mut species: RoleMap<S>,
        mut reproduction: R,
    ) -> Result<Self> {
        let criterion = if config.no_fitness_termination {
            None
        } else {
            let criterion = config
                .fitness_criterion
                .parse::<FitnessCriterion>()
                .map_err(|_| {
                    TrainError::Configuration(format!(
                        "unexpected fitness criterion `{}`",
                        config.fitness_criterion
                    ))
                })?;
            Some(criterion)
        };
        if config.pop_size == 0 {
            return Err(TrainError::Configuration("pop_size must be at least 1".into()).into());
        }

        let populations =
            RoleMap::from_fn(|_| reproduction.create_new(&genome_config, config.pop_size));
        for (role, s) in species.iter_mut() {
            s.speciate(&genome_config, &populations[role], 0);
        }

        Ok(Self {
            config,
            genome_config,
            criterion,
            reproduction,
            populations,
            species,
            best_genome: RoleMap::default(),
            solved: RoleMap::default(),
            generation: 0,
            reporters: ReporterSet::default(),
        })
    }

    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter<G>>) {
        self.reporters.add(reporter);
    }

    /// Runs up to `max_generations` generations, or until every role has
    /// reached the fitness threshold, and returns the best genome ever seen
    /// per role.
    ///
    /// `fitness_fn` is called once per generation and must set the fitness of
    /// every genome of every population. Calling `run` again continues from
    /// the current generation.
    pub fn run<F>(
        &mut self,
        mut fitness_fn: F,
        max_generations: Option<usize>,
    ) -> Result<RoleMap<Option<Individual<G>>>>
    where
        F: FnMut(&mut RoleMap<Population<G>>, &NeatConfig, usize) -> Result<()>,
    {
        if self.config.no_fitness_termination && max_generations.is_none() {
            return Err(TrainError::Configuration(
                "cannot have no generational limit with no fitness termination".into(),
            )
            .into());
        }

        let mut k = 0;
        while max_generations.is_none_or(|n| k < n) {
            if self.solved.values().all(|&s| s) {
                break;
            }
            k += 1;

            self.reporters.start_generation(self.generation);
            fitness_fn(&mut self.populations, &self.config, self.generation)?;

            for role in AgentRole::all() {
                if self.solved[role] {
                    continue;
                }
                match self.evolve_role(role) {
                    RoleOutcome::Reproduced => {}
                    RoleOutcome::SolutionFound => self.solved[role] = true,
                    RoleOutcome::Extinct => self.recover_extinction(role)?,
                }
            }

            self.generation += 1;
        }

        if self.config.no_fitness_termination {
            for (role, best) in self.best_genome.iter() {
                if let Some(best) = best {
                    self.reporters.found_solution(role, self.generation, best);
                }
            }
        }

        Ok(self.best_genome.clone())
    }

    /// Post-evaluation, termination check, reproduction and re-speciation of
    /// one role's evaluated population
    fn evolve_role(&mut self, role: AgentRole) -> RoleOutcome {
        let population = &self.populations[role];
        let num_species = self.species[role].species().len();

        if let Some(best) = population.best() {
            self.reporters
                .post_evaluate(role, population, num_species, best);
            if self.best_genome[role]
                .as_ref()
                .is_none_or(|b| best.rank_fitness() > b.rank_fitness())
            {
                self.best_genome[role] = Some(best.clone());
            }

            if let Some(criterion) = self.criterion
                && let Some(fv) = criterion.aggregate(population.fitness_values())
                && fv >= self.config.fitness_threshold
            {
                self.reporters.found_solution(role, self.generation, best);
                return RoleOutcome::SolutionFound;
            }
        }

        let next = self.reproduction.reproduce(
            &self.genome_config,
            &mut self.species[role],
            &self.populations[role],
            self.config.pop_size,
            self.generation,
            &mut self.reporters,
            role,
        );
        self.populations[role] = next;

        if self.species[role].is_empty() {
            self.reporters.complete_extinction(role);
            return RoleOutcome::Extinct;
        }

        self.speciate(role);
        RoleOutcome::Reproduced
    }

    fn recover_extinction(&mut self, role: AgentRole) -> Result<()> {
        if !self.config.reset_on_extinction {
            return Err(TrainError::CompleteExtinction(role).into());
        }
        info!("[{}] resetting population after extinction", role);
        self.populations[role] = self
            .reproduction
            .create_new(&self.genome_config, self.config.pop_size);
        self.speciate(role);
        Ok(())
    }

    fn speciate(&mut self, role: AgentRole) {
        self.species[role].speciate(&self.genome_config, &self.populations[role], self.generation);
        let num_species = self.species[role].species().len();
        debug!(
            "[{}] {} genomes in {} species",
            role,
            self.populations[role].len(),
            num_species
        );
        self.reporters
            .end_generation(role, &self.populations[role], num_species);
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn populations(&self) -> &RoleMap<Population<G>> {
        &self.populations
    }

    pub fn species(&self, role: AgentRole) -> &S {
        &self.species[role]
    }

    pub fn best_genome(&self, role: AgentRole) -> Option<&Individual<G>> {
        self.best_genome[role].as_ref()
    }

    pub fn is_solved(&self, role: AgentRole) -> bool {
        self.solved[role]
    }
}
