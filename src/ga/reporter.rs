use std::{
    fs::File,
    path::Path,
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    role::{AgentRole, RoleMap},
    util::PopEvaluation,
};

use super::{
    population::{Individual, Population},
    species::SpeciesId,
};

/// Observer of the coevolution loop. Every hook defaults to doing nothing.
pub trait Reporter<G> {
    fn start_generation(&mut self, _generation: usize) {}

    fn post_evaluate(
        &mut self,
        _role: AgentRole,
        _population: &Population<G>,
        _num_species: usize,
        _best: &Individual<G>,
    ) {
    }

    fn end_generation(&mut self, _role: AgentRole, _population: &Population<G>, _num_species: usize) {
    }

    fn found_solution(&mut self, _role: AgentRole, _generation: usize, _best: &Individual<G>) {}

    fn complete_extinction(&mut self, _role: AgentRole) {}

    fn species_stagnant(&mut self, _role: AgentRole, _species: SpeciesId, _size: usize) {}
}

/// Fans every hook out to all registered reporters
pub struct ReporterSet<G> {
    reporters: Vec<Box<dyn Reporter<G>>>,
}

impl<G> Default for ReporterSet<G> {
    fn default() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }
}

impl<G> ReporterSet<G> {
    pub fn add(&mut self, reporter: Box<dyn Reporter<G>>) {
        self.reporters.push(reporter);
    }
}

impl<G> Reporter<G> for ReporterSet<G> {
    fn start_generation(&mut self, generation: usize) {
        for r in &mut self.reporters {
            r.start_generation(generation);
        }
    }

    fn post_evaluate(
        &mut self,
        role: AgentRole,
        population: &Population<G>,
        num_species: usize,
        best: &Individual<G>,
    ) {
        for r in &mut self.reporters {
            r.post_evaluate(role, population, num_species, best);
        }
    }

    fn end_generation(&mut self, role: AgentRole, population: &Population<G>, num_species: usize) {
        for r in &mut self.reporters {
            r.end_generation(role, population, num_species);
        }
    }

    fn found_solution(&mut self, role: AgentRole, generation: usize, best: &Individual<G>) {
        for r in &mut self.reporters {
            r.found_solution(role, generation, best);
        }
    }

    fn complete_extinction(&mut self, role: AgentRole) {
        for r in &mut self.reporters {
            r.complete_extinction(role);
        }
    }

    fn species_stagnant(&mut self, role: AgentRole, species: SpeciesId, size: usize) {
        for r in &mut self.reporters {
            r.species_stagnant(role, species, size);
        }
    }
}

/// Progress logging through `tracing`
pub struct LogReporter {
    generation: usize,
    started: Instant,
}

impl Default for LogReporter {
    fn default() -> Self {
        Self {
            generation: 0,
            started: Instant::now(),
        }
    }
}

impl<G> Reporter<G> for LogReporter {
    fn start_generation(&mut self, generation: usize) {
        self.generation = generation;
        self.started = Instant::now();
        info!("🚦 Running generation {}", generation);
    }

    fn post_evaluate(
        &mut self,
        role: AgentRole,
        population: &Population<G>,
        num_species: usize,
        best: &Individual<G>,
    ) {
        if let Some(evaluation) = population.evaluate() {
            info!(
                "[{}] average fitness {:.3}, best {:.3} (genome {}), {} species",
                role, evaluation.avg_fitness, evaluation.best_fitness, best.key, num_species
            );
        }
    }

    fn end_generation(&mut self, role: AgentRole, population: &Population<G>, num_species: usize) {
        info!(
            "[{}] {} members in {} species, generation {} took {:.2?}",
            role,
            population.len(),
            num_species,
            self.generation,
            self.started.elapsed()
        );
    }

    fn found_solution(&mut self, role: AgentRole, generation: usize, best: &Individual<G>) {
        info!(
            "🏁 [{}] best genome {} after generation {} with fitness {:?}",
            role, best.key, generation, best.fitness
        );
    }

    fn complete_extinction(&mut self, role: AgentRole) {
        warn!("[{}] all species extinct", role);
    }

    fn species_stagnant(&mut self, role: AgentRole, species: SpeciesId, size: usize) {
        info!(
            "[{}] species {} with {} members is stagnated, removing it",
            role, species, size
        );
    }
}

/// Per-role fitness summary of every evaluated generation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FitnessHistory {
    pub generations: RoleMap<Vec<PopEvaluation>>,
}

/// Records [`FitnessHistory`] and optionally mirrors it to a CSV file with
/// rows `generation,role,avg_fitness,best_fitness`
pub struct StatisticsReporter {
    generation: usize,
    history: Arc<Mutex<FitnessHistory>>,
    csv: Option<csv::Writer<File>>,
}

impl StatisticsReporter {
    pub fn new() -> Self {
        Self {
            generation: 0,
            history: Arc::default(),
            csv: None,
        }
    }

    pub fn with_csv(path: &Path) -> Result<Self> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["generation", "role", "avg_fitness", "best_fitness"])?;
        wtr.flush()?;
        Ok(Self {
            csv: Some(wtr),
            ..Self::new()
        })
    }

    /// Shared handle to the recorded history, readable while the engine runs
    pub fn history(&self) -> Arc<Mutex<FitnessHistory>> {
        Arc::clone(&self.history)
    }

    fn write_row(&mut self, role: AgentRole, evaluation: PopEvaluation) -> Result<()> {
        if let Some(wtr) = &mut self.csv {
            wtr.write_record([
                self.generation.to_string(),
                role.to_string(),
                evaluation.avg_fitness.to_string(),
                evaluation.best_fitness.to_string(),
            ])?;
            wtr.flush()?;
        }
        Ok(())
    }
}

impl Default for StatisticsReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> Reporter<G> for StatisticsReporter {
    fn start_generation(&mut self, generation: usize) {
        self.generation = generation;
    }

    fn post_evaluate(
        &mut self,
        role: AgentRole,
        population: &Population<G>,
        _num_species: usize,
        _best: &Individual<G>,
    ) {
        let Some(evaluation) = population.evaluate() else {
            return;
        };
        self.history
            .lock()
            .expect("Statistics lock is never poisoned")
            .generations[role]
            .push(evaluation);
        if let Err(e) = self.write_row(role, evaluation) {
            warn!("Failed to write fitness statistics: {:?}", e);
        }
    }
}
