use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    bail_assert,
    sim::{OBSERVATION_LEN, corridor::ROUTES},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub out_dir: PathBuf,
}

/// Rule for collapsing the fitness values of a group of genomes into one number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FitnessCriterion {
    Max,
    Min,
    Mean,
}

impl FitnessCriterion {
    /// Returns `None` for an empty input
    pub fn aggregate(self, values: impl IntoIterator<Item = f64>) -> Option<f64> {
        let mut values = values.into_iter();
        let first = values.next()?;
        Some(match self {
            Self::Max => values.fold(first, f64::max),
            Self::Min => values.fold(first, f64::min),
            Self::Mean => {
                let (sum, n) = values.fold((first, 1usize), |(s, n), x| (s + x, n + 1));
                sum / n as f64
            }
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SelectionMethod {
    Softmax,
    Tournament { size: u32 },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CrossoverMethod {
    Uniform,
    NPoint { n: u32 },
}

/// Population-level settings of the coevolution loop
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeatConfig {
    pub pop_size: usize,
    /// `max`, `min` or `mean`. Kept as text so an unknown rule surfaces as a
    /// configuration error when the engine is built.
    pub fitness_criterion: String,
    pub fitness_threshold: f64,
    #[serde(default)]
    pub no_fitness_termination: bool,
    #[serde(default)]
    pub reset_on_extinction: bool,
    pub num_generations: Option<usize>,
    /// Seed for genome creation and reproduction. Random when absent.
    pub seed: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenomeConfig {
    pub num_inputs: usize,
    #[serde(default)]
    pub num_hidden: usize,
    pub num_outputs: usize,
    pub weight_init_range: f64,
    pub weight_min: f64,
    pub weight_max: f64,
    pub mutation_probability: f64,
    pub mutation_magnitude: f64,
    pub crossover_method: CrossoverMethod,
    pub compatibility_weight_coefficient: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpeciesSetConfig {
    pub compatibility_threshold: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagnationConfig {
    pub species_fitness_func: FitnessCriterion,
    pub max_stagnation: usize,
    pub species_elitism: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproductionConfig {
    pub elitism: usize,
    pub survival_threshold: f64,
    pub min_species_size: usize,
    pub selection_method: SelectionMethod,
}

/// Scenario parameters of one scoring round
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub max_steps: u64,
    pub arrival_interval: u64,
    pub min_arrivals: u32,
    pub max_arrivals: u32,
    /// Probability of each of the two main routes
    pub main_route_probability: f64,
    /// Total number of routes, the two main ones included
    pub num_routes: u32,
    pub emergency_penalty: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 1234,
            max_steps: 1200,
            arrival_interval: 20,
            min_arrivals: 10,
            max_arrivals: 40,
            main_route_probability: 0.35,
            num_routes: 14,
            emergency_penalty: 20.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Blueprint {
    pub experiment: ExperimentConfig,
    pub neat: NeatConfig,
    pub genome: GenomeConfig,
    pub species_set: SpeciesSetConfig,
    pub stagnation: StagnationConfig,
    pub reproduction: ReproductionConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Blueprint {
    pub fn load(path: &Path) -> Result<Self> {
        let blueprint_s = fs::read_to_string(path)
            .with_context(|| format!("Failed to open blueprint file `{}`", path.display()))?;
        let blueprint: Blueprint = toml::from_str(&blueprint_s)
            .with_context(|| format!("Failed to parse blueprint file `{}`", path.display()))?;
        Ok(blueprint)
    }

    pub fn validate(&self) -> Result<()> {
        // NEAT

        bail_assert!(self.neat.pop_size > 0, "neat.pop_size must be at least 1");
        if !self.neat.no_fitness_termination {
            bail_assert!(
                self.neat.fitness_criterion.parse::<FitnessCriterion>().is_ok(),
                "neat.fitness_criterion must be one of `max`, `min`, `mean` (got `{}`)",
                self.neat.fitness_criterion
            );
        } else {
            bail_assert!(
                self.neat.num_generations.is_some(),
                "neat.num_generations must be set when neat.no_fitness_termination is true"
            );
        }

        // Genome

        bail_assert!(
            self.genome.num_inputs == OBSERVATION_LEN,
            "genome.num_inputs must equal the observation length ({})",
            OBSERVATION_LEN
        );
        bail_assert!(
            self.genome.num_outputs == 2,
            "genome.num_outputs must be 2 (phase change, phase duration)"
        );
        bail_assert!(
            self.genome.weight_min < self.genome.weight_max,
            "genome.weight_min must be less than genome.weight_max"
        );
        bail_assert!(
            self.genome.weight_init_range > 0.0,
            "genome.weight_init_range must be greater than 0"
        );
        bail_assert!(
            self.genome.mutation_probability >= 0.0 && self.genome.mutation_probability <= 1.0,
            "genome.mutation_probability must be between 0 and 1"
        );
        bail_assert!(
            self.genome.mutation_magnitude >= 0.0,
            "genome.mutation_magnitude must be non-negative"
        );
        if let CrossoverMethod::NPoint { n } = self.genome.crossover_method {
            bail_assert!(n > 0, "genome.crossover_method NPoint.n must be at least 1");
        }
        bail_assert!(
            self.genome.compatibility_weight_coefficient > 0.0,
            "genome.compatibility_weight_coefficient must be greater than 0"
        );

        // Speciation

        bail_assert!(
            self.species_set.compatibility_threshold > 0.0,
            "species_set.compatibility_threshold must be greater than 0"
        );
        bail_assert!(
            self.stagnation.max_stagnation > 0,
            "stagnation.max_stagnation must be at least 1"
        );

        // Reproduction

        bail_assert!(
            self.reproduction.survival_threshold > 0.0
                && self.reproduction.survival_threshold <= 1.0,
            "reproduction.survival_threshold must be in (0, 1]"
        );
        if let SelectionMethod::Tournament { size } = self.reproduction.selection_method {
            bail_assert!(
                size > 0,
                "reproduction.selection_method Tournament.size must be greater than 0"
            )
        }

        // Simulation

        bail_assert!(
            self.simulation.arrival_interval > 0,
            "simulation.arrival_interval must be at least 1"
        );
        bail_assert!(
            self.simulation.min_arrivals <= self.simulation.max_arrivals,
            "simulation.min_arrivals must not exceed simulation.max_arrivals"
        );
        bail_assert!(
            self.simulation.main_route_probability >= 0.0
                && self.simulation.main_route_probability <= 0.5,
            "simulation.main_route_probability must be between 0 and 0.5"
        );
        bail_assert!(
            self.simulation.num_routes > 2 && self.simulation.num_routes as usize <= ROUTES.len(),
            "simulation.num_routes must be between 3 and {}",
            ROUTES.len()
        );
        bail_assert!(
            self.simulation.emergency_penalty >= 0.0,
            "simulation.emergency_penalty must be non-negative"
        );

        Ok(())
    }
}
