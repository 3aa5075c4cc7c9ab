pub mod genome;
pub mod population;
pub mod reporter;
pub mod reproduction;
pub mod selector;
pub mod species;
pub mod stagnation;

pub use genome::{FeedForwardGenome, FeedForwardNetwork, Genome};
pub use population::{GenomeId, Individual, Population};
pub use reporter::{FitnessHistory, LogReporter, Reporter, ReporterSet, StatisticsReporter};
pub use reproduction::{DefaultReproduction, Reproduction};
pub use species::{DistanceSpeciesSet, Species, SpeciesId, SpeciesSet};
pub use stagnation::{MaxStagnation, Stagnation};
