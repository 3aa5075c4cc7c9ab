use rand::Rng;
use rand_distr::{Bernoulli, Distribution, StandardNormal, Uniform};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    sim::policy::Policy,
    util::blueprint::{CrossoverMethod, GenomeConfig},
};

/// Evolvable policy encoding.
///
/// Implementations own their genetic operators; the evolution loop only ever
/// creates, mutates, recombines and compares genomes through this trait.
pub trait Genome: Clone + Send + Serialize + DeserializeOwned {
    type Config;
    type Network: Policy + 'static;

    fn random<R: Rng + ?Sized>(config: &Self::Config, rng: &mut R) -> Self;
    fn mutate<R: Rng + ?Sized>(&mut self, config: &Self::Config, rng: &mut R);
    fn crossover<R: Rng + ?Sized>(&self, other: &Self, config: &Self::Config, rng: &mut R)
    -> Self;
    /// Genetic distance used for speciation
    fn distance(&self, other: &Self, config: &Self::Config) -> f64;
    /// Build the runnable policy this genome encodes
    fn network(&self, config: &Self::Config) -> Self::Network;
}

/// Fully connected layer, `weights[out][in]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
}

impl Layer {
    fn random<R: Rng + ?Sized>(inputs: usize, outputs: usize, range: f64, rng: &mut R) -> Self {
        let distr = Uniform::new_inclusive(-range, range).expect("Validated range is positive");
        Self {
            weights: (0..outputs)
                .map(|_| (0..inputs).map(|_| rng.sample::<f64, _>(&distr)).collect())
                .collect(),
            biases: (0..outputs).map(|_| rng.sample::<f64, _>(&distr)).collect(),
        }
    }

    fn genes(&self) -> impl Iterator<Item = &f64> {
        self.weights.iter().flatten().chain(self.biases.iter())
    }

    fn genes_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.weights.iter_mut().flatten().chain(self.biases.iter_mut())
    }

    fn forward(&self, inputs: &[f64], activation: fn(f64) -> f64) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .map(|(row, bias)| {
                let sum = row.iter().zip(inputs).map(|(w, x)| w * x).sum::<f64>() + bias;
                activation(sum)
            })
            .collect()
    }
}

/// Fixed-topology feed-forward network genome. With `num_hidden == 0` the
/// inputs connect straight to the outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardGenome {
    layers: Vec<Layer>,
}

impl FeedForwardGenome {
    fn genes(&self) -> impl Iterator<Item = &f64> {
        self.layers.iter().flat_map(|l| l.genes())
    }

    fn genes_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.layers.iter_mut().flat_map(|l| l.genes_mut())
    }

    pub fn num_genes(&self) -> usize {
        self.genes().count()
    }
}

impl Genome for FeedForwardGenome {
    type Config = GenomeConfig;
    type Network = FeedForwardNetwork;

    fn random<R: Rng + ?Sized>(config: &GenomeConfig, rng: &mut R) -> Self {
        let range = config.weight_init_range;
        let layers = if config.num_hidden == 0 {
            vec![Layer::random(config.num_inputs, config.num_outputs, range, rng)]
        } else {
            vec![
                Layer::random(config.num_inputs, config.num_hidden, range, rng),
                Layer::random(config.num_hidden, config.num_outputs, range, rng),
            ]
        };
        Self { layers }
    }

    fn mutate<R: Rng + ?Sized>(&mut self, config: &GenomeConfig, rng: &mut R) {
        let bern = Bernoulli::new(config.mutation_probability)
            .expect("Mutation probability validated in blueprint");

        for gene in self.genes_mut() {
            if bern.sample(rng) {
                *gene += config.mutation_magnitude * rng.sample::<f64, _>(StandardNormal);
                *gene = gene.clamp(config.weight_min, config.weight_max);
            }
        }
    }

    fn crossover<R: Rng + ?Sized>(
        &self,
        other: &Self,
        config: &GenomeConfig,
        rng: &mut R,
    ) -> Self {
        let mut child = self.clone();
        match config.crossover_method {
            CrossoverMethod::Uniform => {
                let bern = Bernoulli::new(0.5).expect("0.5 is a valid probability");
                for (gene, theirs) in child.genes_mut().zip(other.genes()) {
                    if bern.sample(rng) {
                        *gene = *theirs;
                    }
                }
            }
            CrossoverMethod::NPoint { n } => {
                let len = self.num_genes();
                let mut cuts = (0..n)
                    .map(|_| rng.random_range(0..len))
                    .collect::<Vec<_>>();
                cuts.sort_unstable();
                let mut cuts = cuts.into_iter().peekable();
                let mut swap = false;
                for (i, (gene, theirs)) in child.genes_mut().zip(other.genes()).enumerate() {
                    while cuts.next_if(|&c| c <= i).is_some() {
                        swap = !swap;
                    }
                    if swap {
                        *gene = *theirs;
                    }
                }
            }
        }
        child
    }

    fn distance(&self, other: &Self, config: &GenomeConfig) -> f64 {
        let (sum, n) = self
            .genes()
            .zip(other.genes())
            .fold((0.0, 0usize), |(sum, n), (a, b)| (sum + (a - b).abs(), n + 1));
        if n == 0 {
            return 0.0;
        }
        config.compatibility_weight_coefficient * sum / n as f64
    }

    fn network(&self, _config: &GenomeConfig) -> FeedForwardNetwork {
        FeedForwardNetwork {
            layers: self.layers.clone(),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Runnable form of a [`FeedForwardGenome`]. Hidden units use `tanh`, outputs
/// use the logistic function so every output lies in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct FeedForwardNetwork {
    layers: Vec<Layer>,
}

impl Policy for FeedForwardNetwork {
    fn activate(&mut self, inputs: &[f64]) -> Vec<f64> {
        let last = self.layers.len() - 1;
        let mut values = inputs.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            let activation: fn(f64) -> f64 = if i == last { sigmoid } else { f64::tanh };
            values = layer.forward(&values, activation);
        }
        values
    }
}
