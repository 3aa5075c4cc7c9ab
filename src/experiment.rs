use std::{
    fs::{self, File},
    io::BufWriter,
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::{
    coevolution::Coevolution,
    ga::{
        DefaultReproduction, DistanceSpeciesSet, FeedForwardGenome, FitnessHistory, Individual,
        LogReporter, MaxStagnation, StatisticsReporter,
    },
    role::{AgentRole, RoleMap},
    scoring::{play_round, score_genomes},
    sim::CorridorSim,
    util::blueprint::Blueprint,
};

/// Coevolution engine with the shipped strategies
pub type Engine = Coevolution<
    FeedForwardGenome,
    DistanceSpeciesSet<FeedForwardGenome>,
    DefaultReproduction<MaxStagnation>,
>;

pub type Agent = Individual<FeedForwardGenome>;

pub fn build_engine(blueprint: &Blueprint) -> Result<Engine> {
    let species = RoleMap::from_fn(|_| DistanceSpeciesSet::new(blueprint.species_set.clone()));
    let reproduction = DefaultReproduction::new(
        blueprint.reproduction.clone(),
        MaxStagnation::new(blueprint.stagnation.clone()),
        blueprint.neat.seed,
    );
    Coevolution::new(
        blueprint.neat.clone(),
        blueprint.genome.clone(),
        species,
        reproduction,
    )
}

/// Creates `out_dir/{data,agents}` and stores a copy of the blueprint
pub fn create_out_dir(out_dir: &Path, blueprint: &Blueprint) -> Result<()> {
    fs::create_dir_all(out_dir.join("data"))?;
    fs::create_dir_all(out_dir.join("agents"))?;
    let blueprint_s = toml::to_string(blueprint)?;
    fs::write(out_dir.join("signet.toml"), blueprint_s)
        .with_context(|| format!("Failed to write blueprint copy to `{}`", out_dir.display()))?;
    Ok(())
}

/// Trains the three signal policies and saves the best genome of each role.
/// `num_generations` overrides `neat.num_generations`.
pub fn train(blueprint: &Blueprint, num_generations: Option<usize>) -> Result<RoleMap<Option<Agent>>> {
    let mut blueprint = blueprint.clone();
    blueprint.neat.num_generations = num_generations.or(blueprint.neat.num_generations);
    blueprint.validate()?;
    let blueprint = &blueprint;

    let out_dir = &blueprint.experiment.out_dir;
    create_out_dir(out_dir, blueprint)?;

    let mut engine = build_engine(blueprint)?;
    let stats = StatisticsReporter::with_csv(&out_dir.join("data").join("fitness.csv"))?;
    let history = stats.history();
    engine.add_reporter(Box::new(LogReporter::default()));
    engine.add_reporter(Box::new(stats));

    info!("🚦 Starting training of {} x 3 signal controllers", blueprint.neat.pop_size);

    let genome_config = &blueprint.genome;
    let sim_config = &blueprint.simulation;
    let best = engine.run(
        |populations, _, generation| {
            score_genomes(populations, genome_config, sim_config, generation, CorridorSim::new)
        },
        blueprint.neat.num_generations,
    )?;

    let history = history
        .lock()
        .map_err(|_| anyhow!("Fitness history lock poisoned"))?
        .clone();
    save_history(&out_dir.join("data"), &history)?;
    log_summary(&history);

    let agents_dir = out_dir.join("agents");
    for (role, agent) in best.iter() {
        if let Some(agent) = agent {
            save_agent(&agents_dir, role, agent)?;
        }
    }
    info!("💾 Saved best genomes to {}", agents_dir.display());

    if let Ok(agents) = RoleMap::try_from_fn(|role| best[role].clone().ok_or(role)) {
        replay(blueprint, &agents)?;
    }

    Ok(best)
}

/// Writes the per-role fitness history to `history.json`
pub fn save_history(dir: &Path, history: &FitnessHistory) -> Result<()> {
    let path = dir.join("history.json");
    let wtr = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(wtr, history)
        .with_context(|| format!("Failed to save fitness history to `{}`", path.display()))?;
    Ok(())
}

fn log_summary(history: &FitnessHistory) {
    for (role, evaluations) in history.generations.iter() {
        let Some(last) = evaluations.last() else {
            continue;
        };
        let first = evaluations[0];
        info!(
            "📈 [{}] {} generations, average fitness {:.1} -> {:.1}, best {:.1}",
            role,
            evaluations.len(),
            first.avg_fitness,
            last.avg_fitness,
            evaluations
                .iter()
                .map(|x| x.best_fitness)
                .fold(f64::NEG_INFINITY, f64::max)
        );
    }
}

pub fn save_agent(dir: &Path, role: AgentRole, agent: &Agent) -> Result<()> {
    let path = dir.join(format!("{}.json", role));
    let wtr = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(wtr, agent)
        .with_context(|| format!("Failed to save agent to `{}`", path.display()))?;
    Ok(())
}

pub fn load_agents(dir: &Path) -> Result<RoleMap<Agent>> {
    RoleMap::try_from_fn(|role| {
        let path = dir.join(format!("{}.json", role));
        let agent_s = fs::read_to_string(&path)
            .with_context(|| format!("Failed to open agent file `{}`", path.display()))?;
        let agent = serde_json::from_str::<Agent>(&agent_s)
            .with_context(|| format!("Failed to parse agent file `{}`", path.display()))?;
        Ok(agent)
    })
}

/// Plays one round with the given agents and logs each role's score
pub fn replay(blueprint: &Blueprint, agents: &RoleMap<Agent>) -> Result<RoleMap<Option<f64>>> {
    let genomes = RoleMap::from_fn(|role| &agents[role].genome);
    let scores = play_round(
        CorridorSim::new(),
        genomes,
        &blueprint.genome,
        &blueprint.simulation,
    )?
    .scores();

    for (role, score) in scores.iter() {
        match score {
            Some(score) => info!("🏁 [{}] genome {} scored {:.1}", role, agents[role].key, score),
            None => info!("🏁 [{}] genome {} has no score", role, agents[role].key),
        }
    }

    Ok(scores)
}
