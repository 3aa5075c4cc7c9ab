use std::{fs, path::PathBuf};

use anyhow::Result;
use signet::{
    AgentRole,
    blueprint::Blueprint,
    experiment::{self, load_agents},
    ga::FitnessHistory,
};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("signet-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn small_blueprint(out_dir: PathBuf) -> Result<Blueprint> {
    let mut blueprint: Blueprint = toml::from_str(include_str!("../templates/signet.toml"))?;
    blueprint.experiment.out_dir = out_dir;
    blueprint.neat.pop_size = 2;
    blueprint.neat.seed = Some(11);
    blueprint.simulation.max_steps = 60;
    Ok(blueprint)
}

#[test]
fn generation_override_satisfies_validation() -> Result<()> {
    let out_dir = scratch_dir("override");
    let mut blueprint = small_blueprint(out_dir.clone())?;
    blueprint.neat.no_fitness_termination = true;
    blueprint.neat.num_generations = None;
    assert!(blueprint.validate().is_err());

    let best = experiment::train(&blueprint, Some(1))?;
    for role in AgentRole::all() {
        assert!(best[role].is_some(), "{role} has a best genome");
    }

    let agents = load_agents(&out_dir.join("agents"))?;
    for role in AgentRole::all() {
        assert_eq!(Some(agents[role].key), best[role].as_ref().map(|x| x.key));
    }

    let rows = csv::Reader::from_path(out_dir.join("data").join("fitness.csv"))?
        .records()
        .count();
    assert_eq!(rows, 3);

    let history: FitnessHistory =
        serde_json::from_str(&fs::read_to_string(out_dir.join("data").join("history.json"))?)?;
    for (_, evaluations) in history.generations.iter() {
        assert_eq!(evaluations.len(), 1);
        assert!(evaluations[0].avg_fitness.is_finite());
    }

    let saved = Blueprint::load(&out_dir.join("signet.toml"))?;
    assert_eq!(saved.neat.num_generations, Some(1));

    fs::remove_dir_all(&out_dir)?;
    Ok(())
}

#[test]
fn missing_generation_bound_is_still_rejected() -> Result<()> {
    let out_dir = scratch_dir("unbounded");
    let mut blueprint = small_blueprint(out_dir.clone())?;
    blueprint.neat.no_fitness_termination = true;
    blueprint.neat.num_generations = None;

    assert!(experiment::train(&blueprint, None).is_err());
    assert!(!out_dir.exists());
    Ok(())
}
