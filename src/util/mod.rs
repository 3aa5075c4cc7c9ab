pub mod blueprint;

use serde::{Deserialize, Serialize};

// structs

/// Best and average fitness scores of one population in a single generation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopEvaluation {
    pub best_fitness: f64,
    pub avg_fitness: f64,
}

// util macros

#[macro_export]
macro_rules! bail_assert {
    ($cond:expr) => {
        if !$cond {
            bail!("Assertion failed: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            bail!($($arg)+);
        }
    };
}
