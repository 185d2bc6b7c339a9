//! ZDT1 benchmark run, optionally with process-isolated evaluation.
//!
//! ```text
//! cargo run --release --example zdt1 -- [run-dir] [--isolated]
//! ```
//!
//! With `--isolated` every evaluation runs in a child copy of this binary
//! started with `--worker`. Rerunning with the same directory resumes from
//! the last checkpoint.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use design_optim::{
    design::{DesignCreationError, DesignSpace, Designer, EvaluationError, Evaluator},
    optimize::{DesignOptimizationMoead, run_worker},
    schema::{
        EvaluationConfig, IsolationConfig, OptimizerConfig, PopulationConfig, RunPaths,
        WorkerCommand,
    },
};
use serde::{Deserialize, Serialize};

const DIMENSIONS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Zdt1Designer;

impl Designer for Zdt1Designer {
    type Design = Vec<f64>;

    fn create_design(&self, x: &[f64]) -> Result<Vec<f64>, DesignCreationError> {
        if x.len() != DIMENSIONS {
            return Err(DesignCreationError::Dimension {
                expected: DIMENSIONS,
                actual: x.len(),
            });
        }
        Ok(x.to_vec())
    }
}

struct Zdt1Evaluator;

impl Evaluator<Vec<f64>> for Zdt1Evaluator {
    type Output = Vec<f64>;

    fn evaluate(&self, x: &Vec<f64>) -> Result<Vec<f64>, EvaluationError> {
        // A slice of the space the "solver" cannot handle.
        if x[0] > 0.98 && x[1] > 0.98 {
            return Err(EvaluationError::invalid("degenerate corner"));
        }
        let f1 = x[0];
        let g = 1.0 + 9.0 * x[1..].iter().sum::<f64>() / (x.len() - 1) as f64;
        Ok(vec![f1, g * (1.0 - (f1 / g).sqrt())])
    }
}

struct Zdt1Space {
    bounds: Vec<(f64, f64)>,
}

impl DesignSpace<Vec<f64>> for Zdt1Space {
    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    fn n_obj(&self) -> usize {
        2
    }

    fn get_objectives(&self, results: &Vec<f64>) -> Vec<f64> {
        results.clone()
    }

    fn check_constraints(&self, results: &Vec<f64>) -> bool {
        results[1] < 1.0
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--worker") {
        return run_worker::<Vec<f64>, _>(&Zdt1Evaluator);
    }

    let isolated = args.iter().any(|a| a == "--isolated");
    let run_dir = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("zdt1-run"));
    if let Err(e) = std::fs::create_dir_all(&run_dir) {
        eprintln!("Error creating {}: {}", run_dir.display(), e);
        return ExitCode::FAILURE;
    }

    let isolation = if isolated {
        match std::env::current_exe() {
            Ok(program) => Some(IsolationConfig {
                poll_interval_ms: 10,
                timeout_secs: Some(30.0),
                command: Some(WorkerCommand {
                    program,
                    args: vec!["--worker".to_string()],
                }),
            }),
            Err(e) => {
                eprintln!("Error locating worker binary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let config = OptimizerConfig {
        population: PopulationConfig {
            size: 40,
            generations: if isolated { 5 } else { 50 },
            neighbours: 10,
        },
        evaluation: EvaluationConfig {
            isolation,
            invalid_design_objs: None,
        },
        paths: RunPaths::in_dir(&run_dir),
        random_seed: Some(42),
        ..Default::default()
    };

    println!("=== ZDT1 ({} variables) ===\n", DIMENSIONS);

    let space = Zdt1Space {
        bounds: vec![(0.0, 1.0); DIMENSIONS],
    };
    let mut optimizer =
        match DesignOptimizationMoead::from_config(&config, Zdt1Designer, Zdt1Evaluator, space) {
            Ok(optimizer) => optimizer,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        };

    let start = Instant::now();
    let pop = match optimizer.run_resumable(&config.population, &config.paths) {
        Ok(pop) => pop,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let elapsed = start.elapsed();

    let stats = optimizer.problem().stats();
    println!("  Generations:    {}", pop.generation);
    println!("  Evaluations:    {}", stats.evaluations);
    println!("  Rejected:       {}", stats.rejected());
    println!("  Elapsed:        {:.2}s", elapsed.as_secs_f64());
    println!("  Ideal point:    {:?}", pop.ideal_point());

    match optimizer.problem().handler().get_pareto_fitness_freevars() {
        Ok((fitness, _)) => println!("  Pareto front:   {} archived designs", fitness.len()),
        Err(e) => {
            eprintln!("Error reading archive: {}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
