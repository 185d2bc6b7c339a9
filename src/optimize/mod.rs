//! Optimization module.
//!
//! [`DesignProblem`] turns a designer, an evaluator and a design space into
//! a fitness function that archives every successful evaluation and scores
//! failures with a fallback objective vector. [`DesignOptimizationMoead`]
//! evolves a population against that fitness function and checkpoints it
//! after every generation.
//!
//! ```rust,ignore
//! let mut optimizer = DesignOptimizationMoead::from_config(&config, designer, evaluator, space)?;
//! let pop = optimizer.run_resumable(&config.population, &config.paths)?;
//! ```

mod checkpoint;
mod decomposition;
mod fitness;
mod operators;
mod search;
mod worker;

pub use checkpoint::{
    CheckpointError, CheckpointState, read_state, read_table, state_path, table_checksum,
    write_state, write_table,
};
pub use decomposition::{GridError, grid_size, ideal_point, neighbourhoods, tchebycheff, weight_grid};
pub use fitness::{DEFAULT_INVALID_OBJECTIVE, DesignProblem, EvaluationStats, ProblemError};
pub use operators::{VariationRng, generation_seed};
pub use search::{DesignOptimizationMoead, OptimizationError, Population};
pub use worker::{
    EXIT_FAULT, EXIT_INVALID_DESIGN, EXIT_SUCCESS, ExitKind, IsolatedOutcome, Isolation,
    ProcessWorker, ThreadWorker, Worker, WorkerError, WorkerHandle, WorkerStatus, run_worker,
};
