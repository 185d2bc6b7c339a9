//! Progress reporting types for optimization runs.

use serde::{Deserialize, Serialize};

/// Current phase of an optimization run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OptimizerPhase {
    /// Population created or loaded, no generation evolved yet.
    #[default]
    Initialized,
    /// Evolving a generation.
    Evolving,
    /// Generation finished and written to the checkpoint files.
    Checkpointed,
    /// Requested generations finished.
    Completed,
}

/// Snapshot reported after every checkpointed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationProgress {
    /// Generations completed, counted across resumptions.
    pub generation: u64,
    /// Current phase of the run.
    pub phase: OptimizerPhase,
    /// Component-wise best objective values in the population.
    pub ideal_point: Vec<f64>,
    /// Fitness calls made by this process.
    pub evaluations: u64,
    /// Fitness calls scored with the fallback objectives.
    pub rejected: u64,
}
