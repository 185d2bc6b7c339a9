//! Capability traits supplied by the caller.
//!
//! An optimization run is generic over three collaborators:
//!
//! - [`Designer`]: turns a free-variable vector into a design
//! - [`Evaluator`]: runs a design through an arbitrary (slow, possibly
//!   crashing) analysis pipeline
//! - [`DesignSpace`]: maps evaluation results to objectives and exposes
//!   the search bounds
//!
//! # Example
//!
//! ```rust
//! use design_optim::design::{
//!     DesignCreationError, DesignSpace, Designer, EvaluationError, Evaluator,
//! };
//!
//! struct Sum;
//!
//! impl Designer for Sum {
//!     type Design = Vec<f64>;
//!
//!     fn create_design(&self, x: &[f64]) -> Result<Vec<f64>, DesignCreationError> {
//!         Ok(x.to_vec())
//!     }
//! }
//!
//! impl Evaluator<Vec<f64>> for Sum {
//!     type Output = f64;
//!
//!     fn evaluate(&self, design: &Vec<f64>) -> Result<f64, EvaluationError> {
//!         if design[0] > 0.5 {
//!             return Err(EvaluationError::InvalidDesign("x0 too large".into()));
//!         }
//!         Ok(design.iter().sum())
//!     }
//! }
//!
//! struct Space(Vec<(f64, f64)>);
//!
//! impl DesignSpace<f64> for Space {
//!     fn bounds(&self) -> &[(f64, f64)] {
//!         &self.0
//!     }
//!     fn n_obj(&self) -> usize {
//!         1
//!     }
//!     fn get_objectives(&self, results: &f64) -> Vec<f64> {
//!         vec![-results]
//!     }
//!     fn check_constraints(&self, _results: &f64) -> bool {
//!         true
//!     }
//! }
//! ```

use std::io;

/// Maps a free-variable vector to a design.
pub trait Designer {
    type Design;

    /// Create a design from free variables.
    ///
    /// Returning [`DesignCreationError::InvalidDesign`] scores the candidate
    /// with the invalid-design objectives; any other error aborts the run.
    fn create_design(&self, x: &[f64]) -> Result<Self::Design, DesignCreationError>;
}

/// Runs a design through the (expensive) evaluation pipeline.
pub trait Evaluator<D> {
    type Output;

    /// Evaluate a design.
    fn evaluate(&self, design: &D) -> Result<Self::Output, EvaluationError>;
}

/// Describes the search space and how results become objectives.
pub trait DesignSpace<R> {
    /// Per-dimension `(min, max)` bounds of the free variables.
    fn bounds(&self) -> &[(f64, f64)];

    /// Number of objectives. Fixed for the life of a run.
    fn n_obj(&self) -> usize;

    /// Objective vector for a result, lower is better.
    fn get_objectives(&self, results: &R) -> Vec<f64>;

    /// Whether a result satisfies the design constraints.
    fn check_constraints(&self, results: &R) -> bool;
}

/// Failure to build a design.
#[derive(Debug, thiserror::Error)]
pub enum DesignCreationError {
    #[error("Invalid design: {0}")]
    InvalidDesign(String),
    #[error("Expected {expected} free variables, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("Design creation failed: {0}")]
    Other(String),
}

/// Tagged evaluation failure.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// The design failed domain validity checks.
    #[error("Invalid design: {0}")]
    InvalidDesign(String),
    /// Unexpected failure inside the evaluation pipeline.
    #[error("Evaluation fault: {0}")]
    Fault(String),
    /// I/O failure from the pipeline. `NotFound` is scored as an invalid
    /// design, other kinds abort the run.
    #[error("Evaluation I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EvaluationError {
    /// Convenience constructor for [`EvaluationError::InvalidDesign`].
    pub fn invalid<S: Into<String>>(reason: S) -> Self {
        Self::InvalidDesign(reason.into())
    }

    /// Convenience constructor for [`EvaluationError::Fault`].
    pub fn fault<S: Into<String>>(detail: S) -> Self {
        Self::Fault(detail.into())
    }
}
