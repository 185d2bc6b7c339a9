//! Design optimization driver - crash-tolerant multi-objective optimization
//! of engineering designs.
//!
//! This crate connects a caller-supplied design pipeline to a MOEA/D
//! population optimizer. Every candidate passes through a fitness wrapper
//! that builds and evaluates the design, optionally in an isolated worker,
//! scores broken designs with a fallback objective vector, and appends every
//! successful evaluation to a durable archive.
//!
//! # Architecture
//!
//! - `design`: capability traits implemented by the caller
//! - `schema`: configuration, record and progress types
//! - `archive`: append-only archive of evaluated designs and Pareto queries
//! - `optimize`: fitness wrapper, crash isolation, MOEA/D and checkpoints
//!
//! # Example
//!
//! ```rust,no_run
//! use design_optim::{
//!     design::{DesignCreationError, DesignSpace, Designer, EvaluationError, Evaluator},
//!     optimize::DesignOptimizationMoead,
//!     schema::OptimizerConfig,
//! };
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Beam;
//!
//! impl Designer for Beam {
//!     type Design = Vec<f64>;
//!     fn create_design(&self, x: &[f64]) -> Result<Vec<f64>, DesignCreationError> {
//!         Ok(x.to_vec())
//!     }
//! }
//!
//! struct Deflection;
//!
//! impl Evaluator<Vec<f64>> for Deflection {
//!     type Output = Vec<f64>;
//!     fn evaluate(&self, d: &Vec<f64>) -> Result<Vec<f64>, EvaluationError> {
//!         Ok(vec![d[0] * d[1], 1.0 / (d[0] + d[1])])
//!     }
//! }
//!
//! struct Space(Vec<(f64, f64)>);
//!
//! impl DesignSpace<Vec<f64>> for Space {
//!     fn bounds(&self) -> &[(f64, f64)] {
//!         &self.0
//!     }
//!     fn n_obj(&self) -> usize {
//!         2
//!     }
//!     fn get_objectives(&self, results: &Vec<f64>) -> Vec<f64> {
//!         results.clone()
//!     }
//!     fn check_constraints(&self, _results: &Vec<f64>) -> bool {
//!         true
//!     }
//! }
//!
//! let config = OptimizerConfig::default();
//! let space = Space(vec![(0.1, 1.0), (0.1, 1.0)]);
//! let mut optimizer =
//!     DesignOptimizationMoead::from_config(&config, Beam, Deflection, space).unwrap();
//! let pop = optimizer
//!     .run_resumable(&config.population, &config.paths)
//!     .unwrap();
//! println!("Ideal point after {} generations: {:?}", pop.generation, pop.ideal_point());
//! ```

pub mod archive;
pub mod design;
pub mod optimize;
pub mod schema;

// Re-export commonly used types
pub use archive::DataHandler;
pub use design::{DesignSpace, Designer, Evaluator};
pub use optimize::{DesignOptimizationMoead, DesignProblem, Population};
pub use schema::{OptiRecord, OptimizerConfig};
