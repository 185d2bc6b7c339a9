//! Schema module - Configuration, record and progress types for optimization
//! runs.

mod config;
mod progress;
mod record;

pub use config::*;
pub use progress::{GenerationProgress, OptimizerPhase};
pub(crate) use record::OptiRecordRef;
pub use record::{Bounds, OptiRecord, within_bounds};
