//! Fitness wrapper around the designer, evaluator and design space.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::worker::{ExitKind, IsolatedOutcome, Isolation, ProcessWorker, ThreadWorker, Worker};
use crate::archive::DataHandler;
use crate::design::{DesignCreationError, DesignSpace, Designer, EvaluationError, Evaluator};
use crate::schema::{ConfigError, IsolationConfig};

/// Objective value used for every objective of a rejected candidate when no
/// explicit fallback is configured.
pub const DEFAULT_INVALID_OBJECTIVE: f64 = 1e4;

/// Errors that abort fitness evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ProblemError {
    #[error("Design creation failed: {0}")]
    Design(#[from] DesignCreationError),
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("Worker error: {0}")]
    Worker(#[from] super::worker::WorkerError),
    #[error("Archive error: {0}")]
    Archive(#[from] crate::archive::ArchiveError),
    #[error("Expected {expected} free variables, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("Design space returned {actual} objectives, expected {expected}")]
    ObjectiveCount { expected: usize, actual: usize },
    #[error("Invalid design objectives have {actual} entries, expected {expected}")]
    FallbackLength { expected: usize, actual: usize },
    #[error("Invalid isolation settings: {0}")]
    Config(#[from] ConfigError),
}

/// Counters of fitness outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationStats {
    /// Fitness calls.
    pub evaluations: u64,
    /// Candidates evaluated and archived.
    pub successes: u64,
    /// Candidates rejected as invalid designs (including missing artifacts).
    pub invalid: u64,
    /// Candidates rejected because evaluation faulted.
    pub faults: u64,
    /// Isolated workers that exited with an unrecognized code.
    pub unknown_exits: u64,
    /// Isolated workers terminated at the deadline.
    pub timeouts: u64,
}

impl EvaluationStats {
    /// Candidates scored with the fallback objectives.
    pub fn rejected(&self) -> u64 {
        self.invalid + self.faults + self.unknown_exits + self.timeouts
    }
}

/// Why a candidate was scored with the fallback objectives.
#[derive(Debug)]
enum Rejection {
    InvalidDesign(String),
    MissingArtifact(io::Error),
    Fault(String),
    UnknownExit(i32),
    TimedOut(Duration),
}

type ResultsTransform<R> = Box<dyn Fn(R) -> R>;

/// Optimization problem seen by the optimizer: free variables in, objective
/// vector out.
///
/// Every successful evaluation is appended to the archive. Invalid or faulty
/// candidates receive the fallback objective vector and are not archived.
pub struct DesignProblem<Ds, Ev, Sp>
where
    Ds: Designer,
    Ev: Evaluator<Ds::Design>,
{
    designer: Ds,
    evaluator: Arc<Ev>,
    design_space: Sp,
    handler: DataHandler,
    invalid_design_objs: Vec<f64>,
    isolation: Option<Isolation<Ds::Design, Ev::Output>>,
    transform: Option<ResultsTransform<Ev::Output>>,
    stats: EvaluationStats,
}

impl<Ds, Ev, Sp> DesignProblem<Ds, Ev, Sp>
where
    Ds: Designer,
    Ev: Evaluator<Ds::Design>,
    Sp: DesignSpace<Ev::Output>,
{
    /// Create a problem that evaluates in-process.
    ///
    /// The designer is saved through the data handler. `invalid_design_objs`
    /// defaults to [`DEFAULT_INVALID_OBJECTIVE`] for every objective.
    pub fn new(
        designer: Ds,
        evaluator: Ev,
        design_space: Sp,
        handler: DataHandler,
        invalid_design_objs: Option<Vec<f64>>,
    ) -> Result<Self, ProblemError>
    where
        Ds: Serialize,
    {
        let n_obj = design_space.n_obj();
        let invalid_design_objs =
            invalid_design_objs.unwrap_or_else(|| vec![DEFAULT_INVALID_OBJECTIVE; n_obj]);
        if invalid_design_objs.len() != n_obj {
            return Err(ProblemError::FallbackLength {
                expected: n_obj,
                actual: invalid_design_objs.len(),
            });
        }

        handler.save_designer(&designer)?;

        Ok(Self {
            designer,
            evaluator: Arc::new(evaluator),
            design_space,
            handler,
            invalid_design_objs,
            isolation: None,
            transform: None,
            stats: EvaluationStats::default(),
        })
    }

    /// Evaluate through a crash-isolated worker.
    ///
    /// With a configured command, each evaluation runs in a child process;
    /// otherwise on a dedicated thread sharing this problem's evaluator.
    pub fn with_isolation(self, config: &IsolationConfig) -> Result<Self, ProblemError>
    where
        Ev: Send + Sync + 'static,
        Ds::Design: Clone + Serialize + Send + 'static,
        Ev::Output: DeserializeOwned + Send + 'static,
    {
        let worker: Box<dyn Worker<Ds::Design, Ev::Output>> = match &config.command {
            Some(command) => Box::new(ProcessWorker::from(command)),
            None => Box::new(ThreadWorker::new(Arc::clone(&self.evaluator))),
        };
        self.with_worker(worker, config)
    }

    /// Evaluate through a caller-supplied worker.
    pub fn with_worker(
        mut self,
        worker: Box<dyn Worker<Ds::Design, Ev::Output>>,
        config: &IsolationConfig,
    ) -> Result<Self, ProblemError> {
        self.isolation = Some(Isolation::new(worker, config)?);
        Ok(self)
    }

    /// Apply `transform` to every evaluation result before scoring and
    /// archiving.
    pub fn with_results_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Ev::Output) -> Ev::Output + 'static,
    {
        self.transform = Some(Box::new(transform));
        self
    }

    /// Search bounds of the free variables.
    pub fn get_bounds(&self) -> &[(f64, f64)] {
        self.design_space.bounds()
    }

    /// Number of objectives.
    pub fn get_nobj(&self) -> usize {
        self.design_space.n_obj()
    }

    /// Outcome counters since construction.
    pub fn stats(&self) -> &EvaluationStats {
        &self.stats
    }

    /// Objective vector assigned to rejected candidates.
    pub fn invalid_design_objs(&self) -> &[f64] {
        &self.invalid_design_objs
    }

    /// Whether evaluations run in a worker.
    pub fn is_isolated(&self) -> bool {
        self.isolation.is_some()
    }

    pub fn designer(&self) -> &Ds {
        &self.designer
    }

    pub fn design_space(&self) -> &Sp {
        &self.design_space
    }

    pub fn handler(&self) -> &DataHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut DataHandler {
        &mut self.handler
    }

    /// Objective vector of a candidate.
    ///
    /// Invalid designs, evaluation faults, missing artifacts, unknown worker
    /// exits and timeouts all yield the fallback objectives without touching
    /// the archive. Non-finite objectives count as a fault. Everything else that goes wrong is returned as an error.
    pub fn fitness(&mut self, x: &[f64]) -> Result<Vec<f64>, ProblemError>
    where
        Ds::Design: Serialize,
        Ev::Output: Serialize,
    {
        let dims = self.design_space.bounds().len();
        if x.len() != dims {
            return Err(ProblemError::Dimension {
                expected: dims,
                actual: x.len(),
            });
        }
        self.stats.evaluations += 1;

        let design = match self.designer.create_design(x) {
            Ok(design) => design,
            Err(DesignCreationError::InvalidDesign(reason)) => {
                return Ok(self.reject(x, Rejection::InvalidDesign(reason)));
            }
            Err(e) => return Err(e.into()),
        };

        let results = match self.evaluate(&design)? {
            Ok(results) => results,
            Err(rejection) => return Ok(self.reject(x, rejection)),
        };
        let results = match &self.transform {
            Some(transform) => transform(results),
            None => results,
        };

        let objs = self.design_space.get_objectives(&results);
        let n_obj = self.design_space.n_obj();
        if objs.len() != n_obj {
            return Err(ProblemError::ObjectiveCount {
                expected: n_obj,
                actual: objs.len(),
            });
        }
        if !objs.iter().all(|v| v.is_finite()) {
            let detail = format!("non-finite objectives {:?}", objs);
            return Ok(self.reject(x, Rejection::Fault(detail)));
        }

        self.handler.save_to_archive(x, &design, &results, &objs)?;
        self.stats.successes += 1;
        debug!("Evaluated {:?} -> {:?}", x, objs);
        Ok(objs)
    }

    fn evaluate(
        &self,
        design: &Ds::Design,
    ) -> Result<Result<Ev::Output, Rejection>, ProblemError> {
        if let Some(isolation) = &self.isolation {
            return Ok(match isolation.evaluate(design)? {
                IsolatedOutcome::Done(results) => Ok(results),
                IsolatedOutcome::Exited(code) => Err(match ExitKind::from_code(code) {
                    ExitKind::InvalidDesign => {
                        Rejection::InvalidDesign("worker rejected the design".to_string())
                    }
                    ExitKind::Fault => Rejection::Fault(format!("worker exited with code {code}")),
                    ExitKind::Success => {
                        Rejection::Fault("worker exited without a result".to_string())
                    }
                    ExitKind::Unknown(code) => Rejection::UnknownExit(code),
                }),
                IsolatedOutcome::TimedOut(elapsed) => Err(Rejection::TimedOut(elapsed)),
            });
        }

        match self.evaluator.evaluate(design) {
            Ok(results) => Ok(Ok(results)),
            Err(EvaluationError::InvalidDesign(reason)) => Ok(Err(Rejection::InvalidDesign(reason))),
            Err(EvaluationError::Fault(detail)) => Ok(Err(Rejection::Fault(detail))),
            Err(EvaluationError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Ok(Err(Rejection::MissingArtifact(e)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reject(&mut self, x: &[f64], rejection: Rejection) -> Vec<f64> {
        match rejection {
            Rejection::InvalidDesign(reason) => {
                self.stats.invalid += 1;
                debug!("Invalid design {:?}: {}", x, reason);
            }
            Rejection::MissingArtifact(e) => {
                self.stats.invalid += 1;
                error!("Evaluation of {:?} is missing an artifact: {}", x, e);
            }
            Rejection::Fault(detail) => {
                self.stats.faults += 1;
                warn!("Evaluation fault for {:?}: {}", x, detail);
            }
            Rejection::UnknownExit(code) => {
                self.stats.unknown_exits += 1;
                error!("Worker for {:?} exited with unknown code {}", x, code);
            }
            Rejection::TimedOut(elapsed) => {
                self.stats.timeouts += 1;
                warn!(
                    "Evaluation of {:?} timed out after {:.1}s",
                    x,
                    elapsed.as_secs_f64()
                );
            }
        }
        self.invalid_design_objs.clone()
    }
}
