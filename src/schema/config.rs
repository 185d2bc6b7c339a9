//! Configuration types for design optimization runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Population and generation settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Decomposition-based evolution parameters.
    #[serde(default)]
    pub moead: MoeadConfig,
    /// How candidates are evaluated and scored on failure.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Archive and checkpoint locations.
    #[serde(default)]
    pub paths: RunPaths,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Population size and generation budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of individuals. Must match the weight grid for the objective
    /// count (any size for two objectives).
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Total generation budget. A resumed run only evolves the generations
    /// left after its checkpoint.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Neighbourhood size (closest weight vectors per sub-problem).
    #[serde(default = "default_neighbours")]
    pub neighbours: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            generations: default_generations(),
            neighbours: default_neighbours(),
        }
    }
}

fn default_population_size() -> usize {
    78
}
fn default_generations() -> usize {
    100
}
fn default_neighbours() -> usize {
    20
}

/// MOEA/D operator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoeadConfig {
    /// Differential evolution crossover rate.
    #[serde(default = "default_cr")]
    pub cr: f64,
    /// Differential evolution scale factor.
    #[serde(default = "default_f")]
    pub f: f64,
    /// Distribution index of polynomial mutation.
    #[serde(default = "default_eta_m")]
    pub eta_m: f64,
    /// Probability of mating within the neighbourhood instead of the whole
    /// population.
    #[serde(default = "default_realb")]
    pub realb: f64,
    /// Maximum number of solutions replaced by one offspring.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Enable the `realb`/`limit` diversity mechanism.
    #[serde(default = "default_preserve_diversity")]
    pub preserve_diversity: bool,
}

impl Default for MoeadConfig {
    fn default() -> Self {
        Self {
            cr: default_cr(),
            f: default_f(),
            eta_m: default_eta_m(),
            realb: default_realb(),
            limit: default_limit(),
            preserve_diversity: default_preserve_diversity(),
        }
    }
}

fn default_cr() -> f64 {
    1.0
}
fn default_f() -> f64 {
    0.5
}
fn default_eta_m() -> f64 {
    20.0
}
fn default_realb() -> f64 {
    0.9
}
fn default_limit() -> usize {
    2
}
fn default_preserve_diversity() -> bool {
    true
}

/// Evaluation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Crash isolation. `None` evaluates in-process.
    #[serde(default)]
    pub isolation: Option<IsolationConfig>,
    /// Objective vector assigned to invalid or faulty candidates.
    /// Defaults to `1e4` for every objective.
    #[serde(default)]
    pub invalid_design_objs: Option<Vec<f64>>,
}

/// Crash-isolated evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Interval between worker status polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Deadline after which a running worker is terminated and scored as a
    /// fault. `None` waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    /// External worker command. When absent, evaluations run on a
    /// dedicated thread with panic isolation.
    #[serde(default)]
    pub command: Option<WorkerCommand>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: None,
            command: None,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl IsolationConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timeout as a duration, if configured.
    pub fn timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.timeout_secs
            .map(|secs| match Duration::try_from_secs_f64(secs) {
                Ok(timeout) if !timeout.is_zero() => Ok(timeout),
                _ => Err(ConfigError::InvalidTimeout),
            })
            .transpose()
    }

    /// Check the poll interval and timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        self.timeout()?;
        Ok(())
    }
}

/// Program (and arguments) run as an isolated evaluation worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// File locations for one optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPaths {
    /// Append-only archive of evaluated designs.
    pub archive: PathBuf,
    /// Serialized designer used by the run.
    pub designer: PathBuf,
    /// Candidate table checkpoint.
    pub candidates: PathBuf,
    /// Fitness table checkpoint.
    pub fitness: PathBuf,
}

impl Default for RunPaths {
    fn default() -> Self {
        Self {
            archive: PathBuf::from("opti_archive.dopa"),
            designer: PathBuf::from("opti_designer.json"),
            candidates: PathBuf::from("latest_pop.csv"),
            fitness: PathBuf::from("latest_pop_f.csv"),
        }
    }
}

impl RunPaths {
    /// All paths placed under a common directory with default file names.
    pub fn in_dir<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        let defaults = Self::default();
        Self {
            archive: dir.join(defaults.archive),
            designer: dir.join(defaults.designer),
            candidates: dir.join(defaults.candidates),
            fitness: dir.join(defaults.fitness),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Neighbourhood size must be at least 2")]
    NeighbourhoodTooSmall,
    #[error("Invalid operator parameter: {0}")]
    InvalidOperator(String),
    #[error("Poll interval must be positive")]
    InvalidPollInterval,
    #[error("Timeout must be a positive, representable number of seconds")]
    InvalidTimeout,
    #[error("Invalid design objectives must be finite")]
    InvalidFallback,
}

impl OptimizerConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population.size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if self.population.neighbours < 2 {
            return Err(ConfigError::NeighbourhoodTooSmall);
        }

        let m = &self.moead;
        if !(0.0..=1.0).contains(&m.cr) {
            return Err(ConfigError::InvalidOperator(format!(
                "cr ({}) must be in [0, 1]",
                m.cr
            )));
        }
        if !(0.0..=1.0).contains(&m.realb) {
            return Err(ConfigError::InvalidOperator(format!(
                "realb ({}) must be in [0, 1]",
                m.realb
            )));
        }
        if m.f <= 0.0 || !m.f.is_finite() {
            return Err(ConfigError::InvalidOperator(format!(
                "f ({}) must be positive",
                m.f
            )));
        }
        if m.eta_m < 0.0 || !m.eta_m.is_finite() {
            return Err(ConfigError::InvalidOperator(format!(
                "eta_m ({}) must be non-negative",
                m.eta_m
            )));
        }
        if m.limit == 0 {
            return Err(ConfigError::InvalidOperator(
                "limit must be at least 1".to_string(),
            ));
        }

        if let Some(isolation) = &self.evaluation.isolation {
            isolation.validate()?;
        }

        if let Some(objs) = &self.evaluation.invalid_design_objs
            && objs.iter().any(|v| !v.is_finite())
        {
            return Err(ConfigError::InvalidFallback);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.population.neighbours, 20);
        assert_eq!(config.moead.limit, 2);
    }

    #[test]
    fn test_serialization_fills_defaults() {
        let parsed: OptimizerConfig =
            serde_json::from_str(r#"{"population": {"size": 10}, "random_seed": 7}"#).unwrap();
        assert_eq!(parsed.population.size, 10);
        assert_eq!(parsed.population.neighbours, 20);
        assert_eq!(parsed.moead.f, 0.5);
        assert_eq!(parsed.random_seed, Some(7));
        assert!(parsed.evaluation.isolation.is_none());
    }

    #[test]
    fn test_isolation_roundtrip() {
        let config = OptimizerConfig {
            evaluation: EvaluationConfig {
                isolation: Some(IsolationConfig {
                    timeout_secs: Some(30.0),
                    command: Some(WorkerCommand {
                        program: PathBuf::from("eval-worker"),
                        args: vec!["--quiet".to_string()],
                    }),
                    ..Default::default()
                }),
                invalid_design_objs: Some(vec![1e4, 1e4]),
            },
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OptimizerConfig = serde_json::from_str(&json).unwrap();
        let isolation = parsed.evaluation.isolation.unwrap();
        assert_eq!(isolation.poll_interval(), Duration::from_millis(100));
        assert_eq!(isolation.timeout().unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(isolation.command.unwrap().args, vec!["--quiet"]);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = OptimizerConfig::default();
        config.population.size = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PopulationTooSmall)
        ));

        let mut config = OptimizerConfig::default();
        config.moead.realb = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOperator(_))
        ));

        let mut config = OptimizerConfig::default();
        config.evaluation.isolation = Some(IsolationConfig {
            timeout_secs: Some(-1.0),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout)));
    }

    #[test]
    fn test_unrepresentable_timeouts() {
        for secs in [1e300, f64::INFINITY, f64::NAN, -0.5, 0.0] {
            let isolation = IsolationConfig {
                timeout_secs: Some(secs),
                ..Default::default()
            };
            assert!(
                matches!(isolation.timeout(), Err(ConfigError::InvalidTimeout)),
                "timeout {} accepted",
                secs
            );

            let mut config = OptimizerConfig::default();
            config.evaluation.isolation = Some(isolation);
            assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout)));
        }

        let isolation = IsolationConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            isolation.validate(),
            Err(ConfigError::InvalidPollInterval)
        ));
        assert_eq!(IsolationConfig::default().timeout().unwrap(), None);
    }

    #[test]
    fn test_paths_in_dir() {
        let paths = RunPaths::in_dir("/tmp/run");
        assert_eq!(paths.archive, PathBuf::from("/tmp/run/opti_archive.dopa"));
        assert_eq!(paths.fitness, PathBuf::from("/tmp/run/latest_pop_f.csv"));
    }
}
