//! MOEA/D population optimizer with per-generation checkpoints.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::checkpoint::{self, CheckpointError, CheckpointState};
use super::decomposition::{
    GridError, ideal_point, neighbourhoods, tchebycheff, update_ideal, weight_grid,
};
use super::fitness::{DesignProblem, ProblemError};
use super::operators::VariationRng;
use crate::archive::DataHandler;
use crate::design::{DesignSpace, Designer, Evaluator};
use crate::schema::{
    ConfigError, GenerationProgress, MoeadConfig, OptimizerConfig, OptimizerPhase,
    PopulationConfig, RunPaths,
};

/// Errors that abort an optimization run.
#[derive(Debug, thiserror::Error)]
pub enum OptimizationError {
    #[error(transparent)]
    Problem(#[from] ProblemError),
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Population is empty")]
    EmptyPopulation,
    #[error("Population has {candidates} candidates but {fitness} fitness rows")]
    RowMismatch { candidates: usize, fitness: usize },
    #[error("{}: {rows} rows, need {needed}", path.display())]
    TooFewRows {
        path: PathBuf,
        rows: usize,
        needed: usize,
    },
    #[error("{}: rows have {actual} columns, expected {expected}", path.display())]
    Columns {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
}

/// Candidate and fitness tables of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    /// Free-variable vectors.
    pub candidates: Vec<Vec<f64>>,
    /// Objective vectors, parallel to `candidates`.
    pub fitness: Vec<Vec<f64>>,
    /// Generations evolved to reach this population.
    pub generation: u64,
}

impl Population {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Component-wise best objective values.
    pub fn ideal_point(&self) -> Vec<f64> {
        ideal_point(&self.fitness)
    }
}

/// Multi-objective optimizer based on decomposition (MOEA/D).
///
/// Each population slot owns a weight vector. Every generation, each slot
/// (in random order) breeds one offspring by differential evolution and
/// polynomial mutation from parents in its neighbourhood, and the offspring
/// replaces up to `limit` neighbours whose Tchebycheff value it improves.
///
/// Randomness for generation `g` is derived from the run seed and `g` alone,
/// so a run resumed from a checkpoint follows the same trajectory as an
/// uninterrupted one.
pub struct DesignOptimizationMoead<Ds, Ev, Sp>
where
    Ds: Designer,
    Ev: Evaluator<Ds::Design>,
{
    problem: DesignProblem<Ds, Ev, Sp>,
    config: MoeadConfig,
    seed: u64,
    phase: OptimizerPhase,
}

impl<Ds, Ev, Sp> DesignOptimizationMoead<Ds, Ev, Sp>
where
    Ds: Designer,
    Ev: Evaluator<Ds::Design>,
    Sp: DesignSpace<Ev::Output>,
    Ds::Design: Serialize,
    Ev::Output: Serialize,
{
    /// Create an optimizer. Without a seed one is drawn at random and
    /// logged so the run can be repeated.
    pub fn new(problem: DesignProblem<Ds, Ev, Sp>, config: MoeadConfig, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        info!("Optimizer seed: {}", seed);
        Self {
            problem,
            config,
            seed,
            phase: OptimizerPhase::Initialized,
        }
    }

    /// Build the problem and optimizer described by `config`.
    pub fn from_config(
        config: &OptimizerConfig,
        designer: Ds,
        evaluator: Ev,
        design_space: Sp,
    ) -> Result<Self, OptimizationError>
    where
        Ds: Serialize,
        Ev: Send + Sync + 'static,
        Ds::Design: Clone + Send + 'static,
        Ev::Output: DeserializeOwned + Send + 'static,
    {
        config.validate()?;

        let handler = DataHandler::new(&config.paths.archive, &config.paths.designer);
        let mut problem = DesignProblem::new(
            designer,
            evaluator,
            design_space,
            handler,
            config.evaluation.invalid_design_objs.clone(),
        )?;
        if let Some(isolation) = &config.evaluation.isolation {
            problem = problem.with_isolation(isolation)?;
        }

        Ok(Self::new(problem, config.moead.clone(), config.random_seed))
    }

    /// Seed of the run.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn phase(&self) -> OptimizerPhase {
        self.phase
    }

    pub fn config(&self) -> &MoeadConfig {
        &self.config
    }

    pub fn problem(&self) -> &DesignProblem<Ds, Ev, Sp> {
        &self.problem
    }

    pub fn problem_mut(&mut self) -> &mut DesignProblem<Ds, Ev, Sp> {
        &mut self.problem
    }

    pub fn into_problem(self) -> DesignProblem<Ds, Ev, Sp> {
        self.problem
    }

    /// Random population of `size` candidates, each evaluated once.
    pub fn initial_pop(&mut self, size: usize) -> Result<Population, OptimizationError> {
        let bounds = self.problem.get_bounds().to_vec();
        let mut rng = VariationRng::for_generation(self.seed, 0);

        let mut candidates = Vec::with_capacity(size);
        let mut fitness = Vec::with_capacity(size);
        for _ in 0..size {
            let x = rng.random_vector(&bounds);
            fitness.push(self.problem.fitness(&x)?);
            candidates.push(x);
        }

        info!(
            "Initial population: {} candidates, {} rejected",
            size,
            self.problem.stats().rejected()
        );
        self.phase = OptimizerPhase::Initialized;
        Ok(Population {
            candidates,
            fitness,
            generation: 0,
        })
    }

    /// Load a checkpointed population.
    ///
    /// Returns `None` when the candidate table does not exist. When the
    /// checkpoint carries a seed, the optimizer adopts it. Fitness is rebuilt
    /// by evaluating every candidate again when its table is missing or
    /// does not belong to the candidate table. A candidate table newer than
    /// the state sidecar is taken as the generation after it.
    pub fn load_pop(
        &mut self,
        candidates_path: &Path,
        fitness_path: &Path,
        size: usize,
    ) -> Result<Option<Population>, OptimizationError> {
        let Some(mut candidates) = checkpoint::read_table(candidates_path)? else {
            info!(
                "No candidate checkpoint at {}",
                candidates_path.display()
            );
            return Ok(None);
        };
        take_rows(&mut candidates, candidates_path, size)?;
        check_columns(&candidates, candidates_path, self.problem.get_bounds().len())?;

        let mut generation = 0;
        let mut fitness_matches = true;
        match checkpoint::read_state(candidates_path)? {
            Some(state) => {
                if state.seed != self.seed {
                    info!(
                        "Adopting seed {} from checkpoint (was {})",
                        state.seed, self.seed
                    );
                    self.seed = state.seed;
                }
                generation = state.generation;

                if let Some(expected) = state.candidates_crc
                    && checkpoint::table_checksum(candidates_path)? != Some(expected)
                {
                    generation += 1;
                    fitness_matches = false;
                    warn!(
                        "Candidate checkpoint {} is newer than its state, resuming at generation {}",
                        candidates_path.display(),
                        generation
                    );
                } else if let Some(expected) = state.fitness_crc
                    && checkpoint::table_checksum(fitness_path)? != Some(expected)
                {
                    fitness_matches = false;
                    warn!(
                        "Fitness checkpoint {} does not match the candidate table",
                        fitness_path.display()
                    );
                }
            }
            None => {
                warn!(
                    "No checkpoint state for {}, counting generations from 0",
                    candidates_path.display()
                );
            }
        }

        let stored = if fitness_matches {
            checkpoint::read_table(fitness_path)?
        } else {
            None
        };
        let fitness = match stored {
            Some(mut fitness) => {
                take_rows(&mut fitness, fitness_path, size)?;
                check_columns(&fitness, fitness_path, self.problem.get_nobj())?;
                fitness
            }
            None => {
                warn!(
                    "Re-evaluating {} checkpointed candidates for {}",
                    candidates.len(),
                    fitness_path.display()
                );
                candidates
                    .iter()
                    .map(|x| self.problem.fitness(x))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        info!(
            "Loaded population of {} at generation {} from {}",
            candidates.len(),
            generation,
            candidates_path.display()
        );
        self.phase = OptimizerPhase::Initialized;
        Ok(Some(Population {
            candidates,
            fitness,
            generation,
        }))
    }

    /// Evolve `pop` for `n_generations`, checkpointing after each one.
    pub fn run_optimization(
        &mut self,
        pop: Population,
        n_generations: usize,
        candidates_path: &Path,
        fitness_path: &Path,
        neighbourhood_size: usize,
    ) -> Result<Population, OptimizationError> {
        self.run_with_callback(
            pop,
            n_generations,
            candidates_path,
            fitness_path,
            neighbourhood_size,
            |_| {},
        )
    }

    /// Like [`Self::run_optimization`], reporting progress after every
    /// checkpoint.
    pub fn run_with_callback<F>(
        &mut self,
        mut pop: Population,
        n_generations: usize,
        candidates_path: &Path,
        fitness_path: &Path,
        neighbourhood_size: usize,
        mut callback: F,
    ) -> Result<Population, OptimizationError>
    where
        F: FnMut(&GenerationProgress),
    {
        if pop.is_empty() {
            return Err(OptimizationError::EmptyPopulation);
        }
        if pop.fitness.len() != pop.len() {
            return Err(OptimizationError::RowMismatch {
                candidates: pop.len(),
                fitness: pop.fitness.len(),
            });
        }

        let weights = weight_grid(pop.len(), self.problem.get_nobj())?;
        if neighbourhood_size > pop.len() {
            warn!(
                "Neighbourhood size {} exceeds population size {}, using {}",
                neighbourhood_size,
                pop.len(),
                pop.len()
            );
        }
        let neighbours = neighbourhoods(&weights, neighbourhood_size.max(1));

        for _ in 0..n_generations {
            self.phase = OptimizerPhase::Evolving;
            let generation = pop.generation + 1;
            let mut rng = VariationRng::for_generation(self.seed, generation);
            self.evolve(&mut pop, &weights, &neighbours, &mut rng)?;
            pop.generation = generation;

            let candidates_crc = checkpoint::write_table(candidates_path, &pop.candidates)?;
            let fitness_crc = checkpoint::write_table(fitness_path, &pop.fitness)?;
            checkpoint::write_state(
                candidates_path,
                &CheckpointState {
                    seed: self.seed,
                    generation,
                    candidates_crc: Some(candidates_crc),
                    fitness_crc: Some(fitness_crc),
                },
            )?;
            self.phase = OptimizerPhase::Checkpointed;

            let progress = GenerationProgress {
                generation,
                phase: self.phase,
                ideal_point: pop.ideal_point(),
                evaluations: self.problem.stats().evaluations,
                rejected: self.problem.stats().rejected(),
            };
            info!(
                "Generation {} checkpointed: ideal point {:?}, {} evaluations",
                generation, progress.ideal_point, progress.evaluations
            );
            callback(&progress);
        }

        self.phase = OptimizerPhase::Completed;
        Ok(pop)
    }

    /// Resume from the configured checkpoint, or start a new population,
    /// and evolve until `population.generations` have been completed.
    pub fn run_resumable(
        &mut self,
        population: &PopulationConfig,
        paths: &RunPaths,
    ) -> Result<Population, OptimizationError> {
        weight_grid(population.size, self.problem.get_nobj())?;

        let pop = match self.load_pop(&paths.candidates, &paths.fitness, population.size)? {
            Some(pop) => pop,
            None => self.initial_pop(population.size)?,
        };

        let remaining = (population.generations as u64).saturating_sub(pop.generation) as usize;
        if remaining == 0 {
            info!(
                "Checkpoint already at generation {}, nothing to do",
                pop.generation
            );
            self.phase = OptimizerPhase::Completed;
            return Ok(pop);
        }

        self.run_optimization(
            pop,
            remaining,
            &paths.candidates,
            &paths.fitness,
            population.neighbours,
        )
    }

    /// One MOEA/D generation.
    fn evolve(
        &mut self,
        pop: &mut Population,
        weights: &[Vec<f64>],
        neighbours: &[Vec<usize>],
        rng: &mut VariationRng,
    ) -> Result<(), OptimizationError> {
        let n = pop.len();
        let bounds = self.problem.get_bounds().to_vec();
        let mutation_rate = if bounds.is_empty() {
            0.0
        } else {
            1.0 / bounds.len() as f64
        };
        let limit = if self.config.preserve_diversity {
            self.config.limit
        } else {
            usize::MAX
        };

        let mut ideal = pop.ideal_point();
        let mut order: Vec<usize> = (0..n).collect();
        rng.shuffle(&mut order);

        let mut replacements = 0usize;
        for &i in &order {
            let whole_population =
                self.config.preserve_diversity && !rng.chance(self.config.realb);
            let mut pool: Vec<usize> = if whole_population {
                (0..n).collect()
            } else {
                neighbours[i].clone()
            };

            let (a, b) = rng.pick_parents(&pool);
            let mut child = rng.de_crossover(
                &pop.candidates[i],
                &pop.candidates[a],
                &pop.candidates[b],
                self.config.cr,
                self.config.f,
                &bounds,
            );
            rng.polynomial_mutation(&mut child, &bounds, self.config.eta_m, mutation_rate);

            let child_fitness = self.problem.fitness(&child)?;
            update_ideal(&mut ideal, &child_fitness);

            rng.shuffle(&mut pool);
            let mut replaced = 0usize;
            for &j in &pool {
                if replaced >= limit {
                    break;
                }
                let weight = &weights[j];
                if tchebycheff(&child_fitness, weight, &ideal)
                    < tchebycheff(&pop.fitness[j], weight, &ideal)
                {
                    pop.candidates[j].clone_from(&child);
                    pop.fitness[j].clone_from(&child_fitness);
                    replaced += 1;
                }
            }
            replacements += replaced;
        }

        debug!(
            "Generation {}: {} replacements",
            pop.generation + 1,
            replacements
        );
        Ok(())
    }
}

fn take_rows(rows: &mut Vec<Vec<f64>>, path: &Path, size: usize) -> Result<(), OptimizationError> {
    if rows.len() < size {
        return Err(OptimizationError::TooFewRows {
            path: path.to_path_buf(),
            rows: rows.len(),
            needed: size,
        });
    }
    if rows.len() > size {
        debug!(
            "Using the first {} of {} rows in {}",
            size,
            rows.len(),
            path.display()
        );
        rows.truncate(size);
    }
    Ok(())
}

fn check_columns(rows: &[Vec<f64>], path: &Path, expected: usize) -> Result<(), OptimizationError> {
    match rows.iter().find(|row| row.len() != expected) {
        Some(row) => Err(OptimizationError::Columns {
            path: path.to_path_buf(),
            expected,
            actual: row.len(),
        }),
        None => Ok(()),
    }
}
