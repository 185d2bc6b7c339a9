//! Crash-isolated evaluation workers.
//!
//! A [`Worker`] evaluates one design in an execution context separate from
//! the optimizer. The parent polls the returned [`WorkerHandle`] until the
//! worker reports a result or an exit code:
//!
//! | code | meaning                         |
//! |------|---------------------------------|
//! | 0    | success, result delivered       |
//! | 1    | the design is invalid           |
//! | 2    | unexpected evaluation fault     |
//! | else | unknown failure (e.g. a crash)  |

use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, Command, ExitCode, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::design::{EvaluationError, Evaluator};
use crate::schema::{ConfigError, IsolationConfig, WorkerCommand};

/// Exit code of a successful evaluation.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code signalling an invalid design.
pub const EXIT_INVALID_DESIGN: i32 = 1;
/// Exit code signalling an unexpected evaluation fault.
pub const EXIT_FAULT: i32 = 2;

/// How long to wait for a finished process to deliver its output.
const OUTPUT_GRACE: Duration = Duration::from_secs(5);

/// Status of a running worker.
#[derive(Debug)]
pub enum WorkerStatus<R> {
    /// Still evaluating.
    Pending,
    /// Finished and delivered a result.
    Done(R),
    /// Finished without a result.
    Failed(i32),
}

/// Classification of a worker exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    InvalidDesign,
    Fault,
    Unknown(i32),
}

impl ExitKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            EXIT_SUCCESS => Self::Success,
            EXIT_INVALID_DESIGN => Self::InvalidDesign,
            EXIT_FAULT => Self::Fault,
            other => Self::Unknown(other),
        }
    }
}

/// Worker errors that abort the run (as opposed to failed evaluations).
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("Failed to encode design for worker: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to poll worker: {0}")]
    Poll(#[source] io::Error),
}

/// Handle to one running evaluation.
pub trait WorkerHandle<R> {
    /// Check the worker without blocking.
    fn poll(&mut self) -> Result<WorkerStatus<R>, WorkerError>;

    /// Stop the worker. The handle must not be polled afterwards.
    fn terminate(&mut self);
}

/// Starts isolated evaluations.
pub trait Worker<D, R> {
    /// Start evaluating `design`.
    fn spawn(&self, design: &D) -> Result<Box<dyn WorkerHandle<R>>, WorkerError>;
}

// ============================================================================
// Polling loop
// ============================================================================

/// Final outcome of an isolated evaluation.
#[derive(Debug)]
pub enum IsolatedOutcome<R> {
    Done(R),
    Exited(i32),
    TimedOut(Duration),
}

/// A worker together with its polling policy.
pub struct Isolation<D, R> {
    worker: Box<dyn Worker<D, R>>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl<D, R> Isolation<D, R> {
    pub fn new(
        worker: Box<dyn Worker<D, R>>,
        config: &IsolationConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            worker,
            poll_interval: config.poll_interval(),
            timeout: config.timeout()?,
        })
    }

    /// Run one evaluation to completion, polling at the configured
    /// interval. A worker still running at the deadline is terminated.
    pub fn evaluate(&self, design: &D) -> Result<IsolatedOutcome<R>, WorkerError> {
        let start = Instant::now();
        let mut handle = self.worker.spawn(design)?;

        loop {
            match handle.poll()? {
                WorkerStatus::Done(result) => return Ok(IsolatedOutcome::Done(result)),
                WorkerStatus::Failed(code) => return Ok(IsolatedOutcome::Exited(code)),
                WorkerStatus::Pending => {
                    let elapsed = start.elapsed();
                    if let Some(limit) = self.timeout
                        && elapsed >= limit
                    {
                        handle.terminate();
                        return Ok(IsolatedOutcome::TimedOut(elapsed));
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }
    }
}

// ============================================================================
// Thread worker
// ============================================================================

/// Evaluates designs on a dedicated thread.
///
/// Panics inside the evaluator are caught and reported as faults. A thread
/// cannot be killed: on timeout it is detached and its result discarded.
pub struct ThreadWorker<E> {
    evaluator: Arc<E>,
}

impl<E> ThreadWorker<E> {
    pub fn new(evaluator: Arc<E>) -> Self {
        Self { evaluator }
    }
}

struct ThreadHandle<R> {
    rx: Receiver<R>,
    join: Option<JoinHandle<i32>>,
}

impl<D, E> Worker<D, E::Output> for ThreadWorker<E>
where
    E: Evaluator<D> + Send + Sync + 'static,
    D: Clone + Send + 'static,
    E::Output: Send + 'static,
{
    fn spawn(&self, design: &D) -> Result<Box<dyn WorkerHandle<E::Output>>, WorkerError> {
        let (tx, rx) = mpsc::channel();
        let evaluator = Arc::clone(&self.evaluator);
        let design = design.clone();

        let join = thread::Builder::new()
            .name("design-eval".to_string())
            .spawn(move || {
                match panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(&design))) {
                    Ok(Ok(result)) => match tx.send(result) {
                        Ok(()) => EXIT_SUCCESS,
                        Err(_) => EXIT_FAULT,
                    },
                    Ok(Err(e)) => {
                        debug!("Evaluation thread failed: {}", e);
                        failure_code(&e)
                    }
                    Err(_) => EXIT_FAULT,
                }
            })
            .map_err(WorkerError::Spawn)?;

        Ok(Box::new(ThreadHandle {
            rx,
            join: Some(join),
        }))
    }
}

impl<R> WorkerHandle<R> for ThreadHandle<R> {
    fn poll(&mut self) -> Result<WorkerStatus<R>, WorkerError> {
        match self.rx.try_recv() {
            Ok(result) => {
                if let Some(join) = self.join.take() {
                    let _ = join.join();
                }
                Ok(WorkerStatus::Done(result))
            }
            Err(TryRecvError::Empty) => Ok(WorkerStatus::Pending),
            // The sender is dropped when the thread finishes.
            Err(TryRecvError::Disconnected) => {
                let code = self
                    .join
                    .take()
                    .map(|join| join.join().unwrap_or(EXIT_FAULT))
                    .unwrap_or(EXIT_FAULT);
                Ok(WorkerStatus::Failed(code))
            }
        }
    }

    fn terminate(&mut self) {
        if self.join.take().is_some() {
            warn!("Detaching evaluation thread that could not be stopped");
        }
    }
}

// ============================================================================
// Process worker
// ============================================================================

/// Evaluates designs in a child process.
///
/// The design is written to the child's stdin as JSON and stdin is closed.
/// On exit code 0 the child's stdout must contain the JSON result. The
/// child side is implemented by [`run_worker`].
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessWorker {
    pub fn new<P: Into<PathBuf>>(program: P, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl From<&WorkerCommand> for ProcessWorker {
    fn from(command: &WorkerCommand) -> Self {
        Self::new(command.program.clone(), command.args.clone())
    }
}

struct ProcessHandle<R> {
    child: Child,
    output: Receiver<io::Result<Vec<u8>>>,
    _result: PhantomData<fn() -> R>,
}

impl<D, R> Worker<D, R> for ProcessWorker
where
    D: Serialize,
    R: DeserializeOwned + 'static,
{
    fn spawn(&self, design: &D) -> Result<Box<dyn WorkerHandle<R>>, WorkerError> {
        let input = serde_json::to_vec(design).map_err(WorkerError::Encode)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(WorkerError::Spawn)?;

        // Drain stdout on a separate thread so a chatty child never blocks
        // on a full pipe.
        let (tx, rx) = mpsc::channel();
        if let Some(mut stdout) = child.stdout.take() {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = tx.send(stdout.read_to_end(&mut buf).map(|_| buf));
            });
        }

        // Feed the design from its own thread so a child that never reads
        // stdin cannot hold up the deadline.
        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || match stdin.write_all(&input) {
                Ok(()) => {}
                // The child may exit without reading its input.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("Worker closed stdin before reading the design");
                }
                Err(e) => warn!("Failed to send design to worker: {}", e),
            });
        }

        Ok(Box::new(ProcessHandle {
            child,
            output: rx,
            _result: PhantomData,
        }))
    }
}

impl<R: DeserializeOwned> WorkerHandle<R> for ProcessHandle<R> {
    fn poll(&mut self) -> Result<WorkerStatus<R>, WorkerError> {
        let Some(status) = self.child.try_wait().map_err(WorkerError::Poll)? else {
            return Ok(WorkerStatus::Pending);
        };

        let code = exit_code(status);
        if code != EXIT_SUCCESS {
            return Ok(WorkerStatus::Failed(code));
        }

        let output = match self.output.recv_timeout(OUTPUT_GRACE) {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Failed to read worker output: {}", e);
                return Ok(WorkerStatus::Failed(EXIT_FAULT));
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                error!("Worker exited successfully without delivering a result");
                return Ok(WorkerStatus::Failed(EXIT_FAULT));
            }
        };

        match serde_json::from_slice(&output) {
            Ok(result) => Ok(WorkerStatus::Done(result)),
            Err(e) => {
                error!("Worker delivered an unreadable result: {}", e);
                Ok(WorkerStatus::Failed(EXIT_FAULT))
            }
        }
    }

    fn terminate(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("Failed to kill worker process {}: {}", self.child.id(), e);
        }
        let _ = self.child.wait();
    }
}

/// Exit code of a finished process; death by signal maps to `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Child side of the process worker protocol.
///
/// Reads a design as JSON from stdin, evaluates it, and writes the result as
/// JSON to stdout. Returns the exit code the worker binary should exit with:
///
/// ```rust,ignore
/// fn main() -> std::process::ExitCode {
///     design_optim::optimize::run_worker::<MachineDesign, _>(&MachineEvaluator::default())
/// }
/// ```
pub fn run_worker<D, E>(evaluator: &E) -> ExitCode
where
    D: DeserializeOwned,
    E: Evaluator<D>,
    E::Output: Serialize,
{
    let code = serve(evaluator, io::stdin().lock(), io::stdout().lock());
    ExitCode::from(code as u8)
}

fn serve<D, E, In, Out>(evaluator: &E, input: In, mut output: Out) -> i32
where
    D: DeserializeOwned,
    E: Evaluator<D>,
    E::Output: Serialize,
    In: Read,
    Out: Write,
{
    let design: D = match serde_json::from_reader(input) {
        Ok(design) => design,
        Err(e) => {
            error!("Worker could not decode design: {}", e);
            return EXIT_FAULT;
        }
    };

    match evaluator.evaluate(&design) {
        Ok(result) => {
            let written = serde_json::to_writer(&mut output, &result)
                .map_err(io::Error::from)
                .and_then(|_| output.flush());
            match written {
                Ok(()) => EXIT_SUCCESS,
                Err(e) => {
                    error!("Worker could not write result: {}", e);
                    EXIT_FAULT
                }
            }
        }
        Err(e) => {
            let code = failure_code(&e);
            if code == EXIT_INVALID_DESIGN {
                debug!("Invalid design: {}", e);
            } else {
                error!("Evaluation failed: {}", e);
            }
            code
        }
    }
}

/// Exit code reporting a failed evaluation. Missing artifacts count as an
/// invalid design, as they do in-process.
fn failure_code(e: &EvaluationError) -> i32 {
    match e {
        EvaluationError::InvalidDesign(_) => EXIT_INVALID_DESIGN,
        EvaluationError::Io(err) if err.kind() == io::ErrorKind::NotFound => EXIT_INVALID_DESIGN,
        _ => EXIT_FAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Halver;

    impl Evaluator<f64> for Halver {
        type Output = f64;

        fn evaluate(&self, design: &f64) -> Result<f64, EvaluationError> {
            if *design < 0.0 {
                return Err(EvaluationError::invalid("negative"));
            }
            if *design > 100.0 {
                return Err(EvaluationError::fault("overflow"));
            }
            if design.is_nan() {
                panic!("nan design");
            }
            Ok(design / 2.0)
        }
    }

    fn isolation<W: Worker<f64, f64> + 'static>(worker: W) -> Isolation<f64, f64> {
        Isolation::new(
            Box::new(worker),
            &IsolationConfig {
                poll_interval_ms: 5,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_exit_kind() {
        assert_eq!(ExitKind::from_code(0), ExitKind::Success);
        assert_eq!(ExitKind::from_code(1), ExitKind::InvalidDesign);
        assert_eq!(ExitKind::from_code(2), ExitKind::Fault);
        assert_eq!(ExitKind::from_code(139), ExitKind::Unknown(139));
    }

    #[test]
    fn test_thread_worker_outcomes() {
        let iso = isolation(ThreadWorker::new(Arc::new(Halver)));

        assert!(matches!(
            iso.evaluate(&3.0).unwrap(),
            IsolatedOutcome::Done(v) if v == 1.5
        ));
        assert!(matches!(
            iso.evaluate(&-1.0).unwrap(),
            IsolatedOutcome::Exited(EXIT_INVALID_DESIGN)
        ));
        assert!(matches!(
            iso.evaluate(&1000.0).unwrap(),
            IsolatedOutcome::Exited(EXIT_FAULT)
        ));
        assert!(matches!(
            iso.evaluate(&f64::NAN).unwrap(),
            IsolatedOutcome::Exited(EXIT_FAULT)
        ));
    }

    struct Hang(Arc<AtomicBool>);

    impl Evaluator<f64> for Hang {
        type Output = f64;

        fn evaluate(&self, _design: &f64) -> Result<f64, EvaluationError> {
            while !self.0.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(0.0)
        }
    }

    #[test]
    fn test_thread_worker_timeout() {
        let release = Arc::new(AtomicBool::new(false));
        let iso: Isolation<f64, f64> = Isolation::new(
            Box::new(ThreadWorker::new(Arc::new(Hang(Arc::clone(&release))))),
            &IsolationConfig {
                poll_interval_ms: 5,
                timeout_secs: Some(0.05),
                command: None,
            },
        )
        .unwrap();

        let outcome = iso.evaluate(&1.0).unwrap();
        release.store(true, Ordering::Relaxed);
        assert!(matches!(outcome, IsolatedOutcome::TimedOut(t) if t >= Duration::from_millis(50)));
    }

    #[test]
    fn test_serve_protocol() {
        let mut out = Vec::new();
        assert_eq!(serve(&Halver, "4.0".as_bytes(), &mut out), EXIT_SUCCESS);
        assert_eq!(serde_json::from_slice::<f64>(&out).unwrap(), 2.0);

        let mut out = Vec::new();
        assert_eq!(serve(&Halver, "-4.0".as_bytes(), &mut out), EXIT_INVALID_DESIGN);
        assert!(out.is_empty());

        let mut out = Vec::new();
        assert_eq!(serve(&Halver, "400.0".as_bytes(), &mut out), EXIT_FAULT);

        let mut out = Vec::new();
        assert_eq!(serve(&Halver, "not json".as_bytes(), &mut out), EXIT_FAULT);
    }

    /// Fails with the I/O error kind it is given.
    struct Artifact(io::ErrorKind);

    impl Evaluator<f64> for Artifact {
        type Output = f64;

        fn evaluate(&self, _design: &f64) -> Result<f64, EvaluationError> {
            Err(EvaluationError::Io(io::Error::new(self.0, "mesh.dat")))
        }
    }

    #[test]
    fn test_missing_artifact_is_invalid_design() {
        let mut out = Vec::new();
        let missing = Artifact(io::ErrorKind::NotFound);
        assert_eq!(serve(&missing, "1.0".as_bytes(), &mut out), EXIT_INVALID_DESIGN);
        let denied = Artifact(io::ErrorKind::PermissionDenied);
        assert_eq!(serve(&denied, "1.0".as_bytes(), &mut out), EXIT_FAULT);

        let iso = isolation(ThreadWorker::new(Arc::new(missing)));
        assert!(matches!(
            iso.evaluate(&1.0).unwrap(),
            IsolatedOutcome::Exited(EXIT_INVALID_DESIGN)
        ));
        let iso = isolation(ThreadWorker::new(Arc::new(denied)));
        assert!(matches!(
            iso.evaluate(&1.0).unwrap(),
            IsolatedOutcome::Exited(EXIT_FAULT)
        ));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Isolation<f64, f64> {
        isolation(ProcessWorker::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
        ))
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_exit_codes() {
        assert!(matches!(
            shell("cat > /dev/null; echo 0.25").evaluate(&1.0).unwrap(),
            IsolatedOutcome::Done(v) if v == 0.25
        ));
        assert!(matches!(
            shell("cat > /dev/null; exit 1").evaluate(&1.0).unwrap(),
            IsolatedOutcome::Exited(EXIT_INVALID_DESIGN)
        ));
        assert!(matches!(
            shell("exit 2").evaluate(&1.0).unwrap(),
            IsolatedOutcome::Exited(EXIT_FAULT)
        ));
        assert!(matches!(
            shell("exit 7").evaluate(&1.0).unwrap(),
            IsolatedOutcome::Exited(7)
        ));
        // Success without a readable payload is a fault.
        assert!(matches!(
            shell("cat > /dev/null; echo garbage").evaluate(&1.0).unwrap(),
            IsolatedOutcome::Exited(EXIT_FAULT)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_echoes_design() {
        assert!(matches!(
            shell("cat").evaluate(&0.75).unwrap(),
            IsolatedOutcome::Done(v) if v == 0.75
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_timeout_kills_child() {
        let iso: Isolation<f64, f64> = Isolation::new(
            Box::new(ProcessWorker::new(
                "sh",
                vec!["-c".to_string(), "sleep 30".to_string()],
            )),
            &IsolationConfig {
                poll_interval_ms: 5,
                timeout_secs: Some(0.1),
                command: None,
            },
        )
        .unwrap();
        let start = Instant::now();
        assert!(matches!(
            iso.evaluate(&1.0).unwrap(),
            IsolatedOutcome::TimedOut(_)
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_with_unread_large_design() {
        let iso: Isolation<Vec<f64>, f64> = Isolation::new(
            Box::new(ProcessWorker::new(
                "sh",
                vec!["-c".to_string(), "sleep 30".to_string()],
            )),
            &IsolationConfig {
                poll_interval_ms: 5,
                timeout_secs: Some(0.1),
                command: None,
            },
        )
        .unwrap();
        // Far larger than a pipe buffer, and never read by the child.
        let design: Vec<f64> = (0..20_000).map(|i| i as f64 / 3.0).collect();

        let start = Instant::now();
        assert!(matches!(
            iso.evaluate(&design).unwrap(),
            IsolatedOutcome::TimedOut(_)
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_isolation_config() {
        let err = Isolation::<f64, f64>::new(
            Box::new(ThreadWorker::new(Arc::new(Halver))),
            &IsolationConfig {
                timeout_secs: Some(1e300),
                ..Default::default()
            },
        )
        .err();
        assert!(matches!(err, Some(ConfigError::InvalidTimeout)));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let iso = isolation(ProcessWorker::new(
            "/nonexistent/design-worker",
            Vec::new(),
        ));
        assert!(matches!(iso.evaluate(&1.0), Err(WorkerError::Spawn(_))));
    }
}
