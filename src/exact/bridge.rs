//! Delegation of a built QUBO to an out-of-process solver.
//!
//! Each call writes the matrix, the per-candidate costs and a site table as
//! JSON into a fresh temporary directory, runs the solver program on those
//! files and reads back a result record from its standard output. The
//! directory is removed when the call returns, whatever the outcome.
//!
//! Result contract: the program exits with status 0 and prints a JSON object
//! carrying `selected_indices` as its final record. Other output lines are
//! treated as diagnostics. Lines are scanned from the end, so trailing log
//! output after the record is tolerated.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::gate::SolverGate;
use crate::config::ExternalSolverConfig;
use crate::error::{PlannerError, Result};
use crate::instance::Candidate;
use crate::qubo::QuboMatrix;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which external solver family a bridge talks to. The two differ in the
/// arguments they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverBackend {
    /// Called with `--qubo_file --budget --costs_file --data_file`
    Exact,
    /// Called with `--qubo_file --k`
    Quantum,
}

impl SolverBackend {
    pub fn name(&self) -> &'static str {
        match self {
            SolverBackend::Exact => "exact",
            SolverBackend::Quantum => "quantum",
        }
    }
}

/// Arguments for one invocation, appended after the configured ones
#[derive(Debug, Clone, Default)]
pub struct ProcessInput {
    pub args: Vec<OsString>,
}

/// Captured streams of a process that exited successfully
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Boundary to whatever actually runs the solver.
///
/// Implementations return [`PlannerError::SolverTimeout`] when `timeout`
/// elapses and [`PlannerError::SolverFailed`] when the program cannot be
/// started or exits unsuccessfully.
pub trait SolverProcess {
    fn invoke(&self, input: &ProcessInput, timeout: Duration) -> Result<ProcessOutput>;
}

/// Runs a local program as a child process
#[derive(Debug, Clone)]
pub struct CommandProcess {
    pub solver: String,
    pub program: String,
    pub args: Vec<String>,
}

impl CommandProcess {
    pub fn new(solver: &str, program: &str, args: Vec<String>) -> Self {
        CommandProcess { solver: solver.to_string(), program: program.to_string(), args }
    }

    fn timed_out(&self, timeout: Duration) -> PlannerError {
        PlannerError::SolverTimeout { solver: self.solver.clone(), timeout_ms: timeout.as_millis() as u64 }
    }
}

impl SolverProcess for CommandProcess {
    /// Runs the program in its own process group. `timeout` bounds the whole
    /// call: waiting for the exit and draining both pipes. On expiry the group
    /// is killed, so helpers the solver left running are reaped with it.
    fn invoke(&self, input: &ProcessInput, timeout: Duration) -> Result<ProcessOutput> {
        debug!("Spawning {} solver: {} {:?} {:?}", self.solver, self.program, self.args, input.args);
        let deadline = Instant::now() + timeout;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(&input.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| PlannerError::SolverFailed {
            solver: self.solver.clone(),
            status: "not started".to_string(),
            diagnostics: format!("could not start {}: {}", self.program, e),
        })?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!("{} solver exceeded {:?}, killing process group {}", self.solver, timeout, child.id());
                kill_process_group(&child);
                // the process may have exited between the poll and the kill
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.timed_out(timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let (stdout, stderr) = match (collect(&stdout, deadline), collect(&stderr, deadline)) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                warn!(
                    "{} solver exited but its output pipes stayed open past {:?}, killing process group {}",
                    self.solver,
                    timeout,
                    child.id()
                );
                kill_process_group(&child);
                return Err(self.timed_out(timeout));
            }
        };
        let output = ProcessOutput { stdout, stderr };

        if !status.success() {
            warn!("{} solver failed with {}", self.solver, status);
            return Err(PlannerError::SolverFailed {
                solver: self.solver.clone(),
                status: status.to_string(),
                diagnostics: diagnostics(&output),
            });
        }
        Ok(output)
    }
}

/// Reads `source` to the end on a separate thread and sends the text once the
/// pipe closes.
fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        // the receiver is gone after a timeout
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// `None` if the pipe is still open at `deadline`
fn collect(reader: &Receiver<String>, deadline: Instant) -> Option<String> {
    match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group
    // the child leads, and ESRCH for an already empty group is ignored.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn diagnostics(output: &ProcessOutput) -> String {
    match (output.stderr.trim(), output.stdout.trim()) {
        ("", out) => out.to_string(),
        (err, "") => err.to_string(),
        (err, out) => format!("{}\n{}", err, out),
    }
}

/// Result record printed by a solver program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub selected_indices: Vec<usize>,
    #[serde(default)]
    pub fval: Option<f64>,
    #[serde(default)]
    pub time_sec: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Last line of `output` that parses as a [`ResultRecord`]
pub fn parse_result(output: &str) -> Option<ResultRecord> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

/// Selection returned by an external solver, in original candidate indices
#[derive(Debug, Clone, Default)]
pub struct BridgeOutcome {
    /// Ascending, without duplicates
    pub selected: Vec<usize>,
    pub fval: Option<f64>,
    pub solver_time: Option<f64>,
    /// Row count actually sent to the solver
    pub solved_size: usize,
    pub downsampled: bool,
}

pub struct ExternalSolverBridge<P: SolverProcess = CommandProcess> {
    backend: SolverBackend,
    process: P,
    timeout: Duration,
    work_dir: Option<PathBuf>,
    downsample_cap: usize,
    gate: Option<SolverGate>,
}

impl ExternalSolverBridge<CommandProcess> {
    pub fn from_config(backend: SolverBackend, config: &ExternalSolverConfig, downsample_cap: usize) -> Self {
        let process = CommandProcess::new(backend.name(), &config.program, config.args.clone());
        ExternalSolverBridge::new(backend, process, Duration::from_millis(config.timeout_ms))
            .with_work_dir(config.work_dir.clone())
            .with_downsample_cap(downsample_cap)
    }
}

impl<P: SolverProcess> ExternalSolverBridge<P> {
    pub fn new(backend: SolverBackend, process: P, timeout: Duration) -> Self {
        ExternalSolverBridge {
            backend,
            process,
            timeout,
            work_dir: None,
            downsample_cap: crate::qubo::DEFAULT_DOWNSAMPLE_CAP,
            gate: None,
        }
    }

    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }

    pub fn with_downsample_cap(mut self, cap: usize) -> Self {
        self.downsample_cap = cap;
        self
    }

    pub fn with_gate(mut self, gate: SolverGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn backend(&self) -> SolverBackend {
        self.backend
    }

    /// Solve `qubo` out of process and return the selected candidate indices.
    ///
    /// `max_count` is only passed to the quantum backend. When the matrix is
    /// larger than the downsample cap a strided sub-problem is sent instead
    /// and the returned indices are mapped back onto `candidates`.
    pub fn delegate(
        &self,
        qubo: &QuboMatrix,
        candidates: &[Candidate],
        budget: f64,
        max_count: u32,
    ) -> Result<BridgeOutcome> {
        if qubo.size() != candidates.len() {
            return Err(PlannerError::invalid(format!(
                "QUBO has {} rows but there are {} candidates",
                qubo.size(),
                candidates.len()
            )));
        }
        if qubo.is_empty() {
            return Ok(BridgeOutcome::default());
        }

        let reduced = qubo.downsample(self.downsample_cap);
        let (matrix, index_map, sent) = match &reduced {
            Some(d) => {
                info!(
                    "Downsampling {} candidates with stride {} to {} for the {} solver",
                    qubo.size(),
                    d.stride,
                    d.indices.len(),
                    self.backend.name()
                );
                (&d.matrix, d.indices.clone(), d.candidates(candidates))
            }
            None => (qubo, (0..qubo.size()).collect(), candidates.to_vec()),
        };

        // the timeout covers the wait for a gate permit as well as the run
        let deadline = Instant::now() + self.timeout;
        let _permit = match &self.gate {
            Some(gate) => match gate.acquire_until(deadline) {
                Some(permit) => Some(permit),
                None => {
                    warn!("{} solver gate stayed full for {:?}", self.backend.name(), self.timeout);
                    return Err(PlannerError::SolverTimeout {
                        solver: self.backend.name().to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
            },
            None => None,
        };

        let dir = match &self.work_dir {
            Some(parent) => tempfile::Builder::new().prefix("qubo-").tempdir_in(parent)?,
            None => tempfile::Builder::new().prefix("qubo-").tempdir()?,
        };
        let input = self.write_inputs(dir.path(), matrix, &sent, budget, max_count)?;

        let started = Instant::now();
        let output = self.process.invoke(&input, deadline.saturating_duration_since(started))?;
        debug!("{} solver returned after {:?}", self.backend.name(), started.elapsed());

        let record = parse_result(&output.stdout).ok_or_else(|| PlannerError::MalformedOutput {
            solver: self.backend.name().to_string(),
            diagnostics: diagnostics(&output),
        })?;
        if let Some(message) = &record.error {
            warn!("{} solver reported: {}", self.backend.name(), message);
        }

        let mut selected = Vec::with_capacity(record.selected_indices.len());
        for &i in &record.selected_indices {
            let original = index_map.get(i).ok_or_else(|| PlannerError::MalformedOutput {
                solver: self.backend.name().to_string(),
                diagnostics: format!("index {} out of range for {} candidates", i, index_map.len()),
            })?;
            selected.push(*original);
        }
        selected.sort_unstable();
        selected.dedup();

        if let Err(e) = dir.close() {
            warn!("Could not remove solver work directory: {}", e);
        }

        Ok(BridgeOutcome {
            selected,
            fval: record.fval,
            solver_time: record.time_sec,
            solved_size: index_map.len(),
            downsampled: reduced.is_some(),
        })
    }

    fn write_inputs(
        &self,
        dir: &Path,
        matrix: &QuboMatrix,
        candidates: &[Candidate],
        budget: f64,
        max_count: u32,
    ) -> Result<ProcessInput> {
        let qubo_path = dir.join("qubo.json");
        std::fs::write(&qubo_path, serde_json::to_string(&json!({ "Q": matrix }))?)?;

        let mut args: Vec<OsString> = vec!["--qubo_file".into(), qubo_path.into_os_string()];

        match self.backend {
            SolverBackend::Exact => {
                let costs: Vec<f64> = candidates.iter().map(|c| c.cost).collect();
                let costs_path = dir.join("costs.json");
                std::fs::write(&costs_path, serde_json::to_string(&costs)?)?;

                let sites: Vec<serde_json::Value> = candidates
                    .iter()
                    .map(|c| {
                        json!({
                            "Installation_Cost_USD": c.cost,
                            "Population_Coverage": c.population_coverage,
                            "Energy_Capacity_kWh_day": c.energy,
                            "X_coord": c.location.lng,
                            "Y_coord": c.location.lat,
                        })
                    })
                    .collect();
                let data_path = dir.join("data.json");
                std::fs::write(&data_path, serde_json::to_string(&sites)?)?;

                args.extend([
                    "--budget".into(),
                    budget.to_string().into(),
                    "--costs_file".into(),
                    costs_path.into_os_string(),
                    "--data_file".into(),
                    data_path.into_os_string(),
                ]);
            }
            SolverBackend::Quantum => {
                args.extend([OsString::from("--k"), OsString::from(max_count.to_string())]);
            }
        }

        Ok(ProcessInput { args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::qubo::{QuboBuilder, QuboPreset};
    use std::cell::RefCell;

    fn candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate {
                location: GeoPoint::new(38.0, 9.0),
                cost: 1_000.0 + i as f64,
                energy: 50.0,
                population_coverage: 20.0,
                distance_km: 0.0,
                site_id: None,
            })
            .collect()
    }

    fn qubo(cands: &[Candidate]) -> QuboMatrix {
        QuboBuilder::from_preset(&QuboPreset::dataset(), 5_000.0, None, None).build(cands)
    }

    /// Returns canned stdout and remembers the arguments it was given
    struct FakeProcess {
        stdout: String,
        seen: RefCell<Vec<OsString>>,
    }

    impl FakeProcess {
        fn printing(stdout: &str) -> Self {
            FakeProcess { stdout: stdout.to_string(), seen: RefCell::new(Vec::new()) }
        }
    }

    impl SolverProcess for FakeProcess {
        fn invoke(&self, input: &ProcessInput, _timeout: Duration) -> Result<ProcessOutput> {
            *self.seen.borrow_mut() = input.args.clone();
            Ok(ProcessOutput { stdout: self.stdout.clone(), stderr: String::new() })
        }
    }

    #[test]
    fn test_parse_scans_from_the_end() {
        let out = "loading\n{\"debug\": \"SOLUTION\", \"selected_indices\": [9]}\n\
                   {\"selected_indices\": [0, 2], \"fval\": -3.5, \"time_sec\": 0.1}\nbye\n";
        let record = parse_result(out).unwrap();
        assert_eq!(record.selected_indices, vec![0, 2]);
        assert_eq!(record.fval, Some(-3.5));

        assert!(parse_result("nothing here\n{not json}\n").is_none());
        assert!(parse_result("{\"fval\": 1.0}").is_none());
    }

    #[test]
    fn test_null_fval_is_accepted() {
        let record = parse_result(r#"{"error": "infeasible", "selected_indices": [], "fval": null}"#).unwrap();
        assert!(record.selected_indices.is_empty());
        assert_eq!(record.error.as_deref(), Some("infeasible"));
    }

    #[test]
    fn test_exact_arguments() {
        let cands = candidates(3);
        let fake = FakeProcess::printing("{\"selected_indices\": [2, 0, 2]}");
        let bridge = ExternalSolverBridge::new(SolverBackend::Exact, fake, Duration::from_secs(1));
        let outcome = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap();

        assert_eq!(outcome.selected, vec![0, 2]);
        assert!(!outcome.downsampled);

        let seen: Vec<String> = bridge.process.seen.borrow().iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(seen[0], "--qubo_file");
        assert_eq!(seen[2], "--budget");
        assert_eq!(seen[3], "5000");
        assert_eq!(seen[4], "--costs_file");
        assert_eq!(seen[6], "--data_file");
        // the work directory is gone once the call returns
        assert!(!Path::new(&seen[1]).exists());
    }

    #[test]
    fn test_quantum_arguments() {
        let cands = candidates(3);
        let fake = FakeProcess::printing("{\"selected_indices\": [1]}");
        let bridge = ExternalSolverBridge::new(SolverBackend::Quantum, fake, Duration::from_secs(1));
        bridge.delegate(&qubo(&cands), &cands, 5_000.0, 4).unwrap();

        let seen = bridge.process.seen.borrow();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2], OsString::from("--k"));
        assert_eq!(seen[3], OsString::from("4"));
    }

    #[test]
    fn test_downsampled_indices_map_back() {
        let cands = candidates(25);
        let fake = FakeProcess::printing("{\"selected_indices\": [1, 2]}");
        let bridge = ExternalSolverBridge::new(SolverBackend::Exact, fake, Duration::from_secs(1)).with_downsample_cap(10);
        let outcome = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap();

        assert!(outcome.downsampled);
        assert_eq!(outcome.solved_size, 9);
        assert_eq!(outcome.selected, vec![3, 6]);
    }

    #[test]
    fn test_out_of_range_index_is_malformed() {
        let cands = candidates(3);
        let fake = FakeProcess::printing("{\"selected_indices\": [3]}");
        let bridge = ExternalSolverBridge::new(SolverBackend::Exact, fake, Duration::from_secs(1));
        let err = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap_err();
        assert!(matches!(err, PlannerError::MalformedOutput { .. }));
    }

    #[test]
    fn test_missing_record_is_malformed() {
        let cands = candidates(2);
        let fake = FakeProcess::printing("solver crashed politely\n");
        let bridge = ExternalSolverBridge::new(SolverBackend::Exact, fake, Duration::from_secs(1));
        let err = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap_err();
        assert!(err.is_solver_failure());
        assert!(err.to_string().contains("solver crashed politely"));
    }

    #[test]
    fn test_full_gate_times_out_without_running() {
        let cands = candidates(3);
        let gate = SolverGate::new(1);
        let _held = gate.acquire();
        let fake = FakeProcess::printing("{\"selected_indices\": [1]}");
        let bridge =
            ExternalSolverBridge::new(SolverBackend::Exact, fake, Duration::from_millis(50)).with_gate(gate.clone());

        let err = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap_err();
        assert!(err.is_timeout());
        assert!(bridge.process.seen.borrow().is_empty());
        assert_eq!(gate.available(), 0);
    }

    #[test]
    fn test_empty_problem_skips_the_process() {
        let fake = FakeProcess::printing("");
        let bridge = ExternalSolverBridge::new(SolverBackend::Exact, fake, Duration::from_secs(1));
        let outcome = bridge.delegate(&QuboMatrix::zeros(0), &[], 5_000.0, 10).unwrap();
        assert!(outcome.selected.is_empty());
        assert!(bridge.process.seen.borrow().is_empty());
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn shell(script: &str, timeout_ms: u64, work_dir: &Path) -> ExternalSolverBridge {
            let config = ExternalSolverConfig {
                program: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), script.to_string(), "solver".to_string()],
                timeout_ms,
                work_dir: Some(work_dir.to_path_buf()),
            };
            ExternalSolverBridge::from_config(SolverBackend::Exact, &config, 1000)
        }

        fn leftover(dir: &Path) -> usize {
            std::fs::read_dir(dir).unwrap().count()
        }

        #[test]
        fn test_reads_files_and_result() {
            let parent = tempfile::tempdir().unwrap();
            let cands = candidates(3);
            let bridge = shell(
                r#"test -s "$2" || exit 9; echo "solving"; echo '{"selected_indices": [1], "fval": -2.0}'"#,
                5_000,
                parent.path(),
            );
            let outcome = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap();
            assert_eq!(outcome.selected, vec![1]);
            assert_eq!(outcome.fval, Some(-2.0));
            assert_eq!(leftover(parent.path()), 0);
        }

        #[test]
        fn test_nonzero_exit_carries_stderr() {
            let parent = tempfile::tempdir().unwrap();
            let cands = candidates(3);
            let bridge = shell("echo 'gurobipy not installed' >&2; exit 3", 5_000, parent.path());
            let err = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap_err();

            match err {
                PlannerError::SolverFailed { diagnostics, .. } => assert!(diagnostics.contains("gurobipy not installed")),
                other => panic!("unexpected error: {}", other),
            }
            assert_eq!(leftover(parent.path()), 0);
        }

        #[test]
        fn test_timeout_kills_and_cleans_up() {
            let parent = tempfile::tempdir().unwrap();
            let cands = candidates(3);
            let bridge = shell("exec sleep 30", 200, parent.path());

            let started = Instant::now();
            let err = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap_err();
            assert!(err.is_timeout());
            assert!(started.elapsed() < Duration::from_secs(10));
            assert_eq!(leftover(parent.path()), 0);
        }

        #[test]
        fn test_background_helper_cannot_outlive_timeout() {
            let parent = tempfile::tempdir().unwrap();
            let cands = candidates(3);
            // the shell exits at once but the helper keeps stdout open
            let bridge = shell(r#"sleep 8 & echo '{"selected_indices": [0]}'"#, 500, parent.path());

            let started = Instant::now();
            let err = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap_err();
            assert!(err.is_timeout(), "unexpected error: {}", err);
            assert!(started.elapsed() < Duration::from_secs(4));
            assert_eq!(leftover(parent.path()), 0);
        }

        #[test]
        fn test_missing_program_is_solver_failure() {
            let parent = tempfile::tempdir().unwrap();
            let cands = candidates(2);
            let config = ExternalSolverConfig {
                program: "/nonexistent/solver-binary".to_string(),
                args: Vec::new(),
                timeout_ms: 1_000,
                work_dir: Some(parent.path().to_path_buf()),
            };
            let bridge = ExternalSolverBridge::from_config(SolverBackend::Exact, &config, 1000);
            let err = bridge.delegate(&qubo(&cands), &cands, 5_000.0, 10).unwrap_err();
            assert!(err.is_solver_failure());
            match err {
                PlannerError::SolverFailed { diagnostics, .. } => assert!(diagnostics.contains("/nonexistent/solver-binary")),
                other => panic!("unexpected error: {}", other),
            }
            assert_eq!(leftover(parent.path()), 0);
        }
    }
}
