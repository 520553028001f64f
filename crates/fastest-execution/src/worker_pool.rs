//! WorkerPool: owns a set of persistent worker subprocesses, multiplexes
//! WorkUnits across them, and detects/recovers from crashes.
//!
//! Each worker process is spawned with piped stdio; the pool blocks for a
//! readiness signal, then exchanges framed request/response messages over
//! [`crate::ipc`]'s length-prefixed MessagePack frames for the life of the
//! process. Each worker gets its own rendezvous channel: a zero-capacity
//! `sync_channel` send blocks exactly until that worker's thread is ready
//! for the next job, enforcing "at most one outstanding unit per worker"
//! without any extra bookkeeping.

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, warn};

use fastest_core::TestResult;

use crate::error::{ExecutionError, Result};
use crate::ipc::{self, HostMessage, WireUnit, WorkerMessage};

const ENV_WORKER_FLAG: &str = "FASTEST_WORKER";
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One unit's worth of results, tagged with the `req_id` and the worker that
/// produced them so the scheduler can route scope-teardown follow-ups to the
/// same worker and reassemble dispatch order across interleaved units.
pub struct PoolResult {
    pub req_id: u64,
    pub worker_id: usize,
    pub results: Vec<TestResult>,
}

enum ExecOutcome {
    Complete(Vec<TestResult>),
    Partial(Vec<TestResult>),
}

struct WorkerProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn spawn(worker_bin: &PathBuf, discovery_root: &PathBuf) -> Result<Self> {
        let mut child = Command::new(worker_bin)
            .current_dir(discovery_root)
            .env(ENV_WORKER_FLAG, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ExecutionError::WorkerPool(format!("failed to spawn worker: {e}")))?;

        let stdin = BufWriter::new(child.stdin.take().expect("piped stdin"));
        let mut stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        match ipc::read_frame::<_, WorkerMessage>(&mut stdout)? {
            Some(WorkerMessage::Ready) => {}
            Some(other) => {
                return Err(ExecutionError::WorkerPool(format!(
                    "expected ready frame, got {other:?}"
                )))
            }
            None => {
                return Err(ExecutionError::WorkerPool(
                    "worker closed stdout before signaling ready".to_string(),
                ))
            }
        }

        Ok(Self { child, stdin, stdout })
    }

    /// Runs one unit and reads back its `ItemResult` stream. Returns the
    /// results that made it onto the wire before either `UnitDone` arrived
    /// (`Complete`) or the pipe closed early (`Partial`, e.g. a mid-unit
    /// crash) — the caller fills in the remaining items itself.
    fn exec(&mut self, worker_id: usize, req_id: u64, unit: WireUnit) -> Result<ExecOutcome> {
        ipc::write_frame(&mut self.stdin, &HostMessage::Exec { req_id, unit })?;
        let mut results = Vec::new();
        loop {
            match ipc::read_frame::<_, WorkerMessage>(&mut self.stdout)? {
                Some(WorkerMessage::ItemResult { result, .. }) => results.push(result),
                Some(WorkerMessage::UnitDone { .. }) => return Ok(ExecOutcome::Complete(results)),
                Some(WorkerMessage::Fatal { error, .. }) => {
                    return Err(ExecutionError::WorkerCrashed { worker_id, reason: error })
                }
                Some(other) => {
                    return Err(ExecutionError::WorkerPool(format!(
                        "unexpected worker message: {other:?}"
                    )))
                }
                None => return Ok(ExecOutcome::Partial(results)),
            }
        }
    }

    fn teardown(&mut self, scope_key_json: String) -> Result<()> {
        ipc::write_frame(&mut self.stdin, &HostMessage::Teardown { scope_key_json })
    }

    fn shutdown(&mut self, grace: Duration) {
        let _ = ipc::write_frame(&mut self.stdin, &HostMessage::Shutdown);
        let deadline = std::time::Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if std::time::Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                Err(_) => return,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

enum Job {
    Exec { req_id: u64, unit: WireUnit, item_ids: Vec<String> },
    Teardown { scope_key_json: String },
    Stop,
}

/// Owns the worker subprocesses. Workers are spawned lazily, one per slot,
/// on the first call to [`WorkerPool::dispatch`].
pub struct WorkerPool {
    worker_bin: PathBuf,
    discovery_root: PathBuf,
    pool_size: usize,
    job_txs: Vec<SyncSender<Job>>,
    result_tx: Sender<PoolResult>,
    result_rx: Receiver<PoolResult>,
    handles: Vec<JoinHandle<()>>,
    next_worker: usize,
    started: bool,
}

impl WorkerPool {
    pub fn new(worker_bin: PathBuf, discovery_root: PathBuf, pool_size: usize) -> Self {
        let (result_tx, result_rx) = mpsc::channel();
        Self {
            worker_bin,
            discovery_root,
            pool_size: pool_size.max(1),
            job_txs: Vec::new(),
            result_tx,
            result_rx,
            handles: Vec::new(),
            next_worker: 0,
            started: false,
        }
    }

    /// Spawns every worker slot synchronously so a total spawn failure can be
    /// reported as [`ExecutionError::PoolFatal`] before any dispatch happens.
    /// Slots that spawned successfully are handed off to their thread; slots
    /// that failed start their thread worker-less and retry lazily on first
    /// job, same as a later crash.
    fn ensure_started(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let mut initial: Vec<Option<WorkerProcess>> = Vec::with_capacity(self.pool_size);
        for _ in 0..self.pool_size {
            match WorkerProcess::spawn(&self.worker_bin, &self.discovery_root) {
                Ok(p) => initial.push(Some(p)),
                Err(e) => {
                    error!(error = %e, "worker spawn failed");
                    initial.push(None);
                }
            }
        }
        if initial.iter().all(Option::is_none) {
            return Err(ExecutionError::PoolFatal(
                "no worker process could be spawned".to_string(),
            ));
        }

        for (worker_id, process) in initial.into_iter().enumerate() {
            let (job_tx, job_rx) = mpsc::sync_channel(0);
            let result_tx = self.result_tx.clone();
            let worker_bin = self.worker_bin.clone();
            let discovery_root = self.discovery_root.clone();
            let handle = std::thread::spawn(move || {
                worker_thread_main(worker_id, worker_bin, discovery_root, process, job_rx, result_tx);
            });
            self.job_txs.push(job_tx);
            self.handles.push(handle);
        }
        Ok(())
    }

    /// Enqueues `units` round-robin across workers and blocks until a
    /// `PoolResult` has arrived for every one of them. Each `send` is a
    /// rendezvous: it returns only once the target worker is idle, which is
    /// the pool's backpressure guarantee.
    pub fn dispatch(&mut self, units: Vec<(u64, WireUnit)>) -> Result<Vec<PoolResult>> {
        self.ensure_started()?;
        let expected = units.len();
        for (req_id, unit) in units {
            let item_ids = unit.items.iter().map(|(t, _)| t.id.clone()).collect();
            let worker = self.next_worker;
            self.next_worker = (self.next_worker + 1) % self.job_txs.len();
            if self.job_txs[worker]
                .send(Job::Exec { req_id, unit, item_ids })
                .is_err()
            {
                return Err(ExecutionError::WorkerPool(format!(
                    "worker {worker} thread is gone"
                )));
            }
        }

        let mut collected = Vec::with_capacity(expected);
        for _ in 0..expected {
            match self.result_rx.recv() {
                Ok(result) => collected.push(result),
                Err(_) => {
                    return Err(ExecutionError::WorkerPool(
                        "all worker threads exited before completing dispatch".to_string(),
                    ))
                }
            }
        }
        Ok(collected)
    }

    /// Sends a follow-up teardown frame to the worker that owns a drained
    /// module/class scope. Best-effort: a worker that has since crashed
    /// silently drops the request, since its state (and whatever it would
    /// have torn down) is already gone.
    pub fn teardown_on(&mut self, worker_id: usize, scope_key_json: String) {
        if let Some(tx) = self.job_txs.get(worker_id) {
            let _ = tx.send(Job::Teardown { scope_key_json });
        }
    }

    /// Sends `shutdown` to every worker and waits up to the grace period for
    /// each to exit cleanly. Session-scoped teardown happens worker-side in
    /// response to this message.
    pub fn shutdown(mut self) {
        for tx in &self.job_txs {
            let _ = tx.send(Job::Stop);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_thread_main(
    worker_id: usize,
    worker_bin: PathBuf,
    discovery_root: PathBuf,
    initial: Option<WorkerProcess>,
    job_rx: Receiver<Job>,
    result_tx: Sender<PoolResult>,
) {
    let mut process = initial;

    for job in job_rx.iter() {
        let (req_id, unit, item_ids) = match job {
            Job::Stop => {
                if let Some(mut p) = process {
                    p.shutdown(DEFAULT_SHUTDOWN_GRACE);
                }
                return;
            }
            Job::Teardown { scope_key_json } => {
                if let Some(p) = process.as_mut() {
                    let _ = p.teardown(scope_key_json);
                }
                continue;
            }
            Job::Exec { req_id, unit, item_ids } => (req_id, unit, item_ids),
        };

        if process.is_none() {
            process = WorkerProcess::spawn(&worker_bin, &discovery_root).ok();
        }

        let results = match process.as_mut() {
            None => synthesize_crash_results(&item_ids, &[], "worker crashed"),
            Some(p) => match p.exec(worker_id, req_id, unit) {
                Ok(ExecOutcome::Complete(results)) => results,
                Ok(ExecOutcome::Partial(completed)) => {
                    warn!(
                        worker_id,
                        req_id,
                        completed = completed.len(),
                        total = item_ids.len(),
                        "worker closed stdout mid-unit; respawning"
                    );
                    let merged = synthesize_crash_results(&item_ids, &completed, "worker crashed");
                    process = WorkerProcess::spawn(&worker_bin, &discovery_root).ok();
                    merged
                }
                Err(e) => {
                    warn!(worker_id, req_id, error = %e, "worker fatal; respawning");
                    let replacement = synthesize_crash_results(&item_ids, &[], "worker crashed");
                    process = WorkerProcess::spawn(&worker_bin, &discovery_root).ok();
                    replacement
                }
            },
        };

        if result_tx.send(PoolResult { req_id, worker_id, results }).is_err() {
            return;
        }
    }
}

/// Builds the final per-item result list for a unit whose worker crashed:
/// items that already have a result in `completed` keep it, everything else
/// becomes an error result. Preserves `item_ids`' order so a mid-unit crash
/// after item 1 reports `[passed, error, error]` rather than losing item 1's
/// real outcome.
fn synthesize_crash_results(item_ids: &[String], completed: &[TestResult], reason: &str) -> Vec<TestResult> {
    item_ids
        .iter()
        .map(|id| {
            completed
                .iter()
                .find(|r| &r.id == id)
                .cloned()
                .unwrap_or_else(|| TestResult::error(id.clone(), reason))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_one_error_result_per_item_on_crash() {
        let ids = vec!["t.py::a".to_string(), "t.py::b".to_string()];
        let results = synthesize_crash_results(&ids, &[], "worker crashed");
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.error_message.as_deref() == Some("worker crashed")));
    }

    #[test]
    fn keeps_real_results_for_items_completed_before_the_crash() {
        let ids = vec!["t.py::a".to_string(), "t.py::b".to_string(), "t.py::c".to_string()];
        let completed = vec![TestResult {
            id: "t.py::a".to_string(),
            outcome: fastest_core::Outcome::Passed,
            duration_seconds: 0.0,
            captured_stdout: String::new(),
            captured_stderr: String::new(),
            error_type: None,
            error_message: None,
            traceback: None,
            xfail_strict: false,
        }];
        let results = synthesize_crash_results(&ids, &completed, "worker crashed");
        assert_eq!(results[0].outcome, fastest_core::Outcome::Passed);
        assert_eq!(results[1].error_message.as_deref(), Some("worker crashed"));
        assert_eq!(results[2].error_message.as_deref(), Some("worker crashed"));
    }
}
