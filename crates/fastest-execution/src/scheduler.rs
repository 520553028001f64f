//! Scheduler: resolves fixture plans, selects a strategy, batches items into
//! work units, dispatches them, and tracks scope teardown.
//!
//! Tracks a reference count per [`ScopeKey`] so the scheduler can tell
//! exactly when a module/class-scoped fixture's last referencing unit has
//! finished and route a single `Teardown` IPC message to the worker that
//! holds it.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;

use fastest_core::{FixturePlan, FixtureRegistry, Outcome, ScopeKey, TestItem, TestResult};

use crate::error::Result;
use crate::executor::{ReferenceExecutor, TestExecutor};
use crate::ipc::WireUnit;
use crate::strategy::{Strategy, StrategySelector};
use crate::worker_pool::WorkerPool;

/// Items sharing `(path, class_name)` are grouped into one dispatch unit up
/// to this many items, provided they share the same module/session/class
/// scoped fixture names.
pub const DEFAULT_BATCH_SIZE: usize = 16;

pub struct SchedulerConfig {
    pub worker_bin: PathBuf,
    pub discovery_root: PathBuf,
    pub batch_size: usize,
    pub cpu_count: usize,
}

impl SchedulerConfig {
    pub fn new(worker_bin: PathBuf, discovery_root: PathBuf) -> Self {
        Self {
            worker_bin,
            discovery_root,
            batch_size: DEFAULT_BATCH_SIZE,
            cpu_count: num_cpus::get(),
        }
    }
}

/// One resolved item: the test plus its fixture plan, ready for batching.
struct Resolved {
    item: TestItem,
    plan: FixturePlan,
}

/// Reference-counts outstanding units per [`ScopeKey`] so module/class scope
/// teardown can be triggered exactly once, as soon as the last unit that
/// references it completes.
#[derive(Default)]
struct TeardownTracker {
    refcounts: HashMap<ScopeKey, usize>,
}

impl TeardownTracker {
    fn register(&mut self, plan: &FixturePlan) {
        for entry in &plan.setup_order {
            if matches!(entry.scope_key, ScopeKey::Module { .. } | ScopeKey::Class { .. }) {
                *self.refcounts.entry(entry.scope_key.clone()).or_insert(0) += 1;
            }
        }
    }

    /// Call once per item after its unit completes. Returns the scope keys
    /// that just hit zero references and should be torn down now.
    fn release(&mut self, plan: &FixturePlan) -> Vec<ScopeKey> {
        let mut drained = Vec::new();
        for entry in &plan.setup_order {
            if !matches!(entry.scope_key, ScopeKey::Module { .. } | ScopeKey::Class { .. }) {
                continue;
            }
            if let Some(count) = self.refcounts.get_mut(&entry.scope_key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.refcounts.remove(&entry.scope_key);
                    drained.push(entry.scope_key.clone());
                }
            }
        }
        drained
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Resolves fixture plans for every item, picks a strategy, and runs the
    /// whole suite to completion. Results are returned in dispatch order,
    /// which for a single-threaded `InProcess` run is simply insertion order
    /// and for worker strategies is the round-robin dispatch order since
    /// `WorkerPool::dispatch` is itself a single blocking call per batch of
    /// units.
    pub fn run(&self, items: Vec<TestItem>, registry: &FixtureRegistry) -> Result<Vec<TestResult>> {
        let mut resolved = Vec::with_capacity(items.len());
        let mut results = Vec::new();

        for item in items {
            match registry.resolve_plan(&item) {
                Ok(plan) => resolved.push(Resolved { item, plan }),
                Err(e) => results.push(TestResult::error(item.id.clone(), e.reason())),
            }
        }

        let selector = StrategySelector::new(self.config.cpu_count);
        let strategy = selector.select(resolved.len());
        debug!(?strategy, resolved = resolved.len(), "dispatching resolved items");

        let mut dispatched = match strategy {
            Strategy::InProcess => self.run_in_process(resolved),
            Strategy::WarmWorkers { pool_size } | Strategy::FullDistributed { pool_size } => {
                self.run_with_pool(resolved, pool_size)?
            }
        };

        results.append(&mut dispatched);
        Ok(results)
    }

    /// Runs every item directly against a [`ReferenceExecutor`] with no
    /// subprocess at all: the strategy exists precisely because fork/IPC
    /// startup dwarfs per-test work at this test count.
    fn run_in_process(&self, resolved: Vec<Resolved>) -> Vec<TestResult> {
        let mut executor = ReferenceExecutor;
        let mut tracker = TeardownTracker::default();
        for r in &resolved {
            tracker.register(&r.plan);
        }

        let mut results = Vec::with_capacity(resolved.len());
        for r in resolved {
            results.push(executor.execute(&r.item, &r.plan));
            for scope_key in tracker.release(&r.plan) {
                let scope_key_json = serde_json::to_string(&scope_key).unwrap_or_default();
                executor.teardown(&scope_key_json);
            }
        }
        results
    }

    fn run_with_pool(&self, resolved: Vec<Resolved>, pool_size: usize) -> Result<Vec<TestResult>> {
        let mut tracker = TeardownTracker::default();
        for r in &resolved {
            tracker.register(&r.plan);
        }

        let units = build_units(resolved, self.config.batch_size);
        let mut pool = WorkerPool::new(
            self.config.worker_bin.clone(),
            self.config.discovery_root.clone(),
            pool_size,
        );

        let wire_units: Vec<(u64, WireUnit)> = units
            .iter()
            .enumerate()
            .map(|(req_id, unit)| {
                let req_id = req_id as u64;
                (
                    req_id,
                    WireUnit {
                        req_id,
                        items: unit.iter().map(|r| (r.item.clone(), r.plan.clone())).collect(),
                    },
                )
            })
            .collect();

        let pool_results = pool.dispatch(wire_units)?;

        let mut by_req_id: HashMap<u64, (usize, Vec<TestResult>)> = pool_results
            .into_iter()
            .map(|pr| (pr.req_id, (pr.worker_id, pr.results)))
            .collect();

        let mut ordered_results = Vec::new();
        for (req_id, unit) in units.iter().enumerate() {
            let req_id = req_id as u64;
            let (worker_id, unit_results) = by_req_id.remove(&req_id).unwrap_or_default();
            ordered_results.extend(unit_results);

            for r in unit {
                for scope_key in tracker.release(&r.plan) {
                    let scope_key_json = serde_json::to_string(&scope_key).unwrap_or_default();
                    pool.teardown_on(worker_id, scope_key_json);
                }
            }
        }

        pool.shutdown();
        Ok(ordered_results)
    }
}

/// Groups consecutive items sharing `(path, class_name)` into batches of up
/// to `batch_size`, provided every item in the run shares the same
/// module/session/class-scoped fixture names within that group. A
/// fixture-set mismatch starts a new batch even mid-group.
fn build_units(resolved: Vec<Resolved>, batch_size: usize) -> Vec<Vec<Resolved>> {
    let mut units: Vec<Vec<Resolved>> = Vec::new();

    for r in resolved {
        let fits_last = units.last().is_some_and(|unit| {
            unit.len() < batch_size.max(1)
                && same_group(&unit[0].item, &r.item)
                && same_scoped_fixtures(&unit[0].plan, &r.plan)
        });
        if fits_last {
            units.last_mut().unwrap().push(r);
        } else {
            units.push(vec![r]);
        }
    }
    units
}

fn same_group(a: &TestItem, b: &TestItem) -> bool {
    a.path == b.path && a.class_name == b.class_name
}

fn same_scoped_fixtures(a: &FixturePlan, b: &FixturePlan) -> bool {
    fn names(plan: &FixturePlan) -> Vec<&str> {
        plan.setup_order
            .iter()
            .filter(|e| {
                matches!(
                    e.scope,
                    fastest_core::FixtureScope::Module | fastest_core::FixtureScope::Session
                )
            })
            .map(|e| e.name.as_str())
            .collect()
    }
    names(a) == names(b)
}

/// A run succeeds (exit code 0) when every result is passing, skipped,
/// xfailed, or a non-strict xpass. A single failed, errored, or
/// strict-xpassed result means the run as a whole failed (exit code 1).
pub fn is_successful(results: &[TestResult]) -> bool {
    results.iter().all(|r| match r.outcome {
        Outcome::Passed | Outcome::Skipped | Outcome::Xfailed => true,
        Outcome::Xpassed => !r.xfail_strict,
        Outcome::Failed | Outcome::Error => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastest_core::{FixturePlanEntry, FixtureScope};
    use std::path::PathBuf;

    fn item(path: &str, class_name: Option<&str>, name: &str) -> TestItem {
        TestItem {
            id: format!("{path}::{name}"),
            path: PathBuf::from(path),
            line: 1,
            module_qualifier: "m".to_string(),
            class_name: class_name.map(str::to_string),
            function_name: name.to_string(),
            is_async: false,
            parameters: None,
            markers: vec![],
            fixture_deps: vec![],
        }
    }

    fn plan_with(names: &[&str]) -> FixturePlan {
        FixturePlan {
            setup_order: names
                .iter()
                .map(|n| FixturePlanEntry {
                    name: n.to_string(),
                    scope: FixtureScope::Module,
                    autouse: false,
                    scope_key: ScopeKey::Module {
                        fixture: n.to_string(),
                        path: PathBuf::from("t.py"),
                    },
                    indirect_param: None,
                })
                .collect(),
        }
    }

    #[test]
    fn batches_consecutive_same_class_items_sharing_fixtures() {
        let resolved = vec![
            Resolved { item: item("t.py", Some("C"), "a"), plan: plan_with(&["db"]) },
            Resolved { item: item("t.py", Some("C"), "b"), plan: plan_with(&["db"]) },
            Resolved { item: item("t.py", None, "c"), plan: plan_with(&["db"]) },
        ];
        let units = build_units(resolved, 16);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].len(), 2);
        assert_eq!(units[1].len(), 1);
    }

    #[test]
    fn batch_size_caps_unit_length() {
        let resolved: Vec<Resolved> = (0..5)
            .map(|i| Resolved { item: item("t.py", None, &format!("t{i}")), plan: plan_with(&[]) })
            .collect();
        let units = build_units(resolved, 2);
        assert_eq!(units.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn mismatched_fixture_sets_split_the_batch() {
        let resolved = vec![
            Resolved { item: item("t.py", Some("C"), "a"), plan: plan_with(&["db"]) },
            Resolved { item: item("t.py", Some("C"), "b"), plan: plan_with(&["cache"]) },
        ];
        let units = build_units(resolved, 16);
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn success_requires_no_failures_errors_or_strict_xpass() {
        let mut results = vec![TestResult {
            id: "a".into(),
            outcome: Outcome::Passed,
            duration_seconds: 0.0,
            captured_stdout: String::new(),
            captured_stderr: String::new(),
            error_type: None,
            error_message: None,
            traceback: None,
            xfail_strict: false,
        }];
        assert!(is_successful(&results));

        results.push(TestResult::error("b", "boom"));
        assert!(!is_successful(&results));
    }

    #[test]
    fn non_strict_xpass_does_not_fail_the_run() {
        let results = vec![TestResult {
            id: "a".into(),
            outcome: Outcome::Xpassed,
            duration_seconds: 0.0,
            captured_stdout: String::new(),
            captured_stderr: String::new(),
            error_type: None,
            error_message: None,
            traceback: None,
            xfail_strict: false,
        }];
        assert!(is_successful(&results));
    }

    #[test]
    fn strict_xpass_fails_the_run() {
        let results = vec![TestResult {
            id: "a".into(),
            outcome: Outcome::Xpassed,
            duration_seconds: 0.0,
            captured_stdout: String::new(),
            captured_stderr: String::new(),
            error_type: None,
            error_message: None,
            traceback: None,
            xfail_strict: true,
        }];
        assert!(!is_successful(&results));
    }
}
