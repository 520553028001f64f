//! The worker-side adapter boundary. A real language-ecosystem adapter that
//! actually calls into Python test functions is an external collaborator;
//! this module only defines the trait it implements and a minimal reference
//! implementation used by the `InProcess` strategy and by this crate's own
//! tests. `fastest-worker`'s binary wraps any [`TestExecutor`] in the IPC
//! read/exec loop for the `WarmWorkers`/`FullDistributed` strategies.

use std::time::Instant;

use fastest_core::{timeout_seconds, xfail_is_strict, xfail_reason, FixturePlan, Outcome, TestItem, TestResult};

pub trait TestExecutor: Send {
    fn execute(&mut self, item: &TestItem, plan: &FixturePlan) -> TestResult;

    /// Finalizes a module/class-scoped fixture whose last referencing unit
    /// just completed. No-op by default.
    fn teardown(&mut self, _scope_key_json: &str) {}
}

/// Honors skip/xfail markers and otherwise reports every test as passed.
/// Real test-body evaluation is the adapter's job, which this reference
/// executor never performs.
#[derive(Default)]
pub struct ReferenceExecutor;

impl TestExecutor for ReferenceExecutor {
    fn execute(&mut self, item: &TestItem, _plan: &FixturePlan) -> TestResult {
        let started = Instant::now();

        if let Some(reason) = fastest_core::skip_reason(&item.markers) {
            return TestResult {
                id: item.id.clone(),
                outcome: Outcome::Skipped,
                duration_seconds: started.elapsed().as_secs_f64(),
                captured_stdout: String::new(),
                captured_stderr: String::new(),
                error_type: None,
                error_message: Some(reason),
                traceback: None,
                xfail_strict: false,
            };
        }

        if timeout_seconds(&item.markers).is_some() {
            // The reference executor never actually runs test bodies, so it
            // never observes a real timeout; a genuine adapter enforces this
            // deadline around its call into the test function.
        }

        if let Some(xfail_message) = xfail_reason(&item.markers) {
            // This executor never evaluates a real test body, so a test
            // carrying an xfail marker always comes back "passed" here — an
            // unexpected pass. Whether that fails the run is a property of
            // the marker (`strict=`), not of the outcome itself, so it rides
            // along on `xfail_strict` rather than being baked into `Outcome`.
            return TestResult {
                id: item.id.clone(),
                outcome: Outcome::Xpassed,
                duration_seconds: started.elapsed().as_secs_f64(),
                captured_stdout: String::new(),
                captured_stderr: String::new(),
                error_type: None,
                error_message: xfail_message,
                traceback: None,
                xfail_strict: xfail_is_strict(&item.markers),
            };
        }

        TestResult {
            id: item.id.clone(),
            outcome: Outcome::Passed,
            duration_seconds: started.elapsed().as_secs_f64(),
            captured_stdout: String::new(),
            captured_stderr: String::new(),
            error_type: None,
            error_message: None,
            traceback: None,
            xfail_strict: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastest_core::{FixturePlan, MarkerRecord};
    use std::path::PathBuf;

    fn item(markers: Vec<MarkerRecord>) -> TestItem {
        TestItem {
            id: "t.py::test_x".to_string(),
            path: PathBuf::from("t.py"),
            line: 1,
            module_qualifier: "t".to_string(),
            class_name: None,
            function_name: "test_x".to_string(),
            is_async: false,
            parameters: None,
            markers,
            fixture_deps: Vec::new(),
        }
    }

    #[test]
    fn skipped_marker_yields_skipped_outcome() {
        let mut executor = ReferenceExecutor;
        let marked = item(vec![MarkerRecord::new("skip")]);
        let result = executor.execute(&marked, &FixturePlan::default());
        assert_eq!(result.outcome, Outcome::Skipped);
    }

    #[test]
    fn unmarked_test_passes() {
        let mut executor = ReferenceExecutor;
        let plain = item(vec![]);
        let result = executor.execute(&plain, &FixturePlan::default());
        assert_eq!(result.outcome, Outcome::Passed);
    }
}
