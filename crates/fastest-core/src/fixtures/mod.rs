//! FixtureRegistry: indexes every fixture visible to a test and resolves its
//! [`FixturePlan`] — the topologically sorted setup/teardown order, honoring
//! autouse injection, scope precedence, and indirect parametrization.

pub mod builtin;

use std::collections::HashMap;
use std::path::Path;

use crate::model::{Fixture, FixturePlan, FixturePlanEntry, FixtureScope, ScopeKey, TestItem};

#[derive(Debug, Clone, PartialEq)]
pub enum FixtureResolutionError {
    Cycle,
    Missing(String),
    ScopeViolation { fixture: String, depends_on: String },
}

impl FixtureResolutionError {
    pub fn reason(&self) -> String {
        match self {
            FixtureResolutionError::Cycle => "fixture dependency cycle".to_string(),
            FixtureResolutionError::Missing(name) => format!("fixture not found: {name}"),
            FixtureResolutionError::ScopeViolation { fixture, depends_on } => format!(
                "fixture '{fixture}' has narrower scope than its dependency '{depends_on}'"
            ),
        }
    }
}

pub struct FixtureRegistry {
    by_name: HashMap<String, Vec<Fixture>>,
}

impl FixtureRegistry {
    pub fn new(fixtures: Vec<Fixture>) -> Self {
        let mut by_name: HashMap<String, Vec<Fixture>> = HashMap::new();
        for fixture in fixtures {
            by_name.entry(fixture.name.clone()).or_default().push(fixture);
        }
        Self { by_name }
    }

    /// Resolves `name` for `test` honoring precedence: same file, then the
    /// nearest ancestor `conftest.py`, then built-ins.
    pub fn lookup(&self, name: &str, test: &TestItem) -> Option<Fixture> {
        if let Some(candidates) = self.by_name.get(name) {
            if let Some(f) = candidates.iter().find(|f| f.path == test.path) {
                return Some(f.clone());
            }
            let mut conftest_candidates: Vec<&Fixture> = candidates
                .iter()
                .filter(|f| is_conftest(&f.path))
                .filter(|f| is_ancestor_of(&f.path, &test.path))
                .collect();
            conftest_candidates.sort_by_key(|f| std::cmp::Reverse(component_count(&f.path)));
            if let Some(f) = conftest_candidates.first() {
                return Some((*f).clone());
            }
        }
        builtin::builtin_fixture(name)
    }

    /// Resolves the full [`FixturePlan`] for `test`: seed with fixture_deps
    /// (autouse already folded in by discovery), transitively expand deps,
    /// topologically sort, and validate scope ordering.
    pub fn resolve_plan(
        &self,
        test: &TestItem,
    ) -> Result<FixturePlan, FixtureResolutionError> {
        let mut order: Vec<FixturePlanEntry> = Vec::new();
        let mut resolved_names: Vec<String> = Vec::new();
        let mut visiting: Vec<String> = Vec::new();

        for name in &test.fixture_deps {
            self.visit(name, test, &mut order, &mut resolved_names, &mut visiting)?;
        }
        Ok(FixturePlan { setup_order: order })
    }

    fn visit(
        &self,
        name: &str,
        test: &TestItem,
        order: &mut Vec<FixturePlanEntry>,
        resolved: &mut Vec<String>,
        visiting: &mut Vec<String>,
    ) -> Result<(), FixtureResolutionError> {
        if resolved.contains(&name.to_string()) {
            return Ok(());
        }
        if visiting.contains(&name.to_string()) {
            return Err(FixtureResolutionError::Cycle);
        }
        let fixture = self
            .lookup(name, test)
            .ok_or_else(|| FixtureResolutionError::Missing(name.to_string()))?;

        visiting.push(name.to_string());
        for dep in &fixture.deps {
            let dep_fixture = self
                .lookup(dep, test)
                .ok_or_else(|| FixtureResolutionError::Missing(dep.clone()))?;
            if !fixture.scope.may_depend_on(dep_fixture.scope) {
                return Err(FixtureResolutionError::ScopeViolation {
                    fixture: fixture.name.clone(),
                    depends_on: dep_fixture.name.clone(),
                });
            }
            self.visit(dep, test, order, resolved, visiting)?;
        }
        visiting.retain(|n| n != name);
        resolved.push(name.to_string());

        let indirect_param = test
            .parameters
            .as_ref()
            .and_then(|params| params.get(name))
            .filter(|_| test.fixture_deps.contains(&name.to_string()))
            .cloned();

        order.push(FixturePlanEntry {
            name: fixture.name.clone(),
            scope: fixture.scope,
            autouse: fixture.autouse,
            scope_key: ScopeKey::for_fixture(&fixture, test),
            indirect_param,
        });
        Ok(())
    }
}

fn is_conftest(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some("conftest.py")
}

fn is_ancestor_of(conftest_path: &Path, test_path: &Path) -> bool {
    match conftest_path.parent() {
        Some(dir) => test_path.starts_with(dir),
        None => true,
    }
}

fn component_count(path: &Path) -> usize {
    path.components().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str, scope: FixtureScope, deps: &[&str]) -> Fixture {
        Fixture {
            name: name.to_string(),
            path: PathBuf::from("conftest.py"),
            scope,
            autouse: false,
            params: None,
            ids: None,
            deps: deps.iter().map(|s| s.to_string()).collect(),
            is_generator: false,
            is_async: false,
        }
    }

    fn test_item(fixture_deps: &[&str]) -> TestItem {
        TestItem {
            id: "t.py::test_x".to_string(),
            path: PathBuf::from("t.py"),
            line: 1,
            module_qualifier: "t".to_string(),
            class_name: None,
            function_name: "test_x".to_string(),
            is_async: false,
            parameters: None,
            markers: Vec::new(),
            fixture_deps: fixture_deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn detects_fixture_cycle() {
        let registry = FixtureRegistry::new(vec![
            fixture("a", FixtureScope::Function, &["b"]),
            fixture("b", FixtureScope::Function, &["a"]),
        ]);
        let test = test_item(&["a"]);
        let err = registry.resolve_plan(&test).unwrap_err();
        assert_eq!(err, FixtureResolutionError::Cycle);
    }

    #[test]
    fn reports_missing_fixture() {
        let registry = FixtureRegistry::new(vec![]);
        let test = test_item(&["ghost"]);
        let err = registry.resolve_plan(&test).unwrap_err();
        assert_eq!(err, FixtureResolutionError::Missing("ghost".to_string()));
    }

    #[test]
    fn rejects_session_fixture_depending_on_function_fixture() {
        let registry = FixtureRegistry::new(vec![
            fixture("sess", FixtureScope::Session, &["func_scoped"]),
            fixture("func_scoped", FixtureScope::Function, &[]),
        ]);
        let test = test_item(&["sess"]);
        let err = registry.resolve_plan(&test).unwrap_err();
        assert!(matches!(err, FixtureResolutionError::ScopeViolation { .. }));
    }

    #[test]
    fn topological_order_respects_deps() {
        let registry = FixtureRegistry::new(vec![
            fixture("a", FixtureScope::Function, &["b"]),
            fixture("b", FixtureScope::Function, &[]),
        ]);
        let test = test_item(&["a"]);
        let plan = registry.resolve_plan(&test).unwrap();
        let names: Vec<_> = plan.setup_order.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn same_file_fixture_beats_conftest() {
        let mut conftest_fixture = fixture("db", FixtureScope::Function, &[]);
        conftest_fixture.path = PathBuf::from("conftest.py");
        let mut local_fixture = fixture("db", FixtureScope::Function, &[]);
        local_fixture.path = PathBuf::from("t.py");
        local_fixture.autouse = true;

        let registry = FixtureRegistry::new(vec![conftest_fixture, local_fixture]);
        let test = test_item(&["db"]);
        let resolved = registry.lookup("db", &test).unwrap();
        assert!(resolved.autouse);
    }}
