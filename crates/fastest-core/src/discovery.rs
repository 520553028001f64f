//! Walks a root path, recognizes test files, and emits a deterministic,
//! ordered sequence of [`TestItem`]s, including parametrization expansion.
//! Never executes source.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::cache::DiscoveryCache;
use crate::markers;
use crate::model::{Fixture, FixtureScope, LiteralValue, MarkerRecord, TestItem};
use crate::parametrize;
use crate::parser::{AstScanner, RawClass, RawFunction};

const EXCLUDED_DIRS: &[&str] = &[
    ".venv",
    "venv",
    "env",
    ".env",
    "virtualenv",
    ".virtualenv",
    "__pycache__",
    ".git",
    ".tox",
    "site-packages",
    "dist",
    "build",
    ".eggs",
    "node_modules",
];

/// One file that failed to parse.
#[derive(Debug, Clone)]
pub struct DiscoveryDiagnostic {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct DiscoveryResult {
    pub tests: Vec<TestItem>,
    pub fixtures: Vec<Fixture>,
    pub diagnostics: Vec<DiscoveryDiagnostic>,
}

pub fn is_test_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if !name.ends_with(".py") {
        return false;
    }
    let stem = &name[..name.len() - 3];
    stem.starts_with("test_") || stem.ends_with("_test")
}

fn is_conftest(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some("conftest.py")
}

/// Computes the dotted module qualifier a worker would `__import__` to load
/// this test (relative to the discovery root).
fn module_qualifier(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let rel = rel.with_extension("");
    rel.components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn relative_id_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn inherits_test_case(class: &RawClass, all_classes: &[RawClass]) -> bool {
    class.base_names.iter().any(|base| {
        base == "TestCase"
            || base == "unittest.TestCase"
            || all_classes
                .iter()
                .any(|c| &c.name == base && inherits_test_case(c, all_classes))
    })
}

struct BuiltFunction<'a> {
    func: &'a RawFunction,
    markers: Vec<MarkerRecord>,
    class_excluded_as_testcase: bool,
}

/// Discovers all tests and fixtures under `root`, deterministically ordered.
pub fn discover(root: &Path) -> DiscoveryResult {
    discover_impl(root, None)
}

/// Like [`discover`], but skips re-parsing any file whose path, size, mtime
/// and content hash still match a live `cache` entry, and records a fresh
/// entry for every file it does parse. The cache is opportunistic: a stale
/// or corrupt entry just means that one file gets re-scanned.
pub fn discover_with_cache(root: &Path, cache: &mut DiscoveryCache) -> DiscoveryResult {
    discover_impl(root, Some(cache))
}

fn discover_impl(root: &Path, mut cache: Option<&mut DiscoveryCache>) -> DiscoveryResult {
    let mut result = DiscoveryResult::default();
    let mut scanner = match AstScanner::new() {
        Ok(s) => s,
        Err(e) => {
            result.diagnostics.push(DiscoveryDiagnostic {
                path: root.to_path_buf(),
                reason: e.to_string(),
            });
            return result;
        }
    };

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.file_type().is_dir() {
                let name = e.file_name().to_string_lossy();
                if EXCLUDED_DIRS.iter().any(|ex| name == *ex) {
                    return false;
                }
            }
            true
        })
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && (is_test_file(p) || is_conftest(p)))
        .collect();
    paths.sort();

    for path in paths {
        if let Some(cache) = cache.as_deref() {
            if let Some((tests, fixtures)) = cache.get(&path) {
                trace!(path = %path.display(), "discovery cache hit");
                result.fixtures.extend(fixtures);
                result.tests.extend(tests);
                continue;
            }
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                result.diagnostics.push(DiscoveryDiagnostic {
                    path: path.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let (fixtures, tests) = match scan_file(&mut scanner, root, &path, &content) {
            Ok(v) => v,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping file that failed to parse");
                result.diagnostics.push(DiscoveryDiagnostic {
                    path: path.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if let Some(cache) = cache.as_deref_mut() {
            if let Err(e) = cache.update(path.clone(), tests.clone(), fixtures.clone()) {
                debug!(path = %path.display(), error = %e, "failed to update discovery cache entry");
            }
        }

        result.fixtures.extend(fixtures);
        result.tests.extend(tests);
    }

    apply_autouse_fixtures(&mut result);
    result
}

/// Scans one file into its own fixtures and test items. Conftest files never
/// yield test items even if a `def test_*` happens to live in one.
fn scan_file(
    scanner: &mut AstScanner,
    root: &Path,
    path: &Path,
    content: &str,
) -> anyhow::Result<(Vec<Fixture>, Vec<TestItem>)> {
    let scan = scanner.scan(content)?;
    let fixtures = extract_fixtures(path, &scan.functions);

    if is_conftest(path) {
        return Ok((fixtures, Vec::new()));
    }

    let rel = relative_id_path(root, path);
    let module = module_qualifier(root, path);
    let mut tests = Vec::new();

    for func in built_functions(&scan.functions, &scan.classes) {
        if is_fixture_function(func.func) {
            continue;
        }
        if !is_discoverable_test(func.func) {
            continue;
        }

        let markers = func.markers.clone();
        let base_id = match &func.func.class_name {
            Some(class) => format!("{rel}::{class}::{}", func.func.name),
            None => format!("{rel}::{}", func.func.name),
        };

        let mut final_markers = markers.clone();
        if func.class_excluded_as_testcase {
            let mut skip = MarkerRecord::new("skip");
            skip.positional_args
                .push(LiteralValue::Str("inherits from TestCase".to_string()));
            final_markers.push(skip);
        }

        let specs: Vec<_> = markers.iter().filter_map(parametrize::parse_spec).collect();
        let non_parametrize_markers: Vec<MarkerRecord> = final_markers
            .into_iter()
            .filter(|m| m.name != "parametrize")
            .collect();

        let item_path = path.to_path_buf();
        let item_module = module.clone();
        let func_name = func.func.name.clone();
        let class_name = func.func.class_name.clone();
        let is_async = func.func.is_async;
        let line = func.func.line;
        let declared_params = func.func.parameters.clone();

        let items = parametrize::expand(
            &base_id,
            &func_name.clone(),
            &specs,
            &declared_params,
            &non_parametrize_markers,
            move |id, params, item_markers, fixture_deps| TestItem {
                id: id.to_string(),
                path: item_path.clone(),
                line,
                module_qualifier: item_module.clone(),
                class_name: class_name.clone(),
                function_name: func_name.clone(),
                is_async,
                parameters: params,
                markers: item_markers,
                fixture_deps,
            },
        );

        for item in items {
            trace!(id = %item.id, "discovered test item");
            tests.push(item);
        }
    }

    Ok((fixtures, tests))
}

fn is_fixture_function(func: &RawFunction) -> bool {
    func.decorators
        .iter()
        .any(|d| d.callee.contains("fixture"))
}

fn is_discoverable_test(func: &RawFunction) -> bool {
    match &func.class_name {
        Some(class) => class.starts_with("Test") && func.name.starts_with("test"),
        None => func.name.starts_with("test_"),
    }
}

fn built_functions<'a>(
    functions: &'a [RawFunction],
    classes: &'a [RawClass],
) -> Vec<BuiltFunction<'a>> {
    functions
        .iter()
        .map(|func| {
            let markers = markers::extract_markers(&func.decorators);
            let class_excluded_as_testcase = func
                .class_name
                .as_ref()
                .and_then(|name| classes.iter().find(|c| &c.name == name))
                .map(|class| inherits_test_case(class, classes))
                .unwrap_or(false);
            BuiltFunction {
                func,
                markers,
                class_excluded_as_testcase,
            }
        })
        .collect()
}

fn extract_fixtures(path: &Path, functions: &[RawFunction]) -> Vec<Fixture> {
    functions
        .iter()
        .filter(|f| is_fixture_function(f))
        .map(|f| {
            let decorator = f
                .decorators
                .iter()
                .find(|d| d.callee.contains("fixture"))
                .unwrap();
            let scope = decorator
                .kwargs
                .iter()
                .find(|(k, _)| k == "scope")
                .and_then(|(_, v)| match v {
                    LiteralValue::Str(s) => Some(FixtureScope::from_str_or_function(s)),
                    _ => None,
                })
                .unwrap_or(FixtureScope::Function);
            let autouse = decorator
                .kwargs
                .iter()
                .any(|(k, v)| k == "autouse" && matches!(v, LiteralValue::Bool(true)));
            let params = decorator
                .kwargs
                .iter()
                .find(|(k, _)| k == "params")
                .and_then(|(_, v)| match v {
                    LiteralValue::List(items) | LiteralValue::Tuple(items) => Some(items.clone()),
                    _ => None,
                });
            let ids = decorator
                .kwargs
                .iter()
                .find(|(k, _)| k == "ids")
                .and_then(|(_, v)| match v {
                    LiteralValue::List(items) => Some(
                        items
                            .iter()
                            .map(LiteralValue::render_id_fragment)
                            .collect(),
                    ),
                    _ => None,
                });
            Fixture {
                name: f.name.clone(),
                path: path.to_path_buf(),
                scope,
                autouse,
                params,
                ids,
                deps: f.parameters.clone(),
                is_generator: f.has_yield,
                is_async: f.is_async,
            }
        })
        .collect()
}

/// True if `fixture` is visible to `test`: same file, or an ancestor
/// `conftest.py` — the same reach `FixtureRegistry::lookup` grants explicit
/// dependencies, needed here too since an autouse fixture is almost always
/// declared in a conftest rather than the test's own file.
fn visible_to(fixture: &Fixture, test: &TestItem) -> bool {
    fixture.path == test.path
        || (is_conftest(&fixture.path) && is_ancestor_of(&fixture.path, &test.path))
}

fn is_ancestor_of(conftest_path: &Path, test_path: &Path) -> bool {
    match conftest_path.parent() {
        Some(dir) => test_path.starts_with(dir),
        None => true,
    }
}

fn applies_to(fixture: &Fixture, test: &TestItem) -> bool {
    match fixture.scope {
        FixtureScope::Session => true,
        FixtureScope::Module => visible_to(fixture, test),
        FixtureScope::Class => visible_to(fixture, test) && test.class_name.is_some(),
        FixtureScope::Function => visible_to(fixture, test),
    }
}

fn apply_autouse_fixtures(result: &mut DiscoveryResult) {
    for test in &mut result.tests {
        for fixture in &result.fixtures {
            if fixture.autouse
                && applies_to(fixture, test)
                && !test.fixture_deps.contains(&fixture.name)
            {
                test.fixture_deps.push(fixture.name.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn autouse_fixture_from_conftest_is_injected_into_descendant_tests() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "conftest.py",
            "import pytest\n\n@pytest.fixture(autouse=True)\ndef seed_rng():\n    pass\n",
        );
        write(&dir, "test_f.py", "def test_ok():\n    assert True\n");

        let result = discover(dir.path());
        let test = result.tests.iter().find(|t| t.function_name == "test_ok").unwrap();
        assert!(
            test.fixture_deps.iter().any(|d| d == "seed_rng"),
            "autouse fixture declared in a conftest.py must reach sibling test files: {:?}",
            test.fixture_deps
        );
    }

    #[test]
    fn discovers_single_passing_test() {
        let dir = TempDir::new().unwrap();
        write(&dir, "test_f.py", "def test_ok():\n    assert 1 + 1 == 2\n");
        let result = discover(dir.path());
        assert_eq!(result.tests.len(), 1);
        assert_eq!(result.tests[0].id, "test_f.py::test_ok");
    }

    #[test]
    fn cached_discovery_matches_uncached_and_reuses_the_entry() {
        let dir = TempDir::new().unwrap();
        write(&dir, "test_f.py", "def test_ok():\n    assert 1 + 1 == 2\n");

        let mut cache = crate::cache::DiscoveryCache::new();
        let first = discover_with_cache(dir.path(), &mut cache);
        assert_eq!(first.tests.len(), 1);
        assert_eq!(cache.get(&dir.path().join("test_f.py")).unwrap().0.len(), 1);

        let second = discover_with_cache(dir.path(), &mut cache);
        assert_eq!(second.tests[0].id, first.tests[0].id);
    }

    #[test]
    fn ignores_non_matching_filenames() {
        let dir = TempDir::new().unwrap();
        write(&dir, "helpers.py", "def test_should_not_be_found():\n    pass\n");
        let result = discover(dir.path());
        assert!(result.tests.is_empty());
    }

    #[test]
    fn discovers_class_methods_and_skips_testcase_subclasses() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "test_classes.py",
            r#"
import unittest

class TestNormal:
    def test_one(self):
        pass

class TestLegacy(unittest.TestCase):
    def test_two(self):
        pass
"#,
        );
        let result = discover(dir.path());
        assert_eq!(result.tests.len(), 2);
        let legacy = result
            .tests
            .iter()
            .find(|t| t.function_name == "test_two")
            .unwrap();
        assert!(legacy.has_marker("skip"));
        assert_eq!(
            legacy.marker("skip").unwrap().positional_args[0].render_id_fragment(),
            "inherits from TestCase"
        );
    }

    #[test]
    fn expands_parametrize_cartesian_product() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "test_p.py",
            r#"
import pytest

@pytest.mark.parametrize("x,y,expected", [(1, 2, 3), (4, 5, 9), (10, -5, 5)])
def test_add(x, y, expected):
    assert x + y == expected
"#,
        );
        let result = discover(dir.path());
        assert_eq!(result.tests.len(), 3);
        assert_eq!(result.tests[0].id, "test_p.py::test_add[1-2-3]");
        assert_eq!(result.tests[2].id, "test_p.py::test_add[10--5-5]");
    }

    #[test]
    fn discovery_is_deterministic_across_runs() {
        let dir = TempDir::new().unwrap();
        write(&dir, "test_a.py", "def test_a():\n    pass\n");
        write(&dir, "test_b.py", "def test_b():\n    pass\n");
        let first: Vec<_> = discover(dir.path()).tests.into_iter().map(|t| t.id).collect();
        let second: Vec<_> = discover(dir.path()).tests.into_iter().map(|t| t.id).collect();
        assert_eq!(first, second);
    }
}
