//! The wire data model shared by discovery, fixture resolution, scheduling and
//! the worker IPC protocol. Field names here are the normative wire encoding:
//! anything under `fastest-execution`/`fastest-worker` that serializes a
//! [`TestItem`] or [`TestResult`] must round-trip through these shapes
//! unchanged.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A marker decorator recorded opaquely: `@pytest.mark.<name>(*positional_args, **named_args)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub name: String,
    pub positional_args: Vec<LiteralValue>,
    pub named_args: IndexMap<String, LiteralValue>,
}

impl MarkerRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            positional_args: Vec::new(),
            named_args: IndexMap::new(),
        }
    }

    pub fn named(&self, key: &str) -> Option<&LiteralValue> {
        self.named_args.get(key)
    }
}

/// A parsed decorator argument. Anything the static parser cannot reduce to a
/// literal structure is kept as its raw source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum LiteralValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<LiteralValue>),
    List(Vec<LiteralValue>),
    Dict(Vec<(LiteralValue, LiteralValue)>),
    /// A `pytest.param(...)` wrapper: carries its own values plus an explicit
    /// id and/or sub-markers, which parametrization expansion passes through.
    ParamCase {
        values: Vec<LiteralValue>,
        id: Option<String>,
        marks: Vec<String>,
    },
    /// Could not be reduced to a literal; carries its source text verbatim.
    Raw(String),
}

impl LiteralValue {
    /// Canonical rendering used for parametrize id synthesis.
    pub fn render_id_fragment(&self) -> String {
        match self {
            LiteralValue::None => "None".to_string(),
            LiteralValue::Bool(b) => b.to_string(),
            LiteralValue::Int(i) => i.to_string(),
            LiteralValue::Float(f) => {
                if f.fract() == 0.0 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            LiteralValue::Str(s) => s.clone(),
            LiteralValue::Raw(s) => s.clone(),
            LiteralValue::Tuple(_) | LiteralValue::List(_) | LiteralValue::Dict(_) => {
                "complex".to_string()
            }
            LiteralValue::ParamCase { id: Some(id), .. } => id.clone(),
            LiteralValue::ParamCase { values, .. } => LiteralValue::Tuple(values.clone())
                .render_id_fragment(),
        }
    }

    /// Source-text rendering used when a test function receives the value
    /// directly (non-indirect parametrization).
    pub fn render_source(&self) -> String {
        match self {
            LiteralValue::None => "None".to_string(),
            LiteralValue::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            LiteralValue::Int(i) => i.to_string(),
            LiteralValue::Float(f) => f.to_string(),
            LiteralValue::Str(s) => format!("{s:?}"),
            LiteralValue::Raw(s) => s.clone(),
            LiteralValue::Tuple(items) => format!(
                "({})",
                items
                    .iter()
                    .map(LiteralValue::render_source)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            LiteralValue::List(items) => format!(
                "[{}]",
                items
                    .iter()
                    .map(LiteralValue::render_source)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            LiteralValue::Dict(pairs) => format!(
                "{{{}}}",
                pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.render_source(), v.render_source()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            LiteralValue::ParamCase { values, .. } => {
                LiteralValue::Tuple(values.clone()).render_source()
            }
        }
    }
}

/// A single executable test occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestItem {
    pub id: String,
    pub path: PathBuf,
    pub line: usize,
    pub module_qualifier: String,
    pub class_name: Option<String>,
    pub function_name: String,
    pub is_async: bool,
    pub parameters: Option<IndexMap<String, String>>,
    pub markers: Vec<MarkerRecord>,
    pub fixture_deps: Vec<String>,
}

impl TestItem {
    pub fn marker(&self, name: &str) -> Option<&MarkerRecord> {
        self.markers.iter().find(|m| m.name == name)
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.marker(name).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureScope {
    Session,
    Module,
    Class,
    Function,
}

impl FixtureScope {
    /// Lower rank outlives higher rank: session(0) >= module(1) >= class(2) >= function(3).
    pub fn rank(self) -> u8 {
        match self {
            FixtureScope::Session => 0,
            FixtureScope::Module => 1,
            FixtureScope::Class => 2,
            FixtureScope::Function => 3,
        }
    }

    /// True iff `self` may depend on a fixture of scope `other` (self's scope
    /// must be <= other's, i.e. other lives at least as long as self).
    pub fn may_depend_on(self, other: FixtureScope) -> bool {
        other.rank() <= self.rank()
    }

    pub fn from_str_or_function(s: &str) -> Self {
        match s {
            "session" => FixtureScope::Session,
            "module" => FixtureScope::Module,
            "class" => FixtureScope::Class,
            _ => FixtureScope::Function,
        }
    }
}

/// A declared dependency provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub name: String,
    pub path: PathBuf,
    pub scope: FixtureScope,
    pub autouse: bool,
    pub params: Option<Vec<LiteralValue>>,
    pub ids: Option<Vec<String>>,
    pub deps: Vec<String>,
    pub is_generator: bool,
    pub is_async: bool,
}

/// Stable key identifying a cached fixture instance (the scope cache key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKey {
    Function { fixture: String, test_id: String },
    Class { fixture: String, path: PathBuf, class_name: String },
    Module { fixture: String, path: PathBuf },
    Session { fixture: String },
}

impl ScopeKey {
    pub fn for_fixture(fixture: &Fixture, test: &TestItem) -> Self {
        match fixture.scope {
            FixtureScope::Function => ScopeKey::Function {
                fixture: fixture.name.clone(),
                test_id: test.id.clone(),
            },
            FixtureScope::Class => ScopeKey::Class {
                fixture: fixture.name.clone(),
                path: test.path.clone(),
                class_name: test.class_name.clone().unwrap_or_default(),
            },
            FixtureScope::Module => ScopeKey::Module {
                fixture: fixture.name.clone(),
                path: test.path.clone(),
            },
            FixtureScope::Session => ScopeKey::Session {
                fixture: fixture.name.clone(),
            },
        }
    }
}

/// One fixture instantiation a [`FixturePlan`] will set up before a test runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixturePlanEntry {
    pub name: String,
    pub scope: FixtureScope,
    pub autouse: bool,
    pub scope_key: ScopeKey,
    /// `request.param` value when this fixture is the target of indirect
    /// parametrization.
    pub indirect_param: Option<String>,
}

/// The resolved, topologically sorted plan for one [`TestItem`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixturePlan {
    pub setup_order: Vec<FixturePlanEntry>,
}

impl FixturePlan {
    pub fn teardown_order(&self) -> impl Iterator<Item = &FixturePlanEntry> {
        self.setup_order.iter().rev()
    }
}

/// The atomic dispatch record sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkUnit {
    Single {
        req_id: u64,
        item: TestItem,
        fixture_plan: FixturePlan,
    },
    Batch {
        req_id: u64,
        items: Vec<(TestItem, FixturePlan)>,
    },
}

impl WorkUnit {
    pub fn req_id(&self) -> u64 {
        match self {
            WorkUnit::Single { req_id, .. } => *req_id,
            WorkUnit::Batch { req_id, .. } => *req_id,
        }
    }

    pub fn item_ids(&self) -> Vec<&str> {
        match self {
            WorkUnit::Single { item, .. } => vec![item.id.as_str()],
            WorkUnit::Batch { items, .. } => items.iter().map(|(t, _)| t.id.as_str()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WorkUnit::Single { .. } => 1,
            WorkUnit::Batch { items, .. } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    Xfailed,
    Xpassed,
    Error,
}

/// The per-test outcome.
///
/// `xfail_strict` only carries meaning when `outcome` is [`Outcome::Xpassed`]:
/// it records whether the originating `xfail` marker asked for `strict=True`,
/// since `Outcome` alone can't tell an acceptable unexpected-pass apart from
/// one that should fail the run. It's `false` (its serde default) for every
/// other outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub outcome: Outcome,
    pub duration_seconds: f64,
    pub captured_stdout: String,
    pub captured_stderr: String,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub traceback: Option<String>,
    #[serde(default)]
    pub xfail_strict: bool,
}

impl TestResult {
    pub fn error(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Error,
            duration_seconds: 0.0,
            captured_stdout: String::new(),
            captured_stderr: String::new(),
            error_type: Some("RunnerError".to_string()),
            error_message: Some(reason.into()),
            traceback: None,
            xfail_strict: false,
        }
    }
}
