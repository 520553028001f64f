//! Core types for the test runner: static discovery, the fixture
//! dependency model, marker parsing, and parametrization expansion.
//!
//! This crate never imports or executes the code it discovers. It reads
//! source text, builds the data model described by [`model`], and hands
//! that model to the execution layer.

pub mod cache;
pub mod discovery;
pub mod error;
pub mod fixtures;
pub mod markers;
pub mod model;
pub mod parametrize;
pub mod parser;

pub use cache::{default_cache_path, DiscoveryCache};
pub use error::{Error, Result};

pub use discovery::{discover, discover_with_cache, DiscoveryDiagnostic, DiscoveryResult};
pub use fixtures::{FixtureRegistry, FixtureResolutionError};
pub use markers::{skip_reason, timeout_seconds, xfail_is_strict, xfail_reason};
pub use parametrize::{expand as expand_parametrize, parse_spec as parse_parametrize_spec};
pub use parser::{AstScanner, RawClass, RawDecorator, RawFunction};

pub use model::{
    Fixture, FixturePlan, FixturePlanEntry, FixtureScope, LiteralValue, MarkerRecord, Outcome,
    ScopeKey, TestItem, TestResult, WorkUnit,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
