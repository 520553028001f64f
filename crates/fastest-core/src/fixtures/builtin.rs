//! Metadata for the fixed set of built-in fixtures. Producing the actual
//! runtime values (a real temp dir, real captured streams, ...) is the
//! worker-side adapter's job — an external collaborator — so this module
//! only describes shape: name, scope, and whether the fixture is a
//! generator (has teardown).

use std::path::PathBuf;

use crate::model::{Fixture, FixtureScope};

pub mod names {
    pub const TMP_PATH: &str = "tmp_path";
    pub const TMP_PATH_FACTORY: &str = "tmp_path_factory";
    pub const CAPSYS: &str = "capsys";
    pub const CAPFD: &str = "capfd";
    pub const MONKEYPATCH: &str = "monkeypatch";
    pub const REQUEST: &str = "request";

    pub const ALL: &[&str] = &[TMP_PATH, TMP_PATH_FACTORY, CAPSYS, CAPFD, MONKEYPATCH, REQUEST];
}

pub fn is_builtin_fixture(name: &str) -> bool {
    names::ALL.contains(&name)
}

/// Synthesizes the [`Fixture`] record for a built-in name, or `None` if it
/// isn't one. `monkeypatch` and `tmp_path` have teardown (a generator, in
/// spec terms); `capsys`/`request` do not.
pub fn builtin_fixture(name: &str) -> Option<Fixture> {
    if !is_builtin_fixture(name) {
        return None;
    }
    let is_generator = matches!(name, names::TMP_PATH | names::MONKEYPATCH);
    Some(Fixture {
        name: name.to_string(),
        path: PathBuf::new(),
        scope: FixtureScope::Function,
        autouse: false,
        params: None,
        ids: None,
        deps: Vec::new(),
        is_generator,
        is_async: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_all_builtin_names() {
        for name in names::ALL {
            assert!(is_builtin_fixture(name));
            assert!(builtin_fixture(name).is_some());
        }
        assert!(!is_builtin_fixture("db"));
    }
}
