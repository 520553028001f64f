use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn discovers_a_single_test() {
    let temp_dir = TempDir::new().unwrap();
    let test_file = temp_dir.path().join("test_example.py");
    fs::write(&test_file, "def test_passing():\n    assert True\n").unwrap();

    Command::cargo_bin("fastest")
        .unwrap()
        .arg(test_file.to_str().unwrap())
        .arg("--collect-only")
        .arg("--no-cache")
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 tests"));
}

#[test]
fn filters_by_keyword() {
    let temp_dir = TempDir::new().unwrap();
    let test_file = temp_dir.path().join("test_example.py");
    fs::write(
        &test_file,
        "def test_foo():\n    assert True\n\ndef test_bar():\n    assert True\n",
    )
    .unwrap();

    Command::cargo_bin("fastest")
        .unwrap()
        .arg(test_file.to_str().unwrap())
        .arg("--collect-only")
        .arg("--no-cache")
        .arg("-k")
        .arg("foo")
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 tests"));
}

#[test]
fn discovers_class_based_tests() {
    let temp_dir = TempDir::new().unwrap();
    let test_file = temp_dir.path().join("test_class.py");
    fs::write(
        &test_file,
        "class TestMath:\n    def test_addition(self):\n        assert 1 + 1 == 2\n\n    def test_subtraction(self):\n        assert 3 - 1 == 2\n",
    )
    .unwrap();

    Command::cargo_bin("fastest")
        .unwrap()
        .arg(test_file.to_str().unwrap())
        .arg("--collect-only")
        .arg("--no-cache")
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 tests"));
}

#[test]
fn skipped_test_reports_as_skipped_and_exits_clean() {
    let temp_dir = TempDir::new().unwrap();
    let test_file = temp_dir.path().join("test_skip.py");
    fs::write(
        &test_file,
        "import pytest\n\n@pytest.mark.skip(reason=\"not ready\")\ndef test_pending():\n    assert False\n",
    )
    .unwrap();

    Command::cargo_bin("fastest")
        .unwrap()
        .arg(test_file.to_str().unwrap())
        .arg("-v")
        .arg("--no-cache")
        .assert()
        .success()
        .stdout(predicate::str::contains("SKIPPED"));
}

#[test]
fn no_tests_found_exits_clean() {
    let temp_dir = TempDir::new().unwrap();

    Command::cargo_bin("fastest")
        .unwrap()
        .arg(temp_dir.path().to_str().unwrap())
        .arg("--no-cache")
        .assert()
        .success();
}
