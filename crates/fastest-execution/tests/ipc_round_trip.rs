use std::io::Cursor;
use std::path::PathBuf;

use fastest_core::{FixturePlan, Outcome, TestItem, TestResult};
use fastest_execution::ipc::{self, HostMessage, WireUnit, WorkerMessage};

fn item(name: &str) -> TestItem {
    TestItem {
        id: format!("t.py::{name}"),
        path: PathBuf::from("t.py"),
        line: 1,
        module_qualifier: "t".to_string(),
        class_name: None,
        function_name: name.to_string(),
        is_async: false,
        parameters: None,
        markers: vec![],
        fixture_deps: vec![],
    }
}

/// Exercises the exact frame sequence a worker subprocess and the host
/// exchange for one dispatch: an `Exec` request in, one `ItemResult` per
/// item followed by `UnitDone` out.
#[test]
fn exec_then_item_results_round_trip_through_one_pipe() {
    let unit = WireUnit {
        req_id: 7,
        items: vec![(item("test_a"), FixturePlan::default()), (item("test_b"), FixturePlan::default())],
    };

    let mut pipe = Vec::new();
    ipc::write_frame(&mut pipe, &HostMessage::Exec { req_id: 7, unit }).unwrap();

    let mut cursor = Cursor::new(pipe);
    let decoded: HostMessage = ipc::read_frame(&mut cursor).unwrap().unwrap();
    let HostMessage::Exec { req_id, unit } = decoded else {
        panic!("expected Exec");
    };
    assert_eq!(req_id, 7);
    assert_eq!(unit.items.len(), 2);

    let mut response = Vec::new();
    for (item, _) in &unit.items {
        let result = TestResult {
            id: item.id.clone(),
            outcome: Outcome::Passed,
            duration_seconds: 0.0,
            captured_stdout: String::new(),
            captured_stderr: String::new(),
            error_type: None,
            error_message: None,
            traceback: None,
            xfail_strict: false,
        };
        ipc::write_frame(&mut response, &WorkerMessage::ItemResult { req_id, result }).unwrap();
    }
    ipc::write_frame(&mut response, &WorkerMessage::UnitDone { req_id }).unwrap();

    let mut response_cursor = Cursor::new(response);
    let mut results = Vec::new();
    loop {
        match ipc::read_frame(&mut response_cursor).unwrap().unwrap() {
            WorkerMessage::ItemResult { result, .. } => results.push(result),
            WorkerMessage::UnitDone { req_id } => {
                assert_eq!(req_id, 7);
                break;
            }
            other => panic!("expected ItemResult or UnitDone, got {other:?}"),
        }
    }
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.outcome == Outcome::Passed));
}

#[test]
fn two_frames_written_back_to_back_are_read_independently() {
    let mut pipe = Vec::new();
    ipc::write_frame(&mut pipe, &WorkerMessage::Ready).unwrap();
    ipc::write_frame(&mut pipe, &HostMessage::Shutdown).unwrap();

    let mut cursor = Cursor::new(pipe);
    let first: WorkerMessage = ipc::read_frame(&mut cursor).unwrap().unwrap();
    assert!(matches!(first, WorkerMessage::Ready));
    let second: HostMessage = ipc::read_frame(&mut cursor).unwrap().unwrap();
    assert!(matches!(second, HostMessage::Shutdown));
}
