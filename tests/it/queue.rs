//! Task-state naming: the display form for every [`TaskState`] variant,
//! matched against the wire values [`dsx_connect_worker::queue::TaskQueue`]
//! reads back out of its state hash.

use dsx_connect_worker::queue::TaskState;

#[test]
fn every_task_state_displays_in_screaming_snake_case() {
    let cases = [
        (TaskState::Pending, "PENDING"),
        (TaskState::Received, "RECEIVED"),
        (TaskState::Started, "STARTED"),
        (TaskState::Retry, "RETRY"),
        (TaskState::Success, "SUCCESS"),
        (TaskState::Failure, "FAILURE"),
        (TaskState::Revoked, "REVOKED"),
    ];
    for (state, expected) in cases {
        assert_eq!(state.to_string(), expected);
    }
}

#[test]
fn task_states_are_pairwise_distinct() {
    let states = [
        TaskState::Pending,
        TaskState::Received,
        TaskState::Started,
        TaskState::Retry,
        TaskState::Success,
        TaskState::Failure,
        TaskState::Revoked,
    ];
    let names: Vec<String> = states.iter().map(ToString::to_string).collect();
    let mut unique = names.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), names.len());
}
