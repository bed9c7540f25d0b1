//! Proptest strategies for envelope and lifecycle properties.

use image_pipeline::{TaskEvent, TaskStatus};
use proptest::prelude::*;
use uuid::Uuid;

/// Any UUID except the nil one
pub fn non_nil_uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>()
        .prop_filter("nil uuid", |v| *v != 0)
        .prop_map(Uuid::from_u128)
}

pub fn task_status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

pub fn task_event_strategy() -> impl Strategy<Value = TaskEvent> {
    prop_oneof![
        Just(TaskEvent::Start),
        Just(TaskEvent::Complete),
        "[a-z ]{1,32}".prop_map(TaskEvent::Fail),
    ]
}
