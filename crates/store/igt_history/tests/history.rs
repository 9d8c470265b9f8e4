use glam::{DQuat, DVec3};

use igt_history::{
    HistoryDocument, ParentSpaceEvent, PersistenceError, RegistrationHistory, RegistrationKind,
    TransformEvent,
};
use igt_types::{ActiveTime, ObjectId, RegistrationTime, Transform};

// ---

fn at(millis: i64) -> RegistrationTime {
    RegistrationTime::from_millis_since_epoch(1_700_000_000_000 + millis)
}

fn pose(angle: f64, x: f64) -> Transform {
    Transform::from_rotation_translation(DQuat::from_rotation_z(angle), DVec3::new(x, 2.0, 3.0))
}

/// Three transform events at t1 < t2 < t3 and two parent events.
fn three_step_history() -> RegistrationHistory {
    let mut history = RegistrationHistory::new();
    history.add_transform(TransformEvent::new(pose(0.0, 1.0), at(100), RegistrationKind::Initial));
    history.add_transform(
        TransformEvent::new(pose(0.1, 2.0), at(200), RegistrationKind::Landmark)
            .with_provenance(Some(ObjectId::new(1)), Some(ObjectId::new(2))),
    );
    history.add_transform(TransformEvent::new(pose(0.2, 3.0), at(300), RegistrationKind::Manual));
    history.add_parent_space(ParentSpaceEvent::new(None, at(100), RegistrationKind::Initial));
    history.add_parent_space(ParentSpaceEvent::new(
        Some(ObjectId::new(1)),
        at(200),
        RegistrationKind::Landmark,
    ));
    history
}

#[test]
fn duplicate_insertion_is_idempotent() {
    igt_log::setup_logging();

    let mut history = three_step_history();
    let n = history.transform_events().len();

    let again = TransformEvent::new(pose(0.2, 3.0), at(300), RegistrationKind::Manual);
    assert!(!history.add_transform(again));
    assert_eq!(history.transform_events().len(), n);

    // Same time and kind but another value is not a duplicate.
    let different = TransformEvent::new(pose(0.3, 3.0), at(300), RegistrationKind::Manual);
    assert!(history.add_transform(different));
    assert_eq!(history.transform_events().len(), n + 1);
}

#[test]
fn active_time_selects_cached_state() {
    igt_log::setup_logging();

    let mut history = three_step_history();

    history.set_active_time(ActiveTime::At(at(200)));
    assert_eq!(history.current_transform(), pose(0.1, 2.0));
    assert_eq!(history.current_parent(), Some(ObjectId::new(1)));

    history.set_active_time(ActiveTime::At(at(150)));
    assert_eq!(history.current_transform(), pose(0.0, 1.0));
    assert_eq!(history.current_parent(), None);

    history.set_active_time(ActiveTime::At(at(0)));
    assert_eq!(history.current_transform(), Transform::IDENTITY);

    history.set_active_time(ActiveTime::Latest);
    assert_eq!(history.current_transform(), pose(0.2, 3.0));

    // The logs themselves never changed.
    assert_eq!(history.transform_events().len(), 3);
}

#[test]
fn adding_resets_active_time_to_latest() {
    igt_log::setup_logging();

    let mut history = three_step_history();
    history.set_active_time(ActiveTime::At(at(100)));

    history.add_transform(TransformEvent::new(pose(0.5, 9.0), at(50), RegistrationKind::Manual));
    assert_eq!(history.active_time(), ActiveTime::Latest);
    assert_eq!(history.current_transform(), pose(0.2, 3.0));
}

#[test]
fn rollback_removes_newer_events() {
    igt_log::setup_logging();

    let mut history = three_step_history();
    history.remove_newer_than(at(200));

    assert_eq!(history.transform_events().len(), 2);
    history.set_active_time(ActiveTime::Latest);
    assert_eq!(history.current_transform(), pose(0.1, 2.0));
    assert_eq!(history.current_parent(), Some(ObjectId::new(1)));

    history.remove_newer_than(at(100));
    assert_eq!(history.current_parent(), None);
    assert_eq!(history.parent_space_events().len(), 1);
}

#[test]
fn document_round_trip() {
    igt_log::setup_logging();

    let mut history = three_step_history();
    history.set_active_time(ActiveTime::At(at(250)));

    let json = history.to_json_string().unwrap();
    let restored = RegistrationHistory::from_json_str(&json).unwrap();

    similar_asserts::assert_eq!(restored.transform_events(), history.transform_events());
    similar_asserts::assert_eq!(restored.parent_space_events(), history.parent_space_events());
    assert_eq!(restored.active_time(), ActiveTime::At(at(250)));
    assert_eq!(restored.current_transform(), pose(0.1, 2.0));
    assert_eq!(restored, history);
}

#[test]
fn document_layout() {
    igt_log::setup_logging();

    let history = three_step_history();
    let document = history.to_document();

    assert_eq!(document.transforms.len(), 3);
    assert_eq!(document.transforms[1].kind, "landmark");
    assert_eq!(document.transforms[1].fixed, Some(ObjectId::new(1)));
    assert_eq!(document.parent_spaces[0].value, "");
    assert_eq!(document.parent_spaces[1].value, "1");
    assert_eq!(document.current_time, None);

    let json = serde_json::to_value(&document).unwrap();
    assert!(json["transforms"][0].get("fixed").is_none());
    assert_eq!(
        json["transforms"][0]["timestamp"],
        serde_json::Value::String(at(100).to_string())
    );
}

#[test]
fn null_history_serializes_empty() {
    igt_log::setup_logging();

    let document = RegistrationHistory::null().to_document();
    assert_eq!(document, HistoryDocument::default());
    assert!(!RegistrationHistory::from_document(&document).unwrap().is_null());
}

#[test]
fn corrupt_documents_are_rejected() {
    igt_log::setup_logging();

    let mut document = three_step_history().to_document();
    document.transforms[2].matrix = "1 2 3".to_owned();
    assert!(matches!(
        RegistrationHistory::from_document(&document),
        Err(PersistenceError::Matrix { index: 2, .. })
    ));

    let mut document = three_step_history().to_document();
    document.parent_spaces[1].value = "not-an-id".to_owned();
    assert!(matches!(
        RegistrationHistory::from_document(&document),
        Err(PersistenceError::Parent { index: 1, .. })
    ));

    assert!(matches!(
        RegistrationHistory::from_json_str("{ \"transforms\": 5 }"),
        Err(PersistenceError::Json(_))
    ));
}

#[test]
fn custom_kinds_with_builtin_tags_round_trip() {
    igt_log::setup_logging();

    let mut history = RegistrationHistory::new();
    history.add_transform(TransformEvent::new(
        pose(0.0, 1.0),
        at(100),
        RegistrationKind::Custom("manual".to_owned()),
    ));

    let json = history.to_json_string().unwrap();
    let restored = RegistrationHistory::from_json_str(&json).unwrap();
    assert_eq!(restored.transform_events()[0].kind, RegistrationKind::Manual);
    assert_eq!(restored, history);

    // A builtin kind replaces the event of the equally named custom kind.
    history.update_transform(
        Some(at(100)),
        TransformEvent::new(pose(0.0, 5.0), at(150), RegistrationKind::Manual),
    );
    assert_eq!(history.transform_events().len(), 1);
    assert_eq!(history.current_transform(), pose(0.0, 5.0));
}
