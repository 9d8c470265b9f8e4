use glam::{DQuat, DVec3};

use igt_history::RegistrationKind;
use igt_registration::{RegistrationError, RegistrationManager, Reparenting};
use igt_tf::{DataKind, DataObject, FrameForest, SpatialModel};
use igt_types::{DEFAULT_TRANSFORM_TOLERANCE, ObjectId, Transform};

// ---

fn pose(angle: f64, translation: DVec3) -> Transform {
    Transform::from_rotation_translation(DQuat::from_rotation_x(angle), translation)
}

fn add_object(
    model: &mut SpatialModel,
    name: &str,
    transform: Transform,
    parent: Option<ObjectId>,
) -> ObjectId {
    let id = model.insert_data(DataObject::new(name, DataKind::Image)).unwrap();
    if let Some(history) = model.history_mut(id) {
        history.set_transform(transform);
        history.set_parent_space(parent);
    }
    id
}

/// A (below reference), B (below A), C (below reference, on its own).
fn abc() -> (SpatialModel, [ObjectId; 3]) {
    let mut model = SpatialModel::new();
    let a = add_object(&mut model, "A", pose(0.1, DVec3::new(1.0, 0.0, 0.0)), None);
    let b = add_object(&mut model, "B", pose(-0.4, DVec3::new(0.0, 5.0, 0.0)), Some(a));
    let c = add_object(&mut model, "C", pose(0.7, DVec3::new(0.0, 0.0, 9.0)), None);
    (model, [a, b, c])
}

fn transform_of(model: &SpatialModel, id: ObjectId) -> Transform {
    model.data(id).map(DataObject::current_transform).unwrap()
}

fn parent_of(model: &SpatialModel, id: ObjectId) -> Option<ObjectId> {
    model.data(id).and_then(DataObject::current_parent)
}

fn event_counts(model: &SpatialModel) -> Vec<(usize, usize)> {
    model
        .object_ids()
        .into_iter()
        .filter_map(|id| model.history(id))
        .map(|history| (history.transform_events().len(), history.parent_space_events().len()))
        .collect()
}

#[test]
fn registration_moves_the_subtree_and_merges_the_trees() {
    igt_log::setup_logging();

    let (mut model, [a, b, c]) = abc();
    let (ra, rb, rc) = (transform_of(&model, a), transform_of(&model, b), transform_of(&model, c));

    let delta = pose(0.25, DVec3::new(3.0, -2.0, 1.0));
    let mut manager = RegistrationManager::default();
    let outcome = manager
        .update_registration(&mut model, delta, a, Some(c), RegistrationKind::Manual)
        .unwrap();

    assert_eq!(outcome.target_base, a);
    assert_eq!(outcome.affected, vec![a, b]);
    assert_eq!(
        outcome.reparenting,
        Some(Reparenting {
            node: a,
            old_parent: None,
            new_parent: c
        })
    );
    assert_eq!(manager.last_registration_time(), Some(outcome.timestamp));

    assert!(transform_of(&model, a).approx_eq(&(delta * ra), DEFAULT_TRANSFORM_TOLERANCE));
    assert!(transform_of(&model, b).approx_eq(&(delta * rb), DEFAULT_TRANSFORM_TOLERANCE));
    assert_eq!(transform_of(&model, c), rc);

    assert_eq!(parent_of(&model, a), Some(c));
    assert_eq!(parent_of(&model, b), Some(a));
    assert_eq!(parent_of(&model, c), None);

    // All new events share one timestamp and carry their provenance.
    for id in [a, b] {
        let history = model.history(id).unwrap();
        let last = history.transform_events().last().unwrap();
        assert_eq!(last.timestamp, outcome.timestamp);
        assert_eq!(last.fixed, Some(c));
        assert_eq!(last.moving, Some(a));
    }
}

#[test]
fn connected_trees_keep_their_topology() {
    igt_log::setup_logging();

    let (mut model, [a, b, c]) = abc();
    let mut manager = RegistrationManager::default();
    manager
        .update_registration(&mut model, pose(0.1, DVec3::X), a, Some(c), RegistrationKind::Manual)
        .unwrap();
    manager.restart_session();

    let parents_before = model.parent_snapshot();
    let rc = transform_of(&model, c);

    let outcome = manager
        .update_registration(&mut model, pose(-0.3, DVec3::Y), b, Some(c), RegistrationKind::Manual)
        .unwrap();

    assert_eq!(outcome.reparenting, None);
    assert_eq!(outcome.target_base, a);
    assert_eq!(model.parent_snapshot(), parents_before);
    assert_eq!(transform_of(&model, c), rc);
}

#[test]
fn registering_against_a_sibling_moves_only_the_object() {
    igt_log::setup_logging();

    let mut model = SpatialModel::new();
    let root = add_object(&mut model, "root", Transform::IDENTITY, None);
    let left = add_object(&mut model, "left", Transform::IDENTITY, Some(root));
    let right = add_object(&mut model, "right", Transform::IDENTITY, Some(root));
    let leaf = add_object(&mut model, "leaf", Transform::IDENTITY, Some(left));

    let mut manager = RegistrationManager::default();
    let outcome = manager
        .update_registration(
            &mut model,
            pose(0.2, DVec3::Z),
            left,
            Some(right),
            RegistrationKind::Landmark,
        )
        .unwrap();

    assert_eq!(outcome.affected, vec![left, leaf]);
    assert_eq!(outcome.reparenting, None);
    assert_eq!(transform_of(&model, root), Transform::IDENTITY);
    assert_eq!(transform_of(&model, right), Transform::IDENTITY);
}

#[test]
fn without_master_only_the_subtree_moves() {
    igt_log::setup_logging();

    let (mut model, [a, b, c]) = abc();
    let mut manager = RegistrationManager::default();
    let outcome = manager
        .update_registration(&mut model, pose(0.3, DVec3::ONE), b, None, RegistrationKind::Manual)
        .unwrap();

    assert_eq!(outcome.affected, vec![b]);
    assert_eq!(outcome.reparenting, None);
    assert_eq!(parent_of(&model, b), Some(a));
    assert_eq!(parent_of(&model, c), None);
}

#[test]
fn a_session_replaces_its_own_events() {
    igt_log::setup_logging();

    let (mut model, [a, _, c]) = abc();
    let mut manager = RegistrationManager::default();

    manager
        .update_registration(&mut model, pose(0.1, DVec3::X), a, Some(c), RegistrationKind::Landmark)
        .unwrap();
    let after_first = event_counts(&model);

    // Redoing the same kind of registration replaces the previous attempt.
    manager
        .update_registration(&mut model, pose(0.2, DVec3::X), a, Some(c), RegistrationKind::Landmark)
        .unwrap();
    assert_eq!(event_counts(&model), after_first);

    // A new session appends.
    manager.restart_session();
    manager
        .update_registration(&mut model, pose(0.3, DVec3::X), a, Some(c), RegistrationKind::Landmark)
        .unwrap();
    let history = model.history(a).unwrap();
    assert_eq!(history.transform_events().len(), after_first[0].0 + 1);
}

#[test]
fn rejected_requests_change_nothing() {
    igt_log::setup_logging();

    let (mut model, [a, _, c]) = abc();
    let snapshot = event_counts(&model);
    let mut manager = RegistrationManager::default();

    let scaling =
        Transform::from_mat3_translation(glam::DMat3::from_diagonal(DVec3::splat(2.0)), DVec3::ZERO);
    assert!(matches!(
        manager.update_registration(&mut model, scaling, a, Some(c), RegistrationKind::Manual),
        Err(RegistrationError::Degenerate)
    ));

    let nan = Transform::from_translation(DVec3::new(f64::NAN, 0.0, 0.0));
    assert!(matches!(
        manager.update_registration(&mut model, nan, a, None, RegistrationKind::Manual),
        Err(RegistrationError::Degenerate)
    ));

    let missing = ObjectId::new(1000);
    assert!(matches!(
        manager.update_registration(
            &mut model,
            Transform::IDENTITY,
            a,
            Some(missing),
            RegistrationKind::Manual
        ),
        Err(RegistrationError::UnknownData(id)) if id == missing
    ));

    assert!(matches!(
        manager.apply_image_to_image_registration(
            &mut model,
            Transform::IDENTITY,
            RegistrationKind::Manual
        ),
        Err(RegistrationError::NoFixedData)
    ));

    assert_eq!(event_counts(&model), snapshot);
    assert_eq!(manager.last_registration_time(), None);
}

#[test]
fn repeated_registrations_never_create_cycles() {
    igt_log::setup_logging();

    let mut model = SpatialModel::new();
    let ids: Vec<ObjectId> = (0..4)
        .map(|i| add_object(&mut model, &format!("object {i}"), Transform::IDENTITY, None))
        .collect();

    let mut manager = RegistrationManager::default();
    let pairs = [(0, 1), (1, 2), (2, 0), (3, 1), (0, 3), (2, 3), (1, 0), (3, 2), (0, 2)];
    for (round, (moving, fixed)) in pairs.into_iter().enumerate() {
        let delta = pose(0.01 * round as f64, DVec3::new(round as f64, 0.0, 0.0));
        manager
            .update_registration(
                &mut model,
                delta,
                ids[moving],
                Some(ids[fixed]),
                RegistrationKind::ImageToImage,
            )
            .unwrap();
        manager.restart_session();

        let forest = FrameForest::from_model(&model);
        assert!(forest.broken_cycles().is_empty(), "cycle after round {round}");
        for id in &ids {
            assert!(forest.oldest_ancestor(*id).is_ok());
        }
    }

    // Everything ended up in one tree.
    let forest = FrameForest::from_model(&model);
    assert_eq!(forest.roots().len(), 1);
}

#[test]
fn undo_rolls_everything_back() {
    igt_log::setup_logging();

    let (mut model, [a, b, c]) = abc();
    let mut manager = RegistrationManager::default();

    let first = manager
        .update_registration(&mut model, pose(0.1, DVec3::X), a, Some(c), RegistrationKind::Manual)
        .unwrap();
    let (ra, rb) = (transform_of(&model, a), transform_of(&model, b));
    manager.restart_session();

    manager
        .update_registration(&mut model, pose(0.5, DVec3::Y), a, Some(c), RegistrationKind::Manual)
        .unwrap();
    manager
        .apply_patient_registration(&mut model, pose(0.3, DVec3::Z), RegistrationKind::Manual)
        .unwrap();
    assert_ne!(transform_of(&model, a), ra);

    manager.undo_to(&mut model, first.timestamp);

    assert_eq!(transform_of(&model, a), ra);
    assert_eq!(transform_of(&model, b), rb);
    assert_eq!(parent_of(&model, a), Some(c));
    assert_eq!(model.reference_from_patient_ref(), Transform::IDENTITY);
    assert_eq!(manager.last_registration_time(), None);
}
