use std::sync::atomic::AtomicBool;

use glam::DVec3;
use igt_log::ResultExt as _;

use igt_history::{ParentSpaceEvent, RegistrationKind, TransformEvent};
use igt_tf::{DataObject, FrameForest, SpatialModel};
use igt_types::{ObjectId, RegistrationTime, Transform};

use crate::{
    IcpJob, IcpRegistration, IcpResult, MIN_TRANSLATION_POINTS, RegistrationError,
    RegistrationSettings, register_points,
};

/// A parent-space change made while merging two previously disconnected trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reparenting {
    pub node: ObjectId,
    pub old_parent: Option<ObjectId>,
    pub new_parent: ObjectId,
}

/// What [`RegistrationManager::update_registration`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationOutcome {
    /// Shared by every event written by this action.
    pub timestamp: RegistrationTime,

    /// The highest node that moved together with the moving object.
    pub target_base: ObjectId,

    /// Every object that received a new transform, ascending.
    pub affected: Vec<ObjectId>,

    pub reparenting: Option<Reparenting>,
}

/// Selects fixed and moving data, runs the registration algorithms and writes the results
/// into the histories of exactly the objects that have to move.
///
/// Consecutive actions of the same kind form a session: each one replaces the events the
/// previous one wrote, instead of piling up new ones. [`Self::restart_session`] ends a session.
#[derive(Debug, Default)]
pub struct RegistrationManager {
    settings: RegistrationSettings,
    fixed: Option<ObjectId>,
    moving: Option<ObjectId>,
    last_registration_time: Option<RegistrationTime>,
}

impl RegistrationManager {
    pub fn new(settings: RegistrationSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    #[inline]
    pub fn settings(&self) -> &RegistrationSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: RegistrationSettings) {
        self.settings = settings;
    }

    pub fn set_fixed_data(&mut self, fixed: Option<ObjectId>) {
        self.fixed = fixed;
    }

    #[inline]
    pub fn fixed_data(&self) -> Option<ObjectId> {
        self.fixed
    }

    pub fn set_moving_data(&mut self, moving: Option<ObjectId>) {
        self.moving = moving;
    }

    #[inline]
    pub fn moving_data(&self) -> Option<ObjectId> {
        self.moving
    }

    /// Timestamp of the events written by the last action of the current session.
    #[inline]
    pub fn last_registration_time(&self) -> Option<RegistrationTime> {
        self.last_registration_time
    }

    /// The next action appends new events instead of replacing the previous ones.
    pub fn restart_session(&mut self) {
        self.last_registration_time = None;
    }

    // ------------------------------------------------------------------------
    // The update procedure

    /// Moves `moving` by `delta` (`new = delta * old`), together with everything that is
    /// attached to it but not to `master`.
    ///
    /// If `moving` and `master` were in separate trees, the moved tree is attached below
    /// the root of `master`'s tree. Already connected trees keep their topology.
    ///
    /// Nothing is written unless the whole update can be applied.
    pub fn update_registration(
        &mut self,
        model: &mut SpatialModel,
        delta: Transform,
        moving: ObjectId,
        master: Option<ObjectId>,
        kind: RegistrationKind,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        puffin::profile_function!();

        self.validate_correction(&delta)?;
        for id in std::iter::once(moving).chain(master) {
            if !model.contains_data(id) {
                return Err(RegistrationError::UnknownData(id));
            }
        }

        let forest = FrameForest::from_model(model);
        let target_base = match master {
            Some(master) => forest.oldest_ancestor_not_common_to_ref(moving, master)?,
            None => moving,
        };
        let affected = forest.data_in_subtree(target_base)?;

        let reparenting = match master {
            Some(master) if !forest.are_connected(moving, master)? => Some(Reparenting {
                node: target_base,
                old_parent: forest.parent_of(target_base)?,
                new_parent: forest.oldest_ancestor(master)?,
            }),
            _ => None,
        };

        let updates: Vec<(ObjectId, Transform)> = affected
            .iter()
            .filter_map(|id| {
                let object = model.data(*id)?;
                Some((*id, delta * object.current_transform()))
            })
            .collect();
        if updates.iter().any(|(_, transform)| !transform.is_finite()) {
            return Err(RegistrationError::Degenerate);
        }

        // Validated; from here on nothing fails.
        let timestamp = RegistrationTime::now();
        let replaced_time = self.last_registration_time;

        for (id, transform) in &updates {
            let event = TransformEvent::new(*transform, timestamp, kind.clone())
                .with_provenance(master, Some(moving));
            if let Some(history) = model.history_mut(*id) {
                history.update_transform(replaced_time, event);
            }
            igt_log::info!("Registration applied to {id:?} ({kind})");
        }

        if let Some(reparenting) = &reparenting {
            let event =
                ParentSpaceEvent::new(Some(reparenting.new_parent), timestamp, kind.clone());
            if let Some(history) = model.history_mut(reparenting.node) {
                history.update_parent_space(replaced_time, event);
            }
            igt_log::info!(
                "Attached {:?} to {:?} (was {:?})",
                reparenting.node,
                reparenting.new_parent,
                reparenting.old_parent
            );
        }

        self.last_registration_time = Some(timestamp);

        Ok(RegistrationOutcome {
            timestamp,
            target_base,
            affected: affected.into_iter().collect(),
            reparenting,
        })
    }

    /// Moves the moving data by `delta`, with the fixed data as master frame.
    pub fn apply_image_to_image_registration(
        &mut self,
        model: &mut SpatialModel,
        delta: Transform,
        kind: RegistrationKind,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let fixed = self.fixed.ok_or(RegistrationError::NoFixedData)?;
        let moving = self.moving.ok_or(RegistrationError::NoMovingData)?;
        self.update_registration(model, delta, moving, Some(fixed), kind)
    }

    /// Installs a new patient registration (`rMpr`).
    pub fn apply_patient_registration(
        &mut self,
        model: &mut SpatialModel,
        reference_from_patient_ref: Transform,
        kind: RegistrationKind,
    ) -> Result<RegistrationTime, RegistrationError> {
        self.validate_correction(&reference_from_patient_ref)?;

        let timestamp = RegistrationTime::now();
        let event = TransformEvent::new(reference_from_patient_ref, timestamp, kind.clone())
            .with_provenance(self.fixed, None);
        model
            .patient_registration_mut()
            .update_transform(self.last_registration_time, event);
        self.last_registration_time = Some(timestamp);

        igt_log::info!("Patient registration applied ({kind})");
        Ok(timestamp)
    }

    // ------------------------------------------------------------------------
    // Variants

    /// Fits the patient landmarks onto the landmarks of the fixed image.
    pub fn do_patient_landmark_registration(
        &mut self,
        model: &mut SpatialModel,
    ) -> Result<RegistrationTime, RegistrationError> {
        let fixed = self.selected(model, self.fixed, RegistrationError::NoFixedData)?;
        let (image_points, patient_points) = fixed.landmarks.paired_with(
            &fixed.current_transform(),
            &model.patient_landmarks,
            &Transform::IDENTITY,
        );

        let reference_from_patient_ref =
            self.fit_transform(&patient_points, &image_points, false)?;
        self.apply_patient_registration(
            model,
            reference_from_patient_ref,
            RegistrationKind::PatientLandmark,
        )
    }

    /// Corrects only the translation of the patient registration from the landmarks.
    pub fn do_fast_translation(
        &mut self,
        model: &mut SpatialModel,
    ) -> Result<RegistrationTime, RegistrationError> {
        let fixed = self.selected(model, self.fixed, RegistrationError::NoFixedData)?;
        let reference_from_patient_ref = model.reference_from_patient_ref();
        let (image_points, patient_points) = fixed.landmarks.paired_with(
            &fixed.current_transform(),
            &model.patient_landmarks,
            &reference_from_patient_ref,
        );

        let delta = self.fit_transform(&patient_points, &image_points, true)?;
        self.apply_patient_registration(
            model,
            delta * reference_from_patient_ref,
            RegistrationKind::FastTranslation,
        )
    }

    /// Orients the patient registration after the dominant instrument.
    ///
    /// `tool_from_tool_mapped` (`tMtm`) maps the desired patient axes into the tool frame.
    /// The tool keeps its position in the reference frame; run [`Self::do_fast_translation`]
    /// afterwards to fix the translation from landmarks.
    pub fn apply_patient_orientation(
        &mut self,
        model: &mut SpatialModel,
        tool_from_tool_mapped: Transform,
    ) -> Result<RegistrationTime, RegistrationError> {
        let pose = model
            .instruments()
            .dominant_pose()
            .ok_or(RegistrationError::NoToolPose)?;
        let patient_ref_from_tool = pose.patient_ref_from_tool;

        let rotation = (patient_ref_from_tool * tool_from_tool_mapped)
            .inverse()
            .rotation_part();
        let tool_position = (model.reference_from_patient_ref() * patient_ref_from_tool)
            .transform_point(DVec3::ZERO);
        let translation =
            tool_position - rotation.transform_point(patient_ref_from_tool.translation());

        self.apply_patient_registration(
            model,
            Transform::from_translation(translation) * rotation,
            RegistrationKind::FastOrientation,
        )
    }

    /// Fits the moving data's landmarks onto the fixed data's landmarks.
    pub fn do_image_landmark_registration(
        &mut self,
        model: &mut SpatialModel,
        translation_only: bool,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let fixed = self.selected(model, self.fixed, RegistrationError::NoFixedData)?;
        let moving = self.selected(model, self.moving, RegistrationError::NoMovingData)?;
        let (fixed_points, moving_points) = fixed.landmarks.paired_with(
            &fixed.current_transform(),
            &moving.landmarks,
            &moving.current_transform(),
        );

        let delta = self.fit_transform(&moving_points, &fixed_points, translation_only)?;
        self.apply_image_to_image_registration(model, delta, RegistrationKind::Landmark)
    }

    /// Runs ICP between point sets given in the local frames of the moving and fixed data,
    /// then applies the result. Blocks; see [`Self::spawn_vessel_registration`].
    pub fn do_vessel_registration(
        &mut self,
        model: &mut SpatialModel,
        moving_points: &[DVec3],
        fixed_points: &[DVec3],
    ) -> Result<(RegistrationOutcome, IcpResult), RegistrationError> {
        let mut icp = self.vessel_registration(model, moving_points, fixed_points)?;
        let result = icp.run(&AtomicBool::new(false))?;
        let outcome = self.apply_vessel_result(model, &result)?;
        Ok((outcome, result))
    }

    /// Like [`Self::do_vessel_registration`], but runs ICP on a worker thread.
    ///
    /// Poll the job on the owning thread and hand its result to [`Self::apply_vessel_result`].
    pub fn spawn_vessel_registration(
        &self,
        model: &SpatialModel,
        moving_points: &[DVec3],
        fixed_points: &[DVec3],
    ) -> Result<IcpJob, RegistrationError> {
        self.vessel_registration(model, moving_points, fixed_points)?
            .spawn()
    }

    /// Applies the result of a worker job once it is done.
    ///
    /// Returns `None` while the job is still running, or if it failed (the failure is logged).
    pub fn poll_vessel_job(
        &mut self,
        model: &mut SpatialModel,
        job: &mut IcpJob,
    ) -> Option<RegistrationOutcome> {
        let result = job.try_result()?.ok_or_log_error()?;
        self.apply_vessel_result(model, &result).ok_or_log_error()
    }

    pub fn apply_vessel_result(
        &mut self,
        model: &mut SpatialModel,
        result: &IcpResult,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        if result.iterations == 0 {
            return Err(RegistrationError::NotAligned(result.stop));
        }
        if !result.rms.is_finite() {
            return Err(RegistrationError::Degenerate);
        }
        self.apply_image_to_image_registration(
            model,
            result.fixed_from_moving,
            RegistrationKind::Vessel,
        )
    }

    // ------------------------------------------------------------------------
    // Undo

    /// Rolls every history back to `time` and ends the session.
    pub fn undo_to(&mut self, model: &mut SpatialModel, time: RegistrationTime) {
        for id in model.object_ids() {
            if let Some(history) = model.history_mut(id) {
                history.remove_newer_than(time);
            }
        }
        model.patient_registration_mut().remove_newer_than(time);
        self.restart_session();

        igt_log::info!("Rolled back all registrations newer than {time}");
    }

    // ------------------------------------------------------------------------

    fn vessel_registration(
        &self,
        model: &SpatialModel,
        moving_points: &[DVec3],
        fixed_points: &[DVec3],
    ) -> Result<IcpRegistration, RegistrationError> {
        let fixed = self.selected(model, self.fixed, RegistrationError::NoFixedData)?;
        let moving = self.selected(model, self.moving, RegistrationError::NoMovingData)?;

        let in_reference = |object: &DataObject, points: &[DVec3]| -> Vec<DVec3> {
            let reference_from_data = object.current_transform();
            points
                .iter()
                .map(|point| reference_from_data.transform_point(*point))
                .collect()
        };

        IcpRegistration::new(
            in_reference(moving, moving_points),
            in_reference(fixed, fixed_points),
            self.settings.icp.clone(),
        )
    }

    fn selected<'a>(
        &self,
        model: &'a SpatialModel,
        id: Option<ObjectId>,
        missing: RegistrationError,
    ) -> Result<&'a DataObject, RegistrationError> {
        let id = id.ok_or(missing)?;
        model.data(id).ok_or(RegistrationError::UnknownData(id))
    }

    fn validate_correction(&self, transform: &Transform) -> Result<(), RegistrationError> {
        if transform.is_finite() && transform.is_rigid(self.settings.rigid_tolerance) {
            Ok(())
        } else {
            igt_log::warn!("Rejecting correction that is not a finite rigid transform");
            Err(RegistrationError::Degenerate)
        }
    }

    /// [`register_points`], with the configured minimum point count.
    fn fit_transform(
        &self,
        source: &[DVec3],
        target: &[DVec3],
        translation_only: bool,
    ) -> Result<Transform, RegistrationError> {
        if source.len() != target.len() {
            return Err(RegistrationError::MismatchedPoints {
                source_len: source.len(),
                target_len: target.len(),
            });
        }
        let needed = if translation_only {
            MIN_TRANSLATION_POINTS
        } else {
            self.settings.min_rigid_landmarks()
        };
        if source.len() < needed {
            igt_log::warn!("Need at least {needed} landmark pairs, got {}", source.len());
            return Err(RegistrationError::InsufficientData {
                needed,
                got: source.len(),
            });
        }

        let fit = register_points(source, target, translation_only)
            .ok_or(RegistrationError::Degenerate)?;
        igt_log::debug!(
            "Fitted {} landmark pairs, rms {:.3}",
            source.len(),
            fit.rms_error
        );
        Ok(fit.target_from_source)
    }
}
