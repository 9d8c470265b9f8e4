//! Iterative closest point registration of two unpaired point clouds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, TryRecvError};
use glam::DVec3;

use igt_types::Transform;

use crate::{MIN_RIGID_POINTS, RegistrationError, register_points};

/// Configuration of an [`IcpRegistration`].
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct IcpSettings {
    /// Share of the closest correspondences kept each iteration. Clamped to `0.1..=1.0`.
    pub trusted_ratio: f64,

    pub max_iterations: usize,

    /// Stop once the RMS distance changes less than this between two iterations.
    pub convergence_threshold: f64,

    /// Wall-clock budget. The best transform so far is returned when it runs out.
    pub max_duration: Duration,

    /// Only the rigid (linear) part is ever computed; non-linear refinement is not supported.
    pub linear_only: bool,
}

impl Default for IcpSettings {
    fn default() -> Self {
        Self {
            trusted_ratio: 0.9,
            max_iterations: 50,
            convergence_threshold: 1e-6,
            max_duration: Duration::from_secs(10),
            linear_only: true,
        }
    }
}

impl IcpSettings {
    #[inline]
    pub fn clamped_trusted_ratio(&self) -> f64 {
        self.trusted_ratio.clamp(0.1, 1.0)
    }
}

/// Why an ICP run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcpStop {
    Converged,
    MaxIterations,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IcpResult {
    /// The accumulated rigid transform moving the moving cloud onto the fixed cloud.
    pub fixed_from_moving: Transform,

    /// RMS distance of the trusted correspondences in the last iteration.
    pub rms: f64,

    pub iterations: usize,
    pub stop: IcpStop,
}

/// State of one ICP run.
///
/// Either drive it step by step with [`Self::step`], run it to completion with [`Self::run`],
/// or hand it to a worker thread with [`Self::spawn`].
#[derive(Clone, Debug)]
pub struct IcpRegistration {
    fixed: Vec<DVec3>,

    /// The moving cloud under the current accumulated transform.
    moving: Vec<DVec3>,

    settings: IcpSettings,
    fixed_from_moving: Transform,
    rms: Option<f64>,
    iterations: usize,
}

impl IcpRegistration {
    pub fn new(
        moving: Vec<DVec3>,
        fixed: Vec<DVec3>,
        settings: IcpSettings,
    ) -> Result<Self, RegistrationError> {
        let got = moving.len().min(fixed.len());
        if got < MIN_RIGID_POINTS {
            return Err(RegistrationError::InsufficientData {
                needed: MIN_RIGID_POINTS,
                got,
            });
        }
        if !moving.iter().chain(&fixed).all(|p| p.is_finite()) {
            return Err(RegistrationError::Degenerate);
        }
        if !settings.linear_only {
            igt_log::warn_once!(
                "Non-linear ICP refinement is not supported, computing the rigid part only"
            );
        }

        Ok(Self {
            fixed,
            moving,
            settings,
            fixed_from_moving: Transform::IDENTITY,
            rms: None,
            iterations: 0,
        })
    }

    /// The transform accumulated so far.
    #[inline]
    pub fn fixed_from_moving(&self) -> Transform {
        self.fixed_from_moving
    }

    /// RMS distance of the last iteration, for progress display.
    #[inline]
    pub fn rms(&self) -> Option<f64> {
        self.rms
    }

    #[inline]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// One iteration: match, trim, solve, accumulate. Returns the RMS distance of the
    /// trusted correspondences before this iteration's correction.
    pub fn step(&mut self) -> Result<f64, RegistrationError> {
        puffin::profile_function!();

        let mut correspondences: Vec<(usize, DVec3, f64)> = self
            .moving
            .iter()
            .enumerate()
            .filter_map(|(index, point)| {
                let (closest, distance_sq) = nearest(&self.fixed, *point)?;
                Some((index, closest, distance_sq))
            })
            .collect();
        correspondences.sort_by(|a, b| a.2.total_cmp(&b.2));

        let trusted = ((correspondences.len() as f64) * self.settings.clamped_trusted_ratio())
            .ceil() as usize;
        correspondences.truncate(trusted.max(MIN_RIGID_POINTS));

        let rms = (correspondences.iter().map(|c| c.2).sum::<f64>()
            / correspondences.len() as f64)
            .sqrt();

        let (source, target): (Vec<DVec3>, Vec<DVec3>) = correspondences
            .iter()
            .map(|(index, closest, _)| (self.moving[*index], *closest))
            .unzip();
        let delta = register_points(&source, &target, false)
            .ok_or(RegistrationError::Degenerate)?
            .target_from_source;

        for point in &mut self.moving {
            *point = delta.transform_point(*point);
        }
        self.fixed_from_moving = delta * self.fixed_from_moving;
        self.rms = Some(rms);
        self.iterations += 1;

        igt_log::trace!("ICP iteration {}: rms {rms:.6}", self.iterations);
        Ok(rms)
    }

    /// Iterates until converged, out of iterations or out of time.
    ///
    /// `cancel` is checked before every iteration.
    pub fn run(&mut self, cancel: &AtomicBool) -> Result<IcpResult, RegistrationError> {
        self.run_with_progress(cancel, |_, _| {})
    }

    /// Like [`Self::run`], calling `on_step(iteration, rms)` after every iteration.
    pub fn run_with_progress(
        &mut self,
        cancel: &AtomicBool,
        mut on_step: impl FnMut(usize, f64),
    ) -> Result<IcpResult, RegistrationError> {
        puffin::profile_function!();

        let start = Instant::now();
        let mut previous_rms = None;

        let stop = loop {
            if cancel.load(Ordering::Relaxed) {
                igt_log::debug!("ICP cancelled after {} iterations", self.iterations);
                return Err(RegistrationError::Cancelled);
            }
            if self.iterations >= self.settings.max_iterations {
                break IcpStop::MaxIterations;
            }
            if start.elapsed() >= self.settings.max_duration {
                break IcpStop::TimedOut;
            }

            let rms = self.step()?;
            on_step(self.iterations, rms);

            let converged = previous_rms.is_some_and(|previous: f64| {
                (previous - rms).abs() < self.settings.convergence_threshold
            });
            if converged {
                break IcpStop::Converged;
            }
            previous_rms = Some(rms);
        };

        let Some(rms) = self.rms else {
            igt_log::warn!("ICP stopped ({stop:?}) before finishing a single iteration");
            return Err(RegistrationError::NotAligned(stop));
        };
        let result = IcpResult {
            fixed_from_moving: self.fixed_from_moving,
            rms,
            iterations: self.iterations,
            stop,
        };
        igt_log::debug!(
            "ICP stopped ({:?}) after {} iterations in {:.2?}, rms {:.6}",
            result.stop,
            result.iterations,
            start.elapsed(),
            result.rms
        );
        Ok(result)
    }

    /// Runs on a named worker thread. The result is picked up with [`IcpJob::try_result`].
    pub fn spawn(mut self) -> Result<IcpJob, RegistrationError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = crossbeam::channel::bounded(1);

        let worker_cancel = cancel.clone();
        std::thread::Builder::new()
            .name("icp_registration".to_owned())
            .spawn(move || {
                let result = self.run(&worker_cancel);
                // The job may have been dropped already.
                result_tx.send(result).ok();
            })
            .map_err(|err| RegistrationError::Worker(err.to_string()))?;

        Ok(IcpJob {
            cancel,
            result_rx,
            finished: false,
        })
    }
}

/// Closest point of `points` to `query`, with the squared distance.
fn nearest(points: &[DVec3], query: DVec3) -> Option<(DVec3, f64)> {
    points
        .iter()
        .map(|point| (*point, point.distance_squared(query)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Handle of an ICP run on a worker thread.
///
/// Dropping the handle cancels the run.
pub struct IcpJob {
    cancel: Arc<AtomicBool>,
    result_rx: Receiver<Result<IcpResult, RegistrationError>>,
    finished: bool,
}

impl IcpJob {
    /// Asks the worker to stop before its next iteration.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Never blocks. Returns the result exactly once.
    pub fn try_result(&mut self) -> Option<Result<IcpResult, RegistrationError>> {
        if self.finished {
            return None;
        }
        match self.result_rx.try_recv() {
            Ok(result) => {
                self.finished = true;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                Some(Err(RegistrationError::Worker(
                    "worker exited without a result".to_owned(),
                )))
            }
        }
    }

    /// Blocks until the worker is done.
    pub fn wait(mut self) -> Result<IcpResult, RegistrationError> {
        self.finished = true;
        self.result_rx.recv().unwrap_or_else(|_| {
            Err(RegistrationError::Worker(
                "worker exited without a result".to_owned(),
            ))
        })
    }
}

impl Drop for IcpJob {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}
