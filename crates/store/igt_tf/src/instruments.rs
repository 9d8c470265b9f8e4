//! Tracked instruments and the handoff of their live poses from the acquisition thread.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering::Relaxed},
};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};
use glam::DVec3;
use nohash_hasher::IntMap;

use igt_types::{RegistrationTime, ToolId, Transform};

/// One sample of an instrument's pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolPose {
    /// Tool frame to patient-reference frame (`prMt`).
    pub patient_ref_from_tool: Transform,
    pub timestamp: RegistrationTime,
}

/// Creates the handoff for one instrument's poses.
///
/// Holds at most one pose: a new sample replaces the one nobody picked up yet.
pub fn pose_channel() -> (PoseSender, PoseReceiver) {
    let (tx, rx) = crossbeam::channel::bounded(1);
    let receiver_alive = Arc::new(AtomicBool::new(true));
    (
        PoseSender {
            tx,
            unclaimed: rx.clone(),
            receiver_alive: receiver_alive.clone(),
        },
        PoseReceiver {
            rx,
            connected: AtomicBool::new(true),
            receiver_alive,
        },
    )
}

/// The acquisition side of [`pose_channel`].
///
/// Sending never blocks.
#[derive(Clone)]
pub struct PoseSender {
    tx: Sender<ToolPose>,

    /// Used to evict a pose the owning thread has not taken yet.
    unclaimed: Receiver<ToolPose>,
    receiver_alive: Arc<AtomicBool>,
}

impl PoseSender {
    /// Returns `false` once the receiving side is gone.
    pub fn send(&self, mut pose: ToolPose) -> bool {
        if !self.receiver_alive.load(Relaxed) {
            return false;
        }
        loop {
            match self.tx.try_send(pose) {
                Ok(()) => return true,
                Err(TrySendError::Full(rejected)) => {
                    // Either we evict the old pose or the owning thread just took it.
                    self.unclaimed.try_recv().ok();
                    pose = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}

/// The owning-thread side of [`pose_channel`].
pub struct PoseReceiver {
    rx: Receiver<ToolPose>,
    connected: AtomicBool,
    receiver_alive: Arc<AtomicBool>,
}

impl PoseReceiver {
    /// Takes the newest pose, if one arrived since the last call.
    pub fn newest(&self) -> Option<ToolPose> {
        let mut newest = None;
        loop {
            match self.rx.try_recv() {
                Ok(pose) => newest = Some(pose),
                Err(TryRecvError::Empty) => return newest,
                Err(TryRecvError::Disconnected) => {
                    self.connected.store(false, Relaxed);
                    return newest;
                }
            }
        }
    }

    /// Are we still connected?
    ///
    /// Once false, no new poses will ever arrive.
    /// This is only updated by [`Self::newest`].
    pub fn is_connected(&self) -> bool {
        self.connected.load(Relaxed)
    }
}

impl Drop for PoseReceiver {
    fn drop(&mut self) {
        self.receiver_alive.store(false, Relaxed);
    }
}

impl std::fmt::Debug for PoseReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseReceiver")
            .field("queued", &self.rx.len())
            .finish()
    }
}

/// A tracked instrument as seen by the registration engine.
#[derive(Debug)]
pub struct TrackedInstrument {
    id: ToolId,
    pub name: String,

    /// Sensor frame to tool frame (`tMs`).
    pub tool_from_sensor: Transform,

    /// Distance of the virtual tip along the tool's z axis.
    pub offset: f64,

    pose: Option<ToolPose>,
    feed: Option<PoseReceiver>,
}

impl TrackedInstrument {
    pub fn new(id: ToolId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tool_from_sensor: Transform::IDENTITY,
            offset: 0.0,
            pose: None,
            feed: None,
        }
    }

    /// Attaches the receiving end of a [`pose_channel`].
    pub fn with_feed(mut self, feed: PoseReceiver) -> Self {
        self.feed = Some(feed);
        self
    }

    #[inline]
    pub fn with_calibration(mut self, tool_from_sensor: Transform) -> Self {
        self.tool_from_sensor = tool_from_sensor;
        self
    }

    #[inline]
    pub fn id(&self) -> ToolId {
        self.id
    }

    /// Last known pose, if the instrument was ever seen.
    #[inline]
    pub fn pose(&self) -> Option<ToolPose> {
        self.pose
    }

    /// The tool frame moved along the tool axis by [`Self::offset`] (`tMto`).
    pub fn tool_from_offset(&self) -> Transform {
        Transform::from_translation(DVec3::new(0.0, 0.0, self.offset))
    }

    /// Takes the newest pose from the feed. Returns whether the pose advanced.
    pub fn poll(&mut self) -> bool {
        let Some(pose) = self.feed.as_ref().and_then(PoseReceiver::newest) else {
            return false;
        };
        self.set_pose(pose)
    }

    /// Sets the pose directly. Older samples than the current one are ignored.
    pub fn set_pose(&mut self, pose: ToolPose) -> bool {
        if self.pose.is_some_and(|current| pose.timestamp < current.timestamp) {
            igt_log::debug!("Ignoring stale pose of {:?} at {}", self.id, pose.timestamp);
            return false;
        }
        let changed = self.pose != Some(pose);
        self.pose = Some(pose);
        changed
    }
}

/// All known instruments plus which one is dominant.
#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    instruments: IntMap<ToolId, TrackedInstrument>,
    dominant: Option<ToolId>,
}

impl InstrumentRegistry {
    pub fn get(&self, id: ToolId) -> Option<&TrackedInstrument> {
        self.instruments.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ToolId) -> Option<&mut TrackedInstrument> {
        self.instruments.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedInstrument> + '_ {
        self.instruments.values()
    }

    #[inline]
    pub fn dominant_id(&self) -> Option<ToolId> {
        self.dominant
    }

    pub fn dominant(&self) -> Option<&TrackedInstrument> {
        self.dominant.and_then(|id| self.get(id))
    }

    /// `getDominantInstrumentPose`: the live pose of the dominant instrument.
    pub fn dominant_pose(&self) -> Option<ToolPose> {
        self.dominant().and_then(TrackedInstrument::pose)
    }

    /// Returns the replaced instrument with the same id, if any.
    pub(crate) fn insert(&mut self, instrument: TrackedInstrument) -> Option<TrackedInstrument> {
        self.instruments.insert(instrument.id(), instrument)
    }

    pub(crate) fn remove(&mut self, id: ToolId) -> Option<TrackedInstrument> {
        if self.dominant == Some(id) {
            self.dominant = None;
        }
        self.instruments.remove(&id)
    }

    /// Returns whether the dominant instrument changed.
    pub(crate) fn set_dominant(&mut self, id: Option<ToolId>) -> bool {
        let changed = self.dominant != id;
        self.dominant = id;
        changed
    }

    /// Polls every feed. Returns the instruments whose pose advanced.
    pub(crate) fn poll_all(&mut self) -> Vec<ToolId> {
        let mut advanced: Vec<ToolId> = self
            .instruments
            .values_mut()
            .filter_map(|instrument| instrument.poll().then_some(instrument.id()))
            .collect();
        advanced.sort();
        advanced
    }
}
