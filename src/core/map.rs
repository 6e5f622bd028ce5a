// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared registry of keyframes and landmarks.
//!
//! The frontend inserts, the backend rewrites, viewers read, all concurrently.
//! Every access goes through the lock of the table, scoped to one operation.
//! Whenever a keyframe lock is also needed, the table lock is taken first.

use log::debug;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::feature::FeatureRef;
use crate::core::frame::Frame;
use crate::core::ids::{FrameId, KeyFrameId, LandmarkId};
use crate::core::landmark::Landmark;
use crate::misc::type_aliases::Point3;

/// A frame shared between the frontend, the map and the backend.
pub type SharedFrame = Arc<RwLock<Frame>>;

/// Map changes built along with a keyframe, committed together with it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct KeyframeUpdate {
    /// New landmarks, with their observations in the keyframe.
    pub landmarks: Vec<Landmark>,
    /// New observations of existing landmarks by features of the keyframe.
    pub observations: Vec<(LandmarkId, FeatureRef)>,
}

/// Content of the map, accessed through `Map::read` or `Map::write`.
#[derive(Default)]
pub struct MapData {
    /// All keyframes, by keyframe id.
    pub keyframes: BTreeMap<KeyFrameId, SharedFrame>,
    /// All landmarks, by id.
    pub landmarks: HashMap<LandmarkId, Landmark>,
    frames_index: HashMap<FrameId, KeyFrameId>,
}

impl MapData {
    /// Position of a landmark, or `None` if it does not exist (anymore).
    pub fn landmark_position(&self, id: LandmarkId) -> Option<Point3> {
        self.landmarks.get(&id).map(|landmark| landmark.position)
    }

    /// Register a keyframe with its new landmarks and observations.
    /// Observations of landmarks that no longer exist are skipped,
    /// the number of skipped observations is returned.
    pub fn commit_keyframe(
        &mut self,
        frame_id: FrameId,
        keyframe_id: KeyFrameId,
        frame: SharedFrame,
        update: KeyframeUpdate,
    ) -> usize {
        for landmark in update.landmarks {
            self.landmarks.insert(landmark.id, landmark);
        }
        let mut nb_skipped = 0;
        for (id, feature) in update.observations {
            match self.landmarks.get_mut(&id) {
                Some(landmark) => landmark.add_observation(feature),
                None => nb_skipped += 1,
            }
        }
        self.frames_index.insert(frame_id, keyframe_id);
        self.keyframes.insert(keyframe_id, frame);
        nb_skipped
    }

    /// Keyframe built from the given frame, if that frame was promoted and registered.
    pub fn keyframe_of(&self, frame_id: FrameId) -> Option<&SharedFrame> {
        self.frames_index
            .get(&frame_id)
            .and_then(|kf_id| self.keyframes.get(kf_id))
    }
}

/// The map: a lock-guarded table of keyframes and landmarks.
#[derive(Default)]
pub struct Map {
    data: RwLock<MapData>,
    next_landmark_id: AtomicU64,
}

impl Map {
    pub fn new() -> Map {
        Map::default()
    }

    /// Shared access for the duration of the returned guard.
    pub fn read(&self) -> RwLockReadGuard<'_, MapData> {
        self.data.read()
    }

    /// Exclusive access for the duration of the returned guard.
    /// Everything rewritten under one guard becomes visible at once.
    pub fn write(&self) -> RwLockWriteGuard<'_, MapData> {
        self.data.write()
    }

    /// Reserve a fresh landmark id.
    pub fn new_landmark_id(&self) -> LandmarkId {
        LandmarkId(self.next_landmark_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a keyframe. The frame must already carry its keyframe id.
    /// Returns false if the frame is not a keyframe.
    pub fn insert_keyframe(&self, frame: SharedFrame) -> bool {
        self.commit_keyframe(frame, KeyframeUpdate::default())
    }

    /// Register a keyframe together with the landmarks and observations built for it,
    /// under a single write guard: readers see all of it or none of it.
    /// Returns false, and changes nothing, if the frame is not a keyframe.
    pub fn commit_keyframe(&self, frame: SharedFrame, update: KeyframeUpdate) -> bool {
        let (frame_id, keyframe_id) = {
            let f = frame.read();
            (f.id, f.keyframe_id())
        };
        match keyframe_id {
            Some(kf_id) => {
                let nb_skipped = self
                    .data
                    .write()
                    .commit_keyframe(frame_id, kf_id, frame, update);
                if nb_skipped > 0 {
                    debug!("{} observations of removed landmarks skipped", nb_skipped);
                }
                true
            }
            None => false,
        }
    }

    /// Register a landmark, replacing any previous one with the same id.
    pub fn insert_map_point(&self, landmark: Landmark) {
        self.data.write().landmarks.insert(landmark.id, landmark);
    }

    /// Remove a landmark. Features still pointing to it become stale.
    pub fn remove_map_point(&self, id: LandmarkId) -> Option<Landmark> {
        self.data.write().landmarks.remove(&id)
    }

    /// Position of a landmark, or `None` if it does not exist (anymore).
    pub fn landmark_position(&self, id: LandmarkId) -> Option<Point3> {
        self.data.read().landmark_position(id)
    }

    /// Copy of a landmark.
    pub fn landmark(&self, id: LandmarkId) -> Option<Landmark> {
        self.data.read().landmarks.get(&id).cloned()
    }

    /// Record an observation of a landmark.
    /// Returns false if the landmark does not exist anymore.
    pub fn add_observation(&self, id: LandmarkId, feature: FeatureRef) -> bool {
        match self.data.write().landmarks.get_mut(&id) {
            Some(landmark) => {
                landmark.add_observation(feature);
                true
            }
            None => false,
        }
    }

    pub fn keyframe(&self, id: KeyFrameId) -> Option<SharedFrame> {
        self.data.read().keyframes.get(&id).cloned()
    }

    pub fn nb_keyframes(&self) -> usize {
        self.data.read().keyframes.len()
    }

    pub fn nb_landmarks(&self) -> usize {
        self.data.read().landmarks.len()
    }

    /// Check that every observation of a landmark resolves,
    /// through a registered keyframe, to a feature linked back to that landmark.
    pub fn observations_consistent(&self, id: LandmarkId) -> bool {
        let data = self.data.read();
        let landmark = match data.landmarks.get(&id) {
            Some(landmark) => landmark,
            None => return false,
        };
        landmark.observations().iter().all(|obs| {
            data.keyframe_of(obs.frame_id).map_or(false, |frame| {
                frame
                    .read()
                    .feature(obs)
                    .map_or(false, |feature| feature.landmark == Some(id))
            })
        })
    }
}

// TESTS #############################################################
