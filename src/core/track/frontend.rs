// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tracking frontend of the stereo odometry.
//!
//! Every incoming stereo frame goes through a small state machine:
//!
//! * `Initing`: detect corners in the left image, match them in the right image
//!   and triangulate an initial map. The frame becomes the first keyframe.
//! * `TrackingGood` / `TrackingBad`: track the features of the previous frame,
//!   estimate the pose against their landmarks, classify the tracking quality
//!   by the number of inliers, and insert a keyframe when landmarks run low.
//! * `Lost`: reinitialize from the current stereo pair.
//!
//! Frames are processed strictly in order, on the caller thread.
//! Keyframes and landmarks are published to the shared `Map`,
//! then the `Backend` is signalled, asynchronously.

use log::{debug, info, warn};
use nalgebra::DMatrix;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::core::backend::Backend;
use crate::core::camera::{Camera, StereoRig};
use crate::core::corners::{self, CornerDetector, ShiTomasi};
use crate::core::feature::{Feature, FeatureRef, Side};
use crate::core::flow::{self, FlowSeed, FlowTracker, PyramidalLucasKanade};
use crate::core::frame::{Frame, StereoFeature};
use crate::core::ids::KeyFrameId;
use crate::core::landmark::Landmark;
use crate::core::map::{KeyframeUpdate, Map, SharedFrame};
use crate::core::track::pose_estimation::{self, Edge};
use crate::core::triangulation;
use crate::misc::type_aliases::{Float, Iso3, Point2, Point3};

/// Tracking status of the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Initing,
    TrackingGood,
    TrackingBad,
    Lost,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Initing => "INITING",
            Status::TrackingGood => "TRACKING_GOOD",
            Status::TrackingBad => "TRACKING_BAD",
            Status::Lost => "LOST",
        };
        f.write_str(name)
    }
}

/// Error while loading a frontend configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Configuration of the frontend.
///
/// Every field has a default, so a TOML file only needs to list what it changes:
///
/// ```toml
/// num_features_init = 120
///
/// [flow]
/// nb_levels = 3
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum number of stereo correspondences to initialize.
    pub num_features_init: usize,
    /// Tracking is good with strictly more inliers than this.
    pub num_features_tracking: usize,
    /// Tracking is bad (but not lost) with strictly more inliers than this.
    pub num_features_tracking_bad: usize,
    /// A keyframe is inserted when the inliers fall under this count.
    pub num_features_needed_for_keyframe: usize,
    /// Half size in pixels of the square masked around existing features
    /// when detecting new corners.
    pub mask_half_size: usize,
    /// Robust pose estimation.
    pub pose: pose_estimation::Config,
    /// Optical flow.
    pub flow: flow::Config,
    /// Corner detection.
    pub corners: corners::Config,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            num_features_init: 100,
            num_features_tracking: 50,
            num_features_tracking_bad: 20,
            num_features_needed_for_keyframe: 80,
            mask_half_size: 10,
            pose: pose_estimation::Config::default(),
            flow: flow::Config::default(),
            corners: corners::Config::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        Config::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

/// Observer of the frontend, typically a 3D display.
/// Calls happen on the frontend thread and must return quickly.
pub trait Viewer: Send + Sync {
    /// A frame was processed.
    fn add_current_frame(&self, frame: &Frame);
    /// Keyframes or landmarks were added to the map.
    fn update_map(&self);
}

/// What the frontend keeps of the previous frame while tracking the current one.
/// Copied out of the shared frame so that no frame lock is held
/// while the map is accessed.
struct LastFrame {
    pose: Iso3,
    image: Arc<DMatrix<u8>>,
    features: Vec<Feature>,
}

/// The tracking frontend.
pub struct Frontend {
    config: Config,
    status: Status,
    rig: StereoRig,
    map: Arc<Map>,
    backend: Option<Arc<Backend>>,
    viewer: Option<Arc<dyn Viewer>>,
    flow: Box<dyn FlowTracker>,
    detector: Box<dyn CornerDetector>,
    last_frame: Option<SharedFrame>,
    relative_motion: Iso3,
    tracking_inliers: usize,
    next_keyframe_id: u64,
}

impl Frontend {
    /// New frontend using pyramidal Lucas-Kanade and Shi-Tomasi corners.
    pub fn new(config: Config, rig: StereoRig, map: Arc<Map>) -> Frontend {
        let flow = Box::new(PyramidalLucasKanade::new(config.flow.clone()));
        let detector = Box::new(ShiTomasi::new(config.corners.clone()));
        Frontend {
            config,
            status: Status::Initing,
            rig,
            map,
            backend: None,
            viewer: None,
            flow,
            detector,
            last_frame: None,
            relative_motion: Iso3::identity(),
            tracking_inliers: 0,
            next_keyframe_id: 0,
        }
    }

    /// Replace the optical flow tracker.
    pub fn with_flow_tracker(mut self, flow: Box<dyn FlowTracker>) -> Frontend {
        self.flow = flow;
        self
    }

    /// Replace the corner detector.
    pub fn with_corner_detector(mut self, detector: Box<dyn CornerDetector>) -> Frontend {
        self.detector = detector;
        self
    }

    pub fn set_backend(&mut self, backend: Arc<Backend>) {
        self.backend = Some(backend);
    }

    pub fn set_viewer(&mut self, viewer: Arc<dyn Viewer>) {
        self.viewer = Some(viewer);
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn map(&self) -> &Arc<Map> {
        &self.map
    }

    /// Number of inliers of the last pose estimation.
    pub fn tracking_inliers(&self) -> usize {
        self.tracking_inliers
    }

    /// Motion between the two last frames, used as constant velocity prior.
    pub fn relative_motion(&self) -> Iso3 {
        self.relative_motion
    }

    /// The last processed frame.
    pub fn last_frame(&self) -> Option<&SharedFrame> {
        self.last_frame.as_ref()
    }

    /// Process a new stereo frame and return the new status.
    pub fn add_frame(&mut self, frame: Frame) -> Status {
        let mut current = frame;
        let update = match self.status {
            Status::Initing => self.stereo_init(&mut current),
            Status::TrackingGood | Status::TrackingBad => self.track(&mut current),
            Status::Lost => self.reset(&mut current),
        };
        let initialized = self.status != Status::Initing;
        let current = Arc::new(RwLock::new(current));

        // Publish only once the frontend is done with the frame.
        if let Some(update) = update {
            self.map.commit_keyframe(current.clone(), update);
            if let Some(backend) = &self.backend {
                backend.update_map();
            }
            if let Some(viewer) = &self.viewer {
                viewer.update_map();
            }
        }
        if initialized {
            if let Some(viewer) = &self.viewer {
                viewer.add_current_frame(&current.read());
            }
        }
        self.last_frame = Some(current);
        self.status
    }

    // State machine ###########################################################

    /// Try to build an initial map from the stereo pair.
    /// Returns the map changes to commit if the frame was promoted to keyframe.
    fn stereo_init(&mut self, current: &mut Frame) -> Option<KeyframeUpdate> {
        if let Some(last) = &self.last_frame {
            // Reinitializations stay in the world frame of the lost track.
            let pose = last.read().pose();
            current.set_pose(pose);
        }
        self.detect_features(current);
        let nb_in_right = self.find_features_in_right(current);
        if nb_in_right < self.config.num_features_init {
            info!(
                "Not enough stereo correspondences to initialize: {} < {}",
                nb_in_right, self.config.num_features_init
            );
            return None;
        }
        let update = self.build_init_map(current);
        self.status = Status::TrackingGood;
        Some(update)
    }

    /// Track the last frame features and estimate the pose.
    /// Returns the map changes to commit if the frame was promoted to keyframe.
    fn track(&mut self, current: &mut Frame) -> Option<KeyframeUpdate> {
        let last = match self.snapshot_last_frame() {
            Some(last) => last,
            None => {
                warn!("Tracking without previous frame, initializing instead");
                self.status = Status::Initing;
                return self.stereo_init(current);
            }
        };
        current.set_pose(self.relative_motion * last.pose);
        self.track_last_frame(current, &last);
        self.tracking_inliers = self.estimate_current_pose(current);
        self.status = self.classify(self.tracking_inliers);
        debug!("Tracking status: {}", self.status);
        let update = self.insert_keyframe(current);
        self.relative_motion = current.pose() * last.pose.inverse();
        update
    }

    /// Tracking quality from the number of pose inliers.
    fn classify(&self, inliers: usize) -> Status {
        if inliers > self.config.num_features_tracking {
            Status::TrackingGood
        } else if inliers > self.config.num_features_tracking_bad {
            Status::TrackingBad
        } else {
            Status::Lost
        }
    }

    /// Recover from a lost track by initializing again from the current frame.
    fn reset(&mut self, current: &mut Frame) -> Option<KeyframeUpdate> {
        info!("Tracking lost, reinitializing from frame {}", current.id);
        self.relative_motion = Iso3::identity();
        self.tracking_inliers = 0;
        self.status = Status::Initing;
        self.stereo_init(current)
    }

    // Feature correspondences #################################################

    fn snapshot_last_frame(&self) -> Option<LastFrame> {
        let last = self.last_frame.as_ref()?.read();
        Some(LastFrame {
            pose: last.pose(),
            image: last.left_image.clone(),
            features: last.features().iter().map(|pair| pair.left.clone()).collect(),
        })
    }

    /// Track the left features of the last frame into the current left image.
    /// Landmark reprojections through the predicted pose seed the flow.
    /// Features failing to track are dropped, the others keep their landmark link.
    fn track_last_frame(&mut self, current: &mut Frame, last: &LastFrame) -> usize {
        let pose = current.pose();
        let seeds: Vec<FlowSeed> = {
            let data = self.map.read();
            last.features
                .iter()
                .map(|feature| {
                    let reprojected = feature
                        .landmark
                        .and_then(|id| data.landmark_position(id))
                        .and_then(|p_w| project(&self.rig.left, &p_w, &pose));
                    FlowSeed {
                        from: feature.position,
                        guess: reprojected.unwrap_or(feature.position),
                    }
                })
                .collect()
        };
        let tracked = self.flow.track(&last.image, &current.left_image, &seeds);
        let mut nb_good = 0;
        for (feature, position) in last.features.iter().zip(tracked) {
            if let Some(position) = position {
                let new = Feature::linked(current.id, position, Side::Left, feature.landmark);
                current.push_left(new);
                nb_good += 1;
            }
        }
        info!("Find {} in the last image.", nb_good);
        nb_good
    }

    /// Match every left feature without right correspondence in the right image.
    /// Linked features are seeded with their landmark reprojection.
    /// Right features inherit the landmark link of their left feature.
    fn find_features_in_right(&mut self, current: &mut Frame) -> usize {
        let pose = current.pose();
        let indices: Vec<usize> = (0..current.features().len())
            .filter(|&i| current.features()[i].right.is_none())
            .collect();
        let seeds: Vec<FlowSeed> = {
            let data = self.map.read();
            indices
                .iter()
                .map(|&i| {
                    let left = &current.features()[i].left;
                    let reprojected = left
                        .landmark
                        .and_then(|id| data.landmark_position(id))
                        .and_then(|p_w| project(&self.rig.right, &p_w, &pose));
                    FlowSeed {
                        from: left.position,
                        guess: reprojected.unwrap_or(left.position),
                    }
                })
                .collect()
        };
        let left_image = current.left_image.clone();
        let right_image = current.right_image.clone();
        let tracked = self.flow.track(&left_image, &right_image, &seeds);
        let frame_id = current.id;
        let mut nb_good = 0;
        let features = current.features_mut();
        for (&i, position) in indices.iter().zip(tracked) {
            if let Some(position) = position {
                let landmark = features[i].left.landmark;
                features[i].right = Some(Feature::linked(frame_id, position, Side::Right, landmark));
                nb_good += 1;
            }
        }
        info!("Find {} in the right image.", nb_good);
        nb_good
    }

    /// Detect new corners in the left image, away from existing features.
    fn detect_features(&mut self, current: &mut Frame) -> usize {
        let (nb_rows, nb_cols) = current.left_image.shape();
        let mut mask = DMatrix::repeat(nb_rows, nb_cols, true);
        let half = self.config.mask_half_size as Float;
        for pair in current.features() {
            let p = pair.left.position;
            let rows = pixel_range(p.y - half, p.y + half, nb_rows);
            let cols = pixel_range(p.x - half, p.x + half, nb_cols);
            for i in rows {
                for j in cols.clone() {
                    mask[(i, j)] = false;
                }
            }
        }
        let corners = self.detector.detect(&current.left_image, &mask);
        let nb_new = corners.len();
        for corner in corners {
            current.push_left(Feature::new(current.id, corner, Side::Left));
        }
        info!("Detect {} new features", nb_new);
        nb_new
    }

    // Pose ####################################################################

    /// Robust estimation of the current pose against the landmarks of the left features.
    /// Features classified outliers lose their landmark link.
    /// Returns the number of inliers.
    fn estimate_current_pose(&mut self, current: &mut Frame) -> usize {
        let (indices, mut edges): (Vec<usize>, Vec<Edge>) = {
            let data = self.map.read();
            current
                .features()
                .iter()
                .enumerate()
                .filter_map(|(i, pair)| {
                    let p_w = pair.left.landmark.and_then(|id| data.landmark_position(id))?;
                    Some((i, Edge::new(p_w, pair.left.position)))
                })
                .unzip()
        };
        let estimate = pose_estimation::estimate(
            &self.rig.left,
            current.pose(),
            &mut edges,
            &self.config.pose,
        );
        info!(
            "Outlier/Inlier in pose estimating: {}/{}",
            estimate.nb_outliers, estimate.nb_inliers
        );
        current.set_pose(estimate.pose);
        debug!("Current pose: {}", estimate.pose);

        let features = current.features_mut();
        for (&i, edge) in indices.iter().zip(&edges) {
            let left = &mut features[i].left;
            if edge.is_outlier {
                left.landmark = None;
            }
            left.is_outlier = false;
        }
        estimate.nb_inliers
    }

    // Keyframes and landmarks #################################################

    /// Promote the current frame to keyframe if the inliers run low,
    /// then prepare new observations and new landmarks.
    /// Nothing reaches the map before `add_frame` commits the keyframe.
    fn insert_keyframe(&mut self, current: &mut Frame) -> Option<KeyframeUpdate> {
        if self.tracking_inliers >= self.config.num_features_needed_for_keyframe {
            return None;
        }
        let keyframe_id = self.promote(current);
        info!("Set frame {} as keyframe {}", current.id, keyframe_id);
        let mut update = KeyframeUpdate::default();
        self.set_observations_for_keyframe(current, &mut update);
        self.detect_features(current);
        self.find_features_in_right(current);
        self.triangulate_new_points(current, &mut update);
        Some(update)
    }

    fn promote(&mut self, current: &mut Frame) -> KeyFrameId {
        let keyframe_id = KeyFrameId(self.next_keyframe_id);
        self.next_keyframe_id += 1;
        current.set_keyframe(keyframe_id);
        keyframe_id
    }

    /// Record the left features of a new keyframe linked to live landmarks
    /// as observations of these landmarks.
    fn set_observations_for_keyframe(&self, current: &Frame, update: &mut KeyframeUpdate) {
        let data = self.map.read();
        for (index, pair) in current.features().iter().enumerate() {
            if let Some(id) = pair.left.landmark {
                if data.landmark_position(id).is_none() {
                    debug!("Landmark {} is gone, observation skipped", id);
                    continue;
                }
                let feature = FeatureRef {
                    frame_id: current.id,
                    index,
                    side: Side::Left,
                };
                update.observations.push((id, feature));
            }
        }
    }

    /// Triangulate every stereo pair of the initialization frame,
    /// then promote it to keyframe.
    fn build_init_map(&mut self, current: &mut Frame) -> KeyframeUpdate {
        let mut update = KeyframeUpdate::default();
        let nb_landmarks = self.triangulate_pairs(current, &mut update, |_| true);
        self.promote(current);
        info!("Initial map created with {} map points", nb_landmarks);
        update
    }

    /// Triangulate the stereo pairs whose left feature has no live landmark.
    fn triangulate_new_points(
        &mut self,
        current: &mut Frame,
        update: &mut KeyframeUpdate,
    ) -> usize {
        let map = self.map.clone();
        let nb_landmarks = self.triangulate_pairs(current, update, |pair| {
            pair.left
                .landmark
                .map_or(true, |id| map.landmark_position(id).is_none())
        });
        info!("New landmarks: {}", nb_landmarks);
        nb_landmarks
    }

    /// Create a landmark for each selected stereo pair that triangulates in front of the rig,
    /// link both features to it and queue it in `update`.
    fn triangulate_pairs<F>(
        &self,
        current: &mut Frame,
        update: &mut KeyframeUpdate,
        selected: F,
    ) -> usize
    where
        F: Fn(&StereoFeature) -> bool,
    {
        let pose = current.pose();
        let camera_poses = [self.rig.left.pose, self.rig.right.pose];
        let frame_id = current.id;
        let mut nb_landmarks = 0;
        for (index, pair) in current.features_mut().iter_mut().enumerate() {
            if !selected(pair) {
                continue;
            }
            let right = match pair.right.as_mut() {
                Some(right) => right,
                None => continue,
            };
            let rays = [
                self.rig.left.pixel_to_camera(&pair.left.position, 1.0),
                self.rig.right.pixel_to_camera(&right.position, 1.0),
            ];
            let p_rig = match triangulation::triangulate(&camera_poses, &rays) {
                Some(p) if (self.rig.left.pose * p).z > 0.0 => p,
                _ => continue,
            };
            let p_w: Point3 = pose.inverse() * p_rig;
            let mut landmark = Landmark::new(self.map.new_landmark_id(), p_w);
            for &side in &[Side::Left, Side::Right] {
                landmark.add_observation(FeatureRef {
                    frame_id,
                    index,
                    side,
                });
            }
            pair.left.landmark = Some(landmark.id);
            right.landmark = Some(landmark.id);
            update.landmarks.push(landmark);
            nb_landmarks += 1;
        }
        nb_landmarks
    }
}

// Helper ######################################################################

/// Project a world point in a camera, if it lies in front of it.
fn project(camera: &Camera, p_w: &Point3, pose: &Iso3) -> Option<Point2> {
    let p_c = camera.world_to_camera(p_w, pose);
    if p_c.z > 0.0 {
        Some(camera.camera_to_pixel(&p_c))
    } else {
        None
    }
}

/// Pixel indices covered by the interval [from, to], clamped to [0, size).
fn pixel_range(from: Float, to: Float, size: usize) -> std::ops::Range<usize> {
    let start = from.round().max(0.0) as usize;
    let end = (to.round() + 1.0).max(0.0).min(size as Float) as usize;
    start.min(end)..end
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::ids::FrameId;
    use crate::math::se3;
    use crate::misc::synthetic::{ScriptedDetector, ScriptedFlow, SyntheticWorld};
    use crate::misc::type_aliases::Vec2;
    use nalgebra::{Translation3, UnitQuaternion};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn forward(z: Float) -> Iso3 {
        Iso3::from_parts(
            Translation3::new(0.01, 0.0, -z),
            UnitQuaternion::from_euler_angles(0.0, 0.005, 0.0),
        )
    }

    fn frontend(world: &Arc<SyntheticWorld>) -> Frontend {
        Frontend::new(Config::default(), world.rig.clone(), Arc::new(Map::new()))
            .with_flow_tracker(Box::new(ScriptedFlow(world.clone())))
            .with_corner_detector(Box::new(ScriptedDetector(world.clone())))
    }

    fn last_frame(frontend: &Frontend) -> Frame {
        match frontend.last_frame() {
            Some(frame) => frame.read().clone(),
            None => panic!("a frame was processed"),
        }
    }

    fn pose_error(a: &Iso3, b: &Iso3) -> Float {
        se3::log(a * b.inverse()).norm()
    }

    /// Run frames 0 to n-1 and return the statuses.
    fn run(frontend: &mut Frontend, world: &SyntheticWorld) -> Vec<Status> {
        (0..world.poses.len())
            .map(|k| frontend.add_frame(world.frame(k)))
            .collect()
    }

    #[test]
    fn initialization_builds_the_first_keyframe() {
        let world = Arc::new(SyntheticWorld::new(vec![Iso3::identity()], vec![120]));
        let mut frontend = frontend(&world);
        assert_eq!(vec![Status::TrackingGood], run(&mut frontend, &world));
        let map = frontend.map();
        assert_eq!(120, map.nb_landmarks());
        assert_eq!(1, map.nb_keyframes());
        let frame = last_frame(&frontend);
        assert_eq!(Some(KeyFrameId(0)), frame.keyframe_id());
        assert!(map.keyframe(KeyFrameId(0)).is_some());
        for pair in frame.features() {
            let id = pair.left.landmark.expect("every stereo pair is triangulated");
            assert_eq!(Some(id), pair.right.as_ref().and_then(|right| right.landmark));
            let position = map.landmark_position(id).expect("registered landmark");
            let reprojected = world.rig.left.world_to_pixel(&position, &Iso3::identity());
            assert!((reprojected - pair.left.position).norm() < 1e-6);
        }
    }

    #[test]
    fn too_few_stereo_correspondences_keep_initializing() {
        let world = Arc::new(SyntheticWorld::new(vec![Iso3::identity(); 2], vec![90, 120]));
        let mut frontend = frontend(&world);
        let statuses = run(&mut frontend, &world);
        assert_eq!(vec![Status::Initing, Status::TrackingGood], statuses);
        assert_eq!(1, frontend.map().nb_keyframes());
        assert_eq!(Some(KeyFrameId(0)), last_frame(&frontend).keyframe_id());
    }

    #[test]
    fn good_tracking_recovers_the_motion_without_keyframe() {
        let poses = vec![Iso3::identity(), forward(0.05), forward(0.1)];
        let world = Arc::new(SyntheticWorld::new(poses, vec![120, 120, 120]));
        let mut frontend = frontend(&world);
        let statuses = run(&mut frontend, &world);
        assert_eq!(vec![Status::TrackingGood; 3], statuses);
        assert_eq!(120, frontend.tracking_inliers());
        assert_eq!(1, frontend.map().nb_keyframes());
        let frame = last_frame(&frontend);
        assert!(!frame.is_keyframe());
        assert!(pose_error(&frame.pose(), &world.poses[2]) < 1e-6);
        let expected_motion = world.poses[2] * world.poses[1].inverse();
        assert!(pose_error(&frontend.relative_motion(), &expected_motion) < 1e-6);
    }

    #[test]
    fn few_inliers_degrade_tracking_and_insert_a_keyframe() {
        let poses = vec![Iso3::identity(), forward(0.05)];
        let world = Arc::new(SyntheticWorld::new(poses, vec![120, 45]));
        let mut frontend = frontend(&world);
        let statuses = run(&mut frontend, &world);
        assert_eq!(vec![Status::TrackingGood, Status::TrackingBad], statuses);
        assert_eq!(45, frontend.tracking_inliers());
        assert_eq!(2, frontend.map().nb_keyframes());
        let frame = last_frame(&frontend);
        assert_eq!(Some(KeyFrameId(1)), frame.keyframe_id());
        // Every visible point is already tracked: nothing new to triangulate.
        assert_eq!(120, frontend.map().nb_landmarks());
        assert_eq!(45, frame.features().iter().filter(|pair| pair.right.is_some()).count());
    }

    #[test]
    fn very_few_inliers_lose_the_track() {
        let poses = vec![Iso3::identity(), forward(0.05)];
        let world = Arc::new(SyntheticWorld::new(poses, vec![120, 15]));
        let mut frontend = frontend(&world);
        let statuses = run(&mut frontend, &world);
        assert_eq!(vec![Status::TrackingGood, Status::Lost], statuses);
        assert_eq!(15, frontend.tracking_inliers());
    }

    #[test]
    fn lost_track_is_reinitialized_in_the_same_world_frame() {
        let poses = vec![Iso3::identity(), forward(0.05), forward(0.05), forward(0.1)];
        let world = Arc::new(SyntheticWorld::new(poses, vec![120, 15, 120, 120]));
        let mut frontend = frontend(&world);
        let statuses = run(&mut frontend, &world);
        let expected = vec![
            Status::TrackingGood,
            Status::Lost,
            Status::TrackingGood,
            Status::TrackingGood,
        ];
        assert_eq!(expected, statuses);
        let reinit = frontend.map().read().keyframe_of(FrameId(2)).cloned();
        let reinit = reinit.expect("frame 2 is a keyframe");
        assert_eq!(Some(KeyFrameId(2)), reinit.read().keyframe_id());
        assert!(pose_error(&reinit.read().pose(), &world.poses[2]) < 1e-6);
        assert!(pose_error(&last_frame(&frontend).pose(), &world.poses[3]) < 1e-6);
    }

    #[test]
    fn outliers_lose_their_landmark() {
        let poses = vec![Iso3::identity(), forward(0.05)];
        let mut world = SyntheticWorld::new(poses, vec![120, 120]);
        for k in 0..10 {
            world.perturbations.insert((1, 7 * k), Vec2::new(10.0, 0.0));
        }
        let world = Arc::new(world);
        let mut frontend = frontend(&world);
        let statuses = run(&mut frontend, &world);
        assert_eq!(vec![Status::TrackingGood; 2], statuses);
        assert_eq!(110, frontend.tracking_inliers());
        let frame = last_frame(&frontend);
        assert_eq!(120, frame.features().len());
        assert_eq!(110, frame.nb_linked());
        assert!(frame.features().iter().all(|pair| !pair.left.is_outlier));
        assert!(pose_error(&frame.pose(), &world.poses[1]) < 1e-6);
    }

    #[test]
    fn landmark_observations_stay_consistent() {
        let poses = (0..6).map(|k| forward(0.03 * k as Float)).collect();
        let world = Arc::new(SyntheticWorld::new(poses, vec![120, 110, 60, 60, 120, 40]));
        let mut frontend = frontend(&world);
        run(&mut frontend, &world);
        let map = frontend.map();
        assert!(map.nb_keyframes() > 1);
        let ids: Vec<_> = map.read().landmarks.keys().cloned().collect();
        assert!(ids.iter().all(|&id| map.observations_consistent(id)));
        for keyframe in map.read().keyframes.values() {
            let keyframe = keyframe.read();
            for right in keyframe.features().iter().filter_map(|pair| pair.right.as_ref()) {
                assert_eq!(Side::Right, right.side);
                assert_eq!(keyframe.id, right.frame_id);
            }
        }
    }

    #[test]
    fn removed_landmarks_are_triangulated_again() {
        let poses = vec![Iso3::identity(), forward(0.05)];
        let world = Arc::new(SyntheticWorld::new(poses, vec![120, 120]));
        let mut frontend = frontend(&world);
        assert_eq!(Status::TrackingGood, frontend.add_frame(world.frame(0)));
        let map = frontend.map().clone();
        for pair in &last_frame(&frontend).features()[..50] {
            let id = pair.left.landmark.expect("initial pairs are triangulated");
            assert!(map.remove_map_point(id).is_some());
        }
        assert_eq!(70, map.nb_landmarks());
        assert_eq!(Status::TrackingGood, frontend.add_frame(world.frame(1)));
        assert_eq!(70, frontend.tracking_inliers());
        assert_eq!(2, map.nb_keyframes());
        assert_eq!(120, map.nb_landmarks());
        let frame = last_frame(&frontend);
        assert_eq!(Some(KeyFrameId(1)), frame.keyframe_id());
        assert_eq!(120, frame.nb_linked());
        assert!(pose_error(&frame.pose(), &world.poses[1]) < 1e-6);
        let ids: Vec<_> = map.read().landmarks.keys().cloned().collect();
        assert!(ids.iter().all(|&id| map.observations_consistent(id)));
    }

    /// Flow tracker checking the map consistency whenever the frontend calls it.
    struct CheckingFlow {
        flow: ScriptedFlow,
        map: Arc<Map>,
        calls: Arc<AtomicUsize>,
        inconsistent: Arc<AtomicUsize>,
    }

    impl FlowTracker for CheckingFlow {
        fn track(
            &self,
            prev: &DMatrix<u8>,
            next: &DMatrix<u8>,
            seeds: &[FlowSeed],
        ) -> Vec<Option<Point2>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let ids: Vec<_> = self.map.read().landmarks.keys().cloned().collect();
            let nb_bad = ids
                .iter()
                .filter(|&&id| !self.map.observations_consistent(id))
                .count();
            self.inconsistent.fetch_add(nb_bad, Ordering::SeqCst);
            self.flow.track(prev, next, seeds)
        }
    }

    #[test]
    fn map_stays_consistent_while_a_keyframe_is_built() {
        let poses = vec![Iso3::identity(), forward(0.05)];
        let world = Arc::new(SyntheticWorld::new(poses, vec![120, 45]));
        let map = Arc::new(Map::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let inconsistent = Arc::new(AtomicUsize::new(0));
        let flow = CheckingFlow {
            flow: ScriptedFlow(world.clone()),
            map: map.clone(),
            calls: calls.clone(),
            inconsistent: inconsistent.clone(),
        };
        let mut frontend = Frontend::new(Config::default(), world.rig.clone(), map.clone())
            .with_flow_tracker(Box::new(flow))
            .with_corner_detector(Box::new(ScriptedDetector(world.clone())));
        let statuses = run(&mut frontend, &world);
        assert_eq!(vec![Status::TrackingGood, Status::TrackingBad], statuses);
        assert_eq!(2, map.nb_keyframes());
        // Init stereo matching, then tracking and stereo matching of the new keyframe.
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(0, inconsistent.load(Ordering::SeqCst));
        let ids: Vec<_> = map.read().landmarks.keys().cloned().collect();
        assert!(ids.iter().all(|&id| map.observations_consistent(id)));
    }

    struct CountingViewer {
        frames: AtomicUsize,
        map_updates: AtomicUsize,
    }

    impl Viewer for CountingViewer {
        fn add_current_frame(&self, _frame: &Frame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
        fn update_map(&self) {
            self.map_updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn keyframes_notify_viewer_and_backend() {
        let poses = vec![Iso3::identity(), forward(0.05), forward(0.1)];
        let world = Arc::new(SyntheticWorld::new(poses, vec![90, 120, 50]));
        let mut frontend = frontend(&world);
        let viewer = Arc::new(CountingViewer {
            frames: AtomicUsize::new(0),
            map_updates: AtomicUsize::new(0),
        });
        frontend.set_viewer(viewer.clone());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_backend = seen.clone();
        let backend = Arc::new(Backend::spawn(frontend.map().clone(), move |map: &Map| {
            seen_by_backend.store(map.nb_keyframes(), Ordering::SeqCst);
        }));
        frontend.set_backend(backend.clone());
        run(&mut frontend, &world);
        backend.stop();
        // Frame 0 fails to initialize, frame 1 initializes, frame 2 is a keyframe.
        assert_eq!(2, viewer.frames.load(Ordering::SeqCst));
        assert_eq!(2, viewer.map_updates.load(Ordering::SeqCst));
        assert!(backend.nb_passes() >= 1);
        assert_eq!(2, seen.load(Ordering::SeqCst));
    }

    #[test]
    fn partial_configuration_files_keep_defaults() {
        let config = Config::from_toml_str(
            "num_features_init = 120\n[pose]\nchi2_threshold = 9.21\n[flow]\nnb_levels = 3\n",
        )
        .expect("valid configuration");
        assert_eq!(120, config.num_features_init);
        assert_eq!(50, config.num_features_tracking);
        assert_eq!(9.21, config.pose.chi2_threshold);
        assert_eq!(4, config.pose.rounds);
        assert_eq!(3, config.flow.nb_levels);
        assert_eq!(11, config.flow.window_size);
        assert_eq!(200, config.corners.max_corners);
        assert!(Config::from_toml_str("num_features_init = \"many\"").is_err());
    }
}
