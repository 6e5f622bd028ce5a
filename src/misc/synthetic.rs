// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthetic stereo world for tests.
//!
//! Images carry no texture. Instead, every pixel of an image holds a code
//! identifying the frame and the side it was captured from,
//! and the scripted flow tracker and corner detector answer from the known geometry.

use nalgebra::DMatrix;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::camera::{Camera, Intrinsics, StereoRig};
use crate::core::corners::CornerDetector;
use crate::core::feature::Side;
use crate::core::flow::{FlowSeed, FlowTracker};
use crate::core::frame::Frame;
use crate::core::ids::FrameId;
use crate::misc::type_aliases::{Float, Iso3, Point2, Point3, Vec2};

const NB_ROWS: usize = 480;
const NB_COLS: usize = 640;
const RIGHT_CODE: u8 = 128;

/// Known points seen by a stereo rig along a known trajectory.
pub struct SyntheticWorld {
    pub rig: StereoRig,
    /// World coordinates.
    pub points: Vec<Point3>,
    /// True world to rig pose of each frame.
    pub poses: Vec<Iso3>,
    /// In frame `k`, only the first `nb_visible[k]` points can be tracked.
    pub nb_visible: Vec<usize>,
    /// Displacements applied to the left observations of some points in some frames.
    pub perturbations: HashMap<(usize, usize), Vec2>,
}

impl SyntheticWorld {
    /// Grid of 150 points, 40 pixels apart in the first frame,
    /// at depths between 4 and 8, seen by a rig of baseline 0.1.
    pub fn new(poses: Vec<Iso3>, nb_visible: Vec<usize>) -> SyntheticWorld {
        let intrinsics = Intrinsics {
            principal_point: (320.0, 240.0),
            focal: (400.0, 400.0),
            skew: 0.0,
        };
        let rig = StereoRig::from_baseline(intrinsics, 0.1);
        let mut points = Vec::new();
        for j in 0..10 {
            for i in 0..15 {
                let pixel = Point2::new(30.0 + 40.0 * i as Float, 40.0 + 40.0 * j as Float);
                let depth = 4.0 + ((3 * i + j) % 5) as Float;
                points.push(rig.left.pixel_to_camera(&pixel, depth));
            }
        }
        SyntheticWorld {
            rig,
            points,
            poses,
            nb_visible,
            perturbations: HashMap::new(),
        }
    }

    /// The stereo frame captured at index `k`, with an identity pose estimate.
    pub fn frame(&self, k: usize) -> Frame {
        let code = k as u8;
        Frame::new(
            FrameId(k as u64),
            k as f64 * 0.1,
            DMatrix::repeat(NB_ROWS, NB_COLS, code),
            DMatrix::repeat(NB_ROWS, NB_COLS, RIGHT_CODE + code),
        )
    }

    fn decode(image: &DMatrix<u8>) -> (usize, Side) {
        let code = image[(0, 0)];
        if code >= RIGHT_CODE {
            (usize::from(code - RIGHT_CODE), Side::Right)
        } else {
            (usize::from(code), Side::Left)
        }
    }

    fn camera(&self, side: Side) -> &Camera {
        match side {
            Side::Left => &self.rig.left,
            Side::Right => &self.rig.right,
        }
    }

    /// Observed pixel of a point, if it can be tracked in that image.
    pub fn observe(&self, frame: usize, side: Side, point: usize) -> Option<Point2> {
        if point >= self.nb_visible[frame] {
            return None;
        }
        let mut pixel = self
            .camera(side)
            .world_to_pixel(&self.points[point], &self.poses[frame]);
        if side == Side::Left {
            if let Some(offset) = self.perturbations.get(&(frame, point)) {
                pixel += *offset;
            }
        }
        let inside = pixel.x >= 0.0
            && pixel.y >= 0.0
            && pixel.x < (NB_COLS - 1) as Float
            && pixel.y < (NB_ROWS - 1) as Float;
        if inside {
            Some(pixel)
        } else {
            None
        }
    }
}

/// Flow tracker answering with the true observations.
pub struct ScriptedFlow(pub Arc<SyntheticWorld>);

impl FlowTracker for ScriptedFlow {
    fn track(&self, prev: &DMatrix<u8>, next: &DMatrix<u8>, seeds: &[FlowSeed]) -> Vec<Option<Point2>> {
        let world = &self.0;
        let (prev_frame, prev_side) = SyntheticWorld::decode(prev);
        let (next_frame, next_side) = SyntheticWorld::decode(next);
        seeds
            .iter()
            .map(|seed| {
                let point = (0..world.points.len()).find(|&k| {
                    world
                        .observe(prev_frame, prev_side, k)
                        .map_or(false, |p| (p - seed.from).norm() < 0.5)
                })?;
                world.observe(next_frame, next_side, point)
            })
            .collect()
    }
}

/// Corner detector returning the true observations outside of the mask.
pub struct ScriptedDetector(pub Arc<SyntheticWorld>);

impl CornerDetector for ScriptedDetector {
    fn detect(&self, image: &DMatrix<u8>, mask: &DMatrix<bool>) -> Vec<Point2> {
        let world = &self.0;
        let (frame, side) = SyntheticWorld::decode(image);
        (0..world.points.len())
            .filter_map(|k| world.observe(frame, side, k))
            .filter(|p| mask[(p.y.round() as usize, p.x.round() as usize)])
            .collect()
    }
}
