// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibrated pinhole cameras of a stereo rig.
//!
//! Poses follow the world-to-camera convention:
//! a frame pose `T_cw` maps world points into the rig (left camera) coordinates,
//! and each camera extrinsic `T_c_rig` maps rig coordinates into that camera.

use nalgebra::{Translation3, UnitQuaternion};

use crate::misc::type_aliases::{Float, Iso3, Mat3, Point2, Point3, Vec3};

/// Intrinsic parameters of a pinhole camera.
#[derive(PartialEq, Debug, Clone)]
pub struct Intrinsics {
    /// Principal point (in pixels).
    pub principal_point: (Float, Float),
    /// Focal length (in pixels) along x and y.
    pub focal: (Float, Float),
    /// Skew coefficient, zero for most calibrations.
    pub skew: Float,
}

impl Intrinsics {
    /// The calibration matrix K.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Mat3 {
        Mat3::new(
            self.focal.0, self.skew,    self.principal_point.0,
            0.0,          self.focal.1, self.principal_point.1,
            0.0,          0.0,          1.0,
        )
    }

    /// Project a 3D point in camera coordinates into homogeneous pixel coordinates.
    /// The third coordinate keeps the depth of the point.
    pub fn project(&self, point: Point3) -> Vec3 {
        Vec3::new(
            self.focal.0 * point[0] + self.skew * point[1] + self.principal_point.0 * point[2],
            self.focal.1 * point[1] + self.principal_point.1 * point[2],
            point[2],
        )
    }

    /// Back project a pixel at the given depth into camera coordinates.
    pub fn back_project(&self, point: Point2, depth: Float) -> Point3 {
        let z = depth;
        let y = (point[1] - self.principal_point.1) * z / self.focal.1;
        let x = ((point[0] - self.principal_point.0) * z - self.skew * y) / self.focal.0;
        Point3::new(x, y, z)
    }
}

/// One camera of the rig: its intrinsics and its pose relative to the rig origin.
#[derive(PartialEq, Debug, Clone)]
pub struct Camera {
    /// Intrinsic parameters.
    pub intrinsics: Intrinsics,
    /// Rig to camera transform.
    pub pose: Iso3,
}

impl Camera {
    /// Create a camera from its calibration.
    pub fn new(intrinsics: Intrinsics, pose: Iso3) -> Camera {
        Camera { intrinsics, pose }
    }

    /// Transform a world point into this camera coordinates,
    /// given the world-to-rig pose `t_c_w` of the frame.
    pub fn world_to_camera(&self, p_w: &Point3, t_c_w: &Iso3) -> Point3 {
        self.pose * (t_c_w * p_w)
    }

    /// Inverse of `world_to_camera`.
    pub fn camera_to_world(&self, p_c: &Point3, t_c_w: &Iso3) -> Point3 {
        t_c_w.inverse() * (self.pose.inverse() * p_c)
    }

    /// Perspective projection of a point in this camera coordinates.
    pub fn camera_to_pixel(&self, p_c: &Point3) -> Point2 {
        let uvz = self.intrinsics.project(*p_c);
        Point2::new(uvz.x / uvz.z, uvz.y / uvz.z)
    }

    /// Back project a pixel into this camera coordinates at the given depth.
    /// With a depth of 1, this is the normalized image ray of the pixel.
    pub fn pixel_to_camera(&self, p_p: &Point2, depth: Float) -> Point3 {
        self.intrinsics.back_project(*p_p, depth)
    }

    /// Project a world point into this camera image.
    pub fn world_to_pixel(&self, p_w: &Point3, t_c_w: &Iso3) -> Point2 {
        self.camera_to_pixel(&self.world_to_camera(p_w, t_c_w))
    }

    /// Back project a pixel at the given depth into world coordinates.
    pub fn pixel_to_world(&self, p_p: &Point2, t_c_w: &Iso3, depth: Float) -> Point3 {
        self.camera_to_world(&self.pixel_to_camera(p_p, depth), t_c_w)
    }
}

/// A calibrated stereo pair. The left camera usually sits at the rig origin.
#[derive(PartialEq, Debug, Clone)]
pub struct StereoRig {
    /// Left camera, reference of the frame poses.
    pub left: Camera,
    /// Right camera.
    pub right: Camera,
}

impl StereoRig {
    /// Rectified rig with both cameras sharing the same intrinsics,
    /// the right camera being `baseline` to the right of the left one.
    pub fn from_baseline(intrinsics: Intrinsics, baseline: Float) -> StereoRig {
        let right_pose = Iso3::from_parts(
            Translation3::new(-baseline, 0.0, 0.0),
            UnitQuaternion::identity(),
        );
        StereoRig {
            left: Camera::new(intrinsics.clone(), Iso3::identity()),
            right: Camera::new(intrinsics, right_pose),
        }
    }

    /// Distance between both camera centers.
    pub fn baseline(&self) -> Float {
        let left_center = self.left.pose.inverse().translation.vector;
        let right_center = self.right.pose.inverse().translation.vector;
        (right_center - left_center).norm()
    }
}

// TESTS #############################################################
