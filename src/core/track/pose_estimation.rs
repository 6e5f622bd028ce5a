// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Robust pose-only estimation with iterative outlier rejection.
//!
//! The pose is optimized a fixed number of rounds.
//! After each round, every edge is classified by its chi² error:
//! outliers are disabled for the next round, inliers (re-)enabled.
//! The Huber loss protects the first rounds against gross outliers,
//! then is dropped to refine with plain least squares on the inlier set.

use log::debug;
use serde::Deserialize;

use crate::core::camera::Camera;
use crate::core::track::lm_optimizer::{LMOptimizerState, PoseProblem};
use crate::math::optimizer::OptimizerState;
use crate::misc::type_aliases::{Float, Iso3, Point2, Point3};

/// One reprojection residual: a fixed world point observed at a fixed pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// World coordinates of the observed landmark.
    pub point: Point3,
    /// Observed pixel.
    pub measurement: Point2,
    /// Disabled edges do not contribute to the optimization.
    pub enabled: bool,
    /// Whether the Huber loss applies to this edge.
    pub robust: bool,
    /// Classification after the last round.
    pub is_outlier: bool,
}

impl Edge {
    pub fn new(point: Point3, measurement: Point2) -> Edge {
        Edge {
            point,
            measurement,
            enabled: true,
            robust: true,
            is_outlier: false,
        }
    }

    /// Squared reprojection error with unit information matrix,
    /// or infinity if the point cannot be projected.
    pub fn chi2(&self, camera: &Camera, pose: &Iso3) -> Float {
        let p_c = camera.world_to_camera(&self.point, pose);
        if p_c.z.abs() < 1e-9 {
            Float::INFINITY
        } else {
            (self.measurement - camera.camera_to_pixel(&p_c)).norm_squared()
        }
    }
}

/// Parameters of the robust estimation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of optimize-then-classify rounds.
    pub rounds: usize,
    /// Levenberg-Marquardt iterations per round.
    pub iterations: usize,
    /// Edges above this squared error are outliers.
    /// Default is the 95% quantile of a chi² distribution with 2 degrees of freedom.
    pub chi2_threshold: Float,
    /// The Huber loss is removed from all edges after this round index.
    pub drop_robust_after_round: usize,
    /// Width of the Huber loss.
    pub huber_delta: Float,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            rounds: 4,
            iterations: 10,
            chi2_threshold: 5.991,
            drop_robust_after_round: 2,
            huber_delta: 1.0,
        }
    }
}

/// Result of a robust estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// Optimized world to rig pose.
    pub pose: Iso3,
    /// Number of edges classified outliers after the last round.
    pub nb_outliers: usize,
    /// Number of edges classified inliers after the last round.
    pub nb_inliers: usize,
}

/// Estimate the pose of a camera from point to pixel correspondences.
///
/// Every round restarts from `initial`. All edges start enabled and robust.
/// When a round fails (too few enabled edges for the solver),
/// the pose of that round stays at `initial` and classification proceeds anyway.
/// On return, `is_outlier` reflects the classification of the last round.
pub fn estimate(camera: &Camera, initial: Iso3, edges: &mut [Edge], config: &Config) -> Estimate {
    for edge in edges.iter_mut() {
        edge.enabled = true;
        edge.robust = true;
        edge.is_outlier = false;
    }
    let mut pose = initial;
    let mut nb_outliers = 0;
    for round in 0..config.rounds {
        pose = {
            let problem = PoseProblem {
                camera,
                edges: &*edges,
                huber_delta: config.huber_delta,
                max_iterations: config.iterations,
            };
            match LMOptimizerState::iterative_solve(&problem, initial) {
                Ok((state, _)) => state.eval_data.model,
                Err(error) => {
                    debug!("Pose optimization round {} failed: {}", round, error);
                    initial
                }
            }
        };

        nb_outliers = 0;
        for edge in edges.iter_mut() {
            let is_outlier = edge.chi2(camera, &pose) > config.chi2_threshold;
            edge.is_outlier = is_outlier;
            edge.enabled = !is_outlier;
            if is_outlier {
                nb_outliers += 1;
            }
            if round == config.drop_robust_after_round {
                edge.robust = false;
            }
        }
    }
    Estimate {
        pose,
        nb_outliers,
        nb_inliers: edges.len() - nb_outliers,
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::camera::Intrinsics;
    use crate::math::se3;
    use crate::misc::type_aliases::Vec2;
    use nalgebra::{Translation3, UnitQuaternion};

    fn camera() -> Camera {
        let intrinsics = Intrinsics {
            principal_point: (320.0, 240.0),
            focal: (450.0, 450.0),
            skew: 0.0,
        };
        Camera::new(intrinsics, Iso3::identity())
    }

    /// 100 points spread in front of the camera, observed without noise.
    fn scene(camera: &Camera, pose: &Iso3) -> Vec<Edge> {
        (0..100)
            .map(|k| {
                let k = k as Float;
                let x = -2.0 + 0.4 * (k % 10.0);
                let y = -1.5 + 0.3 * (k / 10.0).floor();
                let z = 5.0 + 2.0 * (0.7 * k).sin();
                let point = Point3::new(x, y, z);
                Edge::new(point, camera.world_to_pixel(&point, pose))
            })
            .collect()
    }

    fn pose_error(a: &Iso3, b: &Iso3) -> Float {
        se3::log(a * b.inverse()).norm()
    }

    #[test]
    fn noiseless_static_scene_gives_identity() {
        let camera = camera();
        let mut edges = scene(&camera, &Iso3::identity());
        let estimate = estimate(&camera, Iso3::identity(), &mut edges, &Config::default());
        assert!(pose_error(&estimate.pose, &Iso3::identity()) < 1e-9);
        assert_eq!(0, estimate.nb_outliers);
        assert_eq!(100, estimate.nb_inliers);
    }

    #[test]
    fn recovers_a_small_motion() {
        let camera = camera();
        let truth = Iso3::from_parts(
            Translation3::new(0.03, -0.01, 0.08),
            UnitQuaternion::from_euler_angles(0.01, 0.02, -0.01),
        );
        let mut edges = scene(&camera, &truth);
        let estimate = estimate(&camera, Iso3::identity(), &mut edges, &Config::default());
        assert!(pose_error(&estimate.pose, &truth) < 1e-6);
        assert_eq!(0, estimate.nb_outliers);
    }

    #[test]
    fn corrupted_measurements_are_exactly_the_outliers() {
        let camera = camera();
        let mut edges = scene(&camera, &Iso3::identity());
        // Every fifth measurement is moved by 10 pixels in a varying direction.
        for (k, edge) in edges.iter_mut().enumerate().filter(|(k, _)| k % 5 == 0) {
            let angle = k as Float;
            edge.measurement += 10.0 * Vec2::new(angle.cos(), angle.sin());
        }
        let estimate = estimate(&camera, Iso3::identity(), &mut edges, &Config::default());
        assert_eq!(20, estimate.nb_outliers);
        assert_eq!(80, estimate.nb_inliers);
        for (k, edge) in edges.iter().enumerate() {
            assert_eq!(k % 5 == 0, edge.is_outlier, "edge {}", k);
        }
        assert!(pose_error(&estimate.pose, &Iso3::identity()) < 1e-6);
    }

    #[test]
    fn rerunning_a_converged_estimation_keeps_the_inliers() {
        let camera = camera();
        let truth = Iso3::from_parts(
            Translation3::new(0.02, 0.0, 0.05),
            UnitQuaternion::from_euler_angles(0.0, 0.01, 0.0),
        );
        let mut edges = scene(&camera, &truth);
        for (k, edge) in edges.iter_mut().enumerate().filter(|(k, _)| k % 7 == 3) {
            edge.measurement += Vec2::new(6.0, if k % 2 == 0 { 4.0 } else { -4.0 });
        }
        let config = Config::default();
        let first = estimate(&camera, Iso3::identity(), &mut edges, &config);
        let second = estimate(&camera, first.pose, &mut edges, &config);
        assert_eq!(first.nb_inliers, second.nb_inliers);
        assert!(pose_error(&first.pose, &second.pose) < 1e-6);
    }

    #[test]
    fn without_edges_the_initial_pose_is_kept() {
        let camera = camera();
        let initial = Iso3::from_parts(Translation3::new(0.1, 0.0, 0.0), UnitQuaternion::identity());
        let estimate = estimate(&camera, initial, &mut [], &Config::default());
        assert_eq!(initial, estimate.pose);
        assert_eq!(0, estimate.nb_outliers + estimate.nb_inliers);
    }
}
