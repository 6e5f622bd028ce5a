// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Levenberg-Marquardt implementation of the `OptimizerState` trait
//! for the reprojection error of a single pose against fixed 3D points.

use nalgebra::{Matrix2x3, UnitQuaternion};
use thiserror::Error;

use crate::core::camera::Camera;
use crate::core::track::pose_estimation::Edge;
use crate::math::optimizer::{Continue, OptimizerState};
use crate::math::se3;
use crate::misc::type_aliases::{Float, Iso3, Mat2x6, Mat6, Point3, Vec2, Vec6};

/// Failure of a Levenberg-Marquardt step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The (damped) hessian could not be factorized,
    /// typically because too few edges constrain the pose.
    #[error("hessian is not positive definite ({nb_edges} enabled edges)")]
    NotPositiveDefinite { nb_edges: usize },
}

/// State of the Levenberg-Marquardt optimizer.
pub struct LMOptimizerState {
    /// Levenberg-Marquardt hessian diagonal coefficient.
    pub lm_coef: Float,
    /// Iterations budget, copied from the problem.
    pub max_iterations: usize,
    /// Data resulting of a successful model evaluation.
    pub eval_data: EvalData,
}

/// Either a successfully constructed `EvalData`
/// or an error containing the energy of a given model.
///
/// The error is returned when the new computed energy
/// is higher than the previous iteration energy.
pub type EvalState = Result<EvalData, Float>;

/// Data resulting of a successful model evaluation.
pub struct EvalData {
    /// The hessian matrix of the system.
    pub hessian: Mat6,
    /// The gradient of the system.
    pub gradient: Vec6,
    /// Energy associated with the current model.
    pub energy: Float,
    /// Estimated world to rig pose at the current state of iterations.
    pub model: Iso3,
    /// Number of edges contributing to the energy.
    pub nb_edges: usize,
}

/// Description of one pose optimization problem.
pub struct PoseProblem<'a> {
    /// Camera in which measurements are expressed.
    pub camera: &'a Camera,
    /// Point to pixel correspondences. Only enabled edges are used.
    pub edges: &'a [Edge],
    /// Huber kernel width on the squared error, applied to robust edges.
    pub huber_delta: Float,
    /// Iterations budget.
    pub max_iterations: usize,
}

impl<'a> PoseProblem<'a> {
    /// Reprojection error of one edge, `measurement - projection`,
    /// or `None` if the point falls on the camera plane.
    pub fn error(&self, edge: &Edge, model: &Iso3) -> Option<Vec2> {
        let p_c = self.camera.world_to_camera(&edge.point, model);
        if p_c.z.abs() < 1e-9 {
            None
        } else {
            Some(edge.measurement - self.camera.camera_to_pixel(&p_c))
        }
    }

    /// Robust weight and robust energy of a squared error.
    fn robustify(&self, edge: &Edge, chi2: Float) -> (Float, Float) {
        let delta = self.huber_delta;
        if !edge.robust || chi2 <= delta * delta {
            (1.0, chi2)
        } else {
            let e = chi2.sqrt();
            (delta / e, 2.0 * delta * e - delta * delta)
        }
    }

    /// Jacobian of the error with respect to a left perturbation of the pose.
    fn jacobian(&self, edge: &Edge, model: &Iso3) -> Mat2x6 {
        let p_r: Point3 = model * edge.point;
        let p_c = self.camera.pose * p_r;
        let intrinsics = &self.camera.intrinsics;
        let (fx, fy) = intrinsics.focal;
        let s = intrinsics.skew;
        let z_inv = 1.0 / p_c.z;
        let z_inv_2 = z_inv * z_inv;
        #[rustfmt::skip]
        let projection = Matrix2x3::new(
            fx * z_inv, s * z_inv,  -(fx * p_c.x + s * p_c.y) * z_inv_2,
            0.0,        fy * z_inv, -fy * p_c.y * z_inv_2,
        );
        let rotation = self.camera.pose.rotation.to_rotation_matrix();
        -(projection * rotation.matrix() * se3::action_jacobian(&p_r))
    }

    /// Robust energy of a model.
    fn energy(&self, model: &Iso3) -> Float {
        self.edges
            .iter()
            .filter(|edge| edge.enabled)
            .filter_map(|edge| {
                self.error(edge, model)
                    .map(|e| self.robustify(edge, e.norm_squared()).1)
            })
            .sum()
    }

    /// Gauss-Newton normal equations around a model.
    fn eval_data(&self, model: Iso3, energy: Float) -> EvalData {
        let mut hessian = Mat6::zeros();
        let mut gradient = Vec6::zeros();
        let mut nb_edges = 0;
        for edge in self.edges.iter().filter(|edge| edge.enabled) {
            if let Some(e) = self.error(edge, &model) {
                let (weight, _) = self.robustify(edge, e.norm_squared());
                let jac = self.jacobian(edge, &model);
                hessian += weight * jac.transpose() * jac;
                gradient += weight * jac.transpose() * e;
                nb_edges += 1;
            }
        }
        EvalData {
            hessian,
            gradient,
            energy,
            model,
            nb_edges,
        }
    }
}

impl<'a> OptimizerState<PoseProblem<'a>, EvalState, Iso3, SolverError> for LMOptimizerState {
    /// Initialize the optimizer state.
    fn init(obs: &PoseProblem<'a>, model: Iso3) -> Self {
        Self {
            lm_coef: 1e-3,
            max_iterations: obs.max_iterations,
            eval_data: obs.eval_data(model, obs.energy(&model)),
        }
    }

    /// Compute the step using Levenberg-Marquardt,
    /// applied as a left increment of the current pose.
    /// May return an error at the Cholesky decomposition of the hessian.
    fn step(&self) -> Result<Iso3, SolverError> {
        let mut hessian = self.eval_data.hessian;
        for i in 0..6 {
            hessian[(i, i)] *= 1.0 + self.lm_coef;
        }
        let cholesky = hessian
            .cholesky()
            .ok_or(SolverError::NotPositiveDefinite {
                nb_edges: self.eval_data.nb_edges,
            })?;
        let delta = -cholesky.solve(&self.eval_data.gradient);
        Ok(renormalize(se3::exp(delta) * self.eval_data.model))
    }

    /// Compute the energy of the new model.
    /// Then, evaluate the new hessian and gradient if the energy has decreased.
    fn eval(&self, obs: &PoseProblem<'a>, model: Iso3) -> EvalState {
        let energy = obs.energy(&model);
        if energy > self.eval_data.energy || !energy.is_finite() {
            Err(energy)
        } else {
            Ok(obs.eval_data(model, energy))
        }
    }

    /// Stop after the iterations budget,
    /// or if the energy does not decrease anymore.
    ///
    /// Also update the Levenberg-Marquardt coefficient
    /// depending on if the energy increased or decreased.
    fn stop_criterion(self, nb_iter: usize, eval_state: EvalState) -> (Self, Continue) {
        let out_of_budget = nb_iter >= self.max_iterations;
        match (eval_state, out_of_budget) {
            (Err(_), true) => (self, Continue::Stop),
            (Ok(eval_data), true) => {
                let kept_state = Self { eval_data, ..self };
                (kept_state, Continue::Stop)
            }
            (Err(_energy), false) => {
                let mut kept_state = self;
                kept_state.lm_coef *= 10.0;
                (kept_state, Continue::Forward)
            }
            (Ok(eval_data), false) => {
                let d_energy = self.eval_data.energy - eval_data.energy;
                let still_decreasing = d_energy > 1e-10 * self.eval_data.energy;
                let continuation = if eval_data.energy > 0.0 && still_decreasing {
                    Continue::Forward
                } else {
                    Continue::Stop
                };
                let kept_state = Self {
                    lm_coef: 0.1 * self.lm_coef,
                    max_iterations: self.max_iterations,
                    eval_data,
                };
                (kept_state, continuation)
            }
        }
    }
}

// Helper ######################################################################

/// First order Taylor approximation for renormalization of rotation part of motion.
fn renormalize(motion: Iso3) -> Iso3 {
    let mut motion = motion;
    motion.rotation = renormalize_unit_quaternion(motion.rotation);
    motion
}

/// First order Taylor approximation for unit quaternion re-normalization.
fn renormalize_unit_quaternion(uq: UnitQuaternion<Float>) -> UnitQuaternion<Float> {
    let q = uq.into_inner();
    let sq_norm = q.norm_squared();
    UnitQuaternion::new_unchecked(0.5 * (3.0 - sq_norm) * q)
}

// TESTS #############################################################
