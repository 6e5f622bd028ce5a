// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sparse optical flow: pyramidal Lucas-Kanade tracking of individual pixels.
//!
//! The tracker is used both between consecutive left images
//! and between the left and right images of the same frame.
//! In both cases every point comes with an initial guess of its new position.

use log::trace;
use nalgebra::DMatrix;
use serde::Deserialize;

use crate::core::gradient;
use crate::core::multires;
use crate::misc::type_aliases::{Float, Mat2, Point2, Vec2};

/// A point to track, with a guess of where it is in the next image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSeed {
    /// Position in the previous image.
    pub from: Point2,
    /// Initial guess of the position in the next image.
    pub guess: Point2,
}

impl FlowSeed {
    /// Seed without any motion prior.
    pub fn at(point: Point2) -> FlowSeed {
        FlowSeed {
            from: point,
            guess: point,
        }
    }
}

/// Sparse flow between two images.
pub trait FlowTracker: Send {
    /// Track every seed from `prev` to `next`.
    /// The output has exactly one entry per seed, `None` meaning tracking failed.
    fn track(&self, prev: &DMatrix<u8>, next: &DMatrix<u8>, seeds: &[FlowSeed]) -> Vec<Option<Point2>>;
}

/// Configuration of the pyramidal Lucas-Kanade tracker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Side of the square window around each point, in pixels (odd).
    pub window_size: usize,
    /// Number of pyramid levels, including full resolution.
    pub nb_levels: usize,
    /// Maximum number of iterations per level.
    pub max_iterations: usize,
    /// Convergence threshold on the update norm, in pixels.
    pub epsilon: Float,
    /// Points whose window has a smaller normalized minimum eigenvalue
    /// of the gradient matrix are declared lost.
    /// Intensities are taken in [0, 1] for this test.
    pub min_eigen_threshold: Float,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            window_size: 11,
            nb_levels: 4,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen_threshold: 1e-4,
        }
    }
}

/// Pyramidal Lucas-Kanade tracker.
///
/// At each level, from the coarsest to the full resolution,
/// the template window around the point in the previous image is aligned
/// with the next image by Gauss-Newton iterations on the translation.
/// Template gradients are used, so the 2x2 Hessian is constant per level.
#[derive(Debug, Clone, Default)]
pub struct PyramidalLucasKanade {
    pub config: Config,
}

/// Precomputed data of one pyramid level of the previous image.
struct TemplateLevel {
    image: DMatrix<u8>,
    grad_x: DMatrix<Float>,
    grad_y: DMatrix<Float>,
}

impl PyramidalLucasKanade {
    pub fn new(config: Config) -> PyramidalLucasKanade {
        PyramidalLucasKanade { config }
    }

    fn half_window(&self) -> i32 {
        (self.config.window_size / 2) as i32
    }

    /// Track one point. All positions are given at full resolution.
    fn track_one(
        &self,
        templates: &[TemplateLevel],
        next_pyramid: &[DMatrix<u8>],
        seed: &FlowSeed,
    ) -> Option<Point2> {
        let mut estimate = seed.guess;
        for level in (0..templates.len()).rev() {
            let from = multires::to_level(&seed.from, level);
            let guess = multires::to_level(&estimate, level);
            let tracked = self.align(&templates[level], &next_pyramid[level], from, guess)?;
            estimate = multires::from_level(&tracked, level);
        }
        let (height, width) = next_pyramid[0].shape();
        let inside = estimate.x >= 0.0
            && estimate.y >= 0.0
            && estimate.x <= (width - 1) as Float
            && estimate.y <= (height - 1) as Float;
        if inside && estimate.x.is_finite() && estimate.y.is_finite() {
            Some(estimate)
        } else {
            None
        }
    }

    /// Align the template window centered at `from` with the next image,
    /// starting at `guess`. Everything is expressed at the current level.
    fn align(
        &self,
        template: &TemplateLevel,
        next: &DMatrix<u8>,
        from: Point2,
        guess: Point2,
    ) -> Option<Point2> {
        // Template samples: offset, intensity and gradient.
        let half = self.half_window();
        let mut samples = Vec::with_capacity(self.config.window_size * self.config.window_size);
        let mut hessian = Mat2::zeros();
        for dy in -half..=half {
            for dx in -half..=half {
                let (ox, oy) = (Float::from(dx), Float::from(dy));
                let (x, y) = (from.x + ox, from.y + oy);
                let value = gradient::interpolate(x, y, &template.image);
                let gx = gradient::interpolate(x, y, &template.grad_x);
                let gy = gradient::interpolate(x, y, &template.grad_y);
                if let (Some(value), Some(gx), Some(gy)) = (value, gx, gy) {
                    let g = Vec2::new(gx, gy) / 255.0;
                    hessian += g * g.transpose();
                    samples.push((Vec2::new(ox, oy), value / 255.0, g));
                }
            }
        }
        if samples.is_empty() {
            return None;
        }

        // Reject windows without texture in both directions.
        let (h00, h01, h11) = (hessian[(0, 0)], hessian[(0, 1)], hessian[(1, 1)]);
        let min_eigen = 0.5 * (h00 + h11 - ((h00 - h11).powi(2) + 4.0 * h01 * h01).sqrt());
        if min_eigen / (samples.len() as Float) < self.config.min_eigen_threshold {
            trace!("Untextured window at ({:.1}, {:.1})", from.x, from.y);
            return None;
        }
        let hessian_inv = hessian.try_inverse()?;

        let mut position = guess;
        for _ in 0..self.config.max_iterations {
            let mut b = Vec2::zeros();
            let mut nb_valid = 0;
            for (offset, value, g) in samples.iter() {
                let x = position.x + offset.x;
                let y = position.y + offset.y;
                if let Some(warped) = gradient::interpolate(x, y, next) {
                    b += g * (warped / 255.0 - value);
                    nb_valid += 1;
                }
            }
            if nb_valid == 0 {
                return None;
            }
            let delta = hessian_inv * b;
            position -= delta;
            if delta.norm() < self.config.epsilon {
                break;
            }
        }
        Some(position)
    }
}

impl FlowTracker for PyramidalLucasKanade {
    fn track(&self, prev: &DMatrix<u8>, next: &DMatrix<u8>, seeds: &[FlowSeed]) -> Vec<Option<Point2>> {
        if seeds.is_empty() {
            return Vec::new();
        }
        let nb_levels = self.config.nb_levels.max(1);
        let templates: Vec<TemplateLevel> = multires::mean_pyramid(nb_levels, prev.clone())
            .into_iter()
            .map(|image| {
                let (grad_x, grad_y) = gradient::centered(&image);
                TemplateLevel {
                    image,
                    grad_x,
                    grad_y,
                }
            })
            .collect();
        let mut next_pyramid = multires::mean_pyramid(nb_levels, next.clone());
        // Both pyramids may stop at different depths if image sizes differ.
        let depth = templates.len().min(next_pyramid.len());
        next_pyramid.truncate(depth);
        let templates = &templates[..depth];
        seeds
            .iter()
            .map(|seed| self.track_one(templates, &next_pyramid, seed))
            .collect()
    }
}

// TESTS #############################################################
