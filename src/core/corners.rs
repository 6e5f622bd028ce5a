// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Corner detection ("good features to track").

use itertools::Itertools;
use log::warn;
use nalgebra::DMatrix;
use serde::Deserialize;

use crate::core::gradient;
use crate::misc::type_aliases::{Float, Point2};

/// Detection of well textured points in an image.
pub trait CornerDetector: Send {
    /// Detect corners in `image`, only where `mask` is true.
    /// The mask has the shape of the image.
    fn detect(&self, image: &DMatrix<u8>, mask: &DMatrix<bool>) -> Vec<Point2>;
}

/// Configuration of the Shi-Tomasi detector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of corners returned.
    pub max_corners: usize,
    /// Corners weaker than this fraction of the strongest one are rejected.
    pub quality_level: Float,
    /// Minimum distance in pixels between two returned corners.
    pub min_distance: Float,
    /// Side of the neighborhood summing gradient products (odd).
    pub block_size: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_corners: 200,
            quality_level: 0.01,
            min_distance: 20.0,
            block_size: 3,
        }
    }
}

/// Shi-Tomasi detector: the response of a pixel is the smallest eigenvalue
/// of the gradient structure tensor summed over a small block.
/// Corners are local maxima of the response, strongest first.
#[derive(Debug, Clone, Default)]
pub struct ShiTomasi {
    pub config: Config,
}

impl ShiTomasi {
    pub fn new(config: Config) -> ShiTomasi {
        ShiTomasi { config }
    }

    /// Minimum eigenvalue of the structure tensor at every pixel.
    /// Pixels too close to the border to have a full block get 0.
    pub fn response(&self, image: &DMatrix<u8>) -> DMatrix<Float> {
        let (grad_x, grad_y) = gradient::centered(image);
        let (nb_rows, nb_cols) = image.shape();
        let r = (self.config.block_size / 2).max(1);
        DMatrix::from_fn(nb_rows, nb_cols, |i, j| {
            if i < r + 1 || j < r + 1 || i + r + 1 >= nb_rows || j + r + 1 >= nb_cols {
                return 0.0;
            }
            let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
            for ii in (i - r)..=(i + r) {
                for jj in (j - r)..=(j + r) {
                    let gx = grad_x[(ii, jj)];
                    let gy = grad_y[(ii, jj)];
                    a += gx * gx;
                    b += gx * gy;
                    c += gy * gy;
                }
            }
            0.5 * (a + c - ((a - c).powi(2) + 4.0 * b * b).sqrt())
        })
    }
}

impl CornerDetector for ShiTomasi {
    fn detect(&self, image: &DMatrix<u8>, mask: &DMatrix<bool>) -> Vec<Point2> {
        let use_mask = mask.shape() == image.shape();
        if !use_mask {
            warn!(
                "Detection mask of shape {:?} ignored for an image of shape {:?}",
                mask.shape(),
                image.shape()
            );
        }
        let response = self.response(image);
        let max_response = response.iter().cloned().fold(0.0, Float::max);
        if max_response <= 0.0 {
            return Vec::new();
        }
        let threshold = self.config.quality_level * max_response;
        let (nb_rows, nb_cols) = response.shape();

        // Local maxima above the threshold, inside the mask.
        let is_local_max = |i: usize, j: usize| {
            let v = response[(i, j)];
            (i.saturating_sub(1)..(i + 2).min(nb_rows))
                .cartesian_product(j.saturating_sub(1)..(j + 2).min(nb_cols))
                .all(|(ii, jj)| response[(ii, jj)] <= v)
        };
        let candidates = (0..nb_rows)
            .cartesian_product(0..nb_cols)
            .filter(|&(i, j)| response[(i, j)] > threshold)
            .filter(|&(i, j)| !use_mask || mask[(i, j)])
            .filter(|&(i, j)| is_local_max(i, j))
            .sorted_by(|&a, &b| {
                response[b]
                    .partial_cmp(&response[a])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        // Greedy selection enforcing the minimum distance.
        let min_sq_dist = self.config.min_distance * self.config.min_distance;
        let mut corners: Vec<Point2> = Vec::new();
        for (i, j) in candidates {
            if corners.len() >= self.config.max_corners {
                break;
            }
            let p = Point2::new(j as Float, i as Float);
            if corners.iter().all(|c| (c - p).norm_squared() >= min_sq_dist) {
                corners.push(p);
            }
        }
        corners
    }
}

// TESTS #############################################################
