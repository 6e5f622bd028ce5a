// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multi-resolution image pyramids.
//!
//! Level `n + 1` has half the resolution of level `n`.
//! A pixel center at `x` at level `n + 1` sits at `2 * x + 0.5` at level `n`.

use nalgebra::{DMatrix, Scalar};

use crate::misc::type_aliases::{Float, Point2};

/// Recursively generate a pyramid of matrices where each level
/// is half the previous resolution, computed with the mean of each 2x2 block.
pub fn mean_pyramid(max_levels: usize, mat: DMatrix<u8>) -> Vec<DMatrix<u8>> {
    limited_sequence(max_levels, mat, |m| {
        halve(m, |a, b, c, d| {
            let a = u16::from(a);
            let b = u16::from(b);
            let c = u16::from(c);
            let d = u16::from(d);
            // The mean of four u8 always fits in a u8.
            #[allow(clippy::cast_possible_truncation)]
            let mean = ((a + b + c + d) / 4) as u8;
            mean
        })
    })
}

/// Recursively apply a function halving the matrix
/// until it's not possible anymore or the max number of levels is reached.
/// Using `max_levels = 0` has the same effect as `max_levels = 1` since there is
/// always at least one matrix (the init matrix).
pub fn limited_sequence<F, T>(max_levels: usize, mat: DMatrix<T>, f: F) -> Vec<DMatrix<T>>
where
    F: Fn(&DMatrix<T>) -> Option<DMatrix<T>>,
    T: Scalar,
{
    let mut pyr = vec![mat];
    while pyr.len() < max_levels {
        match pyr.last().and_then(&f) {
            Some(half) => pyr.push(half),
            None => break,
        }
    }
    pyr
}

/// Halve the resolution of a matrix by applying a function to each 2x2 block.
/// If one size of the matrix is < 2 then this function returns None.
/// If one size is odd, its last line/column is dropped.
pub fn halve<F, T, U>(mat: &DMatrix<T>, f: F) -> Option<DMatrix<U>>
where
    F: Fn(T, T, T, T) -> U,
    T: Scalar + Copy,
    U: Scalar,
{
    let (r, c) = mat.shape();
    let half_r = r / 2;
    let half_c = c / 2;
    if half_r == 0 || half_c == 0 {
        None
    } else {
        let half_mat = DMatrix::<U>::from_fn(half_r, half_c, |i, j| {
            let a = mat[(2 * i, 2 * j)];
            let b = mat[(2 * i + 1, 2 * j)];
            let c = mat[(2 * i, 2 * j + 1)];
            let d = mat[(2 * i + 1, 2 * j + 1)];
            f(a, b, c, d)
        });
        Some(half_mat)
    }
}

/// Coordinates at pyramid level `level` of a pixel position given at level 0.
pub fn to_level(point: &Point2, level: usize) -> Point2 {
    let scale = level_scale(level);
    Point2::new((point.x + 0.5) * scale - 0.5, (point.y + 0.5) * scale - 0.5)
}

/// Coordinates at level 0 of a pixel position given at pyramid level `level`.
pub fn from_level(point: &Point2, level: usize) -> Point2 {
    let scale = level_scale(level);
    Point2::new((point.x + 0.5) / scale - 0.5, (point.y + 0.5) / scale - 0.5)
}

fn level_scale(level: usize) -> Float {
    0.5_f64.powi(level as i32)
}

// TESTS #############################################################
