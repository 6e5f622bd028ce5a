// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions to compute gradients and sample images at sub-pixel positions.

use nalgebra::{DMatrix, Scalar};
use num_traits::AsPrimitive;

use crate::misc::type_aliases::Float;

/// Centered differences along x (columns) and y (rows).
///
/// Border pixels use one-sided differences instead.
/// Images smaller than 2 pixels in one direction get a null gradient in that direction.
pub fn centered(img: &DMatrix<u8>) -> (DMatrix<Float>, DMatrix<Float>) {
    let (nb_rows, nb_cols) = img.shape();
    let at = |i: usize, j: usize| Float::from(img[(i, j)]);
    let grad_x = DMatrix::from_fn(nb_rows, nb_cols, |i, j| {
        if nb_cols < 2 {
            0.0
        } else if j == 0 {
            at(i, 1) - at(i, 0)
        } else if j == nb_cols - 1 {
            at(i, j) - at(i, j - 1)
        } else {
            0.5 * (at(i, j + 1) - at(i, j - 1))
        }
    });
    let grad_y = DMatrix::from_fn(nb_rows, nb_cols, |i, j| {
        if nb_rows < 2 {
            0.0
        } else if i == 0 {
            at(1, j) - at(0, j)
        } else if i == nb_rows - 1 {
            at(i, j) - at(i - 1, j)
        } else {
            0.5 * (at(i + 1, j) - at(i - 1, j))
        }
    });
    (grad_x, grad_y)
}

/// Bilinear interpolation of an image at position (x, y),
/// where x is the column and y the row.
///
/// Returns None if the 2x2 neighborhood is not entirely inside the image.
pub fn interpolate<T>(x: Float, y: Float, image: &DMatrix<T>) -> Option<Float>
where
    T: Scalar + Copy + AsPrimitive<Float>,
{
    let (height, width) = image.shape();
    let u = x.floor();
    let v = y.floor();
    if u >= 0.0 && u < (width as Float - 1.0) && v >= 0.0 && v < (height as Float - 1.0) {
        let u_0 = u as usize;
        let v_0 = v as usize;
        let u_1 = u_0 + 1;
        let v_1 = v_0 + 1;
        let vu_00 = image[(v_0, u_0)].as_();
        let vu_10 = image[(v_1, u_0)].as_();
        let vu_01 = image[(v_0, u_1)].as_();
        let vu_11 = image[(v_1, u_1)].as_();
        let a = x - u;
        let b = y - v;
        Some(
            (1.0 - b) * (1.0 - a) * vu_00
                + b * (1.0 - a) * vu_10
                + (1.0 - b) * a * vu_01
                + b * a * vu_11,
        )
    } else {
        None
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> DMatrix<u8> {
        // Intensity 3 * column + 2 * row.
        DMatrix::from_fn(6, 8, |i, j| (3 * j + 2 * i) as u8)
    }

    #[test]
    fn gradients_of_a_ramp_are_constant() {
        let (gx, gy) = centered(&ramp());
        assert!(gx.iter().all(|&g| (g - 3.0).abs() < 1e-12));
        assert!(gy.iter().all(|&g| (g - 2.0).abs() < 1e-12));
    }

    #[test]
    fn interpolation_is_exact_on_a_ramp() {
        let img = ramp();
        assert_relative_eq!(interpolate(2.25, 1.5, &img).unwrap_or(-1.0), 9.75, epsilon = 1e-12);
        assert_relative_eq!(interpolate(0.0, 0.0, &img).unwrap_or(-1.0), 0.0);
    }

    #[test]
    fn interpolation_outside_is_none() {
        let img = ramp();
        assert_eq!(None, interpolate(-0.1, 1.0, &img));
        assert_eq!(None, interpolate(7.0, 1.0, &img));
        assert_eq!(None, interpolate(1.0, 5.5, &img));
        assert!(interpolate(6.99, 4.99, &img).is_some());
    }
}
