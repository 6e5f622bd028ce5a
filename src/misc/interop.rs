// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between the image and matrix types.

use image::{DynamicImage, GrayImage};
use nalgebra::DMatrix;

/// Convert a `GrayImage` into an `u8` matrix.
/// Image lines become matrix rows.
pub fn matrix_from_image(img: GrayImage) -> DMatrix<u8> {
    let (width, height) = img.dimensions();
    DMatrix::from_row_slice(height as usize, width as usize, &img.into_raw())
}

/// Convert any decoded image into a gray `u8` matrix.
///
/// KITTI gray sequences are already 8 bits luma,
/// color images are converted with the `image` crate luma weights.
pub fn gray_matrix(img: DynamicImage) -> DMatrix<u8> {
    match img {
        DynamicImage::ImageLuma8(gray) => matrix_from_image(gray),
        other => matrix_from_image(other.to_luma8()),
    }
}

// TESTS #############################################################
