// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Linear triangulation of a 3D point from several views.

use nalgebra::{Matrix4, RowVector4};

use crate::misc::type_aliases::{Float, Iso3, Point3};

/// Maximum ratio between the two smallest singular values of the linear system
/// for the solution to be considered well constrained.
pub const MAX_SINGULAR_RATIO: Float = 1e-2;

/// Triangulate a point seen from several views.
///
/// Each `poses[k]` maps world coordinates into the coordinates of view `k`,
/// and `points[k]` is the observation in that view on the normalized image plane,
/// i.e. `(x, y, 1)` with `(x, y)` the undistorted pixel back projected at depth 1.
///
/// This solves the homogeneous linear system `A X = 0` stacking two rows per view,
/// through the eigen decomposition of `AᵀA`.
/// Returns `None` with fewer than two views, mismatched inputs,
/// or when the system is degenerate (parallel rays, coincident centers, point at infinity).
pub fn triangulate(poses: &[Iso3], points: &[Point3]) -> Option<Point3> {
    if poses.len() < 2 || poses.len() != points.len() {
        return None;
    }
    let mut ata = Matrix4::<Float>::zeros();
    for (pose, point) in poses.iter().zip(points) {
        let m = pose.to_homogeneous();
        let r1: RowVector4<Float> = m.row(0).into_owned();
        let r2: RowVector4<Float> = m.row(1).into_owned();
        let r3: RowVector4<Float> = m.row(2).into_owned();
        let x = point.x / point.z;
        let y = point.y / point.z;
        let row_a = r3 * x - r1;
        let row_b = r3 * y - r2;
        ata += row_a.transpose() * row_a + row_b.transpose() * row_b;
    }

    let eigen = ata.symmetric_eigen();
    let mut order = [0, 1, 2, 3];
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    // Singular values of A are the square roots of the eigenvalues of AᵀA.
    let sigma_min = eigen.eigenvalues[order[0]].max(0.0).sqrt();
    let sigma_second = eigen.eigenvalues[order[1]].max(0.0).sqrt();
    let sigma_max = eigen.eigenvalues[order[3]].max(0.0).sqrt();
    // A rank 2 system (single ray) has two vanishing singular values.
    if !(sigma_second > 1e-6 * sigma_max && sigma_min < MAX_SINGULAR_RATIO * sigma_second) {
        return None;
    }

    let solution = eigen.eigenvectors.column(order[0]);
    let w = solution[3];
    if w.abs() < 1e-9 {
        return None;
    }
    let p = Point3::new(solution[0] / w, solution[1] / w, solution[2] / w);
    if p.coords.iter().all(|c| c.is_finite()) {
        Some(p)
    } else {
        None
    }
}

// TESTS #############################################################
