// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Stereo Odometry in Rust (sors)
//!
//! This library provides the tracking frontend of a stereo visual odometry pipeline.
//! Every incoming left/right image pair is tracked against the previous frame
//! with sparse optical flow, the rig pose is estimated by robust reprojection
//! error minimization, and keyframes with new triangulated landmarks are added
//! to a shared map when tracking weakens.
//!
//! The entry point is [`core::track::frontend::Frontend`],
//! and the `sors_track` binary runs it over a KITTI odometry sequence.

pub mod core;
pub mod dataset;
pub mod math;
pub mod misc;
