// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core functionalities of Stereo Odometry Rust.

pub mod backend;
pub mod camera;
pub mod corners;
pub mod feature;
pub mod flow;
pub mod frame;
pub mod gradient;
pub mod ids;
pub mod landmark;
pub mod map;
pub mod multires;
pub mod track;
pub mod triangulation;
