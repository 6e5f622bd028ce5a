// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tracking of the stereo rig: pose optimization and the frontend state machine.

pub mod frontend;
pub mod lm_optimizer;
pub mod pose_estimation;
