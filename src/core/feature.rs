// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! 2D observations in a frame image.

use crate::core::ids::{FrameId, LandmarkId};
use crate::misc::type_aliases::Point2;

/// Image of the stereo pair a feature was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Left,
    Right,
}

/// A single pixel observation, owned by exactly one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Pixel position.
    pub position: Point2,
    /// Frame owning this feature.
    pub frame_id: FrameId,
    /// Observed landmark, if any.
    /// The landmark may have been removed from the map since,
    /// so this link must be resolved through the map before use.
    pub landmark: Option<LandmarkId>,
    /// Only meaningful during one pose estimation, reset afterwards.
    pub is_outlier: bool,
    /// Image the feature was detected in.
    pub side: Side,
}

impl Feature {
    /// New feature not linked to any landmark.
    pub fn new(frame_id: FrameId, position: Point2, side: Side) -> Feature {
        Feature {
            position,
            frame_id,
            landmark: None,
            is_outlier: false,
            side,
        }
    }

    /// Same as `new` but inheriting a landmark link.
    pub fn linked(
        frame_id: FrameId,
        position: Point2,
        side: Side,
        landmark: Option<LandmarkId>,
    ) -> Feature {
        Feature {
            landmark,
            ..Feature::new(frame_id, position, side)
        }
    }
}

/// Address of a feature: frame, index of the stereo pair in that frame, and side.
/// This is what landmarks record as observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureRef {
    pub frame_id: FrameId,
    pub index: usize,
    pub side: Side,
}
