// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One stereo capture instant.

use nalgebra::DMatrix;
use std::sync::Arc;

use crate::core::feature::{Feature, FeatureRef, Side};
use crate::core::ids::{FrameId, KeyFrameId};
use crate::misc::type_aliases::Iso3;

/// A left image feature and its correspondence in the right image, if one was found.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoFeature {
    pub left: Feature,
    pub right: Option<Feature>,
}

/// A stereo image pair with its pose estimate and its features.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic id given by the capture source.
    pub id: FrameId,
    /// Capture time in seconds.
    pub timestamp: f64,
    keyframe_id: Option<KeyFrameId>,
    pose: Iso3,
    /// Left image, read-only.
    pub left_image: Arc<DMatrix<u8>>,
    /// Right image, read-only.
    pub right_image: Arc<DMatrix<u8>>,
    features: Vec<StereoFeature>,
}

impl Frame {
    /// New frame with an identity pose and no feature.
    pub fn new(id: FrameId, timestamp: f64, left_image: DMatrix<u8>, right_image: DMatrix<u8>) -> Frame {
        Frame {
            id,
            timestamp,
            keyframe_id: None,
            pose: Iso3::identity(),
            left_image: Arc::new(left_image),
            right_image: Arc::new(right_image),
            features: Vec::new(),
        }
    }

    /// World to camera pose estimate.
    pub fn pose(&self) -> Iso3 {
        self.pose
    }

    pub fn set_pose(&mut self, pose: Iso3) {
        self.pose = pose;
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe_id.is_some()
    }

    pub fn keyframe_id(&self) -> Option<KeyFrameId> {
        self.keyframe_id
    }

    /// Promote this frame to keyframe.
    pub fn set_keyframe(&mut self, keyframe_id: KeyFrameId) {
        self.keyframe_id = Some(keyframe_id);
    }

    pub fn features(&self) -> &[StereoFeature] {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut [StereoFeature] {
        &mut self.features
    }

    /// Append a left image feature, without right correspondence yet.
    /// Returns the index of the new stereo pair.
    pub fn push_left(&mut self, feature: Feature) -> usize {
        self.features.push(StereoFeature {
            left: feature,
            right: None,
        });
        self.features.len() - 1
    }

    /// Retrieve the feature at the given address, if it belongs to this frame.
    pub fn feature(&self, feature_ref: &FeatureRef) -> Option<&Feature> {
        if feature_ref.frame_id != self.id {
            return None;
        }
        let pair = self.features.get(feature_ref.index)?;
        match feature_ref.side {
            Side::Left => Some(&pair.left),
            Side::Right => pair.right.as_ref(),
        }
    }

    /// Number of left features linked to a landmark id (not checked for liveness).
    pub fn nb_linked(&self) -> usize {
        self.features
            .iter()
            .filter(|pair| pair.left.landmark.is_some())
            .count()
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::misc::type_aliases::Point2;

    #[test]
    fn right_slots_stay_aligned_with_left() {
        let id = FrameId(3);
        let mut frame = Frame::new(id, 0.0, DMatrix::zeros(4, 4), DMatrix::zeros(4, 4));
        for k in 0..5 {
            let index = frame.push_left(Feature::new(id, Point2::new(k as f64, 0.0), Side::Left));
            assert_eq!(k, index);
        }
        frame.features_mut()[2].right = Some(Feature::new(id, Point2::new(1.5, 0.0), Side::Right));
        assert_eq!(5, frame.features().len());
        let right_ref = FeatureRef {
            frame_id: id,
            index: 2,
            side: Side::Right,
        };
        assert_eq!(Some(1.5), frame.feature(&right_ref).map(|f| f.position.x));
        let missing = FeatureRef { index: 1, ..right_ref };
        assert!(frame.feature(&missing).is_none());
        let other_frame = FeatureRef {
            frame_id: FrameId(4),
            ..right_ref
        };
        assert!(frame.feature(&other_frame).is_none());
    }
}
