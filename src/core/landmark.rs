// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Triangulated 3D points and their observations.

use crate::core::feature::FeatureRef;
use crate::core::ids::LandmarkId;
use crate::misc::type_aliases::Point3;

/// A 3D point in world coordinates, observed by features of several keyframes.
///
/// Landmarks are owned by the `Map`.
/// Every recorded observation must point to a feature linked back to this landmark;
/// both sides are always updated together by the frontend.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    pub id: LandmarkId,
    /// World coordinates.
    pub position: Point3,
    observations: Vec<FeatureRef>,
}

impl Landmark {
    pub fn new(id: LandmarkId, position: Point3) -> Landmark {
        Landmark {
            id,
            position,
            observations: Vec::new(),
        }
    }

    /// Record an observation. Recording the same feature twice has no effect.
    pub fn add_observation(&mut self, feature: FeatureRef) {
        if !self.observations.contains(&feature) {
            self.observations.push(feature);
        }
    }

    /// Forget an observation. Returns false if it was not recorded.
    pub fn remove_observation(&mut self, feature: &FeatureRef) -> bool {
        let before = self.observations.len();
        self.observations.retain(|f| f != feature);
        self.observations.len() != before
    }

    pub fn observations(&self) -> &[FeatureRef] {
        &self.observations
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::feature::Side;
    use crate::core::ids::FrameId;
    use quickcheck_macros;

    fn feature_ref(frame: u8, index: u8) -> FeatureRef {
        FeatureRef {
            frame_id: FrameId(u64::from(frame % 8)),
            index: usize::from(index % 8),
            side: if index % 2 == 0 { Side::Left } else { Side::Right },
        }
    }

    #[test]
    fn remove_observation_reports_presence() {
        let mut landmark = Landmark::new(LandmarkId(0), Point3::origin());
        landmark.add_observation(feature_ref(1, 2));
        assert!(landmark.remove_observation(&feature_ref(1, 2)));
        assert!(!landmark.remove_observation(&feature_ref(1, 2)));
        assert!(landmark.observations().is_empty());
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn observations_are_a_set(refs: Vec<(u8, u8)>) -> bool {
        let mut landmark = Landmark::new(LandmarkId(0), Point3::origin());
        for &(frame, index) in &refs {
            landmark.add_observation(feature_ref(frame, index));
        }
        let obs = landmark.observations();
        let all_recorded = refs
            .iter()
            .all(|&(frame, index)| obs.contains(&feature_ref(frame, index)));
        let no_duplicate = obs
            .iter()
            .enumerate()
            .all(|(i, a)| obs.iter().skip(i + 1).all(|b| a != b));
        all_recorded && no_duplicate
    }
}
