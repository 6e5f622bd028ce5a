// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions to handle sequences of the KITTI odometry dataset.
//!
//! A sequence directory contains:
//!
//! * `calib.txt`: one rectified 3x4 projection matrix per camera (`P0` to `P3`),
//! * `times.txt`: one timestamp (in seconds) per frame,
//! * `image_0/` and `image_1/`: left and right gray images, named `%06d.png`.

use nalgebra::{Matrix3x4, Translation3, UnitQuaternion};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::camera::{Camera, Intrinsics, StereoRig};
use crate::core::frame::Frame;
use crate::core::ids::FrameId;
use crate::misc::interop;
use crate::misc::type_aliases::{Float, Iso3, Mat3, Vec3};

/// Name of the left camera projection matrix in `calib.txt`.
pub const LEFT_PROJECTION: &str = "P0";

/// Name of the right camera projection matrix in `calib.txt`.
pub const RIGHT_PROJECTION: &str = "P1";

/// Error while reading a KITTI sequence.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse line {line} of {file}")]
    Parse { file: String, line: usize },
    #[error("missing projection matrix {0}")]
    MissingProjection(&'static str),
    #[error("projection matrix {0} has a singular calibration")]
    SingularCalibration(&'static str),
    #[error("cannot decode image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("frame {index} is out of a sequence of {len} frames")]
    OutOfRange { index: usize, len: usize },
}

/// A KITTI odometry sequence on disk.
#[derive(Debug, Clone)]
pub struct Sequence {
    /// Stereo rig built from the `P0` and `P1` projection matrices.
    pub rig: StereoRig,
    /// Timestamp of each frame.
    pub timestamps: Vec<f64>,
    directory: PathBuf,
}

impl Sequence {
    /// Read the calibration and timestamps of a sequence.
    /// Images are only read on demand by `read_frame`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Sequence, DatasetError> {
        let directory = directory.as_ref().to_path_buf();
        let calib = read_to_string(directory.join("calib.txt"))?;
        let times = read_to_string(directory.join("times.txt"))?;
        Ok(Sequence {
            rig: parse::calibration(&calib)?,
            timestamps: parse::timestamps(&times)?,
            directory,
        })
    }

    /// Number of frames in the sequence.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Path of the left image of a frame.
    pub fn left_image_path(&self, index: usize) -> PathBuf {
        self.directory.join("image_0").join(format!("{:06}.png", index))
    }

    /// Path of the right image of a frame.
    pub fn right_image_path(&self, index: usize) -> PathBuf {
        self.directory.join("image_1").join(format!("{:06}.png", index))
    }

    /// Load the stereo pair of a frame.
    pub fn read_frame(&self, index: usize) -> Result<Frame, DatasetError> {
        let timestamp = *self.timestamps.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.len(),
        })?;
        let left = read_gray(&self.left_image_path(index))?;
        let right = read_gray(&self.right_image_path(index))?;
        Ok(Frame::new(FrameId(index as u64), timestamp, left, right))
    }
}

fn read_to_string(path: PathBuf) -> Result<String, DatasetError> {
    std::fs::read_to_string(&path).map_err(|source| DatasetError::Io { path, source })
}

fn read_gray(path: &Path) -> Result<nalgebra::DMatrix<u8>, DatasetError> {
    let img = image::open(path).map_err(|source| DatasetError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(interop::gray_matrix(img))
}

/// Camera of a rectified projection matrix `P = K [I | t]`.
/// The extrinsic translation is recovered as `t = K⁻¹ P[:,3]`.
pub fn camera_from_projection(
    name: &'static str,
    projection: &Matrix3x4<Float>,
) -> Result<Camera, DatasetError> {
    let k: Mat3 = projection.fixed_view::<3, 3>(0, 0).into_owned();
    let k_inv = k
        .try_inverse()
        .ok_or(DatasetError::SingularCalibration(name))?;
    let t: Vec3 = k_inv * projection.column(3);
    let intrinsics = Intrinsics {
        principal_point: (k[(0, 2)], k[(1, 2)]),
        focal: (k[(0, 0)], k[(1, 1)]),
        skew: k[(0, 1)],
    };
    let pose = Iso3::from_parts(Translation3::from(t), UnitQuaternion::identity());
    Ok(Camera::new(intrinsics, pose))
}

/// Pose of a frame written in the KITTI trajectory format:
/// the first three rows of the camera to world matrix, row major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPose {
    /// World to camera pose, as estimated by the frontend.
    pub pose: Iso3,
}

impl fmt::Display for TrajectoryPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.pose.inverse().to_homogeneous();
        let values: Vec<String> = (0..3)
            .flat_map(|r| (0..4).map(move |c| (r, c)))
            .map(|(r, c)| format!("{:e}", m[(r, c)]))
            .collect();
        f.write_str(&values.join(" "))
    }
}

/// Parse the text files of a KITTI sequence.
pub mod parse {
    use super::*;
    use nom::{
        bytes::complete::take_while1,
        character::complete::{char, space0, space1},
        combinator::{all_consuming, map},
        multi::separated_list1,
        number::complete::double,
        sequence::{delimited, separated_pair, terminated},
        IResult,
    };

    /// Parse a `calib.txt` file into the stereo rig of the left and right gray cameras.
    pub fn calibration(file_content: &str) -> Result<StereoRig, DatasetError> {
        let entries = multi_line("calib.txt", calib_line, file_content)?;
        let projection = |name: &'static str| {
            entries
                .iter()
                .find(|(key, values)| key == name && values.len() == 12)
                .map(|(_, values)| Matrix3x4::from_row_slice(values))
                .ok_or(DatasetError::MissingProjection(name))
        };
        Ok(StereoRig {
            left: camera_from_projection(LEFT_PROJECTION, &projection(LEFT_PROJECTION)?)?,
            right: camera_from_projection(RIGHT_PROJECTION, &projection(RIGHT_PROJECTION)?)?,
        })
    }

    /// Parse a `times.txt` file.
    pub fn timestamps(file_content: &str) -> Result<Vec<f64>, DatasetError> {
        multi_line("times.txt", timestamp_line, file_content)
    }

    /// Parse a trajectory (such as a ground truth `poses/XX.txt` file)
    /// into world to camera poses.
    pub fn trajectory(file_content: &str) -> Result<Vec<Iso3>, DatasetError> {
        let rows = multi_line("trajectory", numbers_line, file_content)?;
        rows.iter()
            .enumerate()
            .map(|(line, values)| {
                if values.len() == 12 {
                    Ok(pose_from_row_major(values))
                } else {
                    Err(DatasetError::Parse {
                        file: "trajectory".to_string(),
                        line: line + 1,
                    })
                }
            })
            .collect()
    }

    fn pose_from_row_major(values: &[Float]) -> Iso3 {
        let m = Matrix3x4::from_row_slice(values);
        let rotation: Mat3 = m.fixed_view::<3, 3>(0, 0).into_owned();
        let rotation = UnitQuaternion::from_matrix(&rotation);
        let translation = Translation3::from(m.column(3).into_owned());
        Iso3::from_parts(translation, rotation).inverse()
    }

    /// Apply a line parser to every non empty line.
    fn multi_line<F, T>(file: &str, line_parser: F, file_content: &str) -> Result<Vec<T>, DatasetError>
    where
        F: Fn(&str) -> IResult<&str, T>,
    {
        let mut vec_data = Vec::new();
        for (line_number, line) in file_content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match all_consuming(&line_parser)(line) {
                Ok((_, data)) => vec_data.push(data),
                Err(_) => {
                    return Err(DatasetError::Parse {
                        file: file.to_string(),
                        line: line_number + 1,
                    })
                }
            }
        }
        Ok(vec_data)
    }

    // nom parsers #############################################################

    // Space separated numbers, with optional leading and trailing spaces.
    fn numbers_line(input: &str) -> IResult<&str, Vec<Float>> {
        delimited(space0, separated_list1(space1, double), space0)(input)
    }

    fn timestamp_line(input: &str) -> IResult<&str, f64> {
        delimited(space0, double, space0)(input)
    }

    // `P0: 7.188560000000e+02 0.000000000000e+00 ...`
    fn calib_line(input: &str) -> IResult<&str, (String, Vec<Float>)> {
        separated_pair(
            map(key, String::from),
            terminated(char(':'), space0),
            numbers_line,
        )(input)
    }

    fn key(input: &str) -> IResult<&str, &str> {
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
    }
}

// TESTS #############################################################
