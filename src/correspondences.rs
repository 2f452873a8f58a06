// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! 2D-3D correspondences consumed by the pose estimator.

use crate::error::PoseError;
use nalgebra::{Point2, Point3, Vector4};

/// Minimum number of correspondences constraining the six pose parameters.
pub const MIN_CORRESPONDENCES: usize = 4;

/// One 2D-3D correspondence.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Sample {
    /// Point in world coordinates.
    pub world: [f64; 3],
    /// Observed normalized image coordinates `(x, y)`,
    /// i.e. the projection divided by depth, without intrinsics.
    pub image: [f64; 2],
}

impl Sample {
    /// Build a sample from a homogeneous world point `(X, Y, Z, W)` and an observed
    /// image point `(x, y)` or `(x, y, 1)`. A third observed component is ignored,
    /// any other length is rejected.
    pub fn from_homogeneous(world: &Vector4<f64>, observed: &[f64]) -> Result<Self, PoseError> {
        let w = world.w;
        if w == 0.0 || !w.is_finite() {
            return Err(PoseError::InvalidHomogeneous { w });
        }
        if observed.len() != 2 && observed.len() != 3 {
            return Err(PoseError::InvalidObservation {
                len: observed.len(),
            });
        }
        Ok(Self {
            world: [world.x / w, world.y / w, world.z / w],
            image: [observed[0], observed[1]],
        })
    }
}

/// Index-aligned world points and observed normalized image points.
///
/// The invariants (same length, at least [`MIN_CORRESPONDENCES`] pairs,
/// finite coordinates) are checked once at construction.
#[derive(Debug, Clone)]
pub struct Correspondences {
    world: Vec<Point3<f64>>,
    image: Vec<Point2<f64>>,
}

impl Correspondences {
    /// Pair world points with their observations, index by index.
    pub fn new(world: &[Point3<f64>], image: &[Point2<f64>]) -> Result<Self, PoseError> {
        if world.len() != image.len() {
            return Err(PoseError::MismatchedArrayLengths {
                left_name: "world points",
                left_len: world.len(),
                right_name: "image points",
                right_len: image.len(),
            });
        }
        if world.len() < MIN_CORRESPONDENCES {
            return Err(PoseError::InsufficientCorrespondences {
                required: MIN_CORRESPONDENCES,
                actual: world.len(),
            });
        }
        let finite = |w: &Point3<f64>, i: &Point2<f64>| {
            w.iter().chain(i.iter()).all(|v| v.is_finite())
        };
        if let Some(index) = world.iter().zip(image).position(|(w, i)| !finite(w, i)) {
            return Err(PoseError::NonFiniteInput { index });
        }
        Ok(Self {
            world: world.to_vec(),
            image: image.to_vec(),
        })
    }

    /// Same as [`Correspondences::new`] from a list of samples.
    pub fn from_samples(samples: &[Sample]) -> Result<Self, PoseError> {
        let world: Vec<_> = samples.iter().map(|s| Point3::from(s.world)).collect();
        let image: Vec<_> = samples.iter().map(|s| Point2::from(s.image)).collect();
        Self::new(&world, &image)
    }

    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.world.len()
    }

    /// Always false, a valid set holds at least [`MIN_CORRESPONDENCES`] pairs.
    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }

    /// World points.
    pub fn world(&self) -> &[Point3<f64>] {
        &self.world
    }

    /// Observed normalized image points.
    pub fn image(&self) -> &[Point2<f64>] {
        &self.image
    }

    /// Iterate over `(world, image)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Point3<f64>, &Point2<f64>)> {
        self.world.iter().zip(&self.image)
    }
}
