// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type shared by the pose helpers and the Gauss-Newton estimator.

use thiserror::Error;

/// Failures of a single pose estimation call.
///
/// None of them is fatal: they depend on the input data and the initial pose,
/// and a call may be retried with other correspondences or another initial guess.
#[derive(Debug, Error)]
pub enum PoseError {
    /// Not enough correspondences to constrain the six pose parameters.
    #[error("pose estimation requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },

    /// World and image sequences are not index-aligned.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice
        left_name: &'static str,
        /// Length of the left-hand slice
        left_len: usize,
        /// Label for the right-hand slice
        right_name: &'static str,
        /// Length of the right-hand slice
        right_len: usize,
    },

    /// A correspondence contains NaN or infinite coordinates.
    #[error("correspondence {index} has non-finite coordinates")]
    NonFiniteInput {
        /// Index of the offending correspondence.
        index: usize,
    },

    /// A homogeneous coordinate cannot be brought back to a Euclidean one.
    #[error("invalid homogeneous coordinate (w = {w})")]
    InvalidHomogeneous {
        /// The homogeneous scale.
        w: f64,
    },

    /// An observed image point is neither `(x, y)` nor `(x, y, 1)`.
    #[error("observed image point must have 2 or 3 components, got {len}")]
    InvalidObservation {
        /// Number of components provided.
        len: usize,
    },

    /// A point lands on (or numerically near) the camera plane `Z = 0`.
    #[error("point {index} has depth {depth} in the camera frame, perspective division is undefined")]
    DegenerateProjection {
        /// Index of the offending point.
        index: usize,
        /// Its depth in the camera frame.
        depth: f64,
    },

    /// A row of the linear system overflowed, usually from coordinates too large
    /// for their squares to be represented.
    #[error("residual or jacobian of correspondence {index} is not finite")]
    NonFiniteJacobian {
        /// Index of the offending correspondence.
        index: usize,
    },

    /// The stacked Jacobian does not have full column rank.
    #[error("jacobian is rank deficient (numerical rank {rank} < 6)")]
    IllConditionedJacobian {
        /// Numerical rank of the Jacobian.
        rank: usize,
    },

    /// Singular value decomposition failed
    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    /// The Gauss-Newton update contains NaN or infinite values.
    #[error("the computed pose update is not finite")]
    NonFiniteUpdate,

    /// The stopping test did not fire within the iteration budget.
    #[error("no convergence after {iterations} iterations (residual {residual:e})")]
    NonConvergence {
        /// Number of iterations executed.
        iterations: usize,
        /// Sum of squared residuals at the last iteration.
        residual: f64,
    },

    /// A matrix given as a pose is not a rigid transform.
    #[error("invalid pose: {0}")]
    InvalidPose(String),

    /// Solver parameters are out of their valid range.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}
