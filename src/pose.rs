// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpers to build, validate and apply camera poses.
//!
//! A pose is an [`Isometry3<f64>`] mapping world coordinates into the camera frame,
//! the rotation and translation pair satisfying `X_cam = R X_world + t`.
//! Its 4x4 homogeneous form is given by `Isometry3::to_homogeneous`.

use crate::error::PoseError;
use nalgebra::{
    Isometry3, Matrix3, Matrix4, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3,
};

type Iso3 = Isometry3<f64>;
type Vec3 = Vector3<f64>;

/// Smallest absolute depth accepted by [`project`].
pub const DEFAULT_MIN_DEPTH: f64 = 1e-12;

/// Largest deviation `|R^T R - I|` accepted by [`from_homogeneous`].
const ORTHONORMALITY_TOL: f64 = 1e-6;

/// Build a pose from a translation and three rotation angles (radians)
/// around the fixed `x`, `y` and `z` axes, composed as `R = Rx * Ry * Rz`.
pub fn from_translation_rxyz(translation: [f64; 3], rxyz: [f64; 3]) -> Iso3 {
    let rx = UnitQuaternion::from_axis_angle(&Vec3::x_axis(), rxyz[0]);
    let ry = UnitQuaternion::from_axis_angle(&Vec3::y_axis(), rxyz[1]);
    let rz = UnitQuaternion::from_axis_angle(&Vec3::z_axis(), rxyz[2]);
    Iso3::from_parts(Translation3::from(Vec3::from(translation)), rx * ry * rz)
}

/// Build a pose from a translation and a rotation vector `theta * u`
/// (unit axis `u`, angle `theta` in radians).
pub fn from_translation_axis_angle(translation: [f64; 3], theta_u: [f64; 3]) -> Iso3 {
    Iso3::from_parts(
        Translation3::from(Vec3::from(translation)),
        UnitQuaternion::from_scaled_axis(Vec3::from(theta_u)),
    )
}

/// Convert a 4x4 homogeneous matrix into a pose.
///
/// The matrix must be a rigid transform: last row `[0, 0, 0, 1]`,
/// orthonormal upper-left block with positive determinant, finite entries.
pub fn from_homogeneous(m: &Matrix4<f64>) -> Result<Iso3, PoseError> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(PoseError::InvalidPose("non-finite entries".to_string()));
    }
    let last_row = m.fixed_view::<1, 4>(3, 0);
    if last_row[0] != 0.0 || last_row[1] != 0.0 || last_row[2] != 0.0 || last_row[3] != 1.0 {
        return Err(PoseError::InvalidPose(format!(
            "last row must be [0, 0, 0, 1], got {}",
            last_row
        )));
    }
    let rot: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
    let deviation = (rot.transpose() * rot - Matrix3::identity()).norm();
    if deviation > ORTHONORMALITY_TOL {
        return Err(PoseError::InvalidPose(format!(
            "rotation block is not orthonormal (|R^T R - I| = {:e})",
            deviation
        )));
    }
    if rot.determinant() <= 0.0 {
        return Err(PoseError::InvalidPose(
            "rotation block is a reflection".to_string(),
        ));
    }
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rot));
    let translation = Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    Ok(Iso3::from_parts(Translation3::from(translation), rotation))
}

/// Project a world point to normalized image coordinates `(X/Z, Y/Z)`.
///
/// Fails with [`PoseError::DegenerateProjection`] (index 0) when the point
/// lies on the camera plane.
pub fn project(pose: &Iso3, world: &Point3<f64>) -> Result<Point2<f64>, PoseError> {
    let camera = pose * world;
    perspective(&camera, DEFAULT_MIN_DEPTH).ok_or(PoseError::DegenerateProjection {
        index: 0,
        depth: camera.z,
    })
}

/// Perspective division of a camera-frame point.
/// Returns `None` instead of dividing when `|Z| <= min_depth` or `Z` is not finite.
pub(crate) fn perspective(camera: &Point3<f64>, min_depth: f64) -> Option<Point2<f64>> {
    let z = camera.z;
    if !z.is_finite() || z.abs() <= min_depth {
        return None;
    }
    Some(Point2::new(camera.x / z, camera.y / z))
}

// Tests #######################################################################
