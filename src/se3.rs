// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Exponential map of the rigid transform group SE(3).
//!
//! A twist is a `Vector6` laid out as `(vx, vy, vz, wx, wy, wz)`:
//! translational generators first, rotational generators last.
//! This is the same ordering as the columns of the interaction matrix
//! built by the Gauss-Newton estimator.

use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3, Vector6};

type Iso3 = Isometry3<f64>;
type Mat3 = Matrix3<f64>;
type Vec3 = Vector3<f64>;

/// Below this rotation angle, the coefficients of the left Jacobian
/// are evaluated with their Taylor expansions.
const SMALL_ANGLE: f64 = 1e-5;

/// Convert a twist into the rigid transform it generates in unit time.
///
/// The rotation is `exp([w]x)` and the translation is `V(w) v` with
/// `V = I + (1 - cos t) / t^2 [w]x + (t - sin t) / t^3 [w]x^2` and `t = |w|`.
pub fn exp(twist: &Vector6<f64>) -> Iso3 {
    let v = Vec3::new(twist[0], twist[1], twist[2]);
    let w = Vec3::new(twist[3], twist[4], twist[5]);
    let rotation = UnitQuaternion::from_scaled_axis(w);
    let translation = left_jacobian(&w) * v;
    Iso3::from_parts(Translation3::from(translation), rotation)
}

/// Left Jacobian of SO(3), the matrix `V` coupling rotation and translation in [`exp`].
fn left_jacobian(w: &Vec3) -> Mat3 {
    let theta_sq = w.norm_squared();
    let theta = theta_sq.sqrt();
    let (a, b) = if theta < SMALL_ANGLE {
        (0.5 - theta_sq / 24.0, 1.0 / 6.0 - theta_sq / 120.0)
    } else {
        let (sin, cos) = theta.sin_cos();
        ((1.0 - cos) / theta_sq, (theta - sin) / (theta_sq * theta))
    };
    let skew = w.cross_matrix();
    Mat3::identity() + skew * a + skew * skew * b
}

// Tests #######################################################################
