// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pose estimation by Gauss-Newton iterations on SE(3).
//!
//! Each iteration projects the world points with the current pose,
//! stacks the reprojection residuals `e` (predicted - observed, `x` then `y` per point)
//! and the interaction matrices into a `2N x 6` Jacobian `J`, and updates the pose with
//!
//! ```text
//! twist = -gain * pinv(J) * e
//! pose  = exp(twist)^-1 * pose
//! ```
//!
//! until the sum of squared residuals stops changing.
//! Reference: E. Marchand, H. Uchiyama, F. Spindler,
//! "Pose estimation for augmented reality: a hands-on survey", IEEE TVCG 2016.

use crate::correspondences::Correspondences;
use crate::error::PoseError;
use crate::pose::perspective;
use crate::se3;
use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector, Isometry3, Matrix2x6, Point2, Vector6};

mod convergence;

pub use convergence::{ConvergenceMonitor, ConvergenceState};

type Iso3 = Isometry3<f64>;

/// Parameters of the Gauss-Newton pose estimator.
///
/// Near the optimum each update shrinks the residual vector by about `1 - gain`,
/// so the change of the sum of squares between two iterations shrinks by about
/// `(1 - gain)^2`. The iteration count to reach `tolerance` thus grows like
/// `ln(r0 / tolerance) / (-2 ln(1 - gain))`: about 70 iterations with the
/// default gain on exact data, about twice as many on noisy observations, and
/// about half as many with `gain = 0.5`. Raise `max_iterations` when lowering the gain.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GaussNewtonParams {
    /// Fixed step gain applied to every Gauss-Newton update.
    pub gain: f64,
    /// Absolute tolerance on the change of the sum of squared residuals
    /// between two iterations. Zero stops only on an exact repeat.
    pub tolerance: f64,
    /// Tolerance on the same change, relative to the previous residual. Zero disables it.
    pub relative_tolerance: f64,
    /// Hard cap on the number of iterations.
    pub max_iterations: usize,
    /// Points with `|Z| <= min_depth` in the camera frame are rejected.
    pub min_depth: f64,
    /// Singular values below `rank_tolerance * largest` count as zero
    /// when checking the rank of the Jacobian.
    pub rank_tolerance: f64,
    /// Cap on the sweeps of one singular value decomposition.
    pub max_svd_iterations: usize,
}

impl Default for GaussNewtonParams {
    fn default() -> Self {
        Self {
            gain: 0.25,
            tolerance: 1e-18,
            relative_tolerance: 0.0,
            max_iterations: 200,
            min_depth: 1e-12,
            rank_tolerance: 1e-10,
            max_svd_iterations: 1000,
        }
    }
}

impl GaussNewtonParams {
    /// Check that every parameter is in its valid range.
    pub fn validate(&self) -> Result<(), PoseError> {
        let invalid = |msg: String| Err(PoseError::InvalidParams(msg));
        if !(self.gain.is_finite() && self.gain > 0.0) {
            return invalid(format!("gain must be positive and finite, got {}", self.gain));
        }
        if !(self.tolerance >= 0.0) {
            return invalid(format!("tolerance must be >= 0, got {}", self.tolerance));
        }
        if !(self.relative_tolerance >= 0.0) {
            return invalid(format!(
                "relative tolerance must be >= 0, got {}",
                self.relative_tolerance
            ));
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".to_string());
        }
        if !(self.min_depth >= 0.0) {
            return invalid(format!("min_depth must be >= 0, got {}", self.min_depth));
        }
        if !(self.rank_tolerance >= 0.0 && self.rank_tolerance < 1.0) {
            return invalid(format!(
                "rank_tolerance must be in [0, 1), got {}",
                self.rank_tolerance
            ));
        }
        if self.max_svd_iterations == 0 {
            return invalid("max_svd_iterations must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Residuals and Jacobian of all correspondences at a given pose.
#[derive(Debug, Clone)]
pub struct Linearization {
    /// Predicted normalized image coordinates, one per correspondence.
    pub projections: Vec<Point2<f64>>,
    /// Stacked residuals `(x - x_obs, y - y_obs)`, length `2N`.
    pub residual: DVector<f64>,
    /// Stacked interaction matrices, `2N x 6`.
    pub jacobian: DMatrix<f64>,
}

impl Linearization {
    /// Sum of squared residuals.
    pub fn residual_norm(&self) -> f64 {
        self.residual.norm_squared()
    }
}

/// Outcome of a single Gauss-Newton update.
#[derive(Debug, Copy, Clone)]
pub struct Step {
    /// Pose after the update.
    pub pose: Iso3,
    /// Twist applied, `(vx, vy, vz, wx, wy, wz)`.
    pub twist: Vector6<f64>,
    /// Sum of squared residuals at the pose the step started from.
    pub residual: f64,
}

/// Result of a converged estimation.
#[derive(Debug, Copy, Clone)]
pub struct Estimate {
    /// Refined world to camera pose.
    pub pose: Iso3,
    /// Number of iterations executed.
    pub iterations: usize,
    /// Sum of squared residuals of the last iteration.
    pub residual: f64,
}

/// Gauss-Newton pose estimator.
#[derive(Debug, Clone, Default)]
pub struct GaussNewton {
    params: GaussNewtonParams,
}

impl GaussNewton {
    /// Estimator with validated parameters.
    pub fn new(params: GaussNewtonParams) -> Result<Self, PoseError> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Parameters in use.
    pub fn params(&self) -> &GaussNewtonParams {
        &self.params
    }

    /// Refine `initial` until the residual stops changing.
    pub fn estimate(
        &self,
        correspondences: &Correspondences,
        initial: &Iso3,
    ) -> Result<Estimate, PoseError> {
        debug!(
            "gauss-newton pose estimation: {} correspondences, gain {}, at most {} iterations",
            correspondences.len(),
            self.params.gain,
            self.params.max_iterations
        );
        let mut pose = *initial;
        let mut monitor = ConvergenceMonitor::from_params(&self.params);
        let mut residual = f64::INFINITY;
        for iteration in 1..=self.params.max_iterations {
            let step = self.step(correspondences, &pose)?;
            pose = step.pose;
            residual = step.residual;
            trace!(
                "iteration {}: residual {:e}, |twist| {:e}",
                iteration,
                residual,
                step.twist.norm()
            );
            if monitor.observe(residual) == ConvergenceState::Converged {
                debug!(
                    "converged after {} iterations, residual {:e}",
                    iteration, residual
                );
                return Ok(Estimate {
                    pose,
                    iterations: iteration,
                    residual,
                });
            }
        }
        warn!(
            "no convergence after {} iterations, residual {:e}",
            self.params.max_iterations, residual
        );
        Err(PoseError::NonConvergence {
            iterations: self.params.max_iterations,
            residual,
        })
    }

    /// One Gauss-Newton update of `pose`.
    pub fn step(&self, correspondences: &Correspondences, pose: &Iso3) -> Result<Step, PoseError> {
        let linearization = self.linearize(correspondences, pose)?;
        let twist = self.solve_twist(&linearization)?;
        Ok(Step {
            pose: se3::exp(&twist).inverse() * pose,
            twist,
            residual: linearization.residual_norm(),
        })
    }

    /// Project every point with `pose` and build the residual vector and the Jacobian.
    ///
    /// Fails before any division if a point has a depth within `min_depth` of zero.
    pub fn linearize(
        &self,
        correspondences: &Correspondences,
        pose: &Iso3,
    ) -> Result<Linearization, PoseError> {
        let n = correspondences.len();
        let mut projections = Vec::with_capacity(n);
        let mut residual = DVector::zeros(2 * n);
        let mut jacobian = DMatrix::zeros(2 * n, 6);
        for (index, (world, observed)) in correspondences.iter().enumerate() {
            let camera = pose * world;
            let projected = perspective(&camera, self.params.min_depth).ok_or(
                PoseError::DegenerateProjection {
                    index,
                    depth: camera.z,
                },
            )?;
            jacobian
                .fixed_view_mut::<2, 6>(2 * index, 0)
                .copy_from(&interaction_matrix(&projected, camera.z));
            residual[2 * index] = projected.x - observed.x;
            residual[2 * index + 1] = projected.y - observed.y;
            projections.push(projected);
        }
        Ok(Linearization {
            projections,
            residual,
            jacobian,
        })
    }

    /// Gauss-Newton twist `-gain * pinv(J) * e`.
    ///
    /// The Jacobian must be finite and have full column rank,
    /// as measured by its singular values.
    pub fn solve_twist(&self, linearization: &Linearization) -> Result<Vector6<f64>, PoseError> {
        let jacobian = &linearization.jacobian;
        let residual = &linearization.residual;
        if jacobian.ncols() != 6 {
            return Err(PoseError::MismatchedArrayLengths {
                left_name: "jacobian columns",
                left_len: jacobian.ncols(),
                right_name: "twist parameters",
                right_len: 6,
            });
        }
        if jacobian.nrows() != residual.len() {
            return Err(PoseError::MismatchedArrayLengths {
                left_name: "jacobian rows",
                left_len: jacobian.nrows(),
                right_name: "residuals",
                right_len: residual.len(),
            });
        }
        // The SVD does not terminate on inf or NaN entries.
        let non_finite_row = (0..jacobian.nrows()).find(|&row| {
            !residual[row].is_finite() || jacobian.row(row).iter().any(|v| !v.is_finite())
        });
        if let Some(row) = non_finite_row {
            return Err(PoseError::NonFiniteJacobian { index: row / 2 });
        }

        let svd = jacobian
            .clone()
            .try_svd(true, true, 5.0 * f64::EPSILON, self.params.max_svd_iterations)
            .ok_or_else(|| {
                PoseError::SvdFailed(format!(
                    "no convergence within {} iterations",
                    self.params.max_svd_iterations
                ))
            })?;
        let largest = svd.singular_values.iter().cloned().fold(0.0, f64::max);
        let threshold = self.params.rank_tolerance * largest;
        let rank = svd.singular_values.iter().filter(|&&s| s > threshold).count();
        if rank < 6 {
            return Err(PoseError::IllConditionedJacobian { rank });
        }
        let pinv = svd
            .pseudo_inverse(threshold)
            .map_err(|e| PoseError::SvdFailed(e.to_string()))?;
        let update = pinv * residual * (-self.params.gain);
        let twist = Vector6::from_iterator(update.iter().cloned());
        if twist.iter().all(|v| v.is_finite()) {
            Ok(twist)
        } else {
            Err(PoseError::NonFiniteUpdate)
        }
    }
}

/// Estimate a pose with the default parameters.
pub fn estimate(correspondences: &Correspondences, initial: &Iso3) -> Result<Estimate, PoseError> {
    GaussNewton::default().estimate(correspondences, initial)
}

/// Sum of squared reprojection residuals of `pose` over all correspondences.
pub fn reprojection_error(pose: &Iso3, correspondences: &Correspondences) -> Result<f64, PoseError> {
    let min_depth = GaussNewtonParams::default().min_depth;
    correspondences
        .iter()
        .enumerate()
        .try_fold(0.0, |acc, (index, (world, observed))| {
            let camera = pose * world;
            let projected = perspective(&camera, min_depth).ok_or(
                PoseError::DegenerateProjection {
                    index,
                    depth: camera.z,
                },
            )?;
            Ok(acc + (projected - observed).norm_squared())
        })
}

/// Interaction matrix of a normalized image point `(x, y)` at depth `z`:
/// the derivatives of `(x, y)` with respect to the camera twist
/// `(vx, vy, vz, wx, wy, wz)`.
///
/// `z` must not be zero.
pub fn interaction_matrix(point: &Point2<f64>, z: f64) -> Matrix2x6<f64> {
    let x = point.x;
    let y = point.y;
    #[rustfmt::skip]
    let rows = Matrix2x6::new(
        -1.0 / z, 0.0,      x / z, x * y,       -(1.0 + x * x), y,
        0.0,      -1.0 / z, y / z, 1.0 + y * y, -x * y,         -x,
    );
    rows
}

// Tests #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{from_translation_rxyz, project};
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    fn scenario() -> (Correspondences, Iso3, Iso3) {
        let world = [
            Point3::new(-0.2, -0.2, 0.0),
            Point3::new(0.4, -0.2, 0.0),
            Point3::new(0.2, 0.2, 0.0),
            Point3::new(-0.2, 0.2, 0.0),
        ];
        let truth = from_translation_rxyz([-0.1, 0.1, 0.5], [5f64.to_radians(), 0.0, 45f64.to_radians()]);
        let initial =
            from_translation_rxyz([-0.05, 0.05, 0.45], [1f64.to_radians(), 0.0, 35f64.to_radians()]);
        let image: Vec<_> = world.iter().map(|p| project(&truth, p).unwrap()).collect();
        (Correspondences::new(&world, &image).unwrap(), truth, initial)
    }

    #[test]
    fn interaction_matrix_on_optical_axis() {
        let z = 2.0;
        let jac = interaction_matrix(&Point2::origin(), z);
        #[rustfmt::skip]
        let expected = Matrix2x6::new(
            -0.5, 0.0, 0.0, 0.0, -1.0, 0.0,
            0.0, -0.5, 0.0, 1.0, 0.0, 0.0,
        );
        assert_eq!(jac, expected);
    }

    #[test]
    fn interaction_matrix_matches_finite_differences() {
        let camera = Point3::new(0.3, -0.2, 1.7);
        let jac = interaction_matrix(&Point2::new(camera.x / camera.z, camera.y / camera.z), camera.z);
        let h = 1e-6;
        for k in 0..6 {
            let mut twist = Vector6::zeros();
            twist[k] = h;
            let plus = project(&se3::exp(&twist).inverse(), &camera).unwrap();
            let minus = project(&se3::exp(&-twist).inverse(), &camera).unwrap();
            let numeric = (plus - minus) / (2.0 * h);
            assert_relative_eq!(jac[(0, k)], numeric.x, epsilon = 1e-7);
            assert_relative_eq!(jac[(1, k)], numeric.y, epsilon = 1e-7);
        }
    }

    #[test]
    fn linearize_shapes_and_layout() {
        let (corr, truth, initial) = scenario();
        let gn = GaussNewton::default();
        let lin = gn.linearize(&corr, &initial).unwrap();
        assert_eq!(lin.residual.len(), 8);
        assert_eq!(lin.jacobian.shape(), (8, 6));
        assert_eq!(lin.projections.len(), 4);
        for (i, (world, observed)) in corr.iter().enumerate() {
            let camera = initial * world;
            assert_relative_eq!(lin.residual[2 * i], lin.projections[i].x - observed.x);
            assert_relative_eq!(lin.residual[2 * i + 1], lin.projections[i].y - observed.y);
            let block = interaction_matrix(&lin.projections[i], camera.z);
            assert_eq!(lin.jacobian.fixed_view::<2, 6>(2 * i, 0), block);
        }

        let at_truth = gn.linearize(&corr, &truth).unwrap();
        assert!(at_truth.residual_norm() < 1e-28);
        assert_relative_eq!(
            reprojection_error(&initial, &corr).unwrap(),
            lin.residual_norm(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn point_on_camera_plane_is_degenerate() {
        let (corr, _, _) = scenario();
        // Camera at the world origin looking along z: the planar target has Z = 0.
        let err = GaussNewton::default()
            .linearize(&corr, &Iso3::identity())
            .unwrap_err();
        assert!(matches!(err, PoseError::DegenerateProjection { index: 0, .. }));
    }

    #[test]
    fn collinear_points_are_rank_deficient() {
        let truth = from_translation_rxyz([0.05, -0.02, 1.0], [0.1, 0.2, 0.3]);
        let world: Vec<_> = (0..5)
            .map(|i| Point3::new(-0.2 + 0.1 * i as f64, 0.05 * i as f64, 0.0))
            .collect();
        let image: Vec<_> = world.iter().map(|p| project(&truth, p).unwrap()).collect();
        let corr = Correspondences::new(&world, &image).unwrap();
        let gn = GaussNewton::default();
        let lin = gn.linearize(&corr, &truth).unwrap();
        match gn.solve_twist(&lin) {
            Err(PoseError::IllConditionedJacobian { rank }) => assert!(rank < 6),
            other => panic!("expected a rank deficient jacobian, got {:?}", other),
        }
    }

    #[test]
    fn overflowing_jacobian_is_rejected_before_svd() {
        // x is finite but x * x overflows in the interaction matrix.
        let world = [
            Point3::new(1e160, 0.0, 0.0),
            Point3::new(0.4, -0.2, 0.0),
            Point3::new(0.2, 0.2, 0.0),
            Point3::new(-0.2, 0.2, 0.0),
        ];
        let image = [Point2::origin(); 4];
        let corr = Correspondences::new(&world, &image).unwrap();
        let pose = from_translation_rxyz([0.0, 0.0, 1.0], [0.0, 0.0, 0.0]);
        let gn = GaussNewton::default();
        let lin = gn.linearize(&corr, &pose).unwrap();
        assert!(matches!(
            gn.solve_twist(&lin),
            Err(PoseError::NonFiniteJacobian { index: 0 })
        ));
        assert!(matches!(
            gn.step(&corr, &pose),
            Err(PoseError::NonFiniteJacobian { index: 0 })
        ));
    }

    #[test]
    fn inconsistent_linearization_is_rejected() {
        let (corr, _, initial) = scenario();
        let gn = GaussNewton::default();
        let mut lin = gn.linearize(&corr, &initial).unwrap();
        lin.residual = DVector::zeros(6);
        assert!(matches!(
            gn.solve_twist(&lin),
            Err(PoseError::MismatchedArrayLengths { left_len: 8, right_len: 6, .. })
        ));
    }

    #[test]
    fn svd_iteration_budget_is_reported() {
        let (corr, _, initial) = scenario();
        let params = GaussNewtonParams {
            max_svd_iterations: 1,
            ..Default::default()
        };
        let gn = GaussNewton::new(params).unwrap();
        let lin = gn.linearize(&corr, &initial).unwrap();
        assert!(matches!(gn.solve_twist(&lin), Err(PoseError::SvdFailed(_))));
    }

    #[test]
    fn overflowing_update_is_reported() {
        let (corr, _, initial) = scenario();
        // Finite residuals and Jacobian, but the scaled twist overflows.
        let far: Vec<_> = corr.image().iter().map(|_| Point2::new(1e300, 1e300)).collect();
        let corr = Correspondences::new(corr.world(), &far).unwrap();
        let params = GaussNewtonParams {
            gain: 1e300,
            ..Default::default()
        };
        let err = GaussNewton::new(params).unwrap().step(&corr, &initial).unwrap_err();
        assert!(matches!(err, PoseError::NonFiniteUpdate), "{:?}", err);
    }

    #[test]
    fn step_at_fixed_point_keeps_pose() {
        let (corr, truth, _) = scenario();
        let step = GaussNewton::default().step(&corr, &truth).unwrap();
        assert!(step.twist.norm() < 1e-12);
        assert_relative_eq!(step.pose, truth, epsilon = 1e-12);
    }

    #[test]
    fn step_reduces_residual() {
        let (corr, _, initial) = scenario();
        let gn = GaussNewton::default();
        let first = gn.step(&corr, &initial).unwrap();
        let second = gn.step(&corr, &first.pose).unwrap();
        assert!(second.residual < first.residual);
    }

    #[test]
    fn estimate_recovers_ground_truth() {
        let (corr, truth, initial) = scenario();
        let estimate = estimate(&corr, &initial).unwrap();
        assert!(estimate.iterations < 100);
        assert!(estimate.pose.rotation.angle_to(&truth.rotation) < 1e-6);
        let dt: Vector3<f64> = estimate.pose.translation.vector - truth.translation.vector;
        assert!(dt.norm() < 1e-6);
    }

    #[test]
    fn larger_gain_needs_fewer_iterations() {
        let (corr, _, initial) = scenario();
        let slow = estimate(&corr, &initial).unwrap();
        let params = GaussNewtonParams {
            gain: 0.5,
            ..Default::default()
        };
        let fast = GaussNewton::new(params).unwrap().estimate(&corr, &initial).unwrap();
        assert!(fast.iterations < slow.iterations);
        assert!(2 * fast.iterations < slow.iterations + 10);
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let (corr, _, initial) = scenario();
        let params = GaussNewtonParams {
            max_iterations: 3,
            ..Default::default()
        };
        let err = GaussNewton::new(params).unwrap().estimate(&corr, &initial).unwrap_err();
        match err {
            PoseError::NonConvergence { iterations, residual } => {
                assert_eq!(iterations, 3);
                assert!(residual > 0.0);
            }
            other => panic!("expected non convergence, got {:?}", other),
        }
    }

    #[test]
    fn params_validation() {
        assert!(GaussNewtonParams::default().validate().is_ok());
        let bad = [
            GaussNewtonParams { gain: 0.0, ..Default::default() },
            GaussNewtonParams { gain: f64::NAN, ..Default::default() },
            GaussNewtonParams { tolerance: -1.0, ..Default::default() },
            GaussNewtonParams { relative_tolerance: f64::NAN, ..Default::default() },
            GaussNewtonParams { max_iterations: 0, ..Default::default() },
            GaussNewtonParams { min_depth: -1e-3, ..Default::default() },
            GaussNewtonParams { rank_tolerance: 1.0, ..Default::default() },
            GaussNewtonParams { max_svd_iterations: 0, ..Default::default() },
        ];
        for params in bad.iter() {
            assert!(matches!(
                GaussNewton::new(params.clone()),
                Err(PoseError::InvalidParams(_))
            ));
        }
    }
}
