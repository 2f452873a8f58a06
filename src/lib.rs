#![warn(missing_docs)]

//! This package refines the pose of a calibrated camera
//! given a set of 3D points and their corresponding normalized image coordinates.
//!
//! This problem is generally known as ["Perspective-n-Point" (PnP)][pnp].
//! Starting from an initial guess, the pose is refined by Gauss-Newton iterations
//! on the group of rigid transforms SE(3): the update is computed with the
//! pseudo-inverse of the stacked interaction matrices and applied through
//! the exponential map, so the rotation stays orthonormal by construction.
//! At least four non-collinear correspondences are required.
//!
//! ```
//! use gn_pnp::{gauss_newton, pose, Correspondences};
//! use nalgebra::Point3;
//!
//! let world = [
//!     Point3::new(-0.2, -0.2, 0.0),
//!     Point3::new(0.4, -0.2, 0.0),
//!     Point3::new(0.2, 0.2, 0.0),
//!     Point3::new(-0.2, 0.2, 0.0),
//! ];
//! let truth = pose::from_translation_rxyz([-0.1, 0.1, 0.5], [0.087, 0.0, 0.785]);
//! let image: Vec<_> = world
//!     .iter()
//!     .map(|p| pose::project(&truth, p))
//!     .collect::<Result<_, _>>()?;
//!
//! let correspondences = Correspondences::new(&world, &image)?;
//! let initial = pose::from_translation_rxyz([-0.05, 0.05, 0.45], [0.017, 0.0, 0.611]);
//! let estimate = gauss_newton::estimate(&correspondences, &initial)?;
//! assert!(estimate.pose.rotation.angle_to(&truth.rotation) < 1e-6);
//! # Ok::<(), gn_pnp::PoseError>(())
//! ```
//!
//! [pnp]: https://en.wikipedia.org/wiki/Perspective-n-Point

pub mod correspondences;
pub mod error;
pub mod gauss_newton;
pub mod pose;
pub mod se3;

pub use correspondences::{Correspondences, Sample, MIN_CORRESPONDENCES};
pub use error::PoseError;
pub use gauss_newton::{estimate, reprojection_error, Estimate, GaussNewton, GaussNewtonParams};
