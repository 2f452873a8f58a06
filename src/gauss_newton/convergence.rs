// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::GaussNewtonParams;

/// State of a Gauss-Newton run as seen by the [`ConvergenceMonitor`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConvergenceState {
    /// The residual still changes, another iteration is needed.
    Iterating,
    /// The residual stopped changing. Terminal.
    Converged,
}

/// Tracks the sum of squared residuals across iterations
/// and decides when the iteration stops.
///
/// The first observation never converges: there is no previous value
/// to compare with until one full iteration has run.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    tolerance: f64,
    relative_tolerance: f64,
    previous: Option<f64>,
    state: ConvergenceState,
}

impl ConvergenceMonitor {
    /// Monitor with explicit absolute and relative tolerances on the change of residual.
    /// Both set to zero means stopping only once two consecutive residuals are equal.
    pub fn new(tolerance: f64, relative_tolerance: f64) -> Self {
        Self {
            tolerance,
            relative_tolerance,
            previous: None,
            state: ConvergenceState::Iterating,
        }
    }

    /// Monitor configured from the solver parameters.
    pub fn from_params(params: &GaussNewtonParams) -> Self {
        Self::new(params.tolerance, params.relative_tolerance)
    }

    /// Feed the residual of the latest iteration and get the new state.
    /// Once converged, further observations are ignored.
    pub fn observe(&mut self, current: f64) -> ConvergenceState {
        if self.state == ConvergenceState::Converged {
            return self.state;
        }
        if let Some(previous) = self.previous {
            let change = (current - previous).abs();
            if change <= self.tolerance || change <= self.relative_tolerance * previous {
                self.state = ConvergenceState::Converged;
                return self.state;
            }
        }
        self.previous = Some(current);
        self.state
    }

    /// Current state.
    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    /// Residual of the last iteration that did not stop the run, if any.
    pub fn previous(&self) -> Option<f64> {
        self.previous
    }
}
