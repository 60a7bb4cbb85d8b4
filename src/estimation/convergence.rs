//! # Convergence policy of the batch estimation
//!
//! [`EstimationConvergenceChecker`] decides, after each iteration, whether the least-squares loop
//! stops and with which [`EstimationStatus`].
//!
//! ## Rules (evaluated in this order)
//!
//! 1. **Converged** if the residual rms is exactly zero or below `minimum_residual`.
//! 2. **Converged** if `parameter_update_tolerance > 0` and the relative parameter update is
//!    below it.
//! 3. **Converged** if `minimum_residual_change > 0` and the relative change of the rms with
//!    respect to the previous iteration is below it.
//! 4. **Stalled** if the best rms is `number_of_iterations_without_improvement` iterations old.
//! 5. **MaximumIterationsReached** once `maximum_iterations` iterations have been performed.
//!
//! Otherwise the loop continues.
//!
//! ## Defaults
//!
//! | Field                                       | Default |
//! |---------------------------------------------|---------|
//! | `maximum_iterations`                        | 5       |
//! | `minimum_residual_change`                   | 0.0     |
//! | `minimum_residual`                          | 0.0     |
//! | `number_of_iterations_without_improvement`  | 2       |
//! | `parameter_update_tolerance`                | 0.0     |

use std::{cmp::Ordering, fmt};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::od_errors::OdError;

use super::output::EstimationStatus;

/// Stopping policy of the estimation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationConvergenceChecker {
    pub maximum_iterations: usize,
    pub minimum_residual_change: f64,
    pub minimum_residual: f64,
    pub number_of_iterations_without_improvement: usize,
    pub parameter_update_tolerance: f64,
}

impl Default for EstimationConvergenceChecker {
    fn default() -> Self {
        EstimationConvergenceChecker {
            maximum_iterations: 5,
            minimum_residual_change: 0.0,
            minimum_residual: 0.0,
            number_of_iterations_without_improvement: 2,
            parameter_update_tolerance: 0.0,
        }
    }
}

impl EstimationConvergenceChecker {
    pub fn builder() -> EstimationConvergenceCheckerBuilder {
        EstimationConvergenceCheckerBuilder::new()
    }

    /// Decide whether the loop stops after the latest iteration.
    ///
    /// Arguments
    /// ---------
    /// * `rms_history`: residual rms of every iteration performed so far
    /// * `relative_update`: largest `|Δp_i| / max(|p_i|, 1)` of the latest parameter update
    ///
    /// Return
    /// ------
    /// * `None` to keep iterating, the final status otherwise
    pub fn check(&self, rms_history: &[f64], relative_update: f64) -> Option<EstimationStatus> {
        let current = *rms_history.last()?;

        if current == 0.0 || current < self.minimum_residual {
            return Some(EstimationStatus::Converged);
        }
        if self.parameter_update_tolerance > 0.0 && relative_update < self.parameter_update_tolerance
        {
            return Some(EstimationStatus::Converged);
        }
        if self.minimum_residual_change > 0.0 && rms_history.len() >= 2 {
            let previous = rms_history[rms_history.len() - 2];
            if (previous - current).abs() / current < self.minimum_residual_change {
                return Some(EstimationStatus::Converged);
            }
        }

        let best = rms_history
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
            .map_or(0, |(index, _)| index);
        if rms_history.len() - 1 - best >= self.number_of_iterations_without_improvement {
            warn!(
                "No rms improvement over the last {} iterations, stopping",
                self.number_of_iterations_without_improvement
            );
            return Some(EstimationStatus::Stalled);
        }

        if rms_history.len() >= self.maximum_iterations {
            return Some(EstimationStatus::MaximumIterationsReached);
        }
        None
    }
}

/// Builder for [`EstimationConvergenceChecker`], with validation.
#[derive(Debug, Clone, Default)]
pub struct EstimationConvergenceCheckerBuilder {
    checker: EstimationConvergenceChecker,
}

impl EstimationConvergenceCheckerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maximum_iterations(mut self, v: usize) -> Self {
        self.checker.maximum_iterations = v;
        self
    }
    pub fn minimum_residual_change(mut self, v: f64) -> Self {
        self.checker.minimum_residual_change = v;
        self
    }
    pub fn minimum_residual(mut self, v: f64) -> Self {
        self.checker.minimum_residual = v;
        self
    }
    pub fn number_of_iterations_without_improvement(mut self, v: usize) -> Self {
        self.checker.number_of_iterations_without_improvement = v;
        self
    }
    pub fn parameter_update_tolerance(mut self, v: f64) -> Self {
        self.checker.parameter_update_tolerance = v;
        self
    }

    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(
            x.partial_cmp(&0.0),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ) && x.is_finite()
    }

    /// Validate and return the checker.
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidConvergenceParameter`] for a zero iteration count or a negative /
    ///   non-finite threshold.
    pub fn build(self) -> Result<EstimationConvergenceChecker, OdError> {
        let c = &self.checker;

        if c.maximum_iterations == 0 {
            return Err(OdError::InvalidConvergenceParameter(
                "maximum_iterations must be >= 1".into(),
            ));
        }
        if c.number_of_iterations_without_improvement == 0 {
            return Err(OdError::InvalidConvergenceParameter(
                "number_of_iterations_without_improvement must be >= 1".into(),
            ));
        }
        if !Self::ge0(c.minimum_residual_change) {
            return Err(OdError::InvalidConvergenceParameter(
                "minimum_residual_change must be finite and >= 0".into(),
            ));
        }
        if !Self::ge0(c.minimum_residual) {
            return Err(OdError::InvalidConvergenceParameter(
                "minimum_residual must be finite and >= 0".into(),
            ));
        }
        if !Self::ge0(c.parameter_update_tolerance) {
            return Err(OdError::InvalidConvergenceParameter(
                "parameter_update_tolerance must be finite and >= 0".into(),
            ));
        }

        Ok(self.checker)
    }
}

impl fmt::Display for EstimationConvergenceChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 48;
            writeln!(f, "Estimation Convergence Checker")?;
            writeln!(f, "------------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            line!(
                "maximum_iterations                       = {}",
                self.maximum_iterations,
                "Hard cap on iterations"
            )?;
            line!(
                "minimum_residual_change                  = {:.1e}",
                self.minimum_residual_change,
                "Relative rms change (0 = off)"
            )?;
            line!(
                "minimum_residual                         = {:.1e}",
                self.minimum_residual,
                "Absolute rms target (0 = off)"
            )?;
            line!(
                "number_of_iterations_without_improvement = {}",
                self.number_of_iterations_without_improvement,
                "Stall detection window"
            )?;
            line!(
                "parameter_update_tolerance               = {:.1e}",
                self.parameter_update_tolerance,
                "Relative update (0 = off)"
            )
        } else {
            write!(
                f,
                "EstimationConvergenceChecker(max_it={}, min_rms_change={:.1e}, min_rms={:.1e}, no_improvement={}, update_tol={:.1e})",
                self.maximum_iterations,
                self.minimum_residual_change,
                self.minimum_residual,
                self.number_of_iterations_without_improvement,
                self.parameter_update_tolerance
            )
        }
    }
}
