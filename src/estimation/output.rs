//! # Estimation output
//!
//! [`EstimationOutput`] is the append-only trace of a batch estimation run: one
//! [`IterationRecord`] per iteration (parameters used for the linearisation, residuals, rms and
//! the update that followed), the index of the best iteration, the final status and the
//! covariance of the best iteration.
//!
//! The covariance is the inverse of the (de-normalised) normal matrix. Formal errors are the
//! square roots of its diagonal and the correlation matrix is the covariance scaled by them.

use std::fmt;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::{constants::Matrix, propagation::history::StateHistory};

/// Final status of an estimation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimationStatus {
    Converged,
    MaximumIterationsReached,
    /// No rms improvement over the configured number of iterations.
    Stalled,
    /// Non-finite residuals or update, or a failed propagation.
    Diverged,
}

impl EstimationStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, EstimationStatus::Converged)
    }
}

impl fmt::Display for EstimationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EstimationStatus::Converged => "converged",
            EstimationStatus::MaximumIterationsReached => "maximum iterations reached",
            EstimationStatus::Stalled => "stalled",
            EstimationStatus::Diverged => "diverged",
        };
        write!(f, "{s}")
    }
}

/// One iteration of the least-squares loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Parameters around which the problem was linearised.
    pub parameters: DVector<f64>,
    /// `observed - computed`, in collection order.
    pub residuals: DVector<f64>,
    pub rms: f64,
    /// Update computed from this iteration, `None` if the run stopped before solving.
    pub update: Option<DVector<f64>>,
    pub design_matrix: Option<Matrix>,
    pub state_history: Option<StateHistory>,
}

/// Complete trace of an estimation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationOutput {
    pub iterations: Vec<IterationRecord>,
    pub best_iteration: Option<usize>,
    pub status: EstimationStatus,
    /// Covariance of the best iteration.
    pub covariance: Option<Matrix>,
    pub parameter_descriptions: Vec<String>,
    /// Parameter vector the manager was reset to at the end of the run.
    pub final_parameters: DVector<f64>,
}

impl EstimationOutput {
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }

    pub fn number_of_iterations(&self) -> usize {
        self.iterations.len()
    }

    pub fn rms_history(&self) -> Vec<f64> {
        self.iterations.iter().map(|record| record.rms).collect()
    }

    pub fn parameter_history(&self) -> Vec<&DVector<f64>> {
        self.iterations.iter().map(|record| &record.parameters).collect()
    }

    /// Parameters of the lowest-rms iteration.
    pub fn best_parameters(&self) -> Option<&DVector<f64>> {
        self.best_iteration
            .and_then(|index| self.iterations.get(index))
            .map(|record| &record.parameters)
    }

    /// Residuals of the lowest-rms iteration.
    pub fn best_residuals(&self) -> Option<&DVector<f64>> {
        self.best_iteration
            .and_then(|index| self.iterations.get(index))
            .map(|record| &record.residuals)
    }

    /// `sqrt(diag(P))`
    pub fn formal_errors(&self) -> Option<DVector<f64>> {
        self.covariance
            .as_ref()
            .map(|p| p.diagonal().map(|v| v.max(0.0).sqrt()))
    }

    /// `P_ij / (σ_i σ_j)`, with zero where a formal error vanishes.
    pub fn correlations(&self) -> Option<Matrix> {
        let p = self.covariance.as_ref()?;
        let sigma = self.formal_errors()?;
        Some(Matrix::from_fn(p.nrows(), p.ncols(), |i, j| {
            let scale = sigma[i] * sigma[j];
            if scale > 0.0 {
                p[(i, j)] / scale
            } else {
                0.0
            }
        }))
    }
}

impl fmt::Display for EstimationOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let best_rms = self
            .best_iteration
            .and_then(|index| self.iterations.get(index))
            .map(|record| record.rms);
        if !f.alternate() {
            return match best_rms {
                Some(rms) => write!(
                    f,
                    "EstimationOutput(status={}, iterations={}, best_rms={rms:.6e})",
                    self.status,
                    self.iterations.len()
                ),
                None => write!(
                    f,
                    "EstimationOutput(status={}, iterations={})",
                    self.status,
                    self.iterations.len()
                ),
            };
        }

        writeln!(f, "Estimation Output")?;
        writeln!(f, "-----------------")?;
        writeln!(f, "  status      : {}", self.status)?;
        writeln!(f, "  iterations  : {}", self.iterations.len())?;
        for record in &self.iterations {
            let marker = if Some(record.iteration) == self.best_iteration {
                " (best)"
            } else {
                ""
            };
            writeln!(f, "    #{:<3} rms = {:.6e}{marker}", record.iteration, record.rms)?;
        }

        let errors = self.formal_errors();
        writeln!(f, "  parameters  :")?;
        for (i, value) in self.final_parameters.iter().enumerate() {
            let name = self
                .parameter_descriptions
                .get(i)
                .map_or("?", String::as_str);
            match &errors {
                Some(sigma) => writeln!(f, "    {name:<40} = {value:>+.12e} ± {:.3e}", sigma[i])?,
                None => writeln!(f, "    {name:<40} = {value:>+.12e}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod output_test {
    use super::*;
    use approx::assert_relative_eq;

    fn record(iteration: usize, rms: f64) -> IterationRecord {
        IterationRecord {
            iteration,
            parameters: DVector::from_element(2, iteration as f64),
            residuals: DVector::from_element(3, rms),
            rms,
            update: None,
            design_matrix: None,
            state_history: None,
        }
    }

    fn output() -> EstimationOutput {
        EstimationOutput {
            iterations: vec![record(0, 3.0), record(1, 0.5), record(2, 0.7)],
            best_iteration: Some(1),
            status: EstimationStatus::Stalled,
            covariance: Some(Matrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 9.0])),
            parameter_descriptions: vec!["a".into(), "b".into()],
            final_parameters: DVector::from_element(2, 1.0),
        }
    }

    #[test]
    fn test_accessors() {
        let out = output();
        assert_eq!(out.rms_history(), vec![3.0, 0.5, 0.7]);
        assert_eq!(out.best_parameters(), Some(&DVector::from_element(2, 1.0)));
        assert_eq!(out.number_of_iterations(), 3);
        assert!(!out.is_converged());

        let sigma = out.formal_errors().unwrap();
        assert_relative_eq!(sigma[0], 2.0);
        assert_relative_eq!(sigma[1], 3.0);

        let rho = out.correlations().unwrap();
        assert_relative_eq!(rho[(0, 0)], 1.0);
        assert_relative_eq!(rho[(0, 1)], 1.0 / 6.0);
    }

    #[test]
    fn test_display() {
        let out = output();
        assert_eq!(
            format!("{out}"),
            "EstimationOutput(status=stalled, iterations=3, best_rms=5.000000e-1)"
        );
        let pretty = format!("{out:#}");
        assert!(pretty.contains("#1   rms = 5.000000e-1 (best)"));
        assert!(pretty.contains("± 3.000e0"));
    }

    #[test]
    fn test_serde_round_trip() {
        let out = output();
        let json = serde_json::to_string(&out).unwrap();
        let back: EstimationOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, out);
    }
}
