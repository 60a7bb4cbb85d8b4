//! # Dynamical models
//!
//! The [`DynamicalModel`] trait is the seam between the propagators and the physics: it supplies
//! the state derivative `f(t, x, p)`, its Jacobians `A = ∂f/∂x` and `B = ∂f/∂p`, the identifiers
//! of the non-state parameters `p`, and optional dependent variables.
//!
//! ## Built-in models
//!
//! - [`TranslationalDynamics`](acceleration::TranslationalDynamics) – Cartesian motion of one
//!   body about a central body, with point-mass and constant empirical accelerations.
//! - [`LinearDynamics`](linear::LinearDynamics) – `ẋ = A x + B p`, mostly used for synthetic
//!   estimation problems.
//!
//! ## Parameter vector
//!
//! `parameters` always holds the **non-state** parameter values, in the order of
//! [`DynamicalModel::parameter_ids`]. Initial-state parameters are carried by the propagator
//! settings instead.

pub mod acceleration;
pub mod linear;

use std::fmt;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Epoch, Matrix, StateVector},
    od_errors::OdError,
    parameters::EstimatableParameterId,
    propagation::history::StateHistory,
};

/// Scalar quantity recorded alongside the state during propagation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependentVariable {
    /// Distance between the propagated body and `relative_to`.
    RelativeDistance { body: String, relative_to: String },
    /// Speed of the propagated body with respect to `relative_to`.
    RelativeSpeed { body: String, relative_to: String },
    /// Norm of the total acceleration acting on `body`.
    TotalAccelerationNorm { body: String },
}

impl fmt::Display for DependentVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependentVariable::RelativeDistance { body, relative_to } => {
                write!(f, "relative distance of {body} w.r.t. {relative_to}")
            }
            DependentVariable::RelativeSpeed { body, relative_to } => {
                write!(f, "relative speed of {body} w.r.t. {relative_to}")
            }
            DependentVariable::TotalAccelerationNorm { body } => {
                write!(f, "total acceleration norm of {body}")
            }
        }
    }
}

/// Equations of motion of a propagated system.
pub trait DynamicalModel {
    /// Dimension of the propagated state.
    fn state_size(&self) -> usize;

    /// Identifiers of the non-state parameters the model depends on.
    fn parameter_ids(&self) -> Vec<EstimatableParameterId> {
        Vec::new()
    }

    /// Number of non-state parameter entries.
    fn parameter_size(&self) -> usize {
        self.parameter_ids().iter().map(EstimatableParameterId::size).sum()
    }

    /// Nominal values of the non-state parameters.
    ///
    /// Errors
    /// ------
    /// * Any error raised while reading the nominal values from the model's environment.
    fn default_parameter_values(&self) -> Result<DVector<f64>, OdError> {
        Ok(DVector::zeros(self.parameter_size()))
    }

    /// State derivative `f(t, x, p)`.
    fn compute_state_derivative(
        &self,
        epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<StateVector, OdError>;

    /// `∂f/∂x`, square of dimension [`state_size`](Self::state_size).
    fn jacobian_wrt_state(
        &self,
        epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<Matrix, OdError>;

    /// `∂f/∂p`, `state_size × parameter_size`.
    fn jacobian_wrt_parameters(
        &self,
        _epoch: Epoch,
        _state: &StateVector,
        _parameters: &DVector<f64>,
    ) -> Result<Matrix, OdError> {
        Ok(Matrix::zeros(self.state_size(), self.parameter_size()))
    }

    /// Identifiers of the dependent variables, in the order of
    /// [`dependent_variables`](Self::dependent_variables).
    fn dependent_variable_ids(&self) -> Vec<DependentVariable> {
        Vec::new()
    }

    /// Dependent variables at `(epoch, state)`, `None` if the model records none.
    fn dependent_variables(
        &self,
        _epoch: Epoch,
        _state: &StateVector,
        _parameters: &DVector<f64>,
    ) -> Result<Option<DVector<f64>>, OdError> {
        Ok(None)
    }

    /// Conversion from the integrated representation to the processed (output) one.
    fn convert_to_output_representation(
        &self,
        _epoch: Epoch,
        state: &StateVector,
    ) -> Result<StateVector, OdError> {
        Ok(state.clone())
    }

    /// Receive the processed state history at the end of a propagation.
    fn set_integrated_result(&mut self, _processed_states: &StateHistory) -> Result<(), OdError> {
        Ok(())
    }
}

/// Right-hand side of the variational equations, `[vec(AΦ); vec(AS + B)]`, for a flattened
/// `[vec Φ; vec S]` (column-major).
pub(crate) fn variational_derivative<M: DynamicalModel + ?Sized>(
    model: &M,
    epoch: Epoch,
    state: &StateVector,
    parameters: &DVector<f64>,
    variational: &[f64],
) -> Result<DVector<f64>, OdError> {
    let n = model.state_size();
    let m = parameters.len();
    if variational.len() != n * (n + m) {
        return Err(OdError::dimension(
            "variational state",
            n * (n + m),
            variational.len(),
        ));
    }

    let a = model.jacobian_wrt_state(epoch, state, parameters)?;
    if a.shape() != (n, n) {
        return Err(OdError::dimension("state Jacobian rows × columns", n * n, a.len()));
    }
    let phi = Matrix::from_column_slice(n, n, &variational[..n * n]);
    let d_phi = &a * phi;

    let mut derivative = DVector::zeros(n * (n + m));
    derivative.as_mut_slice()[..n * n].copy_from_slice(d_phi.as_slice());

    if m > 0 {
        let b = model.jacobian_wrt_parameters(epoch, state, parameters)?;
        if b.shape() != (n, m) {
            return Err(OdError::dimension("parameter Jacobian rows × columns", n * m, b.len()));
        }
        let s = Matrix::from_column_slice(n, m, &variational[n * n..]);
        let d_s = &a * s + b;
        derivative.as_mut_slice()[n * n..].copy_from_slice(d_s.as_slice());
    }
    Ok(derivative)
}
