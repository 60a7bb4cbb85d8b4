//! Linear time-invariant dynamics `ẋ = A x + B p`.

use nalgebra::DVector;

use crate::{
    constants::{Epoch, Matrix, StateVector},
    od_errors::OdError,
    parameters::EstimatableParameterId,
};

use super::DynamicalModel;

/// Linear dynamics with constant system matrix `A` and input matrix `B`.
///
/// Every column of `B` is driven by one scalar [`EstimatableParameterId::ModelConstant`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinearDynamics {
    a: Matrix,
    b: Matrix,
    parameter_names: Vec<String>,
    nominal_parameters: DVector<f64>,
}

impl LinearDynamics {
    /// Autonomous system `ẋ = A x`.
    ///
    /// Errors
    /// ------
    /// * [`OdError::DimensionMismatch`] if `a` is not square.
    pub fn new(a: Matrix) -> Result<Self, OdError> {
        if !a.is_square() {
            return Err(OdError::dimension("linear system matrix columns", a.nrows(), a.ncols()));
        }
        let n = a.nrows();
        Ok(LinearDynamics {
            a,
            b: Matrix::zeros(n, 0),
            parameter_names: Vec::new(),
            nominal_parameters: DVector::zeros(0),
        })
    }

    /// Add the forcing term `B p`.
    ///
    /// Arguments
    /// ---------
    /// * `b`: input matrix, `state_size × names.len()`
    /// * `names`: name of each scalar parameter
    /// * `nominal`: nominal parameter values
    pub fn with_parameters(
        mut self,
        b: Matrix,
        names: Vec<String>,
        nominal: DVector<f64>,
    ) -> Result<Self, OdError> {
        if b.nrows() != self.a.nrows() {
            return Err(OdError::dimension("linear input matrix rows", self.a.nrows(), b.nrows()));
        }
        if b.ncols() != names.len() {
            return Err(OdError::dimension("linear parameter names", b.ncols(), names.len()));
        }
        if nominal.len() != names.len() {
            return Err(OdError::dimension("linear nominal parameters", names.len(), nominal.len()));
        }
        self.b = b;
        self.parameter_names = names;
        self.nominal_parameters = nominal;
        Ok(self)
    }
}

impl DynamicalModel for LinearDynamics {
    fn state_size(&self) -> usize {
        self.a.nrows()
    }

    fn parameter_ids(&self) -> Vec<EstimatableParameterId> {
        self.parameter_names
            .iter()
            .map(|name| EstimatableParameterId::ModelConstant { name: name.clone() })
            .collect()
    }

    fn parameter_size(&self) -> usize {
        self.parameter_names.len()
    }

    fn default_parameter_values(&self) -> Result<DVector<f64>, OdError> {
        Ok(self.nominal_parameters.clone())
    }

    fn compute_state_derivative(
        &self,
        _epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<StateVector, OdError> {
        if state.len() != self.a.nrows() {
            return Err(OdError::dimension("linear state", self.a.nrows(), state.len()));
        }
        if parameters.len() != self.b.ncols() {
            return Err(OdError::dimension("linear parameters", self.b.ncols(), parameters.len()));
        }
        Ok(&self.a * state + &self.b * parameters)
    }

    fn jacobian_wrt_state(
        &self,
        _epoch: Epoch,
        _state: &StateVector,
        _parameters: &DVector<f64>,
    ) -> Result<Matrix, OdError> {
        Ok(self.a.clone())
    }

    fn jacobian_wrt_parameters(
        &self,
        _epoch: Epoch,
        _state: &StateVector,
        _parameters: &DVector<f64>,
    ) -> Result<Matrix, OdError> {
        Ok(self.b.clone())
    }
}
