//! # Variational equations propagator
//!
//! Propagation of the dynamics together with their first-order sensitivities:
//!
//! ```text
//! ẋ = f(t, x, p)
//! Φ̇ = A(t) Φ,          Φ(t0) = I       (state transition matrix, n × n)
//! Ṡ = A(t) S + B(t),   S(t0) = 0       (sensitivity matrix, n × m)
//! ```
//!
//! where `A = ∂f/∂x`, `B = ∂f/∂p`, `n` is the state size and `m` the number of non-state
//! parameters.
//!
//! ## Integration modes
//!
//! * **Concurrent** – the augmented vector `[x; vec Φ; vec S]` (column-major) is integrated as
//!   one system, so dynamics and variational histories share their epochs.
//! * **Sequential** – the dynamics are integrated first; the variational equations are then
//!   integrated on their own, with `x(t)` taken from a cubic Hermite interpolation of the stored
//!   dynamics (state plus model derivative at every node). A dedicated
//!   `variational_only_integrator_settings` may be used for that second pass.
//!
//! Both modes produce numerically equivalent, not bit-identical, results.
//!
//! ## Outputs
//!
//! After each full integration a [`StateTransitionInterface`] is built from the histories, before
//! any clearing, so that Φ, S and the state can be evaluated at arbitrary epochs of the arc.
//!
//! ## See also
//! * [`DynamicsPropagator`] – the underlying dynamics propagator, exposed through
//!   [`VariationalEquationsPropagator::dynamics_simulator`].
//! * [`OrbitDeterminationManager`](crate::estimation::manager::OrbitDeterminationManager) – the
//!   main consumer of the interface.

use std::fmt;

use log::debug;
use nalgebra::DVector;

use crate::{
    constants::{Epoch, Matrix, StateVector},
    dynamics::{variational_derivative, DynamicalModel},
    integrator::IntegratorSettings,
    od_errors::OdError,
    parameters::EstimatableParameterSet,
};

use super::{
    arc::ArcDriver,
    dynamics::DynamicsPropagator,
    history::{HermiteHistory, StateHistory, TimeHistory},
    PropagationOptions, PropagatorSettings, TerminationReason, TerminationSettings,
};

/// Construction flags and tuning of the [`VariationalEquationsPropagator`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariationalSolverOptions {
    /// Integrate `[x; Φ; S]` as one system instead of dynamics first, variational second.
    pub integrate_equations_concurrently: bool,
    /// Propagate in the constructor.
    pub integrate_on_creation: bool,
    /// Drop the histories once the interpolating interface has been built.
    pub clear_numerical_solutions: bool,
    /// Hand the processed states to the model after each run.
    pub set_integrated_result: bool,
    /// Integrator for the variational pass of the sequential mode. Defaults to the dynamics
    /// integrator.
    pub variational_only_integrator_settings: Option<IntegratorSettings>,
}

impl Default for VariationalSolverOptions {
    fn default() -> Self {
        VariationalSolverOptions {
            integrate_equations_concurrently: true,
            integrate_on_creation: true,
            clear_numerical_solutions: false,
            set_integrated_result: false,
            variational_only_integrator_settings: None,
        }
    }
}

impl VariationalSolverOptions {
    pub fn builder() -> VariationalSolverOptionsBuilder {
        VariationalSolverOptionsBuilder::new()
    }
}

/// Builder for [`VariationalSolverOptions`], with validation.
#[derive(Debug, Clone, Default)]
pub struct VariationalSolverOptionsBuilder {
    options: VariationalSolverOptions,
}

impl VariationalSolverOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integrate_equations_concurrently(mut self, v: bool) -> Self {
        self.options.integrate_equations_concurrently = v;
        self
    }
    pub fn integrate_on_creation(mut self, v: bool) -> Self {
        self.options.integrate_on_creation = v;
        self
    }
    pub fn clear_numerical_solutions(mut self, v: bool) -> Self {
        self.options.clear_numerical_solutions = v;
        self
    }
    pub fn set_integrated_result(mut self, v: bool) -> Self {
        self.options.set_integrated_result = v;
        self
    }
    pub fn variational_only_integrator_settings(mut self, v: IntegratorSettings) -> Self {
        self.options.variational_only_integrator_settings = Some(v);
        self
    }

    /// Finalize the options.
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidIntegratorSettings`] if the variational-only integrator settings
    ///   are invalid.
    pub fn build(self) -> Result<VariationalSolverOptions, OdError> {
        if let Some(settings) = &self.options.variational_only_integrator_settings {
            settings.validate()?;
        }
        Ok(self.options)
    }
}

impl fmt::Display for VariationalSolverOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VariationalSolverOptions(concurrent={}, on_creation={}, clear={}, set_result={}",
            self.integrate_equations_concurrently,
            self.integrate_on_creation,
            self.clear_numerical_solutions,
            self.set_integrated_result
        )?;
        match &self.variational_only_integrator_settings {
            Some(settings) => write!(f, ", variational integrator={settings})"),
            None => write!(f, ")"),
        }
    }
}

/// Dense output of a variational propagation: state, Φ and S at any epoch of the arc.
#[derive(Debug, Clone)]
pub struct StateTransitionInterface {
    state_size: usize,
    parameter_size: usize,
    states: HermiteHistory,
    /// `[vec Φ; vec S]`, i.e. `vec([Φ | S])` in column-major order.
    variational: HermiteHistory,
}

impl StateTransitionInterface {
    /// Dimension of the propagated state.
    pub fn state_size(&self) -> usize {
        self.state_size
    }

    /// Total number of estimated parameters, state included.
    pub fn parameter_size(&self) -> usize {
        self.parameter_size
    }

    pub fn start_epoch(&self) -> Option<Epoch> {
        self.variational.start_epoch()
    }

    pub fn end_epoch(&self) -> Option<Epoch> {
        self.variational.end_epoch()
    }

    /// Interpolated propagated state.
    pub fn state(&self, epoch: Epoch) -> Result<StateVector, OdError> {
        self.states.interpolate(epoch)
    }

    /// `[Φ | S]` at `epoch`, `n × (n + m)`.
    pub fn full_state_transition_sensitivity_matrix(&self, epoch: Epoch) -> Result<Matrix, OdError> {
        let flat = self.variational.interpolate(epoch)?;
        Ok(Matrix::from_column_slice(
            self.state_size,
            self.parameter_size,
            flat.as_slice(),
        ))
    }

    /// Φ(t, t0), `n × n`.
    pub fn state_transition_matrix(&self, epoch: Epoch) -> Result<Matrix, OdError> {
        let n = self.state_size;
        let flat = self.variational.interpolate(epoch)?;
        Ok(Matrix::from_column_slice(n, n, &flat.as_slice()[..n * n]))
    }

    /// S(t), `n × m`.
    pub fn sensitivity_matrix(&self, epoch: Epoch) -> Result<Matrix, OdError> {
        let n = self.state_size;
        let flat = self.variational.interpolate(epoch)?;
        Ok(Matrix::from_column_slice(
            n,
            self.parameter_size - n,
            &flat.as_slice()[n * n..],
        ))
    }
}

/// Propagator of the dynamics and of their variational equations.
#[derive(Debug)]
pub struct VariationalEquationsPropagator<M: DynamicalModel> {
    dynamics: DynamicsPropagator<M>,
    integrator_settings: IntegratorSettings,
    parameter_set: EstimatableParameterSet,
    parameter_vector: DVector<f64>,
    options: VariationalSolverOptions,
    termination_reason: Option<TerminationReason>,
    state_transition_history: TimeHistory<Matrix>,
    sensitivity_history: TimeHistory<Matrix>,
    interface: Option<StateTransitionInterface>,
}

impl<M: DynamicalModel> VariationalEquationsPropagator<M> {
    /// Create the propagator.
    ///
    /// Arguments
    /// ---------
    /// * `model`: equations of motion with their Jacobians
    /// * `integrator_settings`: integrator of the dynamics (and of the concurrent system)
    /// * `propagator_settings`: initial epoch, nominal initial state and termination
    /// * `parameter_set`: estimated parameters; the state block must cover the whole propagated
    ///   state and the non-state block must match [`DynamicalModel::parameter_ids`]
    /// * `options`: construction flags
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidParameterSettings`] if the parameter set does not match the model.
    /// * Any error of [`DynamicsPropagator::new`] or of the initial propagation.
    pub fn new(
        model: M,
        integrator_settings: IntegratorSettings,
        propagator_settings: PropagatorSettings,
        parameter_set: EstimatableParameterSet,
        options: VariationalSolverOptions,
    ) -> Result<Self, OdError> {
        if parameter_set.state_size() != model.state_size() {
            return Err(OdError::InvalidParameterSettings(format!(
                "initial-state parameters cover {} entries but the propagated state has {}",
                parameter_set.state_size(),
                model.state_size()
            )));
        }
        if parameter_set.non_state_ids() != model.parameter_ids() {
            return Err(OdError::InvalidParameterSettings(
                "non-state parameters must match the parameters declared by the dynamical model"
                    .into(),
            ));
        }
        if let Some(settings) = &options.variational_only_integrator_settings {
            settings.validate()?;
        }

        let initial_state = propagator_settings.initial_state.clone();
        let dynamics = DynamicsPropagator::new(
            model,
            integrator_settings.clone(),
            propagator_settings,
            PropagationOptions::default().integrate_on_creation(false),
        )?;

        let mut parameter_vector = DVector::zeros(parameter_set.total_size());
        let n = initial_state.len();
        parameter_vector.rows_mut(0, n).copy_from(&initial_state);
        parameter_vector
            .rows_mut(n, parameter_set.non_state_size())
            .copy_from(dynamics.parameter_values());

        let mut propagator = VariationalEquationsPropagator {
            dynamics,
            integrator_settings,
            parameter_set,
            parameter_vector,
            options,
            termination_reason: None,
            state_transition_history: TimeHistory::new(),
            sensitivity_history: TimeHistory::new(),
            interface: None,
        };

        if propagator.options.integrate_on_creation {
            let concurrently = propagator.options.integrate_equations_concurrently;
            propagator.integrate_full_equations(&initial_state, concurrently)?;
        }
        Ok(propagator)
    }

    fn state_size(&self) -> usize {
        self.parameter_set.state_size()
    }

    fn non_state_size(&self) -> usize {
        self.parameter_set.non_state_size()
    }

    fn check_initial_states(&self, initial_states: &StateVector) -> Result<(), OdError> {
        if initial_states.len() != self.state_size() {
            return Err(OdError::dimension(
                "initial states",
                self.state_size(),
                initial_states.len(),
            ));
        }
        Ok(())
    }

    /// Integrate the dynamics and the variational equations from `initial_states`.
    ///
    /// Arguments
    /// ---------
    /// * `initial_states`: initial state, also written into the parameter vector
    /// * `integrate_concurrently`: concurrent or sequential mode
    ///
    /// Return
    /// ------
    /// * The termination reason of the arc
    pub fn integrate_full_equations(
        &mut self,
        initial_states: &StateVector,
        integrate_concurrently: bool,
    ) -> Result<TerminationReason, OdError> {
        self.check_initial_states(initial_states)?;
        let n = self.state_size();
        self.parameter_vector.rows_mut(0, n).copy_from(initial_states);
        self.dynamics.set_initial_state(initial_states.clone());
        self.reset_variational_solution();

        debug!(
            "Integrating variational equations ({} mode) for {} parameters",
            if integrate_concurrently {
                "concurrent"
            } else {
                "sequential"
            },
            self.parameter_set.total_size()
        );

        let reason = if integrate_concurrently {
            self.run_concurrent()?
        } else {
            self.run_sequential()?
        };
        self.termination_reason = Some(reason);
        self.interface = Some(self.build_interface()?);

        if self.options.set_integrated_result {
            self.dynamics.write_integrated_result()?;
        }
        if self.options.clear_numerical_solutions {
            self.dynamics.clear_numerical_solutions();
            self.state_transition_history.clear();
            self.sensitivity_history.clear();
        }
        Ok(reason)
    }

    /// Integrate the dynamics only; Φ and S histories are cleared.
    pub fn integrate_equations_of_motion_only(
        &mut self,
        initial_states: &StateVector,
    ) -> Result<TerminationReason, OdError> {
        self.check_initial_states(initial_states)?;
        let n = self.state_size();
        self.parameter_vector.rows_mut(0, n).copy_from(initial_states);
        self.reset_variational_solution();

        let reason = self.dynamics.integrate_equations_of_motion(initial_states)?;
        self.termination_reason = Some(reason);

        if self.options.set_integrated_result {
            self.dynamics.write_integrated_result()?;
        }
        if self.options.clear_numerical_solutions {
            self.dynamics.clear_numerical_solutions();
        }
        Ok(reason)
    }

    /// Set a new parameter vector `[initial state; non-state parameters]`.
    ///
    /// With `reintegrate`, the full equations are integrated again with the configured mode.
    pub fn reset_parameter_estimate(
        &mut self,
        values: &DVector<f64>,
        reintegrate: bool,
    ) -> Result<(), OdError> {
        if values.len() != self.parameter_set.total_size() {
            return Err(OdError::dimension(
                "parameter vector",
                self.parameter_set.total_size(),
                values.len(),
            ));
        }
        let n = self.state_size();
        let initial_states = values.rows(0, n).into_owned();
        self.dynamics
            .set_parameter_values(values.rows(n, self.non_state_size()).into_owned())?;
        self.dynamics.set_initial_state(initial_states.clone());
        self.parameter_vector = values.clone();

        if reintegrate {
            let concurrently = self.options.integrate_equations_concurrently;
            self.integrate_full_equations(&initial_states, concurrently)?;
        }
        Ok(())
    }

    pub fn parameter_vector(&self) -> &DVector<f64> {
        &self.parameter_vector
    }

    pub fn parameter_set(&self) -> &EstimatableParameterSet {
        &self.parameter_set
    }

    pub fn options(&self) -> &VariationalSolverOptions {
        &self.options
    }

    pub fn integrator_settings(&self) -> &IntegratorSettings {
        &self.integrator_settings
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    pub fn integration_completed_successfully(&self) -> bool {
        self.termination_reason
            .is_some_and(|reason| reason.is_success())
    }

    /// Φ(t, t0) history.
    pub fn state_transition_matrix_history(&self) -> &TimeHistory<Matrix> {
        &self.state_transition_history
    }

    /// S(t) history.
    pub fn sensitivity_matrix_history(&self) -> &TimeHistory<Matrix> {
        &self.sensitivity_history
    }

    /// Combined `[Φ | S]` history.
    pub fn variational_equations_history(&self) -> TimeHistory<Matrix> {
        let n = self.state_size();
        let m = self.non_state_size();
        let mut sensitivities = self.sensitivity_history.values().iter();
        self.state_transition_history.map(|phi| {
            let mut full = Matrix::zeros(n, n + m);
            full.view_mut((0, 0), (n, n)).copy_from(phi);
            if let Some(s) = sensitivities.next() {
                full.view_mut((0, n), (n, m)).copy_from(s);
            }
            full
        })
    }

    /// Processed state history of the dynamics.
    pub fn state_history(&self) -> &StateHistory {
        self.dynamics.state_history()
    }

    pub fn dynamics_simulator(&self) -> &DynamicsPropagator<M> {
        &self.dynamics
    }

    /// Interpolating interface built by the last full integration.
    ///
    /// Errors
    /// ------
    /// * [`OdError::NoNumericalSolution`] if the variational equations have not been integrated
    ///   since the last reset.
    pub fn state_transition_interface(&self) -> Result<&StateTransitionInterface, OdError> {
        self.interface.as_ref().ok_or_else(|| {
            OdError::NoNumericalSolution("variational equations have not been integrated".into())
        })
    }

    fn reset_variational_solution(&mut self) {
        self.state_transition_history.clear();
        self.sensitivity_history.clear();
        self.interface = None;
    }

    /// `[vec I; vec 0]`
    fn initial_variational_state(&self) -> DVector<f64> {
        let n = self.state_size();
        let mut flat = DVector::zeros(n * (n + self.non_state_size()));
        for i in 0..n {
            flat[i * n + i] = 1.0;
        }
        flat
    }

    fn record_variational(&mut self, epoch: Epoch, flat: &[f64]) -> Result<(), OdError> {
        let n = self.state_size();
        let m = self.non_state_size();
        self.state_transition_history
            .push(epoch, Matrix::from_column_slice(n, n, &flat[..n * n]))?;
        self.sensitivity_history
            .push(epoch, Matrix::from_column_slice(n, m, &flat[n * n..]))?;
        Ok(())
    }

    fn run_concurrent(&mut self) -> Result<TerminationReason, OdError> {
        let n = self.state_size();
        let settings = self.dynamics.propagator_settings().clone();
        let variational = self.initial_variational_state();

        let mut augmented = DVector::zeros(n + variational.len());
        augmented.rows_mut(0, n).copy_from(&settings.initial_state);
        augmented
            .rows_mut(n, variational.len())
            .copy_from(&variational);

        let mut driver = ArcDriver::new(
            &self.integrator_settings,
            settings.termination.clone(),
            n,
            settings.initial_epoch,
            augmented,
        )?;
        self.dynamics
            .reset_run(settings.initial_epoch, settings.initial_state.clone())?;
        self.record_variational(settings.initial_epoch, variational.as_slice())?;

        while !driver.is_terminal() {
            let accepted = {
                let model = self.dynamics.model();
                let parameters = self.dynamics.parameter_values();
                let mut derivative = |epoch: Epoch, y: &StateVector| {
                    let x = y.rows(0, n).into_owned();
                    let dx = model.compute_state_derivative(epoch, &x, parameters)?;
                    let dv = variational_derivative(model, epoch, &x, parameters, &y.as_slice()[n..])?;
                    let mut dy = DVector::zeros(y.len());
                    dy.rows_mut(0, n).copy_from(&dx);
                    dy.rows_mut(n, dv.len()).copy_from(&dv);
                    Ok(dy)
                };
                driver.advance(&mut derivative)?
            };

            if accepted {
                let epoch = driver.epoch();
                let y = driver.state().clone();
                self.dynamics.record(
                    epoch,
                    y.rows(0, n).into_owned(),
                    driver.function_evaluations(),
                    driver.elapsed(),
                )?;
                self.record_variational(epoch, &y.as_slice()[n..])?;
            }
        }

        let reason = driver.termination_reason();
        self.dynamics.finish_external_run(reason);
        reason.ok_or_else(|| OdError::NoNumericalSolution("propagation ended without a reason".into()))
    }

    /// Hermite dense output of the raw dynamics history, with the model derivative at each node.
    fn dense_states(&self) -> Result<HermiteHistory, OdError> {
        let mut dense = HermiteHistory::new();
        for (epoch, state) in self.dynamics.unprocessed_state_history().iter() {
            let derivative = self.dynamics.state_derivative(epoch, state)?;
            dense.push(epoch, state.clone(), derivative)?;
        }
        Ok(dense)
    }

    fn run_sequential(&mut self) -> Result<TerminationReason, OdError> {
        let initial_states = self.dynamics.propagator_settings().initial_state.clone();
        let dynamics_reason = self.dynamics.integrate_equations_of_motion(&initial_states)?;

        let dense = self.dense_states()?;
        let variational = self.initial_variational_state();
        let (start, end) = match (dense.start_epoch(), dense.end_epoch()) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(OdError::NoNumericalSolution(
                    "dynamics produced no state history".into(),
                ))
            }
        };
        self.record_variational(start, variational.as_slice())?;
        if end <= start {
            return Ok(dynamics_reason);
        }

        let settings = self
            .options
            .variational_only_integrator_settings
            .clone()
            .unwrap_or_else(|| self.integrator_settings.clone());
        let mut driver = ArcDriver::new(
            &settings,
            TerminationSettings::until(end),
            variational.len(),
            start,
            variational,
        )?;

        while !driver.is_terminal() {
            let accepted = {
                let model = self.dynamics.model();
                let parameters = self.dynamics.parameter_values();
                let dense = &dense;
                let mut derivative = |epoch: Epoch, v: &StateVector| {
                    let x = dense.interpolate(epoch)?;
                    variational_derivative(model, epoch, &x, parameters, v.as_slice())
                };
                driver.advance(&mut derivative)?
            };
            if accepted {
                let epoch = driver.epoch();
                let flat = driver.state().clone();
                self.record_variational(epoch, flat.as_slice())?;
            }
        }

        match driver.termination_reason() {
            Some(reason @ TerminationReason::NonFiniteState { .. }) => Ok(reason),
            _ => Ok(dynamics_reason),
        }
    }

    fn build_interface(&self) -> Result<StateTransitionInterface, OdError> {
        let states = self.dense_states()?;
        let model = self.dynamics.model();
        let parameters = self.dynamics.parameter_values();

        let mut variational = HermiteHistory::new();
        for ((epoch, phi), s) in self
            .state_transition_history
            .iter()
            .zip(self.sensitivity_history.values())
        {
            let mut flat = DVector::zeros(phi.len() + s.len());
            flat.rows_mut(0, phi.len()).copy_from_slice(phi.as_slice());
            flat.rows_mut(phi.len(), s.len()).copy_from_slice(s.as_slice());
            let x = states.interpolate(epoch)?;
            let derivative = variational_derivative(model, epoch, &x, parameters, flat.as_slice())?;
            variational.push(epoch, flat, derivative)?;
        }

        Ok(StateTransitionInterface {
            state_size: self.state_size(),
            parameter_size: self.parameter_set.total_size(),
            states,
            variational,
        })
    }
}
