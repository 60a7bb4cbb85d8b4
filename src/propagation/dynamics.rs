//! # Dynamics propagator
//!
//! Integration of the equations of motion `ẋ = f(t, x, p)` of a [`DynamicalModel`] over one arc.
//!
//! ## Overview
//!
//! [`DynamicsPropagator`] drives a [`NumericalIntegrator`](crate::integrator::NumericalIntegrator)
//! from the initial epoch until the [`TerminationSettings`](super::TerminationSettings) fire,
//! recording after every accepted step:
//!
//! - the raw state (integrated representation),
//! - the processed state (after [`DynamicalModel::convert_to_output_representation`]),
//! - the dependent variables of the model, if any,
//! - the cumulative wall-clock time and number of derivative evaluations.
//!
//! All histories are index-aligned and start with the initial epoch.
//!
//! A run can be driven in one go with [`integrate_to_termination`](DynamicsPropagator::integrate_to_termination)
//! or incrementally with [`integrate_by_step`](DynamicsPropagator::integrate_by_step). Both
//! share the same step-size controller state, so a run split in chunks reproduces the
//! uninterrupted run exactly.
//!
//! Once an arc terminates, `set_integrated_result` hands the processed states to the model and
//! `clear_numerical_solutions` then drops the histories. Any later integration call starts a
//! fresh run from the initial conditions.
//!
//! ## Example
//!
//! ```rust
//! use nalgebra::{DMatrix, DVector};
//! use odkit::dynamics::linear::LinearDynamics;
//! use odkit::integrator::IntegratorSettings;
//! use odkit::propagation::{
//!     dynamics::DynamicsPropagator, PropagationOptions, PropagatorSettings, TerminationSettings,
//! };
//!
//! let model = LinearDynamics::new(DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0])).unwrap();
//! let settings = PropagatorSettings::new(
//!     0.0,
//!     DVector::from_vec(vec![1.0, 0.0]),
//!     TerminationSettings::until(10.0),
//! );
//! let propagator = DynamicsPropagator::new(
//!     model,
//!     IntegratorSettings::RungeKutta4 { step_size: 0.01 },
//!     settings,
//!     PropagationOptions::default(),
//! )
//! .unwrap();
//!
//! assert!(propagator.integration_completed_successfully());
//! assert_eq!(propagator.state_history().last().unwrap().0, 10.0);
//! ```

use std::time::Duration;

use log::debug;
use nalgebra::DVector;

use crate::{
    constants::{Epoch, StateVector},
    dynamics::{DependentVariable, DynamicalModel},
    integrator::IntegratorSettings,
    od_errors::OdError,
};

use super::{
    arc::ArcDriver,
    history::{StateHistory, TimeHistory},
    PropagationOptions, PropagatorSettings, TerminationReason,
};

/// Propagator of the equations of motion of a [`DynamicalModel`].
#[derive(Debug)]
pub struct DynamicsPropagator<M: DynamicalModel> {
    model: M,
    integrator_settings: IntegratorSettings,
    propagator_settings: PropagatorSettings,
    options: PropagationOptions,
    /// Non-state parameter values handed to the model.
    parameters: DVector<f64>,

    driver: Option<ArcDriver>,
    concluded: bool,
    termination_reason: Option<TerminationReason>,
    current: Option<(Epoch, StateVector)>,

    raw_states: StateHistory,
    processed_states: StateHistory,
    dependent_variables: TimeHistory<DVector<f64>>,
    computation_time: TimeHistory<f64>,
    function_evaluations: TimeHistory<usize>,
}

impl<M: DynamicalModel> DynamicsPropagator<M> {
    /// Create the propagator, and propagate right away if `options.integrate_on_creation`.
    ///
    /// Arguments
    /// ---------
    /// * `model`: the equations of motion, owned by the propagator
    /// * `integrator_settings`: stepping scheme
    /// * `propagator_settings`: initial epoch, initial state and termination
    /// * `options`: construction flags
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidIntegratorSettings`] / [`OdError::InvalidTerminationSettings`] for
    ///   inconsistent settings.
    /// * [`OdError::DimensionMismatch`] if the initial state does not match the model.
    /// * Any error raised by the model during the initial propagation.
    pub fn new(
        model: M,
        integrator_settings: IntegratorSettings,
        propagator_settings: PropagatorSettings,
        options: PropagationOptions,
    ) -> Result<Self, OdError> {
        integrator_settings.validate()?;
        propagator_settings
            .termination
            .validate(propagator_settings.initial_epoch)?;
        if propagator_settings.initial_state.len() != model.state_size() {
            return Err(OdError::dimension(
                "initial state",
                model.state_size(),
                propagator_settings.initial_state.len(),
            ));
        }
        let parameters = model.default_parameter_values()?;
        if parameters.len() != model.parameter_size() {
            return Err(OdError::dimension(
                "default parameter values",
                model.parameter_size(),
                parameters.len(),
            ));
        }

        let mut propagator = DynamicsPropagator {
            model,
            integrator_settings,
            propagator_settings,
            options,
            parameters,
            driver: None,
            concluded: false,
            termination_reason: None,
            current: None,
            raw_states: StateHistory::new(),
            processed_states: StateHistory::new(),
            dependent_variables: TimeHistory::new(),
            computation_time: TimeHistory::new(),
            function_evaluations: TimeHistory::new(),
        };

        if options.integrate_on_creation {
            propagator.integrate_to_termination()?;
        }
        Ok(propagator)
    }

    /// Propagate a fresh arc from `initial_state` (at the configured initial epoch).
    pub fn integrate_equations_of_motion(
        &mut self,
        initial_state: &StateVector,
    ) -> Result<TerminationReason, OdError> {
        if initial_state.len() != self.model.state_size() {
            return Err(OdError::dimension(
                "initial state",
                self.model.state_size(),
                initial_state.len(),
            ));
        }
        self.propagator_settings.initial_state = initial_state.clone();
        self.begin_run()?;
        self.integrate_to_termination()
    }

    /// Step until a termination condition fires.
    ///
    /// Continues a run started by [`integrate_by_step`](Self::integrate_by_step), otherwise
    /// starts a fresh one.
    pub fn integrate_to_termination(&mut self) -> Result<TerminationReason, OdError> {
        if self.driver.is_none() || self.concluded {
            self.begin_run()?;
        }
        while !self.is_terminal() {
            self.step_once()?;
        }
        self.conclude()?;
        self.termination_reason
            .ok_or_else(|| OdError::NoNumericalSolution("propagation ended without a reason".into()))
    }

    /// Perform at most `steps` integrator steps.
    ///
    /// Starts a fresh run if none is in progress (or the previous one terminated).
    ///
    /// Return
    /// ------
    /// * `Some(reason)` once the arc has terminated, `None` while it is still running
    pub fn integrate_by_step(
        &mut self,
        steps: usize,
    ) -> Result<Option<TerminationReason>, OdError> {
        if self.driver.is_none() || self.concluded {
            self.begin_run()?;
        }
        for _ in 0..steps {
            if self.is_terminal() {
                break;
            }
            self.step_once()?;
        }
        if self.is_terminal() {
            self.conclude()?;
        }
        Ok(self.termination_reason)
    }

    /// Whether the last step satisfied a termination condition.
    pub fn is_terminal(&self) -> bool {
        self.termination_reason.is_some()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    /// `true` if the arc terminated on a regular condition.
    pub fn integration_completed_successfully(&self) -> bool {
        self.termination_reason
            .is_some_and(|reason| reason.is_success())
    }

    /// Processed state history.
    pub fn state_history(&self) -> &StateHistory {
        &self.processed_states
    }

    /// Raw (integrated representation) state history.
    pub fn unprocessed_state_history(&self) -> &StateHistory {
        &self.raw_states
    }

    pub fn dependent_variable_history(&self) -> &TimeHistory<DVector<f64>> {
        &self.dependent_variables
    }

    pub fn dependent_variable_ids(&self) -> Vec<DependentVariable> {
        self.model.dependent_variable_ids()
    }

    /// Wall-clock seconds elapsed since the start of the run, per recorded epoch.
    pub fn cumulative_computation_time_history(&self) -> &TimeHistory<f64> {
        &self.computation_time
    }

    /// Derivative evaluations since the start of the run, per recorded epoch.
    pub fn cumulative_number_of_function_evaluations(&self) -> &TimeHistory<usize> {
        &self.function_evaluations
    }

    pub fn integrator_settings(&self) -> &IntegratorSettings {
        &self.integrator_settings
    }

    pub fn propagator_settings(&self) -> &PropagatorSettings {
        &self.propagator_settings
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// The state derivative function with the current parameter values.
    pub fn state_derivative(&self, epoch: Epoch, state: &StateVector) -> Result<StateVector, OdError> {
        self.model
            .compute_state_derivative(epoch, state, &self.parameters)
    }

    pub fn parameter_values(&self) -> &DVector<f64> {
        &self.parameters
    }

    /// Replace the non-state parameter values used by the model.
    pub fn set_parameter_values(&mut self, values: DVector<f64>) -> Result<(), OdError> {
        if values.len() != self.model.parameter_size() {
            return Err(OdError::dimension(
                "non-state parameter values",
                self.model.parameter_size(),
                values.len(),
            ));
        }
        self.parameters = values;
        Ok(())
    }

    /// Epoch of the last recorded state.
    pub fn current_epoch(&self) -> Option<Epoch> {
        self.current.as_ref().map(|(epoch, _)| *epoch)
    }

    /// Last recorded raw state.
    pub fn current_state(&self) -> Option<&StateVector> {
        self.current.as_ref().map(|(_, state)| state)
    }

    fn begin_run(&mut self) -> Result<(), OdError> {
        let settings = &self.propagator_settings;
        debug!(
            "Starting propagation at epoch {} with {}",
            settings.initial_epoch, self.integrator_settings
        );
        let driver = ArcDriver::new(
            &self.integrator_settings,
            settings.termination.clone(),
            self.model.state_size(),
            settings.initial_epoch,
            settings.initial_state.clone(),
        )?;
        let (epoch, state) = (settings.initial_epoch, settings.initial_state.clone());
        self.reset_run(epoch, state)?;
        self.driver = Some(driver);
        Ok(())
    }

    fn step_once(&mut self) -> Result<(), OdError> {
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| OdError::NoNumericalSolution("no propagation in progress".into()))?;

        let model = &self.model;
        let parameters = &self.parameters;
        let mut derivative =
            |epoch: Epoch, state: &StateVector| model.compute_state_derivative(epoch, state, parameters);
        let accepted = driver.advance(&mut derivative)?;

        let reason = driver.termination_reason();
        let record = accepted.then(|| {
            (
                driver.epoch(),
                driver.state().clone(),
                driver.function_evaluations(),
                driver.elapsed(),
            )
        });

        if let Some((epoch, state, evaluations, elapsed)) = record {
            self.record(epoch, state, evaluations, elapsed)?;
        }
        self.termination_reason = reason;
        Ok(())
    }

    fn conclude(&mut self) -> Result<(), OdError> {
        if self.concluded {
            return Ok(());
        }
        self.concluded = true;
        if self.options.set_integrated_result {
            self.write_integrated_result()?;
        }
        if self.options.clear_numerical_solutions {
            self.clear_numerical_solutions();
        }
        Ok(())
    }

    /// Start a run driven from outside (the variational propagator): clear the histories and
    /// record the initial state.
    pub(crate) fn reset_run(&mut self, epoch: Epoch, state: StateVector) -> Result<(), OdError> {
        self.driver = None;
        self.concluded = false;
        self.termination_reason = None;
        self.current = None;
        self.raw_states.clear();
        self.processed_states.clear();
        self.dependent_variables.clear();
        self.computation_time.clear();
        self.function_evaluations.clear();
        self.record(epoch, state, 0, Duration::ZERO)
    }

    /// Record an accepted state in every history.
    ///
    /// The epoch is checked once up front so that the histories stay index-aligned.
    pub(crate) fn record(
        &mut self,
        epoch: Epoch,
        state: StateVector,
        function_evaluations: usize,
        elapsed: Duration,
    ) -> Result<(), OdError> {
        if let Some((last, _)) = self.raw_states.last() {
            if !(epoch > last) {
                return Err(OdError::NonIncreasingEpoch { epoch, last });
            }
        }
        let processed = self.model.convert_to_output_representation(epoch, &state)?;
        let dependent = self
            .model
            .dependent_variables(epoch, &state, &self.parameters)?;

        if let Some(values) = dependent {
            self.dependent_variables.push(epoch, values)?;
        }
        self.raw_states.push(epoch, state.clone())?;
        self.processed_states.push(epoch, processed)?;
        self.computation_time.push(epoch, elapsed.as_secs_f64())?;
        self.function_evaluations
            .push(epoch, function_evaluations)?;
        self.current = Some((epoch, state));
        Ok(())
    }

    /// Mark an externally driven run as terminated.
    pub(crate) fn finish_external_run(&mut self, reason: Option<TerminationReason>) {
        self.termination_reason = reason;
        self.concluded = true;
    }

    pub(crate) fn write_integrated_result(&mut self) -> Result<(), OdError> {
        if self.processed_states.is_empty() {
            return Ok(());
        }
        self.model.set_integrated_result(&self.processed_states)
    }

    pub(crate) fn clear_numerical_solutions(&mut self) {
        self.raw_states.clear();
        self.processed_states.clear();
        self.dependent_variables.clear();
        self.computation_time.clear();
        self.function_evaluations.clear();
    }

    pub(crate) fn set_initial_state(&mut self, initial_state: StateVector) {
        self.propagator_settings.initial_state = initial_state;
    }
}

#[cfg(test)]
mod dynamics_test {
    use super::*;
    use crate::{
        constants::Matrix, dynamics::linear::LinearDynamics, propagation::TerminationSettings,
    };
    use approx::assert_relative_eq;

    fn oscillator() -> LinearDynamics {
        LinearDynamics::new(Matrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0])).unwrap()
    }

    fn settings(termination: TerminationSettings) -> PropagatorSettings {
        PropagatorSettings::new(0.0, DVector::from_vec(vec![1.0, 0.0]), termination)
    }

    /// Model whose derivative blows up after t = 5.
    #[derive(Debug)]
    struct Blowup;

    impl DynamicalModel for Blowup {
        fn state_size(&self) -> usize {
            1
        }

        fn compute_state_derivative(
            &self,
            epoch: Epoch,
            _state: &StateVector,
            _parameters: &DVector<f64>,
        ) -> Result<StateVector, OdError> {
            let value = if epoch > 5.0 { f64::NAN } else { 1.0 };
            Ok(DVector::from_vec(vec![value]))
        }

        fn jacobian_wrt_state(
            &self,
            _epoch: Epoch,
            _state: &StateVector,
            _parameters: &DVector<f64>,
        ) -> Result<Matrix, OdError> {
            Ok(Matrix::zeros(1, 1))
        }
    }

    /// `ẋ = 1`, recording `2x` as a dependent variable.
    #[derive(Debug)]
    struct Drift;

    impl DynamicalModel for Drift {
        fn state_size(&self) -> usize {
            1
        }

        fn compute_state_derivative(
            &self,
            _epoch: Epoch,
            _state: &StateVector,
            _parameters: &DVector<f64>,
        ) -> Result<StateVector, OdError> {
            Ok(DVector::from_vec(vec![1.0]))
        }

        fn jacobian_wrt_state(
            &self,
            _epoch: Epoch,
            _state: &StateVector,
            _parameters: &DVector<f64>,
        ) -> Result<Matrix, OdError> {
            Ok(Matrix::zeros(1, 1))
        }

        fn dependent_variable_ids(&self) -> Vec<DependentVariable> {
            vec![DependentVariable::TotalAccelerationNorm { body: "x".into() }]
        }

        fn dependent_variables(
            &self,
            _epoch: Epoch,
            state: &StateVector,
            _parameters: &DVector<f64>,
        ) -> Result<Option<DVector<f64>>, OdError> {
            Ok(Some(state * 2.0))
        }
    }

    #[test]
    fn test_terminate_exactly_on_final_epoch() {
        let propagator = DynamicsPropagator::new(
            oscillator(),
            IntegratorSettings::RungeKutta4 { step_size: 3.0 },
            settings(TerminationSettings::until(10.0)),
            PropagationOptions::default(),
        )
        .unwrap();

        assert_eq!(propagator.state_history().epochs(), &[0.0, 3.0, 6.0, 9.0, 10.0]);
        assert_eq!(
            propagator.termination_reason(),
            Some(TerminationReason::EpochLimitReached)
        );
        assert_eq!(
            propagator
                .cumulative_number_of_function_evaluations()
                .last()
                .map(|(_, n)| *n),
            Some(16)
        );
        assert_eq!(propagator.cumulative_computation_time_history().len(), 5);
    }

    #[test]
    fn test_overshoot_without_exact_termination() {
        let propagator = DynamicsPropagator::new(
            oscillator(),
            IntegratorSettings::Euler { step_size: 3.0 },
            settings(TerminationSettings::Epoch {
                final_epoch: 10.0,
                terminate_exactly: false,
            }),
            PropagationOptions::default(),
        )
        .unwrap();
        assert_eq!(propagator.current_epoch(), Some(12.0));
    }

    #[test]
    fn test_zero_derivative_keeps_initial_state() {
        let model = LinearDynamics::new(Matrix::zeros(3, 3)).unwrap();
        let initial = DVector::from_vec(vec![1.0, -2.0, 3.5]);
        let propagator = DynamicsPropagator::new(
            model,
            IntegratorSettings::rkf45(1.0, 1e-3, 50.0, 1e-12),
            PropagatorSettings::new(0.0, initial.clone(), TerminationSettings::until(500.0)),
            PropagationOptions::default(),
        )
        .unwrap();

        assert!(propagator.state_history().len() > 2);
        for (_, state) in propagator.state_history().iter() {
            assert_eq!(state, &initial);
        }
    }

    #[test]
    fn test_by_step_matches_uninterrupted_run() {
        let integrator = IntegratorSettings::rkf45(0.5, 1e-6, 2.0, 1e-10);
        let full = DynamicsPropagator::new(
            oscillator(),
            integrator.clone(),
            settings(TerminationSettings::until(20.0)),
            PropagationOptions::default(),
        )
        .unwrap();

        let mut stepped = DynamicsPropagator::new(
            oscillator(),
            integrator,
            settings(TerminationSettings::until(20.0)),
            PropagationOptions::default().integrate_on_creation(false),
        )
        .unwrap();
        assert!(stepped.state_history().is_empty());

        let mut reason = None;
        while reason.is_none() {
            reason = stepped.integrate_by_step(3).unwrap();
        }

        assert_eq!(reason, Some(TerminationReason::EpochLimitReached));
        assert_eq!(stepped.state_history(), full.state_history());
        assert_eq!(
            stepped.cumulative_number_of_function_evaluations(),
            full.cumulative_number_of_function_evaluations()
        );
    }

    #[test]
    fn test_non_finite_state_stops_propagation() {
        let propagator = DynamicsPropagator::new(
            Blowup,
            IntegratorSettings::Euler { step_size: 1.0 },
            PropagatorSettings::new(
                0.0,
                DVector::from_vec(vec![0.0]),
                TerminationSettings::until(20.0),
            ),
            PropagationOptions::default(),
        )
        .unwrap();

        assert_eq!(
            propagator.termination_reason(),
            Some(TerminationReason::NonFiniteState { epoch: 7.0 })
        );
        assert!(!propagator.integration_completed_successfully());
        assert_eq!(propagator.state_history().last().map(|(t, _)| t), Some(6.0));
        assert_relative_eq!(propagator.current_state().unwrap()[0], 6.0);
    }

    #[test]
    fn test_rejected_record_keeps_histories_aligned() {
        let mut propagator = DynamicsPropagator::new(
            Drift,
            IntegratorSettings::Euler { step_size: 1.0 },
            PropagatorSettings::new(0.0, DVector::from_vec(vec![0.0]), TerminationSettings::until(3.0)),
            PropagationOptions::default(),
        )
        .unwrap();
        assert_eq!(propagator.dependent_variable_history().len(), 4);

        let result = propagator.record(2.0, DVector::from_vec(vec![9.0]), 0, Duration::ZERO);
        assert_eq!(
            result,
            Err(OdError::NonIncreasingEpoch {
                epoch: 2.0,
                last: 3.0
            })
        );
        assert_eq!(propagator.dependent_variable_history().len(), 4);
        assert_eq!(propagator.unprocessed_state_history().len(), 4);
        assert_eq!(propagator.state_history().len(), 4);
        assert_eq!(propagator.cumulative_computation_time_history().len(), 4);
        assert_eq!(
            propagator.dependent_variable_history().last().map(|(t, v)| (t, v[0])),
            Some((3.0, 6.0))
        );
        assert_eq!(propagator.current_epoch(), Some(3.0));
    }

    #[test]
    fn test_step_budget_and_restart() {
        let mut propagator = DynamicsPropagator::new(
            oscillator(),
            IntegratorSettings::RungeKutta4 { step_size: 0.1 },
            settings(TerminationSettings::StepCount(5)),
            PropagationOptions::default(),
        )
        .unwrap();
        assert_eq!(
            propagator.termination_reason(),
            Some(TerminationReason::StepBudgetExhausted)
        );
        assert_eq!(propagator.state_history().len(), 6);

        let reason = propagator
            .integrate_equations_of_motion(&DVector::from_vec(vec![0.0, 2.0]))
            .unwrap();
        assert_eq!(reason, TerminationReason::StepBudgetExhausted);
        assert_eq!(propagator.state_history().len(), 6);
        assert_eq!(propagator.state_history().first().unwrap().1[1], 2.0);
    }

    #[test]
    fn test_exhausted_wall_time_stops_after_one_step() {
        let propagator = DynamicsPropagator::new(
            oscillator(),
            IntegratorSettings::RungeKutta4 { step_size: 0.1 },
            settings(TerminationSettings::WallTime(Duration::ZERO)),
            PropagationOptions::default(),
        )
        .unwrap();

        assert_eq!(
            propagator.termination_reason(),
            Some(TerminationReason::TimeBudgetExhausted)
        );
        assert!(propagator.integration_completed_successfully());
        assert_eq!(propagator.state_history().epochs(), &[0.0, 0.1]);
    }

    #[test]
    fn test_clear_numerical_solutions() {
        let propagator = DynamicsPropagator::new(
            oscillator(),
            IntegratorSettings::RungeKutta4 { step_size: 0.5 },
            settings(TerminationSettings::until(5.0)),
            PropagationOptions::default().clear_numerical_solutions(true),
        )
        .unwrap();
        assert!(propagator.state_history().is_empty());
        assert!(propagator.unprocessed_state_history().is_empty());
        assert_eq!(propagator.current_epoch(), Some(5.0));
        assert!(propagator.integration_completed_successfully());
    }

    #[test]
    fn test_dimension_checks() {
        let result = DynamicsPropagator::new(
            oscillator(),
            IntegratorSettings::RungeKutta4 { step_size: 0.5 },
            PropagatorSettings::new(0.0, DVector::zeros(3), TerminationSettings::until(5.0)),
            PropagationOptions::default(),
        );
        assert!(matches!(result, Err(OdError::DimensionMismatch { .. })));

        let result = DynamicsPropagator::new(
            oscillator(),
            IntegratorSettings::RungeKutta4 { step_size: -0.5 },
            settings(TerminationSettings::until(5.0)),
            PropagationOptions::default(),
        );
        assert!(matches!(result, Err(OdError::InvalidIntegratorSettings(_))));
    }
}
