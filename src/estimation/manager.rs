//! # Batch orbit and parameter determination
//!
//! [`OrbitDeterminationManager`] solves the weighted nonlinear least-squares problem
//!
//! ```text
//! min_p  Σ rᵢ(p)ᵀ Wᵢ rᵢ(p) + (p − p₀)ᵀ Λ (p − p₀),     rᵢ = observedᵢ − computedᵢ(p)
//! ```
//!
//! by Gauss–Newton iterations. Each iteration:
//!
//! 1. **Propagate** – integrates the dynamics and variational equations at the current estimate
//!    (skipped on the first iteration when an up-to-date solution exists and
//!    `reintegrate_equations_on_first_iteration` is off).
//! 2. **Simulate & partial** – computes every accepted observation of the collection and its
//!    partials `H = ∂h/∂x · [Φ | S]` through the observation simulators.
//! 3. **Solve** – normalises the columns of `H` by their largest absolute entry, forms the
//!    normal equations (plus the a-priori term `Λ` when given) and solves them by Cholesky,
//!    falling back to an SVD pseudo-inverse for ill-conditioned systems.
//! 4. **Converge?** – asks the [`EstimationConvergenceChecker`]; otherwise applies the update.
//!
//! Non-finite residuals, partials or updates, and a propagation that does not terminate
//! successfully, end the run as [`EstimationStatus::Diverged`]; the trace built so far is still
//! returned.
//!
//! At the end of every run the manager resets its parameter vector to the lowest-rms iteration
//! and re-integrates, so that [`OrbitDeterminationManager::state_transition_interface`] matches
//! the estimate.
//!
//! ## See also
//! * [`VariationalEquationsPropagator`] – propagation of `x`, `Φ` and `S`.
//! * [`create_observation_simulators`] – how the observation models are grouped.

use log::{debug, info, warn};
use nalgebra::{Cholesky, DVector};

use crate::{
    constants::Matrix,
    dynamics::DynamicalModel,
    integrator::IntegratorSettings,
    observations::{
        collection::{ObservationCollection, SingleObservationSet},
        model::ObservationModel,
        simulator::{create_observation_simulators, find_simulator, ObservationSimulatorBase},
        ObservableType,
    },
    od_errors::OdError,
    parameters::EstimatableParameterSet,
    propagation::{
        variational::{StateTransitionInterface, VariationalEquationsPropagator, VariationalSolverOptions},
        PropagatorSettings,
    },
};

use super::{
    convergence::EstimationConvergenceChecker,
    input::EstimationInput,
    output::{EstimationOutput, EstimationStatus, IterationRecord},
};

/// Residuals and partials of the observations of one observable type.
#[derive(Debug, Clone, Copy)]
pub struct ObservationManager<'a> {
    simulator: &'a dyn ObservationSimulatorBase,
}

impl<'a> ObservationManager<'a> {
    pub fn new(simulator: &'a dyn ObservationSimulatorBase) -> Self {
        ObservationManager { simulator }
    }

    pub fn observable(&self) -> ObservableType {
        self.simulator.observable()
    }

    pub fn simulator(&self) -> &'a dyn ObservationSimulatorBase {
        self.simulator
    }

    /// Residuals `observed - computed` of `set`, stacked, and the matching rows of the design
    /// matrix.
    ///
    /// Errors
    /// ------
    /// * [`OdError::UnknownObservationModel`] if the set's link has no model.
    /// * [`OdError::EpochOutOfRange`] for an observation outside the propagated arc.
    pub fn compute_residuals_and_partials(
        &self,
        set: &SingleObservationSet,
        interface: &StateTransitionInterface,
    ) -> Result<(DVector<f64>, Matrix), OdError> {
        let model = self.simulator.observation_model(set.link())?;
        let size = self.simulator.observable_size();
        let rows = set.len() * size;
        let mut residuals = DVector::zeros(rows);
        let mut partials = Matrix::zeros(rows, interface.parameter_size());

        for (k, (epoch, observed)) in set.iter().enumerate() {
            let (computed, h) =
                self.simulator
                    .compute_observation_and_partials(set.link(), epoch, interface)?;
            if computed.len() != size || observed.len() != size {
                return Err(OdError::dimension(
                    "observation",
                    size,
                    if computed.len() != size {
                        computed.len()
                    } else {
                        observed.len()
                    },
                ));
            }
            residuals
                .rows_mut(k * size, size)
                .copy_from(&model.residual(observed, &computed));
            partials.rows_mut(k * size, size).copy_from(&h);
        }
        Ok((residuals, partials))
    }
}

/// Batch least-squares estimator of initial states and model parameters.
#[derive(Debug)]
pub struct OrbitDeterminationManager<M: DynamicalModel> {
    variational_solver: VariationalEquationsPropagator<M>,
    observation_simulators: Vec<Box<dyn ObservationSimulatorBase>>,
}

impl<M: DynamicalModel> OrbitDeterminationManager<M> {
    /// Create the manager and its variational solver.
    ///
    /// Arguments
    /// ---------
    /// * `model`: equations of motion with their Jacobians
    /// * `integrator_settings`: integrator of the dynamics
    /// * `propagator_settings`: initial epoch, a-priori initial state and termination
    /// * `parameter_set`: estimated parameters
    /// * `observation_models`: models of every link that may appear in the observations
    /// * `options`: flags of the variational solver
    ///
    /// Errors
    /// ------
    /// * Any error of [`VariationalEquationsPropagator::new`] or of
    ///   [`create_observation_simulators`].
    pub fn new(
        model: M,
        integrator_settings: IntegratorSettings,
        propagator_settings: PropagatorSettings,
        parameter_set: EstimatableParameterSet,
        observation_models: impl IntoIterator<Item = ObservationModel>,
        options: VariationalSolverOptions,
    ) -> Result<Self, OdError> {
        let observation_simulators = create_observation_simulators(observation_models)?;
        let variational_solver = VariationalEquationsPropagator::new(
            model,
            integrator_settings,
            propagator_settings,
            parameter_set,
            options,
        )?;
        Ok(OrbitDeterminationManager {
            variational_solver,
            observation_simulators,
        })
    }

    pub fn observation_simulators(&self) -> &[Box<dyn ObservationSimulatorBase>] {
        &self.observation_simulators
    }

    /// One [`ObservationManager`] per observable type.
    pub fn observation_managers(&self) -> Vec<ObservationManager<'_>> {
        self.observation_simulators
            .iter()
            .map(|simulator| ObservationManager::new(simulator.as_ref()))
            .collect()
    }

    pub fn state_transition_interface(&self) -> Result<&StateTransitionInterface, OdError> {
        self.variational_solver.state_transition_interface()
    }

    pub fn variational_solver(&self) -> &VariationalEquationsPropagator<M> {
        &self.variational_solver
    }

    /// Current estimate `[initial state; non-state parameters]`.
    pub fn parameter_vector(&self) -> &DVector<f64> {
        self.variational_solver.parameter_vector()
    }

    /// Run the batch estimation.
    ///
    /// The a-priori parameter vector is the manager's current parameter vector.
    ///
    /// Arguments
    /// ---------
    /// * `input`: observations (rejected ones are ignored), weights and run flags
    /// * `convergence_checker`: stopping policy
    ///
    /// Return
    /// ------
    /// * The per-iteration trace, with the final status
    ///
    /// Errors
    /// ------
    /// * [`OdError::NoObservations`] if the collection has no accepted observation.
    /// * [`OdError::DimensionMismatch`] for an a-priori matrix of the wrong shape.
    /// * Configuration errors of the observation models (unknown link, observation outside the
    ///   arc, ...).
    pub fn perform_estimation(
        &mut self,
        input: &EstimationInput<'_>,
        convergence_checker: &EstimationConvergenceChecker,
    ) -> Result<EstimationOutput, OdError> {
        let observations = input.observations;
        if observations.is_empty() {
            return Err(OdError::NoObservations);
        }
        let size = self.variational_solver.parameter_set().total_size();
        if let Some(inverse) = &input.inverse_a_priori_covariance {
            if inverse.nrows() != size || inverse.ncols() != size {
                return Err(OdError::dimension(
                    "inverse a-priori covariance",
                    size,
                    if inverse.nrows() != size {
                        inverse.nrows()
                    } else {
                        inverse.ncols()
                    },
                ));
            }
        }
        if !observations.rejected().is_empty() {
            debug!(
                "{} rejected observations are left out of the estimation",
                observations.rejected().len()
            );
        }

        let weights = observation_weights(input)?;
        let a_priori = self.variational_solver.parameter_vector().clone();
        let mut parameters = a_priori.clone();

        let mut records: Vec<IterationRecord> = Vec::new();
        let mut rms_history: Vec<f64> = Vec::new();
        let mut best: Option<(usize, f64, Matrix)> = None;
        let mut status = EstimationStatus::MaximumIterationsReached;

        for iteration in 0.. {
            let up_to_date = self.variational_solver.state_transition_interface().is_ok();
            if iteration > 0 || input.reintegrate_equations_on_first_iteration || !up_to_date {
                self.variational_solver
                    .reset_parameter_estimate(&parameters, true)?;
            }
            if !self.variational_solver.integration_completed_successfully() {
                warn!(
                    "Propagation failed at iteration {iteration}: {:?}",
                    self.variational_solver.termination_reason()
                );
                status = EstimationStatus::Diverged;
                break;
            }

            let (residuals, design) = self.residuals_and_partials(observations)?;
            let rms = (residuals.norm_squared() / residuals.len() as f64).sqrt();
            let state_history = input
                .save_state_history_per_iteration
                .then(|| self.variational_solver.state_history().clone());
            let mut record = IterationRecord {
                iteration,
                parameters: parameters.clone(),
                residuals,
                rms,
                update: None,
                design_matrix: input.save_design_matrix.then(|| design.clone()),
                state_history,
            };
            rms_history.push(rms);

            if !rms.is_finite() || design.iter().any(|v| !v.is_finite()) {
                warn!("Non-finite residuals or partials at iteration {iteration}");
                records.push(record);
                status = EstimationStatus::Diverged;
                break;
            }

            let (update, covariance) = solve_normal_equations(
                &design,
                &weights,
                &record.residuals,
                input
                    .inverse_a_priori_covariance
                    .as_ref()
                    .map(|inverse| (inverse, &a_priori - &parameters)),
            )?;
            if update.iter().any(|v| !v.is_finite()) {
                warn!("Non-finite parameter update at iteration {iteration}");
                records.push(record);
                status = EstimationStatus::Diverged;
                break;
            }

            info!(
                "Iteration {iteration}: rms = {rms:.6e}, |dp| = {:.3e}",
                update.amax()
            );
            if best.as_ref().map_or(true, |(_, best_rms, _)| rms < *best_rms) {
                best = Some((iteration, rms, covariance));
            }

            let relative_update = update
                .iter()
                .zip(parameters.iter())
                .map(|(dp, p)| dp.abs() / p.abs().max(1.0))
                .fold(0.0, f64::max);
            record.update = Some(update.clone());
            records.push(record);

            if let Some(decision) = convergence_checker.check(&rms_history, relative_update) {
                status = decision;
                break;
            }
            parameters += update;
        }

        let (best_iteration, covariance) = match best {
            Some((index, _, covariance)) => (Some(index), Some(covariance)),
            None => (None, None),
        };
        let final_parameters = best_iteration
            .and_then(|index| records.get(index))
            .map_or_else(|| a_priori.clone(), |record| record.parameters.clone());
        self.variational_solver
            .reset_parameter_estimate(&final_parameters, true)?;

        info!(
            "Estimation finished after {} iterations: {status}",
            records.len()
        );
        Ok(EstimationOutput {
            iterations: records,
            best_iteration,
            status,
            covariance,
            parameter_descriptions: self.variational_solver.parameter_set().descriptions(),
            final_parameters,
        })
    }

    /// Stacked residuals and design matrix of every accepted observation, in collection order.
    fn residuals_and_partials(
        &self,
        observations: &ObservationCollection,
    ) -> Result<(DVector<f64>, Matrix), OdError> {
        let interface = self.variational_solver.state_transition_interface()?;
        let rows = observations.total_observable_size();
        let mut residuals = DVector::zeros(rows);
        let mut design = Matrix::zeros(rows, interface.parameter_size());

        let mut row = 0;
        for set in observations.sets() {
            let simulator =
                find_simulator(&self.observation_simulators, set.observable(), set.link())?;
            let (r, h) =
                ObservationManager::new(simulator).compute_residuals_and_partials(set, interface)?;
            residuals.rows_mut(row, r.len()).copy_from(&r);
            design.rows_mut(row, h.nrows()).copy_from(&h);
            row += r.len();
        }
        Ok((residuals, design))
    }
}

/// Diagonal of the weight matrix, in collection order.
fn observation_weights(input: &EstimationInput<'_>) -> Result<DVector<f64>, OdError> {
    let observations = input.observations;
    let mut weights = DVector::zeros(observations.total_observable_size());
    let mut row = 0;
    for set in observations.sets() {
        let size = set.observable().size();
        for &epoch in set.epochs() {
            let diagonal = input
                .weighting
                .weight(set.observable(), set.link(), epoch)
                .to_diagonal(size)?;
            weights.rows_mut(row, size).copy_from(&diagonal);
            row += size;
        }
    }
    Ok(weights)
}

/// Solve the column-normalised normal equations.
///
/// Arguments
/// ---------
/// * `design`: `H`, rows × parameters
/// * `weights`: diagonal of `W`
/// * `residuals`: `r`
/// * `a_priori`: `Λ` and `p₀ − p`, if any
///
/// Return
/// ------
/// * The update `Δp` and the covariance `(Hᵀ W H + Λ)⁻¹`
fn solve_normal_equations(
    design: &Matrix,
    weights: &DVector<f64>,
    residuals: &DVector<f64>,
    a_priori: Option<(&Matrix, DVector<f64>)>,
) -> Result<(DVector<f64>, Matrix), OdError> {
    let size = design.ncols();
    let scale = DVector::from_iterator(
        size,
        design.column_iter().map(|column| {
            let max = column.amax();
            if max > 0.0 {
                max
            } else {
                1.0
            }
        }),
    );

    let mut normalised = design.clone();
    for (j, mut column) in normalised.column_iter_mut().enumerate() {
        column /= scale[j];
    }
    let weighted = Matrix::from_fn(normalised.nrows(), size, |i, j| {
        weights[i] * normalised[(i, j)]
    });
    let mut normal = normalised.transpose() * &weighted;
    let mut rhs = weighted.transpose() * residuals;

    if let Some((inverse, offset)) = a_priori {
        let scaled = Matrix::from_fn(size, size, |i, j| inverse[(i, j)] / (scale[i] * scale[j]));
        normal += &scaled;
        rhs += (inverse * offset).component_div(&scale);
    }

    let cholesky = Cholesky::new(normal.clone())
        .map(|cholesky| (cholesky.solve(&rhs), cholesky.inverse()))
        .filter(|(update, covariance)| {
            update.iter().chain(covariance.iter()).all(|v| v.is_finite())
        });
    let (normalised_update, normalised_covariance) = match cholesky {
        Some(solution) => solution,
        None => {
            warn!("Normal matrix is not positive definite, falling back to SVD");
            let svd = normal.svd(true, true);
            let update = svd
                .solve(&rhs, f64::EPSILON)
                .map_err(|e| OdError::NoNumericalSolution(e.to_string()))?;
            let covariance = svd
                .pseudo_inverse(f64::EPSILON)
                .map_err(|e| OdError::NoNumericalSolution(e.to_string()))?;
            (update, covariance)
        }
    };

    let update = normalised_update.component_div(&scale);
    let covariance = Matrix::from_fn(size, size, |i, j| {
        normalised_covariance[(i, j)] / (scale[i] * scale[j])
    });
    Ok((update, covariance))
}
