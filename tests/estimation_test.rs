mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::DVector;
use odkit::{
    constants::{Epoch, Matrix, StateVector},
    dynamics::{acceleration::TranslationalDynamics, linear::LinearDynamics, DynamicalModel},
    estimation::{
        convergence::EstimationConvergenceChecker,
        input::EstimationInput,
        manager::OrbitDeterminationManager,
        output::EstimationStatus,
        weights::{ObservableWeights, ObservationWeight},
    },
    integrator::IntegratorSettings,
    observations::{
        collection::{
            simulate_observations, ObservationCollection, ObservationSimulationSettings,
            RejectedObservation,
        },
        ObservableType,
    },
    od_errors::OdError,
    parameters::EstimatableParameterId,
    propagation::{variational::VariationalSolverOptions, PropagatorSettings, TerminationSettings},
    time::epoch_grid,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::common::{
    accelerated_particle, earth_and_satellite, leo_initial_state, particle_link,
    particle_parameter_set, particle_position_model, range_link, satellite_link,
    satellite_models, satellite_parameter_set, two_body_model,
};

const TRUE_ACCELERATION: [f64; 3] = [1e-3, -2e-3, 5e-4];

fn true_particle_state() -> DVector<f64> {
    DVector::from_vec(vec![1.0, 2.0, 3.0, 0.1, -0.2, 0.3])
}

fn particle_manager(
    initial_state: DVector<f64>,
    acceleration: [f64; 3],
) -> OrbitDeterminationManager<LinearDynamics> {
    OrbitDeterminationManager::new(
        accelerated_particle(acceleration),
        IntegratorSettings::RungeKutta4 { step_size: 1.0 },
        PropagatorSettings::new(0.0, initial_state, TerminationSettings::until(100.0)),
        particle_parameter_set(),
        [particle_position_model()],
        VariationalSolverOptions::default(),
    )
    .unwrap()
}

/// Noise-free positions of the true trajectory every 10 s.
fn particle_observations() -> ObservationCollection {
    let truth = particle_manager(true_particle_state(), TRUE_ACCELERATION);
    let settings = [ObservationSimulationSettings::new(
        ObservableType::RelativePosition,
        particle_link(),
        epoch_grid(0.0, 100.0, 10.0).unwrap(),
    )];
    simulate_observations(
        &settings,
        truth.observation_simulators(),
        truth.state_transition_interface().unwrap(),
        &mut StdRng::seed_from_u64(42),
    )
    .unwrap()
}

fn perturbed_particle_manager() -> OrbitDeterminationManager<LinearDynamics> {
    let perturbation = DVector::from_vec(vec![0.5, -0.3, 0.2, 0.01, 0.02, -0.01]);
    particle_manager(true_particle_state() + perturbation, [0.0; 3])
}

fn true_particle_parameters() -> DVector<f64> {
    let mut truth = DVector::zeros(9);
    truth.rows_mut(0, 6).copy_from(&true_particle_state());
    truth
        .rows_mut(6, 3)
        .copy_from(&DVector::from_row_slice(&TRUE_ACCELERATION));
    truth
}

#[test]
fn test_linear_problem_converges_to_truth() {
    let observations = particle_observations();
    assert_eq!(observations.number_of_observations(), 10);

    let mut manager = perturbed_particle_manager();
    let checker = EstimationConvergenceChecker::builder()
        .minimum_residual(1e-9)
        .build()
        .unwrap();
    let input = EstimationInput::new(&observations)
        .save_design_matrix(true)
        .save_state_history_per_iteration(true);
    let output = manager.perform_estimation(&input, &checker).unwrap();

    assert_eq!(output.status, EstimationStatus::Converged);
    assert_eq!(output.iterations.len(), 2);
    assert_eq!(output.best_iteration, Some(1));
    assert!(output.rms_history()[0] > 0.1);
    assert!(output.rms_history()[1] < 1e-9);

    let truth = true_particle_parameters();
    for i in 0..truth.len() {
        assert_relative_eq!(output.final_parameters[i], truth[i], epsilon = 1e-9);
    }
    assert_eq!(manager.parameter_vector(), &output.final_parameters);

    let first = &output.iterations[0];
    assert_eq!(first.design_matrix.as_ref().map(|h| h.shape()), Some((30, 9)));
    assert!(first.state_history.as_ref().is_some_and(|h| !h.is_empty()));
    assert!(output.formal_errors().is_some_and(|sigma| sigma.iter().all(|s| *s > 0.0)));
    assert_eq!(output.parameter_descriptions.len(), 9);
    assert_eq!(output.parameter_descriptions[6], "model constant ax");

    // the exposed interface matches the estimate
    let managers = manager.observation_managers();
    assert_eq!(managers.len(), 1);
    let set = observations
        .get(ObservableType::RelativePosition, &particle_link())
        .unwrap();
    let (residuals, partials) = managers[0]
        .compute_residuals_and_partials(set, manager.state_transition_interface().unwrap())
        .unwrap();
    assert!(residuals.amax() < 1e-9);
    assert_eq!(partials.shape(), (30, 9));
}

#[test]
fn test_rejected_observations_do_not_change_the_output() {
    let accepted = particle_observations();
    let mut with_rejected = accepted.clone();
    with_rejected.add_rejected(RejectedObservation {
        observable: ObservableType::RelativePosition,
        link: particle_link(),
        epoch: 95.0,
        computed: DVector::from_vec(vec![1e3, 1e3, 1e3]),
    });
    assert_eq!(with_rejected.without_rejected(), accepted);

    let checker = EstimationConvergenceChecker::default();
    let output_accepted = perturbed_particle_manager()
        .perform_estimation(&EstimationInput::new(&accepted), &checker)
        .unwrap();
    let output_with_rejected = perturbed_particle_manager()
        .perform_estimation(&EstimationInput::new(&with_rejected), &checker)
        .unwrap();

    assert_eq!(output_accepted, output_with_rejected);
}

#[test]
fn test_non_finite_observation_diverges() {
    let mut observations = particle_observations();
    observations
        .add_observation(
            ObservableType::RelativePosition,
            &particle_link(),
            95.0,
            DVector::from_vec(vec![f64::NAN, 0.0, 0.0]),
        )
        .unwrap();

    let mut manager = perturbed_particle_manager();
    let a_priori = manager.parameter_vector().clone();
    let output = manager
        .perform_estimation(
            &EstimationInput::new(&observations),
            &EstimationConvergenceChecker::default(),
        )
        .unwrap();

    assert_eq!(output.status, EstimationStatus::Diverged);
    assert_eq!(output.iterations.len(), 1);
    assert!(output.iterations[0].update.is_none());
    assert_eq!(output.best_iteration, None);
    assert!(output.covariance.is_none());
    assert_eq!(output.final_parameters, a_priori);
    assert_eq!(manager.parameter_vector(), &a_priori);
}

#[test]
fn test_invalid_inputs() {
    let mut manager = perturbed_particle_manager();
    let checker = EstimationConvergenceChecker::default();

    let empty = ObservationCollection::new();
    assert_eq!(
        manager
            .perform_estimation(&EstimationInput::new(&empty), &checker)
            .unwrap_err(),
        OdError::NoObservations
    );

    let observations = particle_observations();
    let input =
        EstimationInput::new(&observations).with_inverse_a_priori_covariance(nalgebra::DMatrix::identity(3, 3));
    assert!(matches!(
        manager.perform_estimation(&input, &checker),
        Err(OdError::DimensionMismatch { .. })
    ));
}

/// Accelerated particle whose equations are altered after construction.
#[derive(Debug)]
struct AlteredParticle {
    inner: LinearDynamics,
    alteration: Alteration,
}

#[derive(Debug, Clone, Copy)]
enum Alteration {
    /// `∂f/∂p` has the wrong sign, so every update moves away from the truth.
    ReversedSensitivity,
    /// The derivative turns NaN after t = 50 once an acceleration exceeds the limit.
    BreaksAboveAcceleration(f64),
}

impl DynamicalModel for AlteredParticle {
    fn state_size(&self) -> usize {
        self.inner.state_size()
    }

    fn parameter_ids(&self) -> Vec<EstimatableParameterId> {
        self.inner.parameter_ids()
    }

    fn parameter_size(&self) -> usize {
        self.inner.parameter_size()
    }

    fn default_parameter_values(&self) -> Result<DVector<f64>, OdError> {
        self.inner.default_parameter_values()
    }

    fn compute_state_derivative(
        &self,
        epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<StateVector, OdError> {
        let mut derivative = self.inner.compute_state_derivative(epoch, state, parameters)?;
        if let Alteration::BreaksAboveAcceleration(limit) = self.alteration {
            if epoch > 50.0 && parameters.amax() > limit {
                derivative[3] = f64::NAN;
            }
        }
        Ok(derivative)
    }

    fn jacobian_wrt_state(
        &self,
        epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<Matrix, OdError> {
        self.inner.jacobian_wrt_state(epoch, state, parameters)
    }

    fn jacobian_wrt_parameters(
        &self,
        epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<Matrix, OdError> {
        let b = self.inner.jacobian_wrt_parameters(epoch, state, parameters)?;
        Ok(match self.alteration {
            Alteration::ReversedSensitivity => -b,
            Alteration::BreaksAboveAcceleration(_) => b,
        })
    }
}

fn altered_particle_manager(alteration: Alteration) -> OrbitDeterminationManager<AlteredParticle> {
    OrbitDeterminationManager::new(
        AlteredParticle {
            inner: accelerated_particle([0.0; 3]),
            alteration,
        },
        IntegratorSettings::RungeKutta4 { step_size: 1.0 },
        PropagatorSettings::new(0.0, true_particle_state(), TerminationSettings::until(100.0)),
        particle_parameter_set(),
        [particle_position_model()],
        VariationalSolverOptions::default(),
    )
    .unwrap()
}

#[test]
fn test_failed_propagation_diverges() {
    let observations = particle_observations();
    let mut manager = altered_particle_manager(Alteration::BreaksAboveAcceleration(1e-3));
    let a_priori = manager.parameter_vector().clone();
    assert!(manager.variational_solver().integration_completed_successfully());

    let output = manager
        .perform_estimation(
            &EstimationInput::new(&observations),
            &EstimationConvergenceChecker::default(),
        )
        .unwrap();

    // the first update pushes ay to about -2e-3, which breaks the second propagation
    assert_eq!(output.status, EstimationStatus::Diverged);
    assert_eq!(output.iterations.len(), 1);
    let update = output.iterations[0].update.as_ref().unwrap();
    assert!(update[7] < -1e-3);
    assert_eq!(output.best_iteration, Some(0));
    assert!(output.covariance.is_some());

    // the manager is left at the best iteration, with a usable propagation
    assert_eq!(output.final_parameters, a_priori);
    assert_eq!(manager.parameter_vector(), &a_priori);
    assert!(manager.variational_solver().integration_completed_successfully());
}

#[test]
fn test_growing_residuals_stall() {
    let observations = particle_observations();
    let mut manager = altered_particle_manager(Alteration::ReversedSensitivity);
    let a_priori = manager.parameter_vector().clone();

    let output = manager
        .perform_estimation(
            &EstimationInput::new(&observations),
            &EstimationConvergenceChecker::default(),
        )
        .unwrap();

    assert_eq!(output.status, EstimationStatus::Stalled);
    assert_eq!(output.iterations.len(), 3);
    let rms = output.rms_history();
    assert!(rms[0] > 0.0);
    assert!(rms[1] > rms[0]);
    assert!(rms[2] > rms[1]);
    assert_eq!(output.best_iteration, Some(0));
    assert_eq!(output.final_parameters, a_priori);
    assert_eq!(manager.parameter_vector(), &a_priori);
}

#[test]
fn test_iteration_limit() {
    let observations = particle_observations();
    let mut manager = perturbed_particle_manager();
    let a_priori = manager.parameter_vector().clone();
    let checker = EstimationConvergenceChecker::builder()
        .maximum_iterations(1)
        .build()
        .unwrap();

    let output = manager
        .perform_estimation(&EstimationInput::new(&observations), &checker)
        .unwrap();

    assert_eq!(output.status, EstimationStatus::MaximumIterationsReached);
    assert!(!output.is_converged());
    assert_eq!(output.iterations.len(), 1);
    assert!(output.iterations[0].update.is_some());
    assert_eq!(output.best_iteration, Some(0));
    assert_eq!(output.final_parameters, a_priori);
}

fn satellite_manager(
    initial_state: DVector<f64>,
    gravitational_parameter: f64,
) -> OrbitDeterminationManager<TranslationalDynamics> {
    let mut bodies = earth_and_satellite();
    let earth = bodies.body_id("Earth").unwrap();
    bodies
        .set_gravitational_parameter(earth, gravitational_parameter)
        .unwrap();
    let models = satellite_models(&bodies);
    let model = two_body_model(bodies)
        .with_estimated_parameters(vec![EstimatableParameterId::GravitationalParameter {
            body: "Earth".into(),
        }])
        .unwrap();

    OrbitDeterminationManager::new(
        model,
        IntegratorSettings::RungeKutta4 { step_size: 10.0 },
        PropagatorSettings::new(0.0, initial_state, TerminationSettings::until(3600.0)),
        satellite_parameter_set(),
        models,
        VariationalSolverOptions::default(),
    )
    .unwrap()
}

#[test]
fn test_two_body_orbit_and_gravitational_parameter() {
    let mu = odkit::constants::EARTH_GRAVITATIONAL_PARAMETER;
    let truth = satellite_manager(leo_initial_state(), mu);
    let epochs = epoch_grid(0.0, 3000.0, 60.0).unwrap();
    let settings = [
        ObservationSimulationSettings::new(
            ObservableType::RelativePosition,
            satellite_link(),
            epochs.clone(),
        ),
        ObservationSimulationSettings::new(ObservableType::OneWayRange, range_link(), epochs),
    ];
    let observations = simulate_observations(
        &settings,
        truth.observation_simulators(),
        truth.state_transition_interface().unwrap(),
        &mut StdRng::seed_from_u64(3),
    )
    .unwrap();

    // the station only sees the first minutes of the arc
    let ranges = observations
        .get(ObservableType::OneWayRange, &range_link())
        .unwrap();
    assert!(ranges.len() >= 3);
    assert_eq!(ranges.len() + observations.rejected().len(), 50);
    assert!(observations.rejected().iter().all(|r| r.epoch > 0.0));

    let perturbation = DVector::from_vec(vec![100.0, -50.0, 30.0, 0.1, -0.05, 0.02]);
    let mut manager = satellite_manager(leo_initial_state() + perturbation, mu * (1.0 + 1e-7));
    let weighting = ObservableWeights::new(ObservationWeight::Scalar(1.0)).with_observable_weight(
        ObservableType::OneWayRange,
        ObservationWeight::from_standard_deviation(0.5),
    );
    let input = EstimationInput::new(&observations).with_weighting(Arc::new(weighting));
    let checker = EstimationConvergenceChecker::builder()
        .maximum_iterations(8)
        .minimum_residual(1e-6)
        .build()
        .unwrap();
    let output = manager.perform_estimation(&input, &checker).unwrap();

    assert_eq!(output.status, EstimationStatus::Converged);
    assert!(output.iterations.len() <= 5);
    let estimate = &output.final_parameters;
    let initial = leo_initial_state();
    for i in 0..3 {
        assert_relative_eq!(estimate[i], initial[i], epsilon = 1e-2);
        assert_relative_eq!(estimate[i + 3], initial[i + 3], epsilon = 1e-5);
    }
    assert_relative_eq!(estimate[6], mu, max_relative = 1e-8);
    assert!(output.correlations().is_some());
}
