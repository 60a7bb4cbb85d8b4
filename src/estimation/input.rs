//! Input of one estimation run.

use std::sync::Arc;

use crate::{constants::Matrix, observations::collection::ObservationCollection};

use super::weights::{ConstantWeight, ObservationWeighting};

/// Observations and run flags of [`perform_estimation`](super::manager::OrbitDeterminationManager::perform_estimation).
///
/// The collection is borrowed: the estimation never mutates it. Rejected observations of the
/// collection are ignored.
#[derive(Debug, Clone)]
pub struct EstimationInput<'a> {
    pub observations: &'a ObservationCollection,
    pub weighting: Arc<dyn ObservationWeighting>,
    /// Inverse of the a-priori covariance, `(n + m) × (n + m)`.
    pub inverse_a_priori_covariance: Option<Matrix>,
    pub reintegrate_equations_on_first_iteration: bool,
    pub save_design_matrix: bool,
    pub save_state_history_per_iteration: bool,
}

impl<'a> EstimationInput<'a> {
    /// Unit weights, no a-priori information, reintegration on the first iteration.
    pub fn new(observations: &'a ObservationCollection) -> Self {
        EstimationInput {
            observations,
            weighting: Arc::new(ConstantWeight::default()),
            inverse_a_priori_covariance: None,
            reintegrate_equations_on_first_iteration: true,
            save_design_matrix: false,
            save_state_history_per_iteration: false,
        }
    }

    pub fn with_weighting(mut self, weighting: Arc<dyn ObservationWeighting>) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_inverse_a_priori_covariance(mut self, inverse: Matrix) -> Self {
        self.inverse_a_priori_covariance = Some(inverse);
        self
    }

    pub fn reintegrate_equations_on_first_iteration(mut self, v: bool) -> Self {
        self.reintegrate_equations_on_first_iteration = v;
        self
    }

    pub fn save_design_matrix(mut self, v: bool) -> Self {
        self.save_design_matrix = v;
        self
    }

    pub fn save_state_history_per_iteration(mut self, v: bool) -> Self {
        self.save_state_history_per_iteration = v;
        self
    }
}
