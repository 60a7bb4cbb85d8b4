//! # Estimation
//!
//! Batch least-squares estimation of initial states and model parameters from an
//! [`ObservationCollection`](crate::observations::collection::ObservationCollection).
//!
//! ## Overview
//!
//! - [`manager`] – [`OrbitDeterminationManager`](manager::OrbitDeterminationManager), the
//!   Gauss–Newton loop over propagation, observation partials and normal equations.
//! - [`input`] – [`EstimationInput`](input::EstimationInput), observations and run flags.
//! - [`weights`] – observation weights, scalar or diagonal, per observable and link.
//! - [`convergence`] – [`EstimationConvergenceChecker`](convergence::EstimationConvergenceChecker),
//!   the stopping policy.
//! - [`output`] – [`EstimationOutput`](output::EstimationOutput), the per-iteration trace with
//!   covariance, formal errors and correlations.
//!
//! ## Example
//!
//! ```rust,no_run
//! use odkit::estimation::{
//!     convergence::EstimationConvergenceChecker, input::EstimationInput,
//!     manager::OrbitDeterminationManager,
//! };
//! # fn run<M: odkit::dynamics::DynamicalModel>(
//! #     manager: &mut OrbitDeterminationManager<M>,
//! #     observations: &odkit::observations::collection::ObservationCollection,
//! # ) -> Result<(), odkit::od_errors::OdError> {
//! let checker = EstimationConvergenceChecker::builder()
//!     .maximum_iterations(10)
//!     .minimum_residual_change(1e-6)
//!     .build()?;
//! let output = manager.perform_estimation(&EstimationInput::new(observations), &checker)?;
//! println!("{output:#}");
//! # Ok(())
//! # }
//! ```

pub mod convergence;
pub mod input;
pub mod manager;
pub mod output;
pub mod weights;
