//! # odkit
//!
//! Numerical propagation of dynamical systems together with their variational equations, and
//! batch least-squares estimation of initial states and model parameters from tracking
//! observations.
//!
//! ## Pipeline
//!
//! ```text
//! OrbitDeterminationManager ──► VariationalEquationsPropagator ──► DynamicsPropagator ──► integrator
//!            │                                                             │
//!            └──► ObservationSimulator ──► ObservationViabilityCalculator  └──► DynamicalModel
//! ```
//!
//! - [`integrator`] – Euler, RK4 and adaptive RKF4(5) single-step integrators.
//! - [`propagation`] – arc propagation, termination logic, histories and the variational
//!   equations.
//! - [`dynamics`] – the [`DynamicalModel`](dynamics::DynamicalModel) seam and the built-in
//!   translational and linear models.
//! - [`bodies`] – arena of bodies with constant or tabulated ephemerides.
//! - [`parameters`] – identifiers and layout of the estimated parameter vector.
//! - [`observations`] – observable types, link definitions, observation models, simulation and
//!   collections.
//! - [`estimation`] – the batch estimator, its convergence policy and its output.
//! - [`time`] – conversions between [`hifitime::Epoch`] and the propagation time axis.
//!
//! The library logs through the [`log`] facade and never installs a logger.

pub mod bodies;
pub mod constants;
pub mod dynamics;
pub mod estimation;
pub mod integrator;
pub mod observations;
pub mod od_errors;
pub mod parameters;
pub mod propagation;
pub mod time;
