//! # Constants and type definitions for odkit
//!
//! This module centralizes the **physical constants**, **conversion factors**, and **common type
//! definitions** shared by the propagation and estimation layers.
//!
//! ## Overview
//!
//! - Scalar aliases used to document units in signatures (`Epoch`, `Second`, `Meter`, `Radian`)
//! - Vector/matrix aliases for dynamical states and variational matrices
//! - A handful of physical constants used by the built-in models and their tests
//!
//! Epochs are plain `f64` values in **TDB seconds since J2000**; use the helpers in
//! [`crate::time`] to go back and forth with [`hifitime::Epoch`].

use nalgebra::{DMatrix, DVector};

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// 2π, useful for angle normalization
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Earth gravitational parameter in m³/s² (EGM2008)
pub const EARTH_GRAVITATIONAL_PARAMETER: f64 = 3.986_004_418e14;

/// Earth equatorial radius in meters (GRS1980/WGS84)
pub const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;

/// Moon gravitational parameter in m³/s²
pub const MOON_GRAVITATIONAL_PARAMETER: f64 = 4.902_800_066e12;

/// Tolerance used when comparing an epoch against an interval bound
pub const EPOCH_TOLERANCE: f64 = 1e-9;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Propagation epoch, TDB seconds since J2000
pub type Epoch = f64;
/// Duration in seconds
pub type Second = f64;
/// Distance in meters
pub type Meter = f64;
/// Angle in radians
pub type Radian = f64;

/// Dynamical state vector, dimension fixed per arc
pub type StateVector = DVector<f64>;
/// Dense matrix used for Jacobians, Φ and S
pub type Matrix = DMatrix<f64>;
