//! # Runge–Kutta–Fehlberg 4(5)
//!
//! Six-stage embedded pair. The 5th-order solution is propagated (local extrapolation) and the
//! difference with the 4th-order solution drives an I-controller on the step size:
//!
//! ```text
//! err = max_i |y5_i - y4_i| / (atol + rtol * max(|y_i|, |y5_i|))
//! h_new = h * clamp(safety * err^(-1/5), min_factor, max_factor)
//! ```
//!
//! A step with `err > 1` is rejected and retried with a smaller step, down to the minimum step
//! size, where it is accepted with a warning. A non-finite error estimate is not retried: the
//! step is returned so that the propagator reports the non-finite state.

use log::warn;

use crate::{
    constants::{Epoch, Second, StateVector},
    od_errors::OdError,
};

use super::{DerivativeFunction, NumericalIntegrator, StepOutcome};

const C: [f64; 6] = [0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0];

const A: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 4.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 32.0, 9.0 / 32.0, 0.0, 0.0, 0.0],
    [1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0, 0.0, 0.0],
    [439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0, 0.0],
    [-8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0],
];

/// 5th-order weights.
const B5: [f64; 6] = [
    16.0 / 135.0,
    0.0,
    6656.0 / 12825.0,
    28561.0 / 56430.0,
    -9.0 / 50.0,
    2.0 / 55.0,
];

/// 4th-order weights.
const B4: [f64; 6] = [
    25.0 / 216.0,
    0.0,
    1408.0 / 2565.0,
    2197.0 / 4104.0,
    -1.0 / 5.0,
    0.0,
];

/// Step-size controller constants.
#[derive(Debug, Clone)]
pub struct StepController {
    pub safety: f64,
    pub max_factor: f64,
    pub min_factor: f64,
    exponent: f64,
}

impl Default for StepController {
    fn default() -> Self {
        StepController {
            safety: 0.8,
            max_factor: 4.0,
            min_factor: 0.1,
            exponent: 1.0 / 5.0,
        }
    }
}

impl StepController {
    pub fn compute_factor(&self, error: f64) -> f64 {
        if error == 0.0 {
            return self.max_factor;
        }
        (self.safety * error.powf(-self.exponent)).clamp(self.min_factor, self.max_factor)
    }
}

/// Adaptive Fehlberg 4(5) integrator.
#[derive(Debug, Clone)]
pub struct RungeKuttaFehlberg45 {
    initial_step_size: Second,
    minimum_step_size: Second,
    maximum_step_size: Second,
    relative_tolerance: f64,
    absolute_tolerance: f64,
    controller: StepController,
    /// Rejected attempts since construction.
    pub rejected_steps: u64,
}

impl RungeKuttaFehlberg45 {
    pub fn new(
        initial_step_size: Second,
        minimum_step_size: Second,
        maximum_step_size: Second,
        relative_tolerance: f64,
        absolute_tolerance: f64,
    ) -> Self {
        RungeKuttaFehlberg45 {
            initial_step_size,
            minimum_step_size,
            maximum_step_size,
            relative_tolerance,
            absolute_tolerance,
            controller: StepController::default(),
            rejected_steps: 0,
        }
    }

    /// Stages, 5th-order solution and normalised error estimate for a trial step `h`.
    fn attempt(
        &self,
        derivative: &mut DerivativeFunction<'_>,
        epoch: Epoch,
        state: &StateVector,
        h: Second,
    ) -> Result<(StateVector, f64), OdError> {
        let mut k: Vec<StateVector> = Vec::with_capacity(6);
        for stage in 0..6 {
            let mut y = state.clone();
            for (j, kj) in k.iter().enumerate() {
                let a = A[stage][j];
                if a != 0.0 {
                    y += kj * (a * h);
                }
            }
            k.push(derivative(epoch + C[stage] * h, &y)?);
        }

        let mut y5 = state.clone();
        let mut delta = StateVector::zeros(state.len());
        for (stage, ks) in k.iter().enumerate() {
            y5 += ks * (B5[stage] * h);
            delta += ks * ((B5[stage] - B4[stage]) * h);
        }

        let error = delta
            .iter()
            .zip(state.iter().zip(y5.iter()))
            .map(|(d, (y0, y1))| {
                let scale = self.absolute_tolerance + self.relative_tolerance * y0.abs().max(y1.abs());
                (d / scale).abs()
            })
            .fold(0.0_f64, |acc, e| {
                if acc.is_nan() || e.is_nan() {
                    f64::NAN
                } else {
                    acc.max(e)
                }
            });

        Ok((y5, error))
    }
}

impl NumericalIntegrator for RungeKuttaFehlberg45 {
    fn perform_step(
        &mut self,
        derivative: &mut DerivativeFunction<'_>,
        epoch: Epoch,
        state: &StateVector,
        step_size: Second,
    ) -> Result<StepOutcome, OdError> {
        // a step shortened by the caller to land on a final epoch may go below the floor
        let floor = self.minimum_step_size.min(step_size);
        let mut h = step_size.min(self.maximum_step_size);
        let mut evaluations = 0;

        loop {
            let (y5, error) = self.attempt(derivative, epoch, state, h)?;
            evaluations += 6;

            if !error.is_finite() || error <= 1.0 || h <= floor {
                if error.is_finite() && error > 1.0 {
                    warn!(
                        "RKF45 accepted a step at the minimum step size {h:e} s with error ratio {error:.3e} at epoch {epoch}"
                    );
                }
                let next = (h * self.controller.compute_factor(error))
                    .clamp(self.minimum_step_size, self.maximum_step_size);
                return Ok(StepOutcome {
                    epoch: epoch + h,
                    state: y5,
                    step_size_used: h,
                    next_step_size: if next.is_finite() { next } else { h },
                    function_evaluations: evaluations,
                });
            }

            self.rejected_steps += 1;
            h = (h * self.controller.compute_factor(error)).max(floor);
        }
    }

    fn initial_step_size(&self) -> Second {
        self.initial_step_size
    }
}
