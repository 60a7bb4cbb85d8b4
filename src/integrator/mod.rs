//! # Numerical integrators
//!
//! Single-step integrators advancing a state vector `x(t)` of the system `ẋ = f(t, x)`.
//!
//! ## Overview
//!
//! Every integrator implements [`NumericalIntegrator::perform_step`]: given the derivative
//! function, the current epoch/state and a requested step size, it returns a [`StepOutcome`]
//! with the new epoch and state, the step size actually used, the step size it proposes for the
//! next call and the number of derivative evaluations it spent.
//!
//! Integrators never check the returned state for finiteness. A NaN or infinite component is a
//! propagation failure that the [`propagation`](crate::propagation) layer detects and reports
//! through its termination reason.
//!
//! Available schemes (selected with [`IntegratorSettings`]):
//!
//! | Settings variant         | Scheme                                 | Step size  |
//! |--------------------------|----------------------------------------|------------|
//! | `Euler`                  | explicit Euler                         | fixed      |
//! | `RungeKutta4`            | classical 4th-order Runge–Kutta        | fixed      |
//! | `RungeKuttaFehlberg45`   | embedded Fehlberg 4(5) pair            | adaptive   |
//!
//! Only forward propagation is supported: step sizes are strictly positive.
//!
//! ## See also
//! * [`DynamicsPropagator`](crate::propagation::dynamics::DynamicsPropagator) – drives an
//!   integrator across an arc.

pub mod rkf45;
pub mod runge_kutta;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{Epoch, Second, StateVector},
    od_errors::OdError,
};

use self::{
    rkf45::RungeKuttaFehlberg45,
    runge_kutta::{Euler, RungeKutta4},
};

/// Derivative function `f(t, x)` handed to the integrators.
pub type DerivativeFunction<'a> = dyn FnMut(Epoch, &StateVector) -> Result<StateVector, OdError> + 'a;

/// Result of one accepted integration step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Epoch reached by the step.
    pub epoch: Epoch,
    /// State at `epoch`.
    pub state: StateVector,
    /// Step size actually taken.
    pub step_size_used: Second,
    /// Step size to request on the next call.
    pub next_step_size: Second,
    /// Derivative evaluations spent, rejected attempts included.
    pub function_evaluations: usize,
}

/// One-step integration scheme.
pub trait NumericalIntegrator: fmt::Debug {
    /// Advance `state` from `epoch` by (at most) `step_size`.
    ///
    /// Arguments
    /// ---------
    /// * `derivative`: the right-hand side `f(t, x)`
    /// * `epoch`: current epoch
    /// * `state`: current state
    /// * `step_size`: requested step size, strictly positive
    ///
    /// Return
    /// ------
    /// * The accepted step, or the error returned by the derivative function
    fn perform_step(
        &mut self,
        derivative: &mut DerivativeFunction<'_>,
        epoch: Epoch,
        state: &StateVector,
        step_size: Second,
    ) -> Result<StepOutcome, OdError>;

    /// Step size to request for the first step of an arc.
    fn initial_step_size(&self) -> Second;
}

/// Integrator selection and tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntegratorSettings {
    Euler {
        step_size: Second,
    },
    RungeKutta4 {
        step_size: Second,
    },
    RungeKuttaFehlberg45 {
        initial_step_size: Second,
        minimum_step_size: Second,
        maximum_step_size: Second,
        relative_tolerance: f64,
        absolute_tolerance: f64,
    },
}

#[inline]
fn gt0(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

impl IntegratorSettings {
    /// Adaptive Fehlberg 4(5) settings with the given step bounds and a common tolerance.
    pub fn rkf45(
        initial_step_size: Second,
        minimum_step_size: Second,
        maximum_step_size: Second,
        tolerance: f64,
    ) -> Self {
        IntegratorSettings::RungeKuttaFehlberg45 {
            initial_step_size,
            minimum_step_size,
            maximum_step_size,
            relative_tolerance: tolerance,
            absolute_tolerance: tolerance,
        }
    }

    /// Check the settings for consistency.
    ///
    /// Validation rules
    /// -----------------
    /// * fixed step sizes are finite and `> 0`;
    /// * `0 < minimum_step_size <= initial_step_size <= maximum_step_size`;
    /// * tolerances are finite and `> 0`.
    pub fn validate(&self) -> Result<(), OdError> {
        match *self {
            IntegratorSettings::Euler { step_size }
            | IntegratorSettings::RungeKutta4 { step_size } => {
                if !gt0(step_size) {
                    return Err(OdError::InvalidIntegratorSettings(format!(
                        "step_size must be finite and > 0, got {step_size}"
                    )));
                }
            }
            IntegratorSettings::RungeKuttaFehlberg45 {
                initial_step_size,
                minimum_step_size,
                maximum_step_size,
                relative_tolerance,
                absolute_tolerance,
            } => {
                if !(gt0(minimum_step_size) && gt0(initial_step_size) && gt0(maximum_step_size))
                {
                    return Err(OdError::InvalidIntegratorSettings(
                        "step sizes must be finite and > 0".into(),
                    ));
                }
                if !(minimum_step_size <= initial_step_size
                    && initial_step_size <= maximum_step_size)
                {
                    return Err(OdError::InvalidIntegratorSettings(
                        "require minimum_step_size <= initial_step_size <= maximum_step_size"
                            .into(),
                    ));
                }
                if !(gt0(relative_tolerance) && gt0(absolute_tolerance)) {
                    return Err(OdError::InvalidIntegratorSettings(
                        "tolerances must be finite and > 0".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Validate the settings and instantiate the integrator.
    pub fn build(&self) -> Result<Box<dyn NumericalIntegrator>, OdError> {
        self.validate()?;
        Ok(match *self {
            IntegratorSettings::Euler { step_size } => Box::new(Euler::new(step_size)),
            IntegratorSettings::RungeKutta4 { step_size } => Box::new(RungeKutta4::new(step_size)),
            IntegratorSettings::RungeKuttaFehlberg45 {
                initial_step_size,
                minimum_step_size,
                maximum_step_size,
                relative_tolerance,
                absolute_tolerance,
            } => Box::new(RungeKuttaFehlberg45::new(
                initial_step_size,
                minimum_step_size,
                maximum_step_size,
                relative_tolerance,
                absolute_tolerance,
            )),
        })
    }
}

impl fmt::Display for IntegratorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 36;
            writeln!(f, "Integrator Settings")?;
            writeln!(f, "-------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            match self {
                IntegratorSettings::Euler { step_size } => {
                    line!("scheme             = {}", "Euler", "explicit, order 1")?;
                    line!("step_size          = {:.3} s", step_size, "fixed step")
                }
                IntegratorSettings::RungeKutta4 { step_size } => {
                    line!("scheme             = {}", "RK4", "explicit, order 4")?;
                    line!("step_size          = {:.3} s", step_size, "fixed step")
                }
                IntegratorSettings::RungeKuttaFehlberg45 {
                    initial_step_size,
                    minimum_step_size,
                    maximum_step_size,
                    relative_tolerance,
                    absolute_tolerance,
                } => {
                    line!("scheme             = {}", "RKF45", "embedded 4(5), adaptive")?;
                    line!("initial_step_size  = {:.3} s", initial_step_size, "first step")?;
                    line!("minimum_step_size  = {:.3e} s", minimum_step_size, "step floor")?;
                    line!("maximum_step_size  = {:.3} s", maximum_step_size, "step ceiling")?;
                    line!("relative_tolerance = {:.1e}", relative_tolerance, "per component")?;
                    line!("absolute_tolerance = {:.1e}", absolute_tolerance, "per component")
                }
            }
        } else {
            match self {
                IntegratorSettings::Euler { step_size } => write!(f, "Euler(h={step_size})"),
                IntegratorSettings::RungeKutta4 { step_size } => write!(f, "RK4(h={step_size})"),
                IntegratorSettings::RungeKuttaFehlberg45 {
                    initial_step_size,
                    relative_tolerance,
                    ..
                } => write!(
                    f,
                    "RKF45(h0={initial_step_size}, rtol={relative_tolerance:.1e})"
                ),
            }
        }
    }
}

#[cfg(test)]
mod integrator_test {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(IntegratorSettings::RungeKutta4 { step_size: 10.0 }
            .validate()
            .is_ok());
        assert!(matches!(
            IntegratorSettings::Euler { step_size: 0.0 }.validate(),
            Err(OdError::InvalidIntegratorSettings(_))
        ));
        assert!(IntegratorSettings::Euler {
            step_size: f64::NAN
        }
        .build()
        .is_err());
        assert!(IntegratorSettings::rkf45(10.0, 20.0, 100.0, 1e-10)
            .validate()
            .is_err());
        assert!(IntegratorSettings::rkf45(10.0, 1.0, 100.0, 0.0)
            .validate()
            .is_err());
        assert!(IntegratorSettings::rkf45(10.0, 1.0e-3, 100.0, 1e-10)
            .build()
            .is_ok());
    }

    #[test]
    fn test_serde_roundtrip() {
        let settings = IntegratorSettings::rkf45(10.0, 1.0e-3, 100.0, 1e-10);
        let json = serde_json::to_string(&settings).unwrap();
        let back: IntegratorSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_display() {
        let settings = IntegratorSettings::RungeKutta4 { step_size: 5.0 };
        assert_eq!(format!("{settings}"), "RK4(h=5)");
        let pretty = format!("{settings:#}");
        assert!(pretty.contains("Integrator Settings"));
        assert!(pretty.contains("step_size          = 5.000 s"));
    }
}
