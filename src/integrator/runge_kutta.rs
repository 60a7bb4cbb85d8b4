//! Fixed-step explicit schemes: Euler and classical Runge–Kutta 4.

use crate::{
    constants::{Epoch, Second, StateVector},
    od_errors::OdError,
};

use super::{DerivativeFunction, NumericalIntegrator, StepOutcome};

/// Explicit Euler, `x(t + h) = x(t) + h f(t, x)`.
#[derive(Debug, Clone)]
pub struct Euler {
    step_size: Second,
}

impl Euler {
    pub fn new(step_size: Second) -> Self {
        Euler { step_size }
    }
}

impl NumericalIntegrator for Euler {
    fn perform_step(
        &mut self,
        derivative: &mut DerivativeFunction<'_>,
        epoch: Epoch,
        state: &StateVector,
        step_size: Second,
    ) -> Result<StepOutcome, OdError> {
        let k1 = derivative(epoch, state)?;
        Ok(StepOutcome {
            epoch: epoch + step_size,
            state: state + k1 * step_size,
            step_size_used: step_size,
            next_step_size: self.step_size,
            function_evaluations: 1,
        })
    }

    fn initial_step_size(&self) -> Second {
        self.step_size
    }
}

/// Classical 4th-order Runge–Kutta.
#[derive(Debug, Clone)]
pub struct RungeKutta4 {
    step_size: Second,
}

impl RungeKutta4 {
    pub fn new(step_size: Second) -> Self {
        RungeKutta4 { step_size }
    }
}

impl NumericalIntegrator for RungeKutta4 {
    fn perform_step(
        &mut self,
        derivative: &mut DerivativeFunction<'_>,
        epoch: Epoch,
        state: &StateVector,
        step_size: Second,
    ) -> Result<StepOutcome, OdError> {
        let h = step_size;
        let k1 = derivative(epoch, state)?;
        let k2 = derivative(epoch + 0.5 * h, &(state + &k1 * (0.5 * h)))?;
        let k3 = derivative(epoch + 0.5 * h, &(state + &k2 * (0.5 * h)))?;
        let k4 = derivative(epoch + h, &(state + &k3 * h))?;

        let increment = (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0);
        Ok(StepOutcome {
            epoch: epoch + h,
            state: state + increment,
            step_size_used: h,
            next_step_size: self.step_size,
            function_evaluations: 4,
        })
    }

    fn initial_step_size(&self) -> Second {
        self.step_size
    }
}

#[cfg(test)]
mod runge_kutta_test {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    #[test]
    fn test_rk4_exponential_decay() {
        // ẋ = -x, x(0) = 1
        let mut rk4 = RungeKutta4::new(0.1);
        let mut f = |_t: Epoch, x: &StateVector| -> Result<StateVector, OdError> { Ok(-x) };

        let mut epoch = 0.0;
        let mut state = DVector::from_vec(vec![1.0]);
        let mut evaluations = 0;
        for _ in 0..10 {
            let outcome = rk4.perform_step(&mut f, epoch, &state, 0.1).unwrap();
            epoch = outcome.epoch;
            state = outcome.state;
            evaluations += outcome.function_evaluations;
        }

        assert_relative_eq!(epoch, 1.0, epsilon = 1e-12);
        assert_relative_eq!(state[0], (-1.0f64).exp(), epsilon = 1e-6);
        assert_eq!(evaluations, 40);
    }

    #[test]
    fn test_euler_linear_growth_is_exact() {
        let mut euler = Euler::new(2.0);
        let mut f = |_t: Epoch, _x: &StateVector| -> Result<StateVector, OdError> {
            Ok(DVector::from_vec(vec![3.0]))
        };
        let outcome = euler
            .perform_step(&mut f, 0.0, &DVector::from_vec(vec![1.0]), 0.5)
            .unwrap();
        assert_eq!(outcome.state[0], 2.5);
        assert_eq!(outcome.step_size_used, 0.5);
        assert_eq!(outcome.next_step_size, 2.0);
    }
}
