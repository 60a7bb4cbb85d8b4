//! Step driver shared by the dynamics and variational propagators.
//!
//! The driver owns the integrator, the current epoch/state and the step-size proposal carried
//! between steps, so that a run split over several `advance` calls is identical to an
//! uninterrupted one. Recording is left to the caller.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{
    constants::{Epoch, Second, StateVector, EPOCH_TOLERANCE},
    integrator::{DerivativeFunction, IntegratorSettings, NumericalIntegrator},
    od_errors::OdError,
};

use super::{TerminationContext, TerminationReason, TerminationSettings};

#[derive(Debug)]
pub(crate) struct ArcDriver {
    integrator: Box<dyn NumericalIntegrator>,
    termination: TerminationSettings,
    /// Leading components of the integrated vector seen by the termination conditions.
    dynamical_size: usize,
    epoch: Epoch,
    state: StateVector,
    next_step_size: Second,
    steps: usize,
    function_evaluations: usize,
    started: Instant,
    termination_reason: Option<TerminationReason>,
}

impl ArcDriver {
    pub(crate) fn new(
        integrator_settings: &IntegratorSettings,
        termination: TerminationSettings,
        dynamical_size: usize,
        initial_epoch: Epoch,
        initial_state: StateVector,
    ) -> Result<Self, OdError> {
        termination.validate(initial_epoch)?;
        let integrator = integrator_settings.build()?;
        let next_step_size = integrator.initial_step_size();
        Ok(ArcDriver {
            integrator,
            termination,
            dynamical_size,
            epoch: initial_epoch,
            state: initial_state,
            next_step_size,
            steps: 0,
            function_evaluations: 0,
            started: Instant::now(),
            termination_reason: None,
        })
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub(crate) fn state(&self) -> &StateVector {
        &self.state
    }

    pub(crate) fn function_evaluations(&self) -> usize {
        self.function_evaluations
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.termination_reason.is_some()
    }

    /// Take one integrator step.
    ///
    /// Return
    /// ------
    /// * `Ok(true)` if a new step was accepted and should be recorded, `Ok(false)` if the arc
    ///   had already terminated or the step produced a non-finite state.
    pub(crate) fn advance(&mut self, derivative: &mut DerivativeFunction<'_>) -> Result<bool, OdError> {
        if self.is_terminal() {
            return Ok(false);
        }

        let exact_final = self.termination.exact_final_epoch();
        let mut step_size = self.next_step_size;
        if let Some(final_epoch) = exact_final {
            if self.epoch + step_size > final_epoch {
                step_size = final_epoch - self.epoch;
            }
        }

        let outcome = self
            .integrator
            .perform_step(derivative, self.epoch, &self.state, step_size)?;
        self.function_evaluations += outcome.function_evaluations;
        self.steps += 1;

        if outcome.state.iter().any(|x| !x.is_finite()) {
            warn!(
                "Non-finite state after the step from {} to {}; propagation stopped",
                self.epoch, outcome.epoch
            );
            self.termination_reason = Some(TerminationReason::NonFiniteState {
                epoch: outcome.epoch,
            });
            return Ok(false);
        }

        self.epoch = match exact_final {
            Some(final_epoch) if (outcome.epoch - final_epoch).abs() <= EPOCH_TOLERANCE => final_epoch,
            _ => outcome.epoch,
        };
        self.state = outcome.state;
        self.next_step_size = outcome.next_step_size;

        let dynamical_size = self.dynamical_size.min(self.state.len());
        let context = TerminationContext {
            epoch: self.epoch,
            state: &self.state.as_slice()[..dynamical_size],
            steps: self.steps,
            elapsed: self.started.elapsed(),
        };
        self.termination_reason = self.termination.check(&context);
        if let Some(reason) = self.termination_reason {
            debug!(
                "Propagation terminated at epoch {} after {} steps: {reason}",
                self.epoch, self.steps
            );
        }
        Ok(true)
    }
}
