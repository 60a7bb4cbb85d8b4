//! # Propagation
//!
//! Numerical propagation of the equations of motion, and of the variational equations, over a
//! single arc.
//!
//! ## Overview
//!
//! A propagation is configured by three independent pieces:
//!
//! - an [`IntegratorSettings`](crate::integrator::IntegratorSettings) selecting the stepping
//!   scheme,
//! - a [`PropagatorSettings`] giving the initial epoch, the initial state and the
//!   [`TerminationSettings`],
//! - a [`PropagationOptions`] with the construction flags (`integrate_on_creation`,
//!   `clear_numerical_solutions`, `set_integrated_result`).
//!
//! The propagators record their solution in [`TimeHistory`](history::TimeHistory) containers
//! (strictly increasing epochs) and report why they stopped through a [`TerminationReason`].
//! A non-finite state is a termination reason and not an error: the history up to the last
//! valid step is kept.
//!
//! ## Modules
//!
//! - [`history`] – epoch-ordered histories and Hermite dense output.
//! - [`dynamics`] – [`DynamicsPropagator`](dynamics::DynamicsPropagator), the equations of
//!   motion alone.
//! - [`variational`] – [`VariationalEquationsPropagator`](variational::VariationalEquationsPropagator),
//!   dynamics plus state transition and sensitivity matrices, and the
//!   [`StateTransitionInterface`](variational::StateTransitionInterface).

pub(crate) mod arc;
pub mod dynamics;
pub mod history;
pub mod variational;

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    constants::{Epoch, StateVector, EPOCH_TOLERANCE},
    od_errors::OdError,
};

/// User predicate over `(epoch, dynamical state)`.
pub type TerminationPredicate = Arc<dyn Fn(Epoch, &[f64]) -> bool + Send + Sync>;

/// When to stop a propagation.
#[derive(Clone)]
pub enum TerminationSettings {
    /// Stop once `final_epoch` is reached. With `terminate_exactly`, the last step is shortened
    /// to land on it.
    Epoch {
        final_epoch: Epoch,
        terminate_exactly: bool,
    },
    /// Stop when the predicate returns `true` after a step.
    Custom(TerminationPredicate),
    /// Stop after this many steps in the current run.
    StepCount(usize),
    /// Stop once the run has used this much wall-clock time.
    WallTime(Duration),
    /// Combination of conditions: any of them (`fulfill_single_condition`) or all of them.
    Hybrid {
        conditions: Vec<TerminationSettings>,
        fulfill_single_condition: bool,
    },
}

impl fmt::Debug for TerminationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSettings::Epoch {
                final_epoch,
                terminate_exactly,
            } => f
                .debug_struct("Epoch")
                .field("final_epoch", final_epoch)
                .field("terminate_exactly", terminate_exactly)
                .finish(),
            TerminationSettings::Custom(_) => f.write_str("Custom(<predicate>)"),
            TerminationSettings::StepCount(n) => f.debug_tuple("StepCount").field(n).finish(),
            TerminationSettings::WallTime(d) => f.debug_tuple("WallTime").field(d).finish(),
            TerminationSettings::Hybrid {
                conditions,
                fulfill_single_condition,
            } => f
                .debug_struct("Hybrid")
                .field("conditions", conditions)
                .field("fulfill_single_condition", fulfill_single_condition)
                .finish(),
        }
    }
}

/// Why a propagation stopped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TerminationReason {
    EpochLimitReached,
    CustomConditionSatisfied,
    /// The integrator produced a NaN or infinite value for a step ending at `epoch`; that step
    /// was not recorded.
    NonFiniteState { epoch: Epoch },
    StepBudgetExhausted,
    TimeBudgetExhausted,
}

impl TerminationReason {
    /// Whether the arc ended on a regular condition (anything but a non-finite state).
    pub fn is_success(&self) -> bool {
        !matches!(self, TerminationReason::NonFiniteState { .. })
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::EpochLimitReached => write!(f, "final epoch reached"),
            TerminationReason::CustomConditionSatisfied => write!(f, "custom condition satisfied"),
            TerminationReason::NonFiniteState { epoch } => {
                write!(f, "non-finite state detected at epoch {epoch}")
            }
            TerminationReason::StepBudgetExhausted => write!(f, "step budget exhausted"),
            TerminationReason::TimeBudgetExhausted => write!(f, "wall-time budget exhausted"),
        }
    }
}

/// Snapshot evaluated by the termination conditions after each accepted step.
pub(crate) struct TerminationContext<'a> {
    pub epoch: Epoch,
    pub state: &'a [f64],
    pub steps: usize,
    pub elapsed: Duration,
}

impl TerminationSettings {
    /// Stop at `final_epoch`, landing on it exactly.
    pub fn until(final_epoch: Epoch) -> Self {
        TerminationSettings::Epoch {
            final_epoch,
            terminate_exactly: true,
        }
    }

    pub fn custom(predicate: impl Fn(Epoch, &[f64]) -> bool + Send + Sync + 'static) -> Self {
        TerminationSettings::Custom(Arc::new(predicate))
    }

    /// Check the settings against the initial epoch of the arc.
    pub fn validate(&self, initial_epoch: Epoch) -> Result<(), OdError> {
        match self {
            TerminationSettings::Epoch { final_epoch, .. } => {
                if !final_epoch.is_finite() || *final_epoch <= initial_epoch {
                    return Err(OdError::InvalidTerminationSettings(format!(
                        "final epoch {final_epoch} must be finite and after the initial epoch {initial_epoch}"
                    )));
                }
            }
            TerminationSettings::StepCount(0) => {
                return Err(OdError::InvalidTerminationSettings(
                    "step budget must be >= 1".into(),
                ));
            }
            TerminationSettings::Hybrid { conditions, .. } => {
                if conditions.is_empty() {
                    return Err(OdError::InvalidTerminationSettings(
                        "hybrid termination needs at least one condition".into(),
                    ));
                }
                for condition in conditions {
                    condition.validate(initial_epoch)?;
                }
            }
            TerminationSettings::Custom(_)
            | TerminationSettings::StepCount(_)
            | TerminationSettings::WallTime(_) => {}
        }
        Ok(())
    }

    /// Epoch that the last step must be shortened to reach, if any.
    pub(crate) fn exact_final_epoch(&self) -> Option<Epoch> {
        match self {
            TerminationSettings::Epoch {
                final_epoch,
                terminate_exactly: true,
            } => Some(*final_epoch),
            TerminationSettings::Hybrid {
                conditions,
                fulfill_single_condition: true,
            } => conditions
                .iter()
                .filter_map(TerminationSettings::exact_final_epoch)
                .min_by(|a, b| a.total_cmp(b)),
            _ => None,
        }
    }

    pub(crate) fn check(&self, context: &TerminationContext<'_>) -> Option<TerminationReason> {
        match self {
            TerminationSettings::Epoch {
                final_epoch,
                terminate_exactly,
            } => {
                let reached = if *terminate_exactly {
                    context.epoch >= final_epoch - EPOCH_TOLERANCE
                } else {
                    context.epoch >= *final_epoch
                };
                reached.then_some(TerminationReason::EpochLimitReached)
            }
            TerminationSettings::Custom(predicate) => (predicate)(context.epoch, context.state)
                .then_some(TerminationReason::CustomConditionSatisfied),
            TerminationSettings::StepCount(budget) => {
                (context.steps >= *budget).then_some(TerminationReason::StepBudgetExhausted)
            }
            TerminationSettings::WallTime(budget) => {
                (context.elapsed >= *budget).then_some(TerminationReason::TimeBudgetExhausted)
            }
            TerminationSettings::Hybrid {
                conditions,
                fulfill_single_condition,
            } => {
                let mut reasons = conditions.iter().map(|c| c.check(context));
                if *fulfill_single_condition {
                    reasons.find_map(|r| r)
                } else {
                    let all: Option<Vec<_>> = reasons.collect();
                    all.and_then(|r| r.into_iter().next())
                }
            }
        }
    }
}

/// Initial conditions and termination of an arc.
#[derive(Debug, Clone)]
pub struct PropagatorSettings {
    pub initial_epoch: Epoch,
    pub initial_state: StateVector,
    pub termination: TerminationSettings,
}

impl PropagatorSettings {
    pub fn new(initial_epoch: Epoch, initial_state: StateVector, termination: TerminationSettings) -> Self {
        PropagatorSettings {
            initial_epoch,
            initial_state,
            termination,
        }
    }
}

/// Construction flags of the propagators.
///
/// * `integrate_on_creation`: propagate immediately in the constructor.
/// * `clear_numerical_solutions`: drop the histories once they have been consumed.
/// * `set_integrated_result`: write the processed state history back into the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationOptions {
    pub integrate_on_creation: bool,
    pub clear_numerical_solutions: bool,
    pub set_integrated_result: bool,
}

impl Default for PropagationOptions {
    fn default() -> Self {
        PropagationOptions {
            integrate_on_creation: true,
            clear_numerical_solutions: false,
            set_integrated_result: false,
        }
    }
}

impl PropagationOptions {
    pub fn integrate_on_creation(mut self, v: bool) -> Self {
        self.integrate_on_creation = v;
        self
    }
    pub fn clear_numerical_solutions(mut self, v: bool) -> Self {
        self.clear_numerical_solutions = v;
        self
    }
    pub fn set_integrated_result(mut self, v: bool) -> Self {
        self.set_integrated_result = v;
        self
    }
}
