//! # Epoch-ordered histories
//!
//! [`TimeHistory`] is the append-only, strictly increasing `Epoch → value` container used for
//! every numerical solution produced by the propagators (raw/processed states, dependent
//! variables, Φ, S, wall-clock time). Values and epochs live in two index-aligned vectors, so
//! lookups are binary searches and iteration is in epoch order.
//!
//! [`HermiteHistory`] pairs a vector-valued history with the derivative at every node and
//! provides cubic Hermite interpolation. A node whose derivative is not finite (typically the
//! last node before a propagation stopped on a non-finite state) uses the secant slope of its
//! interval instead. It is the dense output behind
//! [`StateTransitionInterface`](crate::propagation::variational::StateTransitionInterface) and
//! the sequential variational integration.

use std::borrow::Cow;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Epoch, EPOCH_TOLERANCE},
    od_errors::OdError,
};

/// Ordered mapping from epoch to value, with strictly increasing epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeHistory<T> {
    epochs: Vec<Epoch>,
    values: Vec<T>,
}

/// Epoch → state vector history.
pub type StateHistory = TimeHistory<DVector<f64>>;

impl<T> Default for TimeHistory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimeHistory<T> {
    pub fn new() -> Self {
        TimeHistory {
            epochs: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Append a value at `epoch`.
    ///
    /// Errors
    /// ------
    /// * [`OdError::NonIncreasingEpoch`] if `epoch` is not strictly after the last epoch.
    pub fn push(&mut self, epoch: Epoch, value: T) -> Result<(), OdError> {
        if let Some(&last) = self.epochs.last() {
            if !(epoch > last) {
                return Err(OdError::NonIncreasingEpoch { epoch, last });
            }
        }
        self.epochs.push(epoch);
        self.values.push(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn clear(&mut self) {
        self.epochs.clear();
        self.values.clear();
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn first(&self) -> Option<(Epoch, &T)> {
        self.epochs.first().copied().zip(self.values.first())
    }

    pub fn last(&self) -> Option<(Epoch, &T)> {
        self.epochs.last().copied().zip(self.values.last())
    }

    /// Exact lookup of the value stored at `epoch`.
    pub fn get(&self, epoch: Epoch) -> Option<&T> {
        self.epochs
            .binary_search_by(|e| e.total_cmp(&epoch))
            .ok()
            .map(|i| &self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Epoch, &T)> + '_ {
        self.epochs.iter().copied().zip(self.values.iter())
    }

    /// Map every value, keeping the epochs.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> TimeHistory<U> {
        TimeHistory {
            epochs: self.epochs.clone(),
            values: self.values.iter().map(f).collect(),
        }
    }

    /// Index `i` such that `epochs[i] <= epoch <= epochs[i + 1]`.
    ///
    /// Epochs within [`EPOCH_TOLERANCE`] of the interval bounds are clamped onto them.
    pub(crate) fn bracket(&self, epoch: Epoch) -> Result<usize, OdError> {
        let n = self.epochs.len();
        if n < 2 {
            return Err(OdError::NoNumericalSolution(format!(
                "interpolation needs at least two nodes, history has {n}"
            )));
        }
        let (start, end) = (self.epochs[0], self.epochs[n - 1]);
        if epoch < start - EPOCH_TOLERANCE || epoch > end + EPOCH_TOLERANCE || epoch.is_nan() {
            return Err(OdError::EpochOutOfRange { epoch, start, end });
        }
        let upper = self.epochs.partition_point(|e| *e <= epoch);
        Ok(upper.clamp(1, n - 1) - 1)
    }
}

/// Vector history with derivatives at every node, interpolated with cubic Hermite polynomials.
#[derive(Debug, Clone, PartialEq)]
pub struct HermiteHistory {
    values: TimeHistory<DVector<f64>>,
    derivatives: Vec<DVector<f64>>,
}

impl Default for HermiteHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl HermiteHistory {
    pub fn new() -> Self {
        HermiteHistory {
            values: TimeHistory::new(),
            derivatives: Vec::new(),
        }
    }

    /// Append a node: value and time derivative at `epoch`.
    pub fn push(
        &mut self,
        epoch: Epoch,
        value: DVector<f64>,
        derivative: DVector<f64>,
    ) -> Result<(), OdError> {
        if value.len() != derivative.len() {
            return Err(OdError::dimension(
                "Hermite node derivative",
                value.len(),
                derivative.len(),
            ));
        }
        self.values.push(epoch, value)?;
        self.derivatives.push(derivative);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn epochs(&self) -> &[Epoch] {
        self.values.epochs()
    }

    pub fn start_epoch(&self) -> Option<Epoch> {
        self.values.first().map(|(t, _)| t)
    }

    pub fn end_epoch(&self) -> Option<Epoch> {
        self.values.last().map(|(t, _)| t)
    }

    pub fn history(&self) -> &TimeHistory<DVector<f64>> {
        &self.values
    }

    /// Cubic Hermite interpolation of the stored vector at `epoch`.
    ///
    /// Nodes are returned exactly. A single-node history only answers at its own epoch.
    ///
    /// Errors
    /// ------
    /// * [`OdError::EpochOutOfRange`] if `epoch` is outside the stored interval.
    /// * [`OdError::NoNumericalSolution`] if the history is empty.
    /// * [`OdError::NonFiniteValue`] if the interpolated value is not finite.
    pub fn interpolate(&self, epoch: Epoch) -> Result<DVector<f64>, OdError> {
        if let Some(value) = self.values.get(epoch) {
            return finite(epoch, value.clone());
        }
        if let Some(index) = self.single_node(epoch)? {
            return finite(epoch, self.values.values()[index].clone());
        }

        let (i, h, s) = self.locate(epoch)?;
        let values = self.values.values();

        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;

        finite(
            epoch,
            &values[i] * h00
                + &*self.slope(i, i) * (h10 * h)
                + &values[i + 1] * h01
                + &*self.slope(i + 1, i) * (h11 * h),
        )
    }

    /// Time derivative of the Hermite interpolant at `epoch`.
    ///
    /// At the nodes this returns the stored derivative, or the secant slope of the previous
    /// interval if the stored one is not finite.
    ///
    /// Errors
    /// ------
    /// * Same as [`interpolate`](Self::interpolate).
    pub fn interpolate_derivative(&self, epoch: Epoch) -> Result<DVector<f64>, OdError> {
        if let Ok(index) = self
            .values
            .epochs()
            .binary_search_by(|e| e.total_cmp(&epoch))
        {
            let interval = index.saturating_sub(1).min(self.len().saturating_sub(2));
            return finite(epoch, self.slope(index, interval).into_owned());
        }
        if let Some(index) = self.single_node(epoch)? {
            return finite(epoch, self.derivatives[index].clone());
        }

        let (i, h, s) = self.locate(epoch)?;
        let values = self.values.values();

        let s2 = s * s;
        let d00 = 6.0 * s2 - 6.0 * s;
        let d10 = 3.0 * s2 - 4.0 * s + 1.0;
        let d01 = -6.0 * s2 + 6.0 * s;
        let d11 = 3.0 * s2 - 2.0 * s;

        finite(
            epoch,
            (&values[i] * d00 + &values[i + 1] * d01) / h
                + &*self.slope(i, i) * d10
                + &*self.slope(i + 1, i) * d11,
        )
    }

    /// Derivative at `node`, replaced by the secant slope over `interval` when not finite.
    fn slope(&self, node: usize, interval: usize) -> Cow<'_, DVector<f64>> {
        let derivative = &self.derivatives[node];
        if derivative.iter().all(|v| v.is_finite()) || self.len() < 2 {
            return Cow::Borrowed(derivative);
        }
        let epochs = self.values.epochs();
        let values = self.values.values();
        Cow::Owned(
            (&values[interval + 1] - &values[interval]) / (epochs[interval + 1] - epochs[interval]),
        )
    }

    /// Handle the one-node history: `Some(0)` if `epoch` matches the node, `None` if the
    /// history has more nodes.
    fn single_node(&self, epoch: Epoch) -> Result<Option<usize>, OdError> {
        match self.values.first() {
            None => Err(OdError::NoNumericalSolution(
                "empty interpolation history".into(),
            )),
            Some((t0, _)) if self.values.len() == 1 => {
                if (epoch - t0).abs() <= EPOCH_TOLERANCE {
                    Ok(Some(0))
                } else {
                    Err(OdError::EpochOutOfRange {
                        epoch,
                        start: t0,
                        end: t0,
                    })
                }
            }
            Some(_) => Ok(None),
        }
    }

    /// Interval index, interval length and normalised abscissa for `epoch`.
    fn locate(&self, epoch: Epoch) -> Result<(usize, f64, f64), OdError> {
        let i = self.values.bracket(epoch)?;
        let epochs = self.values.epochs();
        let h = epochs[i + 1] - epochs[i];
        let s = ((epoch - epochs[i]) / h).clamp(0.0, 1.0);
        Ok((i, h, s))
    }
}

fn finite(epoch: Epoch, value: DVector<f64>) -> Result<DVector<f64>, OdError> {
    if value.iter().all(|v| v.is_finite()) {
        Ok(value)
    } else {
        Err(OdError::NonFiniteValue(format!(
            "interpolated history at epoch {epoch}"
        )))
    }
}
