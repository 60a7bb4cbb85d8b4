//! # Estimatable parameters
//!
//! Identification and layout of the parameter vector solved for by the estimation.
//!
//! ## Overview
//!
//! The parameter vector is partitioned into:
//!
//! - **state parameters** – initial states of the propagated bodies, always placed first and
//!   covering the whole propagated state vector, in order;
//! - **non-state parameters** – constants of the dynamical model (gravitational parameters,
//!   empirical accelerations, ...), placed after the state block in the order the model
//!   declares them through [`DynamicalModel::parameter_ids`](crate::dynamics::DynamicalModel::parameter_ids).
//!
//! [`EstimatableParameterSet`] validates that layout and maps ids to their slice of the vector.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::od_errors::OdError;

/// Identifier of one estimatable parameter (possibly vector-valued).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EstimatableParameterId {
    /// Initial state of a body, `size` components of the propagated state.
    InitialState { body: String, size: usize },
    /// Gravitational parameter μ of a body (m³/s²).
    GravitationalParameter { body: String },
    /// Constant empirical acceleration acting on a body (3 components, m/s²).
    ConstantEmpiricalAcceleration { body: String },
    /// Radiation pressure coefficient of a body.
    RadiationPressureCoefficient { body: String },
    /// Named scalar constant of a dynamical model.
    ModelConstant { name: String },
}

impl EstimatableParameterId {
    /// Number of scalar entries of the parameter.
    pub fn size(&self) -> usize {
        match self {
            EstimatableParameterId::InitialState { size, .. } => *size,
            EstimatableParameterId::ConstantEmpiricalAcceleration { .. } => 3,
            EstimatableParameterId::GravitationalParameter { .. }
            | EstimatableParameterId::RadiationPressureCoefficient { .. }
            | EstimatableParameterId::ModelConstant { .. } => 1,
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(self, EstimatableParameterId::InitialState { .. })
    }
}

impl fmt::Display for EstimatableParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimatableParameterId::InitialState { body, .. } => write!(f, "initial state of {body}"),
            EstimatableParameterId::GravitationalParameter { body } => {
                write!(f, "gravitational parameter of {body}")
            }
            EstimatableParameterId::ConstantEmpiricalAcceleration { body } => {
                write!(f, "constant empirical acceleration of {body}")
            }
            EstimatableParameterId::RadiationPressureCoefficient { body } => {
                write!(f, "radiation pressure coefficient of {body}")
            }
            EstimatableParameterId::ModelConstant { name } => write!(f, "model constant {name}"),
        }
    }
}

/// Ordered, validated list of estimated parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatableParameterSet {
    ids: Vec<EstimatableParameterId>,
    state_size: usize,
    total_size: usize,
}

impl EstimatableParameterSet {
    /// Build a parameter set.
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidParameterSettings`] if a state parameter follows a non-state one,
    ///   if an id appears twice or if an entry is empty.
    pub fn new(ids: Vec<EstimatableParameterId>) -> Result<Self, OdError> {
        if let Some(position) = ids.iter().position(|id| !id.is_state()) {
            if ids[position..].iter().any(EstimatableParameterId::is_state) {
                return Err(OdError::InvalidParameterSettings(
                    "initial-state parameters must precede all other parameters".into(),
                ));
            }
        }
        for (i, id) in ids.iter().enumerate() {
            if id.size() == 0 {
                return Err(OdError::InvalidParameterSettings(format!("{id} has no entries")));
            }
            if ids[..i].contains(id) {
                return Err(OdError::InvalidParameterSettings(format!("{id} is listed twice")));
            }
        }

        let state_size = ids.iter().filter(|id| id.is_state()).map(|id| id.size()).sum();
        let total_size = ids.iter().map(|id| id.size()).sum();
        Ok(EstimatableParameterSet {
            ids,
            state_size,
            total_size,
        })
    }

    pub fn ids(&self) -> &[EstimatableParameterId] {
        &self.ids
    }

    /// Number of initial-state entries.
    pub fn state_size(&self) -> usize {
        self.state_size
    }

    /// Number of entries after the state block.
    pub fn non_state_size(&self) -> usize {
        self.total_size - self.state_size
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn non_state_ids(&self) -> Vec<EstimatableParameterId> {
        self.ids.iter().filter(|id| !id.is_state()).cloned().collect()
    }

    /// Offset of a parameter in the full vector.
    pub fn offset(&self, id: &EstimatableParameterId) -> Option<usize> {
        let mut offset = 0;
        for candidate in &self.ids {
            if candidate == id {
                return Some(offset);
            }
            offset += candidate.size();
        }
        None
    }

    /// One label per scalar entry, e.g. `"gravitational parameter of Earth"` or
    /// `"initial state of Sat [3]"`.
    pub fn descriptions(&self) -> Vec<String> {
        self.ids
            .iter()
            .flat_map(|id| {
                let size = id.size();
                (0..size).map(move |i| {
                    if size == 1 {
                        id.to_string()
                    } else {
                        format!("{id} [{i}]")
                    }
                })
            })
            .collect()
    }
}
