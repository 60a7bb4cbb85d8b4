//! Observation weights of the least-squares problem.

use std::{collections::BTreeMap, fmt};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::{
    constants::Epoch,
    observations::{LinkDefinition, ObservableType},
    od_errors::OdError,
};

/// Weight of one observation: the same for every entry, or one per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationWeight {
    Scalar(f64),
    Diagonal(DVector<f64>),
}

impl ObservationWeight {
    /// `1 / σ²`, the usual weight of an observation with standard deviation `σ`.
    pub fn from_standard_deviation(sigma: f64) -> Self {
        ObservationWeight::Scalar(1.0 / (sigma * sigma))
    }

    /// Weights of the `size` entries of one observation.
    ///
    /// Errors
    /// ------
    /// * [`OdError::DimensionMismatch`] if a diagonal weight does not have `size` entries.
    /// * [`OdError::InvalidParameterSettings`] for a negative or non-finite weight.
    pub fn to_diagonal(&self, size: usize) -> Result<DVector<f64>, OdError> {
        let diagonal = match self {
            ObservationWeight::Scalar(w) => DVector::from_element(size, *w),
            ObservationWeight::Diagonal(d) => {
                if d.len() != size {
                    return Err(OdError::dimension("diagonal observation weight", size, d.len()));
                }
                d.clone()
            }
        };
        if diagonal.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(OdError::InvalidParameterSettings(
                "observation weights must be finite and non-negative".into(),
            ));
        }
        Ok(diagonal)
    }
}

/// Weight assigned to each observation of the estimation.
pub trait ObservationWeighting: fmt::Debug {
    fn weight(&self, observable: ObservableType, link: &LinkDefinition, epoch: Epoch) -> ObservationWeight;
}

/// The same scalar weight for every observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantWeight(pub f64);

impl Default for ConstantWeight {
    fn default() -> Self {
        ConstantWeight(1.0)
    }
}

impl ObservationWeighting for ConstantWeight {
    fn weight(&self, _observable: ObservableType, _link: &LinkDefinition, _epoch: Epoch) -> ObservationWeight {
        ObservationWeight::Scalar(self.0)
    }
}

/// Weights per observable type, with per-link overrides and a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableWeights {
    default: ObservationWeight,
    per_observable: BTreeMap<ObservableType, ObservationWeight>,
    per_link: Vec<(ObservableType, LinkDefinition, ObservationWeight)>,
}

impl ObservableWeights {
    pub fn new(default: ObservationWeight) -> Self {
        ObservableWeights {
            default,
            per_observable: BTreeMap::new(),
            per_link: Vec::new(),
        }
    }

    pub fn with_observable_weight(mut self, observable: ObservableType, weight: ObservationWeight) -> Self {
        self.per_observable.insert(observable, weight);
        self
    }

    pub fn with_link_weight(
        mut self,
        observable: ObservableType,
        link: LinkDefinition,
        weight: ObservationWeight,
    ) -> Self {
        self.per_link
            .retain(|(o, l, _)| !(*o == observable && *l == link));
        self.per_link.push((observable, link, weight));
        self
    }
}

impl ObservationWeighting for ObservableWeights {
    fn weight(&self, observable: ObservableType, link: &LinkDefinition, _epoch: Epoch) -> ObservationWeight {
        self.per_link
            .iter()
            .find(|(o, l, _)| *o == observable && l == link)
            .map(|(_, _, w)| w)
            .or_else(|| self.per_observable.get(&observable))
            .unwrap_or(&self.default)
            .clone()
    }
}

#[cfg(test)]
mod weights_test {
    use super::*;
    use crate::observations::LinkEndId;

    #[test]
    fn test_weight_lookup() {
        let link_a = LinkDefinition::one_way(LinkEndId::body("Sat"), LinkEndId::body("A"));
        let link_b = LinkDefinition::one_way(LinkEndId::body("Sat"), LinkEndId::body("B"));
        let weights = ObservableWeights::new(ObservationWeight::Scalar(1.0))
            .with_observable_weight(
                ObservableType::OneWayRange,
                ObservationWeight::from_standard_deviation(10.0),
            )
            .with_link_weight(
                ObservableType::OneWayRange,
                link_b.clone(),
                ObservationWeight::Scalar(4.0),
            );

        assert_eq!(
            weights.weight(ObservableType::OneWayRange, &link_a, 0.0),
            ObservationWeight::Scalar(0.01)
        );
        assert_eq!(
            weights.weight(ObservableType::OneWayRange, &link_b, 0.0),
            ObservationWeight::Scalar(4.0)
        );
        assert_eq!(
            weights.weight(ObservableType::AngularPosition, &link_a, 0.0),
            ObservationWeight::Scalar(1.0)
        );
    }

    #[test]
    fn test_to_diagonal() {
        assert_eq!(
            ObservationWeight::Scalar(2.0).to_diagonal(3).unwrap(),
            DVector::from_element(3, 2.0)
        );
        assert!(ObservationWeight::Diagonal(DVector::zeros(2)).to_diagonal(3).is_err());
        assert!(ObservationWeight::Scalar(-1.0).to_diagonal(1).is_err());
        assert_eq!(ConstantWeight::default().weight(
            ObservableType::OneWayRange,
            &LinkDefinition::one_way(LinkEndId::body("Sat"), LinkEndId::body("A")),
            0.0
        ), ObservationWeight::Scalar(1.0));
    }
}
