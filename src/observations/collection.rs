//! # Observation collection
//!
//! Storage of observations grouped by `(observable type, link)`, plus simulation of a collection
//! from observation models.
//!
//! ## Ordering
//!
//! Groups ([`SingleObservationSet`]) are kept sorted by `(observable, link)`, so iteration order
//! does not depend on insertion order. Inside a group, observations keep their insertion order
//! and epochs must be non-decreasing.
//!
//! ## Rejected observations
//!
//! Observations that fail a viability check during simulation never enter the groups. They are
//! stored as [`RejectedObservation`]s next to them, so that the estimation only ever sees the
//! accepted ones.
//!
//! ## Noise
//!
//! [`simulate_observations`] adds zero-mean Gaussian noise drawn from [`rand_distr::Normal`] to
//! each scalar entry when the settings request it. Pass a seeded RNG for reproducible results.

use itertools::Itertools;
use log::debug;
use nalgebra::DVector;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::{constants::Epoch, od_errors::OdError};

use super::{
    model::PropagatedStateSource,
    simulator::{find_simulator, ObservationSimulatorBase},
    LinkDefinition, ObservableType,
};

/// Observations of one observable type on one link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleObservationSet {
    observable: ObservableType,
    link: LinkDefinition,
    epochs: Vec<Epoch>,
    values: Vec<DVector<f64>>,
}

impl SingleObservationSet {
    pub fn new(observable: ObservableType, link: LinkDefinition) -> Self {
        SingleObservationSet {
            observable,
            link,
            epochs: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Append an observation.
    ///
    /// Errors
    /// ------
    /// * [`OdError::DimensionMismatch`] if `value` does not have the observable size.
    /// * [`OdError::NonIncreasingEpoch`] if `epoch` is before the last stored epoch.
    pub fn push(&mut self, epoch: Epoch, value: DVector<f64>) -> Result<(), OdError> {
        if value.len() != self.observable.size() {
            return Err(OdError::dimension(
                "observation value",
                self.observable.size(),
                value.len(),
            ));
        }
        if let Some(&last) = self.epochs.last() {
            if epoch < last {
                return Err(OdError::NonIncreasingEpoch { epoch, last });
            }
        }
        self.epochs.push(epoch);
        self.values.push(value);
        Ok(())
    }

    pub fn observable(&self) -> ObservableType {
        self.observable
    }

    pub fn link(&self) -> &LinkDefinition {
        &self.link
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn values(&self) -> &[DVector<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Epoch, &DVector<f64>)> + '_ {
        self.epochs.iter().copied().zip(self.values.iter())
    }
}

/// Observation excluded by a viability check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedObservation {
    pub observable: ObservableType,
    pub link: LinkDefinition,
    pub epoch: Epoch,
    /// Value the observation would have had.
    pub computed: DVector<f64>,
}

/// Observations grouped by `(observable, link)`, with the rejected ones kept aside.
///
/// Deserialization goes through [`ObservationCollection::add_observation`], so groups are
/// sorted again and every value is checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SerializedCollection")]
pub struct ObservationCollection {
    sets: Vec<SingleObservationSet>,
    rejected: Vec<RejectedObservation>,
}

/// Unchecked serialized form of an [`ObservationCollection`].
#[derive(Deserialize)]
struct SerializedCollection {
    sets: Vec<SingleObservationSet>,
    rejected: Vec<RejectedObservation>,
}

impl TryFrom<SerializedCollection> for ObservationCollection {
    type Error = OdError;

    fn try_from(serialized: SerializedCollection) -> Result<Self, Self::Error> {
        let mut collection = ObservationCollection::new();
        for set in serialized.sets {
            if set.epochs.len() != set.values.len() {
                return Err(OdError::dimension(
                    "observation set values",
                    set.epochs.len(),
                    set.values.len(),
                ));
            }
            let SingleObservationSet {
                observable,
                link,
                epochs,
                values,
            } = set;
            for (epoch, value) in epochs.into_iter().zip(values) {
                collection.add_observation(observable, &link, epoch, value)?;
            }
        }
        collection.rejected = serialized.rejected;
        Ok(collection)
    }
}

impl ObservationCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_index(&self, observable: ObservableType, link: &LinkDefinition) -> Result<usize, usize> {
        self.sets
            .binary_search_by(|set| (set.observable, &set.link).cmp(&(observable, link)))
    }

    /// Add one accepted observation.
    pub fn add_observation(
        &mut self,
        observable: ObservableType,
        link: &LinkDefinition,
        epoch: Epoch,
        value: DVector<f64>,
    ) -> Result<(), OdError> {
        let index = match self.set_index(observable, link) {
            Ok(index) => index,
            Err(index) => {
                self.sets
                    .insert(index, SingleObservationSet::new(observable, link.clone()));
                index
            }
        };
        self.sets[index].push(epoch, value)
    }

    pub fn add_rejected(&mut self, rejected: RejectedObservation) {
        self.rejected.push(rejected);
    }

    /// Groups, sorted by `(observable, link)`.
    pub fn sets(&self) -> &[SingleObservationSet] {
        &self.sets
    }

    pub fn get(&self, observable: ObservableType, link: &LinkDefinition) -> Option<&SingleObservationSet> {
        self.set_index(observable, link).ok().map(|index| &self.sets[index])
    }

    pub fn rejected(&self) -> &[RejectedObservation] {
        &self.rejected
    }

    /// Copy of the collection without its rejected observations.
    pub fn without_rejected(&self) -> Self {
        ObservationCollection {
            sets: self.sets.clone(),
            rejected: Vec::new(),
        }
    }

    /// Number of accepted observations.
    pub fn number_of_observations(&self) -> usize {
        self.sets.iter().map(SingleObservationSet::len).sum()
    }

    /// Number of accepted scalar entries, i.e. the length of the residual vector.
    pub fn total_observable_size(&self) -> usize {
        self.sets
            .iter()
            .map(|set| set.len() * set.observable.size())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_observations() == 0
    }

    /// Observable types present in the collection.
    pub fn observable_types(&self) -> Vec<ObservableType> {
        self.sets.iter().map(|set| set.observable).dedup().collect()
    }

    /// All accepted values, concatenated in iteration order.
    pub fn concatenated_observations(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.total_observable_size(),
            self.sets
                .iter()
                .flat_map(|set| set.values.iter())
                .flat_map(|value| value.iter().copied()),
        )
    }
}

/// Which observations to simulate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSimulationSettings {
    pub observable: ObservableType,
    pub link: LinkDefinition,
    pub epochs: Vec<Epoch>,
    /// Standard deviation of the Gaussian noise added to every scalar entry.
    pub noise_standard_deviation: Option<f64>,
}

impl ObservationSimulationSettings {
    pub fn new(observable: ObservableType, link: LinkDefinition, epochs: Vec<Epoch>) -> Self {
        ObservationSimulationSettings {
            observable,
            link,
            epochs,
            noise_standard_deviation: None,
        }
    }

    /// Errors
    /// ------
    /// * [`OdError::NoiseInjectionError`] if `standard_deviation` is negative or not finite.
    pub fn with_noise(mut self, standard_deviation: f64) -> Result<Self, OdError> {
        if !standard_deviation.is_finite() {
            return Err(OdError::NoiseInjectionError(rand_distr::NormalError::BadVariance));
        }
        Normal::new(0.0, standard_deviation)?;
        self.noise_standard_deviation = Some(standard_deviation);
        Ok(self)
    }
}

/// Simulate an observation collection.
///
/// Arguments
/// ---------
/// * `settings`: observable, link, epochs and noise of each group to simulate
/// * `simulators`: observation simulators holding the models of the requested links
/// * `propagated`: source of the propagated state
/// * `rng`: random number generator used for the noise
///
/// Return
/// ------
/// * The collection of viable observations; the non-viable ones are recorded as rejected.
///
/// Errors
/// ------
/// * [`OdError::UnknownObservationModel`] if no simulator has a model for a requested link.
/// * [`OdError::NoiseInjectionError`] for an invalid noise level.
/// * Any error raised while evaluating the models.
pub fn simulate_observations(
    settings: &[ObservationSimulationSettings],
    simulators: &[Box<dyn ObservationSimulatorBase>],
    propagated: &dyn PropagatedStateSource,
    rng: &mut impl rand::Rng,
) -> Result<ObservationCollection, OdError> {
    let mut collection = ObservationCollection::new();

    for setting in settings {
        let simulator = find_simulator(simulators, setting.observable, &setting.link)?;
        let noise = setting
            .noise_standard_deviation
            .map(|sigma| Normal::new(0.0, sigma))
            .transpose()?;

        for &epoch in &setting.epochs {
            let (mut value, viable) =
                simulator.simulate_observation(&setting.link, epoch, propagated)?;
            if !viable {
                collection.add_rejected(RejectedObservation {
                    observable: setting.observable,
                    link: setting.link.clone(),
                    epoch,
                    computed: value,
                });
                continue;
            }
            if let Some(noise) = &noise {
                for entry in value.iter_mut() {
                    *entry += noise.sample(rng);
                }
            }
            collection.add_observation(setting.observable, &setting.link, epoch, value)?;
        }
    }

    debug!(
        "Simulated {} observations ({} rejected by viability)",
        collection.number_of_observations(),
        collection.rejected().len()
    );
    Ok(collection)
}
