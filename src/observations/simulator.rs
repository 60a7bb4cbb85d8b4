//! Observation simulators, one per observable type, specialised by the fixed observable size.
//!
//! [`ObservationSimulator<N>`] holds the [`ObservationModel`]s of one observable type, keyed by
//! link. All sizes share the object-safe [`ObservationSimulatorBase`] contract so that the
//! estimation layer can handle them uniformly; [`create_observation_simulators`] builds one
//! simulator per observable type from a flat list of models.

use std::collections::BTreeMap;

use nalgebra::{DVector, SVector};

use crate::{
    constants::{Epoch, Matrix},
    od_errors::OdError,
    propagation::variational::StateTransitionInterface,
};

use super::{
    model::{ObservationModel, PropagatedStateSource},
    LinkDefinition, ObservableType,
};

/// Contract shared by the observation simulators of every size.
pub trait ObservationSimulatorBase: std::fmt::Debug {
    fn observable(&self) -> ObservableType;

    fn observable_size(&self) -> usize;

    /// Observation models, keyed by link.
    fn observation_models(&self) -> &BTreeMap<LinkDefinition, ObservationModel>;

    /// Observation model of `link`.
    ///
    /// Errors
    /// ------
    /// * [`OdError::UnknownObservationModel`] if the simulator has no model for `link`.
    fn observation_model(&self, link: &LinkDefinition) -> Result<&ObservationModel, OdError> {
        self.observation_models()
            .get(link)
            .ok_or_else(|| OdError::UnknownObservationModel {
                observable: self.observable().to_string(),
                link: link.to_string(),
            })
    }

    /// Computed observation on `link` at `epoch`, with its viability.
    fn simulate_observation(
        &self,
        link: &LinkDefinition,
        epoch: Epoch,
        propagated: &dyn PropagatedStateSource,
    ) -> Result<(DVector<f64>, bool), OdError> {
        self.observation_model(link)?
            .compute_viable_observation(epoch, propagated)
    }

    /// Computed observation and its partials with respect to the estimated parameters.
    fn compute_observation_and_partials(
        &self,
        link: &LinkDefinition,
        epoch: Epoch,
        interface: &StateTransitionInterface,
    ) -> Result<(DVector<f64>, Matrix), OdError> {
        let model = self.observation_model(link)?;
        let value = model.compute_observation(epoch, interface)?;
        let partials = model.observation_partials(epoch, interface)?;
        Ok((value, partials))
    }
}

/// Observation simulator of a size-`N` observable.
#[derive(Debug, Clone)]
pub struct ObservationSimulator<const N: usize> {
    observable: ObservableType,
    models: BTreeMap<LinkDefinition, ObservationModel>,
}

impl<const N: usize> ObservationSimulator<N> {
    /// Arguments
    /// ---------
    /// * `observable`: observable type, of size `N`
    /// * `models`: one model per link, all of type `observable`
    ///
    /// Errors
    /// ------
    /// * [`OdError::UnsupportedObservableSize`] if `observable` is not of size `N`.
    /// * [`OdError::InvalidObservationModel`] for a model of another observable type or a
    ///   duplicated link.
    pub fn new(
        observable: ObservableType,
        models: impl IntoIterator<Item = ObservationModel>,
    ) -> Result<Self, OdError> {
        if observable.size() != N {
            return Err(OdError::UnsupportedObservableSize(N));
        }
        let mut by_link = BTreeMap::new();
        for model in models {
            if model.observable() != observable {
                return Err(OdError::InvalidObservationModel(format!(
                    "{} model given to a {observable} simulator",
                    model.observable()
                )));
            }
            let link = model.link().clone();
            if by_link.insert(link.clone(), model).is_some() {
                return Err(OdError::InvalidObservationModel(format!(
                    "duplicated {observable} model for link [{link}]"
                )));
            }
        }
        Ok(ObservationSimulator {
            observable,
            models: by_link,
        })
    }

    /// Computed observation as a fixed-size vector, with its viability.
    pub fn simulate_fixed(
        &self,
        link: &LinkDefinition,
        epoch: Epoch,
        propagated: &dyn PropagatedStateSource,
    ) -> Result<(SVector<f64, N>, bool), OdError> {
        let (value, viable) = self.simulate_observation(link, epoch, propagated)?;
        if value.len() != N {
            return Err(OdError::dimension("simulated observation", N, value.len()));
        }
        Ok((SVector::<f64, N>::from_iterator(value.iter().copied()), viable))
    }
}

impl<const N: usize> ObservationSimulatorBase for ObservationSimulator<N> {
    fn observable(&self) -> ObservableType {
        self.observable
    }

    fn observable_size(&self) -> usize {
        N
    }

    fn observation_models(&self) -> &BTreeMap<LinkDefinition, ObservationModel> {
        &self.models
    }
}

/// Simulator of the right size for `observable`.
pub fn create_observation_simulator(
    observable: ObservableType,
    models: Vec<ObservationModel>,
) -> Result<Box<dyn ObservationSimulatorBase>, OdError> {
    let simulator: Box<dyn ObservationSimulatorBase> = match observable.size() {
        1 => Box::new(ObservationSimulator::<1>::new(observable, models)?),
        2 => Box::new(ObservationSimulator::<2>::new(observable, models)?),
        3 => Box::new(ObservationSimulator::<3>::new(observable, models)?),
        6 => Box::new(ObservationSimulator::<6>::new(observable, models)?),
        other => return Err(OdError::UnsupportedObservableSize(other)),
    };
    Ok(simulator)
}

/// One simulator per observable type found in `models`, ordered by observable type.
pub fn create_observation_simulators(
    models: impl IntoIterator<Item = ObservationModel>,
) -> Result<Vec<Box<dyn ObservationSimulatorBase>>, OdError> {
    let mut grouped: BTreeMap<ObservableType, Vec<ObservationModel>> = BTreeMap::new();
    for model in models {
        grouped.entry(model.observable()).or_default().push(model);
    }
    grouped
        .into_iter()
        .map(|(observable, models)| create_observation_simulator(observable, models))
        .collect()
}

/// Simulator of `observable` in `simulators`.
pub fn find_simulator<'a>(
    simulators: &'a [Box<dyn ObservationSimulatorBase>],
    observable: ObservableType,
    link: &LinkDefinition,
) -> Result<&'a dyn ObservationSimulatorBase, OdError> {
    simulators
        .iter()
        .find(|simulator| simulator.observable() == observable)
        .map(|simulator| simulator.as_ref())
        .ok_or_else(|| OdError::UnknownObservationModel {
            observable: observable.to_string(),
            link: link.to_string(),
        })
}
