//! # Observation models
//!
//! An [`ObservationModel`] ties together:
//!
//! * the observable type and its [`LinkDefinition`],
//! * where the state of each link end comes from ([`LinkEndStateSource`]): a 6-entry block of
//!   the propagated state, or an ephemeris function,
//! * a [`LinkGeometry`] turning link-end states into observable values and partials,
//! * optional viability calculators and a constant observation bias.
//!
//! ## Partials
//!
//! For each link end sourced from the propagated state at offset `k`, the partial of the
//! observable with respect to the estimated parameter vector is
//!
//! ```text
//! H_link_end · [Φ | S](t)[k..k+6, :]
//! ```
//!
//! and the contributions of all propagated link ends are summed. Link ends read from an
//! ephemeris do not depend on the estimated parameters.

use std::{fmt, sync::Arc};

use nalgebra::{DVector, Vector6};

use crate::{
    bodies::SystemOfBodies,
    constants::{Epoch, Matrix, StateVector},
    od_errors::OdError,
    propagation::{history::HermiteHistory, variational::StateTransitionInterface},
};

use super::{
    geometry::{geometry_for, LinkGeometry},
    viability::ObservationViabilityCalculator,
    LinkDefinition, LinkEndType, ObservableType,
};

/// Cartesian state of a body as a function of the epoch.
pub type StateFunction = Arc<dyn Fn(Epoch) -> Result<Vector6<f64>, OdError> + Send + Sync>;

/// State function returning `state` at every epoch.
pub fn constant_state(state: Vector6<f64>) -> StateFunction {
    Arc::new(move |_| Ok(state))
}

/// State function reading the global-frame state of `name` from a snapshot of `bodies`.
///
/// Errors
/// ------
/// * [`OdError::UnknownBody`] if `name` is not part of `bodies`.
pub fn body_state_function(bodies: &SystemOfBodies, name: &str) -> Result<StateFunction, OdError> {
    let id = bodies.body_id(name)?;
    let snapshot = Arc::new(bodies.clone());
    Ok(Arc::new(move |epoch| snapshot.state_in_global_frame(id, epoch)))
}

/// Source of the propagated state at arbitrary epochs of the arc.
pub trait PropagatedStateSource {
    fn propagated_state(&self, epoch: Epoch) -> Result<StateVector, OdError>;
}

impl PropagatedStateSource for StateTransitionInterface {
    fn propagated_state(&self, epoch: Epoch) -> Result<StateVector, OdError> {
        self.state(epoch)
    }
}

impl PropagatedStateSource for HermiteHistory {
    fn propagated_state(&self, epoch: Epoch) -> Result<StateVector, OdError> {
        self.interpolate(epoch)
    }
}

/// Where the Cartesian state of a link end is read from.
#[derive(Clone)]
pub enum LinkEndStateSource {
    /// Entries `state_offset..state_offset + 6` of the propagated state.
    Propagated { state_offset: usize },
    /// External ephemeris, independent of the estimated parameters.
    Ephemeris(StateFunction),
}

impl fmt::Debug for LinkEndStateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEndStateSource::Propagated { state_offset } => f
                .debug_struct("Propagated")
                .field("state_offset", state_offset)
                .finish(),
            LinkEndStateSource::Ephemeris(_) => f.write_str("Ephemeris(..)"),
        }
    }
}

/// Observable + link + state sources + geometry + viability + bias.
#[derive(Debug, Clone)]
pub struct ObservationModel {
    observable: ObservableType,
    link: LinkDefinition,
    /// One source per entry of [`ObservableType::required_link_ends`], same order.
    sources: Vec<LinkEndStateSource>,
    geometry: Arc<dyn LinkGeometry>,
    viability: Vec<ObservationViabilityCalculator>,
    bias: Option<DVector<f64>>,
}

impl ObservationModel {
    /// Create an observation model with the built-in geometry of `observable`.
    ///
    /// Arguments
    /// ---------
    /// * `observable`: observable type
    /// * `link`: link ends of the observation
    /// * `sources`: state source of every link end required by the observable
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidObservationModel`] if a required link end is missing from the link or
    ///   has no state source, or if a source is given for a link end the observable does not use.
    pub fn new(
        observable: ObservableType,
        link: LinkDefinition,
        sources: impl IntoIterator<Item = (LinkEndType, LinkEndStateSource)>,
    ) -> Result<Self, OdError> {
        let mut sources: Vec<(LinkEndType, LinkEndStateSource)> = sources.into_iter().collect();
        let required = observable.required_link_ends();

        if let Some((extra, _)) = sources.iter().find(|(kind, _)| !required.contains(kind)) {
            return Err(OdError::InvalidObservationModel(format!(
                "{observable} does not use a {extra} link end"
            )));
        }

        let mut ordered = Vec::with_capacity(required.len());
        for kind in required {
            if link.get(kind).is_none() {
                return Err(OdError::InvalidObservationModel(format!(
                    "{observable} needs a {kind} link end, link is [{link}]"
                )));
            }
            let index = sources
                .iter()
                .position(|(source_kind, _)| *source_kind == kind)
                .ok_or_else(|| {
                    OdError::InvalidObservationModel(format!("no state source for the {kind}"))
                })?;
            ordered.push(sources.swap_remove(index).1);
        }

        Ok(ObservationModel {
            observable,
            link,
            sources: ordered,
            geometry: geometry_for(observable),
            viability: Vec::new(),
            bias: None,
        })
    }

    /// Replace the built-in geometry.
    pub fn with_geometry(mut self, geometry: Arc<dyn LinkGeometry>) -> Result<Self, OdError> {
        if geometry.observable_size() != self.observable.size() {
            return Err(OdError::dimension(
                "link geometry size",
                self.observable.size(),
                geometry.observable_size(),
            ));
        }
        self.geometry = geometry;
        Ok(self)
    }

    pub fn with_viability(mut self, calculators: Vec<ObservationViabilityCalculator>) -> Self {
        self.viability = calculators;
        self
    }

    /// Constant bias added to every computed observation.
    pub fn with_bias(mut self, bias: DVector<f64>) -> Result<Self, OdError> {
        if bias.len() != self.observable.size() {
            return Err(OdError::dimension(
                "observation bias",
                self.observable.size(),
                bias.len(),
            ));
        }
        self.bias = Some(bias);
        Ok(self)
    }

    pub fn observable(&self) -> ObservableType {
        self.observable
    }

    pub fn link(&self) -> &LinkDefinition {
        &self.link
    }

    pub fn observable_size(&self) -> usize {
        self.observable.size()
    }

    pub fn bias(&self) -> Option<&DVector<f64>> {
        self.bias.as_ref()
    }

    pub fn viability_calculators(&self) -> &[ObservationViabilityCalculator] {
        &self.viability
    }

    /// Cartesian state of every required link end at `epoch`.
    pub fn link_end_states(
        &self,
        epoch: Epoch,
        propagated: &dyn PropagatedStateSource,
    ) -> Result<Vec<(LinkEndType, Vector6<f64>)>, OdError> {
        let mut propagated_state: Option<StateVector> = None;
        let mut states = Vec::with_capacity(self.sources.len());

        for (kind, source) in self.observable.required_link_ends().into_iter().zip(&self.sources) {
            let state = match source {
                LinkEndStateSource::Propagated { state_offset } => {
                    if propagated_state.is_none() {
                        propagated_state = Some(propagated.propagated_state(epoch)?);
                    }
                    let full = propagated_state.as_ref().ok_or_else(|| {
                        OdError::NoNumericalSolution("propagated state unavailable".into())
                    })?;
                    if state_offset + 6 > full.len() {
                        return Err(OdError::dimension(
                            "propagated link-end state",
                            state_offset + 6,
                            full.len(),
                        ));
                    }
                    Vector6::from_iterator(full.rows(*state_offset, 6).iter().copied())
                }
                LinkEndStateSource::Ephemeris(state_function) => state_function(epoch)?,
            };
            states.push((kind, state));
        }
        Ok(states)
    }

    /// Computed observation at `epoch`, bias included.
    pub fn compute_observation(
        &self,
        epoch: Epoch,
        propagated: &dyn PropagatedStateSource,
    ) -> Result<DVector<f64>, OdError> {
        let states = self.link_end_states(epoch, propagated)?;
        self.evaluate(&states, epoch)
    }

    fn evaluate(
        &self,
        states: &[(LinkEndType, Vector6<f64>)],
        epoch: Epoch,
    ) -> Result<DVector<f64>, OdError> {
        let cartesian: Vec<Vector6<f64>> = states.iter().map(|(_, state)| *state).collect();
        let times = vec![epoch; cartesian.len()];
        let mut value = self.geometry.evaluate(&cartesian, &times)?;
        if let Some(bias) = &self.bias {
            value += bias;
        }
        Ok(value)
    }

    /// Computed observation and its viability.
    pub fn compute_viable_observation(
        &self,
        epoch: Epoch,
        propagated: &dyn PropagatedStateSource,
    ) -> Result<(DVector<f64>, bool), OdError> {
        let states = self.link_end_states(epoch, propagated)?;
        let value = self.evaluate(&states, epoch)?;
        let times = vec![epoch; states.len()];
        for calculator in &self.viability {
            if !calculator.is_observation_viable(&states, &times)? {
                return Ok((value, false));
            }
        }
        Ok((value, true))
    }

    /// Partials of the observation with respect to the full estimated parameter vector,
    /// `observable_size × (n + m)`.
    pub fn observation_partials(
        &self,
        epoch: Epoch,
        interface: &StateTransitionInterface,
    ) -> Result<Matrix, OdError> {
        let states = self.link_end_states(epoch, interface)?;
        let cartesian: Vec<Vector6<f64>> = states.iter().map(|(_, state)| *state).collect();
        let times = vec![epoch; cartesian.len()];
        let link_end_partials = self.geometry.partials(&cartesian, &times)?;
        if link_end_partials.len() != self.sources.len() {
            return Err(OdError::dimension(
                "link-end partials",
                self.sources.len(),
                link_end_partials.len(),
            ));
        }

        let mut partials = Matrix::zeros(self.observable_size(), interface.parameter_size());
        let mut variational: Option<Matrix> = None;
        for (source, h) in self.sources.iter().zip(&link_end_partials) {
            if let LinkEndStateSource::Propagated { state_offset } = source {
                if variational.is_none() {
                    variational = Some(interface.full_state_transition_sensitivity_matrix(epoch)?);
                }
                let phi_s = variational.as_ref().ok_or_else(|| {
                    OdError::NoNumericalSolution("variational solution unavailable".into())
                })?;
                if state_offset + 6 > phi_s.nrows() {
                    return Err(OdError::dimension(
                        "propagated link-end state",
                        state_offset + 6,
                        phi_s.nrows(),
                    ));
                }
                partials += h * phi_s.rows(*state_offset, 6);
            }
        }
        Ok(partials)
    }

    /// `observed - computed`.
    pub fn residual(&self, observed: &DVector<f64>, computed: &DVector<f64>) -> DVector<f64> {
        self.geometry.residual(observed, computed)
    }
}

#[cfg(test)]
mod model_test {
    use super::*;
    use crate::observations::LinkEndId;

    fn range_model() -> ObservationModel {
        ObservationModel::new(
            ObservableType::OneWayRange,
            LinkDefinition::one_way(LinkEndId::body("Sat"), LinkEndId::station("Earth", "Station")),
            [
                (
                    LinkEndType::Transmitter,
                    LinkEndStateSource::Propagated { state_offset: 0 },
                ),
                (
                    LinkEndType::Receiver,
                    LinkEndStateSource::Ephemeris(constant_state(Vector6::new(
                        1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
                    ))),
                ),
            ],
        )
        .unwrap()
    }

    fn trajectory() -> HermiteHistory {
        let mut history = HermiteHistory::new();
        for t in [0.0, 10.0] {
            history
                .push(
                    t,
                    DVector::from_vec(vec![4.0 + t, 4.0, 0.0, 1.0, 0.0, 0.0]),
                    DVector::from_vec(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
                )
                .unwrap();
        }
        history
    }

    #[test]
    fn test_compute_range_with_bias() {
        let model = range_model();
        let trajectory = trajectory();
        let range = model.compute_observation(0.0, &trajectory).unwrap();
        assert_eq!(range[0], 5.0);

        let biased = model.with_bias(DVector::from_element(1, 2.5)).unwrap();
        let range = biased.compute_observation(0.0, &trajectory).unwrap();
        assert_eq!(range[0], 7.5);
        assert!(biased.with_bias(DVector::zeros(2)).is_err());
    }

    #[test]
    fn test_viability_flag() {
        let occulted = range_model().with_viability(vec![ObservationViabilityCalculator::Occultation {
            occulting_body: constant_state(Vector6::new(2.5, 2.0, 0.0, 0.0, 0.0, 0.0)),
            radius: 0.5,
        }]);
        let (value, viable) = occulted.compute_viable_observation(0.0, &trajectory()).unwrap();
        assert_eq!(value[0], 5.0);
        assert!(!viable);
    }

    #[test]
    fn test_invalid_models() {
        let link = LinkDefinition::one_way(LinkEndId::body("Sat"), LinkEndId::body("Earth"));
        let missing_source = ObservationModel::new(
            ObservableType::OneWayRange,
            link.clone(),
            [(
                LinkEndType::Transmitter,
                LinkEndStateSource::Propagated { state_offset: 0 },
            )],
        );
        assert!(matches!(missing_source, Err(OdError::InvalidObservationModel(_))));

        let wrong_link = ObservationModel::new(
            ObservableType::RelativePosition,
            link,
            [
                (
                    LinkEndType::ObservedBody,
                    LinkEndStateSource::Propagated { state_offset: 0 },
                ),
                (
                    LinkEndType::Observer,
                    LinkEndStateSource::Propagated { state_offset: 0 },
                ),
            ],
        );
        assert!(matches!(wrong_link, Err(OdError::InvalidObservationModel(_))));

        let out_of_state = ObservationModel::new(
            ObservableType::RelativePosition,
            LinkDefinition::observed_from(LinkEndId::body("Sat"), LinkEndId::body("Earth")),
            [
                (
                    LinkEndType::ObservedBody,
                    LinkEndStateSource::Propagated { state_offset: 3 },
                ),
                (
                    LinkEndType::Observer,
                    LinkEndStateSource::Ephemeris(constant_state(Vector6::zeros())),
                ),
            ],
        )
        .unwrap();
        assert!(matches!(
            out_of_state.compute_observation(0.0, &trajectory()),
            Err(OdError::DimensionMismatch { .. })
        ));
    }
}
