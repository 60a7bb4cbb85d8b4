//! # Observations
//!
//! Observable types, link definitions and the machinery that turns propagated states into
//! simulated tracking data.
//!
//! ## Overview
//!
//! An observation is identified by its [`ObservableType`] and its [`LinkDefinition`], the set of
//! link ends (transmitter, receiver, observed body, observer) taking part in it. Each observable
//! has a fixed dimension:
//!
//! | Observable                 | Size | Link ends                  |
//! |----------------------------|------|----------------------------|
//! | `OneWayRange`              | 1    | transmitter, receiver      |
//! | `AngularPosition`          | 2    | transmitter, receiver      |
//! | `RelativePosition`         | 3    | observed body, observer    |
//! | `RelativeCartesianState`   | 6    | observed body, observer    |
//!
//! Submodules:
//! * [`geometry`] – observable values and partials from link-end Cartesian states.
//! * [`viability`] – admissibility predicates (elevation, body avoidance, occultation).
//! * [`model`] – observation model: link-end state sources + geometry + viability + bias.
//! * [`simulator`] – fixed-size observation simulators and their common contract.
//! * [`collection`] – ordered observation storage with rejected-observation bookkeeping.
//!
//! Light-time is not iterated: all link ends are evaluated at the observation epoch.

pub mod collection;
pub mod geometry;
pub mod model;
pub mod simulator;
pub mod viability;

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::od_errors::OdError;

/// Kind of observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObservableType {
    OneWayRange,
    AngularPosition,
    RelativePosition,
    RelativeCartesianState,
}

impl ObservableType {
    /// Number of scalar entries of one observation.
    pub fn size(self) -> usize {
        match self {
            ObservableType::OneWayRange => 1,
            ObservableType::AngularPosition => 2,
            ObservableType::RelativePosition => 3,
            ObservableType::RelativeCartesianState => 6,
        }
    }

    /// Link ends the observable is computed from, in evaluation order.
    ///
    /// The observable is a function of `state(first) - state(second)`.
    pub fn required_link_ends(self) -> [LinkEndType; 2] {
        match self {
            ObservableType::OneWayRange | ObservableType::AngularPosition => {
                [LinkEndType::Transmitter, LinkEndType::Receiver]
            }
            ObservableType::RelativePosition | ObservableType::RelativeCartesianState => {
                [LinkEndType::ObservedBody, LinkEndType::Observer]
            }
        }
    }
}

impl fmt::Display for ObservableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObservableType::OneWayRange => "one-way range",
            ObservableType::AngularPosition => "angular position",
            ObservableType::RelativePosition => "relative position",
            ObservableType::RelativeCartesianState => "relative Cartesian state",
        };
        f.write_str(name)
    }
}

/// Role of a link end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LinkEndType {
    Transmitter,
    Receiver,
    ObservedBody,
    Observer,
}

impl fmt::Display for LinkEndType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkEndType::Transmitter => "transmitter",
            LinkEndType::Receiver => "receiver",
            LinkEndType::ObservedBody => "observed body",
            LinkEndType::Observer => "observer",
        };
        f.write_str(name)
    }
}

/// A body, optionally refined by a named reference point on it (e.g. a ground station).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkEndId {
    pub body: String,
    pub reference_point: Option<String>,
}

impl LinkEndId {
    /// Link end at the center of mass of `body`.
    pub fn body(body: impl Into<String>) -> Self {
        LinkEndId {
            body: body.into(),
            reference_point: None,
        }
    }

    /// Link end at a reference point of `body`.
    pub fn station(body: impl Into<String>, reference_point: impl Into<String>) -> Self {
        LinkEndId {
            body: body.into(),
            reference_point: Some(reference_point.into()),
        }
    }
}

impl fmt::Display for LinkEndId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference_point {
            Some(point) => write!(f, "{}/{}", self.body, point),
            None => f.write_str(&self.body),
        }
    }
}

/// Ordered set of link ends, one per [`LinkEndType`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkDefinition {
    link_ends: SmallVec<[(LinkEndType, LinkEndId); 3]>,
}

impl LinkDefinition {
    /// Build a link from its ends, in any order.
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidObservationModel`] if the link is empty or a link-end type appears
    ///   twice.
    pub fn new(
        link_ends: impl IntoIterator<Item = (LinkEndType, LinkEndId)>,
    ) -> Result<Self, OdError> {
        let mut link_ends: SmallVec<[(LinkEndType, LinkEndId); 3]> =
            link_ends.into_iter().collect();
        if link_ends.is_empty() {
            return Err(OdError::InvalidObservationModel(
                "a link needs at least one link end".into(),
            ));
        }
        link_ends.sort_by(|a, b| a.0.cmp(&b.0));
        if link_ends.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return Err(OdError::InvalidObservationModel(
                "each link-end type may appear only once in a link".into(),
            ));
        }
        Ok(LinkDefinition { link_ends })
    }

    /// `transmitter → receiver` link.
    pub fn one_way(transmitter: LinkEndId, receiver: LinkEndId) -> Self {
        LinkDefinition {
            link_ends: SmallVec::from_iter([
                (LinkEndType::Transmitter, transmitter),
                (LinkEndType::Receiver, receiver),
            ]),
        }
    }

    /// `observed body ← observer` link.
    pub fn observed_from(observed_body: LinkEndId, observer: LinkEndId) -> Self {
        LinkDefinition {
            link_ends: SmallVec::from_iter([
                (LinkEndType::ObservedBody, observed_body),
                (LinkEndType::Observer, observer),
            ]),
        }
    }

    pub fn get(&self, link_end_type: LinkEndType) -> Option<&LinkEndId> {
        self.link_ends
            .iter()
            .find(|(kind, _)| *kind == link_end_type)
            .map(|(_, id)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(LinkEndType, LinkEndId)> {
        self.link_ends.iter()
    }

    pub fn len(&self) -> usize {
        self.link_ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.link_ends.is_empty()
    }
}

impl fmt::Display for LinkDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (kind, id) in &self.link_ends {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{kind}: {id}")?;
            first = false;
        }
        Ok(())
    }
}
