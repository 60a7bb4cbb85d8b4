//! Observation viability: pure admissibility predicates over link-end states.
//!
//! A calculator only looks at the Cartesian states and epochs it is given, plus the ephemeris
//! functions it was built with. No propagation is involved, and the same inputs always give the
//! same answer.

use std::fmt;

use nalgebra::{Vector3, Vector6};

use crate::{
    constants::{Epoch, Meter, Radian},
    od_errors::OdError,
};

use super::{model::StateFunction, LinkEndType};

/// Admissibility constraint of an observation.
#[derive(Clone)]
pub enum ObservationViabilityCalculator {
    /// Elevation of the other link end above the local horizon of `station`, taken as the plane
    /// orthogonal to `station - center(station_body)`.
    MinimumElevationAngle {
        station: LinkEndType,
        minimum_elevation: Radian,
        station_body: StateFunction,
    },
    /// Angle between the line of sight from `station` and the direction of `avoided_body`.
    BodyAvoidanceAngle {
        station: LinkEndType,
        minimum_angle: Radian,
        avoided_body: StateFunction,
    },
    /// The segment between the first two link ends must not cross a sphere of `radius` centred
    /// on `occulting_body`.
    Occultation {
        occulting_body: StateFunction,
        radius: Meter,
    },
    /// All constraints must hold.
    Compound(Vec<ObservationViabilityCalculator>),
}

impl fmt::Debug for ObservationViabilityCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationViabilityCalculator::MinimumElevationAngle {
                station,
                minimum_elevation,
                ..
            } => f
                .debug_struct("MinimumElevationAngle")
                .field("station", station)
                .field("minimum_elevation", minimum_elevation)
                .finish_non_exhaustive(),
            ObservationViabilityCalculator::BodyAvoidanceAngle {
                station,
                minimum_angle,
                ..
            } => f
                .debug_struct("BodyAvoidanceAngle")
                .field("station", station)
                .field("minimum_angle", minimum_angle)
                .finish_non_exhaustive(),
            ObservationViabilityCalculator::Occultation { radius, .. } => f
                .debug_struct("Occultation")
                .field("radius", radius)
                .finish_non_exhaustive(),
            ObservationViabilityCalculator::Compound(calculators) => {
                f.debug_tuple("Compound").field(calculators).finish()
            }
        }
    }
}

fn position(state: &Vector6<f64>) -> Vector3<f64> {
    state.fixed_rows::<3>(0).into_owned()
}

/// Index of `station` in the link ends, and index of the first other link end.
fn station_and_target(
    link_end_states: &[(LinkEndType, Vector6<f64>)],
    station: LinkEndType,
) -> Result<(usize, usize), OdError> {
    let station_index = link_end_states
        .iter()
        .position(|(kind, _)| *kind == station)
        .ok_or_else(|| {
            OdError::InvalidObservationModel(format!(
                "viability check refers to a missing {station} link end"
            ))
        })?;
    let target_index = link_end_states
        .iter()
        .position(|(kind, _)| *kind != station)
        .ok_or_else(|| {
            OdError::InvalidObservationModel("viability check needs two link ends".into())
        })?;
    Ok((station_index, target_index))
}

impl ObservationViabilityCalculator {
    /// Whether the observation defined by these link-end states is admissible.
    ///
    /// Arguments
    /// ---------
    /// * `link_end_states`: Cartesian state of each link end, tagged with its role
    /// * `link_end_times`: epoch of each link-end state
    ///
    /// Errors
    /// ------
    /// * [`OdError::DimensionMismatch`] if states and times differ in length.
    /// * [`OdError::InvalidObservationModel`] if a required link end is missing.
    /// * Any error of the ephemeris functions.
    pub fn is_observation_viable(
        &self,
        link_end_states: &[(LinkEndType, Vector6<f64>)],
        link_end_times: &[Epoch],
    ) -> Result<bool, OdError> {
        if link_end_states.len() != link_end_times.len() {
            return Err(OdError::dimension(
                "viability link-end times",
                link_end_states.len(),
                link_end_times.len(),
            ));
        }

        match self {
            ObservationViabilityCalculator::MinimumElevationAngle {
                station,
                minimum_elevation,
                station_body,
            } => {
                let (s, t) = station_and_target(link_end_states, *station)?;
                let station_position = position(&link_end_states[s].1);
                let center = position(&station_body(link_end_times[s])?);
                let vertical = station_position - center;
                let line_of_sight = position(&link_end_states[t].1) - station_position;
                let elevation = std::f64::consts::FRAC_PI_2 - vertical.angle(&line_of_sight);
                Ok(elevation >= *minimum_elevation)
            }
            ObservationViabilityCalculator::BodyAvoidanceAngle {
                station,
                minimum_angle,
                avoided_body,
            } => {
                let (s, t) = station_and_target(link_end_states, *station)?;
                let station_position = position(&link_end_states[s].1);
                let body_direction =
                    position(&avoided_body(link_end_times[s])?) - station_position;
                let line_of_sight = position(&link_end_states[t].1) - station_position;
                Ok(line_of_sight.angle(&body_direction) >= *minimum_angle)
            }
            ObservationViabilityCalculator::Occultation {
                occulting_body,
                radius,
            } => {
                if link_end_states.len() < 2 {
                    return Err(OdError::InvalidObservationModel(
                        "occultation check needs two link ends".into(),
                    ));
                }
                let a = position(&link_end_states[0].1);
                let b = position(&link_end_states[1].1);
                let center = position(&occulting_body(link_end_times[0])?);

                let segment = b - a;
                let length2 = segment.norm_squared();
                let u = if length2 > 0.0 {
                    ((center - a).dot(&segment) / length2).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let closest = a + segment * u;
                Ok((center - closest).norm() >= *radius)
            }
            ObservationViabilityCalculator::Compound(calculators) => {
                for calculator in calculators {
                    if !calculator.is_observation_viable(link_end_states, link_end_times)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}
