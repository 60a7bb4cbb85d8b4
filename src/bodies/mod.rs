//! # System of bodies
//!
//! Arena holding the physical bodies that force models and observation models refer to.
//!
//! ## Overview
//!
//! Bodies are stored in a flat `Vec<BodyRecord>` and addressed by a [`BodyId`]; the name of a
//! body is resolved through a bidirectional map so that ids stay stable for the lifetime of the
//! arena. Cross-references between bodies (the origin of an ephemeris) are ids as well, never
//! owning pointers, so the arena can be cloned and mutated freely.
//!
//! Each body may carry:
//! - a gravitational parameter μ (m³/s²),
//! - a mean radius (m), used by occultation checks and elevation masks,
//! - an [`Ephemeris`] giving its Cartesian state relative to an optional origin body.
//!
//! [`SystemOfBodies::state_in_global_frame`] resolves a state by walking the origin chain up to
//! the global frame, detecting cycles on the way.
//!
//! ## See also
//! * [`TranslationalDynamics`](crate::dynamics::acceleration::TranslationalDynamics) – queries
//!   the arena for perturbing bodies and writes propagated trajectories back into it.

pub mod bimap;

use nalgebra::{DVector, Vector3, Vector6};

use crate::{
    constants::{Epoch, Meter},
    od_errors::OdError,
    propagation::history::{HermiteHistory, StateHistory},
};

use self::bimap::BiMap;

/// Index of a body in a [`SystemOfBodies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub(crate) usize);

impl BodyId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Cartesian ephemeris of a body, expressed relative to its origin.
#[derive(Debug, Clone, PartialEq)]
pub enum Ephemeris {
    /// Fixed state `[x, y, z, vx, vy, vz]`.
    Constant(Vector6<f64>),
    /// Tabulated states, interpolated with Hermite polynomials on the position using the
    /// velocity as node derivative.
    Tabulated(HermiteHistory),
}

impl Ephemeris {
    /// Build a tabulated ephemeris from a history of 6-dimensional Cartesian states.
    ///
    /// Errors
    /// ------
    /// * [`OdError::DimensionMismatch`] if a state is not 6-dimensional.
    /// * [`OdError::NoNumericalSolution`] if the history is empty.
    pub fn tabulated(states: &StateHistory) -> Result<Self, OdError> {
        if states.is_empty() {
            return Err(OdError::NoNumericalSolution(
                "cannot tabulate an empty state history".into(),
            ));
        }
        let mut table = HermiteHistory::new();
        for (epoch, state) in states.iter() {
            if state.len() != 6 {
                return Err(OdError::dimension("tabulated ephemeris", 6, state.len()));
            }
            table.push(
                epoch,
                DVector::from_column_slice(&state.as_slice()[..3]),
                DVector::from_column_slice(&state.as_slice()[3..]),
            )?;
        }
        Ok(Ephemeris::Tabulated(table))
    }

    /// State relative to the ephemeris origin at `epoch`.
    pub fn state(&self, epoch: Epoch) -> Result<Vector6<f64>, OdError> {
        match self {
            Ephemeris::Constant(state) => Ok(*state),
            Ephemeris::Tabulated(table) => {
                let position = table.interpolate(epoch)?;
                let velocity = table.interpolate_derivative(epoch)?;
                Ok(Vector6::new(
                    position[0],
                    position[1],
                    position[2],
                    velocity[0],
                    velocity[1],
                    velocity[2],
                ))
            }
        }
    }
}

/// Physical properties of one body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyRecord {
    pub name: String,
    pub gravitational_parameter: Option<f64>,
    pub mean_radius: Option<Meter>,
    pub ephemeris: Option<Ephemeris>,
    /// Body the ephemeris is relative to; `None` means the global frame origin.
    pub ephemeris_origin: Option<BodyId>,
}

impl BodyRecord {
    pub fn new(name: impl Into<String>) -> Self {
        BodyRecord {
            name: name.into(),
            gravitational_parameter: None,
            mean_radius: None,
            ephemeris: None,
            ephemeris_origin: None,
        }
    }

    pub fn with_gravitational_parameter(mut self, mu: f64) -> Self {
        self.gravitational_parameter = Some(mu);
        self
    }

    pub fn with_mean_radius(mut self, radius: Meter) -> Self {
        self.mean_radius = Some(radius);
        self
    }

    pub fn with_ephemeris(mut self, ephemeris: Ephemeris, origin: Option<BodyId>) -> Self {
        self.ephemeris = Some(ephemeris);
        self.ephemeris_origin = origin;
        self
    }
}

/// Arena of bodies addressed by [`BodyId`].
#[derive(Debug, Clone, Default)]
pub struct SystemOfBodies {
    bodies: Vec<BodyRecord>,
    names: BiMap<String, BodyId>,
}

impl SystemOfBodies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a body, or replace the record of an existing body with the same name.
    ///
    /// Arguments
    /// ---------
    /// * `record`: the body properties
    ///
    /// Return
    /// ------
    /// * The id of the body; an existing body keeps its id
    ///
    /// Errors
    /// ------
    /// * [`OdError::UnknownBody`] if the ephemeris origin is not in the arena.
    pub fn add_body(&mut self, record: BodyRecord) -> Result<BodyId, OdError> {
        if let Some(origin) = record.ephemeris_origin {
            if origin.0 >= self.bodies.len() {
                return Err(OdError::UnknownBody(format!("{origin:?}")));
            }
        }
        let next = BodyId(self.bodies.len());
        let (id, created) = self.names.get_or_insert_with(record.name.clone(), || next);
        if created {
            self.bodies.push(record);
        } else {
            self.bodies[id.0] = record;
        }
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Resolve a body name.
    pub fn body_id(&self, name: &str) -> Result<BodyId, OdError> {
        self.names
            .get_by_key(&name.to_string())
            .copied()
            .ok_or_else(|| OdError::UnknownBody(name.to_string()))
    }

    pub fn body(&self, id: BodyId) -> Result<&BodyRecord, OdError> {
        self.bodies
            .get(id.0)
            .ok_or_else(|| OdError::UnknownBody(format!("{id:?}")))
    }

    pub fn body_mut(&mut self, id: BodyId) -> Result<&mut BodyRecord, OdError> {
        self.bodies
            .get_mut(id.0)
            .ok_or_else(|| OdError::UnknownBody(format!("{id:?}")))
    }

    pub fn name(&self, id: BodyId) -> Result<&str, OdError> {
        self.names
            .get_by_value(&id)
            .map(String::as_str)
            .ok_or_else(|| OdError::UnknownBody(format!("{id:?}")))
    }

    /// Gravitational parameter of a body.
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidParameterSettings`] if the body has no gravitational parameter.
    pub fn gravitational_parameter(&self, id: BodyId) -> Result<f64, OdError> {
        let body = self.body(id)?;
        body.gravitational_parameter.ok_or_else(|| {
            OdError::InvalidParameterSettings(format!(
                "body {} has no gravitational parameter",
                body.name
            ))
        })
    }

    pub fn set_gravitational_parameter(&mut self, id: BodyId, mu: f64) -> Result<(), OdError> {
        self.body_mut(id)?.gravitational_parameter = Some(mu);
        Ok(())
    }

    /// Replace the ephemeris of a body by a tabulation of `states`, keeping its origin.
    pub fn set_tabulated_ephemeris(
        &mut self,
        id: BodyId,
        states: &StateHistory,
    ) -> Result<(), OdError> {
        let ephemeris = Ephemeris::tabulated(states)?;
        self.body_mut(id)?.ephemeris = Some(ephemeris);
        Ok(())
    }

    /// Cartesian state of a body in the global frame at `epoch`.
    ///
    /// The ephemeris origin chain is followed until a body without origin is reached.
    ///
    /// Errors
    /// ------
    /// * [`OdError::MissingEphemeris`] if a body in the chain has no ephemeris.
    /// * [`OdError::CyclicEphemerisOrigin`] if the chain loops.
    pub fn state_in_global_frame(&self, id: BodyId, epoch: Epoch) -> Result<Vector6<f64>, OdError> {
        let mut state = Vector6::zeros();
        let mut current = Some(id);
        let mut hops = 0;

        while let Some(body_id) = current {
            if hops > self.bodies.len() {
                return Err(OdError::CyclicEphemerisOrigin(self.body(id)?.name.clone()));
            }
            let body = self.body(body_id)?;
            let ephemeris = body
                .ephemeris
                .as_ref()
                .ok_or_else(|| OdError::MissingEphemeris(body.name.clone()))?;
            state += ephemeris.state(epoch)?;
            current = body.ephemeris_origin;
            hops += 1;
        }
        Ok(state)
    }

    /// State of `target` relative to `observer`, both resolved in the global frame.
    pub fn relative_state(
        &self,
        target: BodyId,
        observer: BodyId,
        epoch: Epoch,
    ) -> Result<Vector6<f64>, OdError> {
        Ok(self.state_in_global_frame(target, epoch)? - self.state_in_global_frame(observer, epoch)?)
    }

    /// Global-frame position of a body.
    pub fn position(&self, id: BodyId, epoch: Epoch) -> Result<Vector3<f64>, OdError> {
        Ok(self.state_in_global_frame(id, epoch)?.fixed_rows::<3>(0).into_owned())
    }
}

#[cfg(test)]
mod bodies_test {
    use super::*;
    use crate::constants::EARTH_GRAVITATIONAL_PARAMETER;
    use approx::assert_relative_eq;

    fn earth_moon() -> (SystemOfBodies, BodyId, BodyId) {
        let mut bodies = SystemOfBodies::new();
        let earth = bodies
            .add_body(
                BodyRecord::new("Earth")
                    .with_gravitational_parameter(EARTH_GRAVITATIONAL_PARAMETER)
                    .with_ephemeris(
                        Ephemeris::Constant(Vector6::new(1.0e11, 0.0, 0.0, 0.0, 3.0e4, 0.0)),
                        None,
                    ),
            )
            .unwrap();
        let moon = bodies
            .add_body(BodyRecord::new("Moon").with_ephemeris(
                Ephemeris::Constant(Vector6::new(3.844e8, 0.0, 0.0, 0.0, 1.0e3, 0.0)),
                Some(earth),
            ))
            .unwrap();
        (bodies, earth, moon)
    }

    #[test]
    fn test_origin_chain() {
        let (bodies, earth, moon) = earth_moon();
        let state = bodies.state_in_global_frame(moon, 0.0).unwrap();
        assert_relative_eq!(state[0], 1.0e11 + 3.844e8);
        assert_relative_eq!(state[4], 3.1e4);

        let relative = bodies.relative_state(moon, earth, 0.0).unwrap();
        assert_relative_eq!(relative[0], 3.844e8, max_relative = 1e-12);
        assert_eq!(bodies.body_id("Moon").unwrap(), moon);
        assert_eq!(bodies.name(earth).unwrap(), "Earth");
    }

    #[test]
    fn test_re_adding_keeps_id() {
        let (mut bodies, earth, _) = earth_moon();
        let again = bodies
            .add_body(BodyRecord::new("Earth").with_mean_radius(6.4e6))
            .unwrap();
        assert_eq!(again, earth);
        assert_eq!(bodies.len(), 2);
        assert!(bodies.gravitational_parameter(earth).is_err());
    }

    #[test]
    fn test_missing_and_cyclic_ephemeris() {
        let mut bodies = SystemOfBodies::new();
        let a = bodies.add_body(BodyRecord::new("A")).unwrap();
        assert_eq!(
            bodies.state_in_global_frame(a, 0.0),
            Err(OdError::MissingEphemeris("A".into()))
        );

        let b = bodies
            .add_body(BodyRecord::new("B").with_ephemeris(Ephemeris::Constant(Vector6::zeros()), Some(a)))
            .unwrap();
        bodies
            .add_body(
                BodyRecord::new("A").with_ephemeris(Ephemeris::Constant(Vector6::zeros()), Some(b)),
            )
            .unwrap();
        assert!(matches!(
            bodies.state_in_global_frame(a, 0.0),
            Err(OdError::CyclicEphemerisOrigin(_))
        ));
        assert!(matches!(bodies.body_id("C"), Err(OdError::UnknownBody(_))));
    }

    #[test]
    fn test_tabulated_ephemeris_uniform_motion() {
        let mut history = StateHistory::new();
        for t in [0.0, 10.0, 20.0] {
            history
                .push(
                    t,
                    DVector::from_vec(vec![1.0 + 2.0 * t, -t, 0.5, 2.0, -1.0, 0.0]),
                )
                .unwrap();
        }
        let ephemeris = Ephemeris::tabulated(&history).unwrap();
        let state = ephemeris.state(15.0).unwrap();
        assert_relative_eq!(state[0], 31.0, epsilon = 1e-12);
        assert_relative_eq!(state[1], -15.0, epsilon = 1e-12);
        assert_relative_eq!(state[3], 2.0, epsilon = 1e-12);
        assert!(ephemeris.state(25.0).is_err());
    }
}
