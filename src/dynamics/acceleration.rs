//! # Translational dynamics
//!
//! Cartesian equations of motion of one body about a central body:
//!
//! ```text
//! ṙ = v
//! v̇ = Σ a_k(t, r)
//! ```
//!
//! with the state `[x, y, z, vx, vy, vz]` expressed relative to the central body, in meters and
//! meters per second.
//!
//! ## Accelerations
//!
//! | Settings                                   | Acceleration                                              |
//! |--------------------------------------------|-----------------------------------------------------------|
//! | `PointMassGravity { body }` (central)      | `-μ r / |r|³`                                             |
//! | `PointMassGravity { body }` (third body)   | `μ_b ((r_b - r) / |r_b - r|³ - r_b / |r_b|³)`             |
//! | `ConstantEmpirical { acceleration }`       | constant vector                                           |
//!
//! Third-body positions `r_b` are read from the [`SystemOfBodies`] ephemerides, relative to the
//! central body. Jacobians with respect to the state are analytic.
//!
//! ## Estimatable parameters
//!
//! * [`EstimatableParameterId::GravitationalParameter`] of any body exerting a point-mass
//!   acceleration, `∂a/∂μ = a/μ`;
//! * [`EstimatableParameterId::ConstantEmpiricalAcceleration`] of the propagated body,
//!   `∂a/∂p = I₃`.
//!
//! When a parameter is estimated its value is taken from the parameter vector instead of the
//! body arena or the settings.

use nalgebra::{DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    bodies::{BodyId, SystemOfBodies},
    constants::{Epoch, Matrix, StateVector},
    od_errors::OdError,
    parameters::EstimatableParameterId,
    propagation::history::StateHistory,
};

use super::{DependentVariable, DynamicalModel};

/// Acceleration acting on the propagated body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccelerationSettings {
    PointMassGravity { body: String },
    ConstantEmpirical { acceleration: Vector3<f64> },
}

#[derive(Debug, Clone, PartialEq)]
enum Acceleration {
    PointMass {
        body: BodyId,
        is_central: bool,
        /// Offset of μ in the parameter vector when estimated.
        parameter: Option<usize>,
    },
    Empirical {
        acceleration: Vector3<f64>,
        parameter: Option<usize>,
    },
}

/// Translational motion of `propagated` about `central`.
#[derive(Debug, Clone)]
pub struct TranslationalDynamics {
    bodies: SystemOfBodies,
    propagated: BodyId,
    central: BodyId,
    accelerations: Vec<Acceleration>,
    estimated: Vec<EstimatableParameterId>,
    dependent_variables: Vec<DependentVariable>,
}

impl TranslationalDynamics {
    /// Create the model.
    ///
    /// Arguments
    /// ---------
    /// * `bodies`: the body arena, moved into the model
    /// * `propagated`: name of the propagated body
    /// * `central`: name of the central body the state is relative to
    /// * `accelerations`: accelerations acting on the propagated body
    ///
    /// Errors
    /// ------
    /// * [`OdError::UnknownBody`] if a name is not in the arena.
    /// * [`OdError::InvalidParameterSettings`] if a point-mass body has no gravitational
    ///   parameter, or the propagated body is its own central body.
    pub fn new(
        bodies: SystemOfBodies,
        propagated: &str,
        central: &str,
        accelerations: Vec<AccelerationSettings>,
    ) -> Result<Self, OdError> {
        let propagated_id = bodies.body_id(propagated)?;
        let central_id = bodies.body_id(central)?;
        if propagated_id == central_id {
            return Err(OdError::InvalidParameterSettings(format!(
                "{propagated} cannot be propagated about itself"
            )));
        }

        let accelerations = accelerations
            .into_iter()
            .map(|settings| match settings {
                AccelerationSettings::PointMassGravity { body } => {
                    let id = bodies.body_id(&body)?;
                    if id == propagated_id {
                        return Err(OdError::InvalidParameterSettings(format!(
                            "{body} cannot attract itself"
                        )));
                    }
                    bodies.gravitational_parameter(id)?;
                    Ok(Acceleration::PointMass {
                        body: id,
                        is_central: id == central_id,
                        parameter: None,
                    })
                }
                AccelerationSettings::ConstantEmpirical { acceleration } => {
                    Ok(Acceleration::Empirical {
                        acceleration,
                        parameter: None,
                    })
                }
            })
            .collect::<Result<Vec<_>, OdError>>()?;

        Ok(TranslationalDynamics {
            bodies,
            propagated: propagated_id,
            central: central_id,
            accelerations,
            estimated: Vec::new(),
            dependent_variables: Vec::new(),
        })
    }

    /// Declare the non-state parameters to estimate, in parameter-vector order.
    ///
    /// Errors
    /// ------
    /// * [`OdError::InvalidParameterSettings`] if a parameter does not act on this model.
    pub fn with_estimated_parameters(
        mut self,
        ids: Vec<EstimatableParameterId>,
    ) -> Result<Self, OdError> {
        for acceleration in self.accelerations.iter_mut() {
            match acceleration {
                Acceleration::PointMass { parameter, .. } | Acceleration::Empirical { parameter, .. } => {
                    *parameter = None
                }
            }
        }

        let mut offset = 0;
        for id in &ids {
            let matched = match id {
                EstimatableParameterId::GravitationalParameter { body } => {
                    let target = self.bodies.body_id(body)?;
                    self.accelerations.iter_mut().find_map(|a| match a {
                        Acceleration::PointMass {
                            body, parameter, ..
                        } if *body == target => {
                            *parameter = Some(offset);
                            Some(())
                        }
                        _ => None,
                    })
                }
                EstimatableParameterId::ConstantEmpiricalAcceleration { body } => {
                    if self.bodies.body_id(body)? != self.propagated {
                        None
                    } else {
                        self.accelerations.iter_mut().find_map(|a| match a {
                            Acceleration::Empirical { parameter, .. } => {
                                *parameter = Some(offset);
                                Some(())
                            }
                            _ => None,
                        })
                    }
                }
                _ => None,
            };
            if matched.is_none() {
                return Err(OdError::InvalidParameterSettings(format!(
                    "{id} does not act on the translational dynamics of {}",
                    self.bodies.name(self.propagated)?
                )));
            }
            offset += id.size();
        }

        self.estimated = ids;
        Ok(self)
    }

    /// Record dependent variables during propagation.
    ///
    /// Errors
    /// ------
    /// * [`OdError::UnknownBody`] if a referenced body is not in the arena.
    /// * [`OdError::InvalidParameterSettings`] if a variable is not about the propagated body.
    pub fn with_dependent_variables(
        mut self,
        variables: Vec<DependentVariable>,
    ) -> Result<Self, OdError> {
        for variable in &variables {
            let body = match variable {
                DependentVariable::RelativeDistance { body, relative_to }
                | DependentVariable::RelativeSpeed { body, relative_to } => {
                    self.bodies.body_id(relative_to)?;
                    body
                }
                DependentVariable::TotalAccelerationNorm { body } => body,
            };
            if self.bodies.body_id(body)? != self.propagated {
                return Err(OdError::InvalidParameterSettings(format!(
                    "dependent variable '{variable}' is not about the propagated body"
                )));
            }
        }
        self.dependent_variables = variables;
        Ok(self)
    }

    pub fn bodies(&self) -> &SystemOfBodies {
        &self.bodies
    }

    pub fn bodies_mut(&mut self) -> &mut SystemOfBodies {
        &mut self.bodies
    }

    pub fn propagated_body(&self) -> BodyId {
        self.propagated
    }

    pub fn central_body(&self) -> BodyId {
        self.central
    }

    fn gravitational_parameter(
        &self,
        body: BodyId,
        parameter: Option<usize>,
        parameters: &DVector<f64>,
    ) -> Result<f64, OdError> {
        match parameter {
            Some(offset) => parameters
                .get(offset)
                .copied()
                .ok_or_else(|| OdError::dimension("translational parameters", offset + 1, parameters.len())),
            None => self.bodies.gravitational_parameter(body),
        }
    }

    /// Position of `body` relative to the central body.
    fn relative_position(&self, body: BodyId, epoch: Epoch) -> Result<Vector3<f64>, OdError> {
        if body == self.central {
            return Ok(Vector3::zeros());
        }
        let state = self.bodies.relative_state(body, self.central, epoch)?;
        Ok(state.fixed_rows::<3>(0).into_owned())
    }

    /// Point-mass acceleration per unit gravitational parameter, and its gradient w.r.t. `r`.
    fn unit_point_mass(
        &self,
        body: BodyId,
        is_central: bool,
        epoch: Epoch,
        r: &Vector3<f64>,
    ) -> Result<(Vector3<f64>, Matrix3<f64>), OdError> {
        if is_central {
            let d = r.norm();
            let d3 = d * d * d;
            let acc = -r / d3;
            let grad = -(Matrix3::identity() / d3 - r * r.transpose() * (3.0 / (d3 * d * d)));
            Ok((acc, grad))
        } else {
            let r_b = self.relative_position(body, epoch)?;
            let delta = r_b - r;
            let d = delta.norm();
            let d3 = d * d * d;
            let rb3 = r_b.norm().powi(3);
            let acc = delta / d3 - r_b / rb3;
            let grad = -(Matrix3::identity() / d3 - delta * delta.transpose() * (3.0 / (d3 * d * d)));
            Ok((acc, grad))
        }
    }

    fn total_acceleration(
        &self,
        epoch: Epoch,
        r: &Vector3<f64>,
        parameters: &DVector<f64>,
    ) -> Result<Vector3<f64>, OdError> {
        let mut total = Vector3::zeros();
        for acceleration in &self.accelerations {
            match acceleration {
                Acceleration::PointMass {
                    body,
                    is_central,
                    parameter,
                } => {
                    let mu = self.gravitational_parameter(*body, *parameter, parameters)?;
                    let (unit, _) = self.unit_point_mass(*body, *is_central, epoch, r)?;
                    total += unit * mu;
                }
                Acceleration::Empirical {
                    acceleration,
                    parameter,
                } => {
                    total += match parameter {
                        Some(offset) => empirical_from(parameters, *offset)?,
                        None => *acceleration,
                    };
                }
            }
        }
        Ok(total)
    }

    fn check_state(&self, state: &StateVector) -> Result<Vector3<f64>, OdError> {
        if state.len() != 6 {
            return Err(OdError::dimension("translational state", 6, state.len()));
        }
        Ok(Vector3::new(state[0], state[1], state[2]))
    }
}

fn empirical_from(parameters: &DVector<f64>, offset: usize) -> Result<Vector3<f64>, OdError> {
    if parameters.len() < offset + 3 {
        return Err(OdError::dimension("translational parameters", offset + 3, parameters.len()));
    }
    Ok(Vector3::new(
        parameters[offset],
        parameters[offset + 1],
        parameters[offset + 2],
    ))
}

impl DynamicalModel for TranslationalDynamics {
    fn state_size(&self) -> usize {
        6
    }

    fn parameter_ids(&self) -> Vec<EstimatableParameterId> {
        self.estimated.clone()
    }

    fn default_parameter_values(&self) -> Result<DVector<f64>, OdError> {
        let mut values = DVector::zeros(self.parameter_size());
        for acceleration in &self.accelerations {
            match acceleration {
                Acceleration::PointMass {
                    body,
                    parameter: Some(offset),
                    ..
                } => {
                    values[*offset] = self.bodies.gravitational_parameter(*body)?;
                }
                Acceleration::Empirical {
                    acceleration,
                    parameter: Some(offset),
                } => {
                    values.rows_mut(*offset, 3).copy_from(acceleration);
                }
                _ => {}
            }
        }
        Ok(values)
    }

    fn compute_state_derivative(
        &self,
        epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<StateVector, OdError> {
        let r = self.check_state(state)?;
        let a = self.total_acceleration(epoch, &r, parameters)?;
        Ok(DVector::from_vec(vec![
            state[3], state[4], state[5], a[0], a[1], a[2],
        ]))
    }

    fn jacobian_wrt_state(
        &self,
        epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<Matrix, OdError> {
        let r = self.check_state(state)?;
        let mut jacobian = Matrix::zeros(6, 6);
        jacobian
            .view_mut((0, 3), (3, 3))
            .copy_from(&Matrix3::<f64>::identity());

        let mut gradient = Matrix3::zeros();
        for acceleration in &self.accelerations {
            if let Acceleration::PointMass {
                body,
                is_central,
                parameter,
            } = acceleration
            {
                let mu = self.gravitational_parameter(*body, *parameter, parameters)?;
                let (_, grad) = self.unit_point_mass(*body, *is_central, epoch, &r)?;
                gradient += grad * mu;
            }
        }
        jacobian.view_mut((3, 0), (3, 3)).copy_from(&gradient);
        Ok(jacobian)
    }

    fn jacobian_wrt_parameters(
        &self,
        epoch: Epoch,
        state: &StateVector,
        _parameters: &DVector<f64>,
    ) -> Result<Matrix, OdError> {
        let r = self.check_state(state)?;
        let mut jacobian = Matrix::zeros(6, self.parameter_size());
        for acceleration in &self.accelerations {
            match acceleration {
                Acceleration::PointMass {
                    body,
                    is_central,
                    parameter: Some(offset),
                } => {
                    let (unit, _) = self.unit_point_mass(*body, *is_central, epoch, &r)?;
                    jacobian.view_mut((3, *offset), (3, 1)).copy_from(&unit);
                }
                Acceleration::Empirical {
                    parameter: Some(offset),
                    ..
                } => {
                    jacobian
                        .view_mut((3, *offset), (3, 3))
                        .copy_from(&Matrix3::<f64>::identity());
                }
                _ => {}
            }
        }
        Ok(jacobian)
    }

    fn dependent_variable_ids(&self) -> Vec<DependentVariable> {
        self.dependent_variables.clone()
    }

    fn dependent_variables(
        &self,
        epoch: Epoch,
        state: &StateVector,
        parameters: &DVector<f64>,
    ) -> Result<Option<DVector<f64>>, OdError> {
        if self.dependent_variables.is_empty() {
            return Ok(None);
        }
        let r = self.check_state(state)?;
        let v = Vector3::new(state[3], state[4], state[5]);

        let values = self
            .dependent_variables
            .iter()
            .map(|variable| match variable {
                DependentVariable::RelativeDistance { relative_to, .. } => {
                    let other = self.bodies.body_id(relative_to)?;
                    Ok((r - self.relative_position(other, epoch)?).norm())
                }
                DependentVariable::RelativeSpeed { relative_to, .. } => {
                    let other = self.bodies.body_id(relative_to)?;
                    let velocity = if other == self.central {
                        Vector3::zeros()
                    } else {
                        let s = self.bodies.relative_state(other, self.central, epoch)?;
                        Vector3::new(s[3], s[4], s[5])
                    };
                    Ok((v - velocity).norm())
                }
                DependentVariable::TotalAccelerationNorm { .. } => {
                    Ok(self.total_acceleration(epoch, &r, parameters)?.norm())
                }
            })
            .collect::<Result<Vec<f64>, OdError>>()?;
        Ok(Some(DVector::from_vec(values)))
    }

    /// Store the propagated trajectory as the tabulated ephemeris of the propagated body,
    /// relative to the central body.
    fn set_integrated_result(&mut self, processed_states: &StateHistory) -> Result<(), OdError> {
        self.bodies
            .set_tabulated_ephemeris(self.propagated, processed_states)?;
        self.bodies.body_mut(self.propagated)?.ephemeris_origin = Some(self.central);
        Ok(())
    }
}
