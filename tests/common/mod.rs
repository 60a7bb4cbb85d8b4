#![allow(dead_code)]

use nalgebra::{DVector, Vector6};
use odkit::{
    bodies::{BodyRecord, Ephemeris, SystemOfBodies},
    constants::{Matrix, EARTH_EQUATORIAL_RADIUS, EARTH_GRAVITATIONAL_PARAMETER, RADEG},
    dynamics::{
        acceleration::{AccelerationSettings, TranslationalDynamics},
        linear::LinearDynamics,
    },
    observations::{
        model::{body_state_function, constant_state, LinkEndStateSource, ObservationModel},
        viability::ObservationViabilityCalculator,
        LinkDefinition, LinkEndId, LinkEndType, ObservableType,
    },
    parameters::{EstimatableParameterId, EstimatableParameterSet},
};

/// Free particle in 3D driven by an unknown constant acceleration:
/// `x = [r; v]`, `ṙ = v`, `v̇ = a`.
pub fn accelerated_particle(nominal_acceleration: [f64; 3]) -> LinearDynamics {
    let mut a = Matrix::zeros(6, 6);
    let mut b = Matrix::zeros(6, 3);
    for i in 0..3 {
        a[(i, i + 3)] = 1.0;
        b[(i + 3, i)] = 1.0;
    }
    LinearDynamics::new(a)
        .unwrap()
        .with_parameters(
            b,
            vec!["ax".into(), "ay".into(), "az".into()],
            DVector::from_row_slice(&nominal_acceleration),
        )
        .unwrap()
}

pub fn particle_parameter_set() -> EstimatableParameterSet {
    EstimatableParameterSet::new(vec![
        EstimatableParameterId::InitialState {
            body: "Particle".into(),
            size: 6,
        },
        EstimatableParameterId::ModelConstant { name: "ax".into() },
        EstimatableParameterId::ModelConstant { name: "ay".into() },
        EstimatableParameterId::ModelConstant { name: "az".into() },
    ])
    .unwrap()
}

pub fn particle_link() -> LinkDefinition {
    LinkDefinition::observed_from(LinkEndId::body("Particle"), LinkEndId::body("Origin"))
}

/// Position of the particle relative to a fixed origin.
pub fn particle_position_model() -> ObservationModel {
    ObservationModel::new(
        ObservableType::RelativePosition,
        particle_link(),
        [
            (
                LinkEndType::ObservedBody,
                LinkEndStateSource::Propagated { state_offset: 0 },
            ),
            (
                LinkEndType::Observer,
                LinkEndStateSource::Ephemeris(constant_state(Vector6::zeros())),
            ),
        ],
    )
    .unwrap()
}

/// Earth fixed at the origin and an empty record for the satellite.
pub fn earth_and_satellite() -> SystemOfBodies {
    let mut bodies = SystemOfBodies::new();
    bodies
        .add_body(
            BodyRecord::new("Earth")
                .with_gravitational_parameter(EARTH_GRAVITATIONAL_PARAMETER)
                .with_mean_radius(EARTH_EQUATORIAL_RADIUS)
                .with_ephemeris(Ephemeris::Constant(Vector6::zeros()), None),
        )
        .unwrap();
    bodies.add_body(BodyRecord::new("Sat")).unwrap();
    bodies
}

pub fn two_body_model(bodies: SystemOfBodies) -> TranslationalDynamics {
    TranslationalDynamics::new(
        bodies,
        "Sat",
        "Earth",
        vec![AccelerationSettings::PointMassGravity {
            body: "Earth".into(),
        }],
    )
    .unwrap()
}

/// Low orbit starting over the equatorial station.
pub fn leo_initial_state() -> DVector<f64> {
    DVector::from_vec(vec![7.0e6, 0.0, 0.0, 0.0, 7.5e3, 100.0])
}

pub fn station_position() -> Vector6<f64> {
    Vector6::new(EARTH_EQUATORIAL_RADIUS, 0.0, 0.0, 0.0, 0.0, 0.0)
}

pub fn satellite_link() -> LinkDefinition {
    LinkDefinition::observed_from(LinkEndId::body("Sat"), LinkEndId::body("Earth"))
}

pub fn range_link() -> LinkDefinition {
    LinkDefinition::one_way(LinkEndId::body("Sat"), LinkEndId::station("Earth", "Station"))
}

/// Satellite position relative to the Earth and range to an equatorial station visible above
/// 5 degrees of elevation.
pub fn satellite_models(bodies: &SystemOfBodies) -> Vec<ObservationModel> {
    let earth = body_state_function(bodies, "Earth").unwrap();
    let position = ObservationModel::new(
        ObservableType::RelativePosition,
        satellite_link(),
        [
            (
                LinkEndType::ObservedBody,
                LinkEndStateSource::Propagated { state_offset: 0 },
            ),
            (LinkEndType::Observer, LinkEndStateSource::Ephemeris(earth.clone())),
        ],
    )
    .unwrap();
    let range = ObservationModel::new(
        ObservableType::OneWayRange,
        range_link(),
        [
            (
                LinkEndType::Transmitter,
                LinkEndStateSource::Propagated { state_offset: 0 },
            ),
            (
                LinkEndType::Receiver,
                LinkEndStateSource::Ephemeris(constant_state(station_position())),
            ),
        ],
    )
    .unwrap()
    .with_viability(vec![ObservationViabilityCalculator::MinimumElevationAngle {
        station: LinkEndType::Receiver,
        minimum_elevation: 5.0 * RADEG,
        station_body: earth,
    }]);
    vec![position, range]
}

pub fn satellite_parameter_set() -> EstimatableParameterSet {
    EstimatableParameterSet::new(vec![
        EstimatableParameterId::InitialState {
            body: "Sat".into(),
            size: 6,
        },
        EstimatableParameterId::GravitationalParameter {
            body: "Earth".into(),
        },
    ])
    .unwrap()
}
