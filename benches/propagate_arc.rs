//! Benchmarks for arc propagation and the variational equations (single-threaded)
//!
//! Run with:
//!   cargo bench --bench propagate_arc
//!   cargo bench propagate_arc -- propagate_arc/variational

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use nalgebra::{DVector, Vector6};

use odkit::bodies::{BodyRecord, Ephemeris, SystemOfBodies};
use odkit::constants::EARTH_GRAVITATIONAL_PARAMETER;
use odkit::dynamics::acceleration::{AccelerationSettings, TranslationalDynamics};
use odkit::integrator::IntegratorSettings;
use odkit::parameters::{EstimatableParameterId, EstimatableParameterSet};
use odkit::propagation::dynamics::DynamicsPropagator;
use odkit::propagation::variational::{VariationalEquationsPropagator, VariationalSolverOptions};
use odkit::propagation::{PropagationOptions, PropagatorSettings, TerminationSettings};

fn two_body() -> TranslationalDynamics {
    let mut bodies = SystemOfBodies::new();
    bodies
        .add_body(
            BodyRecord::new("Earth")
                .with_gravitational_parameter(EARTH_GRAVITATIONAL_PARAMETER)
                .with_ephemeris(Ephemeris::Constant(Vector6::zeros()), None),
        )
        .expect("Earth record");
    bodies.add_body(BodyRecord::new("Sat")).expect("Sat record");
    TranslationalDynamics::new(
        bodies,
        "Sat",
        "Earth",
        vec![AccelerationSettings::PointMassGravity {
            body: "Earth".into(),
        }],
    )
    .expect("two-body model")
}

fn settings() -> PropagatorSettings {
    PropagatorSettings::new(
        0.0,
        DVector::from_vec(vec![7.0e6, 0.0, 0.0, 0.0, 7.5e3, 100.0]),
        TerminationSettings::until(86_400.0),
    )
}

/// One day of LEO with the adaptive integrator.
fn bench_dynamics(c: &mut Criterion) {
    c.bench_function("propagate_arc/dynamics_rkf45_1day", |b| {
        b.iter_batched(
            two_body,
            |model| {
                let propagator = DynamicsPropagator::new(
                    model,
                    IntegratorSettings::rkf45(10.0, 1e-3, 300.0, 1e-10),
                    settings(),
                    PropagationOptions::default(),
                )
                .expect("propagation");
                black_box(propagator.state_history().len())
            },
            BatchSize::SmallInput,
        )
    });
}

/// State transition matrix over one day, concurrent vs sequential.
fn bench_variational(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate_arc/variational");
    for concurrently in [true, false] {
        let name = if concurrently { "concurrent" } else { "sequential" };
        group.bench_function(name, |b| {
            b.iter_batched(
                two_body,
                |model| {
                    let propagator = VariationalEquationsPropagator::new(
                        model,
                        IntegratorSettings::RungeKutta4 { step_size: 30.0 },
                        settings(),
                        EstimatableParameterSet::new(vec![EstimatableParameterId::InitialState {
                            body: "Sat".into(),
                            size: 6,
                        }])
                        .expect("parameter set"),
                        VariationalSolverOptions::builder()
                            .integrate_equations_concurrently(concurrently)
                            .build()
                            .expect("options"),
                    )
                    .expect("variational propagation");
                    black_box(propagator.state_transition_matrix_history().len())
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dynamics, bench_variational);
criterion_main!(benches);
