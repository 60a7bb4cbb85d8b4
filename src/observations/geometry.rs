//! Link geometry: observable values and their partials with respect to the link-end Cartesian
//! states.
//!
//! Every geometry receives the states of the two link ends listed by
//! [`ObservableType::required_link_ends`], in that order, and works on the relative state
//! `ρ = state(first) - state(second)`. The partials with respect to the second link end are the
//! negatives of those with respect to the first one.

use std::{f64::consts::PI, fmt, sync::Arc};

use nalgebra::{DVector, Matrix3, Vector3, Vector6};

use crate::{
    constants::{Epoch, Matrix, DPI},
    od_errors::OdError,
};

use super::ObservableType;

/// Observable as a function of the link-end states.
pub trait LinkGeometry: fmt::Debug + Send + Sync {
    /// Number of scalar entries of the observable.
    fn observable_size(&self) -> usize;

    /// Observable value.
    ///
    /// Arguments
    /// ---------
    /// * `link_end_states`: Cartesian states (position, velocity) of the link ends
    /// * `link_end_times`: epoch at which each link-end state is evaluated
    fn evaluate(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<DVector<f64>, OdError>;

    /// One `observable_size × 6` matrix per link end: partials of the observable with respect to
    /// that link end's Cartesian state.
    fn partials(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<Vec<Matrix>, OdError>;

    /// `observed - computed`, with any wrapping the observable needs.
    fn residual(&self, observed: &DVector<f64>, computed: &DVector<f64>) -> DVector<f64> {
        observed - computed
    }
}

/// Geometry of a built-in observable type.
pub fn geometry_for(observable: ObservableType) -> Arc<dyn LinkGeometry> {
    match observable {
        ObservableType::OneWayRange => Arc::new(OneWayRangeGeometry),
        ObservableType::AngularPosition => Arc::new(AngularPositionGeometry),
        ObservableType::RelativePosition => Arc::new(RelativePositionGeometry),
        ObservableType::RelativeCartesianState => Arc::new(RelativeCartesianStateGeometry),
    }
}

fn relative_state(
    link_end_states: &[Vector6<f64>],
    link_end_times: &[Epoch],
) -> Result<Vector6<f64>, OdError> {
    if link_end_states.len() != 2 {
        return Err(OdError::dimension("link-end states", 2, link_end_states.len()));
    }
    if link_end_times.len() != link_end_states.len() {
        return Err(OdError::dimension(
            "link-end times",
            link_end_states.len(),
            link_end_times.len(),
        ));
    }
    Ok(link_end_states[0] - link_end_states[1])
}

/// `[∂y/∂ρ, -∂y/∂ρ]` for an observable depending on the relative state only.
fn split_partials(relative_partial: Matrix) -> Vec<Matrix> {
    let negated = -&relative_partial;
    vec![relative_partial, negated]
}

/// `|r_transmitter - r_receiver|`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneWayRangeGeometry;

impl LinkGeometry for OneWayRangeGeometry {
    fn observable_size(&self) -> usize {
        1
    }

    fn evaluate(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<DVector<f64>, OdError> {
        let rho = relative_state(link_end_states, link_end_times)?;
        Ok(DVector::from_element(1, rho.fixed_rows::<3>(0).norm()))
    }

    fn partials(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<Vec<Matrix>, OdError> {
        let rho = relative_state(link_end_states, link_end_times)?;
        let position: Vector3<f64> = rho.fixed_rows::<3>(0).into_owned();
        let range = position.norm();

        let mut partial = Matrix::zeros(1, 6);
        if range > 0.0 {
            for i in 0..3 {
                partial[(0, i)] = position[i] / range;
            }
        }
        Ok(split_partials(partial))
    }
}

/// Right ascension and declination of the transmitter as seen from the receiver.
///
/// The right ascension lies in `[0, 2π)` and its residual is wrapped to `(-π, π]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AngularPositionGeometry;

impl AngularPositionGeometry {
    /// `(α, δ)` of a Cartesian direction.
    pub fn right_ascension_declination(position: &Vector3<f64>) -> (f64, f64) {
        let norm = position.norm();
        if norm == 0.0 {
            return (0.0, 0.0);
        }
        let declination = (position.z / norm).asin();
        let right_ascension = position.y.atan2(position.x).rem_euclid(DPI);
        (right_ascension, declination)
    }
}

impl LinkGeometry for AngularPositionGeometry {
    fn observable_size(&self) -> usize {
        2
    }

    fn evaluate(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<DVector<f64>, OdError> {
        let rho = relative_state(link_end_states, link_end_times)?;
        let (alpha, delta) = Self::right_ascension_declination(&rho.fixed_rows::<3>(0).into_owned());
        Ok(DVector::from_vec(vec![alpha, delta]))
    }

    fn partials(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<Vec<Matrix>, OdError> {
        let rho = relative_state(link_end_states, link_end_times)?;
        let (x, y, z) = (rho[0], rho[1], rho[2]);
        let planar2 = x * x + y * y;
        let planar = planar2.sqrt();
        let r2 = planar2 + z * z;

        let mut partial = Matrix::zeros(2, 6);
        // undefined at the poles and at zero range
        if planar > 0.0 {
            partial[(0, 0)] = -y / planar2;
            partial[(0, 1)] = x / planar2;

            partial[(1, 0)] = -x * z / (r2 * planar);
            partial[(1, 1)] = -y * z / (r2 * planar);
            partial[(1, 2)] = planar / r2;
        }
        Ok(split_partials(partial))
    }

    fn residual(&self, observed: &DVector<f64>, computed: &DVector<f64>) -> DVector<f64> {
        let mut residual = observed - computed;
        if residual.len() == 2 {
            let wrapped = (residual[0] + PI).rem_euclid(DPI) - PI;
            residual[0] = if wrapped == -PI { PI } else { wrapped };
        }
        residual
    }
}

/// `r_observed - r_observer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativePositionGeometry;

impl LinkGeometry for RelativePositionGeometry {
    fn observable_size(&self) -> usize {
        3
    }

    fn evaluate(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<DVector<f64>, OdError> {
        let rho = relative_state(link_end_states, link_end_times)?;
        Ok(DVector::from_iterator(3, rho.fixed_rows::<3>(0).iter().copied()))
    }

    fn partials(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<Vec<Matrix>, OdError> {
        relative_state(link_end_states, link_end_times)?;
        let mut partial = Matrix::zeros(3, 6);
        partial
            .view_mut((0, 0), (3, 3))
            .copy_from(&Matrix3::<f64>::identity());
        Ok(split_partials(partial))
    }
}

/// `x_observed - x_observer`, position and velocity.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativeCartesianStateGeometry;

impl LinkGeometry for RelativeCartesianStateGeometry {
    fn observable_size(&self) -> usize {
        6
    }

    fn evaluate(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<DVector<f64>, OdError> {
        let rho = relative_state(link_end_states, link_end_times)?;
        Ok(DVector::from_column_slice(rho.as_slice()))
    }

    fn partials(
        &self,
        link_end_states: &[Vector6<f64>],
        link_end_times: &[Epoch],
    ) -> Result<Vec<Matrix>, OdError> {
        relative_state(link_end_states, link_end_times)?;
        Ok(split_partials(Matrix::identity(6, 6)))
    }
}

#[cfg(test)]
mod geometry_test {
    use super::*;
    use approx::assert_relative_eq;

    fn states() -> [Vector6<f64>; 2] {
        [
            Vector6::new(7.0e6, 1.0e6, 2.0e6, 10.0, 7.5e3, 1.0),
            Vector6::new(6.378e6, 0.0, 0.0, 0.0, 465.0, 0.0),
        ]
    }

    #[test]
    fn test_range_and_partials() {
        let geometry = OneWayRangeGeometry;
        let s = states();
        let range = geometry.evaluate(&s, &[0.0, 0.0]).unwrap();
        let expected = (s[0] - s[1]).fixed_rows::<3>(0).norm();
        assert_relative_eq!(range[0], expected);

        let partials = geometry.partials(&s, &[0.0, 0.0]).unwrap();
        assert_eq!(partials.len(), 2);
        assert_relative_eq!(partials[0][(0, 0)], (s[0][0] - s[1][0]) / expected);
        assert_eq!(partials[1], -&partials[0]);
        assert_eq!(partials[0][(0, 3)], 0.0);
    }

    #[test]
    fn test_angular_partials_match_finite_differences() {
        let geometry = AngularPositionGeometry;
        let s = states();
        let partials = geometry.partials(&s, &[0.0, 0.0]).unwrap();

        for i in 0..3 {
            let h = 1.0;
            let mut plus = s;
            plus[0][i] += h;
            let mut minus = s;
            minus[0][i] -= h;
            let diff = (geometry.evaluate(&plus, &[0.0, 0.0]).unwrap()
                - geometry.evaluate(&minus, &[0.0, 0.0]).unwrap())
                / (2.0 * h);
            assert_relative_eq!(partials[0][(0, i)], diff[0], epsilon = 1e-14, max_relative = 1e-6);
            assert_relative_eq!(partials[0][(1, i)], diff[1], epsilon = 1e-14, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_right_ascension_range_and_wrapping() {
        let (alpha, delta) =
            AngularPositionGeometry::right_ascension_declination(&Vector3::new(1.0, -1.0, 0.0));
        assert_relative_eq!(alpha, 1.75 * PI);
        assert_eq!(delta, 0.0);

        let geometry = AngularPositionGeometry;
        let residual = geometry.residual(
            &DVector::from_vec(vec![0.01, 0.2]),
            &DVector::from_vec(vec![DPI - 0.01, 0.1]),
        );
        assert_relative_eq!(residual[0], 0.02, epsilon = 1e-12);
        assert_relative_eq!(residual[1], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_state_geometries() {
        let s = states();
        let position = RelativePositionGeometry.evaluate(&s, &[0.0, 0.0]).unwrap();
        assert_eq!(position.len(), 3);
        assert_eq!(position[0], s[0][0] - s[1][0]);

        let cartesian = RelativeCartesianStateGeometry.evaluate(&s, &[0.0, 0.0]).unwrap();
        assert_eq!(cartesian[4], s[0][4] - s[1][4]);
        let partials = RelativeCartesianStateGeometry.partials(&s, &[0.0, 0.0]).unwrap();
        assert_eq!(partials[0], Matrix::identity(6, 6));

        assert!(RelativePositionGeometry.evaluate(&s[..1], &[0.0]).is_err());
        assert!(RelativePositionGeometry.evaluate(&s, &[0.0]).is_err());
    }
}
