//! Conversions between calendar epochs and the propagation time axis.
//!
//! The numerical core works on plain `f64` epochs expressed in **TDB seconds since J2000**.
//! These helpers bridge that axis with [`hifitime::Epoch`], which handles time scales and
//! calendar parsing.

use hifitime::TimeScale;

use crate::{constants::Epoch, od_errors::OdError};

/// Convert a [`hifitime::Epoch`] to TDB seconds since J2000.
///
/// Arguments
/// ---------
/// * `epoch`: any hifitime epoch, whatever its time scale
///
/// Return
/// ------
/// * the epoch on the propagation time axis
pub fn to_propagation_epoch(epoch: &hifitime::Epoch) -> Epoch {
    epoch.to_tdb_seconds()
}

/// Convert TDB seconds since J2000 back to a [`hifitime::Epoch`].
pub fn from_propagation_epoch(seconds: Epoch) -> hifitime::Epoch {
    hifitime::Epoch::from_tdb_seconds(seconds)
}

/// Transformation from modified julian dates (MJD) in the TT frame to propagation epochs
///
/// Argument
/// --------
/// * `mjd`: a slice of MJD expressed in Terrestrial Time
///
/// Return
/// ------
/// * a vector of TDB seconds since J2000
pub fn mjd_tt_to_propagation_epochs(mjd: &[f64]) -> Vec<Epoch> {
    mjd.iter()
        .map(|x| hifitime::Epoch::from_mjd_in_time_scale(*x, TimeScale::TT).to_tdb_seconds())
        .collect()
}

/// Build a uniform grid of epochs `start, start + step, ...` strictly below `end`.
///
/// Typically used to schedule simulated tracking passes.
///
/// Errors
/// ------
/// * [`OdError::InvalidTerminationSettings`] if `step` is not strictly positive or the bounds
///   are not finite.
pub fn epoch_grid(start: Epoch, end: Epoch, step: f64) -> Result<Vec<Epoch>, OdError> {
    if !(step > 0.0) || !start.is_finite() || !end.is_finite() {
        return Err(OdError::InvalidTerminationSettings(format!(
            "epoch grid requires finite bounds and a positive step (start={start}, end={end}, step={step})"
        )));
    }

    let count = ((end - start) / step).ceil().max(0.0) as usize;
    Ok((0..count)
        .map(|i| start + i as f64 * step)
        .filter(|t| *t < end)
        .collect())
}
