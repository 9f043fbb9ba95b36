use ndarray::Array1;

use super::error::{AnalysisError, SessionError};
use super::session::Session;
use super::timeseries::TimeSeries;

/// Linear interpolation of the samples (xp, fp) at x.
///
/// xp must be increasing. Outside `[xp[0], xp[last]]` the edge values are returned (no linear
/// extrapolation), which is the usual convention for resampling onto a shared grid.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> Result<f64, AnalysisError> {
    if xp.len() != fp.len() {
        return Err(AnalysisError::LengthMismatch {
            xp: xp.len(),
            fp: fp.len(),
        });
    }
    let last = match xp.len() {
        0 => return Err(AnalysisError::EmptySeries),
        n => n - 1,
    };
    if x.is_nan() {
        return Ok(f64::NAN);
    }
    if x <= xp[0] {
        return Ok(fp[0]);
    }
    if x >= xp[last] {
        return Ok(fp[last]);
    }
    // First sample strictly after x; guaranteed to be in 1..=last by the checks above
    let upper = xp.partition_point(|v| *v <= x);
    let lower = upper - 1;
    let span = xp[upper] - xp[lower];
    if span == 0.0 {
        return Ok(fp[upper]);
    }
    let weight = (x - xp[lower]) / span;
    Ok(fp[lower] + weight * (fp[upper] - fp[lower]))
}

/// Interpolate (xp, fp) at every point of grid
pub fn interp_grid(grid: &[f64], xp: &[f64], fp: &[f64]) -> Result<Array1<f64>, AnalysisError> {
    grid.iter().map(|x| interp(*x, xp, fp)).collect()
}

/// Column-wise mean of equally long rows, ignoring NaN. All-NaN columns are NaN.
pub fn nanmean_rows(rows: &[Array1<f64>]) -> Array1<f64> {
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    Array1::from_iter((0..width).map(|col| {
        let (sum, count) = rows
            .iter()
            .filter_map(|row| row.get(col))
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
        if count == 0 {
            f64::NAN
        } else {
            sum / count as f64
        }
    }))
}

/// The mean of one measurement across acquisitions on a shared, rebased time grid
#[derive(Debug, Clone, PartialEq)]
pub struct MeanResponse {
    /// Reference grid: rebased timestamps of the first acquisition that produced data
    pub time: Array1<f64>,
    pub mean: Array1<f64>,
    pub included: Vec<String>,
    pub skipped: Vec<String>,
}

/// Average a measurement over acquisitions.
///
/// fetch returns `(rebased timestamps, values)` for one acquisition. Acquisitions whose fetch
/// fails are skipped and listed in the result; the remaining ones are interpolated onto the
/// grid of the first successful acquisition and averaged ignoring NaN.
pub fn aggregate_mean<F>(names: &[String], mut fetch: F) -> Result<MeanResponse, AnalysisError>
where
    F: FnMut(&str) -> Result<(Array1<f64>, Array1<f64>), AnalysisError>,
{
    let mut grid: Option<Array1<f64>> = None;
    let mut rows: Vec<Array1<f64>> = Vec::new();
    let mut included = Vec::new();
    let mut skipped = Vec::new();

    for name in names.iter() {
        let resampled = fetch(name).and_then(|(time, values)| {
            let reference = grid.clone().unwrap_or_else(|| time.clone());
            let row = interp_grid(&reference.to_vec(), &time.to_vec(), &values.to_vec())?;
            Ok((reference, row))
        });
        match resampled {
            Ok((reference, row)) => {
                grid.get_or_insert(reference);
                rows.push(row);
                included.push(name.clone());
            }
            Err(e) => {
                log::warn!("Skipping acquisition {name}: {e}");
                skipped.push(name.clone());
            }
        }
    }

    match grid {
        Some(time) if !rows.is_empty() => Ok(MeanResponse {
            mean: nanmean_rows(&rows),
            time,
            included,
            skipped,
        }),
        _ => Err(AnalysisError::NoData),
    }
}

/// Mean pupil radius across the acquisitions of a session, skipping those without one
pub fn pupil_radius_mean(session: &Session) -> Result<MeanResponse, AnalysisError> {
    aggregate_mean(&session.get_acquisition_names(), |name| {
        let series = session.get_pupil_radius(name)?;
        let values = series.get_data().map_err(SessionError::from)?;
        Ok((series.get_rebased_timestamps(), values))
    })
}

/// Mean response of one ROI (1-based number) across the acquisitions of a session
pub fn roi_mean(session: &Session, roi_number: usize) -> Result<MeanResponse, AnalysisError> {
    if roi_number == 0 {
        return Err(AnalysisError::BadRoiNumber(roi_number));
    }
    aggregate_mean(&session.get_acquisition_names(), |name| {
        let series = session.get_roi_response_series(name)?;
        let values = series
            .get_channel(roi_number - 1)
            .map_err(SessionError::from)?;
        Ok((series.get_rebased_timestamps(), values))
    })
}

/// Two values per acquisition, each sampled at a rebased time
#[derive(Debug, Clone, PartialEq)]
pub struct Scatter {
    /// (acquisition, x, y)
    pub points: Vec<(String, f64, f64)>,
    pub skipped: Vec<String>,
}

/// Collect one (x, y) point per acquisition. Acquisitions whose sample fails are skipped.
pub fn scatter<F>(names: &[String], mut sample: F) -> Result<Scatter, AnalysisError>
where
    F: FnMut(&str) -> Result<(f64, f64), AnalysisError>,
{
    let mut points = Vec::new();
    let mut skipped = Vec::new();
    for name in names.iter() {
        match sample(name) {
            Ok((x, y)) => points.push((name.clone(), x, y)),
            Err(e) => {
                log::warn!("Skipping acquisition {name}: {e}");
                skipped.push(name.clone());
            }
        }
    }
    if points.is_empty() {
        return Err(AnalysisError::NoData);
    }
    Ok(Scatter { points, skipped })
}

/// Pupil radius of one acquisition at a rebased time
pub fn pupil_radius_at(session: &Session, name: &str, time: f64) -> Result<f64, AnalysisError> {
    let series = session.get_pupil_radius(name)?;
    let values = series.get_data().map_err(SessionError::from)?;
    interp(time, &series.get_rebased_timestamps().to_vec(), &values.to_vec())
}

/// Response of one ROI (1-based number) of one acquisition at a rebased time
pub fn roi_response_at(
    session: &Session,
    name: &str,
    roi_number: usize,
    time: f64,
) -> Result<f64, AnalysisError> {
    if roi_number == 0 {
        return Err(AnalysisError::BadRoiNumber(roi_number));
    }
    let series = session.get_roi_response_series(name)?;
    let values = series
        .get_channel(roi_number - 1)
        .map_err(SessionError::from)?;
    interp(time, &series.get_rebased_timestamps().to_vec(), &values.to_vec())
}

/// Pupil radius at x_time against pupil radius at y_time, per acquisition
pub fn pupil_radius_scatter(
    session: &Session,
    x_time: f64,
    y_time: f64,
) -> Result<Scatter, AnalysisError> {
    scatter(&session.get_acquisition_names(), |name| {
        Ok((
            pupil_radius_at(session, name, x_time)?,
            pupil_radius_at(session, name, y_time)?,
        ))
    })
}

/// ROI response at roi_time against pupil radius at pupil_time, per acquisition
pub fn roi_pupil_scatter(
    session: &Session,
    roi_number: usize,
    roi_time: f64,
    pupil_time: f64,
) -> Result<Scatter, AnalysisError> {
    if roi_number == 0 {
        return Err(AnalysisError::BadRoiNumber(roi_number));
    }
    scatter(&session.get_acquisition_names(), |name| {
        Ok((
            roi_response_at(session, name, roi_number, roi_time)?,
            pupil_radius_at(session, name, pupil_time)?,
        ))
    })
}
