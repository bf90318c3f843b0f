//! Sensor noise estimation from historical residuals.
//!
//! Each sensor's fitted series is compared against ground truth day by day to
//! form a (time x sensor) residual matrix. Days a sensor has no fitted value
//! for stay NaN; zeroing them would bias the covariance toward no noise, so
//! the distinction is carried through to the external estimator.

use std::collections::HashMap;

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::geo::Location;
use crate::sensors::Sensor;
use crate::{Error, Result};

/// Off-diagonal shrinkage the external covariance estimator should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendStrategy {
    Diagonal0,
    Diagonal1,
    Diagonal2,
}

impl Default for BlendStrategy {
    fn default() -> Self {
        BlendStrategy::Diagonal2
    }
}

/// External MLE covariance routine producing a full-rank approximation.
///
/// Residual gaps arrive as NaN and must be treated as missing data, not as
/// zero residuals.
pub trait CovarianceEstimator {
    fn estimate(&self, residuals: &Array2<f64>, blend: BlendStrategy) -> Result<Array2<f64>>;
}

/// Build the (time x sensor) residual matrix for an ensemble.
///
/// `truth` is time x location with columns in `locations` order; entry
/// `(i, j)` is truth minus sensor j's fitted value on `training_dates[i]`,
/// or NaN where the sensor has no fitted value for that day.
pub fn residual_matrix(
    sensors: &[Sensor],
    locations: &[Location],
    truth: &Array2<f64>,
    training_dates: &[NaiveDate],
) -> Result<Array2<f64>> {
    let mut residuals = Array2::from_elem((training_dates.len(), sensors.len()), f64::NAN);
    for (j, sensor) in sensors.iter().enumerate() {
        let column = locations
            .iter()
            .position(|location| *location == sensor.location)
            .ok_or_else(|| {
                Error::DataError(format!(
                    "sensor location {} is not in the requested location list",
                    sensor.location
                ))
            })?;
        let fitted_index: HashMap<NaiveDate, usize> = sensor
            .dates
            .iter()
            .enumerate()
            .map(|(k, &date)| (date, k))
            .collect();
        for (i, date) in training_dates.iter().enumerate() {
            if let Some(&k) = fitted_index.get(date) {
                let fitted = sensor.fitted.get(k).copied().ok_or_else(|| {
                    Error::DataError(format!(
                        "sensor {}:{} at {} has no fitted value for {date}",
                        sensor.source, sensor.signal, sensor.location
                    ))
                })?;
                residuals[[i, j]] = truth[[i, column]] - fitted;
            }
        }
    }
    Ok(residuals)
}

/// Estimates the sensor noise covariance for one run.
pub struct NoiseEstimator<'a> {
    estimator: &'a dyn CovarianceEstimator,
    blend: BlendStrategy,
}

impl<'a> NoiseEstimator<'a> {
    pub fn new(estimator: &'a dyn CovarianceEstimator, blend: BlendStrategy) -> Self {
        Self { estimator, blend }
    }

    /// Full-rank noise covariance, sensor x sensor.
    pub fn covariance(
        &self,
        sensors: &[Sensor],
        locations: &[Location],
        truth: &Array2<f64>,
        training_dates: &[NaiveDate],
    ) -> Result<Array2<f64>> {
        log::info!("estimating noise covariance for {} sensors", sensors.len());
        let residuals = residual_matrix(sensors, locations, truth, training_dates)?;
        let covariance = self.estimator.estimate(&residuals, self.blend)?;
        if covariance.nrows() != sensors.len() || covariance.ncols() != sensors.len() {
            return Err(Error::DataError(format!(
                "covariance estimate is {}x{} for {} sensors",
                covariance.nrows(),
                covariance.ncols(),
                sensors.len()
            )));
        }
        Ok(covariance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 4, d).unwrap()
    }

    fn sensor(location: Location, dates: Vec<NaiveDate>, fitted: Vec<f64>) -> Sensor {
        Sensor {
            source: "src".into(),
            signal: "sig".into(),
            date: date(11),
            location,
            coefficients: vec![0.0, 1.0],
            fitted,
            dates,
            estimate: 0.0,
        }
    }

    #[test]
    fn residuals_are_truth_minus_fitted() {
        let locations = vec![Location::county("48001")];
        let training_dates = vec![date(1), date(2), date(3)];
        let truth = Array2::from_shape_vec((3, 1), vec![10.0, 20.0, 30.0]).unwrap();
        let sensors = vec![sensor(
            Location::county("48001"),
            training_dates.clone(),
            vec![9.0, 21.0, 30.0],
        )];

        let residuals = residual_matrix(&sensors, &locations, &truth, &training_dates).unwrap();
        assert_eq!(residuals.dim(), (3, 1));
        assert!((residuals[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((residuals[[1, 0]] + 1.0).abs() < 1e-12);
        assert!((residuals[[2, 0]]).abs() < 1e-12);
    }

    #[test]
    fn missing_days_stay_nan() {
        let locations = vec![Location::county("48001")];
        let training_dates = vec![date(1), date(2), date(3)];
        let truth = Array2::from_shape_vec((3, 1), vec![10.0, 20.0, 30.0]).unwrap();
        // fitted series skips the middle day
        let sensors = vec![sensor(
            Location::county("48001"),
            vec![date(1), date(3)],
            vec![10.0, 30.0],
        )];

        let residuals = residual_matrix(&sensors, &locations, &truth, &training_dates).unwrap();
        assert!(!residuals[[0, 0]].is_nan());
        assert!(residuals[[1, 0]].is_nan());
        assert!(!residuals[[2, 0]].is_nan());
    }

    #[test]
    fn sensor_for_unknown_location_is_fatal() {
        let locations = vec![Location::county("48001")];
        let training_dates = vec![date(1)];
        let truth = Array2::zeros((1, 1));
        let sensors = vec![sensor(Location::county("99999"), vec![date(1)], vec![0.0])];

        assert_matches!(
            residual_matrix(&sensors, &locations, &truth, &training_dates),
            Err(Error::DataError(_))
        );
    }

    #[test]
    fn estimator_sees_the_gaps() {
        struct NanCountingEstimator;
        impl CovarianceEstimator for NanCountingEstimator {
            fn estimate(
                &self,
                residuals: &Array2<f64>,
                _blend: BlendStrategy,
            ) -> Result<Array2<f64>> {
                let gaps = residuals.iter().filter(|v| v.is_nan()).count();
                assert_eq!(gaps, 1, "the missing day must arrive as NaN");
                Ok(Array2::eye(residuals.ncols()))
            }
        }

        let locations = vec![Location::county("48001")];
        let training_dates = vec![date(1), date(2), date(3)];
        let truth = Array2::from_shape_vec((3, 1), vec![10.0, 20.0, 30.0]).unwrap();
        let sensors = vec![sensor(
            Location::county("48001"),
            vec![date(1), date(3)],
            vec![10.0, 30.0],
        )];

        let noise = NoiseEstimator::new(&NanCountingEstimator, BlendStrategy::default());
        let covariance = noise
            .covariance(&sensors, &locations, &truth, &training_dates)
            .unwrap();
        assert_eq!(covariance.dim(), (1, 1));
    }

    #[test]
    fn wrong_covariance_shape_is_rejected() {
        struct WrongShapeEstimator;
        impl CovarianceEstimator for WrongShapeEstimator {
            fn estimate(
                &self,
                _residuals: &Array2<f64>,
                _blend: BlendStrategy,
            ) -> Result<Array2<f64>> {
                Ok(Array2::eye(3))
            }
        }

        let locations = vec![Location::county("48001")];
        let training_dates = vec![date(1)];
        let truth = Array2::zeros((1, 1));
        let sensors = vec![sensor(Location::county("48001"), vec![date(1)], vec![0.0])];

        let noise = NoiseEstimator::new(&WrongShapeEstimator, BlendStrategy::default());
        assert_matches!(
            noise.covariance(&sensors, &locations, &truth, &training_dates),
            Err(Error::DataError(_))
        );
    }
}
