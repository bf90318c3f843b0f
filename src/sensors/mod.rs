//! Sensor construction: turning indicator signals into fitted estimators.
//!
//! A sensor is one fitted estimator for one location: an affine regression of
//! ground truth against an external indicator signal, or an autoregression on
//! the location's own history. The [`SensorEnsembleBuilder`] assembles the
//! full ensemble for one nowcast date, skipping indicator/location pairs the
//! API has no data for.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::NaiveDate;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::client::{ApiResponse, CovidcastRequest, DateRange, EpidataClient};
use crate::config::SensorConfig;
use crate::geo::Location;
use crate::utils::dates;
use crate::{Error, Result};

/// Source and signal name used for autoregressive sensors.
pub const AR_SOURCE: &str = "ar";

/// One (source, signal) pair to query from the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Indicator {
    pub source: String,
    pub signal: String,
}

impl Indicator {
    pub fn new(source: impl Into<String>, signal: impl Into<String>) -> Self {
        Self { source: source.into(), signal: signal.into() }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.signal)
    }
}

/// A signal's observed history, sorted by date.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl SignalSeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// One fitted estimator for one location.
///
/// `fitted[k]` is the model's in-sample estimate for `dates[k]`; `estimate`
/// is its out-of-sample value for the nowcast date.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub source: String,
    pub signal: String,
    pub date: NaiveDate,
    pub location: Location,
    pub coefficients: Vec<f64>,
    pub fitted: Vec<f64>,
    pub dates: Vec<NaiveDate>,
    pub estimate: f64,
}

/// Output of an autoregressive fit, same shape as an indicator fit.
#[derive(Debug, Clone)]
pub struct ArFit {
    pub coefficients: Vec<f64>,
    pub fitted: Vec<f64>,
    pub dates: Vec<NaiveDate>,
    pub estimate: f64,
}

/// External autoregressive fitting routine.
pub trait ArFitter {
    fn fit(
        &self,
        dates: &[NaiveDate],
        values: &[f64],
        lag_order: usize,
        include_intercept: bool,
        l2_penalty: f64,
    ) -> Result<ArFit>;
}

/// Closed-form ordinary least squares for `y = intercept + slope * x`.
///
/// Returns `(intercept, slope)`. A degenerate design (fewer than two points,
/// or a constant signal) cannot be inverted and is an error.
pub fn fit_affine(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    if x.len() != y.len() {
        return Err(Error::DataError(format!(
            "affine fit inputs differ in length: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    let n = x.len();
    if n < 2 {
        return Err(Error::DataError(format!(
            "affine fit needs at least two observations, got {n}"
        )));
    }
    let n = n as f64;
    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xx: f64 = x.iter().map(|v| v * v).sum();
    let sum_xy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    let det = n * sum_xx - sum_x * sum_x;
    if det.abs() < f64::EPSILON {
        return Err(Error::DataError(
            "affine fit is degenerate: signal has no variance".to_string(),
        ));
    }
    let slope = (n * sum_xy - sum_x * sum_y) / det;
    let intercept = (sum_y - slope * sum_x) / n;
    Ok((intercept, slope))
}

/// Builds the sensor ensemble for one nowcast date.
pub struct SensorEnsembleBuilder<'a> {
    client: &'a dyn EpidataClient,
    ar_fitter: &'a dyn ArFitter,
    config: &'a SensorConfig,
}

impl<'a> SensorEnsembleBuilder<'a> {
    pub fn new(
        client: &'a dyn EpidataClient,
        ar_fitter: &'a dyn ArFitter,
        config: &'a SensorConfig,
    ) -> Self {
        Self { client, ar_fitter, config }
    }

    /// Fetch a signal's history over `range` at `location`.
    ///
    /// `Ok(None)` means the API answered but has no data for this query,
    /// which is an expected condition; transport failures are errors.
    pub fn fetch_signal(
        &self,
        indicator: &Indicator,
        range: DateRange,
        location: &Location,
    ) -> Result<Option<SignalSeries>> {
        let request =
            CovidcastRequest::new(&indicator.source, &indicator.signal, range, location);
        let response = self.client.fetch(&request)?;
        if !response.is_success() {
            log::debug!(
                "api returned {} for {indicator} at {location}: {}",
                response.result,
                response.message
            );
            return Ok(None);
        }
        Self::series_from(&response).map(Some)
    }

    fn series_from(response: &ApiResponse) -> Result<SignalSeries> {
        let mut points = response
            .epidata
            .iter()
            .map(|obs| Ok((dates::from_yyyymmdd(obs.time_value)?, obs.value)))
            .collect::<Result<Vec<(NaiveDate, f64)>>>()?;
        points.sort_by_key(|(date, _)| *date);
        Ok(SignalSeries {
            dates: points.iter().map(|(date, _)| *date).collect(),
            values: points.iter().map(|(_, value)| *value).collect(),
        })
    }

    /// Cheap pre-check: does the API have this signal on `date` at `location`?
    pub fn is_available(
        &self,
        indicator: &Indicator,
        date: NaiveDate,
        location: &Location,
    ) -> Result<bool> {
        Ok(self
            .fetch_signal(indicator, DateRange::single(date), location)?
            .is_some())
    }

    /// Match ground truth to the dates the signal actually has.
    ///
    /// A signal missing a few days is routine; the truth series is subset by
    /// explicit date lookup to the signal's dates. A shortfall at or beyond
    /// the configured threshold, or a signal longer than truth, indicates an
    /// upstream problem that must be investigated, not papered over.
    fn align_truth(
        &self,
        indicator: &Indicator,
        location: &Location,
        truth: ArrayView1<f64>,
        training_dates: &[NaiveDate],
        signal: &SignalSeries,
    ) -> Result<Vec<f64>> {
        let truth_len = truth.len();
        let signal_len = signal.len();
        if signal_len == truth_len {
            return Ok(truth.to_vec());
        }
        let small_gap =
            signal_len < truth_len && truth_len - signal_len < self.config.max_missing_days;
        if !small_gap {
            return Err(Error::ShapeMismatch {
                data_source: indicator.source.clone(),
                signal: indicator.signal.clone(),
                location: location.to_string(),
                truth_len,
                signal_len,
            });
        }

        let date_index: HashMap<NaiveDate, usize> = training_dates
            .iter()
            .enumerate()
            .map(|(i, &date)| (date, i))
            .collect();
        let mut subset = Vec::with_capacity(signal_len);
        for date in &signal.dates {
            let i = date_index.get(date).ok_or_else(|| {
                Error::DataError(format!(
                    "signal date {date} for {indicator} at {location} is outside the training window"
                ))
            })?;
            subset.push(truth[*i]);
        }

        let covered: HashSet<&NaiveDate> = signal.dates.iter().collect();
        let missing: Vec<&NaiveDate> =
            training_dates.iter().filter(|date| !covered.contains(date)).collect();
        if let Some(first) = missing.first() {
            log::info!(
                "{indicator} at {location}: signal missing {} days starting {first}, using truth subset of size {}",
                missing.len(),
                subset.len()
            );
        }
        Ok(subset)
    }

    /// Fit one indicator sensor: regression over the training window, then
    /// evaluation on the nowcast date's signal value.
    ///
    /// Callers are expected to have passed [`Self::is_available`] first; an
    /// unavailable signal here is a contract violation and fails the run.
    pub fn fit_sensor(
        &self,
        indicator: &Indicator,
        training: DateRange,
        nowcast_date: NaiveDate,
        location: &Location,
        truth: ArrayView1<f64>,
        training_dates: &[NaiveDate],
    ) -> Result<Sensor> {
        let unavailable = || Error::SignalUnavailable {
            data_source: indicator.source.clone(),
            signal: indicator.signal.clone(),
            location: location.to_string(),
        };

        let signal = self
            .fetch_signal(indicator, training, location)?
            .ok_or_else(unavailable)?;
        let truth_aligned =
            self.align_truth(indicator, location, truth, training_dates, &signal)?;
        let (intercept, slope) = fit_affine(&signal.values, &truth_aligned)
            .map_err(|e| Error::DataError(format!("fitting {indicator} at {location}: {e}")))?;
        let fitted = signal.values.iter().map(|v| intercept + slope * v).collect();

        let current = self
            .fetch_signal(indicator, DateRange::single(nowcast_date), location)?
            .ok_or_else(unavailable)?;
        let reading = current.values.first().copied().ok_or_else(|| {
            Error::DataError(format!(
                "empty response for {indicator} at {location} on {nowcast_date}"
            ))
        })?;

        Ok(Sensor {
            source: indicator.source.clone(),
            signal: indicator.signal.clone(),
            date: nowcast_date,
            location: location.clone(),
            coefficients: vec![intercept, slope],
            fitted,
            dates: signal.dates,
            estimate: intercept + slope * reading,
        })
    }

    /// Build the full ensemble: every available (indicator, location) sensor
    /// followed by one autoregressive sensor per location.
    ///
    /// `truth` is time x location, with columns in `locations` order.
    pub fn build(
        &self,
        locations: &[Location],
        truth: &Array2<f64>,
        training_dates: &[NaiveDate],
        nowcast_date: NaiveDate,
        indicators: &[Indicator],
    ) -> Result<Vec<Sensor>> {
        let (first, last) = match (training_dates.first(), training_dates.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Err(Error::DataError("training window is empty".to_string())),
        };
        let training = DateRange::new(first, last);

        let mut sensors = Vec::new();
        for (idx, location) in locations.iter().enumerate() {
            if idx % 10 == 0 {
                log::info!(
                    "fitting sensors for location {}/{}: {location}",
                    idx,
                    locations.len()
                );
            }
            for indicator in indicators {
                if !self.is_available(indicator, nowcast_date, location)? {
                    log::info!(
                        "signal unavailable: {indicator} at {location} on {nowcast_date}"
                    );
                    continue;
                }
                sensors.push(self.fit_sensor(
                    indicator,
                    training,
                    nowcast_date,
                    location,
                    truth.column(idx),
                    training_dates,
                )?);
            }
        }
        log_inventory("indicator", &sensors, locations.len());

        let indicator_count = sensors.len();
        for (idx, location) in locations.iter().enumerate() {
            let values = truth.column(idx).to_vec();
            let fit = self.ar_fitter.fit(
                training_dates,
                &values,
                self.config.ar_lag_order,
                self.config.ar_include_intercept,
                self.config.ar_l2_penalty,
            )?;
            if fit.fitted.len() != fit.dates.len() {
                return Err(Error::DataError(format!(
                    "autoregressive fit for {location} returned {} fitted values over {} dates",
                    fit.fitted.len(),
                    fit.dates.len()
                )));
            }
            sensors.push(Sensor {
                source: AR_SOURCE.to_string(),
                signal: AR_SOURCE.to_string(),
                date: nowcast_date,
                location: location.clone(),
                coefficients: fit.coefficients,
                fitted: fit.fitted,
                dates: fit.dates,
                estimate: fit.estimate,
            });
        }
        log_inventory("autoregressive", &sensors[indicator_count..], locations.len());

        log::info!("total sensors: {}", sensors.len());
        Ok(sensors)
    }
}

fn log_inventory(label: &str, sensors: &[Sensor], total_locations: usize) {
    let covered: BTreeSet<&Location> = sensors.iter().map(|s| &s.location).collect();
    log::info!(
        "{} {label} sensors cover {}/{total_locations} locations",
        sensors.len(),
        covered.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Datelike;
    use ndarray::Array1;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 4, d).unwrap()
    }

    fn days(from: u32, to: u32) -> Vec<NaiveDate> {
        (from..=to).map(date).collect()
    }

    fn parse_range(wire: &str) -> (NaiveDate, NaiveDate) {
        match wire.split_once('-') {
            Some((a, b)) => (
                dates::from_yyyymmdd(a.parse().unwrap()).unwrap(),
                dates::from_yyyymmdd(b.parse().unwrap()).unwrap(),
            ),
            None => {
                let d = dates::from_yyyymmdd(wire.parse().unwrap()).unwrap();
                (d, d)
            }
        }
    }

    fn linear_observations(first: NaiveDate, last: NaiveDate) -> Vec<crate::client::Observation> {
        first
            .iter_days()
            .take_while(|d| *d <= last)
            .map(|d| crate::client::Observation {
                time_value: dates::to_yyyymmdd(d),
                value: 2.0 * d.day() as f64,
            })
            .collect()
    }

    /// Serves value = 2 * day-of-month for every requested date.
    struct LinearClient;

    impl EpidataClient for LinearClient {
        fn fetch(&self, request: &CovidcastRequest) -> Result<ApiResponse> {
            let (first, last) = parse_range(&request.time_values);
            Ok(ApiResponse {
                result: 1,
                message: "success".into(),
                epidata: linear_observations(first, last),
            })
        }
    }

    /// Serves only the first `keep` days of any multi-day range.
    struct GappyClient {
        keep: usize,
    }

    impl EpidataClient for GappyClient {
        fn fetch(&self, request: &CovidcastRequest) -> Result<ApiResponse> {
            let (first, last) = parse_range(&request.time_values);
            let mut epidata = linear_observations(first, last);
            if first != last {
                epidata.truncate(self.keep);
            }
            Ok(ApiResponse { result: 1, message: "success".into(), epidata })
        }
    }

    /// Answers "no results" for the signal named `missing`.
    struct SelectiveClient;

    impl EpidataClient for SelectiveClient {
        fn fetch(&self, request: &CovidcastRequest) -> Result<ApiResponse> {
            if request.signal == "missing" {
                return Ok(ApiResponse {
                    result: -2,
                    message: "no results".into(),
                    epidata: vec![],
                });
            }
            LinearClient.fetch(request)
        }
    }

    struct StubArFitter;

    impl ArFitter for StubArFitter {
        fn fit(
            &self,
            dates: &[NaiveDate],
            values: &[f64],
            _lag_order: usize,
            _include_intercept: bool,
            _l2_penalty: f64,
        ) -> Result<ArFit> {
            Ok(ArFit {
                coefficients: vec![1.0],
                fitted: values.to_vec(),
                dates: dates.to_vec(),
                estimate: values.last().copied().unwrap_or_default(),
            })
        }
    }

    fn builder<'a>(
        client: &'a dyn EpidataClient,
        ar: &'a dyn ArFitter,
        config: &'a SensorConfig,
    ) -> SensorEnsembleBuilder<'a> {
        SensorEnsembleBuilder::new(client, ar, config)
    }

    #[test]
    fn fit_affine_recovers_a_perfect_line() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|v| 3.0 + 2.0 * v).collect();
        let (intercept, slope) = fit_affine(&x, &y).unwrap();
        assert!((intercept - 3.0).abs() < 1e-9);
        assert!((slope - 2.0).abs() < 1e-9);
    }

    #[test]
    fn fit_affine_rejects_degenerate_input() {
        assert_matches!(fit_affine(&[1.0], &[2.0]), Err(Error::DataError(_)));
        assert_matches!(
            fit_affine(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]),
            Err(Error::DataError(_))
        );
        assert_matches!(fit_affine(&[1.0, 2.0], &[1.0]), Err(Error::DataError(_)));
    }

    #[test]
    fn linear_signal_recovers_the_line() {
        let config = SensorConfig::default();
        let builder = builder(&LinearClient, &StubArFitter, &config);
        let training_dates = days(1, 10);
        let truth = Array1::from_iter((1..=10).map(|d| 2.0 * d as f64));

        let sensor = builder
            .fit_sensor(
                &Indicator::new("src", "sig"),
                DateRange::new(date(1), date(10)),
                date(11),
                &Location::county("48001"),
                truth.view(),
                &training_dates,
            )
            .unwrap();

        // truth equals signal, so the fit is the identity line
        assert!((sensor.coefficients[0]).abs() < 1e-6);
        assert!((sensor.coefficients[1] - 1.0).abs() < 1e-6);
        assert!((sensor.estimate - 22.0).abs() < 1e-6);
        assert_eq!(sensor.dates, training_dates);
        for (fitted, expected) in sensor.fitted.iter().zip(truth.iter()) {
            assert!((fitted - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn small_signal_gap_subsets_truth() {
        // 20 truth days, 8 signal days: shortfall 12 is under the threshold
        let config = SensorConfig::default();
        let client = GappyClient { keep: 8 };
        let builder = builder(&client, &StubArFitter, &config);
        let training_dates = days(1, 20);
        let truth = Array1::from_iter((1..=20).map(|d| 2.0 * d as f64));

        let sensor = builder
            .fit_sensor(
                &Indicator::new("src", "sig"),
                DateRange::new(date(1), date(20)),
                date(21),
                &Location::county("48001"),
                truth.view(),
                &training_dates,
            )
            .unwrap();

        assert_eq!(sensor.dates.len(), 8);
        assert_eq!(sensor.fitted.len(), 8);
        assert!((sensor.coefficients[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn large_signal_gap_is_a_shape_mismatch() {
        // shortfall 15 crosses the threshold
        let config = SensorConfig::default();
        let client = GappyClient { keep: 5 };
        let builder = builder(&client, &StubArFitter, &config);
        let training_dates = days(1, 20);
        let truth = Array1::from_iter((1..=20).map(|d| 2.0 * d as f64));

        let result = builder.fit_sensor(
            &Indicator::new("src", "sig"),
            DateRange::new(date(1), date(20)),
            date(21),
            &Location::county("48001"),
            truth.view(),
            &training_dates,
        );
        assert_matches!(
            result,
            Err(Error::ShapeMismatch { truth_len: 20, signal_len: 5, .. })
        );
    }

    #[test]
    fn signal_longer_than_truth_is_a_shape_mismatch() {
        let config = SensorConfig::default();
        let builder = builder(&LinearClient, &StubArFitter, &config);
        let training_dates = days(1, 5);
        let truth = Array1::from_iter((1..=5).map(|d| 2.0 * d as f64));

        // request ten days of signal against five days of truth
        let result = builder.fit_sensor(
            &Indicator::new("src", "sig"),
            DateRange::new(date(1), date(10)),
            date(11),
            &Location::county("48001"),
            truth.view(),
            &training_dates,
        );
        assert_matches!(
            result,
            Err(Error::ShapeMismatch { truth_len: 5, signal_len: 10, .. })
        );
    }

    #[test]
    fn build_skips_unavailable_indicators() {
        let config = SensorConfig::default();
        let builder = builder(&SelectiveClient, &StubArFitter, &config);
        let locations = vec![Location::county("48001"), Location::county("48003")];
        let training_dates = days(1, 10);
        let truth = Array2::from_shape_fn((10, 2), |(i, _)| 2.0 * (i + 1) as f64);
        let indicators =
            vec![Indicator::new("src", "sig"), Indicator::new("src", "missing")];

        let sensors = builder
            .build(&locations, &truth, &training_dates, date(11), &indicators)
            .unwrap();

        // one available indicator per location, plus one AR sensor each
        assert_eq!(sensors.len(), 4);
        let indicator_sensors: Vec<_> =
            sensors.iter().filter(|s| s.source != AR_SOURCE).collect();
        assert_eq!(indicator_sensors.len(), 2);
        assert!(indicator_sensors.iter().all(|s| s.signal == "sig"));
    }

    #[test]
    fn build_appends_one_ar_sensor_per_location() {
        let config = SensorConfig::default();
        let builder = builder(&LinearClient, &StubArFitter, &config);
        let locations = vec![Location::county("48001"), Location::state("tx")];
        let training_dates = days(1, 10);
        let truth = Array2::from_shape_fn((10, 2), |(i, _)| 2.0 * (i + 1) as f64);

        let sensors = builder
            .build(
                &locations,
                &truth,
                &training_dates,
                date(11),
                &[Indicator::new("src", "sig")],
            )
            .unwrap();

        let ar_sensors: Vec<_> = sensors.iter().filter(|s| s.source == AR_SOURCE).collect();
        assert_eq!(ar_sensors.len(), locations.len());
        // AR sensors come after the indicator sensors, one per location in order
        assert_eq!(sensors[2].source, AR_SOURCE);
        assert_eq!(sensors[2].location, locations[0]);
        assert_eq!(sensors[3].location, locations[1]);
        assert_eq!(sensors[3].estimate, 20.0);
    }

    #[test]
    fn empty_training_window_is_rejected() {
        let config = SensorConfig::default();
        let builder = builder(&LinearClient, &StubArFitter, &config);
        let result = builder.build(
            &[Location::county("48001")],
            &Array2::zeros((0, 1)),
            &[],
            date(11),
            &[],
        );
        assert_matches!(result, Err(Error::DataError(_)));
    }
}
