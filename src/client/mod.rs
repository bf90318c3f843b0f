//! Epidata API client and its wire types.
//!
//! The pipeline only ever issues one request shape: a covidcast query for one
//! (source, signal) pair at one location over a date range. Everything that
//! needs to fetch goes through the [`EpidataClient`] trait, so the response
//! cache can stand in for the HTTP client transparently.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::geo::Location;
use crate::utils::dates;
use crate::Result;

/// An inclusive range of dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateRange {
    pub fn new(first: NaiveDate, last: NaiveDate) -> Self {
        Self { first, last }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self { first: date, last: date }
    }

    /// Wire encoding: `yyyymmdd` for a single day, `yyyymmdd-yyyymmdd` otherwise.
    pub fn wire(&self) -> String {
        if self.first == self.last {
            dates::to_yyyymmdd(self.first).to_string()
        } else {
            format!(
                "{}-{}",
                dates::to_yyyymmdd(self.first),
                dates::to_yyyymmdd(self.last)
            )
        }
    }
}

/// Query parameters of one covidcast request.
///
/// Doubles as the cache key: two requests for the same logical query always
/// produce the same serialized form, and therefore the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CovidcastRequest {
    pub data_source: String,
    pub signal: String,
    pub time_type: String,
    pub geo_type: String,
    pub time_values: String,
    pub geo_value: String,
}

impl CovidcastRequest {
    pub fn new(source: &str, signal: &str, range: DateRange, location: &Location) -> Self {
        Self {
            data_source: source.to_string(),
            signal: signal.to_string(),
            time_type: "day".to_string(),
            geo_type: location.kind.as_str().to_string(),
            time_values: range.wire(),
            geo_value: location.id.clone(),
        }
    }
}

/// One observed (date, value) data point from the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub time_value: u32,
    pub value: f64,
}

/// Envelope returned by the Epidata API.
///
/// `result == 1` means success; any other code means the queried signal is
/// not available for the requested location and dates. Failure envelopes are
/// still well-formed responses and are cached like successes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub result: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub epidata: Vec<Observation>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.result == 1
    }
}

/// Anything that can answer a covidcast query.
///
/// The orchestrator wires the ensemble builder to a [`crate::cache::ResponseCache`]
/// wrapping an [`HttpEpidataClient`]; tests substitute stubs.
pub trait EpidataClient {
    fn fetch(&self, request: &CovidcastRequest) -> Result<ApiResponse>;
}

/// Blocking HTTP client for the Epidata covidcast endpoint.
pub struct HttpEpidataClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl HttpEpidataClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { http, base_url: config.base_url.clone() })
    }
}

impl EpidataClient for HttpEpidataClient {
    fn fetch(&self, request: &CovidcastRequest) -> Result<ApiResponse> {
        log::debug!(
            "fetch {}/{} {} {} {}",
            request.data_source,
            request.signal,
            request.time_values,
            request.geo_type,
            request.geo_value
        );
        let response = self
            .http
            .get(&self.base_url)
            .query(request)
            .send()?
            .error_for_status()?;
        Ok(response.json()?)
    }
}
