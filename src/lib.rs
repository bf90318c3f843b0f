//! # Nowcast Rust
//! Main library file for the nowcasting engine
//! A sensor-fusion system estimating near-real-time epidemiological
//! indicator values across counties, metro areas and states.
//!
//! One run fits an ensemble of sensors (indicator regressions plus an
//! autoregression per location), expresses their geographic coverage over a
//! county basis, reduces that basis to full rank, estimates sensor noise
//! from historical residuals and fuses the current readings into point
//! estimates with uncertainty. External lookups and the expensive reduction
//! are memoized on disk between runs.

pub use crate::utils::error::{Error, Result};

pub mod cache;
pub mod client;
pub mod config;
pub mod fusion;
pub mod geo;
pub mod noise;
pub mod sensors;
pub mod statespace;
pub mod utils;

use chrono::NaiveDate;
use ndarray::{Array1, Array2};

use crate::cache::{CacheLocation, ResponseCache, StatespaceCache};
use crate::client::EpidataClient;
use crate::config::Config;
use crate::fusion::{readings, FusionAdapter, SensorFuser};
use crate::geo::{GeoMapper, Location};
use crate::noise::{CovarianceEstimator, NoiseEstimator};
use crate::sensors::{ArFitter, Indicator, SensorEnsembleBuilder};
use crate::statespace::{StatespaceAssembler, StatespaceReducer};

/// One nowcast request.
#[derive(Debug, Clone)]
pub struct NowcastInput {
    /// Training window, in order; truth rows correspond to these dates.
    pub training_dates: Vec<NaiveDate>,
    /// Dates to nowcast. Exactly one date per run is supported.
    pub nowcast_dates: Vec<NaiveDate>,
    /// Locations to nowcast, in truth column order.
    pub locations: Vec<Location>,
    /// Ground truth, time x location.
    pub truth: Array2<f64>,
    /// Indicators to query from the API.
    pub indicators: Vec<Indicator>,
}

/// Result of one nowcast run.
///
/// `locations` is the subset of requested locations that survived the
/// statespace reduction; estimates and stdevs are in that order.
#[derive(Debug, Clone)]
pub struct NowcastOutput {
    pub estimates: Array1<f64>,
    pub stdevs: Array1<f64>,
    pub locations: Vec<Location>,
}

/// Main engine that sequences one nowcast run end to end.
///
/// The statistical collaborators are supplied by the caller; the engine owns
/// the pipeline around them: geographic rollups, sensor assembly, caching,
/// noise estimation and the fusion boundary.
pub struct Nowcaster<'a> {
    config: Config,
    geo: GeoMapper,
    reducer: &'a dyn StatespaceReducer,
    ar_fitter: &'a dyn ArFitter,
    covariance: &'a dyn CovarianceEstimator,
    fuser: &'a dyn SensorFuser,
}

impl<'a> Nowcaster<'a> {
    /// Build an engine from configuration, loading the geographic reference
    /// tables from the configured paths.
    pub fn new(
        config: Config,
        reducer: &'a dyn StatespaceReducer,
        ar_fitter: &'a dyn ArFitter,
        covariance: &'a dyn CovarianceEstimator,
        fuser: &'a dyn SensorFuser,
    ) -> Result<Self> {
        let geo = GeoMapper::from_files(&config.geo.metro_table, &config.geo.state_table)?;
        Self::with_geo(config, geo, reducer, ar_fitter, covariance, fuser)
    }

    /// Build an engine from configuration and an already-built mapper.
    pub fn with_geo(
        config: Config,
        geo: GeoMapper,
        reducer: &'a dyn StatespaceReducer,
        ar_fitter: &'a dyn ArFitter,
        covariance: &'a dyn CovarianceEstimator,
        fuser: &'a dyn SensorFuser,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, geo, reducer, ar_fitter, covariance, fuser })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn geo(&self) -> &GeoMapper {
        &self.geo
    }

    /// Run one nowcast end to end.
    ///
    /// When response caching is enabled, `client` is wrapped in a
    /// [`ResponseCache`] scoped to this run; pending cache writes are
    /// flushed when the run ends, on success or failure.
    pub fn run(&self, client: &dyn EpidataClient, input: &NowcastInput) -> Result<NowcastOutput> {
        if input.nowcast_dates.len() != 1 {
            return Err(Error::UnsupportedRange(input.nowcast_dates.len()));
        }
        let nowcast_date = input.nowcast_dates[0];
        if input.training_dates.is_empty() {
            return Err(Error::DataError("training window is empty".to_string()));
        }
        if input.locations.is_empty() {
            return Err(Error::DataError("no locations requested".to_string()));
        }
        if input.truth.dim() != (input.training_dates.len(), input.locations.len()) {
            return Err(Error::DataError(format!(
                "truth matrix is {:?}, expected ({}, {})",
                input.truth.dim(),
                input.training_dates.len(),
                input.locations.len()
            )));
        }

        log::info!(
            "nowcasting {nowcast_date} for {} locations over a {}-day training window",
            input.locations.len(),
            input.training_dates.len()
        );

        if self.config.cache.enabled {
            let cached = ResponseCache::with_debounce(
                client,
                CacheLocation::new(
                    self.config.cache.dir.clone(),
                    self.config.cache.response_base.clone(),
                ),
                std::time::Duration::from_secs(self.config.cache.persist_debounce_secs),
            );
            self.run_with_client(&cached, input, nowcast_date)
        } else {
            self.run_with_client(client, input, nowcast_date)
        }
    }

    fn run_with_client(
        &self,
        client: &dyn EpidataClient,
        input: &NowcastInput,
        nowcast_date: NaiveDate,
    ) -> Result<NowcastOutput> {
        let builder = SensorEnsembleBuilder::new(client, self.ar_fitter, &self.config.sensor);
        let sensors = builder.build(
            &input.locations,
            &input.truth,
            &input.training_dates,
            nowcast_date,
            &input.indicators,
        )?;
        if sensors.is_empty() {
            return Err(Error::DataError(
                "no sensors could be built for any requested location".to_string(),
            ));
        }

        let statespace_cache = StatespaceCache::new(CacheLocation::new(
            self.config.cache.dir.clone(),
            self.config.cache.statespace_base.clone(),
        ));
        let assembler = StatespaceAssembler::new(&self.geo, self.reducer, &statespace_cache);
        let (statespace, output_locations) = assembler.assemble(&sensors, &input.locations)?;

        let noise = NoiseEstimator::new(self.covariance, self.config.fusion.blend);
        let covariance = noise.covariance(
            &sensors,
            &input.locations,
            &input.truth,
            &input.training_dates,
        )?;

        let adapter = FusionAdapter::new(self.fuser);
        let (estimates, stdevs) = adapter.fuse(&statespace, &covariance, &readings(&sensors))?;

        log::info!("nowcast complete: {} outputs", output_locations.len());
        Ok(NowcastOutput { estimates, stdevs, locations: output_locations })
    }
}
