//! Coverage and wishlist matrices over the atomic basis, and their reduction
//! to a full-rank latent statespace.
//!
//! H0 is an inventory of every sensor's geographic coverage; W0 is the
//! wishlist of locations the caller wants nowcasts for. Both are expressed
//! over the county basis and usually rank deficient. The external reduction
//! routine rewrites them over a latent basis of county combinations that is
//! full rank, and reports which wishlist rows survive.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::cache::StatespaceCache;
use crate::geo::{GeoMapper, Location};
use crate::sensors::Sensor;
use crate::{Error, Result};

/// Cache key for one reduction: the multiset of sensor locations plus the
/// full output wishlist, both in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatespaceSignature {
    h: Vec<Location>,
    w: Vec<Location>,
}

impl StatespaceSignature {
    pub fn new(sensors: &[Sensor], locations: &[Location]) -> Self {
        Self::from_parts(
            sensors.iter().map(|s| s.location.clone()).collect(),
            locations.to_vec(),
        )
    }

    pub fn from_parts(sensor_locations: Vec<Location>, output_locations: Vec<Location>) -> Self {
        Self { h: sensor_locations, w: output_locations }
    }
}

/// A reduced (H, W, output index) triple sharing one latent column basis.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedStatespace {
    h: Array2<f64>,
    w: Array2<f64>,
    output_index: Vec<usize>,
}

impl ReducedStatespace {
    /// The three parts are mutually dependent; reject combinations that
    /// cannot have come from a single reduction.
    pub fn new(h: Array2<f64>, w: Array2<f64>, output_index: Vec<usize>) -> Result<Self> {
        if h.ncols() != w.ncols() {
            return Err(Error::DataError(format!(
                "reduced H and W column counts differ: {} vs {}",
                h.ncols(),
                w.ncols()
            )));
        }
        if w.nrows() != output_index.len() {
            return Err(Error::DataError(format!(
                "output index has {} entries for {} reduced wishlist rows",
                output_index.len(),
                w.nrows()
            )));
        }
        Ok(Self { h, w, output_index })
    }

    pub fn h(&self) -> &Array2<f64> {
        &self.h
    }

    pub fn w(&self) -> &Array2<f64> {
        &self.w
    }

    /// Original wishlist rows that survived the reduction, in order.
    pub fn output_index(&self) -> &[usize] {
        &self.output_index
    }
}

/// External statespace reduction routine.
pub trait StatespaceReducer {
    fn reduce(&self, coverage: &Array2<f64>, wishlist: &Array2<f64>) -> Result<ReducedStatespace>;
}

/// Builds H0/W0 and obtains the reduced statespace, via the cache when the
/// same sensor/location configuration has been reduced before.
pub struct StatespaceAssembler<'a> {
    geo: &'a GeoMapper,
    reducer: &'a dyn StatespaceReducer,
    cache: &'a StatespaceCache,
}

impl<'a> StatespaceAssembler<'a> {
    pub fn new(
        geo: &'a GeoMapper,
        reducer: &'a dyn StatespaceReducer,
        cache: &'a StatespaceCache,
    ) -> Self {
        Self { geo, reducer, cache }
    }

    fn rollup_matrix<'l, I>(&self, locations: I, rows: usize) -> Result<Array2<f64>>
    where
        I: IntoIterator<Item = &'l Location>,
    {
        let mut matrix = Array2::zeros((rows, self.geo.basis().len()));
        for (i, location) in locations.into_iter().enumerate() {
            for j in self.geo.columns(location)? {
                matrix[[i, j]] = 1.0;
            }
        }
        Ok(matrix)
    }

    /// H0: rows for sensors, columns for counties.
    pub fn coverage_matrix(&self, sensors: &[Sensor]) -> Result<Array2<f64>> {
        self.rollup_matrix(sensors.iter().map(|s| &s.location), sensors.len())
    }

    /// W0: rows for requested locations, columns for counties.
    pub fn wishlist_matrix(&self, locations: &[Location]) -> Result<Array2<f64>> {
        self.rollup_matrix(locations, locations.len())
    }

    /// Reduce the statespace for this run, returning the reduced triple and
    /// the output locations actually reachable, in wishlist order.
    pub fn assemble(
        &self,
        sensors: &[Sensor],
        locations: &[Location],
    ) -> Result<(ReducedStatespace, Vec<Location>)> {
        let coverage = self.coverage_matrix(sensors)?;
        let wishlist = self.wishlist_matrix(locations)?;
        log::info!(
            "coalescing statespace: {} sensors, {} locations, {} atoms",
            coverage.nrows(),
            wishlist.nrows(),
            self.geo.basis().len()
        );

        let signature = StatespaceSignature::new(sensors, locations);
        let reduced = match self.cache.load(&signature) {
            Some(unit) => {
                log::info!("loaded statespace from cache");
                unit
            }
            None => {
                log::info!("computing statespace reduction");
                let unit = self.reducer.reduce(&coverage, &wishlist)?;
                self.cache.save(&signature, &unit);
                unit
            }
        };
        log::info!("H: {:?} -> {:?}", coverage.dim(), reduced.h().dim());
        log::info!("W: {:?} -> {:?}", wishlist.dim(), reduced.w().dim());

        let outputs = reduced
            .output_index()
            .iter()
            .map(|&i| {
                locations.get(i).cloned().ok_or_else(|| {
                    Error::DataError(format!(
                        "reduction output index {i} is out of range for {} locations",
                        locations.len()
                    ))
                })
            })
            .collect::<Result<Vec<Location>>>()?;
        Ok((reduced, outputs))
    }
}
