//! Call boundary into the external fuse/extract routines.

use ndarray::{Array1, Array2};

use crate::sensors::Sensor;
use crate::statespace::ReducedStatespace;
use crate::{Error, Result};

/// External fusion mathematics.
///
/// `fuse` combines sensor readings `z` with noise covariance `R` under
/// coverage `H` into a latent estimate and its covariance; `extract`
/// projects that estimate through `W` onto the output basis.
pub trait SensorFuser {
    fn fuse(
        &self,
        z: &Array1<f64>,
        r: &Array2<f64>,
        h: &Array2<f64>,
    ) -> Result<(Array1<f64>, Array2<f64>)>;

    fn extract(
        &self,
        x: &Array1<f64>,
        p: &Array2<f64>,
        w: &Array2<f64>,
    ) -> Result<(Array1<f64>, Array2<f64>)>;
}

/// The reading vector: one current estimate per sensor, in ensemble order.
pub fn readings(sensors: &[Sensor]) -> Array1<f64> {
    sensors.iter().map(|s| s.estimate).collect()
}

/// Thin adapter turning the external routines' output into point estimates
/// with standard deviations.
pub struct FusionAdapter<'a> {
    fuser: &'a dyn SensorFuser,
}

impl<'a> FusionAdapter<'a> {
    pub fn new(fuser: &'a dyn SensorFuser) -> Self {
        Self { fuser }
    }

    /// Fuse readings and project onto the output basis.
    ///
    /// Returns the point estimates and, per output, the square root of the
    /// projected covariance diagonal.
    pub fn fuse(
        &self,
        statespace: &ReducedStatespace,
        noise: &Array2<f64>,
        readings: &Array1<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let (x, p) = self.fuser.fuse(readings, noise, statespace.h())?;
        let (y, s) = self.fuser.extract(&x, &p, statespace.w())?;
        if s.nrows() != y.len() || s.ncols() != y.len() {
            return Err(Error::DataError(format!(
                "extracted covariance is {}x{} for {} outputs",
                s.nrows(),
                s.ncols(),
                y.len()
            )));
        }
        let stdev = s.diag().mapv(f64::sqrt);
        Ok((y, stdev))
    }
}
