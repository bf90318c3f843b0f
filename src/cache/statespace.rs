//! Memoization for the statespace reduction.
//!
//! The reduction is by far the most expensive step of a run (tens of minutes
//! for a large state), so its result is kept on disk keyed by the
//! sensor/location configuration. H, W and the output index are mutually
//! dependent; they are stored as one bincode unit under a single fingerprint
//! and re-validated on load so a mismatched combination can never enter the
//! pipeline.

use std::fs;
use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::cache::{fingerprint, CacheLocation};
use crate::statespace::{ReducedStatespace, StatespaceSignature};
use crate::Result;

/// On-disk form of one reduced statespace.
#[derive(Serialize, Deserialize)]
struct StoredUnit {
    h: Array2<f64>,
    w: Array2<f64>,
    output_index: Vec<usize>,
}

/// Durable memo of statespace reductions, one file per signature.
pub struct StatespaceCache {
    location: CacheLocation,
}

impl StatespaceCache {
    pub fn new(location: CacheLocation) -> Self {
        Self { location }
    }

    fn unit_path(&self, hash: &str) -> PathBuf {
        self.location.sibling(&format!("{hash}-hwi.bin"))
    }

    /// Cached reduction for this signature, if a coherent unit is on disk.
    ///
    /// Fail-open: an unreadable, unparsable or incoherent unit is a miss,
    /// never an error.
    pub fn load(&self, signature: &StatespaceSignature) -> Option<ReducedStatespace> {
        let hash = match fingerprint(signature) {
            Ok(hash) => hash,
            Err(e) => {
                log::warn!("cannot fingerprint statespace signature: {e}");
                return None;
            }
        };
        match self.read_unit(&hash) {
            Ok(unit) => Some(unit),
            Err(e) => {
                log::debug!("statespace cache miss for {hash}: {e}");
                None
            }
        }
    }

    fn read_unit(&self, hash: &str) -> Result<ReducedStatespace> {
        let bytes = fs::read(self.unit_path(hash))?;
        let stored: StoredUnit = bincode::deserialize(&bytes)?;
        ReducedStatespace::new(stored.h, stored.w, stored.output_index)
    }

    /// Write the unit unconditionally.
    ///
    /// Called at most once per run, right after the reduction itself, so
    /// there is nothing to debounce. A write failure costs the next run a
    /// recomputation; it never fails this one.
    pub fn save(&self, signature: &StatespaceSignature, unit: &ReducedStatespace) {
        if let Err(e) = self.write_unit(signature, unit) {
            log::warn!("failed to save statespace cache: {e}");
        }
    }

    fn write_unit(&self, signature: &StatespaceSignature, unit: &ReducedStatespace) -> Result<()> {
        let hash = fingerprint(signature)?;
        let path = self.unit_path(&hash);
        log::info!("saving statespace to {}", path.display());
        let stored = StoredUnit {
            h: unit.h().clone(),
            w: unit.w().clone(),
            output_index: unit.output_index().to_vec(),
        };
        self.location.ensure_dir()?;
        fs::write(path, bincode::serialize(&stored)?)?;
        Ok(())
    }
}
