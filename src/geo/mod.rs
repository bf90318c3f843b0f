//! Geographic locations and county-level rollups.
//!
//! Every location a sensor can cover (county, metro area or state) is
//! expressed as a linear combination of an "atomic" basis: the canonical
//! sorted list of real counties. The [`GeoMapper`] owns that basis plus the
//! rollup tables mapping each metro/state identifier to its constituent
//! counties, both built once per run from static CSV reference tables.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// County identifiers ending in this suffix denote a whole-state aggregate,
/// not a real county, and are excluded from the atomic basis.
pub const STATE_AGGREGATE_SUFFIX: &str = "000";

/// Granularity of a geographic location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoKind {
    County,
    #[serde(rename = "msa")]
    Metro,
    State,
}

impl GeoKind {
    /// The Epidata wire string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoKind::County => "county",
            GeoKind::Metro => "msa",
            GeoKind::State => "state",
        }
    }
}

impl fmt::Display for GeoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeoKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "county" => Ok(GeoKind::County),
            "msa" | "metro" => Ok(GeoKind::Metro),
            "state" => Ok(GeoKind::State),
            other => Err(Error::UnknownGeoKind(other.to_string())),
        }
    }
}

/// A geographic location: an opaque identifier plus its granularity.
///
/// Identifiers are strings, never numbers; FIPS codes have leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub kind: GeoKind,
}

impl Location {
    pub fn new(id: impl Into<String>, kind: GeoKind) -> Self {
        Self { id: id.into(), kind }
    }

    /// Convenience constructor for a county location.
    pub fn county(id: impl Into<String>) -> Self {
        Self::new(id, GeoKind::County)
    }

    /// Convenience constructor for a metro-area location.
    pub fn metro(id: impl Into<String>) -> Self {
        Self::new(id, GeoKind::Metro)
    }

    /// Convenience constructor for a state location.
    pub fn state(id: impl Into<String>) -> Self {
        Self::new(id, GeoKind::State)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.kind)
    }
}

// Locations are ordered by identifier, then kind for a total order.
impl Ord for Location {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.kind.as_str().cmp(other.kind.as_str()))
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The canonical sorted list of real counties, with a reverse index.
///
/// Matrix column indices are derived from position in this sequence, so the
/// order must be stable: lexicographic, deduplicated.
#[derive(Debug, Clone)]
pub struct AtomicBasis {
    atoms: Vec<String>,
    index: HashMap<String, usize>,
}

impl AtomicBasis {
    pub fn new(mut atoms: Vec<String>) -> Self {
        atoms.sort();
        atoms.dedup();
        let index = atoms
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self { atoms, index }
    }

    /// Number of atoms (matrix columns).
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Column index of a county identifier, if it is part of the basis.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The atoms in canonical order.
    pub fn atoms(&self) -> &[String] {
        &self.atoms
    }
}

/// Group a reference table by one column, collecting another column's values.
///
/// Columns are resolved by header name, so the reference tables can carry
/// extra columns in any order.
pub fn build_rollup<R: Read>(
    reader: &mut csv::Reader<R>,
    group_column: &str,
    member_column: &str,
) -> Result<HashMap<String, Vec<String>>> {
    let headers = reader.headers()?.clone();
    let group_idx = headers
        .iter()
        .position(|h| h == group_column)
        .ok_or_else(|| Error::ConfigError(format!("reference table missing column {group_column}")))?;
    let member_idx = headers
        .iter()
        .position(|h| h == member_column)
        .ok_or_else(|| Error::ConfigError(format!("reference table missing column {member_column}")))?;

    let mut rollup: HashMap<String, Vec<String>> = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let group = record.get(group_idx).ok_or_else(|| {
            Error::ConfigError(format!("reference table row missing {group_column} value"))
        })?;
        let member = record.get(member_idx).ok_or_else(|| {
            Error::ConfigError(format!("reference table row missing {member_column} value"))
        })?;
        rollup
            .entry(group.to_string())
            .or_default()
            .push(member.to_string());
    }
    Ok(rollup)
}

/// Drop whole-state aggregate identifiers and sort what remains.
fn real_counties_sorted(members: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut counties: Vec<String> = members
        .into_iter()
        .filter(|id| !id.ends_with(STATE_AGGREGATE_SUFFIX))
        .collect();
    counties.sort();
    counties
}

/// Lookup tables mapping non-atomic locations to their constituent counties.
#[derive(Debug, Clone)]
pub struct GeoMapper {
    metro: HashMap<String, Vec<String>>,
    state: HashMap<String, Vec<String>>,
    basis: AtomicBasis,
}

impl GeoMapper {
    /// Build the rollup tables from the two CSV reference files.
    pub fn from_files(metro_table: &Path, state_table: &Path) -> Result<Self> {
        let metro = File::open(metro_table).map_err(|e| {
            Error::ConfigError(format!("cannot open {}: {e}", metro_table.display()))
        })?;
        let state = File::open(state_table).map_err(|e| {
            Error::ConfigError(format!("cannot open {}: {e}", state_table.display()))
        })?;
        Self::from_readers(metro, state)
    }

    /// Build the rollup tables from raw CSV content.
    pub fn from_readers<M: Read, S: Read>(metro_table: M, state_table: S) -> Result<Self> {
        let mut metro_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(metro_table);
        let metro = build_rollup(&mut metro_reader, "metro_id", "county_fips")?;

        let mut state_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(state_table);
        let state_raw = build_rollup(&mut state_reader, "state_id", "county_fips")?;

        // The atomic basis is every real county in the state table.
        let basis = AtomicBasis::new(real_counties_sorted(
            state_raw.values().flatten().cloned(),
        ));
        let state = state_raw
            .into_iter()
            .map(|(state_id, members)| (state_id, real_counties_sorted(members)))
            .collect();

        let mapper = Self { metro, state, basis };
        log::debug!(
            "geo rollups ready: {} metro areas, {} states, {} atoms",
            mapper.metro.len(),
            mapper.state.len(),
            mapper.basis.len()
        );
        Ok(mapper)
    }

    pub fn basis(&self) -> &AtomicBasis {
        &self.basis
    }

    /// Constituent county identifiers of a location.
    ///
    /// A county resolves to itself; metro and state identifiers resolve to
    /// their precomputed member lists. An identifier with no rollup entry is
    /// a configuration fault, not a skippable condition.
    pub fn resolve(&self, location: &Location) -> Result<Vec<String>> {
        match location.kind {
            GeoKind::County => Ok(vec![location.id.clone()]),
            GeoKind::Metro => self.metro.get(&location.id).cloned().ok_or_else(|| {
                Error::UnknownLocation {
                    id: location.id.clone(),
                    kind: location.kind,
                }
            }),
            GeoKind::State => self.state.get(&location.id).cloned().ok_or_else(|| {
                Error::UnknownLocation {
                    id: location.id.clone(),
                    kind: location.kind,
                }
            }),
        }
    }

    /// Basis column indices covered by a location.
    ///
    /// A constituent county absent from the atomic basis means the reference
    /// tables disagree with each other; that is fatal.
    pub fn columns(&self, location: &Location) -> Result<Vec<usize>> {
        let members = self.resolve(location)?;
        members
            .iter()
            .map(|id| {
                self.basis.position(id).ok_or_else(|| {
                    Error::ConfigError(format!(
                        "county {id} (via {location}) is not in the atomic basis"
                    ))
                })
            })
            .collect()
    }
}
