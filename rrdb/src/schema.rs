//! Definition types for rrdb databases.
//!
//! An [`RrdDef`] fixes everything about a database's layout: the primary
//! step, the datasources ([`DsDef`]) and the archives ([`ArcDef`]). It is
//! consumed once by [`RrdDb::create`](crate::RrdDb::create) and can be
//! reconstructed from an open database with
//! [`RrdDb::rrd_def`](crate::RrdDb::rrd_def). Definitions are plain serde
//! types, so they double as the JSON configuration format of the CLI.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::allocator::database_size;
use crate::error::{DefinitionError, LookupError, Result};
use crate::field::RrdString;
use crate::time;

/// Capacity in bytes of a datasource name.
pub const NAME_CAPACITY: usize = 40;

/// Capacity in bytes of the header info string.
pub const INFO_CAPACITY: usize = 128;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Seconds subtracted from "now" when no explicit start time is given.
const DEFAULT_START_OFFSET: i64 = 10;

/// How raw readings of a datasource are turned into a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DsType {
    /// The reading is the rate.
    Gauge,
    /// Monotonic counter; the rate is the increase per second, with 32/64-bit
    /// wraparound correction.
    Counter,
    /// Like `Counter` but negative changes are allowed.
    Derive,
    /// The counter resets on every read; the rate is the reading per second.
    Absolute,
}

impl DsType {
    /// Every datasource type, in tag order.
    pub const ALL: [Self; 4] = [Self::Gauge, Self::Counter, Self::Derive, Self::Absolute];

    /// Integer tag used in the binary layout.
    pub fn tag(self) -> u32 {
        match self {
            Self::Gauge => 0,
            Self::Counter => 1,
            Self::Derive => 2,
            Self::Absolute => 3,
        }
    }

    /// Maps a stored tag back to a type.
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Upper-case keyword of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Derive => "DERIVE",
            Self::Absolute => "ABSOLUTE",
        }
    }
}

impl fmt::Display for DsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DsType {
    type Err = crate::error::RrdError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                DefinitionError::UnknownKeyword {
                    kind: "datasource type",
                    value: s.to_string(),
                }
                .into()
            })
    }
}

/// Aggregation function used to fold primary data points into archive rows.
///
/// NaN values never take part in consolidation; they are counted as
/// unknown steps instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsolidationFn {
    /// Arithmetic mean of the known values.
    Average,

    /// Minimum of the known values.
    Min,

    /// Maximum of the known values.
    Max,

    /// Earliest known value.
    First,

    /// Most recent known value.
    Last,

    /// Sum of the known values.
    Total,
}

impl ConsolidationFn {
    /// Every function, in tag order.
    pub const ALL: [Self; 6] = [
        Self::Average,
        Self::Min,
        Self::Max,
        Self::First,
        Self::Last,
        Self::Total,
    ];

    /// Integer tag used in the binary layout.
    pub fn tag(self) -> u32 {
        match self {
            Self::Average => 0,
            Self::Min => 1,
            Self::Max => 2,
            Self::First => 3,
            Self::Last => 4,
            Self::Total => 5,
        }
    }

    /// Maps a stored tag back to a function.
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }

    /// Upper-case keyword of the function.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::First => "FIRST",
            Self::Last => "LAST",
            Self::Total => "TOTAL",
        }
    }

    /// Folds a known `value` into a running accumulator.
    ///
    /// A NaN accumulator means nothing has been folded yet.
    pub fn fold(self, accumulator: f64, value: f64) -> f64 {
        if accumulator.is_nan() {
            return value;
        }
        match self {
            Self::Average | Self::Total => accumulator + value,
            Self::Min => accumulator.min(value),
            Self::Max => accumulator.max(value),
            Self::First => accumulator,
            Self::Last => value,
        }
    }

    /// Value of a row built from `steps` identical primary values.
    pub fn repeated(self, value: f64, steps: u32) -> f64 {
        match self {
            Self::Total => value * f64::from(steps),
            _ => value,
        }
    }

    /// Applies the function to a slice of values, ignoring NaNs.
    ///
    /// Returns NaN if there are no known values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrdb::schema::ConsolidationFn;
    ///
    /// let values = [1.0, f64::NAN, 4.0, 2.0];
    /// assert_eq!(ConsolidationFn::Average.apply(&values), 7.0 / 3.0);
    /// assert_eq!(ConsolidationFn::First.apply(&values), 1.0);
    /// assert_eq!(ConsolidationFn::Last.apply(&values), 2.0);
    /// assert_eq!(ConsolidationFn::Total.apply(&values), 7.0);
    /// ```
    #[allow(clippy::cast_precision_loss)] // Acceptable for consolidation operations
    pub fn apply(self, values: &[f64]) -> f64 {
        let mut known = 0usize;
        let folded = values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NAN, |acc, v| {
                known += 1;
                self.fold(acc, v)
            });

        match self {
            Self::Average if known > 0 => folded / known as f64,
            _ => folded,
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsolidationFn {
    type Err = crate::error::RrdError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                DefinitionError::UnknownKeyword {
                    kind: "consolidation function",
                    value: s.to_string(),
                }
                .into()
            })
    }
}

/// Definition of a single datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsDef {
    /// Unique name, at most [`NAME_CAPACITY`] bytes of UTF-8.
    pub name: String,

    /// How readings become rates.
    pub ds_type: DsType,

    /// Maximum seconds between two updates before the interval is unknown.
    pub heartbeat: i64,

    /// Lower bound on accepted rates; `None` is unbounded.
    #[serde(default)]
    pub min_value: Option<f64>,

    /// Upper bound on accepted rates; `None` is unbounded.
    #[serde(default)]
    pub max_value: Option<f64>,

    /// Store zero instead of NaN for unknown primary data points.
    #[serde(default)]
    pub force_zeros: bool,
}

impl DsDef {
    /// Creates a validated datasource definition.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique datasource name
    /// * `ds_type` - Rate semantics
    /// * `heartbeat` - Maximum seconds between updates
    /// * `min_value` - Optional lower bound on rates
    /// * `max_value` - Optional upper bound on rates
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the name is empty or too long, the
    /// heartbeat is not positive, or `min_value >= max_value`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrdb::schema::{DsDef, DsType};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let ds = DsDef::new("cpu", DsType::Gauge, 600, Some(0.0), Some(100.0))?;
    /// assert!(DsDef::new("bad", DsType::Gauge, 0, None, None).is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        name: impl Into<String>,
        ds_type: DsType,
        heartbeat: i64,
        min_value: Option<f64>,
        max_value: Option<f64>,
    ) -> Result<Self> {
        let def = Self {
            name: name.into(),
            ds_type,
            heartbeat,
            min_value,
            max_value,
            force_zeros: false,
        };
        def.validate()?;
        Ok(def)
    }

    /// Returns the definition with the force-zeros flag set to `force_zeros`.
    #[must_use]
    pub fn with_force_zeros(mut self, force_zeros: bool) -> Self {
        self.force_zeros = force_zeros;
        self
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if any field is invalid.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_heartbeat(self.heartbeat)?;
        validate_min_max(self.min_value, self.max_value)
    }
}

/// Checks a datasource name.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DefinitionError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".to_string(),
        }
        .into());
    }
    RrdString::check(name, NAME_CAPACITY)
}

/// Checks a heartbeat value.
pub(crate) fn validate_heartbeat(heartbeat: i64) -> Result<()> {
    if heartbeat < 1 {
        return Err(DefinitionError::InvalidHeartbeat { heartbeat }.into());
    }
    Ok(())
}

/// Checks that `min < max` when both bounds are present.
pub(crate) fn validate_min_max(min: Option<f64>, max: Option<f64>) -> Result<()> {
    if let (Some(min), Some(max)) = (min, max)
        && min.partial_cmp(&max) != Some(Ordering::Less)
    {
        return Err(DefinitionError::InvalidMinMax { min, max }.into());
    }
    Ok(())
}

/// Checks an xff value.
pub(crate) fn validate_xff(xff: f64) -> Result<()> {
    if !(0.0..1.0).contains(&xff) {
        return Err(DefinitionError::InvalidXff { xff }.into());
    }
    Ok(())
}

/// Definition of a single archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcDef {
    /// How primary values are folded into rows.
    pub consolidation_fn: ConsolidationFn,

    /// Largest fraction of unknown primary values a row may contain and
    /// still be known, in `[0, 1)`.
    pub xff: f64,

    /// Primary steps per row.
    pub steps: u32,

    /// Number of rows kept.
    pub rows: u32,
}

impl ArcDef {
    /// Creates a validated archive definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if `xff` is outside `[0, 1)` or `steps` or
    /// `rows` is zero.
    pub fn new(consolidation_fn: ConsolidationFn, xff: f64, steps: u32, rows: u32) -> Result<Self> {
        let def = Self {
            consolidation_fn,
            xff,
            steps,
            rows,
        };
        def.validate()?;
        Ok(def)
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if any field is invalid.
    pub fn validate(&self) -> Result<()> {
        validate_xff(self.xff)?;
        if self.steps < 1 {
            return Err(DefinitionError::InvalidSteps { steps: self.steps }.into());
        }
        if self.rows < 1 {
            return Err(DefinitionError::InvalidRows {
                rows: self.rows,
                minimum: 1,
            }
            .into());
        }
        Ok(())
    }

    /// Returns `true` if this archive has the given identity.
    pub fn is_identified_by(&self, consolidation_fn: ConsolidationFn, steps: u32) -> bool {
        self.consolidation_fn == consolidation_fn && self.steps == steps
    }
}

/// Full definition of a database.
///
/// # Example
///
/// ```rust
/// use rrdb::schema::{ArcDef, ConsolidationFn, DsDef, DsType, RrdDef};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut def = RrdDef::new("cpu.rrdb", 0, 300);
/// def.add_datasource(DsDef::new("user", DsType::Gauge, 600, Some(0.0), Some(100.0))?)?;
/// def.add_datasource(DsDef::new("system", DsType::Gauge, 600, Some(0.0), Some(100.0))?)?;
/// // 5 minute averages for a day, hourly maxima for a month
/// def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 288)?)?;
/// def.add_archive(ArcDef::new(ConsolidationFn::Max, 0.5, 12, 720)?)?;
/// def.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrdDef {
    /// Backend path of the database.
    pub path: PathBuf,

    /// Initial last update time, in seconds since the epoch.
    pub start_time: i64,

    /// Primary step in seconds.
    pub step: i64,

    /// Format version stored in the header.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Free-form description stored in the header.
    #[serde(default)]
    pub info: String,

    /// Datasource definitions, in index order.
    #[serde(default)]
    pub datasources: Vec<DsDef>,

    /// Archive definitions, in index order.
    #[serde(default)]
    pub archives: Vec<ArcDef>,
}

fn default_version() -> u32 {
    FORMAT_VERSION
}

impl RrdDef {
    /// Creates an empty definition.
    pub fn new(path: impl Into<PathBuf>, start_time: i64, step: i64) -> Self {
        Self {
            path: path.into(),
            start_time,
            step,
            version: FORMAT_VERSION,
            info: String::new(),
            datasources: Vec::new(),
            archives: Vec::new(),
        }
    }

    /// Creates an empty definition starting shortly before the current time.
    pub fn starting_now(path: impl Into<PathBuf>, step: i64) -> Self {
        Self::new(path, time::now() - DEFAULT_START_OFFSET, step)
    }

    /// Reads a JSON definition and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidDocument`] if the JSON cannot be
    /// parsed, or the matching [`DefinitionError`] if the definition is
    /// invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let def: Self = serde_json::from_str(json).map_err(|e| DefinitionError::InvalidDocument {
            reason: e.to_string(),
        })?;
        def.validate()?;
        Ok(def)
    }

    /// Returns the path of the database.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validates the full definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the format version is unsupported, the
    /// step is not positive, the info
    /// string is too long, there are no datasources or archives, any entry
    /// is invalid, or names/archive identities are duplicated.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 || self.version > FORMAT_VERSION {
            return Err(DefinitionError::UnsupportedVersion {
                version: self.version,
                supported: FORMAT_VERSION,
            }
            .into());
        }
        if self.step < 1 {
            return Err(DefinitionError::InvalidStep { step: self.step }.into());
        }
        RrdString::check(&self.info, INFO_CAPACITY)?;

        if self.datasources.is_empty() {
            return Err(DefinitionError::NoDatasources.into());
        }
        if self.archives.is_empty() {
            return Err(DefinitionError::NoArchives.into());
        }

        for (i, ds) in self.datasources.iter().enumerate() {
            ds.validate()?;
            if self.datasources[..i].iter().any(|d| d.name == ds.name) {
                return Err(DefinitionError::DuplicateDatasource {
                    name: ds.name.clone(),
                }
                .into());
            }
        }

        for (i, arc) in self.archives.iter().enumerate() {
            arc.validate()?;
            if self.archives[..i]
                .iter()
                .any(|a| a.is_identified_by(arc.consolidation_fn, arc.steps))
            {
                return Err(DefinitionError::DuplicateArchive {
                    consolidation_fn: arc.consolidation_fn,
                    steps: arc.steps,
                }
                .into());
            }
        }

        Ok(())
    }

    /// Size in bytes of a database created from this definition.
    pub fn estimated_size(&self) -> u64 {
        let rows: Vec<u32> = self.archives.iter().map(|a| a.rows).collect();
        database_size(self.datasources.len(), &rows)
    }

    /// Returns `true` if a datasource named `name` is defined.
    pub fn contains_datasource(&self, name: &str) -> bool {
        self.datasources.iter().any(|d| d.name == name)
    }

    /// Appends a datasource definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::DuplicateDatasource`] if the name is taken.
    pub fn add_datasource(&mut self, ds: DsDef) -> Result<()> {
        if self.contains_datasource(&ds.name) {
            return Err(DefinitionError::DuplicateDatasource { name: ds.name }.into());
        }
        self.datasources.push(ds);
        Ok(())
    }

    /// Removes the datasource named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] if no such datasource exists.
    pub fn remove_datasource(&mut self, name: &str) -> Result<DsDef> {
        let index = self
            .datasources
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| LookupError::Datasource {
                name: name.to_string(),
            })?;
        Ok(self.datasources.remove(index))
    }

    /// Removes every datasource except `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] if no such datasource exists.
    pub fn retain_datasource(&mut self, name: &str) -> Result<()> {
        if !self.contains_datasource(name) {
            return Err(LookupError::Datasource {
                name: name.to_string(),
            }
            .into());
        }
        self.datasources.retain(|d| d.name == name);
        Ok(())
    }

    /// Appends an archive definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::DuplicateArchive`] if an archive with the
    /// same function and step count exists.
    pub fn add_archive(&mut self, arc: ArcDef) -> Result<()> {
        if self
            .archives
            .iter()
            .any(|a| a.is_identified_by(arc.consolidation_fn, arc.steps))
        {
            return Err(DefinitionError::DuplicateArchive {
                consolidation_fn: arc.consolidation_fn,
                steps: arc.steps,
            }
            .into());
        }
        self.archives.push(arc);
        Ok(())
    }

    /// Removes the archive identified by `(consolidation_fn, steps)`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Archive`] if no such archive exists.
    pub fn remove_archive(&mut self, consolidation_fn: ConsolidationFn, steps: u32) -> Result<ArcDef> {
        let index = self
            .archives
            .iter()
            .position(|a| a.is_identified_by(consolidation_fn, steps))
            .ok_or(LookupError::Archive {
                consolidation_fn,
                steps,
            })?;
        Ok(self.archives.remove(index))
    }

    /// Returns a mutable reference to the archive identified by
    /// `(consolidation_fn, steps)`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Archive`] if no such archive exists.
    pub fn find_archive_mut(
        &mut self,
        consolidation_fn: ConsolidationFn,
        steps: u32,
    ) -> Result<&mut ArcDef> {
        self.archives
            .iter_mut()
            .find(|a| a.is_identified_by(consolidation_fn, steps))
            .ok_or_else(|| {
                LookupError::Archive {
                    consolidation_fn,
                    steps,
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RrdError;

    fn sample_def() -> RrdDef {
        let mut def = RrdDef::new("test.rrdb", 0, 300);
        def.add_datasource(DsDef::new("a", DsType::Gauge, 600, None, None).unwrap())
            .unwrap();
        def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 10).unwrap())
            .unwrap();
        def
    }

    #[test]
    fn test_consolidation_functions() {
        let values = [1.0, 2.0, f64::NAN, 4.0, 3.0];

        assert!((ConsolidationFn::Average.apply(&values) - 2.5).abs() < f64::EPSILON);
        assert_eq!(ConsolidationFn::Min.apply(&values), 1.0);
        assert_eq!(ConsolidationFn::Max.apply(&values), 4.0);
        assert_eq!(ConsolidationFn::First.apply(&values), 1.0);
        assert_eq!(ConsolidationFn::Last.apply(&values), 3.0);
        assert_eq!(ConsolidationFn::Total.apply(&values), 10.0);

        // Test all NaN
        let nan_values = [f64::NAN, f64::NAN];
        assert!(ConsolidationFn::Average.apply(&nan_values).is_nan());
        assert!(ConsolidationFn::Min.apply(&nan_values).is_nan());

        // Test empty
        assert!(ConsolidationFn::Total.apply(&[]).is_nan());
    }

    #[test]
    fn test_fold_treats_nan_accumulator_as_empty() {
        assert_eq!(ConsolidationFn::Min.fold(f64::NAN, 5.0), 5.0);
        assert_eq!(ConsolidationFn::Min.fold(3.0, 5.0), 3.0);
        assert_eq!(ConsolidationFn::First.fold(3.0, 5.0), 3.0);
        assert_eq!(ConsolidationFn::Last.fold(3.0, 5.0), 5.0);
        assert_eq!(ConsolidationFn::Total.repeated(2.0, 3), 6.0);
        assert_eq!(ConsolidationFn::Average.repeated(2.0, 3), 2.0);
    }

    #[test]
    fn test_tags_and_keywords() {
        for f in ConsolidationFn::ALL {
            assert_eq!(ConsolidationFn::from_tag(f.tag()), Some(f));
            assert_eq!(f.to_string().parse::<ConsolidationFn>().unwrap(), f);
        }
        for t in DsType::ALL {
            assert_eq!(DsType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(ConsolidationFn::from_tag(99), None);
        assert_eq!("counter".parse::<DsType>().unwrap(), DsType::Counter);
        assert!("HISTOGRAM".parse::<DsType>().is_err());
    }

    #[test]
    fn test_ds_def_validation() {
        assert!(DsDef::new("cpu", DsType::Gauge, 1, None, None).is_ok());
        assert!(DsDef::new("", DsType::Gauge, 600, None, None).is_err());
        assert!(DsDef::new("x".repeat(41), DsType::Gauge, 600, None, None).is_err());
        assert!(DsDef::new("x".repeat(40), DsType::Gauge, 600, None, None).is_ok());
        assert!(DsDef::new("cpu", DsType::Gauge, 0, None, None).is_err());
        assert!(DsDef::new("cpu", DsType::Gauge, 600, Some(5.0), Some(5.0)).is_err());
        assert!(DsDef::new("cpu", DsType::Gauge, 600, Some(5.0), None).is_ok());
    }

    #[test]
    fn test_arc_def_validation() {
        assert!(ArcDef::new(ConsolidationFn::Max, 0.0, 1, 1).is_ok());
        assert!(ArcDef::new(ConsolidationFn::Max, 1.0, 1, 1).is_err());
        assert!(ArcDef::new(ConsolidationFn::Max, -0.1, 1, 1).is_err());
        assert!(ArcDef::new(ConsolidationFn::Max, f64::NAN, 1, 1).is_err());
        assert!(ArcDef::new(ConsolidationFn::Max, 0.5, 0, 1).is_err());
        assert!(ArcDef::new(ConsolidationFn::Max, 0.5, 1, 0).is_err());
    }

    #[test]
    fn test_rrd_def_requires_datasources_and_archives() {
        let def = RrdDef::new("x", 0, 300);
        assert!(matches!(
            def.validate(),
            Err(RrdError::Definition(DefinitionError::NoDatasources))
        ));

        let mut def = RrdDef::new("x", 0, 300);
        def.add_datasource(DsDef::new("a", DsType::Gauge, 600, None, None).unwrap())
            .unwrap();
        assert!(matches!(
            def.validate(),
            Err(RrdError::Definition(DefinitionError::NoArchives))
        ));

        let mut def = sample_def();
        def.step = 0;
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_rrd_def_version() {
        let mut def = sample_def();
        for version in [0, FORMAT_VERSION + 1, 7] {
            def.version = version;
            assert!(matches!(
                def.validate(),
                Err(RrdError::Definition(DefinitionError::UnsupportedVersion { .. }))
            ));
        }
        def.version = FORMAT_VERSION;
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_rrd_def_duplicates() {
        let mut def = sample_def();
        let dup = DsDef::new("a", DsType::Counter, 600, None, None).unwrap();
        assert!(def.add_datasource(dup.clone()).is_err());

        // Duplicates introduced by direct field access are caught by validate
        def.datasources.push(dup);
        assert!(matches!(
            def.validate(),
            Err(RrdError::Definition(DefinitionError::DuplicateDatasource { .. }))
        ));

        let mut def = sample_def();
        let arc = ArcDef::new(ConsolidationFn::Average, 0.1, 1, 99).unwrap();
        assert!(def.add_archive(arc).is_err());
        let arc = ArcDef::new(ConsolidationFn::Max, 0.1, 1, 99).unwrap();
        assert!(def.add_archive(arc).is_ok());
    }

    #[test]
    fn test_rrd_def_editing() {
        let mut def = sample_def();
        def.add_datasource(DsDef::new("b", DsType::Gauge, 600, None, None).unwrap())
            .unwrap();

        assert_eq!(def.remove_datasource("a").unwrap().name, "a");
        assert!(def.remove_datasource("a").unwrap_err().is_not_found());

        def.find_archive_mut(ConsolidationFn::Average, 1).unwrap().rows = 20;
        assert_eq!(def.archives[0].rows, 20);
        assert!(def.find_archive_mut(ConsolidationFn::Min, 1).is_err());

        assert!(def.remove_archive(ConsolidationFn::Average, 1).is_ok());
        assert!(def.archives.is_empty());
    }

    #[test]
    fn test_json_definition() {
        let json = r#"{"path":"cpu.rrdb","start_time":0,"step":300,
            "datasources":[{"name":"cpu","ds_type":"GAUGE","heartbeat":600,
                            "min_value":0.0,"max_value":100.0}],
            "archives":[{"consolidation_fn":"AVERAGE","xff":0.5,"steps":1,"rows":288}]}"#;
        let def = RrdDef::from_json(json).unwrap();
        assert_eq!(def.version, FORMAT_VERSION);
        assert_eq!(def.datasources[0].ds_type, DsType::Gauge);
        assert!(!def.datasources[0].force_zeros);
        assert_eq!(def.archives[0].rows, 288);

        let text = serde_json::to_string(&def).unwrap();
        assert!(text.contains("\"AVERAGE\""));

        assert!(RrdDef::from_json("{").is_err());
        assert!(RrdDef::from_json(r#"{"path":"x","start_time":0,"step":300}"#).is_err());
    }
}
