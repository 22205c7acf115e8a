//! Structured dump of a complete database state.
//!
//! [`RrdSnapshot`] is produced by [`RrdDb::snapshot`](crate::RrdDb::snapshot)
//! and serializes with serde (JSON via `serde_json`). Its `Display`
//! implementation is the human-readable text dump. A snapshot is also a
//! [`DataImporter`], so `RrdDb::import(path, &snapshot, ...)` rebuilds the
//! database it was taken from.
//!
//! NaN values are written as JSON `null` and read back as NaN.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::importer::DataImporter;
use crate::schema::{ArcDef, ConsolidationFn, DsDef, DsType};
use crate::time::normalize;

/// Full state of a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrdSnapshot {
    /// Format version.
    pub version: u32,
    /// Primary step in seconds.
    pub step: i64,
    /// Time of the last update.
    pub last_update_time: i64,
    /// Free-form info string.
    #[serde(default)]
    pub info: String,
    /// Datasources, in index order.
    pub datasources: Vec<DsSnapshot>,
    /// Archives, in index order.
    pub archives: Vec<ArchiveSnapshot>,
}

/// Definition and live state of one datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsSnapshot {
    /// Datasource definition.
    #[serde(flatten)]
    pub def: DsDef,
    /// Last raw reading.
    #[serde(with = "nan_as_null")]
    pub last_value: f64,
    /// Rate accumulator of the current primary interval.
    #[serde(with = "nan_as_null")]
    pub accum_value: f64,
    /// Unknown seconds of the current primary interval.
    pub unknown_seconds: i64,
}

/// Definition, open buckets, and rows of one archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSnapshot {
    /// Archive definition.
    #[serde(flatten)]
    pub def: ArcDef,
    /// One entry per datasource, in datasource order.
    pub states: Vec<ArcStateSnapshot>,
}

/// Open bucket and rows of one archive for one datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcStateSnapshot {
    /// Accumulated value of the open bucket.
    #[serde(with = "nan_as_null")]
    pub accum_value: f64,
    /// Unknown primary steps of the open bucket.
    pub unknown_steps: i64,
    /// Stored rows, oldest first.
    #[serde(with = "nan_vec_as_null")]
    pub values: Vec<f64>,
}

impl RrdSnapshot {
    fn ds(&self, ds: usize) -> Option<&DsSnapshot> {
        self.datasources.get(ds)
    }

    fn arc(&self, arc: usize) -> Option<&ArchiveSnapshot> {
        self.archives.get(arc)
    }

    fn state(&self, arc: usize, ds: usize) -> Option<&ArcStateSnapshot> {
        self.arc(arc).and_then(|a| a.states.get(ds))
    }
}

impl DataImporter for RrdSnapshot {
    fn version(&self) -> u32 {
        self.version
    }

    fn step(&self) -> i64 {
        self.step
    }

    fn last_update_time(&self) -> i64 {
        self.last_update_time
    }

    fn info(&self) -> String {
        self.info.clone()
    }

    fn ds_count(&self) -> usize {
        self.datasources.len()
    }

    fn arc_count(&self) -> usize {
        self.archives.len()
    }

    fn ds_name(&self, ds: usize) -> String {
        self.ds(ds).map(|d| d.def.name.clone()).unwrap_or_default()
    }

    fn ds_type(&self, ds: usize) -> DsType {
        self.ds(ds).map_or(DsType::Gauge, |d| d.def.ds_type)
    }

    fn heartbeat(&self, ds: usize) -> i64 {
        self.ds(ds).map_or(0, |d| d.def.heartbeat)
    }

    fn min_value(&self, ds: usize) -> Option<f64> {
        self.ds(ds).and_then(|d| d.def.min_value)
    }

    fn max_value(&self, ds: usize) -> Option<f64> {
        self.ds(ds).and_then(|d| d.def.max_value)
    }

    fn force_zeros(&self, ds: usize) -> bool {
        self.ds(ds).is_some_and(|d| d.def.force_zeros)
    }

    fn last_value(&self, ds: usize) -> f64 {
        self.ds(ds).map_or(f64::NAN, |d| d.last_value)
    }

    fn accum_value(&self, ds: usize) -> f64 {
        self.ds(ds).map_or(0.0, |d| d.accum_value)
    }

    fn unknown_seconds(&self, ds: usize) -> i64 {
        self.ds(ds).map_or(0, |d| d.unknown_seconds)
    }

    fn consolidation_fn(&self, arc: usize) -> ConsolidationFn {
        self.arc(arc)
            .map_or(ConsolidationFn::Average, |a| a.def.consolidation_fn)
    }

    fn xff(&self, arc: usize) -> f64 {
        self.arc(arc).map_or(0.0, |a| a.def.xff)
    }

    fn steps(&self, arc: usize) -> u32 {
        self.arc(arc).map_or(0, |a| a.def.steps)
    }

    fn rows(&self, arc: usize) -> u32 {
        self.arc(arc).map_or(0, |a| a.def.rows)
    }

    fn state_accum_value(&self, arc: usize, ds: usize) -> f64 {
        self.state(arc, ds).map_or(f64::NAN, |s| s.accum_value)
    }

    fn state_unknown_steps(&self, arc: usize, ds: usize) -> i64 {
        self.state(arc, ds).map_or(0, |s| s.unknown_steps)
    }

    fn robin_values(&self, arc: usize, ds: usize) -> Vec<f64> {
        self.state(arc, ds)
            .map(|s| s.values.clone())
            .unwrap_or_default()
    }
}

/// Formats an optional bound, `U` for unbounded.
fn fmt_bound(bound: Option<f64>) -> String {
    bound.map_or_else(|| "U".to_string(), |v| v.to_string())
}

impl fmt::Display for RrdSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version = {}", self.version)?;
        writeln!(f, "step = {}", self.step)?;
        writeln!(f, "last_update = {}", self.last_update_time)?;
        if !self.info.is_empty() {
            writeln!(f, "info = {:?}", self.info)?;
        }

        for ds in &self.datasources {
            let name = &ds.def.name;
            writeln!(f)?;
            writeln!(f, "ds[{name}].type = {}", ds.def.ds_type)?;
            writeln!(f, "ds[{name}].heartbeat = {}", ds.def.heartbeat)?;
            writeln!(f, "ds[{name}].min = {}", fmt_bound(ds.def.min_value))?;
            writeln!(f, "ds[{name}].max = {}", fmt_bound(ds.def.max_value))?;
            if ds.def.force_zeros {
                writeln!(f, "ds[{name}].force_zeros = true")?;
            }
            writeln!(f, "ds[{name}].last_value = {}", ds.last_value)?;
            writeln!(f, "ds[{name}].accum_value = {}", ds.accum_value)?;
            writeln!(f, "ds[{name}].unknown_seconds = {}", ds.unknown_seconds)?;
        }

        for (index, arc) in self.archives.iter().enumerate() {
            let arc_step = self.step * i64::from(arc.def.steps);
            let end_time = normalize(self.last_update_time, arc_step.max(1));
            let rows = i64::from(arc.def.rows);

            writeln!(f)?;
            writeln!(f, "rra[{index}].cf = {}", arc.def.consolidation_fn)?;
            writeln!(f, "rra[{index}].steps = {}", arc.def.steps)?;
            writeln!(f, "rra[{index}].rows = {}", arc.def.rows)?;
            writeln!(f, "rra[{index}].xff = {}", arc.def.xff)?;
            for (ds_index, state) in arc.states.iter().enumerate() {
                writeln!(
                    f,
                    "rra[{index}].state[{ds_index}] = {} ({} unknown steps)",
                    state.accum_value, state.unknown_steps
                )?;
            }

            writeln!(f, "rra[{index}].rows:")?;
            for row in 0..rows {
                let time = end_time - (rows - 1 - row) * arc_step;
                write!(f, "  {time}:")?;
                for state in &arc.states {
                    let value = usize::try_from(row)
                        .ok()
                        .and_then(|r| state.values.get(r))
                        .copied()
                        .unwrap_or(f64::NAN);
                    write!(f, " {value}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Serializes NaN as `null`.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Serializes every NaN in a vector as `null`.
mod nan_vec_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| (!v.is_nan()).then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Ok(Vec::<Option<f64>>::deserialize(deserializer)?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }
}
