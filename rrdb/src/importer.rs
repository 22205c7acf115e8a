//! Source of a complete database state for [`RrdDb::import`](crate::RrdDb::import).
//!
//! An importer answers every question needed to rebuild a database: the
//! definition (step, datasources, archives) and the live state (last update
//! time, datasource accumulators, open buckets, and stored rows).

use std::path::Path;

use crate::schema::{ArcDef, ConsolidationFn, DsDef, DsType, RrdDef};

/// Read-only view of a database state to import.
///
/// Indices are `0..ds_count()` for datasources and `0..arc_count()` for
/// archives. Implementations return NaN, zero, or empty values for data they
/// do not carry.
pub trait DataImporter {
    /// Format version.
    fn version(&self) -> u32;

    /// Primary step in seconds.
    fn step(&self) -> i64;

    /// Time of the last update.
    fn last_update_time(&self) -> i64;

    /// Free-form info string.
    fn info(&self) -> String {
        String::new()
    }

    /// Number of datasources.
    fn ds_count(&self) -> usize;

    /// Number of archives.
    fn arc_count(&self) -> usize;

    /// Name of datasource `ds`.
    fn ds_name(&self, ds: usize) -> String;

    /// Type of datasource `ds`.
    fn ds_type(&self, ds: usize) -> DsType;

    /// Heartbeat of datasource `ds`.
    fn heartbeat(&self, ds: usize) -> i64;

    /// Lower rate bound of datasource `ds`.
    fn min_value(&self, ds: usize) -> Option<f64>;

    /// Upper rate bound of datasource `ds`.
    fn max_value(&self, ds: usize) -> Option<f64>;

    /// Force-zeros flag of datasource `ds`.
    fn force_zeros(&self, _ds: usize) -> bool {
        false
    }

    /// Last raw reading of datasource `ds`.
    fn last_value(&self, ds: usize) -> f64;

    /// Rate accumulator of datasource `ds`.
    fn accum_value(&self, ds: usize) -> f64;

    /// Unknown seconds of datasource `ds`.
    fn unknown_seconds(&self, ds: usize) -> i64;

    /// Consolidation function of archive `arc`.
    fn consolidation_fn(&self, arc: usize) -> ConsolidationFn;

    /// Unknown fraction threshold of archive `arc`.
    fn xff(&self, arc: usize) -> f64;

    /// Primary steps per row of archive `arc`.
    fn steps(&self, arc: usize) -> u32;

    /// Row count of archive `arc`.
    fn rows(&self, arc: usize) -> u32;

    /// Open bucket accumulator of archive `arc`, datasource `ds`.
    fn state_accum_value(&self, arc: usize, ds: usize) -> f64;

    /// Open bucket unknown steps of archive `arc`, datasource `ds`.
    fn state_unknown_steps(&self, arc: usize, ds: usize) -> i64;

    /// Stored rows of archive `arc`, datasource `ds`, oldest first.
    fn robin_values(&self, arc: usize, ds: usize) -> Vec<f64>;

    /// Builds the definition of the imported database at `path`.
    ///
    /// The start time is the importer's last update time.
    fn rrd_def(&self, path: &Path) -> RrdDef {
        let mut def = RrdDef::new(path, self.last_update_time(), self.step());
        def.version = self.version();
        def.info = self.info();
        def.datasources = (0..self.ds_count())
            .map(|ds| DsDef {
                name: self.ds_name(ds),
                ds_type: self.ds_type(ds),
                heartbeat: self.heartbeat(ds),
                min_value: self.min_value(ds),
                max_value: self.max_value(ds),
                force_zeros: self.force_zeros(ds),
            })
            .collect();
        def.archives = (0..self.arc_count())
            .map(|arc| ArcDef {
                consolidation_fn: self.consolidation_fn(arc),
                xff: self.xff(arc),
                steps: self.steps(arc),
                rows: self.rows(arc),
            })
            .collect();
        def
    }
}
