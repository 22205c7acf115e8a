//! Archives: consolidation of primary data points into circular rows.
//!
//! Every archive (RRA) consolidates `steps` primary values per row with one
//! [`ConsolidationFn`] and keeps the newest `rows` rows. For each datasource
//! it owns an [`ArcState`] (the open bucket) and a [`Robin`] (closed rows).
//!
//! Records are allocated in three phases so that the image layout is
//! definitions, then states, then robins:
//!
//! ```text
//! archive×M:    function:u32 xff:f64 steps:u32 rows:u32
//! arcstate×M×N: accum:f64 unknownSteps:i64
//! robin×M×N:    pointer:u32 values:f64[rows]
//! ```

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::error::{BackendError, DefinitionError, LookupError, Result};
use crate::fetch::ArchiveSpan;
use crate::field::{DOUBLE_SIZE, INT_SIZE, LONG_SIZE, RrdDouble, RrdInt, RrdLong};
use crate::robin::Robin;
use crate::schema::{ArcDef, ConsolidationFn, validate_xff};
use crate::time::{checked_normalize, normalize};

/// The open (not yet closed) bucket of one archive for one datasource.
#[derive(Debug, Clone)]
pub struct ArcState {
    accum_value: RrdDouble,
    unknown_steps: RrdLong,
}

impl ArcState {
    /// Size of an archive state record in bytes.
    pub const SIZE: u64 = DOUBLE_SIZE + LONG_SIZE;

    /// Reserves the state fields.
    pub fn allocate(allocator: &mut Allocator) -> Self {
        Self {
            accum_value: RrdDouble::allocate(allocator),
            unknown_steps: RrdLong::allocate(allocator),
        }
    }

    /// Writes the initial state.
    ///
    /// Primary steps between the archive-step boundary and the primary-step
    /// boundary of `start_time` are counted as unknown.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a write fails.
    pub fn initialize(
        &self,
        backend: &mut dyn Backend,
        start_time: i64,
        step: i64,
        arc_step: i64,
    ) -> Result<()> {
        let unknown = (normalize(start_time, step) - normalize(start_time, arc_step)) / step;
        self.set(backend, f64::NAN, unknown)
    }

    /// Accumulated value of the open bucket, NaN while empty.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn accum_value(&self, backend: &dyn Backend) -> Result<f64> {
        self.accum_value.get(backend)
    }

    /// Unknown primary steps in the open bucket.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn unknown_steps(&self, backend: &dyn Backend) -> Result<i64> {
        self.unknown_steps.get(backend)
    }

    /// Overwrites both fields.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a write fails.
    pub fn set(&self, backend: &mut dyn Backend, accum_value: f64, unknown_steps: i64) -> Result<()> {
        self.accum_value.set(backend, accum_value)?;
        self.unknown_steps.set(backend, unknown_steps)
    }

    /// Copies both fields into `other`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read or write fails.
    pub fn copy_state_to(
        &self,
        backend: &dyn Backend,
        other: &Self,
        other_backend: &mut dyn Backend,
    ) -> Result<()> {
        other.set(
            other_backend,
            self.accum_value(backend)?,
            self.unknown_steps(backend)?,
        )
    }
}

/// Rows read from one archive for a fetch window.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveWindow {
    /// Row timestamps, one per archive step.
    pub timestamps: Vec<i64>,
    /// One column per requested datasource, aligned with `timestamps`.
    pub values: Vec<Vec<f64>>,
}

/// Field handles of an archive and its per-datasource records.
#[derive(Debug, Clone)]
pub struct Archive {
    consolidation_fn: RrdInt,
    xff: RrdDouble,
    steps: RrdInt,
    rows: RrdInt,
    states: Vec<ArcState>,
    robins: Vec<Robin>,
}

impl Archive {
    /// Size of an archive definition record in bytes.
    pub const SIZE: u64 = INT_SIZE + DOUBLE_SIZE + INT_SIZE + INT_SIZE;

    /// Reserves the definition fields. States and robins are reserved later
    /// with [`allocate_states`](Self::allocate_states) and
    /// [`allocate_robins`](Self::allocate_robins).
    pub fn allocate(allocator: &mut Allocator) -> Self {
        Self {
            consolidation_fn: RrdInt::allocate(allocator),
            xff: RrdDouble::allocate(allocator),
            steps: RrdInt::allocate(allocator),
            rows: RrdInt::allocate(allocator),
            states: Vec::new(),
            robins: Vec::new(),
        }
    }

    /// Reserves one state per datasource.
    pub fn allocate_states(&mut self, allocator: &mut Allocator, ds_count: usize) {
        self.states = (0..ds_count).map(|_| ArcState::allocate(allocator)).collect();
    }

    /// Reserves one robin of `rows` rows per datasource.
    pub fn allocate_robins(&mut self, allocator: &mut Allocator, ds_count: usize, rows: u32) {
        self.robins = (0..ds_count)
            .map(|_| Robin::allocate(allocator, rows))
            .collect();
    }

    /// Writes the definition and the initial state of every datasource.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a write fails.
    pub fn initialize(
        &self,
        backend: &mut dyn Backend,
        def: &ArcDef,
        start_time: i64,
        step: i64,
    ) -> Result<()> {
        self.consolidation_fn.set(backend, def.consolidation_fn.tag())?;
        self.xff.set(backend, def.xff)?;
        self.steps.set(backend, def.steps)?;
        self.rows.set(backend, def.rows)?;

        let arc_step = step * i64::from(def.steps);
        for state in &self.states {
            state.initialize(backend, start_time, step, arc_step)?;
        }
        for robin in &self.robins {
            robin.initialize(backend)?;
        }
        Ok(())
    }

    /// Reads the definition back.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupted`] if the function tag is unknown.
    pub fn definition(&self, backend: &dyn Backend) -> Result<ArcDef> {
        Ok(ArcDef {
            consolidation_fn: self.consolidation_fn(backend)?,
            xff: self.xff(backend)?,
            steps: self.steps(backend)?,
            rows: self.rows(backend)?,
        })
    }

    /// Consolidation function.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupted`] if the stored tag is unknown.
    pub fn consolidation_fn(&self, backend: &dyn Backend) -> Result<ConsolidationFn> {
        let tag = self.consolidation_fn.get(backend)?;
        ConsolidationFn::from_tag(tag).ok_or_else(|| {
            BackendError::Corrupted {
                path: backend.path().display().to_string(),
                reason: format!("unknown consolidation function tag {tag}"),
            }
            .into()
        })
    }

    /// Unknown fraction threshold.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn xff(&self, backend: &dyn Backend) -> Result<f64> {
        self.xff.get(backend)
    }

    /// Changes the unknown fraction threshold. Existing rows are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidXff`] if `xff` is outside `[0, 1)`.
    pub fn set_xff(&self, backend: &mut dyn Backend, xff: f64) -> Result<()> {
        validate_xff(xff)?;
        self.xff.set(backend, xff)
    }

    /// Primary steps per row.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn steps(&self, backend: &dyn Backend) -> Result<u32> {
        self.steps.get(backend)
    }

    /// Number of rows.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn rows(&self, backend: &dyn Backend) -> Result<u32> {
        self.rows.get(backend)
    }

    /// Seconds covered by one row.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn arc_step(&self, backend: &dyn Backend, step: i64) -> Result<i64> {
        Ok(step * i64::from(self.steps(backend)?))
    }

    /// Time of the newest row.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn end_time(&self, backend: &dyn Backend, step: i64, last_update_time: i64) -> Result<i64> {
        Ok(normalize(last_update_time, self.arc_step(backend, step)?))
    }

    /// Time of the oldest row.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn start_time(&self, backend: &dyn Backend, step: i64, last_update_time: i64) -> Result<i64> {
        let arc_step = self.arc_step(backend, step)?;
        let rows = i64::from(self.rows(backend)?);
        Ok(normalize(last_update_time, arc_step) - (rows - 1) * arc_step)
    }

    /// Summary of the covered time range, for archive selection.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read fails.
    pub fn span(&self, backend: &dyn Backend, step: i64, last_update_time: i64) -> Result<ArchiveSpan> {
        Ok(ArchiveSpan {
            consolidation_fn: self.consolidation_fn(backend)?,
            arc_step: self.arc_step(backend, step)?,
            start_time: self.start_time(backend, step, last_update_time)?,
            end_time: self.end_time(backend, step, last_update_time)?,
        })
    }

    /// State handle for datasource `ds_index`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::DatasourceIndex`] if the index is out of range.
    pub fn state(&self, ds_index: usize) -> Result<&ArcState> {
        self.states.get(ds_index).ok_or_else(|| {
            LookupError::DatasourceIndex {
                index: ds_index,
                count: self.states.len(),
            }
            .into()
        })
    }

    /// Robin handle for datasource `ds_index`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::DatasourceIndex`] if the index is out of range.
    pub fn robin(&self, ds_index: usize) -> Result<&Robin> {
        self.robins.get(ds_index).ok_or_else(|| {
            LookupError::DatasourceIndex {
                index: ds_index,
                count: self.robins.len(),
            }
            .into()
        })
    }

    /// Folds a primary value covering `num_steps` primary steps into the
    /// archive.
    ///
    /// `last_update_time` is the database time before the current update.
    /// The open bucket is completed first; whole buckets are then written in
    /// bulk, and the remainder opens a new bucket.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::DatasourceIndex`] for an unknown datasource, or
    /// [`BackendError`] if a read or write fails.
    pub fn archive(
        &self,
        backend: &mut dyn Backend,
        ds_index: usize,
        value: f64,
        num_steps: i64,
        step: i64,
        last_update_time: i64,
    ) -> Result<()> {
        let state = self.state(ds_index)?;
        let robin = self.robin(ds_index)?;
        let def = self.definition(backend)?;
        let arc_step = step * i64::from(def.steps);

        let mut remaining = num_steps;
        let mut update_time = normalize(last_update_time, step) + step;

        while remaining > 0 {
            self.accumulate(backend, state, def.consolidation_fn, value)?;
            remaining -= 1;
            if update_time % arc_step == 0 {
                self.finalize(backend, state, robin, &def, update_time)?;
                break;
            }
            update_time += step;
        }

        let steps = i64::from(def.steps);
        let bulk_rows = (remaining / steps).min(i64::from(def.rows));
        if bulk_rows > 0 {
            let row_value = def.consolidation_fn.repeated(value, def.steps);
            robin.bulk_store(backend, row_value, usize::try_from(bulk_rows).unwrap_or(0))?;
        }

        for _ in 0..remaining % steps {
            self.accumulate(backend, state, def.consolidation_fn, value)?;
        }
        Ok(())
    }

    fn accumulate(
        &self,
        backend: &mut dyn Backend,
        state: &ArcState,
        consolidation_fn: ConsolidationFn,
        value: f64,
    ) -> Result<()> {
        if value.is_nan() {
            let unknown = state.unknown_steps(backend)?;
            state.unknown_steps.set(backend, unknown + 1)
        } else {
            let accum = state.accum_value(backend)?;
            state.accum_value.set(backend, consolidation_fn.fold(accum, value))
        }
    }

    /// Closes the open bucket into a row and resets the state.
    #[allow(clippy::cast_precision_loss)] // step counts are far below 2^52
    fn finalize(
        &self,
        backend: &mut dyn Backend,
        state: &ArcState,
        robin: &Robin,
        def: &ArcDef,
        row_time: i64,
    ) -> Result<()> {
        let accum = state.accum_value(backend)?;
        let unknown = state.unknown_steps(backend)?;
        let steps = i64::from(def.steps);

        let mut row = f64::NAN;
        if !accum.is_nan() && unknown as f64 <= def.xff * steps as f64 {
            row = match def.consolidation_fn {
                ConsolidationFn::Average if steps > unknown => accum / (steps - unknown) as f64,
                ConsolidationFn::Average => f64::NAN,
                _ => accum,
            };
        }

        tracing::trace!(
            consolidation_fn = %def.consolidation_fn,
            steps = def.steps,
            row_time,
            value = row,
            "archive row closed"
        );

        robin.store(backend, row)?;
        state.set(backend, f64::NAN, 0)
    }

    /// Clears the accumulator of datasource `ds_index`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::DatasourceIndex`] for an unknown datasource, or
    /// [`BackendError`] if the write fails.
    pub fn reset_accumulator(&self, backend: &mut dyn Backend, ds_index: usize) -> Result<()> {
        self.state(ds_index)?.accum_value.set(backend, f64::NAN)
    }

    /// Replaces every stored row of datasource `ds_index` outside
    /// `[min, max]` with NaN.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::DatasourceIndex`] for an unknown datasource, or
    /// [`BackendError`] if a read or write fails.
    pub fn filter_values(
        &self,
        backend: &mut dyn Backend,
        ds_index: usize,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<()> {
        self.robin(ds_index)?.filter_values(backend, min, max)
    }

    /// Reads the rows of `ds_indices` between `fetch_start` and `fetch_end`.
    ///
    /// Both bounds are aligned to the archive step, the end rounded up.
    /// Rows outside the archive's stored range are NaN.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidFetchRange`] if the aligned window
    /// does not fit in `i64`, [`LookupError::DatasourceIndex`] for an unknown
    /// datasource, or [`BackendError`] if a read fails.
    pub fn fetch_window(
        &self,
        backend: &dyn Backend,
        ds_indices: &[usize],
        step: i64,
        last_update_time: i64,
        fetch_start: i64,
        fetch_end: i64,
    ) -> Result<ArchiveWindow> {
        let arc_step = self.arc_step(backend, step)?;
        let range_error = || DefinitionError::InvalidFetchRange {
            start: fetch_start,
            end: fetch_end,
        };
        let aligned_start = checked_normalize(fetch_start, arc_step).ok_or_else(range_error)?;
        let mut aligned_end = checked_normalize(fetch_end, arc_step).ok_or_else(range_error)?;
        if aligned_end < fetch_end {
            aligned_end = aligned_end.checked_add(arc_step).ok_or_else(range_error)?;
        }
        let span = aligned_end.checked_sub(aligned_start).ok_or_else(range_error)?;
        let (fetch_start, fetch_end) = (aligned_start, aligned_end);

        let start_time = self.start_time(backend, step, last_update_time)?;
        let end_time = self.end_time(backend, step, last_update_time)?;

        let match_start = fetch_start.max(start_time);
        let match_end = fetch_end.min(end_time);

        let mut matched = Vec::with_capacity(ds_indices.len());
        if match_start <= match_end {
            let first_row = to_index((match_start - start_time) / arc_step);
            let row_count = to_index((match_end - match_start) / arc_step + 1);
            for &ds_index in ds_indices {
                matched.push(self.robin(ds_index)?.get_range(backend, first_row, row_count)?);
            }
        }

        let points = to_index(span / arc_step + 1);
        let timestamps: Vec<i64> = (0..points)
            .map(|i| fetch_start + i64::try_from(i).unwrap_or(i64::MAX) * arc_step)
            .collect();

        let values = (0..ds_indices.len())
            .map(|column| {
                timestamps
                    .iter()
                    .map(|&time| {
                        if time >= match_start && time <= match_end {
                            let row = to_index((time - match_start) / arc_step);
                            matched[column].get(row).copied().unwrap_or(f64::NAN)
                        } else {
                            f64::NAN
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(ArchiveWindow { timestamps, values })
    }

    /// Copies the open buckets and rows of matched datasources into `other`.
    ///
    /// `ds_pairs` maps source datasource indices to destination indices.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::DatasourceIndex`] for an unknown datasource, or
    /// [`BackendError`] if a read or write fails.
    pub fn copy_state_to(
        &self,
        backend: &dyn Backend,
        other: &Self,
        other_backend: &mut dyn Backend,
        ds_pairs: &[(usize, usize)],
    ) -> Result<()> {
        for &(from, to) in ds_pairs {
            self.state(from)?
                .copy_state_to(backend, other.state(to)?, other_backend)?;
            self.robin(from)?
                .copy_state_to(backend, other.robin(to)?, other_backend)?;
        }
        Ok(())
    }

    /// Checks that the stored definition is usable.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupted`] if the function tag is unknown or
    /// the step or row count is zero.
    pub fn validate(&self, backend: &dyn Backend) -> Result<()> {
        let def = self.definition(backend)?;
        if def.steps == 0 || def.rows == 0 {
            return Err(BackendError::Corrupted {
                path: backend.path().display().to_string(),
                reason: format!(
                    "archive {}/{} has {} rows",
                    def.consolidation_fn, def.steps, def.rows
                ),
            }
            .into());
        }
        Ok(())
    }
}

/// Converts a non-negative row arithmetic result to an index.
fn to_index(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    const STEP: i64 = 300;

    fn setup(def: &ArcDef, ds_count: usize, start_time: i64) -> (Archive, MemoryBackend) {
        let mut allocator = Allocator::new();
        let mut archive = Archive::allocate(&mut allocator);
        archive.allocate_states(&mut allocator, ds_count);
        archive.allocate_robins(&mut allocator, ds_count, def.rows);
        let mut backend = MemoryBackend::new("archive");
        backend.set_len(allocator.allocated()).unwrap();
        archive
            .initialize(&mut backend, def, start_time, STEP)
            .unwrap();
        (archive, backend)
    }

    fn feed(archive: &Archive, backend: &mut MemoryBackend, start_time: i64, values: &[f64]) {
        let mut last_update = start_time;
        for &value in values {
            archive
                .archive(backend, 0, value, 1, STEP, last_update)
                .unwrap();
            last_update += STEP;
        }
    }

    fn rows(archive: &Archive, backend: &MemoryBackend) -> Vec<f64> {
        archive.robin(0).unwrap().get_values(backend).unwrap()
    }

    #[test]
    fn test_definition_round_trip() {
        let def = ArcDef::new(ConsolidationFn::Max, 0.25, 6, 10).unwrap();
        let (archive, mut backend) = setup(&def, 2, 0);
        assert_eq!(archive.definition(&backend).unwrap(), def);
        assert_eq!(archive.arc_step(&backend, STEP).unwrap(), 1800);
        archive.validate(&backend).unwrap();

        archive.set_xff(&mut backend, 0.75).unwrap();
        assert_eq!(archive.xff(&backend).unwrap(), 0.75);
        assert!(archive.set_xff(&mut backend, 1.0).is_err());
        assert!(archive.state(2).is_err());
    }

    #[test]
    fn test_initial_unknown_steps() {
        // Start 2 primary steps into a 6-step bucket
        let def = ArcDef::new(ConsolidationFn::Average, 0.5, 6, 10).unwrap();
        let (archive, backend) = setup(&def, 1, 1800 + 2 * STEP + 17);
        let state = archive.state(0).unwrap();
        assert_eq!(state.unknown_steps(&backend).unwrap(), 2);
        assert!(state.accum_value(&backend).unwrap().is_nan());
    }

    #[test]
    fn test_row_closes_every_steps_updates() {
        let def = ArcDef::new(ConsolidationFn::Average, 0.5, 2, 3).unwrap();
        let (archive, mut backend) = setup(&def, 1, 0);

        feed(&archive, &mut backend, 0, &[1.0]);
        assert!(rows(&archive, &backend).iter().all(|v| v.is_nan()));
        feed(&archive, &mut backend, STEP, &[3.0]);
        assert_eq!(rows(&archive, &backend)[2], 2.0);
    }

    #[test]
    fn test_rows_plus_one_buckets_overwrite_first() {
        let def = ArcDef::new(ConsolidationFn::Last, 0.5, 1, 3).unwrap();
        let (archive, mut backend) = setup(&def, 1, 0);

        feed(&archive, &mut backend, 0, &[1.0, 2.0, 3.0]);
        assert_eq!(rows(&archive, &backend), vec![1.0, 2.0, 3.0]);
        feed(&archive, &mut backend, 3 * STEP, &[4.0]);
        assert_eq!(rows(&archive, &backend), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_xff_threshold() {
        let def = ArcDef::new(ConsolidationFn::Average, 0.5, 4, 2).unwrap();
        let (archive, mut backend) = setup(&def, 1, 0);

        // 2 of 4 unknown: allowed, average over the known steps
        feed(&archive, &mut backend, 0, &[2.0, f64::NAN, 4.0, f64::NAN]);
        assert_eq!(rows(&archive, &backend)[1], 3.0);

        // 3 of 4 unknown: above xff
        feed(
            &archive,
            &mut backend,
            4 * STEP,
            &[f64::NAN, f64::NAN, 5.0, f64::NAN],
        );
        assert!(rows(&archive, &backend)[1].is_nan());
    }

    #[test]
    fn test_consolidation_functions_per_row() {
        let values = [4.0, 1.0, 3.0];
        let expected = [
            (ConsolidationFn::Average, 8.0 / 3.0),
            (ConsolidationFn::Min, 1.0),
            (ConsolidationFn::Max, 4.0),
            (ConsolidationFn::First, 4.0),
            (ConsolidationFn::Last, 3.0),
            (ConsolidationFn::Total, 8.0),
        ];
        for (consolidation_fn, expected) in expected {
            let def = ArcDef::new(consolidation_fn, 0.5, 3, 1).unwrap();
            let (archive, mut backend) = setup(&def, 1, 0);
            feed(&archive, &mut backend, 0, &values);
            assert_eq!(rows(&archive, &backend), vec![expected], "{consolidation_fn}");
        }
    }

    #[test]
    fn test_bulk_steps() {
        let def = ArcDef::new(ConsolidationFn::Total, 0.5, 2, 4).unwrap();
        let (archive, mut backend) = setup(&def, 1, 0);

        // Seven steps from t=0: two close the bucket ending at 600, four are
        // written as two whole rows, the last one opens a new bucket.
        archive.archive(&mut backend, 0, 1.0, 7, STEP, 0).unwrap();
        let values = rows(&archive, &backend);
        assert!(values[0].is_nan());
        assert_eq!(&values[1..], &[2.0, 2.0, 2.0]);

        let state = archive.state(0).unwrap();
        assert_eq!(state.accum_value(&backend).unwrap(), 1.0);
    }

    #[test]
    fn test_fetch_window() {
        let def = ArcDef::new(ConsolidationFn::Average, 0.5, 1, 3).unwrap();
        let (archive, mut backend) = setup(&def, 1, 0);
        feed(&archive, &mut backend, 0, &[10.0, 20.0, 30.0, 40.0]);
        let last_update = 4 * STEP;

        let window = archive
            .fetch_window(&backend, &[0], STEP, last_update, 300, 1500)
            .unwrap();
        assert_eq!(window.timestamps, vec![300, 600, 900, 1200, 1500]);
        let column = &window.values[0];
        assert!(column[0].is_nan());
        assert_eq!(&column[1..4], &[20.0, 30.0, 40.0]);
        assert!(column[4].is_nan());

        // Unaligned end rounds up
        let window = archive
            .fetch_window(&backend, &[0], STEP, last_update, 600, 601)
            .unwrap();
        assert_eq!(window.timestamps, vec![600, 900]);
    }

    #[test]
    fn test_reset_and_filter() {
        let def = ArcDef::new(ConsolidationFn::Max, 0.5, 2, 2).unwrap();
        let (archive, mut backend) = setup(&def, 1, 0);
        feed(&archive, &mut backend, 0, &[50.0, 150.0, 7.0]);

        archive.filter_values(&mut backend, 0, None, Some(100.0)).unwrap();
        assert!(rows(&archive, &backend)[1].is_nan());

        archive.reset_accumulator(&mut backend, 0).unwrap();
        assert!(archive.state(0).unwrap().accum_value(&backend).unwrap().is_nan());
    }
}
