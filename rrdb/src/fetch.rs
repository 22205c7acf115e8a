//! Read path: fetch requests, fetch results, and archive selection.
//!
//! A [`FetchRequest`] names a consolidation function and a time range. The
//! database picks the archive that best covers the range (see
//! [`find_matching_archive`]) and returns its rows as [`FetchData`].
//!
//! # Example Usage
//!
//! ```rust,no_run
//! # use rrdb::{RrdDb, FetchRequest, ConsolidationFn};
//! # let db = RrdDb::open("cpu.rrdb", true)?;
//! let request = FetchRequest::new(ConsolidationFn::Average, 0, 3600)?
//!     .with_resolution(300)?
//!     .with_filter(["user"]);
//! let data = db.fetch(&request)?;
//! for (time, value) in data.timestamps().iter().zip(data.values_by_name("user")?) {
//!     println!("{time}: {value}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::Serialize;

use crate::error::{DefinitionError, LookupError, Result};
use crate::schema::ConsolidationFn;

/// A request to read consolidated values.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    consolidation_fn: ConsolidationFn,
    start: i64,
    end: i64,
    resolution: i64,
    filter: Option<Vec<String>>,
}

impl FetchRequest {
    /// Creates a request for `[start, end]` with resolution 1.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidFetchRange`] if `start > end`.
    pub fn new(consolidation_fn: ConsolidationFn, start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(DefinitionError::InvalidFetchRange { start, end }.into());
        }
        Ok(Self {
            consolidation_fn,
            start,
            end,
            resolution: 1,
            filter: None,
        })
    }

    /// Sets the preferred row width in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidResolution`] if `resolution < 1`.
    pub fn with_resolution(mut self, resolution: i64) -> Result<Self> {
        if resolution < 1 {
            return Err(DefinitionError::InvalidResolution { resolution }.into());
        }
        self.resolution = resolution;
        Ok(self)
    }

    /// Restricts (and orders) the returned datasources.
    #[must_use]
    pub fn with_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Requested consolidation function.
    pub fn consolidation_fn(&self) -> ConsolidationFn {
        self.consolidation_fn
    }

    /// Requested start time.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Requested end time.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Preferred row width in seconds.
    pub fn resolution(&self) -> i64 {
        self.resolution
    }

    /// Datasource filter, `None` for all datasources.
    pub fn filter(&self) -> Option<&[String]> {
        self.filter.as_deref()
    }
}

/// The time range covered by one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSpan {
    /// Consolidation function of the archive.
    pub consolidation_fn: ConsolidationFn,
    /// Seconds per row.
    pub arc_step: i64,
    /// Time of the oldest row.
    pub start_time: i64,
    /// Time of the newest row.
    pub end_time: i64,
}

/// Chooses the archive best suited for `request`.
///
/// Only archives with the requested function are considered. An archive
/// fully matches when `[start_time - arc_step, end_time]` contains the
/// requested range; among full matches the one whose row width is closest
/// to the requested resolution wins. Without a full match the archive with
/// the largest overlap wins. Ties go to the first archive.
///
/// Returns the index into `spans`, or `None` if no archive uses the function.
///
/// # Examples
///
/// ```rust
/// use rrdb::fetch::{ArchiveSpan, FetchRequest, find_matching_archive};
/// use rrdb::schema::ConsolidationFn;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let spans = [
///     ArchiveSpan { consolidation_fn: ConsolidationFn::Average, arc_step: 300, start_time: 9_000, end_time: 10_000 },
///     ArchiveSpan { consolidation_fn: ConsolidationFn::Average, arc_step: 3600, start_time: 0, end_time: 10_000 },
/// ];
/// let request = FetchRequest::new(ConsolidationFn::Average, 1_000, 10_000)?;
/// assert_eq!(find_matching_archive(&spans, &request), Some(1));
/// # Ok(())
/// # }
/// ```
pub fn find_matching_archive(spans: &[ArchiveSpan], request: &FetchRequest) -> Option<usize> {
    let fetch_start = request.start;
    let fetch_end = request.end;
    let full_match = fetch_end.saturating_sub(fetch_start);

    let mut best_full: Option<(usize, i64)> = None;
    let mut best_partial: Option<(usize, i64)> = None;

    for (index, span) in spans.iter().enumerate() {
        if span.consolidation_fn != request.consolidation_fn {
            continue;
        }
        let arc_start = span.start_time.saturating_sub(span.arc_step);
        let arc_end = span.end_time;

        if arc_end >= fetch_end && arc_start <= fetch_start {
            let step_diff = (span.arc_step - request.resolution).abs();
            if best_full.is_none_or(|(_, best)| step_diff < best) {
                best_full = Some((index, step_diff));
            }
        } else {
            let mut overlap = full_match;
            if arc_start > fetch_start {
                overlap = overlap.saturating_sub(arc_start.saturating_sub(fetch_start));
            }
            if arc_end < fetch_end {
                overlap = overlap.saturating_sub(fetch_end.saturating_sub(arc_end));
            }
            if best_partial.is_none_or(|(_, best)| overlap > best) {
                best_partial = Some((index, overlap));
            }
        }
    }

    best_full.or(best_partial).map(|(index, _)| index)
}

/// Chooses the archive whose range contains `start_time` and whose row
/// width is closest to `resolution`.
///
/// An exact resolution match among covering archives is returned at once.
/// If no archive with the function covers `start_time`, the archive with the
/// closest row width overall is returned.
pub fn find_start_match_archive(
    spans: &[ArchiveSpan],
    consolidation_fn: ConsolidationFn,
    start_time: i64,
    resolution: i64,
) -> Option<usize> {
    let mut covering: Option<(usize, i64)> = None;
    let mut fallback: Option<(usize, i64)> = None;

    for (index, span) in spans.iter().enumerate() {
        if span.consolidation_fn != consolidation_fn {
            continue;
        }
        let diff = (resolution - span.arc_step).abs();
        if start_time >= span.start_time {
            if diff == 0 {
                return Some(index);
            }
            if covering.is_none_or(|(_, best)| diff < best) {
                covering = Some((index, diff));
            }
        } else if fallback.is_none_or(|(_, best)| diff < best) {
            fallback = Some((index, diff));
        }
    }

    covering.or(fallback).map(|(index, _)| index)
}

/// Values read from one archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchData {
    consolidation_fn: ConsolidationFn,
    arc_index: usize,
    arc_step: i64,
    arc_end_time: i64,
    timestamps: Vec<i64>,
    ds_names: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl FetchData {
    pub(crate) fn new(
        consolidation_fn: ConsolidationFn,
        arc_index: usize,
        arc_step: i64,
        arc_end_time: i64,
        timestamps: Vec<i64>,
        ds_names: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Self {
        Self {
            consolidation_fn,
            arc_index,
            arc_step,
            arc_end_time,
            timestamps,
            ds_names,
            values,
        }
    }

    /// Consolidation function of the matched archive.
    pub fn consolidation_fn(&self) -> ConsolidationFn {
        self.consolidation_fn
    }

    /// Index of the matched archive.
    pub fn arc_index(&self) -> usize {
        self.arc_index
    }

    /// Row width of the matched archive in seconds.
    pub fn arc_step(&self) -> i64 {
        self.arc_step
    }

    /// Time of the newest row stored in the matched archive.
    pub fn arc_end_time(&self) -> i64 {
        self.arc_end_time
    }

    /// Row timestamps.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    /// Names of the returned datasources, in column order.
    pub fn ds_names(&self) -> &[String] {
        &self.ds_names
    }

    /// All columns, in `ds_names` order.
    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    /// Column of the datasource named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] if the datasource was not fetched.
    pub fn values_by_name(&self, name: &str) -> Result<&[f64]> {
        self.ds_names
            .iter()
            .position(|n| n == name)
            .map(|index| self.values[index].as_slice())
            .ok_or_else(|| {
                LookupError::Datasource {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Aggregates the column of `name` with `consolidation_fn`, ignoring NaNs.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] if the datasource was not fetched.
    pub fn aggregate(&self, name: &str, consolidation_fn: ConsolidationFn) -> Result<f64> {
        Ok(consolidation_fn.apply(self.values_by_name(name)?))
    }

    /// Renders the rows as CSV with a `timestamp` column first.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("timestamp");
        for name in &self.ds_names {
            out.push(',');
            out.push_str(name);
        }
        out.push('\n');
        for (row, time) in self.timestamps.iter().enumerate() {
            out.push_str(&time.to_string());
            for column in &self.values {
                out.push(',');
                out.push_str(&column[row].to_string());
            }
            out.push('\n');
        }
        out
    }
}
