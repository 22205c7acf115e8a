//! Error types for the rrdb round-robin database engine.

use thiserror::Error;

use crate::schema::ConsolidationFn;

/// The main error type for all rrdb operations.
///
/// The variants follow the four failure classes of the engine: bad
/// definitions or arguments, operations issued in the wrong order or on a
/// closed database, backend storage failures, and lookups of things that do
/// not exist.
#[derive(Error, Debug)]
pub enum RrdError {
    /// A definition, argument, or configuration value is invalid.
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// The operation is not valid in the database's current state.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The storage backend failed or holds an invalid image.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// A datasource, archive, or database could not be found.
    #[error("not found: {0}")]
    NotFound(#[from] LookupError),
}

impl RrdError {
    /// Returns `true` if this error reports a missing datasource, archive,
    /// or database rather than an invalid request.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors raised while validating definitions and caller-supplied values.
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// The definition asks for a format version this build cannot write.
    #[error("unsupported format version {version}: must be between 1 and {supported}")]
    UnsupportedVersion {
        /// The rejected version.
        version: u32,
        /// The newest supported version.
        supported: u32,
    },

    /// The database definition has no datasources.
    #[error("at least one datasource must be defined")]
    NoDatasources,

    /// The database definition has no archives.
    #[error("at least one archive must be defined")]
    NoArchives,

    /// The primary step is not positive.
    #[error("invalid step {step}: must be >= 1 second")]
    InvalidStep {
        /// The rejected step.
        step: i64,
    },

    /// The heartbeat is not positive.
    #[error("invalid heartbeat {heartbeat}: must be >= 1 second")]
    InvalidHeartbeat {
        /// The rejected heartbeat.
        heartbeat: i64,
    },

    /// The minimum bound is not strictly below the maximum bound.
    #[error("invalid min/max values: {min}/{max}")]
    InvalidMinMax {
        /// The minimum bound.
        min: f64,
        /// The maximum bound.
        max: f64,
    },

    /// A datasource with this name is already defined.
    #[error("datasource '{name}' is already defined")]
    DuplicateDatasource {
        /// The conflicting name.
        name: String,
    },

    /// An archive with this function and step count is already defined.
    #[error("archive {consolidation_fn}/{steps} is already defined")]
    DuplicateArchive {
        /// The consolidation function.
        consolidation_fn: ConsolidationFn,
        /// Primary steps per row.
        steps: u32,
    },

    /// A datasource name is empty or too long.
    #[error("invalid datasource name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// The unknown fraction is outside `[0, 1)`.
    #[error("invalid xff {xff}: must be >= 0 and < 1")]
    InvalidXff {
        /// The rejected xff.
        xff: f64,
    },

    /// An archive must consolidate at least one primary step per row.
    #[error("invalid steps per row {steps}: must be >= 1")]
    InvalidSteps {
        /// The rejected step count.
        steps: u32,
    },

    /// The archive row count is below the allowed minimum.
    #[error("invalid row count {rows}: must be >= {minimum}")]
    InvalidRows {
        /// The rejected row count.
        rows: u32,
        /// The smallest accepted row count.
        minimum: u32,
    },

    /// A string does not fit into its fixed-width field.
    #[error("string '{value}' is {length} bytes, field capacity is {capacity} bytes")]
    StringTooLong {
        /// The rejected string.
        value: String,
        /// Its encoded length.
        length: usize,
        /// The field capacity.
        capacity: usize,
    },

    /// A keyword (datasource type, consolidation function, format) is unknown.
    #[error("unknown {kind} '{value}'")]
    UnknownKeyword {
        /// What kind of keyword was expected.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A definition document could not be parsed.
    #[error("invalid definition document: {reason}")]
    InvalidDocument {
        /// The parser message.
        reason: String,
    },

    /// A sample carries the wrong number of values.
    #[error("sample has {actual} values, database has {expected} datasources")]
    SampleSize {
        /// Number of datasources in the database.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// A sample update template could not be parsed.
    #[error("invalid sample template '{template}': {reason}")]
    InvalidSample {
        /// The rejected template.
        template: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The fetch time range is inverted or cannot be aligned to rows.
    #[error("invalid fetch range: start {start}, end {end}")]
    InvalidFetchRange {
        /// Requested start.
        start: i64,
        /// Requested end.
        end: i64,
    },

    /// The fetch resolution is not positive.
    #[error("invalid fetch resolution {resolution}: must be >= 1")]
    InvalidResolution {
        /// The rejected resolution.
        resolution: i64,
    },

    /// Source and destination of a copy operation are the same.
    #[error("source and destination are the same: {path}")]
    SamePath {
        /// The shared path.
        path: String,
    },

    /// State cannot be copied between two incompatible objects.
    #[error("incompatible state copy: {reason}")]
    IncompatibleState {
        /// Description of the incompatibility.
        reason: String,
    },
}

/// Errors for operations issued in the wrong order or state.
#[derive(Error, Debug)]
pub enum StateError {
    /// The database has been closed.
    #[error("database '{path}' is closed")]
    Closed {
        /// The database path.
        path: String,
    },

    /// The sample timestamp does not advance past the last update.
    #[error("bad sample time {time}: last update time was {last_update_time}, at least one second step is required")]
    NonMonotonicUpdate {
        /// The rejected sample time.
        time: i64,
        /// The current last update time.
        last_update_time: i64,
    },
}

/// Errors raised by storage backends.
#[derive(Error, Debug)]
pub enum BackendError {
    /// An I/O operation on the backend target failed.
    #[error("I/O failure on '{path}' at offset {offset}: {source}")]
    Io {
        /// The backend path.
        path: String,
        /// The byte offset involved.
        offset: u64,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Flushing the backend to durable storage failed.
    #[error("failed to sync '{path}': {source}")]
    SyncFailed {
        /// The backend path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A write was attempted on a backend opened read-only.
    #[error("backend '{path}' is read-only")]
    ReadOnly {
        /// The backend path.
        path: String,
    },

    /// A read or write reaches past the end of the backend.
    #[error("access beyond backend bounds: offset {offset} + length {length} > size {size}")]
    BoundsViolation {
        /// The attempted offset.
        offset: u64,
        /// The attempted length.
        length: u64,
        /// The backend size.
        size: u64,
    },

    /// The stored image is not a valid database.
    #[error("'{path}' is corrupted: {reason}")]
    Corrupted {
        /// The backend path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },
}

/// Errors for lookups of missing items.
#[derive(Error, Debug)]
pub enum LookupError {
    /// No datasource has this name.
    #[error("unknown datasource name: {name}")]
    Datasource {
        /// The requested name.
        name: String,
    },

    /// No datasource exists at this index.
    #[error("datasource index {index} out of range ({count} datasources)")]
    DatasourceIndex {
        /// The requested index.
        index: usize,
        /// Number of datasources.
        count: usize,
    },

    /// No archive has this function and step count.
    #[error("could not find archive {consolidation_fn}/{steps}")]
    Archive {
        /// The requested function.
        consolidation_fn: ConsolidationFn,
        /// The requested steps per row.
        steps: u32,
    },

    /// No archive uses the requested consolidation function.
    #[error("database does not contain an {consolidation_fn} archive")]
    NoArchiveForFunction {
        /// The requested function.
        consolidation_fn: ConsolidationFn,
    },

    /// The backend target does not exist.
    #[error("could not open '{path}': no such database")]
    Database {
        /// The requested path.
        path: String,
    },
}

/// Type alias for `Result<T, RrdError>`.
pub type Result<T> = std::result::Result<T, RrdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err: RrdError = LookupError::Datasource {
            name: "cpu".to_string(),
        }
        .into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: unknown datasource name: cpu");

        let err: RrdError = DefinitionError::InvalidHeartbeat { heartbeat: 0 }.into();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_ordering_error_message() {
        let err: RrdError = StateError::NonMonotonicUpdate {
            time: 100,
            last_update_time: 100,
        }
        .into();
        assert!(err.to_string().contains("bad sample time 100"));
    }
}
