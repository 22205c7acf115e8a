//! # rrdb
//!
//! Embedded round-robin database engine.
//!
//! rrdb stores time series in a single fixed-size image, rrdtool style: a
//! database is defined once with its datasources (what is measured) and
//! archives (how long, at what resolution, and consolidated how), and its
//! size never changes afterwards. Every sample is turned into a rate,
//! aligned to the primary step, and consolidated into all archives at
//! write time.
//!
//! ## Key Properties
//!
//! - Bounded storage: size is determined by the definition, not data volume
//! - Offset-addressed, big-endian image over a pluggable [`Backend`]
//! - Consolidation at write time (AVERAGE, MIN, MAX, FIRST, LAST, TOTAL)
//! - GAUGE, COUNTER, DERIVE, and ABSOLUTE datasources with heartbeats and
//!   rate bounds
//! - No background threads: all work happens inside the calling operation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rrdb::{ArcDef, ConsolidationFn, DsDef, DsType, FetchRequest, RrdDb, RrdDef};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 5 minute step, one gauge, an hour of raw rows and a day of hourly maxima
//! let mut def = RrdDef::new("load.rrdb", 1_700_000_000, 300);
//! def.add_datasource(DsDef::new("load", DsType::Gauge, 600, Some(0.0), None)?)?;
//! def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 12)?)?;
//! def.add_archive(ArcDef::new(ConsolidationFn::Max, 0.5, 12, 24)?)?;
//!
//! let db = RrdDb::create(&def)?;
//!
//! let mut sample = db.create_sample(1_700_000_300)?;
//! sample.set_value_by_name("load", 0.75)?;
//! db.update(&sample)?;
//!
//! let request = FetchRequest::new(ConsolidationFn::Average, 1_700_000_000, 1_700_000_300)?;
//! let data = db.fetch(&request)?;
//! for (time, value) in data.timestamps().iter().zip(data.values_by_name("load")?) {
//!     println!("{time}: {value}");
//! }
//! db.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`RrdDb`]: Open database; update, fetch, tuning, and state copy
//! - [`RrdDef`]: Database definition built from [`DsDef`] and [`ArcDef`]
//! - [`Sample`]: One timestamp and one value per datasource
//! - [`FetchRequest`] / [`FetchData`]: Reads from the best matching archive
//! - [`RrdSnapshot`]: Full structured dump, also usable as a [`DataImporter`]
//! - [`toolkit`]: Structural edits that rebuild a database into a new one
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`db`]: Database lifecycle, update, fetch
//! - [`schema`]: Definitions, datasource types, consolidation functions
//! - [`datasource`]: Rate computation and primary value production
//! - [`archive`]: Consolidation into rows and window reads
//! - [`robin`]: Circular row storage
//! - [`header`]: Image header
//! - [`fetch`]: Fetch requests, archive selection, and results
//! - [`sample`]: Update samples and the `time:value` template
//! - [`snapshot`]: Structured and text dumps
//! - [`importer`]: Import source abstraction
//! - [`backend`]: Byte storage backends (memory-mapped file, memory)
//! - [`field`]: Typed fields at fixed backend offsets
//! - [`allocator`]: Sequential layout of fields
//! - [`time`]: Time alignment helpers
//! - [`error`]: Error types

pub mod allocator;
pub mod archive;
pub mod backend;
pub mod datasource;
pub mod db;
pub mod error;
pub mod fetch;
pub mod field;
pub mod header;
pub mod importer;
pub mod robin;
pub mod sample;
pub mod schema;
pub mod snapshot;
pub mod time;
pub mod toolkit;

// Re-export primary API types at crate root for convenience.
pub use backend::{Backend, BackendFactory, FileBackendFactory, MemoryBackendFactory};
pub use db::RrdDb;
pub use error::{Result, RrdError};
pub use fetch::{FetchData, FetchRequest};
pub use importer::DataImporter;
pub use sample::Sample;
pub use schema::{ArcDef, ConsolidationFn, DsDef, DsType, RrdDef};
pub use snapshot::RrdSnapshot;
