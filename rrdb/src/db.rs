//! The database coordinator.
//!
//! [`RrdDb`] ties the components together: it owns the backend, lays out the
//! header, datasources, and archives at their allocated offsets, and runs
//! the update and fetch paths.
//!
//! # Design
//!
//! - The layout is computed once, on create or open, and never changes.
//! - All state lives in the backend; the coordinator only keeps field
//!   handles (offsets).
//! - One mutex guards the backend and layout, so every operation on a
//!   database is serialized and `RrdDb` can be shared between threads.
//! - Closing is idempotent; any later operation fails with a
//!   [`StateError::Closed`] error. Dropping an open database closes it.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use rrdb::{ArcDef, ConsolidationFn, DsDef, DsType, FetchRequest, RrdDb, RrdDef};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut def = RrdDef::new("traffic.rrdb", 1_700_000_000, 300);
//! def.add_datasource(DsDef::new("in", DsType::Counter, 600, Some(0.0), None)?)?;
//! def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 288)?)?;
//!
//! let db = RrdDb::create(&def)?;
//! db.update_values(1_700_000_300, &[1_000.0])?;
//! db.update_values(1_700_000_600, &[4_000.0])?;
//!
//! let request = FetchRequest::new(ConsolidationFn::Average, 1_700_000_000, 1_700_000_600)?;
//! let data = db.fetch(&request)?;
//! println!("{}", data.to_csv());
//! db.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::allocator::Allocator;
use crate::archive::Archive;
use crate::backend::{Backend, BackendFactory, FileBackendFactory};
use crate::datasource::{Datasource, DsState};
use crate::error::{BackendError, DefinitionError, LookupError, Result, StateError};
use crate::fetch::{self, ArchiveSpan, FetchData, FetchRequest};
use crate::header::Header;
use crate::importer::DataImporter;
use crate::sample::Sample;
use crate::schema::{ConsolidationFn, DsType, RrdDef, validate_min_max};
use crate::snapshot::{ArcStateSnapshot, ArchiveSnapshot, DsSnapshot, RrdSnapshot};
use crate::time;

/// Field handles of every record in a database image.
#[derive(Debug)]
struct Layout {
    header: Header,
    datasources: Vec<Datasource>,
    archives: Vec<Archive>,
}

impl Layout {
    /// Allocates the layout for `ds_count` datasources and `arc_count`
    /// archives; `rows_of` supplies the row count of each archive once its
    /// definition fields are allocated. Returns the layout and its size.
    fn allocate<F>(ds_count: usize, arc_count: usize, mut rows_of: F) -> Result<(Self, u64)>
    where
        F: FnMut(usize, &Archive) -> Result<u32>,
    {
        let mut allocator = Allocator::new();
        let header = Header::allocate(&mut allocator);
        let datasources = (0..ds_count)
            .map(|_| Datasource::allocate(&mut allocator))
            .collect();
        let mut archives: Vec<Archive> = (0..arc_count)
            .map(|_| Archive::allocate(&mut allocator))
            .collect();

        let rows = archives
            .iter()
            .enumerate()
            .map(|(index, archive)| rows_of(index, archive))
            .collect::<Result<Vec<u32>>>()?;

        for archive in &mut archives {
            archive.allocate_states(&mut allocator, ds_count);
        }
        for (archive, rows) in archives.iter_mut().zip(rows) {
            archive.allocate_robins(&mut allocator, ds_count, rows);
        }

        let layout = Self {
            header,
            datasources,
            archives,
        };
        Ok((layout, allocator.allocated()))
    }

    fn ds_names(&self, backend: &dyn Backend) -> Result<Vec<String>> {
        self.datasources.iter().map(|ds| ds.name(backend)).collect()
    }

    fn ds_index(&self, backend: &dyn Backend, name: &str) -> Result<usize> {
        for (index, ds) in self.datasources.iter().enumerate() {
            if ds.name(backend)? == name {
                return Ok(index);
            }
        }
        Err(LookupError::Datasource {
            name: name.to_string(),
        }
        .into())
    }

    fn arc_index(
        &self,
        backend: &dyn Backend,
        consolidation_fn: ConsolidationFn,
        steps: u32,
    ) -> Result<usize> {
        for (index, archive) in self.archives.iter().enumerate() {
            if archive.consolidation_fn(backend)? == consolidation_fn
                && archive.steps(backend)? == steps
            {
                return Ok(index);
            }
        }
        Err(LookupError::Archive {
            consolidation_fn,
            steps,
        }
        .into())
    }

    fn spans(&self, backend: &dyn Backend) -> Result<Vec<ArchiveSpan>> {
        let step = self.header.step(backend)?;
        let last_update_time = self.header.last_update_time(backend)?;
        self.archives
            .iter()
            .map(|archive| archive.span(backend, step, last_update_time))
            .collect()
    }

    fn rrd_def(&self, backend: &dyn Backend, path: &Path) -> Result<RrdDef> {
        let mut def = RrdDef::new(
            path,
            self.header.last_update_time(backend)?,
            self.header.step(backend)?,
        );
        def.version = self.header.version(backend)?;
        def.info = self.header.info(backend)?;
        def.datasources = self
            .datasources
            .iter()
            .map(|ds| ds.definition(backend))
            .collect::<Result<_>>()?;
        def.archives = self
            .archives
            .iter()
            .map(|archive| archive.definition(backend))
            .collect::<Result<_>>()?;
        Ok(def)
    }

    fn snapshot(&self, backend: &dyn Backend) -> Result<RrdSnapshot> {
        let datasources = self
            .datasources
            .iter()
            .map(|ds| {
                let state = ds.state(backend)?;
                Ok(DsSnapshot {
                    def: ds.definition(backend)?,
                    last_value: state.last_value,
                    accum_value: state.accum_value,
                    unknown_seconds: state.unknown_seconds,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let archives = self
            .archives
            .iter()
            .map(|archive| {
                let states = (0..self.datasources.len())
                    .map(|ds| {
                        let state = archive.state(ds)?;
                        Ok(ArcStateSnapshot {
                            accum_value: state.accum_value(backend)?,
                            unknown_steps: state.unknown_steps(backend)?,
                            values: archive.robin(ds)?.get_values(backend)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ArchiveSnapshot {
                    def: archive.definition(backend)?,
                    states,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RrdSnapshot {
            version: self.header.version(backend)?,
            step: self.header.step(backend)?,
            last_update_time: self.header.last_update_time(backend)?,
            info: self.header.info(backend)?,
            datasources,
            archives,
        })
    }
}

/// Mutable state guarded by the database lock.
#[derive(Debug)]
struct Inner {
    /// `None` once the database is closed.
    backend: Option<Box<dyn Backend>>,
    layout: Layout,
}

/// An open round-robin database.
///
/// # Thread Safety
///
/// `RrdDb` is `Send + Sync`. Every method takes `&self` and runs under one
/// internal lock, so a database can be shared through an `Arc` with all
/// calls serialized.
#[derive(Debug)]
pub struct RrdDb {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl RrdDb {
    /// Creates a file-backed database from `def`.
    ///
    /// An existing file at the definition's path is overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the definition is invalid, or
    /// [`BackendError`] if the file cannot be created or written.
    pub fn create(def: &RrdDef) -> Result<Self> {
        Self::create_with_factory(def, &FileBackendFactory)
    }

    /// Creates a database from `def` on a backend produced by `factory`.
    ///
    /// The backend is sized to exactly [`RrdDef::estimated_size`] bytes. If
    /// initialization fails the backend is closed before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the definition is invalid, or
    /// [`BackendError`] if the backend cannot be opened or written.
    pub fn create_with_factory(def: &RrdDef, factory: &dyn BackendFactory) -> Result<Self> {
        def.validate()?;
        let mut backend = factory.open(&def.path, false)?;

        match Self::initialize(backend.as_mut(), def) {
            Ok(layout) => {
                tracing::debug!(
                    path = %def.path.display(),
                    backend = factory.name(),
                    datasources = def.datasources.len(),
                    archives = def.archives.len(),
                    size = backend.len(),
                    "created database"
                );
                Ok(Self::from_parts(def.path.clone(), backend, layout))
            }
            Err(e) => {
                close_quietly(backend.as_mut());
                Err(e)
            }
        }
    }

    fn initialize(backend: &mut dyn Backend, def: &RrdDef) -> Result<Layout> {
        let (layout, size) = Layout::allocate(def.datasources.len(), def.archives.len(), |i, _| {
            Ok(def.archives[i].rows)
        })?;
        backend.set_len(size)?;

        layout.header.initialize(backend, def)?;
        for (ds, ds_def) in layout.datasources.iter().zip(&def.datasources) {
            ds.initialize(backend, ds_def, def.start_time, def.step)?;
        }
        for (archive, arc_def) in layout.archives.iter().zip(&def.archives) {
            archive.initialize(backend, arc_def, def.start_time, def.step)?;
        }
        Ok(layout)
    }

    /// Opens an existing file-backed database.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Database`] if the file does not exist, or
    /// [`BackendError`] if it cannot be opened or is not a valid database.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        Self::open_with_factory(path, read_only, &FileBackendFactory)
    }

    /// Opens an existing database on a backend produced by `factory`.
    ///
    /// The header is validated when the factory asks for it; the image must
    /// always be large enough for the layout it describes.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Database`] if the target does not exist, or
    /// [`BackendError`] if it cannot be opened or is not a valid database.
    pub fn open_with_factory<P: AsRef<Path>>(
        path: P,
        read_only: bool,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !factory.exists(path) {
            return Err(LookupError::Database {
                path: path.display().to_string(),
            }
            .into());
        }

        let mut backend = factory.open(path, read_only)?;
        let validate = factory.should_validate_header(path);
        match Self::read_layout(backend.as_ref(), validate) {
            Ok(layout) => {
                tracing::debug!(
                    path = %path.display(),
                    backend = factory.name(),
                    read_only,
                    datasources = layout.datasources.len(),
                    archives = layout.archives.len(),
                    "opened database"
                );
                Ok(Self::from_parts(path.to_path_buf(), backend, layout))
            }
            Err(e) => {
                close_quietly(backend.as_mut());
                Err(e)
            }
        }
    }

    fn read_layout(backend: &dyn Backend, validate: bool) -> Result<Layout> {
        let corrupted = |reason: String| BackendError::Corrupted {
            path: backend.path().display().to_string(),
            reason,
        };

        let image_size = backend.len();
        if image_size < Header::SIZE {
            return Err(corrupted(format!(
                "image is {image_size} bytes, smaller than the header"
            ))
            .into());
        }

        let header = Header::allocate(&mut Allocator::new());
        if validate {
            header.validate(backend)?;
        }

        let ds_count = header.ds_count(backend)?;
        let arc_count = header.arc_count(backend)?;
        let fixed_size = Header::SIZE
            + ds_count as u64 * Datasource::SIZE
            + arc_count as u64 * Archive::SIZE;
        if fixed_size > image_size {
            return Err(corrupted(format!(
                "image is {image_size} bytes, {ds_count} datasources and {arc_count} archives need at least {fixed_size}"
            ))
            .into());
        }

        let (layout, size) = Layout::allocate(ds_count, arc_count, |_, archive| {
            archive.rows(backend)
        })?;
        if size > image_size {
            return Err(corrupted(format!(
                "image is {image_size} bytes, layout needs {size}"
            ))
            .into());
        }

        if validate {
            for ds in &layout.datasources {
                ds.definition(backend)?;
            }
            for archive in &layout.archives {
                archive.validate(backend)?;
            }
        }
        Ok(layout)
    }

    /// Creates a database at `path` whose definition and full state come
    /// from `importer`.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the imported definition is invalid or
    /// its row data does not match the archive sizes, or [`BackendError`] if
    /// the backend cannot be created or written.
    pub fn import<P: AsRef<Path>>(
        path: P,
        importer: &dyn DataImporter,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let def = importer.rrd_def(path.as_ref());
        def.validate()?;

        // Row data is checked before the destination is created.
        let robins = def
            .archives
            .iter()
            .enumerate()
            .map(|(arc_index, arc_def)| {
                (0..def.datasources.len())
                    .map(|ds_index| {
                        let values = importer.robin_values(arc_index, ds_index);
                        if usize::try_from(arc_def.rows).ok() != Some(values.len()) {
                            return Err(DefinitionError::IncompatibleState {
                                reason: format!(
                                    "archive {arc_index}, datasource {ds_index}: {} rows, {} values",
                                    arc_def.rows,
                                    values.len()
                                ),
                            }
                            .into());
                        }
                        Ok(values)
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let db = Self::create_with_factory(&def, factory)?;

        db.write(|layout, backend| {
            for (ds_index, ds) in layout.datasources.iter().enumerate() {
                ds.set_state(
                    backend,
                    DsState {
                        last_value: importer.last_value(ds_index),
                        accum_value: importer.accum_value(ds_index),
                        unknown_seconds: importer.unknown_seconds(ds_index),
                    },
                )?;
            }
            for (arc_index, archive) in layout.archives.iter().enumerate() {
                for ds_index in 0..layout.datasources.len() {
                    archive.state(ds_index)?.set(
                        backend,
                        importer.state_accum_value(arc_index, ds_index),
                        importer.state_unknown_steps(arc_index, ds_index),
                    )?;
                    archive
                        .robin(ds_index)?
                        .update(backend, &robins[arc_index][ds_index])?;
                }
            }
            Ok(())
        })?;

        tracing::debug!(path = %def.path.display(), "imported database");
        Ok(db)
    }

    fn from_parts(path: PathBuf, backend: Box<dyn Backend>, layout: Layout) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner {
                backend: Some(backend),
                layout,
            }),
        }
    }

    fn closed(&self) -> StateError {
        StateError::Closed {
            path: self.path.display().to_string(),
        }
    }

    /// Runs `f` with shared access to the open backend.
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Layout, &dyn Backend) -> Result<T>,
    {
        let inner = self.inner.lock();
        let backend = inner.backend.as_deref().ok_or_else(|| self.closed())?;
        f(&inner.layout, backend)
    }

    /// Runs `f` with exclusive access to the open backend.
    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Layout, &mut dyn Backend) -> Result<T>,
    {
        let mut inner = self.inner.lock();
        let Inner { backend, layout } = &mut *inner;
        let backend = backend.as_deref_mut().ok_or_else(|| self.closed())?;
        f(layout, backend)
    }

    /// Flushes and closes the backend. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the final flush fails; the database is
    /// closed regardless.
    pub fn close(&self) -> Result<()> {
        let backend = self.inner.lock().backend.take();
        if let Some(mut backend) = backend {
            backend.close()?;
            tracing::debug!(path = %self.path.display(), "closed database");
        }
        Ok(())
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().backend.is_none()
    }

    /// Backend path of the database.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Primary step in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn step(&self) -> Result<i64> {
        self.read(|layout, backend| layout.header.step(backend))
    }

    /// Time of the last accepted update.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn last_update_time(&self) -> Result<i64> {
        self.read(|layout, backend| layout.header.last_update_time(backend))
    }

    /// Newest row time over all archives.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn last_archive_update_time(&self) -> Result<i64> {
        self.read(|layout, backend| {
            Ok(layout
                .spans(backend)?
                .iter()
                .map(|span| span.end_time)
                .max()
                .unwrap_or(0))
        })
    }

    /// Number of datasources.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn ds_count(&self) -> Result<usize> {
        self.read(|layout, _| Ok(layout.datasources.len()))
    }

    /// Number of archives.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn arc_count(&self) -> Result<usize> {
        self.read(|layout, _| Ok(layout.archives.len()))
    }

    /// Datasource names, in index order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn ds_names(&self) -> Result<Vec<String>> {
        self.read(|layout, backend| layout.ds_names(backend))
    }

    /// Index of the datasource named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] if there is no such datasource.
    pub fn ds_index(&self, name: &str) -> Result<usize> {
        self.read(|layout, backend| layout.ds_index(backend, name))
    }

    /// Returns `true` if a datasource named `name` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn contains_ds(&self, name: &str) -> Result<bool> {
        Ok(self.ds_names()?.iter().any(|n| n == name))
    }

    /// Index of the archive identified by `(consolidation_fn, steps)`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Archive`] if there is no such archive.
    pub fn arc_index(&self, consolidation_fn: ConsolidationFn, steps: u32) -> Result<usize> {
        self.read(|layout, backend| layout.arc_index(backend, consolidation_fn, steps))
    }

    /// Last raw reading of every datasource.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn last_datasource_values(&self) -> Result<Vec<f64>> {
        self.read(|layout, backend| {
            layout
                .datasources
                .iter()
                .map(|ds| ds.last_value(backend))
                .collect()
        })
    }

    /// Free-form info string from the header.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn info(&self) -> Result<String> {
        self.read(|layout, backend| layout.header.info(backend))
    }

    /// Replaces the info string.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::StringTooLong`] if `info` exceeds the field.
    pub fn set_info(&self, info: &str) -> Result<()> {
        self.write(|layout, backend| layout.header.set_info(backend, info))
    }

    /// Reconstructs the definition of this database. Its start time is the
    /// current last update time.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn rrd_def(&self) -> Result<RrdDef> {
        self.read(|layout, backend| layout.rrd_def(backend, &self.path))
    }

    /// Copy of the raw database image.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.read(|_, backend| backend.read_all())
    }

    /// Structured snapshot of the full state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn snapshot(&self) -> Result<RrdSnapshot> {
        self.read(|layout, backend| layout.snapshot(backend))
    }

    /// Human-readable text dump of the full state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn dump(&self) -> Result<String> {
        Ok(self.snapshot()?.to_string())
    }

    /// Creates an empty sample for this database at `time`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn create_sample(&self, time: i64) -> Result<Sample> {
        Ok(Sample::new(time, self.ds_names()?))
    }

    /// Creates an empty sample for this database at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Closed`] if the database is closed.
    pub fn create_sample_now(&self) -> Result<Sample> {
        self.create_sample(time::now())
    }

    /// Stores a sample.
    ///
    /// Every datasource processes its value in index order; primary values
    /// are forwarded to every archive. The last update time then advances to
    /// the sample time.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NonMonotonicUpdate`] if the sample is not newer
    /// than the last update, [`DefinitionError::SampleSize`] if it has the
    /// wrong number of values, or [`StateError::Closed`] if the database is
    /// closed.
    pub fn update(&self, sample: &Sample) -> Result<()> {
        self.update_values(sample.time(), sample.values())
    }

    /// Stores one value per datasource at `time`.
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    pub fn update_values(&self, time: i64, values: &[f64]) -> Result<()> {
        self.write(|layout, backend| {
            if values.len() != layout.datasources.len() {
                return Err(DefinitionError::SampleSize {
                    expected: layout.datasources.len(),
                    actual: values.len(),
                }
                .into());
            }

            let step = layout.header.step(backend)?;
            let last_update_time = layout.header.last_update_time(backend)?;
            if time <= last_update_time {
                return Err(StateError::NonMonotonicUpdate {
                    time,
                    last_update_time,
                }
                .into());
            }

            for (ds_index, (ds, &value)) in layout.datasources.iter().zip(values).enumerate() {
                let Some(primary) = ds.process(backend, step, last_update_time, time, value)? else {
                    continue;
                };
                for archive in &layout.archives {
                    archive.archive(
                        backend,
                        ds_index,
                        primary.value,
                        primary.num_steps,
                        step,
                        last_update_time,
                    )?;
                }
            }

            layout.header.set_last_update_time(backend, time)
        })
    }

    /// Index of the archive [`fetch`](Self::fetch) would read for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NoArchiveForFunction`] if no archive uses the
    /// requested function.
    pub fn find_matching_archive(&self, request: &FetchRequest) -> Result<usize> {
        self.read(|layout, backend| {
            fetch::find_matching_archive(&layout.spans(backend)?, request).ok_or_else(|| {
                LookupError::NoArchiveForFunction {
                    consolidation_fn: request.consolidation_fn(),
                }
                .into()
            })
        })
    }

    /// Index of the archive covering `start_time` with the row width closest
    /// to `resolution`; see [`fetch::find_start_match_archive`].
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NoArchiveForFunction`] if no archive uses
    /// `consolidation_fn`.
    pub fn find_start_match_archive(
        &self,
        consolidation_fn: ConsolidationFn,
        start_time: i64,
        resolution: i64,
    ) -> Result<usize> {
        self.read(|layout, backend| {
            fetch::find_start_match_archive(
                &layout.spans(backend)?,
                consolidation_fn,
                start_time,
                resolution,
            )
            .ok_or_else(|| LookupError::NoArchiveForFunction { consolidation_fn }.into())
        })
    }

    /// Reads consolidated values from the best matching archive.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NoArchiveForFunction`] if no archive uses the
    /// requested function, [`LookupError::Datasource`] if the filter names an
    /// unknown datasource, or [`StateError::Closed`] if the database is
    /// closed.
    pub fn fetch(&self, request: &FetchRequest) -> Result<FetchData> {
        self.read(|layout, backend| {
            let spans = layout.spans(backend)?;
            let arc_index = fetch::find_matching_archive(&spans, request).ok_or(
                LookupError::NoArchiveForFunction {
                    consolidation_fn: request.consolidation_fn(),
                },
            )?;

            let ds_names = match request.filter() {
                Some(names) => names.to_vec(),
                None => layout.ds_names(backend)?,
            };
            let ds_indices = ds_names
                .iter()
                .map(|name| layout.ds_index(backend, name))
                .collect::<Result<Vec<_>>>()?;

            let step = layout.header.step(backend)?;
            let last_update_time = layout.header.last_update_time(backend)?;
            let window = layout.archives[arc_index].fetch_window(
                backend,
                &ds_indices,
                step,
                last_update_time,
                request.start(),
                request.end(),
            )?;

            let span = spans[arc_index];
            Ok(FetchData::new(
                span.consolidation_fn,
                arc_index,
                span.arc_step,
                span.end_time,
                window.timestamps,
                ds_names,
                window.values,
            ))
        })
    }

    /// Changes the heartbeat of datasource `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] for an unknown datasource or
    /// [`DefinitionError::InvalidHeartbeat`] if `heartbeat < 1`.
    pub fn set_heartbeat(&self, name: &str, heartbeat: i64) -> Result<()> {
        self.write(|layout, backend| {
            let index = layout.ds_index(backend, name)?;
            layout.datasources[index].set_heartbeat(backend, heartbeat)
        })
    }

    /// Renames datasource `old_name` to `new_name`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] for an unknown datasource,
    /// [`DefinitionError::DuplicateDatasource`] if `new_name` is taken, or
    /// [`DefinitionError::InvalidName`] if it is empty or too long.
    pub fn rename_datasource(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.write(|layout, backend| {
            let index = layout.ds_index(backend, old_name)?;
            if old_name != new_name && layout.ds_names(backend)?.iter().any(|n| n == new_name) {
                return Err(DefinitionError::DuplicateDatasource {
                    name: new_name.to_string(),
                }
                .into());
            }
            layout.datasources[index].set_name(backend, new_name)
        })
    }

    /// Changes the type of datasource `name`.
    ///
    /// When the type actually changes, the rate state of the datasource and
    /// the open bucket accumulator of every archive are reset.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] for an unknown datasource.
    pub fn set_ds_type(&self, name: &str, ds_type: DsType) -> Result<()> {
        self.write(|layout, backend| {
            let index = layout.ds_index(backend, name)?;
            let ds = &layout.datasources[index];
            if ds.ds_type(backend)? == ds_type {
                return Ok(());
            }
            ds.set_ds_type(backend, ds_type)?;
            for archive in &layout.archives {
                archive.reset_accumulator(backend, index)?;
            }
            Ok(())
        })
    }

    /// Changes the lower rate bound of datasource `name`.
    ///
    /// With `filter_archived_values`, stored rows below the new bound become
    /// NaN.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] for an unknown datasource or
    /// [`DefinitionError::InvalidMinMax`] if the bound is not below the
    /// current upper bound.
    pub fn set_min_value(
        &self,
        name: &str,
        min_value: Option<f64>,
        filter_archived_values: bool,
    ) -> Result<()> {
        self.set_bounds(name, Bound::Min(min_value), filter_archived_values)
    }

    /// Changes the upper rate bound of datasource `name`.
    ///
    /// With `filter_archived_values`, stored rows above the new bound become
    /// NaN.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] for an unknown datasource or
    /// [`DefinitionError::InvalidMinMax`] if the bound is not above the
    /// current lower bound.
    pub fn set_max_value(
        &self,
        name: &str,
        max_value: Option<f64>,
        filter_archived_values: bool,
    ) -> Result<()> {
        self.set_bounds(name, Bound::Max(max_value), filter_archived_values)
    }

    /// Changes both rate bounds of datasource `name`.
    ///
    /// With `filter_archived_values`, stored rows outside the new bounds
    /// become NaN.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] for an unknown datasource or
    /// [`DefinitionError::InvalidMinMax`] if `min_value >= max_value`.
    pub fn set_min_max(
        &self,
        name: &str,
        min_value: Option<f64>,
        max_value: Option<f64>,
        filter_archived_values: bool,
    ) -> Result<()> {
        self.set_bounds(
            name,
            Bound::Both(min_value, max_value),
            filter_archived_values,
        )
    }

    fn set_bounds(&self, name: &str, bound: Bound, filter: bool) -> Result<()> {
        self.write(|layout, backend| {
            let index = layout.ds_index(backend, name)?;
            let ds = &layout.datasources[index];
            let (min, max, filter_min, filter_max) = match bound {
                Bound::Min(min) => (min, ds.max_value(backend)?, min, None),
                Bound::Max(max) => (ds.min_value(backend)?, max, None, max),
                Bound::Both(min, max) => (min, max, min, max),
            };
            validate_min_max(min, max)?;
            ds.set_min_max(backend, min, max)?;

            if filter {
                for archive in &layout.archives {
                    archive.filter_values(backend, index, filter_min, filter_max)?;
                }
            }
            Ok(())
        })
    }

    /// Changes the force-zeros flag of datasource `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] for an unknown datasource.
    pub fn set_force_zeros(&self, name: &str, force_zeros: bool) -> Result<()> {
        self.write(|layout, backend| {
            let index = layout.ds_index(backend, name)?;
            layout.datasources[index].set_force_zeros(backend, force_zeros)
        })
    }

    /// Changes the xff of the archive identified by `(consolidation_fn, steps)`.
    ///
    /// Rows already stored are not reconsolidated.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Archive`] for an unknown archive or
    /// [`DefinitionError::InvalidXff`] if `xff` is outside `[0, 1)`.
    pub fn set_xff(&self, consolidation_fn: ConsolidationFn, steps: u32, xff: f64) -> Result<()> {
        self.write(|layout, backend| {
            let index = layout.arc_index(backend, consolidation_fn, steps)?;
            layout.archives[index].set_xff(backend, xff)
        })
    }

    /// Copies the live state of this database into `other`.
    ///
    /// Copies the last update time; the state of every datasource matched by
    /// name (types must agree); and, for every archive matched by function
    /// and step count, the open buckets and rows of matched datasources.
    /// Unmatched entries in `other` keep their state.
    ///
    /// Both databases stay locked for the whole copy. The locks are taken in
    /// a fixed order, so `a.copy_state_to(&b)` and `b.copy_state_to(&a)` may
    /// run concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::SamePath`] when copying a database onto
    /// itself, [`DefinitionError::IncompatibleState`] when matched
    /// datasources differ in type, or [`StateError::Closed`] if either
    /// database is closed.
    pub fn copy_state_to(&self, other: &Self) -> Result<()> {
        if std::ptr::eq(self, other) || self.path == other.path {
            return Err(DefinitionError::SamePath {
                path: self.path.display().to_string(),
            }
            .into());
        }

        // Locks are always taken in address order.
        let (source, mut destination) = if std::ptr::from_ref(self) < std::ptr::from_ref(other) {
            let source = self.inner.lock();
            (source, other.inner.lock())
        } else {
            let destination = other.inner.lock();
            (self.inner.lock(), destination)
        };

        let src_layout = &source.layout;
        let src = source.backend.as_deref().ok_or_else(|| self.closed())?;
        let Inner {
            backend: dst_backend,
            layout: dst_layout,
        } = &mut *destination;
        let dst = dst_backend.as_deref_mut().ok_or_else(|| other.closed())?;

        src_layout.header.copy_state_to(src, &dst_layout.header, dst)?;

        let src_names = src_layout.ds_names(src)?;
        let dst_names = dst_layout.ds_names(dst)?;
        let ds_pairs: Vec<(usize, usize)> = src_names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| dst_names.iter().position(|n| n == name).map(|j| (i, j)))
            .collect();

        for &(i, j) in &ds_pairs {
            src_layout.datasources[i].copy_state_to(src, &dst_layout.datasources[j], dst)?;
        }

        for archive in &src_layout.archives {
            let consolidation_fn = archive.consolidation_fn(src)?;
            let steps = archive.steps(src)?;
            match dst_layout.arc_index(dst, consolidation_fn, steps) {
                Ok(j) => archive.copy_state_to(src, &dst_layout.archives[j], dst, &ds_pairs)?,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            source = %self.path.display(),
            destination = %other.path.display(),
            datasources = ds_pairs.len(),
            "copied database state"
        );
        Ok(())
    }
}

impl Drop for RrdDb {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), "failed to close database: {e}");
        }
    }
}

/// Which rate bounds a tuning call changes.
#[derive(Debug, Clone, Copy)]
enum Bound {
    Min(Option<f64>),
    Max(Option<f64>),
    Both(Option<f64>, Option<f64>),
}

/// Closes a backend on an error path, logging a failure instead of
/// replacing the original error.
fn close_quietly(backend: &mut dyn Backend) {
    if let Err(e) = backend.close() {
        tracing::warn!(path = %backend.path().display(), "failed to close backend: {e}");
    }
}
