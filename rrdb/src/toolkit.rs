//! Structural maintenance: edits that change the layout of a database.
//!
//! The layout of an image is fixed at creation, so adding or removing
//! datasources and archives, or resizing an archive, is done by building a
//! new database. Every operation here opens the source read-only, derives
//! its definition, applies the edit, creates the destination from the
//! edited definition, and copies the live state across with
//! [`RrdDb::copy_state_to`]. The source is never modified.
//!
//! Datasources are matched by name and archives by function and step count,
//! so anything that survives the edit keeps its history; new entries start
//! empty.

use std::path::{Path, PathBuf};

use crate::backend::BackendFactory;
use crate::db::RrdDb;
use crate::error::{DefinitionError, Result};
use crate::schema::{ArcDef, ConsolidationFn, DsDef, RrdDef};

/// Smallest row count an archive can be resized to.
pub const MIN_RESIZE_ROWS: u32 = 2;

/// Copies `source` to `destination` with `datasources` appended.
///
/// # Errors
///
/// Returns [`DefinitionError::SamePath`] if both paths are the same,
/// [`DefinitionError::DuplicateDatasource`] if a name is already taken, or
/// any error from opening, creating, or copying the databases.
pub fn add_datasources(
    source: &Path,
    destination: &Path,
    datasources: &[DsDef],
    factory: &dyn BackendFactory,
) -> Result<()> {
    rebuild(source, destination, factory, "add datasources", |def| {
        for ds in datasources {
            def.add_datasource(ds.clone())?;
        }
        Ok(true)
    })
}

/// Copies `source` to `destination` without datasource `name`.
///
/// # Errors
///
/// Returns [`DefinitionError::SamePath`] if both paths are the same,
/// [`LookupError::Datasource`](crate::error::LookupError::Datasource) if
/// there is no such datasource, [`DefinitionError::NoDatasources`] if it is
/// the last one, or any error from opening, creating, or copying the
/// databases.
pub fn remove_datasource(
    source: &Path,
    destination: &Path,
    name: &str,
    factory: &dyn BackendFactory,
) -> Result<()> {
    rebuild(source, destination, factory, "remove datasource", |def| {
        def.remove_datasource(name)?;
        Ok(true)
    })
}

/// Copies `source` to `destination` with `archive` appended.
///
/// # Errors
///
/// Returns [`DefinitionError::SamePath`] if both paths are the same,
/// [`DefinitionError::DuplicateArchive`] if the archive already exists, or
/// any error from opening, creating, or copying the databases.
pub fn add_archive(
    source: &Path,
    destination: &Path,
    archive: ArcDef,
    factory: &dyn BackendFactory,
) -> Result<()> {
    rebuild(source, destination, factory, "add archive", |def| {
        def.add_archive(archive)?;
        Ok(true)
    })
}

/// Copies `source` to `destination` without the archive identified by
/// `(consolidation_fn, steps)`.
///
/// # Errors
///
/// Returns [`DefinitionError::SamePath`] if both paths are the same,
/// [`LookupError::Archive`](crate::error::LookupError::Archive) if there is
/// no such archive, [`DefinitionError::NoArchives`] if it is the last one,
/// or any error from opening, creating, or copying the databases.
pub fn remove_archive(
    source: &Path,
    destination: &Path,
    consolidation_fn: ConsolidationFn,
    steps: u32,
    factory: &dyn BackendFactory,
) -> Result<()> {
    rebuild(source, destination, factory, "remove archive", |def| {
        def.remove_archive(consolidation_fn, steps)?;
        Ok(true)
    })
}

/// Copies `source` to `destination` with the archive identified by
/// `(consolidation_fn, steps)` resized to `rows`.
///
/// Shrinking keeps the newest rows; growing pads the oldest end with NaN.
/// When the archive already has `rows` rows nothing is written.
///
/// # Errors
///
/// Returns [`DefinitionError::SamePath`] if both paths are the same,
/// [`DefinitionError::InvalidRows`] if `rows` is below
/// [`MIN_RESIZE_ROWS`], [`LookupError::Archive`](crate::error::LookupError::Archive)
/// if there is no such archive, or any error from opening, creating, or
/// copying the databases.
pub fn resize_archive(
    source: &Path,
    destination: &Path,
    consolidation_fn: ConsolidationFn,
    steps: u32,
    rows: u32,
    factory: &dyn BackendFactory,
) -> Result<()> {
    if rows < MIN_RESIZE_ROWS {
        return Err(DefinitionError::InvalidRows {
            rows,
            minimum: MIN_RESIZE_ROWS,
        }
        .into());
    }
    rebuild(source, destination, factory, "resize archive", |def| {
        let archive = def.find_archive_mut(consolidation_fn, steps)?;
        if archive.rows == rows {
            return Ok(false);
        }
        archive.rows = rows;
        Ok(true)
    })
}

/// Splits `source` into one database per datasource.
///
/// Each output is named `<datasource>-<file name>` and placed next to the
/// source; existing files with those names are overwritten. Returns the
/// output paths in datasource order.
///
/// # Errors
///
/// Returns any error from opening, creating, or copying the databases.
pub fn split(source: &Path, factory: &dyn BackendFactory) -> Result<Vec<PathBuf>> {
    let src = RrdDb::open_with_factory(source, true, factory)?;
    let result = split_open(&src, factory);
    let closed = src.close();
    let outputs = result?;
    closed?;
    Ok(outputs)
}

fn split_open(src: &RrdDb, factory: &dyn BackendFactory) -> Result<Vec<PathBuf>> {
    let mut outputs = Vec::new();
    for name in src.ds_names()? {
        let mut def = src.rrd_def()?;
        def.retain_datasource(&name)?;
        def.path = split_path(src.path(), &name);
        copy_into(src, &def, factory)?;
        outputs.push(def.path);
    }

    tracing::debug!(
        source = %src.path().display(),
        outputs = outputs.len(),
        "split database"
    );
    Ok(outputs)
}

/// `<dir>/<ds>-<file name>` for a source at `<dir>/<file name>`.
fn split_path(source: &Path, ds_name: &str) -> PathBuf {
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{ds_name}-{file_name}"))
}

/// Opens `source`, lets `edit` change its definition, and materializes the
/// result at `destination`. `edit` returns `false` when there is nothing to
/// change.
fn rebuild<F>(
    source: &Path,
    destination: &Path,
    factory: &dyn BackendFactory,
    operation: &'static str,
    edit: F,
) -> Result<()>
where
    F: FnOnce(&mut RrdDef) -> Result<bool>,
{
    if same_path(source, destination) {
        return Err(DefinitionError::SamePath {
            path: source.display().to_string(),
        }
        .into());
    }

    let src = RrdDb::open_with_factory(source, true, factory)?;
    let result = src.rrd_def().and_then(|mut def| {
        if !edit(&mut def)? {
            tracing::debug!(source = %source.display(), operation, "nothing to change");
            return Ok(());
        }
        def.path = destination.to_path_buf();
        copy_into(&src, &def, factory)?;
        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            operation,
            datasources = def.datasources.len(),
            archives = def.archives.len(),
            "rebuilt database"
        );
        Ok(())
    });

    let closed = src.close();
    result?;
    closed
}

/// Creates a database from `def` and copies the state of `src` into it.
fn copy_into(src: &RrdDb, def: &RrdDef, factory: &dyn BackendFactory) -> Result<()> {
    let dest = RrdDb::create_with_factory(def, factory)?;
    let copied = src.copy_state_to(&dest);
    let closed = dest.close();
    copied?;
    closed
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
