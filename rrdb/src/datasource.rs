//! Datasources: per-metric definition, live state, and rate computation.
//!
//! A datasource turns raw readings into a rate, integrates that rate over
//! time, and emits one primary data point (PDP) each time an update crosses
//! a primary step boundary. The coordinator forwards every PDP to all
//! archives.
//!
//! Record layout:
//!
//! ```text
//! name[40] type:u32 heartbeat:i64 min:f64 max:f64 forceZeros:u32
//! lastValue:f64 accum:f64 unknownSeconds:i64
//! ```

use crate::allocator::Allocator;
use crate::backend::Backend;
use crate::error::{BackendError, DefinitionError, Result};
use crate::field::{DOUBLE_SIZE, INT_SIZE, LONG_SIZE, RrdDouble, RrdInt, RrdLong, RrdString};
use crate::schema::{
    DsDef, DsType, NAME_CAPACITY, validate_heartbeat, validate_min_max, validate_name,
};
use crate::time::normalize;

/// 2^32, the modulus of a wrapped 32-bit counter.
const MAX_32_BIT: f64 = 4_294_967_296.0;

/// 2^64, the modulus of a wrapped 64-bit counter.
const MAX_64_BIT: f64 = 18_446_744_073_709_551_616.0;

/// A primary data point produced by [`Datasource::process`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryValue {
    /// Average rate over the completed primary interval, or NaN if unknown.
    pub value: f64,
    /// Number of primary steps the interval spans (at least 1).
    pub num_steps: i64,
}

/// Live state of a datasource, as stored between updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DsState {
    /// Last raw reading.
    pub last_value: f64,
    /// Integrated rate of the current primary interval.
    pub accum_value: f64,
    /// Seconds of the current primary interval with unknown rate.
    pub unknown_seconds: i64,
}

/// Field handles of a datasource record.
#[derive(Debug, Clone)]
pub struct Datasource {
    name: RrdString,
    ds_type: RrdInt,
    heartbeat: RrdLong,
    min_value: RrdDouble,
    max_value: RrdDouble,
    force_zeros: RrdInt,
    last_value: RrdDouble,
    accum_value: RrdDouble,
    unknown_seconds: RrdLong,
}

impl Datasource {
    /// Size of a datasource record in bytes.
    pub const SIZE: u64 = NAME_CAPACITY as u64
        + INT_SIZE
        + LONG_SIZE
        + DOUBLE_SIZE
        + DOUBLE_SIZE
        + INT_SIZE
        + DOUBLE_SIZE
        + DOUBLE_SIZE
        + LONG_SIZE;

    /// Reserves the datasource fields.
    pub fn allocate(allocator: &mut Allocator) -> Self {
        Self {
            name: RrdString::allocate(allocator, NAME_CAPACITY),
            ds_type: RrdInt::allocate(allocator),
            heartbeat: RrdLong::allocate(allocator),
            min_value: RrdDouble::allocate(allocator),
            max_value: RrdDouble::allocate(allocator),
            force_zeros: RrdInt::allocate(allocator),
            last_value: RrdDouble::allocate(allocator),
            accum_value: RrdDouble::allocate(allocator),
            unknown_seconds: RrdLong::allocate(allocator),
        }
    }

    /// Writes the definition and initial state.
    ///
    /// The initial unknown time is the part of the first primary interval
    /// that lies before `start_time`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a write fails.
    pub fn initialize(
        &self,
        backend: &mut dyn Backend,
        def: &DsDef,
        start_time: i64,
        step: i64,
    ) -> Result<()> {
        self.name.set(backend, &def.name)?;
        self.ds_type.set(backend, def.ds_type.tag())?;
        self.heartbeat.set(backend, def.heartbeat)?;
        self.min_value.set(backend, def.min_value.unwrap_or(f64::NAN))?;
        self.max_value.set(backend, def.max_value.unwrap_or(f64::NAN))?;
        self.force_zeros.set_flag(backend, def.force_zeros)?;
        self.set_state(
            backend,
            DsState {
                last_value: f64::NAN,
                accum_value: 0.0,
                unknown_seconds: start_time.rem_euclid(step),
            },
        )
    }

    /// Reads the definition back.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupted`] if the stored type tag is unknown.
    pub fn definition(&self, backend: &dyn Backend) -> Result<DsDef> {
        Ok(DsDef {
            name: self.name(backend)?,
            ds_type: self.ds_type(backend)?,
            heartbeat: self.heartbeat(backend)?,
            min_value: self.min_value(backend)?,
            max_value: self.max_value(backend)?,
            force_zeros: self.force_zeros(backend)?,
        })
    }

    /// Datasource name.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn name(&self, backend: &dyn Backend) -> Result<String> {
        self.name.get(backend)
    }

    /// Datasource type.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupted`] if the stored tag is unknown.
    pub fn ds_type(&self, backend: &dyn Backend) -> Result<DsType> {
        let tag = self.ds_type.get(backend)?;
        DsType::from_tag(tag).ok_or_else(|| {
            BackendError::Corrupted {
                path: backend.path().display().to_string(),
                reason: format!("unknown datasource type tag {tag}"),
            }
            .into()
        })
    }

    /// Heartbeat in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn heartbeat(&self, backend: &dyn Backend) -> Result<i64> {
        self.heartbeat.get(backend)
    }

    /// Lower rate bound, `None` if unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn min_value(&self, backend: &dyn Backend) -> Result<Option<f64>> {
        Ok(bound(self.min_value.get(backend)?))
    }

    /// Upper rate bound, `None` if unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn max_value(&self, backend: &dyn Backend) -> Result<Option<f64>> {
        Ok(bound(self.max_value.get(backend)?))
    }

    /// Whether unknown primary values are stored as zero.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn force_zeros(&self, backend: &dyn Backend) -> Result<bool> {
        self.force_zeros.get_flag(backend)
    }

    /// Last raw reading.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the read fails.
    pub fn last_value(&self, backend: &dyn Backend) -> Result<f64> {
        self.last_value.get(backend)
    }

    /// Current live state.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read fails.
    pub fn state(&self, backend: &dyn Backend) -> Result<DsState> {
        Ok(DsState {
            last_value: self.last_value.get(backend)?,
            accum_value: self.accum_value.get(backend)?,
            unknown_seconds: self.unknown_seconds.get(backend)?,
        })
    }

    /// Overwrites the live state.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a write fails.
    pub fn set_state(&self, backend: &mut dyn Backend, state: DsState) -> Result<()> {
        self.last_value.set(backend, state.last_value)?;
        self.accum_value.set(backend, state.accum_value)?;
        self.unknown_seconds.set(backend, state.unknown_seconds)
    }

    /// Renames the datasource. Uniqueness is checked by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the name is empty or too long.
    pub fn set_name(&self, backend: &mut dyn Backend, name: &str) -> Result<()> {
        validate_name(name)?;
        self.name.set(backend, name)
    }

    /// Changes the type and resets the rate state.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a write fails.
    pub fn set_ds_type(&self, backend: &mut dyn Backend, ds_type: DsType) -> Result<()> {
        self.ds_type.set(backend, ds_type.tag())?;
        self.last_value.set(backend, f64::NAN)?;
        self.accum_value.set(backend, 0.0)
    }

    /// Changes the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidHeartbeat`] if `heartbeat < 1`.
    pub fn set_heartbeat(&self, backend: &mut dyn Backend, heartbeat: i64) -> Result<()> {
        validate_heartbeat(heartbeat)?;
        self.heartbeat.set(backend, heartbeat)
    }

    /// Changes both rate bounds.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidMinMax`] if both are set and
    /// `min >= max`.
    pub fn set_min_max(
        &self,
        backend: &mut dyn Backend,
        min_value: Option<f64>,
        max_value: Option<f64>,
    ) -> Result<()> {
        validate_min_max(min_value, max_value)?;
        self.min_value.set(backend, min_value.unwrap_or(f64::NAN))?;
        self.max_value.set(backend, max_value.unwrap_or(f64::NAN))
    }

    /// Changes the force-zeros flag.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write fails.
    pub fn set_force_zeros(&self, backend: &mut dyn Backend, force_zeros: bool) -> Result<()> {
        self.force_zeros.set_flag(backend, force_zeros)
    }

    /// Folds a new reading into the datasource.
    ///
    /// `old_time` is the database's last update time and `new_time` the
    /// sample time (`new_time > old_time`). Returns the primary value when
    /// the update reaches or crosses a step boundary.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a read or write fails.
    pub fn process(
        &self,
        backend: &mut dyn Backend,
        step: i64,
        old_time: i64,
        new_time: i64,
        new_value: f64,
    ) -> Result<Option<PrimaryValue>> {
        let def = self.definition(backend)?;
        let mut state = self.state(backend)?;

        let rate = if new_time - old_time > def.heartbeat {
            f64::NAN
        } else {
            let rate = compute_rate(def.ds_type, old_time, state.last_value, new_time, new_value);
            clamp_to_bounds(rate, def.min_value, def.max_value)
        };
        state.last_value = new_value;

        let start_time = normalize(old_time, step);
        let end_time = start_time + step;

        if new_time < end_time {
            accumulate(&mut state, old_time, new_time, rate);
            self.set_state(backend, state)?;
            return Ok(None);
        }

        let boundary_time = normalize(new_time, step);
        accumulate(&mut state, old_time, boundary_time, rate);

        let mut value = primary_value(&state, boundary_time - start_time, def.heartbeat);
        if value.is_nan() && def.force_zeros {
            value = 0.0;
        }
        let num_steps = (boundary_time - end_time) / step + 1;

        state.accum_value = 0.0;
        state.unknown_seconds = 0;
        accumulate(&mut state, boundary_time, new_time, rate);
        self.set_state(backend, state)?;

        Ok(Some(PrimaryValue { value, num_steps }))
    }

    /// Copies the live state into a datasource of the same type.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::IncompatibleState`] if the types differ, or
    /// [`BackendError`] if a read or write fails.
    pub fn copy_state_to(
        &self,
        backend: &dyn Backend,
        other: &Self,
        other_backend: &mut dyn Backend,
    ) -> Result<()> {
        let ds_type = self.ds_type(backend)?;
        let other_type = other.ds_type(other_backend)?;
        if ds_type != other_type {
            return Err(DefinitionError::IncompatibleState {
                reason: format!(
                    "datasource '{}' is {ds_type} in the source and {other_type} in the destination",
                    self.name(backend)?
                ),
            }
            .into());
        }
        other.set_state(other_backend, self.state(backend)?)
    }
}

/// Maps a stored bound to an optional one; NaN means unbounded.
fn bound(value: f64) -> Option<f64> {
    if value.is_nan() { None } else { Some(value) }
}

/// Converts a reading into a rate according to the datasource type.
///
/// Returns NaN when the rate cannot be determined, for example on the first
/// update of a counter or when a counter decreases by more than a wrap.
#[allow(clippy::cast_precision_loss)] // time deltas are far below 2^52 seconds
pub fn compute_rate(
    ds_type: DsType,
    old_time: i64,
    old_value: f64,
    new_time: i64,
    new_value: f64,
) -> f64 {
    let elapsed = (new_time - old_time) as f64;
    match ds_type {
        DsType::Gauge => new_value,
        DsType::Counter => {
            if new_value.is_nan() || old_value.is_nan() {
                return f64::NAN;
            }
            let mut diff = new_value - old_value;
            if diff < 0.0 {
                diff += MAX_32_BIT;
            }
            if diff < 0.0 {
                diff += MAX_64_BIT - MAX_32_BIT;
            }
            if diff >= 0.0 { diff / elapsed } else { f64::NAN }
        }
        DsType::Derive => {
            if new_value.is_nan() || old_value.is_nan() {
                return f64::NAN;
            }
            (new_value - old_value) / elapsed
        }
        DsType::Absolute => new_value / elapsed,
    }
}

/// Replaces a rate outside `[min, max]` with NaN.
fn clamp_to_bounds(rate: f64, min: Option<f64>, max: Option<f64>) -> f64 {
    let below = min.is_some_and(|min| rate < min);
    let above = max.is_some_and(|max| rate > max);
    if below || above { f64::NAN } else { rate }
}

/// Integrates `rate` over `[from, to)`.
#[allow(clippy::cast_precision_loss)]
fn accumulate(state: &mut DsState, from: i64, to: i64, rate: f64) {
    let seconds = to - from;
    if rate.is_nan() {
        state.unknown_seconds += seconds;
    } else {
        state.accum_value += rate * seconds as f64;
    }
}

/// Average rate over an interval of `interval` seconds.
#[allow(clippy::cast_precision_loss)]
fn primary_value(state: &DsState, interval: i64, heartbeat: i64) -> f64 {
    let valid_seconds = interval - state.unknown_seconds;
    if state.unknown_seconds <= heartbeat && valid_seconds > 0 {
        state.accum_value / valid_seconds as f64
    } else {
        f64::NAN
    }
}
