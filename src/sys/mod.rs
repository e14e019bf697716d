//! OS-specific readiness selector backends.
//!
//! Each supported platform exposes the same surface: a `Selector` with
//! `register`/`reregister`/`deregister`/`select`, an `Event`/`Events` pair
//! and an `event` module to interpret raw events. The loop is written
//! against this surface only.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub(crate) use self::unix::*;
