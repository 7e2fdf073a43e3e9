//! Small standalone utilities shared across the core.
//!
//! Everything in this module is a leaf: no dependency on any other
//! `crate::` module beyond `errors`. Larger, stateful concerns (retry,
//! circuit breaking, rate limiting) live in [`crate::resilience`] instead.

pub mod atomic_write;
pub mod sqlite;

pub use atomic_write::atomic_write;
pub use sqlite::{format_datetime_for_sqlite, SqliteRowExt};
