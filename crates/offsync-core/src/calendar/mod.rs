//! Recurring calendar series.
//!
//! RRULE helpers and the scoped (`all` / `this` / `following`) series editor.

pub mod rules;
pub mod series;

pub use series::{expand_series, EditMode, EditScope, EventUpdate, SeriesChange, SeriesEditor};
