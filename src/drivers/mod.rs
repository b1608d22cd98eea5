//! Hardware driver layer (spec §4.1, component C1).
//!
//! The teacher keeps one `DriverError` per bus family and folds every
//! concrete driver's error into it with `From`; this core only ever drives
//! one class of card, so [`net::DriverError`] plays that role directly.

pub mod net;
