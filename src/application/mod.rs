//! Application-facing error reporting.

pub mod error;
