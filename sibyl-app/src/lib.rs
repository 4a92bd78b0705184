//! Shared plumbing for the `sibyl` and `sibyl-search` binaries.

pub mod history;
pub mod wiring;
