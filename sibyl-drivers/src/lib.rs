//! Driver layer for browser automation.
//!
//! This crate wraps a WebDriver session with the handful of page and element
//! helpers the answer capture flow needs.
//!
//! - [`sibyl_browser::driver::SibylDriver`]: WebDriver client wrapper
//! - [`sibyl_browser::page::SibylPage`]: navigation, waits and DOM queries
//! - [`sibyl_browser::pacing::Pacing`]: randomized delays between interactions
pub mod sibyl_browser;

pub use sibyl_browser::driver::{DriverOptions, SibylDriver};
pub use sibyl_browser::page::{SibylElement, SibylPage};
