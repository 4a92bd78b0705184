//! Autonomous research over a search tool.
//!
//! - [`gateway`]: the out-of-process search tool and its failure diagnostics
//! - [`research`]: the tool-calling loop and report synthesis

pub mod gateway;
pub mod research;

pub use gateway::{ProcessGateway, SearchTool};
pub use research::{ResearchAgent, ResearchEntry, ResearchProgress};
