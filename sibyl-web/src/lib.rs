//! Answer capture from a streaming AI search page.
//!
//! - Response surface trait and WebDriver-backed implementation (`surface`, `browser`)
//! - Completion detection over DOM growth or network activity (`completion`)
//! - Markup to Markdown-flavoured text (`extract`)
//! - The end-to-end single query flow (`capture`)

pub mod browser;
pub mod capture;
pub mod completion;
pub mod extract;
pub mod surface;

pub use capture::{AnswerCapture, CaptureSettings, EXTRACTION_FAILED};
pub use completion::{Completion, CompletionDetector, CompletionOptions, Strategy};
pub use extract::{extract, Extractor, ExtractorProfile};
pub use surface::{ResponseEvent, ResponseSurface};
