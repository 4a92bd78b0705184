//! The live-page capability the completion detector watches.

use async_trait::async_trait;
use sibyl_common::Result;
use std::time::Duration;
use tokio::sync::mpsc;

/// A completed network response observed by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEvent {
    pub url: String,
}

impl ResponseEvent {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Read access to the most recent response region of a page, plus a feed of
/// network responses.
///
/// Implementations report a missing or unreadable region as
/// [`sibyl_common::SibylError::RegionNotFound`].
#[async_trait]
pub trait ResponseSurface: Send + Sync {
    /// Wait until at least one response region exists.
    async fn locate_region(&self, timeout: Duration) -> Result<()>;

    /// Visible text of the last response region.
    async fn region_text(&self) -> Result<String>;

    /// Inner markup of the last response region.
    async fn region_markup(&self) -> Result<String>;

    /// Start delivering response events. An event is delivered once its
    /// response has completed; responses completed before the call are not
    /// delivered.
    async fn subscribe_responses(&self) -> Result<mpsc::Receiver<ResponseEvent>>;

    /// Stop delivering response events. Safe to call more than once.
    fn unsubscribe_responses(&self);
}
