//! The response surface over a live WebDriver page.

use crate::surface::{ResponseEvent, ResponseSurface};
use async_trait::async_trait;
use serde_json::{json, Value};
use sibyl_common::{Result, SibylError};
use sibyl_drivers::{SibylElement, SibylPage};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Grows the resource timing buffer to `arguments[0]` entries and returns how
/// many are already recorded, so a new subscription skips page-load traffic.
const SUBSCRIBE_SCRIPT: &str = r#"
    performance.setResourceTimingBufferSize(arguments[0]);
    return performance.getEntriesByType('resource').length;
"#;

/// Returns resource entries recorded since `arguments[0]`, plus the new
/// cursor. Once `arguments[1]` entries are buffered the buffer is cleared and
/// the cursor restarts at zero.
const RESOURCE_ENTRIES_SCRIPT: &str = r#"
    const all = performance.getEntriesByType('resource');
    const from = arguments[0] <= all.length ? arguments[0] : 0;
    const names = all.slice(from).map(e => e.name);
    if (all.length >= arguments[1]) {
        performance.clearResourceTimings();
        return { total: 0, names };
    }
    return { total: all.length, names };
"#;

const RESOURCE_BUFFER_SIZE: u64 = 1000;
const CLEAR_AT: u64 = RESOURCE_BUFFER_SIZE / 2;

const MAX_POLL_FAILURES: u32 = 3;

/// [`ResponseSurface`] over a live WebDriver page.
///
/// The region is the last element matching `region_selector`. Response events
/// come from polling the page's resource timing buffer, since WebDriver
/// classic exposes no network feed. Resource timing records a fetch when its
/// response has completed, so an event marks the end of a fetch, never its
/// start.
pub struct FantocciniSurface {
    page: SibylPage,
    region_selector: String,
    poll_every: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl FantocciniSurface {
    pub fn new(page: SibylPage, region_selector: impl Into<String>) -> Self {
        Self {
            page,
            region_selector: region_selector.into(),
            poll_every: Duration::from_millis(250),
            poller: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_every = every;
        self
    }

    async fn region(&self) -> Result<SibylElement> {
        match self.page.last(&self.region_selector).await {
            Ok(Some(el)) => Ok(el),
            Ok(None) => Err(SibylError::RegionNotFound(self.region_selector.clone())),
            Err(e) => Err(SibylError::RegionNotFound(format!(
                "{}: {e:#}",
                self.region_selector
            ))),
        }
    }

    fn abort_poller(&self) {
        if let Ok(mut slot) = self.poller.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl ResponseSurface for FantocciniSurface {
    async fn locate_region(&self, timeout: Duration) -> Result<()> {
        tracing::info!(
            target: "browser.surface",
            selector = %self.region_selector,
            timeout_s = timeout.as_secs(),
            "waiting for response region"
        );
        self.page
            .wait_for(&self.region_selector, timeout)
            .await
            .map(|_| ())
            .map_err(|e| SibylError::RegionNotFound(format!("{}: {e:#}", self.region_selector)))
    }

    async fn region_text(&self) -> Result<String> {
        let el = self.region().await?;
        el.inner_text()
            .await
            .map_err(|e| SibylError::RegionNotFound(format!("reading text: {e:#}")))
    }

    async fn region_markup(&self) -> Result<String> {
        let el = self.region().await?;
        el.inner_html()
            .await
            .map_err(|e| SibylError::RegionNotFound(format!("reading markup: {e:#}")))
    }

    async fn subscribe_responses(&self) -> Result<mpsc::Receiver<ResponseEvent>> {
        self.abort_poller();
        let recorded = self
            .page
            .execute(SUBSCRIBE_SCRIPT, vec![json!(RESOURCE_BUFFER_SIZE)])
            .await
            .map_err(|e| SibylError::Driver(e.context("subscribing to resource timing")))?;
        let (tx, rx) = mpsc::channel(64);
        let page = self.page.clone();
        let every = self.poll_every;

        let handle = tokio::spawn(async move {
            let mut cursor = recorded.as_u64().unwrap_or(0);
            let mut failures = 0u32;
            loop {
                match page.execute(RESOURCE_ENTRIES_SCRIPT, vec![json!(cursor), json!(CLEAR_AT)]).await {
                    Ok(batch) => {
                        failures = 0;
                        let (total, names) = parse_batch(&batch);
                        cursor = total;
                        for url in names {
                            if tx.send(ResponseEvent { url }).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::debug!(target: "browser.surface", error = %e, failures, "resource poll failed");
                        if failures >= MAX_POLL_FAILURES {
                            return;
                        }
                    }
                }
                tokio::time::sleep(every).await;
            }
        });

        if let Ok(mut slot) = self.poller.lock() {
            *slot = Some(handle);
        }
        Ok(rx)
    }

    fn unsubscribe_responses(&self) {
        self.abort_poller();
    }
}

impl Drop for FantocciniSurface {
    fn drop(&mut self) {
        self.abort_poller();
    }
}

fn parse_batch(batch: &Value) -> (u64, Vec<String>) {
    let total = batch.get("total").and_then(Value::as_u64).unwrap_or(0);
    let names = batch
        .get("names")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    (total, names)
}

#[cfg(test)]
mod tests {
    use super::parse_batch;
    use serde_json::json;

    #[test]
    fn parses_resource_batches() {
        let batch = json!({ "total": 3, "names": ["https://a/async/folsrch", 7, "https://b"] });
        let (total, names) = parse_batch(&batch);
        assert_eq!(total, 3);
        assert_eq!(names, vec!["https://a/async/folsrch", "https://b"]);

        assert_eq!(parse_batch(&json!(null)), (0, Vec::new()));
    }
}
