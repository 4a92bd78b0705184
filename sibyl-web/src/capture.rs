use crate::browser::FantocciniSurface;
use crate::completion::{Completion, CompletionDetector};
use crate::extract::Extractor;
use crate::surface::ResponseSurface;
use anyhow::Context;
use sibyl_common::{Result, SibylError};
use sibyl_drivers::SibylPage;
use std::time::Duration;
use url::form_urlencoded;

/// Returned when neither the markup nor the text of the region can be read.
pub const EXTRACTION_FAILED: &str = "Error: Could not extract response.";
pub const NEW_CHAT_STARTED: &str = "New chat started successfully.";
pub const NEW_CHAT_TIMED_OUT: &str = "Error: Timed out trying to start a new chat.";

const NEUTRAL_QUERY: &str = "start new chat";
const CONSENT_WAIT: Duration = Duration::from_secs(5);
const NEW_CHAT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Search URL with a `{query}` placeholder.
    pub url_template: String,
    pub region_selector: String,
    pub new_chat_selector: String,
    pub input_selector: String,
    pub consent_button_text: Option<String>,
    pub navigation_timeout: Duration,
    pub locate_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            url_template: "https://google.com/search?q={query}&udm=50".to_string(),
            region_selector: r#"div[data-subtree="aimc"]"#.to_string(),
            new_chat_selector: r#"button[aria-label="Start new search"]"#.to_string(),
            input_selector: r#"textarea[placeholder="Ask anything"]"#.to_string(),
            consent_button_text: Some("Accept all".to_string()),
            navigation_timeout: Duration::from_secs(60),
            locate_timeout: Duration::from_secs(90),
        }
    }
}

/// Substitute the form-encoded `query` into `template`.
pub fn search_url(template: &str, query: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
    template.replace("{query}", &encoded)
}

/// Read the settled region: structured markup first, then plain text, then
/// the fixed failure message. Never fails.
pub async fn read_answer(surface: &dyn ResponseSurface, extractor: &Extractor) -> String {
    match surface.region_markup().await {
        Ok(markup) => {
            let text = extractor.extract(&markup);
            if !text.trim().is_empty() {
                return text;
            }
            tracing::warn!(target: "capture", "region markup produced no text; reading plain text");
        }
        Err(e) => {
            tracing::error!(target: "capture", error = %e, "failed to read region markup; reading plain text");
        }
    }

    match surface.region_text().await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            tracing::error!(target: "capture", "region is empty");
            EXTRACTION_FAILED.to_string()
        }
        Err(e) => {
            tracing::error!(target: "capture", error = %e, "fallback text extraction failed");
            EXTRACTION_FAILED.to_string()
        }
    }
}

/// Single-shot answer capture on an open browser page.
pub struct AnswerCapture {
    page: SibylPage,
    settings: CaptureSettings,
    extractor: Extractor,
    detector: CompletionDetector,
}

impl AnswerCapture {
    pub fn new(
        page: SibylPage,
        settings: CaptureSettings,
        extractor: Extractor,
        detector: CompletionDetector,
    ) -> Self {
        Self {
            page,
            settings,
            extractor,
            detector,
        }
    }

    /// Ask `query`, wait for the answer to finish streaming and return it as text.
    ///
    /// Navigation failures and a response region that never appears are errors;
    /// a slow answer is returned as-is with a warning.
    pub async fn search(&self, query: &str) -> Result<String> {
        let url = search_url(&self.settings.url_template, query);
        self.open(&url).await?;

        let surface = FantocciniSurface::new(self.page.clone(), &self.settings.region_selector);
        let completion = self.detector.await_completion(&surface).await?;
        if let Completion::TimedOut { elapsed, .. } = completion {
            tracing::warn!(target: "capture", elapsed_s = elapsed.as_secs(), "extracting a possibly incomplete answer");
        }

        tracing::info!(target: "capture", "extracting the latest response");
        Ok(read_answer(&surface, &self.extractor).await)
    }

    /// Reset the conversation so the next search starts fresh.
    ///
    /// A page that never shows the new-chat button is an error; a button that
    /// does not lead to an input box yields [`NEW_CHAT_TIMED_OUT`].
    pub async fn new_chat(&self) -> Result<String> {
        let url = search_url(&self.settings.url_template, NEUTRAL_QUERY);
        self.open(&url).await?;

        tracing::info!(target: "capture", timeout_s = self.settings.locate_timeout.as_secs(), "waiting for the page to load");
        self.page
            .wait_for(&self.settings.new_chat_selector, self.settings.locate_timeout)
            .await
            .map_err(|e| SibylError::Timeout(format!("new chat button: {e:#}")))?;

        match self.click_new_chat().await {
            Ok(()) => {
                tracing::info!(target: "capture", "started a new chat session");
                Ok(NEW_CHAT_STARTED.to_string())
            }
            Err(e) => {
                tracing::warn!(target: "capture", error = %format!("{e:#}"), "new chat did not open");
                Ok(NEW_CHAT_TIMED_OUT.to_string())
            }
        }
    }

    async fn click_new_chat(&self) -> anyhow::Result<()> {
        self.page
            .wait_for(&self.settings.new_chat_selector, NEW_CHAT_STEP_TIMEOUT)
            .await?
            .click()
            .await
            .context("clicking new chat")?;
        self.page
            .wait_for(&self.settings.input_selector, NEW_CHAT_STEP_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn open(&self, url: &str) -> Result<()> {
        tracing::info!(target: "capture", %url, "navigating");
        self.page
            .goto_within(url, self.settings.navigation_timeout)
            .await?;
        self.dismiss_consent().await;
        Ok(())
    }

    /// Best effort: a missing banner or a failed click is only logged.
    async fn dismiss_consent(&self) {
        let Some(label) = self.settings.consent_button_text.as_deref() else {
            return;
        };
        let deadline = tokio::time::Instant::now() + CONSENT_WAIT;
        loop {
            match self.page.click_button_with_text(label).await {
                Ok(true) => {
                    tracing::info!(target: "capture", %label, "accepted consent banner");
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(target: "capture", error = %format!("{e:#}"), "consent click failed");
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::info!(target: "capture", "no consent banner found");
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::search_url;

    #[test]
    fn queries_are_form_encoded() {
        let template = "https://google.com/search?q={query}&udm=50";
        assert_eq!(
            search_url(template, "rust async & tokio?"),
            "https://google.com/search?q=rust+async+%26+tokio%3F&udm=50"
        );
        assert_eq!(
            search_url(template, "start new chat"),
            "https://google.com/search?q=start+new+chat&udm=50"
        );
    }
}
