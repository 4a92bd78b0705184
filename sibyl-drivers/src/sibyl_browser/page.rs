use crate::sibyl_browser::pacing::Pacing;
use anyhow::{Context, Result};
use fantoccini::{elements::Element, Client, Locator};
use serde_json::Value;
use std::time::Duration;

/// Page handle providing navigation, waits and element queries.
#[derive(Clone)]
pub struct SibylPage {
    pub(crate) client: Client,
    pub(crate) pacing: Pacing,
}

impl SibylPage {
    pub fn new(client: Client, pacing: Pacing) -> Self {
        Self { client, pacing }
    }

    /// Navigate to `url`.
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.pacing.random_delay(300, 1200).await;
        self.client
            .goto(url)
            .await
            .with_context(|| format!("navigating to {url}"))?;
        Ok(())
    }

    /// Navigate to `url`, giving up after `timeout`.
    pub async fn goto_within(&self, url: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.goto(url))
            .await
            .with_context(|| format!("navigation to {url} exceeded {}s", timeout.as_secs()))?
    }

    /// Wait up to `timeout` for an element matching `selector`.
    pub async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<SibylElement> {
        let element = self
            .client
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css(selector))
            .await
            .with_context(|| format!("waiting for `{selector}`"))?;
        Ok(SibylElement::new(element, self.pacing))
    }

    /// Find zero or more elements by CSS selector.
    pub async fn find_all(&self, selector: &str) -> Result<Vec<SibylElement>> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        Ok(elements
            .into_iter()
            .map(|element| SibylElement::new(element, self.pacing))
            .collect())
    }

    /// The last element in document order matching `selector`, if any.
    pub async fn last(&self, selector: &str) -> Result<Option<SibylElement>> {
        Ok(self.find_all(selector).await?.pop())
    }

    /// Click the first button whose visible text contains `text`.
    ///
    /// Returns `false` when no such button exists.
    pub async fn click_button_with_text(&self, text: &str) -> Result<bool> {
        let xpath = format!("//button[contains(normalize-space(.), {})]", xpath_literal(text));
        let buttons = self.client.find_all(Locator::XPath(&xpath)).await?;
        let Some(button) = buttons.into_iter().next() else {
            return Ok(false);
        };
        SibylElement::new(button, self.pacing).click().await?;
        Ok(true)
    }

    /// Run a synchronous script in the page and return its JSON result.
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.client
            .execute(script, args)
            .await
            .map_err(anyhow::Error::from)
    }
}

/// Quote `s` as an XPath 1.0 string literal.
fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        return format!("'{s}'");
    }
    if !s.contains('"') {
        return format!("\"{s}\"");
    }
    let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// Wrapper for DOM elements consistent with [`SibylPage`].
#[derive(Clone)]
pub struct SibylElement {
    pub element: Element,
    pacing: Pacing,
}

impl SibylElement {
    pub fn new(element: Element, pacing: Pacing) -> Self {
        Self { element, pacing }
    }

    pub async fn click(&self) -> Result<()> {
        self.pacing.random_delay(100, 400).await;
        self.element.click().await.map_err(anyhow::Error::from)
    }

    /// Return the element's inner HTML.
    pub async fn inner_html(&self) -> Result<String> {
        self.element.html(true).await.map_err(anyhow::Error::from)
    }

    /// Return the element's visible text.
    pub async fn inner_text(&self) -> Result<String> {
        self.element.text().await.map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::xpath_literal;

    #[test]
    fn quotes_xpath_literals() {
        assert_eq!(xpath_literal("Accept all"), "'Accept all'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }
}
