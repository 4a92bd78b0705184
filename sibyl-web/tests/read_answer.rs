use async_trait::async_trait;
use sibyl_common::{Result, SibylError};
use sibyl_web::capture::read_answer;
use sibyl_web::{Extractor, ResponseEvent, ResponseSurface, EXTRACTION_FAILED};
use std::time::Duration;
use tokio::sync::mpsc;

/// Surface with a fixed region; `None` makes the corresponding read fail.
struct FixedRegion {
    markup: Option<&'static str>,
    text: Option<&'static str>,
}

#[async_trait]
impl ResponseSurface for FixedRegion {
    async fn locate_region(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn region_text(&self) -> Result<String> {
        self.text
            .map(str::to_string)
            .ok_or_else(|| SibylError::RegionNotFound("stale element".into()))
    }

    async fn region_markup(&self) -> Result<String> {
        self.markup
            .map(str::to_string)
            .ok_or_else(|| SibylError::RegionNotFound("stale element".into()))
    }

    async fn subscribe_responses(&self) -> Result<mpsc::Receiver<ResponseEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    fn unsubscribe_responses(&self) {}
}

#[tokio::test]
async fn structured_markup_wins() {
    let surface = FixedRegion {
        markup: Some(r#"<div class="otQkpb">Answer</div><div class="Y3BBE">It is <b>42</b>.</div>"#),
        text: Some("Answer It is 42."),
    };
    let out = read_answer(&surface, &Extractor::default()).await;
    assert_eq!(out, "### Answer\n\nIt is **42**.");
}

#[tokio::test]
async fn unreadable_markup_falls_back_to_region_text() {
    let surface = FixedRegion {
        markup: None,
        text: Some("  plain answer \n"),
    };
    let out = read_answer(&surface, &Extractor::default()).await;
    assert_eq!(out, "plain answer");
}

#[tokio::test]
async fn empty_markup_falls_back_to_region_text() {
    let surface = FixedRegion {
        markup: Some("<div></div>"),
        text: Some("rendered by the browser"),
    };
    let out = read_answer(&surface, &Extractor::default()).await;
    assert_eq!(out, "rendered by the browser");
}

#[tokio::test]
async fn nothing_readable_yields_failure_message() {
    let surface = FixedRegion {
        markup: None,
        text: None,
    };
    assert_eq!(
        read_answer(&surface, &Extractor::default()).await,
        EXTRACTION_FAILED
    );
}
