//! Deciding when a streamed answer has finished.
//!
//! Nothing on the page says "done", so completion is inferred from the absence
//! of activity. Both strategies feed the same quiescence watcher:
//!
//! - DOM: sample the region's text length every poll interval; a sample is
//!   quiet when it is non-zero and equal to the previous one. `stable_polls`
//!   consecutive quiet samples settle the response.
//! - Network: after the first relevant response event, a single full quiet
//!   period without relevant events ends the stream. Response events mark
//!   completed fetches, so a short DOM stability pass then confirms the region
//!   has stopped growing. If the stream never starts the detector falls back
//!   to DOM polling.
//!
//! Running out of time is not an error: the caller gets
//! [`Completion::TimedOut`] and should treat the content as possibly partial.

use crate::surface::{ResponseEvent, ResponseSurface};
use async_trait::async_trait;
use regex::Regex;
use sibyl_common::{Result, SibylError};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, timeout_at, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Dom,
    Network,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Dom => "dom",
            Strategy::Network => "network",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub strategy: Strategy,
    pub locate_timeout: Duration,
    pub poll_interval: Duration,
    pub stable_polls: u32,
    pub max_wait: Duration,
    pub stream_start_timeout: Duration,
    pub quiet_period: Duration,
    pub stream_url_pattern: String,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Dom,
            locate_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
            stable_polls: 6,
            max_wait: Duration::from_secs(120),
            stream_start_timeout: Duration::from_secs(10),
            quiet_period: Duration::from_secs(3),
            stream_url_pattern: r"/async/(folsrch|aim)|batchexecute".to_string(),
        }
    }
}

/// How detection ended. `strategy` is the one that actually ran, so a network
/// request that fell back reports [`Strategy::Dom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Settled { strategy: Strategy, elapsed: Duration },
    TimedOut { strategy: Strategy, elapsed: Duration },
}

impl Completion {
    pub fn is_settled(&self) -> bool {
        matches!(self, Completion::Settled { .. })
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Completion::Settled { strategy, .. } | Completion::TimedOut { strategy, .. } => *strategy,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Completion::Settled { elapsed, .. } | Completion::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// Consecutive failed region reads tolerated before the region is located again.
const MAX_READ_FAILURES: u32 = 3;

/// Quiet DOM samples that confirm a network settle.
const CONFIRM_POLLS: u32 = 2;

enum Activity {
    Quiet,
    Busy,
}

#[async_trait]
trait ActivitySource: Send {
    async fn observe(&mut self) -> Result<Activity>;
}

/// Wait until `required` consecutive quiet observations, or the deadline.
async fn quiesce(source: &mut dyn ActivitySource, required: u32, deadline: Instant) -> Result<bool> {
    let mut quiet = 0u32;
    loop {
        let activity = match timeout_at(deadline, source.observe()).await {
            Ok(activity) => activity?,
            Err(_) => return Ok(false),
        };
        match activity {
            Activity::Quiet => {
                quiet += 1;
                if quiet >= required {
                    return Ok(true);
                }
            }
            Activity::Busy => quiet = 0,
        }
    }
}

struct DomActivity<'a> {
    surface: &'a dyn ResponseSurface,
    interval: Duration,
    locate_timeout: Duration,
    last_len: usize,
    samples: u32,
    failures: u32,
}

impl<'a> DomActivity<'a> {
    fn new(surface: &'a dyn ResponseSurface, options: &CompletionOptions) -> Self {
        Self {
            surface,
            interval: options.poll_interval,
            locate_timeout: options.locate_timeout,
            last_len: 0,
            samples: 0,
            failures: 0,
        }
    }

    /// A failed read is treated as activity. After repeated failures the
    /// region must be located again or detection gives up.
    async fn read_failed(&mut self, error: SibylError) -> Result<Activity> {
        self.failures += 1;
        tracing::warn!(target: "completion", error = %error, failures = self.failures, "region read failed");
        if self.failures >= MAX_READ_FAILURES {
            self.surface
                .locate_region(self.locate_timeout)
                .await
                .map_err(region_not_found)?;
            tracing::debug!(target: "completion", "region located again");
            self.failures = 0;
        }
        Ok(Activity::Busy)
    }
}

#[async_trait]
impl ActivitySource for DomActivity<'_> {
    async fn observe(&mut self) -> Result<Activity> {
        if self.samples > 0 {
            sleep(self.interval).await;
        }
        self.samples += 1;
        let text = match self.surface.region_text().await {
            Ok(text) => text,
            Err(e) => return self.read_failed(e).await,
        };
        self.failures = 0;
        let len = text.chars().count();
        let stable = len > 0 && len == self.last_len;
        tracing::trace!(target: "completion", sample = self.samples, len, last_len = self.last_len, stable, "dom sample");
        self.last_len = len;
        Ok(if stable { Activity::Quiet } else { Activity::Busy })
    }
}

fn region_not_found(e: SibylError) -> SibylError {
    match e {
        e @ SibylError::RegionNotFound(_) => e,
        other => SibylError::RegionNotFound(other.to_string()),
    }
}

struct NetworkActivity<'a> {
    rx: mpsc::Receiver<ResponseEvent>,
    pattern: &'a Regex,
    quiet_period: Duration,
}

impl NetworkActivity<'_> {
    /// Next relevant event, or `None` once the feed closes.
    async fn next_relevant(&mut self) -> Option<ResponseEvent> {
        while let Some(event) = self.rx.recv().await {
            if self.pattern.is_match(&event.url) {
                return Some(event);
            }
        }
        None
    }
}

#[async_trait]
impl ActivitySource for NetworkActivity<'_> {
    async fn observe(&mut self) -> Result<Activity> {
        match timeout(self.quiet_period, self.next_relevant()).await {
            Ok(Some(event)) => {
                tracing::trace!(target: "completion", url = %event.url, "stream activity");
                Ok(Activity::Busy)
            }
            // A closed feed cannot report more activity.
            Ok(None) => {
                sleep(self.quiet_period).await;
                Ok(Activity::Quiet)
            }
            Err(_) => Ok(Activity::Quiet),
        }
    }
}

/// Unsubscribes from response events when dropped.
struct Subscription<'a>(&'a dyn ResponseSurface);

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.0.unsubscribe_responses();
    }
}

pub struct CompletionDetector {
    options: CompletionOptions,
    stream_pattern: Option<Regex>,
}

impl CompletionDetector {
    pub fn new(options: CompletionOptions) -> Self {
        let stream_pattern = match Regex::new(&options.stream_url_pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                if options.strategy == Strategy::Network {
                    tracing::warn!(target: "completion", error = %e, "invalid stream url pattern; using dom strategy");
                }
                None
            }
        };
        Self {
            options,
            stream_pattern,
        }
    }

    pub fn options(&self) -> &CompletionOptions {
        &self.options
    }

    /// Block until the last response region on `surface` looks finished.
    ///
    /// Fails only with [`SibylError::RegionNotFound`].
    pub async fn await_completion(&self, surface: &dyn ResponseSurface) -> Result<Completion> {
        surface
            .locate_region(self.options.locate_timeout)
            .await
            .map_err(region_not_found)?;

        let started = Instant::now();
        let deadline = started + self.options.max_wait;
        tracing::info!(target: "completion", strategy = %self.options.strategy, "waiting for response to finish streaming");

        let outcome = match (self.options.strategy, &self.stream_pattern) {
            (Strategy::Network, Some(pattern)) => {
                self.watch_network(surface, pattern, deadline).await?
            }
            _ => (Strategy::Dom, self.watch_dom(surface, deadline).await?),
        };

        let elapsed = started.elapsed();
        let completion = match outcome {
            (strategy, true) => {
                tracing::info!(target: "completion", %strategy, elapsed_ms = elapsed.as_millis() as u64, "response settled");
                Completion::Settled { strategy, elapsed }
            }
            (strategy, false) => {
                tracing::warn!(target: "completion", %strategy, elapsed_ms = elapsed.as_millis() as u64, "response did not settle in time; content may be incomplete");
                Completion::TimedOut { strategy, elapsed }
            }
        };
        Ok(completion)
    }

    async fn watch_dom(&self, surface: &dyn ResponseSurface, deadline: Instant) -> Result<bool> {
        let mut source = DomActivity::new(surface, &self.options);
        quiesce(&mut source, self.options.stable_polls, deadline).await
    }

    async fn watch_network(
        &self,
        surface: &dyn ResponseSurface,
        pattern: &Regex,
        deadline: Instant,
    ) -> Result<(Strategy, bool)> {
        let rx = match surface.subscribe_responses().await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(target: "completion", error = %e, "response events unavailable; using dom strategy");
                return Ok((Strategy::Dom, self.watch_dom(surface, deadline).await?));
            }
        };
        let subscription = Subscription(surface);
        let mut source = NetworkActivity {
            rx,
            pattern,
            quiet_period: self.options.quiet_period,
        };

        let start_by = deadline.min(Instant::now() + self.options.stream_start_timeout);
        match timeout_at(start_by, source.next_relevant()).await {
            Ok(Some(event)) => {
                tracing::debug!(target: "completion", url = %event.url, "stream started");
            }
            Ok(None) | Err(_) => {
                tracing::info!(target: "completion", "no streaming response observed; falling back to dom strategy");
                drop(source);
                drop(subscription);
                return Ok((Strategy::Dom, self.watch_dom(surface, deadline).await?));
            }
        }

        let quiet = quiesce(&mut source, 1, deadline).await?;
        drop(subscription);
        if !quiet {
            return Ok((Strategy::Network, false));
        }

        tracing::debug!(target: "completion", "stream quiet; confirming region stopped growing");
        let mut confirm = DomActivity::new(surface, &self.options);
        let settled = quiesce(&mut confirm, CONFIRM_POLLS, deadline).await?;
        Ok((Strategy::Network, settled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted surface: region lengths are consumed in order (the last one
    /// repeats) and events are emitted on a timer after subscription. Reads
    /// numbered in `failing_reads` (from 1) fail, and only the first
    /// `locatable_times` locate calls succeed.
    struct Scripted {
        lengths: Mutex<VecDeque<usize>>,
        locatable_times: usize,
        locates: AtomicUsize,
        failing_reads: Vec<usize>,
        events: Vec<(Duration, &'static str)>,
        repeat_last_event: bool,
        reads: AtomicUsize,
        unsubscribed: AtomicBool,
    }

    impl Scripted {
        fn dom(lengths: &[usize]) -> Self {
            Self {
                lengths: Mutex::new(lengths.iter().copied().collect()),
                locatable_times: usize::MAX,
                locates: AtomicUsize::new(0),
                failing_reads: Vec::new(),
                events: Vec::new(),
                repeat_last_event: false,
                reads: AtomicUsize::new(0),
                unsubscribed: AtomicBool::new(false),
            }
        }

        fn with_events(mut self, events: &[(u64, &'static str)]) -> Self {
            self.events = events
                .iter()
                .map(|(ms, url)| (Duration::from_millis(*ms), *url))
                .collect();
            self
        }
    }

    #[async_trait]
    impl ResponseSurface for Scripted {
        async fn locate_region(&self, _timeout: Duration) -> Result<()> {
            if self.locates.fetch_add(1, Ordering::SeqCst) < self.locatable_times {
                Ok(())
            } else {
                Err(SibylError::RegionNotFound("div[data-subtree=\"aimc\"]".into()))
            }
        }

        async fn region_text(&self) -> Result<String> {
            let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing_reads.contains(&read) {
                return Err(SibylError::RegionNotFound("stale element reference".into()));
            }
            let mut lengths = self.lengths.lock().unwrap();
            let len = if lengths.len() > 1 {
                lengths.pop_front().unwrap()
            } else {
                lengths.front().copied().unwrap_or(0)
            };
            Ok("x".repeat(len))
        }

        async fn region_markup(&self) -> Result<String> {
            Ok(String::new())
        }

        async fn subscribe_responses(&self) -> Result<mpsc::Receiver<ResponseEvent>> {
            let (tx, rx) = mpsc::channel(16);
            let events = self.events.clone();
            let repeat = self.repeat_last_event;
            tokio::spawn(async move {
                let mut last = None;
                for (at, url) in events {
                    sleep(at).await;
                    if tx.send(ResponseEvent::new(url)).await.is_err() {
                        return;
                    }
                    last = Some((at, url));
                }
                if let (true, Some((every, url))) = (repeat, last) {
                    loop {
                        sleep(every).await;
                        if tx.send(ResponseEvent::new(url)).await.is_err() {
                            return;
                        }
                    }
                }
            });
            Ok(rx)
        }

        fn unsubscribe_responses(&self) {
            self.unsubscribed.store(true, Ordering::SeqCst);
        }
    }

    fn options(strategy: Strategy) -> CompletionOptions {
        CompletionOptions {
            strategy,
            ..CompletionOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn growth_resets_the_stability_counter() {
        let surface = Scripted::dom(&[5, 5, 5, 5, 5, 5, 10]);
        let detector = CompletionDetector::new(options(Strategy::Dom));

        let done = detector.await_completion(&surface).await.unwrap();

        assert!(done.is_settled());
        assert_eq!(done.strategy(), Strategy::Dom);
        // five repeats of 5, reset by 10, then six repeats of 10
        assert_eq!(surface.reads.load(Ordering::SeqCst), 13);
        assert_eq!(done.elapsed(), Duration::from_millis(500 * 12));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_region_never_settles() {
        let surface = Scripted::dom(&[0]);
        let detector = CompletionDetector::new(CompletionOptions {
            max_wait: Duration::from_secs(5),
            ..options(Strategy::Dom)
        });

        let done = detector.await_completion(&surface).await.unwrap();

        assert!(!done.is_settled());
        assert_eq!(done.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_region_is_fatal() {
        let surface = Scripted {
            locatable_times: 0,
            ..Scripted::dom(&[10])
        };
        let err = CompletionDetector::new(options(Strategy::Dom))
            .await_completion(&surface)
            .await
            .unwrap_err();
        assert!(matches!(err, SibylError::RegionNotFound(_)));
        assert_eq!(surface.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_is_retried_on_the_next_poll() {
        let surface = Scripted {
            failing_reads: vec![3],
            ..Scripted::dom(&[10])
        };
        let detector = CompletionDetector::new(options(Strategy::Dom));

        let done = detector.await_completion(&surface).await.unwrap();

        assert!(done.is_settled());
        // 10, quiet, failed read resets the count, then six quiet samples
        assert_eq!(surface.reads.load(Ordering::SeqCst), 9);
        assert_eq!(done.elapsed(), Duration::from_millis(500 * 8));
        assert_eq!(surface.locates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_read_failures_locate_the_region_again() {
        let surface = Scripted {
            failing_reads: vec![2, 3, 4],
            ..Scripted::dom(&[10])
        };
        let detector = CompletionDetector::new(options(Strategy::Dom));

        let done = detector.await_completion(&surface).await.unwrap();

        assert!(done.is_settled());
        assert_eq!(surface.locates.load(Ordering::SeqCst), 2);
        assert_eq!(surface.reads.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn region_lost_for_good_is_fatal() {
        let surface = Scripted {
            locatable_times: 1,
            failing_reads: (2..100).collect(),
            ..Scripted::dom(&[10])
        };
        let err = CompletionDetector::new(options(Strategy::Dom))
            .await_completion(&surface)
            .await
            .unwrap_err();

        assert!(matches!(err, SibylError::RegionNotFound(_)));
        assert_eq!(surface.reads.load(Ordering::SeqCst), 4);
        assert_eq!(surface.locates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn network_settles_after_quiet_period() {
        let surface = Scripted::dom(&[40]).with_events(&[
            (100, "https://www.google.com/log?format=json"),
            (100, "https://www.google.com/async/folsrch?q=1"),
            (500, "https://www.google.com/async/folsrch?q=1"),
        ]);
        let detector = CompletionDetector::new(options(Strategy::Network));

        let done = detector.await_completion(&surface).await.unwrap();

        // quiet period after the last event, then a read and two quiet samples
        assert_eq!(
            done,
            Completion::Settled {
                strategy: Strategy::Network,
                elapsed: Duration::from_millis(700 + 3000 + 2 * 500),
            }
        );
        assert!(surface.unsubscribed.load(Ordering::SeqCst));
        assert_eq!(surface.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_network_waits_for_the_region_to_stop_growing() {
        let surface = Scripted::dom(&[10, 20, 30, 40])
            .with_events(&[(200, "https://www.google.com/async/folsrch?q=1")]);
        let detector = CompletionDetector::new(options(Strategy::Network));

        let done = detector.await_completion(&surface).await.unwrap();

        assert_eq!(
            done,
            Completion::Settled {
                strategy: Strategy::Network,
                elapsed: Duration::from_millis(200 + 3000 + 5 * 500),
            }
        );
        assert_eq!(surface.reads.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn irrelevant_traffic_falls_back_to_dom() {
        let surface = Scripted::dom(&[8]).with_events(&[(200, "https://www.gstatic.com/og/app.js")]);
        let detector = CompletionDetector::new(options(Strategy::Network));

        let done = detector.await_completion(&surface).await.unwrap();

        assert!(done.is_settled());
        assert_eq!(done.strategy(), Strategy::Dom);
        assert!(surface.unsubscribed.load(Ordering::SeqCst));
        assert_eq!(surface.reads.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn endless_stream_times_out_and_unsubscribes() {
        let mut surface = Scripted::dom(&[0]).with_events(&[(1000, "https://x.test/batchexecute")]);
        surface.repeat_last_event = true;
        let detector = CompletionDetector::new(CompletionOptions {
            max_wait: Duration::from_secs(20),
            ..options(Strategy::Network)
        });

        let done = detector.await_completion(&surface).await.unwrap();

        assert_eq!(
            done,
            Completion::TimedOut {
                strategy: Strategy::Network,
                elapsed: Duration::from_secs(20),
            }
        );
        assert!(surface.unsubscribed.load(Ordering::SeqCst));
    }

    #[test]
    fn invalid_stream_pattern_degrades_to_dom() {
        let detector = CompletionDetector::new(CompletionOptions {
            stream_url_pattern: "([".into(),
            ..options(Strategy::Network)
        });
        assert!(detector.stream_pattern.is_none());
    }
}
