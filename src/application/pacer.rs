//! Fixed-delay scheduler for sequential requests

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Keeps at least `delay` between the starts of consecutive requests
#[derive(Debug)]
pub struct RequestPacer {
    delay: Duration,
    last_request: Option<Instant>,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last_request: None }
    }

    /// Time left before the next request may start
    pub fn check(&self) -> Option<Duration> {
        let last = self.last_request?;
        let ready_at = last + self.delay;
        let now = Instant::now();
        (ready_at > now).then(|| ready_at - now)
    }

    /// Wait out the remaining delay, then mark a request as started
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request {
            let ready_at = last + self.delay;
            if ready_at > Instant::now() {
                tracing::trace!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "Pacing request");
                sleep_until(ready_at).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}
