//! Resilient HTTP transport: replayable request bodies, bounded retry on
//! 429/5xx with `Retry-After`/backoff-with-jitter scheduling, gated by a
//! [`CircuitBreaker`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use rand::Rng;

use crate::breaker::CircuitBreaker;
use crate::cancel::Cancellation;
use crate::error::{Error, Result};

pub const MAX_429_RETRIES: u32 = 5;
pub const MAX_5XX_RETRIES: u32 = 3;
const DRAIN_LIMIT_BYTES: usize = 1024 * 1024;

/// A request body already captured in memory, so retries can always
/// install a fresh reader over the same bytes without re-reading an
/// upstream source.
#[derive(Debug, Clone)]
pub struct ReplayableBody {
    bytes: Bytes,
}

impl ReplayableBody {
    /// Capture `raw` (read once, e.g. from a stream) so every subsequent
    /// `get_body` call yields an independent copy of the same bytes.
    pub fn capture(raw: impl Into<Bytes>) -> Self {
        ReplayableBody { bytes: raw.into() }
    }

    pub fn get_body(&self) -> Bytes {
        self.bytes.clone()
    }
}

/// Wraps an inner [`reqwest::Client`] with the retry/breaker policy.
pub struct RetryTransport {
    inner: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    base_delay: Duration,
    max_429: u32,
    max_5xx: u32,
}

impl RetryTransport {
    pub fn new(inner: reqwest::Client, breaker: Arc<CircuitBreaker>, base_delay: Duration) -> Self {
        RetryTransport {
            inner,
            breaker,
            base_delay,
            max_429: MAX_429_RETRIES,
            max_5xx: MAX_5XX_RETRIES,
        }
    }

    pub fn with_retry_limits(mut self, max_429: u32, max_5xx: u32) -> Self {
        self.max_429 = max_429;
        self.max_5xx = max_5xx;
        self
    }

    /// Execute `request`, retrying per the policy. `request` must be
    /// built so its body (if any) is replayable -- `reqwest::Request`
    /// bodies built from bytes/strings/JSON satisfy this; a streaming
    /// body must be buffered into one of those forms before calling in.
    pub async fn execute(
        &self,
        request: reqwest::Request,
        mut cancel: Cancellation,
    ) -> Result<reqwest::Response> {
        if self.breaker.is_open() {
            log::debug!("circuit breaker open; short-circuiting request");
            return Err(Error::CircuitOpen);
        }

        let mut retries_429: u32 = 0;
        let mut retries_5xx: u32 = 0;

        loop {
            let attempt_request = request
                .try_clone()
                .expect("request body must be replayable (bytes/string/json, not a stream)");

            let response = match self.inner.execute(attempt_request).await {
                Ok(response) => response,
                Err(err) => return Err(Error::Http(err)),
            };
            let status = response.status();

            if status.as_u16() < 400 {
                self.breaker.record_success();
                return Ok(response);
            }

            if status.as_u16() == 429 {
                if retries_429 >= self.max_429 {
                    log::debug!("429 retries exhausted ({retries_429}); returning response as-is");
                    return Ok(response);
                }
                let retry_after = parse_retry_after(&response);
                let delay = compute_backoff(retry_after, self.base_delay, retries_429);
                log::debug!("429 received; sleeping {delay:?} before retry {retries_429}");
                drain(response).await;
                sleep_interruptible(delay, &mut cancel).await?;
                retries_429 += 1;
                continue;
            }

            if status.as_u16() >= 500 {
                self.breaker.record_failure();
                if retries_5xx >= self.max_5xx {
                    log::debug!("5xx retries exhausted ({retries_5xx}); returning response as-is");
                    return Ok(response);
                }
                log::debug!("{status} received; sleeping {:?} before retry {retries_5xx}", self.base_delay);
                drain(response).await;
                sleep_interruptible(self.base_delay, &mut cancel).await?;
                retries_5xx += 1;
                continue;
            }

            return Ok(response);
        }
    }
}

async fn drain(response: reqwest::Response) {
    let mut remaining = DRAIN_LIMIT_BYTES;
    let mut stream = response.bytes_stream();
    use futures_util::StreamExt;
    while remaining > 0 {
        match stream.next().await {
            Some(Ok(chunk)) => remaining = remaining.saturating_sub(chunk.len()),
            _ => break,
        }
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    let header = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let header = header.to_str().ok()?;
    retry_after_delay(header, Utc::now())
}

/// `Retry-After` may be an integer number of seconds or an HTTP-date.
pub fn retry_after_delay(header: &str, now: chrono::DateTime<Utc>) -> Option<Duration> {
    let header = header.trim();
    if let Ok(secs) = header.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(header).ok()?;
    let date = date.with_timezone(&Utc);
    let delta = (date - now).num_milliseconds().max(0) as u64;
    Some(Duration::from_millis(delta))
}

/// Compute the backoff delay for 429 retry `attempt` (0-indexed), honoring
/// `Retry-After` when present and falling back to
/// `base_delay * 2^attempt` plus uniform jitter in `[0, .../2)`.
pub fn compute_backoff(
    retry_after: Option<Duration>,
    base_delay: Duration,
    attempt: u32,
) -> Duration {
    if let Some(delay) = retry_after {
        return delay;
    }
    if base_delay.is_zero() {
        return Duration::ZERO;
    }

    let base_nanos = base_delay.as_nanos();
    let multiplier = 1u128.checked_shl(attempt).unwrap_or(0);
    let computed = base_nanos.checked_mul(multiplier);

    let Some(computed_nanos) = computed else {
        return Duration::ZERO;
    };
    if computed_nanos == 0 {
        return Duration::ZERO;
    }

    let jitter_bound = (computed_nanos / 2).max(1);
    let jitter = rand::thread_rng().gen_range(0..jitter_bound);
    Duration::from_nanos((computed_nanos + jitter).min(u64::MAX as u128) as u64)
}

async fn sleep_interruptible(duration: Duration, cancel: &mut Cancellation) -> Result<()> {
    if duration.is_zero() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("sleep interrupted: request cancelled".into()));
        }
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Error::Cancelled("sleep interrupted: request cancelled".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation_pair;
    use httpmock::MockServer;
    use httpmock::Method::GET;
    use std::time::Instant;

    fn transport(base_delay: Duration) -> RetryTransport {
        RetryTransport::new(
            reqwest::Client::new(),
            Arc::new(CircuitBreaker::new()),
            base_delay,
        )
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(429);
        });
        server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(200);
        });

        let client = transport(Duration::from_millis(10));
        let request = reqwest::Client::new()
            .get(server.url("/x"))
            .build()
            .unwrap();
        let response = client.execute(request, Cancellation::never()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(first.hits() >= 1);
    }

    #[tokio::test]
    async fn caps_429_retries() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(429);
        });

        let client = transport(Duration::from_millis(1)).with_retry_limits(2, MAX_5XX_RETRIES);
        let request = reqwest::Client::new()
            .get(server.url("/x"))
            .build()
            .unwrap();
        let response = client.execute(request, Cancellation::never()).await.unwrap();
        assert_eq!(response.status(), 429);
    }

    #[tokio::test]
    async fn retries_on_5xx_then_succeeds() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(503);
        });
        server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(200);
        });

        let client = transport(Duration::from_millis(1));
        let request = reqwest::Client::new()
            .get(server.url("/x"))
            .build()
            .unwrap();
        let response = client.execute(request, Cancellation::never()).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn no_retry_on_other_4xx() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(404);
        });

        let client = transport(Duration::from_millis(1));
        let request = reqwest::Client::new()
            .get(server.url("/x"))
            .build()
            .unwrap();
        let response = client.execute(request, Cancellation::never()).await.unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(mock.hits(), 1);
    }

    #[tokio::test]
    async fn retry_after_seconds_is_respected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(429).header("Retry-After", "1");
        });
        server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(200);
        });

        let client = transport(Duration::from_secs(3600));
        let request = reqwest::Client::new()
            .get(server.url("/x"))
            .build()
            .unwrap();

        let start = Instant::now();
        let response = client.execute(request, Cancellation::never()).await.unwrap();
        let elapsed = start.elapsed();
        assert_eq!(response.status(), 200);
        assert!(elapsed >= Duration::from_millis(900));
        assert!(elapsed <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_is_terminal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(429);
        });

        let client = transport(Duration::from_secs(1));
        let request = reqwest::Client::new()
            .get(server.url("/x"))
            .build()
            .unwrap();

        let (handle, cancel) = cancellation_pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let err = client.execute(request, cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn circuit_open_short_circuits_without_io() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/x");
            then.status(200);
        });

        let breaker = Arc::new(CircuitBreaker::new());
        for _ in 0..crate::breaker::THRESHOLD {
            breaker.record_failure();
        }
        let client = RetryTransport::new(reqwest::Client::new(), breaker, Duration::from_millis(1));

        let request = reqwest::Client::new()
            .get(server.url("/x"))
            .build()
            .unwrap();
        let err = client.execute(request, Cancellation::never()).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(mock.hits(), 0);
    }

    #[test]
    fn replayable_body_yields_same_bytes_each_time() {
        let body = ReplayableBody::capture(Bytes::from_static(b"hello"));
        assert_eq!(body.get_body(), body.get_body());
        assert_eq!(body.get_body(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn retry_after_date_header_parses() {
        let now = Utc::now();
        let future = now + chrono::Duration::seconds(5);
        let header = future.to_rfc2822();
        let delay = retry_after_delay(&header, now).unwrap();
        assert!(delay.as_secs() <= 5);
    }
}
