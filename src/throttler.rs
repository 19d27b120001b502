//! Per-provider adaptive (AIMD) concurrency throttler.
//!
//! Wraps calls into external embedding/summarization providers. Concurrency
//! starts low and grows additively on sustained success; it halves the
//! instant a call fails with a recognizable rate-limit error. Admission
//! into the gated section is strict FIFO so bursts don't starve earlier
//! waiters.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

/// Error patterns that mark a failure as "rate limited" rather than fatal.
/// Mirrors the provider error strings this system is known to see in
/// practice, including a couple of non-English phrasings some providers use.
pub const DEFAULT_ERROR_PATTERNS: &[&str] = &[
    "429",
    "rate limit",
    "too many requests",
    "1214",
    "1301",
    "1302",
    "并发数过高",
];

struct Inner {
    concurrency: AtomicUsize,
    active_count: AtomicUsize,
    success_count: AtomicUsize,
    min: usize,
    max: usize,
    increase_threshold: usize,
    waiters: Mutex<VecDeque<oneshot::Sender<()>>>,
    error_patterns: Vec<String>,
}

/// A fairness-preserving, dynamically resizable concurrency gate for one
/// provider.
#[derive(Clone)]
pub struct Throttler {
    name: Arc<str>,
    inner: Arc<Inner>,
}

pub struct ThrottlerConfig {
    pub initial_concurrency: usize,
    pub min: usize,
    pub max: usize,
    pub increase_threshold: usize,
    pub error_patterns: Vec<String>,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            initial_concurrency: 4,
            min: 1,
            max: 16,
            increase_threshold: 10,
            error_patterns: DEFAULT_ERROR_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Throttler {
    pub fn new(name: impl Into<Arc<str>>, config: ThrottlerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Inner {
                concurrency: AtomicUsize::new(config.initial_concurrency.max(config.min)),
                active_count: AtomicUsize::new(0),
                success_count: AtomicUsize::new(0),
                min: config.min,
                max: config.max,
                increase_threshold: config.increase_threshold,
                waiters: Mutex::new(VecDeque::new()),
                error_patterns: config.error_patterns,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active_count.load(Ordering::SeqCst)
    }

    /// Run `task`, retrying up to `retries` times on a recognized rate-limit
    /// error. Admission is FIFO: a caller arriving while the gate is full
    /// waits behind everyone already queued.
    pub async fn run<F, Fut, T, E>(&self, retries: usize, mut task: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0usize;
        loop {
            self.acquire().await;
            let result = task().await;
            self.release().await;

            match result {
                Ok(val) => {
                    self.record_success();
                    return Ok(val);
                }
                Err(err) => {
                    if !self.matches_error_pattern(&err.to_string()) {
                        return Err(err);
                    }
                    self.record_rate_limit();
                    if attempt >= retries {
                        return Err(err);
                    }
                    let delay = Duration::from_secs(1u64 << attempt.min(6));
                    tracing::warn!(
                        provider = %self.name,
                        attempt,
                        delay_secs = delay.as_secs(),
                        "throttled provider call failed with a rate-limit pattern, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn matches_error_pattern(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.inner
            .error_patterns
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
    }

    async fn acquire(&self) {
        loop {
            let concurrency = self.inner.concurrency.load(Ordering::SeqCst);
            let active = self.inner.active_count.fetch_add(1, Ordering::SeqCst);
            if active < concurrency {
                return;
            }
            // Over budget: give the slot back and queue behind existing waiters.
            self.inner.active_count.fetch_sub(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            {
                let mut waiters = self.inner.waiters.lock().await;
                waiters.push_back(tx);
            }
            let _ = rx.await;
        }
    }

    async fn release(&self) {
        self.inner.active_count.fetch_sub(1, Ordering::SeqCst);
        let concurrency = self.inner.concurrency.load(Ordering::SeqCst);
        if self.inner.active_count.load(Ordering::SeqCst) < concurrency {
            let mut waiters = self.inner.waiters.lock().await;
            if let Some(tx) = waiters.pop_front() {
                let _ = tx.send(());
            }
        }
    }

    fn record_success(&self) {
        let successes = self.inner.success_count.fetch_add(1, Ordering::SeqCst) + 1;
        if successes >= self.inner.increase_threshold {
            self.inner.success_count.store(0, Ordering::SeqCst);
            let mut current = self.inner.concurrency.load(Ordering::SeqCst);
            if current < self.inner.max {
                current += 1;
                self.inner.concurrency.store(current, Ordering::SeqCst);
                tracing::debug!(provider = %self.name, concurrency = current, "throttler concurrency increased");
            }
        }
    }

    fn record_rate_limit(&self) {
        self.inner.success_count.store(0, Ordering::SeqCst);
        let current = self.inner.concurrency.load(Ordering::SeqCst);
        let next = if current <= 2 {
            self.inner.min
        } else {
            (current / 2).max(self.inner.min)
        };
        self.inner.concurrency.store(next, Ordering::SeqCst);
        tracing::warn!(provider = %self.name, concurrency = next, "throttler concurrency halved after rate-limit error");
    }
}

/// Registry of one [`Throttler`] per provider name, created lazily.
#[derive(Clone, Default)]
pub struct ThrottlerRegistry {
    inner: Arc<Mutex<std::collections::HashMap<String, Throttler>>>,
}

impl ThrottlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, provider: &str, config: ThrottlerConfig) -> Throttler {
        let mut map = self.inner.lock().await;
        map.entry(provider.to_string())
            .or_insert_with(|| Throttler::new(provider.to_string(), config))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let throttler = Throttler::new(
            "test",
            ThrottlerConfig {
                initial_concurrency: 2,
                min: 1,
                max: 2,
                increase_threshold: 100,
                error_patterns: vec![],
            },
        );
        let observed_max = Arc::new(StdAtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let throttler = throttler.clone();
            let observed_max = observed_max.clone();
            handles.push(tokio::spawn(async move {
                let _: Result<(), String> = throttler
                    .run(0, || async {
                        let active = throttler.active_count();
                        observed_max.fetch_max(active, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok(())
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(observed_max.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn rate_limit_error_halves_concurrency() {
        let throttler = Throttler::new(
            "test",
            ThrottlerConfig {
                initial_concurrency: 8,
                min: 1,
                max: 16,
                increase_threshold: 100,
                error_patterns: vec!["429".to_string()],
            },
        );
        let result: Result<(), String> = throttler.run(0, || async { Err("429 Too Many".to_string()) }).await;
        assert!(result.is_err());
        assert_eq!(throttler.concurrency(), 4);
    }

    #[tokio::test]
    async fn non_matching_error_does_not_adjust_concurrency() {
        let throttler = Throttler::new(
            "test",
            ThrottlerConfig {
                initial_concurrency: 8,
                min: 1,
                max: 16,
                increase_threshold: 100,
                error_patterns: vec!["429".to_string()],
            },
        );
        let result: Result<(), String> = throttler.run(0, || async { Err("boom".to_string()) }).await;
        assert!(result.is_err());
        assert_eq!(throttler.concurrency(), 8);
    }

    #[tokio::test]
    async fn success_streak_increases_concurrency() {
        let throttler = Throttler::new(
            "test",
            ThrottlerConfig {
                initial_concurrency: 1,
                min: 1,
                max: 4,
                increase_threshold: 3,
                error_patterns: vec![],
            },
        );
        for _ in 0..3 {
            let _: Result<(), String> = throttler.run(0, || async { Ok(()) }).await;
        }
        assert_eq!(throttler.concurrency(), 2);
    }
}
