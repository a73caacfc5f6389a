use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use futures::StreamExt;
use serde_json::Value;
use tokio::{
    sync::Mutex,
    time::{sleep_until, Instant},
};
use tracing::{debug, warn};

use super::providers::EnrichmentProvider;
use crate::error::LookupError;

/// Collected output of one enrichment stage's lookups.
#[derive(Debug, Default)]
pub struct LookupRun {
    pub records: Vec<Value>,
    pub failed: usize,
    pub rate_limited: bool,
}

/// Keeps lookup starts at least `delay` apart across all concurrent slots.
struct Pacer {
    delay: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_start: Mutex::new(None),
        }
    }

    async fn wait_turn(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut next_start = self.next_start.lock().await;
        if let Some(at) = *next_start {
            sleep_until(at).await;
        }
        *next_start = Some(Instant::now() + self.delay);
    }
}

/// Run every query through `provider` with bounded concurrency.
///
/// Results are appended in query order. A transient failure drops only that
/// lookup (records it had already produced are kept). A rate-limit response
/// stops new lookups from starting; lookups already in flight still finish
/// and their records are kept.
pub async fn run_lookups<P>(provider: &P, queries: Vec<String>) -> LookupRun
where
    P: EnrichmentProvider + ?Sized,
{
    let settings = provider.settings();
    let pacer = &Pacer::new(settings.delay);
    let stopped = &AtomicBool::new(false);
    let mut stream = futures::stream::iter(queries)
        .map(|query| async move {
            if stopped.load(Ordering::Acquire) {
                return None;
            }
            pacer.wait_turn().await;
            if stopped.load(Ordering::Acquire) {
                return None;
            }
            let mut sink = Vec::new();
            let result = provider.lookup(&query, &mut sink).await;
            if matches!(result, Err(LookupError::RateLimited { .. })) {
                stopped.store(true, Ordering::Release);
            }
            Some((query, sink, result))
        })
        .buffered(settings.concurrency.max(1));

    let mut run = LookupRun::default();
    let mut not_started = 0usize;
    while let Some(finished) = stream.next().await {
        let Some((query, sink, result)) = finished else {
            not_started += 1;
            continue;
        };
        debug!(stage = %provider.stage(), %query, records = sink.len(), "lookup finished");
        run.records.extend(sink);
        match result {
            Ok(()) => {}
            Err(LookupError::RateLimited { status }) => {
                warn!(stage = %provider.stage(), %query, status, "provider rate limit hit, stopping stage early");
                run.rate_limited = true;
            }
            Err(err) => {
                warn!(stage = %provider.stage(), %query, error = %err, "lookup failed");
                run.failed += 1;
            }
        }
    }
    if not_started > 0 {
        debug!(stage = %provider.stage(), not_started, "lookups left unissued after rate limit");
    }
    run
}
