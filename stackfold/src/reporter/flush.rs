//! Jittered periodic flush loop
//!
//! One task per reporter. Every tick swaps the trace event store, generates
//! and writes profiles, then purges expired cache entries. The tick runs on
//! the blocking pool and is never interrupted; cancellation is only observed
//! while waiting for the next tick. All caches are purged when the loop
//! exits.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Reporter;
use crate::attributes::SampleAttrProducer;
use crate::domain::ReporterError;

/// Scale `base` by a random factor in `[1 - jitter, 1 + jitter]`
///
/// `jitter` is clamped to `[0, 1]`.
#[must_use]
pub fn add_jitter(base: Duration, jitter: f64) -> Duration {
    let jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
    let factor = 1.0 + jitter * (2.0 * rand::random::<f64>() - 1.0);
    base.mul_f64(factor)
}

/// Handle to a running flush loop
pub struct FlushHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl FlushHandle {
    /// Ask the loop to exit after the current tick
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop the loop and wait until it has exited
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Flush loop panicked: {e}");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Whether the loop was asked to stop, directly or through its parent
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled when this loop stops
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Spawn the flush loop of `reporter`
///
/// The loop also exits when `parent` is cancelled.
pub fn spawn_flush_loop<P: SampleAttrProducer>(
    reporter: Arc<Reporter<P>>,
    parent: &CancellationToken,
) -> FlushHandle {
    let token = parent.child_token();
    let task = tokio::spawn(run(reporter, token.clone()));
    FlushHandle { token, task }
}

async fn run<P: SampleAttrProducer>(reporter: Arc<Reporter<P>>, token: CancellationToken) {
    let base = reporter.config().report_interval;
    let jitter = reporter.config().jitter;
    info!("Flush loop started: every {base:?} ±{:.0}%", jitter * 100.0);

    let mut delay = base;
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        match tick(Arc::clone(&reporter)).await {
            Ok(0) => {}
            Ok(written) => debug!("Reported {written} profiles"),
            Err(e) => warn!("Failed to report profiles: {e}"),
        }
        delay = add_jitter(base, jitter);
    }

    reporter.purge_all();
    info!("Flush loop stopped");
}

async fn tick<P: SampleAttrProducer>(reporter: Arc<Reporter<P>>) -> Result<usize, ReporterError> {
    tokio::task::spawn_blocking(move || {
        let result = reporter.report_profiles();
        reporter.purge_expired();
        result
    })
    .await
    .map_err(|e| ReporterError::FlushTask(e.to_string()))?
}
