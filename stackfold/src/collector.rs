//! Pipeline supervisor
//!
//! A [`Collector`] owns at most one running pipeline: a [`Reporter`], its
//! flush loop and the attached [`TraceSource`]. Starting again with the same
//! interval, frequency and off-CPU threshold is a no-op; any change tears the
//! old pipeline down before the new one starts.
//!
//! Cancelling the parent token stops the flush loop and the trace source of
//! the running pipeline; the collector then reports itself stopped and
//! refuses to start again.

use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::attributes::SampleAttrProducer;
use crate::config::CollectorConfig;
use crate::domain::CollectorError;
use crate::reporter::{spawn_flush_loop, FlushHandle, Reporter, TraceReporter};
use crate::sink::ProfileSink;
use crate::symbolization::SymbolResolver;

/// The capture layer
///
/// Delivers trace events and metadata to the reporter it is attached to.
pub trait TraceSource: Send {
    /// Start delivering events until `token` is cancelled or `detach` runs
    ///
    /// # Errors
    /// Returns an error if the source cannot start; the pipeline is not
    /// started in that case
    fn attach(
        &mut self,
        reporter: Arc<dyn TraceReporter>,
        config: &CollectorConfig,
        token: CancellationToken,
    ) -> Result<()>;

    /// Stop delivering events; must be safe to call when not attached
    fn detach(&mut self);
}

struct Pipeline<P: SampleAttrProducer> {
    config: CollectorConfig,
    reporter: Arc<Reporter<P>>,
    flush: FlushHandle,
    generation: u64,
}

impl<P: SampleAttrProducer> Pipeline<P> {
    fn is_live(&self) -> bool {
        !self.flush.is_cancelled() && !self.flush.is_finished()
    }
}

pub struct Collector<P: SampleAttrProducer + Clone> {
    symbols: Arc<dyn SymbolResolver>,
    sink: Arc<dyn ProfileSink>,
    producer: P,
    source: Box<dyn TraceSource>,
    parent: CancellationToken,
    pipeline: Option<Pipeline<P>>,
    generations: u64,
}

impl<P: SampleAttrProducer + Clone> Collector<P> {
    pub fn new(
        symbols: Arc<dyn SymbolResolver>,
        sink: Arc<dyn ProfileSink>,
        producer: P,
        source: Box<dyn TraceSource>,
    ) -> Self {
        Self {
            symbols,
            sink,
            producer,
            source,
            parent: CancellationToken::new(),
            pipeline: None,
            generations: 0,
        }
    }

    /// Tie every pipeline's flush loop to `token`
    #[must_use]
    pub fn with_parent_token(mut self, token: CancellationToken) -> Self {
        self.parent = token;
        self
    }

    /// Start (or keep) a pipeline for `config`
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, a cache cannot be
    /// built, the trace source fails to attach, or the parent token is
    /// cancelled
    pub async fn start(&mut self, config: CollectorConfig) -> Result<(), CollectorError> {
        if self.parent.is_cancelled() {
            self.stop().await;
            return Err(CollectorError::Cancelled);
        }
        if let Some(pipeline) = &self.pipeline {
            if pipeline.is_live() && pipeline.config.same_pipeline(&config) {
                debug!("Collector already running generation {}", pipeline.generation);
                return Ok(());
            }
        }
        config.validate()?;
        self.stop().await;

        let reporter = Arc::new(Reporter::new(
            config.reporter_config(),
            Arc::clone(&self.symbols),
            Arc::clone(&self.sink),
            self.producer.clone(),
        )?);
        let flush = spawn_flush_loop(Arc::clone(&reporter), &self.parent);

        let ingest: Arc<dyn TraceReporter> = reporter.clone();
        if let Err(e) = self.source.attach(ingest, &config, flush.token().clone()) {
            flush.shutdown().await;
            return Err(CollectorError::SourceAttach(e));
        }

        self.generations += 1;
        info!(
            "Collector started generation {}: {} Hz, report every {:?}, off-cpu threshold {}",
            self.generations, config.samples_per_second, config.report_interval, config.off_cpu_threshold
        );
        self.pipeline = Some(Pipeline { config, reporter, flush, generation: self.generations });
        Ok(())
    }

    /// Stop the running pipeline, if any
    pub async fn stop(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            return;
        };
        self.source.detach();
        pipeline.flush.shutdown().await;
        info!("Collector stopped generation {}", pipeline.generation);
    }

    /// Identity of the running pipeline
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.live().map(|pipeline| pipeline.generation)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.live().is_some()
    }

    fn live(&self) -> Option<&Pipeline<P>> {
        self.pipeline.as_ref().filter(|pipeline| pipeline.is_live())
    }

    #[must_use]
    pub fn config(&self) -> Option<&CollectorConfig> {
        self.live().map(|pipeline| &pipeline.config)
    }

    /// Reporter of the most recent pipeline, even if it was cancelled
    #[must_use]
    pub fn reporter(&self) -> Option<Arc<Reporter<P>>> {
        self.pipeline.as_ref().map(|pipeline| Arc::clone(&pipeline.reporter))
    }
}

impl<P: SampleAttrProducer + Clone> Drop for Collector<P> {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            self.source.detach();
            pipeline.flush.stop();
        }
    }
}
