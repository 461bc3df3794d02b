use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use stackfold::attributes::NoExtraAttrs;
use stackfold::collector::Collector;
use stackfold::config::CollectorConfig;
use stackfold::domain::{CollectorError, Origin, Pid};
use stackfold::sink::{FnSink, ProfileBatch, ProfileSink};
use stackfold::symbolization::DwarfResolver;
use stackfold::synthetic::SyntheticSource;

fn capture_sink() -> (Arc<dyn ProfileSink>, Arc<Mutex<Vec<ProfileBatch>>>) {
    let batches: Arc<Mutex<Vec<ProfileBatch>>> = Arc::default();
    let captured = Arc::clone(&batches);
    let sink: Arc<dyn ProfileSink> = Arc::new(FnSink::new("capture", move |batch: &ProfileBatch| {
        captured.lock().push(batch.clone());
        Ok(())
    }));
    (sink, batches)
}

fn collector(sink: Arc<dyn ProfileSink>) -> Collector<NoExtraAttrs> {
    let source = SyntheticSource::new(2, env!("CARGO_BIN_EXE_stackfold")).with_seed(11);
    Collector::new(Arc::new(DwarfResolver::default()), sink, NoExtraAttrs, Box::new(source))
}

#[tokio::test(start_paused = true)]
async fn test_synthetic_source_produces_profiles() {
    let (sink, batches) = capture_sink();
    let mut collector = collector(sink);
    let config = CollectorConfig { report_interval: Duration::from_secs(1), ..CollectorConfig::default() };

    collector.start(config).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    collector.stop().await;
    assert!(!collector.is_running());

    let batches = batches.lock();
    assert!(!batches.is_empty());
    let pids: Vec<Pid> = batches[0].profiles.keys().copied().collect();
    assert_eq!(pids, vec![Pid(1000), Pid(1001)]);
    for profile in batches.iter().flat_map(|batch| batch.profiles.values()) {
        assert!(profile.total(Origin::Sampling) > 0);
        assert_eq!(profile.total(Origin::OffCpu), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_restart_keeps_collecting() {
    let (sink, batches) = capture_sink();
    let mut collector = collector(sink);

    collector.start(CollectorConfig::default()).await.unwrap();
    collector.start(CollectorConfig::default()).await.unwrap();
    assert_eq!(collector.generation(), Some(1));

    let faster = CollectorConfig { report_interval: Duration::from_secs(1), ..CollectorConfig::default() };
    collector.start(faster).await.unwrap();
    assert_eq!(collector.generation(), Some(2));

    tokio::time::sleep(Duration::from_secs(2)).await;
    collector.stop().await;
    assert!(!batches.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancellation_stops_source() {
    let (sink, _) = capture_sink();
    let parent = CancellationToken::new();
    let mut collector = collector(sink).with_parent_token(parent.clone());
    collector.start(CollectorConfig::default()).await.unwrap();
    let reporter = collector.reporter().unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    parent.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!collector.is_running());

    // Drain what was emitted before cancellation; nothing may follow
    reporter.store().swap_all();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(reporter.store().is_empty());

    assert!(matches!(
        collector.start(CollectorConfig::default()).await,
        Err(CollectorError::Cancelled)
    ));
}
