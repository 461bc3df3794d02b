//! # stackfold - Main Entry Point
//!
//! Runs the aggregation pipeline against the synthetic trace source:
//! - **Log mode** (default): one summary line per process and flush
//! - **File mode** (`--output profiles.json`): every flush replaces the file
//!
//! Stops on Ctrl-C or after `--duration` seconds.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use stackfold::attributes::{CpuAttrs, NoExtraAttrs, SampleAttrProducer};
use stackfold::cli::Args;
use stackfold::collector::Collector;
use stackfold::procfs::present_cores;
use stackfold::sink::{JsonFileSink, LogSink, MultiSink, ProfileSink};
use stackfold::symbolization::DwarfResolver;
use stackfold::synthetic::SyntheticSource;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("invalid collector configuration") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn build_sink(args: &Args) -> Arc<dyn ProfileSink> {
    let mut sinks = MultiSink::default();
    if let Some(ref path) = args.output {
        sinks.push(Box::new(JsonFileSink::new(path)));
    }
    if !args.quiet || sinks.is_empty() {
        sinks.push(Box::new(LogSink));
    }
    Arc::new(sinks)
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    if !args.quiet {
        println!("stackfold v{}", env!("CARGO_PKG_VERSION"));
    }

    if args.split_by_cpu {
        serve(&args, CpuAttrs).await
    } else {
        serve(&args, NoExtraAttrs).await
    }
}

async fn serve<P: SampleAttrProducer + Clone>(args: &Args, producer: P) -> Result<()> {
    let cores = present_cores();
    let config = args.collector_config(cores);
    info!("Present cores: {cores}, trace cache size: {}", config.reporter_config().trace_cache_size());

    let shutdown = CancellationToken::new();
    let source = SyntheticSource::for_current_exe(args.processes)?;
    let mut collector = Collector::new(
        Arc::new(DwarfResolver::default()),
        build_sink(args),
        producer,
        Box::new(source),
    )
    .with_parent_token(shutdown.clone());

    collector.start(config).await.context("Failed to start collector")?;

    let exit_reason = match args.run_for() {
        Some(limit) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "interrupted",
            () = tokio::time::sleep(limit) => "duration limit reached",
        },
        None => {
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
            "interrupted"
        }
    };

    info!("Stopping ({exit_reason})");
    collector.stop().await;
    shutdown.cancel();
    Ok(())
}
