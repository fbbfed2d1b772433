//! Trace-driven test driver for the segregated-free-list heap.
//!
//! Every trace file is replayed on a freshly reset heap. Each allocation is
//! checked for alignment, heap bounds and overlap with live blocks, and its
//! payload is filled with a per-id byte pattern that is verified before the
//! block is released or moved. At the end a utilization table is printed.

#[macro_use]
mod log;
mod replay;
mod report;
mod trace;

use std::{
    fs, io,
    path::{Path, PathBuf},
    process,
};

use argh::FromArgs;
use segheap::{ArenaRegion, Heap, HeapConfig, InitError};
use snafu::{Location, ResultExt as _, Snafu, ensure};

use crate::{
    log::LogLevel,
    replay::{ReplayError, ReplayOptions, TraceStats},
    report::{Located, Report},
    trace::{ParseError, Trace},
};

/// Largest heap the driver hands to the allocator by default.
const DEFAULT_HEAP_LIMIT: usize = 20 * (1 << 20);

/// Replay malloc traces against the segregated-free-list heap.
#[derive(Debug, FromArgs)]
struct Args {
    /// trace files to replay
    #[argh(positional)]
    traces: Vec<PathBuf>,
    /// maximum heap size in bytes
    #[argh(option, default = "DEFAULT_HEAP_LIMIT")]
    heap_limit: usize,
    /// minimum number of bytes the heap grows by
    #[argh(option, default = "HeapConfig::DEFAULT_CHUNK_SIZE")]
    chunk_size: usize,
    /// validate the whole heap after every operation
    #[argh(switch)]
    check: bool,
    /// log every operation
    #[argh(switch, short = 'v')]
    verbose: bool,
    /// only log warnings and errors
    #[argh(switch, short = 'q')]
    quiet: bool,
}

#[derive(Debug, Snafu)]
enum DriverError {
    #[snafu(display("no trace files given"))]
    NoTraces {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{failed} of {total} traces failed"))]
    TracesFailed {
        failed: usize,
        total: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to create a heap of {limit} bytes"))]
    CreateHeap {
        limit: usize,
        source: InitError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to read trace, path={}", path.display()))]
    ReadTrace {
        path: PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to parse trace, path={}", path.display()))]
    ParseTrace {
        path: PathBuf,
        source: ParseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to replay trace, path={}", path.display()))]
    Replay {
        path: PathBuf,
        #[snafu(source(from(ReplayError, Box::new)))]
        source: Box<ReplayError>,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for DriverError {
    fn location(&self) -> Location {
        match self {
            Self::NoTraces { location }
            | Self::TracesFailed { location, .. }
            | Self::CreateHeap { location, .. }
            | Self::ReadTrace { location, .. }
            | Self::ParseTrace { location, .. }
            | Self::Replay { location, .. } => *location,
        }
    }
}

fn main() {
    let args: Args = argh::from_env();

    let level = if args.verbose {
        LogLevel::Trace
    } else if args.quiet {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };
    log::init(level);

    if let Err(err) = run(&args) {
        let report = Report::new(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), DriverError> {
    ensure!(!args.traces.is_empty(), NoTracesSnafu);

    let config = HeapConfig::new().with_chunk_size(args.chunk_size);
    let region = ArenaRegion::with_capacity(args.heap_limit);
    let mut heap = Heap::with_config(region, config).context(CreateHeapSnafu {
        limit: args.heap_limit,
    })?;
    info!(
        "heap limit {} bytes, chunk size {} bytes",
        args.heap_limit,
        config.chunk_size()
    );

    let options = ReplayOptions { check: args.check };
    let mut results = Vec::with_capacity(args.traces.len());
    for path in &args.traces {
        match replay_file(&mut heap, path, options) {
            Ok(stats) => {
                info!(
                    "{}: {} ops, utilization {:.1}%",
                    path.display(),
                    stats.ops,
                    stats.utilization() * 100.0
                );
                results.push((path.as_path(), stats));
            }
            Err(err) => error!("{}", Report::new(err)),
        }
    }

    if !results.is_empty() {
        print_summary(&results);
    }
    let failed = args.traces.len() - results.len();
    ensure!(
        failed == 0,
        TracesFailedSnafu {
            failed,
            total: args.traces.len(),
        }
    );
    Ok(())
}

fn replay_file(
    heap: &mut Heap<ArenaRegion>,
    path: &Path,
    options: ReplayOptions,
) -> Result<TraceStats, DriverError> {
    let text = fs::read_to_string(path).context(ReadTraceSnafu { path })?;
    let trace: Trace = text.parse().context(ParseTraceSnafu { path })?;
    debug!(
        "{}: {} ids, {} ops, suggested heap {} bytes",
        path.display(),
        trace.num_ids,
        trace.ops.len(),
        trace.suggested_heap_size
    );
    replay::replay(heap, &trace, options).context(ReplaySnafu { path })
}

#[expect(clippy::cast_precision_loss)]
fn print_summary(results: &[(&Path, TraceStats)]) {
    println!("{:>5}  {:>8}  {:>10}  {:>10}  {:>6}  trace", "#", "ops", "peak", "heap", "util");
    for (index, (path, stats)) in results.iter().enumerate() {
        println!(
            "{index:>5}  {:>8}  {:>10}  {:>10}  {:>5.1}%  {}",
            stats.ops,
            stats.peak_payload,
            stats.heap_bytes,
            stats.utilization() * 100.0,
            path.display()
        );
    }

    let total_ops: usize = results.iter().map(|(_, stats)| stats.ops).sum();
    let average = results
        .iter()
        .map(|(_, stats)| stats.utilization())
        .sum::<f64>()
        / results.len() as f64;
    println!(
        "{:>5}  {total_ops:>8}  {:>10}  {:>10}  {:>5.1}%",
        "total",
        "",
        "",
        average * 100.0
    );
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_error_keeps_cause() {
        let mut heap = Heap::new(ArenaRegion::with_capacity(1024)).unwrap();
        let trace: Trace = "0 1 1 1\na 0 4096\n".parse().unwrap();
        let err = replay::replay(&mut heap, &trace, ReplayOptions::default())
            .context(ReplaySnafu { path: "big.rep" })
            .unwrap_err();
        assert!(matches!(
            &err,
            DriverError::Replay { source, .. }
                if matches!(**source, ReplayError::OutOfMemory { index: 0, size: 4096, .. })
        ));

        let text = Report::new(err).to_string();
        assert!(text.contains("failed to replay trace, path=big.rep"));
        assert!(text.contains("op 0: allocating 4096 bytes for id 0 failed"));
    }
}
