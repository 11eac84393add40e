use clap::{Parser, Subcommand};

/// Wayfinder - venue discovery and enrichment service
///
/// Long-running roles:
/// - web: HTTP query/scrape API
/// - enricher: crawl job scheduler and worker pool
/// - embedder: embedding producer for enriched venues
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run every role in one process (default)
    Serve {
        /// Override the web server port
        #[arg(long)]
        port: Option<u16>,
        /// Override the worker pool size
        #[arg(long)]
        worker_count: Option<usize>,
    },
    /// Run the HTTP API only
    Api {
        /// Override the web server port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the crawl worker pool only
    Worker {
        /// Override the worker pool size
        #[arg(long)]
        worker_count: Option<usize>,
        /// Override the per-claim batch size
        #[arg(long)]
        worker_batch_size: Option<u32>,
    },
    /// Run the background refresh scheduler only
    Scheduler {
        /// Override the scheduler cycle interval, in seconds
        #[arg(long)]
        scheduler_sleep_seconds: Option<u64>,
        /// Override the per-cycle enqueue budget
        #[arg(long)]
        scheduler_batch_size: Option<u32>,
    },
    /// Run the embedding producer only
    Embedder,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}
