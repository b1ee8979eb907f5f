use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};
use webrank_pipeline::{run_build, BuildConfig};

#[derive(Parser)]
#[command(name = "webrank-pipeline")]
#[command(about = "Build the partitioned TF-IDF index from a crawl", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and atomically publish the index
    Build {
        /// Crawl input: a JSON/JSONL file or a directory of them
        #[arg(long)]
        input: PathBuf,
        /// Live index directory to publish into
        #[arg(long)]
        output: PathBuf,
        /// Number of index partitions
        #[arg(long, default_value_t = 3)]
        shards: u32,
        /// PageRank table (doc_id,score lines) to bundle with the index
        #[arg(long)]
        pagerank: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            shards,
            pagerank,
        } => {
            let cfg = BuildConfig {
                input,
                output,
                num_shards: shards,
                pagerank,
            };
            // The embedding provider is wired in by deployments that have
            // one; the CLI builds a lexical-only index.
            let summary = run_build(&cfg, None)?;
            tracing::info!(
                num_docs = summary.num_docs,
                num_terms = summary.num_terms,
                num_shards = summary.num_shards,
                "build complete"
            );
            Ok(())
        }
    }
}
