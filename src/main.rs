use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use product_vectors::commands::{
    SearchArgs, drop_collection, run_ingest, run_search, run_setup, show_diagnostics, show_health,
};
use product_vectors::search::SearchMode;

#[derive(Parser)]
#[command(name = "product-vectors")]
#[command(about = "Tensor and text-embedding similarity search over a Milvus vector store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, create both product collections and verify their health
    Setup,
    /// Show connection and collection health
    Health,
    /// List every collection with its row count and load state
    Diagnostics,
    /// Search by tensor, text embedding, or both
    Search {
        /// tensor, embedding or hybrid
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
        /// JSON file holding the 13-dimensional tensor query vector
        #[arg(long)]
        tensor: Option<PathBuf>,
        /// JSON file holding the 792-dimensional embedding query vector
        #[arg(long)]
        embedding: Option<PathBuf>,
        /// Number of results (defaults to the configured top_k)
        #[arg(long)]
        top_k: Option<usize>,
        /// Tensor weight in hybrid mode, between 0 and 1
        #[arg(long)]
        weight: Option<f64>,
        /// Filter expression passed to the service, e.g. 'brand == "Acme"'
        #[arg(long)]
        filter: Option<String>,
    },
    /// Insert records from JSON array files
    Ingest {
        #[arg(long)]
        tensors: Option<PathBuf>,
        #[arg(long)]
        embeddings: Option<PathBuf>,
    },
    /// Drop a collection and all of its data
    Drop {
        /// Collection name
        collection: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Setup => {
            run_setup().await?;
        }
        Commands::Health => {
            show_health().await?;
        }
        Commands::Diagnostics => {
            show_diagnostics().await?;
        }
        Commands::Search {
            mode,
            tensor,
            embedding,
            top_k,
            weight,
            filter,
        } => {
            run_search(SearchArgs {
                mode,
                tensor,
                embedding,
                top_k,
                weight,
                filter,
            })
            .await?;
        }
        Commands::Ingest {
            tensors,
            embeddings,
        } => {
            run_ingest(tensors, embeddings).await?;
        }
        Commands::Drop { collection } => {
            drop_collection(&collection).await?;
        }
    }

    Ok(())
}
