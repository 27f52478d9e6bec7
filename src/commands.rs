use anyhow::{Context, Result, bail};
use console::style;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Settings, get_config_dir};
use crate::connection::ConnectionProvider;
use crate::health::{HealthChecker, format_diagnostics, format_health_report};
use crate::ingest::{BatchInsertResult, EmbeddingRecord, TensorRecord, VectorIngestor};
use crate::milvus::FilterExpr;
use crate::schema::{CollectionManager, embedding_schema, tensor_schema};
use crate::search::{RankedProduct, SearchEngine, SearchMode, SearchOptions, SearchRequest};

/// Overrides for a single `search` invocation
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub mode: SearchMode,
    pub tensor: Option<PathBuf>,
    pub embedding: Option<PathBuf>,
    pub top_k: Option<usize>,
    pub weight: Option<f64>,
    pub filter: Option<String>,
}

fn connect() -> Result<Arc<ConnectionProvider>> {
    let provider = ConnectionProvider::global();
    provider
        .initialize_from_environment()
        .context("Failed to connect to the vector service")?;
    Ok(provider)
}

/// Connect, create both collections and verify the result.
///
/// Fails when the service is unreachable, a collection cannot be created,
/// or the final health check is not healthy.
#[inline]
pub async fn run_setup() -> Result<()> {
    println!("{}", style("Setting up product vector collections").bold());

    let provider = connect()?;
    let result = setup_collections(&provider).await;
    provider.close();
    result
}

async fn setup_collections(provider: &Arc<ConnectionProvider>) -> Result<()> {
    let checker = HealthChecker::new(Arc::clone(provider));

    let connection = provider.check_health().await;
    if !connection.connected {
        let reason = connection.error.unwrap_or_else(|| "unknown error".to_string());
        println!("{} Connection failed: {}", style("✗").red(), reason);
        bail!("Vector service is unreachable: {}", reason);
    }
    println!(
        "{} Connected to {} (server {})",
        style("✓").green(),
        connection.endpoint.as_deref().unwrap_or("?"),
        connection.version.as_deref().unwrap_or("unknown")
    );

    let manager = CollectionManager::new(Arc::clone(provider));
    for schema in [tensor_schema(), embedding_schema()] {
        manager
            .create_collection(&schema)
            .await
            .with_context(|| format!("Failed to create collection '{}'", schema.name))?;
        println!(
            "{} Collection '{}' ready (dim {})",
            style("✓").green(),
            schema.name,
            schema.dimension().unwrap_or_default()
        );
    }

    let report = checker.perform_health_check().await;
    println!();
    print!("{}", format_health_report(&report));

    if !report.healthy {
        error!("Setup finished but the health check is not healthy");
        bail!("Setup completed with an unhealthy vector service");
    }

    info!("Setup completed");
    println!();
    println!("{} Setup complete", style("✓").green().bold());
    Ok(())
}

/// Print the health report. Returns an error when the service is unhealthy.
#[inline]
pub async fn show_health() -> Result<()> {
    let provider = connect()?;
    let report = HealthChecker::new(Arc::clone(&provider))
        .perform_health_check()
        .await;
    provider.close();

    print!("{}", format_health_report(&report));
    if !report.healthy {
        bail!("Vector service is unhealthy");
    }
    Ok(())
}

#[inline]
pub async fn show_diagnostics() -> Result<()> {
    let provider = connect()?;
    let diagnostics = HealthChecker::new(Arc::clone(&provider))
        .get_diagnostics()
        .await;
    provider.close();

    print!("{}", format_diagnostics(&diagnostics));
    Ok(())
}

/// Run a search with query vectors read from JSON files
#[inline]
pub async fn run_search(args: SearchArgs) -> Result<()> {
    let settings = Settings::load(get_config_dir()?)?;

    let mut options = SearchOptions::from(&settings.search);
    if let Some(top_k) = args.top_k {
        options.top_k = top_k;
    }
    if let Some(weight) = args.weight {
        options.tensor_weight = weight;
    }
    options.filter = args.filter.map(FilterExpr::from);

    let request = SearchRequest {
        mode: args.mode,
        tensor_vector: args.tensor.as_deref().map(read_json).transpose()?,
        embedding_vector: args.embedding.as_deref().map(read_json).transpose()?,
        options,
    };

    let provider = connect()?;
    let results = SearchEngine::new(Arc::clone(&provider))
        .search(&request)
        .await
        .with_context(|| format!("{} search failed", request.mode));
    provider.close();
    let results = results?;

    print_results(request.mode, &results);
    Ok(())
}

fn print_results(mode: SearchMode, results: &[RankedProduct]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    println!(
        "{} results ({} search):",
        style(results.len()).bold(),
        mode
    );
    for result in results {
        println!(
            "{:>3}. {} {}",
            result.rank,
            style(&result.id).cyan(),
            style(format!("{:.4}", result.score)).dim()
        );
        for (key, value) in &result.metadata {
            println!("       {}: {}", key, value);
        }
    }
}

/// Insert tensor and/or embedding records from JSON array files
#[inline]
pub async fn run_ingest(tensors: Option<PathBuf>, embeddings: Option<PathBuf>) -> Result<()> {
    if tensors.is_none() && embeddings.is_none() {
        bail!("Nothing to ingest: pass --tensors and/or --embeddings");
    }

    let tensor_records: Vec<TensorRecord> = tensors
        .as_deref()
        .map(read_json)
        .transpose()?
        .unwrap_or_default();
    let embedding_records: Vec<EmbeddingRecord> = embeddings
        .as_deref()
        .map(read_json)
        .transpose()?
        .unwrap_or_default();

    let provider = connect()?;
    let ingestor = VectorIngestor::new(Arc::clone(&provider));

    let mut all_succeeded = true;
    if tensors.is_some() {
        let result = ingestor.insert_batch(&tensor_records).await;
        all_succeeded &= report_batch("tensor", &result);
    }
    if embeddings.is_some() {
        let result = ingestor.insert_batch(&embedding_records).await;
        all_succeeded &= report_batch("embedding", &result);
    }
    provider.close();

    if !all_succeeded {
        bail!("Some records failed to insert");
    }
    Ok(())
}

fn report_batch(label: &str, result: &BatchInsertResult) -> bool {
    let marker = if result.success {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "{} {} records: {} inserted, {} failed",
        marker, label, result.inserted, result.failed
    );
    for item in &result.errors {
        let position = item
            .index
            .map_or_else(|| "batch".to_string(), |i| format!("#{}", i));
        println!(
            "    {} {}: {}",
            position,
            item.id.as_deref().unwrap_or("-"),
            item.message
        );
    }
    result.success
}

/// Drop a collection and everything in it
#[inline]
pub async fn drop_collection(name: &str) -> Result<()> {
    let provider = connect()?;
    let manager = CollectionManager::new(Arc::clone(&provider));

    if !manager.collection_exists(name).await {
        warn!("Collection '{}' not found", name);
        println!("Collection '{}' does not exist.", name);
        provider.close();
        return Ok(());
    }

    let result = manager
        .drop_collection(name)
        .await
        .with_context(|| format!("Failed to drop collection '{}'", name));
    provider.close();
    result?;

    println!("{} Dropped collection '{}'", style("✓").green(), name);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON from {}", path.display()))
}
