use cnpj_enrichment::cache::{JsonFileStore, LookupCache};
use cnpj_enrichment::config::Config;
use cnpj_enrichment::core::enrichment::EnrichmentEngine;
use cnpj_enrichment::integrations::registry_client::BrasilApiClient;
use cnpj_enrichment::integrations::table::{CsvWorkbook, TableSource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the enrichment batch.
///
/// This function initializes:
/// - Logging and tracing.
/// - Configuration loading.
/// - The source table (or the previous partial output when resuming).
/// - The persistent lookup cache.
/// - The BrasilAPI client.
///
/// It then runs the engine until the table is done or Ctrl-C is pressed.
/// Both paths end with a final snapshot and cache flush.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok if the run completes or is interrupted cleanly.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cnpj_enrichment=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let mut workbook = CsvWorkbook::new(&config.source_path, &config.output_path)
        .with_sheet(config.sheet.clone())
        .with_delimiter(config.delimiter);

    let mut table = if config.resume_from_output && config.output_path.exists() {
        tracing::info!(
            "Resuming from previous output: {}",
            config.output_path.display()
        );
        workbook.read_output()?
    } else {
        workbook.read_table()?
    };

    let cache = LookupCache::load(
        JsonFileStore::new(&config.cache_path)
            .with_allowlist(config.registry.cnae_allowlist.clone()),
    );

    let client = BrasilApiClient::new(&config.registry)?;
    tracing::info!("✓ Registry client initialized: {}", config.registry.base_url);

    let mut engine = EnrichmentEngine::new(config.enrichment.clone(), client, cache);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupt received"),
            Err(e) => {
                // Without a signal handler the run can only end by finishing the table
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let summary = engine.run(&mut table, &mut workbook, shutdown).await?;

    tracing::info!(
        "[OK] Cache saved: {} ({} entries)",
        config.cache_path.display(),
        engine.cache().len()
    );
    if summary.interrupted {
        tracing::info!("[OK] Partial output saved: {}", config.output_path.display());
    } else {
        tracing::info!("[OK] Processing complete: {}", config.output_path.display());
    }

    Ok(())
}
