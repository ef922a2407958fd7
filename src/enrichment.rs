/// Row-by-row enrichment engine
///
/// For each row from the start offset to the end of the table:
/// 1. Read and normalize the CNPJ cell (blank → skip)
/// 2. Look it up in the persistent cache (hit → project and move on)
/// 3. Reject identifiers with bad check digits (cached as invalid)
/// 4. Fetch from the registry, cache the result, project it into the row
/// 5. Report progress, checkpoint every N consulted rows, throttle
///
/// No row-level failure stops the batch. The only early exit is the shutdown
/// future, and even then the table is snapshotted and the cache flushed.
use crate::cache::{CacheStore, LookupCache};
use crate::cnpj::{normalize, Cnpj};
use crate::config::EnrichmentSettings;
use crate::errors::{AppError, ResultExt};
use crate::models::{LookupResult, INVALID_CNPJ_REASON};
use crate::progress::{format_eta, ProgressTracker};
use crate::projection::error_marker;
use crate::registry_client::RegistryLookup;
use crate::table::{Table, TableSink};
use std::future::Future;

/// What happened to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Blank identifier cell; nothing written.
    Skipped,
    /// Result replayed from the cache.
    CacheHit(LookupResult),
    /// Identifier without digits or with wrong check digits.
    Invalid,
    /// Fresh result from the registry.
    Fetched(LookupResult),
}

/// Counters for a finished (or interrupted) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_visited: usize,
    pub skipped: usize,
    pub cache_hits: usize,
    pub invalid: usize,
    /// Rows that triggered a registry request.
    pub fetched: usize,
    pub succeeded: usize,
    pub malformed: usize,
    pub transport_errors: usize,
    /// Snapshots written, intermediate and final.
    pub snapshots: usize,
    pub interrupted: bool,
}

impl RunSummary {
    fn record(&mut self, outcome: &RowOutcome) {
        self.rows_visited += 1;
        match outcome {
            RowOutcome::Skipped => self.skipped += 1,
            RowOutcome::CacheHit(_) => self.cache_hits += 1,
            RowOutcome::Invalid => self.invalid += 1,
            RowOutcome::Fetched(result) => {
                self.fetched += 1;
                match result {
                    LookupResult::Success(_) => self.succeeded += 1,
                    LookupResult::Malformed(_) => self.malformed += 1,
                    LookupResult::TransportError(_) => self.transport_errors += 1,
                    LookupResult::Invalid(_) => self.invalid += 1,
                }
            }
        }
    }
}

pub struct EnrichmentEngine<L, S>
where
    L: RegistryLookup,
    S: CacheStore,
{
    settings: EnrichmentSettings,
    lookup: L,
    cache: LookupCache<S>,
}

impl<L, S> EnrichmentEngine<L, S>
where
    L: RegistryLookup,
    S: CacheStore,
{
    pub fn new(settings: EnrichmentSettings, lookup: L, cache: LookupCache<S>) -> Self {
        Self {
            settings,
            lookup,
            cache,
        }
    }

    pub fn cache(&self) -> &LookupCache<S> {
        &self.cache
    }

    /// Enriches `table` in place, snapshotting through `sink`.
    ///
    /// When `shutdown` resolves the loop stops at its next await point; an
    /// in-flight request is dropped before it touches the cache or the row.
    /// The final snapshot and cache flush happen on both paths. Errors from
    /// intermediate checkpoints are logged; an error from the final snapshot
    /// is returned.
    pub async fn run<K, F>(
        &mut self,
        table: &mut Table,
        sink: &mut K,
        shutdown: F,
    ) -> Result<RunSummary, AppError>
    where
        K: TableSink,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let total = table.len();
        let start = self.settings.start_row;
        let mut summary = RunSummary::default();
        let mut progress = ProgressTracker::start(total.saturating_sub(start));

        tracing::info!(
            "Starting enrichment: {} rows, starting at row {}, projection '{}'",
            total,
            start,
            self.settings.projection
        );

        for idx in start..total {
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Interrupted at row {}, saving progress", idx + 1);
                    summary.interrupted = true;
                    break;
                }
                outcome = self.process_row(table, idx) => outcome,
            };
            summary.record(&outcome);
            log_outcome(idx, total, &outcome);

            if !matches!(outcome, RowOutcome::Fetched(_)) {
                continue;
            }

            let report = progress.record_consulted(total - (idx + 1));
            tracing::info!(
                "   → Progress: {}/{} | avg {:.2}s | ETA: {}",
                report.consulted,
                report.pending_total,
                report.average.as_secs_f64(),
                format_eta(report.eta)
            );

            let every = self.settings.checkpoint_every.max(1);
            if report.consulted % every == 0 {
                match sink.write_snapshot(table) {
                    Ok(()) => summary.snapshots += 1,
                    Err(e) => tracing::error!("Checkpoint after row {} failed: {}", idx + 1, e),
                }
            }

            if !self.settings.row_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        tracing::info!("Interrupted after row {}, saving progress", idx + 1);
                        summary.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.settings.row_delay) => {}
                }
            }
        }

        if let Err(e) = self.cache.flush() {
            tracing::error!("Final cache flush failed: {}", e);
        }
        sink.write_snapshot(table)
            .context("Failed to write final snapshot")?;
        summary.snapshots += 1;

        tracing::info!(
            "✓ Enrichment {}: {} rows visited, {} fetched ({} ok, {} malformed, {} transport errors), {} cache hits, {} invalid, {} skipped",
            if summary.interrupted { "interrupted" } else { "complete" },
            summary.rows_visited,
            summary.fetched,
            summary.succeeded,
            summary.malformed,
            summary.transport_errors,
            summary.cache_hits,
            summary.invalid,
            summary.skipped
        );

        Ok(summary)
    }

    /// Resolves one row and writes its output cells.
    ///
    /// The only await is the registry fetch; cache update and row write
    /// happen after it without yielding, so a row is either fully applied or
    /// untouched.
    pub async fn process_row(&mut self, table: &mut Table, idx: usize) -> RowOutcome {
        let raw = table.cell(idx, self.settings.id_column);
        if raw.trim().is_empty() {
            return RowOutcome::Skipped;
        }

        let cnpj = match normalize(raw) {
            Some(cnpj) => cnpj,
            None => {
                // Nothing to key a cache entry on
                self.write_cells(table, idx, &[Some(error_marker(INVALID_CNPJ_REASON))]);
                return RowOutcome::Invalid;
            }
        };

        if let Some(cached) = self.cache.get(&cnpj) {
            self.apply(table, idx, &cached);
            return RowOutcome::CacheHit(cached);
        }

        if !cnpj.is_valid() {
            let result = LookupResult::Invalid(INVALID_CNPJ_REASON.to_string());
            self.cache.put(cnpj, &result);
            self.apply(table, idx, &result);
            return RowOutcome::Invalid;
        }

        tracing::info!("[{}/{}] {} - consultando...", idx + 1, table.len(), cnpj.formatted());
        let result = self.lookup.fetch(&cnpj).await;
        self.record_fetch(table, idx, cnpj, &result);
        RowOutcome::Fetched(result)
    }

    fn record_fetch(&mut self, table: &mut Table, idx: usize, cnpj: Cnpj, result: &LookupResult) {
        self.cache.put(cnpj, result);
        self.apply(table, idx, result);
    }

    fn apply(&self, table: &mut Table, idx: usize, result: &LookupResult) {
        let cells = self.settings.projection.project(result);
        self.write_cells(table, idx, &cells);
    }

    fn write_cells(&self, table: &mut Table, idx: usize, cells: &[Option<String>]) {
        for (column, value) in self.settings.output_columns.iter().zip(cells) {
            if let Some(value) = value {
                table.set_cell(idx, *column, value.clone());
            }
        }
    }
}

fn log_outcome(idx: usize, total: usize, outcome: &RowOutcome) {
    let row = idx + 1;
    match outcome {
        RowOutcome::Skipped => tracing::debug!("[{}/{}] blank identifier, skipped", row, total),
        RowOutcome::CacheHit(result) => {
            tracing::info!("[{}/{}] CACHE → {}", row, total, describe(result))
        }
        RowOutcome::Invalid => tracing::warn!("⚠️ [{}/{}] CNPJ inválido", row, total),
        RowOutcome::Fetched(result) if result.is_success() => {
            tracing::info!("   → {}", describe(result))
        }
        RowOutcome::Fetched(result) => tracing::warn!("   → ERRO: {}", describe(result)),
    }
}

fn describe(result: &LookupResult) -> &str {
    match result {
        LookupResult::Success(record) => &record.situacao,
        failure => failure.error().unwrap_or_default(),
    }
}
