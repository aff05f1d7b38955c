// ABOUTME: Orchestrates one sync cycle and the full-reload flow
// ABOUTME: Owns the failure boundary; the watermark commits last, on success only

use anyhow::{Context, Result};
use mysql_async::Conn;
use std::time::Instant;

use crate::config::EtlConfig;
use crate::extract::Extractor;
use crate::load::SinkClient;
use crate::schema::SchemaReconciler;
use crate::transform::Transformer;
use crate::watermark::WatermarkStore;

/// What one cycle accomplished.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub rows_synced: u64,
    pub batches: u64,
    pub watermark: u64,
    pub duration_ms: u64,
}

impl CycleOutcome {
    /// True when the cycle found nothing to do. Still a success.
    pub fn is_noop(&self) -> bool {
        self.rows_synced == 0
    }
}

/// Sequences reconcile, extract, transform, load and commit for one cycle.
///
/// Any failure aborts the cycle before the watermark commit, so the next
/// invocation retries the same range. A load that completed without its
/// commit re-delivers the batch on retry: at-least-once, by design of the
/// two stores involved. The engine takes no lock against concurrent cycles;
/// the external scheduler must not overlap invocations.
pub struct SyncOrchestrator<'a> {
    config: &'a EtlConfig,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(config: &'a EtlConfig) -> Self {
        Self { config }
    }

    /// One bounded incremental cycle. Safe to invoke repeatedly; a cycle with
    /// no pending rows is a no-op that leaves the watermark untouched.
    pub async fn run_incremental(
        &self,
        conn: &mut Conn,
        sink: &SinkClient,
        store: &WatermarkStore,
    ) -> Result<CycleOutcome> {
        let start = Instant::now();
        let reconciler = SchemaReconciler::new(self.config);
        let extractor = Extractor::new(self.config);
        let transformer = Transformer::new(self.config);

        let watermark = store
            .get()
            .context("Failed to read watermark at cycle start")?;
        tracing::info!(
            "Starting incremental cycle from watermark {} (batch size {})",
            watermark,
            self.config.sync.batch_size
        );

        let (business_cols, sink_cols) = self.reconcile(conn, sink, &reconciler).await?;

        let batch = extractor
            .extract(
                conn,
                &business_cols,
                watermark,
                self.config.sync.batch_size,
            )
            .await?;
        if batch.is_empty() {
            tracing::info!("No new events past watermark {}, up to date", watermark);
            return Ok(CycleOutcome {
                rows_synced: 0,
                batches: 0,
                watermark,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }
        tracing::info!("Extracted {} events past watermark {}", batch.len(), watermark);

        let batch_max = batch.max_log_id().unwrap_or(watermark);
        let rows = transformer.transform(batch, &sink_cols, &reconciler)?;

        let (count, max_id) = sink
            .load(&self.config.sink.table, &sink_cols, &rows)
            .await?;

        // the loaded max event_id and the batch's last log id agree unless the
        // sink has no event_id column; take the max so the cursor never regresses
        let new_watermark = max_id.max(batch_max);
        store.set(new_watermark).context(
            "Failed to commit watermark after a successful load; \
             the batch will be re-delivered on the next cycle",
        )?;

        self.log_sink_total(sink).await;
        tracing::info!(
            "Cycle complete: {} rows synced, watermark {} -> {}",
            count,
            watermark,
            new_watermark
        );

        Ok(CycleOutcome {
            rows_synced: count,
            batches: 1,
            watermark: new_watermark,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Truncate the sink and replay the whole source history, then commit the
    /// highest id seen. Run at most once before incremental mode begins;
    /// re-running with no new source data lands the same rows and watermark.
    pub async fn run_full_reload(
        &self,
        conn: &mut Conn,
        sink: &SinkClient,
        store: &WatermarkStore,
    ) -> Result<CycleOutcome> {
        let start = Instant::now();
        let reconciler = SchemaReconciler::new(self.config);
        let extractor = Extractor::new(self.config);
        let transformer = Transformer::new(self.config);
        let page_size = self.config.sync.batch_size;

        let pending = extractor.count_pending(conn, 0).await?;
        tracing::info!("Full reload: {} events in source history", pending);

        let (business_cols, sink_cols) = self.reconcile(conn, sink, &reconciler).await?;

        sink.truncate(&self.config.sink.table).await?;

        let mut cursor = 0u64;
        let mut rows_synced = 0u64;
        let mut batches = 0u64;
        let mut max_seen = 0u64;

        loop {
            let batch = extractor
                .extract(conn, &business_cols, cursor, page_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            let page_len = batch.len();
            let page_max = batch.max_log_id().unwrap_or(cursor);
            let rows = transformer.transform(batch, &sink_cols, &reconciler)?;
            let (count, max_id) = sink
                .load(&self.config.sink.table, &sink_cols, &rows)
                .await?;

            rows_synced += count;
            batches += 1;
            cursor = page_max;
            max_seen = max_seen.max(max_id).max(page_max);

            tracing::info!(
                "Reload progress: {} / {} rows ({} pages, cursor {})",
                rows_synced,
                pending,
                batches,
                cursor
            );

            if page_len < page_size {
                break;
            }
        }

        store
            .set(max_seen)
            .context("Failed to commit watermark after full reload")?;

        self.log_sink_total(sink).await;
        tracing::info!(
            "Full reload complete: {} rows in {} pages, watermark {}",
            rows_synced,
            batches,
            max_seen
        );

        Ok(CycleOutcome {
            rows_synced,
            batches,
            watermark: max_seen,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Refetch both schemas and compute the selectable business columns.
    /// Runs every cycle so live schema drift surfaces at the next boundary.
    async fn reconcile(
        &self,
        conn: &mut Conn,
        sink: &SinkClient,
        reconciler: &SchemaReconciler<'_>,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let source_cols = reconciler
            .source_columns(conn, &self.config.source.entity_table)
            .await?;
        let business_cols = reconciler.selectable(&source_cols);
        let sink_cols = sink.columns(&self.config.sink.table).await?;
        tracing::debug!(
            "Reconciled schemas: {} selectable source columns, {} sink columns",
            business_cols.len(),
            sink_cols.len()
        );
        Ok((business_cols, sink_cols))
    }

    /// Post-commit bookkeeping only; a failed count must not fail the cycle.
    async fn log_sink_total(&self, sink: &SinkClient) {
        match sink.total_rows(&self.config.sink.table).await {
            Ok(total) => tracing::info!(
                "Sink {}.{} now holds {} rows",
                self.config.sink.database,
                self.config.sink.table,
                total
            ),
            Err(e) => tracing::warn!("Failed to count sink rows after load: {}", e),
        }
    }
}
