// ABOUTME: Bounded, ordered extraction of pending event rows from MySQL
// ABOUTME: Joins the log relation to its parent entity and pages by log id

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::Conn;

use crate::config::EtlConfig;
use crate::value::Value;

/// Columns contributed by the log relation, in the order the extraction query
/// selects them. The log timestamp is aliased so it cannot collide with the
/// parent entity's own `created_at`.
pub const LOG_COLUMNS: &[&str] = &[
    "order_log_id",
    "order_id",
    "order_status_id",
    "created_at_log",
];

/// One joined source row: the log entry plus the parent entity's current
/// business attributes. Produced fresh on each extraction, never retained.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub log_id: u64,
    pub values: Vec<Value>,
}

/// An ordered slice of pending rows sharing one column header.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub columns: Vec<String>,
    pub rows: Vec<SourceEvent>,
}

impl EventBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Highest log id in the batch. Rows arrive ordered ascending, so this is
    /// the last row's id and the next cycle's resume point.
    pub fn max_log_id(&self) -> Option<u64> {
        self.rows.last().map(|row| row.log_id)
    }
}

/// Quote a MySQL identifier with backticks, doubling embedded backticks.
pub fn quote_mysql_ident(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Build the extraction query: log rows joined to their parent entity,
/// filtered past the watermark, ordered by log id, bounded by the batch size.
/// The watermark and limit are bound parameters.
pub fn build_extract_query(
    log_table: &str,
    entity_table: &str,
    business_cols: &[String],
) -> String {
    let mut select = vec![
        format!("ol.{}", quote_mysql_ident("order_log_id")),
        format!("ol.{}", quote_mysql_ident("order_id")),
        format!("ol.{}", quote_mysql_ident("order_status_id")),
        format!("ol.{} AS created_at_log", quote_mysql_ident("created_at")),
    ];
    select.extend(
        business_cols
            .iter()
            .map(|col| format!("o.{}", quote_mysql_ident(col))),
    );

    format!(
        "SELECT {} FROM {} ol INNER JOIN {} o ON ol.{} = o.{} \
         WHERE ol.{} > ? ORDER BY ol.{} LIMIT ?",
        select.join(", "),
        quote_mysql_ident(log_table),
        quote_mysql_ident(entity_table),
        quote_mysql_ident("order_id"),
        quote_mysql_ident("order_id"),
        quote_mysql_ident("order_log_id"),
        quote_mysql_ident("order_log_id"),
    )
}

/// Issues bounded range queries against the source. Ordering by log id is
/// load-bearing: it defines both the delivery order and the next watermark.
pub struct Extractor<'a> {
    config: &'a EtlConfig,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a EtlConfig) -> Self {
        Self { config }
    }

    /// Fetch up to `limit` rows with log id strictly greater than `watermark`.
    /// An empty batch is a valid, common terminal state, not an error.
    pub async fn extract(
        &self,
        conn: &mut Conn,
        business_cols: &[String],
        watermark: u64,
        limit: usize,
    ) -> Result<EventBatch> {
        let query = build_extract_query(
            &self.config.source.log_table,
            &self.config.source.entity_table,
            business_cols,
        );

        let raw: Vec<mysql_async::Row> = conn
            .exec(query.as_str(), (watermark, limit as u64))
            .await
            .with_context(|| {
                format!(
                    "Failed to extract events past log id {} from {}",
                    watermark, self.config.source.log_table
                )
            })?;

        let mut columns: Vec<String> = LOG_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(business_cols.iter().cloned());

        let mut rows = Vec::with_capacity(raw.len());
        for row in raw {
            let values: Vec<Value> = (0..row.len())
                .map(|i| {
                    Value::from_mysql(
                        row.get::<mysql_async::Value, _>(i)
                            .unwrap_or(mysql_async::Value::NULL),
                    )
                })
                .collect();
            let log_id = values
                .first()
                .and_then(Value::as_i64)
                .filter(|id| *id >= 0)
                .context("Extracted row is missing a usable order_log_id")?
                as u64;
            rows.push(SourceEvent { log_id, values });
        }

        tracing::debug!(
            "Extracted {} events past log id {} (limit {})",
            rows.len(),
            watermark,
            limit
        );

        Ok(EventBatch { columns, rows })
    }

    /// Count rows still pending beyond the watermark; used by the full reload
    /// to report total volume up front.
    pub async fn count_pending(&self, conn: &mut Conn, watermark: u64) -> Result<u64> {
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE {} > ?",
            quote_mysql_ident(&self.config.source.log_table),
            quote_mysql_ident("order_log_id"),
        );
        let count: Option<u64> = conn
            .exec_first(query.as_str(), (watermark,))
            .await
            .with_context(|| {
                format!(
                    "Failed to count pending events in {}",
                    self.config.source.log_table
                )
            })?;
        Ok(count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_mysql_ident() {
        assert_eq!(quote_mysql_ident("orders"), "`orders`");
        assert_eq!(quote_mysql_ident("or`ders"), "`or``ders`");
    }

    #[test]
    fn test_build_extract_query_shape() {
        let business = vec!["order_number".to_string(), "grand_total".to_string()];
        let query = build_extract_query("order_logs", "orders", &business);

        assert!(query.starts_with(
            "SELECT ol.`order_log_id`, ol.`order_id`, ol.`order_status_id`, \
             ol.`created_at` AS created_at_log, o.`order_number`, o.`grand_total`"
        ));
        assert!(query.contains("FROM `order_logs` ol INNER JOIN `orders` o"));
        assert!(query.contains("ON ol.`order_id` = o.`order_id`"));
        assert!(query.contains("WHERE ol.`order_log_id` > ?"));
        assert!(query.contains("ORDER BY ol.`order_log_id`"));
        assert!(query.ends_with("LIMIT ?"));
    }

    #[test]
    fn test_build_extract_query_no_business_columns() {
        let query = build_extract_query("order_logs", "orders", &[]);
        assert!(query.contains("ol.`created_at` AS created_at_log FROM"));
    }

    #[test]
    fn test_event_batch_max_log_id() {
        let batch = EventBatch {
            columns: vec!["order_log_id".to_string()],
            rows: vec![
                SourceEvent {
                    log_id: 1051,
                    values: vec![Value::Int(1051)],
                },
                SourceEvent {
                    log_id: 1550,
                    values: vec![Value::Int(1550)],
                },
            ],
        };
        assert_eq!(batch.max_log_id(), Some(1550));
        assert_eq!(EventBatch::default().max_log_id(), None);
        assert!(EventBatch::default().is_empty());
    }
}
