// ABOUTME: ClickHouse sink client - appends transformed batches, truncates, introspects
// ABOUTME: Inserts are purely additive; duplicate event ids produce duplicate rows

use anyhow::{Context, Result};
use clickhouse::{Client, Row};
use serde::Deserialize;

use crate::config::SinkConfig;
use crate::transform::SinkRow;
use crate::value::Value;

/// Rows per INSERT statement. ClickHouse prefers fewer, larger inserts; this
/// bounds statement size while keeping the request count low.
const INSERT_CHUNK_ROWS: usize = 1000;

#[derive(Row, Deserialize)]
struct CountRow {
    count: u64,
}

/// Append-only writer for the analytical sink, plus the sink half of schema
/// discovery. No upsert, no dedup: delivering the same event twice produces
/// two rows, which the at-least-once contract accepts.
pub struct SinkClient {
    client: Client,
    database: String,
}

impl SinkClient {
    pub fn new(config: &SinkConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_user(&config.username)
            .with_password(&config.password)
            .with_database(&config.database);
        Self {
            client,
            database: config.database.clone(),
        }
    }

    /// Live column list of a sink table, in declared order. Refetched every
    /// cycle; never cached.
    pub async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let names: Vec<String> = self
            .client
            .query(
                "SELECT name FROM system.columns \
                 WHERE database = ? AND table = ? ORDER BY position",
            )
            .bind(&self.database)
            .bind(table)
            .fetch_all()
            .await
            .with_context(|| format!("Failed to list columns of {}.{}", self.database, table))?;

        if names.is_empty() {
            anyhow::bail!(
                "Sink table {}.{} does not exist or has no columns",
                self.database,
                table
            );
        }
        Ok(names)
    }

    /// Append transformed rows. Returns the row count and the highest
    /// `event_id` delivered, which becomes the next watermark.
    pub async fn load(
        &self,
        table: &str,
        columns: &[String],
        rows: &[SinkRow],
    ) -> Result<(u64, u64)> {
        if rows.is_empty() {
            return Ok((0, 0));
        }

        let statements =
            build_insert_statements(&self.database, table, columns, rows, INSERT_CHUNK_ROWS);
        for statement in &statements {
            self.client
                .query(statement)
                .execute()
                .await
                .with_context(|| {
                    format!("Failed to insert batch into {}.{}", self.database, table)
                })?;
        }

        let max_id = max_event_id(columns, rows);
        tracing::info!(
            "Loaded {} rows into {}.{} ({} inserts, max event_id {})",
            rows.len(),
            self.database,
            table,
            statements.len(),
            max_id
        );
        Ok((rows.len() as u64, max_id))
    }

    /// Empty the sink table. Run once at the start of a full reload.
    pub async fn truncate(&self, table: &str) -> Result<()> {
        tracing::info!("Truncating {}.{}", self.database, table);
        let query = format!("TRUNCATE TABLE IF EXISTS {}.{}", self.database, table);
        self.client
            .query(&query)
            .execute()
            .await
            .with_context(|| format!("Failed to truncate {}.{}", self.database, table))?;
        Ok(())
    }

    /// Total rows currently in the sink table.
    pub async fn total_rows(&self, table: &str) -> Result<u64> {
        let query = format!(
            "SELECT count() AS count FROM {}.{}",
            self.database, table
        );
        let row: CountRow = self
            .client
            .query(&query)
            .fetch_one()
            .await
            .with_context(|| format!("Failed to count rows in {}.{}", self.database, table))?;
        Ok(row.count)
    }
}

/// Highest `event_id` across the rows, 0 when the column is absent.
pub fn max_event_id(columns: &[String], rows: &[SinkRow]) -> u64 {
    let Some(idx) = columns.iter().position(|c| c == "event_id") else {
        return 0;
    };
    rows.iter()
        .filter_map(|row| row.values.get(idx))
        .filter_map(Value::as_i64)
        .filter(|id| *id >= 0)
        .max()
        .unwrap_or(0) as u64
}

/// Build the batched INSERT statements, `chunk_rows` rows per statement,
/// literals rendered inline (the sink protocol here is plain SQL text).
pub fn build_insert_statements(
    database: &str,
    table: &str,
    columns: &[String],
    rows: &[SinkRow],
    chunk_rows: usize,
) -> Vec<String> {
    let mut statements = Vec::new();

    for chunk in rows.chunks(chunk_rows) {
        let mut query = format!(
            "INSERT INTO {}.{} ({}) VALUES ",
            database,
            table,
            columns.join(",")
        );

        for (row_idx, row) in chunk.iter().enumerate() {
            if row_idx > 0 {
                query.push_str(", ");
            }
            query.push('(');
            for (col_idx, value) in row.values.iter().enumerate() {
                if col_idx > 0 {
                    query.push(',');
                }
                value.render_sql(&mut query);
            }
            query.push(')');
        }

        statements.push(query);
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_timestamp;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_build_insert_single_statement() {
        let columns = cols(&["event_id", "event_type", "device_type", "event_timestamp"]);
        let rows = vec![SinkRow {
            values: vec![
                Value::Int(1051),
                Value::Int(4),
                Value::Text("ios".to_string()),
                Value::Timestamp(parse_timestamp("2024-03-15 10:30:00").unwrap()),
            ],
        }];

        let statements = build_insert_statements("main_data", "events_data", &columns, &rows, 1000);
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0],
            "INSERT INTO main_data.events_data (event_id,event_type,device_type,event_timestamp) \
             VALUES (1051,4,'ios','2024-03-15T10:30:00.000000')"
        );
    }

    #[test]
    fn test_build_insert_chunks_rows() {
        let columns = cols(&["event_id"]);
        let rows: Vec<SinkRow> = (1..=5)
            .map(|id| SinkRow {
                values: vec![Value::Int(id)],
            })
            .collect();

        let statements = build_insert_statements("db", "t", &columns, &rows, 2);
        assert_eq!(statements.len(), 3);
        assert!(statements[0].ends_with("VALUES (1), (2)"));
        assert!(statements[1].ends_with("VALUES (3), (4)"));
        assert!(statements[2].ends_with("VALUES (5)"));
    }

    #[test]
    fn test_build_insert_escapes_text() {
        let columns = cols(&["note"]);
        let rows = vec![SinkRow {
            values: vec![Value::Text("what's this? a test".to_string())],
        }];

        let statements = build_insert_statements("db", "t", &columns, &rows, 1000);
        assert!(statements[0].contains("'what\\'s this?? a test'"));
    }

    #[test]
    fn test_max_event_id() {
        let columns = cols(&["event_type", "event_id"]);
        let rows = vec![
            SinkRow {
                values: vec![Value::Int(4), Value::Int(1051)],
            },
            SinkRow {
                values: vec![Value::Int(2), Value::Int(1550)],
            },
        ];
        assert_eq!(max_event_id(&columns, &rows), 1550);
        assert_eq!(max_event_id(&cols(&["no_event_id"]), &rows), 0);
        assert_eq!(max_event_id(&columns, &[]), 0);
    }
}
