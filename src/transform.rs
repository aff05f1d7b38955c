// ABOUTME: Turns raw joined source batches into sink-schema-conformant rows
// ABOUTME: Rename, derive, default-fill, coerce, then project into sink order

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::config::EtlConfig;
use crate::extract::EventBatch;
use crate::schema::{classify, ColumnClass, SchemaReconciler};
use crate::value::Value;

/// A row whose column set and order exactly match the sink's current schema.
/// Ephemeral: constructed here, consumed by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRow {
    pub values: Vec<Value>,
}

/// Applies the fixed transform pipeline to one extracted batch:
/// rename, derive `event_type`, default-fill, coerce by column class, and
/// finally project into the sink's column order. Coercion is deliberately
/// lossy: unparsable numerics become zero and unparsable timestamps become
/// null rather than failing the cycle.
pub struct Transformer<'a> {
    config: &'a EtlConfig,
}

impl<'a> Transformer<'a> {
    pub fn new(config: &'a EtlConfig) -> Self {
        Self { config }
    }

    pub fn transform(
        &self,
        batch: EventBatch,
        sink_cols: &[String],
        reconciler: &SchemaReconciler<'_>,
    ) -> Result<Vec<SinkRow>> {
        let EventBatch { mut columns, rows } = batch;
        let mut data: Vec<Vec<Value>> = rows.into_iter().map(|row| row.values).collect();

        // 1. Rename the log key and the log timestamp into their sink names.
        for col in &mut columns {
            if col == "order_log_id" {
                *col = "event_id".to_string();
            } else if col == "created_at_log" {
                *col = "event_timestamp".to_string();
            }
        }

        // 2. Derive event_type from the status code. Codes absent from the
        // mapping derive Null here; the integral fill below lands them as 0.
        let status_idx = columns.iter().position(|c| c == "order_status_id");
        columns.push("event_type".to_string());
        for row in &mut data {
            let derived = status_idx
                .and_then(|i| row.get(i))
                .and_then(Value::as_i64)
                .and_then(|status| self.config.event_type_for(status))
                .map(Value::Int)
                .unwrap_or(Value::Null);
            row.push(derived);
        }

        // 3. Synthesize every sink column the batch does not carry.
        let defaults = reconciler.defaults_for(sink_cols, &columns);
        for (name, value) in &defaults {
            columns.push(name.clone());
            for row in &mut data {
                row.push(value.clone());
            }
        }

        // 4-7. Coerce each column once according to its resolved class.
        let classes: Vec<ColumnClass> = columns
            .iter()
            .map(|col| classify(col, &self.config.numeric_fields))
            .collect();
        for row in &mut data {
            for (idx, value) in row.iter_mut().enumerate() {
                let taken = std::mem::replace(value, Value::Null);
                *value = match classes[idx] {
                    ColumnClass::Integral => taken.coerce_int(),
                    ColumnClass::Monetary => taken.coerce_float(),
                    ColumnClass::Temporal => taken.coerce_timestamp(),
                    ColumnClass::Textual => {
                        if taken.is_null() {
                            Value::Text(String::new())
                        } else {
                            taken
                        }
                    }
                };
            }
        }

        // 8. Project into exactly the sink's column set, in sink order.
        // Transformed fields without a sink counterpart are dropped here.
        let index_of: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.as_str(), idx))
            .collect();

        let mut out = Vec::with_capacity(data.len());
        for row in data {
            let mut values = Vec::with_capacity(sink_cols.len());
            for col in sink_cols {
                let idx = index_of
                    .get(col.as_str())
                    .copied()
                    .with_context(|| format!("Sink column '{}' missing after default fill", col))?;
                let value = row
                    .get(idx)
                    .cloned()
                    .with_context(|| format!("Row is missing a value for column '{}'", col))?;
                values.push(value);
            }
            out.push(SinkRow { values });
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SourceEvent;
    use crate::value::parse_timestamp;

    fn batch(columns: &[&str], rows: Vec<Vec<Value>>) -> EventBatch {
        EventBatch {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|values| SourceEvent {
                    log_id: values[0].as_i64().unwrap_or(0) as u64,
                    values,
                })
                .collect(),
        }
    }

    fn sink(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_schema_conformance() {
        let config = EtlConfig::default();
        let reconciler = SchemaReconciler::new(&config);
        let transformer = Transformer::new(&config);

        let batch = batch(
            &[
                "order_log_id",
                "order_id",
                "order_status_id",
                "created_at_log",
                "grand_total",
                "device_type",
            ],
            vec![vec![
                Value::Int(1051),
                Value::Int(9),
                Value::Int(4),
                Value::Text("2024-03-15 10:30:00".to_string()),
                Value::Text("99.50".to_string()),
                Value::Text("ios".to_string()),
            ]],
        );
        // sink order deliberately differs from the produced order
        let sink_cols = sink(&[
            "event_id",
            "event_type",
            "order_id",
            "order_status_id",
            "event_timestamp",
            "grand_total",
            "device_type",
        ]);

        let rows = transformer
            .transform(batch, &sink_cols, &reconciler)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values.len(), sink_cols.len());
        assert_eq!(
            rows[0].values,
            vec![
                Value::Int(1051),
                Value::Int(4),
                Value::Int(9),
                Value::Int(4),
                Value::Timestamp(parse_timestamp("2024-03-15 10:30:00").unwrap()),
                Value::Float(99.5),
                Value::Text("ios".to_string()),
            ]
        );
    }

    #[test]
    fn test_unmapped_status_code_lands_as_zero_event_type() {
        let config = EtlConfig::default();
        let reconciler = SchemaReconciler::new(&config);
        let transformer = Transformer::new(&config);

        let batch = batch(
            &["order_log_id", "order_id", "order_status_id", "created_at_log"],
            vec![
                // status 13 is not in the default mapping
                vec![Value::Int(1), Value::Int(5), Value::Int(13), Value::Null],
                // status 4 is
                vec![Value::Int(2), Value::Int(6), Value::Int(4), Value::Null],
            ],
        );
        let sink_cols = sink(&["event_id", "event_type"]);

        let rows = transformer
            .transform(batch, &sink_cols, &reconciler)
            .unwrap();
        assert_eq!(rows[0].values, vec![Value::Int(1), Value::Int(0)]);
        assert_eq!(rows[1].values, vec![Value::Int(2), Value::Int(4)]);
    }

    #[test]
    fn test_default_fill_for_absent_sink_columns() {
        let config = EtlConfig::default();
        let reconciler = SchemaReconciler::new(&config);
        let transformer = Transformer::new(&config);

        let batch = batch(
            &["order_log_id", "order_id", "order_status_id", "created_at_log"],
            vec![vec![Value::Int(10), Value::Int(1), Value::Int(2), Value::Null]],
        );
        let sink_cols = sink(&["event_id", "foo_id", "ship_date", "grand_total", "note"]);

        let rows = transformer
            .transform(batch, &sink_cols, &reconciler)
            .unwrap();
        assert_eq!(
            rows[0].values,
            vec![
                Value::Int(10),
                Value::Int(0),
                Value::Null,
                Value::Float(0.0),
                Value::Text(String::new()),
            ]
        );
    }

    #[test]
    fn test_lossy_coercion_never_errors() {
        let config = EtlConfig::default();
        let reconciler = SchemaReconciler::new(&config);
        let transformer = Transformer::new(&config);

        let batch = batch(
            &[
                "order_log_id",
                "order_id",
                "order_status_id",
                "created_at_log",
                "coupon_quantity",
                "wallet_amount",
                "delivery_date",
            ],
            vec![vec![
                Value::Int(3),
                Value::Int(1),
                Value::Int(2),
                Value::Text("definitely not a date".to_string()),
                Value::Text("three".to_string()),
                Value::Text("junk".to_string()),
                Value::Null,
            ]],
        );
        let sink_cols = sink(&[
            "event_id",
            "event_timestamp",
            "coupon_quantity",
            "wallet_amount",
            "delivery_date",
        ]);

        let rows = transformer
            .transform(batch, &sink_cols, &reconciler)
            .unwrap();
        assert_eq!(
            rows[0].values,
            vec![
                Value::Int(3),
                // unparsable timestamp stays null, never zero or ""
                Value::Null,
                Value::Int(0),
                Value::Float(0.0),
                Value::Null,
            ]
        );
    }

    #[test]
    fn test_fields_without_sink_counterpart_are_dropped() {
        let config = EtlConfig::default();
        let reconciler = SchemaReconciler::new(&config);
        let transformer = Transformer::new(&config);

        let batch = batch(
            &[
                "order_log_id",
                "order_id",
                "order_status_id",
                "created_at_log",
                "internal_note",
            ],
            vec![vec![
                Value::Int(8),
                Value::Int(1),
                Value::Int(2),
                Value::Null,
                Value::Text("keep out".to_string()),
            ]],
        );
        let sink_cols = sink(&["event_id", "order_id"]);

        let rows = transformer
            .transform(batch, &sink_cols, &reconciler)
            .unwrap();
        assert_eq!(rows[0].values, vec![Value::Int(8), Value::Int(1)]);
    }

    #[test]
    fn test_empty_batch_yields_no_rows() {
        let config = EtlConfig::default();
        let reconciler = SchemaReconciler::new(&config);
        let transformer = Transformer::new(&config);

        let batch = EventBatch {
            columns: vec![
                "order_log_id".to_string(),
                "order_id".to_string(),
                "order_status_id".to_string(),
                "created_at_log".to_string(),
            ],
            rows: Vec::new(),
        };
        let rows = transformer
            .transform(batch, &sink(&["event_id"]), &reconciler)
            .unwrap();
        assert!(rows.is_empty());
    }
}
