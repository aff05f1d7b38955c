// ABOUTME: Schema reconciliation between the MySQL source and the ClickHouse sink
// ABOUTME: Shared column classification drives both default-fill and coercion

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use std::collections::HashSet;

use crate::config::EtlConfig;
use crate::value::Value;

/// Canonical business columns mirrored from the parent entity relation.
///
/// Extraction selects the intersection of this list with whatever the source
/// currently exposes, so a dropped or not-yet-deployed column never breaks a
/// cycle.
pub const CANONICAL_ENTITY_COLUMNS: &[&str] = &[
    "order_number",
    "order_type_id",
    "customer_id",
    "segment_id",
    "customer_type",
    "is_first_order",
    "is_favourite_order",
    "new_customer_foc",
    "grand_total",
    "vat",
    "delivery_fee",
    "discount",
    "wallet_amount",
    "wallet_discount",
    "wallet_cashback",
    "is_cash_back",
    "invoice_amount",
    "payment_method_id",
    "promocode_id",
    "promotion_id",
    "coupon_quantity",
    "reward",
    "qitaf_rewardpoints",
    "delivery_date",
    "delivery_time",
    "delivery_type",
    "delivered_quantity",
    "country_id",
    "city_id",
    "area_id",
    "store_id",
    "sale_office_id",
    "route_id",
    "agent_id",
    "address_id",
    "source_id",
    "channel_id",
    "sub_channel_id",
    "device_type",
    "app_version",
    "total_items_quantity",
    "total_unique_item_count",
    "gift_item_quantity",
    "foc_item_quantity",
    "is_recurring",
    "is_split_order",
    "corporate_invoice",
    "loyalty_programs",
    "is_bfm_customer",
    "order_customer_bfm_club_id",
    "is_stc_tayamouz_customer",
    "fulfilment_id",
    "invoice_date",
    "created_at",
    "updated_at",
];

/// Columns parsed with the lenient timestamp parser regardless of what their
/// names would otherwise classify as (`invoice_date` contains "invoice" but is
/// not monetary).
pub const TIMESTAMP_COLUMNS: &[&str] = &[
    "event_timestamp",
    "created_at",
    "updated_at",
    "delivery_date",
    "delivery_time",
    "invoice_date",
];

/// Name markers classifying a column as monetary during coercion.
const MONETARY_MARKERS: &[&str] = &[
    "total", "amount", "fee", "discount", "reward", "vat", "wallet", "cashback", "invoice",
];

/// The narrower marker set used when synthesizing defaults for sink columns
/// the transform never produced.
const MONETARY_DEFAULT_MARKERS: &[&str] = &["total", "amount", "fee", "discount", "reward", "vat"];

/// Coercion class of a column, resolved once per column per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    /// 64-bit integer; missing or unparsable values land as 0
    Integral,
    /// 64-bit float; unparsable values land as 0.0
    Monetary,
    /// Timestamp; unparsable values stay null
    Temporal,
    /// Everything else; nulls land as the empty string
    Textual,
}

fn matches_integral_pattern(lower: &str) -> bool {
    lower.ends_with("_id") || lower.contains("quantity") || lower.starts_with("is_")
}

/// Classify a column for the transform's coercion passes.
///
/// Explicitly temporal columns win first, then the integral naming patterns
/// and the configured override list, then any remaining date/time name, then
/// the monetary markers.
pub fn classify(name: &str, numeric_overrides: &[String]) -> ColumnClass {
    let lower = name.to_ascii_lowercase();
    if TIMESTAMP_COLUMNS.contains(&lower.as_str()) {
        return ColumnClass::Temporal;
    }
    if matches_integral_pattern(&lower) || numeric_overrides.iter().any(|c| *c == lower) {
        return ColumnClass::Integral;
    }
    if lower.contains("date") || lower.contains("time") {
        return ColumnClass::Temporal;
    }
    if MONETARY_MARKERS.iter().any(|m| lower.contains(m)) {
        return ColumnClass::Monetary;
    }
    ColumnClass::Textual
}

/// Typed default for a sink column the transform did not produce.
///
/// Checked in a fixed order: integral naming patterns, then date/time names
/// (null timestamp), then monetary markers, then the empty string. This is a
/// best-effort heuristic over names, not a declared type system; the later
/// coercion passes normalize whatever it emits.
pub fn default_value_for(name: &str) -> Value {
    let lower = name.to_ascii_lowercase();
    if matches_integral_pattern(&lower) {
        Value::Int(0)
    } else if lower.contains("date") || lower.contains("time") {
        Value::Null
    } else if MONETARY_DEFAULT_MARKERS.iter().any(|m| lower.contains(m)) {
        Value::Float(0.0)
    } else {
        Value::Text(String::new())
    }
}

/// Computes what to select from the source and what to synthesize for the
/// sink. Column sets are refetched every cycle; nothing here is cached, so
/// live schema drift is picked up at the next cycle boundary.
pub struct SchemaReconciler<'a> {
    config: &'a EtlConfig,
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(config: &'a EtlConfig) -> Self {
        Self { config }
    }

    /// Introspect the live column list of a source table, in ordinal order.
    pub async fn source_columns(&self, conn: &mut Conn, table: &str) -> Result<Vec<String>> {
        let database = self.config.source.database()?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.columns \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (database.as_str(), table),
            )
            .await
            .with_context(|| format!("Failed to list columns of {}.{}", database, table))?;

        let columns: Vec<String> = rows.into_iter().filter_map(|row| row.get(0)).collect();
        if columns.is_empty() {
            anyhow::bail!("Source table {}.{} does not exist or has no columns", database, table);
        }
        Ok(columns)
    }

    /// Intersect the canonical business columns with what the source exposes,
    /// preserving canonical order. Missing columns are logged and omitted so
    /// the extraction query never references a column the source lacks.
    pub fn selectable(&self, source_cols: &[String]) -> Vec<String> {
        let present: HashSet<&str> = source_cols.iter().map(String::as_str).collect();
        CANONICAL_ENTITY_COLUMNS
            .iter()
            .filter_map(|canonical| {
                if present.contains(canonical) {
                    Some((*canonical).to_string())
                } else {
                    tracing::warn!(
                        "Source table {} is missing canonical column '{}', omitting it from selection",
                        self.config.source.entity_table,
                        canonical
                    );
                    None
                }
            })
            .collect()
    }

    /// For every sink column the transform will not produce, pick a typed
    /// default so emitted rows always match the sink's full column set.
    pub fn defaults_for(
        &self,
        sink_cols: &[String],
        produced_cols: &[String],
    ) -> Vec<(String, Value)> {
        let produced: HashSet<&str> = produced_cols.iter().map(String::as_str).collect();
        sink_cols
            .iter()
            .filter(|col| !produced.contains(col.as_str()))
            .map(|col| {
                let default = default_value_for(col);
                tracing::warn!(
                    "Sink column '{}' is not produced by the transform, default-filling with {:?}",
                    col,
                    default
                );
                (col.clone(), default)
            })
            .collect()
    }
}
