/*!
SQLite-backed per-snapshot validation-stat store.

One database per snapshot under the snapshot's `validation/` directory.
The `records` table carries the fixed row columns plus one boolean
column per validator rule, named `rule_<id>` and fixed at initialize
time; `rule_occurrences` keeps per-occurrence values in
detailed-diagnose mode. Writes stream through an in-memory buffer
flushed in batches inside one transaction; `INSERT OR REPLACE` keyed on
`identifier_hash` keeps re-runs idempotent.
*/

use std::collections::HashMap;
use std::fs;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{OaiError, Result};
use crate::model::stats::SnapshotValidationStats;
use crate::model::validation::{RecordValidation, RuleFact, ValidatorResult};
use crate::model::{HarvestedRecord, SnapshotMetadata};
use crate::stats::filters::{self, parse_filters, Filter, FilterValue};
use crate::store::layout;
use crate::util::md5_hex;

/// Rows buffered before a flush.
pub const WRITE_BATCH_SIZE: usize = 1000;

/// One page of filtered observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationPage {
    /// The page's rows, ordered by `identifier_hash` ascending.
    pub items: Vec<RecordValidation>,
    /// Number of rows matching the filters across all pages.
    pub total_filtered: u64,
    /// Zero-based page number.
    pub page: usize,
    /// Requested page size.
    pub page_size: usize,
}

impl ObservationPage {
    /// Number of pages covering the filtered set.
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            0
        } else {
            (self.total_filtered as usize).div_ceil(self.page_size)
        }
    }
}

/// Aggregated occurrence values of one rule, count descending, ties by
/// value ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOccurrences {
    /// Values that satisfied the rule, with record counts.
    pub valid: Vec<(String, u64)>,
    /// Values that failed the rule, with record counts.
    pub invalid: Vec<(String, u64)>,
}

struct SnapshotWriter {
    conn: Connection,
    rule_ids: Vec<u64>,
    buffer: Vec<RecordValidation>,
    stats: SnapshotValidationStats,
    batch_size: usize,
}

/// The validation-stat store service. One open writer per snapshot
/// between `initialize` and `finalize`; reads open their own short-lived
/// connections.
pub struct ValidationStatsService {
    config: StoreConfig,
    batch_size: usize,
    writers: HashMap<u64, SnapshotWriter>,
}

fn rule_column(rule_id: u64) -> String {
    format!("rule_{}", rule_id)
}

fn parse_datestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|datestamp| datestamp.with_timezone(&Utc))
        .map_err(|err| OaiError::Statistics(format!("bad datestamp `{}`: {}", raw, err)))
}

impl ValidationStatsService {
    /// A stat store rooted at the configured base path.
    pub fn new(config: StoreConfig) -> Self {
        ValidationStatsService {
            config,
            batch_size: WRITE_BATCH_SIZE,
            writers: HashMap::new(),
        }
    }

    /// Override the flush batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Create the per-snapshot backing store and fix its rule-column set
    /// from the snapshot's rule definitions.
    pub fn initialize(&mut self, snapshot: &SnapshotMetadata) -> Result<()> {
        let path = layout::stats_db_path(
            &self.config,
            &snapshot.network.acronym,
            snapshot.snapshot_id,
        );
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        let rule_ids: Vec<u64> = snapshot.rule_definitions.keys().copied().collect();
        let rule_columns: String = rule_ids
            .iter()
            .map(|rule_id| format!(", \"{}\" INTEGER", rule_column(*rule_id)))
            .collect();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS records (
                identifier_hash TEXT PRIMARY KEY,
                identifier TEXT NOT NULL,
                datestamp TEXT NOT NULL,
                record_is_valid INTEGER NOT NULL,
                is_transformed INTEGER NOT NULL,
                published_metadata_hash TEXT NOT NULL{rule_columns}
            );
            CREATE TABLE IF NOT EXISTS rule_occurrences (
                identifier_hash TEXT NOT NULL,
                rule_id INTEGER NOT NULL,
                is_valid INTEGER NOT NULL,
                occurrence_value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS rule_occurrences_rule
                ON rule_occurrences (rule_id);"
        ))?;
        info!(
            snapshot_id = snapshot.snapshot_id,
            rules = rule_ids.len(),
            "validation stats initialized"
        );
        self.writers.insert(
            snapshot.snapshot_id,
            SnapshotWriter {
                conn,
                rule_ids,
                buffer: Vec::new(),
                stats: SnapshotValidationStats::new(),
                batch_size: self.batch_size,
            },
        );
        Ok(())
    }

    /// Buffer one observation and fold it into the in-memory aggregates,
    /// flushing when the buffer reaches the batch size.
    pub fn add_observation(
        &mut self,
        snapshot: &SnapshotMetadata,
        record: &HarvestedRecord,
        result: &ValidatorResult,
    ) -> Result<()> {
        let validation = build_validation(snapshot, record, result);
        let writer = self
            .writers
            .get_mut(&snapshot.snapshot_id)
            .ok_or_else(|| {
                OaiError::Statistics(format!(
                    "snapshot {} is not initialized for writing",
                    snapshot.snapshot_id
                ))
            })?;
        writer.stats.observe(&validation);
        writer.buffer.push(validation);
        if writer.buffer.len() >= writer.batch_size {
            writer.flush()?;
        }
        Ok(())
    }

    /// Current in-memory aggregates of an open writer.
    pub fn current_stats(&self, snapshot_id: u64) -> Option<&SnapshotValidationStats> {
        self.writers.get(&snapshot_id).map(|writer| &writer.stats)
    }

    /// Flush remaining buffers, persist the stats summary and close the
    /// backing store. Returns the final aggregates.
    pub fn finalize(&mut self, snapshot: &SnapshotMetadata) -> Result<SnapshotValidationStats> {
        let mut writer = self
            .writers
            .remove(&snapshot.snapshot_id)
            .ok_or_else(|| {
                OaiError::Statistics(format!(
                    "snapshot {} is not initialized for writing",
                    snapshot.snapshot_id
                ))
            })?;
        writer.flush()?;
        let summary_path = layout::stats_summary_path(
            &self.config,
            &snapshot.network.acronym,
            snapshot.snapshot_id,
        );
        if let Some(parent) = summary_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&writer.stats)
            .map_err(|err| OaiError::Statistics(err.to_string()))?;
        fs::write(&summary_path, json)?;
        info!(
            snapshot_id = snapshot.snapshot_id,
            total = writer.stats.total_records,
            "validation stats finalized"
        );
        Ok(writer.stats)
    }

    /// Remove all validation data for the snapshot.
    pub fn delete(&mut self, snapshot: &SnapshotMetadata) -> Result<()> {
        self.writers.remove(&snapshot.snapshot_id);
        let dir = layout::validation_dir(
            &self.config,
            &snapshot.network.acronym,
            snapshot.snapshot_id,
        );
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn open_read(&self, snapshot: &SnapshotMetadata) -> Result<Connection> {
        let path = layout::stats_db_path(
            &self.config,
            &snapshot.network.acronym,
            snapshot.snapshot_id,
        );
        if !path.exists() {
            return Err(OaiError::not_found(
                "validation data",
                snapshot.snapshot_id.to_string(),
            ));
        }
        Ok(Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY,
        )?)
    }

    /// One record's persisted validation row.
    pub fn get_record(
        &self,
        snapshot: &SnapshotMetadata,
        identifier: &str,
    ) -> Result<RecordValidation> {
        let conn = self.open_read(snapshot)?;
        let rule_ids: Vec<u64> = snapshot.rule_definitions.keys().copied().collect();
        let sql = format!(
            "SELECT {} FROM records WHERE identifier = ?1",
            select_columns(&rule_ids)
        );
        let mut statement = conn.prepare(&sql)?;
        let mut rows = statement.query([identifier])?;
        let row = match rows.next()? {
            Some(row) => row_to_validation(row, &rule_ids)?,
            None => return Err(OaiError::not_found("record validation", identifier)),
        };
        let mut validation = row;
        attach_occurrences(&conn, &mut validation)?;
        Ok(validation)
    }

    /// The precomputed stats summary; `NotFound` before finalize.
    pub fn get_snapshot_stats(
        &self,
        snapshot: &SnapshotMetadata,
    ) -> Result<SnapshotValidationStats> {
        let path = layout::stats_summary_path(
            &self.config,
            &snapshot.network.acronym,
            snapshot.snapshot_id,
        );
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(OaiError::not_found(
                    "snapshot stats",
                    snapshot.snapshot_id.to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&json).map_err(|err| OaiError::Statistics(err.to_string()))
    }

    /// Stats for the snapshot under the given filters. No filters returns
    /// the precomputed summary; filters recompute from the table with
    /// equivalent semantics.
    pub fn query_rules_stats<S: AsRef<str>>(
        &self,
        snapshot: &SnapshotMetadata,
        filter_strings: &[S],
    ) -> Result<SnapshotValidationStats> {
        if filter_strings.is_empty() {
            return self.get_snapshot_stats(snapshot);
        }
        let filters = parse_filters(filter_strings)?;
        let conn = self.open_read(snapshot)?;
        let rule_ids: Vec<u64> = snapshot.rule_definitions.keys().copied().collect();
        let (where_clause, params) = filters_to_sql(&filters, &rule_ids);

        let rule_sums: String = rule_ids
            .iter()
            .map(|rule_id| {
                let column = rule_column(*rule_id);
                format!(
                    ", COALESCE(SUM(CASE WHEN \"{column}\" = 1 THEN 1 ELSE 0 END), 0)\
                     , COALESCE(SUM(CASE WHEN \"{column}\" = 0 THEN 1 ELSE 0 END), 0)"
                )
            })
            .collect();
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(record_is_valid), 0), \
             COALESCE(SUM(is_transformed), 0){rule_sums} FROM records{where_clause}"
        );
        let mut statement = conn.prepare(&sql)?;
        let stats = statement.query_row(params_from_iter(params), |row| {
            let total: i64 = row.get(0)?;
            let valid: i64 = row.get(1)?;
            let transformed: i64 = row.get(2)?;
            let mut per_rule = Vec::with_capacity(rule_ids.len());
            for position in 0..rule_ids.len() {
                let valid_count: i64 = row.get(3 + position * 2)?;
                let invalid_count: i64 = row.get(4 + position * 2)?;
                per_rule.push((valid_count, invalid_count));
            }
            Ok((total, valid, transformed, per_rule))
        })?;

        let (total, valid, transformed, per_rule) = stats;
        let mut result = SnapshotValidationStats {
            total_records: total as u64,
            valid_records: valid as u64,
            transformed_records: transformed as u64,
            ..SnapshotValidationStats::new()
        };
        set_facet(&mut result, crate::model::stats::FACET_RECORD_IS_VALID, valid, total - valid);
        set_facet(
            &mut result,
            crate::model::stats::FACET_RECORD_IS_TRANSFORMED,
            transformed,
            total - transformed,
        );
        for (rule_id, (valid_count, invalid_count)) in rule_ids.iter().zip(per_rule) {
            let counters = result.rule_stats.entry(*rule_id).or_default();
            counters.valid = valid_count as u64;
            counters.invalid = invalid_count as u64;
            if valid_count > 0 {
                *result
                    .facets
                    .entry(crate::model::stats::FACET_VALID_RULES.to_owned())
                    .or_default()
                    .entry(rule_id.to_string())
                    .or_insert(0) += valid_count as u64;
            }
            if invalid_count > 0 {
                *result
                    .facets
                    .entry(crate::model::stats::FACET_INVALID_RULES.to_owned())
                    .or_default()
                    .entry(rule_id.to_string())
                    .or_insert(0) += invalid_count as u64;
            }
        }
        Ok(result)
    }

    /// A deterministic page of filtered observations, ordered by
    /// `identifier_hash` ascending.
    pub fn query_observations<S: AsRef<str>>(
        &self,
        snapshot: &SnapshotMetadata,
        filter_strings: &[S],
        page: usize,
        page_size: usize,
    ) -> Result<ObservationPage> {
        let filters = parse_filters(filter_strings)?;
        let conn = self.open_read(snapshot)?;
        let rule_ids: Vec<u64> = snapshot.rule_definitions.keys().copied().collect();
        let (where_clause, params) = filters_to_sql(&filters, &rule_ids);

        let count_sql = format!("SELECT COUNT(*) FROM records{where_clause}");
        let total_filtered: i64 = conn
            .prepare(&count_sql)?
            .query_row(params_from_iter(params.clone()), |row| row.get(0))?;

        let sql = format!(
            "SELECT {} FROM records{} ORDER BY identifier_hash ASC LIMIT {} OFFSET {}",
            select_columns(&rule_ids),
            where_clause,
            page_size,
            page * page_size
        );
        let mut statement = conn.prepare(&sql)?;
        let mut rows = statement.query(params_from_iter(params))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(row_to_validation(row, &rule_ids)?);
        }
        for item in &mut items {
            attach_occurrences(&conn, item)?;
        }
        debug!(
            snapshot_id = snapshot.snapshot_id,
            page,
            returned = items.len(),
            total_filtered,
            "observations page read"
        );
        Ok(ObservationPage {
            items,
            total_filtered: total_filtered as u64,
            page,
            page_size,
        })
    }

    /// Aggregate the stored occurrence values of one rule, optionally
    /// restricted to records matching the filters.
    pub fn query_rule_occurrences<S: AsRef<str>>(
        &self,
        snapshot: &SnapshotMetadata,
        rule_id: u64,
        filter_strings: &[S],
    ) -> Result<RuleOccurrences> {
        let filters = parse_filters(filter_strings)?;
        let conn = self.open_read(snapshot)?;
        let rule_ids: Vec<u64> = snapshot.rule_definitions.keys().copied().collect();
        let (where_clause, mut params) = filters_to_sql(&filters, &rule_ids);
        let filter_clause = if where_clause.is_empty() {
            String::new()
        } else {
            // Reuse the record predicates through the join; their ?N
            // placeholders keep their positions, the rule id binds last.
            where_clause.replacen(" WHERE ", " AND ", 1)
        };
        params.push(SqlValue::Integer(rule_id as i64));
        let rule_placeholder = params.len();
        let sql = format!(
            "SELECT ro.occurrence_value, ro.is_valid, COUNT(*) AS occ_count \
             FROM rule_occurrences ro \
             JOIN records r ON r.identifier_hash = ro.identifier_hash \
             WHERE ro.rule_id = ?{rule_placeholder}{filter_clause} \
             GROUP BY ro.occurrence_value, ro.is_valid \
             ORDER BY occ_count DESC, ro.occurrence_value ASC"
        );
        let mut statement = conn.prepare(&sql)?;
        let mut rows = statement.query(params_from_iter(params))?;
        let mut result = RuleOccurrences::default();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            let is_valid: i64 = row.get(1)?;
            let count: i64 = row.get(2)?;
            if is_valid != 0 {
                result.valid.push((value, count as u64));
            } else {
                result.invalid.push((value, count as u64));
            }
        }
        Ok(result)
    }
}

impl SnapshotWriter {
    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rule_ids = self.rule_ids.clone();
        let insert_sql = {
            let rule_columns: String = rule_ids
                .iter()
                .map(|rule_id| format!(", \"{}\"", rule_column(*rule_id)))
                .collect();
            let placeholders = (1..=6 + rule_ids.len())
                .map(|position| format!("?{}", position))
                .join(", ");
            format!(
                "INSERT OR REPLACE INTO records (identifier_hash, identifier, datestamp, \
                 record_is_valid, is_transformed, published_metadata_hash{rule_columns}) \
                 VALUES ({placeholders})"
            )
        };
        let flushed = self.buffer.len();
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare(&insert_sql)?;
            let mut delete_occurrences =
                tx.prepare("DELETE FROM rule_occurrences WHERE identifier_hash = ?1")?;
            let mut insert_occurrence = tx.prepare(
                "INSERT INTO rule_occurrences (identifier_hash, rule_id, is_valid, \
                 occurrence_value) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for validation in self.buffer.drain(..) {
                let facts: HashMap<u64, &RuleFact> = validation
                    .rule_facts
                    .iter()
                    .map(|fact| (fact.rule_id, fact))
                    .collect();
                let mut values: Vec<SqlValue> = vec![
                    SqlValue::Text(validation.identifier_hash.clone()),
                    SqlValue::Text(validation.identifier.clone()),
                    SqlValue::Text(validation.datestamp.to_rfc3339()),
                    SqlValue::Integer(validation.record_is_valid as i64),
                    SqlValue::Integer(validation.is_transformed as i64),
                    SqlValue::Text(validation.published_metadata_hash.clone()),
                ];
                for rule_id in &rule_ids {
                    values.push(match facts.get(rule_id) {
                        Some(fact) => SqlValue::Integer(fact.is_valid as i64),
                        None => SqlValue::Null,
                    });
                }
                insert.execute(params_from_iter(values))?;

                delete_occurrences.execute([&validation.identifier_hash])?;
                for fact in &validation.rule_facts {
                    for (occurrences, is_valid) in [
                        (&fact.valid_occurrences, 1i64),
                        (&fact.invalid_occurrences, 0i64),
                    ] {
                        for value in occurrences {
                            insert_occurrence.execute(params_from_iter([
                                SqlValue::Text(validation.identifier_hash.clone()),
                                SqlValue::Integer(fact.rule_id as i64),
                                SqlValue::Integer(is_valid),
                                SqlValue::Text(value.clone()),
                            ]))?;
                        }
                    }
                }
            }
        }
        tx.commit()?;
        debug!(rows = flushed, "stat buffer flushed");
        Ok(())
    }
}

/// Build the persisted row for one observed record.
fn build_validation(
    snapshot: &SnapshotMetadata,
    record: &HarvestedRecord,
    result: &ValidatorResult,
) -> RecordValidation {
    let detailed = snapshot.detailed_diagnose();
    let rule_facts = result
        .rules_results
        .iter()
        .map(|rule_result| {
            let store_occurrences = detailed
                && snapshot
                    .rule_definitions
                    .get(&rule_result.rule_id)
                    .map(|definition| definition.store_occurrences)
                    .unwrap_or(false);
            let (valid_occurrences, invalid_occurrences) = if store_occurrences {
                rule_result
                    .results
                    .iter()
                    .map(|occurrence| (occurrence.valid, occurrence.received_value.clone()))
                    .partition_map(|(valid, value)| {
                        if valid {
                            itertools::Either::Left(value)
                        } else {
                            itertools::Either::Right(value)
                        }
                    })
            } else {
                (Vec::new(), Vec::new())
            };
            RuleFact {
                rule_id: rule_result.rule_id,
                is_valid: rule_result.valid,
                valid_occurrences,
                invalid_occurrences,
            }
        })
        .collect();
    RecordValidation {
        identifier_hash: md5_hex(&record.identifier),
        identifier: record.identifier.clone(),
        datestamp: record.datestamp,
        record_is_valid: result.valid,
        is_transformed: result.transformed,
        published_metadata_hash: result.metadata_hash.clone(),
        rule_facts,
    }
}

fn select_columns(rule_ids: &[u64]) -> String {
    let rule_columns: String = rule_ids
        .iter()
        .map(|rule_id| format!(", \"{}\"", rule_column(*rule_id)))
        .collect();
    format!(
        "identifier_hash, identifier, datestamp, record_is_valid, is_transformed, \
         published_metadata_hash{rule_columns}"
    )
}

fn row_to_validation(row: &rusqlite::Row<'_>, rule_ids: &[u64]) -> Result<RecordValidation> {
    let datestamp: String = row.get(2)?;
    let mut rule_facts = Vec::new();
    for (position, rule_id) in rule_ids.iter().enumerate() {
        let verdict: Option<i64> = row.get(6 + position)?;
        if let Some(verdict) = verdict {
            rule_facts.push(RuleFact {
                rule_id: *rule_id,
                is_valid: verdict != 0,
                valid_occurrences: Vec::new(),
                invalid_occurrences: Vec::new(),
            });
        }
    }
    Ok(RecordValidation {
        identifier_hash: row.get(0)?,
        identifier: row.get(1)?,
        datestamp: parse_datestamp(&datestamp)?,
        record_is_valid: row.get::<_, i64>(3)? != 0,
        is_transformed: row.get::<_, i64>(4)? != 0,
        published_metadata_hash: row.get(5)?,
        rule_facts,
    })
}

fn attach_occurrences(conn: &Connection, validation: &mut RecordValidation) -> Result<()> {
    let mut statement = conn.prepare(
        "SELECT rule_id, is_valid, occurrence_value FROM rule_occurrences \
         WHERE identifier_hash = ?1",
    )?;
    let mut rows = statement.query([&validation.identifier_hash])?;
    while let Some(row) = rows.next()? {
        let rule_id: i64 = row.get(0)?;
        let is_valid: i64 = row.get(1)?;
        let value: String = row.get(2)?;
        if let Some(fact) = validation
            .rule_facts
            .iter_mut()
            .find(|fact| fact.rule_id == rule_id as u64)
        {
            if is_valid != 0 {
                fact.valid_occurrences.push(value);
            } else {
                fact.invalid_occurrences.push(value);
            }
        }
    }
    Ok(())
}

fn set_facet(stats: &mut SnapshotValidationStats, facet: &str, truthy: i64, falsy: i64) {
    let values = stats.facets.entry(facet.to_owned()).or_default();
    if truthy > 0 {
        values.insert("true".to_owned(), truthy as u64);
    }
    if falsy > 0 {
        values.insert("false".to_owned(), falsy as u64);
    }
}

/// Translate parsed filters into a `WHERE` clause plus parameters.
/// Unrecognized fields and unknown rule ids are ignored with a warning.
fn filters_to_sql(parsed: &[Filter], rule_ids: &[u64]) -> (String, Vec<SqlValue>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    for filter in parsed {
        match filter.field.as_str() {
            filters::FIELD_RECORD_IS_VALID | filters::FIELD_RECORD_IS_TRANSFORMED => {
                let column = if filter.field == filters::FIELD_RECORD_IS_VALID {
                    "record_is_valid"
                } else {
                    "is_transformed"
                };
                match &filter.value {
                    FilterValue::Bool(value) => {
                        params.push(SqlValue::Integer(*value as i64));
                        conditions.push(format!("{} = ?{}", column, params.len()));
                    }
                    FilterValue::Text(value) => {
                        warn!(field = %filter.field, value = %value, "non-boolean filter value ignored");
                    }
                }
            }
            filters::FIELD_VALID_RULES | filters::FIELD_INVALID_RULES => {
                let expected = if filter.field == filters::FIELD_VALID_RULES {
                    1
                } else {
                    0
                };
                let raw = match &filter.value {
                    FilterValue::Text(value) => value.clone(),
                    FilterValue::Bool(value) => value.to_string(),
                };
                match raw.parse::<u64>() {
                    Ok(rule_id) if rule_ids.contains(&rule_id) => {
                        conditions.push(format!("\"{}\" = {}", rule_column(rule_id), expected));
                    }
                    _ => {
                        warn!(field = %filter.field, value = %raw, "unknown rule id in filter ignored");
                    }
                }
            }
            filters::FIELD_IDENTIFIER => {
                let raw = match &filter.value {
                    FilterValue::Text(value) => value.clone(),
                    FilterValue::Bool(value) => value.to_string(),
                };
                params.push(SqlValue::Text(raw));
                conditions.push(format!("identifier = ?{}", params.len()));
            }
            unknown => {
                warn!(field = %unknown, "unrecognized filter field ignored");
            }
        }
    }
    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::validation::{ContentValidatorResult, ValidatorRuleResult};
    use crate::model::NetworkInfo;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn network(detailed: bool) -> NetworkInfo {
        let mut network: NetworkInfo = serde_json::from_str(
            r#"
            {
                "acronym": "TEST",
                "validator": [
                    {
                        "@class": "validator.field.regex",
                        "rule-id": 1,
                        "mandatory": true,
                        "quantifier": "ONE_OR_MORE",
                        "store-occurrences": true,
                        "field-name": "dc.title.none",
                        "pattern": "^Hello$"
                    },
                    {
                        "@class": "validator.field.regex",
                        "rule-id": 2,
                        "mandatory": false,
                        "quantifier": "ONE_OR_MORE",
                        "store-occurrences": false,
                        "field-name": "dc.type.none",
                        "pattern": ".*"
                    }
                ]
            }
        "#,
        )
        .unwrap();
        if detailed {
            network
                .properties
                .insert("DETAILED_DIAGNOSE".to_owned(), true);
        }
        network
    }

    fn snapshot(detailed: bool) -> SnapshotMetadata {
        SnapshotMetadata::new(5, network(detailed))
    }

    fn record(suffix: u32) -> HarvestedRecord {
        HarvestedRecord::new(
            format!("oai:test:{}", suffix),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            "aaaa",
        )
    }

    fn result(valid: bool, transformed: bool, title: &str) -> ValidatorResult {
        ValidatorResult {
            valid,
            transformed,
            metadata_hash: "bbbb".to_owned(),
            rules_results: vec![
                ValidatorRuleResult {
                    rule_id: 1,
                    valid,
                    results: vec![ContentValidatorResult::new(valid, title)],
                },
                ValidatorRuleResult {
                    rule_id: 2,
                    valid: true,
                    results: vec![ContentValidatorResult::new(true, "article")],
                },
            ],
        }
    }

    fn service_with_observations(
        dir: &std::path::Path,
        detailed: bool,
        observations: &[(bool, bool)],
    ) -> (ValidationStatsService, SnapshotMetadata) {
        let snapshot = snapshot(detailed);
        let mut service =
            ValidationStatsService::new(StoreConfig::new(dir)).with_batch_size(2);
        service.initialize(&snapshot).unwrap();
        for (index, (valid, transformed)) in observations.iter().enumerate() {
            service
                .add_observation(
                    &snapshot,
                    &record(index as u32),
                    &result(*valid, *transformed, if *valid { "Hello" } else { "Nope" }),
                )
                .unwrap();
        }
        (service, snapshot)
    }

    #[test]
    fn test_finalize_writes_summary() {
        let dir = tempdir().unwrap();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &[(true, false), (false, true)]);

        // Not finalized yet.
        assert!(service.get_snapshot_stats(&snapshot).unwrap_err().is_not_found());

        let stats = service.finalize(&snapshot).unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.valid_records, 1);
        assert_eq!(stats.transformed_records, 1);

        let loaded = service.get_snapshot_stats(&snapshot).unwrap();
        assert_eq!(loaded, stats);
    }

    #[test]
    fn test_get_record() {
        let dir = tempdir().unwrap();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &[(true, false)]);
        service.finalize(&snapshot).unwrap();

        let validation = service.get_record(&snapshot, "oai:test:0").unwrap();
        assert_eq!(validation.identifier, "oai:test:0");
        assert_eq!(validation.identifier_hash, md5_hex("oai:test:0"));
        assert!(validation.record_is_valid);
        assert_eq!(validation.rule_facts.len(), 2);
        assert_eq!(
            validation.datestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );

        let err = service.get_record(&snapshot, "oai:test:99").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_query_rules_stats_filtered_equivalence() {
        let dir = tempdir().unwrap();
        let observations = [(true, false), (false, true), (true, true)];
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &observations);
        service.finalize(&snapshot).unwrap();

        // §8.2.6: two of the three records are valid.
        let filtered = service
            .query_rules_stats(&snapshot, &["record_is_valid@@true"])
            .unwrap();
        assert_eq!(filtered.total_records, 2);
        assert_eq!(filtered.valid_records, 2);
        assert_eq!(filtered.transformed_records, 1);
        assert_eq!(filtered.rule_stats[&1].valid, 2);
        assert_eq!(filtered.rule_stats[&1].invalid, 0);

        // No filters returns the precomputed summary.
        let unfiltered = service.query_rules_stats::<&str>(&snapshot, &[]).unwrap();
        assert_eq!(unfiltered.total_records, 3);

        // The filtered recompute agrees with a manual count.
        let all = service
            .query_observations::<&str>(&snapshot, &[], 0, 100)
            .unwrap();
        let expected = all
            .items
            .iter()
            .filter(|validation| validation.record_is_valid)
            .count() as u64;
        assert_eq!(filtered.total_records, expected);
    }

    #[test]
    fn test_filters_combine_with_and() {
        let dir = tempdir().unwrap();
        let observations = [(true, false), (false, true), (true, true)];
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &observations);
        service.finalize(&snapshot).unwrap();

        let both = service
            .query_rules_stats(
                &snapshot,
                &["record_is_valid@@true", "record_is_transformed@@true"],
            )
            .unwrap();
        assert_eq!(both.total_records, 1);

        let by_rule = service
            .query_rules_stats(&snapshot, &["invalid_rules@@1"])
            .unwrap();
        assert_eq!(by_rule.total_records, 1);
    }

    #[test]
    fn test_unknown_filter_field_ignored() {
        let dir = tempdir().unwrap();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &[(true, false), (false, false)]);
        service.finalize(&snapshot).unwrap();

        let stats = service
            .query_rules_stats(&snapshot, &["mystery_field@@x"])
            .unwrap();
        assert_eq!(stats.total_records, 2);
    }

    #[test]
    fn test_malformed_filter_rejected() {
        let dir = tempdir().unwrap();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &[(true, false)]);
        service.finalize(&snapshot).unwrap();

        let err = service
            .query_rules_stats(&snapshot, &["no separator"])
            .unwrap_err();
        assert!(matches!(err, OaiError::Statistics(_)));
    }

    #[test]
    fn test_pagination_completeness() {
        let dir = tempdir().unwrap();
        let observations: Vec<(bool, bool)> = (0..7).map(|index| (index % 2 == 0, false)).collect();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &observations);
        service.finalize(&snapshot).unwrap();

        for page_size in 1..=4usize {
            let mut seen = Vec::new();
            let mut page = 0;
            loop {
                let result = service
                    .query_observations::<&str>(&snapshot, &[], page, page_size)
                    .unwrap();
                assert_eq!(result.total_filtered, 7);
                if result.items.is_empty() {
                    break;
                }
                seen.extend(result.items.iter().map(|item| item.identifier_hash.clone()));
                page += 1;
            }
            // No duplicates, full coverage, hash order.
            let mut sorted = seen.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), 7);
            assert_eq!(seen, sorted);
        }
    }

    #[test]
    fn test_rule_occurrences_detailed_diagnose() {
        let dir = tempdir().unwrap();
        let observations = [(true, false), (true, false), (false, false)];
        let (mut service, snapshot) =
            service_with_observations(dir.path(), true, &observations);
        service.finalize(&snapshot).unwrap();

        // Rule 1 stores occurrences; two records said Hello.
        let occurrences = service
            .query_rule_occurrences::<&str>(&snapshot, 1, &[])
            .unwrap();
        assert_eq!(occurrences.valid, vec![("Hello".to_owned(), 2)]);
        assert_eq!(occurrences.invalid, vec![("Nope".to_owned(), 1)]);

        // Rule 2 does not store occurrences.
        let occurrences = service
            .query_rule_occurrences::<&str>(&snapshot, 2, &[])
            .unwrap();
        assert!(occurrences.valid.is_empty());

        // The record view carries the same values.
        let validation = service.get_record(&snapshot, "oai:test:0").unwrap();
        assert_eq!(validation.rule_facts[0].valid_occurrences, vec!["Hello"]);
        assert!(validation.rule_facts[1].valid_occurrences.is_empty());
    }

    #[test]
    fn test_occurrences_not_stored_without_detailed_diagnose() {
        let dir = tempdir().unwrap();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &[(true, false)]);
        service.finalize(&snapshot).unwrap();

        let occurrences = service
            .query_rule_occurrences::<&str>(&snapshot, 1, &[])
            .unwrap();
        assert!(occurrences.valid.is_empty());
        assert!(occurrences.invalid.is_empty());
    }

    #[test]
    fn test_delete_removes_validation_data() {
        let dir = tempdir().unwrap();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &[(true, false)]);
        service.finalize(&snapshot).unwrap();

        service.delete(&snapshot).unwrap();
        assert!(service.get_snapshot_stats(&snapshot).unwrap_err().is_not_found());
        assert!(service
            .query_observations::<&str>(&snapshot, &[], 0, 10)
            .unwrap_err()
            .is_not_found());

        // Deleting twice is fine.
        service.delete(&snapshot).unwrap();
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &[(true, false), (false, true)]);
        let first = service.finalize(&snapshot).unwrap();

        // A restarted worker deletes and re-runs; the final state matches.
        service.delete(&snapshot).unwrap();
        service.initialize(&snapshot).unwrap();
        for index in 0..2 {
            let valid = index == 0;
            service
                .add_observation(
                    &snapshot,
                    &record(index),
                    &result(valid, !valid, if valid { "Hello" } else { "Nope" }),
                )
                .unwrap();
        }
        let second = service.finalize(&snapshot).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_identifier_filter() {
        let dir = tempdir().unwrap();
        let (mut service, snapshot) =
            service_with_observations(dir.path(), false, &[(true, false), (false, false)]);
        service.finalize(&snapshot).unwrap();

        let page = service
            .query_observations(&snapshot, &["identifier@@oai:test:1"], 0, 10)
            .unwrap();
        assert_eq!(page.total_filtered, 1);
        assert_eq!(page.items[0].identifier, "oai:test:1");
        assert_eq!(page.total_pages(), 1);
    }
}
