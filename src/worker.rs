/*!
The validation worker: the iterator-driven pipeline that binds the blob
store, metadata tree, rule engine, stat store and snapshot log together
for one snapshot.

One worker owns one snapshot end to end; workers on disjoint snapshots
are isolated by snapshot id. The loop is synchronous and CPU-bound, with
all blocking in I/O. Cooperative stop is checked at the top of each
record; a stopped or failed run still finalizes the stat store (or marks
the snapshot errored) so buffers and files are released.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::catalog::{HarvestedRecordSource, SnapshotStore};
use crate::config::StoreConfig;
use crate::error::{OaiError, Result};
use crate::metadata::RecordMetadata;
use crate::model::{
    HarvestedRecord, NetworkInfo, RuleDef, SnapshotMetadata, SnapshotStatus,
    SnapshotValidationStats, ValidatorResult,
};
use crate::rules::{Transformer, Validator};
use crate::stats::ValidationStatsService;
use crate::store::{MetadataBlobStore, SnapshotLogService};

/// Records between two progress pushes to the catalog.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Validation worker for one network.
pub struct ValidationWorker<'a, C: SnapshotStore, S: HarvestedRecordSource> {
    catalog: &'a C,
    source: &'a S,
    network: NetworkInfo,
    blob_store: MetadataBlobStore,
    stats: ValidationStatsService,
    log: SnapshotLogService,
    page_size: usize,
    stop: Arc<AtomicBool>,
}

impl<'a, C: SnapshotStore, S: HarvestedRecordSource> ValidationWorker<'a, C, S> {
    /// A worker over the given stores and network configuration.
    pub fn new(config: StoreConfig, catalog: &'a C, source: &'a S, network: NetworkInfo) -> Self {
        ValidationWorker {
            catalog,
            source,
            network,
            blob_store: MetadataBlobStore::new(config.clone()),
            stats: ValidationStatsService::new(config.clone()),
            log: SnapshotLogService::new(config),
            page_size: DEFAULT_PAGE_SIZE,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the progress page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Handle for requesting a cooperative stop from another thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Validate and transform the network's last harvested snapshot.
    ///
    /// On success the snapshot ends `VALID` with its stats finalized. On
    /// failure the error is logged to the snapshot log, the stat store is
    /// finalized (or the snapshot marked errored) and the error returned.
    pub fn run(&mut self) -> Result<SnapshotValidationStats> {
        let snapshot = self.pre_run()?;
        match self.run_pipeline(&snapshot) {
            Ok(stopped) => self.post_run(&snapshot, stopped),
            Err(err) => {
                error!(snapshot_id = snapshot.snapshot_id, error = %err, "validation failed");
                let _ = self
                    .log
                    .add_entry(&snapshot, &format!("validation failed: {}", err));
                // Release buffers and files even on the failure path.
                let finalized = self.stats.finalize(&snapshot).is_ok();
                let status = match err {
                    OaiError::Transform { .. } => SnapshotStatus::HarvestingFinishedError,
                    _ if !finalized => SnapshotStatus::HarvestingFinishedError,
                    _ => SnapshotStatus::HarvestingFinishedValid,
                };
                let _ = self
                    .catalog
                    .update_snapshot_status(snapshot.snapshot_id, status);
                Err(err)
            }
        }
    }

    /// Locate the snapshot, clear stale validation data and mark the
    /// validation started.
    fn pre_run(&mut self) -> Result<SnapshotMetadata> {
        let snapshot_id = self
            .catalog
            .find_last_harvesting_snapshot(&self.network)?
            .ok_or_else(|| {
                OaiError::Catalog(anyhow::anyhow!(
                    "no harvested snapshot for network {}",
                    self.network.acronym
                ))
            })?;
        let mut snapshot = self
            .catalog
            .get_snapshot_metadata(snapshot_id)?
            .ok_or_else(|| {
                OaiError::Catalog(anyhow::anyhow!("snapshot {} has no metadata", snapshot_id))
            })?;

        // Freeze the rule-definition set for the lifetime of this
        // snapshot's validation data.
        snapshot.rule_definitions = self
            .network
            .validator
            .iter()
            .flatten()
            .map(|rule| (rule.rule_id, RuleDef::from_rule(rule)))
            .collect();
        self.log.cache_metadata(&snapshot);

        self.stats.delete(&snapshot)?;
        self.stats.initialize(&snapshot)?;
        self.catalog
            .reset_snapshot_validation_counts(snapshot_id)?;
        self.catalog.start_validation(snapshot_id)?;
        self.log.add_entry(&snapshot, "validation started")?;
        info!(
            snapshot_id,
            network = %self.network.acronym,
            "validation started"
        );
        Ok(snapshot)
    }

    /// Drive the record iterator. Returns whether a stop was requested.
    fn run_pipeline(&mut self, snapshot: &SnapshotMetadata) -> Result<bool> {
        let validator = self
            .network
            .validator
            .as_deref()
            .map(Validator::new);
        let mut transformers = Vec::new();
        if let Some(rules) = self.network.transformer.as_deref() {
            transformers.push(Transformer::new(rules)?);
        }
        if let Some(rules) = self.network.secondary_transformer.as_deref() {
            transformers.push(Transformer::new(rules)?);
        }

        let mut result = ValidatorResult::new();
        let mut processed = 0u64;
        let source = self.source;
        let records = source.records(snapshot.snapshot_id)?;
        for record in records {
            if self.stop.load(Ordering::Relaxed) {
                self.log.add_entry(snapshot, "validation stopped")?;
                return Ok(true);
            }
            let mut record = record.map_err(OaiError::Catalog)?;
            self.process_record(
                snapshot,
                validator.as_ref(),
                &transformers,
                &mut record,
                &mut result,
            )?;
            processed += 1;
            if processed % self.page_size as u64 == 0 {
                self.push_progress(snapshot)?;
            }
        }
        Ok(false)
    }

    /// Validate and transform one record.
    fn process_record(
        &mut self,
        snapshot: &SnapshotMetadata,
        validator: Option<&Validator>,
        transformers: &[Transformer],
        record: &mut HarvestedRecord,
        result: &mut ValidatorResult,
    ) -> Result<()> {
        result.reset();
        let xml = self
            .blob_store
            .get(snapshot, &record.original_metadata_hash)?;
        let mut metadata = RecordMetadata::parse(&xml)?;
        metadata.set_identifier(&record.identifier);
        metadata.set_datestamp(record.datestamp);
        metadata.set_origin(&self.network.origin_url);
        metadata.set_store_schema(&self.network.metadata_store_schema);

        let mut changed = false;
        for transformer in transformers {
            changed |= transformer.transform(&self.network, record, &mut metadata)?;
        }

        match validator {
            Some(validator) => validator.validate(&metadata, result),
            None => result.valid = true,
        }

        let published_hash = if changed {
            self.blob_store.store(snapshot, &metadata.serialize()?)?
        } else {
            record.original_metadata_hash.clone()
        };
        result.metadata_hash = published_hash;
        result.transformed = changed;

        self.stats.add_observation(snapshot, record, result)?;
        if changed {
            record.datestamp = Utc::now();
        }
        Ok(())
    }

    /// Push the current totals to the catalog and persist the snapshot.
    fn push_progress(&mut self, snapshot: &SnapshotMetadata) -> Result<()> {
        if let Some(stats) = self.stats.current_stats(snapshot.snapshot_id) {
            self.catalog.update_snapshot_counts(
                snapshot.snapshot_id,
                stats.total_records,
                stats.valid_records,
                stats.transformed_records,
            )?;
            self.catalog.save_snapshot(snapshot.snapshot_id)?;
        }
        Ok(())
    }

    /// Finalize the stat store and mark the snapshot.
    fn post_run(
        &mut self,
        snapshot: &SnapshotMetadata,
        stopped: bool,
    ) -> Result<SnapshotValidationStats> {
        self.push_progress(snapshot)?;
        let stats = self.stats.finalize(snapshot)?;
        if stopped {
            self.catalog
                .update_snapshot_status(snapshot.snapshot_id, SnapshotStatus::HarvestingStopped)?;
        } else {
            // finishValidation runs strictly after finalize, so readers
            // after completion see consistent totals.
            self.catalog.finish_validation(snapshot.snapshot_id)?;
        }
        self.log.add_entry(
            snapshot,
            &format!(
                "validation finished: {} records, {} valid, {} transformed",
                stats.total_records, stats.valid_records, stats.transformed_records
            ),
        )?;
        info!(
            snapshot_id = snapshot.snapshot_id,
            total = stats.total_records,
            valid = stats.valid_records,
            transformed = stats.transformed_records,
            "validation finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::md5_hex;
    use std::cell::RefCell;
    use tempfile::tempdir;

    const HELLO_XML: &str = "<metadata><element name='dc'><element name='title'>\
        <element name='none'><field name='value'>Hello</field></element>\
        </element></element></metadata>";

    struct MemoryCatalog {
        snapshot: SnapshotMetadata,
        statuses: RefCell<Vec<SnapshotStatus>>,
        counts: RefCell<(u64, u64, u64)>,
    }

    impl MemoryCatalog {
        fn new(network: NetworkInfo) -> Self {
            MemoryCatalog {
                snapshot: SnapshotMetadata::new(11, network),
                statuses: RefCell::new(Vec::new()),
                counts: RefCell::new((0, 0, 0)),
            }
        }

        fn last_status(&self) -> Option<SnapshotStatus> {
            self.statuses.borrow().last().copied()
        }
    }

    impl SnapshotStore for MemoryCatalog {
        fn find_last_harvesting_snapshot(
            &self,
            _network: &NetworkInfo,
        ) -> anyhow::Result<Option<u64>> {
            Ok(Some(self.snapshot.snapshot_id))
        }

        fn get_snapshot_metadata(
            &self,
            _snapshot_id: u64,
        ) -> anyhow::Result<Option<SnapshotMetadata>> {
            Ok(Some(self.snapshot.clone()))
        }

        fn update_snapshot_counts(
            &self,
            _snapshot_id: u64,
            total: u64,
            valid: u64,
            transformed: u64,
        ) -> anyhow::Result<()> {
            *self.counts.borrow_mut() = (total, valid, transformed);
            Ok(())
        }

        fn increment_valid_size(&self, _snapshot_id: u64) -> anyhow::Result<()> {
            Ok(())
        }

        fn increment_transformed_size(&self, _snapshot_id: u64) -> anyhow::Result<()> {
            Ok(())
        }

        fn reset_snapshot_validation_counts(&self, _snapshot_id: u64) -> anyhow::Result<()> {
            *self.counts.borrow_mut() = (0, 0, 0);
            Ok(())
        }

        fn update_snapshot_status(
            &self,
            _snapshot_id: u64,
            status: SnapshotStatus,
        ) -> anyhow::Result<()> {
            self.statuses.borrow_mut().push(status);
            Ok(())
        }

        fn save_snapshot(&self, _snapshot_id: u64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct MemorySource {
        records: Vec<HarvestedRecord>,
    }

    impl HarvestedRecordSource for MemorySource {
        fn records(
            &self,
            _snapshot_id: u64,
        ) -> anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<HarvestedRecord>> + '_>>
        {
            Ok(Box::new(self.records.clone().into_iter().map(Ok)))
        }
    }

    fn network_json(extra: &str) -> NetworkInfo {
        serde_json::from_str(&format!(r#"{{"acronym": "TEST"{}}}"#, extra)).unwrap()
    }

    /// Seed the blob store and build a one-record source.
    fn seed_source(config: &StoreConfig, network: &NetworkInfo) -> (MemorySource, String) {
        let blob_store = MetadataBlobStore::new(config.clone());
        let snapshot = SnapshotMetadata::new(11, network.clone());
        let hash = blob_store.store(&snapshot, HELLO_XML).unwrap();
        let record = HarvestedRecord::new("oai:test:1", Utc::now(), hash.clone());
        (
            MemorySource {
                records: vec![record],
            },
            hash,
        )
    }

    fn run_worker(
        config: &StoreConfig,
        network: NetworkInfo,
    ) -> (
        Result<SnapshotValidationStats>,
        MemoryCatalog,
        String,
    ) {
        let (source, original_hash) = seed_source(config, &network);
        let catalog = MemoryCatalog::new(network.clone());
        let mut worker =
            ValidationWorker::new(config.clone(), &catalog, &source, network).with_page_size(2);
        let outcome = worker.run();
        (outcome, catalog, original_hash)
    }

    #[test]
    fn test_no_rules_record_is_valid_untransformed() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let (outcome, catalog, original_hash) = run_worker(&config, network_json(""));

        let stats = outcome.unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.valid_records, 1);
        assert_eq!(stats.transformed_records, 0);
        assert_eq!(catalog.last_status(), Some(SnapshotStatus::Valid));
        assert_eq!(*catalog.counts.borrow(), (1, 1, 0));

        // The published hash equals the original hash.
        let service = ValidationStatsService::new(config);
        let snapshot = SnapshotMetadata::new(11, network_json(""));
        let validation = service.get_record(&snapshot, "oai:test:1").unwrap();
        assert_eq!(validation.published_metadata_hash, original_hash);
        assert!(!validation.is_transformed);
    }

    #[test]
    fn test_regex_validator_one_or_more() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let network = network_json(
            r#", "validator": [{
                "@class": "validator.field.regex",
                "rule-id": 1,
                "mandatory": true,
                "quantifier": "ONE_OR_MORE",
                "store-occurrences": true,
                "field-name": "dc.title.none",
                "pattern": "^Hello$"
            }]"#,
        );
        let (outcome, _, _) = run_worker(&config, network.clone());
        let stats = outcome.unwrap();
        assert_eq!(stats.valid_records, 1);
        assert_eq!(stats.rule_stats[&1].valid, 1);

        let service = ValidationStatsService::new(config);
        let snapshot = SnapshotMetadata::new(11, network);
        let validation = service.get_record(&snapshot, "oai:test:1").unwrap();
        assert!(validation.rule_facts[0].is_valid);
    }

    #[test]
    fn test_regex_validator_zero_only_invalidates() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let network = network_json(
            r#", "validator": [{
                "@class": "validator.field.regex",
                "rule-id": 1,
                "mandatory": true,
                "quantifier": "ZERO_ONLY",
                "store-occurrences": false,
                "field-name": "dc.title.none",
                "pattern": "^Hello$"
            }]"#,
        );
        let (outcome, _, _) = run_worker(&config, network);
        let stats = outcome.unwrap();
        assert_eq!(stats.valid_records, 0);
        assert_eq!(stats.facets["record_is_valid"]["false"], 1);
    }

    #[test]
    fn test_field_add_transformer_publishes_new_blob() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let network = network_json(
            r#", "transformer": [{
                "@class": "transformer.field.add",
                "rule-id": 20,
                "runorder": 1,
                "target-field-name": "dc.subject.none",
                "value": "X"
            }]"#,
        );
        let (outcome, _, original_hash) = run_worker(&config, network.clone());
        let stats = outcome.unwrap();
        assert_eq!(stats.transformed_records, 1);

        let snapshot = SnapshotMetadata::new(11, network);
        let service = ValidationStatsService::new(config.clone());
        let validation = service.get_record(&snapshot, "oai:test:1").unwrap();
        assert!(validation.is_transformed);
        assert_ne!(validation.published_metadata_hash, original_hash);

        // The transformed XML is retrievable and carries the new field.
        let blob_store = MetadataBlobStore::new(config);
        let xml = blob_store
            .get(&snapshot, &validation.published_metadata_hash)
            .unwrap();
        let metadata = RecordMetadata::parse(&xml).unwrap();
        assert_eq!(
            metadata.field_occurrences(&"dc.subject.none".into()),
            vec!["X"]
        );
    }

    #[test]
    fn test_expression_validator_and_not() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let network = network_json(
            r#", "validator": [{
                "@class": "validator.field.expression",
                "rule-id": 2,
                "mandatory": true,
                "quantifier": "ONE_OR_MORE",
                "store-occurrences": false,
                "field-expression": "dc.title.none=='Hello' AND NOT dc.title.none=%'^H.*'"
            }]"#,
        );
        let (outcome, _, _) = run_worker(&config, network);
        let stats = outcome.unwrap();
        assert_eq!(stats.valid_records, 0);
    }

    #[test]
    fn test_missing_blob_fails_with_harvest_finished_status() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let network = network_json("");
        // A record pointing at a blob that was never stored.
        let source = MemorySource {
            records: vec![HarvestedRecord::new(
                "oai:test:1",
                Utc::now(),
                "00000000000000000000000000000000",
            )],
        };
        let catalog = MemoryCatalog::new(network.clone());
        let mut worker = ValidationWorker::new(config, &catalog, &source, network);
        let err = worker.run().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            catalog.last_status(),
            Some(SnapshotStatus::HarvestingFinishedValid)
        );
    }

    #[test]
    fn test_unparseable_metadata_stops_worker() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let network = network_json("");
        let blob_store = MetadataBlobStore::new(config.clone());
        let snapshot = SnapshotMetadata::new(11, network.clone());
        let hash = blob_store.store(&snapshot, "<metadata><broken").unwrap();
        let source = MemorySource {
            records: vec![HarvestedRecord::new("oai:test:1", Utc::now(), hash)],
        };
        let catalog = MemoryCatalog::new(network.clone());
        let mut worker = ValidationWorker::new(config.clone(), &catalog, &source, network);
        let err = worker.run().unwrap_err();
        assert!(matches!(err, OaiError::MetadataParse(_)));
        assert_eq!(
            catalog.last_status(),
            Some(SnapshotStatus::HarvestingFinishedValid)
        );

        // The failure was logged to the snapshot log.
        let log = SnapshotLogService::new(config);
        let entries = log.read_page(&snapshot, 0, 10).unwrap();
        assert!(entries
            .iter()
            .any(|entry| entry.contains("validation failed")));
    }

    #[test]
    fn test_stop_requested_before_first_record() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let network = network_json("");
        let (source, _) = seed_source(&config, &network);
        let catalog = MemoryCatalog::new(network.clone());
        let mut worker = ValidationWorker::new(config, &catalog, &source, network);
        worker.stop_handle().store(true, Ordering::Relaxed);

        let stats = worker.run().unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(
            catalog.last_status(),
            Some(SnapshotStatus::HarvestingStopped)
        );
    }

    #[test]
    fn test_identifier_hash_is_md5() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let (outcome, _, _) = run_worker(&config, network_json(""));
        outcome.unwrap();

        let service = ValidationStatsService::new(config);
        let snapshot = SnapshotMetadata::new(11, network_json(""));
        let validation = service.get_record(&snapshot, "oai:test:1").unwrap();
        assert_eq!(validation.identifier_hash, md5_hex("oai:test:1"));
    }
}
