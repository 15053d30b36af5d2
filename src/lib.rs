#![deny(missing_docs)]
/*!
# oai-validator-rs

oai-validator-rs is the validation and transformation core for harvested
[OAI-PMH](https://www.openarchives.org/pmh/) metadata snapshots.

A snapshot is a frozen point-in-time copy of one network's harvested
records. This crate takes a harvested snapshot and progresses it through
per-network rule pipelines:

* The [metadata] package parses each record's XML into a mutable tree with
  dotted-path field addressing.
* The [rules] package applies data-defined transformer and validator rules
  to that tree and produces per-record verdicts.
* The [store] package keeps the original and transformed record XML in a
  content-addressed gzip blob store, plus a per-snapshot text log.
* The [stats] package persists one validation row per record with dynamic
  per-rule columns and answers filtered stat queries.
* The [worker] module binds the above into a resumable pipeline driven by
  the snapshot catalog.

Harvesting itself, indexing and the admin surfaces live outside this crate;
they are reached through the traits in [catalog].
*/
pub mod catalog;
pub mod config;
pub mod error;
pub mod metadata;
pub mod model;
pub mod rules;
pub mod stats;
pub mod store;
pub mod util;
pub mod worker;

pub use error::{OaiError, Result};
