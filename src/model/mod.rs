/*!
The data model for harvested records, networks, snapshots and validation
results.

The structs here know how to serialise and deserialise themselves with
[serde] and carry no behaviour beyond bookkeeping; the engines that act on
them live in [crate::rules], [crate::stats] and [crate::worker].
*/

pub mod network;
pub mod record;
pub mod snapshot;
pub mod stats;
pub mod validation;

pub use network::NetworkInfo;
pub use record::HarvestedRecord;
pub use snapshot::{RuleDef, SnapshotMetadata, SnapshotStatus};
pub use stats::SnapshotValidationStats;
pub use validation::{
    ContentValidatorResult, Quantifier, RecordValidation, RuleFact, ValidatorResult,
    ValidatorRuleResult,
};
