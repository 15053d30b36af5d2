/*!
A harvested record as produced by the OAI-PMH harvester.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// One record pulled from a network during a harvest. Immutable in this
/// subsystem except for the identifier (rewritten by identifier rules) and
/// the datestamp (touched when a transformation changed the record).
pub struct HarvestedRecord {
    /// Content fingerprint assigned by the harvester.
    pub id: String,
    /// Repository-assigned OAI identifier, unique within a snapshot.
    pub identifier: String,
    /// Datestamp reported by the repository for this record.
    pub datestamp: DateTime<Utc>,
    /// Hash of the record XML as harvested, keys the blob store.
    pub original_metadata_hash: String,
    /// True when the repository flagged the record as deleted.
    #[serde(default)]
    pub deleted: bool,
}

impl HarvestedRecord {
    /// A record with the given identifier and original metadata hash.
    pub fn new(
        identifier: impl Into<String>,
        datestamp: DateTime<Utc>,
        original_metadata_hash: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        let original_metadata_hash = original_metadata_hash.into();
        HarvestedRecord {
            id: crate::util::md5_hex(&identifier),
            identifier,
            datestamp,
            original_metadata_hash,
            deleted: false,
        }
    }
}
