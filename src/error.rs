/*!
 * defines the [OaiError] and [Result] types.
*/

use thiserror::Error;

/// Error type for the validation and transformation core.
#[derive(Error, Debug)]
pub enum OaiError {
    /// The harvested record metadata could not be parsed into a tree.
    #[error("metadata parse error: {0}")]
    MetadataParse(String),
    /// A blob, record or stats summary was looked up but does not exist.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// What kind of entity was looked up.
        entity: &'static str,
        /// The key used for the lookup.
        key: String,
    },
    /// Filesystem failure in the blob store, snapshot log or stats flush.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A transformer rule failed. Transformations are structural so this
    /// aborts the record instead of being recorded as a diagnostic.
    #[error("transformer rule {rule_id} ({class}) failed on record {record}: {message}")]
    Transform {
        /// Id of the failing rule.
        rule_id: u64,
        /// Class discriminator of the failing rule.
        class: &'static str,
        /// Identifier of the record being transformed.
        record: String,
        /// What went wrong.
        message: String,
    },
    /// Failure in the validation-stat store.
    #[error("validation statistics error: {0}")]
    Statistics(String),
    /// The stat-store backend reported an error.
    #[error("validation statistics backend error: {0}")]
    StatisticsBackend(#[from] rusqlite::Error),
    /// A field expression could not be parsed.
    #[error("expression error: {0}")]
    Expression(String),
    /// The external snapshot catalog reported an error.
    #[error("snapshot catalog error: {0}")]
    Catalog(#[from] anyhow::Error),
}

impl OaiError {
    /// A [OaiError::NotFound] for the given entity and key.
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        OaiError::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// True if this is a [OaiError::NotFound].
    pub fn is_not_found(&self) -> bool {
        matches!(self, OaiError::NotFound { .. })
    }
}

/// Result type for the validation and transformation core.
pub type Result<T> = std::result::Result<T, OaiError>;
