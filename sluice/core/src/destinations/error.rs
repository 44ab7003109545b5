use crate::warehouse::WarehouseError;

/// Destination configuration errors, fatal for the run
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unknown load type '{load_type}' for destination '{destination}'")]
    UnknownLoadType {
        destination: String,
        load_type: String,
    },

    #[error("destination '{0}' uses upsert but has no merge_key")]
    MissingMergeKey(String),

    #[error("destination '{destination}': {error}")]
    Connection {
        destination: String,
        #[source]
        error: WarehouseError,
    },
}
