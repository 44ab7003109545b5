use crate::warehouse::WarehouseError;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid options for source '{name}': {error}")]
    Options {
        name: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("request to '{url}' failed: {error}")]
    Http {
        url: String,
        #[source]
        error: reqwest::Error,
    },

    #[error("'{url}' responded with {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from '{url}': {reason}")]
    Response { url: String, reason: String },

    #[error("source '{name}' has an invalid date_key_format '{format}'")]
    DateKeyFormat { name: String, format: String },

    #[error("source '{name}' failed: {error}")]
    Warehouse {
        name: String,
        #[source]
        error: WarehouseError,
    },
}
