//! Shared serde default values.

/// Default chunk size for source reads and destination writes
pub fn default_batch_size() -> usize {
    1000
}

/// Default page limit for paginated API sources
pub fn default_max_pages() -> usize {
    100
}

/// Default load type for destinations
pub fn default_load_type() -> String {
    crate::destinations::APPEND.to_string()
}

pub fn default_page_param() -> String {
    "page".to_string()
}

pub fn default_per_page_param() -> String {
    "per_page".to_string()
}

pub fn default_data_key() -> String {
    "data".to_string()
}

pub fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

pub fn default_date_key_format() -> String {
    "%Y-%m-%d".to_string()
}
