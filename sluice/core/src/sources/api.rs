use async_trait::async_trait;
use serde_json::Value;
use sluice_schemas::{sources::API, ApiAuth, ApiSource, Record, SourceDescriptor};
use tracing::{debug, instrument};

use super::{ExtractContext, SourceError, SourceReader};

/// Paginated HTTP GET source
#[derive(Debug, Clone, derive_new::new)]
pub struct ApiReader {
    client: reqwest::Client,
}

#[async_trait]
impl SourceReader for ApiReader {
    fn kind(&self) -> &str {
        API
    }

    #[instrument(skip(self, source, ctx), err)]
    async fn read(
        &self,
        name: &str,
        source: &SourceDescriptor,
        ctx: &ExtractContext,
    ) -> Result<Vec<Record>, SourceError> {
        let options: ApiSource = source.options().map_err(|error| SourceError::Options {
            name: name.to_string(),
            error,
        })?;

        let mut query: Vec<(String, String)> = options
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let (Some(field), Some(watermark)) = (&source.incremental_field, ctx.watermark) {
            query.push((field.clone(), watermark.to_rfc3339()));
        }

        let mut records = Vec::new();

        for page in 1..=source.max_pages {
            let body = self
                .fetch_page(&options, &query, page, source.batch_size)
                .await?;

            let data = page_data(&body, &options.data_key).ok_or_else(|| {
                SourceError::Response {
                    url: options.url.to_string(),
                    reason: format!("'{}' is not an array", options.data_key),
                }
            })?;

            debug!(page, records = data.len(), "Fetched page");

            if data.is_empty() {
                break;
            }

            records.extend(data.iter().map(|value| match value {
                Value::Object(record) => record.clone(),
                other => Record::from_iter([("value".to_string(), other.clone())]),
            }));

            if !has_more_pages(&body) {
                break;
            }
        }

        Ok(records)
    }
}

impl ApiReader {
    async fn fetch_page(
        &self,
        options: &ApiSource,
        query: &[(String, String)],
        page: usize,
        per_page: usize,
    ) -> Result<Value, SourceError> {
        let url = options.url.to_string();

        let mut request = self.client.get(options.url.clone()).query(query).query(&[
            (options.page_param.as_str(), page.to_string()),
            (options.per_page_param.as_str(), per_page.to_string()),
        ]);

        request = match &options.auth {
            Some(ApiAuth::Bearer { token }) => request.bearer_auth(token),
            Some(ApiAuth::ApiKey { key, header }) => request.header(header.as_str(), key.as_str()),
            Some(ApiAuth::Basic { username, password }) => {
                request.basic_auth(username, password.as_ref())
            }
            None => request,
        };

        let response = request.send().await.map_err(|error| SourceError::Http {
            url: url.clone(),
            error,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|error| SourceError::Http { url, error })
    }
}

/// Records of a page, a missing key counting as an empty page
fn page_data<'a>(body: &'a Value, data_key: &str) -> Option<&'a [Value]> {
    match body.get(data_key) {
        None | Some(Value::Null) => Some(&[]),
        Some(Value::Array(data)) => Some(data.as_slice()),
        Some(_) => None,
    }
}

/// Whether the page signals that another page follows
fn has_more_pages(body: &Value) -> bool {
    if body.get("has_more").and_then(Value::as_bool) == Some(true) {
        return true;
    }

    if matches!(body.get("next_page_url"), Some(Value::String(next)) if !next.is_empty()) {
        return true;
    }

    let meta = body.get("meta");
    let current = meta
        .and_then(|m| m.get("current_page"))
        .and_then(Value::as_u64);
    let last = meta.and_then(|m| m.get("last_page")).and_then(Value::as_u64);

    matches!((current, last), (Some(current), Some(last)) if current < last)
}
