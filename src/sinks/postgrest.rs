use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;

use super::{InsertOutcome, TableSink};
use crate::config::StoreConfig;
use crate::pipeline::Record;

/// Inserts batches through a PostgREST endpoint (the REST layer of a hosted
/// Postgres project) at `{url}/rest/v1/{table}`.
pub struct PostgrestSink {
    client: Client,
    base_url: String,
}

impl PostgrestSink {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.key)
            .context("Store: Access key is not a valid header value")?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.key))
            .context("Store: Access key is not a valid header value")?;
        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Store: Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Reads at most one row from `table` to confirm the endpoint, key and
    /// table are usable.
    pub fn check(&self, table: &str) -> Result<()> {
        let response = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*"), ("limit", "1")])
            .send()
            .with_context(|| format!("Store: Failed to reach {}", self.base_url))?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            bail!(
                "Store: Table {:?} is not readable: HTTP {}: {}",
                table,
                status.as_u16(),
                error_message(&body)
            );
        }
        Ok(())
    }
}

impl TableSink for PostgrestSink {
    fn insert(&mut self, table: &str, records: &[Record]) -> InsertOutcome {
        let response = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(records)
            .send();

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text() {
                    Ok(body) => classify_response(status, &body),
                    Err(err) => InsertOutcome::Failure {
                        detail: format!("HTTP {}: failed to read response: {}", status, err),
                    },
                }
            }
            Err(err) => InsertOutcome::Failure {
                detail: format!("request failed: {}", err),
            },
        }
    }
}

/// Maps an insert response to an outcome. Only a 2xx status with a
/// non-empty array of echoed rows counts as confirmation.
pub fn classify_response(status: u16, body: &str) -> InsertOutcome {
    if !(200..300).contains(&status) {
        return InsertOutcome::Failure {
            detail: format!("HTTP {}: {}", status, error_message(body)),
        };
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(rows)) if !rows.is_empty() => InsertOutcome::Success {
            row_count: rows.len(),
        },
        _ => InsertOutcome::Failure {
            detail: format!("HTTP {}: no rows confirmed", status),
        },
    }
}

fn error_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body)
        && let Some(Value::String(message)) = map.get("message")
    {
        return match map.get("details") {
            Some(Value::String(details)) if !details.is_empty() => {
                format!("{message} ({details})")
            }
            _ => message.clone(),
        };
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        trimmed.to_string()
    }
}
