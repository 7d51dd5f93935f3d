use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{Match, Query, RemoteStore, Row};
use crate::error::StoreError;

const REST_PREFIX: &str = "rest/v1";

/// HTTP adapter for a hosted PostgREST endpoint (Supabase style).
#[derive(Debug, Clone)]
pub struct PostgrestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Error body returned by PostgREST on a failed request.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: String,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

impl PostgrestStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            anyhow::bail!("store URL is empty");
        }
        if api_key.trim().is_empty() {
            anyhow::bail!("store API key is empty");
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building HTTP client for the task store")?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.trim().to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{REST_PREFIX}/{table}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response, StoreError> {
        let response = self.authorized(request).send().await.map_err(|err| {
            warn!(action, error = %err, "task store request failed");
            StoreError::new(format!("{action} request failed: {err}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<PostgrestError>(&body)
            .map(describe_error)
            .unwrap_or_else(|_| {
                if body.trim().is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    body
                }
            });
        warn!(action, status = status.as_u16(), message = %message, "task store rejected request");
        Err(StoreError::new(message))
    }

    async fn rows(response: Response, action: &str) -> Result<Vec<Row>, StoreError> {
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|err| StoreError::new(format!("failed to decode {action} response: {err}")))
    }
}

fn describe_error(err: PostgrestError) -> String {
    let mut message = err.message;
    if let Some(details) = err.details.filter(|d| !d.is_empty()) {
        message.push_str(&format!(" ({details})"));
    }
    if let Some(hint) = err.hint.filter(|h| !h.is_empty()) {
        message.push_str(&format!("; hint: {hint}"));
    }
    message
}

/// Renders a value the way PostgREST expects inside an operator filter.
fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Query-string pairs for a select: `select=*`, one `column=op.value` per
/// predicate, then `order=column.asc|desc`.
pub fn query_pairs(query: &Query) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), "*".to_string())];
    for predicate in &query.predicates {
        pairs.push((
            predicate.column.clone(),
            format!("{}.{}", predicate.op.as_str(), filter_literal(&predicate.value)),
        ));
    }
    if let Some(order) = query.order.as_ref() {
        let direction = if order.ascending { "asc" } else { "desc" };
        pairs.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    pairs
}

fn match_pair(matcher: &Match) -> (String, String) {
    (
        matcher.column.clone(),
        format!("eq.{}", filter_literal(&matcher.value)),
    )
}

fn single_row(rows: Vec<Row>, action: &str) -> Result<Row, StoreError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| StoreError::new(format!("{action} returned no rows")))
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    #[instrument(skip(self), fields(table = %query.table))]
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let pairs = query_pairs(query);
        debug!(?pairs, "select");
        let request = self.client.get(self.table_url(&query.table)).query(&pairs);
        let response = self.send(request, "select").await?;
        Self::rows(response, "select").await
    }

    #[instrument(skip(self, row))]
    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(request, "insert").await?;
        single_row(Self::rows(response, "insert").await?, "insert")
    }

    #[instrument(skip(self, patch), fields(column = %matcher.column))]
    async fn update(&self, table: &str, matcher: &Match, patch: Row) -> Result<Row, StoreError> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[match_pair(matcher)])
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.send(request, "update").await?;
        single_row(Self::rows(response, "update").await?, "update")
    }

    #[instrument(skip(self), fields(column = %matcher.column))]
    async fn delete(&self, table: &str, matcher: &Match) -> Result<(), StoreError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[match_pair(matcher)]);
        self.send(request, "delete").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::remote::Op;

    #[test]
    fn select_pairs_encode_filters_and_order() {
        let query = Query::select("tasks")
            .filter("status", Op::Eq, "todo")
            .filter("due_date", Op::Gte, "2026-03-01T00:00:00+00:00")
            .filter("due_date", Op::Lte, "2026-03-31T23:59:59+00:00")
            .order_by("created_at", false);

        let pairs = query_pairs(&query);
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), "*".to_string()),
                ("status".to_string(), "eq.todo".to_string()),
                ("due_date".to_string(), "gte.2026-03-01T00:00:00+00:00".to_string()),
                ("due_date".to_string(), "lte.2026-03-31T23:59:59+00:00".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
            ]
        );
    }

    #[test]
    fn match_pair_uses_equality() {
        let pair = match_pair(&Match::eq("id", "abc"));
        assert_eq!(pair, ("id".to_string(), "eq.abc".to_string()));
        assert_eq!(filter_literal(&json!(3)), "3");
    }

    #[test]
    fn error_body_is_condensed() {
        let err: PostgrestError = serde_json::from_value(json!({
            "message": "new row violates check constraint",
            "details": "Failing row contains (...)",
            "hint": null,
            "code": "23514"
        }))
        .expect("decode");
        assert_eq!(
            describe_error(err),
            "new row violates check constraint (Failing row contains (...))"
        );
    }

    #[test]
    fn rejects_blank_configuration() {
        assert!(PostgrestStore::new("", "key", Duration::from_secs(5)).is_err());
        assert!(PostgrestStore::new("https://x.supabase.co", " ", Duration::from_secs(5)).is_err());

        let store = PostgrestStore::new("https://x.supabase.co/", "key", Duration::from_secs(5))
            .expect("store");
        assert_eq!(store.table_url("tasks"), "https://x.supabase.co/rest/v1/tasks");
    }
}
