//! HTTP implementation of [`Fetcher`].
//!
//! Unwraps the API's `{success, data, error, message}` envelope and maps
//! every failure onto a [`QueryError`] with a presentable message.

use std::time::Instant;

use aequitas_api_types::{Category, Envelope, Expense, Pot};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::cache::{CachedData, EntityTag, Fetcher, QueryError, QueryKey, WriteOp, WriteResult};
use crate::config::ApiSettings;

use super::error::InfraError;

const REJECTED_FALLBACK: &str = "Operation failed";
const FAILURE_FALLBACK: &str = "Something went wrong";

pub fn user_agent() -> &'static str {
    concat!("aequitas/", env!("CARGO_PKG_VERSION"))
}

pub struct HttpFetcher {
    client: Client,
    base: Url,
}

impl HttpFetcher {
    pub fn new(settings: &ApiSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self::with_client(client, settings.base_url.clone()))
    }

    pub fn with_client(client: Client, mut base: Url) -> Self {
        // Shown in logs and errors; request paths are appended per segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Append `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, QueryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| QueryError::decode(format!("base URL {} cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Option<Value>, QueryError> {
        let mut url = self.url(segments)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }

        let started = Instant::now();
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| QueryError::network(err.to_string()))?;
        debug!(
            %method,
            %url,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "API request completed"
        );
        unwrap_envelope(response).await
    }
}

async fn unwrap_envelope(response: Response) -> Result<Option<Value>, QueryError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| QueryError::network(err.to_string()))?;
    let envelope = serde_json::from_slice::<Envelope<Value>>(&bytes).ok();

    if !status.is_success() {
        return Err(failure_error(status, envelope.as_ref()));
    }

    let envelope = envelope.ok_or_else(|| {
        QueryError::decode(format!("status {status}: response is not an API envelope"))
    })?;
    if !envelope.success {
        return Err(QueryError::rejected(
            non_empty(&envelope.message).unwrap_or(REJECTED_FALLBACK),
        ));
    }
    Ok(envelope.data.filter(|data| !data.is_null()))
}

fn non_empty(message: &str) -> Option<&str> {
    let trimmed = message.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Error for a non-2xx response: validation details win, then the
/// envelope message, then a generic fallback.
fn failure_error(status: StatusCode, envelope: Option<&Envelope<Value>>) -> QueryError {
    let details = envelope
        .and_then(Envelope::validation_details)
        .filter(|details| !details.is_empty());
    if let Some(details) = details {
        let joined = details
            .iter()
            .map(|detail| format!("{}: {}", detail.field(), detail.msg))
            .collect::<Vec<_>>()
            .join(", ");
        return QueryError::validation(format!("Validation Error: {joined}"));
    }

    let message = envelope
        .and_then(|envelope| non_empty(&envelope.message))
        .unwrap_or(FAILURE_FALLBACK);
    debug!(status = status.as_u16(), reason = message, "API request rejected");
    QueryError::rejected(message)
}

fn required(data: Option<Value>, what: &str) -> Result<Value, QueryError> {
    data.ok_or_else(|| QueryError::decode(format!("response carried no {what}")))
}

fn decode<T: DeserializeOwned>(data: Option<Value>, what: &str) -> Result<T, QueryError> {
    serde_json::from_value(required(data, what)?)
        .map_err(|err| QueryError::decode(format!("malformed {what}: {err}")))
}

fn read_route(key: &QueryKey) -> (Method, &'static [&'static str]) {
    match key.tag() {
        EntityTag::Expenses => (Method::GET, &["expenses"]),
        EntityTag::ExpensesSummary => (Method::GET, &["expenses", "summary"]),
        EntityTag::Pots => (Method::GET, &["pots"]),
        // The insight is computed on demand but cached like any read.
        EntityTag::AiAnalysis => (Method::POST, &["ai", "analyze"]),
        EntityTag::Categories => (Method::GET, &["categories"]),
    }
}

/// An id used as one path segment. Dot segments would be dropped by URL
/// normalization and address the collection instead.
fn resource_id(id: &str) -> Result<&str, QueryError> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(QueryError::validation(format!("invalid resource id {id:?}")));
    }
    Ok(id)
}

fn to_body<T: serde::Serialize>(payload: &T) -> Result<Option<Value>, QueryError> {
    serde_json::to_value(payload)
        .map(Some)
        .map_err(|err| QueryError::decode(format!("failed to encode request: {err}")))
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn read(&self, key: &QueryKey) -> Result<CachedData, QueryError> {
        let (method, path) = read_route(key);
        let data = self
            .send(method, path, &key.params().to_query_pairs(), None)
            .await?;
        CachedData::decode(key.tag(), required(data, key.tag().as_str())?)
            .map_err(|err| QueryError::decode(format!("malformed {}: {err}", key.tag())))
    }

    #[instrument(skip(self, op), fields(op = op.name()))]
    async fn write(&self, op: WriteOp) -> Result<WriteResult, QueryError> {
        match op {
            WriteOp::CreateExpense(expense) => {
                let data = self.send(Method::POST, &["expenses"], &[], to_body(&expense)?).await?;
                decode::<Expense>(data, "expense").map(WriteResult::Expense)
            }
            WriteOp::UpdateExpense { id, update } => {
                let path = ["expenses", resource_id(&id)?];
                let data = self.send(Method::PUT, &path, &[], to_body(&update)?).await?;
                decode::<Expense>(data, "expense").map(WriteResult::Expense)
            }
            WriteOp::DeleteExpense { id } => {
                let path = ["expenses", resource_id(&id)?];
                self.send(Method::DELETE, &path, &[], None).await?;
                Ok(WriteResult::Deleted)
            }
            WriteOp::CreatePot(pot) => {
                let data = self.send(Method::POST, &["pots"], &[], to_body(&pot)?).await?;
                decode::<Pot>(data, "pot").map(WriteResult::Pot)
            }
            WriteOp::UpdatePot { id, update } => {
                let path = ["pots", resource_id(&id)?];
                let data = self.send(Method::PATCH, &path, &[], to_body(&update)?).await?;
                decode::<Pot>(data, "pot").map(WriteResult::Pot)
            }
            WriteOp::DeletePot { id } => {
                let path = ["pots", resource_id(&id)?];
                self.send(Method::DELETE, &path, &[], None).await?;
                Ok(WriteResult::Deleted)
            }
            WriteOp::CreateCategory(category) => {
                let data = self
                    .send(Method::POST, &["categories"], &[], to_body(&category)?)
                    .await?;
                decode::<Category>(data, "category").map(WriteResult::Category)
            }
            WriteOp::DeleteCategory { id } => {
                let path = ["categories", resource_id(&id)?];
                self.send(Method::DELETE, &path, &[], None).await?;
                Ok(WriteResult::Deleted)
            }
        }
    }
}
