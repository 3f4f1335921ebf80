//! HTTP gateway implementations backed by reqwest.

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::FlagSyncOptions;
use crate::error::{ErrorCode, FlagSyncError, Result};
use crate::store::{EvaluationRecord, EventRecord};
use crate::sync::{
    BoxFuture, EvaluationGateway, EventAck, EventError, EventGateway, RefreshKind, RefreshPayload,
};
use crate::user::UserContext;

const USER_AGENT: &str = concat!("FlagSync-Rust/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetEvaluationsRequest {
    user: UserContext,
    cursor: i64,
    user_attributes_updated: bool,
    feature_tag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetEvaluationsResponse {
    force_update: bool,
    #[serde(default)]
    evaluations: Vec<EvaluationRecord>,
    #[serde(default)]
    archived_feature_ids: Vec<String>,
    cursor: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterEventsRequest {
    events: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterEventsResponse {
    #[serde(default)]
    errors: HashMap<String, RegisterEventsError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterEventsError {
    retriable: bool,
    #[serde(default)]
    message: String,
}

/// Server API surface: evaluation refresh and event registration.
pub struct ApiClient {
    client: Client,
    api_key: String,
    endpoint: String,
    default_timeout: Duration,
}

impl ApiClient {
    pub fn new(options: &FlagSyncOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| {
                FlagSyncError::with_source(ErrorCode::NetworkError, "failed to build HTTP client", e)
            })?;

        Ok(Self {
            client,
            api_key: options.api_key.clone(),
            endpoint: options.api_endpoint.trim_end_matches('/').to_string(),
            default_timeout: options.request_timeout,
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<(T, u64)> {
        let url = format!("{}{}", self.endpoint, path);

        let response = self
            .client
            .post(&url)
            .timeout(timeout.unwrap_or(self.default_timeout))
            .header("Authorization", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .json(body)
            .send()
            .await
            .map_err(convert_error)?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await.map_err(|e| {
                FlagSyncError::with_source(ErrorCode::NetworkError, "failed to read response", e)
            })?;
            let size_bytes = body.len() as u64;
            let parsed = serde_json::from_str(&body).map_err(|e| {
                FlagSyncError::with_source(
                    ErrorCode::NetworkError,
                    format!("failed to parse response: {}", e),
                    e,
                )
            })?;
            Ok((parsed, size_bytes))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_to_error(status, &body))
        }
    }
}

fn status_to_error(status: StatusCode, body: &str) -> FlagSyncError {
    let code = if status.is_server_error() {
        ErrorCode::ServerError
    } else {
        ErrorCode::NetworkError
    };
    FlagSyncError::new(code, format!("{}: {}", status.as_u16(), body))
}

fn convert_error(error: reqwest::Error) -> FlagSyncError {
    if error.is_timeout() {
        FlagSyncError::with_source(ErrorCode::NetworkTimeout, "request timed out", error)
    } else {
        FlagSyncError::with_source(ErrorCode::NetworkError, error.to_string(), error)
    }
}

impl EvaluationGateway for ApiClient {
    fn get_evaluations(
        &self,
        user: UserContext,
        cursor: i64,
        attributes_updated: bool,
        feature_tag: String,
        timeout: Option<Duration>,
    ) -> BoxFuture<Result<RefreshPayload>> {
        let this = self.clone_parts();
        Box::pin(async move {
            let request = GetEvaluationsRequest {
                user,
                cursor,
                user_attributes_updated: attributes_updated,
                feature_tag,
            };

            let started = Instant::now();
            let (response, size_bytes): (GetEvaluationsResponse, u64) =
                this.post("/get_evaluations", &request, timeout).await?;
            let elapsed = started.elapsed();

            let kind = if response.force_update {
                RefreshKind::Full
            } else {
                RefreshKind::Partial
            };

            Ok(RefreshPayload {
                kind,
                evaluations: response.evaluations,
                archived_feature_ids: response.archived_feature_ids,
                cursor: response.cursor,
                elapsed,
                size_bytes,
            })
        })
    }
}

impl EventGateway for ApiClient {
    fn register_events(&self, events: Vec<EventRecord>) -> BoxFuture<Result<EventAck>> {
        let this = self.clone_parts();
        Box::pin(async move {
            let request = RegisterEventsRequest { events };
            let (response, _): (RegisterEventsResponse, u64) =
                this.post("/register_events", &request, None).await?;

            let errors = response
                .errors
                .into_iter()
                .map(|(id, e)| {
                    (
                        id,
                        EventError {
                            retriable: e.retriable,
                            message: e.message,
                        },
                    )
                })
                .collect();

            Ok(EventAck { errors })
        })
    }
}

impl ApiClient {
    // reqwest's Client is an Arc internally, so this is a cheap handle.
    fn clone_parts(&self) -> ApiClient {
        ApiClient {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            endpoint: self.endpoint.clone(),
            default_timeout: self.default_timeout,
        }
    }
}
