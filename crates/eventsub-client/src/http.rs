//! HTTP side of the abstracted upstream interface (§6.2): CREATE, DELETE,
//! and LIST calls used by the Hub's reconciliation loop.

use crate::error::{CreateError, DeleteError, ListError};
use crate::types::{ActiveListing, CreateResult, CreateStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upstream CREATE/DELETE/LIST timeout (§5: "Upstream CREATE/DELETE: 10s").
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EventSubHttpConfig {
    pub base_url: String,
}

pub struct EventSubHttpClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    topic: &'a str,
    channel_id: &'a str,
    session_id: &'a str,
}

#[derive(Deserialize)]
struct CreateResponse {
    upstream_id: String,
    status: String,
    cost: i64,
}

#[derive(Deserialize)]
struct ListResponse {
    subscriptions: Vec<ListedSubscription>,
}

#[derive(Deserialize)]
struct ListedSubscription {
    upstream_id: String,
    topic: String,
    channel_id: String,
    status: String,
    cost: i64,
}

impl EventSubHttpClient {
    pub fn new(cfg: EventSubHttpConfig, token: &str) -> Result<Self, CreateError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| CreateError::Transport(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CreateError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url,
        })
    }

    pub async fn create(
        &self,
        topic: &str,
        channel_id: &str,
        session_id: &str,
    ) -> Result<CreateResult, CreateError> {
        let resp = self
            .http
            .post(format!("{}/subscriptions", self.base_url))
            .json(&CreateRequest {
                topic,
                channel_id,
                session_id,
            })
            .send()
            .await
            .map_err(map_reqwest_err_create)?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 429 {
            return Err(CreateError::CostExceeded);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CreateError::CredentialInvalid);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("cost") && body.contains("exceed") {
                return Err(CreateError::CostExceeded);
            }
            return Err(CreateError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CreateResponse = resp.json().await.map_err(|e| CreateError::Upstream {
            status: status.as_u16(),
            body: e.to_string(),
        })?;
        Ok(CreateResult {
            upstream_id: parsed.upstream_id,
            status: parse_status(&parsed.status),
            cost: parsed.cost,
        })
    }

    pub async fn delete(&self, upstream_id: &str) -> Result<(), DeleteError> {
        let resp = self
            .http
            .delete(format!("{}/subscriptions/{}", self.base_url, upstream_id))
            .send()
            .await
            .map_err(map_reqwest_err_delete)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DeleteError::NotFound);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(DeleteError::Upstream { status, body });
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ActiveListing>, ListError> {
        let resp = self
            .http
            .get(format!("{}/subscriptions", self.base_url))
            .send()
            .await
            .map_err(map_reqwest_err_list)?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ListError::Upstream { status, body });
        }
        let parsed: ListResponse = resp.json().await.map_err(|e| ListError::Upstream {
            status: 0,
            body: e.to_string(),
        })?;
        Ok(parsed
            .subscriptions
            .into_iter()
            .map(|s| ActiveListing {
                upstream_id: s.upstream_id,
                topic: s.topic,
                channel_id: s.channel_id,
                status: parse_status(&s.status),
                cost: s.cost,
            })
            .collect())
    }
}

fn parse_status(s: &str) -> CreateStatus {
    match s {
        "enabled" => CreateStatus::Enabled,
        _ => CreateStatus::Pending,
    }
}

fn map_reqwest_err_create(e: reqwest::Error) -> CreateError {
    if e.is_timeout() {
        CreateError::Timeout
    } else {
        CreateError::Transport(e.to_string())
    }
}

fn map_reqwest_err_delete(e: reqwest::Error) -> DeleteError {
    if e.is_timeout() {
        DeleteError::Timeout
    } else {
        DeleteError::Transport(e.to_string())
    }
}

fn map_reqwest_err_list(e: reqwest::Error) -> ListError {
    if e.is_timeout() {
        ListError::Timeout
    } else {
        ListError::Transport(e.to_string())
    }
}
