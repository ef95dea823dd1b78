//! Forms API client.
//!
//! The remote service wraps every JSON response in a `{status, message, ...}`
//! envelope and reports two distinct failure shapes: transport-level problems
//! (non-2xx, connectivity, timeout) and structured rejections inside a 2xx
//! body (`status == "error"` or a non-empty `message`). The two must stay
//! distinguishable upstream, since only transport failures are worth retrying
//! at this layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::record::{RawSubmission, RecordId};

/// One remote form model, as listed by the `forms` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FormSummary {
    pub id: String,
    pub name: String,
}

/// Contract the sync engine consumes from the forms API.
///
/// `mark_unread` is never invoked by the orchestrator itself; it exists for
/// explicit manual rollback of an erroneous acknowledgment.
#[async_trait]
pub trait FormsSource: Send {
    /// Acquire the session token. Must be called once before any other
    /// operation; failure is fatal to the run.
    async fn authenticate(&mut self) -> Result<()>;

    /// Fetch all not-yet-acknowledged submissions of one form.
    async fn fetch_unread(&mut self, form_id: &str) -> Result<Vec<RawSubmission>>;

    /// Acknowledge the given submissions as processed so they are not
    /// redelivered.
    async fn mark_read(&mut self, form_id: &str, ids: &[RecordId]) -> Result<()>;

    /// Roll back an acknowledgment, making the submissions eligible for
    /// delivery again.
    async fn mark_unread(&mut self, form_id: &str, ids: &[RecordId]) -> Result<()>;

    /// List all form models of the account.
    async fn list_forms(&mut self) -> Result<Vec<FormSummary>>;
}

/// Login credentials for the forms API.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub company: String,
    pub user: String,
    pub password: String,
}

/// Response envelope shared by the data endpoints.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_code: Option<Value>,
    #[serde(default)]
    error_message: Option<String>,
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Surface a structured remote rejection carried inside a 2xx body.
    fn check(&self) -> Result<()> {
        if self.status != "ok" {
            return Err(SyncError::Api {
                code: self.error_code.as_ref().map(code_to_string),
                message: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("API returned status '{}'", self.status)),
            });
        }
        if !self.message.is_empty() {
            return Err(SyncError::Api {
                code: None,
                message: self.message.clone(),
            });
        }
        Ok(())
    }
}

fn code_to_string(code: &Value) -> String {
    match code {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct FormsListEnvelope {
    status: String,
    #[serde(default)]
    error_code: Option<Value>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    forms: Vec<FormSummary>,
}

#[derive(Debug, Serialize)]
struct MarkRequest {
    data_ids: Vec<i64>,
}

/// HTTP implementation of [`FormsSource`] against the remote forms service.
pub struct FormsClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    token: Option<String>,
}

impl FormsClient {
    /// Build a client with a bounded per-request timeout. Exceeding the
    /// timeout surfaces as [`SyncError::Transport`].
    pub fn new(base_url: String, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport(&base_url, e))?;
        Ok(FormsClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            token: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| SyncError::Auth("no session token; authenticate first".to_string()))
    }

    /// Issue an authenticated GET and decode the enveloped payload.
    async fn get_enveloped<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiEnvelope<T>> {
        let url = self.endpoint(path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token()?)
            .send()
            .await
            .map_err(|e| SyncError::transport(&url, e))?;
        decode_envelope(&url, response).await
    }

    /// Issue an authenticated POST and decode the enveloped payload.
    async fn post_enveloped<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiEnvelope<T>> {
        let url = self.endpoint(path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token()?)
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::transport(&url, e))?;
        decode_envelope(&url, response).await
    }

    async fn mark(&self, form_id: &str, action: &str, ids: &[RecordId]) -> Result<()> {
        let body = MarkRequest {
            data_ids: ids.iter().map(|id| id.0).collect(),
        };
        let envelope: ApiEnvelope<Value> = self
            .post_enveloped(&format!("forms/{form_id}/{action}"), &body)
            .await?;
        envelope.check()
    }
}

/// Decode a response into an envelope. Non-2xx statuses and undecodable
/// bodies are transport failures; structured errors live inside the envelope
/// and are the caller's to check.
async fn decode_envelope<T: serde::de::DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<ApiEnvelope<T>> {
    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::transport(
            url,
            format!("HTTP status {status}"),
        ));
    }
    response
        .json::<ApiEnvelope<T>>()
        .await
        .map_err(|e| SyncError::transport(url, format!("undecodable response body: {e}")))
}

#[async_trait]
impl FormsSource for FormsClient {
    async fn authenticate(&mut self) -> Result<()> {
        let url = self.endpoint("login");
        let response = self
            .http
            .post(&url)
            .json(&self.credentials)
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("login request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Auth(format!("login returned HTTP {status}")));
        }
        let envelope: ApiEnvelope<LoginData> = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("undecodable login response: {e}")))?;
        envelope
            .check()
            .map_err(|e| SyncError::Auth(e.to_string()))?;
        let data = envelope
            .data
            .ok_or_else(|| SyncError::Auth("login response carried no token".to_string()))?;
        self.token = Some(data.token);
        tracing::debug!("acquired session token");
        Ok(())
    }

    async fn fetch_unread(&mut self, form_id: &str) -> Result<Vec<RawSubmission>> {
        let envelope: ApiEnvelope<Vec<RawSubmission>> = self
            .get_enveloped(&format!("forms/{form_id}/data/readnew"))
            .await?;
        envelope.check()?;
        Ok(envelope.data.unwrap_or_default())
    }

    async fn mark_read(&mut self, form_id: &str, ids: &[RecordId]) -> Result<()> {
        self.mark(form_id, "markasread", ids).await
    }

    async fn mark_unread(&mut self, form_id: &str, ids: &[RecordId]) -> Result<()> {
        self.mark(form_id, "markasunread", ids).await
    }

    async fn list_forms(&mut self) -> Result<Vec<FormSummary>> {
        let url = self.endpoint("forms");
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token()?)
            .send()
            .await
            .map_err(|e| SyncError::transport(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::transport(&url, format!("HTTP status {status}")));
        }
        let envelope: FormsListEnvelope = response
            .json()
            .await
            .map_err(|e| SyncError::transport(&url, format!("undecodable response body: {e}")))?;
        if envelope.status != "ok" {
            return Err(SyncError::Api {
                code: envelope.error_code.as_ref().map(code_to_string),
                message: envelope
                    .error_message
                    .unwrap_or_else(|| format!("API returned status '{}'", envelope.status)),
            });
        }
        Ok(envelope.forms)
    }
}
