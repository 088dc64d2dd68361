//! OpenCode-style agent runtime gateway.
//!
//! Talks to a runtime that exposes:
//! - `POST /session` to open a session
//! - `POST /session/{id}/message` to send a prompt and wait for the reply
//! - `GET /config/providers` to enumerate models
//! - `GET /session` as a cheap health check
//!
//! When a working directory is configured it is passed as the `directory`
//! query parameter on every request.

use async_trait::async_trait;
use pulseloop_core::error::GatewayError;
use pulseloop_core::gateway::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub struct OpenCodeGateway {
    base_url: String,
    directory: Option<String>,
    client: reqwest::Client,
}

impl OpenCodeGateway {
    /// Create a gateway for the runtime at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            directory: None,
            client,
        })
    }

    /// Scope every request to a working directory on the runtime side.
    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.directory {
            Some(dir) => builder.query(&[("directory", dir.as_str())]),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let response = builder.send().await.map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Runtime returned error");
            return Err(GatewayError::ApiError {
                status_code: status.as_u16(),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }
        Ok(response)
    }

    /// Flatten the runtime's provider listing into a sorted model list.
    fn to_models(listing: ProvidersListing) -> Vec<ModelInfo> {
        let mut models: Vec<ModelInfo> = listing
            .providers
            .into_iter()
            .flat_map(|provider| {
                let provider_id = provider.id;
                model_entries(provider.models)
                    .into_iter()
                    .map(move |(model_id, name)| ModelInfo {
                        provider_id: provider_id.clone(),
                        model_id,
                        name,
                    })
            })
            .collect();
        models.sort_by(|a, b| {
            a.provider_id
                .cmp(&b.provider_id)
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        models
    }
}

fn map_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_connect() {
        GatewayError::Unreachable(e.to_string())
    } else if e.is_decode() {
        GatewayError::InvalidResponse(e.to_string())
    } else {
        GatewayError::Network(e.to_string())
    }
}

/// `models` is keyed by model id; older runtimes send an array instead.
fn model_entries(models: serde_json::Value) -> Vec<(String, String)> {
    let entry = |key: Option<&str>, value: &serde_json::Value| {
        let id = value["id"].as_str().or(key)?.to_string();
        let name = value["name"].as_str().unwrap_or(&id).to_string();
        Some((id, name))
    };

    match models {
        serde_json::Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| entry(Some(key.as_str()), value))
            .collect(),
        serde_json::Value::Array(items) => items.iter().filter_map(|v| entry(None, v)).collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl AgentGateway for OpenCodeGateway {
    fn name(&self) -> &str {
        "opencode"
    }

    async fn create_session(&self) -> Result<SessionInfo, GatewayError> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, "/session")
                    .json(&serde_json::json!({})),
            )
            .await?;

        let session: ApiSession = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("session: {e}")))?;

        if session.id.is_empty() {
            return Err(GatewayError::InvalidResponse("session without id".into()));
        }
        debug!(session = %session.id, "Session created");
        Ok(SessionInfo { id: session.id })
    }

    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse, GatewayError> {
        let body = ApiPromptBody {
            model: ApiModel {
                provider_id: &request.model.provider_id,
                model_id: &request.model.model_id,
            },
            system: &request.system,
            parts: vec![ApiTextPart {
                kind: "text",
                text: &request.text,
            }],
        };

        debug!(
            session = %request.session_id,
            model = %request.model,
            chars = request.text.len(),
            "Sending prompt"
        );

        let path = format!("/session/{}/message", request.session_id);
        let response = self
            .send(self.request(reqwest::Method::POST, &path).json(&body))
            .await?;

        let reply: ApiReply = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("message: {e}")))?;

        Ok(PromptResponse {
            parts: reply
                .parts
                .into_iter()
                .map(|p| ResponsePart {
                    kind: p.kind,
                    text: p.text,
                })
                .collect(),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GatewayError> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/config/providers"))
            .await?;

        let listing: ProvidersListing = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("providers: {e}")))?;

        Ok(Self::to_models(listing))
    }

    async fn health_check(&self) -> Result<bool, GatewayError> {
        let response = self
            .request(reqwest::Method::GET, "/session")
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(response.status().is_success())
    }
}

// --- Runtime API types ---

#[derive(Serialize)]
struct ApiPromptBody<'a> {
    model: ApiModel<'a>,
    system: &'a str,
    parts: Vec<ApiTextPart<'a>>,
}

#[derive(Serialize)]
struct ApiModel<'a> {
    #[serde(rename = "providerID")]
    provider_id: &'a str,
    #[serde(rename = "modelID")]
    model_id: &'a str,
}

#[derive(Serialize)]
struct ApiTextPart<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiSession {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize)]
struct ApiReply {
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Deserialize)]
struct ApiPart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ProvidersListing {
    #[serde(default)]
    providers: Vec<ApiProvider>,
}

#[derive(Deserialize)]
struct ApiProvider {
    id: String,
    #[serde(default)]
    models: serde_json::Value,
}
