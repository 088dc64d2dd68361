//! AgentGateway trait - the narrow contract with the external agent runtime.
//!
//! The loop only needs three things from the runtime: open a fresh session,
//! send one prompt into it, and (for the control surface) list models.
//! Model routing, tool use, and provider selection stay on the runtime side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::state::ModelSelector;

/// A session opened with the runtime. Never reused across iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
}

/// One prompt dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub session_id: String,
    pub model: ModelSelector,
    pub system: String,
    pub text: String,
}

/// A segment of the runtime's reply. Only `kind == "text"` segments carry
/// response text; tool calls, reasoning, and the rest are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePart {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ResponsePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
        }
    }

    pub fn other(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptResponse {
    pub parts: Vec<ResponsePart>,
}

impl PromptResponse {
    /// Text segments in their original order, joined with newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.kind == "text")
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A model the runtime can serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider_id: String,
    pub model_id: String,
    /// Display name
    pub name: String,
}

#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// Human-readable name of the runtime (e.g., "opencode").
    fn name(&self) -> &str;

    /// Open a new, isolated session.
    async fn create_session(&self) -> Result<SessionInfo, GatewayError>;

    /// Send the system instructions and prompt text, wait for the reply.
    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse, GatewayError>;

    /// Models offered by the runtime.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, GatewayError> {
        Ok(Vec::new())
    }

    /// Can we reach the runtime?
    async fn health_check(&self) -> Result<bool, GatewayError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_joins_text_parts_in_order() {
        let response = PromptResponse {
            parts: vec![
                ResponsePart::text("first"),
                ResponsePart::other("tool"),
                ResponsePart::text("second"),
                ResponsePart::other("step-finish"),
                ResponsePart::text("third"),
            ],
        };
        assert_eq!(response.text(), "first\nsecond\nthird");
    }

    #[test]
    fn response_without_text_is_empty() {
        let response = PromptResponse {
            parts: vec![ResponsePart::other("reasoning")],
        };
        assert_eq!(response.text(), "");
        assert_eq!(PromptResponse::default().text(), "");
    }

    #[test]
    fn text_kind_without_text_is_skipped() {
        let response = PromptResponse {
            parts: vec![
                ResponsePart {
                    kind: "text".into(),
                    text: None,
                },
                ResponsePart::text("only"),
            ],
        };
        assert_eq!(response.text(), "only");
    }
}
