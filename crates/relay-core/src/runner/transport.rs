use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::error::AgentError;
use crate::stream::{FrameStream, parse_sse_frames};

pub const SESSION_ID_HEADER: &str = "x-buildship-agent-session-id";
pub const SESSION_NAME_HEADER: &str = "x-buildship-agent-session-name";
pub const EXECUTION_ID_HEADER: &str = "x-buildship-agent-execution-id";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequestBody {
    pub stream: bool,
    pub input: String,
    pub context: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_build_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub url: String,
    /// Sent as the session header once the server has assigned a session.
    pub session_id: Option<String>,
    pub body: AgentRequestBody,
}

pub struct AgentResponse {
    pub status: u16,
    pub session_id: Option<String>,
    pub session_name: Option<String>,
    pub execution_id: Option<String>,
    pub frames: FrameStream,
}

/// Opens one streaming request against an agent endpoint.
///
/// Implementations report the HTTP status as-is; status handling belongs to
/// the runner.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn open(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn open(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        if let Some(session_id) = &request.session_id {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }

        let response = builder.send().await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let session_id = header(SESSION_ID_HEADER);
        let session_name = header(SESSION_NAME_HEADER);
        let execution_id = header(EXECUTION_ID_HEADER);
        let status = response.status().as_u16();

        tracing::debug!(
            target: "relay::transport",
            url = %request.url,
            status,
            session_id = ?session_id,
            execution_id = ?execution_id,
            "Agent stream opened"
        );

        Ok(AgentResponse {
            status,
            session_id,
            session_name,
            execution_id,
            frames: parse_sse_frames(response.bytes_stream()),
        })
    }
}
