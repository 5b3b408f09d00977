//! Test utilities for relay-core
//!
//! Scripted transports and frame builders shared by unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};

use crate::error::AgentError;
use crate::runner::{AgentRequest, AgentResponse, AgentTransport};
use crate::stream::FrameStream;
use crate::stream::frame::{
    AGENT_HANDOFF, REASONING_DELTA, TEXT_DELTA, TOOL_ERROR, TOOL_FINISHED, TOOL_INPUTS, TOOL_LOG,
    TOOL_STARTED,
};

/// Pushes frames into a [`ScriptedResponse::streaming`] response.
pub type FrameSender = mpsc::UnboundedSender<Result<String, AgentError>>;

/// One canned reply for [`ScriptedTransport`].
pub struct ScriptedResponse {
    status: u16,
    session_id: Option<String>,
    session_name: Option<String>,
    execution_id: Option<String>,
    frames: FrameStream,
}

impl ScriptedResponse {
    /// A 200 response that yields `frames` and then closes.
    pub fn ok<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let frames: Vec<Result<String, AgentError>> =
            frames.into_iter().map(|f| Ok(f.into())).collect();
        Self::with_frames(200, stream::iter(frames).boxed())
    }

    /// A response with the given status and an empty body.
    pub fn status(status: u16) -> Self {
        Self::with_frames(status, stream::empty().boxed())
    }

    /// A 200 response whose body yields `frames` and then fails with `error`.
    pub fn failing_after<I, S>(frames: I, error: AgentError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut items: Vec<Result<String, AgentError>> =
            frames.into_iter().map(|f| Ok(f.into())).collect();
        items.push(Err(error));
        Self::with_frames(200, stream::iter(items).boxed())
    }

    /// A 200 response whose body stays open until the returned sender is dropped.
    pub fn streaming() -> (Self, FrameSender) {
        let (tx, rx) = mpsc::unbounded();
        (Self::with_frames(200, rx.boxed()), tx)
    }

    fn with_frames(status: u16, frames: FrameStream) -> Self {
        Self {
            status,
            session_id: None,
            session_name: None,
            execution_id: None,
            frames,
        }
    }

    pub fn with_session(mut self, id: impl Into<String>, name: Option<&str>) -> Self {
        self.session_id = Some(id.into());
        self.session_name = name.map(str::to_string);
        self
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }
}

/// In-memory [`AgentTransport`] replaying scripted responses keyed by request input.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for the next request whose input is `input`.
    pub fn respond_to(&self, input: &str, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(input.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every request opened so far, oldest first.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn open(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let input = request.body.input.clone();
        self.requests.lock().unwrap().push(request);

        let response = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&input)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| AgentError::Network {
                details: format!("no scripted response for input {input:?}"),
            })?;

        Ok(AgentResponse {
            status: response.status,
            session_id: response.session_id,
            session_name: response.session_name,
            execution_id: response.execution_id,
            frames: response.frames,
        })
    }
}

fn frame(kind: &str, data: Value, execution_id: Option<&str>) -> String {
    let mut meta = json!({ "eventSequence": 0, "sequence": 0 });
    if let Some(execution_id) = execution_id {
        meta["executionId"] = json!(execution_id);
    }
    json!({ "type": kind, "data": data, "meta": meta }).to_string()
}

pub fn text_delta(text: &str, execution_id: &str) -> String {
    frame(TEXT_DELTA, json!(text), Some(execution_id))
}

pub fn reasoning_delta(delta: &str, index: u64, execution_id: &str) -> String {
    frame(
        REASONING_DELTA,
        json!({ "delta": delta, "index": index }),
        Some(execution_id),
    )
}

pub fn handoff(agent_name: &str, execution_id: &str) -> String {
    frame(
        AGENT_HANDOFF,
        json!({ "agentName": agent_name }),
        Some(execution_id),
    )
}

pub fn tool_started(tool_id: &str, tool_call_id: &str, execution_id: &str) -> String {
    frame(
        TOOL_STARTED,
        json!({ "toolId": tool_id, "toolCallId": tool_call_id }),
        Some(execution_id),
    )
}

pub fn tool_inputs(tool_call_id: &str, inputs: Value, execution_id: &str) -> String {
    frame(
        TOOL_INPUTS,
        json!({ "toolCallId": tool_call_id, "inputs": inputs }),
        Some(execution_id),
    )
}

pub fn tool_finished(tool_call_id: &str, output: Value, execution_id: &str) -> String {
    frame(
        TOOL_FINISHED,
        json!({ "toolCallId": tool_call_id, "output": output }),
        Some(execution_id),
    )
}

pub fn tool_error(tool_call_id: &str, error: Value, execution_id: &str) -> String {
    frame(
        TOOL_ERROR,
        json!({ "toolCallId": tool_call_id, "error": error }),
        Some(execution_id),
    )
}

pub fn tool_log(tool_call_id: &str, log: Value, execution_id: &str) -> String {
    frame(
        TOOL_LOG,
        json!({ "toolCallId": tool_call_id, "log": log }),
        Some(execution_id),
    )
}
