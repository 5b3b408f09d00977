//! Decoding of the JSON payloads carried by each stream frame.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::trace::TraceEvent;

pub const TEXT_DELTA: &str = "llm_text_delta";
pub const REASONING_DELTA: &str = "llm_reasoning_delta";
pub const AGENT_HANDOFF: &str = "agent_handoff";
pub const TOOL_STARTED: &str = "debug_tool_execution_started";
pub const TOOL_INPUTS: &str = "debug_tool_execution_inputs";
pub const TOOL_FINISHED: &str = "debug_tool_execution_finished";
pub const TOOL_ERROR: &str = "debug_tool_execution_error";
pub const TOOL_LOG: &str = "debug_tool_log";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub event_sequence: u64,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    TextDelta {
        text: String,
        meta: FrameMeta,
    },
    /// Debug, reasoning or handoff event for the execution trace.
    Trace {
        execution_id: String,
        event: TraceEvent,
        meta: FrameMeta,
    },
    /// A well-formed frame of a type this client does not handle.
    Unknown { kind: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("Invalid {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} frame has no execution id")]
    MissingExecutionId { kind: String },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    meta: FrameMeta,
}

#[derive(Deserialize)]
struct ReasoningData {
    delta: String,
    index: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandoffData {
    agent_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolStartedData {
    tool_id: String,
    #[serde(default)]
    tool_call_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolInputsData {
    tool_call_id: String,
    #[serde(default)]
    inputs: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolFinishedData {
    tool_call_id: String,
    #[serde(default)]
    output: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolErrorData {
    tool_call_id: String,
    #[serde(default)]
    error: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolLogData {
    tool_call_id: String,
    #[serde(default)]
    log: Value,
}

/// True for frame types that feed the execution trace rather than the transcript.
pub fn is_trace_kind(kind: &str) -> bool {
    kind.starts_with("debug_") || kind == REASONING_DELTA || kind == AGENT_HANDOFF
}

pub fn parse_frame(raw: &str) -> Result<AgentEvent, FrameError> {
    let frame: RawFrame = serde_json::from_str(raw).map_err(FrameError::Json)?;
    let RawFrame { kind, data, meta } = frame;

    if kind == TEXT_DELTA {
        let text: String = payload(&kind, data)?;
        return Ok(AgentEvent::TextDelta { text, meta });
    }

    let event = match kind.as_str() {
        REASONING_DELTA => {
            let data: ReasoningData = payload(&kind, data)?;
            TraceEvent::ReasoningDelta {
                delta: data.delta,
                index: data.index,
            }
        }
        AGENT_HANDOFF => {
            let data: HandoffData = payload(&kind, data)?;
            TraceEvent::Handoff {
                agent_name: data.agent_name,
            }
        }
        TOOL_STARTED => {
            let data: ToolStartedData = payload(&kind, data)?;
            TraceEvent::ToolStarted {
                tool_id: data.tool_id,
                tool_call_id: data.tool_call_id,
            }
        }
        TOOL_INPUTS => {
            let data: ToolInputsData = payload(&kind, data)?;
            TraceEvent::ToolInputs {
                tool_call_id: data.tool_call_id,
                inputs: data.inputs,
            }
        }
        TOOL_FINISHED => {
            let data: ToolFinishedData = payload(&kind, data)?;
            TraceEvent::ToolFinished {
                tool_call_id: data.tool_call_id,
                output: data.output,
            }
        }
        TOOL_ERROR => {
            let data: ToolErrorData = payload(&kind, data)?;
            TraceEvent::ToolError {
                tool_call_id: data.tool_call_id,
                error: data.error,
            }
        }
        TOOL_LOG => {
            let data: ToolLogData = payload(&kind, data)?;
            TraceEvent::ToolLog {
                tool_call_id: data.tool_call_id,
                log: data.log,
            }
        }
        _ => return Ok(AgentEvent::Unknown { kind }),
    };

    let Some(execution_id) = meta.execution_id.clone() else {
        return Err(FrameError::MissingExecutionId { kind });
    };

    Ok(AgentEvent::Trace {
        execution_id,
        event,
        meta,
    })
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, FrameError> {
    serde_json::from_value(data).map_err(|source| FrameError::Payload {
        kind: kind.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_text_delta_with_meta() {
        let raw = json!({
            "type": "llm_text_delta",
            "data": "Hi ",
            "meta": {"executionId": "exec_1", "eventSequence": 2, "sequence": 1, "timestamp": 1700}
        })
        .to_string();

        let event = parse_frame(&raw).unwrap();

        assert_eq!(
            event,
            AgentEvent::TextDelta {
                text: "Hi ".into(),
                meta: FrameMeta {
                    execution_id: Some("exec_1".into()),
                    event_sequence: 2,
                    sequence: 1,
                    timestamp: Some(1700),
                },
            }
        );
    }

    #[test]
    fn parses_tool_started_into_trace_event() {
        let raw = json!({
            "type": "debug_tool_execution_started",
            "data": {"toolId": "search", "toolCallId": "call_1"},
            "meta": {"executionId": "exec_1", "eventSequence": 0, "sequence": 0}
        })
        .to_string();

        let AgentEvent::Trace {
            execution_id,
            event,
            ..
        } = parse_frame(&raw).unwrap()
        else {
            panic!("expected trace event");
        };

        assert_eq!(execution_id, "exec_1");
        assert_eq!(
            event,
            TraceEvent::ToolStarted {
                tool_id: "search".into(),
                tool_call_id: Some("call_1".into()),
            }
        );
    }

    #[test]
    fn parses_reasoning_and_handoff() {
        let reasoning = json!({
            "type": "llm_reasoning_delta",
            "data": {"delta": "hmm", "index": 2},
            "meta": {"executionId": "exec_1"}
        })
        .to_string();
        let handoff = json!({
            "type": "agent_handoff",
            "data": {"agentName": "billing"},
            "meta": {"executionId": "exec_1"}
        })
        .to_string();

        assert!(matches!(
            parse_frame(&reasoning).unwrap(),
            AgentEvent::Trace { event: TraceEvent::ReasoningDelta { index: 2, .. }, .. }
        ));
        assert!(matches!(
            parse_frame(&handoff).unwrap(),
            AgentEvent::Trace { event: TraceEvent::Handoff { .. }, .. }
        ));
    }

    #[test]
    fn unknown_type_is_reported_not_rejected() {
        let raw = json!({"type": "llm_usage", "data": {}}).to_string();
        assert_eq!(
            parse_frame(&raw).unwrap(),
            AgentEvent::Unknown {
                kind: "llm_usage".into()
            }
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(parse_frame("not json"), Err(FrameError::Json(_))));
        assert!(matches!(
            parse_frame(r#"{"type":"llm_text_delta","data":{"nested":true}}"#),
            Err(FrameError::Payload { .. })
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"agent_handoff","data":{"agentName":"x"}}"#),
            Err(FrameError::MissingExecutionId { .. })
        ));
    }

    #[test]
    fn trace_kinds_are_classified() {
        assert!(is_trace_kind("debug_tool_log"));
        assert!(is_trace_kind("debug_anything"));
        assert!(is_trace_kind(REASONING_DELTA));
        assert!(is_trace_kind(AGENT_HANDOFF));
        assert!(!is_trace_kind(TEXT_DELTA));
    }
}
