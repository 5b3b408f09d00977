//! Execution traces rebuilt from debug, reasoning and handoff events.

mod reduce;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use reduce::{TraceEvent, TraceReducer};

const DEGRADED_LOG_LIMIT: usize = 20;
const DEGRADED_OUTPUT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Progress,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionItem {
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningItem {
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffItem {
    pub agent_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceItem {
    ToolExecution(ToolExecutionItem),
    Reasoning(ReasoningItem),
    Handoff(HandoffItem),
}

impl TraceItem {
    pub fn as_tool(&self) -> Option<&ToolExecutionItem> {
        match self {
            Self::ToolExecution(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_reasoning(&self) -> Option<&ReasoningItem> {
        match self {
            Self::Reasoning(item) => Some(item),
            _ => None,
        }
    }
}

/// Items of one execution, in order of first appearance.
///
/// Items sit behind `Arc` so snapshots share them; an update clones only the
/// item it touches.
pub type ExecutionTrace = Vec<Arc<TraceItem>>;

/// `executionId -> ExecutionTrace`, the persisted `debug` region.
pub type DebugData = HashMap<String, ExecutionTrace>;

/// Shrink traces so they fit under a storage quota: keep the newest log
/// entries of each tool call and cut long string outputs.
pub fn degrade(data: &DebugData) -> DebugData {
    data.iter()
        .map(|(execution_id, trace)| {
            let trace = trace
                .iter()
                .map(|item| match item.as_ref() {
                    TraceItem::ToolExecution(tool) => {
                        let mut tool = tool.clone();
                        if tool.logs.len() > DEGRADED_LOG_LIMIT {
                            tool.logs.drain(..tool.logs.len() - DEGRADED_LOG_LIMIT);
                        }
                        if let Some(Value::String(output)) = &mut tool.output {
                            if output.chars().count() > DEGRADED_OUTPUT_CHARS {
                                *output = output.chars().take(DEGRADED_OUTPUT_CHARS).collect();
                            }
                        }
                        Arc::new(TraceItem::ToolExecution(tool))
                    }
                    _ => item.clone(),
                })
                .collect();
            (execution_id.clone(), trace)
        })
        .collect()
}
