use std::sync::Arc;

use serde_json::Value;

use super::{
    DebugData, ExecutionTrace, HandoffItem, ReasoningItem, ToolExecutionItem, ToolStatus,
    TraceItem,
};

/// A decoded debug, reasoning or handoff event.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    ToolStarted {
        tool_id: String,
        tool_call_id: Option<String>,
    },
    ToolInputs {
        tool_call_id: String,
        inputs: Value,
    },
    ToolFinished {
        tool_call_id: String,
        output: Value,
    },
    ToolError {
        tool_call_id: String,
        error: Value,
    },
    ToolLog {
        tool_call_id: String,
        log: Value,
    },
    ReasoningDelta {
        delta: String,
        index: u64,
    },
    Handoff {
        agent_name: String,
    },
}

/// Folds [`TraceEvent`]s into [`DebugData`].
///
/// The only state carried between calls is the reasoning cursor: the highest
/// reasoning index seen so far, across every execution this reducer handles.
#[derive(Debug, Default, Clone)]
pub struct TraceReducer {
    last_reasoning_index: Option<u64>,
}

impl TraceReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_reasoning_index(&self) -> Option<u64> {
        self.last_reasoning_index
    }

    /// Compute the next trace map, or `None` when the event is dropped.
    ///
    /// `state` is never modified. The returned map shares every item with
    /// `state` except the one that changed.
    pub fn reduce(
        &mut self,
        state: &DebugData,
        execution_id: &str,
        event: &TraceEvent,
    ) -> Option<DebugData> {
        match event {
            TraceEvent::ToolStarted {
                tool_id,
                tool_call_id,
            } => Some(append(
                state,
                execution_id,
                TraceItem::ToolExecution(ToolExecutionItem {
                    tool_id: tool_id.clone(),
                    tool_call_id: tool_call_id.clone(),
                    status: ToolStatus::Progress,
                    inputs: None,
                    output: None,
                    logs: Vec::new(),
                }),
            )),

            TraceEvent::ToolInputs {
                tool_call_id,
                inputs,
            } => update_tool(state, execution_id, tool_call_id, |item| {
                item.inputs = Some(inputs.clone());
            }),

            TraceEvent::ToolFinished {
                tool_call_id,
                output,
            } => update_tool(state, execution_id, tool_call_id, |item| {
                item.status = ToolStatus::Complete;
                item.output = Some(output.clone());
            }),

            TraceEvent::ToolError {
                tool_call_id,
                error,
            } => update_tool(state, execution_id, tool_call_id, |item| {
                item.status = ToolStatus::Error;
                item.output = Some(error.clone());
            }),

            TraceEvent::ToolLog { tool_call_id, log } => {
                update_tool(state, execution_id, tool_call_id, |item| {
                    item.logs.push(log.clone());
                })
            }

            TraceEvent::ReasoningDelta { delta, index } => {
                Some(self.reasoning_delta(state, execution_id, delta, *index))
            }

            TraceEvent::Handoff { agent_name } => Some(append(
                state,
                execution_id,
                TraceItem::Handoff(HandoffItem {
                    agent_name: agent_name.clone(),
                }),
            )),
        }
    }

    fn reasoning_delta(
        &mut self,
        state: &DebugData,
        execution_id: &str,
        delta: &str,
        index: u64,
    ) -> DebugData {
        let starts_segment = self.last_reasoning_index.is_none_or(|last| index > last);
        if starts_segment {
            self.last_reasoning_index = Some(index);
        }

        let reuse = if starts_segment {
            None
        } else {
            state
                .get(execution_id)
                .and_then(|trace| trace.iter().rposition(|item| item.as_reasoning().is_some()))
        };

        let Some(position) = reuse else {
            return append(
                state,
                execution_id,
                TraceItem::Reasoning(ReasoningItem {
                    reasoning: delta.to_string(),
                }),
            );
        };

        let mut next = state.clone();
        let trace = next.entry(execution_id.to_string()).or_default();
        if let TraceItem::Reasoning(item) = Arc::make_mut(&mut trace[position]) {
            item.reasoning.push_str(delta);
        }
        next
    }
}

fn append(state: &DebugData, execution_id: &str, item: TraceItem) -> DebugData {
    let mut next = state.clone();
    next.entry(execution_id.to_string())
        .or_default()
        .push(Arc::new(item));
    next
}

/// Latest tool item in `trace` carrying `tool_call_id`; earlier calls that
/// share the id (retries) are never touched.
fn find_tool(trace: &ExecutionTrace, tool_call_id: &str) -> Option<usize> {
    trace.iter().rposition(|item| {
        item.as_tool()
            .and_then(|tool| tool.tool_call_id.as_deref())
            .is_some_and(|id| id == tool_call_id)
    })
}

fn update_tool(
    state: &DebugData,
    execution_id: &str,
    tool_call_id: &str,
    apply: impl FnOnce(&mut ToolExecutionItem),
) -> Option<DebugData> {
    let Some(position) = state
        .get(execution_id)
        .and_then(|trace| find_tool(trace, tool_call_id))
    else {
        tracing::debug!(
            target: "relay::trace",
            execution_id = %execution_id,
            tool_call_id = %tool_call_id,
            "No tool execution matches event; dropping"
        );
        return None;
    };

    let mut next = state.clone();
    let trace = next.get_mut(execution_id)?;
    if let TraceItem::ToolExecution(item) = Arc::make_mut(&mut trace[position]) {
        apply(item);
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    const EXEC: &str = "exec_1";

    fn started(call: &str) -> TraceEvent {
        TraceEvent::ToolStarted {
            tool_id: "search".into(),
            tool_call_id: Some(call.into()),
        }
    }

    fn reasoning(delta: &str, index: u64) -> TraceEvent {
        TraceEvent::ReasoningDelta {
            delta: delta.into(),
            index,
        }
    }

    fn fold(reducer: &mut TraceReducer, events: &[TraceEvent]) -> DebugData {
        events.iter().fold(DebugData::new(), |state, event| {
            reducer.reduce(&state, EXEC, event).unwrap_or(state)
        })
    }

    fn tools(data: &DebugData) -> Vec<ToolExecutionItem> {
        data[EXEC]
            .iter()
            .filter_map(|item| item.as_tool().cloned())
            .collect()
    }

    #[test]
    fn started_then_finished_yields_one_complete_item() {
        let mut reducer = TraceReducer::new();
        let data = fold(
            &mut reducer,
            &[
                started("call_1"),
                TraceEvent::ToolFinished {
                    tool_call_id: "call_1".into(),
                    output: json!({"hits": 3}),
                },
            ],
        );

        let items = tools(&data);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, ToolStatus::Complete);
        assert_eq!(items[0].output, Some(json!({"hits": 3})));
    }

    #[rstest]
    #[case::inputs(
        TraceEvent::ToolInputs { tool_call_id: "call_1".into(), inputs: json!({"q": "rust"}) },
        ToolStatus::Progress
    )]
    #[case::error(
        TraceEvent::ToolError { tool_call_id: "call_1".into(), error: json!("boom") },
        ToolStatus::Error
    )]
    #[case::log(
        TraceEvent::ToolLog { tool_call_id: "call_1".into(), log: json!("fetching") },
        ToolStatus::Progress
    )]
    fn tool_events_mutate_matching_item(#[case] event: TraceEvent, #[case] status: ToolStatus) {
        let mut reducer = TraceReducer::new();
        let data = fold(&mut reducer, &[started("call_1"), event.clone()]);

        let item = &tools(&data)[0];
        assert_eq!(item.status, status);
        match event {
            TraceEvent::ToolInputs { inputs, .. } => assert_eq!(item.inputs, Some(inputs)),
            TraceEvent::ToolError { error, .. } => assert_eq!(item.output, Some(error)),
            TraceEvent::ToolLog { log, .. } => assert_eq!(item.logs, vec![log]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn unmatched_tool_event_is_dropped() {
        let mut reducer = TraceReducer::new();
        let state = fold(&mut reducer, &[started("call_1")]);

        let next = reducer.reduce(
            &state,
            EXEC,
            &TraceEvent::ToolFinished {
                tool_call_id: "other".into(),
                output: json!(null),
            },
        );

        assert!(next.is_none());
        assert!(
            reducer
                .reduce(
                    &DebugData::new(),
                    EXEC,
                    &TraceEvent::ToolLog {
                        tool_call_id: "call_1".into(),
                        log: json!("x"),
                    },
                )
                .is_none()
        );
    }

    #[test]
    fn retried_call_updates_only_latest_item() {
        let mut reducer = TraceReducer::new();
        let data = fold(
            &mut reducer,
            &[
                started("call_1"),
                TraceEvent::ToolError {
                    tool_call_id: "call_1".into(),
                    error: json!("timeout"),
                },
                started("call_1"),
                TraceEvent::ToolFinished {
                    tool_call_id: "call_1".into(),
                    output: json!("ok"),
                },
            ],
        );

        let items = tools(&data);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].status, ToolStatus::Error);
        assert_eq!(items[1].status, ToolStatus::Complete);
        assert_eq!(items[1].output, Some(json!("ok")));
    }

    #[test]
    fn reasoning_with_same_index_concatenates() {
        let mut reducer = TraceReducer::new();
        let data = fold(&mut reducer, &[reasoning("Let me ", 0), reasoning("think", 0)]);

        assert_eq!(data[EXEC].len(), 1);
        assert_eq!(
            data[EXEC][0].as_reasoning().unwrap().reasoning,
            "Let me think"
        );
    }

    #[test]
    fn reasoning_with_greater_index_starts_new_item() {
        let mut reducer = TraceReducer::new();
        let data = fold(
            &mut reducer,
            &[reasoning("first", 0), reasoning("second", 1), reasoning(" more", 1)],
        );

        let texts: Vec<_> = data[EXEC]
            .iter()
            .filter_map(|item| item.as_reasoning().map(|r| r.reasoning.clone()))
            .collect();
        assert_eq!(texts, vec!["first", "second more"]);
        assert_eq!(reducer.last_reasoning_index(), Some(1));
    }

    #[test]
    fn reasoning_cursor_is_not_reset_per_execution() {
        let mut reducer = TraceReducer::new();
        let state = fold(&mut reducer, &[reasoning("a", 3)]);

        let next = reducer.reduce(&state, "exec_2", &reasoning("b", 2)).unwrap();

        assert_eq!(reducer.last_reasoning_index(), Some(3));
        assert_eq!(next["exec_2"].len(), 1);
        assert_eq!(next["exec_2"][0].as_reasoning().unwrap().reasoning, "b");
    }

    #[test]
    fn reasoning_appends_to_latest_reasoning_past_other_items() {
        let mut reducer = TraceReducer::new();
        let data = fold(
            &mut reducer,
            &[
                reasoning("plan", 0),
                started("call_1"),
                reasoning(" continued", 0),
            ],
        );

        assert_eq!(data[EXEC].len(), 2);
        assert_eq!(
            data[EXEC][0].as_reasoning().unwrap().reasoning,
            "plan continued"
        );
    }

    #[test]
    fn handoff_appends_item() {
        let mut reducer = TraceReducer::new();
        let data = fold(
            &mut reducer,
            &[TraceEvent::Handoff {
                agent_name: "billing".into(),
            }],
        );

        assert_eq!(
            *data[EXEC][0],
            TraceItem::Handoff(HandoffItem {
                agent_name: "billing".into()
            })
        );
    }

    #[test]
    fn previous_snapshot_is_never_mutated() {
        let mut reducer = TraceReducer::new();
        let before = fold(&mut reducer, &[started("call_1"), reasoning("a", 0)]);

        let after = reducer
            .reduce(
                &before,
                EXEC,
                &TraceEvent::ToolFinished {
                    tool_call_id: "call_1".into(),
                    output: json!(1),
                },
            )
            .unwrap();

        assert_eq!(tools(&before)[0].status, ToolStatus::Progress);
        assert_eq!(tools(&after)[0].status, ToolStatus::Complete);
        assert!(!Arc::ptr_eq(&before[EXEC][0], &after[EXEC][0]));
        assert!(Arc::ptr_eq(&before[EXEC][1], &after[EXEC][1]));
    }

    #[test]
    fn executions_are_kept_apart() {
        let mut reducer = TraceReducer::new();
        let state = fold(&mut reducer, &[started("call_1")]);

        let next = reducer.reduce(&state, "exec_2", &started("call_9")).unwrap();

        assert_eq!(next.len(), 2);
        assert_eq!(next[EXEC].len(), 1);
        assert_eq!(next["exec_2"].len(), 1);
    }
}
