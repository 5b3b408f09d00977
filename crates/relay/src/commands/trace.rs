use async_trait::async_trait;
use eyre::{Result, eyre};

use relay_core::runner::SharedStores;
use relay_core::trace::{ToolStatus, TraceItem};

use super::{AppContext, Command};

pub struct TraceCommand {
    pub execution_id: String,
    pub json: bool,
    pub context: AppContext,
}

#[async_trait]
impl Command for TraceCommand {
    async fn execute(&self) -> Result<()> {
        let stores = SharedStores::open(self.context.store.clone());
        let trace = stores
            .debug
            .read(|data| data.get(&self.execution_id).cloned())
            .ok_or_else(|| eyre!("No trace recorded for execution {}", self.execution_id))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&trace)?);
            return Ok(());
        }

        println!("Execution {} ({} items)", self.execution_id, trace.len());
        for (i, item) in trace.iter().enumerate() {
            println!("{:>3}. {}", i + 1, describe(item));
        }
        Ok(())
    }
}

fn describe(item: &TraceItem) -> String {
    match item {
        TraceItem::ToolExecution(tool) => {
            let status = match tool.status {
                ToolStatus::Progress => "running",
                ToolStatus::Complete => "done",
                ToolStatus::Error => "failed",
            };
            let call = tool.tool_call_id.as_deref().unwrap_or("-");
            let mut line = format!("tool {} [{}] call={}", tool.tool_id, status, call);
            if !tool.logs.is_empty() {
                line.push_str(&format!(" logs={}", tool.logs.len()));
            }
            if let Some(output) = &tool.output {
                line.push_str(&format!(" output={output}"));
            }
            line
        }
        TraceItem::Reasoning(reasoning) => format!("reasoning: {}", reasoning.reasoning),
        TraceItem::Handoff(handoff) => format!("handoff to {}", handoff.agent_name),
    }
}
