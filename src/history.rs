//! Execution history lookups for messages that predate embedded task config.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{MessageError, Result};

/// Finds the task currently running in a workflow execution.
pub trait ExecutionHistory: Send + Sync {
    fn current_task(
        &self,
        state_machine: &str,
        execution_name: &str,
        actor_arn: Option<&str>,
    ) -> Result<String>;
}

/// Derives an execution ARN from its state machine ARN and execution name.
pub fn execution_arn(state_machine_arn: &str, execution_name: &str) -> String {
    format!(
        "{}:{}",
        state_machine_arn.replace(":stateMachine:", ":execution:"),
        execution_name
    )
}

fn scheduled_resource(event: &Value) -> Option<&str> {
    let details = match event.get("type").and_then(Value::as_str)? {
        "LambdaFunctionScheduled" => "lambdaFunctionScheduledEventDetails",
        "ActivityScheduled" => "activityScheduledEventDetails",
        _ => return None,
    };
    event.get(details)?.get("resource")?.as_str()
}

fn entered_name(event: &Value) -> Option<&str> {
    event
        .get("stateEnteredEventDetails")?
        .get("name")?
        .as_str()
}

/// Scans a Step Functions execution history (most recent first) for the task
/// scheduled on `arn`, or for the most recently entered task when no ARN is
/// given. Without an ARN, parallel branches are indistinguishable.
pub fn task_name_from_history(history: &Value, arn: Option<&str>) -> Result<String> {
    let events = history
        .get("events")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let by_id: HashMap<String, &Value> = events
        .iter()
        .filter_map(|event| event.get("id").map(|id| (id.to_string(), event)))
        .collect();

    for step in events {
        if let (Some(arn), Some(resource)) = (arn, scheduled_resource(step)) {
            let previous = step
                .get("previousEventId")
                .and_then(|id| by_id.get(&id.to_string()));
            if resource == arn {
                if let Some(name) = previous.and_then(|event| entered_name(event)) {
                    return Ok(name.to_string());
                }
            }
        }
        if step.get("type").and_then(Value::as_str) == Some("TaskStateEntered") {
            if let Some(name) = entered_name(step) {
                return Ok(name.to_string());
            }
        }
    }
    Err(MessageError::TaskLookup(
        arn.unwrap_or("current execution").to_string(),
    ))
}

/// Histories recorded ahead of time, keyed by execution ARN.
#[derive(Debug, Default, Clone)]
pub struct RecordedHistory {
    executions: HashMap<String, Value>,
}

impl RecordedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, execution_arn: impl Into<String>, history: Value) {
        self.executions.insert(execution_arn.into(), history);
    }

    pub fn with_execution(mut self, execution_arn: impl Into<String>, history: Value) -> Self {
        self.insert(execution_arn, history);
        self
    }
}

impl ExecutionHistory for RecordedHistory {
    fn current_task(
        &self,
        state_machine: &str,
        execution_name: &str,
        actor_arn: Option<&str>,
    ) -> Result<String> {
        let arn = execution_arn(state_machine, execution_name);
        let history = self
            .executions
            .get(&arn)
            .ok_or_else(|| MessageError::TaskLookup(format!("no history for execution {arn}")))?;
        task_name_from_history(history, actor_arn)
    }
}

/// For deployments without a history service; every lookup fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExecutionHistory;

impl ExecutionHistory for NoExecutionHistory {
    fn current_task(
        &self,
        state_machine: &str,
        execution_name: &str,
        _actor_arn: Option<&str>,
    ) -> Result<String> {
        Err(MessageError::TaskLookup(format!(
            "execution history unavailable for {}",
            execution_arn(state_machine, execution_name)
        )))
    }
}
