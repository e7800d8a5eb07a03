//! Task configuration lookup and template resolution.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{MessageError, Result};
use crate::history::ExecutionHistory;
use crate::template;

const MESSAGE_CONFIG_KEY: &str = "cumulus_message";

/// A task config with its templates resolved, and the `cumulus_message`
/// block that was set aside unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub config: Value,
    pub message_config: Option<Value>,
}

/// The first present key among `keys`, for context objects that spell the
/// same field several ways.
pub fn context_field<'a>(context: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| context.get(*key))
}

pub fn actor_arn(context: Option<&Value>) -> Option<&str> {
    context
        .and_then(|ctx| {
            context_field(ctx, &["invoked_function_arn", "invokedFunctionArn", "activityArn"])
        })
        .and_then(Value::as_str)
}

/// The config for the running task: `task_config` when embedded, otherwise
/// the `workflow_config` entry for the task named by the execution.
pub fn load_config(
    message: &Value,
    context: Option<&Value>,
    history: &dyn ExecutionHistory,
) -> Result<Value> {
    if let Some(config) = message.get("task_config") {
        return Ok(config.clone());
    }
    let Some(workflow_config) = message.get("workflow_config").and_then(Value::as_object) else {
        return Ok(Value::Object(Map::new()));
    };
    let task = current_task_name(message, context, history)?;
    debug!(task = %task, "using workflow_config entry");
    workflow_config
        .get(&task)
        .cloned()
        .ok_or_else(|| {
            MessageError::TaskLookup(format!("workflow_config has no entry for {task}"))
        })
}

/// `cumulus_meta.task` when the message names its task, else an execution history query.
pub fn current_task_name(
    message: &Value,
    context: Option<&Value>,
    history: &dyn ExecutionHistory,
) -> Result<String> {
    let meta = message.get("cumulus_meta");
    if let Some(task) = meta.and_then(|m| m.get("task")).and_then(Value::as_str) {
        return Ok(task.to_string());
    }
    let field = |name: &str| {
        meta.and_then(|m| m.get(name))
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::MissingField(format!("cumulus_meta.{name}")))
    };
    let state_machine = field("state_machine")?;
    let execution_name = field("execution_name")?;
    history.current_task(state_machine, execution_name, actor_arn(context))
}

/// Splits off `cumulus_message` and resolves every template in the rest.
pub fn resolve_config_templates(message: &Value, config: &Value) -> Result<ResolvedConfig> {
    let mut config = config.clone();
    let message_config = match &mut config {
        Value::Object(map) => map.remove(MESSAGE_CONFIG_KEY),
        _ => None,
    };
    Ok(ResolvedConfig {
        config: resolve_value(message, &config)?,
        message_config,
    })
}

/// Strings resolve as templates; arrays and objects recurse; keys are left alone.
pub fn resolve_value(message: &Value, node: &Value) -> Result<Value> {
    Ok(match node {
        Value::String(text) => template::resolve(message, text)?,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(message, item))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, value) in map {
                resolved.insert(key.clone(), resolve_value(message, value)?);
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    })
}

/// The task input: the `cumulus_message.input` template when configured,
/// otherwise the message payload.
pub fn resolve_input(message: &Value, message_config: Option<&Value>) -> Result<Value> {
    match message_config.and_then(|mc| mc.get("input")) {
        Some(Value::String(input)) => template::resolve(message, input),
        Some(other) => Err(MessageError::InvalidInput(format!(
            "cumulus_message.input must be a template string, got {other}"
        ))),
        None => Ok(message.get("payload").cloned().unwrap_or(Value::Null)),
    }
}
