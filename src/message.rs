use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{MessageError, Result};
use crate::history::{ExecutionHistory, NoExecutionHistory};
use crate::outputs;
use crate::remote::{self, is_truthy, BlobStore};
use crate::resolve::{self, context_field, ResolvedConfig};
use crate::schema::{NoSchemas, SchemaKind, SchemaValidator};
use crate::settings::Settings;

/// Entry point for the message pipeline, wired to its collaborators.
#[derive(Clone)]
pub struct MessageAdapter {
    blobs: Arc<dyn BlobStore>,
    history: Arc<dyn ExecutionHistory>,
    schemas: Arc<dyn SchemaValidator>,
    settings: Settings,
}

impl MessageAdapter {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            history: Arc::new(NoExecutionHistory),
            schemas: Arc::new(NoSchemas),
            settings: Settings::default(),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn ExecutionHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_schemas(mut self, schemas: Arc<dyn SchemaValidator>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn load_remote_event(&self, event: Value) -> Result<Value> {
        remote::load_remote_event(event, self.blobs.as_ref())
    }

    /// Loads remote content, unwraps a `cma` parameter envelope and records
    /// the running task in `meta.workflow_tasks`.
    pub fn load_and_update_remote_event(
        &self,
        event: Value,
        context: Option<&Value>,
    ) -> Result<Value> {
        let mut event = match event.get("cma").filter(|cma| is_truthy(cma)) {
            Some(cma) => self.unwrap_parameters(cma)?,
            None => self.load_remote_event(event)?,
        };
        if let Some(context) = context.filter(|ctx| is_truthy(ctx)) {
            if event.get("meta").is_some() {
                self.record_task(&mut event, context)?;
            }
        }
        Ok(event)
    }

    /// The wrapped event, remote content loaded, with the wrapper's sibling keys on top.
    fn unwrap_parameters(&self, cma: &Value) -> Result<Value> {
        let wrapper = cma.as_object().ok_or_else(|| {
            MessageError::InvalidInput("cma wrapper must be an object".to_string())
        })?;
        let wrapped = wrapper
            .get("event")
            .cloned()
            .ok_or_else(|| MessageError::MissingField("cma.event".to_string()))?;
        let mut event = self.load_remote_event(wrapped)?;
        let Value::Object(map) = &mut event else {
            return Err(MessageError::InvalidInput(
                "cma.event must be an object".to_string(),
            ));
        };
        for (key, value) in wrapper.iter().filter(|(key, _)| key.as_str() != "event") {
            map.insert(key.clone(), value.clone());
        }
        debug!(overrides = wrapper.len() - 1, "unwrapped cma parameters");
        Ok(event)
    }

    fn record_task(&self, event: &mut Value, context: &Value) -> Result<()> {
        let entry = json!({
            "name": context_field(context, &["function_name", "functionName"]),
            "version": context_field(context, &["function_version", "functionVersion"]),
            "arn": context_field(context, &["invoked_function_arn", "invokedFunctionArn", "activityArn"]),
        });
        let legacy = event.get("task_config").is_none() && event.get("workflow_config").is_some();
        let task_name = if legacy {
            Some(resolve::current_task_name(event, Some(context), self.history.as_ref())?)
        } else {
            None
        };

        let Some(Value::Object(meta)) = event.get_mut("meta") else {
            warn!("meta is not an object, task metadata not recorded");
            return Ok(());
        };
        let tasks = meta
            .entry("workflow_tasks")
            .or_insert_with(|| Value::Object(Map::new()));
        match tasks {
            Value::Object(tasks) => {
                let key = task_name.unwrap_or_else(|| tasks.len().to_string());
                tasks.insert(key, entry);
            }
            Value::Array(tasks) => tasks.push(entry),
            _ => warn!("meta.workflow_tasks is not a collection, task metadata not recorded"),
        }
        Ok(())
    }

    /// Builds the `{input, config, messageConfig?, cumulus_config?}` event a task runs on.
    pub fn load_nested_event(&self, event: &Value, context: Option<&Value>) -> Result<Value> {
        let config = resolve::load_config(event, context, self.history.as_ref())?;
        let ResolvedConfig {
            config,
            message_config,
        } = resolve::resolve_config_templates(event, &config)?;
        let input = resolve::resolve_input(event, message_config.as_ref())?;
        self.schemas.validate(&input, SchemaKind::Input)?;

        let mut nested = Map::new();
        nested.insert("input".to_string(), input);
        if is_truthy(&config) {
            self.schemas.validate(&config, SchemaKind::Config)?;
            nested.insert("config".to_string(), config);
        } else {
            nested.insert("config".to_string(), Value::Object(Map::new()));
        }
        if let Some(message_config) = message_config {
            nested.insert("messageConfig".to_string(), message_config);
        }
        if let Some(cumulus_config) = cumulus_config(event) {
            nested.insert("cumulus_config".to_string(), cumulus_config);
        }
        Ok(Value::Object(nested))
    }

    pub fn create_next_event(
        &self,
        handler_response: &Value,
        event: &Value,
        message_config: Option<&Value>,
    ) -> Result<Value> {
        outputs::create_next_event(
            handler_response,
            event,
            message_config,
            self.schemas.as_ref(),
            &self.settings,
            self.blobs.as_ref(),
        )
    }
}

/// Execution identifiers from `cumulus_meta`: both of state machine and
/// execution name or neither, plus any `cumulus_context`.
fn cumulus_config(event: &Value) -> Option<Value> {
    let meta = event.get("cumulus_meta")?.as_object()?;
    let mut config = Map::new();
    if let (Some(state_machine), Some(execution_name)) =
        (meta.get("state_machine"), meta.get("execution_name"))
    {
        config.insert("state_machine".to_string(), state_machine.clone());
        config.insert("execution_name".to_string(), execution_name.clone());
    }
    if let Some(context) = meta.get("cumulus_context") {
        config.insert("cumulus_context".to_string(), context.clone());
    }
    (!config.is_empty()).then_some(Value::Object(config))
}
