//! Line protocol for driving the adapter from another process.
//!
//! A request frame is an operation name line, the JSON call envelope (which
//! may span several lines), and a `<EOC>` line. Each response is the result
//! as one line of JSON, omitted when empty, followed by `<EOC>`. A `<EXIT>`
//! line or end of input closes the session.

use std::fmt;
use std::io::{BufRead, Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MessageError, Result};
use crate::message::MessageAdapter;
use crate::schema::{FsSchemaValidator, SchemaPaths};

pub const END_OF_COMMAND: &str = "<EOC>";
pub const EXIT: &str = "<EXIT>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    LoadAndUpdateRemoteEvent,
    LoadRemoteEvent,
    LoadNestedEvent,
    CreateNextEvent,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::LoadAndUpdateRemoteEvent => "loadAndUpdateRemoteEvent",
            Operation::LoadRemoteEvent => "loadRemoteEvent",
            Operation::LoadNestedEvent => "loadNestedEvent",
            Operation::CreateNextEvent => "createNextEvent",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = MessageError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim() {
            "loadAndUpdateRemoteEvent" | "load_and_update_remote_event" => {
                Ok(Operation::LoadAndUpdateRemoteEvent)
            }
            "loadRemoteEvent" | "load_remote_event" => Ok(Operation::LoadRemoteEvent),
            "loadNestedEvent" | "load_nested_event" => Ok(Operation::LoadNestedEvent),
            "createNextEvent" | "create_next_event" => Ok(Operation::CreateNextEvent),
            other => Err(MessageError::InvalidInput(format!(
                "invalid method name: {other}"
            ))),
        }
    }
}

/// Arguments of one call; which fields matter depends on the operation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallEnvelope {
    #[serde(default)]
    pub event: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub schemas: Option<SchemaPaths>,
    #[serde(default, alias = "handlerResponse")]
    pub handler_response: Value,
    #[serde(default, alias = "messageConfig")]
    pub message_config: Option<Value>,
}

impl CallEnvelope {
    fn take_event(&mut self) -> Result<Value> {
        self.event
            .take()
            .ok_or_else(|| MessageError::MissingField("event".to_string()))
    }
}

/// Runs one operation. Schema files are looked up under the adapter's task root.
pub fn dispatch(
    adapter: &MessageAdapter,
    operation: Operation,
    mut envelope: CallEnvelope,
) -> Result<Value> {
    let schemas = FsSchemaValidator::new(
        adapter.settings().task_root.clone(),
        envelope.schemas.take().unwrap_or_default(),
    );
    let adapter = adapter.clone().with_schemas(Arc::new(schemas));
    debug!(operation = %operation, "dispatching");
    let event = envelope.take_event()?;
    match operation {
        Operation::LoadAndUpdateRemoteEvent => {
            adapter.load_and_update_remote_event(event, envelope.context.as_ref())
        }
        Operation::LoadRemoteEvent => adapter.load_remote_event(event),
        Operation::LoadNestedEvent => adapter.load_nested_event(&event, envelope.context.as_ref()),
        Operation::CreateNextEvent => adapter.create_next_event(
            &envelope.handler_response,
            &event,
            envelope.message_config.as_ref(),
        ),
    }
}

/// Results with nothing to say produce no output line.
pub fn is_empty_result(result: &Value) -> bool {
    match result {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

pub fn dispatch_named(adapter: &MessageAdapter, name: &str, body: &str) -> Result<Value> {
    let operation: Operation = name.parse()?;
    let envelope: CallEnvelope = serde_json::from_str(body)?;
    dispatch(adapter, operation, envelope)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    AwaitingCommand,
    AccumulatingBody { command: String, body: String },
    Dispatching { command: String, body: String },
}

/// One protocol connection over a reader and writer.
pub struct StreamSession<R, W> {
    adapter: MessageAdapter,
    input: R,
    output: W,
    state: StreamState,
}

impl<R: BufRead, W: Write> StreamSession<R, W> {
    pub fn new(adapter: MessageAdapter, input: R, output: W) -> Self {
        Self {
            adapter,
            input,
            output,
            state: StreamState::AwaitingCommand,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(&['\n', '\r'][..]).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    /// Serves frames until `<EXIT>` or end of input. The first failing frame
    /// ends the session with its error and writes nothing for that frame.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, StreamState::AwaitingCommand);
            self.state = match state {
                StreamState::Dispatching { command, body } => {
                    self.respond(&command, &body)?;
                    StreamState::AwaitingCommand
                }
                state => {
                    let Some(line) = self.next_line()? else {
                        if state != StreamState::AwaitingCommand {
                            warn!("input ended inside an unterminated frame");
                        }
                        self.output.flush()?;
                        return Ok(());
                    };
                    if line == EXIT {
                        self.output.flush()?;
                        return Ok(());
                    }
                    advance(state, line)?
                }
            };
        }
    }

    fn respond(&mut self, command: &str, body: &str) -> Result<()> {
        let result = dispatch_named(&self.adapter, command, body)?;
        if !is_empty_result(&result) {
            let encoded = serde_json::to_string(&result)?;
            writeln!(self.output, "{encoded}")?;
        }
        writeln!(self.output, "{END_OF_COMMAND}")?;
        self.output.flush()?;
        Ok(())
    }
}

fn advance(state: StreamState, line: String) -> Result<StreamState> {
    Ok(match state {
        StreamState::AwaitingCommand if line == END_OF_COMMAND => {
            return Err(MessageError::InvalidInput(
                "frame terminator received before an operation name".to_string(),
            ));
        }
        StreamState::AwaitingCommand if line.trim().is_empty() => StreamState::AwaitingCommand,
        StreamState::AwaitingCommand => {
            let command = line.trim().to_string();
            debug!(command = %command, "received command");
            StreamState::AccumulatingBody {
                command,
                body: String::new(),
            }
        }
        StreamState::AccumulatingBody { command, body } if line == END_OF_COMMAND => {
            StreamState::Dispatching { command, body }
        }
        StreamState::AccumulatingBody { command, mut body } => {
            body.push_str(&line);
            StreamState::AccumulatingBody { command, body }
        }
        dispatching @ StreamState::Dispatching { .. } => dispatching,
    })
}

/// Runs `name` once on the envelope read from `input`, writing a non-empty
/// result without frame markers.
pub fn single_command(
    adapter: &MessageAdapter,
    name: &str,
    mut input: impl Read,
    mut output: impl Write,
) -> Result<()> {
    let operation: Operation = name.parse()?;
    let mut body = String::new();
    input.read_to_string(&mut body)?;
    let envelope: CallEnvelope = serde_json::from_str(&body)?;
    let result = dispatch(adapter, operation, envelope)?;
    if !is_empty_result(&result) {
        serde_json::to_writer(&mut output, &result)?;
        output.flush()?;
    }
    Ok(())
}
