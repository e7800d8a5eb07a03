//! Projection of a task's response onto the next message.

use serde_json::{Map, Value};
use tracing::debug;

use crate::correlate;
use crate::error::{MessageError, Result};
use crate::path::{self, WildcardPath};
use crate::remote::{self, is_truthy, BlobStore};
use crate::schema::{SchemaKind, SchemaValidator};
use crate::settings::Settings;
use crate::template;

/// One `{source, destination}` entry of `cumulus_message.outputs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMapping<'a> {
    pub source: &'a str,
    pub destination: &'a str,
}

fn parse_outputs(outputs: &Value) -> Result<Vec<OutputMapping<'_>>> {
    let entries = outputs.as_array().ok_or_else(|| {
        MessageError::InvalidInput("cumulus_message.outputs must be a list".to_string())
    })?;
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let field = |name: &str| {
                entry
                    .get(name)
                    .and_then(Value::as_str)
                    .ok_or_else(|| MessageError::MissingField(format!("outputs[{index}].{name}")))
            };
            Ok(OutputMapping {
                source: field("source")?,
                destination: field("destination")?,
            })
        })
        .collect()
}

/// Writes one mapping's value into `message`. Destinations with wildcard
/// segments mirror the array shape of the source.
fn apply_mapping(message: &mut Value, response: &Value, mapping: &OutputMapping<'_>) -> Result<()> {
    let destination = mapping
        .destination
        .trim_start_matches('{')
        .trim_end_matches('}');
    if WildcardPath::parse(destination).wildcard_count() == 0 {
        let value = template::resolve(response, mapping.source)?;
        return path::assign(message, destination, value);
    }

    let source = template::strip_template(mapping.source);
    let values: Vec<Value> = path::values(response, source)?
        .into_iter()
        .cloned()
        .collect();
    let current = std::mem::take(message);
    *message = correlate::project(response, source, current, destination, &values)?;
    Ok(())
}

/// Applies `response` to a copy of `event`: the whole response becomes the
/// payload, or, with declared outputs, each mapping is written in order onto
/// an emptied payload.
pub fn assign_outputs(
    response: &Value,
    event: &Value,
    message_config: Option<&Value>,
) -> Result<Value> {
    let mut result = event.clone();
    let Value::Object(map) = &mut result else {
        return Err(MessageError::InvalidInput(
            "event must be a JSON object".to_string(),
        ));
    };
    match message_config.and_then(|mc| mc.get("outputs")) {
        Some(outputs) => {
            let mappings = parse_outputs(outputs)?;
            map.insert("payload".to_string(), Value::Object(Map::new()));
            for mapping in &mappings {
                debug!(source = mapping.source, destination = mapping.destination, "applying output");
                apply_mapping(&mut result, response, mapping)?;
            }
        }
        None => {
            map.insert("payload".to_string(), response.clone());
        }
    }
    Ok(result)
}

/// Builds the outgoing message for a finished task.
pub fn create_next_event(
    response: &Value,
    event: &Value,
    message_config: Option<&Value>,
    schemas: &dyn SchemaValidator,
    settings: &Settings,
    blobs: &dyn BlobStore,
) -> Result<Value> {
    schemas.validate(response, SchemaKind::Output)?;
    let mut result = assign_outputs(response, event, message_config)?;
    if let Value::Object(map) = &mut result {
        map.remove("replace");
        if !map.get("exception").is_some_and(is_truthy) {
            map.insert("exception".to_string(), Value::String("None".to_string()));
        }
    }
    remote::store_remote_response(
        result,
        settings.max_inline_bytes,
        &settings.stripped_keys,
        settings.retention,
        blobs,
    )
}
