//! Path templates embedded in message strings.
//!
//! Three forms are recognised, in this order:
//!
//! * `{$.path}` / `{{$.path}}` resolves to the first matched value, any type,
//!   or null when nothing matches.
//! * `{[$.path]}` resolves to the list of every matched value.
//! * `prefix{$.path}suffix` replaces each braced path with the text of its
//!   first match, or with nothing when the path matches nothing.
//!
//! Anything else is returned unchanged.

use serde_json::Value;

use crate::error::Result;
use crate::path;

/// The template form a string uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template<'a> {
    WholeValue(&'a str),
    WholeArray(&'a str),
    Inline,
    Literal,
}

pub fn classify(template: &str) -> Template<'_> {
    if let Some(inner) = whole_value_path(template) {
        return Template::WholeValue(inner);
    }
    if let Some(inner) = template
        .strip_prefix("{[")
        .and_then(|rest| rest.strip_suffix("]}"))
    {
        return Template::WholeArray(inner);
    }
    if placeholders(template).next().is_some() {
        return Template::Inline;
    }
    Template::Literal
}

fn whole_value_path(template: &str) -> Option<&str> {
    let rest = template.strip_prefix('{')?;
    if rest.starts_with('[') || rest.starts_with(']') || !template.ends_with('}') {
        return None;
    }
    let inner = template.trim_start_matches('{').trim_end_matches('}');
    if inner.is_empty() || inner.contains('{') || inner.contains('}') {
        return None;
    }
    Some(inner)
}

/// Braced spans `{...}` with no closing brace inside, as (start, end, path).
fn placeholders(template: &str) -> impl Iterator<Item = (usize, usize, &str)> {
    let mut cursor = 0;
    std::iter::from_fn(move || {
        while let Some(offset) = template[cursor..].find('{') {
            let start = cursor + offset;
            let body_start = start + 1;
            match template[body_start..].find('}') {
                Some(0) => cursor = body_start,
                Some(len) => {
                    let end = body_start + len + 1;
                    cursor = end;
                    let body = &template[body_start..body_start + len];
                    return Some((start, end, body.trim_start_matches('{')));
                }
                None => return None,
            }
        }
        None
    })
}

/// Resolves `template` against `message`.
pub fn resolve(message: &Value, template: &str) -> Result<Value> {
    match classify(template) {
        Template::WholeValue(expr) => {
            Ok(path::first(message, expr)?.cloned().unwrap_or(Value::Null))
        }
        Template::WholeArray(expr) => Ok(Value::Array(
            path::values(message, expr)?.into_iter().cloned().collect(),
        )),
        Template::Inline => interpolate(message, template).map(Value::String),
        Template::Literal => Ok(Value::String(template.to_string())),
    }
}

/// The bare path expression inside a template, whatever its form.
pub fn strip_template(template: &str) -> &str {
    match classify(template) {
        Template::WholeValue(expr) | Template::WholeArray(expr) => expr,
        Template::Inline | Template::Literal => template,
    }
}

fn interpolate(message: &Value, template: &str) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for (start, end, expr) in placeholders(template) {
        out.push_str(&template[last..start]);
        if let Some(value) = path::first(message, expr)? {
            out.push_str(&stringify(value));
        }
        last = end;
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Text inserted for an interpolated match; containers become compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
