//! Path expressions over message trees.
//!
//! Queries follow RFC 9535 JSONPath and are evaluated with `serde_json_path`.
//! Writes go through concrete paths (names and indices only), creating any
//! missing intermediate containers on the way down.

use serde_json::{Map, Value};
use serde_json_path::JsonPath;

use crate::error::{MessageError, Result};

/// A concrete path step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Accepts the legacy relative form (`meta.foo`) by anchoring it at the root,
/// and dotted names outside the RFC shorthand grammar (`meta.provider-id`) by
/// rewriting them as quoted member selectors.
pub fn normalize(expr: &str) -> String {
    let trimmed = expr.trim();
    let anchored = if trimmed.starts_with('$') {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "$".to_string()
    } else if trimmed.starts_with('[') {
        format!("${trimmed}")
    } else {
        format!("$.{trimmed}")
    };
    quote_dotted_names(&anchored)
}

fn quote_dotted_names(path: &str) -> String {
    let chars: Vec<char> = path.chars().collect();
    let mut out = String::with_capacity(path.len());
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut pos = 0;
    while pos < chars.len() {
        let ch = chars[pos];
        if let Some(open) = quote {
            out.push(ch);
            if ch == '\\' {
                if let Some(next) = chars.get(pos + 1) {
                    out.push(*next);
                    pos += 1;
                }
            } else if ch == open {
                quote = None;
            }
            pos += 1;
            continue;
        }
        match ch {
            '\'' | '"' if depth > 0 => quote = Some(ch),
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                let descendant = chars.get(pos + 1) == Some(&'.');
                let start = pos + if descendant { 2 } else { 1 };
                let mut end = start;
                while end < chars.len() && !matches!(chars[end], '.' | '[') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                if name.is_empty() || name == "*" || is_shorthand_name(&name) {
                    out.push_str(if descendant { ".." } else { "." });
                    out.push_str(&name);
                } else {
                    if descendant {
                        out.push_str("..");
                    }
                    out.push_str("['");
                    for c in name.chars() {
                        if matches!(c, '\'' | '\\') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push_str("']");
                }
                pos = end;
                continue;
            }
            _ => {}
        }
        out.push(ch);
        pos += 1;
    }
    out
}

fn is_shorthand_name(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || !c.is_ascii());
    first_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || !c.is_ascii())
}

pub fn compile(expr: &str) -> Result<JsonPath> {
    JsonPath::parse(&normalize(expr)).map_err(|err| MessageError::InvalidPath {
        path: expr.to_string(),
        message: err.to_string(),
    })
}

/// Every match of `expr` in document order, paired with its JSON pointer.
pub fn evaluate<'a>(tree: &'a Value, expr: &str) -> Result<Vec<(String, &'a Value)>> {
    let path = compile(expr)?;
    let located = path.query_located(tree);
    Ok(located
        .iter()
        .map(|node| (node.location().to_json_pointer(), node.node()))
        .collect())
}

pub fn values<'a>(tree: &'a Value, expr: &str) -> Result<Vec<&'a Value>> {
    let path = compile(expr)?;
    Ok(path.query(tree).all())
}

pub fn first<'a>(tree: &'a Value, expr: &str) -> Result<Option<&'a Value>> {
    let path = compile(expr)?;
    Ok(path.query(tree).first())
}

/// Pointer of the single node selected by `expr`.
pub fn locate_one(tree: &Value, expr: &str) -> Result<String> {
    let mut matches = evaluate(tree, expr)?;
    if matches.len() != 1 {
        return Err(MessageError::PathCardinality {
            path: expr.to_string(),
            matches: matches.len(),
        });
    }
    let (pointer, _) = matches.remove(0);
    Ok(pointer)
}

/// Replaces every existing match of `expr`; returns how many were replaced.
pub fn update(tree: &mut Value, expr: &str, value: &Value) -> Result<usize> {
    let pointers: Vec<String> = evaluate(tree, expr)?
        .into_iter()
        .map(|(pointer, _)| pointer)
        .collect();
    let mut replaced = 0;
    for pointer in pointers {
        if let Some(slot) = tree.pointer_mut(&pointer) {
            *slot = value.clone();
            replaced += 1;
        }
    }
    Ok(replaced)
}

/// Number of elements of the array at the first match of `prefix`.
pub fn count(tree: &Value, prefix: &str) -> Result<usize> {
    Ok(match first(tree, prefix)? {
        Some(Value::Array(items)) => items.len(),
        _ => 0,
    })
}

/// Writes `value` at a concrete path, creating objects for names and arrays
/// for indices where the tree has nothing yet.
pub fn assign(tree: &mut Value, expr: &str, value: Value) -> Result<()> {
    let segments = parse_segments(expr)?;
    if segments.is_empty() {
        *tree = value;
        return Ok(());
    }
    set_path_recursive(tree, &segments, value).map_err(|message| MessageError::InvalidPath {
        path: expr.to_string(),
        message,
    })
}

pub fn parse_segments(expr: &str) -> Result<Vec<PathSegment>> {
    let normalized = normalize(expr);
    let invalid = |message: &str| MessageError::InvalidPath {
        path: expr.to_string(),
        message: message.to_string(),
    };
    let chars: Vec<char> = normalized.chars().collect();
    let mut segments = Vec::new();
    // normalize() guarantees a leading '$'
    let mut pos = 1;
    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                let start = pos;
                while pos < chars.len() && chars[pos] != '.' && chars[pos] != '[' {
                    pos += 1;
                }
                let name: String = chars[start..pos].iter().collect();
                if name.is_empty() {
                    return Err(invalid("empty name segment"));
                }
                if name == "*" {
                    return Err(invalid("wildcard segments are not allowed in a concrete path"));
                }
                segments.push(PathSegment::Key(name));
            }
            '[' => {
                pos += 1;
                match chars.get(pos) {
                    Some(quote @ ('\'' | '"')) => {
                        let quote = *quote;
                        pos += 1;
                        let mut name = String::new();
                        loop {
                            match chars.get(pos) {
                                Some('\\') => {
                                    if let Some(escaped) = chars.get(pos + 1) {
                                        name.push(*escaped);
                                    }
                                    pos += 2;
                                }
                                Some(ch) if *ch == quote => {
                                    pos += 1;
                                    break;
                                }
                                Some(ch) => {
                                    name.push(*ch);
                                    pos += 1;
                                }
                                None => return Err(invalid("unterminated quoted name")),
                            }
                        }
                        if chars.get(pos) != Some(&']') {
                            return Err(invalid("expected `]` after quoted name"));
                        }
                        pos += 1;
                        segments.push(PathSegment::Key(name));
                    }
                    _ => {
                        let start = pos;
                        while pos < chars.len() && chars[pos] != ']' {
                            pos += 1;
                        }
                        if pos >= chars.len() {
                            return Err(invalid("unterminated `[`"));
                        }
                        let raw: String = chars[start..pos].iter().collect();
                        pos += 1;
                        let raw = raw.trim();
                        if raw == "*" {
                            return Err(invalid(
                                "wildcard segments are not allowed in a concrete path",
                            ));
                        }
                        let index = raw
                            .parse::<usize>()
                            .map_err(|_| invalid("only names and non-negative indices can be assigned"))?;
                        segments.push(PathSegment::Index(index));
                    }
                }
            }
            _ => return Err(invalid("unexpected character")),
        }
    }
    Ok(segments)
}

/// A path cut at its wildcard segments (`[*]` or `.*`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WildcardPath {
    parts: Vec<String>,
}

impl WildcardPath {
    pub fn parse(expr: &str) -> Self {
        let normalized = normalize(expr);
        let chars: Vec<char> = normalized.chars().collect();
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut quote: Option<char> = None;
        let mut pos = 0;
        while pos < chars.len() {
            let ch = chars[pos];
            if let Some(open) = quote {
                current.push(ch);
                if ch == '\\' {
                    if let Some(next) = chars.get(pos + 1) {
                        current.push(*next);
                        pos += 1;
                    }
                } else if ch == open {
                    quote = None;
                }
                pos += 1;
                continue;
            }
            match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                    pos += 1;
                }
                '[' if chars.get(pos + 1) == Some(&'*') && chars.get(pos + 2) == Some(&']') => {
                    parts.push(std::mem::take(&mut current));
                    pos += 3;
                }
                '.' if chars.get(pos + 1) == Some(&'*')
                    && matches!(chars.get(pos + 2), None | Some('.') | Some('[')) =>
                {
                    parts.push(std::mem::take(&mut current));
                    pos += 2;
                }
                _ => {
                    current.push(ch);
                    pos += 1;
                }
            }
        }
        parts.push(current);
        Self { parts }
    }

    pub fn wildcard_count(&self) -> usize {
        self.parts.len() - 1
    }

    /// The path up to (not including) wildcard `level`, with the earlier
    /// wildcards replaced by `indices`.
    pub fn prefix(&self, level: usize, indices: &[usize]) -> String {
        let mut out = self.parts[0].clone();
        for (depth, index) in indices.iter().enumerate().take(level) {
            out.push_str(&format!("[{index}]"));
            out.push_str(&self.parts[depth + 1]);
        }
        out
    }

    /// The fully indexed concrete path; `indices` must cover every wildcard.
    pub fn concrete(&self, indices: &[usize]) -> String {
        self.prefix(self.wildcard_count(), indices)
    }
}

fn set_path_recursive(
    target: &mut Value,
    path: &[PathSegment],
    value: Value,
) -> std::result::Result<(), String> {
    let Some((segment, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    ensure_container_for_segment(target, segment);
    match (segment, target) {
        (PathSegment::Key(key), Value::Object(map)) => {
            if rest.is_empty() {
                map.insert(key.clone(), value);
                return Ok(());
            }
            let entry = map
                .entry(key.clone())
                .or_insert_with(|| initial_container(rest.first()));
            set_path_recursive(entry, rest, value)
        }
        (PathSegment::Index(index), Value::Array(vec)) => {
            if *index >= vec.len() {
                vec.resize(*index + 1, Value::Null);
            }
            if rest.is_empty() {
                vec[*index] = value;
                return Ok(());
            }
            set_path_recursive(&mut vec[*index], rest, value)
        }
        (segment, other) => Err(format!("cannot descend into {other} with {segment:?}")),
    }
}

fn ensure_container_for_segment(target: &mut Value, segment: &PathSegment) {
    let matches = match segment {
        PathSegment::Key(_) => target.is_object(),
        PathSegment::Index(_) => target.is_array(),
    };
    if !matches {
        *target = initial_container(Some(segment));
    }
}

fn initial_container(segment: Option<&PathSegment>) -> Value {
    match segment {
        Some(PathSegment::Index(_)) => Value::Array(Vec::new()),
        _ => Value::Object(Map::new()),
    }
}
