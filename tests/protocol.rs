use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use cumulus_message_adapter_rs::protocol::{StreamState, END_OF_COMMAND};
use cumulus_message_adapter_rs::{
    single_command, MemoryBlobStore, MessageAdapter, Settings, StreamSession,
};

fn adapter_in(task_root: &std::path::Path) -> MessageAdapter {
    let settings = Settings {
        task_root: task_root.to_path_buf(),
        ..Settings::default()
    };
    MessageAdapter::new(Arc::new(MemoryBlobStore::new())).with_settings(settings)
}

fn run_stream(adapter: MessageAdapter, input: &str) -> (cumulus_message_adapter_rs::Result<()>, String) {
    let mut session = StreamSession::new(adapter, Cursor::new(input.to_string()), Vec::new());
    let outcome = session.run();
    let output = String::from_utf8(session.into_output()).expect("utf-8 output");
    (outcome, output)
}

fn frames(output: &str) -> Vec<Option<Value>> {
    let mut parsed = Vec::new();
    let mut pending: Option<Value> = None;
    for line in output.lines() {
        if line == END_OF_COMMAND {
            parsed.push(pending.take());
        } else {
            pending = Some(serde_json::from_str(line).expect("response line is JSON"));
        }
    }
    parsed
}

#[test]
fn stream_serves_each_operation_in_turn() -> Result<()> {
    let root = tempfile::tempdir()?;
    let input = [
        "loadAndUpdateRemoteEvent",
        r#"{"event": {"payload": {"x": 1}, "meta": {}}, "context": {"function_name": "task", "function_version": "1", "invoked_function_arn": "arn:lambda:task"}}"#,
        "<EOC>",
        "loadNestedEvent",
        r#"{"event": {"payload": {"x": 1}}, "schemas": null}"#,
        "<EOC>",
        "createNextEvent",
        r#"{"event": {"payload": {"x": 1}}, "handler_response": {"y": 2}, "message_config": null}"#,
        "<EOC>",
        "<EXIT>",
        "",
    ]
    .join("\n");

    let (outcome, output) = run_stream(adapter_in(root.path()), &input);
    outcome?;
    let frames = frames(&output);
    assert_eq!(frames.len(), 3);
    assert_eq!(
        frames[0],
        Some(json!({
            "payload": { "x": 1 },
            "meta": {
                "workflow_tasks": {
                    "0": { "name": "task", "version": "1", "arn": "arn:lambda:task" }
                }
            }
        }))
    );
    assert_eq!(frames[1], Some(json!({ "input": { "x": 1 }, "config": {} })));
    assert_eq!(
        frames[2],
        Some(json!({ "payload": { "y": 2 }, "exception": "None" }))
    );
    Ok(())
}

#[test]
fn body_lines_are_concatenated() -> Result<()> {
    let root = tempfile::tempdir()?;
    let input = "loadRemoteEvent\n{\n\"event\":\n{\"a\": [1,\n2]}\n}\n<EOC>\n<EXIT>\n";
    let (outcome, output) = run_stream(adapter_in(root.path()), input);
    outcome?;
    assert_eq!(output, "{\"a\":[1,2]}\n<EOC>\n");
    Ok(())
}

#[test]
fn empty_results_emit_only_the_terminator() -> Result<()> {
    let root = tempfile::tempdir()?;
    let input = "loadRemoteEvent\n{\"event\": {}}\n<EOC>\n<EXIT>\n";
    let (outcome, output) = run_stream(adapter_in(root.path()), input);
    outcome?;
    assert_eq!(output, "<EOC>\n");
    Ok(())
}

#[test]
fn blank_lines_before_a_command_are_ignored() -> Result<()> {
    let root = tempfile::tempdir()?;
    let input = "\n\n  load_remote_event  \n{\"event\": {\"k\": true}}\n<EOC>\n";
    let (outcome, output) = run_stream(adapter_in(root.path()), input);
    outcome?;
    assert_eq!(output, "{\"k\":true}\n<EOC>\n");
    Ok(())
}

#[test]
fn first_error_stops_the_session_without_partial_output() -> Result<()> {
    let root = tempfile::tempdir()?;
    let input = [
        "loadRemoteEvent",
        r#"{"event": {"ok": 1}}"#,
        "<EOC>",
        "loadRemoteEvent",
        r#"{"event": {"replace": {"Bucket": "b", "Key": "missing", "TargetPath": "$"}}}"#,
        "<EOC>",
        "loadRemoteEvent",
        r#"{"event": {"never": 1}}"#,
        "<EOC>",
    ]
    .join("\n");
    let (outcome, output) = run_stream(adapter_in(root.path()), &input);
    assert!(outcome.is_err());
    assert_eq!(output, "{\"ok\":1}\n<EOC>\n");
    Ok(())
}

#[test]
fn unknown_operations_are_rejected() -> Result<()> {
    let root = tempfile::tempdir()?;
    let (outcome, output) = run_stream(
        adapter_in(root.path()),
        "dropEverything\n{\"event\": {}}\n<EOC>\n",
    );
    let err = outcome.unwrap_err();
    assert_eq!(err.to_string(), "invalid input: invalid method name: dropEverything");
    assert!(output.is_empty());
    Ok(())
}

#[test]
fn exit_leaves_session_awaiting_command() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut session = StreamSession::new(
        adapter_in(root.path()),
        Cursor::new("loadRemoteEvent\n<EXIT>\n{\"event\": {}}\n<EOC>\n"),
        Vec::new(),
    );
    session.run()?;
    assert_eq!(session.state(), &StreamState::AwaitingCommand);
    assert!(session.into_output().is_empty());
    Ok(())
}

#[test]
fn stream_validates_against_envelope_schemas() -> Result<()> {
    let root = tempfile::tempdir()?;
    std::fs::create_dir_all(root.path().join("custom"))?;
    std::fs::write(
        root.path().join("custom/input.json"),
        r#"{"type": "object", "required": ["hello"]}"#,
    )?;
    let input = "loadNestedEvent\n{\"event\": {\"payload\": {}}, \"schemas\": {\"input\": \"custom/input.json\"}}\n<EOC>\n";
    let (outcome, output) = run_stream(adapter_in(root.path()), input);
    let err = outcome.unwrap_err();
    assert!(err.to_string().starts_with("input schema: "));
    assert!(output.is_empty());
    Ok(())
}

#[test]
fn single_command_writes_bare_json() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut output = Vec::new();
    single_command(
        &adapter_in(root.path()),
        "loadNestedEvent",
        Cursor::new(r#"{"event": {"payload": {"x": 1}}}"#),
        &mut output,
    )?;
    assert_eq!(String::from_utf8(output)?, r#"{"input":{"x":1},"config":{}}"#);
    Ok(())
}

#[test]
fn single_command_skips_empty_results() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut output = Vec::new();
    single_command(
        &adapter_in(root.path()),
        "loadRemoteEvent",
        Cursor::new(r#"{"event": {}}"#),
        &mut output,
    )?;
    assert!(output.is_empty());
    Ok(())
}

#[test]
fn single_command_rejects_malformed_envelopes() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut output = Vec::new();
    let err = single_command(
        &adapter_in(root.path()),
        "loadRemoteEvent",
        Cursor::new("{not json"),
        &mut output,
    )
    .unwrap_err();
    assert_eq!(err.kind().to_string(), "InputError");
    assert!(output.is_empty());
}
