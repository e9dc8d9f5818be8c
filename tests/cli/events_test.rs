//! Tests for stream-json message types.

use claude_runner::cli::{AgentMessage, ContentBlock, StreamParser, UserContent};

#[test]
fn system_init_fields() {
    let line = r#"{"type":"system","subtype":"init","session_id":"abc","cwd":"/work","tools":["Read"],"mcp_servers":[{"name":"fs","status":"connected"}],"model":"claude-sonnet","permissionMode":"default"}"#;
    let msg = StreamParser::parse_line(line).unwrap();

    let AgentMessage::System(system) = msg else {
        panic!("Expected System, got {msg:?}");
    };
    assert!(system.is_init());
    assert_eq!(system.cwd.as_deref(), Some("/work"));
    assert_eq!(system.tools, vec!["Read"]);
    assert_eq!(system.mcp_servers[0].name, "fs");
    assert_eq!(system.permission_mode.as_deref(), Some("default"));
}

#[test]
fn result_accepts_legacy_cost_field() {
    let line = r#"{"type":"result","subtype":"error_max_turns","is_error":true,"cost_usd":0.5,"num_turns":10}"#;
    let AgentMessage::Result(result) = StreamParser::parse_line(line).unwrap() else {
        panic!("Expected Result");
    };
    assert!(result.is_max_turns());
    assert_eq!(result.total_cost_usd, Some(0.5));
    assert_eq!(result.num_turns, Some(10));
}

#[test]
fn user_tool_result_blocks() {
    let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok","is_error":false}]}}"#;
    let AgentMessage::User(user) = StreamParser::parse_line(line).unwrap() else {
        panic!("Expected User");
    };
    let UserContent::Blocks(blocks) = user.message.content else {
        panic!("Expected blocks");
    };
    assert!(matches!(
        &blocks[0],
        ContentBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "t1"
    ));
}

#[test]
fn user_plain_text_content() {
    let line = r#"{"type":"user","message":{"role":"user","content":"hi"}}"#;
    let AgentMessage::User(user) = StreamParser::parse_line(line).unwrap() else {
        panic!("Expected User");
    };
    assert_eq!(user.message.content, UserContent::Text("hi".to_string()));
}

#[test]
fn unknown_content_block_is_tolerated() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"server_tool_use","id":"x"},{"type":"text","text":"ok"}]}}"#;
    let AgentMessage::Assistant(assistant) = StreamParser::parse_line(line).unwrap() else {
        panic!("Expected Assistant");
    };
    assert_eq!(assistant.message.content[0], ContentBlock::Unknown);
    assert_eq!(assistant.text(), "ok");
}

#[test]
fn only_result_is_terminal() {
    let result = StreamParser::parse_line(r#"{"type":"result","subtype":"success"}"#).unwrap();
    let error = StreamParser::parse_line(r#"{"type":"error","message":"x"}"#).unwrap();
    assert!(result.is_terminal());
    assert!(!error.is_terminal());
    assert_eq!(error.kind(), "error");
}

#[test]
fn user_turn_round_trips_through_decoder() {
    let line = serde_json::to_string(&AgentMessage::user_turn("next step")).unwrap();
    let parsed = StreamParser::parse_line(&line).unwrap();
    assert_eq!(parsed, AgentMessage::user_turn("next step"));
}
