//! Tests for incremental stream-json decoding.

use claude_runner::cli::{AgentMessage, StreamError, StreamEvent, StreamParser};

const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"sess-1","model":"claude-sonnet","tools":["Read","Bash"]}"#;
const HELLO: &str = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Hello"}]}}"#;
const RESULT: &str = r#"{"type":"result","subtype":"success","is_error":false,"num_turns":1,"result":"Hello","total_cost_usd":0.01}"#;

fn messages(events: &[StreamEvent]) -> Vec<&AgentMessage> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Message(m) => Some(m),
            _ => None,
        })
        .collect()
}

fn errors(events: &[StreamEvent]) -> Vec<&StreamError> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Error(err) => Some(err),
            _ => None,
        })
        .collect()
}

fn token_limits(events: &[StreamEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, StreamEvent::TokenLimit))
        .count()
}

fn decode_in_chunks(input: &[u8], split_at: &[usize]) -> Vec<StreamEvent> {
    let mut parser = StreamParser::new();
    let mut events = Vec::new();
    let mut start = 0;
    for &end in split_at {
        events.extend(parser.feed(&input[start..end]));
        start = end;
    }
    events.extend(parser.feed(&input[start..]));
    events.extend(parser.finish());
    events
}

#[test]
fn chunk_boundaries_do_not_change_events() {
    let input = format!("{INIT}\n{HELLO}\n{RESULT}\n");
    let bytes = input.as_bytes();
    let whole = decode_in_chunks(bytes, &[]);
    assert_eq!(messages(&whole).len(), 3);

    for split in 1..bytes.len() {
        let events = decode_in_chunks(bytes, &[split]);
        assert_eq!(events, whole, "split at byte {split} changed the events");
    }
}

#[test]
fn byte_at_a_time_matches_single_feed() {
    let input = format!("{INIT}\r\n{HELLO}\r\n{RESULT}");
    let bytes = input.as_bytes();
    let whole = decode_in_chunks(bytes, &[]);
    let splits: Vec<usize> = (1..bytes.len()).collect();
    assert_eq!(decode_in_chunks(bytes, &splits), whole);
}

#[test]
fn partial_line_is_held_until_newline() {
    let mut parser = StreamParser::new();
    let (head, tail) = HELLO.split_at(20);

    assert!(parser.feed(head).is_empty());
    assert_eq!(parser.pending_len(), head.len());

    let events = parser.feed(format!("{tail}\n"));
    assert_eq!(messages(&events).len(), 1);
    assert_eq!(parser.pending_len(), 0);
}

#[test]
fn finish_flushes_trailing_line_and_is_idempotent() {
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{INIT}\r\n{HELLO}"));
    assert_eq!(messages(&events).len(), 1);

    let flushed = parser.finish();
    assert_eq!(messages(&flushed).len(), 1);
    assert!(parser.finish().is_empty());
    assert_eq!(parser.pending_len(), 0);
}

#[test]
fn crlf_framing_decodes_every_message() {
    let mut parser = StreamParser::new();
    let mut events = parser.feed(format!("{INIT}\r\n{HELLO}\r\n"));
    events.extend(parser.feed(RESULT));
    events.extend(parser.finish());

    assert_eq!(messages(&events).len(), 3);
    assert!(errors(&events).is_empty());
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Result(r) if r.num_turns == Some(1))));
}

#[test]
fn malformed_line_is_reported_and_decoding_continues() {
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{{ bad\n{HELLO}\n"));

    let errs = errors(&events);
    assert_eq!(errs.len(), 1);
    assert!(matches!(
        errs[0],
        StreamError::ParseError { input, .. } if input == "{ bad"
    ));
    assert_eq!(messages(&events).len(), 1);
}

#[test]
fn blank_lines_are_ignored() {
    let mut parser = StreamParser::new();
    let events = parser.feed("\n  \r\n\n");
    assert!(events.is_empty());
}

#[test]
fn raw_lines_are_reported_before_messages() {
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{HELLO}\n"));
    assert!(matches!(&events[0], StreamEvent::Line(line) if line == HELLO));
    assert!(matches!(&events[1], StreamEvent::Message(AgentMessage::Assistant(_))));
}

#[test]
fn assistant_blocks_become_text_and_tool_events() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Reading"},{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"/tmp/x"}}]}}"#;
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{line}\n"));

    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Text(t) if t == "Reading")));
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::ToolUse { name, input } if name == "Read" && input["file_path"] == "/tmp/x"
    )));
    assert_eq!(parser.last_assistant_text(), Some("Reading"));
}

#[test]
fn end_turn_carries_last_non_empty_text() {
    let first = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"First part"}]}}"#;
    let second = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Second part"}]}}"#;
    let done = r#"{"type":"assistant","message":{"content":[],"stop_reason":"end_turn"}}"#;

    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{first}\n{second}\n{done}\n"));

    let end_turns: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::EndTurn(text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(end_turns, vec!["Second part"]);
}

#[test]
fn end_turn_on_the_message_carrying_the_text() {
    let first = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"First part"}]}}"#;
    let second = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Second part"}],"stop_reason":"end_turn"}}"#;

    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{first}\n{second}\n"));

    let end_turns: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::EndTurn(text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(end_turns, vec!["Second part"]);
    assert_eq!(parser.last_assistant_text(), Some("Second part"));
}

#[test]
fn configured_session_id_is_injected() {
    let mut parser = StreamParser::with_session_id("cfg-1");
    let events = parser.feed(format!("{HELLO}\n"));
    assert_eq!(messages(&events)[0].session_id(), Some("cfg-1"));
}

#[test]
fn existing_session_id_is_preserved() {
    let mut parser = StreamParser::with_session_id("cfg-1");
    let events = parser.feed(format!("{INIT}\n"));
    assert_eq!(messages(&events)[0].session_id(), Some("sess-1"));
}

#[test]
fn init_session_id_is_adopted_within_one_chunk() {
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{INIT}\n{HELLO}\n"));
    let msgs = messages(&events);
    assert_eq!(msgs[1].session_id(), Some("sess-1"));
    assert_eq!(parser.session_id(), Some("sess-1"));
}

#[test]
fn token_limit_is_reported_once() {
    let lines = [
        r#"{"type":"error","message":"Prompt is too long: 210000 tokens"}"#,
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Prompt is too long"}]}}"#,
        r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"prompt is too long"}"#,
    ];
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{}\n", lines.join("\n")));

    assert_eq!(token_limits(&events), 1);
    assert!(parser.token_limit_hit());
    // A token-limit error is not also reported as an agent error.
    assert!(errors(&events).is_empty());
}

#[test]
fn token_limit_from_nested_error_object() {
    let line = r#"{"type":"user","error":{"message":"PROMPT IS TOO LONG"}}"#;
    let mut parser = StreamParser::new();
    assert_eq!(token_limits(&parser.feed(format!("{line}\n"))), 1);
}

#[test]
fn token_limit_from_tool_error() {
    let line = r#"{"type":"tool-error","error":"prompt is too long for this tool","tool":"Read"}"#;
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{line}\n"));
    assert_eq!(token_limits(&events), 1);
    assert!(matches!(messages(&events)[0], AgentMessage::ToolError(_)));
}

#[test]
fn token_limit_text_is_not_remembered() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Prompt is too long"}],"stop_reason":"end_turn"}}"#;
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{HELLO}\n{line}\n"));

    assert_eq!(parser.last_assistant_text(), Some("Hello"));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::EndTurn(_))));
}

#[test]
fn reset_clears_latch_and_buffer() {
    let mut parser = StreamParser::with_session_id("old");
    parser.feed(r#"{"type":"error","message":"prompt is too long"}"#.to_string() + "\n");
    parser.feed("{\"type\":");
    assert!(parser.token_limit_hit());

    parser.reset();
    assert!(!parser.token_limit_hit());
    assert_eq!(parser.pending_len(), 0);
    assert_eq!(parser.session_id(), Some("old"));
    assert!(parser.last_assistant_text().is_none());

    let events = parser.feed(r#"{"type":"error","message":"prompt is too long"}"#.to_string() + "\n");
    assert_eq!(token_limits(&events), 1);
}

#[test]
fn agent_and_tool_errors_are_reported() {
    let agent = r#"{"type":"error","message":"overloaded"}"#;
    let tool = r#"{"type":"tool_error","error":"permission denied","tool":"Bash"}"#;
    let mut parser = StreamParser::new();
    let events = parser.feed(format!("{agent}\n{tool}\n"));

    let errs = errors(&events);
    assert_eq!(errs.len(), 2);
    assert!(matches!(errs[0], StreamError::Agent(e) if e.description() == "overloaded"));
    assert!(matches!(errs[1], StreamError::Tool(e) if e.tool.as_deref() == Some("Bash")));
}

#[test]
fn unknown_types_are_passed_through() {
    let mut parser = StreamParser::new();
    let events = parser.feed("{\"type\":\"stream_event\",\"data\":1}\n");
    assert!(matches!(messages(&events)[0], AgentMessage::Unknown));
    assert!(errors(&events).is_empty());
}
