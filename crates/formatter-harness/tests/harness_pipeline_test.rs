//! End-to-end tests: framed plugin responses in, printed results out.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use formatter_harness::{
    encode_frame, FixtureMemory, Harness, HarnessError, RunOptions, RunSummary, SandboxConfig,
};

const FORMAT_VARIABLE: &str = include_str!("fixtures/format_variable.wat");
const FORMAT_ARRAY: &str = include_str!("fixtures/format_array.wat");
const NO_MEMORY: &str = include_str!("fixtures/no_memory.wat");

fn module_message(src: &str) -> Value {
    let bytes = wat::parse_str(src).expect("fixture should assemble");
    json!({ "result": { "value": { "code": STANDARD.encode(bytes) } } })
}

fn framed(messages: &[Value]) -> Vec<u8> {
    messages.iter().flat_map(encode_frame).collect()
}

fn run(harness: &Harness, input: &[u8]) -> (RunSummary, String) {
    let mut out = Vec::new();
    let summary = harness.run(input, &mut out).expect("run should succeed");
    (summary, String::from_utf8(out).expect("utf-8 output"))
}

#[test]
fn test_diagnostics_then_module() {
    let input = framed(&[
        json!({ "result": ["global.c"] }),
        json!({ "result": { "name": "I", "scope": "GLOBAL", "type": "int" } }),
        module_message(FORMAT_VARIABLE),
    ]);
    let harness = Harness::new(
        SandboxConfig::default(),
        Arc::new(FixtureMemory::repeating([0, 1, 0, 0])),
    )
    .unwrap();

    let (summary, output) = run(&harness, &input);
    assert_eq!(
        output,
        concat!(
            "{\"result\":[\"global.c\"]}\n",
            "{\"result\":{\"name\":\"I\",\"scope\":\"GLOBAL\",\"type\":\"int\"}}\n",
            "Heap base: 4096\n",
            "Result at: 4096\n",
            "Result: {\"type\":\"int\",\"name\":\"I\",\"value\":\"256\"}\n",
        )
    );
    assert_eq!(
        summary,
        RunSummary {
            messages: 3,
            modules: 1,
            diagnostics: 2,
            trailing_bytes: None,
        }
    );
}

#[test]
fn test_trace_reads_and_count() {
    let input = framed(&[module_message(FORMAT_ARRAY), json!({ "id": 7 })]);
    let harness = Harness::new(
        SandboxConfig::default(),
        Arc::new(FixtureMemory::offset_low_byte()),
    )
    .unwrap()
    .options(RunOptions {
        trace_reads: true,
        count_messages: true,
    });

    let (_, output) = run(&harness, &input);
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "Got 2 responses.");
    assert_eq!(lines[1], "Heap base: 4096");
    assert_eq!(
        &lines[2..6],
        &[
            "Reading 4 bytes from offset 1024",
            "Reading 4 bytes from offset 1028",
            "Reading 4 bytes from offset 1032",
            "Reading 4 bytes from offset 1036",
        ]
    );
    assert_eq!(lines[6], "Result at: 4096");
    assert!(lines[7].starts_with(r#"Result: {"type":"int","name":"A""#));
    assert_eq!(lines[8], "{\"id\":7}");
    assert_eq!(lines.len(), 9);
}

#[test]
fn test_each_module_gets_fresh_instance() {
    let input = framed(&[
        module_message(FORMAT_VARIABLE),
        module_message(FORMAT_VARIABLE),
    ]);
    let harness = Harness::new(SandboxConfig::default(), Arc::new(FixtureMemory::zeroed()))
        .unwrap()
        .options(RunOptions {
            trace_reads: true,
            count_messages: false,
        });

    let (summary, output) = run(&harness, &input);
    assert_eq!(summary.modules, 2);
    assert_eq!(
        output.matches("Reading 4 bytes from offset 1024").count(),
        2
    );
    assert_eq!(output.matches("Heap base: 4096").count(), 2);
}

#[test]
fn test_trailing_input_is_reported() {
    let mut input = framed(&[json!({ "result": null })]);
    input.extend_from_slice(b"\r\nstray");
    let harness =
        Harness::new(SandboxConfig::default(), Arc::new(FixtureMemory::zeroed())).unwrap();

    let (summary, output) = run(&harness, &input);
    assert_eq!(
        output,
        "{\"result\":null}\nDidn't consume 7 bytes at the end of input\n"
    );
    assert_eq!(summary.trailing_bytes, Some(7));
}

#[test]
fn test_empty_input() {
    let harness =
        Harness::new(SandboxConfig::default(), Arc::new(FixtureMemory::zeroed())).unwrap();
    let (summary, output) = run(&harness, b"");
    assert_eq!(summary, RunSummary::default());
    assert!(output.is_empty());
}

#[test]
fn test_bad_base64_aborts_run() {
    let input = framed(&[
        json!({ "result": "before" }),
        json!({ "result": { "value": { "code": "abc" } } }),
        json!({ "result": "after" }),
    ]);
    let harness =
        Harness::new(SandboxConfig::default(), Arc::new(FixtureMemory::zeroed())).unwrap();

    let mut out = Vec::new();
    let err = harness.run(&input, &mut out).err().expect("should fail");
    assert!(matches!(err, HarnessError::Encoding(_)));
    assert_eq!(String::from_utf8(out).unwrap(), "{\"result\":\"before\"}\n");
}

#[test]
fn test_module_without_memory_import_aborts_run() {
    let input = framed(&[module_message(NO_MEMORY)]);
    let harness =
        Harness::new(SandboxConfig::default(), Arc::new(FixtureMemory::zeroed())).unwrap();

    let mut out = Vec::new();
    let err = harness.run(&input, &mut out).err().expect("should fail");
    assert!(matches!(err, HarnessError::MissingMemoryImport));
    assert!(out.is_empty());
}

#[test]
fn test_truncated_frame_aborts_run() {
    let mut input = framed(&[json!({ "result": 1 })]);
    input.extend_from_slice(b"Content-Length: 50\r\n\r\n{\"result\":");
    let harness =
        Harness::new(SandboxConfig::default(), Arc::new(FixtureMemory::zeroed())).unwrap();

    let mut out = Vec::new();
    let err = harness.run(&input, &mut out).err().expect("should fail");
    assert!(matches!(err, HarnessError::Framing(_)));
    assert_eq!(String::from_utf8(out).unwrap(), "{\"result\":1}\n");
}

#[test]
fn test_format_module_directly() {
    let harness = Harness::new(
        SandboxConfig::default(),
        Arc::new(FixtureMemory::repeating([42, 0, 0, 0])),
    )
    .unwrap();
    let bytes = wat::parse_str(FORMAT_VARIABLE).unwrap();

    let output = harness.format_module("direct", &bytes).unwrap();
    assert_eq!(output.heap_base, 4096);
    assert_eq!(output.text, r#"{"type":"int","name":"I","value":"42"}"#);
}
