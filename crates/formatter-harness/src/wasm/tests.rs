//! Tests for the formatter sandbox.

use super::*;
use crate::error::HarnessError;
use crate::inferior::FixtureMemory;
use std::sync::Arc;

const MINIMAL_FORMATTER: &str = r#"
(module
  (import "env" "memory" (memory 1))
  (global (export "__heap_base") i32 (i32.const 2048))
  (data (i32.const 2048) "ok\00")
  (func (export "wasm_format") (result i32)
    i32.const 2048))
"#;

#[test]
fn test_sandbox_config_default() {
    let config = SandboxConfig::default();
    assert_eq!(config.initial_pages, 1);
    assert_eq!(config.max_pages, 256);
    assert!(config.static_sizing);
    assert_eq!(config.base_offset, 1024);
    assert!(config.fuel_limit.is_none());
    assert_eq!(config.max_memory_bytes(), 16 * 1024 * 1024);
}

#[test]
fn test_sandbox_config_strict() {
    let config = SandboxConfig::strict();
    assert!(!config.static_sizing);
    assert_eq!(config.max_pages, 16);
    assert!(config.fuel_limit.is_some());
}

#[test]
fn test_module_abi_default() {
    let abi = ModuleAbi::default();
    assert_eq!(abi.import_module, "env");
    assert_eq!(abi.read_memory, "__getMemory");
    assert_eq!(abi.debug, "__debug");
    assert_eq!(abi.sbrk, "sbrk");
    assert_eq!(abi.heap_base, "__heap_base");
    assert_eq!(abi.format, "wasm_format");
    assert_eq!(abi.result_encoding, ResultEncoding::NullTerminated);
}

#[test]
fn test_config_builder_chain() {
    let config = SandboxConfig::default()
        .initial_pages(2)
        .max_pages(8)
        .static_sizing(false)
        .base_offset(32768)
        .fuel_limit(500_000)
        .optimize(7)
        .abi(ModuleAbi::default().format_export("format"));

    assert_eq!(config.initial_pages, 2);
    assert_eq!(config.max_pages, 8);
    assert!(!config.static_sizing);
    assert_eq!(config.base_offset, 32768);
    assert_eq!(config.fuel_limit, Some(500_000));
    assert_eq!(config.optimization_level, 3);
    assert_eq!(config.abi.format, "format");
}

#[test]
fn test_config_validation() {
    assert!(SandboxConfig::default().initial_pages(0).validate().is_err());
    assert!(SandboxConfig::default()
        .initial_pages(4)
        .max_pages(2)
        .validate()
        .is_err());
    assert!(FormatterSandbox::new(SandboxConfig::default().initial_pages(0)).is_err());
}

#[test]
fn test_config_from_json_uses_defaults() {
    let config: SandboxConfig =
        serde_json::from_str(r#"{"initial_pages": 2, "abi": {"format": "fmt"}}"#).unwrap();
    assert_eq!(config.initial_pages, 2);
    assert_eq!(config.max_pages, 256);
    assert_eq!(config.abi.format, "fmt");
    assert_eq!(config.abi.heap_base, "__heap_base");
}

#[test]
fn test_sandbox_creation() {
    assert!(FormatterSandbox::new(SandboxConfig::default()).is_ok());
    assert!(FormatterSandbox::new(SandboxConfig::development()).is_ok());
}

#[test]
fn test_memory_import_discovery() {
    let sandbox = FormatterSandbox::new(SandboxConfig::default()).unwrap();
    let module = sandbox
        .load_module_bytes("minimal", MINIMAL_FORMATTER.as_bytes())
        .unwrap();

    let import = module.memory_import().expect("memory import");
    assert_eq!(import.module, "env");
    assert_eq!(import.name, "memory");
    assert_eq!(import.minimum, 1);
    assert_eq!(import.maximum, None);
    assert_eq!(module.exports().collect::<Vec<_>>(), vec!["wasm_format"]);
}

#[test]
fn test_module_listing_kinds() {
    let sandbox = FormatterSandbox::new(SandboxConfig::default()).unwrap();
    let module = sandbox
        .load_module_bytes("minimal", MINIMAL_FORMATTER.as_bytes())
        .unwrap();

    assert_eq!(module.name(), "minimal");
    assert_eq!(
        module.imports(),
        vec![("env".to_string(), "memory".to_string(), "memory")]
    );
    assert_eq!(
        module.export_kinds(),
        vec![
            ("__heap_base".to_string(), "global"),
            ("wasm_format".to_string(), "func"),
        ]
    );
}

#[test]
fn test_minimal_formatter_runs() {
    let sandbox = FormatterSandbox::new(SandboxConfig::default()).unwrap();
    let module = sandbox
        .load_module_bytes("minimal", MINIMAL_FORMATTER.as_bytes())
        .unwrap();
    let mut instance = sandbox
        .instantiate(&module, Arc::new(FixtureMemory::zeroed()))
        .unwrap();

    assert_eq!(instance.heap_base(), 2048);
    assert_eq!(instance.convention(), FormatConvention::ReturnsOffset);
    let output = instance.format().unwrap().value;
    assert_eq!(output.result_offset, 2048);
    assert_eq!(output.text, "ok");
    assert!(instance.memory_reads().is_empty());
}

#[test]
fn test_compile_error() {
    let sandbox = FormatterSandbox::new(SandboxConfig::default()).unwrap();
    let err = sandbox
        .load_module_bytes("junk", b"\0asm\x07\0\0\0")
        .err()
        .expect("should fail");
    assert!(matches!(err, HarnessError::Compile(_)));
}

#[test]
fn test_missing_heap_base_export() {
    let sandbox = FormatterSandbox::new(SandboxConfig::default()).unwrap();
    let module = sandbox
        .load_module_bytes(
            "no_heap_base",
            br#"(module
                  (import "env" "memory" (memory 1))
                  (func (export "wasm_format") (result i32) i32.const 0))"#,
        )
        .unwrap();
    let err = sandbox
        .instantiate(&module, Arc::new(FixtureMemory::zeroed()))
        .err()
        .expect("should fail");
    assert!(matches!(err, HarnessError::MissingExport(_)));
}

#[test]
fn test_unsupported_format_signature() {
    let sandbox = FormatterSandbox::new(SandboxConfig::default()).unwrap();
    let module = sandbox
        .load_module_bytes(
            "bad_signature",
            br#"(module
                  (import "env" "memory" (memory 1))
                  (global (export "__heap_base") i32 (i32.const 0))
                  (func (export "wasm_format") (param f64)))"#,
        )
        .unwrap();
    let err = sandbox
        .instantiate(&module, Arc::new(FixtureMemory::zeroed()))
        .err()
        .expect("should fail");
    assert!(err.to_string().contains("unsupported signature"));
}
