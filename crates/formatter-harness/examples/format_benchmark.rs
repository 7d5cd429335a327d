//! Formatter Sandbox Benchmarks
//!
//! Run with: cargo run -p formatter-harness --example format_benchmark --release

use formatter_harness::{FixtureMemory, FormatterModule, FormatterSandbox, SandboxConfig};
use std::sync::Arc;
use std::time::Instant;

const FORMAT_ARRAY: &str = include_str!("../tests/fixtures/format_array.wat");
const LARGE_MEMORY: &str = include_str!("../tests/fixtures/large_memory.wat");

fn main() {
    println!("=== Formatter Sandbox Benchmarks ===\n");

    bench_module_loading();
    bench_instantiation();
    bench_format_calls();
    bench_with_fuel_metering();

    println!("\n=== Benchmark Complete ===");
}

fn load(sandbox: &FormatterSandbox, name: &str, src: &str) -> FormatterModule {
    let bytes = wat::parse_str(src).unwrap();
    sandbox.load_module_bytes(name, &bytes).unwrap()
}

fn bench_module_loading() {
    println!("## Module Loading");

    let sandbox = FormatterSandbox::new(SandboxConfig::default()).unwrap();
    let bytes = wat::parse_str(FORMAT_ARRAY).unwrap();

    // Warm up
    let _ = sandbox.load_module_bytes("array", &bytes).unwrap();

    let mut times = Vec::new();
    for _ in 0..100 {
        let start = Instant::now();
        let _ = sandbox.load_module_bytes("array", &bytes).unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }

    print_stats("load_module_bytes", &times);
    println!();
}

fn bench_instantiation() {
    println!("## Instantiation");

    let inferior = Arc::new(FixtureMemory::zeroed());

    for (label, static_sizing) in [("static sizing", true), ("resize on failure", false)] {
        let sandbox =
            FormatterSandbox::new(SandboxConfig::default().static_sizing(static_sizing)).unwrap();
        let module = load(&sandbox, "large", LARGE_MEMORY);

        let mut times = Vec::new();
        for _ in 0..100 {
            let start = Instant::now();
            let instance = sandbox.instantiate(&module, inferior.clone()).unwrap();
            times.push(start.elapsed().as_micros() as u64);
            assert_eq!(instance.was_resized(), !static_sizing);
        }
        print_stats(label, &times);
    }
    println!();
}

fn bench_format_calls() {
    println!("## Format Calls");

    let sandbox = FormatterSandbox::new(SandboxConfig::default()).unwrap();
    let module = load(&sandbox, "array", FORMAT_ARRAY);
    let mut instance = sandbox
        .instantiate(&module, Arc::new(FixtureMemory::offset_low_byte()))
        .unwrap();

    // Warm up
    for _ in 0..100 {
        let _ = instance.format().unwrap();
    }

    let mut times = Vec::new();
    for _ in 0..1000 {
        times.push(instance.format().unwrap().execution_time_us);
    }

    print_stats("format", &times);
    println!("  reads serviced: {}", instance.memory_reads().len());
    println!();
}

fn bench_with_fuel_metering() {
    println!("## Fuel Metering");

    let sandbox = FormatterSandbox::new(SandboxConfig::default().fuel_limit(u64::MAX / 2)).unwrap();
    let module = load(&sandbox, "array", FORMAT_ARRAY);
    let mut instance = sandbox
        .instantiate(&module, Arc::new(FixtureMemory::offset_low_byte()))
        .unwrap();

    let mut times = Vec::new();
    let mut fuel = 0;
    for _ in 0..1000 {
        let call = instance.format().unwrap();
        times.push(call.execution_time_us);
        fuel = call.fuel_consumed.unwrap_or(0);
    }

    print_stats("format (metered)", &times);
    println!("  fuel per call: {}", fuel);
    println!();
}

fn print_stats(name: &str, times: &[u64]) {
    if times.is_empty() {
        println!("  {}: no samples", name);
        return;
    }

    let mut sorted = times.to_vec();
    sorted.sort_unstable();

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mean = times.iter().sum::<u64>() as f64 / times.len() as f64;
    let p50 = sorted[sorted.len() / 2];
    let p99 = sorted[(sorted.len() * 99) / 100];

    println!(
        "  {}: n={} min={}us mean={:.1}us p50={}us p99={}us max={}us",
        name,
        times.len(),
        min,
        mean,
        p50,
        p99,
        max
    );
}
