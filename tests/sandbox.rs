//! Integration tests for Python execution in the hakoniwa sandbox.
//!
//! Note: These tests require a Linux system with:
//! - Unprivileged user namespaces enabled
//! - python3 at /usr/bin/python3 with pandas, numpy and matplotlib installed
//!
//! They are ignored by default; run with `cargo test -- --ignored`.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tempfile::TempDir;

use tabular_data_mcp::libraries::LibraryRegistry;
use tabular_data_mcp::sandbox::{
    CodeSandbox, ExecutionRequest, ExecutionResult, PythonSandbox, SandboxConfig,
};

fn sandbox(config: SandboxConfig) -> PythonSandbox {
    PythonSandbox::new(config).expect("Failed to create sandbox")
}

fn run(sandbox: &PythonSandbox, data: &TempDir, code: &str) -> ExecutionResult {
    let request =
        ExecutionRequest::new(code, data.path()).with_libraries(&LibraryRegistry::builtin());
    sandbox.execute(&request).expect("sandbox should run the code")
}

fn assert_success(result: &ExecutionResult, context: &str) {
    assert!(
        result.success,
        "{} failed.\nstdout:\n{}\nstderr:\n{}",
        context, result.stdout, result.stderr
    );
}

fn data_dir() -> TempDir {
    TempDir::new().expect("failed to create temp dir")
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_print_hello() {
    let data = data_dir();
    let result = run(&sandbox(SandboxConfig::default()), &data, "print('hi')");

    assert_success(&result, "print");
    assert_eq!(result.stdout, "hi\n");
    assert!(result.stderr.is_empty(), "unexpected stderr: {}", result.stderr);
    assert!(result.artifacts.is_empty());
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_preloaded_pandas_reads_csv_from_data_dir() {
    let data = data_dir();
    fs::write(data.path().join("sales.csv"), "region,revenue\nnorth,10\nsouth,32\n")
        .expect("write");

    let result = run(
        &sandbox(SandboxConfig::default()),
        &data,
        "df = pd.read_csv('sales.csv')\nprint(int(df['revenue'].sum()))",
    );

    assert_success(&result, "pandas");
    assert_eq!(result.stdout, "42\n");
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_import_outside_allow_list_fails() {
    let data = data_dir();
    let result = run(&sandbox(SandboxConfig::default()), &data, "import os");

    assert!(!result.success);
    assert!(
        result.stderr.contains("not permitted"),
        "stderr should explain the denied import: {}",
        result.stderr
    );
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_permitted_import_statement_works() {
    let data = data_dir();
    let result = run(
        &sandbox(SandboxConfig::default()),
        &data,
        "import statistics\nprint(statistics.mean([1, 2, 3]))",
    );

    assert_success(&result, "import statistics");
    assert_eq!(result.stdout.trim(), "2");
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_exception_keeps_partial_output() {
    let data = data_dir();
    let result = run(
        &sandbox(SandboxConfig::default()),
        &data,
        "print('before')\nraise ValueError('boom')",
    );

    assert!(!result.success);
    assert_eq!(result.stdout, "before\n");
    assert!(result.stderr.contains("ValueError: boom"), "{}", result.stderr);
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_data_dir_is_read_only() {
    let data = data_dir();
    let result = run(
        &sandbox(SandboxConfig::default()),
        &data,
        "open('out.csv', 'w').write('x')",
    );

    assert!(!result.success);
    assert!(!data.path().join("out.csv").exists());
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_figures_become_png_artifacts() {
    let data = data_dir();
    let result = run(
        &sandbox(SandboxConfig::default()),
        &data,
        "plt.plot([1, 2, 3], [3, 1, 2])\nplt.title('trend')",
    );

    assert_success(&result, "matplotlib");
    assert_eq!(result.artifacts.len(), 1);
    let artifact = &result.artifacts[0];
    assert_eq!(artifact.name, "figure_01.png");
    assert_eq!(artifact.mime_type, "image/png");
    let bytes = STANDARD.decode(&artifact.data).expect("valid base64");
    assert!(bytes.starts_with(b"\x89PNG"));
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_timeout_kills_and_reports() {
    let data = data_dir();
    let config = SandboxConfig::default().with_timeout(Duration::from_secs(1));
    let result = run(
        &sandbox(config),
        &data,
        "print('started', flush=True)\nwhile True:\n    pass",
    );

    assert!(!result.success);
    assert_eq!(result.stdout, "started\n");
    assert!(result.stderr.contains("timed out"), "{}", result.stderr);
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_large_output_is_truncated() {
    let data = data_dir();
    let config = SandboxConfig::default().with_max_output_bytes(1024);
    let result = run(&sandbox(config), &data, "print('x' * 100000)");

    assert_success(&result, "large output");
    assert!(result.stdout.len() < 2048);
    assert!(result.stdout.contains("output truncated"));
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_no_network_access() {
    let data = data_dir();
    // socket is not on the allow-list, so go through a permitted library's internals.
    let result = run(
        &sandbox(SandboxConfig::default()),
        &data,
        "pd.read_csv('http://example.com/data.csv')",
    );

    assert!(!result.success);
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_executions_are_independent() {
    let data = data_dir();
    let sandbox = sandbox(SandboxConfig::default());

    assert_success(&run(&sandbox, &data, "leftover = 1"), "define");
    let result = run(&sandbox, &data, "print(leftover)");
    assert!(!result.success);
    assert!(result.stderr.contains("NameError"), "{}", result.stderr);
}

#[test]
#[ignore = "requires unprivileged user namespaces and python3"]
fn test_concurrent_executions() {
    let data = Arc::new(data_dir());
    let sandbox = Arc::new(sandbox(SandboxConfig::default()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let data = Arc::clone(&data);
            let sandbox = Arc::clone(&sandbox);
            thread::spawn(move || run(&sandbox, &data, &format!("print({i} * 10)")))
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().expect("thread panicked");
        assert_success(&result, &format!("worker {i}"));
        assert_eq!(result.stdout, format!("{}\n", i * 10));
    }
}
