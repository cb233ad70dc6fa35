//! Unit tests for backend invocation and failure classification.

use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::tests::MockExecutor;

#[fixture]
fn program() -> BackendProgram {
    BackendProgram::new("node", "/repo/tm.mjs", "/repo")
}

fn invoker_returning(
    program: BackendProgram,
    result: Result<ProcessOutput, ExecutionError>,
) -> BackendInvoker<MockExecutor> {
    let mut executor = MockExecutor::new();
    executor
        .expect_execute()
        .once()
        .return_once(move |_program, _invocation| result);
    BackendInvoker::new(program, executor)
}

fn sample_invocation() -> Invocation {
    Invocation::new("meta")
        .option("--coverage", "/tmp/ws/coverage.json")
        .option("--out", "/tmp/ws/compose.json")
}

#[test]
fn invocation_flattens_in_order() {
    let invocation = Invocation::new("gates")
        .positional("shipping")
        .option("--compose", "/ws/compose.json")
        .flag("--emit-events")
        .option_if_some("--overrides", None::<String>)
        .flag_if("--strict-events", false);
    assert_eq!(
        invocation.to_args(),
        ["gates", "shipping", "--compose", "/ws/compose.json", "--emit-events"]
    );
    assert_eq!(invocation.value_of("--compose"), Some("/ws/compose.json"));
    assert!(invocation.has_flag("--emit-events"));
    assert!(!invocation.has_flag("--strict-events"));
}

#[rstest]
fn success_echoes_both_streams_with_newlines(program: BackendProgram) {
    let invoker = invoker_returning(
        program,
        Ok(ProcessOutput::exited(0, "composed 3 modules", "warn: slow disk\n")),
    );
    let mut diagnostics = Vec::<u8>::new();
    let output = invoker
        .invoke(&sample_invocation(), &mut diagnostics)
        .expect("success");
    assert!(output.success());
    assert_eq!(
        String::from_utf8(diagnostics).expect("utf8"),
        "composed 3 modules\nwarn: slow disk\n"
    );
}

#[rstest]
fn success_with_silent_backend_writes_nothing(program: BackendProgram) {
    let invoker = invoker_returning(program, Ok(ProcessOutput::exited(0, "", "")));
    let mut diagnostics = Vec::<u8>::new();
    invoker
        .invoke(&sample_invocation(), &mut diagnostics)
        .expect("success");
    assert!(diagnostics.is_empty());
}

#[rstest]
fn failure_uses_backend_diagnostic(program: BackendProgram) {
    let invoker = invoker_returning(
        program,
        Ok(ProcessOutput::exited(
            3,
            "partial",
            "tm error: E_FOO first\nstack...\ntm error: e_coverage coverage is empty\n",
        )),
    );
    let mut diagnostics = Vec::<u8>::new();
    let error = invoker
        .invoke(&sample_invocation(), &mut diagnostics)
        .expect_err("failure");

    assert_eq!(error.code(), "E_COVERAGE");
    assert_eq!(error.message(), "coverage is empty");
    assert_eq!(error.exit_code(), 3);
    assert!(diagnostics.is_empty(), "failures must not echo output");

    let data = error.data().expect("data");
    assert_eq!(data.get("exit_code"), Some(&json!(3)));
    assert_eq!(data.get("stdout"), Some(&json!("partial")));
    assert_eq!(
        data.get("args"),
        Some(&json!([
            "meta",
            "--coverage",
            "/tmp/ws/coverage.json",
            "--out",
            "/tmp/ws/compose.json"
        ]))
    );
}

#[rstest]
fn failure_without_diagnostic_falls_back_to_generic_code(program: BackendProgram) {
    let invoker = invoker_returning(
        program,
        Ok(ProcessOutput::exited(9, "", "Segmentation fault")),
    );
    let error = invoker
        .invoke(&sample_invocation(), &mut Vec::<u8>::new())
        .expect_err("failure");
    assert_eq!(error.code(), codes::TM_CLI);
    assert_eq!(error.message(), "tm CLI failed with exit code 9");
    assert_eq!(error.exit_code(), 9);
    assert_eq!(
        error.data().and_then(|data| data.get("stderr")),
        Some(&json!("Segmentation fault"))
    );
}

#[rstest]
fn signal_termination_exits_with_one(program: BackendProgram) {
    let invoker = invoker_returning(
        program,
        Ok(ProcessOutput {
            status: None,
            ..ProcessOutput::default()
        }),
    );
    let error = invoker
        .invoke(&sample_invocation(), &mut Vec::<u8>::new())
        .expect_err("failure");
    assert_eq!(error.code(), codes::TM_CLI);
    assert_eq!(error.exit_code(), 1);
    assert_eq!(
        error.data().and_then(|data| data.get("exit_code")),
        Some(&Value::Null)
    );
}

#[rstest]
fn spawn_failure_is_generic_cli_error(program: BackendProgram) {
    let invoker = invoker_returning(
        program,
        Err(ExecutionError::Spawn {
            program: String::from("node"),
            source: Arc::new(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        }),
    );
    let error = invoker
        .invoke(&sample_invocation(), &mut Vec::<u8>::new())
        .expect_err("failure");
    assert_eq!(error.code(), codes::TM_CLI);
    assert_eq!(error.exit_code(), 1);
    assert!(
        error.message().contains("no such file"),
        "unexpected message: {}",
        error.message()
    );
}

#[rstest]
fn timeout_reports_deadline_and_partial_output(program: BackendProgram) {
    let invoker = invoker_returning(
        program.with_timeout(Some(Duration::from_secs(5))),
        Err(ExecutionError::Timeout {
            program: String::from("node"),
            timeout_secs: 5,
            partial: ProcessOutput {
                status: None,
                stdout: String::from("started"),
                stderr: String::new(),
            },
        }),
    );
    let error = invoker
        .invoke(&sample_invocation(), &mut Vec::<u8>::new())
        .expect_err("failure");
    assert_eq!(error.code(), codes::TM_TIMEOUT);
    let data = error.data().expect("data");
    assert_eq!(data.get("timeout_secs"), Some(&json!(5)));
    assert_eq!(data.get("stdout"), Some(&json!("started")));
}

#[test]
fn program_from_config_resolves_paths() {
    let config = Config {
        node_bin: Some(String::from("bun")),
        repo_root: Some(Utf8PathBuf::from("checkout")),
        timeout_secs: Some(12),
        ..Config::default()
    };
    let program = BackendProgram::from_config(&config, Utf8Path::new("/work"));
    assert_eq!(program.node_bin(), "bun");
    assert_eq!(program.repo_root(), Utf8Path::new("/work/checkout"));
    assert_eq!(program.entrypoint(), Utf8Path::new("/work/checkout/tm.mjs"));
    assert_eq!(program.timeout(), Some(Duration::from_secs(12)));
}
