//! End-to-end tests that run a scripted backend through [`ProcessExecutor`].
//!
//! The scripts stand in for `tm.mjs` and are run with `sh`, so these tests
//! only build on Unix hosts.
#![cfg(unix)]

use std::fs;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;
use tm_bridge::{
    BackendInvoker, BackendProgram, Command, Dispatcher, JsonObject, ModulesRootSources,
    ProcessExecutor, Response, codes,
};

const BACKEND_SCRIPT: &str = r#"
cmd="$1"
shift
out=""
events=""
while [ $# -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift 2 ;;
    --events-out) events="$2"; shift 2 ;;
    *) shift ;;
  esac
done
case "$cmd" in
  meta)
    printf '{"modules":["core","extra"]}' > "$out"
    echo "meta finished"
    ;;
  compose)
    mkdir -p "$out"
    printf '{"winner":"core","score":7}' > "$out/report.json"
    ;;
  gates)
    printf '{"seq":1}\n{"seq":2}\n' > "$events"
    echo "tm error: E_GATE_FAILED two gates failed" >&2
    exit 3
    ;;
esac
"#;

const STALLING_SCRIPT: &str = r#"
cmd="$1"
shift
events=""
while [ $# -gt 0 ]; do
  case "$1" in
    --events-out) events="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ -n "$events" ]; then
  printf '{"seq":1}\n' > "$events"
fi
exec sleep 5
"#;

const DETACHING_SCRIPT: &str = r#"
cmd="$1"
shift
events=""
while [ $# -gt 0 ]; do
  case "$1" in
    --events-out) events="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '{"seq":1}\n' > "$events"
sleep 4 &
wait
"#;

struct Harness {
    _repo: TempDir,
    _temp_root: TempDir,
    dispatcher: Dispatcher<ProcessExecutor>,
}

fn utf8(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp path")
}

fn harness_with(script: &str, timeout: Option<Duration>) -> Harness {
    let repo = TempDir::new().expect("repo dir");
    let temp_root = TempDir::new().expect("temp root");
    let repo_root = utf8(&repo);
    fs::create_dir(repo_root.join("modules")).expect("modules dir");
    fs::write(repo_root.join("tm.sh"), script).expect("write backend script");

    let program = BackendProgram::new("sh", repo_root.join("tm.sh"), repo_root)
        .with_timeout(timeout);
    let sources = ModulesRootSources {
        cli_override: Some(String::from("modules")),
        ..ModulesRootSources::default()
    };
    let dispatcher = Dispatcher::new(BackendInvoker::new(program, ProcessExecutor), sources)
        .with_temp_root(utf8(&temp_root));
    Harness {
        _repo: repo,
        _temp_root: temp_root,
        dispatcher,
    }
}

#[fixture]
fn backend() -> Harness {
    harness_with(BACKEND_SCRIPT, None)
}

fn payload(value: Value) -> JsonObject {
    match value {
        Value::Object(object) => object,
        other => panic!("expected object, got {other}"),
    }
}

#[rstest]
fn meta_returns_the_written_compose_and_echoes_chatter(backend: Harness) {
    let mut diagnostics = Vec::<u8>::new();
    let response = backend
        .dispatcher
        .dispatch(
            Command::Meta,
            &payload(json!({"coverage": {"core": 1}})),
            &mut diagnostics,
        )
        .expect("meta succeeds");

    assert_eq!(
        response,
        Response::Meta {
            compose: json!({"modules": ["core", "extra"]})
        }
    );
    assert_eq!(
        String::from_utf8(diagnostics).expect("utf8 diagnostics"),
        "meta finished\n"
    );
}

#[rstest]
fn compose_reads_the_report_from_the_winner_directory(backend: Harness) {
    let response = backend
        .dispatcher
        .dispatch(
            Command::Compose,
            &payload(json!({"compose": {"modules": ["core"]}})),
            &mut Vec::<u8>::new(),
        )
        .expect("compose succeeds");

    assert_eq!(
        response,
        Response::Compose {
            report: json!({"winner": "core", "score": 7})
        }
    );
}

#[rstest]
fn failing_gates_surface_the_backend_code_with_salvaged_events(backend: Harness) {
    let error = backend
        .dispatcher
        .dispatch(
            Command::Gates,
            &payload(json!({"compose": {"modules": ["core"]}, "mode": "conceptual"})),
            &mut Vec::<u8>::new(),
        )
        .expect_err("gates fail");

    assert_eq!(error.code(), "E_GATE_FAILED");
    assert_eq!(error.message(), "two gates failed");
    assert_eq!(error.exit_code(), 3);
    let data = error.data().expect("error data");
    assert_eq!(data.get("pass"), Some(&json!(false)));
    assert_eq!(data.get("events"), Some(&json!([{"seq": 1}, {"seq": 2}])));
    assert_eq!(data.get("exit_code"), Some(&json!(3)));
}

#[test]
fn missing_runtime_is_reported_as_a_cli_failure() {
    let repo_root = Utf8PathBuf::from("/");
    let program = BackendProgram::new(
        "tm-bridge-definitely-missing-runtime",
        repo_root.join("tm.mjs"),
        repo_root,
    );
    let dispatcher = Dispatcher::new(
        BackendInvoker::new(program, ProcessExecutor),
        ModulesRootSources::default(),
    );

    let error = dispatcher
        .dispatch(
            Command::Meta,
            &payload(json!({"coverage": {}})),
            &mut Vec::<u8>::new(),
        )
        .expect_err("spawn fails");
    assert_eq!(error.code(), codes::TM_CLI);
    assert!(error.data().is_some_and(|data| data.contains_key("error")));
}

#[test]
fn stalled_gates_time_out_and_keep_partial_events() {
    let harness = harness_with(STALLING_SCRIPT, Some(Duration::from_millis(300)));
    let error = harness
        .dispatcher
        .dispatch(
            Command::Gates,
            &payload(json!({"compose": {"modules": ["core"]}})),
            &mut Vec::<u8>::new(),
        )
        .expect_err("gates time out");

    assert_eq!(error.code(), codes::TM_TIMEOUT);
    let data = error.data().expect("error data");
    assert_eq!(data.get("exit_code"), Some(&Value::Null));
    assert_eq!(data.get("pass"), Some(&json!(false)));
    assert_eq!(data.get("events"), Some(&json!([{"seq": 1}])));
}

#[test]
fn background_children_do_not_outlive_the_deadline() {
    let harness = harness_with(DETACHING_SCRIPT, Some(Duration::from_millis(300)));
    let started = Instant::now();
    let error = harness
        .dispatcher
        .dispatch(
            Command::Gates,
            &payload(json!({"compose": {"modules": ["core"]}})),
            &mut Vec::<u8>::new(),
        )
        .expect_err("gates time out");

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "took {:?}",
        started.elapsed()
    );
    assert_eq!(error.code(), codes::TM_TIMEOUT);
    let data = error.data().expect("error data");
    assert_eq!(data.get("events"), Some(&json!([{"seq": 1}])));
}
