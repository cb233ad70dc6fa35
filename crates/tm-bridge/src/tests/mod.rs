//! Crate-level test doubles and behaviour tests.

use std::fs;
use std::path::Path;

use mockall::mock;

use crate::invoker::{BackendExecutor, BackendProgram, ExecutionError, Invocation, ProcessOutput};


mock! {
    pub Executor {}
    impl BackendExecutor for Executor {
        fn execute(
            &self,
            program: &BackendProgram,
            invocation: &Invocation,
        ) -> Result<ProcessOutput, ExecutionError>;
    }
}

/// Writes `contents` to the path passed with `flag`, as the backend would.
pub(crate) fn write_flag_target(invocation: &Invocation, flag: &str, contents: &str) {
    let target = invocation
        .value_of(flag)
        .unwrap_or_else(|| panic!("invocation is missing {flag}"));
    write_file(Path::new(target), contents);
}

/// Writes `contents` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create artifact parent");
    }
    fs::write(path, contents).expect("write artifact");
}

/// Reads the JSON request artifact passed with `flag`.
pub(crate) fn read_flag_target(invocation: &Invocation, flag: &str) -> serde_json::Value {
    let source = invocation
        .value_of(flag)
        .unwrap_or_else(|| panic!("invocation is missing {flag}"));
    let raw = fs::read_to_string(source).expect("read request artifact");
    serde_json::from_str(&raw).expect("request artifact is JSON")
}

/// Whether `dir` has no entries left.
pub(crate) fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .expect("read temp root")
        .next()
        .is_none()
}
