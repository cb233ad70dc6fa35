//! Reader for the NDJSON event log written by `tm gates --emit-events`.

use std::fs;
use std::io;

use camino::Utf8Path;
use serde_json::Value;
use tracing::debug;

use crate::error::{BridgeError, codes, error_data};

/// Tracing target for event log parsing.
const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// Reads every event from the log at `path`, in file order.
///
/// A missing file means the backend emitted nothing and yields an empty
/// sequence.
///
/// # Errors
///
/// Returns `E_EVENTS_READ` when the file exists but cannot be read, and
/// `E_EVENTS_PARSE` for the first line that is not valid JSON.
pub fn read_events(path: &Utf8Path) -> Result<Vec<Value>, BridgeError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            debug!(target: EVENTS_TARGET, path = %path, "event log absent");
            return Ok(Vec::new());
        }
        Err(error) => {
            return Err(
                BridgeError::new(codes::EVENTS_READ, "Failed to read tm gates events output.")
                    .with_data(error_data([
                        ("file_path", Value::from(path.as_str())),
                        ("error", Value::from(error.to_string())),
                    ])),
            );
        }
    };
    parse_events(path, &raw)
}

/// Parses NDJSON text, skipping blank lines.
///
/// Parsing stops at the first malformed line. Its reported `line_number` is
/// the 1-based physical line in the file, blank lines included.
///
/// # Errors
///
/// Returns `E_EVENTS_PARSE` carrying the file path, line number, raw line and
/// parser message.
pub fn parse_events(path: &Utf8Path, raw: &str) -> Result<Vec<Value>, BridgeError> {
    let mut events = Vec::new();
    for (line_number, line) in (1_u64..).zip(raw.lines()) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event = serde_json::from_str(trimmed).map_err(|error| {
            BridgeError::new(codes::EVENTS_PARSE, "Failed to parse tm gates events.").with_data(
                error_data([
                    ("file_path", Value::from(path.as_str())),
                    ("line_number", Value::from(line_number)),
                    ("line", Value::from(trimmed)),
                    ("error", Value::from(error.to_string())),
                ]),
            )
        })?;
        events.push(event);
    }
    debug!(
        target: EVENTS_TARGET,
        path = %path,
        count = events.len(),
        "event log parsed"
    );
    Ok(events)
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    struct EventLog {
        _dir: TempDir,
        path: camino::Utf8PathBuf,
    }

    #[fixture]
    fn log() -> EventLog {
        let dir = TempDir::new().expect("temp dir");
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("events.ndjson"))
            .expect("utf8 temp path");
        EventLog { _dir: dir, path }
    }

    #[rstest]
    fn missing_log_yields_no_events(log: EventLog) {
        assert_eq!(read_events(&log.path).expect("absent log"), Vec::<Value>::new());
    }

    #[rstest]
    fn events_preserve_file_order_and_skip_blank_lines(log: EventLog) {
        fs::write(
            &log.path,
            "{\"gate\":\"lint\",\"ok\":true}\n\n   \n{\"gate\":\"test\",\"ok\":false}\n",
        )
        .expect("write log");
        let events = read_events(&log.path).expect("parse log");
        assert_eq!(
            events,
            vec![
                json!({"gate": "lint", "ok": true}),
                json!({"gate": "test", "ok": false}),
            ]
        );
    }

    #[rstest]
    #[case::first(1, "oops\n{\"a\":1}\n{\"a\":2}\n")]
    #[case::middle(2, "{\"a\":1}\n{\"a\":\n{\"a\":3}\n")]
    #[case::last(3, "{\"a\":1}\n{\"a\":2}\n{\"a\"")]
    fn malformed_line_reports_its_position(
        log: EventLog,
        #[case] expected_line: u64,
        #[case] contents: &str,
    ) {
        fs::write(&log.path, contents).expect("write log");
        let error = read_events(&log.path).expect_err("malformed log");
        assert_eq!(error.code(), codes::EVENTS_PARSE);
        let data = error.data().expect("error data");
        assert_eq!(data.get("line_number"), Some(&json!(expected_line)));
        assert_eq!(data.get("file_path"), Some(&json!(log.path.as_str())));
        assert!(data.contains_key("error"));
    }

    #[rstest]
    fn line_numbers_count_blank_lines(log: EventLog) {
        fs::write(&log.path, "{\"a\":1}\n\n{broken}\n").expect("write log");
        let error = read_events(&log.path).expect_err("malformed log");
        let data = error.data().expect("error data");
        assert_eq!(data.get("line_number"), Some(&json!(3)));
        assert_eq!(data.get("line"), Some(&json!("{broken}")));
    }

    #[rstest]
    fn unreadable_log_is_read_error(log: EventLog) {
        fs::create_dir(&log.path).expect("directory in place of log");
        let error = read_events(&log.path).expect_err("directory is not readable as text");
        assert_eq!(error.code(), codes::EVENTS_READ);
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn non_object_json_values_are_accepted() {
        let events = parse_events(Utf8Path::new("events.ndjson"), "1\n\"two\"\n[3]\n")
            .expect("scalar events");
        assert_eq!(events, vec![json!(1), json!("two"), json!([3])]);
    }
}
