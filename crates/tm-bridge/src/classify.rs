//! Extraction of structured diagnostics from backend stderr.
//!
//! The backend reports failures as `tm error: <CODE> <message>` lines. The
//! match is best effort: callers always have a generic fallback when no line
//! fits.

use once_cell::sync::Lazy;
use regex::Regex;

#[expect(clippy::expect_used, reason = "the pattern is a checked constant")]
static TM_ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^tm error:\s*([A-Z0-9_]+)\s*(.*)$").expect("tm error pattern compiles")
});

/// A backend diagnostic recovered from stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliDiagnostic {
    /// Upper-cased error code.
    pub code: String,
    /// Trimmed message, or a synthesised one when the backend gave none.
    pub message: String,
}

/// Finds the last `tm error:` line in `stderr`.
///
/// Lines are scanned from the end so the most recent diagnostic wins.
#[must_use]
pub fn classify_stderr(stderr: &str) -> Option<CliDiagnostic> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .rev()
        .find_map(parse_line)
}

fn parse_line(line: &str) -> Option<CliDiagnostic> {
    let captures = TM_ERROR_LINE.captures(line)?;
    let code = captures.get(1)?.as_str().to_ascii_uppercase();
    let message = captures
        .get(2)
        .map(|text| text.as_str().trim())
        .filter(|text| !text.is_empty())
        .map_or_else(|| format!("tm CLI failed with {code}"), str::to_owned);
    Some(CliDiagnostic { code, message })
}
