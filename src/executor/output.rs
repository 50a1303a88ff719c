//! Output truncation and error rendering for control-tool subprocesses.

use std::borrow::Cow;
use std::process::Output;

use camino::Utf8Path;
use color_eyre::eyre::eyre;

use crate::error::{FixtureError, FixtureErrorKind};
use crate::fs::read_optional;

pub(super) const OUTPUT_CHAR_LIMIT: usize = 2_048;
pub(super) const TRUNCATION_SUFFIX: &str = "… [truncated]";

/// Text the server writes once it accepts connections.
pub(super) const READY_MESSAGE: &str = "database system is ready to accept connections";

pub(super) fn render_failure(context: &str, output: &Output) -> FixtureError {
    let stdout = truncate_output(String::from_utf8_lossy(&output.stdout));
    let stderr = truncate_output(String::from_utf8_lossy(&output.stderr));
    FixtureError::from(eyre!(
        "{context} ({})\nstdout: {stdout}\nstderr: {stderr}",
        output.status
    ))
}

pub(super) fn truncate_output(text: Cow<'_, str>) -> String {
    let mut out = String::with_capacity(OUTPUT_CHAR_LIMIT + TRUNCATION_SUFFIX.len());
    let mut chars = text.chars();
    for _ in 0..OUTPUT_CHAR_LIMIT {
        match chars.next() {
            Some(ch) => out.push(ch),
            None => return text.into_owned(),
        }
    }

    if chars.next().is_none() {
        return text.into_owned();
    }

    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Returns the last [`OUTPUT_CHAR_LIMIT`] characters of the server log, or a
/// placeholder when it cannot be read.
pub(super) fn log_tail(path: &Utf8Path) -> String {
    match read_optional(path) {
        Ok(Some(text)) => {
            let total = text.chars().count();
            let skip = total.saturating_sub(OUTPUT_CHAR_LIMIT);
            if skip == 0 {
                text
            } else {
                format!("[truncated] …{}", text.chars().skip(skip).collect::<String>())
            }
        }
        Ok(None) => format!("<{path} not created>"),
        Err(err) => format!("<failed to read {path}: {err}>"),
    }
}

/// Reports whether the server log announces readiness. A missing log means
/// the server has not written anything yet.
pub(super) fn log_reports_ready(path: &Utf8Path) -> color_eyre::Result<bool> {
    Ok(read_optional(path)?.is_some_and(|text| text.contains(READY_MESSAGE)))
}

pub(super) fn launch_failure(status: std::process::ExitStatus, log_file: &Utf8Path) -> FixtureError {
    FixtureError::new(
        FixtureErrorKind::Other,
        eyre!(
            "pg_ctl start exited with {status}; server log {log_file}:\n{}",
            log_tail(log_file)
        ),
    )
}
