//! Soft-skip heuristics for tests that need a local PostgreSQL installation.

pub use crate::observability::SKIP_PREFIX;

/// Failure substrings that mean "PostgreSQL is not usable here" rather than
/// "the code under test is broken".
const ENVIRONMENT_FAILURES: &[(&str, &str)] = &[
    ("could not find pg_ctl", "PostgreSQL binaries are not installed"),
    ("could not run", "the PostgreSQL control tool could not be executed"),
    ("No such file or directory", "PostgreSQL binaries are not installed"),
    ("cannot be run as root", "initdb refuses to run as root"),
    ("Permission denied", "the test sandbox lacks filesystem permissions"),
];

/// Returns a prefixed skip message when `message` matches a known
/// environment failure.
///
/// # Examples
/// ```
/// use pg_test_fixtures::test_support::skip_message;
///
/// let skip = skip_message("could not find pg_ctl at /usr/bin/pg_ctl");
/// assert!(skip.is_some_and(|text| text.starts_with("SKIP-TEST-FIXTURE")));
/// assert!(skip_message("syntax error at or near \"SELEC\"").is_none());
/// ```
#[must_use]
pub fn skip_message(message: &str) -> Option<String> {
    let lowered = message.to_ascii_lowercase();
    ENVIRONMENT_FAILURES
        .iter()
        .find(|(needle, _)| lowered.contains(&needle.to_ascii_lowercase()))
        .map(|(_, reason)| format!("{SKIP_PREFIX}: {reason}: {message}"))
}

/// Prefixes `reason` with the shared skip marker.
#[must_use]
pub fn format_skip_reason(reason: impl AsRef<str>) -> String {
    format!("{SKIP_PREFIX}: {}", reason.as_ref())
}
