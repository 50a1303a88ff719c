//! Domain error types for the PostgreSQL test fixtures.

use color_eyre::Report;
use thiserror::Error;

/// Result alias for fixture operations that may return a [`FixtureError`].
pub type FixtureResult<T> = std::result::Result<T, FixtureError>;

/// Result alias for configuration fallible operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Categorises fixture failures so callers can branch on structured errors.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum FixtureErrorKind {
    /// Represents errors without a more specific semantic meaning.
    #[default]
    Other,
    /// The `pg_ctl` control tool was not found and discovery via `pg_config`
    /// failed.
    ExecutableMissing,
    /// The server never accepted connections within the start timeout.
    StartupTimeout,
    /// The server answered but reported a version below the supported minimum.
    UnsupportedVersion,
    /// No free, unclaimed port was found within the retry budget.
    PortSelectionExhausted,
    /// An administrative connection never succeeded within its timeout.
    ConnectionRetryTimeout,
    /// A load directive could not be resolved to an invocable loader.
    LoadResolution,
    /// The database driver reported an error that is not retried.
    Driver,
    /// The supplied settings were rejected before any work started.
    InvalidConfig,
}

/// Captures fixture failures together with a diagnostic report.
#[derive(Debug, Error)]
#[error("{report}")]
pub struct FixtureError {
    kind: FixtureErrorKind,
    #[source]
    report: Report,
}

impl FixtureError {
    /// Constructs a new fixture error with the provided kind and diagnostic
    /// report.
    #[must_use]
    pub const fn new(kind: FixtureErrorKind, report: Report) -> Self {
        Self { kind, report }
    }

    /// Returns the semantic category for this failure.
    #[must_use]
    pub const fn kind(&self) -> FixtureErrorKind {
        self.kind
    }

    /// Extracts the underlying diagnostic report.
    pub fn into_report(self) -> Report {
        self.report
    }

    /// Borrows the underlying diagnostic report.
    #[must_use]
    pub const fn report(&self) -> &Report {
        &self.report
    }
}

impl From<Report> for FixtureError {
    fn from(report: Report) -> Self {
        Self::new(FixtureErrorKind::Other, report)
    }
}

impl From<ConfigError> for FixtureError {
    fn from(err: ConfigError) -> Self {
        let ConfigError(report) = err;
        Self::new(FixtureErrorKind::InvalidConfig, report)
    }
}

impl From<postgres::Error> for FixtureError {
    fn from(err: postgres::Error) -> Self {
        Self::new(FixtureErrorKind::Driver, Report::new(err))
    }
}

/// Captures configuration failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] Report);

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;

    #[test]
    fn reports_convert_to_other_kind() {
        let err = FixtureError::from(eyre!("boom"));
        assert_eq!(err.kind(), FixtureErrorKind::Other);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn config_errors_are_tagged_invalid_config() {
        let err = FixtureError::from(ConfigError::from(eyre!("bad port spec")));
        assert_eq!(err.kind(), FixtureErrorKind::InvalidConfig);
        assert!(err.to_string().contains("bad port spec"));
    }
}
