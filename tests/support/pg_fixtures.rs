#![expect(
    dead_code,
    reason = "each suite uses a different subset of these helpers"
)]
//! Shared setup for suites that need a local PostgreSQL installation.
//!
//! Servers are started with a private run directory so port claims and
//! working directories never leak between suites. Environment problems such
//! as missing binaries turn into soft skips instead of failures.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Result, eyre};
use pg_test_fixtures::test_support::{format_skip_reason, skip_message, utf8_tempdir};
use pg_test_fixtures::{
    FixtureError, FixtureErrorKind, FixtureResult, FixtureSettings, LoadParams, LoaderRegistry,
    ProcessFixture,
};
use postgres::NoTls;
use tempfile::TempDir;

/// Rows inserted by [`load_four_rows`].
pub const SEEDED_ROWS: i64 = 4;

/// Settings for a server whose claims and working directory live under a
/// fresh temporary directory.
pub fn isolated_settings() -> Result<(TempDir, FixtureSettings)> {
    let (guard, root) = utf8_tempdir()?;
    let settings = FixtureSettings {
        run_dir: Some(root),
        ..FixtureSettings::default()
    };
    Ok((guard, settings))
}

/// Returns the skip message for environment failures, or the error itself.
pub fn skip_reason(err: FixtureError) -> Result<String> {
    if err.kind() == FixtureErrorKind::ExecutableMissing {
        return Ok(format_skip_reason(err.to_string()));
    }
    let rendered = format!("{:?}", err.report());
    skip_message(&rendered).ok_or_else(|| eyre!(err))
}

/// Reports a soft skip on stderr.
#[expect(
    clippy::print_stderr,
    reason = "soft skips must be visible in test output"
)]
pub fn announce_skip(reason: &str) {
    eprintln!("{reason}");
}

/// Starts a server, or returns `None` after announcing a soft skip when
/// PostgreSQL is unavailable.
pub fn start_or_skip(
    settings: &FixtureSettings,
    registry: &LoaderRegistry,
) -> Result<Option<ProcessFixture>> {
    match ProcessFixture::start(settings, registry) {
        Ok(server) => Ok(Some(server)),
        Err(err) => {
            announce_skip(&skip_reason(err)?);
            Ok(None)
        }
    }
}

/// Cooperative counterpart of [`start_or_skip`].
pub async fn start_async_or_skip(
    settings: &FixtureSettings,
    registry: &LoaderRegistry,
) -> Result<Option<ProcessFixture>> {
    match ProcessFixture::start_async(settings, registry).await {
        Ok(server) => Ok(Some(server)),
        Err(err) => {
            announce_skip(&skip_reason(err)?);
            Ok(None)
        }
    }
}

/// Creates `items` and inserts [`SEEDED_ROWS`] rows into it.
pub fn load_four_rows(params: &LoadParams) -> FixtureResult<()> {
    let mut client = params.postgres_config(None).connect(NoTls)?;
    client.batch_execute(
        "CREATE TABLE items (id integer PRIMARY KEY, label text NOT NULL);
         INSERT INTO items VALUES (1, 'one'), (2, 'two'), (3, 'three'), (4, 'four');",
    )?;
    Ok(())
}

/// Writes a SQL script into `dir` and returns its path.
pub fn write_sql(dir: &Utf8Path, name: &str, sql: &str) -> Result<Utf8PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, sql)?;
    Ok(path)
}
