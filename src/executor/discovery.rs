//! Locates the `pg_ctl` control tool.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use tracing::debug;

use crate::error::{FixtureError, FixtureErrorKind, FixtureResult};
use crate::fs::path_exists;
use crate::observability::LOG_TARGET;

/// Default location probed before falling back to `pg_config`.
pub const DEFAULT_PG_CTL: &str = "/usr/lib/postgresql/16/bin/pg_ctl";

const PG_CTL_NAME: &str = if cfg!(windows) { "pg_ctl.exe" } else { "pg_ctl" };

/// Resolves the control tool path.
///
/// An explicit path is returned unchanged. Otherwise the configured path is
/// used when it exists, and as a last resort `pg_config --bindir` is asked
/// where the server binaries live.
///
/// # Errors
/// Returns [`FixtureErrorKind::ExecutableMissing`] when no explicit path is
/// given, the configured path does not exist, and `pg_config` cannot be run.
pub fn resolve_executable(
    explicit: Option<&Utf8Path>,
    configured: &Utf8Path,
) -> FixtureResult<Utf8PathBuf> {
    resolve_executable_with(explicit, configured, Utf8Path::new("pg_config"))
}

pub(crate) fn resolve_executable_with(
    explicit: Option<&Utf8Path>,
    configured: &Utf8Path,
    pg_config: &Utf8Path,
) -> FixtureResult<Utf8PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if path_exists(configured) {
        return Ok(configured.to_path_buf());
    }

    debug!(
        target: LOG_TARGET,
        configured = %configured,
        "configured pg_ctl missing; asking pg_config for the bindir"
    );
    let output = Command::new(pg_config.as_std_path())
        .arg("--bindir")
        .output()
        .map_err(|err| {
            missing(eyre!(
                "could not find pg_ctl at {configured} and could not run {pg_config}: {err}. \
                 Is PostgreSQL installed and on PATH?"
            ))
        })?;
    if !output.status.success() {
        return Err(missing(eyre!(
            "{pg_config} --bindir exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let bindir = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if bindir.is_empty() {
        return Err(missing(eyre!("{pg_config} --bindir printed nothing")));
    }
    Ok(Utf8PathBuf::from(bindir).join(PG_CTL_NAME))
}

fn missing(report: color_eyre::Report) -> FixtureError {
    FixtureError::new(FixtureErrorKind::ExecutableMissing, report)
}
