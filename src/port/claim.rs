//! Filesystem claim markers that arbitrate ports between parallel workers.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::error::FixtureResult;
use crate::fs::{ExclusiveCreate, create_exclusive, path_exists, remove_file_if_exists};
use crate::observability::LOG_TARGET;

/// Returns the marker path for `service` claiming `port` under `dir`.
#[must_use]
pub fn claim_path(dir: &Utf8Path, service: &str, port: u16) -> Utf8PathBuf {
    dir.join(format!("{service}-{port}.port"))
}

/// Renders the single-line marker body.
#[must_use]
pub fn claim_contents(service: &str, port: u16) -> String {
    format!("{service}_port {port}\n")
}

pub(super) fn is_claimed(dir: &Utf8Path, service: &str, port: u16) -> bool {
    path_exists(&claim_path(dir, service, port))
}

/// Attempts to claim `port`; returns `None` when another allocator got there
/// first.
pub(super) fn try_claim(
    dir: &Utf8Path,
    service: &str,
    port: u16,
) -> FixtureResult<Option<PortClaim>> {
    let path = claim_path(dir, service, port);
    match create_exclusive(&path, &claim_contents(service, port))? {
        ExclusiveCreate::Created => {
            info!(target: LOG_TARGET, port, path = %path, "claimed port");
            Ok(Some(PortClaim { port, path }))
        }
        ExclusiveCreate::AlreadyExists => Ok(None),
    }
}

/// Proof that this process owns a port for the rest of the test run.
///
/// Dropping the claim leaves the marker in place: markers live as long as the
/// claim directory, which is expected to be the run's temporary directory.
/// Call [`PortClaim::release`] to hand the port back early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortClaim {
    port: u16,
    path: Utf8PathBuf,
}

impl PortClaim {
    /// Returns the claimed port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the marker file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Deletes the marker so other workers may claim the port again.
    ///
    /// # Errors
    /// Returns an error when the marker exists but cannot be removed.
    pub fn release(self) -> FixtureResult<()> {
        remove_file_if_exists(&self.path)?;
        info!(target: LOG_TARGET, port = self.port, path = %self.path, "released port claim");
        Ok(())
    }
}
