//! Helpers for constructing the Tokio runtime owned by blocking fixtures.

use crate::error::{FixtureError, FixtureResult};
use color_eyre::eyre::Context;
use tokio::runtime::{Builder, Runtime};

/// Constructs a current-thread Tokio runtime for blocking database work.
///
/// The synchronous `postgres` client drives its own runtime internally, so
/// this runtime only hosts the cooperative helpers that blocking callers
/// reuse, such as asynchronous loaders invoked from [`crate::ProcessFixture`].
///
/// # Errors
///
/// Returns an error when the runtime cannot be built, for example due to
/// resource limits.
pub(crate) fn build_runtime() -> FixtureResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime for fixture lifecycle")
        .map_err(FixtureError::from)
}
