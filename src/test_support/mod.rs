//! Helpers shared by unit and integration tests.
//!
//! Log capture needs `tracing-subscriber`, so it is only compiled for the
//! crate's own tests and behind the `test-support` feature.

#[cfg(any(test, feature = "test-support"))]
mod logging;
#[cfg(unix)]
mod scripts;
mod skip;

#[cfg(any(test, feature = "test-support"))]
pub use logging::{capture_info_logs, capture_warn_logs};
#[cfg(unix)]
pub use scripts::{StartBehaviour, fake_pg_ctl, write_script};
pub use skip::{SKIP_PREFIX, format_skip_reason, skip_message};

use camino::Utf8PathBuf;
use color_eyre::eyre::{Result, eyre};
use tempfile::TempDir;

/// Creates a temporary directory and returns it with its UTF-8 path.
///
/// # Errors
/// Returns an error when the directory cannot be created or its path is not
/// valid UTF-8.
pub fn utf8_tempdir() -> Result<(TempDir, Utf8PathBuf)> {
    let temp = tempfile::tempdir()?;
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .map_err(|path| eyre!("non-UTF-8 temp dir {}", path.display()))?;
    Ok((temp, root))
}
