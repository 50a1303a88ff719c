//! The default loader: run a SQL script inside one transaction.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use postgres::NoTls;
use tracing::{info, warn};

use super::LoadParams;
use crate::connection::ATTEMPT_CONNECT_TIMEOUT;
use crate::error::{FixtureError, FixtureErrorKind, FixtureResult};
use crate::fs::read_optional;
use crate::observability::LOG_TARGET;

/// Executes the full text of a `.sql` file and commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFileLoader {
    path: Utf8PathBuf,
}

impl SqlFileLoader {
    /// Creates a loader for `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the script path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn script(&self) -> FixtureResult<String> {
        read_optional(&self.path)?.ok_or_else(|| {
            FixtureError::new(
                FixtureErrorKind::LoadResolution,
                eyre!("SQL script {} disappeared before loading", self.path),
            )
        })
    }

    fn driver_error(&self, params: &LoadParams, err: &postgres::Error) -> FixtureError {
        FixtureError::new(
            FixtureErrorKind::Driver,
            eyre!("loading {} into {} failed: {err}", self.path, params.url()),
        )
    }

    /// Runs the script with a blocking client.
    ///
    /// # Errors
    /// Returns [`FixtureErrorKind::Driver`] with the server's message when a
    /// statement fails; nothing is committed in that case.
    pub fn run(&self, params: &LoadParams) -> FixtureResult<()> {
        let sql = self.script()?;
        let mut client = params
            .postgres_config(Some(ATTEMPT_CONNECT_TIMEOUT))
            .connect(NoTls)
            .map_err(|err| self.driver_error(params, &err))?;
        let mut transaction = client
            .transaction()
            .map_err(|err| self.driver_error(params, &err))?;
        transaction
            .batch_execute(&sql)
            .map_err(|err| self.driver_error(params, &err))?;
        transaction
            .commit()
            .map_err(|err| self.driver_error(params, &err))?;
        info!(target: LOG_TARGET, script = %self.path, dbname = params.dbname(), "loaded SQL script");
        Ok(())
    }

    /// Runs the script with a cooperative client.
    ///
    /// # Errors
    /// Same as [`SqlFileLoader::run`].
    pub async fn run_async(&self, params: &LoadParams) -> FixtureResult<()> {
        let sql = self.script()?;
        let (mut client, connection) = params
            .tokio_config(Some(ATTEMPT_CONNECT_TIMEOUT))
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|err| self.driver_error(params, &err))?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(target: LOG_TARGET, error = %err, "loader connection closed with error");
            }
        });
        let outcome = async {
            let transaction = client.transaction().await?;
            transaction.batch_execute(&sql).await?;
            transaction.commit().await
        }
        .await
        .map_err(|err| self.driver_error(params, &err));
        drop(client);
        if let Err(err) = driver.await {
            warn!(target: LOG_TARGET, error = %err, "loader connection task failed");
        }
        outcome?;
        info!(target: LOG_TARGET, script = %self.path, dbname = params.dbname(), "loaded SQL script");
        Ok(())
    }
}
