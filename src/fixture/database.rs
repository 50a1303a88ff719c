//! Per-test database cloned from a fixture's template.

use tracing::{Instrument, info_span};

use super::{ServerEndpoint, discard_on_drop};
use crate::connection::ConnectionParams;
use crate::error::FixtureResult;
use crate::janitor::{AsyncCursor, DatabaseJanitor};
use crate::observability::LOG_TARGET;

/// A database that exists for the lifetime of the guard.
///
/// Created as a clone of the endpoint's template, so every guard starts from
/// the same loaded content regardless of what earlier tests did. Dropping
/// the guard drops the database; prefer [`DatabaseFixture::teardown`] (or
/// [`DatabaseFixture::teardown_async`] inside a runtime) to observe errors.
#[derive(Debug)]
pub struct DatabaseFixture {
    janitor: DatabaseJanitor,
    params: ConnectionParams,
    armed: bool,
}

impl DatabaseFixture {
    /// Clones the template into the database named by the endpoint.
    ///
    /// # Errors
    /// Returns an error when the server is unreachable within the connection
    /// timeout or the clone cannot be created, for example because another
    /// guard already holds a database of the same name.
    pub fn create(endpoint: &ServerEndpoint) -> FixtureResult<Self> {
        Self::create_named(endpoint, endpoint.params().dbname())
    }

    /// Clones the template into `dbname`.
    ///
    /// # Errors
    /// Same as [`DatabaseFixture::create`].
    pub fn create_named(endpoint: &ServerEndpoint, dbname: &str) -> FixtureResult<Self> {
        let _span = info_span!(target: LOG_TARGET, "database_fixture", dbname).entered();
        let janitor = endpoint.clone_janitor(dbname);
        if endpoint.drop_stale() {
            janitor.drop_stale()?;
        }
        janitor.init()?;
        Ok(Self::armed(janitor))
    }

    /// Cooperative counterpart of [`DatabaseFixture::create`].
    ///
    /// # Errors
    /// Same as [`DatabaseFixture::create`].
    pub async fn create_async(endpoint: &ServerEndpoint) -> FixtureResult<Self> {
        Self::create_named_async(endpoint, endpoint.params().dbname()).await
    }

    /// Cooperative counterpart of [`DatabaseFixture::create_named`].
    ///
    /// # Errors
    /// Same as [`DatabaseFixture::create`].
    pub async fn create_named_async(endpoint: &ServerEndpoint, dbname: &str) -> FixtureResult<Self> {
        let janitor = endpoint.clone_janitor(dbname);
        async {
            if endpoint.drop_stale() {
                janitor.drop_stale_async().await?;
            }
            janitor.init_async().await
        }
        .instrument(info_span!(target: LOG_TARGET, "database_fixture", dbname))
        .await?;
        Ok(Self::armed(janitor))
    }

    fn armed(janitor: DatabaseJanitor) -> Self {
        Self {
            params: janitor.managed_params(),
            janitor,
            armed: true,
        }
    }

    /// Connection parameters for the database.
    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Name of the database.
    #[must_use]
    pub fn dbname(&self) -> &str {
        self.params.dbname()
    }

    /// Opens a blocking connection to the database.
    ///
    /// # Errors
    /// Returns an error when no connection succeeds within the connection
    /// timeout.
    pub fn client(&self) -> FixtureResult<postgres::Client> {
        self.janitor.cursor(self.params.dbname())
    }

    /// Opens a cooperative connection to the database.
    ///
    /// # Errors
    /// Same as [`DatabaseFixture::client`].
    pub async fn client_async(&self) -> FixtureResult<AsyncCursor> {
        self.janitor.cursor_async(self.params.dbname()).await
    }

    /// Drops the database, terminating any connection still open to it.
    ///
    /// # Errors
    /// Returns an error when the server cannot be reached or refuses the drop.
    pub fn teardown(mut self) -> FixtureResult<()> {
        self.armed = false;
        self.janitor.drop_database()
    }

    /// Cooperative counterpart of [`DatabaseFixture::teardown`].
    ///
    /// # Errors
    /// Same as [`DatabaseFixture::teardown`].
    pub async fn teardown_async(mut self) -> FixtureResult<()> {
        self.armed = false;
        self.janitor.drop_database_async().await
    }
}

impl Drop for DatabaseFixture {
    fn drop(&mut self) {
        if self.armed {
            discard_on_drop(self.janitor.clone(), "DatabaseFixture");
        }
    }
}
