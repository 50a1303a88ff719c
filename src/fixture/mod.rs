//! RAII guards composing the allocator, executor, janitor, and loaders.
//!
//! A [`ProcessFixture`] or [`ExistingServer`] owns a template database and
//! publishes a [`ServerEndpoint`]; each test then takes a
//! [`DatabaseFixture`], a fresh clone of that template which is dropped when
//! the guard goes out of scope.

mod database;
mod existing;
mod process;

use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::ConnectionParams;
use crate::error::FixtureResult;
use crate::janitor::{DatabaseJanitor, JanitorTarget};
use crate::loader::{LoadDirective, LoaderRegistry};
use crate::observability::LOG_TARGET;
use crate::version::PgVersion;

pub use database::DatabaseFixture;
pub use existing::ExistingServer;
pub use process::ProcessFixture;

/// Everything a test needs to reach the server a fixture provisioned.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    params: ConnectionParams,
    template_dbname: String,
    version: PgVersion,
    connection_timeout: Duration,
    drop_stale: bool,
}

impl ServerEndpoint {
    pub(crate) const fn new(
        params: ConnectionParams,
        template_dbname: String,
        version: PgVersion,
        connection_timeout: Duration,
        drop_stale: bool,
    ) -> Self {
        Self {
            params,
            template_dbname,
            version,
            connection_timeout,
            drop_stale,
        }
    }

    /// Connection parameters naming the per-test database.
    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Name of the template every test database is cloned from.
    #[must_use]
    pub fn template_dbname(&self) -> &str {
        &self.template_dbname
    }

    /// Version reported by the running server.
    #[must_use]
    pub const fn version(&self) -> PgVersion {
        self.version
    }

    /// Time allowed for administrative connections.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Janitor managing the template database.
    #[must_use]
    pub fn template_janitor(&self) -> DatabaseJanitor {
        self.janitor(JanitorTarget::Template(self.template_dbname.clone()))
    }

    /// Janitor managing a clone of the template named `dbname`.
    #[must_use]
    pub fn clone_janitor(&self, dbname: &str) -> DatabaseJanitor {
        self.janitor(JanitorTarget::Clone {
            name: dbname.to_owned(),
            template: self.template_dbname.clone(),
        })
    }

    fn janitor(&self, target: JanitorTarget) -> DatabaseJanitor {
        DatabaseJanitor::new(self.params.clone(), target, self.version)
            .with_connection_timeout(self.connection_timeout)
    }

    pub(crate) const fn drop_stale(&self) -> bool {
        self.drop_stale
    }
}

/// Applies every load directive to the janitor's database, in order.
fn apply_loads(
    janitor: &DatabaseJanitor,
    load: &[LoadDirective],
    registry: &LoaderRegistry,
) -> FixtureResult<()> {
    load.iter()
        .try_for_each(|directive| janitor.load(directive, registry))
}

async fn apply_loads_async(
    janitor: &DatabaseJanitor,
    load: &[LoadDirective],
    registry: &LoaderRegistry,
) -> FixtureResult<()> {
    for directive in load {
        janitor.load_async(directive, registry).await?;
    }
    Ok(())
}

/// Best-effort removal of a database whose guard was dropped without an
/// explicit teardown.
///
/// Inside a Tokio runtime the blocking client cannot be used, so the drop is
/// spawned onto the current runtime instead and may not complete if the
/// runtime shuts down first.
fn discard_on_drop(janitor: DatabaseJanitor, context: &'static str) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        warn!(
            target: LOG_TARGET,
            context,
            dbname = janitor.target().managed_name(),
            "fixture dropped inside an async runtime without teardown_async(); \
             dropping the database in the background"
        );
        drop(handle.spawn(async move {
            if let Err(err) = janitor.drop_database_async().await {
                warn!(target: LOG_TARGET, context, error = %err, "background database drop failed");
            }
        }));
        return;
    }

    match janitor.drop_database() {
        Ok(()) => debug!(target: LOG_TARGET, context, "database dropped on guard drop"),
        Err(err) => warn!(
            target: LOG_TARGET,
            context,
            dbname = janitor.target().managed_name(),
            error = %err,
            "failed to drop database on guard drop"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::{Result, ensure};

    fn endpoint() -> ServerEndpoint {
        ServerEndpoint::new(
            ConnectionParams::new("127.0.0.1", 5433, "postgres", "tests"),
            "tests_tmpl".to_owned(),
            PgVersion::new(16, 2),
            Duration::from_secs(3),
            false,
        )
    }

    #[test]
    fn template_janitor_manages_the_template() -> Result<()> {
        let janitor = endpoint().template_janitor();
        ensure!(janitor.is_template());
        ensure!(janitor.target().managed_name() == "tests_tmpl");
        ensure!(janitor.version() == PgVersion::new(16, 2));
        Ok(())
    }

    #[test]
    fn clone_janitor_clones_from_the_template() -> Result<()> {
        let janitor = endpoint().clone_janitor("tests_orders");
        ensure!(!janitor.is_template());
        ensure!(janitor.target().template_name() == Some("tests_tmpl"));
        ensure!(janitor.managed_params().dbname() == "tests_orders");
        ensure!(janitor.managed_params().port() == 5433);
        Ok(())
    }
}
