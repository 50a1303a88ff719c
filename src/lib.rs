//! Ephemeral PostgreSQL servers and databases for test suites.
//!
//! The crate starts a private server through `pg_ctl` on a port shared
//! safely between parallel test workers, or attaches to a server that is
//! already running, and hands each test a freshly cloned database that is
//! dropped when the test finishes.
//!
//! The layers can be used on their own:
//!
//! - [`retry`] and [`retry_async`] bound how long transient failures are
//!   tolerated.
//! - [`PostgresExecutor`] owns one server process.
//! - [`PortAllocator`] picks and claims a free port.
//! - [`DatabaseJanitor`] creates, loads, and drops one database.
//! - [`LoadDirective`] and [`LoaderRegistry`] describe how databases are
//!   populated.
//!
//! [`ProcessFixture`], [`ExistingServer`], and [`DatabaseFixture`] compose
//! them into RAII guards configured from `POSTGRESQL_*` environment
//! variables through [`PgFixtureCfg`].

mod connection;
mod error;
mod executor;
mod fixture;
mod fs;
mod janitor;
mod loader;
mod observability;
mod port;
mod retry;
mod runtime;
mod settings;
#[doc(hidden)]
pub mod test_support;
mod version;

pub use connection::{ConnectionParams, escape_identifier};
pub use error::{ConfigError, ConfigResult, FixtureError, FixtureErrorKind, FixtureResult};
pub use executor::{
    ControlCommand, DEFAULT_PG_CTL, DEFAULT_START_TIMEOUT, ExecutorState, PostgresExecutor,
    PostgresProbe, ProbeError, ServerProbe, ServerProcessConfig, ServerProcessConfigBuilder,
    StaticProbe, TargetOs, initdb_command, quote_path, resolve_executable, server_options,
    start_command, status_command, stop_command, version_command,
};
pub use fixture::{DatabaseFixture, ExistingServer, ProcessFixture, ServerEndpoint};
pub use janitor::{
    ADMIN_DATABASE, AdminStatement, AsyncCursor, DATABASE_EXISTS_SQL, DEFAULT_CONNECTION_TIMEOUT,
    DatabaseJanitor, IsolationLevel, JanitorTarget, TERMINATE_BACKENDS_SQL, drop_plan, init_plan,
};
pub use loader::{
    AsyncLoader, LoadDirective, LoadParams, Loader, LoaderRegistry, ResolvedLoader,
    SqlFileLoader, resolve,
};
pub use observability::SKIP_PREFIX;
pub use port::{
    DEFAULT_PORT_SEARCH_COUNT, DEFAULT_SERVICE, PortAllocator, PortClaim, PortSpec,
    claim_contents, claim_path,
};
pub use retry::{
    DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_INTERVAL, RetryError, RetryPolicy, retry, retry_async,
};
pub use settings::{DEFAULT_PORT, FixtureSettings, PgFixtureCfg};
pub use version::{MIN_SUPPORTED_VERSION, PgVersion};

use tracing::info;

use crate::observability::LOG_TARGET;

/// Provisions a throwaway server from the environment configuration, clones
/// a database from its template, and tears everything down again.
///
/// Used by the `pg_fixture_check` binary to verify that the local PostgreSQL
/// installation works with the fixtures.
///
/// # Errors
/// Returns the first configuration, startup, or database failure.
pub fn run() -> FixtureResult<()> {
    color_eyre::install()?;
    let settings = PgFixtureCfg::load()?.to_settings()?;
    let registry = LoaderRegistry::default();

    let server = ProcessFixture::start(&settings, &registry)?;
    info!(
        target: LOG_TARGET,
        port = server.port(),
        version = %server.endpoint().version(),
        "server started"
    );

    let database = server.database()?;
    let mut client = database.client()?;
    client.batch_execute("SELECT 1;")?;
    drop(client);
    database.teardown()?;

    if let Some(claim) = server.stop()? {
        claim.release()?;
    }
    info!(target: LOG_TARGET, "fixture check passed");
    Ok(())
}
