//! Creation, loading, and destruction of test databases.
//!
//! [`DatabaseJanitor`] works against any reachable server, whether started
//! by a [`crate::PostgresExecutor`] or already running. Administrative
//! connections are opened per operation through the retry primitive, so a
//! server that is still starting is tolerated up to the connection timeout.

mod statements;

use std::fmt;
use std::ops::Deref;
use std::time::{Duration, Instant};

use color_eyre::eyre::eyre;
use postgres::NoTls;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

use crate::connection::{ConnectionParams, attempt_timeout, is_transient};
use crate::error::{FixtureError, FixtureErrorKind, FixtureResult};
use crate::loader::{LoadDirective, LoaderRegistry, resolve};
use crate::observability::LOG_TARGET;
use crate::retry::{RetryError, RetryPolicy, retry, retry_async};
use crate::version::PgVersion;

pub use statements::{
    AdminStatement, DATABASE_EXISTS_SQL, TERMINATE_BACKENDS_SQL, drop_plan, init_plan,
};

/// Default time allowed for an administrative connection to succeed.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Database administered by the janitor connects to this one.
pub const ADMIN_DATABASE: &str = "postgres";

/// Which database a janitor manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JanitorTarget {
    /// A template database, created with `is_template = true`.
    Template(String),
    /// A standalone database.
    Plain(String),
    /// A database cloned from an existing template.
    Clone {
        /// Database created and dropped by the janitor.
        name: String,
        /// Template the database is cloned from; never dropped.
        template: String,
    },
}

impl JanitorTarget {
    /// Builds a target from optional database and template names.
    ///
    /// # Errors
    /// Returns [`FixtureErrorKind::InvalidConfig`] when both names are absent
    /// or empty.
    ///
    /// # Examples
    /// ```
    /// use pg_test_fixtures::JanitorTarget;
    ///
    /// # fn main() -> pg_test_fixtures::FixtureResult<()> {
    /// let target = JanitorTarget::from_names(None, Some("tests_tmpl"))?;
    /// assert!(target.is_template());
    /// assert!(JanitorTarget::from_names(None, None).is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_names(dbname: Option<&str>, template: Option<&str>) -> FixtureResult<Self> {
        let present = |name: Option<&str>| name.filter(|value| !value.is_empty()).map(str::to_owned);
        match (present(dbname), present(template)) {
            (Some(name), Some(template_name)) => Ok(Self::Clone {
                name,
                template: template_name,
            }),
            (Some(name), None) => Ok(Self::Plain(name)),
            (None, Some(template_name)) => Ok(Self::Template(template_name)),
            (None, None) => Err(FixtureError::new(
                FixtureErrorKind::InvalidConfig,
                eyre!("at least one of dbname or template_dbname must be provided"),
            )),
        }
    }

    /// Reports whether the managed database is a template.
    #[must_use]
    pub const fn is_template(&self) -> bool {
        matches!(self, Self::Template(_))
    }

    /// Returns the database created, loaded, and dropped by the janitor.
    #[must_use]
    pub fn managed_name(&self) -> &str {
        match self {
            Self::Template(name) | Self::Plain(name) | Self::Clone { name, .. } => name,
        }
    }

    /// Returns the template a clone is built from.
    #[must_use]
    pub fn template_name(&self) -> Option<&str> {
        match self {
            Self::Template(name) => Some(name),
            Self::Clone { template, .. } => Some(template),
            Self::Plain(_) => None,
        }
    }
}

/// Transaction isolation applied to administrative sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// `READ UNCOMMITTED`.
    ReadUncommitted,
    /// `READ COMMITTED`.
    ReadCommitted,
    /// `REPEATABLE READ`.
    RepeatableRead,
    /// `SERIALIZABLE`.
    Serializable,
}

impl IsolationLevel {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    fn session_statement(self) -> String {
        format!(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {};",
            self.as_sql()
        )
    }
}

/// An autocommit connection to a cooperative client.
///
/// Dereferences to [`tokio_postgres::Client`]; dropping it closes the
/// connection.
pub struct AsyncCursor {
    client: tokio_postgres::Client,
    driver: JoinHandle<()>,
}

impl Deref for AsyncCursor {
    type Target = tokio_postgres::Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl fmt::Debug for AsyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCursor").finish_non_exhaustive()
    }
}

impl Drop for AsyncCursor {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Manages the lifecycle of one test database.
///
/// # Examples
/// ```no_run
/// use pg_test_fixtures::{ConnectionParams, DatabaseJanitor, JanitorTarget, PgVersion};
///
/// # fn main() -> pg_test_fixtures::FixtureResult<()> {
/// let params = ConnectionParams::new("127.0.0.1", 5432, "postgres", "postgres");
/// let target = JanitorTarget::from_names(Some("orders_test"), None)?;
/// let janitor = DatabaseJanitor::new(params, target, PgVersion::from_major(16));
/// janitor.init()?;
/// janitor.drop_database()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseJanitor {
    params: ConnectionParams,
    target: JanitorTarget,
    version: PgVersion,
    isolation_level: Option<IsolationLevel>,
    connection_timeout: Duration,
}

impl DatabaseJanitor {
    /// Creates a janitor for `target` on the server described by `params`.
    /// The database named in `params` is ignored; see [`ADMIN_DATABASE`].
    #[must_use]
    pub fn new(params: ConnectionParams, target: JanitorTarget, version: PgVersion) -> Self {
        Self {
            params,
            target,
            version,
            isolation_level: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }

    /// Applies `level` to every administrative session.
    #[must_use]
    pub const fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Bounds how long connection attempts are retried.
    #[must_use]
    pub const fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Returns the managed target.
    #[must_use]
    pub const fn target(&self) -> &JanitorTarget {
        &self.target
    }

    /// Reports whether the janitor manages a template database.
    #[must_use]
    pub const fn is_template(&self) -> bool {
        self.target.is_template()
    }

    /// Returns the server version this janitor was created for.
    #[must_use]
    pub const fn version(&self) -> PgVersion {
        self.version
    }

    /// Connection parameters for the managed database, as handed to loaders.
    #[must_use]
    pub fn managed_params(&self) -> ConnectionParams {
        self.params.with_dbname(self.target.managed_name())
    }

    fn span(&self, operation: &'static str) -> tracing::Span {
        info_span!(
            target: LOG_TARGET,
            "janitor",
            operation,
            host = self.params.host(),
            port = self.params.port(),
            dbname = self.target.managed_name(),
            version = %self.version
        )
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.connection_timeout)
    }

    fn connect_failure(&self, dbname: &str, err: RetryError<postgres::Error>) -> FixtureError {
        match err {
            RetryError::TimedOut {
                elapsed,
                attempts,
                last,
            } => FixtureError::new(
                FixtureErrorKind::ConnectionRetryTimeout,
                eyre!(
                    "could not connect to database {dbname} on {}:{} as {} within {:?} \
                     ({attempts} attempts over {elapsed:?}): {last}",
                    self.params.host(),
                    self.params.port(),
                    self.params.user(),
                    self.connection_timeout
                ),
            ),
            RetryError::Fatal(source) => {
                self.driver_failure(&format!("connecting to {dbname}"), &source)
            }
        }
    }

    fn driver_failure(&self, context: &str, err: &postgres::Error) -> FixtureError {
        FixtureError::new(
            FixtureErrorKind::Driver,
            eyre!(
                "{context} on {}:{} failed: {err}",
                self.params.host(),
                self.params.port()
            ),
        )
    }

    /// Opens an autocommit administrative connection to `dbname`, retrying
    /// while the server is unreachable. The connection closes when dropped.
    ///
    /// # Errors
    /// Returns [`FixtureErrorKind::ConnectionRetryTimeout`] when no attempt
    /// succeeds in time, or [`FixtureErrorKind::Driver`] for authentication
    /// and other non-transient failures.
    pub fn cursor(&self, dbname: &str) -> FixtureResult<postgres::Client> {
        let params = self.params.with_dbname(dbname);
        let deadline = Instant::now() + self.connection_timeout;
        let attempt = || {
            params
                .postgres_config(Some(attempt_timeout(deadline)))
                .connect(NoTls)
        };
        let mut client = retry(attempt, self.policy(), is_transient)
            .map_err(|err| self.connect_failure(dbname, err))?;
        if let Some(level) = self.isolation_level {
            client
                .batch_execute(&level.session_statement())
                .map_err(|err| self.driver_failure("setting isolation level", &err))?;
        }
        Ok(client)
    }

    /// Cooperative counterpart of [`DatabaseJanitor::cursor`].
    ///
    /// # Errors
    /// Same as [`DatabaseJanitor::cursor`].
    pub async fn cursor_async(&self, dbname: &str) -> FixtureResult<AsyncCursor> {
        let params = self.params.with_dbname(dbname);
        let deadline = Instant::now() + self.connection_timeout;
        let admin = &params;
        let attempt = move || async move {
            admin
                .tokio_config(Some(attempt_timeout(deadline)))
                .connect(tokio_postgres::NoTls)
                .await
        };
        let (client, connection) = retry_async(attempt, self.policy(), is_transient)
            .await
            .map_err(|err| self.connect_failure(dbname, err))?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(target: LOG_TARGET, error = %err, "admin connection closed with error");
            }
        });
        let cursor = AsyncCursor { client, driver };
        if let Some(level) = self.isolation_level {
            cursor
                .batch_execute(&level.session_statement())
                .await
                .map_err(|err| self.driver_failure("setting isolation level", &err))?;
        }
        Ok(cursor)
    }

    fn run_plan(&self, plan: &[AdminStatement]) -> FixtureResult<()> {
        let mut client = self.cursor(ADMIN_DATABASE)?;
        for statement in plan {
            let outcome = match statement {
                AdminStatement::Execute(sql) => client.batch_execute(sql),
                AdminStatement::TerminateBackends(name) => {
                    let datname: &str = name;
                    client.execute(TERMINATE_BACKENDS_SQL, &[&datname]).map(|_| ())
                }
            };
            outcome.map_err(|err| self.driver_failure(statement.sql(), &err))?;
        }
        Ok(())
    }

    async fn run_plan_async(&self, plan: &[AdminStatement]) -> FixtureResult<()> {
        let cursor = self.cursor_async(ADMIN_DATABASE).await?;
        for statement in plan {
            let outcome = match statement {
                AdminStatement::Execute(sql) => cursor.batch_execute(sql).await,
                AdminStatement::TerminateBackends(name) => {
                    let datname: &str = name;
                    cursor
                        .execute(TERMINATE_BACKENDS_SQL, &[&datname])
                        .await
                        .map(|_| ())
                }
            };
            outcome.map_err(|err| self.driver_failure(statement.sql(), &err))?;
        }
        Ok(())
    }

    /// Creates the managed database.
    ///
    /// # Errors
    /// Returns an error when the connection cannot be established or the
    /// server rejects a statement, for example because the database exists.
    pub fn init(&self) -> FixtureResult<()> {
        let span = self.span("init");
        let _entered = span.enter();
        self.run_plan(&init_plan(&self.target))?;
        info!(target: LOG_TARGET, "database created");
        Ok(())
    }

    /// Cooperative counterpart of [`DatabaseJanitor::init`].
    ///
    /// # Errors
    /// Same as [`DatabaseJanitor::init`].
    pub async fn init_async(&self) -> FixtureResult<()> {
        async {
            self.run_plan_async(&init_plan(&self.target)).await?;
            info!(target: LOG_TARGET, "database created");
            Ok(())
        }
        .instrument(self.span("init"))
        .await
    }

    /// Drops the managed database: new connections are refused, existing
    /// ones terminated, the template flag cleared when managing a template,
    /// and finally the database is dropped.
    ///
    /// # Errors
    /// Returns an error when the connection cannot be established or a
    /// statement fails; disallowing connections fails when the database does
    /// not exist.
    pub fn drop_database(&self) -> FixtureResult<()> {
        let span = self.span("drop");
        let _entered = span.enter();
        self.run_plan(&drop_plan(&self.target))?;
        info!(target: LOG_TARGET, "database dropped");
        Ok(())
    }

    /// Cooperative counterpart of [`DatabaseJanitor::drop_database`].
    ///
    /// # Errors
    /// Same as [`DatabaseJanitor::drop_database`].
    pub async fn drop_database_async(&self) -> FixtureResult<()> {
        async {
            self.run_plan_async(&drop_plan(&self.target)).await?;
            info!(target: LOG_TARGET, "database dropped");
            Ok(())
        }
        .instrument(self.span("drop"))
        .await
    }

    /// Reports whether the managed database exists.
    ///
    /// # Errors
    /// Returns an error when the server cannot be queried.
    pub fn exists(&self) -> FixtureResult<bool> {
        let name = self.target.managed_name();
        let mut client = self.cursor(ADMIN_DATABASE)?;
        let rows = client
            .query(DATABASE_EXISTS_SQL, &[&name])
            .map_err(|err| self.driver_failure(DATABASE_EXISTS_SQL, &err))?;
        Ok(!rows.is_empty())
    }

    /// Cooperative counterpart of [`DatabaseJanitor::exists`].
    ///
    /// # Errors
    /// Same as [`DatabaseJanitor::exists`].
    pub async fn exists_async(&self) -> FixtureResult<bool> {
        let name = self.target.managed_name();
        let cursor = self.cursor_async(ADMIN_DATABASE).await?;
        let rows = cursor
            .query(DATABASE_EXISTS_SQL, &[&name])
            .await
            .map_err(|err| self.driver_failure(DATABASE_EXISTS_SQL, &err))?;
        Ok(!rows.is_empty())
    }

    /// Drops a stale copy of the managed database left by an earlier run.
    ///
    /// # Errors
    /// Returns an error when the existence check or the drop fails.
    pub fn drop_stale(&self) -> FixtureResult<()> {
        if self.exists()? {
            warn!(
                target: LOG_TARGET,
                dbname = self.target.managed_name(),
                "dropping database left over from a previous run"
            );
            self.drop_database()?;
        }
        Ok(())
    }

    /// Cooperative counterpart of [`DatabaseJanitor::drop_stale`].
    ///
    /// # Errors
    /// Same as [`DatabaseJanitor::drop_stale`].
    pub async fn drop_stale_async(&self) -> FixtureResult<()> {
        if self.exists_async().await? {
            warn!(
                target: LOG_TARGET,
                dbname = self.target.managed_name(),
                "dropping database left over from a previous run"
            );
            self.drop_database_async().await?;
        }
        Ok(())
    }

    /// Populates the managed database using `directive`.
    ///
    /// # Errors
    /// Returns [`FixtureErrorKind::LoadResolution`] when the directive cannot
    /// be resolved, otherwise the loader's own error.
    pub fn load(&self, directive: &LoadDirective, registry: &LoaderRegistry) -> FixtureResult<()> {
        let span = self.span("load");
        let _entered = span.enter();
        let loader = resolve(directive, registry)?;
        loader.invoke(&self.managed_params())
    }

    /// Cooperative counterpart of [`DatabaseJanitor::load`].
    ///
    /// # Errors
    /// Same as [`DatabaseJanitor::load`].
    pub async fn load_async(
        &self,
        directive: &LoadDirective,
        registry: &LoaderRegistry,
    ) -> FixtureResult<()> {
        let loader = resolve(directive, registry)?;
        loader
            .invoke_async(&self.managed_params())
            .instrument(self.span("load"))
            .await
    }
}
