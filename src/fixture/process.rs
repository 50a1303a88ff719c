//! Guard owning a `pg_ctl`-managed server and its template database.

use camino::Utf8PathBuf;
use color_eyre::eyre::{Context, eyre};
use tempfile::TempDir;
use tracing::{Instrument, debug, info, info_span};

use super::{DatabaseFixture, ServerEndpoint, apply_loads, apply_loads_async};
use crate::error::{FixtureError, FixtureResult};
use crate::executor::{PostgresExecutor, ServerProcessConfig, resolve_executable};
use crate::fs::ensure_dir_exists;
use crate::janitor::DatabaseJanitor;
use crate::loader::LoaderRegistry;
use crate::observability::LOG_TARGET;
use crate::port::{PortAllocator, PortClaim, PortSpec};
use crate::settings::FixtureSettings;

/// A private PostgreSQL server started for the duration of a test session.
///
/// Starting allocates a port shared safely with other workers, initialises a
/// data directory under a fresh working directory, launches the server, and
/// creates the `<dbname>_tmpl` template populated by the configured load
/// directives. Dropping the guard drops the template, stops the server, and
/// removes the working directory. The port claim marker stays behind unless
/// [`PortClaim::release`] is called on the claim returned by
/// [`ProcessFixture::stop`].
///
/// The blocking constructors must not be called from inside a Tokio runtime;
/// use [`ProcessFixture::start_async`] there.
///
/// # Examples
/// ```no_run
/// use pg_test_fixtures::{DatabaseFixture, FixtureSettings, LoaderRegistry, ProcessFixture};
///
/// # fn main() -> pg_test_fixtures::FixtureResult<()> {
/// let server = ProcessFixture::start(&FixtureSettings::default(), &LoaderRegistry::default())?;
/// let database = DatabaseFixture::create(server.endpoint())?;
/// let mut client = database.client()?;
/// client.batch_execute("CREATE TABLE t (id int)")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ProcessFixture {
    template: Option<DatabaseJanitor>,
    executor: PostgresExecutor,
    endpoint: ServerEndpoint,
    claim: Option<PortClaim>,
    workdir: TempDir,
}

/// Resources gathered before the server is launched.
struct Prepared {
    config: ServerProcessConfig,
    claim: PortClaim,
    workdir: TempDir,
}

fn prepare(settings: &FixtureSettings) -> FixtureResult<Prepared> {
    let executable = resolve_executable(
        settings.executable.as_deref(),
        &settings.configured_executable,
    )?;
    let run_dir = settings.resolved_run_dir();
    ensure_dir_exists(&run_dir)?;

    let allocator = PortAllocator::new(run_dir.join("ports"))
        .with_search_count(settings.port_search_count)
        .with_default(PortSpec::Any);
    let claim = allocator.allocate(&settings.port)?;
    let port = claim.port();

    let workdir = tempfile::Builder::new()
        .prefix(&format!("server-{port}-"))
        .tempdir_in(run_dir.as_std_path())
        .wrap_err_with(|| format!("failed to create working directory in {run_dir}"))?;
    let root = Utf8PathBuf::from_path_buf(workdir.path().to_path_buf())
        .map_err(|path| eyre!("working directory {} is not valid UTF-8", path.display()))?;

    let config = ServerProcessConfig::builder(
        executable,
        root.join(format!("data-{port}")),
        root.join(format!("postgresql.{port}.log")),
    )
    .host(settings.host.clone())
    .port(port)
    .user(settings.user.clone())
    .password(settings.password.clone())
    .options(settings.options.clone())
    .unix_socket_dir(settings.unix_socket_dir.clone())
    .startparams(settings.startparams.clone())
    .postgres_options(settings.postgres_options.clone())
    .dbname(settings.dbname.clone())
    .start_timeout(settings.start_timeout)
    .build();

    Ok(Prepared {
        config,
        claim,
        workdir,
    })
}

impl ProcessFixture {
    fn launched(
        executor: PostgresExecutor,
        claim: PortClaim,
        workdir: TempDir,
        settings: &FixtureSettings,
    ) -> FixtureResult<Self> {
        let version = executor.server_version().ok_or_else(|| {
            FixtureError::from(eyre!(
                "server on port {} started without reporting its version",
                claim.port()
            ))
        })?;
        let config = executor.config();
        let endpoint = ServerEndpoint::new(
            config.connection_params(config.dbname()),
            config.template_dbname(),
            version,
            settings.connection_timeout,
            settings.drop_test_database,
        );
        Ok(Self {
            template: None,
            executor,
            endpoint,
            claim: Some(claim),
            workdir,
        })
    }

    /// Starts a server and prepares its template database.
    ///
    /// # Errors
    /// Returns the first failure among executable discovery, port
    /// allocation, server start, template creation, and loading. Anything
    /// already started is torn down before the error is returned.
    pub fn start(settings: &FixtureSettings, registry: &LoaderRegistry) -> FixtureResult<Self> {
        let span = info_span!(target: LOG_TARGET, "process_fixture", dbname = %settings.dbname);
        let _entered = span.enter();

        let Prepared {
            config,
            claim,
            workdir,
        } = prepare(settings)?;
        let mut executor = PostgresExecutor::new(config);
        executor.start()?;
        let mut fixture = Self::launched(executor, claim, workdir, settings)?;

        let janitor = fixture.endpoint.template_janitor();
        if settings.drop_test_database {
            janitor.drop_stale()?;
        }
        janitor.init()?;
        fixture.template = Some(janitor.clone());
        apply_loads(&janitor, &settings.load, registry)?;
        info!(
            target: LOG_TARGET,
            port = fixture.port(),
            template = fixture.endpoint.template_dbname(),
            "process fixture ready"
        );
        Ok(fixture)
    }

    /// Cooperative counterpart of [`ProcessFixture::start`].
    ///
    /// # Errors
    /// Same as [`ProcessFixture::start`].
    pub async fn start_async(
        settings: &FixtureSettings,
        registry: &LoaderRegistry,
    ) -> FixtureResult<Self> {
        let span = info_span!(target: LOG_TARGET, "process_fixture", dbname = %settings.dbname);
        async {
            let Prepared {
                config,
                claim,
                workdir,
            } = prepare(settings)?;
            let mut executor = PostgresExecutor::new(config);
            executor.start_async().await?;
            let mut fixture = Self::launched(executor, claim, workdir, settings)?;

            let janitor = fixture.endpoint.template_janitor();
            if settings.drop_test_database {
                janitor.drop_stale_async().await?;
            }
            janitor.init_async().await?;
            fixture.template = Some(janitor.clone());
            apply_loads_async(&janitor, &settings.load, registry).await?;
            info!(
                target: LOG_TARGET,
                port = fixture.port(),
                template = fixture.endpoint.template_dbname(),
                "process fixture ready"
            );
            Ok(fixture)
        }
        .instrument(span)
        .await
    }

    /// Endpoint handed to [`DatabaseFixture`] constructors.
    #[must_use]
    pub const fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// The executor driving the server process.
    #[must_use]
    pub const fn executor(&self) -> &PostgresExecutor {
        &self.executor
    }

    /// Port the server listens on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.executor.config().port()
    }

    /// Working directory holding the data directory and the server log.
    #[must_use]
    pub fn workdir(&self) -> &std::path::Path {
        self.workdir.path()
    }

    /// Clones the template into the configured per-test database.
    ///
    /// # Errors
    /// See [`DatabaseFixture::create`].
    pub fn database(&self) -> FixtureResult<DatabaseFixture> {
        DatabaseFixture::create(&self.endpoint)
    }

    /// Drops the template and stops the server, returning the port claim so
    /// the caller can decide whether to release it.
    ///
    /// # Errors
    /// Returns an error when the template cannot be dropped or the server
    /// refuses to stop. The working directory is removed either way.
    pub fn stop(mut self) -> FixtureResult<Option<PortClaim>> {
        let span = info_span!(target: LOG_TARGET, "process_fixture_stop", port = self.port());
        let _entered = span.enter();
        if let Some(janitor) = self.template.take() {
            janitor.drop_database()?;
        }
        self.executor.stop()?;
        Ok(self.claim.take())
    }

    /// Cooperative counterpart of [`ProcessFixture::stop`].
    ///
    /// # Errors
    /// Same as [`ProcessFixture::stop`].
    pub async fn stop_async(mut self) -> FixtureResult<Option<PortClaim>> {
        let span = info_span!(target: LOG_TARGET, "process_fixture_stop", port = self.port());
        async {
            if let Some(janitor) = self.template.take() {
                janitor.drop_database_async().await?;
            }
            self.executor.stop_async().await?;
            Ok(self.claim.take())
        }
        .instrument(span)
        .await
    }
}

impl Drop for ProcessFixture {
    fn drop(&mut self) {
        let Some(janitor) = self.template.take() else {
            return;
        };
        // The server and its data directory go away with the executor, so the
        // template only needs an explicit drop when that is cheap to do.
        if tokio::runtime::Handle::try_current().is_ok() {
            debug!(
                target: LOG_TARGET,
                port = self.port(),
                "skipping template drop inside async runtime; server is being discarded"
            );
            return;
        }
        if let Err(err) = janitor.drop_database() {
            debug!(target: LOG_TARGET, error = %err, "template drop on guard drop failed");
        }
    }
}
