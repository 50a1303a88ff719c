//! Guard for a server the fixtures did not start.

use color_eyre::eyre::eyre;
use tracing::{Instrument, info, info_span};

use super::{ServerEndpoint, apply_loads, apply_loads_async, discard_on_drop};
use crate::connection::ConnectionParams;
use crate::error::{FixtureError, FixtureErrorKind, FixtureResult};
use crate::executor::{PostgresProbe, ProbeError, ServerProbe};
use crate::janitor::{ADMIN_DATABASE, DatabaseJanitor};
use crate::loader::LoaderRegistry;
use crate::observability::LOG_TARGET;
use crate::port::PortSpec;
use crate::retry::{RetryError, RetryPolicy, retry, retry_async};
use crate::settings::{DEFAULT_PORT, FixtureSettings};
use crate::version::PgVersion;

/// Template management against an already running server.
///
/// No process is started. The server's version is queried, then the
/// `<dbname>_tmpl` template is created and loaded exactly as for a
/// [`crate::ProcessFixture`]. When a worker identifier is configured it is
/// appended to the database name so parallel workers sharing one server do
/// not collide. Dropping the guard drops the template.
#[derive(Debug)]
pub struct ExistingServer {
    endpoint: ServerEndpoint,
    template: Option<DatabaseJanitor>,
}

fn existing_port(spec: &PortSpec) -> FixtureResult<u16> {
    match spec {
        PortSpec::Fixed(port) => Ok(*port),
        PortSpec::Default => Ok(DEFAULT_PORT),
        other => Err(FixtureError::new(
            FixtureErrorKind::InvalidConfig,
            eyre!("an existing server needs a single port, not '{other}'"),
        )),
    }
}

fn client_params(settings: &FixtureSettings) -> FixtureResult<ConnectionParams> {
    let port = existing_port(&settings.port)?;
    Ok(
        ConnectionParams::new(
            settings.host.clone(),
            port,
            settings.user.clone(),
            settings.worker_dbname(),
        )
        .with_password(settings.password.clone())
        .with_options(Some(settings.options.clone())),
    )
}

fn version_failure(params: &ConnectionParams, err: RetryError<ProbeError>) -> FixtureError {
    match err {
        RetryError::TimedOut {
            elapsed,
            attempts,
            last,
        } => FixtureError::new(
            FixtureErrorKind::ConnectionRetryTimeout,
            eyre!(
                "existing server at {}:{} did not answer after {attempts} attempts over \
                 {elapsed:?}: {}",
                params.host(),
                params.port(),
                last.into_error()
            ),
        ),
        RetryError::Fatal(source) => source.into_error(),
    }
}

fn supported(version: PgVersion, params: &ConnectionParams) -> FixtureResult<PgVersion> {
    if version.is_supported() {
        Ok(version)
    } else {
        Err(FixtureError::new(
            FixtureErrorKind::UnsupportedVersion,
            eyre!(
                "existing server at {}:{} runs PostgreSQL {version}, which is not supported",
                params.host(),
                params.port()
            ),
        ))
    }
}

impl ExistingServer {
    fn endpoint_for(
        settings: &FixtureSettings,
        params: ConnectionParams,
        version: PgVersion,
    ) -> ServerEndpoint {
        let template = format!("{}_tmpl", params.dbname());
        ServerEndpoint::new(
            params,
            template,
            version,
            settings.connection_timeout,
            settings.drop_test_database,
        )
    }

    /// Connects to the configured server and prepares its template database.
    ///
    /// # Errors
    /// Returns [`FixtureErrorKind::InvalidConfig`] when the port setting does
    /// not name a single port, [`FixtureErrorKind::ConnectionRetryTimeout`]
    /// when the server does not answer in time,
    /// [`FixtureErrorKind::UnsupportedVersion`] for servers that are too old,
    /// or the janitor and loader failures.
    pub fn connect(settings: &FixtureSettings, registry: &LoaderRegistry) -> FixtureResult<Self> {
        let params = client_params(settings)?;
        let _span = info_span!(
            target: LOG_TARGET,
            "existing_server",
            host = params.host(),
            port = params.port(),
            dbname = params.dbname()
        )
        .entered();

        let admin = params.with_dbname(ADMIN_DATABASE);
        let probed = retry(
            || PostgresProbe.server_version(&admin),
            RetryPolicy::new(settings.connection_timeout),
            ProbeError::is_retryable,
        )
        .map_err(|err| version_failure(&params, err))?;
        let version = supported(probed, &params)?;

        let mut server = Self {
            endpoint: Self::endpoint_for(settings, params, version),
            template: None,
        };
        let janitor = server.endpoint.template_janitor();
        if settings.drop_test_database {
            janitor.drop_stale()?;
        }
        janitor.init()?;
        server.template = Some(janitor.clone());
        apply_loads(&janitor, &settings.load, registry)?;
        info!(target: LOG_TARGET, %version, "existing server ready");
        Ok(server)
    }

    /// Cooperative counterpart of [`ExistingServer::connect`].
    ///
    /// # Errors
    /// Same as [`ExistingServer::connect`].
    pub async fn connect_async(
        settings: &FixtureSettings,
        registry: &LoaderRegistry,
    ) -> FixtureResult<Self> {
        let params = client_params(settings)?;
        let span = info_span!(
            target: LOG_TARGET,
            "existing_server",
            host = params.host(),
            port = params.port(),
            dbname = params.dbname()
        );
        async {
            let admin = params.with_dbname(ADMIN_DATABASE);
            let probed = retry_async(
                || PostgresProbe.server_version_async(&admin),
                RetryPolicy::new(settings.connection_timeout),
                ProbeError::is_retryable,
            )
            .await
            .map_err(|err| version_failure(&params, err))?;
            let version = supported(probed, &params)?;

            let mut server = Self {
                endpoint: Self::endpoint_for(settings, params, version),
                template: None,
            };
            let janitor = server.endpoint.template_janitor();
            if settings.drop_test_database {
                janitor.drop_stale_async().await?;
            }
            janitor.init_async().await?;
            server.template = Some(janitor.clone());
            apply_loads_async(&janitor, &settings.load, registry).await?;
            info!(target: LOG_TARGET, %version, "existing server ready");
            Ok(server)
        }
        .instrument(span)
        .await
    }

    /// Endpoint handed to [`crate::DatabaseFixture`] constructors.
    #[must_use]
    pub const fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Drops the template database. The server keeps running.
    ///
    /// # Errors
    /// Returns an error when the server cannot be reached or refuses the drop.
    pub fn teardown(mut self) -> FixtureResult<()> {
        self.template
            .take()
            .map_or(Ok(()), |janitor| janitor.drop_database())
    }

    /// Cooperative counterpart of [`ExistingServer::teardown`].
    ///
    /// # Errors
    /// Same as [`ExistingServer::teardown`].
    pub async fn teardown_async(mut self) -> FixtureResult<()> {
        match self.template.take() {
            Some(janitor) => janitor.drop_database_async().await,
            None => Ok(()),
        }
    }
}

impl Drop for ExistingServer {
    fn drop(&mut self) {
        if let Some(janitor) = self.template.take() {
            discard_on_drop(janitor, "ExistingServer");
        }
    }
}
