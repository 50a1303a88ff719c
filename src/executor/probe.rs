//! Server reachability probes.
//!
//! The executor treats "a client can connect and read `server_version_num`"
//! as the definition of a started server. [`ServerProbe`] isolates that check
//! so lifecycle logic can be exercised without a real PostgreSQL server.

use async_trait::async_trait;
use color_eyre::eyre::{Report, WrapErr, eyre};
use postgres::NoTls;
use thiserror::Error;
use tracing::warn;

use crate::connection::{ATTEMPT_CONNECT_TIMEOUT, ConnectionParams, is_transient};
use crate::error::{FixtureError, FixtureErrorKind};
use crate::observability::LOG_TARGET;
use crate::version::PgVersion;

const VERSION_QUERY: &str = "SHOW server_version_num";

/// Failure reported by a probe attempt.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ProbeError {
    retryable: bool,
    #[source]
    error: FixtureError,
}

impl ProbeError {
    /// The server is not ready yet; the caller should try again.
    #[must_use]
    pub const fn pending(report: Report) -> Self {
        Self {
            retryable: true,
            error: FixtureError::new(FixtureErrorKind::Other, report),
        }
    }

    /// The attempt failed in a way retries cannot fix.
    #[must_use]
    pub const fn fatal(error: FixtureError) -> Self {
        Self {
            retryable: false,
            error,
        }
    }

    /// Reports whether another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Extracts the underlying fixture error.
    #[must_use]
    pub fn into_error(self) -> FixtureError {
        self.error
    }
}

impl From<postgres::Error> for ProbeError {
    fn from(err: postgres::Error) -> Self {
        if is_transient(&err) {
            Self::pending(Report::new(err))
        } else {
            Self::fatal(FixtureError::from(err))
        }
    }
}

/// Checks whether a server answers and reports its version.
#[async_trait]
pub trait ServerProbe: Send + Sync + std::fmt::Debug {
    /// Connects with a blocking client and returns the server version.
    ///
    /// # Errors
    /// Returns a retryable [`ProbeError`] while the server is still starting.
    fn server_version(&self, params: &ConnectionParams) -> Result<PgVersion, ProbeError>;

    /// Connects with a cooperative client and returns the server version.
    ///
    /// # Errors
    /// Same as [`ServerProbe::server_version`].
    async fn server_version_async(
        &self,
        params: &ConnectionParams,
    ) -> Result<PgVersion, ProbeError>;
}

/// Probe backed by the `postgres` and `tokio-postgres` drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresProbe;

fn parse_version_num(raw: &str) -> Result<PgVersion, ProbeError> {
    raw.parse::<PgVersion>()
        .wrap_err("server returned an unparseable server_version_num")
        .map_err(|err| ProbeError::fatal(FixtureError::from(err)))
}

#[async_trait]
impl ServerProbe for PostgresProbe {
    fn server_version(&self, params: &ConnectionParams) -> Result<PgVersion, ProbeError> {
        let mut client = params
            .postgres_config(Some(ATTEMPT_CONNECT_TIMEOUT))
            .connect(NoTls)?;
        let row = client.query_one(VERSION_QUERY, &[])?;
        let raw: String = row.try_get(0)?;
        parse_version_num(&raw)
    }

    async fn server_version_async(
        &self,
        params: &ConnectionParams,
    ) -> Result<PgVersion, ProbeError> {
        let (client, connection) = params
            .tokio_config(Some(ATTEMPT_CONNECT_TIMEOUT))
            .connect(tokio_postgres::NoTls)
            .await?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(target: LOG_TARGET, error = %err, "probe connection closed with error");
            }
        });
        let row = client.query_one(VERSION_QUERY, &[]).await;
        drop(client);
        if let Err(err) = driver.await {
            warn!(target: LOG_TARGET, error = %err, "probe connection task failed");
        }
        let raw: String = row?.try_get(0)?;
        parse_version_num(&raw)
    }
}

/// Probe that always reports the same version without touching the network.
///
/// Useful for exercising executor lifecycles against a scripted control tool.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    version: Option<PgVersion>,
}

impl StaticProbe {
    /// Reports `version` on every probe.
    #[must_use]
    pub const fn reporting(version: PgVersion) -> Self {
        Self {
            version: Some(version),
        }
    }

    /// Never becomes ready.
    #[must_use]
    pub const fn unreachable() -> Self {
        Self { version: None }
    }

    fn answer(&self) -> Result<PgVersion, ProbeError> {
        self.version
            .ok_or_else(|| ProbeError::pending(eyre!("connection refused")))
    }
}

#[async_trait]
impl ServerProbe for StaticProbe {
    fn server_version(&self, _params: &ConnectionParams) -> Result<PgVersion, ProbeError> {
        self.answer()
    }

    async fn server_version_async(
        &self,
        _params: &ConnectionParams,
    ) -> Result<PgVersion, ProbeError> {
        self.answer()
    }
}
