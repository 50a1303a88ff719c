//! Lifecycle management for a `pg_ctl`-controlled PostgreSQL server.
//!
//! [`PostgresExecutor`] owns exactly one server process. Blocking callers use
//! [`PostgresExecutor::start`] and [`PostgresExecutor::stop`]; code already
//! running on a Tokio runtime uses the `_async` counterparts. Both paths share
//! command construction, state transitions, readiness classification, and
//! failure cleanup; only the waiting primitives differ.

mod command;
mod discovery;
mod output;
mod probe;
mod process;

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use tracing::{Instrument, info, info_span, warn};

use crate::connection::ConnectionParams;
use crate::error::{FixtureError, FixtureErrorKind, FixtureResult};
use crate::fs::{path_exists, remove_dir_all_if_exists, remove_file_if_exists, write_file};
use crate::observability::{LOG_TARGET, SKIP_PREFIX};
use crate::retry::{RetryError, RetryPolicy, retry, retry_async};
use crate::version::{MIN_SUPPORTED_VERSION, PgVersion};

pub use command::{
    ControlCommand, TargetOs, initdb_command, quote_path, server_options, start_command,
    status_command, stop_command, version_command,
};
pub use discovery::{DEFAULT_PG_CTL, resolve_executable};
pub use probe::{PostgresProbe, ProbeError, ServerProbe, StaticProbe};

use output::{launch_failure, log_reports_ready, log_tail, render_failure};
use process::{ServerHandle, TERMINATE_GRACE, ensure_success, run_async, run_blocking};

/// Default time allowed for the server to accept connections.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable launch specification for one server process.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerProcessConfig {
    pub(crate) executable: Utf8PathBuf,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: Option<String>,
    pub(crate) options: String,
    pub(crate) data_dir: Utf8PathBuf,
    pub(crate) unix_socket_dir: Option<Utf8PathBuf>,
    pub(crate) log_file: Utf8PathBuf,
    pub(crate) startparams: String,
    pub(crate) postgres_options: String,
    pub(crate) dbname: String,
    pub(crate) start_timeout: Duration,
}

impl ServerProcessConfig {
    /// Starts a builder with the three paths every server needs.
    ///
    /// # Examples
    /// ```
    /// use pg_test_fixtures::ServerProcessConfig;
    ///
    /// let config = ServerProcessConfig::builder("/usr/bin/pg_ctl", "/tmp/data-5433", "/tmp/pg.log")
    ///     .port(5433)
    ///     .dbname("orders")
    ///     .build();
    /// assert_eq!(config.template_dbname(), "orders_tmpl");
    /// ```
    pub fn builder(
        executable: impl Into<Utf8PathBuf>,
        data_dir: impl Into<Utf8PathBuf>,
        log_file: impl Into<Utf8PathBuf>,
    ) -> ServerProcessConfigBuilder {
        ServerProcessConfigBuilder {
            config: Self {
                executable: executable.into(),
                host: "127.0.0.1".to_owned(),
                port: 5432,
                user: "postgres".to_owned(),
                password: None,
                options: String::new(),
                data_dir: data_dir.into(),
                unix_socket_dir: None,
                log_file: log_file.into(),
                startparams: "-w".to_owned(),
                postgres_options: String::new(),
                dbname: "tests".to_owned(),
                start_timeout: DEFAULT_START_TIMEOUT,
            },
        }
    }

    /// Returns the control tool path.
    #[must_use]
    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    /// Returns the listen host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the listen port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the superuser name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the superuser password, if any.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    /// Returns the server log path.
    #[must_use]
    pub fn log_file(&self) -> &Utf8Path {
        &self.log_file
    }

    /// Returns the database name clients should use.
    #[must_use]
    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Returns the name of the template database built for this server.
    #[must_use]
    pub fn template_dbname(&self) -> String {
        format!("{}_tmpl", self.dbname)
    }

    /// Returns the start timeout.
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        self.start_timeout
    }

    /// Reports whether `pg_ctl` was asked to wait for startup (`-w`).
    #[must_use]
    pub fn waits_for_start(&self) -> bool {
        self.startparams.split_whitespace().any(|param| param == "-w")
    }

    /// Connection parameters for `dbname` on this server.
    #[must_use]
    pub fn connection_params(&self, dbname: &str) -> ConnectionParams {
        ConnectionParams::new(self.host.clone(), self.port, self.user.clone(), dbname)
            .with_password(self.password.clone())
            .with_options(Some(self.options.clone()))
    }
}

impl fmt::Debug for ServerProcessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcessConfig")
            .field("executable", &self.executable)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("data_dir", &self.data_dir)
            .field("unix_socket_dir", &self.unix_socket_dir)
            .field("log_file", &self.log_file)
            .field("startparams", &self.startparams)
            .field("postgres_options", &self.postgres_options)
            .field("dbname", &self.dbname)
            .field("start_timeout", &self.start_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServerProcessConfig`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ServerProcessConfigBuilder {
    config: ServerProcessConfig,
}

impl ServerProcessConfigBuilder {
    /// Sets the listen host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the listen port.
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the superuser name.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    /// Sets the superuser password; empty passwords are ignored.
    pub fn password(mut self, password: Option<String>) -> Self {
        self.config.password = password.filter(|value| !value.is_empty());
        self
    }

    /// Sets libpq connection options used by probes and clients.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.config.options = options.into();
        self
    }

    /// Sets the unix-socket directory handed to the server.
    pub fn unix_socket_dir(mut self, dir: Option<Utf8PathBuf>) -> Self {
        self.config.unix_socket_dir = dir;
        self
    }

    /// Sets extra `pg_ctl start` parameters such as `-w`.
    pub fn startparams(mut self, startparams: impl Into<String>) -> Self {
        self.config.startparams = startparams.into();
        self
    }

    /// Sets extra server options appended to `-o`.
    pub fn postgres_options(mut self, options: impl Into<String>) -> Self {
        self.config.postgres_options = options.into();
        self
    }

    /// Sets the client database name.
    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.config.dbname = dbname.into();
        self
    }

    /// Sets the start timeout.
    pub const fn start_timeout(mut self, timeout: Duration) -> Self {
        self.config.start_timeout = timeout;
        self
    }

    /// Finalises the configuration.
    #[must_use]
    pub fn build(self) -> ServerProcessConfig {
        self.config
    }
}

/// Lifecycle position of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorState {
    /// No server has been launched, or the last one was reaped.
    #[default]
    Stopped,
    /// `pg_ctl start` was issued and readiness is being awaited.
    Starting,
    /// The server accepts connections.
    Running,
    /// `pg_ctl stop` was issued.
    Stopping,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Drives one PostgreSQL server through `pg_ctl`.
///
/// # Examples
/// ```no_run
/// use pg_test_fixtures::{PostgresExecutor, ServerProcessConfig};
///
/// # fn main() -> pg_test_fixtures::FixtureResult<()> {
/// let config = ServerProcessConfig::builder(
///     "/usr/lib/postgresql/16/bin/pg_ctl",
///     "/tmp/pg/data-5433",
///     "/tmp/pg/postgresql.5433.log",
/// )
/// .port(5433)
/// .build();
/// let mut executor = PostgresExecutor::new(config);
/// executor.start()?;
/// assert!(executor.running());
/// executor.stop()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PostgresExecutor<P: ServerProbe = PostgresProbe> {
    config: ServerProcessConfig,
    os: TargetOs,
    probe: P,
    state: ExecutorState,
    handle: ServerHandle,
    directory_initialised: bool,
    server_version: Option<PgVersion>,
}

impl PostgresExecutor<PostgresProbe> {
    /// Creates an executor that probes readiness with the real drivers.
    #[must_use]
    pub fn new(config: ServerProcessConfig) -> Self {
        Self::with_probe(config, PostgresProbe)
    }
}

impl<P: ServerProbe> PostgresExecutor<P> {
    /// Creates an executor with a custom readiness probe.
    #[must_use]
    pub fn with_probe(config: ServerProcessConfig, probe: P) -> Self {
        Self {
            config,
            os: TargetOs::current(),
            probe,
            state: ExecutorState::Stopped,
            handle: ServerHandle::default(),
            directory_initialised: false,
            server_version: None,
        }
    }

    /// Returns the launch configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerProcessConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ExecutorState {
        self.state
    }

    /// Returns the version reported by the running server, once started.
    #[must_use]
    pub const fn server_version(&self) -> Option<PgVersion> {
        self.server_version
    }

    /// Returns the rendered start command line.
    #[must_use]
    pub fn command_line(&self) -> String {
        self.handle.command_line().map_or_else(
            || start_command(&self.config, self.os).render(self.os),
            str::to_owned,
        )
    }

    /// Returns the name of the template database for this server.
    #[must_use]
    pub fn template_dbname(&self) -> String {
        self.config.template_dbname()
    }

    fn admin_params(&self) -> ConnectionParams {
        self.config.connection_params("postgres")
    }

    fn transition(&mut self, next: ExecutorState) {
        tracing::debug!(
            target: LOG_TARGET,
            port = self.config.port,
            from = %self.state,
            to = %next,
            "executor state change"
        );
        self.state = next;
    }

    /// Reports the version of the control tool binary.
    ///
    /// # Errors
    /// Returns an error when the tool cannot be run or prints an unexpected
    /// banner.
    pub fn version(&self) -> FixtureResult<PgVersion> {
        let command = version_command(&self.config.executable, self.os);
        let rendered = command.render(self.os);
        let output = run_blocking(&command, &rendered).map_err(|err| missing_tool(&rendered, err))?;
        ensure_success("pg_ctl --version failed", &output)?;
        String::from_utf8_lossy(&output.stdout).parse()
    }

    /// Cooperative counterpart of [`PostgresExecutor::version`].
    ///
    /// # Errors
    /// Same as [`PostgresExecutor::version`].
    pub async fn version_async(&self) -> FixtureResult<PgVersion> {
        let command = version_command(&self.config.executable, self.os);
        let rendered = command.render(self.os);
        let output = run_async(&command, &rendered)
            .await
            .map_err(|err| missing_tool(&rendered, err))?;
        ensure_success("pg_ctl --version failed", &output)?;
        String::from_utf8_lossy(&output.stdout).parse()
    }

    fn ensure_supported(&self, version: PgVersion, source: &str) -> FixtureResult<()> {
        if version.is_supported() {
            return Ok(());
        }
        Err(FixtureError::new(
            FixtureErrorKind::UnsupportedVersion,
            eyre!(
                "PostgreSQL {version} reported by {source} is not supported; \
                 upgrade to {MIN_SUPPORTED_VERSION} or newer (pg_ctl: {})",
                self.config.executable
            ),
        ))
    }

    fn password_file(&self) -> Utf8PathBuf {
        let mut name = self.config.data_dir.file_name().unwrap_or("data").to_owned();
        name.push_str(".pwfile");
        self.config
            .data_dir
            .parent()
            .map_or_else(|| Utf8PathBuf::from(&name), |parent| parent.join(&name))
    }

    fn prepare_initdb(&self) -> FixtureResult<(ControlCommand, Option<Utf8PathBuf>)> {
        remove_dir_all_if_exists(&self.config.data_dir)?;
        let password_file = match &self.config.password {
            Some(password) => {
                let path = self.password_file();
                write_file(&path, password)?;
                Some(path)
            }
            None => None,
        };
        let command = initdb_command(&self.config, password_file.as_deref(), self.os);
        Ok((command, password_file))
    }

    fn finish_initdb(
        &mut self,
        output: FixtureResult<std::process::Output>,
        password_file: Option<&Utf8Path>,
    ) -> FixtureResult<()> {
        if let Some(path) = password_file {
            remove_file_if_exists(path)?;
        }
        ensure_success(
            &format!("pg_ctl initdb failed for {}", self.config.data_dir),
            &output?,
        )?;
        self.directory_initialised = true;
        Ok(())
    }

    /// Runs `pg_ctl initdb` for the data directory unless this executor has
    /// already done so. Any stale directory is removed first.
    ///
    /// # Errors
    /// Returns an error when `initdb` fails; its output is included.
    pub fn init_directory(&mut self) -> FixtureResult<()> {
        if self.directory_initialised {
            return Ok(());
        }
        let (command, password_file) = self.prepare_initdb()?;
        let output = run_blocking(&command, &command.render(self.os));
        self.finish_initdb(output, password_file.as_deref())
    }

    /// Cooperative counterpart of [`PostgresExecutor::init_directory`].
    ///
    /// # Errors
    /// Same as [`PostgresExecutor::init_directory`].
    pub async fn init_directory_async(&mut self) -> FixtureResult<()> {
        if self.directory_initialised {
            return Ok(());
        }
        let (command, password_file) = self.prepare_initdb()?;
        let output = run_async(&command, &command.render(self.os)).await;
        self.finish_initdb(output, password_file.as_deref())
    }

    /// Deletes the data directory.
    ///
    /// # Errors
    /// Returns an error when the directory exists but cannot be removed.
    pub fn remove_directory(&mut self) -> FixtureResult<()> {
        remove_dir_all_if_exists(&self.config.data_dir)?;
        self.directory_initialised = false;
        Ok(())
    }

    fn launch(&mut self) -> FixtureResult<()> {
        let command = start_command(&self.config, self.os);
        let rendered = command.render(self.os);
        info!(target: LOG_TARGET, command = %rendered, "launching PostgreSQL");
        self.handle.launch(&command, rendered, &self.config.log_file)
    }

    /// One readiness attempt: the launched process must not have failed, the
    /// log must announce readiness when `-w` was requested, and the probe must
    /// answer.
    fn launch_settled(&self) -> Result<(), ProbeError> {
        match self.handle.exit_status() {
            Ok(Some(status)) if !status.success() => Err(ProbeError::fatal(launch_failure(
                status,
                &self.config.log_file,
            ))),
            Ok(_) => {
                if self.config.waits_for_start()
                    && !log_reports_ready(&self.config.log_file).unwrap_or(false)
                {
                    return Err(ProbeError::pending(eyre!(
                        "server log {} does not report readiness yet",
                        self.config.log_file
                    )));
                }
                Ok(())
            }
            Err(err) => Err(ProbeError::fatal(err)),
        }
    }

    fn readiness_attempt(&self) -> Result<PgVersion, ProbeError> {
        self.launch_settled()?;
        self.probe.server_version(&self.admin_params())
    }

    async fn readiness_attempt_async(&self) -> Result<PgVersion, ProbeError> {
        self.launch_settled()?;
        self.probe.server_version_async(&self.admin_params()).await
    }

    fn readiness_failure(&self, err: RetryError<ProbeError>) -> FixtureError {
        match err {
            RetryError::TimedOut {
                elapsed,
                attempts,
                last,
            } => FixtureError::new(
                FixtureErrorKind::StartupTimeout,
                eyre!(
                    "PostgreSQL on {}:{} did not accept connections within {:?} \
                     ({attempts} attempts over {elapsed:?}); last error: {last}; \
                     data dir {}; server log {}:\n{}",
                    self.config.host,
                    self.config.port,
                    self.config.start_timeout,
                    self.config.data_dir,
                    self.config.log_file,
                    log_tail(&self.config.log_file)
                ),
            ),
            RetryError::Fatal(source) => source.into_error(),
        }
    }

    fn start_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.start_timeout)
    }

    fn span(&self, operation: &'static str) -> tracing::Span {
        info_span!(
            target: LOG_TARGET,
            "executor",
            operation,
            port = self.config.port,
            data_dir = %self.config.data_dir
        )
    }

    /// Launches the server and blocks until it accepts connections.
    ///
    /// Starting an executor that is already running is a no-op. On any
    /// failure the half-started server is stopped before the error is
    /// returned, leaving the executor [`ExecutorState::Stopped`].
    ///
    /// # Errors
    /// - [`FixtureErrorKind::UnsupportedVersion`] when the binary or the
    ///   running server is older than the supported minimum.
    /// - [`FixtureErrorKind::StartupTimeout`] when the server does not answer
    ///   within the start timeout.
    /// - Launch and `initdb` failures with their captured output.
    pub fn start(&mut self) -> FixtureResult<()> {
        let span = self.span("start");
        let _entered = span.enter();
        if self.state == ExecutorState::Running {
            return Ok(());
        }
        self.transition(ExecutorState::Starting);
        let outcome = self.start_steps();
        match outcome {
            Ok(version) => {
                self.server_version = Some(version);
                self.transition(ExecutorState::Running);
                info!(target: LOG_TARGET, %version, "PostgreSQL is accepting connections");
                Ok(())
            }
            Err(err) => {
                self.abort_start();
                Err(err)
            }
        }
    }

    fn start_steps(&mut self) -> FixtureResult<PgVersion> {
        let binary = self.version()?;
        self.ensure_supported(binary, "pg_ctl --version")?;
        self.init_directory()?;
        self.launch()?;
        let policy = self.start_policy();
        let version = retry(|| self.readiness_attempt(), policy, ProbeError::is_retryable)
            .map_err(|err| self.readiness_failure(err))?;
        self.ensure_supported(version, "the running server")?;
        Ok(version)
    }

    fn abort_start(&mut self) {
        if self.handle.has_child() {
            let command = stop_command(&self.config, self.os);
            if let Err(err) = run_blocking(&command, &command.render(self.os)) {
                warn!(target: LOG_TARGET, error = %err, "failed to stop half-started server");
            }
            self.handle.reap(TERMINATE_GRACE);
        }
        self.transition(ExecutorState::Stopped);
    }

    /// Cooperative counterpart of [`PostgresExecutor::start`].
    ///
    /// # Errors
    /// Same as [`PostgresExecutor::start`].
    pub async fn start_async(&mut self) -> FixtureResult<()> {
        let span = self.span("start");
        self.start_async_inner().instrument(span).await
    }

    async fn start_async_inner(&mut self) -> FixtureResult<()> {
        if self.state == ExecutorState::Running {
            return Ok(());
        }
        self.transition(ExecutorState::Starting);
        let outcome = self.start_steps_async().await;
        match outcome {
            Ok(version) => {
                self.server_version = Some(version);
                self.transition(ExecutorState::Running);
                info!(target: LOG_TARGET, %version, "PostgreSQL is accepting connections");
                Ok(())
            }
            Err(err) => {
                self.abort_start_async().await;
                Err(err)
            }
        }
    }

    async fn start_steps_async(&mut self) -> FixtureResult<PgVersion> {
        let binary = self.version_async().await?;
        self.ensure_supported(binary, "pg_ctl --version")?;
        self.init_directory_async().await?;
        self.launch()?;
        let policy = self.start_policy();
        let this = &*self;
        let version = retry_async(
            || this.readiness_attempt_async(),
            policy,
            ProbeError::is_retryable,
        )
        .await
        .map_err(|err| this.readiness_failure(err))?;
        self.ensure_supported(version, "the running server")?;
        Ok(version)
    }

    async fn abort_start_async(&mut self) {
        if self.handle.has_child() {
            let command = stop_command(&self.config, self.os);
            if let Err(err) = run_async(&command, &command.render(self.os)).await {
                warn!(target: LOG_TARGET, error = %err, "failed to stop half-started server");
            }
            self.handle.reap_async(TERMINATE_GRACE).await;
        }
        self.transition(ExecutorState::Stopped);
    }

    fn stop_outcome(
        &self,
        output: FixtureResult<std::process::Output>,
        still_running: bool,
    ) -> FixtureResult<()> {
        match output {
            Ok(output) if output.status.success() => Ok(()),
            // A server that is already gone satisfies the stop request.
            Ok(_) | Err(_) if !still_running => Ok(()),
            Ok(output) => Err(render_failure(
                &format!("pg_ctl stop failed for {}", self.config.data_dir),
                &output,
            )),
            Err(err) => Err(err),
        }
    }

    /// Stops the server with `pg_ctl stop -m f` and reaps the launched
    /// process. Stopping a stopped executor is a no-op.
    ///
    /// # Errors
    /// Returns an error when `pg_ctl stop` fails while the server is still
    /// reported as running.
    pub fn stop(&mut self) -> FixtureResult<()> {
        let span = self.span("stop");
        let _entered = span.enter();
        if self.state == ExecutorState::Stopped && !self.handle.has_child() {
            return Ok(());
        }
        self.transition(ExecutorState::Stopping);
        let command = stop_command(&self.config, self.os);
        let output = run_blocking(&command, &command.render(self.os));
        let failed = !output.as_ref().is_ok_and(|out| out.status.success());
        let still_running = failed && self.status_reports_running();
        let outcome = self.stop_outcome(output, still_running);
        self.handle.reap(TERMINATE_GRACE);
        self.transition(ExecutorState::Stopped);
        info!(target: LOG_TARGET, port = self.config.port, "PostgreSQL stopped");
        outcome
    }

    /// Cooperative counterpart of [`PostgresExecutor::stop`].
    ///
    /// # Errors
    /// Same as [`PostgresExecutor::stop`].
    pub async fn stop_async(&mut self) -> FixtureResult<()> {
        let span = self.span("stop");
        self.stop_async_inner().instrument(span).await
    }

    async fn stop_async_inner(&mut self) -> FixtureResult<()> {
        if self.state == ExecutorState::Stopped && !self.handle.has_child() {
            return Ok(());
        }
        self.transition(ExecutorState::Stopping);
        let command = stop_command(&self.config, self.os);
        let output = run_async(&command, &command.render(self.os)).await;
        let failed = !output.as_ref().is_ok_and(|out| out.status.success());
        let still_running = failed && self.status_reports_running_async().await;
        let outcome = self.stop_outcome(output, still_running);
        self.handle.reap_async(TERMINATE_GRACE).await;
        self.transition(ExecutorState::Stopped);
        info!(target: LOG_TARGET, port = self.config.port, "PostgreSQL stopped");
        outcome
    }

    fn status_reports_running(&self) -> bool {
        if !path_exists(&self.config.data_dir) {
            return false;
        }
        let command = status_command(&self.config, self.os);
        run_blocking(&command, &command.render(self.os)).is_ok_and(|out| out.status.success())
    }

    async fn status_reports_running_async(&self) -> bool {
        if !path_exists(&self.config.data_dir) {
            return false;
        }
        let command = status_command(&self.config, self.os);
        run_async(&command, &command.render(self.os))
            .await
            .is_ok_and(|out| out.status.success())
    }

    /// Reports whether the server is up: either the launched process is
    /// still alive or `pg_ctl status` finds a server for the data directory.
    #[must_use]
    pub fn running(&self) -> bool {
        self.handle.child_alive() || self.status_reports_running()
    }

    /// Cooperative counterpart of [`PostgresExecutor::running`].
    pub async fn running_async(&self) -> bool {
        self.handle.child_alive() || self.status_reports_running_async().await
    }
}

impl<P: ServerProbe> Drop for PostgresExecutor<P> {
    fn drop(&mut self) {
        if self.state != ExecutorState::Stopped || self.handle.has_child() {
            if let Err(err) = self.stop() {
                warn!(
                    target: LOG_TARGET,
                    port = self.config.port,
                    error = %err,
                    "{SKIP_PREFIX}: failed to stop PostgreSQL during drop"
                );
            }
        }
        if self.directory_initialised {
            if let Err(err) = self.remove_directory() {
                warn!(
                    target: LOG_TARGET,
                    data_dir = %self.config.data_dir,
                    error = %err,
                    "failed to remove data directory during drop"
                );
            }
        }
    }
}

fn missing_tool(rendered: &str, err: FixtureError) -> FixtureError {
    FixtureError::new(
        FixtureErrorKind::ExecutableMissing,
        eyre!("could not run {rendered}: {}", err.report()),
    )
}

#[cfg(test)]
mod tests;
