//! Environment-driven fixture configuration.
//!
//! [`PgFixtureCfg`] mirrors the raw `POSTGRESQL_*` environment variables;
//! [`FixtureSettings`] is the validated form with every default applied.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::{Context, eyre};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::executor::{DEFAULT_PG_CTL, DEFAULT_START_TIMEOUT};
use crate::janitor::DEFAULT_CONNECTION_TIMEOUT;
use crate::loader::LoadDirective;
use crate::port::{DEFAULT_PORT_SEARCH_COUNT, PortSpec};

/// Port of an existing server when none is configured.
pub const DEFAULT_PORT: u16 = 5432;

/// Raw fixture settings read from `POSTGRESQL_*` environment variables.
///
/// # Examples
/// ```
/// use pg_test_fixtures::PgFixtureCfg;
///
/// let cfg = PgFixtureCfg::default();
/// let settings = cfg.to_settings().expect("defaults are valid");
/// assert_eq!(settings.dbname, "tests");
/// assert_eq!(settings.port_search_count, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, OrthoConfig, Default)]
#[ortho_config(prefix = "POSTGRESQL")]
pub struct PgFixtureCfg {
    /// Path to `pg_ctl`.
    pub exec: Option<Utf8PathBuf>,
    /// Host the server listens on.
    pub host: Option<String>,
    /// Port request: a number, `any`, `a-b`, or a comma-separated mix.
    #[serde(default, deserialize_with = "text_or_number")]
    pub port: Option<String>,
    /// Claim collisions tolerated before port allocation gives up.
    pub port_search_count: Option<u32>,
    /// Superuser name.
    #[serde(default, deserialize_with = "text_or_number")]
    pub user: Option<String>,
    /// Superuser password.
    #[serde(default, deserialize_with = "text_or_number")]
    pub password: Option<String>,
    /// libpq connection options.
    pub options: Option<String>,
    /// Extra `pg_ctl start` parameters.
    pub startparams: Option<String>,
    /// Unix-socket directory handed to the server.
    pub unixsocketdir: Option<Utf8PathBuf>,
    /// Base database name.
    #[serde(default, deserialize_with = "text_or_number")]
    pub dbname: Option<String>,
    /// Comma-separated load directives applied to the template database.
    pub load: Option<String>,
    /// Extra server options passed through `pg_ctl -o`.
    pub postgres_options: Option<String>,
    /// Drop a stale test database before creating it.
    pub drop_test_database: Option<bool>,
    /// Seconds allowed for the server to accept connections.
    pub start_timeout_secs: Option<u64>,
    /// Seconds allowed for administrative connections.
    pub connection_timeout_secs: Option<u64>,
    /// Identifier of the parallel test worker, appended to database names
    /// for existing servers.
    #[serde(default, deserialize_with = "text_or_number")]
    pub worker_id: Option<String>,
    /// Directory shared by parallel workers for port claims and server
    /// working directories.
    pub run_dir: Option<Utf8PathBuf>,
}

/// A textual setting that the environment provider may have typed as a
/// number, as happens for `POSTGRESQL_PORT=5432`.
#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<TextOrNumber>::deserialize(deserializer)?;
    Ok(raw.map(|value| match value {
        TextOrNumber::Text(text) => text,
        TextOrNumber::Unsigned(number) => number.to_string(),
        TextOrNumber::Signed(number) => number.to_string(),
    }))
}

impl PgFixtureCfg {
    /// Loads configuration from environment variables without parsing CLI
    /// arguments.
    ///
    /// # Errors
    /// Returns an error when a variable cannot be parsed into its field.
    pub fn load() -> ConfigResult<Self> {
        let args = [OsString::from("pg-test-fixtures")];
        Self::load_from_iter(args).map_err(|err| ConfigError::from(eyre!(err)))
    }

    /// Applies defaults and validates the raw values.
    ///
    /// # Errors
    /// Returns an error when the port request, the load list, or a timeout
    /// is invalid.
    pub fn to_settings(&self) -> ConfigResult<FixtureSettings> {
        let defaults = FixtureSettings::default();
        let port = match self.port.as_deref() {
            Some(raw) => raw
                .parse::<PortSpec>()
                .context("POSTGRESQL_PORT is not a valid port request")?,
            None => defaults.port,
        };
        let load = match self.load.as_deref() {
            Some(raw) => LoadDirective::parse_list(raw)
                .context("POSTGRESQL_LOAD contains an invalid directive")?,
            None => Vec::new(),
        };
        let start_timeout = positive_secs(self.start_timeout_secs, "POSTGRESQL_START_TIMEOUT_SECS")?
            .unwrap_or(defaults.start_timeout);
        let connection_timeout =
            positive_secs(self.connection_timeout_secs, "POSTGRESQL_CONNECTION_TIMEOUT_SECS")?
                .unwrap_or(defaults.connection_timeout);

        Ok(FixtureSettings {
            executable: self.exec.clone(),
            host: self.host.clone().unwrap_or(defaults.host),
            port,
            port_search_count: self.port_search_count.unwrap_or(defaults.port_search_count),
            user: self.user.clone().unwrap_or(defaults.user),
            password: self.password.clone().filter(|value| !value.is_empty()),
            options: self.options.clone().unwrap_or_default(),
            startparams: self.startparams.clone().unwrap_or(defaults.startparams),
            unix_socket_dir: self.unixsocketdir.clone().or(defaults.unix_socket_dir),
            dbname: self.dbname.clone().unwrap_or(defaults.dbname),
            load,
            postgres_options: self.postgres_options.clone().unwrap_or_default(),
            drop_test_database: self.drop_test_database.unwrap_or(false),
            start_timeout,
            connection_timeout,
            worker_id: self.worker_id.clone().filter(|value| !value.is_empty()),
            run_dir: self.run_dir.clone(),
            ..defaults
        })
    }
}

fn positive_secs(value: Option<u64>, name: &str) -> ConfigResult<Option<Duration>> {
    match value {
        Some(0) => Err(ConfigError::from(eyre!("{name} must be greater than zero"))),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}

/// Validated settings for process and existing-server fixtures.
#[derive(Debug, Clone)]
pub struct FixtureSettings {
    /// Explicit `pg_ctl` path; skips discovery when set.
    pub executable: Option<Utf8PathBuf>,
    /// Path tried before asking `pg_config` where `pg_ctl` lives.
    pub configured_executable: Utf8PathBuf,
    /// Host the server listens on.
    pub host: String,
    /// Requested port shape. [`PortSpec::Default`] means any free port for a
    /// started server and [`DEFAULT_PORT`] for an existing one.
    pub port: PortSpec,
    /// Claim collisions tolerated before allocation gives up.
    pub port_search_count: u32,
    /// Superuser name.
    pub user: String,
    /// Superuser password.
    pub password: Option<String>,
    /// libpq connection options.
    pub options: String,
    /// Extra `pg_ctl start` parameters.
    pub startparams: String,
    /// Unix-socket directory handed to the server; defaults to the system
    /// temp directory. `None` keeps the server's compiled-in location.
    pub unix_socket_dir: Option<Utf8PathBuf>,
    /// Base database name; the template is `<dbname>_tmpl`.
    pub dbname: String,
    /// Directives applied to the template database after creation.
    pub load: Vec<LoadDirective>,
    /// Extra server options.
    pub postgres_options: String,
    /// Drop a stale database before creating it.
    pub drop_test_database: bool,
    /// Time allowed for the server to accept connections.
    pub start_timeout: Duration,
    /// Time allowed for administrative connections.
    pub connection_timeout: Duration,
    /// Parallel worker identifier.
    pub worker_id: Option<String>,
    /// Directory shared by parallel workers; defaults to
    /// `<system temp>/pg-test-fixtures`.
    pub run_dir: Option<Utf8PathBuf>,
}

impl Default for FixtureSettings {
    fn default() -> Self {
        Self {
            executable: None,
            configured_executable: Utf8PathBuf::from(DEFAULT_PG_CTL),
            host: "127.0.0.1".to_owned(),
            port: PortSpec::Default,
            port_search_count: DEFAULT_PORT_SEARCH_COUNT,
            user: "postgres".to_owned(),
            password: None,
            options: String::new(),
            startparams: "-w".to_owned(),
            unix_socket_dir: Some(system_temp_dir()),
            dbname: "tests".to_owned(),
            load: Vec::new(),
            postgres_options: String::new(),
            drop_test_database: false,
            start_timeout: DEFAULT_START_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            worker_id: None,
            run_dir: None,
        }
    }
}

impl FixtureSettings {
    /// Database name used against an existing server: the base name with
    /// the worker identifier appended when one is configured.
    #[must_use]
    pub fn worker_dbname(&self) -> String {
        self.worker_id.as_deref().map_or_else(
            || self.dbname.clone(),
            |worker| format!("{}{worker}", self.dbname),
        )
    }

    /// Directory holding port claims and per-server working directories.
    #[must_use]
    pub fn resolved_run_dir(&self) -> Utf8PathBuf {
        self.run_dir
            .clone()
            .unwrap_or_else(|| system_temp_dir().join("pg-test-fixtures"))
    }
}

fn system_temp_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::{Result, ensure};
    use rstest::rstest;

    #[test]
    fn raw_values_override_defaults() -> Result<()> {
        let cfg = PgFixtureCfg {
            exec: Some(Utf8PathBuf::from("/opt/pg/bin/pg_ctl")),
            port: Some("20000-20010".to_owned()),
            port_search_count: Some(10),
            user: Some("app".to_owned()),
            password: Some(String::new()),
            dbname: Some("orders".to_owned()),
            load: Some("schema.sql,fixtures:orders".to_owned()),
            start_timeout_secs: Some(5),
            worker_id: Some("gw1".to_owned()),
            ..PgFixtureCfg::default()
        };
        let settings = cfg.to_settings()?;
        ensure!(settings.executable.as_deref() == Some(camino::Utf8Path::new("/opt/pg/bin/pg_ctl")));
        ensure!(settings.port == PortSpec::Range(20_000..=20_010));
        ensure!(settings.port_search_count == 10);
        ensure!(settings.user == "app");
        ensure!(settings.password.is_none());
        ensure!(settings.load.len() == 2);
        ensure!(settings.start_timeout == Duration::from_secs(5));
        ensure!(settings.connection_timeout == DEFAULT_CONNECTION_TIMEOUT);
        ensure!(settings.worker_dbname() == "ordersgw1");
        Ok(())
    }

    #[test]
    fn defaults_follow_documented_values() -> Result<()> {
        let settings = PgFixtureCfg::default().to_settings()?;
        ensure!(settings.host == "127.0.0.1");
        ensure!(settings.port == PortSpec::Default);
        ensure!(settings.user == "postgres");
        ensure!(settings.startparams == "-w");
        ensure!(settings.worker_dbname() == "tests");
        ensure!(!settings.drop_test_database);
        ensure!(settings.resolved_run_dir().ends_with("pg-test-fixtures"));
        ensure!(settings.unix_socket_dir == Some(system_temp_dir()));
        Ok(())
    }

    #[test]
    fn configured_socket_directory_wins() -> Result<()> {
        let cfg = PgFixtureCfg {
            unixsocketdir: Some(Utf8PathBuf::from("/srv/pg-sockets")),
            ..PgFixtureCfg::default()
        };
        let settings = cfg.to_settings()?;
        ensure!(settings.unix_socket_dir.as_deref() == Some(camino::Utf8Path::new("/srv/pg-sockets")));
        Ok(())
    }

    #[rstest]
    #[case::bad_port(PgFixtureCfg { port: Some("80-70".to_owned()), ..PgFixtureCfg::default() })]
    #[case::bad_load(PgFixtureCfg { load: Some("orders".to_owned()), ..PgFixtureCfg::default() })]
    #[case::zero_timeout(PgFixtureCfg { start_timeout_secs: Some(0), ..PgFixtureCfg::default() })]
    fn invalid_values_are_rejected(#[case] cfg: PgFixtureCfg) {
        assert!(cfg.to_settings().is_err());
    }
}
