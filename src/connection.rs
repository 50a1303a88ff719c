//! Connection parameters shared by the executor probe, the janitor, and
//! loaders.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use postgres::error::SqlState;

/// Identity of one database on one server.
///
/// Loaders receive this value when asked to apply content, and the janitor
/// derives its administrative connections from it.
///
/// # Examples
/// ```
/// use pg_test_fixtures::ConnectionParams;
///
/// let params = ConnectionParams::new("127.0.0.1", 5433, "postgres", "tests");
/// assert_eq!(params.url(), "postgresql://postgres@127.0.0.1:5433/tests");
/// assert_eq!(params.with_dbname("postgres").dbname(), "postgres");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    dbname: String,
    options: Option<String>,
}

impl ConnectionParams {
    /// Creates parameters without a password.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: None,
            dbname: dbname.into(),
            options: None,
        }
    }

    /// Sets the password; empty strings are treated as absent.
    #[must_use]
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|value| !value.is_empty());
        self
    }

    /// Sets libpq-style `options` passed to the backend at connect time.
    #[must_use]
    pub fn with_options(mut self, options: Option<String>) -> Self {
        self.options = options.filter(|value| !value.is_empty());
        self
    }

    /// Returns a copy targeting `dbname` on the same server.
    #[must_use]
    pub fn with_dbname(&self, dbname: impl Into<String>) -> Self {
        Self {
            dbname: dbname.into(),
            ..self.clone()
        }
    }

    /// Returns the host name or socket directory.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the role name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the password, if one is configured.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns the database name.
    #[must_use]
    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Returns the backend options string, if any.
    #[must_use]
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Renders a libpq URL without the password.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            self.user, self.host, self.port, self.dbname
        )
    }

    /// Builds a blocking driver configuration.
    #[must_use]
    pub fn postgres_config(&self, connect_timeout: Option<Duration>) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname);
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(options) = &self.options {
            config.options(options);
        }
        if let Some(timeout) = connect_timeout {
            config.connect_timeout(timeout);
        }
        config
    }

    /// Builds a cooperative driver configuration.
    #[must_use]
    pub fn tokio_config(&self, connect_timeout: Option<Duration>) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname);
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(options) = &self.options {
            config.options(options);
        }
        if let Some(timeout) = connect_timeout {
            config.connect_timeout(timeout);
        }
        config
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dbname", &self.dbname)
            .field("options", &self.options)
            .finish()
    }
}

/// Upper bound on a single connection attempt.
pub(crate) const ATTEMPT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lower bound keeping a nearly expired budget from disabling the timeout.
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(50);

/// Socket connect timeout for one attempt made before `deadline`.
pub(crate) fn attempt_timeout(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .clamp(MIN_ATTEMPT_TIMEOUT, ATTEMPT_CONNECT_TIMEOUT)
}

/// Reports whether a driver error means "try again shortly": the socket
/// could not be opened or was dropped, or the server is still starting up.
///
/// Configuration and authentication failures carry no I/O cause and are
/// never transient.
pub(crate) fn is_transient(err: &postgres::Error) -> bool {
    if let Some(db) = err.as_db_error() {
        return *db.code() == SqlState::CANNOT_CONNECT_NOW;
    }
    err.is_closed()
        || std::error::Error::source(err).is_some_and(|cause| cause.is::<io::Error>())
}

/// Quotes `name` as a PostgreSQL identifier body by doubling embedded quotes.
#[must_use]
pub fn escape_identifier(name: &str) -> String {
    name.replace('"', "\"\"")
}
