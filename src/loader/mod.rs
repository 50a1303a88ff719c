//! Load directives and their resolution to invocable loaders.
//!
//! A [`LoadDirective`] names *what* should populate a database: a SQL script,
//! a registered loader referenced by `module.name` or `module:name`, or a
//! loader value supplied directly. [`resolve`] turns a directive into a
//! [`ResolvedLoader`] before any connection is opened, so resolution failures
//! ([`FixtureErrorKind::LoadResolution`]) stay distinct from errors raised
//! while loading.

mod registry;
mod sql_file;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use color_eyre::eyre::eyre;

use crate::connection::ConnectionParams;
use crate::error::{FixtureError, FixtureErrorKind, FixtureResult};
use crate::fs::path_exists;
use crate::runtime::build_runtime;

pub use registry::LoaderRegistry;
pub use sql_file::SqlFileLoader;

/// Connection parameters handed to loaders: host, port, user, password, and
/// the database being populated.
pub type LoadParams = ConnectionParams;

/// Populates a database from blocking code.
pub trait Loader: Send + Sync {
    /// Loads data into the database described by `params`.
    ///
    /// # Errors
    /// Returns an error when loading fails; it is surfaced unchanged.
    fn load(&self, params: &LoadParams) -> FixtureResult<()>;
}

impl<F> Loader for F
where
    F: Fn(&LoadParams) -> FixtureResult<()> + Send + Sync,
{
    fn load(&self, params: &LoadParams) -> FixtureResult<()> {
        self(params)
    }
}

/// Populates a database from asynchronous code.
#[async_trait]
pub trait AsyncLoader: Send + Sync {
    /// Loads data into the database described by `params`.
    ///
    /// # Errors
    /// Returns an error when loading fails; it is surfaced unchanged.
    async fn load(&self, params: &LoadParams) -> FixtureResult<()>;
}

/// An invocable loader ready to receive connection parameters.
#[derive(Clone)]
pub enum ResolvedLoader {
    /// Runs a SQL script in one transaction.
    Script(SqlFileLoader),
    /// Blocking user loader.
    Blocking(Arc<dyn Loader>),
    /// Asynchronous user loader.
    Async(Arc<dyn AsyncLoader>),
}

impl ResolvedLoader {
    /// Wraps a blocking loader.
    #[must_use]
    pub fn blocking(loader: impl Loader + 'static) -> Self {
        Self::Blocking(Arc::new(loader))
    }

    /// Wraps an asynchronous loader.
    #[must_use]
    pub fn cooperative(loader: impl AsyncLoader + 'static) -> Self {
        Self::Async(Arc::new(loader))
    }

    /// Invokes the loader on the current thread. Asynchronous loaders run on
    /// a private current-thread runtime, so this must not be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    /// Propagates the loader's error.
    pub fn invoke(&self, params: &LoadParams) -> FixtureResult<()> {
        match self {
            Self::Script(loader) => loader.run(params),
            Self::Blocking(loader) => loader.load(params),
            Self::Async(loader) => build_runtime()?.block_on(loader.load(params)),
        }
    }

    /// Invokes the loader without blocking the runtime. Blocking loaders are
    /// moved onto the blocking thread pool.
    ///
    /// # Errors
    /// Propagates the loader's error, or reports a loader task that panicked.
    pub async fn invoke_async(&self, params: &LoadParams) -> FixtureResult<()> {
        match self {
            Self::Script(loader) => loader.run_async(params).await,
            Self::Async(loader) => loader.load(params).await,
            Self::Blocking(loader) => {
                let task_loader = Arc::clone(loader);
                let task_params = params.clone();
                tokio::task::spawn_blocking(move || task_loader.load(&task_params))
                    .await
                    .map_err(|err| FixtureError::from(eyre!("loader task failed: {err}")))?
            }
        }
    }
}

impl fmt::Debug for ResolvedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(loader) => f.debug_tuple("Script").field(loader).finish(),
            Self::Blocking(_) => f.write_str("Blocking(..)"),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// Describes how a database should be populated.
#[derive(Clone, Debug)]
pub enum LoadDirective {
    /// A `.sql` file executed as a whole.
    ScriptFile(Utf8PathBuf),
    /// A loader registered under `module` and `name`.
    SymbolRef {
        /// Registry namespace.
        module: String,
        /// Loader name within the namespace.
        name: String,
    },
    /// A loader value supplied directly.
    Invocable(ResolvedLoader),
}

impl LoadDirective {
    /// Parses a comma-separated list of directives, skipping blank entries.
    ///
    /// # Errors
    /// Returns [`FixtureErrorKind::LoadResolution`] for the first entry that
    /// is neither a script path nor a symbol reference.
    ///
    /// # Examples
    /// ```
    /// use pg_test_fixtures::LoadDirective;
    ///
    /// # fn main() -> pg_test_fixtures::FixtureResult<()> {
    /// let parsed = LoadDirective::parse_list("schema.sql, fixtures:orders")?;
    /// assert_eq!(parsed.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse_list(raw: &str) -> FixtureResult<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl From<ResolvedLoader> for LoadDirective {
    fn from(loader: ResolvedLoader) -> Self {
        Self::Invocable(loader)
    }
}

impl FromStr for LoadDirective {
    type Err = FixtureError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.ends_with(".sql") {
            return Ok(Self::ScriptFile(Utf8PathBuf::from(trimmed)));
        }
        let split = trimmed
            .split_once(':')
            .or_else(|| trimmed.rsplit_once('.'));
        match split {
            Some((module, name)) if !module.is_empty() && !name.is_empty() => Ok(Self::SymbolRef {
                module: module.to_owned(),
                name: name.to_owned(),
            }),
            _ => Err(resolution_error(format!(
                "'{trimmed}' is neither a .sql path nor a module.name reference"
            ))),
        }
    }
}

fn resolution_error(message: String) -> FixtureError {
    FixtureError::new(FixtureErrorKind::LoadResolution, eyre!(message))
}

/// Resolves `directive` against `registry`.
///
/// # Errors
/// Returns [`FixtureErrorKind::LoadResolution`] when the script file does not
/// exist or the symbol reference is not registered.
pub fn resolve(directive: &LoadDirective, registry: &LoaderRegistry) -> FixtureResult<ResolvedLoader> {
    match directive {
        LoadDirective::ScriptFile(path) => {
            if path_exists(path) {
                Ok(ResolvedLoader::Script(SqlFileLoader::new(path.clone())))
            } else {
                Err(resolution_error(format!("SQL script {path} does not exist")))
            }
        }
        LoadDirective::SymbolRef { module, name } => registry.lookup(module, name).ok_or_else(|| {
            resolution_error(format!(
                "no loader registered as {module}.{name}; registered: [{}]",
                registry.names().join(", ")
            ))
        }),
        LoadDirective::Invocable(loader) => Ok(loader.clone()),
    }
}
