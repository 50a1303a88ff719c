//! Named loaders addressable from configuration strings.

use std::collections::BTreeMap;

use super::{AsyncLoader, Loader, ResolvedLoader};

/// Maps `module.name` references to loaders.
///
/// Configuration can only name loaders as strings, so every loader a test
/// suite wants to reference that way is registered up front.
///
/// # Examples
/// ```
/// use pg_test_fixtures::{FixtureResult, LoadParams, LoaderRegistry};
///
/// let mut registry = LoaderRegistry::default();
/// registry.register("fixtures", "orders", |_: &LoadParams| -> FixtureResult<()> { Ok(()) });
/// assert!(registry.lookup("fixtures", "orders").is_some());
/// assert!(registry.lookup("fixtures", "users").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoaderRegistry {
    entries: BTreeMap<String, ResolvedLoader>,
}

fn key(module: &str, name: &str) -> String {
    format!("{module}.{name}")
}

impl LoaderRegistry {
    /// Registers a blocking loader, replacing any previous entry.
    pub fn register(&mut self, module: &str, name: &str, loader: impl Loader + 'static) -> &mut Self {
        self.entries
            .insert(key(module, name), ResolvedLoader::blocking(loader));
        self
    }

    /// Registers an asynchronous loader, replacing any previous entry.
    pub fn register_async(
        &mut self,
        module: &str,
        name: &str,
        loader: impl AsyncLoader + 'static,
    ) -> &mut Self {
        self.entries
            .insert(key(module, name), ResolvedLoader::cooperative(loader));
        self
    }

    /// Returns the loader registered under `module` and `name`.
    #[must_use]
    pub fn lookup(&self, module: &str, name: &str) -> Option<ResolvedLoader> {
        self.entries.get(&key(module, name)).cloned()
    }

    /// Lists registered references in `module.name` form.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
