//! Port selection with collision-tolerant claiming.
//!
//! Selection is stateless: every call re-queries the operating system for
//! availability. Cross-worker arbitration happens solely through exclusive
//! creation of claim markers in a shared directory, so parallel test
//! processes never need a central lock.

mod claim;
mod spec;

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use rand::seq::SliceRandom;
use tracing::{debug, info_span};

use crate::error::{FixtureError, FixtureErrorKind, FixtureResult};
use crate::observability::LOG_TARGET;

pub use claim::{PortClaim, claim_contents, claim_path};
pub use spec::PortSpec;

/// Service name used for PostgreSQL claim markers.
pub const DEFAULT_SERVICE: &str = "postgresql";
/// Collisions tolerated before allocation gives up.
pub const DEFAULT_PORT_SEARCH_COUNT: u32 = 5;

const EPHEMERAL_PROBES: u32 = 64;

/// Chooses and claims ports for server processes.
///
/// # Examples
/// ```no_run
/// use pg_test_fixtures::{PortAllocator, PortSpec};
///
/// # fn main() -> pg_test_fixtures::FixtureResult<()> {
/// let allocator = PortAllocator::new("/tmp/pg-run");
/// let claim = allocator.allocate(&PortSpec::Range(20_000..=20_100))?;
/// assert!((20_000..=20_100).contains(&claim.port()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PortAllocator {
    claim_dir: Utf8PathBuf,
    service: String,
    search_count: u32,
    default_spec: PortSpec,
}

impl PortAllocator {
    /// Creates an allocator that writes claim markers into `claim_dir`.
    #[must_use]
    pub fn new(claim_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            claim_dir: claim_dir.into(),
            service: DEFAULT_SERVICE.to_owned(),
            search_count: DEFAULT_PORT_SEARCH_COUNT,
            default_spec: PortSpec::Any,
        }
    }

    /// Overrides the service name embedded in marker files.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Overrides how many collisions are tolerated before giving up.
    #[must_use]
    pub const fn with_search_count(mut self, search_count: u32) -> Self {
        self.search_count = search_count;
        self
    }

    /// Sets the request that [`PortSpec::Default`] resolves to.
    #[must_use]
    pub fn with_default(mut self, default_spec: PortSpec) -> Self {
        self.default_spec = match default_spec {
            PortSpec::Default => PortSpec::Any,
            other => other,
        };
        self
    }

    /// Returns the claim directory.
    #[must_use]
    pub fn claim_dir(&self) -> &Utf8Path {
        &self.claim_dir
    }

    fn resolve<'a>(&'a self, requested: &'a PortSpec) -> &'a PortSpec {
        match requested {
            PortSpec::Default => &self.default_spec,
            other => other,
        }
    }

    /// Picks a port that satisfies `requested`, is not in `excluded`, has no
    /// claim marker, and can currently be bound on the loopback interface.
    ///
    /// # Errors
    /// Returns [`FixtureErrorKind::PortSelectionExhausted`] when no candidate
    /// qualifies.
    pub fn choose_port(&self, requested: &PortSpec, excluded: &BTreeSet<u16>) -> FixtureResult<u16> {
        let spec = self.resolve(requested);
        let chosen = spec.candidates().map_or_else(
            || self.choose_ephemeral(excluded),
            |candidates| self.choose_from(candidates, excluded),
        );
        chosen.ok_or_else(|| {
            exhausted(eyre!(
                "no free port satisfies request '{spec}' (excluded: {})",
                render_ports(excluded)
            ))
        })
    }

    fn choose_from(&self, candidates: BTreeSet<u16>, excluded: &BTreeSet<u16>) -> Option<u16> {
        let mut open: Vec<u16> = candidates
            .into_iter()
            .filter(|port| !excluded.contains(port))
            .filter(|port| !claim::is_claimed(&self.claim_dir, &self.service, *port))
            .collect();
        open.shuffle(&mut rand::thread_rng());
        open.into_iter().find(|port| port_is_free(*port))
    }

    fn choose_ephemeral(&self, excluded: &BTreeSet<u16>) -> Option<u16> {
        (0..EPHEMERAL_PROBES)
            .filter_map(|_| ephemeral_port())
            .find(|port| {
                !excluded.contains(port)
                    && !claim::is_claimed(&self.claim_dir, &self.service, *port)
            })
    }

    /// Chooses a port and claims it, retrying on collisions with other
    /// workers.
    ///
    /// # Errors
    /// Returns [`FixtureErrorKind::PortSelectionExhausted`] naming every port
    /// tried once more than the configured search count of collisions occur
    /// or no candidates remain. Filesystem failures surface as
    /// [`FixtureErrorKind::Other`].
    pub fn allocate(&self, requested: &PortSpec) -> FixtureResult<PortClaim> {
        let _span = info_span!(
            target: LOG_TARGET,
            "allocate_port",
            request = %requested,
            dir = %self.claim_dir
        )
        .entered();
        crate::fs::ensure_dir_exists(&self.claim_dir)?;

        let mut tried = BTreeSet::new();
        let mut collisions = 0_u32;
        loop {
            let port = self.choose_port(requested, &tried).map_err(|err| {
                if tried.is_empty() {
                    err
                } else {
                    exhausted(eyre!(
                        "{}; ports already claimed by other workers: {}",
                        err.report(),
                        render_ports(&tried)
                    ))
                }
            })?;
            if let Some(claim) = claim::try_claim(&self.claim_dir, &self.service, port)? {
                return Ok(claim);
            }

            debug!(target: LOG_TARGET, port, "port claim collided with another worker");
            tried.insert(port);
            collisions = collisions.saturating_add(1);
            if collisions > self.search_count {
                return Err(exhausted(eyre!(
                    "attempted {collisions} times to select ports in {}; all attempted ports \
                     ({}) are already in use, probably by other instances of the test",
                    self.claim_dir,
                    render_ports(&tried)
                )));
            }
        }
    }
}

fn exhausted(report: color_eyre::Report) -> FixtureError {
    FixtureError::new(FixtureErrorKind::PortSelectionExhausted, report)
}

fn render_ports(ports: &BTreeSet<u16>) -> String {
    if ports.is_empty() {
        return "none".to_owned();
    }
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

fn ephemeral_port() -> Option<u16> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|listener| listener.local_addr())
        .ok()
        .map(|addr| addr.port())
}
