//! Canonical PostgreSQL version values.
//!
//! Versions arrive as `pg_ctl --version` banners, dotted strings, bare major
//! numbers, or `server_version_num` integers. [`PgVersion`] normalises all of
//! them at construction time so comparisons never depend on the input shape.

use std::fmt;
use std::str::FromStr;

use color_eyre::eyre::eyre;

use crate::error::{FixtureError, FixtureErrorKind};

/// Oldest server release the fixtures drive.
pub const MIN_SUPPORTED_VERSION: PgVersion = PgVersion::new(10, 0);

/// Ordered `major.minor` PostgreSQL version.
///
/// # Examples
/// ```
/// use pg_test_fixtures::PgVersion;
///
/// let banner: PgVersion = "pg_ctl (PostgreSQL) 16.2".parse()?;
/// assert_eq!(banner, PgVersion::new(16, 2));
/// assert_eq!(PgVersion::from_major(10), "10".parse::<PgVersion>()?);
/// assert!(PgVersion::from_version_num(90_624) < PgVersion::new(10, 0));
/// # Ok::<(), pg_test_fixtures::FixtureError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PgVersion {
    major: u32,
    minor: u32,
}

impl PgVersion {
    /// Builds a version from explicit components.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Builds a version from a bare major number such as `10`.
    #[must_use]
    pub const fn from_major(major: u32) -> Self {
        Self::new(major, 0)
    }

    /// Decodes the integer reported by `SHOW server_version_num`.
    ///
    /// Releases before 10 encode `major.minor.patch` as `MMmmpp`; later
    /// releases encode `major.minor` as `MM00mm`.
    #[must_use]
    pub const fn from_version_num(num: u32) -> Self {
        let major = num.div_euclid(10_000);
        if major >= 10 {
            Self::new(major, num.rem_euclid(10_000))
        } else {
            Self::new(major, num.div_euclid(100).rem_euclid(100))
        }
    }

    /// Returns the major component.
    #[must_use]
    pub const fn major(self) -> u32 {
        self.major
    }

    /// Returns the minor component.
    #[must_use]
    pub const fn minor(self) -> u32 {
        self.minor
    }

    /// Reports whether this version satisfies [`MIN_SUPPORTED_VERSION`].
    #[must_use]
    pub fn is_supported(self) -> bool {
        self >= MIN_SUPPORTED_VERSION
    }

    fn parse_token(token: &str) -> Option<Self> {
        let mut parts = token.split('.');
        let major = leading_number(parts.next()?)?;
        let minor = parts.next().and_then(leading_number).unwrap_or(0);
        Some(Self::new(major, minor))
    }
}

fn leading_number(segment: &str) -> Option<u32> {
    let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

impl FromStr for PgVersion {
    type Err = FixtureError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        // `server_version_num` values are plain six-digit integers.
        if trimmed.len() >= 5 && trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            if let Ok(num) = trimmed.parse::<u32>() {
                return Ok(Self::from_version_num(num));
            }
        }

        trimmed
            .split_whitespace()
            .rev()
            .find(|token| token.starts_with(|ch: char| ch.is_ascii_digit()))
            .and_then(Self::parse_token)
            .ok_or_else(|| {
                FixtureError::new(
                    FixtureErrorKind::InvalidConfig,
                    eyre!("could not parse a PostgreSQL version from '{trimmed}'"),
                )
            })
    }
}

impl From<u32> for PgVersion {
    fn from(major: u32) -> Self {
        Self::from_major(major)
    }
}

impl fmt::Display for PgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
