//! Port request shapes accepted by the allocator.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use color_eyre::eyre::eyre;

use crate::error::{ConfigError, ConfigResult};

/// Describes which ports a fixture is willing to run on.
///
/// The textual form accepted by [`FromStr`] mirrors the environment
/// configuration:
///
/// | Input              | Shape                      |
/// |--------------------|----------------------------|
/// | `any` or empty     | [`PortSpec::Any`]          |
/// | `default` or `-1`  | [`PortSpec::Default`]      |
/// | `5433`             | [`PortSpec::Fixed`]        |
/// | `2000-3000`        | [`PortSpec::Range`]        |
/// | `4002,4003`        | [`PortSpec::Set`]          |
/// | `2000-2010,4002`   | [`PortSpec::Mixed`]        |
///
/// # Examples
/// ```
/// use pg_test_fixtures::PortSpec;
///
/// let spec: PortSpec = "2000-3000".parse()?;
/// assert_eq!(spec, PortSpec::Range(2000..=3000));
/// assert!(spec.admits(2500));
/// # Ok::<(), pg_test_fixtures::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PortSpec {
    /// Exactly this port.
    Fixed(u16),
    /// Any port the operating system reports as free.
    Any,
    /// Whatever the allocator was configured with; falls back to
    /// [`PortSpec::Any`] when no default exists.
    #[default]
    Default,
    /// Any port within the closed range.
    Range(RangeInclusive<u16>),
    /// Any of the listed ports.
    Set(BTreeSet<u16>),
    /// Union of ranges and sets.
    Mixed(Vec<PortSpec>),
}

impl PortSpec {
    /// Returns the finite candidate list, or `None` for shapes that defer to
    /// the operating system or to configuration.
    #[must_use]
    pub fn candidates(&self) -> Option<BTreeSet<u16>> {
        match self {
            Self::Fixed(port) => Some(BTreeSet::from([*port])),
            Self::Any | Self::Default => None,
            Self::Range(range) => Some(range.clone().collect()),
            Self::Set(ports) => Some(ports.clone()),
            Self::Mixed(parts) => Some(
                parts
                    .iter()
                    .filter_map(Self::candidates)
                    .flatten()
                    .collect(),
            ),
        }
    }

    /// Reports whether `port` satisfies this request. Open-ended shapes admit
    /// every non-zero port.
    #[must_use]
    pub fn admits(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        match self {
            Self::Fixed(fixed) => *fixed == port,
            Self::Any | Self::Default => true,
            Self::Range(range) => range.contains(&port),
            Self::Set(ports) => ports.contains(&port),
            Self::Mixed(parts) => parts.iter().any(|part| part.admits(port)),
        }
    }
}

fn parse_port(raw: &str, input: &str) -> ConfigResult<u16> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::from(eyre!(
            "invalid port '{raw}' in port request '{input}'"
        ))),
        Ok(port) => Ok(port),
    }
}

fn parse_range(raw: &str, input: &str) -> ConfigResult<RangeInclusive<u16>> {
    let Some((low, high)) = raw.split_once('-') else {
        return Err(ConfigError::from(eyre!(
            "invalid range '{raw}' in port request '{input}'"
        )));
    };
    let start = parse_port(low, input)?;
    let end = parse_port(high, input)?;
    if start > end {
        return Err(ConfigError::from(eyre!(
            "port range '{raw}' is empty in port request '{input}'"
        )));
    }
    Ok(start..=end)
}

impl FromStr for PortSpec {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("any") {
            return Ok(Self::Any);
        }
        if trimmed.eq_ignore_ascii_case("default") || trimmed == "-1" {
            return Ok(Self::Default);
        }

        let mut ranges = Vec::new();
        let mut singles = BTreeSet::new();
        for item in trimmed.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            if item.contains('-') {
                ranges.push(parse_range(item, trimmed)?);
            } else {
                singles.insert(parse_port(item, trimmed)?);
            }
        }

        match (ranges.len(), singles.len()) {
            (0, 0) => Err(ConfigError::from(eyre!("empty port request '{trimmed}'"))),
            (0, 1) => Ok(singles.into_iter().next().map_or(Self::Any, Self::Fixed)),
            (0, _) => Ok(Self::Set(singles)),
            (1, 0) => Ok(ranges.into_iter().next().map_or(Self::Any, Self::Range)),
            _ => {
                let mut parts: Vec<Self> = ranges.into_iter().map(Self::Range).collect();
                if !singles.is_empty() {
                    parts.push(Self::Set(singles));
                }
                Ok(Self::Mixed(parts))
            }
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(port) => write!(f, "{port}"),
            Self::Any => f.write_str("any"),
            Self::Default => f.write_str("default"),
            Self::Range(range) => write!(f, "{}-{}", range.start(), range.end()),
            Self::Set(ports) => {
                let rendered: Vec<String> = ports.iter().map(u16::to_string).collect();
                f.write_str(&rendered.join(","))
            }
            Self::Mixed(parts) => {
                let rendered: Vec<String> = parts.iter().map(Self::to_string).collect();
                f.write_str(&rendered.join(","))
            }
        }
    }
}

impl From<u16> for PortSpec {
    fn from(port: u16) -> Self {
        Self::Fixed(port)
    }
}

impl From<RangeInclusive<u16>> for PortSpec {
    fn from(range: RangeInclusive<u16>) -> Self {
        Self::Range(range)
    }
}
