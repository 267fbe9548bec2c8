//! Config file loading and command-line value parsing.

use murmur_core::{Member, MemberId};
use murmur_swim::SwimConfig;
use std::path::Path;
use std::str::FromStr;

/// Errors from loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for the engine config
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A command-line value is malformed
    #[error("invalid {what} '{value}': expected {expected}")]
    Malformed {
        /// Kind of value
        what: &'static str,
        /// Offending input
        value: String,
        /// Expected shape
        expected: &'static str,
    },
}

/// Load an engine config from a JSON file; missing fields take defaults
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config(path: &Path) -> Result<SwimConfig, SettingsError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SettingsError::Parse { path: display, source })
}

/// A seed peer given as `ID@HOST:SWIM_PORT:GOSSIP_PORT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPeer(pub Member);

impl FromStr for SeedPeer {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SettingsError::Malformed {
            what: "peer",
            value: s.to_string(),
            expected: "ID@HOST:SWIM_PORT:GOSSIP_PORT",
        };
        let (id, endpoint) = s.split_once('@').ok_or_else(malformed)?;
        let id = MemberId::parse(id).map_err(|_| malformed())?;
        let mut parts = endpoint.rsplitn(3, ':');
        let gossip_port = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let swim_port = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(malformed)?;
        Ok(Self(Member::new(id, host, swim_port, gossip_port)))
    }
}

/// A `GROUP=VALUE` pair, as in `--service redis.default=6379`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupValue<T> {
    /// Service group
    pub group: String,
    /// Associated value
    pub value: T,
}

impl<T: FromStr> FromStr for GroupValue<T> {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SettingsError::Malformed {
            what: "group setting",
            value: s.to_string(),
            expected: "GROUP=NUMBER",
        };
        let (group, value) = s.split_once('=').ok_or_else(malformed)?;
        if group.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            group: group.to_string(),
            value: value.parse().map_err(|_| malformed())?,
        })
    }
}
