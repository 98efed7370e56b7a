//! Configuration for the fetch engine.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RHIZOME_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rhizome/config.toml
//!   3. ~/.config/rhizome/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One entry in the size-tiered queue. `bound` is exclusive; `None` means
/// unbounded (always the last tier).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierConfig {
    pub bound: Option<u64>,
    pub capacity: usize,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RhizomeConfig {
    pub scheduler: SchedulerConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ordered smallest-to-largest. The last tier's bound should be `None`.
    pub tiers: Vec<TierConfig>,
    /// Scratch files live here while a fetch is in flight.
    pub scratch_dir: PathBuf,
    /// How long a suspect manifest is kept in the ignore cache, in ms.
    pub ignore_ttl_ms: u64,
    /// Delay before the queue activator runs after an enqueue, in ms.
    pub activator_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Idle timeout for the stream transport (dial, headers, or body), ms.
    pub stream_idle_timeout_ms: u64,
    /// Idle timeout for a datagram payload fetch, ms.
    pub datagram_payload_idle_timeout_ms: u64,
    /// Idle timeout for a datagram manifest-by-prefix fetch, ms.
    pub datagram_manifest_idle_timeout_ms: u64,
    /// Retransmit cadence for a payload request, ms.
    pub payload_retransmit_ms: u64,
    /// Retransmit cadence for a manifest request, ms.
    pub manifest_retransmit_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RhizomeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            scratch_dir: data_dir().join("fetch"),
            ignore_ttl_ms: 60_000,
            activator_delay_ms: 500,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stream_idle_timeout_ms: 5_000,
            datagram_payload_idle_timeout_ms: 5_000,
            datagram_manifest_idle_timeout_ms: 2_000,
            payload_retransmit_ms: 133,
            manifest_retransmit_ms: 100,
        }
    }
}

/// The reference tier table: {10 KB, 100 KB, 1 MB, 10 MB, unbounded} with
/// capacities {5, 4, 3, 2, 1}.
pub fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            bound: Some(10_000),
            capacity: 5,
        },
        TierConfig {
            bound: Some(100_000),
            capacity: 4,
        },
        TierConfig {
            bound: Some(1_000_000),
            capacity: 3,
        },
        TierConfig {
            bound: Some(10_000_000),
            capacity: 2,
        },
        TierConfig {
            bound: None,
            capacity: 1,
        },
    ]
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("rhizome")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("rhizome")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RhizomeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RhizomeConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RHIZOME_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RhizomeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply RHIZOME_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RHIZOME_SCHEDULER__SCRATCH_DIR") {
            self.scheduler.scratch_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RHIZOME_SCHEDULER__IGNORE_TTL_MS") {
            if let Ok(ms) = v.parse() {
                self.scheduler.ignore_ttl_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("RHIZOME_TRANSPORT__STREAM_IDLE_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.transport.stream_idle_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("RHIZOME_TRANSPORT__PAYLOAD_RETRANSMIT_MS") {
            if let Ok(ms) = v.parse() {
                self.transport.payload_retransmit_ms = ms;
            }
        }
    }
}
