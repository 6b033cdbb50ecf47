//! Domain capacities.
//!
//! Values come from one of three places:
//! - [`DomainConfig::default`]: the built-in sizes
//! - [`DomainConfig::from_env`]: `ENCLAVELIBC_*` variables, parsed loosely
//! - [`DomainConfig::from_json`]: a manifest object using the field names below
//!
//! Every constructor's result still goes through [`DomainConfig::validate`]
//! when a [`crate::Domain`] is built.

use serde::{Deserialize, Serialize};

use crate::error::{ThreadError, ThreadResult};

pub const ENV_MAX_THREADS: &str = "ENCLAVELIBC_MAX_THREADS";
pub const ENV_TSD_KEYS: &str = "ENCLAVELIBC_TSD_KEYS";
pub const ENV_TSD_RESERVED: &str = "ENCLAVELIBC_TSD_RESERVED";
pub const ENV_MAX_PENDING: &str = "ENCLAVELIBC_MAX_PENDING";

/// Upper bound for any single capacity read from the environment.
const LOOSE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Thread descriptor arena capacity.
    pub max_threads: usize,
    /// Words per thread-specific-data page (512 pointers = one 4 KiB page).
    pub tsd_keys: usize,
    /// Low page words that alias descriptor header fields and are never handed out as keys.
    pub tsd_reserved: usize,
    /// Capacity of the pending new-thread request FIFO.
    pub max_pending_threads: usize,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            max_threads: 64,
            tsd_keys: 512,
            tsd_reserved: 8,
            max_pending_threads: 64,
        }
    }
}

impl DomainConfig {
    /// Reads the `ENCLAVELIBC_*` environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: usize| {
            lookup(key)
                .map(|raw| parse_capacity_loose(&raw, fallback))
                .unwrap_or(fallback)
        };
        let cfg = Self {
            max_threads: read(ENV_MAX_THREADS, defaults.max_threads),
            tsd_keys: read(ENV_TSD_KEYS, defaults.tsd_keys),
            tsd_reserved: read(ENV_TSD_RESERVED, defaults.tsd_reserved),
            max_pending_threads: read(ENV_MAX_PENDING, defaults.max_pending_threads),
        };
        // A reserved range that swallows the page is as unusable as garbage input.
        if cfg.tsd_reserved >= cfg.tsd_keys {
            log::warn!(
                "tsd_reserved={} >= tsd_keys={}, using TSD defaults",
                cfg.tsd_reserved,
                cfg.tsd_keys
            );
            return Self {
                tsd_keys: defaults.tsd_keys,
                tsd_reserved: defaults.tsd_reserved,
                ..cfg
            };
        }
        cfg
    }

    /// Parses a manifest JSON object. Missing fields take their defaults.
    pub fn from_json(text: &str) -> ThreadResult<Self> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| {
            log::warn!("rejecting domain config: {e}");
            ThreadError::InvalidArgument
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> ThreadResult<()> {
        if self.max_threads == 0
            || self.tsd_keys == 0
            || self.max_pending_threads == 0
            || self.tsd_reserved >= self.tsd_keys
        {
            return Err(ThreadError::InvalidArgument);
        }
        // Slot indices travel to the host as u32.
        if u32::try_from(self.max_threads).is_err() {
            return Err(ThreadError::InvalidArgument);
        }
        Ok(())
    }
}

/// Positive decimal or `0x` hex, else `fallback`.
fn parse_capacity_loose(raw: &str, fallback: usize) -> usize {
    let s = raw.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => s.parse::<usize>().ok(),
    };
    match parsed {
        Some(v) if v > 0 && v <= LOOSE_LIMIT => v,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = DomainConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tsd_keys, 512);
        assert_eq!(cfg.tsd_reserved, 8);
    }

    #[test]
    fn env_values_override_defaults() {
        let cfg = DomainConfig::from_lookup(lookup_from(&[
            (ENV_MAX_THREADS, "16"),
            (ENV_TSD_KEYS, "0x40"),
            (ENV_MAX_PENDING, " 4 "),
        ]));
        assert_eq!(cfg.max_threads, 16);
        assert_eq!(cfg.tsd_keys, 64);
        assert_eq!(cfg.max_pending_threads, 4);
        assert_eq!(cfg.tsd_reserved, 8);
    }

    #[test]
    fn garbage_env_values_fall_back() {
        let cfg = DomainConfig::from_lookup(lookup_from(&[
            (ENV_MAX_THREADS, "lots"),
            (ENV_TSD_KEYS, "0"),
            (ENV_MAX_PENDING, "-3"),
        ]));
        assert_eq!(cfg, DomainConfig::default());
    }

    #[test]
    fn env_reserved_range_swallowing_page_falls_back() {
        let cfg = DomainConfig::from_lookup(lookup_from(&[
            (ENV_TSD_KEYS, "8"),
            (ENV_TSD_RESERVED, "8"),
        ]));
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tsd_keys, 512);
    }

    #[test]
    fn json_fills_missing_fields() {
        let cfg = DomainConfig::from_json(r#"{"max_threads": 4}"#).expect("valid json");
        assert_eq!(cfg.max_threads, 4);
        assert_eq!(cfg.tsd_keys, 512);
    }

    #[test]
    fn json_rejects_malformed_or_invalid() {
        assert_eq!(
            DomainConfig::from_json("{not json"),
            Err(ThreadError::InvalidArgument)
        );
        assert_eq!(
            DomainConfig::from_json(r#"{"tsd_keys": 4, "tsd_reserved": 4}"#),
            Err(ThreadError::InvalidArgument)
        );
        assert_eq!(
            DomainConfig::from_json(r#"{"max_threads": 0}"#),
            Err(ThreadError::InvalidArgument)
        );
    }
}
