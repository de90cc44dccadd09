//! Engine configuration.
//!
//! `EngineOptions` covers every configuration key in the library surface
//! (spec §6). Options are loadable from a TOML file overlaid with
//! environment variables via `figment`, the same `figment` + `toml`
//! configuration stack used elsewhere in this codebase.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::{DATA_MAX, NAME_MAX};

/// Default cell stride in bytes. Immutable once a file is created.
pub const DEFAULT_CELL_SIZE: u32 = 1024;

/// Default per-field name cap enforced at `add`/`update` time.
pub const DEFAULT_NAME_MAX: u16 = 64;

/// Default per-field data cap enforced at `add`/`update` time.
pub const DEFAULT_DATA_MAX: u32 = 510;

/// Default WAL flush interval in milliseconds.
pub const DEFAULT_WAL_FLUSH_INTERVAL_MS: u64 = 10;

/// Default WAL flush batch size (entries).
pub const DEFAULT_WAL_FLUSH_BATCH: usize = 256;

/// Engine-wide configuration, matching spec §6's `options` table exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// On-disk cell stride in bytes. Immutable after first create.
    pub cell_size: u32,
    /// Soft cap on `name` length enforced at `add`/`update`. Must be
    /// `<= NAME_MAX` (the hard, compiled-in field width).
    pub name_max: u16,
    /// Soft cap on `data` length enforced at `add`/`update`. Must be
    /// `<= DATA_MAX` (the hard, compiled-in field width).
    pub data_max: u32,
    /// Whether the write-ahead log is enabled at all.
    pub wal_enabled: bool,
    /// Maximum time a batch of WAL entries may sit buffered before an
    /// implicit flush.
    pub wal_flush_interval_ms: u64,
    /// Maximum number of buffered WAL entries before an implicit flush.
    pub wal_flush_batch: usize,
    /// Advisory: trigger an auto-save after this many milliseconds have
    /// elapsed since the last save. `None` disables the time trigger.
    pub auto_save_interval_ms: Option<u64>,
    /// Advisory: trigger an auto-save after this many node mutations
    /// since the last save. `None` disables the count trigger.
    pub auto_save_interval_nodes: Option<u64>,
    /// Explicit license key (base64). Falls back to `LICENSE_KEY`, the
    /// per-user config file, and the file next to the engine binary, in
    /// that order, when `None`.
    pub license_key: Option<String>,
    /// Whether to physically preallocate the lattice file (no sparse
    /// holes). Defaults to `true` everywhere; Windows requires it.
    pub preallocate: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            name_max: DEFAULT_NAME_MAX,
            data_max: DEFAULT_DATA_MAX,
            wal_enabled: true,
            wal_flush_interval_ms: DEFAULT_WAL_FLUSH_INTERVAL_MS,
            wal_flush_batch: DEFAULT_WAL_FLUSH_BATCH,
            auto_save_interval_ms: None,
            auto_save_interval_nodes: None,
            license_key: None,
            preallocate: true,
        }
    }
}

impl EngineOptions {
    /// Loads options from an optional TOML file, overlaid with
    /// `SYNRIX_*`-prefixed environment variables, overlaid with any
    /// programmatic overrides already set on `self`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArgumentOutOfRange`] if the merged configuration
    /// fails [`EngineOptions::validate`].
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineOptions::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("SYNRIX_"));

        let options: EngineOptions = figment
            .extract()
            .map_err(|e| Error::ArgumentOutOfRange(format!("invalid configuration: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Validates internal consistency: field caps must fit within the
    /// hard, compiled-in field widths, and the cell must be large enough
    /// to hold a cell header plus the configured caps.
    pub fn validate(&self) -> Result<()> {
        if self.name_max == 0 || usize::from(self.name_max) > NAME_MAX {
            return Err(Error::ArgumentOutOfRange(format!(
                "name_max must be in 1..={NAME_MAX}, got {}",
                self.name_max
            )));
        }
        if self.data_max as usize > DATA_MAX {
            return Err(Error::ArgumentOutOfRange(format!(
                "data_max must be <= {DATA_MAX}, got {}",
                self.data_max
            )));
        }
        if !self.cell_size.is_power_of_two() || !(1024..=4096).contains(&self.cell_size) {
            return Err(Error::ArgumentOutOfRange(format!(
                "cell_size must be a power of two in 1024..=4096, got {}",
                self.cell_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineOptions::default().validate().unwrap();
    }

    #[test]
    fn rejects_cell_size_not_power_of_two() {
        let mut opts = EngineOptions::default();
        opts.cell_size = 1000;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_name_max_over_hard_limit() {
        let mut opts = EngineOptions::default();
        opts.name_max = 1000;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_data_max_over_hard_limit() {
        let mut opts = EngineOptions::default();
        opts.data_max = 10_000;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let opts = EngineOptions::load(None).unwrap();
        assert_eq!(opts.cell_size, DEFAULT_CELL_SIZE);
    }
}
