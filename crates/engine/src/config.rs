// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Decoder limits.

use std::{fs, path::Path};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use slotlens_common::env::SLOTLENS_CONFIG;
use tracing::debug;

/// Limits applied while resolving and decoding storage.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Entries requested per storage range page
    pub max_range_entries: usize,
    /// Array elements decoded before the rest is elided
    pub max_array_elements: usize,
    /// Largest `bytes`/`string` payload read from storage or memory
    pub max_bytes_length: usize,
    /// How many levels of enclosing mappings are looked up for a recovered base slot
    pub max_mapping_depth: usize,
    /// Slots of a mapping value tried when recovering the keys of multi-slot values
    pub max_value_slots: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_range_entries: 100,
            max_array_elements: 300,
            max_bytes_length: 1 << 20,
            max_mapping_depth: 4,
            max_value_slots: 64,
        }
    }
}

impl DecoderConfig {
    /// Set the storage range page size
    pub fn with_max_range_entries(mut self, entries: usize) -> Self {
        self.max_range_entries = entries;
        self
    }

    /// Set the array element cap
    pub fn with_max_array_elements(mut self, elements: usize) -> Self {
        self.max_array_elements = elements;
        self
    }

    /// Set the byte string length cap
    pub fn with_max_bytes_length(mut self, length: usize) -> Self {
        self.max_bytes_length = length;
        self
    }

    /// Set the nested mapping lookup depth
    pub fn with_max_mapping_depth(mut self, depth: usize) -> Self {
        self.max_mapping_depth = depth;
        self
    }

    /// Set how many slots of a mapping value are tried during key recovery
    pub fn with_max_value_slots(mut self, slots: usize) -> Self {
        self.max_value_slots = slots;
        self
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse decoder config as TOML")
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded decoder configuration from {:?}", path);
        Ok(config)
    }

    /// Load from the file named by `SLOTLENS_CONFIG`, or the defaults when unset
    pub fn from_env() -> Result<Self> {
        match std::env::var(SLOTLENS_CONFIG) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path:?}"))?;
        Ok(())
    }
}
