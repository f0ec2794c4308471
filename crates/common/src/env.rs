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

//! Environment variable name constants for SlotLens configuration.
//!
//! # Environment Variables
//!
//! - [`SLOTLENS_CONFIG`] - Path to a TOML decoder configuration file
//! - [`SLOTLENS_RPC_URL`] - JSON-RPC endpoint used by the command line front-end
//! - [`SLOTLENS_LOG_DIR`] - Overrides the directory used for file logging

/// Environment variable pointing at a TOML file with decoder limits.
///
/// The file is deserialized into the engine's `DecoderConfig`; missing keys fall
/// back to their defaults.
///
/// # Example
///
/// ```bash
/// SLOTLENS_CONFIG=./slotlens.toml slotlens state --tx 0x... --contract Token
/// ```
pub const SLOTLENS_CONFIG: &str = "SLOTLENS_CONFIG";

/// Environment variable holding the JSON-RPC endpoint.
///
/// The node must expose the `debug_storageRangeAt` and `debug_preimage` methods.
pub const SLOTLENS_RPC_URL: &str = "SLOTLENS_RPC_URL";

/// Environment variable overriding the log directory.
///
/// # Default
///
/// When not set, logs go to `slotlens-logs/<component>` under the system temp dir.
pub const SLOTLENS_LOG_DIR: &str = "SLOTLENS_LOG_DIR";
