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

//! SlotLens Common - Shared types for SlotLens components
//!
//! This crate provides the storage data model shared by the decoding engine and
//! the command line front-end, the decoded value representation and its
//! human-readable rendering, and the logging setup used by every binary.

/// Storage words, locations, execution step contexts and decoded values
pub mod types;

/// Environment variable names recognised by SlotLens
pub mod env;
/// Logging setup and utilities for consistent logging across SlotLens components
pub mod logging;

pub use logging::*;
pub use types::*;
