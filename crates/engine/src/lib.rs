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

//! SlotLens engine: point-in-time decoding of EVM contract storage.
//!
//! The engine turns Solidity type strings taken from the compiler AST into storage
//! layouts ([`layout`]), decodes values from storage, memory and the stack
//! ([`decode`]), and reads historical storage through a paged, cached resolver that
//! is overlaid with the writes a transaction made up to a given step ([`storage`]).
//!
//! [`StateDecoder`] and [`decode_locals`] tie these pieces together for callers that
//! have an execution step and want every variable of a contract decoded.

pub mod config;
pub use config::*;

pub mod decode;

pub mod error;
pub use error::*;

pub mod layout;
pub use layout::*;

pub mod locals;
pub use locals::*;

pub mod state;
pub use state::*;

pub mod storage;
pub use storage::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
