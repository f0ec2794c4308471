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

//! Error types for layout planning and storage access.
//!
//! None of these abort a decoding session: the decoders turn them into
//! [`DecodedData::Error`](slotlens_common::DecodedData::Error) values attached to the
//! variable, member or element that failed.

use alloy_primitives::{Address, B256};
use slotlens_common::StorageOwner;
use thiserror::Error;

/// Failure to turn a Solidity type string into a [`TypeDescriptor`](crate::TypeDescriptor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeResolutionError {
    /// The leading token of the type string is not a supported type class
    #[error("unsupported type `{0}`")]
    UnsupportedType(String),
    /// The type string does not follow the compiler's syntax
    #[error("malformed type string `{0}`")]
    Malformed(String),
    /// A struct referenced by the type string has no known definition
    #[error("unknown struct `{0}`")]
    UnknownStruct(String),
    /// An enum referenced by the type string has no known definition
    #[error("unknown enum `{0}`")]
    UnknownEnum(String),
    /// The contract whose layout was requested has no known definition
    #[error("unknown contract `{0}`")]
    UnknownContract(String),
    /// A struct contains itself other than behind a dynamic array or a mapping, or a
    /// reference back to a struct outlived the struct's layout
    #[error("recursive struct `{0}` cannot be laid out here")]
    RecursiveStruct(String),
    /// A member of a struct failed to resolve
    #[error("member `{member}` of struct `{name}`: {source}")]
    Member {
        /// Struct name
        name: String,
        /// Member name
        member: String,
        /// Underlying failure
        #[source]
        source: Box<TypeResolutionError>,
    },
}

/// Failure to read storage or recover mapping keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The storage range oracle failed
    #[error("storage range query for {address} at {start_key} failed: {reason}")]
    RangeQuery {
        /// Queried account
        address: Address,
        /// Hashed key the page started from
        start_key: B256,
        /// Description of the failure
        reason: String,
    },
    /// The accumulated writes of the transaction could not be obtained
    #[error("storage writes of {address} through step {step} unavailable: {reason}")]
    Writes {
        /// Queried account or contract creation
        address: StorageOwner,
        /// Step the writes were accumulated through
        step: usize,
        /// Description of the failure
        reason: String,
    },
    /// The oracle returned something that is not storage
    #[error("the storage has not been provided: {0}")]
    Malformed(String),
}

/// Failure inside a decoder. Always converted into an error value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Reading a slot failed
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The type could not be resolved
    #[error(transparent)]
    Type(#[from] TypeResolutionError),
    /// The requested stack item is not on the stack
    #[error("stack underflow at depth {0}")]
    StackUnderflow(usize),
    /// There is no decoder for the data location
    #[error("no decoder for {0}")]
    UnsupportedLocation(String),
    /// A length or offset is beyond the configured caps
    #[error("{what} of {value} exceeds the limit of {limit}")]
    TooLarge {
        /// What was measured
        what: &'static str,
        /// Measured value
        value: String,
        /// Configured limit
        limit: usize,
    },
}
