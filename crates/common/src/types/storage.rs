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

//! Storage words, slot locations and execution step contexts.
//!
//! Contract storage is a map from 256-bit slots to 32-byte words. Nodes expose it
//! keyed by `keccak256(slot)`, so every snapshot in SlotLens is a [`StorageMap`]
//! from hashed key to a [`StorageEntry`] carrying the raw slot (when the node
//! knows it) and the stored word.

use std::{collections::BTreeMap, fmt};

use alloy_primitives::{keccak256, Address, TxHash, B256, U256};
use serde::{Deserialize, Deserializer, Serialize};

/// Number of bytes in one storage word.
pub const WORD_SIZE: usize = 32;

/// Storage keyed by the keccak256 hash of the raw slot.
pub type StorageMap = BTreeMap<B256, StorageEntry>;

/// One storage word together with the slot it lives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    /// The raw slot, if the node knows the preimage of the hashed key
    #[serde(rename = "key", default)]
    pub raw_slot: Option<U256>,
    /// The word stored at the slot
    #[serde(deserialize_with = "deserialize_word")]
    pub value: B256,
}

impl StorageEntry {
    /// Creates an entry for a known raw slot.
    pub fn new(raw_slot: U256, value: B256) -> Self {
        Self { raw_slot: Some(raw_slot), value }
    }

    /// An all-zero word, used for slots that have never been written.
    pub fn zero(raw_slot: Option<U256>) -> Self {
        Self { raw_slot, value: B256::ZERO }
    }

    /// The stored word as an unsigned integer.
    pub fn value_u256(&self) -> U256 {
        U256::from_be_bytes(self.value.0)
    }
}

/// Nodes are not consistent about padding storage words, so accept any hex quantity.
fn deserialize_word<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let value = U256::deserialize(deserializer)?;
    Ok(word_from_u256(value))
}

/// Returns the key under which `slot` appears in a [`StorageMap`].
pub fn hashed_slot_key(slot: U256) -> B256 {
    keccak256(slot.to_be_bytes::<WORD_SIZE>())
}

/// Converts an integer into its big-endian 32-byte word.
pub fn word_from_u256(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<WORD_SIZE>())
}

/// A byte range inside a storage slot.
///
/// `offset` counts bytes from the least-significant (right) end of the word, which
/// is how the Solidity compiler packs small values into a shared slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StorageLocation {
    /// The storage slot
    pub slot: U256,
    /// Byte offset from the least-significant end of the slot, `0..=31`
    pub offset: usize,
}

impl StorageLocation {
    /// Creates a new location.
    pub const fn new(slot: U256, offset: usize) -> Self {
        Self { slot, offset }
    }

    /// The start of a slot.
    pub const fn from_slot(slot: U256) -> Self {
        Self { slot, offset: 0 }
    }

    /// Resolves a location expressed relative to `self` (e.g. a struct member) into an
    /// absolute one. Slot arithmetic wraps like the EVM does.
    pub fn shifted(&self, relative: &Self) -> Self {
        Self { slot: self.slot.wrapping_add(relative.slot), offset: self.offset + relative.offset }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{}", self.slot, self.offset)
    }
}

/// The account whose storage is being inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageOwner {
    /// A deployed contract
    Account(Address),
    /// A contract that is being created at the given execution step and has no
    /// address (nor any prior storage) yet
    ContractCreation {
        /// Step at which the creation started
        step: usize,
    },
}

impl StorageOwner {
    /// Returns true if this is a contract-creation placeholder.
    pub fn is_contract_creation(&self) -> bool {
        matches!(self, Self::ContractCreation { .. })
    }

    /// Returns the account address, if any.
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::Account(address) => Some(*address),
            Self::ContractCreation { .. } => None,
        }
    }
}

impl From<Address> for StorageOwner {
    fn from(address: Address) -> Self {
        Self::Account(address)
    }
}

impl fmt::Display for StorageOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(address) => write!(f, "{}", address.to_checksum(None)),
            Self::ContractCreation { step } => write!(f, "(Contract Creation - Step {step})"),
        }
    }
}

/// Identifies one decode frame: a transaction, a step inside its execution, and the
/// account whose storage is observed at that step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionStepContext {
    /// Transaction being replayed
    pub transaction: TxHash,
    /// Index of the execution step inside the transaction trace
    pub step: usize,
    /// Account whose storage is observed
    pub address: StorageOwner,
}

impl ExecutionStepContext {
    /// Creates a new context.
    pub fn new(transaction: TxHash, step: usize, address: impl Into<StorageOwner>) -> Self {
        Self { transaction, step, address: address.into() }
    }
}
